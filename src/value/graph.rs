// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Graph entities as returned by the server: nodes, relationships, and paths.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use super::Value;

/// A node in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: HashMap<String, Value>,
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Node(id={}, labels={:?}, properties={:?})",
            self.id, self.labels, self.properties
        )
    }
}

/// A relationship between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start_node_id: i64,
    pub end_node_id: i64,
    pub type_: String,
    pub properties: HashMap<String, Value>,
}

impl Display for Relationship {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Relationship(id={}, type={}, start_node_id={}, end_node_id={}, properties={:?})",
            self.id, self.type_, self.start_node_id, self.end_node_id, self.properties
        )
    }
}

/// A relationship without endpoint information, as found inside [`Path`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub type_: String,
    pub properties: HashMap<String, Value>,
}

/// A path through the graph.
///
/// # Invariants
///  * `indices`
///    * is not empty
///    * has an even number of elements
///    * 1st, 3rd, ... entry is in the range
///      `-self.relationships.len()..0` or `1..=self.relationships.len()`
///    * 2nd, 4th, ... entry is in the range `0..self.nodes.len()`
///  * (this implies `nodes` and `relationships` are not empty)
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<UnboundRelationship>,
    /// Alternating relationship and node indices describing the traversal,
    /// relative to `relationships` (1-based, negated for reversed direction)
    /// and `nodes` (0-based).
    pub indices: Vec<isize>,
}

impl Path {
    /// Walk the path segment by segment.
    ///
    /// Each returned triple is `(start_node, relationship, end_node)` with
    /// the relationship's own direction restored (a segment may traverse the
    /// underlying relationship in reverse).
    ///
    /// # Panics
    /// Panics if `self.nodes`, `self.relationships`, or `self.indices` has
    /// been tampered with in a way that violates the invariants of a path.
    /// Such an invalid path cannot be obtained from the database, as the
    /// database's return values are validated before being converted to
    /// `Path`.
    pub fn traverse(&self) -> Vec<(&Node, &UnboundRelationship, &Node)> {
        let mut result = Vec::with_capacity(self.indices.len() / 2);
        let mut index_iter = self.indices.iter();
        let mut prev_node_idx = 0;
        let mut relationship_idx = *index_iter.next().expect("indices cannot be empty");
        let mut next_node_idx: usize = index_iter
            .next()
            .expect("indices must contain at least 2 elements")
            .to_owned()
            .try_into()
            .expect("2nd, 4th, ... entry in indices must be >= 0");
        loop {
            let mut start_node = &self.nodes[prev_node_idx];
            let mut end_node = &self.nodes[next_node_idx];
            if relationship_idx < 0 {
                (start_node, end_node) = (end_node, start_node);
                relationship_idx = -relationship_idx;
            }
            relationship_idx -= 1;
            let relationship = {
                let relationship_idx: usize = relationship_idx
                    .try_into()
                    .expect("1st, 3rd, ... entry in indices cannot be 0");
                &self.relationships[relationship_idx]
            };
            result.push((start_node, relationship, end_node));

            let Some(next_relationship_idx) = index_iter.next() else {
                break;
            };
            relationship_idx = *next_relationship_idx;
            prev_node_idx = next_node_idx;
            next_node_idx = index_iter
                .next()
                .expect("indices must contain an even number of elements")
                .to_owned()
                .try_into()
                .expect("2nd, 4th, ... entry in indices must be >= 0");
        }
        result
    }
}

/// # Panics
/// Panics if `Path`'s invariants are violated.
impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut last_node = &self.nodes[0];
        write!(f, "({})", last_node.id)?;
        for (start_node, relationship, end_node) in self.traverse() {
            if last_node.id == start_node.id {
                write!(f, "-[{}]->({})", relationship.id, end_node.id)?;
                last_node = end_node;
            } else {
                assert_eq!(last_node.id, end_node.id);
                write!(f, "<-[{}]-({})", relationship.id, start_node.id)?;
                last_node = start_node;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64) -> Node {
        Node {
            id,
            labels: vec![],
            properties: HashMap::new(),
        }
    }

    fn relationship(id: i64) -> UnboundRelationship {
        UnboundRelationship {
            id,
            type_: String::from("KNOWS"),
            properties: HashMap::new(),
        }
    }

    #[test]
    fn test_traverse_forward_and_reverse() {
        // (1)-[10]->(2)<-[11]-(3)
        let path = Path {
            nodes: vec![node(1), node(2), node(3)],
            relationships: vec![relationship(10), relationship(11)],
            indices: vec![1, 1, -2, 2],
        };
        let segments = path.traverse();
        assert_eq!(segments.len(), 2);
        let (start, rel, end) = segments[0];
        assert_eq!((start.id, rel.id, end.id), (1, 10, 2));
        let (start, rel, end) = segments[1];
        assert_eq!((start.id, rel.id, end.id), (3, 11, 2));
        assert_eq!(format!("{path}"), "(1)-[10]->(2)<-[11]-(3)");
    }
}
