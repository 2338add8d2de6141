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

//! Causal consistency tokens.

use std::collections::HashSet;
use std::ops::Add;

/// A set of opaque bookmarks, each naming a causal point the server
/// guarantees to have caught up with before serving work carrying it.
///
/// Bookmarks are obtained from [`Session::last_bookmarks()`] and passed to
/// new sessions via [`SessionConfig::with_bookmarks()`] to chain the
/// sessions causally.
///
/// # Example
/// ```
/// use graphbolt::bookmarks::Bookmarks;
///
/// let b1 = Bookmarks::from_raw(["bm:1", "bm:2"]);
/// let b2 = Bookmarks::from_raw(["bm:2", "bm:3"]);
///
/// // bookmark sets can be combined
/// let combined = &b1 + &b2;
/// assert_eq!(combined.count(), 3);
/// ```
///
/// [`Session::last_bookmarks()`]: crate::session::Session::last_bookmarks
/// [`SessionConfig::with_bookmarks()`]: crate::session::SessionConfig::with_bookmarks
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bookmarks {
    bookmarks: HashSet<String>,
}

impl Bookmarks {
    /// Create an empty set of bookmarks.
    pub fn empty() -> Self {
        Bookmarks {
            bookmarks: HashSet::new(),
        }
    }

    /// Create a set of bookmarks from raw bookmark strings.
    pub fn from_raw(raw: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Bookmarks {
            bookmarks: raw.into_iter().map(Into::into).collect(),
        }
    }

    /// The number of bookmarks in the set.
    pub fn count(&self) -> usize {
        self.bookmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Iterate over the raw bookmark strings.
    pub fn raw(&self) -> impl Iterator<Item = &str> {
        self.bookmarks.iter().map(String::as_str)
    }

    /// Turn the set into the raw bookmark strings.
    pub fn into_raw(self) -> impl Iterator<Item = String> {
        self.bookmarks.into_iter()
    }
}

impl Add for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.bookmarks.extend(rhs.bookmarks);
        self
    }
}

impl Add<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: &Bookmarks) -> Self::Output {
        self.bookmarks.extend(rhs.bookmarks.iter().cloned());
        self
    }
}

impl Add for &Bookmarks {
    type Output = Bookmarks;

    fn add(self, rhs: Self) -> Self::Output {
        self.clone() + rhs
    }
}

impl Add<Bookmarks> for &Bookmarks {
    type Output = Bookmarks;

    fn add(self, rhs: Bookmarks) -> Self::Output {
        rhs + self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_deduplicates() {
        let bookmarks = Bookmarks::from_raw(["bm:1", "bm:1", "bm:2"]);
        assert_eq!(bookmarks.count(), 2);
    }

    #[test]
    fn test_add_unions() {
        let combined = &Bookmarks::from_raw(["bm:1", "bm:2"]) + &Bookmarks::from_raw(["bm:2"]);
        assert_eq!(combined.count(), 2);
        let mut raw = combined.into_raw().collect::<Vec<_>>();
        raw.sort();
        assert_eq!(raw, vec!["bm:1", "bm:2"]);
    }

    #[test]
    fn test_empty() {
        assert!(Bookmarks::empty().is_empty());
        assert_eq!(Bookmarks::empty().count(), 0);
    }
}
