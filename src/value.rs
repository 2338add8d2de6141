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

//! Values passed to and received from the database.

pub mod graph;
pub mod spatial;
pub mod time;

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use graph::{Node, Path, Relationship, UnboundRelationship};
use spatial::{Point2D, Point3D};
use time::{Date, DateTime, Duration, LocalDateTime, LocalTime, Time};

/// A value as it is sent to or received from the database.
///
/// This is a closed set of variants; the PackStream codec dispatches on the
/// variant tag for both encoding and decoding. Consumers either pattern match
/// or use the `try_into_*` accessors.
///
/// Maps are semantically unordered with unique keys. Integers are 64-bit
/// signed throughout; no lossy narrowing is performed by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Node(Node),
    Relationship(Relationship),
    UnboundRelationship(UnboundRelationship),
    Path(Path),
    Point2D(Point2D),
    Point3D(Point3D),
    Date(Date),
    Time(Time),
    LocalTime(LocalTime),
    DateTime(DateTime),
    LocalDateTime(LocalDateTime),
    Duration(Duration),
}

macro_rules! impl_value_from_into {
    ( $value:expr, $($ty:ty),* ) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    $value(value.into())
                }
            }
        )*
    };
}

impl_value_from_into!(Value::Boolean, bool);
impl_value_from_into!(Value::Integer, u8, u16, u32, i8, i16, i32, i64);
impl_value_from_into!(Value::Float, f32, f64);
impl_value_from_into!(Value::String, &str, String);
impl_value_from_into!(Value::Point2D, Point2D);
impl_value_from_into!(Value::Point3D, Point3D);
impl_value_from_into!(Value::Date, Date);
impl_value_from_into!(Value::Time, Time);
impl_value_from_into!(Value::LocalTime, LocalTime);
impl_value_from_into!(Value::DateTime, DateTime);
impl_value_from_into!(Value::LocalDateTime, LocalDateTime);
impl_value_from_into!(Value::Duration, Duration);

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(value: Vec<V>) -> Self {
        Value::List(value.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<HashMap<String, V>> for Value {
    fn from(value: HashMap<String, V>) -> Self {
        Value::Map(value.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        match value {
            None => Value::Null,
            Some(value) => value.into(),
        }
    }
}

macro_rules! impl_value_accessors {
    ( $( ($as_name:ident, $try_name:ident, $variant:ident, $ty:ty) ),* $(,)? ) => {
        $(
            pub fn $as_name(&self) -> Option<&$ty> {
                match self {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            /// Returns `Err(self)` if the value is of a different variant.
            pub fn $try_name(self) -> Result<$ty, Self> {
                match self {
                    Value::$variant(v) => Ok(v),
                    _ => Err(self),
                }
            }
        )*
    };
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    impl_value_accessors!(
        (as_bool, try_into_bool, Boolean, bool),
        (as_int, try_into_int, Integer, i64),
        (as_float, try_into_float, Float, f64),
        (as_bytes, try_into_bytes, Bytes, Vec<u8>),
        (as_string, try_into_string, String, String),
        (as_list, try_into_list, List, Vec<Value>),
        (as_map, try_into_map, Map, HashMap<String, Value>),
        (as_node, try_into_node, Node, Node),
        (as_relationship, try_into_relationship, Relationship, Relationship),
        (as_path, try_into_path, Path, Path),
    );

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Bytes(_) => "Bytes",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Relationship(_) => "Relationship",
            Value::UnboundRelationship(_) => "UnboundRelationship",
            Value::Path(_) => "Path",
            Value::Point2D(_) => "Point2D",
            Value::Point3D(_) => "Point3D",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::LocalTime(_) => "LocalTime",
            Value::DateTime(_) => "DateTime",
            Value::LocalDateTime(_) => "LocalDateTime",
            Value::Duration(_) => "Duration",
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "bytes{v:02X?}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::List(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                f.write_str("}")
            }
            Value::Node(v) => write!(f, "{v}"),
            Value::Relationship(v) => write!(f, "{v}"),
            Value::UnboundRelationship(v) => {
                write!(f, "UnboundRelationship(id={}, type={})", v.id, v.type_)
            }
            Value::Path(v) => write!(f, "{v}"),
            _ => write!(f, "{}({:?})", self.type_name(), self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_impls() {
        assert_eq!(Value::from(1_i32), Value::Integer(1));
        assert_eq!(Value::from(1.5), Value::Float(1.5));
        assert_eq!(Value::from("x"), Value::String("x".into()));
        assert_eq!(Value::from(vec![1, 2]), Value::List(vec![
            Value::Integer(1),
            Value::Integer(2),
        ]));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(1)), Value::Integer(1));
    }

    #[test]
    fn test_try_into_keeps_value_on_mismatch() {
        let value = Value::Integer(1);
        let err = value.try_into_string().unwrap_err();
        assert_eq!(err, Value::Integer(1));
    }
}
