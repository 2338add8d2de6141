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

use std::iter;
use std::ops::Deref;
use std::sync::Arc;

use super::io::bolt::RecordValues;
use crate::error::{DriverError, Result};
use crate::value::Value;

/// A record is a fixed-size, ordered tuple of named values representing one
/// row of a query result.
#[derive(Debug)]
pub struct Record {
    entries: Vec<(Arc<String>, Option<Value>)>,
}

impl Record {
    pub(crate) fn new(keys: &[Arc<String>], fields: RecordValues) -> Self {
        assert_eq!(keys.len(), fields.len());
        Self {
            entries: iter::zip(keys.iter().map(Arc::clone), fields.into_iter().map(Some)).collect(),
        }
    }

    /// Iterate over the keys of the record.
    /// The order of the keys corresponds to the order of the values.
    pub fn keys(&self) -> impl Iterator<Item = Arc<String>> + '_ {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|_| Arc::clone(key)))
    }

    /// Iterate over the values of the record.
    /// The order of the values corresponds to the order of the keys.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries
            .iter()
            .map(|(_, value)| value)
            .filter_map(Option::as_ref)
    }

    /// Iterate over the values of the record.
    ///
    /// This is the same as [`Record::values()`], but consumes the record and
    /// returns owned values.
    pub fn into_values(self) -> impl Iterator<Item = Value> {
        self.entries.into_iter().filter_map(|(_, value)| value)
    }

    /// Iterate over the key-value pairs of the record.
    pub fn entries(&self) -> impl Iterator<Item = (Arc<String>, &Value)> {
        self.entries
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| (Arc::clone(key), value)))
    }

    /// Iterate over the key-value pairs of the record.
    ///
    /// This is the same as [`Record::entries()`], but consumes the record
    /// and returns owned values.
    pub fn into_entries(self) -> impl Iterator<Item = (Arc<String>, Value)> {
        self.entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key, value)))
    }

    /// Get the value for the given key or [`None`] if the key does not
    /// exist.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
            .find_map(|(k, v)| if k.deref() == key { Some(v) } else { None })
    }

    /// Get the value for the given key.
    ///
    /// Unlike [`Record::value()`], an unknown key produces an error naming
    /// the keys that are available.
    ///
    /// # Example
    /// ```no_run
    /// # use graphbolt::driver::Record;
    /// # fn example(record: &Record) {
    /// let value = record.get("x").unwrap();
    /// # }
    /// ```
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.value(key).ok_or_else(|| {
            DriverError::usage_error(format!(
                "record has no key {:?}; available keys are {:?}",
                key,
                self.keys().collect::<Vec<_>>()
            ))
        })
    }

    /// Get the value at the given position or [`None`] if the index is out
    /// of bounds (or the value was taken).
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).and_then(|(_, v)| v.as_ref())
    }

    /// Get the value for the given key or [`None`] if the key does not
    /// exist.
    ///
    /// This is the same as [`Record::value()`], but it removes the entry and
    /// returns an owned value.
    pub fn take_value(&mut self, key: &str) -> Option<Value> {
        self.entries
            .iter_mut()
            .filter(|(k, _)| k.deref() == key)
            .find_map(|(_, v)| v.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let keys = vec![
            Arc::new(String::from("one")),
            Arc::new(String::from("two")),
        ];
        Record::new(&keys, vec![Value::Integer(1), Value::Integer(2)])
    }

    #[test]
    fn test_access_by_key_and_index() {
        let record = record();
        assert_eq!(record.value("one"), Some(&Value::Integer(1)));
        assert_eq!(record.get("two").unwrap(), &Value::Integer(2));
        assert_eq!(record.get_index(0), Some(&Value::Integer(1)));
        assert_eq!(record.get_index(2), None);
    }

    #[test]
    fn test_unknown_key_error_lists_available_keys() {
        let record = record();
        let err = record.get("three").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("three"));
        assert!(message.contains("one"));
        assert!(message.contains("two"));
    }

    #[test]
    fn test_take_value() {
        let mut record = record();
        assert_eq!(record.take_value("one"), Some(Value::Integer(1)));
        assert_eq!(record.take_value("one"), None);
        assert_eq!(record.keys().collect::<Vec<_>>(), vec![Arc::new(
            String::from("two")
        )]);
    }
}
