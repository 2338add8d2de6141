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

use std::sync::Arc;

use super::record::Record;
use super::summary::Summary;
use crate::error::{DriverError, Result};
use crate::value::Value;

/// A result that has been fully fetched into memory.
#[derive(Debug)]
pub struct EagerResult {
    pub keys: Vec<Arc<String>>,
    pub records: Vec<Record>,
    pub summary: Summary,
}

impl EagerResult {
    /// Expect the result to contain exactly one record and return it.
    pub fn into_single(self) -> Result<Record> {
        let mut records = self.records;
        match records.len() {
            1 => Ok(records.pop().expect("checked length to be 1")),
            0 => Err(DriverError::usage_error("no records were found")),
            _ => Err(DriverError::usage_error("more than one record was found")),
        }
    }

    /// Expect the result to contain exactly one record with exactly one
    /// value and return it.
    pub fn into_scalar(self) -> Result<Value> {
        let record = self.into_single()?;
        let mut values = record.into_values().collect::<Vec<_>>();
        match values.len() {
            1 => Ok(values.pop().expect("checked length to be 1")),
            0 => Err(DriverError::usage_error("record contains no value")),
            _ => Err(DriverError::usage_error(
                "record contains more than one value",
            )),
        }
    }
}
