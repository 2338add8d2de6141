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

use std::io;

use crate::error::DriverError;

#[derive(thiserror::Error, Debug)]
#[error("failed serialization: {reason}")]
pub(crate) struct PackStreamSerializeError {
    reason: String,
    cause: Option<io::Error>,
}

impl From<String> for PackStreamSerializeError {
    fn from(reason: String) -> Self {
        Self {
            reason,
            cause: None,
        }
    }
}

impl From<&str> for PackStreamSerializeError {
    fn from(reason: &str) -> Self {
        String::from(reason).into()
    }
}

impl From<io::Error> for PackStreamSerializeError {
    fn from(err: io::Error) -> Self {
        let mut e: Self = format!("IO error while serializing: {}", err).into();
        e.cause = Some(err);
        e
    }
}

impl From<PackStreamSerializeError> for DriverError {
    fn from(err: PackStreamSerializeError) -> Self {
        match err.cause {
            None => Self::InvalidConfig {
                message: err.reason,
            },
            Some(cause) => DriverError::write_err(cause),
        }
    }
}

/// How a PackStream decode failed.
///
/// The deserializer operates on fully assembled message buffers, so running
/// out of input always means the value was truncated.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum PackStreamDeserializeErrorKind {
    TruncatedInput,
    UnknownMarker,
    InvalidUtf8,
    StructArityMismatch,
    UnknownStructSignature,
    ProtocolViolation,
}

#[derive(thiserror::Error, Debug)]
#[error("failed deserialization ({kind:?}): {reason}")]
pub(crate) struct PackStreamDeserializeError {
    kind: PackStreamDeserializeErrorKind,
    reason: String,
}

impl PackStreamDeserializeError {
    pub(crate) fn new(kind: PackStreamDeserializeErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub(crate) fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::new(PackStreamDeserializeErrorKind::ProtocolViolation, reason)
    }

    pub(crate) fn kind(&self) -> PackStreamDeserializeErrorKind {
        self.kind
    }
}

impl From<io::Error> for PackStreamDeserializeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::new(
                PackStreamDeserializeErrorKind::TruncatedInput,
                "input ended in the middle of a value",
            ),
            _ => Self::protocol_violation(format!("IO error while deserializing: {}", err)),
        }
    }
}

impl From<PackStreamDeserializeError> for DriverError {
    fn from(err: PackStreamDeserializeError) -> Self {
        DriverError::protocol_error(err.to_string())
    }
}
