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

use super::packstream::PackStreamDeserializer;
use crate::error::{DriverError, Result};
use crate::value::Value;

/// One message received from the server: a PackStream struct whose tag
/// names the message and whose fields are its payload.
#[derive(Debug)]
pub(crate) struct ServerMessage {
    pub tag: u8,
    pub fields: Vec<Value>,
}

impl ServerMessage {
    /// Parse a fully assembled message buffer. The buffer must hold exactly
    /// one message; trailing bytes are a protocol violation.
    pub(crate) fn parse(buffer: &[u8]) -> Result<Self> {
        let mut reader = buffer;
        let [marker, tag] = match reader {
            [marker, tag, rest @ ..] => {
                reader = rest;
                [*marker, *tag]
            }
            _ => {
                return Err(DriverError::protocol_error(
                    "server message shorter than marker and tag",
                ))
            }
        };
        if !(0xB0..=0xBF).contains(&marker) {
            return Err(DriverError::protocol_error(format!(
                "expected bolt message marker, received {marker:02X?}"
            )));
        }
        let field_count = marker - 0xB0;
        let mut fields = Vec::with_capacity(field_count.into());
        for _ in 0..field_count {
            let mut deserializer = PackStreamDeserializer::new(&mut reader);
            fields.push(deserializer.load()?);
        }
        if !reader.is_empty() {
            return Err(DriverError::protocol_error(format!(
                "server message carries {} trailing byte(s)",
                reader.len()
            )));
        }
        Ok(ServerMessage { tag, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_success_message() {
        // SUCCESS with an empty map
        let message = ServerMessage::parse(&[0xB1, 0x70, 0xA0]).unwrap();
        assert_eq!(message.tag, 0x70);
        assert_eq!(message.fields, vec![Value::Map(Default::default())]);
    }

    #[test]
    fn test_parse_rejects_trailing_garbage() {
        let err = ServerMessage::parse(&[0xB0, 0x7E, 0xC0]).unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError { .. }));
    }

    #[test]
    fn test_parse_rejects_non_struct() {
        let err = ServerMessage::parse(&[0xA0, 0x00]).unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError { .. }));
    }

    #[test]
    fn test_parse_rejects_short_buffer() {
        let err = ServerMessage::parse(&[0xB1]).unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError { .. }));
    }
}
