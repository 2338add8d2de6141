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

//! Bolt message framing: 16-bit big-endian length-prefixed chunks, a message
//! ends with a zero-length chunk.

use std::io::Read;

use log::trace;
use usize_cast::IntoUsize;

use crate::error::{DriverError, Result};
use crate::util::hex_preview;

const MAX_CHUNK_SIZE: usize = u16::MAX as usize;
// longer chunks are logged cut off
const MAX_CHUNK_TRACE_BYTES: usize = 50;

/// Wrap one outgoing message into its wire framing: maximal (and therefore
/// the fewest) chunks, followed by the `0000` end marker.
pub(crate) fn frame_message(payload: &[u8]) -> Vec<u8> {
    let header_count = payload.len().div_ceil(MAX_CHUNK_SIZE);
    let mut framed = Vec::with_capacity(payload.len() + 2 * header_count + 2);
    for chunk in payload.chunks(MAX_CHUNK_SIZE) {
        framed.extend_from_slice(&(chunk.len() as u16).to_be_bytes());
        framed.extend_from_slice(chunk);
    }
    framed.extend_from_slice(&[0x00, 0x00]);
    framed
}

/// Reassembles one full message at a time from the incoming chunk stream.
#[derive(Debug)]
pub(crate) struct ChunkedReader<R: Read> {
    reader: R,
}

impl<R: Read> ChunkedReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read chunks up to and including the `0000` end marker and return the
    /// assembled message.
    ///
    /// A zero-length chunk before any payload is a protocol violation: every
    /// message consists of at least one non-empty chunk.
    pub(crate) fn read_message(&mut self) -> Result<Vec<u8>> {
        let mut message = Vec::new();
        loop {
            let mut size_buf = [0; 2];
            DriverError::wrap_read(self.reader.read_exact(&mut size_buf))?;
            trace!("S: <RAW> {:02X?}", size_buf);
            let chunk_size = u16::from_be_bytes(size_buf).into_usize();
            if chunk_size == 0 {
                if message.is_empty() {
                    return Err(DriverError::protocol_error(
                        "received zero-length chunk before any message payload",
                    ));
                }
                return Ok(message);
            }
            let start = message.len();
            message.resize(start + chunk_size, 0);
            DriverError::wrap_read(self.reader.read_exact(&mut message[start..]))?;
            trace!(
                "S: <RAW> {}",
                hex_preview(&message[start..], MAX_CHUNK_TRACE_BYTES)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1)]
    #[case(16)]
    #[case(65_535)]
    #[case(65_536)]
    #[case(200_000)]
    fn test_round_trip(#[case] size: usize) {
        let message = (0..size).map(|i| i as u8).collect::<Vec<_>>();
        let wire = frame_message(&message);
        let mut reader = ChunkedReader::new(wire.as_slice());
        assert_eq!(reader.read_message().unwrap(), message);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(65_535, 1)]
    #[case(65_536, 2)]
    #[case(200_000, 4)]
    fn test_prefers_fewest_chunks(#[case] size: usize, #[case] expected_chunks: usize) {
        let framed = frame_message(&vec![0; size]);
        // each chunk costs a 2-byte header; one more for the end marker
        assert_eq!(framed.len(), size + 2 * expected_chunks + 2);
    }

    #[test]
    fn test_message_ends_with_zero_chunk() {
        assert_eq!(
            frame_message(&[1, 2, 3]),
            vec![0x00, 0x03, 1, 2, 3, 0x00, 0x00]
        );
    }

    #[test]
    fn test_zero_chunk_before_payload_is_rejected() {
        let wire = [0x00, 0x00];
        let mut reader = ChunkedReader::new(wire.as_slice());
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError { .. }));
    }

    #[test]
    fn test_message_across_chunks() {
        let wire = [0x00, 0x02, 1, 2, 0x00, 0x01, 3, 0x00, 0x00];
        let mut reader = ChunkedReader::new(wire.as_slice());
        assert_eq!(reader.read_message().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_truncated_wire_is_a_read_error() {
        let wire = [0x00, 0x03, 1, 2];
        let mut reader = ChunkedReader::new(wire.as_slice());
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, DriverError::ServiceUnavailable { .. }));
    }
}
