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

/// Hex dump of at most `max` leading bytes, noting how much was cut.
/// Keeps raw-traffic trace lines bounded.
pub(crate) fn hex_preview(data: &[u8], max: usize) -> String {
    if data.len() <= max {
        format!("{data:02X?}")
    } else {
        format!("{:02X?} (+{} bytes)", &data[..max], data.len() - max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_dumped_whole() {
        assert_eq!(hex_preview(&[0x01, 0xAB], 4), "[01, AB]");
    }

    #[test]
    fn test_long_input_is_cut_with_note() {
        let preview = hex_preview(&[0; 100], 2);
        assert_eq!(preview, "[00, 00] (+98 bytes)");
    }
}
