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

use std::convert::Infallible;
use std::error::Error;
use std::fmt::Write as FmtWrite;
use std::io::Write;

use usize_cast::FromUsize;

use super::error::PackStreamSerializeError;
use super::tags;
use crate::value::time::Tz;
use crate::value::Value;

/// Low-level writer of PackStream primitives.
///
/// Integer, string, bytes, list, and map headers always use the shortest
/// form that fits; this is what makes the encoder deterministic.
pub(crate) trait PackStreamSerializer {
    type Error: Error;

    fn write_null(&mut self) -> Result<(), Self::Error>;
    fn write_bool(&mut self, b: bool) -> Result<(), Self::Error>;
    fn write_int(&mut self, i: i64) -> Result<(), Self::Error>;
    fn write_float(&mut self, f: f64) -> Result<(), Self::Error>;
    fn write_bytes(&mut self, b: &[u8]) -> Result<(), Self::Error>;
    fn write_string(&mut self, s: &str) -> Result<(), Self::Error>;
    fn write_list_header(&mut self, size: u64) -> Result<(), Self::Error>;
    fn write_dict_header(&mut self, size: u64) -> Result<(), Self::Error>;
    fn write_struct_header(&mut self, tag: u8, size: u8) -> Result<(), Self::Error>;
}

/// Emits actual wire bytes into the given writer.
pub(crate) struct PackStreamWireSerializer<'a, W: Write> {
    writer: &'a mut W,
}

impl<'a, W: Write> PackStreamWireSerializer<'a, W> {
    pub fn new(writer: &'a mut W) -> PackStreamWireSerializer<'a, W> {
        PackStreamWireSerializer { writer }
    }

    /// Marker plus big-endian length for all sized types: `tiny` is the
    /// marker base for lengths 0..=15 (where the type has one), `markers`
    /// are the u8/u16/u32-length forms.
    fn write_size_marker(
        &mut self,
        tiny: Option<u8>,
        markers: [u8; 3],
        size: usize,
        what: &'static str,
    ) -> Result<(), PackStreamSerializeError> {
        match (tiny, size) {
            (Some(base), 0..=15) => self.writer.write_all(&[base + size as u8])?,
            (_, 0..=255) => {
                self.writer.write_all(&[markers[0], size as u8])?;
            }
            (_, 256..=65_535) => {
                self.writer.write_all(&[markers[1]])?;
                self.writer.write_all(&(size as u16).to_be_bytes())?;
            }
            (_, 65_536..=2_147_483_647) => {
                self.writer.write_all(&[markers[2]])?;
                self.writer.write_all(&(size as u32).to_be_bytes())?;
            }
            _ => {
                return Err(
                    format!("{what} exceeds max size of 2,147,483,647 ({size})").into(),
                )
            }
        }
        Ok(())
    }
}

impl<W: Write> PackStreamSerializer for PackStreamWireSerializer<'_, W> {
    type Error = PackStreamSerializeError;

    fn write_null(&mut self) -> Result<(), Self::Error> {
        self.writer.write_all(&[0xC0])?;
        Ok(())
    }

    fn write_bool(&mut self, b: bool) -> Result<(), Self::Error> {
        self.writer.write_all(&[if b { 0xC3 } else { 0xC2 }])?;
        Ok(())
    }

    fn write_int(&mut self, i: i64) -> Result<(), Self::Error> {
        match i {
            -16..=127 => self.writer.write_all(&(i as i8).to_be_bytes())?,
            -128..=-17 => {
                self.writer.write_all(&[0xC8])?;
                self.writer.write_all(&(i as i8).to_be_bytes())?;
            }
            -32_768..=32_767 => {
                self.writer.write_all(&[0xC9])?;
                self.writer.write_all(&(i as i16).to_be_bytes())?;
            }
            -2_147_483_648..=2_147_483_647 => {
                self.writer.write_all(&[0xCA])?;
                self.writer.write_all(&(i as i32).to_be_bytes())?;
            }
            _ => {
                self.writer.write_all(&[0xCB])?;
                self.writer.write_all(&i.to_be_bytes())?;
            }
        }
        Ok(())
    }

    fn write_float(&mut self, f: f64) -> Result<(), Self::Error> {
        self.writer.write_all(&[0xC1])?;
        self.writer.write_all(&f.to_be_bytes())?;
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<(), Self::Error> {
        self.write_size_marker(None, [0xCC, 0xCD, 0xCE], b.len(), "bytes")?;
        self.writer.write_all(b)?;
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), Self::Error> {
        self.write_size_marker(Some(0x80), [0xD0, 0xD1, 0xD2], s.len(), "string")?;
        self.writer.write_all(s.as_bytes())?;
        Ok(())
    }

    fn write_list_header(&mut self, size: u64) -> Result<(), Self::Error> {
        let size = usize::try_from(size).map_err(|_| "list exceeds addressable size")?;
        self.write_size_marker(Some(0x90), [0xD4, 0xD5, 0xD6], size, "list")
    }

    fn write_dict_header(&mut self, size: u64) -> Result<(), Self::Error> {
        let size = usize::try_from(size).map_err(|_| "map exceeds addressable size")?;
        self.write_size_marker(Some(0xA0), [0xD8, 0xD9, 0xDA], size, "map")
    }

    fn write_struct_header(&mut self, tag: u8, size: u8) -> Result<(), Self::Error> {
        self.writer.write_all(&[0xB0 + size, tag])?;
        Ok(())
    }
}

/// Write a whole [`Value`], dispatching structs to their signatures.
pub(crate) fn serialize_value<S: PackStreamSerializer>(
    serializer: &mut S,
    value: &Value,
) -> Result<(), S::Error> {
    match value {
        Value::Null => serializer.write_null(),
        Value::Boolean(v) => serializer.write_bool(*v),
        Value::Integer(v) => serializer.write_int(*v),
        Value::Float(v) => serializer.write_float(*v),
        Value::Bytes(v) => serializer.write_bytes(v),
        Value::String(v) => serializer.write_string(v),
        Value::List(values) => {
            serializer.write_list_header(u64::from_usize(values.len()))?;
            for value in values {
                serialize_value(serializer, value)?;
            }
            Ok(())
        }
        Value::Map(entries) => {
            serializer.write_dict_header(u64::from_usize(entries.len()))?;
            for (key, value) in entries {
                serializer.write_string(key)?;
                serialize_value(serializer, value)?;
            }
            Ok(())
        }
        Value::Node(node) => {
            serializer.write_struct_header(tags::NODE, 3)?;
            serializer.write_int(node.id)?;
            serializer.write_list_header(u64::from_usize(node.labels.len()))?;
            for label in &node.labels {
                serializer.write_string(label)?;
            }
            serializer.write_dict_header(u64::from_usize(node.properties.len()))?;
            for (key, value) in &node.properties {
                serializer.write_string(key)?;
                serialize_value(serializer, value)?;
            }
            Ok(())
        }
        Value::Relationship(rel) => {
            serializer.write_struct_header(tags::RELATIONSHIP, 5)?;
            serializer.write_int(rel.id)?;
            serializer.write_int(rel.start_node_id)?;
            serializer.write_int(rel.end_node_id)?;
            serializer.write_string(&rel.type_)?;
            serializer.write_dict_header(u64::from_usize(rel.properties.len()))?;
            for (key, value) in &rel.properties {
                serializer.write_string(key)?;
                serialize_value(serializer, value)?;
            }
            Ok(())
        }
        Value::UnboundRelationship(rel) => {
            serializer.write_struct_header(tags::UNBOUND_RELATIONSHIP, 3)?;
            serializer.write_int(rel.id)?;
            serializer.write_string(&rel.type_)?;
            serializer.write_dict_header(u64::from_usize(rel.properties.len()))?;
            for (key, value) in &rel.properties {
                serializer.write_string(key)?;
                serialize_value(serializer, value)?;
            }
            Ok(())
        }
        Value::Path(path) => {
            serializer.write_struct_header(tags::PATH, 3)?;
            serializer.write_list_header(u64::from_usize(path.nodes.len()))?;
            for node in &path.nodes {
                serialize_value(serializer, &Value::Node(node.clone()))?;
            }
            serializer.write_list_header(u64::from_usize(path.relationships.len()))?;
            for rel in &path.relationships {
                serialize_value(serializer, &Value::UnboundRelationship(rel.clone()))?;
            }
            serializer.write_list_header(u64::from_usize(path.indices.len()))?;
            for index in &path.indices {
                serializer.write_int(*index as i64)?;
            }
            Ok(())
        }
        Value::Point2D(point) => {
            serializer.write_struct_header(tags::POINT_2D, 3)?;
            serializer.write_int(point.srid)?;
            serializer.write_float(point.x)?;
            serializer.write_float(point.y)
        }
        Value::Point3D(point) => {
            serializer.write_struct_header(tags::POINT_3D, 4)?;
            serializer.write_int(point.srid)?;
            serializer.write_float(point.x)?;
            serializer.write_float(point.y)?;
            serializer.write_float(point.z)
        }
        Value::Date(date) => {
            serializer.write_struct_header(tags::DATE, 1)?;
            serializer.write_int(date.days)
        }
        Value::Time(time) => {
            serializer.write_struct_header(tags::TIME, 2)?;
            serializer.write_int(time.nanoseconds)?;
            serializer.write_int(time.tz_offset_seconds)
        }
        Value::LocalTime(time) => {
            serializer.write_struct_header(tags::LOCAL_TIME, 1)?;
            serializer.write_int(time.nanoseconds)
        }
        Value::DateTime(date_time) => match &date_time.tz {
            Tz::Offset(offset) => {
                serializer.write_struct_header(tags::DATE_TIME, 3)?;
                serializer.write_int(date_time.seconds)?;
                serializer.write_int(date_time.nanoseconds)?;
                serializer.write_int(*offset)
            }
            Tz::ZoneId(id) => {
                serializer.write_struct_header(tags::DATE_TIME_ZONE_ID, 3)?;
                serializer.write_int(date_time.seconds)?;
                serializer.write_int(date_time.nanoseconds)?;
                serializer.write_string(id)
            }
        },
        Value::LocalDateTime(date_time) => {
            serializer.write_struct_header(tags::LOCAL_DATE_TIME, 2)?;
            serializer.write_int(date_time.seconds)?;
            serializer.write_int(date_time.nanoseconds)
        }
        Value::Duration(duration) => {
            serializer.write_struct_header(tags::DURATION, 4)?;
            serializer.write_int(duration.months)?;
            serializer.write_int(duration.days)?;
            serializer.write_int(duration.seconds)?;
            serializer.write_int(duration.nanoseconds)
        }
    }
}

/// Renders values as human-readable text for the message logs instead of
/// wire bytes. Nesting is tracked on a small frame stack so separators and
/// closing brackets fall into place as items complete.
#[derive(Debug, Default)]
pub(crate) struct PackStreamTextRenderer {
    text: String,
    frames: Vec<Frame>,
}

#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    remaining: u64,
}

#[derive(Debug)]
enum FrameKind {
    List,
    Struct,
    /// `key_next` flips with every written item: `key: value, key: value`
    Map {
        key_next: bool,
    },
}

impl FrameKind {
    fn closer(&self) -> char {
        match self {
            FrameKind::List => ']',
            FrameKind::Struct => ')',
            FrameKind::Map { .. } => '}',
        }
    }
}

impl PackStreamTextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the rendered text out, trimming the top-level item separator.
    pub fn finish(mut self) -> String {
        if self.text.ends_with(' ') {
            self.text.pop();
        }
        self.text
    }

    fn push_frame(&mut self, kind: FrameKind, size: u64, opener: char) {
        self.text.push(opener);
        if size > 0 {
            self.frames.push(Frame {
                kind,
                remaining: size,
            });
        } else {
            self.text.push(kind.closer());
            self.item_done();
        }
    }

    /// One complete item was rendered; update the enclosing frames.
    fn item_done(&mut self) {
        while let Some(frame) = self.frames.last_mut() {
            if let FrameKind::Map { key_next } = &mut frame.kind {
                *key_next = !*key_next;
                if !*key_next {
                    // key rendered, its value is up next
                    self.text.push_str(": ");
                    return;
                }
            }
            frame.remaining -= 1;
            if frame.remaining > 0 {
                self.text.push_str(", ");
                return;
            }
            let closer = frame.kind.closer();
            self.text.push(closer);
            self.frames.pop();
        }
        // back at the top level, separate from the next message part
        self.text.push(' ');
    }

    fn render(&mut self, piece: impl Display2) {
        piece.render_into(&mut self.text);
        self.item_done();
    }
}

// tiny local abstraction so `render` covers both Display and Debug pieces
trait Display2 {
    fn render_into(self, out: &mut String);
}

struct AsDisplay<T>(T);
struct AsDebug<T>(T);

impl<T: std::fmt::Display> Display2 for AsDisplay<T> {
    fn render_into(self, out: &mut String) {
        let _ = write!(out, "{}", self.0);
    }
}

impl<T: std::fmt::Debug> Display2 for AsDebug<T> {
    fn render_into(self, out: &mut String) {
        let _ = write!(out, "{:?}", self.0);
    }
}

impl PackStreamSerializer for PackStreamTextRenderer {
    type Error = Infallible;

    fn write_null(&mut self) -> Result<(), Self::Error> {
        self.render(AsDisplay("null"));
        Ok(())
    }

    fn write_bool(&mut self, b: bool) -> Result<(), Self::Error> {
        self.render(AsDebug(b));
        Ok(())
    }

    fn write_int(&mut self, i: i64) -> Result<(), Self::Error> {
        self.render(AsDisplay(i));
        Ok(())
    }

    fn write_float(&mut self, f: f64) -> Result<(), Self::Error> {
        self.render(AsDisplay(f));
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<(), Self::Error> {
        self.render(AsDisplay(format_args!("bytes{b:02X?}")));
        Ok(())
    }

    fn write_string(&mut self, s: &str) -> Result<(), Self::Error> {
        self.render(AsDebug(s));
        Ok(())
    }

    fn write_list_header(&mut self, size: u64) -> Result<(), Self::Error> {
        self.push_frame(FrameKind::List, size, '[');
        Ok(())
    }

    fn write_dict_header(&mut self, size: u64) -> Result<(), Self::Error> {
        self.push_frame(FrameKind::Map { key_next: true }, size, '{');
        Ok(())
    }

    fn write_struct_header(&mut self, tag: u8, size: u8) -> Result<(), Self::Error> {
        let _ = write!(self.text, "Structure[{tag:#02X?}; {size}]");
        self.push_frame(FrameKind::Struct, size.into(), '(');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::hash_map;

    fn render(values: &[Value]) -> String {
        let mut renderer = PackStreamTextRenderer::new();
        for value in values {
            serialize_value(&mut renderer, value).unwrap();
        }
        renderer.finish()
    }

    #[test]
    fn test_renders_scalars_with_top_level_spaces() {
        let rendered = render(&[
            Value::String("RETURN 1".into()),
            Value::Null,
            Value::Integer(7),
        ]);
        assert_eq!(rendered, "\"RETURN 1\" null 7");
    }

    #[test]
    fn test_renders_nested_collections() {
        let rendered = render(&[Value::Map(hash_map!(
            "xs".to_string() => Value::List(vec![Value::Integer(1), Value::Integer(2)])
        ))]);
        assert_eq!(rendered, "{\"xs\": [1, 2]}");
    }

    #[test]
    fn test_renders_empty_collections() {
        let rendered = render(&[
            Value::Map(hash_map!()),
            Value::List(vec![]),
        ]);
        assert_eq!(rendered, "{} []");
    }
}
