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

use std::collections::HashMap;
use std::io::Read;

use super::error::{PackStreamDeserializeError, PackStreamDeserializeErrorKind};
use super::tags;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::spatial::{Point2D, Point3D};
use crate::value::time::{Date, DateTime, Duration, LocalDateTime, LocalTime, Time, Tz};
use crate::value::Value;

type DeResult<T> = Result<T, PackStreamDeserializeError>;

/// Reads one [`Value`] from a fully assembled message buffer.
///
/// All valid encodings of a value are accepted, independent of whether the
/// encoder would have picked them.
pub(crate) struct PackStreamDeserializer<'a, R> {
    reader: &'a mut R,
}

impl<'a, R: Read + 'a> PackStreamDeserializer<'a, R> {
    pub fn new(reader: &'a mut R) -> PackStreamDeserializer<'a, R> {
        PackStreamDeserializer { reader }
    }

    pub fn load(&mut self) -> DeResult<Value> {
        let marker = self.read_u8()?;
        self.load_any(marker)
    }

    fn load_any(&mut self, marker: u8) -> DeResult<Value> {
        match marker {
            0x00..=0x7F | 0xF0..=0xFF => {
                Ok(Value::Integer(i8::from_be_bytes([marker]).into()))
            }
            0xC0 => Ok(Value::Null),
            0xC1 => Ok(Value::Float(self.read_f64()?)),
            0xC2 => Ok(Value::Boolean(false)),
            0xC3 => Ok(Value::Boolean(true)),
            0xC8 => Ok(Value::Integer(self.read_i8()?.into())),
            0xC9 => Ok(Value::Integer(self.read_i16()?.into())),
            0xCA => Ok(Value::Integer(self.read_i32()?.into())),
            0xCB => Ok(Value::Integer(self.read_i64()?)),
            0xCC => {
                let size = self.read_u8()?.into();
                Ok(Value::Bytes(self.read_raw(size)?))
            }
            0xCD => {
                let size = self.read_u16()?.into();
                Ok(Value::Bytes(self.read_raw(size)?))
            }
            0xCE => {
                let size = self.read_size_u32()?;
                Ok(Value::Bytes(self.read_raw(size)?))
            }
            0x80..=0x8F => self.load_string((marker - 0x80).into()),
            0xD0 => {
                let size = self.read_u8()?.into();
                self.load_string(size)
            }
            0xD1 => {
                let size = self.read_u16()?.into();
                self.load_string(size)
            }
            0xD2 => {
                let size = self.read_size_u32()?;
                self.load_string(size)
            }
            0x90..=0x9F => self.load_list((marker - 0x90).into()),
            0xD4 => {
                let size = self.read_u8()?.into();
                self.load_list(size)
            }
            0xD5 => {
                let size = self.read_u16()?.into();
                self.load_list(size)
            }
            0xD6 => {
                let size = self.read_size_u32()?;
                self.load_list(size)
            }
            0xA0..=0xAF => self.load_dict((marker - 0xA0).into()),
            0xD8 => {
                let size = self.read_u8()?.into();
                self.load_dict(size)
            }
            0xD9 => {
                let size = self.read_u16()?.into();
                self.load_dict(size)
            }
            0xDA => {
                let size = self.read_size_u32()?;
                self.load_dict(size)
            }
            0xB0..=0xBF => self.load_struct((marker - 0xB0).into()),
            0xDC => {
                let size = self.read_u8()?.into();
                self.load_struct(size)
            }
            0xDD => {
                let size = self.read_u16()?.into();
                self.load_struct(size)
            }
            _ => Err(PackStreamDeserializeError::new(
                PackStreamDeserializeErrorKind::UnknownMarker,
                format!("unknown marker {marker:02X?}"),
            )),
        }
    }

    fn load_string(&mut self, size: usize) -> DeResult<Value> {
        let bytes = self.read_raw(size)?;
        let string = String::from_utf8(bytes).map_err(|_| {
            PackStreamDeserializeError::new(
                PackStreamDeserializeErrorKind::InvalidUtf8,
                "string was not valid UTF-8",
            )
        })?;
        Ok(Value::String(string))
    }

    fn load_list(&mut self, size: usize) -> DeResult<Value> {
        let mut list = Vec::with_capacity(size.min(1024));
        for _ in 0..size {
            list.push(self.load()?);
        }
        Ok(Value::List(list))
    }

    fn load_dict(&mut self, size: usize) -> DeResult<Value> {
        let mut dict = HashMap::with_capacity(size.min(1024));
        for _ in 0..size {
            let key = match self.load()? {
                Value::String(key) => key,
                v => {
                    return Err(PackStreamDeserializeError::protocol_violation(format!(
                        "expected dict key to be a string, found {v:?}"
                    )))
                }
            };
            let value = self.load()?;
            dict.insert(key, value);
        }
        Ok(Value::Map(dict))
    }

    fn load_struct(&mut self, size: usize) -> DeResult<Value> {
        let tag = self.read_u8()?;
        let mut fields = Vec::with_capacity(size.min(16));
        for _ in 0..size {
            fields.push(self.load()?);
        }
        build_struct(tag, fields)
    }

    fn read_u8(&mut self) -> DeResult<u8> {
        let mut buffer = [0; 1];
        self.reader.read_exact(&mut buffer)?;
        Ok(buffer[0])
    }

    fn read_i8(&mut self) -> DeResult<i8> {
        let mut buffer = [0; 1];
        self.reader.read_exact(&mut buffer)?;
        Ok(i8::from_be_bytes(buffer))
    }

    fn read_i16(&mut self) -> DeResult<i16> {
        let mut buffer = [0; 2];
        self.reader.read_exact(&mut buffer)?;
        Ok(i16::from_be_bytes(buffer))
    }

    fn read_i32(&mut self) -> DeResult<i32> {
        let mut buffer = [0; 4];
        self.reader.read_exact(&mut buffer)?;
        Ok(i32::from_be_bytes(buffer))
    }

    fn read_i64(&mut self) -> DeResult<i64> {
        let mut buffer = [0; 8];
        self.reader.read_exact(&mut buffer)?;
        Ok(i64::from_be_bytes(buffer))
    }

    fn read_u16(&mut self) -> DeResult<u16> {
        let mut buffer = [0; 2];
        self.reader.read_exact(&mut buffer)?;
        Ok(u16::from_be_bytes(buffer))
    }

    fn read_f64(&mut self) -> DeResult<f64> {
        let mut buffer = [0; 8];
        self.reader.read_exact(&mut buffer)?;
        Ok(f64::from_be_bytes(buffer))
    }

    fn read_size_u32(&mut self) -> DeResult<usize> {
        let mut buffer = [0; 4];
        self.reader.read_exact(&mut buffer)?;
        let size = u32::from_be_bytes(buffer);
        usize::try_from(size).map_err(|_| {
            PackStreamDeserializeError::protocol_violation(
                "server wants to send more data than is addressable",
            )
        })
    }

    fn read_raw(&mut self, size: usize) -> DeResult<Vec<u8>> {
        let mut bytes = vec![0; size];
        self.reader.read_exact(bytes.as_mut_slice())?;
        Ok(bytes)
    }
}

/// Turn a decoded structure into its typed [`Value`] variant.
///
/// A tag the driver doesn't know fails with `UnknownStructSignature`; a known
/// tag with the wrong number of fields fails with `StructArityMismatch`.
fn build_struct(tag: u8, fields: Vec<Value>) -> DeResult<Value> {
    match tag {
        tags::NODE => {
            let [id, labels, properties] = expect_fields("Node", fields)?;
            Ok(Value::Node(Node {
                id: as_int(id, "Node id")?,
                labels: as_string_list(labels, "Node labels")?,
                properties: as_map(properties, "Node properties")?,
            }))
        }
        tags::RELATIONSHIP => {
            let [id, start, end, type_, properties] = expect_fields("Relationship", fields)?;
            Ok(Value::Relationship(Relationship {
                id: as_int(id, "Relationship id")?,
                start_node_id: as_int(start, "Relationship startNodeId")?,
                end_node_id: as_int(end, "Relationship endNodeId")?,
                type_: as_string(type_, "Relationship type")?,
                properties: as_map(properties, "Relationship properties")?,
            }))
        }
        tags::UNBOUND_RELATIONSHIP => {
            let [id, type_, properties] = expect_fields("UnboundRelationship", fields)?;
            Ok(Value::UnboundRelationship(UnboundRelationship {
                id: as_int(id, "UnboundRelationship id")?,
                type_: as_string(type_, "UnboundRelationship type")?,
                properties: as_map(properties, "UnboundRelationship properties")?,
            }))
        }
        tags::PATH => {
            let [nodes, relationships, indices] = expect_fields("Path", fields)?;
            let nodes = as_list(nodes, "Path nodes")?
                .into_iter()
                .map(|v| match v {
                    Value::Node(node) => Ok(node),
                    v => Err(PackStreamDeserializeError::protocol_violation(format!(
                        "Path nodes contained non-Node {v:?}"
                    ))),
                })
                .collect::<DeResult<Vec<_>>>()?;
            let relationships = as_list(relationships, "Path relationships")?
                .into_iter()
                .map(|v| match v {
                    Value::UnboundRelationship(rel) => Ok(rel),
                    v => Err(PackStreamDeserializeError::protocol_violation(format!(
                        "Path relationships contained non-UnboundRelationship {v:?}"
                    ))),
                })
                .collect::<DeResult<Vec<_>>>()?;
            let indices = as_list(indices, "Path indices")?
                .into_iter()
                .map(|v| as_int(v, "Path index").map(|i| i as isize))
                .collect::<DeResult<Vec<_>>>()?;
            Ok(Value::Path(Path {
                nodes,
                relationships,
                indices,
            }))
        }
        tags::POINT_2D => {
            let [srid, x, y] = expect_fields("Point2D", fields)?;
            Ok(Value::Point2D(Point2D {
                srid: as_int(srid, "Point2D srid")?,
                x: as_float(x, "Point2D x")?,
                y: as_float(y, "Point2D y")?,
            }))
        }
        tags::POINT_3D => {
            let [srid, x, y, z] = expect_fields("Point3D", fields)?;
            Ok(Value::Point3D(Point3D {
                srid: as_int(srid, "Point3D srid")?,
                x: as_float(x, "Point3D x")?,
                y: as_float(y, "Point3D y")?,
                z: as_float(z, "Point3D z")?,
            }))
        }
        tags::DATE => {
            let [days] = expect_fields("Date", fields)?;
            Ok(Value::Date(Date {
                days: as_int(days, "Date days")?,
            }))
        }
        tags::TIME => {
            let [nanoseconds, tz_offset_seconds] = expect_fields("Time", fields)?;
            Ok(Value::Time(Time {
                nanoseconds: as_int(nanoseconds, "Time nanoseconds")?,
                tz_offset_seconds: as_int(tz_offset_seconds, "Time tz_offset_seconds")?,
            }))
        }
        tags::LOCAL_TIME => {
            let [nanoseconds] = expect_fields("LocalTime", fields)?;
            Ok(Value::LocalTime(LocalTime {
                nanoseconds: as_int(nanoseconds, "LocalTime nanoseconds")?,
            }))
        }
        tags::DATE_TIME => {
            let [seconds, nanoseconds, tz_offset_seconds] = expect_fields("DateTime", fields)?;
            Ok(Value::DateTime(DateTime {
                seconds: as_int(seconds, "DateTime seconds")?,
                nanoseconds: as_int(nanoseconds, "DateTime nanoseconds")?,
                tz: Tz::Offset(as_int(tz_offset_seconds, "DateTime tz_offset_seconds")?),
            }))
        }
        tags::DATE_TIME_ZONE_ID => {
            let [seconds, nanoseconds, tz_id] = expect_fields("DateTimeZoneId", fields)?;
            Ok(Value::DateTime(DateTime {
                seconds: as_int(seconds, "DateTimeZoneId seconds")?,
                nanoseconds: as_int(nanoseconds, "DateTimeZoneId nanoseconds")?,
                tz: Tz::ZoneId(as_string(tz_id, "DateTimeZoneId tz_id")?),
            }))
        }
        tags::LOCAL_DATE_TIME => {
            let [seconds, nanoseconds] = expect_fields("LocalDateTime", fields)?;
            Ok(Value::LocalDateTime(LocalDateTime {
                seconds: as_int(seconds, "LocalDateTime seconds")?,
                nanoseconds: as_int(nanoseconds, "LocalDateTime nanoseconds")?,
            }))
        }
        tags::DURATION => {
            let [months, days, seconds, nanoseconds] = expect_fields("Duration", fields)?;
            Ok(Value::Duration(Duration {
                months: as_int(months, "Duration months")?,
                days: as_int(days, "Duration days")?,
                seconds: as_int(seconds, "Duration seconds")?,
                nanoseconds: as_int(nanoseconds, "Duration nanoseconds")?,
            }))
        }
        _ => Err(PackStreamDeserializeError::new(
            PackStreamDeserializeErrorKind::UnknownStructSignature,
            format!("unknown struct signature {tag:02X?}"),
        )),
    }
}

fn expect_fields<const N: usize>(name: &str, fields: Vec<Value>) -> DeResult<[Value; N]> {
    let found = fields.len();
    <[Value; N]>::try_from(fields).map_err(|_| {
        PackStreamDeserializeError::new(
            PackStreamDeserializeErrorKind::StructArityMismatch,
            format!("{name} must have {N} fields, found {found}"),
        )
    })
}

fn as_int(value: Value, what: &str) -> DeResult<i64> {
    match value {
        Value::Integer(i) => Ok(i),
        v => Err(PackStreamDeserializeError::protocol_violation(format!(
            "{what} was not an integer but {v:?}"
        ))),
    }
}

fn as_float(value: Value, what: &str) -> DeResult<f64> {
    match value {
        Value::Float(f) => Ok(f),
        v => Err(PackStreamDeserializeError::protocol_violation(format!(
            "{what} was not a float but {v:?}"
        ))),
    }
}

fn as_string(value: Value, what: &str) -> DeResult<String> {
    match value {
        Value::String(s) => Ok(s),
        v => Err(PackStreamDeserializeError::protocol_violation(format!(
            "{what} was not a string but {v:?}"
        ))),
    }
}

fn as_list(value: Value, what: &str) -> DeResult<Vec<Value>> {
    match value {
        Value::List(l) => Ok(l),
        v => Err(PackStreamDeserializeError::protocol_violation(format!(
            "{what} was not a list but {v:?}"
        ))),
    }
}

fn as_string_list(value: Value, what: &str) -> DeResult<Vec<String>> {
    as_list(value, what)?
        .into_iter()
        .map(|v| as_string(v, what))
        .collect()
}

fn as_map(value: Value, what: &str) -> DeResult<HashMap<String, Value>> {
    match value {
        Value::Map(m) => Ok(m),
        v => Err(PackStreamDeserializeError::protocol_violation(format!(
            "{what} was not a map but {v:?}"
        ))),
    }
}
