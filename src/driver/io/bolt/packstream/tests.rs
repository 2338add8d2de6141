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

use rstest::rstest;

use super::deserialize::PackStreamDeserializer;
use super::error::PackStreamDeserializeErrorKind;
use super::serialize::{serialize_value, PackStreamWireSerializer};
use super::tags;
use crate::macros::hash_map;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::spatial::{Point2D, Point3D};
use crate::value::time::{Date, DateTime, Duration, LocalDateTime, LocalTime, Time, Tz};
use crate::value::Value;

fn encode(value: &Value) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut serializer = PackStreamWireSerializer::new(&mut buffer);
    serialize_value(&mut serializer, value).unwrap();
    buffer
}

fn decode(input: &[u8]) -> (Value, Vec<u8>) {
    let mut reader = input;
    let mut deserializer = PackStreamDeserializer::new(&mut reader);
    let result = deserializer.load().unwrap();
    (result, reader.to_vec())
}

fn decode_err(input: &[u8]) -> PackStreamDeserializeErrorKind {
    let mut reader = input;
    let mut deserializer = PackStreamDeserializer::new(&mut reader);
    deserializer.load().unwrap_err().kind()
}

// ==============
// Exact Encoding
// ==============

#[rstest]
#[case(Value::Null, vec![0xC0])]
#[case(Value::Boolean(false), vec![0xC2])]
#[case(Value::Boolean(true), vec![0xC3])]
#[case(Value::Float(1.23), vec![0xC1, 0x3F, 0xF3, 0xAE, 0x14, 0x7A, 0xE1, 0x47, 0xAE])]
#[case(Value::String("".into()), vec![0x80])]
#[case(Value::String("A".into()), vec![0x81, 0x41])]
#[case(Value::Bytes(vec![]), vec![0xCC, 0x00])]
#[case(Value::Bytes(vec![0xFF]), vec![0xCC, 0x01, 0xFF])]
#[case(Value::List(vec![]), vec![0x90])]
#[case(Value::Map(HashMap::new()), vec![0xA0])]
fn test_encode_special(#[case] value: Value, #[case] expected: Vec<u8>) {
    assert_eq!(encode(&value), expected);
}

// The encoder must always pick the shortest integer representation that
// fits; these cases pin every boundary.
#[rstest]
#[case(0, vec![0x00])]
#[case(1, vec![0x01])]
#[case(127, vec![0x7F])]
#[case(-1, vec![0xFF])]
#[case(-16, vec![0xF0])]
#[case(128, vec![0xC9, 0x00, 0x80])]
#[case(-17, vec![0xC8, 0xEF])]
#[case(-128, vec![0xC8, 0x80])]
#[case(-129, vec![0xC9, 0xFF, 0x7F])]
#[case(32767, vec![0xC9, 0x7F, 0xFF])]
#[case(32768, vec![0xCA, 0x00, 0x00, 0x80, 0x00])]
#[case(-32768, vec![0xC9, 0x80, 0x00])]
#[case(-32769, vec![0xCA, 0xFF, 0xFF, 0x7F, 0xFF])]
#[case(2147483647, vec![0xCA, 0x7F, 0xFF, 0xFF, 0xFF])]
#[case(2147483648, vec![0xCB, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00])]
#[case(-2147483648, vec![0xCA, 0x80, 0x00, 0x00, 0x00])]
#[case(-2147483649, vec![0xCB, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF])]
#[case(i64::MAX, vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF])]
#[case(i64::MIN, vec![0xCB, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00])]
fn test_encode_integer_shortest_form(#[case] value: i64, #[case] expected: Vec<u8>) {
    assert_eq!(encode(&Value::Integer(value)), expected);
}

#[rstest]
fn test_encode_string_length_boundaries() {
    let string_15 = "A".repeat(15);
    assert_eq!(encode(&Value::String(string_15.clone()))[0], 0x8F);

    let string_16 = "A".repeat(16);
    assert_eq!(&encode(&Value::String(string_16))[..2], &[0xD0, 0x10]);

    let string_256 = "A".repeat(256);
    assert_eq!(&encode(&Value::String(string_256))[..3], &[0xD1, 0x01, 0x00]);

    let string_65536 = "A".repeat(65_536);
    assert_eq!(
        &encode(&Value::String(string_65536))[..5],
        &[0xD2, 0x00, 0x01, 0x00, 0x00]
    );
}

#[rstest]
fn test_encode_list_length_boundaries() {
    let list_15 = Value::List(vec![Value::Null; 15]);
    assert_eq!(encode(&list_15)[0], 0x9F);

    let list_16 = Value::List(vec![Value::Null; 16]);
    assert_eq!(&encode(&list_16)[..2], &[0xD4, 0x10]);

    let list_256 = Value::List(vec![Value::Null; 256]);
    assert_eq!(&encode(&list_256)[..3], &[0xD5, 0x01, 0x00]);
}

// ========
// Decoding
// ========

#[rstest]
#[case(vec![0xC0], Value::Null)]
#[case(vec![0xC2], Value::Boolean(false))]
#[case(vec![0xC3], Value::Boolean(true))]
#[case(vec![0xF0], Value::Integer(-16))]
#[case(vec![0xFF], Value::Integer(-1))]
#[case(vec![0x00], Value::Integer(0))]
#[case(vec![0x7F], Value::Integer(127))]
#[case(vec![0xC8, 0x80], Value::Integer(-128))]
#[case(vec![0xC9, 0x7F, 0xFF], Value::Integer(32767))]
#[case(vec![0xCA, 0x80, 0x00, 0x00, 0x00], Value::Integer(-2147483648))]
#[case(vec![0xCB, 0x7F, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], Value::Integer(i64::MAX))]
#[case(vec![0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A], Value::Float(1.1))]
#[case(vec![0x81, 0x41], Value::String("A".into()))]
#[case(vec![0xD0, 0x01, 0x41], Value::String("A".into()))]
#[case(vec![0x91, 0x01], Value::List(vec![Value::Integer(1)]))]
#[case(vec![0xA1, 0x81, 0x41, 0x01],
       Value::Map(hash_map!("A".to_string() => Value::Integer(1))))]
#[case(vec![0xCC, 0x03, 0x01, 0x02, 0x03], Value::Bytes(vec![1, 2, 3]))]
fn test_decode(#[case] input: Vec<u8>, #[case] output: Value) {
    let (result, rest) = decode(&input);
    assert_eq!(result, output);
    assert_eq!(rest, Vec::<u8>::new());
}

// All valid encodings of a value decode equal, not only the shortest one.
#[rstest]
#[case(vec![0x01])]
#[case(vec![0xC8, 0x01])]
#[case(vec![0xC9, 0x00, 0x01])]
#[case(vec![0xCA, 0x00, 0x00, 0x00, 0x01])]
#[case(vec![0xCB, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01])]
fn test_decoder_tolerance_int(#[case] input: Vec<u8>) {
    let (result, _) = decode(&input);
    assert_eq!(result, Value::Integer(1));
}

#[rstest]
#[case(vec![0x81, 0x41])]
#[case(vec![0xD0, 0x01, 0x41])]
#[case(vec![0xD1, 0x00, 0x01, 0x41])]
#[case(vec![0xD2, 0x00, 0x00, 0x00, 0x01, 0x41])]
fn test_decoder_tolerance_string(#[case] input: Vec<u8>) {
    let (result, _) = decode(&input);
    assert_eq!(result, Value::String("A".into()));
}

#[rstest]
#[case(vec![0xC4])]
#[case(vec![0xC5])]
#[case(vec![0xC6])]
#[case(vec![0xC7])]
#[case(vec![0xCF])]
#[case(vec![0xD3])]
#[case(vec![0xD7])]
#[case(vec![0xDB])]
#[case(vec![0xDE])]
#[case(vec![0xDF])]
fn test_unknown_marker(#[case] input: Vec<u8>) {
    assert_eq!(
        decode_err(&input),
        PackStreamDeserializeErrorKind::UnknownMarker
    );
}

#[rstest]
fn test_invalid_utf8() {
    assert_eq!(
        decode_err(&[0x81, 0xFF]),
        PackStreamDeserializeErrorKind::InvalidUtf8
    );
}

#[rstest]
#[case(vec![0xB2, tags::DATE, 0x01, 0x02])]
#[case(vec![0xB0, tags::DATE])]
#[case(vec![0xB2, tags::LOCAL_DATE_TIME, 0x01])] // announced 2 fields, sent 1
fn test_struct_arity_mismatch(#[case] input: Vec<u8>) {
    let kind = decode_err(&input);
    assert!(
        matches!(
            kind,
            PackStreamDeserializeErrorKind::StructArityMismatch
                | PackStreamDeserializeErrorKind::TruncatedInput
        ),
        "unexpected error kind {kind:?}"
    );
}

#[rstest]
fn test_unknown_struct_signature() {
    assert_eq!(
        decode_err(&[0xB1, 0xAB, 0x01]),
        PackStreamDeserializeErrorKind::UnknownStructSignature
    );
}

// ===========
// Round Trips
// ===========

fn nested_map_value() -> Value {
    Value::Map(hash_map!(
        "list".to_string() => Value::List(vec![
            Value::Integer(1),
            Value::Float(2.5),
            Value::String("three".into()),
            Value::Null,
        ]),
        "nested".to_string() => Value::Map(hash_map!(
            "bytes".to_string() => Value::Bytes(vec![0x00, 0xFF]),
        ))
    ))
}

fn node_value() -> Value {
    Value::Node(Node {
        id: 42,
        labels: vec!["Person".into(), "Employee".into()],
        properties: hash_map!("name".to_string() => Value::String("Ada".into())),
    })
}

fn path_value() -> Value {
    Value::Path(Path {
        nodes: vec![
            Node {
                id: 1,
                labels: vec![],
                properties: HashMap::new(),
            },
            Node {
                id: 2,
                labels: vec![],
                properties: HashMap::new(),
            },
        ],
        relationships: vec![UnboundRelationship {
            id: 3,
            type_: "KNOWS".into(),
            properties: HashMap::new(),
        }],
        indices: vec![1, 1],
    })
}

#[rstest]
#[case(Value::Null)]
#[case(Value::Boolean(true))]
#[case(Value::Integer(1_234_567))]
#[case(Value::Float(-0.5))]
#[case(Value::Bytes(vec![1, 2, 3]))]
#[case(Value::String("hello, world".into()))]
#[case(nested_map_value())]
#[case(node_value())]
#[case(Value::Relationship(Relationship {
    id: 1,
    start_node_id: 2,
    end_node_id: 3,
    type_: "KNOWS".into(),
    properties: HashMap::new(),
}))]
#[case(Value::UnboundRelationship(UnboundRelationship {
    id: 1,
    type_: "KNOWS".into(),
    properties: HashMap::new(),
}))]
#[case(path_value())]
#[case(Value::Point2D(Point2D::new_cartesian(1.0, 2.0)))]
#[case(Value::Point3D(Point3D::new_wgs84(1.0, 2.0, 3.0)))]
#[case(Value::Date(Date { days: 19_000 }))]
#[case(Value::Time(Time { nanoseconds: 1, tz_offset_seconds: 3600 }))]
#[case(Value::LocalTime(LocalTime { nanoseconds: 1 }))]
#[case(Value::DateTime(DateTime { seconds: 1_700_000_000, nanoseconds: 1, tz: Tz::Offset(7200) }))]
#[case(Value::DateTime(DateTime {
    seconds: 1_700_000_000,
    nanoseconds: 1,
    tz: Tz::ZoneId("Europe/Stockholm".into()),
}))]
#[case(Value::LocalDateTime(LocalDateTime { seconds: 1, nanoseconds: 2 }))]
#[case(Value::Duration(Duration { months: 1, days: 2, seconds: 3, nanoseconds: 4 }))]
fn test_round_trip(#[case] value: Value) {
    let encoded = encode(&value);
    let (decoded, rest) = decode(&encoded);
    assert_eq!(decoded, value);
    assert_eq!(rest, Vec::<u8>::new());
}

// Removing any trailing byte from a valid encoding must yield TruncatedInput.
#[rstest]
#[case(Value::Integer(128))]
#[case(Value::Float(1.5))]
#[case(Value::String("hello".into()))]
#[case(Value::Bytes(vec![1, 2, 3]))]
#[case(Value::List(vec![Value::Integer(300), Value::String("x".into())]))]
#[case(node_value())]
#[case(path_value())]
fn test_truncation(#[case] value: Value) {
    let encoded = encode(&value);
    for cut in 0..encoded.len() {
        let truncated = &encoded[..cut];
        let mut reader = truncated;
        let mut deserializer = PackStreamDeserializer::new(&mut reader);
        let err = deserializer
            .load()
            .expect_err("truncated input must not decode");
        assert_eq!(
            err.kind(),
            PackStreamDeserializeErrorKind::TruncatedInput,
            "cut at {cut} of {}",
            encoded.len()
        );
    }
}
