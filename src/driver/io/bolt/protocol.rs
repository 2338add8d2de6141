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

//! Request encoders for Bolt 4.2 through 4.4. The message set and its wire
//! shape are identical across these versions, so one encoder serves all
//! negotiated variants.
//!
//! Every encoder produces the message payload (unframed) plus, when debug
//! logging is enabled, a rendition of the message for the log.

use std::collections::HashMap;
use std::io::Write;

use log::{log_enabled, Level};
use usize_cast::FromUsize;

use super::packstream::{
    serialize_value, PackStreamSerializeError, PackStreamSerializer, PackStreamTextRenderer,
    PackStreamWireSerializer,
};
use crate::bookmarks::Bookmarks;
use crate::driver::config::auth::AuthToken;
use crate::error::Result;
use crate::value::Value;

// message tags, client side
const HELLO: u8 = 0x01;
const GOODBYE: u8 = 0x02;
const RESET: u8 = 0x0F;
const RUN: u8 = 0x10;
const BEGIN: u8 = 0x11;
const COMMIT: u8 = 0x12;
const ROLLBACK: u8 = 0x13;
const DISCARD: u8 = 0x2F;
const PULL: u8 = 0x3F;

#[derive(Debug, Copy, Clone)]
pub(crate) struct HelloArgs<'a> {
    pub(crate) user_agent: &'a str,
    pub(crate) auth: &'a AuthToken,
    pub(crate) routing_context: Option<&'a HashMap<String, Value>>,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct RunArgs<'a> {
    pub(crate) query: &'a str,
    pub(crate) parameters: Option<&'a HashMap<String, Value>>,
    pub(crate) tx: TxArgs<'a>,
}

/// The transaction-scoped part of the `extra` dictionary, shared between
/// RUN (auto-commit) and BEGIN.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TxArgs<'a> {
    pub(crate) bookmarks: Option<&'a Bookmarks>,
    pub(crate) tx_timeout: Option<i64>,
    pub(crate) tx_metadata: Option<&'a HashMap<String, Value>>,
    pub(crate) mode: Option<&'a str>,
    pub(crate) db: Option<&'a str>,
}

impl<'a> RunArgs<'a> {
    /// A RUN inside an explicit transaction: the transaction settings
    /// already went out with the BEGIN.
    pub(crate) fn in_transaction(
        query: &'a str,
        parameters: Option<&'a HashMap<String, Value>>,
    ) -> Self {
        Self {
            query,
            parameters,
            tx: TxArgs::default(),
        }
    }
}

/// An encoded request: the unframed payload and, when debug logging is on,
/// its log text (message name included).
pub(crate) type Encoded = (Vec<u8>, Option<String>);

pub(crate) fn encode_hello(args: &HelloArgs) -> Result<Encoded> {
    let mut encoder = Encoder::new("HELLO");
    encoder.struct_header(HELLO, 1)?;

    let routing_entries = u64::from(args.routing_context.is_some());
    let extra_size = 1 + routing_entries + u64::from_usize(args.auth.data().len());
    encoder.dict_header(extra_size)?;
    encoder.string("user_agent")?;
    encoder.string(args.user_agent)?;
    if let Some(routing_context) = args.routing_context {
        encoder.string("routing")?;
        encoder.dict(routing_context)?;
    }
    for (key, value) in args.auth.data() {
        encoder.string(key)?;
        if key == "credentials" {
            encoder.secret(value)?;
        } else {
            encoder.value(value)?;
        }
    }
    Ok(encoder.finish())
}

pub(crate) fn encode_run(args: &RunArgs) -> Result<Encoded> {
    let mut encoder = Encoder::new("RUN");
    encoder.struct_header(RUN, 3)?;
    encoder.string(args.query)?;
    match args.parameters {
        Some(parameters) => encoder.dict(parameters)?,
        None => encoder.dict_header(0)?,
    }
    encode_tx_extra(&mut encoder, &args.tx)?;
    Ok(encoder.finish())
}

pub(crate) fn encode_begin(args: &TxArgs) -> Result<Encoded> {
    let mut encoder = Encoder::new("BEGIN");
    encoder.struct_header(BEGIN, 1)?;
    encode_tx_extra(&mut encoder, args)?;
    Ok(encoder.finish())
}

fn encode_tx_extra(encoder: &mut Encoder, args: &TxArgs) -> Result<()> {
    let bookmarks = args.bookmarks.filter(|b| !b.is_empty());
    let tx_metadata = args.tx_metadata.filter(|m| !m.is_empty());
    // "w" is the server-side default and omitted on the wire
    let mode = args.mode.filter(|m| *m != "w");

    let entries = [
        bookmarks.is_some(),
        args.tx_timeout.is_some(),
        tx_metadata.is_some(),
        mode.is_some(),
        args.db.is_some(),
    ];
    encoder.dict_header(entries.iter().map(|&e| u64::from(e)).sum())?;

    if let Some(bookmarks) = bookmarks {
        encoder.string("bookmarks")?;
        encoder.string_list(bookmarks.raw())?;
    }
    if let Some(tx_timeout) = args.tx_timeout {
        encoder.string("tx_timeout")?;
        encoder.int(tx_timeout)?;
    }
    if let Some(tx_metadata) = tx_metadata {
        encoder.string("tx_metadata")?;
        encoder.dict(tx_metadata)?;
    }
    if let Some(mode) = mode {
        encoder.string("mode")?;
        encoder.string(mode)?;
    }
    if let Some(db) = args.db {
        encoder.string("db")?;
        encoder.string(db)?;
    }
    Ok(())
}

pub(crate) fn encode_pull(n: i64, qid: i64, omit_qid: bool) -> Result<Encoded> {
    encode_stream_request("PULL", PULL, n, qid, omit_qid)
}

pub(crate) fn encode_discard(n: i64, qid: i64, omit_qid: bool) -> Result<Encoded> {
    encode_stream_request("DISCARD", DISCARD, n, qid, omit_qid)
}

fn encode_stream_request(
    name: &'static str,
    tag: u8,
    n: i64,
    qid: i64,
    omit_qid: bool,
) -> Result<Encoded> {
    let mut encoder = Encoder::new(name);
    encoder.struct_header(tag, 1)?;
    encoder.dict_header(if omit_qid { 1 } else { 2 })?;
    encoder.string("n")?;
    encoder.int(n)?;
    if !omit_qid {
        encoder.string("qid")?;
        encoder.int(qid)?;
    }
    Ok(encoder.finish())
}

pub(crate) fn encode_commit() -> Result<Encoded> {
    encode_bare("COMMIT", COMMIT)
}

pub(crate) fn encode_rollback() -> Result<Encoded> {
    encode_bare("ROLLBACK", ROLLBACK)
}

pub(crate) fn encode_reset() -> Result<Encoded> {
    encode_bare("RESET", RESET)
}

pub(crate) fn encode_goodbye() -> Result<Encoded> {
    encode_bare("GOODBYE", GOODBYE)
}

fn encode_bare(name: &'static str, tag: u8) -> Result<Encoded> {
    let mut encoder = Encoder::new(name);
    encoder.struct_header(tag, 0)?;
    Ok(encoder.finish())
}

/// Writes each piece once, into the wire buffer and (when debug logging is
/// enabled) into a text rendition for the log.
struct Encoder {
    name: &'static str,
    wire: Vec<u8>,
    text: Option<PackStreamTextRenderer>,
}

impl Encoder {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            wire: Vec::new(),
            text: log_enabled!(Level::Debug).then(PackStreamTextRenderer::new),
        }
    }

    fn finish(self) -> Encoded {
        let text = self.text.map(|renderer| {
            let args = renderer.finish();
            match args.is_empty() {
                true => self.name.to_string(),
                false => format!("{} {}", self.name, args),
            }
        });
        (self.wire, text)
    }

    fn both(
        &mut self,
        op: impl Fn(&mut dyn ErasedSerializer) -> std::result::Result<(), PackStreamSerializeError>,
    ) -> Result<()> {
        let mut wire = PackStreamWireSerializer::new(&mut self.wire);
        op(&mut wire)?;
        if let Some(text) = &mut self.text {
            op(text).expect("text rendering is infallible");
        }
        Ok(())
    }

    fn struct_header(&mut self, tag: u8, size: u8) -> Result<()> {
        // the message envelope itself is not rendered; the name is
        let mut wire = PackStreamWireSerializer::new(&mut self.wire);
        wire.write_struct_header(tag, size)?;
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<()> {
        self.both(|ser| ser.erased_write_string(s))
    }

    fn int(&mut self, i: i64) -> Result<()> {
        self.both(|ser| ser.erased_write_int(i))
    }

    fn dict_header(&mut self, size: u64) -> Result<()> {
        self.both(|ser| ser.erased_write_dict_header(size))
    }

    fn value(&mut self, value: &Value) -> Result<()> {
        self.both(|ser| ser.erased_write_value(value))
    }

    /// Real value on the wire, asterisks in the log.
    fn secret(&mut self, value: &Value) -> Result<()> {
        let mut wire = PackStreamWireSerializer::new(&mut self.wire);
        serialize_value(&mut wire, value)?;
        if let Some(text) = &mut self.text {
            let _ = text.write_string("**********");
        }
        Ok(())
    }

    fn dict(&mut self, map: &HashMap<String, Value>) -> Result<()> {
        self.dict_header(u64::from_usize(map.len()))?;
        for (key, value) in map {
            self.string(key)?;
            self.value(value)?;
        }
        Ok(())
    }

    fn string_list(&mut self, items: impl Iterator<Item = impl AsRef<str>>) -> Result<()> {
        let items = items.collect::<Vec<_>>();
        self.both(|ser| {
            ser.erased_write_list_header(u64::from_usize(items.len()))?;
            for item in &items {
                ser.erased_write_string(item.as_ref())?;
            }
            Ok(())
        })
    }
}

/// Object-safe shim over [`PackStreamSerializer`] so [`Encoder::both`] can
/// drive the wire serializer and the text renderer through one closure.
trait ErasedSerializer {
    fn erased_write_string(&mut self, s: &str) -> std::result::Result<(), PackStreamSerializeError>;
    fn erased_write_int(&mut self, i: i64) -> std::result::Result<(), PackStreamSerializeError>;
    fn erased_write_dict_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError>;
    fn erased_write_list_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError>;
    fn erased_write_value(
        &mut self,
        value: &Value,
    ) -> std::result::Result<(), PackStreamSerializeError>;
}

impl<W: Write> ErasedSerializer for PackStreamWireSerializer<'_, W> {
    fn erased_write_string(&mut self, s: &str) -> std::result::Result<(), PackStreamSerializeError> {
        self.write_string(s)
    }

    fn erased_write_int(&mut self, i: i64) -> std::result::Result<(), PackStreamSerializeError> {
        self.write_int(i)
    }

    fn erased_write_dict_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        self.write_dict_header(size)
    }

    fn erased_write_list_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        self.write_list_header(size)
    }

    fn erased_write_value(
        &mut self,
        value: &Value,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        serialize_value(self, value)
    }
}

impl ErasedSerializer for PackStreamTextRenderer {
    fn erased_write_string(&mut self, s: &str) -> std::result::Result<(), PackStreamSerializeError> {
        let _ = self.write_string(s);
        Ok(())
    }

    fn erased_write_int(&mut self, i: i64) -> std::result::Result<(), PackStreamSerializeError> {
        let _ = self.write_int(i);
        Ok(())
    }

    fn erased_write_dict_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        let _ = self.write_dict_header(size);
        Ok(())
    }

    fn erased_write_list_header(
        &mut self,
        size: u64,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        let _ = self.write_list_header(size);
        Ok(())
    }

    fn erased_write_value(
        &mut self,
        value: &Value,
    ) -> std::result::Result<(), PackStreamSerializeError> {
        let _ = serialize_value(self, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::hash_map;
    use crate::value;

    #[test]
    fn test_encode_run_minimal() {
        let args = RunArgs::in_transaction("RETURN 1 AS x", None);
        let (wire, _) = encode_run(&args).unwrap();
        // struct with 3 fields, RUN tag, tiny string query, two empty maps
        assert_eq!(wire[0], 0xB3);
        assert_eq!(wire[1], RUN);
        assert_eq!(wire[2], 0x80 + 13);
        assert_eq!(&wire[wire.len() - 2..], &[0xA0, 0xA0]);
    }

    #[test]
    fn test_encode_run_extra_omits_write_mode_and_empty_entries() {
        let bookmarks = Bookmarks::empty();
        let args = RunArgs {
            query: "RETURN 1",
            parameters: None,
            tx: TxArgs {
                bookmarks: Some(&bookmarks),
                tx_timeout: None,
                tx_metadata: None,
                mode: Some("w"),
                db: None,
            },
        };
        let (wire, _) = encode_run(&args).unwrap();
        // the whole extra dict collapses to empty
        assert_eq!(wire[wire.len() - 1], 0xA0);
    }

    #[test]
    fn test_encode_pull_qid() {
        let (with_qid, _) = encode_pull(1000, 7, false).unwrap();
        let (without_qid, _) = encode_pull(1000, 7, true).unwrap();
        assert!(with_qid.len() > without_qid.len());
        assert_eq!(without_qid[2], 0xA1);
        assert_eq!(with_qid[2], 0xA2);
    }

    #[test]
    fn test_encode_bare_messages() {
        for (encoded, tag) in [
            (encode_commit().unwrap(), COMMIT),
            (encode_rollback().unwrap(), ROLLBACK),
            (encode_reset().unwrap(), RESET),
            (encode_goodbye().unwrap(), GOODBYE),
        ] {
            assert_eq!(encoded.0, vec![0xB0, tag]);
        }
    }

    #[test]
    fn test_hello_contains_agent_and_auth() {
        let auth = AuthToken::new_basic_auth("user", "pass");
        let (wire, _) = encode_hello(&HelloArgs {
            user_agent: "test/0.0",
            auth: &auth,
            routing_context: None,
        })
        .unwrap();
        assert_eq!(wire[0], 0xB1);
        assert_eq!(wire[1], HELLO);
        let haystack = String::from_utf8_lossy(&wire);
        assert!(haystack.contains("user_agent"));
        assert!(haystack.contains("scheme"));
        assert!(haystack.contains("basic"));
    }

    #[test]
    fn test_encode_begin_with_everything() {
        let bookmarks = Bookmarks::from_raw(["bm:1"]);
        let meta = hash_map!("k".to_string() => value!("v"));
        let args = TxArgs {
            bookmarks: Some(&bookmarks),
            tx_timeout: Some(17),
            tx_metadata: Some(&meta),
            mode: Some("r"),
            db: Some("movies"),
        };
        let (wire, _) = encode_begin(&args).unwrap();
        assert_eq!(wire[0], 0xB1);
        assert_eq!(wire[1], BEGIN);
        // extra dict carries all five entries
        assert_eq!(wire[2], 0xA5);
    }
}
