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

mod chunk;
mod handshake;
mod message;
pub(crate) mod packstream;
pub(crate) mod protocol;
mod response;
mod socket;
mod state;

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, log_enabled, trace, Level};

use crate::address_::Address;
use crate::error::{DriverError, Result, ServerError};
use crate::time::Instant;
use crate::util::hex_preview;
use crate::value::Value;
use chunk::{frame_message, ChunkedReader};
pub(crate) use handshake::open;
use message::ServerMessage;
pub(crate) use protocol::{HelloArgs, RunArgs, TxArgs};
pub(crate) use response::{
    AbortOnFailure, BoxedSink, RecordValues, RequestKind, ResponseMeta, ResponseSink,
};
use response::PendingReply;
pub(crate) use socket::{BufTcpStream, Transport};
use state::{ServerState, StateTracker};

pub(crate) type TcpIo = Transport<BufTcpStream>;
pub(crate) type TcpConnection = Connection<TcpIo>;

/// Feedback channel for server FAILUREs observed while reading: the
/// provider uses it to update routing state before the failure reaches the
/// request's sink.
pub(crate) type ServerErrorHook<'a, 'b> =
    Option<&'a mut (dyn FnMut(&Arc<Address>, &ServerError) -> Result<()> + 'b)>;

// server message tags
const SUCCESS: u8 = 0x70;
const RECORD: u8 = 0x71;
const IGNORED: u8 = 0x7E;
const FAILURE: u8 = 0x7F;

const RAW_TRACE_BYTES: usize = 50;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum ConnectionStatus {
    Healthy,
    Broken,
    Closed,
}

/// One physical Bolt connection.
///
/// Requests are framed at enqueue time and flushed explicitly; replies are
/// matched to the pending-reply queue in send order. Pipelining any number
/// of requests is safe because the server answers strictly in order.
pub(crate) struct Connection<RW: Read + Write> {
    stream: RW,
    /// kept alongside the (possibly TLS-wrapped, buffered) stream to drive
    /// timeouts and shutdown; absent for in-memory test connections
    socket: Option<TcpStream>,
    outbox: VecDeque<Vec<u8>>,
    pending: VecDeque<PendingReply>,
    state: StateTracker,
    status: ConnectionStatus,
    version: (u8, u8),
    address: Arc<Address>,
    local_port: Option<u16>,
    connection_id: Option<String>,
    server_agent: Arc<String>,
    last_qid: Option<i64>,
    opened_at: Instant,
    last_io: Instant,
}

impl<RW: Read + Write> Connection<RW> {
    fn new(
        version: (u8, u8),
        stream: RW,
        socket: Option<TcpStream>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let now = Instant::now();
        Self {
            stream,
            socket,
            outbox: VecDeque::new(),
            pending: VecDeque::new(),
            state: StateTracker::new(),
            status: ConnectionStatus::Healthy,
            version,
            address,
            local_port,
            connection_id: None,
            server_agent: Default::default(),
            last_qid: None,
            opened_at: now,
            last_io: now,
        }
    }

    pub(crate) fn protocol_version(&self) -> (u8, u8) {
        self.version
    }

    pub(crate) fn address(&self) -> Arc<Address> {
        Arc::clone(&self.address)
    }

    pub(crate) fn server_agent(&self) -> Arc<String> {
        Arc::clone(&self.server_agent)
    }

    pub(crate) fn closed(&self) -> bool {
        self.status != ConnectionStatus::Healthy
    }

    /// Died without the server having reported a failure first; the usual
    /// sign of a dead server or severed network path.
    pub(crate) fn unexpectedly_closed(&self) -> bool {
        self.status == ConnectionStatus::Broken && self.state.state() != ServerState::Failed
    }

    pub(crate) fn expects_reply(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    /// Whether the connection has to be RESET before it can be pooled again.
    pub(crate) fn needs_reset(&self) -> bool {
        if self.status != ConnectionStatus::Healthy {
            return false;
        }
        if let Some(reply) = self.pending.back() {
            if reply.request == RequestKind::Reset {
                return false;
            }
        }
        self.state.state() != ServerState::Ready || !self.pending.is_empty()
    }

    pub(crate) fn is_older_than(&self, age: Duration) -> bool {
        self.opened_at.elapsed() >= age
    }

    pub(crate) fn is_idle_for(&self, idle_time: Duration) -> bool {
        self.last_io.elapsed() >= idle_time
    }

    #[inline(always)]
    pub(crate) fn debug_log(&self, msg: impl FnOnce() -> String) {
        debug!("{}{}", self.log_prefix(), msg());
    }

    fn log_prefix(&self) -> String {
        let port = self.local_port.unwrap_or_default();
        match &self.connection_id {
            Some(id) => format!("[#{port:04X}/{id}] "),
            None => format!("[#{port:04X}] "),
        }
    }

    // ------------------------------------------------------------------
    // enqueueing requests
    // ------------------------------------------------------------------

    fn submit(&mut self, encoded: protocol::Encoded, request: RequestKind, sink: BoxedSink) {
        let (payload, log_text) = encoded;
        if let Some(log_text) = log_text {
            debug!("{}C: {}", self.log_prefix(), log_text);
        }
        self.outbox.push_back(frame_message(&payload));
        self.pending.push_back(PendingReply { request, sink });
    }

    pub(crate) fn hello(&mut self, args: HelloArgs) -> Result<()> {
        let encoded = protocol::encode_hello(&args)?;
        self.submit(encoded, RequestKind::Hello, AbortOnFailure::boxed());
        Ok(())
    }

    pub(crate) fn run(&mut self, args: RunArgs, sink: BoxedSink) -> Result<()> {
        let encoded = protocol::encode_run(&args)?;
        self.submit(encoded, RequestKind::Run, sink);
        Ok(())
    }

    pub(crate) fn pull(&mut self, n: i64, qid: i64, sink: BoxedSink) -> Result<()> {
        let encoded = protocol::encode_pull(n, qid, self.can_omit_qid(qid))?;
        self.submit(encoded, RequestKind::Pull, sink);
        Ok(())
    }

    pub(crate) fn discard(&mut self, n: i64, qid: i64, sink: BoxedSink) -> Result<()> {
        let encoded = protocol::encode_discard(n, qid, self.can_omit_qid(qid))?;
        self.submit(encoded, RequestKind::Discard, sink);
        Ok(())
    }

    pub(crate) fn begin(&mut self, args: TxArgs, sink: BoxedSink) -> Result<()> {
        let encoded = protocol::encode_begin(&args)?;
        self.submit(encoded, RequestKind::Begin, sink);
        Ok(())
    }

    pub(crate) fn commit(&mut self, sink: BoxedSink) -> Result<()> {
        let encoded = protocol::encode_commit()?;
        self.submit(encoded, RequestKind::Commit, sink);
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        let encoded = protocol::encode_rollback()?;
        self.submit(encoded, RequestKind::Rollback, AbortOnFailure::boxed());
        Ok(())
    }

    pub(crate) fn reset(&mut self) -> Result<()> {
        let encoded = protocol::encode_reset()?;
        self.submit(encoded, RequestKind::Reset, AbortOnFailure::boxed());
        self.state.on_interrupt();
        Ok(())
    }

    fn can_omit_qid(&self, qid: i64) -> bool {
        qid == -1 || Some(qid) == self.last_qid
    }

    // ------------------------------------------------------------------
    // socket IO
    // ------------------------------------------------------------------

    /// Map an absolute deadline onto the socket's IO timeouts; `None`
    /// removes them again.
    fn set_io_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        let Some(socket) = &self.socket else {
            return Ok(());
        };
        let timeout = deadline.map(|deadline| {
            let left = deadline.remaining();
            match left.is_zero() {
                // elapsed deadline: shortest possible timeout so the next
                // blocking call reports it
                true => Duration::from_nanos(1),
                false => left,
            }
        });
        socket
            .set_read_timeout(timeout)
            .and_then(|_| socket.set_write_timeout(timeout))
            .map_err(|err| DriverError::InvalidConfig {
                message: format!("failed to configure socket timeout: {err}"),
            })
    }

    fn sever(&mut self) {
        self.status = ConnectionStatus::Broken;
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    /// Write and flush everything in the outbox.
    pub(crate) fn send_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.set_io_deadline(deadline)?;
        let res = self.write_outbox();
        let _ = self.set_io_deadline(None);
        self.last_io = Instant::now();
        if let Err(err) = &res {
            self.debug_log(|| format!("write failed: {err}"));
            self.sever();
        }
        res
    }

    fn write_outbox(&mut self) -> Result<()> {
        while let Some(framed) = self.outbox.pop_front() {
            if log_enabled!(Level::Trace) {
                trace!(
                    "{}C: <RAW> {}",
                    self.log_prefix(),
                    hex_preview(&framed, RAW_TRACE_BYTES)
                );
            }
            DriverError::wrap_write(self.stream.write_all(&framed))?;
        }
        DriverError::wrap_write(self.stream.flush())
    }

    /// Receive and dispatch a single server message.
    pub(crate) fn receive_one(
        &mut self,
        deadline: Option<Instant>,
        hook: ServerErrorHook,
    ) -> Result<()> {
        self.set_io_deadline(deadline)?;
        let received = ChunkedReader::new(&mut self.stream).read_message();
        let _ = self.set_io_deadline(None);
        self.last_io = Instant::now();
        let message = received.and_then(|buffer| ServerMessage::parse(&buffer));
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                self.debug_log(|| format!("read failed: {err}"));
                self.sever();
                return Err(err);
            }
        };
        self.dispatch(message, hook)
    }

    pub(crate) fn receive_all(
        &mut self,
        deadline: Option<Instant>,
        mut hook: ServerErrorHook,
    ) -> Result<()> {
        while self.expects_reply() {
            self.receive_one(deadline, hook.as_deref_mut())?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // response dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, message: ServerMessage, hook: ServerErrorHook) -> Result<()> {
        let mut reply = self
            .pending
            .pop_front()
            .expect("received a reply with no request pending");
        match (message.tag, message.fields) {
            (SUCCESS, fields) => {
                let meta = single_map_field("SUCCESS", fields)?;
                if reply.request == RequestKind::Hello {
                    self.absorb_hello_meta(&meta);
                }
                if log_enabled!(Level::Debug) {
                    debug!("{}S: SUCCESS {}", self.log_prefix(), render_meta(&meta));
                }
                let prefix = self.log_prefix();
                self.state.on_success(reply.request, &meta, &prefix);
                self.absorb_qid(reply.request, &meta)?;
                reply.sink.on_success(meta)
            }
            (RECORD, fields) => {
                let values = single_list_field("RECORD", fields)?;
                debug!("{}S: RECORD [...]", self.log_prefix());
                let res = reply.sink.on_record(values);
                // more records and the final summary are still owed
                self.pending.push_front(reply);
                res
            }
            (IGNORED, fields) => {
                no_fields("IGNORED", &fields)?;
                debug!("{}S: IGNORED", self.log_prefix());
                reply.sink.on_ignored()
            }
            (FAILURE, fields) => {
                let meta = single_map_field("FAILURE", fields)?;
                if log_enabled!(Level::Debug) {
                    debug!("{}S: FAILURE {}", self.log_prefix(), render_meta(&meta));
                }
                let error = ServerError::from_meta(meta);
                self.state.on_failure();
                if let Some(hook) = hook {
                    hook(&self.address, &error)?;
                }
                reply.sink.on_failure(error)
            }
            (tag, _) => Err(DriverError::protocol_error(format!(
                "unknown server message tag {tag:02X?}"
            ))),
        }
    }

    fn absorb_hello_meta(&mut self, meta: &ResponseMeta) {
        if let Some(Value::String(agent)) = meta.get("server") {
            self.server_agent = Arc::new(agent.clone());
        }
        if let Some(Value::String(id)) = meta.get("connection_id") {
            self.connection_id = Some(id.clone());
        }
    }

    fn absorb_qid(&mut self, request: RequestKind, meta: &ResponseMeta) -> Result<()> {
        if request != RequestKind::Run {
            return Ok(());
        }
        self.last_qid = match meta.get("qid") {
            None => None,
            Some(Value::Integer(qid)) => Some(*qid),
            Some(v) => {
                return Err(DriverError::protocol_error(format!(
                    "server sent non-int qid: {v:?}"
                )))
            }
        };
        Ok(())
    }

    // ------------------------------------------------------------------
    // teardown
    // ------------------------------------------------------------------

    pub(crate) fn close(&mut self) {
        if self.status != ConnectionStatus::Healthy {
            return;
        }
        self.status = ConnectionStatus::Closed;
        self.outbox.clear();
        self.pending.clear();
        // best-effort farewell with a tight time budget
        if let Ok(encoded) = protocol::encode_goodbye() {
            if let Some(log_text) = encoded.1 {
                debug!("{}C: {}", self.log_prefix(), log_text);
            }
            self.outbox.push_back(frame_message(&encoded.0));
            let deadline = Instant::now() + Duration::from_millis(100);
            if self.set_io_deadline(Some(deadline)).is_ok() {
                let _ = self.write_outbox();
            }
        }
        if let Some(socket) = &self.socket {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl<RW: Read + Write> Drop for Connection<RW> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<RW: Read + Write> Debug for Connection<RW> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("outbox", &self.outbox.len())
            .field("pending", &self.pending)
            .finish()
    }
}

fn single_map_field(name: &str, mut fields: Vec<Value>) -> Result<ResponseMeta> {
    match (fields.len(), fields.pop()) {
        (1, Some(Value::Map(meta))) => Ok(meta),
        (1, Some(other)) => Err(DriverError::protocol_error(format!(
            "{name} field was not a map but {other:?}"
        ))),
        (n, _) => Err(DriverError::protocol_error(format!(
            "{name} must have exactly one field, found {n}"
        ))),
    }
}

fn single_list_field(name: &str, mut fields: Vec<Value>) -> Result<RecordValues> {
    match (fields.len(), fields.pop()) {
        (1, Some(Value::List(values))) => Ok(values),
        (1, Some(other)) => Err(DriverError::protocol_error(format!(
            "{name} field was not a list but {other:?}"
        ))),
        (n, _) => Err(DriverError::protocol_error(format!(
            "{name} must have exactly one field, found {n}"
        ))),
    }
}

fn no_fields(name: &str, fields: &[Value]) -> Result<()> {
    match fields.is_empty() {
        true => Ok(()),
        false => Err(DriverError::protocol_error(format!(
            "{name} must have no fields, found {}",
            fields.len()
        ))),
    }
}

fn render_meta(meta: &ResponseMeta) -> String {
    let mut rendered = String::from("{");
    for (i, (key, value)) in meta.iter().enumerate() {
        if i > 0 {
            rendered.push_str(", ");
        }
        let _ = std::fmt::Write::write_fmt(&mut rendered, format_args!("{key:?}: {value}"));
    }
    rendered.push('}');
    rendered
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use atomic_refcell::AtomicRefCell;

    use super::packstream::{serialize_value, PackStreamSerializer, PackStreamWireSerializer};
    use super::*;
    use crate::value;

    /// In-memory stand-in for the socket: scripted server responses on the
    /// read side, everything written is captured.
    #[derive(Debug)]
    struct ScriptedIo {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for ScriptedIo {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedIo {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[derive(Debug, PartialEq)]
    enum Event {
        Success,
        Record,
        Failure(String),
        Ignored,
    }

    /// Sink that records which terminal calls it received.
    #[derive(Default)]
    struct Recorder {
        events: Arc<AtomicRefCell<Vec<Event>>>,
    }

    impl Recorder {
        fn sink(&self) -> BoxedSink {
            Box::new(Recorder {
                events: Arc::clone(&self.events),
            })
        }

        fn events(&self) -> Vec<Event> {
            std::mem::take(&mut *self.events.borrow_mut())
        }
    }

    impl ResponseSink for Recorder {
        fn on_success(&mut self, _meta: ResponseMeta) -> Result<()> {
            self.events.borrow_mut().push(Event::Success);
            Ok(())
        }

        fn on_record(&mut self, _values: RecordValues) -> Result<()> {
            self.events.borrow_mut().push(Event::Record);
            Ok(())
        }

        fn on_failure(&mut self, error: ServerError) -> Result<()> {
            self.events
                .borrow_mut()
                .push(Event::Failure(error.code().to_string()));
            Ok(())
        }

        fn on_ignored(&mut self) -> Result<()> {
            self.events.borrow_mut().push(Event::Ignored);
            Ok(())
        }
    }

    fn server_message(tag: u8, fields: &[Value]) -> Vec<u8> {
        let mut payload = Vec::new();
        let mut serializer = PackStreamWireSerializer::new(&mut payload);
        serializer
            .write_struct_header(tag, fields.len() as u8)
            .unwrap();
        for field in fields {
            serialize_value(&mut serializer, field).unwrap();
        }
        frame_message(&payload)
    }

    fn success(meta: Value) -> Vec<u8> {
        server_message(SUCCESS, &[meta])
    }

    fn failure(code: &str) -> Vec<u8> {
        server_message(
            FAILURE,
            &[value!({"code": code, "message": "scripted failure"})],
        )
    }

    fn ignored() -> Vec<u8> {
        server_message(IGNORED, &[])
    }

    fn record(values: &[Value]) -> Vec<u8> {
        server_message(RECORD, &[Value::List(values.to_vec())])
    }

    fn new_connection(scripted: Vec<Vec<u8>>) -> Connection<ScriptedIo> {
        Connection::new(
            (4, 4),
            ScriptedIo {
                input: Cursor::new(scripted.concat()),
                output: Vec::new(),
            },
            None,
            None,
            Arc::new(("localhost", 7687).into()),
        )
    }

    fn run_args() -> RunArgs<'static> {
        RunArgs::in_transaction("RETURN 1 AS x", None)
    }

    #[test]
    fn test_pipelined_requests_are_answered_in_send_order() {
        let mut connection = new_connection(vec![
            success(value!({"fields": ["x"]})),
            record(&[Value::Integer(1)]),
            success(value!({"has_more": false})),
        ]);
        let recorder = Recorder::default();

        connection.run(run_args(), recorder.sink()).unwrap();
        connection.pull(-1, -1, recorder.sink()).unwrap();
        // both requests go out before any reply is read
        connection.send_all(None).unwrap();
        assert_eq!(connection.pending_replies(), 2);
        connection.receive_all(None, None).unwrap();

        assert_eq!(
            recorder.events(),
            vec![Event::Success, Event::Record, Event::Success]
        );
        assert!(!connection.expects_reply());
    }

    #[test]
    fn test_failure_then_ignored_until_reset() {
        let mut connection = new_connection(vec![
            failure("Neo.ClientError.Statement.SyntaxError"),
            ignored(),
            success(value!({})),
        ]);
        let recorder = Recorder::default();

        // RUN fails
        connection.run(run_args(), recorder.sink()).unwrap();
        connection.send_all(None).unwrap();
        connection.receive_all(None, None).unwrap();
        assert_eq!(
            recorder.events(),
            vec![Event::Failure(
                "Neo.ClientError.Statement.SyntaxError".into()
            )]
        );
        assert!(connection.needs_reset());

        // the next request is answered IGNORED
        connection.run(run_args(), recorder.sink()).unwrap();
        connection.send_all(None).unwrap();
        connection.receive_all(None, None).unwrap();
        assert_eq!(recorder.events(), vec![Event::Ignored]);
        assert!(connection.needs_reset());

        // RESET's SUCCESS makes the connection usable again
        connection.reset().unwrap();
        connection.send_all(None).unwrap();
        connection.receive_all(None, None).unwrap();
        assert!(!connection.needs_reset());
    }

    #[test]
    fn test_server_error_hook_sees_failures_first() {
        let mut connection = new_connection(vec![
            failure("Neo.TransientError.General.DatabaseUnavailable"),
        ]);
        connection
            .run(run_args(), Recorder::default().sink())
            .unwrap();
        connection.send_all(None).unwrap();

        let observed: Arc<AtomicRefCell<Vec<String>>> = Default::default();
        let mut hook = |address: &Arc<Address>, error: &ServerError| -> Result<()> {
            observed
                .borrow_mut()
                .push(format!("{address} {}", error.code()));
            Ok(())
        };
        connection.receive_all(None, Some(&mut hook)).unwrap();
        assert_eq!(
            *observed.borrow(),
            vec!["localhost:7687 Neo.TransientError.General.DatabaseUnavailable"]
        );
    }

    #[test]
    fn test_requests_are_framed_with_terminator() {
        let mut connection = new_connection(vec![]);
        connection
            .run(run_args(), AbortOnFailure::boxed())
            .unwrap();
        connection.send_all(None).unwrap();

        let output = &connection.stream.output;
        // u16 chunk size announcing the whole message, ending in 0000
        let size = u16::from_be_bytes([output[0], output[1]]) as usize;
        assert_eq!(output.len(), size + 4);
        assert_eq!(&output[output.len() - 2..], &[0x00, 0x00]);
        // RUN is a struct with three fields
        assert_eq!(output[2], 0xB3);
        assert_eq!(output[3], 0x10);
    }

    #[test]
    fn test_hello_meta_is_absorbed() {
        let mut connection = new_connection(vec![success(value!({
            "server": "TestGraph/4.4.0",
            "connection_id": "bolt-1"
        }))]);
        let auth = crate::driver::config::auth::AuthToken::new_basic_auth("u", "p");
        connection
            .hello(HelloArgs {
                user_agent: "test/0.0",
                auth: &auth,
                routing_context: None,
            })
            .unwrap();
        connection.send_all(None).unwrap();
        connection.receive_all(None, None).unwrap();

        assert_eq!(&*connection.server_agent(), "TestGraph/4.4.0");
        assert_eq!(connection.connection_id.as_deref(), Some("bolt-1"));
    }

    #[test]
    fn test_malformed_reply_breaks_the_connection() {
        // server sends a lone end-of-message marker (an empty message)
        let mut connection = new_connection(vec![vec![0x00, 0x00]]);
        connection
            .run(run_args(), AbortOnFailure::boxed())
            .unwrap();
        connection.send_all(None).unwrap();
        let err = connection.receive_one(None, None).unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError { .. }));
        assert!(connection.closed());
        assert!(connection.unexpectedly_closed());
    }
}
