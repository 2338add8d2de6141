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

use std::cell::RefCell;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::mem;
use std::rc::Rc;
use std::sync::{Arc, Weak};

use atomic_refcell::AtomicRefCell;

use super::io::bolt::{RecordValues, ResponseMeta, ResponseSink, RunArgs};
use super::io::PooledConnection;
use super::record::Record;
use super::summary::Summary;
use crate::driver::eager_result::EagerResult;
use crate::error::{DriverError, Result, ServerError};
use crate::value::Value;

/// A lazy stream of [`Record`]s produced by a query.
///
/// Records arrive from the server in batches; iterating pulls the next
/// batch whenever the buffer runs dry. [`RecordStream::consume()`] discards
/// whatever is left of the stream and hands out the [`Summary`].
#[derive(Debug)]
pub struct RecordStream<'driver> {
    connection: Rc<RefCell<PooledConnection<'driver>>>,
    batch_size: i64,
    auto_commit: bool,
    core: SharedStreamCore,
    consumed: bool,
    consumed_reported: bool,
}

impl<'driver> RecordStream<'driver> {
    pub(crate) fn new(
        connection: Rc<RefCell<PooledConnection<'driver>>>,
        batch_size: i64,
        auto_commit: bool,
        broadcast: Option<SharedTxFailureBroadcast>,
    ) -> Self {
        let core = Arc::new(AtomicRefCell::new(StreamCore::new(
            Summary::new(&connection.borrow()),
            broadcast.clone(),
        )));
        if let Some(broadcast) = broadcast {
            broadcast.borrow_mut().enroll(Arc::downgrade(&core));
        }
        Self {
            connection,
            batch_size,
            auto_commit,
            core,
            consumed: false,
            consumed_reported: false,
        }
    }

    /// Send RUN plus the first PULL (pipelined), flush, and read until only
    /// the PULL's replies remain outstanding. Afterwards the field names are
    /// known, or the query's failure has surfaced.
    pub(crate) fn start(&mut self, args: RunArgs) -> Result<()> {
        {
            let mut core = self.core.borrow_mut();
            if let StreamPhase::Suppressed(error) = &core.phase {
                return Err(DriverError::from_server_error(error.as_ref().clone()));
            }
            if let Some(summary) = core.summary.as_mut() {
                summary.set_query(args.query, args.parameters);
            }
        }

        let outcome = (|| {
            let mut connection = self.connection.borrow_mut();
            connection.run(args, self.sink())?;
            connection.pull(self.batch_size, -1, self.sink())?;
            connection.send_all(None)?;
            while connection.pending_replies() > 1 {
                connection.receive_one(None)?;
            }
            Ok(())
        })();
        if let Err(err) = outcome {
            self.core.borrow_mut().phase = StreamPhase::Spent;
            return Err(self.stamp_commit(err));
        }

        // surface what the replies did to the stream state (RUN may have
        // failed, or a sibling stream's failure may have been broadcast)
        let verdict = {
            let mut core = self.core.borrow_mut();
            match &core.phase {
                StreamPhase::Broken(_) | StreamPhase::Suppressed(_) | StreamPhase::Dismissed => {
                    Some(core.report())
                }
                _ => None,
            }
        };
        match verdict {
            Some(Some(err)) => Err(self.stamp_commit(err)),
            _ => Ok(()),
        }
    }

    /// Fully consume the result and return the [`Summary`].
    ///
    /// Remaining records are discarded server-side where possible.
    ///
    /// Returns [`None`] if
    ///  * `consume()` has been called before or
    ///  * there was an error (earlier) while processing the stream.
    pub fn consume(&mut self) -> Result<Option<Summary>> {
        if self.consumed {
            return Ok(None);
        }
        self.drain()?;
        self.consumed = true;
        Ok(self.core.borrow_mut().summary.take())
    }

    /// The names of the record fields, available as soon as the query was
    /// accepted by the server.
    pub fn keys(&self) -> Vec<Arc<String>> {
        (*self.core)
            .borrow()
            .keys
            .as_ref()
            .expect(
                "keys are set when RUN succeeds; a stream whose RUN failed \
                is never handed to the user",
            )
            .clone()
    }

    /// Exhaust the stream and expect exactly one record.
    pub fn single(&mut self) -> Result<Record> {
        if self.consumed {
            return Err(result_consumed_error());
        }
        let Some(first) = self.next() else {
            return Err(DriverError::usage_error("no records were found"));
        };
        let record = first?;
        match self.next() {
            None => Ok(record),
            Some(Err(err)) => Err(err),
            Some(Ok(_)) => {
                self.drain()?;
                Err(DriverError::usage_error("more than one record was found"))
            }
        }
    }

    /// Collect the remaining stream into an [`EagerResult`].
    ///
    /// Returns [`None`] if the stream has already been consumed.
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        if self.consumed {
            return Ok(None);
        }
        let keys = self.keys();
        let records = self.collect::<Result<_>>()?;
        let Some(summary) = self.consume()? else {
            return Ok(None);
        };
        Ok(Some(EagerResult {
            keys,
            records,
            summary,
        }))
    }

    pub(crate) fn into_bookmark(self) -> Option<String> {
        Arc::try_unwrap(self.core)
            .expect("stream dropped while its core is still shared")
            .into_inner()
            .bookmark
    }

    /// Iterate the rest of the stream away, switching from PULL to DISCARD
    /// so the server can short-circuit.
    fn drain(&mut self) -> Result<()> {
        {
            let mut core = self.core.borrow_mut();
            if matches!(core.phase, StreamPhase::Feeding) {
                core.buffer.clear();
                core.phase = StreamPhase::Draining;
            }
        }
        let res = self.try_for_each(|record| record.map(drop));
        match self.auto_commit {
            true => DriverError::wrap_commit(res),
            false => res,
        }
    }

    fn sink(&self) -> Box<StreamSink> {
        Box::new(StreamSink {
            core: Arc::downgrade(&self.core),
        })
    }

    fn request_next_batch(&mut self, discard: bool) -> Result<()> {
        let qid = (*self.core).borrow().qid;
        let mut connection = self.connection.borrow_mut();
        match discard {
            true => connection.discard(-1, qid, self.sink())?,
            false => connection.pull(self.batch_size, qid, self.sink())?,
        }
        connection.send_all(None)
    }

    fn stamp_commit(&self, err: DriverError) -> DriverError {
        match self.auto_commit {
            true => err.failed_commit(),
            false => err,
        }
    }
}

fn result_consumed_error() -> DriverError {
    DriverError::usage_error("result consumed: records may not be requested anymore")
}

/// What the iterator decided to do after looking at the shared state.
enum Step {
    Deliver(Record),
    AwaitReply,
    Request { discard: bool },
    Finish(Option<DriverError>),
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let step = {
                let mut core = self.core.borrow_mut();
                if let Some(record) = core.buffer.pop_front() {
                    Step::Deliver(record)
                } else {
                    match &core.phase {
                        StreamPhase::Feeding => {
                            match RefCell::borrow(&self.connection).expects_reply() {
                                true => Step::AwaitReply,
                                false => Step::Request { discard: false },
                            }
                        }
                        StreamPhase::Draining => {
                            match RefCell::borrow(&self.connection).expects_reply() {
                                true => Step::AwaitReply,
                                false => Step::Request { discard: true },
                            }
                        }
                        StreamPhase::Ended => Step::Finish(None),
                        StreamPhase::Spent => {
                            // asking again after consume() is an error,
                            // reported exactly once
                            let complain = self.consumed && !self.consumed_reported;
                            self.consumed_reported |= complain;
                            Step::Finish(complain.then(result_consumed_error))
                        }
                        StreamPhase::Broken(_)
                        | StreamPhase::Suppressed(_)
                        | StreamPhase::Dismissed => Step::Finish(core.report()),
                    }
                }
            };
            match step {
                Step::Deliver(record) => return Some(Ok(record)),
                Step::AwaitReply => {
                    if let Err(err) = self.connection.borrow_mut().receive_one(None) {
                        let err = self.stamp_commit(err);
                        self.core.borrow_mut().phase = StreamPhase::Broken(err);
                    }
                }
                Step::Request { discard } => {
                    if let Err(err) = self.request_next_batch(discard) {
                        let err = self.stamp_commit(err);
                        self.core.borrow_mut().phase = StreamPhase::Broken(err);
                    }
                }
                Step::Finish(None) => return None,
                Step::Finish(Some(err)) => return Some(Err(err)),
            }
        }
    }
}

impl FusedIterator for RecordStream<'_> {}

/// Where the stream stands, as seen by both the iterator and the response
/// sinks feeding it.
#[derive(Debug)]
enum StreamPhase {
    /// more records may arrive
    Feeding,
    /// the user gave up on the records, DISCARD instead of PULL
    Draining,
    /// final SUCCESS processed, summary available
    Ended,
    /// this stream failed (server FAILURE or local IO error)
    Broken(DriverError),
    /// a sibling stream of the same transaction failed
    Suppressed(Arc<ServerError>),
    /// the server answered IGNORED without a known cause
    Dismissed,
    /// failure reported / records consumed; nothing left to say
    Spent,
}

#[derive(Debug)]
pub(crate) struct StreamCore {
    buffer: VecDeque<Record>,
    keys: Option<Vec<Arc<String>>>,
    qid: i64,
    phase: StreamPhase,
    summary: Option<Summary>,
    bookmark: Option<String>,
    broadcast: Option<SharedTxFailureBroadcast>,
}

type SharedStreamCore = Arc<AtomicRefCell<StreamCore>>;

impl StreamCore {
    fn new(summary: Summary, broadcast: Option<SharedTxFailureBroadcast>) -> Self {
        Self {
            buffer: VecDeque::new(),
            keys: None,
            qid: -1,
            phase: StreamPhase::Feeding,
            summary: Some(summary),
            bookmark: None,
            broadcast,
        }
    }

    /// Take the terminal error out (transitioning to `Spent`), or `None`
    /// when there is none to report.
    fn report(&mut self) -> Option<DriverError> {
        match mem::replace(&mut self.phase, StreamPhase::Spent) {
            StreamPhase::Broken(err) => Some(err),
            StreamPhase::Suppressed(error) => {
                Some(DriverError::from_server_error(error.as_ref().clone()))
            }
            StreamPhase::Dismissed => Some(DriverError::protocol_error(
                "server ignored the request without a preceding failure",
            )),
            phase => {
                self.phase = phase;
                None
            }
        }
    }

    fn run_succeeded(&mut self, mut meta: ResponseMeta) -> Result<()> {
        if self.keys.is_some() {
            return Ok(());
        }
        match meta.remove("qid") {
            Some(Value::Integer(qid)) => self.qid = qid,
            Some(_) => {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'qid' was not an integer",
                ))
            }
            None => {}
        }
        let keys = match meta.remove("fields") {
            Some(Value::List(fields)) => fields
                .into_iter()
                .map(|field| match field {
                    Value::String(field) => Ok(Arc::new(field)),
                    _ => Err(DriverError::protocol_error(
                        "SUCCESS after RUN 'fields' was not a list of strings",
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'fields' was not a list",
                ))
            }
            None => {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN did not contain 'fields'",
                ))
            }
        };
        self.keys = Some(keys);
        if let Some(summary) = self.summary.as_mut() {
            summary.load_run_meta(&mut meta)?;
        }
        Ok(())
    }

    fn batch_ended(&mut self, mut meta: ResponseMeta) -> Result<()> {
        if let Some(Value::Boolean(true)) = meta.get("has_more") {
            // next batch to be requested by the iterator
            return Ok(());
        }
        if let Some(Value::String(bookmark)) = meta.remove("bookmark") {
            self.bookmark = Some(bookmark);
        }
        if let Some(summary) = self.summary.as_mut() {
            summary.load_pull_meta(&mut meta)?;
        }
        self.phase = StreamPhase::Ended;
        Ok(())
    }

    fn record_arrived(&mut self, values: RecordValues) -> Result<()> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| DriverError::protocol_error("RECORD received before RUN SUCCESS"))?;
        if keys.len() != values.len() {
            return Err(DriverError::protocol_error(format!(
                "RECORD contained {} entries but {} keys were announced",
                values.len(),
                keys.len()
            )));
        }
        self.buffer.push_back(Record::new(keys, values));
        Ok(())
    }

    fn suppress(&mut self, error: Arc<ServerError>) {
        self.phase = StreamPhase::Suppressed(error);
        self.summary = None;
    }
}

/// The stream's ear on the connection: feeds every reply (RUN's SUCCESS,
/// records, batch SUCCESSes, failures) into the shared core.
struct StreamSink {
    core: Weak<AtomicRefCell<StreamCore>>,
}

impl StreamSink {
    fn with_core(&self, f: impl FnOnce(&mut StreamCore) -> Result<()>) -> Result<()> {
        match self.core.upgrade() {
            Some(core) => f(&mut core.borrow_mut()),
            // the stream is gone; late replies are dropped on the floor
            None => Ok(()),
        }
    }
}

impl ResponseSink for StreamSink {
    fn on_success(&mut self, meta: ResponseMeta) -> Result<()> {
        self.with_core(|core| match core.keys.is_some() {
            // keys known: this answers a PULL/DISCARD
            true => core.batch_ended(meta),
            false => core.run_succeeded(meta),
        })
    }

    fn on_record(&mut self, values: RecordValues) -> Result<()> {
        self.with_core(|core| core.record_arrived(values))
    }

    fn on_failure(&mut self, error: ServerError) -> Result<()> {
        let Some(core) = self.core.upgrade() else {
            return Ok(());
        };
        // tell the rest of the transaction first (without holding the
        // core's borrow, the broadcast loops over all streams incl. this)
        let broadcast = core.borrow().broadcast.clone();
        if let Some(broadcast) = broadcast {
            broadcast.borrow_mut().raise(
                Some(&self.core),
                &error,
                "a failed query closed the containing transaction",
            );
        }
        let mut core = core.borrow_mut();
        core.phase = StreamPhase::Broken(DriverError::from_server_error(error));
        core.summary = None;
        Ok(())
    }

    fn on_ignored(&mut self) -> Result<()> {
        self.with_core(|core| {
            if !matches!(core.phase, StreamPhase::Suppressed(_)) {
                core.phase = StreamPhase::Dismissed;
            }
            core.summary = None;
            Ok(())
        })
    }
}

/// Fans the first failure inside a transaction out to every stream of that
/// transaction: after the server FAILs one query, everything else in the
/// transaction is answered IGNORED, and all streams should report the
/// original cause.
#[derive(Debug, Default)]
pub(crate) struct TxFailureBroadcast {
    members: Vec<Weak<AtomicRefCell<StreamCore>>>,
    cause: Option<Arc<ServerError>>,
}

pub(crate) type SharedTxFailureBroadcast = Arc<AtomicRefCell<TxFailureBroadcast>>;

impl TxFailureBroadcast {
    fn enroll(&mut self, member: Weak<AtomicRefCell<StreamCore>>) {
        if let Some(cause) = &self.cause {
            match member.upgrade() {
                Some(core) => core.borrow_mut().suppress(Arc::clone(cause)),
                // no point in keeping a dead member
                None => return,
            }
        }
        self.members.push(member);
    }

    pub(crate) fn raise(
        &mut self,
        culprit: Option<&Weak<AtomicRefCell<StreamCore>>>,
        error: &ServerError,
        reason: &str,
    ) {
        let error = Arc::new(error.clone_with_reason(reason));
        for member in &self.members {
            if culprit.map(|culprit| culprit.ptr_eq(member)).unwrap_or(false) {
                // the failing stream reports the error itself
                continue;
            }
            if let Some(core) = member.upgrade() {
                core.borrow_mut().suppress(Arc::clone(&error));
            }
        }
        self.cause = Some(error);
    }

    pub(crate) fn cause(&self) -> Option<&Arc<ServerError>> {
        self.cause.as_ref()
    }
}
