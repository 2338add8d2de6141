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
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use super::eager_result::EagerResult;
use super::io::bolt::{ResponseMeta, ResponseSink, RunArgs, TxArgs};
use super::io::PooledConnection;
use super::record::Record;
use super::record_stream::{RecordStream, SharedTxFailureBroadcast};
use super::summary::Summary;
use crate::error::{DriverError, Result, ServerError};
use crate::value::Value;

/// An explicit transaction.
///
/// The transaction holds its connection exclusively for its entire
/// lifetime. It ends through [`Transaction::commit()`],
/// [`Transaction::rollback()`], or — implicitly rolling back and swallowing
/// errors — by being dropped.
///
/// **NOTE:**
/// Once any associated function of the transaction or of a
/// [`TransactionRecordStream`] spawned from it returns an error, the
/// transaction is closed.
#[derive(Debug)]
pub struct Transaction<'driver, 'tx> {
    core: &'tx mut TxCore<'driver>,
    /// an error that surfaced while a record stream was dropped; decides
    /// the fate of a later commit/rollback
    latent_failure: RefCell<Option<DriverError>>,
}

impl<'driver, 'tx> Transaction<'driver, 'tx> {
    pub(crate) fn new(core: &'tx mut TxCore<'driver>) -> Self {
        Self {
            core,
            latent_failure: RefCell::new(None),
        }
    }

    /// Prepare a query to be executed inside this transaction.
    ///
    /// Use the returned [`TransactionQueryBuilder`] to add parameters and
    /// run the query.
    pub fn query<Q: Into<String>>(&'tx self, query: Q) -> TransactionQueryBuilder<'driver, 'tx> {
        TransactionQueryBuilder {
            tx: self,
            query: query.into(),
            parameters: HashMap::new(),
        }
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        if let Some(failure) = self.latent_failure.into_inner() {
            return Err(failure);
        }
        self.core.commit()
    }

    /// Rollback the transaction.
    ///
    /// This is the default behavior when the transaction is dropped.
    /// However, when dropping the transaction, potential errors will be
    /// swallowed.
    pub fn rollback(self) -> Result<()> {
        match self.latent_failure.into_inner() {
            // the transaction already failed; the server rolled it back
            Some(_) => Ok(()),
            None => self.core.rollback(),
        }
    }

    fn note_stream_failure(&self, failure: DriverError) {
        let mut latent = self.latent_failure.borrow_mut();
        if latent.is_none() {
            *latent = Some(failure);
        }
    }
}

/// A result cursor as returned by [`TransactionQueryBuilder::run()`].
///
/// It implements [`Iterator`] over the [`Record`]s.
///
/// Before ending the transaction ([`Transaction::commit()`] or
/// [`Transaction::rollback()`]), all record streams spawned from it must be
/// dropped. While `drop(stream)` works fine for this purpose, it swallows
/// outstanding errors; prefer [`TransactionRecordStream::consume()`].
#[derive(Debug)]
pub struct TransactionRecordStream<'driver, 'tx> {
    stream: RecordStream<'driver>,
    tx: &'tx Transaction<'driver, 'tx>,
}

impl Drop for TransactionRecordStream<'_, '_> {
    fn drop(&mut self) {
        if let Err(err) = self.stream.consume() {
            self.tx.note_stream_failure(err);
        }
    }
}

impl<'driver> TransactionRecordStream<'driver, '_> {
    /// see [`RecordStream::consume()`] (except that this consumes `self`)
    pub fn consume(mut self) -> Result<Option<Summary>> {
        self.stream.consume()
    }

    /// see [`RecordStream::keys()`]
    pub fn keys(&self) -> Vec<Arc<String>> {
        self.stream.keys()
    }

    /// see [`RecordStream::single()`]
    pub fn single(&mut self) -> Result<Record> {
        self.stream.single()
    }

    /// see [`RecordStream::try_as_eager_result()`]
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        self.stream.try_as_eager_result()
    }
}

impl Iterator for TransactionRecordStream<'_, '_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next()
    }
}

/// A builder for queries to be executed in a transaction.
///
/// See [`Transaction::query()`].
pub struct TransactionQueryBuilder<'driver, 'tx> {
    tx: &'tx Transaction<'driver, 'tx>,
    query: String,
    parameters: HashMap<String, Value>,
}

impl<'driver, 'tx> TransactionQueryBuilder<'driver, 'tx> {
    /// Configure query parameters.
    ///
    /// Always prefer parameters over query string manipulation to avoid
    /// injection vulnerabilities and to allow the server to cache the query
    /// plan.
    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Run the query as configured.
    pub fn run(self) -> Result<TransactionRecordStream<'driver, 'tx>> {
        let stream = self.tx.core.run(&self.query, &self.parameters)?;
        Ok(TransactionRecordStream {
            stream,
            tx: self.tx,
        })
    }
}

impl Debug for TransactionQueryBuilder<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionQueryBuilder")
            .field("query", &self.query)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// The transaction machinery behind the public handle: owns the connection
/// lease and the failure broadcast shared by all of the transaction's
/// streams.
#[derive(Debug)]
pub(crate) struct TxCore<'driver> {
    connection: Rc<RefCell<PooledConnection<'driver>>>,
    broadcast: SharedTxFailureBroadcast,
    bookmark: Arc<AtomicRefCell<Option<String>>>,
    batch_size: i64,
    finished: bool,
}

impl<'driver> TxCore<'driver> {
    pub(crate) fn new(connection: PooledConnection<'driver>, batch_size: i64) -> Self {
        Self {
            connection: Rc::new(RefCell::new(connection)),
            broadcast: SharedTxFailureBroadcast::default(),
            bookmark: Default::default(),
            batch_size,
            finished: false,
        }
    }

    /// Enqueue the BEGIN; it goes over the wire together with the first
    /// query (or the commit), saving a round-trip.
    pub(crate) fn begin(&mut self, args: TxArgs) -> Result<()> {
        let sink = BeginSink {
            broadcast: Arc::clone(&self.broadcast),
        };
        self.connection.borrow_mut().begin(args, Box::new(sink))
    }

    pub(crate) fn run(&self, query: &str, parameters: &HashMap<String, Value>) -> Result<RecordStream<'driver>> {
        let mut stream = RecordStream::new(
            Rc::clone(&self.connection),
            self.batch_size,
            false,
            Some(Arc::clone(&self.broadcast)),
        );
        stream.start(RunArgs::in_transaction(query, Some(parameters)))?;
        Ok(stream)
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.finished = true;
        self.broadcast_failure()?;
        let mut connection = self.connection.borrow_mut();
        // settle everything outstanding before committing; a BEGIN or RUN
        // failure must surface here, not be masked by the COMMIT
        connection.send_all(None)?;
        connection.receive_all(None)?;
        drop(connection);
        self.broadcast_failure()?;

        let mut connection = self.connection.borrow_mut();
        connection.commit(Box::new(CommitSink {
            bookmark: Arc::clone(&self.bookmark),
        }))?;
        connection.send_all(None)?;
        DriverError::wrap_commit(connection.receive_all(None))
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.finished = true;
        if self.broadcast_failure().is_err() {
            // the server already discarded the transaction
            return Ok(());
        }
        let mut connection = self.connection.borrow_mut();
        connection.rollback()?;
        connection.send_all(None)?;
        connection.receive_all(None)
    }

    /// Implicit end of scope: roll back unless the transaction concluded or
    /// already lies in ruins.
    pub(crate) fn settle(&mut self) -> Result<()> {
        if self.broadcast_failure().is_err() || self.connection.borrow().closed() {
            self.finished = true;
        }
        match self.finished {
            true => Ok(()),
            false => self.rollback(),
        }
    }

    pub(crate) fn take_bookmark(&self) -> Option<String> {
        self.bookmark.borrow_mut().take()
    }

    fn broadcast_failure(&self) -> Result<()> {
        match self.broadcast.borrow().cause() {
            None => Ok(()),
            Some(error) => Err(DriverError::from_server_error(error.as_ref().clone())),
        }
    }
}

/// BEGIN has no response of its own to hand out; its failure poisons the
/// whole transaction through the broadcast.
struct BeginSink {
    broadcast: SharedTxFailureBroadcast,
}

impl ResponseSink for BeginSink {
    fn on_failure(&mut self, error: ServerError) -> Result<()> {
        self.broadcast
            .borrow_mut()
            .raise(None, &error, "the transaction could not be started");
        Ok(())
    }
}

struct CommitSink {
    bookmark: Arc<AtomicRefCell<Option<String>>>,
}

impl ResponseSink for CommitSink {
    fn on_success(&mut self, mut meta: ResponseMeta) -> Result<()> {
        if let Some(Value::String(bookmark)) = meta.remove("bookmark") {
            *self.bookmark.borrow_mut() = Some(bookmark);
        }
        Ok(())
    }

    fn on_failure(&mut self, error: ServerError) -> Result<()> {
        Err(error.into())
    }
}

/// Controls after how long a transaction should be killed by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionTimeout {
    /// Instruct the server to never time the transaction out.
    Unlimited,
    /// Use the default timeout configured on the server.
    #[default]
    ServerDefault,
    /// Time out after this many milliseconds (always > 0).
    Millis(i64),
}

impl TransactionTimeout {
    /// Construct a transaction timeout in milliseconds.
    ///
    /// This returns [`None`] if the timeout is less than or equal to 0, as
    /// that is not considered a valid timeout by the server.
    ///
    /// # Example
    /// ```
    /// use graphbolt::transaction::TransactionTimeout;
    ///
    /// assert!(TransactionTimeout::from_millis(-1).is_none());
    /// assert!(TransactionTimeout::from_millis(0).is_none());
    /// assert!(TransactionTimeout::from_millis(1).is_some());
    /// ```
    #[inline]
    pub fn from_millis(timeout: i64) -> Option<Self> {
        match timeout > 0 {
            true => Some(Self::Millis(timeout)),
            false => None,
        }
    }

    /// Construct an infinite transaction timeout.
    #[inline]
    pub fn none() -> Self {
        Self::Unlimited
    }

    /// The value for the `tx_timeout` entry of the message extra,
    /// [`None`] meaning the entry is left out.
    #[inline]
    pub(crate) fn raw(&self) -> Option<i64> {
        match self {
            Self::Unlimited => Some(0),
            Self::ServerDefault => None,
            Self::Millis(timeout) => Some(*timeout),
        }
    }
}
