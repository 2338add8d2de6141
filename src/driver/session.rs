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

pub(crate) mod bookmarks;
pub(crate) mod config;
pub(crate) mod retry;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::result::Result as StdResult;
use std::sync::Arc;

use log::info;

use super::io::bolt::{RunArgs, TxArgs};
use super::io::{AcquireArgs, Pool, PooledConnection};
use super::record_stream::RecordStream;
use super::transaction::{Transaction, TransactionTimeout, TxCore};
use super::{EagerResult, ReducedDriverConfig, RoutingControl};
use crate::error::Result;
use crate::value::Value;
use bookmarks::Bookmarks;
pub use config::SessionConfig;
use retry::RetryPolicy;

// imports for docs
#[allow(unused)]
use super::Driver;

/// A session is a container for a sequence of transactions.
///
/// Sessions automatically provide causal chaining: each transaction can
/// read the results of every previous transaction in the same session,
/// because the session carries the server-issued bookmark of each committed
/// write into the next piece of work. To chain two *sessions*, pass
/// [`Session::last_bookmarks()`] of the first into the
/// [`SessionConfig::with_bookmarks()`] of the second.
///
/// A session uses at most one connection at a time: it is borrowed from the
/// pool when a unit of work (an auto-commit query or a transaction) starts,
/// and returned when that unit ends.
///
/// There are two ways to run queries in a session:
///  * [`Session::transaction()`] runs an explicit transaction controlled by
///    the client, optionally retried by a policy.
///  * [`Session::auto_commit()`] leaves transaction management to the
///    server: the query is committed implicitly once its result has been
///    consumed.
///
/// See also [`Driver::session()`].
#[derive(Debug)]
pub struct Session<'driver> {
    config: SessionConfig,
    pool: &'driver Pool,
    driver_config: &'driver ReducedDriverConfig,
    bookmarks: Arc<Bookmarks>,
}

impl<'driver> Session<'driver> {
    pub(super) fn new(
        config: SessionConfig,
        pool: &'driver Pool,
        driver_config: &'driver ReducedDriverConfig,
    ) -> Self {
        let bookmarks = config.bookmarks.clone().unwrap_or_default();
        Session {
            config,
            pool,
            driver_config,
            bookmarks,
        }
    }

    /// Prepare a query that manages its own transaction (auto-commit).
    ///
    /// The server commits implicitly; the only guarantee given is that the
    /// transaction has been committed once all results are consumed.
    ///
    /// # Example
    /// ```no_run
    /// use graphbolt::driver::{Driver, RoutingControl};
    /// use graphbolt::{value_map, Value};
    /// # use graphbolt::session::SessionConfig;
    ///
    /// # fn example(driver: &Driver) {
    /// let mut session = driver.session(SessionConfig::new());
    /// let result = session
    ///     .auto_commit("RETURN $x AS x")
    ///     .with_parameters(value_map!({"x": 1}))
    ///     .with_routing_control(RoutingControl::Read)
    ///     .run()
    ///     .unwrap();
    /// assert_eq!(result.into_scalar().unwrap(), Value::Integer(1));
    /// # }
    /// ```
    pub fn auto_commit<'session>(
        &'session mut self,
        query: impl Into<String>,
    ) -> AutoCommitBuilder<'driver, 'session> {
        AutoCommitBuilder {
            session: self,
            query: query.into(),
            parameters: HashMap::new(),
            meta: HashMap::new(),
            timeout: TransactionTimeout::default(),
            mode: RoutingControl::Write,
        }
    }

    /// Prepare an explicit transaction.
    ///
    /// Use the returned [`TransactionBuilder`] to configure the transaction
    /// and run it, either plainly ([`TransactionBuilder::run()`]) or with
    /// automatic retries ([`TransactionBuilder::run_with_retry()`]).
    pub fn transaction<'session>(
        &'session mut self,
    ) -> TransactionBuilder<'driver, 'session> {
        TransactionBuilder {
            session: self,
            meta: HashMap::new(),
            timeout: TransactionTimeout::default(),
            mode: RoutingControl::Write,
        }
    }

    /// Get the bookmarks last received by the session or the ones it was
    /// initialized with.
    ///
    /// After each successfully committed write, this is a fresh, non-empty
    /// set replacing the previous one. It can be used to causally chain
    /// sessions together.
    #[inline]
    pub fn last_bookmarks(&self) -> Arc<Bookmarks> {
        Arc::clone(&self.bookmarks)
    }

    /// End the session.
    ///
    /// This is the explicit spelling of what dropping the session does.
    /// There is never cleanup work left at this point: the connection of a
    /// unit of work is returned to the pool when that unit ends, a dropped
    /// [`Transaction`] handle has rolled back, and a dropped
    /// [`TransactionRecordStream`](crate::transaction::TransactionRecordStream)
    /// has consumed or discarded its remaining records. The borrow checker
    /// guarantees all those handles are gone before `close` can be called.
    ///
    /// Errors during those implicit cleanups are deliberately swallowed
    /// (the spec of this method is to never raise for pre-existing
    /// failures); use the handles' own `consume`/`commit`/`rollback` to
    /// observe them.
    pub fn close(self) {}

    fn checkout(&self, mode: RoutingControl) -> Result<PooledConnection<'driver>> {
        self.pool.acquire(AcquireArgs {
            mode,
            db: self.config.database.as_ref(),
            bookmarks: Some(&self.bookmarks),
            deadline: self.pool.config.connection_acquisition_deadline(),
            idle_test: self.driver_config.idle_time_before_connection_test,
        })
    }

    fn advance_bookmarks(&mut self, bookmark: String) {
        self.bookmarks = Arc::new(Bookmarks::from_raw([bookmark]));
    }

    fn batch_size(&self) -> i64 {
        self.config
            .fetch_size
            .unwrap_or(self.driver_config.fetch_size)
    }

    fn run_auto_commit<R>(
        &mut self,
        query: String,
        parameters: HashMap<String, Value>,
        meta: HashMap<String, Value>,
        timeout: TransactionTimeout,
        mode: RoutingControl,
        receiver: impl FnOnce(&mut RecordStream) -> Result<R>,
    ) -> Result<R> {
        let connection = self.checkout(mode)?;
        let mut stream = RecordStream::new(
            Rc::new(RefCell::new(connection)),
            self.batch_size(),
            true,
            None,
        );
        let outcome = stream
            .start(RunArgs {
                query: &query,
                parameters: Some(&parameters),
                tx: TxArgs {
                    bookmarks: Some(&self.bookmarks),
                    tx_timeout: timeout.raw(),
                    tx_metadata: Some(&meta),
                    mode: mode.as_protocol_str(),
                    db: self.config.database.as_ref().map(|db| db.as_str()),
                },
            })
            .and_then(|_| receiver(&mut stream));
        let outcome = match outcome {
            Ok(value) => stream.consume().map(|_| value),
            Err(err) => {
                let _ = stream.consume();
                Err(err)
            }
        };
        if let Some(bookmark) = stream.into_bookmark() {
            self.advance_bookmarks(bookmark);
        }
        outcome
    }

    fn run_transaction<R>(
        &mut self,
        meta: &HashMap<String, Value>,
        timeout: TransactionTimeout,
        mode: RoutingControl,
        receiver: impl FnOnce(Transaction) -> Result<R>,
    ) -> Result<R> {
        let connection = self.checkout(mode)?;
        let mut core = TxCore::new(connection, self.batch_size());
        core.begin(TxArgs {
            bookmarks: Some(&self.bookmarks),
            tx_timeout: timeout.raw(),
            tx_metadata: Some(meta),
            mode: mode.as_protocol_str(),
            db: self.config.database.as_ref().map(|db| db.as_str()),
        })?;
        let outcome = receiver(Transaction::new(&mut core));
        let outcome = match outcome {
            Ok(value) => core.settle().map(|_| value),
            Err(err) => {
                if let Err(settle_err) = core.settle() {
                    info!(
                        "while propagating user code error: \
                        ignored settle error ending the transaction: {settle_err}"
                    );
                }
                Err(err)
            }
        };
        if let Some(bookmark) = core.take_bookmark() {
            self.advance_bookmarks(bookmark);
        }
        outcome
    }
}

/// Builder type to prepare an auto-commit query.
///
/// Created through [`Session::auto_commit()`]; [`AutoCommitBuilder::run()`]
/// executes the query when you're done configuring it.
#[derive(Debug)]
pub struct AutoCommitBuilder<'driver, 'session> {
    session: &'session mut Session<'driver>,
    query: String,
    parameters: HashMap<String, Value>,
    meta: HashMap<String, Value>,
    timeout: TransactionTimeout,
    mode: RoutingControl,
}

impl<'driver, 'session> AutoCommitBuilder<'driver, 'session> {
    /// Configure query parameters.
    ///
    /// Always prefer parameters over query string manipulation to avoid
    /// injection vulnerabilities and to allow the server to cache the query
    /// plan.
    #[inline]
    pub fn with_parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach transaction metadata to the query.
    ///
    /// The metadata is visible in the server's query log and when listing
    /// active transactions. Only maps of scalar values are accepted by the
    /// server.
    #[inline]
    pub fn with_transaction_meta(mut self, meta: HashMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Instruct the server to abort the query after the given timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout: TransactionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Specify whether the query should be sent to a reader or writer in
    /// the cluster.
    ///
    /// The *default* is [`RoutingControl::Write`].
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Run the query and fetch the result into memory.
    pub fn run(self) -> Result<EagerResult> {
        self.run_with_receiver(|stream| {
            stream.try_as_eager_result().map(|result| {
                result.expect("the stream was not consumed before collecting it")
            })
        })
    }

    /// Run the query, handing the lazy result stream to `receiver` for
    /// custom (e.g., record-by-record) processing. Whatever the receiver
    /// leaves unread is discarded afterwards.
    pub fn run_with_receiver<R>(
        self,
        receiver: impl FnOnce(&mut RecordStream) -> Result<R>,
    ) -> Result<R> {
        let Self {
            session,
            query,
            parameters,
            meta,
            timeout,
            mode,
        } = self;
        session.run_auto_commit(query, parameters, meta, timeout, mode, receiver)
    }
}

/// Builder type to prepare a transaction.
///
/// Created through [`Session::transaction()`]; [`TransactionBuilder::run()`]
/// or [`TransactionBuilder::run_with_retry()`] executes the transaction
/// when you're done configuring it.
#[derive(Debug)]
pub struct TransactionBuilder<'driver, 'session> {
    session: &'session mut Session<'driver>,
    meta: HashMap<String, Value>,
    timeout: TransactionTimeout,
    mode: RoutingControl,
}

impl<'driver, 'session> TransactionBuilder<'driver, 'session> {
    /// Attach transaction metadata to the transaction.
    ///
    /// The metadata is visible in the server's query log and when listing
    /// active transactions.
    #[inline]
    pub fn with_transaction_meta(mut self, meta: HashMap<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Instruct the server to abort the transaction after the given
    /// timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, timeout: TransactionTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    /// Specify whether the transaction should be sent to a reader or writer
    /// in the cluster.
    ///
    /// Writers (the *default*) can handle reads and writes. However, when
    /// running read-only work, it's more efficient to send it to a reader
    /// to avoid overloading the writer.
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Run the transaction. The work to be done is specified by the given
    /// `receiver`.
    ///
    /// The `receiver` is called with a [`Transaction`] that can be used to
    /// execute queries and to end the transaction (commit, rollback).
    ///
    /// Especially against a clustered DBMS, prefer
    /// [`TransactionBuilder::run_with_retry()`]: many intermittent errors
    /// (leader switches, connections killed by load balancers, ...) go away
    /// on retry.
    pub fn run<R>(self, receiver: impl FnOnce(Transaction) -> Result<R>) -> Result<R> {
        let Self {
            session,
            meta,
            timeout,
            mode,
        } = self;
        session.run_transaction(&meta, timeout, mode, receiver)
    }

    /// Run the transaction with a retry policy.
    ///
    /// This is pretty much the same as [`TransactionBuilder::run()`],
    /// except that the `receiver` is invoked again when it returns an error
    /// the given `retry_policy` deems retryable. The work function must
    /// therefore be idempotent from the application's point of view.
    ///
    /// See also [`RetryPolicy`].
    ///
    /// # Example
    /// ```no_run
    /// use graphbolt::driver::{Driver, RoutingControl};
    /// use graphbolt::session::SessionConfig;
    /// use graphbolt::transaction::Transaction;
    ///
    /// # fn example(driver: &Driver) {
    /// let mut session = driver.session(SessionConfig::new());
    /// let count = session
    ///     .transaction()
    ///     .with_routing_control(RoutingControl::Read)
    ///     .run_with_retry(driver.default_backoff(), |tx: Transaction| {
    ///         let mut stream = tx.query("MATCH (n) RETURN count(n)").run()?;
    ///         let record = stream.single()?;
    ///         let count = record.get_index(0).unwrap().clone();
    ///         drop(stream);
    ///         tx.commit()?;
    ///         Ok(count)
    ///     })
    ///     .unwrap();
    /// # }
    /// ```
    pub fn run_with_retry<R, P: RetryPolicy>(
        self,
        retry_policy: P,
        mut receiver: impl FnMut(Transaction) -> Result<R>,
    ) -> StdResult<R, P::Error> {
        let Self {
            session,
            meta,
            timeout,
            mode,
        } = self;
        retry_policy.execute(|| session.run_transaction(&meta, timeout, mode, &mut receiver))
    }
}
