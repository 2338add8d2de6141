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

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use log::info;
use parking_lot::{Condvar, Mutex};

use super::super::bolt::{self, HelloArgs, ServerErrorHook, TcpConnection};
use super::PoolConfig;
use crate::address_::resolution::resolve_targets;
use crate::address_::Address;
use crate::error::{DriverError, Result};
use crate::time::Instant;

/// Pool of connections to one server.
///
/// The books are simple: `idle` holds parked connections, `occupied` counts
/// leases out in the wild plus permits for connections being opened right
/// now, and `idle.len() + occupied` never exceeds the configured size.
/// Threads out of luck park on `slot_freed`, which wakes them in FIFO
/// order.
///
/// Cloning the pool clones a handle; all clones share the same books.
#[derive(Debug, Clone)]
pub(crate) struct ServerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    address: Arc<Address>,
    config: Arc<PoolConfig>,
    books: Mutex<Books>,
    slot_freed: Condvar,
}

#[derive(Debug)]
struct Books {
    idle: VecDeque<TcpConnection>,
    occupied: usize,
    closed: bool,
}

/// What an acquisition attempt got hold of under the lock.
enum Slot {
    /// a parked connection, still to be vetted
    Parked(TcpConnection),
    /// room for a new connection; the permit is already counted
    Permit,
}

impl ServerPool {
    pub(crate) fn new(address: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                address,
                config,
                books: Mutex::new(Books {
                    idle: VecDeque::new(),
                    occupied: 0,
                    closed: false,
                }),
                slot_freed: Condvar::new(),
            }),
        }
    }

    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.inner.address
    }

    /// Leases handed out plus connections currently being opened; the
    /// provider uses this to prefer the least busy server.
    pub(crate) fn load(&self) -> usize {
        self.inner.books.lock().occupied
    }

    /// Acquire a connection, parking the thread until `deadline` when the
    /// pool is at capacity.
    pub(crate) fn acquire(
        &self,
        deadline: Option<Instant>,
        idle_test: Option<Duration>,
        mut hook: ServerErrorHook,
    ) -> Result<Lease> {
        loop {
            let slot = self.grab_slot(deadline, true)?.expect(
                "grab_slot in waiting mode returns a slot or errs",
            );
            if let Some(lease) = self.redeem(slot, deadline, idle_test, hook.as_deref_mut())? {
                return Ok(lease);
            }
        }
    }

    /// Like [`ServerPool::acquire`], but gives up immediately when the pool
    /// is at capacity (`Ok(None)`) instead of parking.
    pub(crate) fn try_acquire(
        &self,
        deadline: Option<Instant>,
        idle_test: Option<Duration>,
        mut hook: ServerErrorHook,
    ) -> Result<Option<Lease>> {
        loop {
            let Some(slot) = self.grab_slot(deadline, false)? else {
                return Ok(None);
            };
            if let Some(lease) = self.redeem(slot, deadline, idle_test, hook.as_deref_mut())? {
                return Ok(Some(lease));
            }
        }
    }

    /// Close the pool: parked connections are shut down, waiting threads
    /// give up with an error, future acquisitions are refused. Leases still
    /// out in the wild are closed as they come back. Monotonic.
    pub(crate) fn close(&self) {
        let mut books = self.inner.books.lock();
        books.closed = true;
        for mut connection in books.idle.drain(..) {
            connection.close();
        }
        self.inner.slot_freed.notify_all();
    }

    fn grab_slot(&self, deadline: Option<Instant>, wait: bool) -> Result<Option<Slot>> {
        let mut books = self.inner.books.lock();
        loop {
            if books.closed {
                return Err(pool_closed_error());
            }
            if let Some(connection) = books.idle.pop_front() {
                books.occupied += 1;
                return Ok(Some(Slot::Parked(connection)));
            }
            if books.idle.len() + books.occupied < self.inner.config.max_connection_pool_size {
                books.occupied += 1;
                return Ok(Some(Slot::Permit));
            }
            if !wait {
                return Ok(None);
            }
            match deadline {
                None => self.inner.slot_freed.wait(&mut books),
                Some(deadline) => {
                    if self
                        .inner
                        .slot_freed
                        .wait_until(&mut books, deadline.into_std())
                        .timed_out()
                    {
                        return Err(DriverError::connection_acquisition_timeout(
                            "waiting for a free slot in the connection pool",
                        ));
                    }
                }
            }
        }
    }

    /// Turn a slot into a working connection, or `Ok(None)` when the slot's
    /// connection had to be discarded (the caller then tries again).
    fn redeem(
        &self,
        slot: Slot,
        deadline: Option<Instant>,
        idle_test: Option<Duration>,
        hook: ServerErrorHook,
    ) -> Result<Option<Lease>> {
        match slot {
            Slot::Permit => match self.open_connection(deadline) {
                Ok(connection) => Ok(Some(self.lease(connection))),
                Err(err) => {
                    self.free_slot();
                    Err(err)
                }
            },
            Slot::Parked(connection) => {
                match self.vet(connection, deadline, idle_test, hook) {
                    Some(connection) => Ok(Some(self.lease(connection))),
                    None => {
                        self.free_slot();
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Health checks for a parked connection: age, then (when configured
    /// and idle long enough) a RESET round-trip.
    fn vet(
        &self,
        mut connection: TcpConnection,
        deadline: Option<Instant>,
        idle_test: Option<Duration>,
        hook: ServerErrorHook,
    ) -> Option<TcpConnection> {
        if let Some(max_lifetime) = self.inner.config.max_connection_lifetime {
            if connection.is_older_than(max_lifetime) {
                connection.debug_log(|| String::from("connection reached max lifetime"));
                connection.close();
                return None;
            }
        }
        if let Some(idle_threshold) = idle_test {
            if connection.is_idle_for(idle_threshold) {
                connection.debug_log(|| String::from("liveness check"));
                let alive = connection
                    .reset()
                    .and_then(|_| connection.send_all(deadline))
                    .and_then(|_| connection.receive_all(deadline, hook));
                if let Err(err) = alive {
                    connection.debug_log(|| format!("liveness check failed: {err}"));
                    return None;
                }
            }
        }
        Some(connection)
    }

    fn open_connection(&self, deadline: Option<Instant>) -> Result<TcpConnection> {
        let targets = resolve_targets(
            &self.inner.address,
            self.inner.config.resolver.as_deref(),
        )?;
        let mut last_err = None;
        for target in targets {
            match bolt::open(
                target,
                deadline,
                self.inner.config.connection_timeout,
                self.inner.config.tls_config.clone(),
            ) {
                Ok(mut connection) => {
                    connection.hello(HelloArgs {
                        user_agent: &self.inner.config.user_agent,
                        auth: &self.inner.config.auth,
                        routing_context: self.inner.config.routing_context.as_ref(),
                    })?;
                    connection.send_all(deadline)?;
                    connection.receive_all(deadline, None)?;
                    return Ok(connection);
                }
                Err(err) => {
                    info!("failed to open connection: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| DriverError::disconnect("address resolved to no targets")))
    }

    fn lease(&self, connection: TcpConnection) -> Lease {
        Lease {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        }
    }

    fn free_slot(&self) {
        let mut books = self.inner.books.lock();
        books.occupied -= 1;
        drop(books);
        self.inner.slot_freed.notify_one();
    }
}

pub(crate) fn pool_closed_error() -> DriverError {
    DriverError::disconnect("connection pool closed")
}

/// Exclusive use of one pooled connection. Returning it to the pool is the
/// drop; a connection that needs it is RESET on the way back, one that is
/// dead (or whose pool closed meanwhile) is discarded.
#[derive(Debug)]
pub(crate) struct Lease {
    pool: Arc<PoolInner>,
    connection: Option<TcpConnection>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut connection = self
            .connection
            .take()
            .expect("lease holds a connection from creation to drop");
        if connection.needs_reset() {
            let settled = connection
                .reset()
                .and_then(|_| connection.send_all(None))
                .and_then(|_| connection.receive_all(None, None));
            if settled.is_err() {
                info!("ignoring failure during reset, dropping connection");
            }
        }
        let mut books = self.pool.books.lock();
        books.occupied -= 1;
        if books.closed {
            connection.close();
        } else if !connection.closed() {
            books.idle.push_back(connection);
        }
        drop(books);
        self.pool.slot_freed.notify_one();
    }
}

impl Deref for Lease {
    type Target = TcpConnection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("lease holds a connection from creation to drop")
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("lease holds a connection from creation to drop")
    }
}
