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

mod routing;
mod server_pool;

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;
use itertools::Itertools;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, RwLock};
use rustls::ClientConfig;

use super::bolt::{
    RecordValues, ResponseMeta, ResponseSink, RunArgs, ServerErrorHook, TxArgs,
};
use crate::address_::resolution::{resolve_targets, AddressResolver};
use crate::address_::Address;
use crate::bookmarks::Bookmarks;
use crate::driver::config::auth::AuthToken;
use crate::driver::RoutingControl;
use crate::error::{DriverError, Result, ServerError};
use crate::sync::RefreshLock;
use crate::time::Instant;
use crate::value::Value;
use routing::RoutingTable;
pub(crate) use server_pool::Lease;
use server_pool::{pool_closed_error, ServerPool};

const ROUTING_TABLE_QUERY: &str = "CALL dbms.routing.getRoutingTable($context, $database)";
const SYSTEM_DB: &str = "system";

#[derive(Debug)]
pub(crate) struct PoolConfig {
    pub(crate) routing_context: Option<HashMap<String, Value>>,
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
}

impl PoolConfig {
    pub(crate) fn connection_acquisition_deadline(&self) -> Option<Instant> {
        self.connection_acquisition_timeout
            .map(|timeout| Instant::now() + timeout)
    }
}

/// Everything a connection request needs to know: which role to target,
/// against which database, with which causal baseline, and how long it may
/// take.
#[derive(Debug, Copy, Clone)]
pub(crate) struct AcquireArgs<'a> {
    pub(crate) mode: RoutingControl,
    pub(crate) db: Option<&'a Arc<String>>,
    pub(crate) bookmarks: Option<&'a Bookmarks>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) idle_test: Option<Duration>,
}

impl AcquireArgs<'_> {
    fn db_key(&self) -> Option<Arc<String>> {
        self.db.map(Arc::clone)
    }
}

/// The connection provider: produces a connection for a requested access
/// mode, either directly or routed through the cluster's routing table.
#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) config: Arc<PoolConfig>,
    provider: Provider,
}

#[derive(Debug)]
enum Provider {
    Direct(ServerPool),
    Routing(RoutingProvider),
}

impl Pool {
    pub(crate) fn new(seed: Arc<Address>, config: PoolConfig) -> Self {
        let config = Arc::new(config);
        let provider = match config.routing_context {
            None => Provider::Direct(ServerPool::new(seed, Arc::clone(&config))),
            Some(_) => Provider::Routing(RoutingProvider::new(seed, Arc::clone(&config))),
        };
        Self { config, provider }
    }

    #[inline]
    pub(crate) fn is_routing(&self) -> bool {
        matches!(self.provider, Provider::Routing(_))
    }

    pub(crate) fn acquire(&self, args: AcquireArgs) -> Result<PooledConnection<'_>> {
        let lease = match &self.provider {
            Provider::Direct(server_pool) => {
                server_pool.acquire(args.deadline, args.idle_test, None)?
            }
            Provider::Routing(routing) => routing.acquire(args)?,
        };
        Ok(PooledConnection {
            lease: Some(lease),
            pool: self,
        })
    }

    /// Close the provider: fan out to every per-server pool. Monotonic; all
    /// waiters and future acquisitions fail.
    pub(crate) fn close(&self) {
        match &self.provider {
            Provider::Direct(server_pool) => server_pool.close(),
            Provider::Routing(routing) => routing.close(),
        }
    }

    fn on_server_error(&self, address: &Arc<Address>, error: &ServerError) -> Result<()> {
        if let Provider::Routing(routing) = &self.provider {
            routing.on_server_error(address, error);
        }
        Ok(())
    }

    fn quarantine(&self, address: &Arc<Address>) {
        if let Provider::Routing(routing) = &self.provider {
            routing.forget_server(address);
        }
    }
}

/// A connection borrowed from the provider.
///
/// IO going through this wrapper watches for connections that die
/// unexpectedly and for server errors that affect the routing state, and
/// feeds both back into the provider.
#[derive(Debug)]
pub(crate) struct PooledConnection<'pool> {
    lease: Option<Lease>,
    pool: &'pool Pool,
}

impl PooledConnection<'_> {
    pub(crate) fn send_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.watched(|lease, _| lease.send_all(deadline))
    }

    pub(crate) fn receive_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.watched(|lease, hook| lease.receive_one(deadline, hook))
    }

    pub(crate) fn receive_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.watched(|lease, hook| lease.receive_all(deadline, hook))
    }

    /// Run `io_op` with the provider's server-error hook installed, and
    /// quarantine the server when the connection dies mid-operation.
    fn watched(
        &mut self,
        io_op: impl FnOnce(&mut Lease, ServerErrorHook) -> Result<()>,
    ) -> Result<()> {
        let pool = self.pool;
        let mut hook =
            |address: &Arc<Address>, error: &ServerError| pool.on_server_error(address, error);
        let lease = self
            .lease
            .as_mut()
            .expect("pooled connection holds its lease until drop");
        let was_healthy = !lease.unexpectedly_closed();
        let res = io_op(lease, Some(&mut hook));
        if was_healthy && lease.unexpectedly_closed() {
            let address = lease.address();
            pool.quarantine(&address);
        }
        res
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Lease;

    fn deref(&self) -> &Self::Target {
        self.lease
            .as_ref()
            .expect("pooled connection holds its lease until drop")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.lease
            .as_mut()
            .expect("pooled connection holds its lease until drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        match &self.pool.provider {
            Provider::Direct(_) => drop(self.lease.take()),
            Provider::Routing(routing) => {
                // hand the lease back under the `returned` lock so no thread
                // can check for free slots and park in between, then wake
                // everyone waiting for any eligible server to free up
                let _guard = routing.returned.0.lock();
                drop(self.lease.take());
                routing.returned.1.notify_all();
            }
        }
    }
}

type TableMap = HashMap<Option<Arc<String>>, RoutingTable>;

#[derive(Debug)]
struct RoutingProvider {
    /// one routing table per database (`None` = the default database)
    tables: RefreshLock<TableMap>,
    /// one pool per server the tables currently mention
    server_pools: RwLock<HashMap<Arc<Address>, ServerPool>>,
    /// notified whenever a borrowed connection comes home
    returned: (Mutex<()>, Condvar),
    seed: Arc<Address>,
    config: Arc<PoolConfig>,
    closed: AtomicBool,
}

impl RoutingProvider {
    fn new(seed: Arc<Address>, config: Arc<PoolConfig>) -> Self {
        Self {
            tables: RefreshLock::new(TableMap::new()),
            server_pools: RwLock::new(HashMap::new()),
            returned: (Mutex::new(()), Condvar::new()),
            seed,
            config,
            closed: AtomicBool::new(false),
        }
    }

    fn acquire(&self, args: AcquireArgs) -> Result<Lease> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(pool_closed_error());
            }
            let targets = self.eligible_servers(args)?;
            if let Some(lease) = self.try_targets(&targets, args)? {
                return Ok(lease);
            }
            // every eligible server is at capacity: park until a connection
            // comes home, then try again
            let mut parked = self.returned.0.lock();
            // a connection may have come home before the lock was taken;
            // leases are returned under this lock, so one more check now
            // cannot miss a wakeup
            if let Some(lease) = self.try_targets(&targets, args)? {
                return Ok(lease);
            }
            match args.deadline {
                None => self.returned.1.wait(&mut parked),
                Some(deadline) => {
                    if self
                        .returned
                        .1
                        .wait_until(&mut parked, deadline.into_std())
                        .timed_out()
                    {
                        return Err(DriverError::connection_acquisition_timeout(
                            "waiting for a connection to any eligible server",
                        ));
                    }
                }
            }
        }
    }

    /// Try every server in order; `Ok(None)` means all of them are at
    /// capacity right now.
    fn try_targets(&self, targets: &[Arc<Address>], args: AcquireArgs) -> Result<Option<Lease>> {
        for target in targets {
            let pool = self.pool_of(target);
            let mut hook = |address: &Arc<Address>, error: &ServerError| -> Result<()> {
                self.on_server_error(address, error);
                Ok(())
            };
            match pool.try_acquire(args.deadline, args.idle_test, Some(&mut hook)) {
                Ok(Some(lease)) => return Ok(Some(lease)),
                Ok(None) => continue,
                Err(DriverError::ServiceUnavailable { .. }) => {
                    // can't reach this member at all; take it out of the
                    // running and move on to the next one
                    self.forget_server(target);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    /// The servers able to serve `args`, least loaded first. Refreshes the
    /// routing table when it is missing, expired, or lacks the needed role.
    fn eligible_servers(&self, args: AcquireArgs) -> Result<Vec<Arc<Address>>> {
        let db = args.db_key();
        debug!(
            "acquiring {:?} connection towards {}",
            args.mode,
            db.as_deref().map(String::as_str).unwrap_or("the default database")
        );
        let tables = self.tables.ensure(
            |tables| {
                tables
                    .get(&db)
                    .map(|table| !table.is_fresh(args.mode))
                    .unwrap_or(true)
            },
            |tables| self.refresh_table(args, tables),
        )?;
        let table = tables.get(&db).expect("refresh installs the table");
        let candidates = table.servers_for_mode(args.mode);
        if candidates.is_empty() {
            return Err(match args.mode {
                // a table without writers is legitimate (leader switch in
                // progress); writes fail fast until a refresh finds one
                RoutingControl::Write => DriverError::SessionExpired {
                    message: String::from("no writer available for the database"),
                    source: None,
                },
                RoutingControl::Read => {
                    DriverError::disconnect("no reader available for the database")
                }
            });
        }
        let pools = self.server_pools.read();
        Ok(candidates
            .iter()
            .map(|address| {
                let load = pools.get(address).map(ServerPool::load).unwrap_or(0);
                (load, Arc::clone(address))
            })
            .sorted_unstable_by_key(|(load, _)| *load)
            .map(|(_, address)| address)
            .collect())
    }

    fn pool_of(&self, address: &Arc<Address>) -> ServerPool {
        if let Some(pool) = self.server_pools.read().get(address) {
            return pool.clone();
        }
        self.server_pools
            .write()
            .entry(Arc::clone(address))
            .or_insert_with(|| ServerPool::new(Arc::clone(address), Arc::clone(&self.config)))
            .clone()
    }

    /// Fetch a new table for `args`' database and install it. Called with
    /// the table map write-locked through [`RefreshLock::ensure`], so only
    /// one refresh runs at a time.
    fn refresh_table(&self, args: AcquireArgs, tables: &mut TableMap) -> Result<()> {
        let db = args.db_key();
        debug!("refreshing routing table for {db:?}");
        let known_routers = tables
            .entry(db.clone())
            .or_insert_with(|| RoutingTable::new(Arc::clone(&self.seed)))
            .routers
            .clone();
        let mut fetched = self.fetch_table_from(&known_routers, args, tables)?;
        if fetched.is_none() && !known_routers.contains(&self.seed) {
            // all known routers are gone; fall back to the seed address
            // (running it through the resolver again)
            fetched = self.fetch_table_from(&[Arc::clone(&self.seed)], args, tables)?;
        }
        match fetched {
            None => Err(DriverError::disconnect(
                "unable to retrieve routing information from any router",
            )),
            Some(mut table) => {
                table.database = db.clone();
                debug!("new routing table for {db:?}: {table:?}");
                tables.insert(db, table);
                self.prune_pools(tables);
                Ok(())
            }
        }
    }

    /// Ask the given routers, in order, for a table. `Ok(None)` means they
    /// all failed in ways that discovery may survive; fatal errors (bad
    /// credentials, broken user code, ...) abort immediately.
    fn fetch_table_from(
        &self,
        routers: &[Arc<Address>],
        args: AcquireArgs,
        tables: &mut TableMap,
    ) -> Result<Option<RoutingTable>> {
        for router in routers {
            for target in resolve_targets(router, self.config.resolver.as_deref())? {
                let attempt = self
                    .pool_of(&target)
                    .acquire(args.deadline, args.idle_test, None)
                    .and_then(|mut lease| self.query_routing_table(&mut lease, args));
                match attempt {
                    Ok(table) => return Ok(Some(table)),
                    Err(err) if err.fatal_during_discovery() => return Err(err),
                    Err(err) => {
                        info!("discovery via {target} failed: {err}");
                        self.forget_server_in(&target, tables);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Invoke the server's routing procedure over an ordinary RUN/PULL
    /// exchange and parse the single returned record into a table.
    fn query_routing_table(&self, lease: &mut Lease, args: AcquireArgs) -> Result<RoutingTable> {
        let context = self
            .config
            .routing_context
            .clone()
            .expect("a routing provider always has a routing context");
        let mut parameters = HashMap::with_capacity(2);
        parameters.insert(String::from("context"), Value::Map(context));
        parameters.insert(
            String::from("database"),
            args.db
                .map(|db| Value::String(String::from(db.as_str())))
                .unwrap_or(Value::Null),
        );

        let probe = Arc::new(AtomicRefCell::new(RouteProbe::default()));
        lease.run(
            RunArgs {
                query: ROUTING_TABLE_QUERY,
                parameters: Some(&parameters),
                tx: TxArgs {
                    bookmarks: args.bookmarks,
                    tx_timeout: None,
                    tx_metadata: None,
                    mode: Some("r"),
                    db: Some(SYSTEM_DB),
                },
            },
            Box::new(ProbeSink {
                probe: Arc::clone(&probe),
                stage: ProbeStage::Run,
            }),
        )?;
        lease.pull(
            -1,
            -1,
            Box::new(ProbeSink {
                probe: Arc::clone(&probe),
                stage: ProbeStage::Pull,
            }),
        )?;
        lease.send_all(args.deadline)?;
        lease.receive_all(args.deadline, None)?;

        let mut probe = probe.borrow_mut();
        let keys = probe.keys.take().ok_or_else(|| {
            DriverError::protocol_error("router did not acknowledge the routing query")
        })?;
        let row = probe.row.take().ok_or_else(|| {
            DriverError::protocol_error("router returned no routing table record")
        })?;
        if keys.len() != row.len() {
            return Err(DriverError::protocol_error(format!(
                "routing record carries {} values for {} announced keys",
                row.len(),
                keys.len()
            )));
        }
        let table = RoutingTable::try_parse(keys.into_iter().zip(row).collect())
            .map_err(|err| DriverError::protocol_error(err.to_string()))?;
        if table.routers.is_empty() || table.readers.is_empty() {
            // Not technically a disconnect, but it signals that this table
            // must not be used, the router should be invalidated, and the
            // next one, if available, should be tried.
            return Err(DriverError::disconnect(
                "received routing table without routers or readers",
            ));
        }
        // A table without writers is accepted; that typically means a
        // leader switch is in progress. Reads proceed, writes refresh.
        Ok(table)
    }

    /// Drop pools for servers no routing table mentions anymore.
    fn prune_pools(&self, tables: &TableMap) {
        let referenced = tables
            .values()
            .flat_map(RoutingTable::all_servers)
            .collect::<HashSet<_>>();
        let mut pools = self.server_pools.write();
        pools.retain(|address, pool| {
            let keep = referenced.contains(address);
            if !keep {
                pool.close();
            }
            keep
        });
    }

    /// Forget a server entirely: out of every role of every table, its pool
    /// closed. Idempotent.
    fn forget_server(&self, address: &Arc<Address>) {
        let mut tables = self.tables.write();
        self.forget_server_in(address, &mut tables);
    }

    fn forget_server_in(&self, address: &Arc<Address>, tables: &mut TableMap) {
        debug!("forgetting server: {address}");
        for table in tables.values_mut() {
            table.deactivate(address);
        }
        if let Some(pool) = self.server_pools.write().remove(address) {
            pool.close();
        }
    }

    /// Forget a server as writer only (other roles stay). Idempotent.
    fn forget_writer(&self, address: &Arc<Address>) {
        debug!("forgetting writer: {address}");
        let mut tables = self.tables.write();
        for table in tables.values_mut() {
            table.deactivate_writer(address);
        }
    }

    fn on_server_error(&self, address: &Arc<Address>, error: &ServerError) {
        if error.deactivates_server() {
            self.forget_server(address);
        } else if error.invalidates_writer() {
            self.forget_writer(address);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for pool in self.server_pools.read().values() {
            pool.close();
        }
        // wake parked threads so they observe the closed flag
        let _guard = self.returned.0.lock();
        self.returned.1.notify_all();
    }
}

/// Shared scratchpad for the two halves of the routing query.
#[derive(Debug, Default)]
struct RouteProbe {
    keys: Option<Vec<String>>,
    row: Option<Vec<Value>>,
}

enum ProbeStage {
    Run,
    Pull,
}

struct ProbeSink {
    probe: Arc<AtomicRefCell<RouteProbe>>,
    stage: ProbeStage,
}

impl ResponseSink for ProbeSink {
    fn on_success(&mut self, mut meta: ResponseMeta) -> Result<()> {
        if let ProbeStage::Run = self.stage {
            let Some(Value::List(fields)) = meta.remove("fields") else {
                return Ok(());
            };
            let fields = fields
                .into_iter()
                .map(|field| {
                    field.try_into_string().map_err(|v| {
                        DriverError::protocol_error(format!(
                            "routing query fields contained non-string: {v:?}"
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            self.probe.borrow_mut().keys = Some(fields);
        }
        Ok(())
    }

    fn on_record(&mut self, values: RecordValues) -> Result<()> {
        let mut probe = self.probe.borrow_mut();
        match probe.row {
            None => probe.row = Some(values),
            Some(_) => warn!("routing procedure returned more than one record"),
        }
        Ok(())
    }

    fn on_failure(&mut self, error: ServerError) -> Result<()> {
        Err(error.into())
    }
}
