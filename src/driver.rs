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

pub(crate) mod config;
mod eager_result;
pub(crate) mod io;
mod record;
pub mod record_stream;
pub(crate) mod session;
pub(crate) mod summary;
pub(crate) mod transaction;

use std::sync::Arc;
use std::time::Duration;

pub use config::auth;
pub use config::{
    ConfigureFetchSizeError, ConnectionConfig, ConnectionConfigParseError, DriverConfig,
    InvalidRoutingContextError, TlsConfigError,
};
pub use eager_result::EagerResult;
use io::{Pool, PoolConfig};
pub use record::Record;
use session::config::SessionConfig;
use session::retry::ExponentialBackoff;
use session::Session;
use crate::value::Value;

/// The driver hands out [`Session`]s and owns everything needed to serve
/// them: the connection pools and, in a routed deployment, the routing
/// tables. There is no need to pool driver objects; an application usually
/// creates one driver and shares it.
#[derive(Debug)]
pub struct Driver {
    config: ReducedDriverConfig,
    pool: Pool,
    default_max_retry_time: Duration,
}

impl Driver {
    /// Create a new driver from where to connect ([`ConnectionConfig`]) and
    /// how to behave ([`DriverConfig`]).
    pub fn new(mut connection_config: ConnectionConfig, config: DriverConfig) -> Self {
        if let Some(routing_context) = &mut connection_config.routing_context {
            let address = connection_config.address.to_string();
            routing_context.insert(String::from("address"), Value::String(address));
        }
        let pool_config = PoolConfig {
            routing_context: connection_config.routing_context,
            tls_config: connection_config.tls_config.map(Arc::new),
            user_agent: config.user_agent,
            auth: config.auth,
            max_connection_lifetime: config.max_connection_lifetime,
            max_connection_pool_size: config.max_connection_pool_size,
            connection_timeout: config.connection_timeout,
            connection_acquisition_timeout: config.connection_acquisition_timeout,
            resolver: config.resolver,
        };
        Driver {
            config: ReducedDriverConfig {
                fetch_size: config.fetch_size,
                idle_time_before_connection_test: config.idle_time_before_connection_test,
            },
            pool: Pool::new(Arc::new(connection_config.address), pool_config),
            default_max_retry_time: config.max_transaction_retry_time,
        }
    }

    /// Spawn a new [`Session`] with the given config.
    ///
    /// Session creation is cheap; it's recommended to create a new session
    /// for each piece of work and dispose of it afterwards.
    pub fn session(&self, config: SessionConfig) -> Session {
        Session::new(config, &self.pool, &self.config)
    }

    /// A retry policy configured with the driver's
    /// [`DriverConfig::with_max_transaction_retry_time()`].
    pub fn default_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new().with_max_retry_time(self.default_max_retry_time)
    }

    /// Shut the driver down: close all pooled connections and refuse any
    /// new work. Closing is monotonic; waiters for pool slots give up with
    /// an error.
    ///
    /// The driver also closes when dropped; calling `close` explicitly
    /// merely makes the point in time deterministic.
    pub fn close(&self) {
        self.pool.close();
    }
}

#[derive(Debug)]
pub(crate) struct ReducedDriverConfig {
    pub(crate) fetch_size: i64,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
}

/// Whether a piece of work is read-only or may write.
///
/// In a routed deployment this decides which server role the work is sent
/// to; a direct driver ignores it apart from flagging the work to the
/// server.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RoutingControl {
    /// Request a reader (a.k.a. follower, secondary, read replica).
    Read,
    /// Request the writer (a.k.a. leader, primary).
    Write,
}

impl RoutingControl {
    pub(crate) fn as_protocol_str(&self) -> Option<&'static str> {
        match self {
            RoutingControl::Read => Some("r"),
            RoutingControl::Write => Some("w"),
        }
    }
}
