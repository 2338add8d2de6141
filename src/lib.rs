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

//! # Bolt Graph Database Driver
//!
//! This crate provides a client for graph databases speaking the Bolt
//! protocol, in both single-instance and clustered (routed) deployments.
//! It mirrors many concepts of the official drivers while leveraging Rust's
//! expressive type system and lifetime management to provide a safer API
//! that prevents many common pitfalls already at compile time.
//!
//! ## Basic Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use graphbolt::driver::auth::AuthToken;
//! use graphbolt::driver::{ConnectionConfig, Driver, DriverConfig, RoutingControl};
//! use graphbolt::session::SessionConfig;
//! use graphbolt::{value_map, Value};
//!
//! let connection_config: ConnectionConfig = "neo4j://localhost:7687".parse().unwrap();
//! let driver = Driver::new(
//!     // tell the driver where to connect to
//!     connection_config,
//!     // configure how the driver works locally (e.g., authentication)
//!     DriverConfig::new().with_auth(Arc::new(AuthToken::new_basic_auth("user", "pass"))),
//! );
//!
//! let mut session = driver.session(SessionConfig::new());
//! let result = session
//!     .auto_commit("RETURN $x AS x")
//!     // Use query parameters (instead of string interpolation) to avoid
//!     // injection attacks and improve performance.
//!     .with_parameters(value_map!({"x": 123}))
//!     // Tell the driver to send the query to a read server.
//!     // In a clustered environment, this makes sure read queries don't
//!     // overload the single write server.
//!     .with_routing_control(RoutingControl::Read)
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(result.records.len(), 1);
//! for mut record in result.records {
//!     assert_eq!(record.take_value("x"), Some(Value::Integer(123)));
//! }
//! ```
//!
//! ## Concepts
//!
//! ### The Driver
//! The fundamental type of this crate is the [`driver::Driver`].
//! Through it, all database interactions are performed.
//! See [`driver::Driver::new()`].
//! The driver manages a connection pool. So there is no need to pool driver
//! objects. Usually, each application will use one global driver.
//!
//! ### Sessions
//! Sessions are spawned from the driver.
//! See [`driver::Driver::session()`].
//! Session creation is cheap, it's recommended to create a new session for
//! each piece of work. Sessions will borrow connections from the driver's
//! pool as needed and provide causal chaining through bookmarks.
//!
//! ### Main Mechanisms for Query Execution
//! There are two main ways to execute queries:
//! - [`session::Session::transaction()`] gives you full control over the
//!   transaction and supports retry policies.
//! - [`session::Session::auto_commit()`] is a special method for running
//!   queries that manage their own transactions.

mod address_;
pub mod driver;
mod error;
mod macros;
mod sync;
mod time;
mod util;
pub mod value;

// imports for docs
#[allow(unused)]
use driver::Driver;
#[allow(unused)]
use session::Session;

pub use error::{DriverError, Result, ServerError, UserCallbackError};
pub use value::Value;

pub mod address {
    pub use super::address_::resolution::*;
    pub use super::address_::*;
}
pub mod bookmarks {
    pub use super::driver::session::bookmarks::*;
}
pub mod session {
    pub use super::driver::session::*;
}
pub mod retry {
    pub use super::driver::session::retry::*;
}
pub mod transaction {
    pub use super::driver::transaction::*;
}
/// Query summary structs (metadata) received via
/// [`driver::record_stream::RecordStream::consume()`].
pub mod summary {
    pub use super::driver::summary::*;
}
