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
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;

use crate::address_::Address;
use crate::driver::RoutingControl;
use crate::time::Instant;
use crate::value::Value;

/// Cached cluster view for one database: who routes, who serves reads, who
/// serves writes, and for how long this knowledge may be used.
#[derive(Debug)]
pub(crate) struct RoutingTable {
    pub(crate) routers: Vec<Arc<Address>>,
    pub(crate) readers: Vec<Arc<Address>>,
    pub(crate) writers: Vec<Arc<Address>>,
    pub(crate) database: Option<Arc<String>>,
    pub(crate) initialized_without_writers: bool,
    created: Instant,
    ttl: Duration,
}

impl RoutingTable {
    /// The bootstrap table: only the initial router is known, and the table
    /// is born stale so the first acquisition triggers a fetch.
    pub(crate) fn new(initial_router: Arc<Address>) -> Self {
        Self {
            routers: vec![initial_router],
            readers: Vec::new(),
            writers: Vec::new(),
            database: None,
            initialized_without_writers: true,
            created: Instant::now(),
            ttl: Duration::new(0, 0),
        }
    }

    pub(crate) fn servers_for_mode(&self, mode: RoutingControl) -> &[Arc<Address>] {
        match mode {
            RoutingControl::Read => &self.readers,
            RoutingControl::Write => &self.writers,
        }
    }

    /// Every server the table mentions, in any role.
    pub(crate) fn all_servers(&self) -> impl Iterator<Item = Arc<Address>> + '_ {
        self.routers
            .iter()
            .chain(&self.readers)
            .chain(&self.writers)
            .map(Arc::clone)
    }

    /// Parse the record produced by the server's routing-table procedure:
    /// a `ttl` in seconds and a list of `servers` entries, each carrying a
    /// `role` and its `addresses`.
    pub(crate) fn try_parse(
        mut data: HashMap<String, Value>,
    ) -> Result<Self, RoutingTableParseError> {
        let ttl = data.remove("ttl").ok_or(RoutingTableParseError {
            reason: "missing \"ttl\"",
        })?;
        let ttl = ttl.try_into_int().map_err(|_| RoutingTableParseError {
            reason: "\"ttl\" was not an integer",
        })?;
        if ttl < 0 {
            return Err(RoutingTableParseError {
                reason: "negative \"ttl\"",
            });
        }
        let ttl = Duration::from_secs(ttl as u64);
        let servers = data.remove("servers").ok_or(RoutingTableParseError {
            reason: "missing \"servers\"",
        })?;
        let servers = servers
            .try_into_list()
            .map_err(|_| RoutingTableParseError {
                reason: "\"servers\" was not a list",
            })?;

        let mut routers = Vec::new();
        let mut readers = Vec::new();
        let mut writers = Vec::new();
        for server in servers {
            match Self::parse_server(server)? {
                (ServerRole::Router, addresses) => routers = addresses,
                (ServerRole::Reader, addresses) => readers = addresses,
                (ServerRole::Writer, addresses) => writers = addresses,
                (ServerRole::Unknown, _) => {}
            }
        }

        let initialized_without_writers = writers.is_empty();
        Ok(Self {
            routers,
            readers,
            writers,
            database: None,
            initialized_without_writers,
            created: Instant::now(),
            ttl,
        })
    }

    fn parse_server(
        server: Value,
    ) -> Result<(ServerRole, Vec<Arc<Address>>), RoutingTableParseError> {
        let mut server = server.try_into_map().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry was not a map",
        })?;
        let role = server.remove("role").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"role\"",
        })?;
        let role = role.try_into_string().map_err(|_| RoutingTableParseError {
            reason: "\"servers\" entry \"role\" was not a string",
        })?;
        let role = match role.as_str().into() {
            ServerRole::Unknown => {
                warn!("ignoring unknown server role {}", role);
                return Ok((ServerRole::Unknown, vec![]));
            }
            role => role,
        };
        let addresses = server.remove("addresses").ok_or(RoutingTableParseError {
            reason: "\"servers\" entry missing \"addresses\"",
        })?;
        let addresses = addresses
            .try_into_list()
            .map_err(|_| RoutingTableParseError {
                reason: "\"servers\" entry \"addresses\" was not a list",
            })?;
        let addresses = addresses
            .into_iter()
            .map(|address| {
                let address = address
                    .try_into_string()
                    .map_err(|_| RoutingTableParseError {
                        reason: "\"servers\" entry \"addresses\" contained a non-string",
                    })?;
                Ok(Arc::new(Address::from(&*address)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((role, addresses))
    }

    pub(crate) fn is_fresh(&self, mode: RoutingControl) -> bool {
        if self.routers.is_empty() {
            debug!("routing table expired: no routers left {:?}", self);
            return false;
        }
        if self.servers_for_mode(mode).is_empty() {
            debug!(
                "routing table expired: no servers for {:?} mode left {:?}",
                mode, self
            );
            return false;
        }
        if self.created.elapsed() > self.ttl {
            debug!(
                "routing table expired: ttl ({:?}) < age ({:?}) {:?}",
                self.ttl,
                self.created.elapsed(),
                self
            );
            return false;
        }
        debug!("routing table is fresh {:?}", self);
        true
    }

    /// Forget a server entirely. Idempotent.
    pub(crate) fn deactivate(&mut self, addr: &Address) {
        self.routers = mem::take(&mut self.routers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
        self.readers = mem::take(&mut self.readers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
        self.deactivate_writer(addr);
    }

    /// Forget a server as writer only. Idempotent.
    pub(crate) fn deactivate_writer(&mut self, addr: &Address) {
        self.writers = mem::take(&mut self.writers)
            .into_iter()
            .filter(|a| **a != *addr)
            .collect();
    }
}

#[derive(Error, Debug)]
#[error("failed to parse routing table: {reason}")]
pub(crate) struct RoutingTableParseError {
    reason: &'static str,
}

enum ServerRole {
    Router,
    Reader,
    Writer,
    Unknown,
}

impl From<&str> for ServerRole {
    fn from(s: &str) -> Self {
        match s {
            "ROUTE" => ServerRole::Router,
            "READ" => ServerRole::Reader,
            "WRITE" => ServerRole::Writer,
            _ => ServerRole::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::macros::hash_map;
    use crate::value;

    fn server_entry(role: &str, addresses: &[&str]) -> Value {
        Value::Map(hash_map!(
            "role".to_string() => value!(role),
            "addresses".to_string() => Value::List(
                addresses.iter().map(|a| value!(*a)).collect()
            )
        ))
    }

    fn table_data(ttl: i64) -> HashMap<String, Value> {
        hash_map!(
            "ttl".to_string() => value!(ttl),
            "servers".to_string() => Value::List(vec![
                server_entry("ROUTE", &["r1:7687", "r2:7687"]),
                server_entry("READ", &["reader1:7687", "reader2:7687"]),
                server_entry("WRITE", &["writer1:7687"]),
            ])
        )
    }

    #[test]
    fn test_parse() {
        let rt = RoutingTable::try_parse(table_data(300)).unwrap();
        assert_eq!(rt.routers.len(), 2);
        assert_eq!(rt.readers.len(), 2);
        assert_eq!(rt.writers.len(), 1);
        assert!(!rt.initialized_without_writers);
        assert_eq!(rt.writers[0].host(), "writer1");
        assert_eq!(rt.writers[0].port(), 7687);
    }

    #[test]
    fn test_parse_without_writers() {
        let data = hash_map!(
            "ttl".to_string() => value!(300),
            "servers".to_string() => Value::List(vec![
                server_entry("ROUTE", &["r1:7687"]),
                server_entry("READ", &["reader1:7687"]),
            ])
        );
        let rt = RoutingTable::try_parse(data).unwrap();
        assert!(rt.initialized_without_writers);
        assert!(rt.writers.is_empty());
        // reads may still be served
        assert!(rt.is_fresh(RoutingControl::Read));
        assert!(!rt.is_fresh(RoutingControl::Write));
    }

    #[rstest]
    #[case::missing_ttl(hash_map!(
        "servers".to_string() => Value::List(vec![server_entry("ROUTE", &["r1"])])
    ))]
    #[case::negative_ttl(hash_map!(
        "ttl".to_string() => value!(-1),
        "servers".to_string() => Value::List(vec![server_entry("ROUTE", &["r1"])])
    ))]
    #[case::missing_servers(hash_map!("ttl".to_string() => value!(300)))]
    #[case::servers_not_a_list(hash_map!(
        "ttl".to_string() => value!(300),
        "servers".to_string() => value!("oops")
    ))]
    fn test_parse_failures(#[case] data: HashMap<String, Value>) {
        assert!(RoutingTable::try_parse(data).is_err());
    }

    #[test]
    fn test_expiry() {
        let rt = RoutingTable::try_parse(table_data(0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(!rt.is_fresh(RoutingControl::Read));
    }

    #[test]
    fn test_deactivate_writer_keeps_reader() {
        let data = hash_map!(
            "ttl".to_string() => value!(300),
            "servers".to_string() => Value::List(vec![
                server_entry("ROUTE", &["r1:7687"]),
                server_entry("READ", &["w1:7687", "reader1:7687"]),
                server_entry("WRITE", &["w1:7687"]),
            ])
        );
        let mut rt = RoutingTable::try_parse(data).unwrap();
        let w1 = Address::from("w1:7687");
        rt.deactivate_writer(&w1);
        assert!(rt.writers.is_empty());
        assert_eq!(rt.readers.len(), 2);
        // forgetting twice changes nothing
        rt.deactivate_writer(&w1);
        assert!(rt.writers.is_empty());
    }

    #[test]
    fn test_deactivate_removes_from_all_roles() {
        let mut rt = RoutingTable::try_parse(table_data(300)).unwrap();
        let r1 = Address::from("r1:7687");
        rt.deactivate(&r1);
        assert_eq!(rt.routers.len(), 1);
        assert_eq!(rt.routers[0].host(), "r2");
    }
}
