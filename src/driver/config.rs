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

pub mod auth;
mod known_hosts;
mod tls;

use std::collections::HashMap;
use std::path::Path;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use thiserror::Error;
use uriparse::{URIError, URI};

use crate::address_::resolution::AddressResolver;
use crate::address_::Address;
use crate::value::Value;
use auth::AuthToken;

// imports for docs
#[allow(unused)]
use crate::driver::session::SessionConfig;

const DEFAULT_USER_AGENT: &str = env!("GRAPHBOLT_DEFAULT_USER_AGENT");
pub(crate) const DEFAULT_FETCH_SIZE: i64 = 1000;
pub(crate) const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CONNECTION_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(3600);
pub(crate) const DEFAULT_MAX_TRANSACTION_RETRY_TIME: Duration = Duration::from_secs(30);

/// Configure how the driver should behave.
#[derive(Debug)]
pub struct DriverConfig {
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) fetch_size: i64,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) max_transaction_retry_time: Duration,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            user_agent: String::from(DEFAULT_USER_AGENT),
            auth: Default::default(),
            idle_time_before_connection_test: None,
            max_connection_lifetime: Some(DEFAULT_MAX_CONNECTION_LIFETIME),
            max_connection_pool_size: 100,
            fetch_size: DEFAULT_FETCH_SIZE,
            connection_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            connection_acquisition_timeout: Some(DEFAULT_CONNECTION_ACQUISITION_TIMEOUT),
            max_transaction_retry_time: DEFAULT_MAX_TRANSACTION_RETRY_TIME,
            resolver: None,
        }
    }
}

impl DriverConfig {
    /// Create a new driver configuration with default values.
    ///
    /// This is the same as calling [`DriverConfig::default()`].
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a custom user agent the driver should send to the server.
    ///
    /// The user agent should follow the form `<app-name>/<version>`.
    /// If omitted, the driver chooses a *default* user agent.
    #[inline]
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    /// Configure the auth token the driver should use to authenticate with
    /// the server.
    ///
    /// # Example
    /// ```
    /// use std::sync::Arc;
    ///
    /// use graphbolt::driver::auth::AuthToken;
    /// use graphbolt::driver::DriverConfig;
    ///
    /// let auth = Arc::new(AuthToken::new_basic_auth("user", "pass"));
    /// let config = DriverConfig::new().with_auth(auth);
    /// ```
    #[inline]
    pub fn with_auth(mut self, auth: Arc<AuthToken>) -> Self {
        self.auth = auth;
        self
    }

    /// Configure connections that have been idle for longer than this
    /// duration to be tested (with a lightweight RESET round-trip) whenever
    /// they are pulled from the connection pool.
    ///
    /// The test costs an extra round-trip but avoids handing out connections
    /// an idle-killing load balancer has silently severed.
    #[inline]
    pub fn with_idle_time_before_connection_test(mut self, idle_time: Duration) -> Self {
        self.idle_time_before_connection_test = Some(idle_time);
        self
    }

    /// Disable the liveness check for idle connections.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_idle_time_before_connection_test(mut self) -> Self {
        self.idle_time_before_connection_test = None;
        self
    }

    /// Configure how old a pooled connection may grow before it is closed
    /// instead of handed out again.
    ///
    /// The check happens when the connection is picked up from the pool.
    /// Keep this below any idle-kill window of infrastructure between the
    /// driver and the server. The *default* is one hour.
    #[inline]
    pub fn with_max_connection_lifetime(mut self, max_lifetime: Duration) -> Self {
        self.max_connection_lifetime = Some(max_lifetime);
        self
    }

    /// Let connections live forever (until they break).
    #[inline]
    pub fn without_max_connection_lifetime(mut self) -> Self {
        self.max_connection_lifetime = None;
        self
    }

    /// Configure the maximum number of connections the driver keeps per
    /// host. The *default* is 100.
    #[inline]
    pub fn with_max_connection_pool_size(mut self, max_connection_pool_size: usize) -> Self {
        self.max_connection_pool_size = max_connection_pool_size;
        self
    }

    /// Change how many records are requested at once while streaming a
    /// result.
    ///
    /// # Errors
    /// A [`ConfigureFetchSizeError`] is returned if `fetch_size` is greater
    /// than [`i64::MAX`].
    #[allow(clippy::result_large_err)]
    #[inline]
    pub fn with_fetch_size(
        mut self,
        fetch_size: u64,
    ) -> StdResult<Self, ConfigureFetchSizeError<Self>> {
        match i64::try_from(fetch_size) {
            Ok(fetch_size) => {
                self.fetch_size = fetch_size;
                Ok(self)
            }
            Err(_) => Err(ConfigureFetchSizeError { builder: self }),
        }
    }

    /// Fetch all records at once instead of applying backpressure.
    #[inline]
    pub fn with_fetch_all(mut self) -> Self {
        self.fetch_size = -1;
        self
    }

    /// Use the default fetch size (currently 1000 records per batch).
    #[inline]
    pub fn with_default_fetch_size(mut self) -> Self {
        self.fetch_size = DEFAULT_FETCH_SIZE;
        self
    }

    /// Configure the timeout for establishing a connection: TCP connect,
    /// TLS setup, handshake, and authentication. The *default* is 30
    /// seconds.
    #[inline]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Disable the connection timeout.
    #[inline]
    pub fn without_connection_timeout(mut self) -> Self {
        self.connection_timeout = None;
        self
    }

    /// Configure the timeout for acquiring a connection from the pool,
    /// spanning waiting for a free slot, routing table fetches, liveness
    /// probes, and opening new connections. The *default* is 60 seconds.
    #[inline]
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.connection_acquisition_timeout = Some(timeout);
        self
    }

    /// Disable the connection acquisition timeout.
    #[inline]
    pub fn without_connection_acquisition_timeout(mut self) -> Self {
        self.connection_acquisition_timeout = None;
        self
    }

    /// Configure for how long [`crate::retry::ExponentialBackoff`] policies
    /// handed out by the driver keep retrying transaction functions.
    /// The *default* is 30 seconds.
    #[inline]
    pub fn with_max_transaction_retry_time(mut self, max_retry_time: Duration) -> Self {
        self.max_transaction_retry_time = max_retry_time;
        self
    }

    /// Register an address resolver.
    ///
    /// The resolver is applied to every address coming into the driver
    /// (the initial one as well as routing table members) before DNS.
    #[inline]
    pub fn with_resolver(mut self, resolver: Box<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Don't use an address resolver.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_resolver(mut self) -> Self {
        self.resolver = None;
        self
    }
}

/// Tell the driver where the server can be found and how to connect to it.
///
/// ## From a URL
/// The string is expected to follow the form:
/// ```text
/// scheme://host[:port[?routing_context]]
/// ```
/// Where scheme must be one of:
///
/// | scheme      | encryption                                | routing |
/// | ----------- | ----------------------------------------- | ------- |
/// | `neo4j`     | none                                      | yes     |
/// | `neo4j+s`   | yes                                       | yes     |
/// | `neo4j+ssc` | yes, *but every certificate is accepted*. | yes     |
/// | `bolt`      | none                                      | no      |
/// | `bolt+s`    | yes                                       | no      |
/// | `bolt+ssc`  | yes, *but every certificate is accepted*. | no      |
///
/// The legacy `bolt+routing` scheme is accepted as an alias for `neo4j`.
///
/// **⚠️ WARNING**:
/// The `…+ssc` schemes are not secure and provided for testing purposes
/// only.
///
/// The routing context may only be present for schemes that support routing;
/// query parameters on a direct scheme are rejected.
///
/// ```
/// use graphbolt::driver::ConnectionConfig;
///
/// let conf: ConnectionConfig = "neo4j://localhost:7687?region=eu".parse().unwrap();
/// ```
///
/// ## Programmatically
/// To get better type safety and avoid parsing errors at runtime, this crate
/// also provides a builder API.
///
/// ```
/// use std::collections::HashMap;
///
/// use graphbolt::driver::ConnectionConfig;
///
/// let routing_context = {
///     let mut map = HashMap::with_capacity(1);
///     map.insert("region".to_string(), "eu".to_string());
///     map
/// };
/// let conf = ConnectionConfig::new(("localhost", 7687).into())
///     .with_routing_context(routing_context)
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct ConnectionConfig {
    pub(crate) address: Address,
    pub(crate) routing_context: Option<HashMap<String, Value>>,
    pub(crate) tls_config: Option<ClientConfig>,
}

impl ConnectionConfig {
    /// Create a new connection configuration with default values.
    ///
    /// Besides the required address, no TLS encryption will be used and
    /// routing with an empty routing context is the default.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            routing_context: Some(HashMap::new()),
            tls_config: None,
        }
    }

    /// Change the address the driver should connect to.
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    /// Choose whether the driver should perform routing (`true`) or not
    /// (`false`).
    ///
    /// Routing is enabled by *default* and also works against single
    /// instance setups. Only when specifically needing to connect to a
    /// single cluster member (e.g., for maintenance), should routing be
    /// disabled.
    pub fn with_routing(mut self, routing: bool) -> Self {
        if !routing {
            self.routing_context = None
        } else if self.routing_context.is_none() {
            self.routing_context = Some(HashMap::new());
        }
        self
    }

    /// Enable routing with a specific routing context.
    ///
    /// The routing context is a set of key-value pairs sent to the cluster's
    /// routing procedure, where it can feed routing policies (e.g., choosing
    /// a region).
    ///
    /// # Errors
    /// An [`InvalidRoutingContextError`] is returned if the routing context
    /// contains the *reserved* key `"address"`.
    #[allow(clippy::result_large_err)]
    pub fn with_routing_context(
        mut self,
        routing_context: HashMap<String, String>,
    ) -> StdResult<Self, InvalidRoutingContextError<Self>> {
        if routing_context.contains_key("address") {
            return Err(InvalidRoutingContextError {
                builder: self,
                it: "cannot contain key 'address'",
            });
        }
        self.routing_context = Some(
            routing_context
                .into_iter()
                .map(|(k, v)| (k, v.into()))
                .collect(),
        );
        Ok(self)
    }

    /// Enforce TLS encryption, verifying the server's certificate against
    /// the system's root CA certificate store.
    ///
    /// Returns an error if the system's root CA certificate store could not
    /// be loaded.
    #[allow(clippy::result_large_err)]
    pub fn with_encryption_trust_default_cas(mut self) -> StdResult<Self, TlsConfigError> {
        self.tls_config = Some(match tls::secure_tls_config() {
            Ok(config) => config,
            Err(message) => {
                return Err(TlsConfigError {
                    message,
                    config: self,
                })
            }
        });
        Ok(self)
    }

    /// Enforce TLS encryption, verifying the server's certificate against
    /// root CA certificates loaded from the given PEM file(s).
    ///
    /// Returns an error if loading the root CA certificates failed.
    #[allow(clippy::result_large_err)]
    pub fn with_encryption_trust_custom_cas<P: AsRef<Path>>(
        self,
        paths: &[P],
    ) -> StdResult<Self, TlsConfigError> {
        fn inner(
            mut config: ConnectionConfig,
            paths: &[&Path],
        ) -> StdResult<ConnectionConfig, TlsConfigError> {
            config.tls_config = Some(match tls::custom_ca_tls_config(paths) {
                Ok(tls_config) => tls_config,
                Err(message) => return Err(TlsConfigError { message, config }),
            });
            Ok(config)
        }
        let paths = paths.iter().map(|path| path.as_ref()).collect::<Vec<_>>();
        inner(self, &paths)
    }

    /// Enforce TLS encryption, without verifying the server's certificate.
    ///
    /// **⚠️ WARNING**:
    /// This is not secure and should only be used for testing purposes.
    pub fn with_encryption_trust_any_certificate(mut self) -> Self {
        self.tls_config = Some(tls::self_signed_tls_config());
        self
    }

    /// Enforce TLS encryption, trusting each host's certificate on first
    /// use and recording its fingerprint in the given known-hosts file.
    /// A host whose certificate changes later is refused.
    #[allow(clippy::result_large_err)]
    pub fn with_encryption_trust_known_hosts<P: AsRef<Path>>(
        mut self,
        path: P,
    ) -> StdResult<Self, TlsConfigError> {
        self.tls_config = Some(match tls::known_hosts_tls_config(path) {
            Ok(config) => config,
            Err(message) => {
                return Err(TlsConfigError {
                    message,
                    config: self,
                })
            }
        });
        Ok(self)
    }

    /// Enforce TLS encryption, using a custom TLS configuration.
    ///
    /// **⚠️ WARNING**:
    /// Depending on the passed TLS configuration, this might not be secure.
    pub fn with_encryption_custom_tls_config(mut self, tls_config: ClientConfig) -> Self {
        self.tls_config = Some(tls_config);
        self
    }

    /// Disable TLS encryption.
    pub fn with_encryption_disabled(mut self) -> Self {
        self.tls_config = None;
        self
    }

    fn parse_uri(uri: &str) -> StdResult<ConnectionConfig, ConnectionConfigParseError> {
        let uri = URI::try_from(uri)?;

        let (routing, tls_config) = match uri.scheme().as_str() {
            "neo4j" | "bolt+routing" => (true, None),
            "neo4j+s" => (true, Some(tls::secure_tls_config()?)),
            "neo4j+ssc" => (true, Some(tls::self_signed_tls_config())),
            "bolt" => (false, None),
            "bolt+s" => (false, Some(tls::secure_tls_config()?)),
            "bolt+ssc" => (false, Some(tls::self_signed_tls_config())),
            scheme => {
                return Err(ConnectionConfigParseError(format!(
                    "unknown scheme in URI {} expected `neo4j`, `neo4j+s`, `neo4j+ssc`, \
                         `bolt`, `bolt+s`, or `bolt+ssc`",
                    scheme
                )))
            }
        };

        let authority = uri
            .authority()
            .ok_or(ConnectionConfigParseError(String::from(
                "missing host in URI",
            )))?;
        if authority.has_username() {
            return Err(ConnectionConfigParseError(format!(
                "URI cannot contain a username, found: {}",
                authority.username().expect("checked to have username")
            )));
        }
        if authority.has_password() {
            return Err(ConnectionConfigParseError(String::from(
                "URI cannot contain a password",
            )));
        }
        let host = authority.host().to_string();
        let port = authority.port().unwrap_or(crate::address_::DEFAULT_PORT);

        let routing_context = match uri.query() {
            None => {
                if routing {
                    Some(HashMap::new())
                } else {
                    None
                }
            }
            Some(query) => {
                let query = query.as_str();
                if query.is_empty() {
                    if routing {
                        Some(HashMap::new())
                    } else {
                        None
                    }
                } else {
                    if !routing {
                        return Err(ConnectionConfigParseError(format!(
                            "URI with direct scheme cannot contain a query \
                                 (routing context), found: {}",
                            query,
                        )));
                    }
                    Some(Self::parse_query(query)?)
                }
            }
        };

        if let Some(fragment) = uri.fragment() {
            return Err(ConnectionConfigParseError(format!(
                "URI cannot contain a fragment, found: {}",
                fragment
            )));
        }

        Ok(ConnectionConfig {
            address: Address::from((host, port)),
            routing_context,
            tls_config,
        })
    }

    fn parse_query(
        query: &str,
    ) -> StdResult<HashMap<String, Value>, ConnectionConfigParseError> {
        let mut result = HashMap::new();
        for key_value in query.split('&') {
            let Some((key, value)) = key_value.split_once('=') else {
                return Err(ConnectionConfigParseError(format!(
                    "couldn't parse key value pair in URI query: {}",
                    key_value
                )));
            };
            if key.is_empty() || value.is_empty() {
                return Err(ConnectionConfigParseError(format!(
                    "couldn't parse key value pair in URI query: {}",
                    key_value
                )));
            }
            if key == "address" {
                return Err(ConnectionConfigParseError(String::from(
                    "routing context cannot contain key 'address'",
                )));
            }
            result.insert(key.to_string(), value.into());
        }
        Ok(result)
    }
}

impl TryFrom<&str> for ConnectionConfig {
    type Error = ConnectionConfigParseError;

    fn try_from(value: &str) -> StdResult<Self, Self::Error> {
        Self::parse_uri(value)
    }
}

impl std::str::FromStr for ConnectionConfig {
    type Err = ConnectionConfigParseError;

    fn from_str(s: &str) -> StdResult<Self, Self::Err> {
        Self::try_from(s)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConnectionConfigParseError(String);

impl From<URIError> for ConnectionConfigParseError {
    fn from(e: URIError) -> Self {
        ConnectionConfigParseError(format!("couldn't parse URI {e}"))
    }
}

impl From<String> for ConnectionConfigParseError {
    fn from(e: String) -> Self {
        ConnectionConfigParseError(e)
    }
}

#[derive(Debug, Error)]
#[error("fetch size must be <= i64::MAX")]
pub struct ConfigureFetchSizeError<Builder> {
    pub builder: Builder,
}

#[derive(Debug, Error)]
#[error("routing context invalid because it {it}")]
pub struct InvalidRoutingContextError<Builder> {
    pub builder: Builder,
    it: &'static str,
}

#[derive(Debug, Error)]
#[error("TLS config error: {message}")]
pub struct TlsConfigError {
    pub message: String,
    pub config: ConnectionConfig,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::*;

    use super::*;
    use crate::macros::hash_map;

    #[rstest]
    fn test_no_tls_by_default() {
        let address = ("localhost", 7687).into();
        let connection_config = ConnectionConfig::new(address);

        assert!(connection_config.tls_config.is_none());
    }

    #[rstest]
    #[case("neo4j://example.com", true)]
    #[case("bolt+routing://example.com", true)]
    #[case("bolt://example.com", false)]
    fn test_parsing_routing(#[case] uri: &str, #[case] routing: bool) {
        let connection_config = ConnectionConfig::try_from(uri).unwrap();
        assert_eq!(connection_config.routing_context.is_some(), routing);
    }

    #[rstest]
    #[case("neo4j://localhost:7687", "localhost")]
    #[case("neo4j://localhost", "localhost")]
    #[case("neo4j://example.com:7687", "example.com")]
    #[case("neo4j://127.0.0.1:7687", "127.0.0.1")]
    #[case("neo4j://localhost:7687?foo=bar", "localhost")]
    #[case("bolt://localhost:7687", "localhost")]
    #[case("bolt://example.com", "example.com")]
    #[case("bolt://127.0.0.1", "127.0.0.1")]
    fn test_parsing_address(#[case] uri: &str, #[case] host: &str) {
        let connection_config = ConnectionConfig::try_from(uri).unwrap();
        assert_eq!(connection_config.address.host(), host);
    }

    #[rstest]
    #[case("neo4j://localhost", 7687)]
    #[case("neo4j://localhost:7687", 7687)]
    #[case("neo4j://localhost:1337", 1337)]
    #[case("bolt://example.com", 7687)]
    #[case("bolt://example.com:1337", 1337)]
    fn test_parsing_port(#[case] uri: &str, #[case] port: u16) {
        let connection_config = ConnectionConfig::try_from(uri).unwrap();
        assert_eq!(connection_config.address.port(), port);
    }

    #[rstest]
    #[case("", hash_map!())]
    #[case("?", hash_map!())]
    #[case("?foo=bar", hash_map!("foo".into() => "bar".into()))]
    #[case("?n=1", hash_map!("n".into() => "1".into()))]
    #[case("?foo=bar&baz=foobar",
           hash_map!("foo".into() => "bar".into(), "baz".into() => "foobar".into()))]
    fn test_parsing_routing_context(
        #[values("neo4j://localhost:7687", "neo4j://example.com")] uri_base: &str,
        #[case] uri_query: &str,
        #[case] routing_context: HashMap<String, Value>,
    ) {
        let uri: String = format!("{}{}", uri_base, uri_query);
        let connection_config = ConnectionConfig::try_from(uri.as_str()).unwrap();
        assert_eq!(connection_config.routing_context, Some(routing_context));
    }

    #[rstest]
    #[case("bolt://localhost:7687?foo=bar")]
    #[case("bolt+s://localhost?foo=bar")]
    fn test_direct_scheme_rejects_query(#[case] uri: &str) {
        let res = ConnectionConfig::try_from(uri);
        let err = res.expect_err("query on direct scheme must be rejected");
        assert!(err.to_string().contains("routing context"));
    }

    #[rstest]
    #[case("http://localhost")]
    #[case("neo4j+x://localhost")]
    fn test_unknown_scheme(#[case] uri: &str) {
        assert!(ConnectionConfig::try_from(uri).is_err());
    }

    #[rstest]
    fn test_reserved_routing_context_key() {
        assert!(ConnectionConfig::try_from("neo4j://localhost?address=example.com").is_err());

        let context = hash_map!("address".to_string() => "example.com".to_string());
        let res = ConnectionConfig::new(("localhost", 7687).into()).with_routing_context(context);
        assert!(res.is_err());
    }

    #[rstest]
    fn test_username_rejected() {
        assert!(ConnectionConfig::try_from("neo4j://user@localhost").is_err());
    }
}
