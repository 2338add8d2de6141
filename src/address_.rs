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

pub(crate) mod resolution;

use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use std::vec::IntoIter;

pub(crate) const DEFAULT_PORT: u16 = 7687;

/// A server address.
///
/// # Example
/// ```
/// use graphbolt::address::Address;
///
/// // can be constructed from (&str, u16)
/// let address = Address::from(("localhost", 1234));
/// assert_eq!(address.host(), "localhost");
/// assert_eq!(address.port(), 1234);
///
/// // can be constructed from &str
/// let address = Address::from("example.com:5678");
/// assert_eq!(address.host(), "example.com");
/// assert_eq!(address.port(), 5678);
///
/// // or using the default port
/// let address = Address::from("localhost");
/// assert_eq!(address.host(), "localhost");
/// assert_eq!(address.port(), 7687);
///
/// // as well as IPv4 or IPv6 addresses
/// let address = Address::from("127.0.0.1:1234");
/// assert_eq!(address.host(), "127.0.0.1");
/// assert_eq!(address.port(), 1234);
///
/// let address = Address::from("[::1]:4321");
/// assert_eq!(address.host(), "[::1]");
/// assert_eq!(address.port(), 4321);
/// ```
#[derive(Debug, Clone)]
pub struct Address {
    host: String,
    port: u16,
    /// the host name as the user (or routing table) spelled it; resolution
    /// steps rewrite `host` but keep this
    key: String,
    pub(crate) is_custom_resolved: bool,
    pub(crate) is_dns_resolved: bool,
}

impl Address {
    fn build(host: String, port: u16) -> Self {
        // an IP literal needs no DNS round and is normalized for comparison
        let (key, is_dns_resolved) = match IpAddr::from_str(&host) {
            Ok(ip) => (ip.to_string(), true),
            Err(_) => (host.clone(), false),
        };
        Self {
            host,
            port,
            key,
            is_custom_resolved: false,
            is_dns_resolved,
        }
    }

    /// Return the host name or IP address.
    ///
    /// For addresses that have been resolved by the driver, this is the
    /// final IP address after all resolution steps (custom resolver, DNS).
    pub fn host(&self) -> &str {
        self.host.as_str()
    }

    /// Return the port number.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Return the host name before a potential DNS resolution.
    pub fn unresolved_host(&self) -> &str {
        &self.key
    }
}

/// Equality of addresses is defined over [`Address::unresolved_host()`] and
/// [`Address::port()`]: addresses DNS-resolved to different IPs of the same
/// host count as the same server.
impl PartialEq for Address {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        (self.port, &self.key) == (other.port, &other.key)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.port.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.host.contains(':') && !self.host.starts_with('[') {
            true => write!(f, "[{}]:{}", self.host, self.port),
            false => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Split `host[:port]`, leaving IPv6 notation (with or without brackets)
/// intact.
fn split_host_port(input: &str) -> (&str, u16) {
    if let Some(bracketed) = input.strip_prefix('[') {
        // "[v6]" or "[v6]:port"
        if let Some((host, rest)) = bracketed.split_once(']') {
            let port = rest
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT);
            return (host, port);
        }
        return (input, DEFAULT_PORT);
    }
    match input.matches(':').count() {
        0 => (input, DEFAULT_PORT),
        1 => {
            let (host, port) = input.split_once(':').expect("exactly one colon");
            (host, port.parse().unwrap_or(DEFAULT_PORT))
        }
        // more than one colon without brackets: a bare IPv6 address
        _ => (input, DEFAULT_PORT),
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        let (host, port) = split_host_port(value);
        // bracketed IPv6 keeps its brackets in `host` for display purposes,
        // but `build` must see the bare address to recognize the IP
        match IpAddr::from_str(host) {
            Ok(ip) if value.starts_with('[') => {
                let mut address = Self::build(ip.to_string(), port);
                address.host = format!("[{ip}]");
                address
            }
            _ => Self::build(host.to_string(), port),
        }
    }
}

impl From<(String, u16)> for Address {
    fn from((host, port): (String, u16)) -> Self {
        Self::build(host, port)
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        Self::build(host.to_string(), port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::build(addr.ip().to_string(), addr.port())
    }
}

impl ToSocketAddrs for Address {
    type Iter = IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (self.host.as_str(), self.port).to_socket_addrs()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("localhost", "localhost", DEFAULT_PORT)]
    #[case("localhost:1234", "localhost", 1234)]
    #[case("localhost:oops", "localhost", DEFAULT_PORT)]
    #[case("127.0.0.1:1234", "127.0.0.1", 1234)]
    #[case("::1", "::1", DEFAULT_PORT)]
    #[case("[::1]", "[::1]", DEFAULT_PORT)]
    #[case("[::1]:1234", "[::1]", 1234)]
    fn test_parse(#[case] input: &str, #[case] host: &str, #[case] port: u16) {
        let address = Address::from(input);
        assert_eq!(address.host(), host);
        assert_eq!(address.port(), port);
    }

    #[rstest]
    #[case("127.0.0.1", true)]
    #[case("[::1]:7687", true)]
    #[case("localhost", false)]
    fn test_ip_literals_skip_dns(#[case] input: &str, #[case] resolved: bool) {
        assert_eq!(Address::from(input).is_dns_resolved, resolved);
    }

    #[test]
    fn test_eq_ignores_dns_resolution() {
        let a = Address::from("localhost:7687");
        let mut b = a.clone();
        b.host = String::from("127.0.0.1");
        b.is_dns_resolved = true;
        // key (unresolved host) and port decide equality
        assert_eq!(a, b);
    }
}
