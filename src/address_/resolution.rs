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

use std::error::Error as StdError;
use std::fmt::Debug;
use std::net::ToSocketAddrs;
use std::result::Result as StdResult;
use std::sync::Arc;

use log::debug;

use super::Address;
use crate::error::{DriverError, Result, UserCallbackError};

// imports for docs
#[allow(unused)]
use crate::driver::DriverConfig;

type BoxError = Box<dyn StdError + Send + Sync>;
/// See [`AddressResolver::resolve()`].
pub type AddressResolverReturn = StdResult<Vec<Address>, BoxError>;

/// A trait for custom address resolution.
///
/// Every address coming into the driver (the initial one as well as routing
/// table members) is passed through the resolver before DNS resolution.
///
/// See [`DriverConfig::with_resolver()`].
pub trait AddressResolver: Debug + Send + Sync {
    /// must not return an empty vector
    fn resolve(&self, address: &Address) -> AddressResolverReturn;
}

/// Expand an address into the concrete targets to attempt, in order:
/// the custom resolver first (if any and not already applied), then DNS for
/// every host that is not an IP yet.
///
/// Hosts that fail DNS resolution are skipped with a log line; the result
/// may therefore be empty. A failing or empty *custom* resolution is an
/// error, since that is user code misbehaving.
pub(crate) fn resolve_targets(
    address: &Arc<Address>,
    resolver: Option<&dyn AddressResolver>,
) -> Result<Vec<Arc<Address>>> {
    let mut targets = Vec::new();
    for candidate in apply_custom_resolver(address, resolver)? {
        if candidate.is_dns_resolved {
            targets.push(candidate);
            continue;
        }
        debug!("dns resolving {candidate}");
        match candidate.to_socket_addrs() {
            Ok(resolved) => {
                for sock_addr in resolved {
                    targets.push(Arc::new(Address {
                        host: sock_addr.ip().to_string(),
                        port: sock_addr.port(),
                        key: candidate.host.clone(),
                        is_custom_resolved: candidate.is_custom_resolved,
                        is_dns_resolved: true,
                    }));
                }
            }
            Err(err) => {
                debug!("skipping {candidate}, dns resolution failed: {err}");
            }
        }
    }
    debug!(
        "resolved {} to {:?}",
        address,
        targets.iter().map(|t| format!("{t}")).collect::<Vec<_>>()
    );
    Ok(targets)
}

fn apply_custom_resolver(
    address: &Arc<Address>,
    resolver: Option<&dyn AddressResolver>,
) -> Result<Vec<Arc<Address>>> {
    let Some(resolver) = resolver else {
        return Ok(vec![Arc::clone(address)]);
    };
    if address.is_custom_resolved {
        // routing-table members produced by an earlier resolution round
        return Ok(vec![Arc::clone(address)]);
    }
    match resolver.resolve(address) {
        Ok(resolved) => {
            if resolved.is_empty() {
                return Err(DriverError::InvalidConfig {
                    message: String::from("DriverConfig::resolver returned no addresses."),
                });
            }
            Ok(resolved
                .into_iter()
                .map(|mut resolved| {
                    resolved.is_custom_resolved = true;
                    Arc::new(resolved)
                })
                .collect())
        }
        Err(err) => {
            debug!("custom resolver failed for {address}: {err:?}");
            Err(DriverError::UserCallback {
                error: UserCallbackError::Resolver(err),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedResolver(Vec<&'static str>);

    impl AddressResolver for FixedResolver {
        fn resolve(&self, _address: &Address) -> AddressResolverReturn {
            Ok(self.0.iter().map(|a| Address::from(*a)).collect())
        }
    }

    #[derive(Debug)]
    struct EmptyResolver;

    impl AddressResolver for EmptyResolver {
        fn resolve(&self, _address: &Address) -> AddressResolverReturn {
            Ok(vec![])
        }
    }

    #[test]
    fn test_no_resolver_passes_address_through() {
        let address = Arc::new(Address::from("127.0.0.1:7687"));
        let targets = resolve_targets(&address, None).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].host(), "127.0.0.1");
    }

    #[test]
    fn test_custom_resolver_replaces_address() {
        let resolver = FixedResolver(vec!["127.0.0.1:1111", "127.0.0.2:2222"]);
        let address = Arc::new(Address::from("example.com:7687"));
        let targets = resolve_targets(&address, Some(&resolver)).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].port(), 1111);
        assert_eq!(targets[1].port(), 2222);
        assert!(targets.iter().all(|t| t.is_custom_resolved));
    }

    #[test]
    fn test_already_resolved_address_skips_resolver() {
        let resolver = FixedResolver(vec!["127.0.0.9:9999"]);
        let mut address = Address::from("127.0.0.1:7687");
        address.is_custom_resolved = true;
        let targets = resolve_targets(&Arc::new(address), Some(&resolver)).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].port(), 7687);
    }

    #[test]
    fn test_empty_custom_resolution_is_an_error() {
        let address = Arc::new(Address::from("example.com"));
        let err = resolve_targets(&address, Some(&EmptyResolver)).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig { .. }));
    }
}
