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

//! Builders for the supported TLS trust strategies: system CAs, custom CAs,
//! trust-any-certificate, and known-hosts (trust on first use).

use std::fs::File;
use std::io::{BufReader, Result as IoResult};
use std::path::Path;
use std::result::Result as StdResult;
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use parking_lot::Mutex;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, Error as RustlsError, RootCertStore, ServerName};
use sha2::{Digest, Sha256};

use super::known_hosts::KnownHosts;

static SYSTEM_CERTIFICATES: OnceLock<StdResult<Arc<RootCertStore>, String>> = OnceLock::new();

/// Verify the server's certificate against the system's root CA store.
pub(crate) fn secure_tls_config() -> StdResult<ClientConfig, String> {
    let root_store = SYSTEM_CERTIFICATES.get_or_init(|| {
        let mut root_store = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs()
            .map_err(|e| format!("failed to load system certificates: {e}"))?;
        let (_, _) = root_store.add_parsable_certificates(&native_certs);
        Ok(Arc::new(root_store))
    });
    let root_store = Arc::clone(root_store.as_ref().map_err(Clone::clone)?);
    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Verify the server's certificate against root CAs loaded from PEM files.
pub(crate) fn custom_ca_tls_config(paths: &[&Path]) -> StdResult<ClientConfig, String> {
    fn load_certificates_from_pem(path: &Path) -> IoResult<Vec<Certificate>> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let certs = rustls_pemfile::certs(&mut reader)?;

        Ok(certs.into_iter().map(Certificate).collect())
    }

    let mut root_store = RootCertStore::empty();
    for path in paths {
        let certs = load_certificates_from_pem(path)
            .map_err(|e| format!("failed to load certificates from PEM file: {e}"))?;
        for cert in certs.into_iter() {
            root_store.add(&cert).map_err(|e| {
                format!("failed to add certificate(s) from {path:?} to root store: {e}")
            })?;
        }
    }
    Ok(ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

/// Accept any certificate the server presents. Testing only.
pub(crate) fn self_signed_tls_config() -> ClientConfig {
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(NonVerifyingVerifier {}));
    config
}

/// Trust on first use: pin the first certificate seen per host in the given
/// known-hosts file and refuse any host whose certificate changes.
pub(crate) fn known_hosts_tls_config(path: impl AsRef<Path>) -> StdResult<ClientConfig, String> {
    let known_hosts = KnownHosts::load(path)
        .map_err(|e| format!("failed to load known hosts file: {e}"))?;
    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(RootCertStore::empty())
        .with_no_client_auth();
    config
        .dangerous()
        .set_certificate_verifier(Arc::new(KnownHostsVerifier {
            known_hosts: Mutex::new(known_hosts),
        }));
    Ok(config)
}

/// As the name suggests, this verifier happily accepts any certificate.
/// This is not secure and should only be used for testing.
struct NonVerifyingVerifier {}

impl ServerCertVerifier for NonVerifyingVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> StdResult<ServerCertVerified, RustlsError> {
        Ok(ServerCertVerified::assertion())
    }
}

struct KnownHostsVerifier {
    known_hosts: Mutex<KnownHosts>,
}

impl ServerCertVerifier for KnownHostsVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        _intermediates: &[Certificate],
        server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> StdResult<ServerCertVerified, RustlsError> {
        let address = match server_name {
            ServerName::DnsName(name) => name.as_ref().to_string(),
            ServerName::IpAddress(ip) => ip.to_string(),
            _ => {
                return Err(RustlsError::General(String::from(
                    "unsupported server name type for known hosts verification",
                )))
            }
        };
        let fingerprint = cert_fingerprint(end_entity);
        let mut known_hosts = self.known_hosts.lock();
        match known_hosts.get(&address) {
            Some(known) if known == fingerprint => Ok(ServerCertVerified::assertion()),
            Some(known) => Err(RustlsError::General(format!(
                "certificate of host {address} changed: known fingerprint {known}, \
                 presented {fingerprint}"
            ))),
            None => {
                known_hosts
                    .insert(&address, &fingerprint)
                    .map_err(|e| {
                        RustlsError::General(format!("failed to update known hosts file: {e}"))
                    })?;
                Ok(ServerCertVerified::assertion())
            }
        }
    }
}

fn cert_fingerprint(cert: &Certificate) -> String {
    let digest = Sha256::digest(&cert.0);
    let mut fingerprint = String::with_capacity(digest.len() * 2);
    for byte in digest {
        fingerprint.push_str(&format!("{byte:02x}"));
    }
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_fingerprint_is_hex_of_sha256() {
        let cert = Certificate(vec![1, 2, 3]);
        let fingerprint = cert_fingerprint(&cert);
        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        // stable for the same input
        assert_eq!(fingerprint, cert_fingerprint(&Certificate(vec![1, 2, 3])));
        assert_ne!(fingerprint, cert_fingerprint(&Certificate(vec![3, 2, 1])));
    }
}
