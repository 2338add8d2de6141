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

use crate::value::Value;
use crate::value_map;

/// The credentials sent to the server during authentication.
///
/// The token is an open map of `scheme`, `principal`, `credentials`,
/// `realm`, and scheme-specific `parameters`; the constructors cover the
/// schemes every server understands.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    pub(crate) data: HashMap<String, Value>,
}

impl AuthToken {
    /// No authentication. Only useful against servers with auth disabled.
    pub fn new_none_auth() -> Self {
        Self {
            data: value_map!({"scheme": "none"}),
        }
    }

    /// Username and password.
    pub fn new_basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username: String = username.into();
        let password: String = password.into();
        Self {
            data: value_map!({
                "scheme": "basic",
                "principal": username,
                "credentials": password,
            }),
        }
    }

    /// Username and password, authenticated against a specific realm.
    pub fn new_basic_auth_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        let mut token = Self::new_basic_auth(username, password);
        token.data.insert("realm".into(), realm.into().into());
        token
    }

    /// A base64 encoded kerberos ticket.
    pub fn new_kerberos_auth(base64_encoded_ticket: impl Into<String>) -> Self {
        let ticket: String = base64_encoded_ticket.into();
        Self {
            data: value_map!({
                "scheme": "kerberos",
                "principal": "",
                "credentials": ticket,
            }),
        }
    }

    /// A base64 encoded bearer token, e.g., from an SSO provider.
    pub fn new_bearer_auth(base64_encoded_token: impl Into<String>) -> Self {
        let token: String = base64_encoded_token.into();
        Self {
            data: value_map!({
                "scheme": "bearer",
                "credentials": token,
            }),
        }
    }

    /// A token for a custom authentication scheme the server knows about.
    pub fn new_custom_auth(
        principal: Option<String>,
        credentials: Option<String>,
        realm: Option<String>,
        scheme: Option<String>,
        parameters: Option<HashMap<String, Value>>,
    ) -> Self {
        let mut data = HashMap::with_capacity(5);
        if let Some(principal) = principal {
            data.insert("principal".into(), principal.into());
        }
        if let Some(credentials) = credentials {
            if !credentials.is_empty() {
                data.insert("credentials".into(), credentials.into());
            }
        }
        if let Some(realm) = realm {
            if !realm.is_empty() {
                data.insert("realm".into(), realm.into());
            }
        }
        data.insert("scheme".into(), scheme.into());
        if let Some(parameters) = parameters {
            if !parameters.is_empty() {
                data.insert("parameters".into(), parameters.into());
            }
        }
        Self { data }
    }

    #[inline]
    pub fn data(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::new_none_auth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth() {
        let token = AuthToken::new_basic_auth("user", "pass");
        assert_eq!(token.data()["scheme"], Value::String("basic".into()));
        assert_eq!(token.data()["principal"], Value::String("user".into()));
        assert_eq!(token.data()["credentials"], Value::String("pass".into()));
    }

    #[test]
    fn test_custom_auth_skips_empty_entries() {
        let token = AuthToken::new_custom_auth(
            Some("user".into()),
            Some("".into()),
            None,
            Some("fancy".into()),
            None,
        );
        assert_eq!(token.data()["scheme"], Value::String("fancy".into()));
        assert!(!token.data().contains_key("credentials"));
        assert!(!token.data().contains_key("realm"));
        assert!(!token.data().contains_key("parameters"));
    }
}
