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
use std::fmt::{Display, Formatter};
use std::io;

use log::info;
use thiserror::Error;

use crate::driver::io::bolt::ResponseMeta;
use crate::value::Value;

// imports for docs
#[allow(unused)]
use crate::address::AddressResolver;
#[allow(unused)]
use crate::driver::DriverConfig;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while using the driver.
///
/// Error messages are *not* considered part of the driver's API.
/// The only string that can be (somewhat) reliably matched against is
/// [`ServerError::code()`], which is produced by the server.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DriverError {
    /// The service is not reachable:
    /// failure to connect, a broken socket, or no routing information
    /// obtainable from any known router.
    #[error("service unavailable: {message}{}",
            source.as_ref().map(|err| format!(" caused by: {err}")).unwrap_or_default())]
    #[non_exhaustive]
    ServiceUnavailable {
        message: String,
        source: Option<io::Error>,
        /// `true` when the connection was lost while the driver cannot tell
        /// whether the ongoing transaction has been committed or not.
        /// Such failures are not safe to blindly retry.
        during_commit: bool,
    },

    /// The session can no longer be completed against its current server.
    /// E.g., the contacted writer is no longer the leader of a clustered
    /// database. Work may be retried, possibly against another server.
    #[error("session expired: {message}")]
    #[non_exhaustive]
    SessionExpired {
        message: String,
        source: Option<Box<ServerError>>,
    },

    /// Authentication or authorization against the server failed.
    /// Fatal to the connection and never retried.
    #[error("security error: {error}")]
    #[non_exhaustive]
    Security { error: Box<ServerError> },

    /// The server answered a request with a FAILURE that is neither a
    /// security nor a cluster-membership error.
    #[error("{error}")]
    #[non_exhaustive]
    Server { error: Box<ServerError> },

    /// Acquiring a connection from the pool did not complete within
    /// [`DriverConfig::with_connection_acquisition_timeout()`].
    #[error("{message}")]
    #[non_exhaustive]
    Timeout { message: String },

    /// The driver was configured in an unusable way: contradictory
    /// encryption settings, certificates that cannot be loaded, values the
    /// protocol cannot represent, etc.
    #[error("invalid configuration: {message}")]
    #[non_exhaustive]
    InvalidConfig { message: String },

    /// The driver's API was used in an unsupported way, e.g., requesting
    /// records from a result that has already been consumed.
    #[error("{message}")]
    #[non_exhaustive]
    Usage { message: String },

    /// An unexpected message or malformed data was received from the server.
    /// Fatal to the connection, which is discarded.
    #[error(
        "the driver encountered a protocol violation, \
        this is likely a bug in the driver or the server: {message}"
    )]
    #[non_exhaustive]
    ProtocolError { message: String },

    /// A user-provided callback (e.g., the address resolver) failed.
    #[error("{error}")]
    #[non_exhaustive]
    UserCallback { error: UserCallbackError },
}

impl DriverError {
    /// Whether it makes sense to hand the failed work to a retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::ServiceUnavailable { during_commit, .. } => !during_commit,
            DriverError::SessionExpired { .. } => true,
            DriverError::Server { error } => error.is_retryable(),
            _ => false,
        }
    }

    pub(crate) fn read_err(err: io::Error) -> Self {
        info!("read error: {err}");
        Self::ServiceUnavailable {
            message: String::from("failed to read"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_read<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::read_err)
    }

    pub(crate) fn write_err(err: io::Error) -> Self {
        info!("write error: {err}");
        Self::ServiceUnavailable {
            message: String::from("failed to write"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_write<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::write_err)
    }

    pub(crate) fn connect_err(err: io::Error) -> Self {
        Self::ServiceUnavailable {
            message: String::from("failed to open connection"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_connect<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::connect_err)
    }

    pub(crate) fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
            source: None,
            during_commit: false,
        }
    }

    pub(crate) fn protocol_error<S: Into<String>>(message: S) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub(crate) fn usage_error<S: Into<String>>(message: S) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    pub(crate) fn failed_commit(mut self) -> Self {
        if let Self::ServiceUnavailable { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    pub(crate) fn wrap_commit<T>(res: Result<T>) -> Result<T> {
        res.map_err(Self::failed_commit)
    }

    pub(crate) fn connection_acquisition_timeout<S: AsRef<str>>(during: S) -> Self {
        Self::Timeout {
            message: format!("connection acquisition timed out while {}", during.as_ref()),
        }
    }

    /// Classify a server FAILURE into the user-facing error kind:
    /// security errors get their own kind, cluster-membership errors are
    /// remapped to [`DriverError::SessionExpired`], everything else is
    /// surfaced verbatim.
    pub(crate) fn from_server_error(error: ServerError) -> Self {
        if error.is_security_error() {
            return Self::Security {
                error: Box::new(error),
            };
        }
        if error.invalidates_writer() {
            return Self::SessionExpired {
                message: format!("server {} can no longer serve writes", error.code()),
                source: Some(Box::new(error)),
            };
        }
        Self::Server {
            error: Box::new(error),
        }
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self {
            DriverError::Server { error } => error.fatal_during_discovery(),
            DriverError::Security { .. } => true,
            DriverError::InvalidConfig { .. } => true,
            DriverError::Usage { .. } => true,
            DriverError::UserCallback { .. } => true,
            _ => false,
        }
    }
}

/// An error as returned by the server in a FAILURE message.
///
/// The `code` takes the form `Neo.<Classification>.<Category>.<Title>` and
/// drives the driver's retry and routing decisions.
#[derive(Debug, Clone)]
pub struct ServerError {
    code: String,
    message: String,
}

impl ServerError {
    pub(crate) fn new(code: String, message: String) -> Self {
        Self { code, message }
    }

    pub(crate) fn from_meta(mut meta: ResponseMeta) -> Self {
        let code = match meta.remove("code") {
            Some(Value::String(code)) => code,
            _ => "Neo.DatabaseError.General.UnknownError".into(),
        };
        let message = match meta.remove("message") {
            Some(Value::String(message)) => message,
            _ => "An unknown error occurred.".into(),
        };
        Self { code, message }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    pub fn title(&self) -> &str {
        self.code.split('.').nth(3).unwrap_or("")
    }

    pub(crate) fn is_retryable(&self) -> bool {
        self.classification() == "TransientError"
            && !matches!(
                self.code(),
                "Neo.TransientError.Transaction.Terminated"
                    | "Neo.TransientError.Transaction.LockClientStopped"
            )
    }

    pub(crate) fn deactivates_server(&self) -> bool {
        self.code() == "Neo.TransientError.General.DatabaseUnavailable"
    }

    pub(crate) fn invalidates_writer(&self) -> bool {
        matches!(
            self.code(),
            "Neo.ClientError.Cluster.NotALeader"
                | "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase"
        )
    }

    pub(crate) fn is_security_error(&self) -> bool {
        self.code.starts_with("Neo.ClientError.Security.")
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self.code() {
            "Neo.ClientError.Database.DatabaseNotFound"
            | "Neo.ClientError.Transaction.InvalidBookmark"
            | "Neo.ClientError.Transaction.InvalidBookmarkMixture"
            | "Neo.ClientError.Request.Invalid" => true,
            code => code.starts_with("Neo.ClientError.Security."),
        }
    }

    pub(crate) fn clone_with_reason(&self, reason: &str) -> Self {
        Self {
            code: self.code.clone(),
            message: format!("{}: {}", reason, self.message),
        }
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

impl StdError for ServerError {}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::from_server_error(err)
    }
}

/// A callback provided by the user failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UserCallbackError {
    /// The configured [`AddressResolver`] ([`DriverConfig::with_resolver()`])
    /// returned an error.
    #[error("resolver callback failed: {0}")]
    Resolver(BoxError),
}

impl UserCallbackError {
    pub fn user_error(&self) -> &dyn StdError {
        match self {
            UserCallbackError::Resolver(err) => err.as_ref(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn server_error(code: &str) -> ServerError {
        ServerError::new(code.into(), "message".into())
    }

    #[rstest]
    #[case("Neo.TransientError.General.DatabaseUnavailable", true)]
    #[case("Neo.TransientError.Transaction.DeadlockDetected", true)]
    #[case("Neo.TransientError.Transaction.Terminated", false)]
    #[case("Neo.TransientError.Transaction.LockClientStopped", false)]
    #[case("Neo.ClientError.Statement.SyntaxError", false)]
    #[case("Neo.DatabaseError.General.UnknownError", false)]
    fn test_server_error_retryable(#[case] code: &str, #[case] retryable: bool) {
        assert_eq!(server_error(code).is_retryable(), retryable);
    }

    #[rstest]
    #[case("Neo.ClientError.Cluster.NotALeader")]
    #[case("Neo.ClientError.General.ForbiddenOnReadOnlyDatabase")]
    fn test_writer_errors_remap_to_session_expired(#[case] code: &str) {
        let err = DriverError::from_server_error(server_error(code));
        let DriverError::SessionExpired { source, .. } = &err else {
            panic!("expected SessionExpired, got {err:?}");
        };
        assert_eq!(source.as_ref().map(|e| e.code()), Some(code));
        assert!(err.is_retryable());
    }

    #[rstest]
    fn test_security_errors_not_retryable() {
        let err = DriverError::from_server_error(server_error(
            "Neo.ClientError.Security.Unauthorized",
        ));
        assert!(matches!(err, DriverError::Security { .. }));
        assert!(!err.is_retryable());
    }

    #[rstest]
    fn test_disconnect_during_commit_not_retryable() {
        let err = DriverError::disconnect("socket reset").failed_commit();
        assert!(!err.is_retryable());
        let err = DriverError::disconnect("socket reset");
        assert!(err.is_retryable());
    }

    #[rstest]
    fn test_code_parts() {
        let err = server_error("Neo.ClientError.Statement.SyntaxError");
        assert_eq!(err.classification(), "ClientError");
        assert_eq!(err.category(), "Statement");
        assert_eq!(err.title(), "SyntaxError");
    }
}
