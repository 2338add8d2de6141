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

//! Replies are matched to requests by order: every request enqueues a
//! [`PendingReply`] naming the request and carrying the strategy object
//! that consumes the server's answer.

use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::error::{DriverError, Result, ServerError};
use crate::value::Value;

pub(crate) type ResponseMeta = HashMap<String, Value>;
pub(crate) type RecordValues = Vec<Value>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum RequestKind {
    Hello,
    Reset,
    Run,
    Pull,
    Discard,
    Begin,
    Commit,
    Rollback,
}

/// What to do with the server's reply to one request.
///
/// Implementations are installed per request (the connection stays generic)
/// and receive exactly one terminal call — `on_success`, `on_failure`, or
/// `on_ignored` — preceded by any number of `on_record` calls for streaming
/// requests.
///
/// Only failure handling is mandatory: every sink has to decide whether a
/// FAILURE surfaces immediately (abort the read loop) or is recorded and
/// dealt with later (streams, transactions).
pub(crate) trait ResponseSink: Send + Sync {
    fn on_success(&mut self, _meta: ResponseMeta) -> Result<()> {
        Ok(())
    }

    fn on_record(&mut self, _values: RecordValues) -> Result<()> {
        // only PULL expects records; everything else treats them as a
        // protocol violation
        Err(DriverError::protocol_error(
            "received RECORD for a request that cannot produce records",
        ))
    }

    fn on_failure(&mut self, error: ServerError) -> Result<()>;

    fn on_ignored(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) type BoxedSink = Box<dyn ResponseSink>;

/// The default strategy: nothing to extract from a SUCCESS, any FAILURE is
/// surfaced to whoever drives the read loop.
pub(crate) struct AbortOnFailure;

impl AbortOnFailure {
    pub(crate) fn boxed() -> BoxedSink {
        Box::new(AbortOnFailure)
    }
}

impl ResponseSink for AbortOnFailure {
    fn on_failure(&mut self, error: ServerError) -> Result<()> {
        Err(error.into())
    }
}

pub(crate) struct PendingReply {
    pub(crate) request: RequestKind,
    pub(crate) sink: BoxedSink,
}

impl Debug for PendingReply {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReply")
            .field("request", &self.request)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_on_failure_surfaces_server_error() {
        let error = ServerError::new(
            "Neo.ClientError.Security.Unauthorized".into(),
            "nope".into(),
        );
        let res = AbortOnFailure.on_failure(error);
        assert!(matches!(res, Err(DriverError::Security { .. })));
    }

    #[test]
    fn test_default_sink_tolerates_success_and_ignored() {
        assert!(AbortOnFailure.on_success(ResponseMeta::new()).is_ok());
        assert!(AbortOnFailure.on_ignored().is_ok());
    }

    #[test]
    fn test_default_sink_rejects_records() {
        let res = AbortOnFailure.on_record(vec![Value::Integer(1)]);
        assert!(matches!(res, Err(DriverError::ProtocolError { .. })));
    }
}
