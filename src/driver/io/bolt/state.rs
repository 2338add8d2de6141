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

use log::debug;

use super::response::{RequestKind, ResponseMeta};
use crate::value::Value;

/// The client's mirror of the server-side connection state.
///
/// Socket-level phases (negotiating, authenticating, closed) are not
/// tracked here: the handshake runs before a tracker exists, and closure
/// is recorded on the connection itself.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ServerState {
    Connected,
    Ready,
    Streaming,
    TxReady,
    // An approximation: the server only returns to TX_READY once *all*
    // result streams of the transaction are consumed. The driver does not
    // count streams, it only needs to know a transaction is open.
    TxStreaming,
    Failed,
    // RESET is on the wire and not yet acknowledged; the server answers
    // everything in between with IGNORED.
    Interrupted,
}

#[derive(Debug)]
pub(crate) struct StateTracker {
    state: ServerState,
}

impl StateTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: ServerState::Connected,
        }
    }

    pub(crate) fn state(&self) -> ServerState {
        self.state
    }

    pub(crate) fn on_success(
        &mut self,
        request: RequestKind,
        meta: &ResponseMeta,
        log_prefix: &str,
    ) {
        if let Some(Value::Boolean(true)) = meta.get("has_more") {
            // the stream continues, no transition
            return;
        }

        use RequestKind::*;
        use ServerState::*;
        let next = match (request, self.state) {
            // RESET's SUCCESS is the only way out of Failed/Interrupted
            (Reset, _) => Ready,
            (_, Failed | Interrupted) => self.state,
            (Hello, Connected) => Ready,
            (Run, Ready) => Streaming,
            (Run, TxReady | TxStreaming) => TxStreaming,
            (Pull | Discard, Streaming) => Ready,
            (Pull | Discard, TxStreaming) => TxStreaming,
            (Begin, Ready) => TxReady,
            (Commit | Rollback, TxReady | TxStreaming) => Ready,
            (request, state) => {
                panic!("SUCCESS for {request:?} cannot occur in state {state:?}")
            }
        };
        if next != self.state {
            debug!("{log_prefix}{request:?}: {:?} > {next:?}", self.state);
            self.state = next;
        }
    }

    pub(crate) fn on_failure(&mut self) {
        // a FAILURE crossing a RESET on the wire does not leave the
        // interrupted state, only the RESET's SUCCESS does
        if self.state != ServerState::Interrupted {
            self.state = ServerState::Failed;
        }
    }

    /// RESET was sent; only its SUCCESS returns the connection to ready.
    pub(crate) fn on_interrupt(&mut self) {
        self.state = ServerState::Interrupted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::macros::hash_map;
    use crate::value;

    fn tracker_in(state: ServerState) -> StateTracker {
        let mut tracker = StateTracker::new();
        tracker.state = state;
        tracker
    }

    fn success(tracker: &mut StateTracker, request: RequestKind, meta: ResponseMeta) {
        tracker.on_success(request, &meta, "");
    }

    #[test]
    fn test_auto_commit_round_trip() {
        let mut tracker = StateTracker::new();
        success(&mut tracker, RequestKind::Hello, hash_map!());
        assert_eq!(tracker.state(), ServerState::Ready);
        success(&mut tracker, RequestKind::Run, hash_map!(
            "fields".to_string() => value!(["x"])
        ));
        assert_eq!(tracker.state(), ServerState::Streaming);
        // a batch with has_more does not end the stream
        success(&mut tracker, RequestKind::Pull, hash_map!(
            "has_more".to_string() => value!(true)
        ));
        assert_eq!(tracker.state(), ServerState::Streaming);
        success(&mut tracker, RequestKind::Pull, hash_map!());
        assert_eq!(tracker.state(), ServerState::Ready);
    }

    #[test]
    fn test_transaction_round_trip() {
        let mut tracker = tracker_in(ServerState::Ready);
        success(&mut tracker, RequestKind::Begin, hash_map!());
        assert_eq!(tracker.state(), ServerState::TxReady);
        success(&mut tracker, RequestKind::Run, hash_map!());
        assert_eq!(tracker.state(), ServerState::TxStreaming);
        success(&mut tracker, RequestKind::Discard, hash_map!());
        assert_eq!(tracker.state(), ServerState::TxStreaming);
        success(&mut tracker, RequestKind::Commit, hash_map!());
        assert_eq!(tracker.state(), ServerState::Ready);
    }

    #[test]
    fn test_failure_until_reset() {
        let mut tracker = tracker_in(ServerState::Streaming);
        tracker.on_failure();
        assert_eq!(tracker.state(), ServerState::Failed);
        tracker.on_interrupt();
        assert_eq!(tracker.state(), ServerState::Interrupted);
        // a FAILURE crossing the RESET on the wire keeps the state
        tracker.on_failure();
        assert_eq!(tracker.state(), ServerState::Interrupted);
        success(&mut tracker, RequestKind::Reset, hash_map!());
        assert_eq!(tracker.state(), ServerState::Ready);
    }

    #[test]
    fn test_stale_success_while_interrupted_is_ignored() {
        let mut tracker = tracker_in(ServerState::Streaming);
        tracker.on_interrupt();
        success(&mut tracker, RequestKind::Pull, hash_map!());
        assert_eq!(tracker.state(), ServerState::Interrupted);
    }
}
