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

//! All wall-clock reads go through this type, and most of its users treat a
//! point in time as a *deadline*, so that is the API it leans towards.

use std::ops::Add;
use std::time::{Duration, Instant as StdInstant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Instant {
    inner: StdInstant,
}

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Self {
            inner: StdInstant::now(),
        }
    }

    /// Time passed since this instant.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.inner.elapsed()
    }

    /// Time left until this instant, zero once it has passed.
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.inner.saturating_duration_since(StdInstant::now())
    }

    /// Escape hatch for APIs that insist on [`std::time::Instant`]
    /// (e.g., condvar waits).
    #[inline]
    pub fn into_std(self) -> StdInstant {
        self.inner
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, duration: Duration) -> Self::Output {
        Self {
            inner: self.inner + duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_is_zero_for_past_deadlines() {
        let deadline = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_remaining_counts_down() {
        let deadline = Instant::now() + Duration::from_secs(60);
        let remaining = deadline.remaining();
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));
    }
}
