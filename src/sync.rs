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

use std::fmt::Debug;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;

/// Shared cache whose refreshes are funneled through a gate mutex: at most
/// one thread performs the (potentially expensive) refresh, everyone else
/// queues on the gate and then observes the winner's result instead of
/// refreshing again.
#[derive(Debug)]
pub(crate) struct RefreshLock<T: Debug> {
    cache: RwLock<T>,
    refresh_gate: Mutex<()>,
}

impl<T: Debug> RefreshLock<T> {
    pub(crate) fn new(initial: T) -> Self {
        Self {
            cache: RwLock::new(initial),
            refresh_gate: Mutex::new(()),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<T> {
        self.cache.read()
    }

    /// Mutation that doesn't need refresh deduplication (e.g., dropping a
    /// cluster member).
    pub(crate) fn write(&self) -> RwLockWriteGuard<T> {
        self.cache.write()
    }

    /// Make sure the cached value is acceptable, refreshing it if not.
    ///
    /// `is_stale` is evaluated under a read lock; if it demands a refresh,
    /// the caller lines up at the gate, re-checks (the previous gate holder
    /// may already have done the work), and only then runs `refresh` under
    /// the write lock.
    pub(crate) fn ensure<'a>(
        &'a self,
        mut is_stale: impl FnMut(&T) -> bool,
        refresh: impl FnOnce(&mut T) -> Result<()>,
    ) -> Result<RwLockReadGuard<'a, T>> {
        {
            let cached = self.cache.read();
            if !is_stale(&cached) {
                return Ok(cached);
            }
        }
        let _gate = self.refresh_gate.lock();
        {
            let cached = self.cache.read();
            if !is_stale(&cached) {
                return Ok(cached);
            }
        }
        {
            let mut cached = self.cache.write();
            refresh(&mut cached)?;
        }
        Ok(self.cache.read())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_fresh_value_skips_refresh() {
        let lock = RefreshLock::new(1);
        let guard = lock
            .ensure(|_| false, |_| panic!("must not refresh"))
            .unwrap();
        assert_eq!(*guard, 1);
    }

    #[test]
    fn test_stale_value_is_refreshed_once_per_staleness() {
        let lock = RefreshLock::new(0);
        let guard = lock
            .ensure(
                |v| *v == 0,
                |v| {
                    *v = 7;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(*guard, 7);
        drop(guard);
        // now fresh, second call must not trigger the refresh
        let guard = lock
            .ensure(|v| *v == 0, |_| panic!("must not refresh"))
            .unwrap();
        assert_eq!(*guard, 7);
    }

    #[test]
    fn test_contending_threads_observe_single_refresh() {
        let lock = Arc::new(RefreshLock::new(0_usize));
        let refreshes = Arc::new(AtomicUsize::new(0));
        let handles = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let refreshes = Arc::clone(&refreshes);
                thread::spawn(move || {
                    let guard = lock
                        .ensure(
                            |v| *v == 0,
                            |v| {
                                refreshes.fetch_add(1, Ordering::SeqCst);
                                *v = 1;
                                Ok(())
                            },
                        )
                        .unwrap();
                    assert_eq!(*guard, 1);
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }
}
