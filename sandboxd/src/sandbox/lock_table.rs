/* -------------------------------------------------------------------------- *\
 *                |   █████╗ ██╗   ██╗██████╗  █████╗ ███████╗ |              *
 *                |  ██╔══██╗██║   ██║██╔══██╗██╔══██╗██╔════╝ |              *
 *                |  ███████║██║   ██║██████╔╝███████║█████╗   |              *
 *                |  ██╔══██║██║   ██║██╔══██╗██╔══██║██╔══╝   |              *
 *                |  ██║  ██║╚██████╔╝██║  ██║██║  ██║███████╗ |              *
 *                |  ╚═╝  ╚═╝ ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝ |              *
 *                +--------------------------------------------+              *
 *                                                                            *
 *                         Distributed Systems Runtime                        *
 * -------------------------------------------------------------------------- *
 * Copyright 2022 - 2024, the aurae contributors                              *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Locks<K> = Arc<Mutex<HashMap<K, Slot>>>;

#[derive(Debug, Default)]
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    // holders plus waiters
    users: usize,
}

/// Keyed mutual exclusion.
///
/// Holders of the same key are serialized, different keys never contend.
/// Entries only live while someone holds or waits on them, including waiters
/// that give up before acquiring.
#[derive(Debug)]
pub(crate) struct LockTable<K> {
    locks: Locks<K>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self { locks: Default::default() }
    }
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    pub async fn lock(&self, key: K) -> LockGuard<K> {
        let mutex = {
            let mut locks =
                self.locks.lock().unwrap_or_else(|poison| poison.into_inner());
            let slot = locks.entry(key.clone()).or_default();
            slot.users += 1;
            slot.mutex.clone()
        };

        // registered before waiting so a dropped waiter still releases its slot
        let mut guard =
            LockGuard { locks: self.locks.clone(), key, guard: None };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

#[derive(Debug)]
pub(crate) struct LockGuard<K: Eq + Hash> {
    locks: Locks<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for LockGuard<K> {
    fn drop(&mut self) {
        let mut locks =
            self.locks.lock().unwrap_or_else(|poison| poison.into_inner());

        drop(self.guard.take());

        let Some(slot) = locks.get_mut(&self.key) else {
            return;
        };
        slot.users = slot.users.saturating_sub(1);
        if slot.users == 0 {
            let _ = locks.remove(&self.key);
        }
    }
}
