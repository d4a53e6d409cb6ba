//! Whitelist of process ids allowed to talk to the proxy.
//!
//! Pids are the only identity signal. The kernel recycles them, so a revoked
//! pid that is later handed to an unrelated process is trusted again once
//! something re-authorizes it, and a pid that was never revoked stays trusted
//! after its process exits.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::Pid;

#[derive(Debug, Default)]
pub struct AccessStore {
    whitelisted: Mutex<HashSet<Pid>>,
}

impl AccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already trusts `pid`, typically the parent that spawned us.
    pub fn bootstrapped(pid: Pid) -> Self {
        let store = Self::new();
        store.authorize(pid, 0);
        store
    }

    /// Trusts `new_pid` and, when `old_pid > 0`, revokes `old_pid` under the
    /// same lock so no reader sees one half of the swap.
    ///
    /// Revoke happens before insert: `authorize(p, p)` leaves `p` trusted.
    pub fn authorize(&self, new_pid: Pid, old_pid: Pid) {
        let mut set = self.lock();
        if old_pid > 0 {
            set.remove(&old_pid);
        }
        set.insert(new_pid);
    }

    pub fn is_authorized(&self, pid: Pid) -> bool {
        self.lock().contains(&pid)
    }

    /// Sorted snapshot of the current whitelist.
    pub fn authorized_pids(&self) -> Vec<Pid> {
        let mut pids: Vec<Pid> = self.lock().iter().copied().collect();
        pids.sort_unstable();
        pids
    }

    // A panic while holding the lock cannot leave the set half-updated.
    fn lock(&self) -> MutexGuard<'_, HashSet<Pid>> {
        self.whitelisted.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
