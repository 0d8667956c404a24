//! Process identity resolution
//!
//! Maps a pid to the short command name of its process. Live processes are
//! read from the process table; processes that exited before their events
//! were decoded are recovered from the dead-process table the kernel-side
//! exit probes maintain. Every outcome, including an empty name, is cached in
//! a bounded LRU so a pid costs at most one round of lookups while it stays
//! cached.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use tracing::trace;

use crate::linux_proc::{comm_from_snapshot, COMM_LEN};

/// Number of pids kept in the identity cache
pub const IDENTITY_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(64) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Source of names for running processes
pub trait ProcessTable: Send + Sync {
    /// Short command name of a running process, `None` when the process is
    /// gone or its metadata cannot be read
    fn comm(&self, pid: u32) -> Option<String>;
}

/// Read-only view of the kernel-maintained dead-process table
pub trait DeadPidTable: Send + Sync {
    /// Comm snapshot taken when `pid` exited
    fn lookup(&self, pid: u32) -> Option<[u8; COMM_LEN]>;
}

/// pid to process name resolver with a bounded cache
pub struct ProcessResolver {
    live: Box<dyn ProcessTable>,
    dead: Box<dyn DeadPidTable>,
    cache: Mutex<LruCache<u32, String>>,
}

impl ProcessResolver {
    pub fn new(live: impl ProcessTable + 'static, dead: impl DeadPidTable + 'static) -> Self {
        Self::with_capacity(live, dead, IDENTITY_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        live: impl ProcessTable + 'static,
        dead: impl DeadPidTable + 'static,
        capacity: NonZeroUsize,
    ) -> Self {
        Self {
            live: Box::new(live),
            dead: Box::new(dead),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Resolve `pid` to a process name, `""` when no source knows it
    ///
    /// The lookup runs outside the cache lock, so two callers missing on the
    /// same pid at once may both hit the sources. Both store the same name.
    pub fn resolve(&self, pid: u32) -> String {
        if let Some(name) = self.cache.lock().get(&pid) {
            return name.clone();
        }

        let name = self.lookup(pid);
        self.cache.lock().put(pid, name.clone());
        name
    }

    fn lookup(&self, pid: u32) -> String {
        if let Some(name) = self.live.comm(pid) {
            return name;
        }

        match self.dead.lookup(pid) {
            Some(snapshot) => {
                let name = comm_from_snapshot(&snapshot);
                trace!(pid, name = %name, "resolved exited process");
                name
            }
            None => {
                trace!(pid, "process name unresolved");
                String::new()
            }
        }
    }

    /// Cached name for `pid`, without touching its recency
    pub fn cached(&self, pid: u32) -> Option<String> {
        self.cache.lock().peek(&pid).cloned()
    }

    /// Number of cached pids
    pub fn cached_len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// In-memory process table counting its lookups
    #[derive(Clone, Default)]
    pub struct FakeProcessTable {
        pub names: Arc<Mutex<HashMap<u32, String>>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeProcessTable {
        pub fn with(entries: &[(u32, &str)]) -> Self {
            let table = Self::default();
            for (pid, name) in entries {
                table.names.lock().insert(*pid, name.to_string());
            }
            table
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ProcessTable for FakeProcessTable {
        fn comm(&self, pid: u32) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.names.lock().get(&pid).cloned()
        }
    }

    /// In-memory dead-process table counting its lookups
    #[derive(Clone, Default)]
    pub struct FakeDeadPids {
        pub entries: Arc<Mutex<HashMap<u32, [u8; COMM_LEN]>>>,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeDeadPids {
        /// Record an exit the way the kernel-side exit probe does
        pub fn record_exit(&self, pid: u32, comm: &str) {
            let mut snapshot = [0u8; COMM_LEN];
            let len = comm.len().min(COMM_LEN);
            snapshot[..len].copy_from_slice(&comm.as_bytes()[..len]);
            self.entries.lock().insert(pid, snapshot);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DeadPidTable for FakeDeadPids {
        fn lookup(&self, pid: u32) -> Option<[u8; COMM_LEN]> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entries.lock().get(&pid).copied()
        }
    }
}
