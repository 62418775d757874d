//! The process-wide pid registry: a single mutex-guarded map plus a
//! monotonic pid counter. Lazily created on first use via `OnceLock`,
//! matching the spec's "process-wide singleton with explicit init/teardown
//! and an interior mutex" guidance rather than exposing ambient global
//! mutable state directly.

use crate::{Pid, ProcessInner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Pids below this are reserved; `0` in particular means "no process /
/// anonymous sender".
const FIRST_PID: u64 = 1000;

pub struct Registry {
    next_pid: AtomicU64,
    processes: Mutex<HashMap<Pid, Arc<ProcessInner>>>,
}

impl Registry {
    fn new() -> Self {
        Registry {
            next_pid: AtomicU64::new(FIRST_PID),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a pid that has never been handed out before and never will
    /// be again for the lifetime of this registry.
    pub fn alloc_pid(&self) -> Pid {
        Pid::new(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register(&self, pid: Pid, process: Arc<ProcessInner>) {
        self.processes.lock().unwrap().insert(pid, process);
    }

    pub fn unregister(&self, pid: Pid) -> Option<Arc<ProcessInner>> {
        self.processes.lock().unwrap().remove(&pid)
    }

    pub fn lookup(&self, pid: Pid) -> Option<Arc<ProcessInner>> {
        self.processes.lock().unwrap().get(&pid).cloned()
    }

    /// Number of currently registered (not necessarily alive) processes.
    pub fn len(&self) -> usize {
        self.processes.lock().unwrap().len()
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Returns the process-wide registry, creating it on first call.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_pids_never_repeat() {
        let reg = Registry::new();
        let a = reg.alloc_pid();
        let b = reg.alloc_pid();
        assert_ne!(a, b);
        assert!(a.get() >= FIRST_PID);
    }
}
