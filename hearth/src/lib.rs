//! `hearth` is a single-host, BEAM-style process runtime: a cooperative
//! user-space task engine, thread-safe FIFO channels, and isolated actor
//! processes — linked and monitored into supervision trees — built on top
//! of them.
//!
//! The hard engineering lives in four small crates, each usable on its own:
//!
//! - [`deadline`]: monotonic absolute timestamps, used everywhere a timeout
//!   appears.
//! - [`task`]: the stack-switched, cooperatively-scheduled "green task" and
//!   its thread-local FIFO scheduler.
//! - [`chan`]: a bounded/unbounded FIFO channel with deadline-aware
//!   send/recv.
//! - [`process`]: an actor — pid, arena, mailbox, link/monitor graph —
//!   layered on a [`task`] and a [`chan`]-shaped mailbox.
//!
//! This crate re-exports the types application code actually spawns and
//! passes around, and adds the thin conveniences (a [`Runtime`] that bundles
//! a [`RuntimeConfig`], a [`join`] that doesn't make the caller reach into
//! `task` for a task handle) that turn the four crates into one runtime.
//!
//! A scheduler — and everything spawned on it — binds to exactly one OS
//! thread. Scaling across cores means running one [`Runtime`] per thread,
//! each with its own scheduler; processes on different threads talk only
//! through mailboxes and channels, never through raw shared state.

pub use chan::{
    Chan, Closed, ForceSendOutcome, RecvOutcome, SendOutcome, TryRecvOutcome, TrySendOutcome,
};
pub use deadline::{Deadline, clamp_poll_timeout_ms, now_ns};
pub use process::{
    Arena, ArenaStats, BumpArena, Codec, CodecError, ExitInfo, ExitNotice, ExitReason,
    IdentityCodec, Pid, ProcessError, ProcessFlags, ProcessHandle, ProcessState, RecvResult,
    RuntimeConfig, SpawnOptions,
};
pub use task::{SchedulerConfig, TaskError, TaskHandle, TaskState};

use std::sync::Arc;

/// A spawner bound to a [`RuntimeConfig`]. Cheaply cloned; every clone
/// spawns processes with the same stack/arena/mailbox defaults.
///
/// A `Runtime` does not itself own a scheduler — the scheduler is the
/// thread-local the [`task`] crate maintains — so every process spawned
/// through a given `Runtime` must be driven (via [`join`] or
/// [`task::resume`]) from the same OS thread it was spawned from.
#[derive(Clone)]
pub struct Runtime {
    config: Arc<RuntimeConfig>,
}

impl Runtime {
    /// Builds a runtime that spawns processes with `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime {
            config: Arc::new(config),
        }
    }

    /// The configuration this runtime spawns processes with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawns a new process on the calling thread's scheduler. See
    /// [`process::spawn`] for the full contract.
    pub fn spawn<F>(&self, entry: F, opts: SpawnOptions) -> ProcessHandle
    where
        F: FnOnce() + 'static,
    {
        process::spawn(entry, &self.config, opts)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new(RuntimeConfig::default())
    }
}

/// Returns the process the calling task is running as, or `None` outside of
/// any process's trampoline.
#[must_use]
pub fn current() -> Option<ProcessHandle> {
    process::current()
}

/// Looks up a process by pid, regardless of whether it is still alive.
#[must_use]
pub fn lookup(pid: Pid) -> Option<ProcessHandle> {
    process::lookup(pid)
}

/// Drives the calling thread's scheduler cooperatively until `p`'s task
/// reaches a terminal state. Thin sugar over [`task::join`] for callers
/// holding only a [`ProcessHandle`].
///
/// # Errors
///
/// Returns [`TaskError::Deadlock`] if the ready queue empties out before `p`
/// terminates — the same condition [`task::join`] reports.
pub fn join(p: &ProcessHandle) -> Result<(), TaskError> {
    task::join(p.task_handle())
}

/// Cooperatively yields the calling task back to the scheduler. A no-op
/// outside of any task.
pub fn yield_now() {
    task::yield_now();
}

/// Requests cooperative cancellation of `p`'s underlying task. See
/// [`task::TaskHandle::cancel`] for the exact semantics: the task is not
/// interrupted mid-flight, only skipped the next time the scheduler would
/// otherwise have resumed it.
pub fn cancel(p: &ProcessHandle) {
    task::cancel(p.task_handle());
}
