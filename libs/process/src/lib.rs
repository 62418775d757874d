//! Actor-style processes: identity, an isolated arena, a mailbox, and
//! supervised links/monitors, layered on top of the [`task`] engine's
//! cooperative scheduling and the [`chan`] crate's mailbox primitive.
//!
//! A process is not an OS process. It is a [`task::TaskHandle`] plus the
//! bookkeeping BEAM-style actor systems need on top of a bare task: a
//! globally unique, never-reused [`Pid`]; an optional private [`Arena`];
//! a bounded, drop-oldest mailbox; and a link/monitor graph that turns one
//! process crashing into exit signals for its peers.

mod arena;
mod codec;
mod registry;

pub use arena::{Arena, ArenaStats, BumpArena};
pub use codec::{Codec, CodecError, IdentityCodec};

use bitflags::bitflags;
use chan::{Chan, ForceSendOutcome, RecvOutcome, TryRecvOutcome};
use deadline::Deadline;
use registry::registry;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use thiserror::Error;
use util::CachePadded;

/// Opaque process identifier. `0` is reserved for "no process / anonymous
/// sender"; real pids start at 1000 and are never reused within the
/// lifetime of the registry that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u64);

impl Pid {
    /// The reserved "no process" sentinel.
    pub const NONE: Pid = Pid(0);

    fn new(raw: u64) -> Self {
        Pid(raw)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Per-process flags, set at spawn time and immutable afterward.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcessFlags: u8 {
        /// A system process; conventionally exempt from user-level kill sweeps
        /// (the core itself does not special-case this beyond carrying it).
        const SYSTEM = 0b0001;
        /// Exit signals from linked peers are delivered as messages to this
        /// process's exit handler instead of cascading a crash.
        const TRAP_EXIT = 0b0010;
        /// Excluded from process listings/introspection aimed at end users.
        const HIDDEN = 0b0100;
        /// No arena is created for this process; all allocation is ordinary
        /// heap allocation.
        const HEAP_ONLY = 0b1000;
    }
}

/// Lifecycle state of a [`ProcessHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    New,
    Ready,
    Running,
    Suspended,
    Done,
    Crashed,
    Killed,
}

impl ProcessState {
    /// A process is alive iff it is READY, RUNNING, or SUSPENDED.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            ProcessState::Ready | ProcessState::Running | ProcessState::Suspended
        )
    }

    /// DONE, CRASHED, and KILLED are sticky terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Done | ProcessState::Crashed | ProcessState::Killed
        )
    }

    fn terminal_for(reason: &ExitReason) -> Self {
        match reason {
            ExitReason::Normal => ProcessState::Done,
            ExitReason::Kill => ProcessState::Killed,
            ExitReason::Error(_) => ProcessState::Crashed,
        }
    }
}

/// Why a process exited.
#[derive(Debug, Clone)]
pub enum ExitReason {
    Normal,
    Kill,
    Error(String),
}

/// `{reason, data bytes, timestamp}`, recorded the moment a process leaves
/// RUNNING/SUSPENDED for a terminal state.
#[derive(Debug, Clone)]
pub struct ExitInfo {
    pub reason: ExitReason,
    pub data: Option<Box<[u8]>>,
    pub at_ns: i64,
}

/// Delivered to an exit handler: either a cascaded link notification
/// (`monitor_ref: None`) or a one-shot monitor firing (`monitor_ref: Some`).
pub struct ExitNotice {
    pub from: Pid,
    pub reason: ExitReason,
    pub data: Option<Box<[u8]>>,
    pub monitor_ref: Option<u64>,
}

type ExitHandler = Box<dyn FnMut(ExitNotice) + Send>;

struct MailboxEntry {
    bytes: Vec<u8>,
    sender: Pid,
    #[allow(dead_code, reason = "carried for parity with the spec's mailbox entry, not yet queried")]
    at_ns: i64,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("target process is not alive")]
    NotAlive,
    #[error("a process cannot link to itself")]
    SelfLink,
    #[error("a process cannot monitor itself")]
    SelfMonitor,
    #[error("process did not reach a terminal state within the destroy timeout")]
    DestroyTimedOut,
}

/// Outcome of [`ProcessHandle::recv`].
pub enum RecvResult {
    Item { bytes: Vec<u8>, sender: Pid },
    TimedOut,
    /// The process is not alive, or the codec failed to deserialize the
    /// message; either way no message is returned.
    Error,
}

/// Configuration shared by every process spawned with it. Mirrors the
/// spec's defaults: a 256 KiB task stack, a 1024-entry mailbox, and a 4 MiB
/// arena.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub default_stack_size: usize,
    pub default_arena_size: usize,
    pub default_mailbox_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            default_stack_size: task::DEFAULT_STACK_SIZE,
            default_arena_size: 4 * 1024 * 1024,
            default_mailbox_capacity: 1024,
        }
    }
}

/// Per-spawn overrides layered on top of a [`RuntimeConfig`].
pub struct SpawnOptions {
    pub name: String,
    pub parent: Option<Pid>,
    pub flags: ProcessFlags,
    pub arena_size: Option<usize>,
    pub mailbox_capacity: Option<usize>,
    pub stack_size: Option<usize>,
    pub codec: Option<Arc<dyn Codec>>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        SpawnOptions {
            name: String::new(),
            parent: None,
            flags: ProcessFlags::empty(),
            arena_size: None,
            mailbox_capacity: None,
            stack_size: None,
            codec: None,
        }
    }
}

struct ProcessInner {
    pid: Pid,
    name: String,
    flags: ProcessFlags,
    state: Mutex<ProcessState>,
    state_condvar: Condvar,
    task: task::TaskHandle,
    arena: Option<Arc<dyn Arena>>,
    mailbox: Chan<MailboxEntry>,
    parent: Option<Pid>,
    /// Symmetric bidirectional links, in the order they were established;
    /// exit notifications fan out in this order, per the spec's ordering
    /// guarantee for a single exiter's peers.
    links: Mutex<Vec<Pid>>,
    /// `(ref, target)` pairs for monitors this process established on
    /// others.
    monitors: Mutex<Vec<(u64, Pid)>>,
    /// `(ref, observer)` pairs others hold on this process.
    monitored_by: Mutex<Vec<(u64, Pid)>>,
    exit_info: Mutex<Option<ExitInfo>>,
    exit_handler: Mutex<Option<ExitHandler>>,
    codec: Arc<dyn Codec>,
    #[allow(dead_code, reason = "queryable timestamp, not yet exposed as an accessor")]
    created_at_ns: i64,
    started_at_ns: Mutex<Option<i64>>,
    /// Touched on every send/recv, possibly from several threads at once
    /// (a process's sender set is unbounded); cache-padded to keep that
    /// traffic from bouncing the cache line out from under unrelated
    /// `ProcessInner` fields, the same tradeoff the scheduler's per-task
    /// counters make.
    message_count: CachePadded<AtomicU64>,
    sent_count: CachePadded<AtomicU64>,
    peak_mailbox_size: CachePadded<AtomicUsize>,
}

/// A handle to a spawned process. Cloning shares the same underlying
/// process; the process itself is owned by the global registry until
/// [`ProcessHandle::destroy`] unregisters it.
#[derive(Clone)]
pub struct ProcessHandle(Arc<ProcessInner>);

impl PartialEq for ProcessHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

static NEXT_MONITOR_REF: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_PROCESS: RefCell<Option<ProcessHandle>> = const { RefCell::new(None) };
}

impl ProcessHandle {
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.0.pid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn flags(&self) -> ProcessFlags {
        self.0.flags
    }

    #[must_use]
    pub fn parent(&self) -> Option<Pid> {
        self.0.parent
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *self.0.state.lock().unwrap()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    #[must_use]
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.0
            .exit_info
            .lock()
            .unwrap()
            .as_ref()
            .map(|info| info.reason.clone())
    }

    #[must_use]
    pub fn arena(&self) -> Option<&Arc<dyn Arena>> {
        self.0.arena.as_ref()
    }

    #[must_use]
    pub fn task_handle(&self) -> &task::TaskHandle {
        &self.0.task
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.0.links.lock().unwrap().len()
    }

    #[must_use]
    pub fn monitor_count(&self) -> usize {
        self.0.monitors.lock().unwrap().len()
    }

    #[must_use]
    pub fn message_count(&self) -> u64 {
        self.0.message_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn sent_count(&self) -> u64 {
        self.0.sent_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_mailbox_size(&self) -> usize {
        self.0.peak_mailbox_size.load(Ordering::Relaxed)
    }

    /// Installs the exit handler invoked for cascaded link notifications and
    /// one-shot monitor firings targeting this process. Replaces any
    /// previously installed handler.
    pub fn set_exit_handler<F>(&self, handler: F)
    where
        F: FnMut(ExitNotice) + Send + 'static,
    {
        *self.0.exit_handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Links this process with `other`. Symmetric: each gains the other in
    /// its link set. A no-op on a self-link attempt, reported as an error.
    pub fn link(&self, other: &ProcessHandle) -> Result<(), ProcessError> {
        if self.pid() == other.pid() {
            return Err(ProcessError::SelfLink);
        }
        push_unique(&self.0.links, other.pid());
        push_unique(&other.0.links, self.pid());
        Ok(())
    }

    /// Removes a previously established link in both directions. Returns
    /// whether a link actually existed.
    pub fn unlink(&self, other: &ProcessHandle) -> bool {
        let here = remove_first(&self.0.links, other.pid());
        let there = remove_first(&other.0.links, self.pid());
        here || there
    }

    /// Establishes a one-way monitor on `target`, returning a reference that
    /// uniquely identifies this monitor for its single firing.
    pub fn monitor(&self, target: &ProcessHandle) -> Result<u64, ProcessError> {
        if self.pid() == target.pid() {
            return Err(ProcessError::SelfMonitor);
        }
        let monitor_ref = NEXT_MONITOR_REF.fetch_add(1, Ordering::Relaxed);
        self.0.monitors.lock().unwrap().push((monitor_ref, target.pid()));
        target
            .0
            .monitored_by
            .lock()
            .unwrap()
            .push((monitor_ref, self.pid()));
        Ok(monitor_ref)
    }

    /// Sends `bytes` to this process's mailbox, with `sender` recorded as
    /// the originating pid (use [`Pid::NONE`] for anonymous senders).
    /// Rejected outright if this process is not alive. A full mailbox drops
    /// its oldest entry to make room rather than blocking the caller.
    pub fn send(&self, bytes: &[u8], sender: Pid) -> Result<(), ProcessError> {
        if !self.is_alive() {
            return Err(ProcessError::NotAlive);
        }
        let blob = self.0.codec.serialize(bytes, sender, self.pid());
        let entry = MailboxEntry {
            bytes: blob,
            sender,
            at_ns: deadline::now_ns(),
        };
        let result = match self.0.mailbox.send_force(entry) {
            ForceSendOutcome::Closed(_) => Err(ProcessError::NotAlive),
            ForceSendOutcome::Sent => {
                self.record_enqueued();
                Ok(())
            }
            ForceSendOutcome::SentEvicting(_) => {
                tracing::warn!(pid = %self.pid(), "mailbox full, dropped oldest message");
                self.record_enqueued();
                Ok(())
            }
        };
        if result.is_ok() && sender != Pid::NONE {
            if let Some(sender) = registry().lookup(sender) {
                sender.sent_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }

    fn record_enqueued(&self) {
        self.0.message_count.fetch_add(1, Ordering::Relaxed);
        self.0
            .peak_mailbox_size
            .fetch_max(self.0.mailbox.len(), Ordering::Relaxed);
    }

    /// Receives the next message. `timeout_ms == 0` polls without blocking,
    /// `< 0` blocks indefinitely, `> 0` blocks up to that many milliseconds.
    /// While parked on an empty mailbox the process is reported as
    /// SUSPENDED; it returns to RUNNING as soon as a message arrives, the
    /// deadline elapses, or the process dies.
    pub fn recv(&self, timeout_ms: i64) -> RecvResult {
        let suspended = self.enter_suspended();
        let result = if timeout_ms == 0 {
            match self.0.mailbox.try_recv() {
                TryRecvOutcome::Item(entry) => self.finish_recv(entry),
                TryRecvOutcome::Empty => RecvResult::TimedOut,
                TryRecvOutcome::Closed => RecvResult::Error,
            }
        } else {
            let deadline = if timeout_ms < 0 {
                Deadline::NONE
            } else {
                Deadline::from_ms(timeout_ms)
            };
            match self.0.mailbox.recv_deadline(deadline) {
                RecvOutcome::Item(entry) => self.finish_recv(entry),
                RecvOutcome::Closed => RecvResult::Error,
                RecvOutcome::TimedOut => RecvResult::TimedOut,
            }
        };
        if suspended {
            self.leave_suspended();
        }
        result
    }

    fn finish_recv(&self, entry: MailboxEntry) -> RecvResult {
        match self.0.codec.deserialize(entry.bytes) {
            Ok(bytes) => RecvResult::Item {
                bytes,
                sender: entry.sender,
            },
            Err(_) => RecvResult::Error,
        }
    }

    fn enter_suspended(&self) -> bool {
        let mut state = self.0.state.lock().unwrap();
        if *state == ProcessState::Running {
            *state = ProcessState::Suspended;
            true
        } else {
            false
        }
    }

    fn leave_suspended(&self) {
        let mut state = self.0.state.lock().unwrap();
        if *state == ProcessState::Suspended {
            *state = ProcessState::Running;
        }
    }

    /// Crashes this process with the given reason, firing exit signals to
    /// its links/monitors. A no-op if the process is already terminal.
    ///
    /// Because this runtime is cooperative rather than preemptive, calling
    /// this from outside the process's own task only updates its bookkeeping
    /// and fires notifications immediately; if the process is actively
    /// executing on its scheduler thread, that execution is not interrupted
    /// and keeps running until its next suspension point.
    pub fn crash(&self, reason: ExitReason, data: Option<Box<[u8]>>) {
        send_exit(&self.0, reason, data);
    }

    /// Issues an exit signal, waits up to 5 seconds for the process to reach
    /// a terminal state, then drains its mailbox and unregisters it from the
    /// registry. Safe to call exactly once per process.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::DestroyTimedOut`] if the process has not
    /// terminated within 5 seconds (only possible if something external is
    /// keeping its task alive without ever reaching a suspension point).
    pub fn destroy(self, reason: ExitReason) -> Result<(), ProcessError> {
        send_exit(&self.0, reason, None);

        let timeout = std::time::Duration::from_secs(5);
        let mut state = self.0.state.lock().unwrap();
        let wait_until = std::time::Instant::now() + timeout;
        while !state.is_terminal() {
            let now = std::time::Instant::now();
            if now >= wait_until {
                return Err(ProcessError::DestroyTimedOut);
            }
            let (guard, _) = self
                .0
                .state_condvar
                .wait_timeout(state, wait_until - now)
                .unwrap();
            state = guard;
        }
        drop(state);

        self.0.mailbox.close();
        while let TryRecvOutcome::Item(_) = self.0.mailbox.try_recv() {}

        registry().unregister(self.0.pid);
        tracing::debug!(pid = %self.0.pid, "process destroyed");
        Ok(())
    }
}

fn push_unique(set: &Mutex<Vec<Pid>>, pid: Pid) {
    let mut set = set.lock().unwrap();
    if !set.contains(&pid) {
        set.push(pid);
    }
}

fn remove_first(set: &Mutex<Vec<Pid>>, pid: Pid) -> bool {
    let mut set = set.lock().unwrap();
    if let Some(index) = set.iter().position(|&p| p == pid) {
        set.remove(index);
        true
    } else {
        false
    }
}

/// Spawns a new process whose task entry is `entry`. Registration happens
/// before the task is ever driven, so `entry` can safely call
/// [`current`] from its very first line.
pub fn spawn<F>(entry: F, config: &RuntimeConfig, opts: SpawnOptions) -> ProcessHandle
where
    F: FnOnce() + 'static,
{
    let pid = registry().alloc_pid();

    let arena: Option<Arc<dyn Arena>> = if opts.flags.contains(ProcessFlags::HEAP_ONLY) {
        None
    } else {
        let size = opts.arena_size.unwrap_or(config.default_arena_size);
        Some(Arc::new(BumpArena::new(size, false)))
    };

    let mailbox = Chan::new(opts.mailbox_capacity.unwrap_or(config.default_mailbox_capacity));
    let codec = opts.codec.unwrap_or_else(|| Arc::new(IdentityCodec));
    let stack_size = opts.stack_size.unwrap_or(config.default_stack_size);

    // The task's entry closure needs a `ProcessHandle` that does not exist
    // until after the task itself is spawned; `task::spawn` hands back a
    // `TaskHandle` immediately but only ever *runs* the closure on a later,
    // explicit scheduler-driving call (`task::join`/`task::resume`), so
    // publishing the handle into this cell before returning from `spawn`
    // is race-free on a single thread.
    let handle_cell: Arc<std::sync::OnceLock<ProcessHandle>> = Arc::new(std::sync::OnceLock::new());
    let handle_cell_for_closure = handle_cell.clone();
    let entry = Box::new(entry);
    let task = task::spawn(
        move || {
            let handle = handle_cell_for_closure
                .get()
                .expect("process handle is published before the task is ever scheduled")
                .clone();
            trampoline(handle, entry);
        },
        stack_size,
    );

    let inner = Arc::new(ProcessInner {
        pid,
        name: opts.name,
        flags: opts.flags,
        state: Mutex::new(ProcessState::New),
        state_condvar: Condvar::new(),
        task,
        arena,
        mailbox,
        parent: opts.parent,
        links: Mutex::new(Vec::new()),
        monitors: Mutex::new(Vec::new()),
        monitored_by: Mutex::new(Vec::new()),
        exit_info: Mutex::new(None),
        exit_handler: Mutex::new(None),
        codec,
        created_at_ns: deadline::now_ns(),
        started_at_ns: Mutex::new(None),
        message_count: CachePadded(AtomicU64::new(0)),
        sent_count: CachePadded(AtomicU64::new(0)),
        peak_mailbox_size: CachePadded(AtomicUsize::new(0)),
    });

    let handle = ProcessHandle(inner);
    handle_cell
        .set(handle.clone())
        .unwrap_or_else(|_| unreachable!("handle_cell is set exactly once"));
    *handle.0.state.lock().unwrap() = ProcessState::Ready;
    registry().register(pid, handle.0.clone());
    tracing::debug!(pid = %pid, "process spawned");
    handle
}

fn trampoline(handle: ProcessHandle, entry: Box<dyn FnOnce()>) {
    *handle.0.state.lock().unwrap() = ProcessState::Running;
    *handle.0.started_at_ns.lock().unwrap() = Some(deadline::now_ns());
    CURRENT_PROCESS.with(|c| *c.borrow_mut() = Some(handle.clone()));
    tracing::trace!(pid = %handle.pid(), "process running");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry));

    CURRENT_PROCESS.with(|c| *c.borrow_mut() = None);

    let reason = match result {
        Ok(()) => ExitReason::Normal,
        Err(payload) => {
            let message = panic_message(&payload);
            tracing::warn!(pid = %handle.pid(), message, "process crashed");
            ExitReason::Error(message)
        }
    };
    send_exit(&handle.0, reason, None);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "process panicked with a non-string payload".to_string()
    }
}

/// The shared core of crash/destroy/normal-return termination: transitions
/// `origin` to its terminal state (a no-op if it is already terminal) and
/// fans exit signals out across its links and monitors, breadth-first so a
/// cascade through a deep or cyclic supervision tree never recurses.
///
/// A process not yet scheduled (NEW/READY) is a valid target, not just a
/// running or suspended one: §4.4.7's state diagram shows "destroy before
/// first schedule" landing directly on a terminal state, so this only
/// refuses processes that are already DONE/CRASHED/KILLED.
fn send_exit(origin: &Arc<ProcessInner>, reason: ExitReason, data: Option<Box<[u8]>>) {
    let mut queue: VecDeque<(Arc<ProcessInner>, ExitReason, Option<Box<[u8]>>)> = VecDeque::new();
    queue.push_back((origin.clone(), reason, data));

    while let Some((process, reason, data)) = queue.pop_front() {
        {
            let mut state = process.state.lock().unwrap();
            if state.is_terminal() {
                continue;
            }
            *state = ProcessState::terminal_for(&reason);
        }
        *process.exit_info.lock().unwrap() = Some(ExitInfo {
            reason: reason.clone(),
            data: data.clone(),
            at_ns: deadline::now_ns(),
        });
        process.state_condvar.notify_all();
        // Closing the mailbox here is purely a wakeup signal for blocked
        // `recv` callers; they check liveness before trusting "closed".
        process.mailbox.close();
        tracing::debug!(pid = %process.pid, ?reason, "process exited");

        let peers: Vec<Pid> = process.links.lock().unwrap().clone();
        for peer_pid in peers {
            let Some(peer) = registry().lookup(peer_pid) else {
                continue;
            };
            if !peer.state.lock().unwrap().is_alive() {
                continue;
            }
            if peer.flags.contains(ProcessFlags::TRAP_EXIT) {
                deliver_exit(&peer, process.pid, reason.clone(), data.clone(), None);
            } else if !matches!(reason, ExitReason::Normal) {
                queue.push_back((peer, reason.clone(), data.clone()));
            }
        }

        let observers: Vec<(u64, Pid)> = process.monitored_by.lock().unwrap().drain(..).collect();
        for (monitor_ref, observer_pid) in observers {
            if let Some(observer) = registry().lookup(observer_pid) {
                observer
                    .monitors
                    .lock()
                    .unwrap()
                    .retain(|&(r, _)| r != monitor_ref);
                deliver_exit(
                    &observer,
                    process.pid,
                    reason.clone(),
                    data.clone(),
                    Some(monitor_ref),
                );
            }
        }
    }
}

fn deliver_exit(
    observer: &Arc<ProcessInner>,
    from: Pid,
    reason: ExitReason,
    data: Option<Box<[u8]>>,
    monitor_ref: Option<u64>,
) {
    if let Some(handler) = observer.exit_handler.lock().unwrap().as_mut() {
        handler(ExitNotice {
            from,
            reason,
            data,
            monitor_ref,
        });
    }
}

/// Returns the process the calling task is running as, or `None` outside of
/// any process's trampoline.
#[must_use]
pub fn current() -> Option<ProcessHandle> {
    CURRENT_PROCESS.with(|c| c.borrow().clone())
}

/// Looks up a process by pid, regardless of whether it is still alive.
#[must_use]
pub fn lookup(pid: Pid) -> Option<ProcessHandle> {
    registry().lookup(pid).map(ProcessHandle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;
    use std::sync::atomic::AtomicBool;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            default_stack_size: 0,
            default_arena_size: 4096,
            default_mailbox_capacity: 4,
        }
    }

    #[test]
    fn spawn_assigns_unique_pids_starting_at_1000() {
        let cfg = config();
        let a = spawn(|| {}, &cfg, SpawnOptions::default());
        let b = spawn(|| {}, &cfg, SpawnOptions::default());
        assert_ne!(a.pid(), b.pid());
        assert!(a.pid().get() >= 1000);
        task::join(a.task_handle()).unwrap();
        task::join(b.task_handle()).unwrap();
    }

    #[test]
    fn heap_only_processes_have_no_arena() {
        let cfg = config();
        let mut opts = SpawnOptions::default();
        opts.flags = ProcessFlags::HEAP_ONLY;
        let p = spawn(|| {}, &cfg, opts);
        assert!(p.arena().is_none());
        task::join(p.task_handle()).unwrap();
    }

    #[test]
    fn send_then_recv_round_trips_under_identity_codec() {
        let cfg = config();
        let p = spawn(
            || {
                let me = current().unwrap();
                match me.recv(1000) {
                    RecvResult::Item { bytes, .. } => assert_eq!(bytes, b"hello"),
                    _ => panic!("expected a message"),
                }
            },
            &cfg,
            SpawnOptions::default(),
        );
        p.send(b"hello", Pid::NONE).unwrap();
        task::join(p.task_handle()).unwrap();
        assert_eq!(p.message_count(), 1);
    }

    #[test]
    fn send_increments_sender_sent_count() {
        let cfg = config();
        let receiver = spawn(|| task::yield_now(), &cfg, SpawnOptions::default());
        let sender = spawn(|| {}, &cfg, SpawnOptions::default());
        task::join(sender.task_handle()).unwrap();
        receiver.send(b"hi", sender.pid()).unwrap();
        assert_eq!(sender.sent_count(), 1);
        assert_eq!(receiver.message_count(), 1);
        task::cancel(receiver.task_handle());
        task::join(receiver.task_handle()).unwrap();
    }

    #[test]
    fn full_mailbox_drops_oldest_entry() {
        let cfg = config();
        let mut opts = SpawnOptions::default();
        opts.mailbox_capacity = Some(2);
        let p = spawn(|| task::yield_now(), &cfg, opts);
        p.send(b"a", Pid::NONE).unwrap();
        p.send(b"b", Pid::NONE).unwrap();
        p.send(b"c", Pid::NONE).unwrap();
        match p.recv(0) {
            RecvResult::Item { bytes, .. } => assert_eq!(bytes, b"b"),
            _ => panic!("expected the second message, the first was evicted"),
        }
        task::join(p.task_handle()).unwrap();
    }

    #[test]
    fn untrapped_exit_cascades_to_linked_peer() {
        let cfg = config();
        let b = spawn(|| task::yield_now(), &cfg, SpawnOptions::default());
        let a = spawn(|| task::yield_now(), &cfg, SpawnOptions::default());
        a.link(&b).unwrap();
        b.crash(ExitReason::Error("boom".into()), None);
        assert_eq!(b.state(), ProcessState::Crashed);
        assert_eq!(a.state(), ProcessState::Crashed);
        task::cancel(a.task_handle());
        task::cancel(b.task_handle());
        task::join(a.task_handle()).unwrap();
        task::join(b.task_handle()).unwrap();
    }

    #[test]
    fn trapped_exit_is_delivered_instead_of_cascading() {
        let cfg = config();
        let b = spawn(|| task::yield_now(), &cfg, SpawnOptions::default());
        let mut opts = SpawnOptions::default();
        opts.flags = ProcessFlags::TRAP_EXIT;
        let a = spawn(|| task::yield_now(), &cfg, opts);
        a.link(&b).unwrap();

        let observed: Rc<StdRefCell<Option<(Pid, bool)>>> = Rc::new(StdRefCell::new(None));
        let observed_in_handler = observed.clone();
        // Safety of capturing a non-`Send` `Rc` here is fine: the handler is
        // invoked synchronously on this same thread from within `crash`.
        let handler = move |notice: ExitNotice| {
            *observed_in_handler.borrow_mut() =
                Some((notice.from, matches!(notice.reason, ExitReason::Error(_))));
        };
        // `set_exit_handler` requires `Send`; route through an `AtomicBool`
        // guard instead of smuggling the `Rc` directly to keep the test
        // honest about thread-safety.
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_handler = fired.clone();
        a.set_exit_handler(move |notice: ExitNotice| {
            handler(notice);
            fired_in_handler.store(true, Ordering::SeqCst);
        });

        b.crash(ExitReason::Error("boom".into()), None);

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(observed.borrow().unwrap(), (b.pid(), true));
        assert!(a.is_alive());

        task::cancel(a.task_handle());
        task::cancel(b.task_handle());
        task::join(a.task_handle()).unwrap();
        task::join(b.task_handle()).unwrap();
    }

    #[test]
    fn monitor_fires_exactly_once() {
        let cfg = config();
        let b = spawn(|| {}, &cfg, SpawnOptions::default());
        let a = spawn(|| task::yield_now(), &cfg, SpawnOptions::default());
        let monitor_ref = a.monitor(&b).unwrap();

        let fire_count = Arc::new(AtomicUsize::new(0));
        let fire_count_in_handler = fire_count.clone();
        a.set_exit_handler(move |notice: ExitNotice| {
            assert_eq!(notice.monitor_ref, Some(monitor_ref));
            fire_count_in_handler.fetch_add(1, Ordering::SeqCst);
        });

        task::join(b.task_handle()).unwrap();
        assert_eq!(b.state(), ProcessState::Done);
        assert_eq!(fire_count.load(Ordering::SeqCst), 1);
        assert_eq!(a.monitor_count(), 0);

        // A second termination attempt on the already-terminal `b` must not
        // fire the handler again.
        b.crash(ExitReason::Kill, None);
        assert_eq!(fire_count.load(Ordering::SeqCst), 1);

        task::cancel(a.task_handle());
        task::join(a.task_handle()).unwrap();
    }

    #[test]
    fn destroy_unregisters_the_process() {
        let cfg = config();
        let p = spawn(|| {}, &cfg, SpawnOptions::default());
        let pid = p.pid();
        task::join(p.task_handle()).unwrap();
        p.destroy(ExitReason::Normal).unwrap();
        assert!(lookup(pid).is_none());
    }
}
