//! A cooperative, single-thread-per-scheduler task engine.
//!
//! A [`Scheduler`] owns a FIFO ready queue of stack-switched [`TaskHandle`]s
//! built on the [`fiber`] crate. Exactly one scheduler lives per OS thread
//! (stored in a thread-local); tasks created on one thread never run on
//! another. Cross-thread work is the job of the `chan`/`process` crates
//! layered above this one, never of the scheduler itself.

use fiber::stack::DefaultFiberStack;
use fiber::{Fiber, FiberResult};
use linked_list::{Linked, Links, List};
use std::cell::{Cell, RefCell};
use std::mem::offset_of;
use std::ptr::NonNull;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Stacks smaller than this are rounded up to [`DEFAULT_STACK_SIZE`].
pub const MIN_STACK_SIZE: usize = 64 * 1024;
/// The stack size used when a caller asks for less than [`MIN_STACK_SIZE`].
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Lifecycle state of a [`TaskHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Ready,
    Running,
    Done,
    Canceled,
}

impl TaskState {
    fn to_u8(self) -> u8 {
        match self {
            TaskState::New => 0,
            TaskState::Ready => 1,
            TaskState::Running => 2,
            TaskState::Done => 3,
            TaskState::Canceled => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::New,
            1 => TaskState::Ready,
            2 => TaskState::Running,
            3 => TaskState::Done,
            _ => TaskState::Canceled,
        }
    }

    /// Whether this state can never transition further.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Canceled)
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// `task_resume` was called on a task that was neither NEW nor READY.
    #[error("task is not resumable from its current state")]
    NotResumable,
    /// `task_join` could not make progress: the ready queue ran dry before
    /// the joined task reached a terminal state.
    #[error("scheduler deadlocked before the joined task terminated")]
    Deadlock,
    /// `task_destroy` was called on a task that has not yet reached DONE or
    /// CANCELED.
    #[error("task is not in a terminal state")]
    NotTerminal,
}

type TaskFiber = Fiber<(), (), (), (), DefaultFiberStack>;

struct TaskInner {
    links: Links<TaskInner>,
    id: u64,
    state: AtomicU8,
    cancel_requested: AtomicBool,
    fiber: Mutex<TaskFiber>,
    /// The task's `Suspend` handle, captured the first time its fiber runs.
    /// A fiber's stack (and everything on it, including this) stays at a
    /// fixed address for the task's whole lifetime, so once captured this
    /// pointer is valid for every later resume. The scheduler publishes it
    /// into the thread-local `CURRENT_SUSPEND` around each `resume()` call
    /// so `yield_now()` can find it, since resuming a fiber re-enters it
    /// mid-function rather than at the top of its entry closure.
    suspend_slot: Arc<AtomicPtr<fiber::Suspend<(), ()>>>,
}

// Safety: `links` is only touched while holding the owning scheduler's ready
// queue, which lives on a single thread; the remaining fields are
// thread-safe in their own right (atomics, a mutex).
unsafe impl Linked for TaskInner {
    type Handle = Arc<TaskInner>;

    fn into_ptr(handle: Self::Handle) -> NonNull<Self> {
        // Safety: `Arc::into_raw` always returns a valid, non-null pointer.
        unsafe { util::non_null(Arc::into_raw(handle).cast_mut()) }
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        // Safety: caller must pass a pointer obtained from `into_ptr`.
        unsafe { Arc::from_raw(ptr.as_ptr()) }
    }

    unsafe fn links(ptr: NonNull<Self>) -> NonNull<Links<Self>> {
        ptr.map_addr(|addr| {
            let offset = offset_of!(Self, links);
            addr.checked_add(offset).unwrap()
        })
        .cast()
    }
}

impl Drop for TaskInner {
    fn drop(&mut self) {
        // `Fiber::drop` asserts `done()`; a task abandoned mid-flight (its
        // last `TaskHandle` dropped without ever reaching DONE/CANCELED)
        // would otherwise panic here. Force it closed instead and log the
        // fact, since this indicates the owner leaked a live task rather
        // than going through `destroy`.
        let state = TaskState::from_u8(self.state.load(Ordering::Acquire));
        if !state.is_terminal() {
            tracing::warn!(task = self.id, ?state, "task dropped without reaching a terminal state");
            // Safety: no other reference to this `TaskInner` can exist; we
            // hold the only strong count by virtue of being in `Drop`.
            unsafe { self.fiber.get_mut().unwrap().force_reset() };
        }
    }
}

/// A handle to a spawned task. Cloning shares the same underlying task;
/// dropping the last clone frees its stack. If the task has not reached
/// DONE/CANCELED yet, the drop forcibly finalizes it and logs a warning
/// rather than resuming it or panicking.
#[derive(Clone)]
pub struct TaskHandle(Arc<TaskInner>);

impl TaskHandle {
    /// A runtime-unique identifier for this task.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The task's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.0.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TaskState) {
        self.0.state.store(state.to_u8(), Ordering::Release);
    }

    /// Requests cooperative cancellation. Returns immediately; the task is
    /// transitioned to [`TaskState::Canceled`] the next time the scheduler
    /// would otherwise have resumed it, without running any further user
    /// code. A no-op once the task has already reached a terminal state.
    pub fn cancel(&self) {
        self.0.cancel_requested.store(true, Ordering::Release);
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

thread_local! {
    static CURRENT_TASK: RefCell<Option<TaskHandle>> = const { RefCell::new(None) };
    static CURRENT_SUSPEND: Cell<*const fiber::Suspend<(), ()>> = const { Cell::new(std::ptr::null()) };
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::new(SchedulerConfig::default()));
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration for a thread's [`Scheduler`].
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Stack size used by [`spawn`] when the caller does not specify one
    /// larger than [`MIN_STACK_SIZE`].
    pub default_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// The thread-local, FIFO cooperative scheduler.
struct Scheduler {
    ready: List<TaskInner>,
    config: SchedulerConfig,
}

impl Scheduler {
    fn new(config: SchedulerConfig) -> Self {
        Scheduler {
            ready: List::new(),
            config,
        }
    }

    fn stack_size_for(&self, requested: usize) -> usize {
        if requested < MIN_STACK_SIZE {
            self.config.default_stack_size
        } else {
            requested
        }
    }
}

fn normalize_stack_size(requested: usize) -> usize {
    SCHEDULER.with(|s| s.borrow().stack_size_for(requested))
}

/// Spawns a new task with the given entry closure and requested stack size
/// (rounded up to [`DEFAULT_STACK_SIZE`] if below [`MIN_STACK_SIZE`]). The
/// task is placed on the calling thread's ready queue.
pub fn spawn<F>(entry: F, stack_size: usize) -> TaskHandle
where
    F: FnOnce() + 'static,
{
    let stack_size = normalize_stack_size(stack_size);
    let stack = DefaultFiberStack::new(stack_size).expect("failed to allocate task stack");

    let suspend_slot: Arc<AtomicPtr<fiber::Suspend<(), ()>>> =
        Arc::new(AtomicPtr::new(std::ptr::null_mut()));
    let suspend_slot_for_closure = suspend_slot.clone();
    let fiber: TaskFiber = Fiber::with_stack(stack, move |(), suspend, (): &()| {
        let ptr = std::ptr::from_ref(suspend).cast_mut();
        suspend_slot_for_closure.store(ptr, Ordering::Release);
        CURRENT_SUSPEND.with(|c| c.set(ptr.cast_const()));
        entry();
        CURRENT_SUSPEND.with(|c| c.set(std::ptr::null()));
    });

    let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
    let inner = Arc::new(TaskInner {
        links: Links::new(),
        id,
        state: AtomicU8::new(TaskState::New.to_u8()),
        cancel_requested: AtomicBool::new(false),
        fiber: Mutex::new(fiber),
        suspend_slot,
    });
    let handle = TaskHandle(inner);
    handle.set_state(TaskState::Ready);

    tracing::trace!(task = id, "spawned");
    SCHEDULER.with(|s| s.borrow_mut().ready.push_back(handle.0.clone()));
    handle
}

/// Suspends the calling task, returning control to the scheduler. The task
/// is re-enqueued at the tail of the ready queue unless cancellation was
/// requested while it was running, in which case the scheduler transitions
/// it straight to CANCELED without resuming it again.
///
/// A no-op when called outside of any task (i.e. from the scheduler/outer
/// context itself).
pub fn yield_now() {
    let suspend = CURRENT_SUSPEND.with(std::cell::Cell::get);
    if suspend.is_null() {
        return;
    }
    // Safety: non-null only while a task's fiber closure is on the stack,
    // and the pointee outlives this call (it is a local on that stack frame).
    unsafe { &*suspend }.suspend(());
}

/// Requests that `handle` run soon. Only valid when `handle` is NEW or
/// READY; moves it to the front of the ready queue and runs it immediately,
/// bypassing normal FIFO order for this one task.
pub fn resume(handle: &TaskHandle) -> Result<(), TaskError> {
    if !matches!(handle.state(), TaskState::New | TaskState::Ready) {
        return Err(TaskError::NotResumable);
    }
    SCHEDULER.with(|s| s.borrow_mut().remove_from_ready(handle));
    run_one(handle);
    Ok(())
}

/// Drives the scheduler cooperatively until `handle` reaches DONE or
/// CANCELED. Fails with [`TaskError::Deadlock`] if the ready queue empties
/// out before `handle` terminates.
pub fn join(handle: &TaskHandle) -> Result<(), TaskError> {
    loop {
        if handle.state().is_terminal() {
            return Ok(());
        }
        let next = SCHEDULER.with(|s| s.borrow_mut().ready.pop_front());
        let Some(next) = next else {
            return Err(TaskError::Deadlock);
        };
        run_one(&TaskHandle(next));
    }
}

/// Requests cooperative cancellation of `handle`. See
/// [`TaskHandle::cancel`].
pub fn cancel(handle: &TaskHandle) {
    handle.cancel();
}

/// Validates that `handle` is terminal. The actual stack/memory teardown
/// happens when the last [`TaskHandle`] clone is dropped; this call exists
/// to give callers an explicit precondition check mirroring the rest of the
/// runtime's `*_destroy` operations.
pub fn destroy(handle: &TaskHandle) -> Result<(), TaskError> {
    if handle.state().is_terminal() {
        Ok(())
    } else {
        Err(TaskError::NotTerminal)
    }
}

/// Returns the currently running task, or `None` from outside any task.
#[must_use]
pub fn current() -> Option<TaskHandle> {
    CURRENT_TASK.with(|c| c.borrow().clone())
}

impl Scheduler {
    fn remove_from_ready(&mut self, target: &TaskHandle) -> bool {
        let target_ptr = NonNull::from(target.0.as_ref());
        let mut cursor = self.ready.cusor_front_mut();
        loop {
            let Some(ptr) = cursor.get_ptr() else {
                return false;
            };
            if ptr == target_ptr {
                drop(cursor.remove());
                return true;
            }
            cursor.move_next();
        }
    }
}

/// Runs one task to its next suspension point (a `yield` or completion),
/// applying the documented cancellation-at-suspension-point semantics.
fn run_one(handle: &TaskHandle) {
    if handle.0.cancel_requested.load(Ordering::Acquire) {
        // Safety: the task has never been resumed past this point without
        // also hitting this same check first, so no live stack objects are
        // relying on their `Drop` impl running; see the cancellation note
        // on `TaskHandle`.
        unsafe { handle.0.fiber.lock().unwrap().force_reset() };
        handle.set_state(TaskState::Canceled);
        tracing::trace!(task = handle.id(), "canceled");
        return;
    }

    handle.set_state(TaskState::Running);
    let previous = CURRENT_TASK.with(|c| c.borrow_mut().replace(handle.clone()));
    tracing::trace!(task = handle.id(), "running");

    // Resuming a fiber re-enters it mid-function (right after whichever
    // `suspend()` call parked it) rather than at the top of its entry
    // closure, so the thread-local `yield_now()` looks at must be
    // re-published here on every resume, not just the first. On the very
    // first resume the slot is still null; the closure fills it in (and
    // sets the thread-local itself) before any `suspend()` call can happen.
    let prev_suspend = CURRENT_SUSPEND.with(|c| {
        c.replace(handle.0.suspend_slot.load(Ordering::Acquire).cast_const())
    });

    let result = handle.0.fiber.lock().unwrap().resume(());

    CURRENT_SUSPEND.with(|c| c.set(prev_suspend));
    CURRENT_TASK.with(|c| *c.borrow_mut() = previous);

    match result {
        FiberResult::Yield(()) => {
            if handle.0.cancel_requested.load(Ordering::Acquire) {
                // Safety: see above; the task is suspended at a `yield`
                // point, not mid-expression.
                unsafe { handle.0.fiber.lock().unwrap().force_reset() };
                handle.set_state(TaskState::Canceled);
                tracing::trace!(task = handle.id(), "canceled");
            } else {
                handle.set_state(TaskState::Ready);
                SCHEDULER.with(|s| s.borrow_mut().ready.push_back(handle.0.clone()));
            }
        }
        FiberResult::Return(()) => {
            handle.set_state(TaskState::Done);
            tracing::trace!(task = handle.id(), "done");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn spawn_join_runs_entry_to_completion() {
        let ran = Rc::new(StdRefCell::new(false));
        let ran2 = ran.clone();
        let handle = spawn(
            move || {
                *ran2.borrow_mut() = true;
            },
            0,
        );
        join(&handle).unwrap();
        assert!(*ran.borrow());
        assert_eq!(handle.state(), TaskState::Done);
    }

    #[test]
    fn yield_round_trips_through_scheduler() {
        let log = Rc::new(StdRefCell::new(Vec::new()));
        let log_a = log.clone();
        let log_b = log.clone();

        let a = spawn(
            move || {
                log_a.borrow_mut().push("a1");
                yield_now();
                log_a.borrow_mut().push("a2");
            },
            0,
        );
        let b = spawn(
            move || {
                log_b.borrow_mut().push("b1");
                yield_now();
                log_b.borrow_mut().push("b2");
            },
            0,
        );

        join(&a).unwrap();
        join(&b).unwrap();

        assert_eq!(*log.borrow(), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn join_deadlocks_when_target_is_absent_from_ready_queue() {
        // Simulate a task stuck somewhere the scheduler can't see (e.g.
        // removed by a direct `resume()` elsewhere and never requeued):
        // the ready queue is empty, so `join` cannot make progress.
        let handle = spawn(|| {}, 0);
        SCHEDULER.with(|s| s.borrow_mut().remove_from_ready(&handle));
        assert!(matches!(join(&handle), Err(TaskError::Deadlock)));
    }

    #[test]
    fn cancel_before_first_run_skips_user_code() {
        let ran = Rc::new(StdRefCell::new(false));
        let ran2 = ran.clone();
        let handle = spawn(
            move || {
                *ran2.borrow_mut() = true;
            },
            0,
        );
        cancel(&handle);
        join(&handle).unwrap();
        assert!(!*ran.borrow());
        assert_eq!(handle.state(), TaskState::Canceled);
    }

    #[test]
    fn destroy_rejects_non_terminal_task() {
        let handle = spawn(
            || {
                yield_now();
            },
            0,
        );
        assert!(matches!(destroy(&handle), Err(TaskError::NotTerminal)));
        cancel(&handle);
        join(&handle).unwrap();
        assert!(destroy(&handle).is_ok());
    }
}
