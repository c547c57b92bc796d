//! lib/task.rs
//!
//! This module contains the task abstraction: one backend operation wrapped behind a uniform
//! state machine. A task is either self-owned (it carries the closure performing the operation
//! and runs it on a dedicated thread) or delegated (an adaptor drives the operation natively and
//! reports progress back through `set_state`, `resolve` and `fail`).
//!
//! The state machine is New -> Running -> {Done, Failed}, with Canceled reachable from New and
//! Running. Final states are terminal. Cancellation of a self-owned task is a notification: work
//! that already started runs to completion in the background and its outcome is discarded.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::cpi::{AsyncAdaptor, BulkAdaptor};
use crate::error::Error;
use crate::misc;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{instrument, trace};


//-------------------------------------------------------------------------------------------- STATE


/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// The state could not be determined.
    Unknown,
    /// The task was created but not yet started.
    New,
    /// The operation is in flight.
    Running,
    /// The operation completed and a result is available.
    Done,
    /// The operation failed and an error is available.
    Failed,
    /// The task was canceled before it could complete.
    Canceled,
}

impl TaskState {
    /// Whether the state is terminal.
    pub fn is_final(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Canceled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskState::Unknown => write!(f, "Unknown"),
            TaskState::New => write!(f, "New"),
            TaskState::Running => write!(f, "Running"),
            TaskState::Done => write!(f, "Done"),
            TaskState::Failed => write!(f, "Failed"),
            TaskState::Canceled => write!(f, "Canceled"),
        }
    }
}

/// How a task starts relative to its construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskMode {
    /// Construction runs the operation and waits for a final state.
    Sync,
    /// Construction starts the operation and returns immediately.
    Async,
    /// Construction does nothing; the caller starts the task with `run`.
    Deferred,
}


//--------------------------------------------------------------------------------------------- TASK


// The closure a self-owned task executes on its thread.
type Work<T> = Box<dyn FnOnce() -> Result<T, Error> + Send>;

// The waitable core of a task. Every transition notifies the condition variable.
struct Core<T> {
    state: TaskState,
    result: Option<T>,
    error: Option<Error>,
    cancel_requested: bool,
}

struct TaskInner<T: Send + 'static> {
    id: String,
    method: String,
    core: Mutex<Core<T>>,
    cond: Condvar,
    work: Mutex<Option<Work<T>>>,
    adaptor: Option<Arc<dyn AsyncAdaptor<T>>>,
    bulk: Mutex<Option<Arc<dyn BulkAdaptor<T>>>>,
}

/// A handle on one backend operation. Cloning yields another handle on the same operation, which
/// is how tasks are shared between containers, adaptors and waiting threads.
pub struct Task<T: Send + 'static> {
    inner: Arc<TaskInner<T>>,
}

impl<T: Send + 'static> Clone for Task<T> {
    fn clone(&self) -> Task<T> {
        Task {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task<{}|{}>", self.inner.method, self.inner.id)
    }
}

impl<T: Send + 'static> Task<T> {
    /// Creates a self-owned task around a closure. Depending on the mode, the closure may
    /// already have run (Sync), be running (Async), or await a `run` call (Deferred) when this
    /// returns.
    pub fn new<F>(method: &str, work: F, mode: TaskMode) -> Result<Task<T>, Error>
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
    {
        let task = Task {
            inner: Arc::new(TaskInner {
                id: misc::get_uuid(),
                method: method.to_owned(),
                core: Mutex::new(Core {
                    state: TaskState::New,
                    result: None,
                    error: None,
                    cancel_requested: false,
                }),
                cond: Condvar::new(),
                work: Mutex::new(Some(Box::new(work))),
                adaptor: None,
                bulk: Mutex::new(None),
            }),
        };
        task.start(mode)?;
        Ok(task)
    }

    /// Creates a task whose lifecycle is driven natively by an adaptor.
    pub fn delegated(
        method: &str,
        adaptor: Arc<dyn AsyncAdaptor<T>>,
        mode: TaskMode,
    ) -> Result<Task<T>, Error> {
        let task = Task {
            inner: Arc::new(TaskInner {
                id: misc::get_uuid(),
                method: method.to_owned(),
                core: Mutex::new(Core {
                    state: TaskState::New,
                    result: None,
                    error: None,
                    cancel_requested: false,
                }),
                cond: Condvar::new(),
                work: Mutex::new(None),
                adaptor: Some(adaptor),
                bulk: Mutex::new(None),
            }),
        };
        task.start(mode)?;
        Ok(task)
    }

    fn start(&self, mode: TaskMode) -> Result<(), Error> {
        match mode {
            TaskMode::Deferred => Ok(()),
            TaskMode::Async => self.run(),
            TaskMode::Sync => {
                self.run()?;
                self.wait(None)?;
                Ok(())
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The name of the API operation this task performs, e.g. `job.run`. Containers group tasks
    /// by method when forming bulk calls.
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Attaches the bulk-capable adaptor instance this task is bound to. Containers use the
    /// instance identity to group tasks into bulk calls.
    pub fn set_bulk(&self, bulk: Arc<dyn BulkAdaptor<T>>) -> Result<(), Error> {
        *misc::lock(&self.inner.bulk, "task bulk adaptor")? = Some(bulk);
        Ok(())
    }

    pub fn bulk_adaptor(&self) -> Result<Option<Arc<dyn BulkAdaptor<T>>>, Error> {
        Ok(misc::lock(&self.inner.bulk, "task bulk adaptor")?.clone())
    }

    //------------------------------------------------------------------------------- LIFECYCLE

    /// Starts the task. Fails with `IncorrectState` unless the task is New.
    #[instrument(name = "Task::run", skip(self))]
    pub fn run(&self) -> Result<(), Error> {
        if let Some(adaptor) = self.inner.adaptor.as_ref() {
            return adaptor.task_run(self);
        }
        let work = {
            let mut core = misc::lock(&self.inner.core, "task core")?;
            match core.state {
                TaskState::New => {}
                state => {
                    return Err(Error::IncorrectState(format!(
                        "The task {} cannot run from the {} state",
                        self.inner.id, state
                    )))
                }
            }
            let work = misc::lock(&self.inner.work, "task work")?
                .take()
                .ok_or_else(|| {
                    Error::IncorrectState(format!(
                        "The task {} has no work to run",
                        self.inner.id
                    ))
                })?;
            core.state = TaskState::Running;
            work
        };
        self.inner.cond.notify_all();
        trace!(id = %self.inner.id, method = %self.inner.method, "Firing task thread");

        let me = self.clone();
        thread::Builder::new()
            .name(format!("task-{}", self.inner.method))
            .spawn(move || {
                // Cancellation may have landed between run() and this point.
                if let Ok(core) = me.inner.core.lock() {
                    if core.cancel_requested {
                        return;
                    }
                }
                let outcome = work();
                if let Ok(mut core) = me.inner.core.lock() {
                    // A task canceled while the work was in flight keeps its Canceled state and
                    // the outcome is discarded.
                    if core.state == TaskState::Canceled {
                        return;
                    }
                    match outcome {
                        Ok(result) => {
                            core.result = Some(result);
                            core.state = TaskState::Done;
                        }
                        Err(error) => {
                            core.error = Some(error);
                            core.state = TaskState::Failed;
                        }
                    }
                }
                me.inner.cond.notify_all();
            })
            .map_err(|e| Error::Generic(format!("Failed to spawn the task thread: {}", e)))?;
        Ok(())
    }

    /// Blocks until the task reaches a final state. With a timeout, returns the current state
    /// when the timeout expires, which may not be final.
    #[instrument(name = "Task::wait", skip(self))]
    pub fn wait(&self, timeout: Option<Duration>) -> Result<TaskState, Error> {
        if let Some(adaptor) = self.inner.adaptor.as_ref() {
            return adaptor.task_wait(self, timeout);
        }
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut core = misc::lock(&self.inner.core, "task core")?;
        loop {
            if core.state.is_final() {
                return Ok(core.state);
            }
            match deadline {
                None => {
                    core = self
                        .inner
                        .cond
                        .wait(core)
                        .map_err(|_| Error::Generic("The task core lock was poisoned".to_owned()))?;
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(core.state);
                    }
                    let (reacquired, _) = self
                        .inner
                        .cond
                        .wait_timeout(core, deadline - now)
                        .map_err(|_| Error::Generic("The task core lock was poisoned".to_owned()))?;
                    core = reacquired;
                }
            }
        }
    }

    /// Cancels the task. A no-op on final states. For self-owned tasks this moves the logical
    /// state to Canceled and lets any in-flight work finish in the background.
    #[instrument(name = "Task::cancel", skip(self))]
    pub fn cancel(&self) -> Result<(), Error> {
        if let Some(adaptor) = self.inner.adaptor.as_ref() {
            return adaptor.task_cancel(self);
        }
        {
            let mut core = misc::lock(&self.inner.core, "task core")?;
            if core.state.is_final() {
                return Ok(());
            }
            core.cancel_requested = true;
            core.state = TaskState::Canceled;
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    pub fn get_state(&self) -> Result<TaskState, Error> {
        Ok(misc::lock(&self.inner.core, "task core")?.state)
    }

    //------------------------------------------------------------------------ ADAPTOR UPCALLS

    /// Moves the task to a new state. Adaptors report native progress through this; transitions
    /// out of a final state fail with `IncorrectState`.
    pub fn set_state(&self, state: TaskState) -> Result<(), Error> {
        {
            let mut core = misc::lock(&self.inner.core, "task core")?;
            if core.state.is_final() {
                return Err(Error::IncorrectState(format!(
                    "The task {} is already {}",
                    self.inner.id, core.state
                )));
            }
            core.state = state;
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    /// Completes the task with a result.
    pub fn resolve(&self, result: T) -> Result<(), Error> {
        {
            let mut core = misc::lock(&self.inner.core, "task core")?;
            if core.state.is_final() {
                return Err(Error::IncorrectState(format!(
                    "The task {} is already {}",
                    self.inner.id, core.state
                )));
            }
            core.result = Some(result);
            core.state = TaskState::Done;
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    /// Fails the task with an error.
    pub fn fail(&self, error: Error) -> Result<(), Error> {
        {
            let mut core = misc::lock(&self.inner.core, "task core")?;
            if core.state.is_final() {
                return Err(Error::IncorrectState(format!(
                    "The task {} is already {}",
                    self.inner.id, core.state
                )));
            }
            core.error = Some(error);
            core.state = TaskState::Failed;
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    /// The error of a Failed task, if any.
    pub fn get_exception(&self) -> Result<Option<Error>, Error> {
        Ok(misc::lock(&self.inner.core, "task core")?.error.clone())
    }

    /// Propagates the stored error of a Failed task, and does nothing otherwise.
    pub fn re_raise(&self) -> Result<(), Error> {
        let core = misc::lock(&self.inner.core, "task core")?;
        match (&core.state, &core.error) {
            (TaskState::Failed, Some(error)) => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

impl<T: Send + Clone + 'static> Task<T> {
    /// Blocks until the task is final and returns its result. A Failed task re-raises its stored
    /// error, a Canceled task fails with `IncorrectState`.
    pub fn get_result(&self) -> Result<T, Error> {
        let state = match self.get_state()? {
            state if state.is_final() => state,
            _ => self.wait(None)?,
        };
        let core = misc::lock(&self.inner.core, "task core")?;
        match state {
            TaskState::Done => core.result.clone().ok_or_else(|| {
                Error::Generic(format!("The task {} lost its result", self.inner.id))
            }),
            TaskState::Failed => Err(core.error.clone().unwrap_or_else(|| {
                Error::Generic(format!("The task {} failed without an error", self.inner.id))
            })),
            _ => Err(Error::IncorrectState(format!(
                "The task {} was canceled, no result to return",
                self.inner.id
            ))),
        }
    }
}


//-------------------------------------------------------------------------------------------- TESTS


#[cfg(test)]
mod tests {

    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_sync_mode_completes_before_return() {
        let task = Task::new("test.add", || Ok(1 + 1), TaskMode::Sync).unwrap();
        assert_eq!(task.get_state().unwrap(), TaskState::Done);
        assert_eq!(task.get_result().unwrap(), 2);
    }

    #[test]
    fn test_async_mode_runs_without_explicit_run() {
        let task = Task::new("test.add", || Ok(40 + 2), TaskMode::Async).unwrap();
        assert!(task.run().is_err());
        assert_eq!(task.get_result().unwrap(), 42);
    }

    #[test]
    fn test_deferred_mode_waits_for_run() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = Task::new(
            "test.flag",
            move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            },
            TaskMode::Deferred,
        )
        .unwrap();
        assert_eq!(task.get_state().unwrap(), TaskState::New);
        assert!(!ran.load(Ordering::SeqCst));
        task.run().unwrap();
        assert_eq!(task.wait(None).unwrap(), TaskState::Done);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_run_twice_is_incorrect_state() {
        let task = Task::new("test.noop", || Ok(()), TaskMode::Deferred).unwrap();
        task.run().unwrap();
        task.wait(None).unwrap();
        match task.run() {
            Err(Error::IncorrectState(_)) => {}
            other => panic!("expected IncorrectState, got {:?}", other),
        }
    }

    #[test]
    fn test_failed_task_reraises() {
        let task: Task<()> = Task::new(
            "test.fail",
            || Err(Error::PermissionDenied("nope".to_owned())),
            TaskMode::Sync,
        )
        .unwrap();
        assert_eq!(task.get_state().unwrap(), TaskState::Failed);
        match task.get_result() {
            Err(Error::PermissionDenied(_)) => {}
            other => panic!("expected PermissionDenied, got {:?}", other),
        }
        assert!(task.re_raise().is_err());
        assert!(task.get_exception().unwrap().is_some());
    }

    #[test]
    fn test_cancel_new_task() {
        let task = Task::new("test.noop", || Ok(()), TaskMode::Deferred).unwrap();
        task.cancel().unwrap();
        assert_eq!(task.get_state().unwrap(), TaskState::Canceled);
        // Canceling again is a no-op.
        task.cancel().unwrap();
        match task.get_result() {
            Err(Error::IncorrectState(_)) => {}
            other => panic!("expected IncorrectState, got {:?}", other),
        }
    }

    #[test]
    fn test_cancel_discards_inflight_result() {
        let task = Task::new(
            "test.slow",
            || {
                thread::sleep(Duration::from_millis(200));
                Ok(42)
            },
            TaskMode::Async,
        )
        .unwrap();
        task.cancel().unwrap();
        assert_eq!(task.get_state().unwrap(), TaskState::Canceled);
        // The work finishes in the background without flipping the state back.
        thread::sleep(Duration::from_millis(400));
        assert_eq!(task.get_state().unwrap(), TaskState::Canceled);
    }

    #[test]
    fn test_wait_timeout_returns_current_state() {
        let task = Task::new(
            "test.slow",
            || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            },
            TaskMode::Async,
        )
        .unwrap();
        let state = task.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(state, TaskState::Running);
        assert_eq!(task.wait(None).unwrap(), TaskState::Done);
    }

    struct Recorder {
        ran: AtomicBool,
        waited: AtomicBool,
        canceled: AtomicBool,
    }

    impl AsyncAdaptor<i64> for Recorder {
        fn task_run(&self, task: &Task<i64>) -> Result<(), Error> {
            self.ran.store(true, Ordering::SeqCst);
            task.set_state(TaskState::Running)?;
            task.resolve(7)
        }
        fn task_wait(&self, task: &Task<i64>, _: Option<Duration>) -> Result<TaskState, Error> {
            self.waited.store(true, Ordering::SeqCst);
            task.get_state()
        }
        fn task_cancel(&self, _: &Task<i64>) -> Result<(), Error> {
            self.canceled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_delegated_task_drives_adaptor() {
        let adaptor = Arc::new(Recorder {
            ran: AtomicBool::new(false),
            waited: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
        });
        let task = Task::delegated("test.native", adaptor.clone(), TaskMode::Sync).unwrap();
        assert!(adaptor.ran.load(Ordering::SeqCst));
        assert!(adaptor.waited.load(Ordering::SeqCst));
        assert_eq!(task.get_result().unwrap(), 7);
        task.cancel().unwrap();
        assert!(adaptor.canceled.load(Ordering::SeqCst));
    }

    struct Defaulted;
    impl AsyncAdaptor<()> for Defaulted {}

    #[test]
    fn test_default_adaptor_reports_not_implemented() {
        let task = Task::delegated("test.none", Arc::new(Defaulted), TaskMode::Deferred).unwrap();
        match task.run() {
            Err(Error::NotImplemented(_)) => {}
            other => panic!("expected NotImplemented, got {:?}", other),
        }
    }

    #[test]
    fn test_adaptor_upcalls_guard_final_states() {
        let task = Task::new("test.noop", || Ok(()), TaskMode::Sync).unwrap();
        assert!(task.set_state(TaskState::Running).is_err());
        assert!(task.fail(Error::Generic("late".to_owned())).is_err());
    }
}
