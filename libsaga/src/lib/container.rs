//! lib/container.rs
//!
//! This module contains the task container, the bulk-operation optimization of the task model.
//! A container groups tasks and drives them together: members bound to the same bulk-capable
//! adaptor instance and performing the same method are collapsed into one bulk call on that
//! instance, while the remaining members are driven individually. Each group gets its own
//! thread, so one slow backend does not serialize the others.
//!
//! A bulk adaptor answering `NotImplemented` demotes its group on the spot: the container falls
//! back to per-member operations for that group and the call still succeeds. When several groups
//! fail, the container reports the most specific error among them.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::cpi::BulkAdaptor;
use crate::error::Error;
use crate::misc;
use crate::task::{Task, TaskState};
use crossbeam::channel::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, instrument};


//-------------------------------------------------------------------------------------------- TYPES


/// Whether a container wait blocks for every member or for the first one to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    All,
    Any,
}

// The members of a container split into bulk groups. Indices refer to the membership order at
// the time of the split, which `get_states` preserves in its output.
struct Buckets<T: Send + 'static> {
    bound: Vec<(Arc<dyn BulkAdaptor<T>>, Vec<(usize, Task<T>)>)>,
    unbound: Vec<(usize, Task<T>)>,
}


//---------------------------------------------------------------------------------------- CONTAINER


/// A group of tasks driven together, with bulk-call collapsing for members that share a
/// bulk-capable adaptor instance and a method.
pub struct TaskContainer<T: Send + 'static> {
    tasks: Mutex<Vec<Task<T>>>,
}

impl<T: Send + 'static> Default for TaskContainer<T> {
    fn default() -> TaskContainer<T> {
        TaskContainer::new()
    }
}

impl<T: Send + 'static> TaskContainer<T> {
    pub fn new() -> TaskContainer<T> {
        TaskContainer {
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Adds a task to the container. A task can only be a member once.
    pub fn add(&self, task: Task<T>) -> Result<(), Error> {
        let mut tasks = misc::lock(&self.tasks, "container members")?;
        if tasks.iter().any(|t| t.id() == task.id()) {
            return Err(Error::AlreadyExists(format!(
                "The task {} is already in the container",
                task.id()
            )));
        }
        tasks.push(task);
        Ok(())
    }

    /// Removes a member by task id.
    pub fn remove(&self, id: &str) -> Result<(), Error> {
        let mut tasks = misc::lock(&self.tasks, "container members")?;
        match tasks.iter().position(|t| t.id() == id) {
            Some(index) => {
                tasks.remove(index);
                Ok(())
            }
            None => Err(Error::DoesNotExist(format!(
                "The task {} is not in the container",
                id
            ))),
        }
    }

    pub fn size(&self) -> Result<usize, Error> {
        Ok(misc::lock(&self.tasks, "container members")?.len())
    }

    pub fn tasks(&self) -> Result<Vec<Task<T>>, Error> {
        Ok(misc::lock(&self.tasks, "container members")?.clone())
    }

    // Splits the current members into bulk groups. Grouping is by adaptor instance identity and
    // method name: two tasks on the same connection but performing different methods cannot
    // share a bulk call.
    fn buckets(&self) -> Result<Buckets<T>, Error> {
        let tasks = self.tasks()?;
        let mut keyed: Vec<((usize, String), usize)> = Vec::new();
        let mut buckets = Buckets {
            bound: Vec::new(),
            unbound: Vec::new(),
        };
        for (index, task) in tasks.into_iter().enumerate() {
            match task.bulk_adaptor()? {
                None => buckets.unbound.push((index, task)),
                Some(adaptor) => {
                    let key = (
                        Arc::as_ptr(&adaptor) as *const () as usize,
                        task.method().to_owned(),
                    );
                    match keyed.iter().find(|(k, _)| *k == key) {
                        Some((_, slot)) => buckets.bound[*slot].1.push((index, task)),
                        None => {
                            keyed.push((key, buckets.bound.len()));
                            buckets.bound.push((adaptor, vec![(index, task)]));
                        }
                    }
                }
            }
        }
        Ok(buckets)
    }

    //------------------------------------------------------------------------ BULK OPERATIONS

    /// Starts every member. Bound groups go through one `container_run` per group, the rest run
    /// individually; every group gets its own thread and the call blocks until all of them
    /// started.
    #[instrument(name = "TaskContainer::run", skip(self))]
    pub fn run(&self) -> Result<(), Error> {
        let buckets = self.buckets()?;
        let mut handles = Vec::new();
        for (adaptor, group) in buckets.bound {
            handles.push(spawn_unit(move || {
                let members: Vec<Task<T>> = group.iter().map(|(_, t)| t.clone()).collect();
                match adaptor.container_run(&members) {
                    Err(Error::NotImplemented(_)) => {
                        debug!("Bulk run not available, demoting to per-task runs");
                        demote(&members, |t| t.run())
                    }
                    other => other,
                }
            })?);
        }
        for (_, task) in buckets.unbound {
            handles.push(spawn_unit(move || task.run())?);
        }
        join_units(handles)
    }

    /// Waits on the members. In `All` mode, blocks until every member is final (or the timeout
    /// expires) and returns a representative member, the last one. In `Any` mode, blocks until
    /// one member finishes, removes it from the container and returns it; `None` on an empty
    /// container or an expired timeout.
    #[instrument(name = "TaskContainer::wait", skip(self))]
    pub fn wait(
        &self,
        mode: WaitMode,
        timeout: Option<Duration>,
    ) -> Result<Option<Task<T>>, Error> {
        match mode {
            WaitMode::All => {
                self.wait_all(timeout)?;
                Ok(misc::lock(&self.tasks, "container members")?.last().cloned())
            }
            WaitMode::Any => self.wait_any(timeout),
        }
    }

    fn wait_all(&self, timeout: Option<Duration>) -> Result<(), Error> {
        let buckets = self.buckets()?;
        let mut handles = Vec::new();
        for (adaptor, group) in buckets.bound {
            handles.push(spawn_unit(move || {
                let members: Vec<Task<T>> = group.iter().map(|(_, t)| t.clone()).collect();
                match adaptor.container_wait(&members, timeout) {
                    Err(Error::NotImplemented(_)) => {
                        debug!("Bulk wait not available, demoting to per-task waits");
                        demote(&members, |t| t.wait(timeout).map(|_| ()))
                    }
                    other => other,
                }
            })?);
        }
        for (_, task) in buckets.unbound {
            handles.push(spawn_unit(move || task.wait(timeout).map(|_| ()))?);
        }
        join_units(handles)
    }

    fn wait_any(&self, timeout: Option<Duration>) -> Result<Option<Task<T>>, Error> {
        let tasks = self.tasks()?;
        if tasks.is_empty() {
            return Ok(None);
        }
        // One waiter per member; the first to see its task final wins. The losing waiters keep
        // blocking in the background and just find a closed channel when their turn comes.
        let (sender, receiver) = channel::unbounded();
        for task in tasks {
            let sender = sender.clone();
            thread::Builder::new()
                .name("container-wait-any".to_owned())
                .spawn(move || {
                    if task.wait(None).is_ok() {
                        let _ = sender.send(task);
                    }
                })
                .map_err(|e| {
                    Error::Generic(format!("Failed to spawn a container thread: {}", e))
                })?;
        }
        drop(sender);
        let winner = match timeout {
            None => match receiver.recv() {
                Ok(task) => task,
                Err(_) => return Ok(None),
            },
            Some(timeout) => match receiver.recv_timeout(timeout) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            },
        };
        self.remove(winner.id())?;
        Ok(Some(winner))
    }

    /// Cancels every member, through one `container_cancel` per bound group.
    #[instrument(name = "TaskContainer::cancel", skip(self))]
    pub fn cancel(&self) -> Result<(), Error> {
        let buckets = self.buckets()?;
        let mut handles = Vec::new();
        for (adaptor, group) in buckets.bound {
            handles.push(spawn_unit(move || {
                let members: Vec<Task<T>> = group.iter().map(|(_, t)| t.clone()).collect();
                match adaptor.container_cancel(&members) {
                    Err(Error::NotImplemented(_)) => {
                        debug!("Bulk cancel not available, demoting to per-task cancels");
                        demote(&members, |t| t.cancel())
                    }
                    other => other,
                }
            })?);
        }
        for (_, task) in buckets.unbound {
            handles.push(spawn_unit(move || task.cancel())?);
        }
        join_units(handles)
    }

    /// Returns the state of every member, in membership order, through one
    /// `container_get_states` per bound group. A member whose group failed to report shows up as
    /// `Unknown`.
    pub fn get_states(&self) -> Result<Vec<TaskState>, Error> {
        let buckets = self.buckets()?;
        let total =
            buckets.bound.iter().map(|(_, g)| g.len()).sum::<usize>() + buckets.unbound.len();
        let slots: Arc<Mutex<Vec<Option<TaskState>>>> = Arc::new(Mutex::new(vec![None; total]));

        let mut handles = Vec::new();
        for (adaptor, group) in buckets.bound {
            let slots = slots.clone();
            handles.push(spawn_unit(move || {
                let members: Vec<Task<T>> = group.iter().map(|(_, t)| t.clone()).collect();
                let states = match adaptor.container_get_states(&members) {
                    Err(Error::NotImplemented(_)) => members
                        .iter()
                        .map(|t| t.get_state())
                        .collect::<Result<Vec<TaskState>, Error>>()?,
                    other => other?,
                };
                let mut slots = misc::lock(&slots, "container states")?;
                for ((index, _), state) in group.iter().zip(states) {
                    slots[*index] = Some(state);
                }
                Ok(())
            })?);
        }
        for (index, task) in buckets.unbound {
            let slots = slots.clone();
            handles.push(spawn_unit(move || {
                let state = task.get_state()?;
                misc::lock(&slots, "container states")?[index] = Some(state);
                Ok(())
            })?);
        }
        let outcome = join_units(handles);

        let states = misc::lock(&slots, "container states")?
            .iter()
            .map(|s| s.unwrap_or(TaskState::Unknown))
            .collect();
        outcome?;
        Ok(states)
    }
}


//------------------------------------------------------------------------------------------ HELPERS


fn spawn_unit<F>(unit: F) -> Result<thread::JoinHandle<Result<(), Error>>, Error>
where
    F: FnOnce() -> Result<(), Error> + Send + 'static,
{
    thread::Builder::new()
        .name("container-unit".to_owned())
        .spawn(unit)
        .map_err(|e| Error::Generic(format!("Failed to spawn a container thread: {}", e)))
}

fn join_units(handles: Vec<thread::JoinHandle<Result<(), Error>>>) -> Result<(), Error> {
    let mut errors = Vec::new();
    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => errors.push(error),
            Err(_) => errors.push(Error::Generic("A container thread panicked".to_owned())),
        }
    }
    representative(errors)
}

// Applies a per-task operation to every member of a demoted group, reporting the most specific
// failure.
fn demote<T, F>(members: &[Task<T>], operation: F) -> Result<(), Error>
where
    T: Send + 'static,
    F: Fn(&Task<T>) -> Result<(), Error>,
{
    let errors = members
        .iter()
        .filter_map(|t| operation(t).err())
        .collect();
    representative(errors)
}

// Picks the error saying the most about the actual cause out of several concurrent failures.
fn representative(errors: Vec<Error>) -> Result<(), Error> {
    match errors.into_iter().max_by_key(Error::specificity) {
        None => Ok(()),
        Some(error) => Err(error),
    }
}


//-------------------------------------------------------------------------------------------- TESTS
