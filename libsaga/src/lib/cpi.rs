//! lib/cpi.rs
//!
//! This module contains the capability provider interface, the seam between the library and the
//! backend adaptors. Both traits ship default method bodies failing with `NotImplemented`: an
//! adaptor overrides what its backend can do natively, and the callers fall back to the library
//! side machinery when a method reports `NotImplemented`.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::error::Error;
use crate::task::{Task, TaskState};
use std::time::Duration;


//------------------------------------------------------------------------------------------- TRAITS


/// Per-task delegation: an adaptor implementing this trait drives the lifecycle of a single task
/// on its backend. The adaptor reports progress by calling `set_state`, `resolve` and `fail` on
/// the task it was handed.
pub trait AsyncAdaptor<T: Send + 'static>: Send + Sync {
    /// Starts the backend operation behind the task.
    fn task_run(&self, _task: &Task<T>) -> Result<(), Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement task_run".to_owned(),
        ))
    }

    /// Blocks until the task reaches a final state, or until the timeout expires.
    fn task_wait(&self, _task: &Task<T>, _timeout: Option<Duration>) -> Result<TaskState, Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement task_wait".to_owned(),
        ))
    }

    /// Cancels the backend operation behind the task.
    fn task_cancel(&self, _task: &Task<T>) -> Result<(), Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement task_cancel".to_owned(),
        ))
    }
}

/// Bulk delegation: an adaptor implementing this trait can drive several same-method tasks in one
/// backend exchange. Containers group tasks bound to the same adaptor instance and hand each
/// group to these methods; a `NotImplemented` answer makes the container fall back to per-task
/// operations.
pub trait BulkAdaptor<T: Send + 'static>: Send + Sync {
    fn container_run(&self, _tasks: &[Task<T>]) -> Result<(), Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement container_run".to_owned(),
        ))
    }

    fn container_wait(&self, _tasks: &[Task<T>], _timeout: Option<Duration>) -> Result<(), Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement container_wait".to_owned(),
        ))
    }

    fn container_cancel(&self, _tasks: &[Task<T>]) -> Result<(), Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement container_cancel".to_owned(),
        ))
    }

    /// Returns the state of every task of the group, in the order they were handed over.
    fn container_get_states(&self, _tasks: &[Task<T>]) -> Result<Vec<TaskState>, Error> {
        Err(Error::NotImplemented(
            "The adaptor does not implement container_get_states".to_owned(),
        ))
    }
}
