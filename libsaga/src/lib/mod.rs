//! lib/mod.rs
//!
//! Libsaga:
//! ========
//!
//! Welcome to the developer documentation of libsaga. Libsaga is the core of a uniform API layer
//! over heterogeneous distributed-computing backends: batch schedulers, remote shells, cloud
//! providers, replica catalogs. The backend-specific pieces (command generation, output parsing,
//! wire protocols) live in separate adaptor crates; what this library provides is the machinery
//! every adaptor and every API object shares:
//!
//! + The __attributes__ model: every API-facing object (a job, a context, a resource, a
//!   directory) carries a typed, extensible property bag with per-attribute modes, coercion
//!   rules, change callbacks, and hooks that let an adaptor synchronize a property with a live
//!   backend. See the `attributes` module.
//! + The __task__ model: any backend operation can be invoked synchronously, asynchronously, or
//!   as a deferred task. A `Task` wraps one such invocation behind a uniform state machine with
//!   blocking waits and best-effort cancellation. See the `task` module.
//! + The __container__ model: tasks can be grouped and driven together. When several tasks are
//!   backed by the same adaptor connection, the container collapses N individual operations into
//!   one bulk call on that connection. See the `container` module.
//! + The __cpi__ seam: the traits an adaptor implements to plug into the above, and the
//!   `registry` that binds URL schemas to adaptor factories.
//!
//! On the use of threads:
//! ----------------------
//!
//! All concurrency in this library is achieved by firing independent units of execution on
//! dedicated threads and joining them. There is no event loop and no scheduler: a call such as
//! `TaskContainer::run` spawns one thread per bucket of work, and blocks the calling thread on
//! the joins. This keeps the calling model strictly synchronous from the caller's point of view,
//! which is what the API promises, while still letting slow backend calls overlap. Waits are
//! implemented with condition variables so that timeouts are honored without busy-looping.
//!
//! Cancellation is a notification, not a preemption. A unit of execution that has already
//! entered a blocking backend call will run to completion in the background; its result is
//! discarded once the logical state has moved to `Canceled`.
//!
//! Shared state is kept per-object: an attribute store belongs to one API object and is guarded
//! by its own lock. The only cross-thread contract the store offers is atomicity per call and a
//! per-attribute re-entrancy guard around hook invocation.


//------------------------------------------------------------------------------------------ MODULES


pub mod attributes;
pub mod config;
pub mod container;
pub mod cpi;
pub mod registry;
pub mod task;

pub mod error;
pub mod misc;


//------------------------------------------------------------------------------------------ STATICS


/// folder containing the library configuration in $HOME
pub static CONFIG_FOLDER_RPATH: &str = ".saga";
/// file containing the library settings
pub static CONFIG_FILE_RPATH: &str = ".saga/config.yml";
/// prefix marking an attribute as private
pub static PRIVATE_PREFIX: &str = "_";


//-------------------------------------------------------------------------------------------- ERROR


pub use error::Error;
