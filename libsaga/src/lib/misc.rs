//! lib/misc.rs
//!
//! A few miscellaneous functions available library wide.


//------------------------------------------------------------------------------------------ IMPORTS


use crate::error::Error;
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::fmt::Subscriber;
use uuid::Uuid;


//---------------------------------------------------------------------------------------- FUNCTIONS


/// Initializes tracing
pub fn init_tracing(level: tracing::Level, env: String) {
    let subscriber = Subscriber::builder()
        .compact()
        .with_max_level(level)
        .with_env_filter(env.as_str())
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global subscriber for tracing.");
}

/// Get a uuid string
pub fn get_uuid() -> String {
    let uuid = Uuid::new_v4();
    format!("{}", uuid)
}

/// Acquires a lock, turning a poisoned-lock failure into a library error instead of panicking.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, Error> {
    mutex
        .lock()
        .map_err(|_| Error::Generic(format!("The {} lock was poisoned", what)))
}


//-------------------------------------------------------------------------------------------- TESTS


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_get_uuid() {
        let a = get_uuid();
        let b = get_uuid();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }
}
