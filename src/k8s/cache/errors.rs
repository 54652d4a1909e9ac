/**
 * Helper functions for creating common error types
 */
use super::resource::TrackedKind;
use crate::error::Error;

/// Create an `Invariant` error for a kind the cache or watcher was never told about
#[must_use]
pub fn unregistered_kind_error(kind: TrackedKind, component: &str) -> Error {
    Error::Invariant(format!("{kind} is not registered with the {component}"))
}

/// Create a `Validation` error for a resource that arrived without a UID
#[must_use]
pub fn missing_uid_error(kind: TrackedKind, name: &str) -> Error {
    Error::Validation(format!("{kind} `{name}` has no uid"))
}

/// Create a `LockPoisoned` error for mutex poisoning (indicates prior panic)
#[must_use]
pub fn lock_poisoned_error(message: &str) -> Error {
    Error::LockPoisoned(format!(
        "{message} - this indicates a prior panic, application may be in an inconsistent state"
    ))
}
