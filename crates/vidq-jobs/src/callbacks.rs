//! In-process error callbacks keyed by job id.
//!
//! A producer that wants to hear about a failure registers a one-shot
//! callback for its job id. The coordinator resolves the registration when
//! the job reaches a terminal state: on failure the callback runs, on success
//! it is dropped. Either way the entry is removed first, so a callback runs
//! at most once no matter how often the job is resolved.
//!
//! Registrations live in process memory only. A callback registered in one
//! process is never invoked for a job executed by another.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use serde_json::Value as JsonValue;

use vidq_core::Error;

/// One-shot failure handler: receives the job error and the stored payload.
///
/// The payload is passed as stored, so it is available even when it does not
/// parse as a known [`vidq_core::JobKind`].
pub type ErrorCallback = Box<dyn FnOnce(&Error, &JsonValue) + Send + 'static>;

/// Registry of pending error callbacks.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct ErrorCallbackRegistry {
    callbacks: Arc<Mutex<HashMap<String, ErrorCallback>>>,
}

impl ErrorCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, ErrorCallback>> {
        // Callbacks run outside the lock, so a poisoned map is still consistent.
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `job_id`, replacing any earlier registration.
    ///
    /// Returns `true` if an earlier registration was replaced.
    pub fn register<F>(&self, job_id: impl Into<String>, callback: F) -> bool
    where
        F: FnOnce(&Error, &JsonValue) + Send + 'static,
    {
        let job_id = job_id.into();
        debug!(
            subsystem = "jobs",
            component = "callbacks",
            op = "register",
            job_id = %job_id,
            "Registered error callback"
        );
        self.entries().insert(job_id, Box::new(callback)).is_some()
    }

    /// Register `callback` only if `job_id` has no registration yet.
    ///
    /// Returns `false`, dropping `callback`, when one already exists.
    pub fn try_register<F>(&self, job_id: impl Into<String>, callback: F) -> bool
    where
        F: FnOnce(&Error, &JsonValue) + Send + 'static,
    {
        match self.entries().entry(job_id.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Box::new(callback));
                true
            }
        }
    }

    /// Remove a registration without invoking it.
    pub fn unregister(&self, job_id: &str) -> bool {
        self.entries().remove(job_id).is_some()
    }

    /// Resolve a successful job: the callback, if any, is discarded.
    pub fn on_success(&self, job_id: &str) {
        self.unregister(job_id);
    }

    /// Resolve a failed job: remove the callback and invoke it.
    ///
    /// A panic inside the callback is caught and logged. Returns whether a
    /// callback ran; an unknown job id is a no-op.
    pub fn on_failure(&self, job_id: &str, error: &Error, payload: &JsonValue) -> bool {
        let Some(callback) = self.entries().remove(job_id) else {
            return false;
        };

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(error, payload))) {
            error!(
                subsystem = "jobs",
                component = "callbacks",
                op = "on_failure",
                job_id = %job_id,
                panic = %panic_message(panic.as_ref()),
                "Error callback panicked"
            );
        }
        true
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.entries().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl std::fmt::Debug for ErrorCallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorCallbackRegistry")
            .field("len", &self.len())
            .finish()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnOnce(&Error, &JsonValue) + Send + 'static {
        let counter = counter.clone();
        move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn audio() -> JsonValue {
        json!({"type": "extract-audio"})
    }

    #[test]
    fn test_failure_invokes_once() {
        let registry = ErrorCallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("job-1", counting(&calls));

        let err = Error::Executor("boom".into());
        assert!(registry.on_failure("job-1", &err, &audio()));
        assert!(!registry.on_failure("job-1", &err, &audio()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_success_discards() {
        let registry = ErrorCallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("job-1", counting(&calls));

        registry.on_success("job-1");
        let err = Error::Executor("late".into());
        assert!(!registry.on_failure("job-1", &err, &audio()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_receives_error_and_payload() {
        let registry = ErrorCallbackRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        registry.register("job-1", move |err: &Error, payload: &JsonValue| {
            *sink.lock().unwrap() = Some((err.to_string(), payload.clone()));
        });

        let payload = json!({"type": "resize", "width": 320, "height": 240});
        registry.on_failure("job-1", &Error::Executor("scale failed".into()), &payload);

        let (message, got) = seen.lock().unwrap().take().unwrap();
        assert_eq!(message, "Executor error: scale failed");
        assert_eq!(got, payload);
    }

    #[test]
    fn test_register_replaces() {
        let registry = ErrorCallbackRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        assert!(!registry.register("job-1", counting(&first)));
        assert!(registry.register("job-1", counting(&second)));
        assert_eq!(registry.len(), 1);

        registry.on_failure("job-1", &Error::Internal("x".into()), &audio());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_try_register_keeps_existing() {
        let registry = ErrorCallbackRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        assert!(registry.try_register("job-1", counting(&first)));
        assert!(!registry.try_register("job-1", counting(&second)));

        registry.on_failure("job-1", &Error::Internal("x".into()), &audio());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_job_is_noop() {
        let registry = ErrorCallbackRegistry::new();
        registry.on_success("nope");
        assert!(!registry.on_failure("nope", &Error::Internal("x".into()), &audio()));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let registry = ErrorCallbackRegistry::new();
        registry.register("job-1", |_: &Error, _: &JsonValue| panic!("callback bug"));
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("job-2", counting(&calls));

        assert!(registry.on_failure("job-1", &Error::Internal("x".into()), &audio()));
        assert!(!registry.contains("job-1"));

        // Registry is still usable afterwards.
        assert!(registry.on_failure("job-2", &Error::Internal("y".into()), &audio()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let registry = ErrorCallbackRegistry::new();
        let other = registry.clone();
        registry.register("job-1", |_: &Error, _: &JsonValue| {});
        assert!(other.contains("job-1"));
        assert!(other.unregister("job-1"));
        assert!(!registry.contains("job-1"));
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }
}
