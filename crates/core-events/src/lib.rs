//! Core event types and observer plumbing for the multishot pipeline.
//!
//! Scene-graph mutations are announced through a small typed event enum
//! rather than stringly-keyed callbacks. Observers are synchronous and run
//! in registration order, before the mutating call returns. A panicking
//! observer is logged and swallowed; it never prevents the remaining
//! observers from running, and never blocks the state transition itself.
//!
//! Silent mode suppresses emission entirely. It exists so bulk operations
//! (asset discovery, sidecar import) can mutate many records without
//! triggering observer feedback loops.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, trace};

/// Events emitted by the scene graph and the shot switcher.
///
/// Identifiers are carried as plain strings (`Ep04_sq0070_SH0170` style)
/// so this crate stays a leaf; the model crate owns the typed id wrappers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ShotCreated { shot_id: String },
    ShotSwitched { shot_id: String },
    VersionUpdated { asset_id: String, version: String },
}

impl PipelineEvent {
    /// Stable name used in log lines and by observers that dispatch on kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::ShotCreated { .. } => "shot_created",
            PipelineEvent::ShotSwitched { .. } => "shot_switched",
            PipelineEvent::VersionUpdated { .. } => "version_updated",
        }
    }
}

/// Handle returned by [`ObserverRegistry::register`]; pass it back to
/// [`ObserverRegistry::unregister`] to remove the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = Box<dyn FnMut(&PipelineEvent)>;

/// Ordered collection of synchronous observers with a silent switch.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<(ObserverId, ObserverFn)>,
    next_id: u64,
    silent: bool,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(&PipelineEvent) + 'static,
    {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, Box::new(observer)));
        trace!(target: "events", observer = id.0, "observer registered");
        id
    }

    /// Removes an observer. Unknown ids are ignored.
    pub fn unregister(&mut self, id: ObserverId) {
        self.observers.retain(|(oid, _)| *oid != id);
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Suppress or re-enable emission. While silent, `notify` is a no-op.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Dispatches `event` to every observer in registration order.
    ///
    /// Observers run synchronously on the caller's thread. A panic inside
    /// one observer is caught, logged at ERROR, and dispatch continues with
    /// the next observer.
    pub fn notify(&mut self, event: &PipelineEvent) {
        if self.silent {
            trace!(target: "events", kind = event.kind(), "emission suppressed (silent)");
            return;
        }
        for (id, observer) in &mut self.observers {
            let outcome = catch_unwind(AssertUnwindSafe(|| observer(event)));
            if outcome.is_err() {
                error!(
                    target: "events",
                    observer = id.0,
                    kind = event.kind(),
                    "observer panicked; continuing with remaining observers"
                );
            }
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .field("silent", &self.silent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn switched(shot: &str) -> PipelineEvent {
        PipelineEvent::ShotSwitched {
            shot_id: shot.to_string(),
        }
    }

    #[test]
    fn observers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut reg = ObserverRegistry::new();
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            reg.register(move |_ev| seen.borrow_mut().push(tag));
        }
        reg.notify(&switched("Ep04_sq0070_SH0170"));
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_observer_does_not_stop_dispatch() {
        let seen = Rc::new(RefCell::new(0u32));
        let mut reg = ObserverRegistry::new();
        reg.register(|_ev| panic!("observer exploded"));
        {
            let seen = seen.clone();
            reg.register(move |_ev| *seen.borrow_mut() += 1);
        }
        reg.notify(&switched("Ep04_sq0070_SH0170"));
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn silent_mode_suppresses_emission() {
        let seen = Rc::new(RefCell::new(0u32));
        let mut reg = ObserverRegistry::new();
        {
            let seen = seen.clone();
            reg.register(move |_ev| *seen.borrow_mut() += 1);
        }
        reg.set_silent(true);
        reg.notify(&switched("Ep04_sq0070_SH0170"));
        assert_eq!(*seen.borrow(), 0);
        reg.set_silent(false);
        reg.notify(&switched("Ep04_sq0070_SH0170"));
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn unregister_removes_observer() {
        let seen = Rc::new(RefCell::new(0u32));
        let mut reg = ObserverRegistry::new();
        let id = {
            let seen = seen.clone();
            reg.register(move |_ev| *seen.borrow_mut() += 1)
        };
        reg.unregister(id);
        reg.notify(&switched("Ep04_sq0070_SH0170"));
        assert_eq!(*seen.borrow(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn event_kind_names_are_stable() {
        assert_eq!(switched("x").kind(), "shot_switched");
        let created = PipelineEvent::ShotCreated {
            shot_id: "x".into(),
        };
        assert_eq!(created.kind(), "shot_created");
        let bumped = PipelineEvent::VersionUpdated {
            asset_id: "a".into(),
            version: "v003".into(),
        };
        assert_eq!(bumped.kind(), "version_updated");
    }
}
