//! Process-local publish/subscribe (§4.8). Construction-time context, not a process-wide
//! singleton: the core receives an [`EventBus`] at startup rather than reaching for one
//! through a global (§9 Design Notes, "Global process state").

use std::sync::{Arc, RwLock};

use crate::job::Job;

#[derive(Debug, Clone)]
pub enum EventKind {
    JobInstance,
    JobQueue,
    JobQueued,
    JobDelay,
    JobDelayed,
    JobQueueDelayed,
    JobQueuedDelayed,
    JobPerform,
    JobPerforming,
    JobRunning,
    JobComplete,
    JobCancelled,
    JobFailure,
    JobDone,
    WorkerInstance,
    WorkerStartup,
    WorkerRegister,
    WorkerUnregister,
    WorkerWork,
    WorkerFork,
    WorkerForkParent,
    WorkerForkChild,
    WorkerForkError,
    WorkerWorkingOn,
    WorkerDoneWorking,
    WorkerKillChild,
    WorkerPause,
    WorkerResume,
    WorkerWakeup,
    WorkerShutdown,
    WorkerForceShutdown,
    WorkerCleanup,
    WorkerLowMemory,
    WorkerCorrupt,
}

impl EventKind {
    /// Only these carry a subject that a listener is allowed to veto by returning
    /// `false`.
    pub fn is_vetoable(&self) -> bool {
        matches!(
            self,
            EventKind::JobQueue | EventKind::JobDelay | EventKind::JobPerform | EventKind::JobQueueDelayed
        )
    }
}

#[derive(Debug, Clone)]
pub enum EventSubject {
    Job(Job),
    JobId(String),
    WorkerId(String),
    Message(String),
    None,
}

pub type Listener = Arc<dyn Fn(&EventKind, &EventSubject) -> bool + Send + Sync>;

/// A cloneable handle to the process-local event bus. Cloning shares the listener
/// list; it does not fork a new bus.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<RwLock<Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus::default()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&EventKind, &EventSubject) -> bool + Send + Sync + 'static,
    {
        self.listeners.write().unwrap().push(Arc::new(listener));
    }

    /// Publish an event. Returns `false` only if the kind is vetoable and at least one
    /// listener explicitly returned `false`; non-vetoable kinds always return `true`.
    pub fn publish(&self, kind: EventKind, subject: EventSubject) -> bool {
        let mut allowed = true;
        for listener in self.listeners.read().unwrap().iter() {
            if !listener(&kind, &subject) && kind.is_vetoable() {
                allowed = false;
            }
        }
        allowed
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unvetoed_publish_succeeds() {
        let bus = EventBus::new();
        assert!(bus.publish(EventKind::JobComplete, EventSubject::None));
    }

    #[test]
    fn a_listener_can_veto_a_vetoable_event() {
        let bus = EventBus::new();
        bus.subscribe(|_kind, _subject| false);
        assert!(!bus.publish(EventKind::JobQueue, EventSubject::None));
    }

    #[test]
    fn veto_is_ignored_on_non_vetoable_events() {
        let bus = EventBus::new();
        bus.subscribe(|_kind, _subject| false);
        assert!(bus.publish(EventKind::JobComplete, EventSubject::None));
    }

    #[test]
    fn multiple_listeners_all_run() {
        let bus = EventBus::new();
        let calls = Arc::new(RwLock::new(0));
        let calls2 = calls.clone();
        bus.subscribe(move |_, _| {
            *calls2.write().unwrap() += 1;
            true
        });
        let calls3 = calls.clone();
        bus.subscribe(move |_, _| {
            *calls3.write().unwrap() += 1;
            true
        });
        bus.publish(EventKind::JobQueued, EventSubject::None);
        assert_eq!(*calls.read().unwrap(), 2);
    }
}
