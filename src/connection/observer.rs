//! Connection-wide event listeners.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::identifiers::{SessionToken, Uid};
use crate::speculation::{DiscardReason, SpeculationSnapshot};

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Lifecycle event of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A session was registered.
    SessionCreated { session: SessionToken, uid: Uid },
    /// A session was forgotten.
    SessionCleanedUp { session: SessionToken },
    /// Engine initialization requested by `uid` finished.
    WarmupCompleted { uid: Uid },
    /// A speculation now holds a renderer.
    SpeculationStarted(SpeculationSnapshot),
    /// A speculation was handed to a launching tab.
    SpeculationConsumed(SpeculationSnapshot),
    /// A speculation was destroyed unused.
    SpeculationDiscarded {
        snapshot: SpeculationSnapshot,
        reason: DiscardReason,
    },
}

// ============================================================================
// ConnectionObserver
// ============================================================================

/// Listener for [`ConnectionEvent`]s.
///
/// Called on the control loop. Listeners may add or remove listeners
/// from inside the callback.
pub trait ConnectionObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &ConnectionEvent);
}

// ============================================================================
// ObserverList
// ============================================================================

/// Registered listeners.
///
/// Dispatch iterates a snapshot, so changes made during dispatch apply to
/// the next event.
#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
}

impl fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("len", &self.len())
            .finish()
    }
}

impl ObserverList {
    /// Registers `observer`. Registering the same listener twice is a no-op.
    pub fn add(&self, observer: Arc<dyn ConnectionObserver>) {
        let mut observers = self.observers.write();
        if !observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Unregisters `observer`. Returns `false` if it was not registered.
    pub fn remove(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Returns `true` if nobody listens.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Delivers `event` to every listener registered right now.
    pub fn notify(&self, event: &ConnectionEvent) {
        let snapshot = self.observers.read().clone();
        for observer in snapshot {
            observer.on_event(event);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ConnectionEvent>>,
    }

    impl ConnectionObserver for Recorder {
        fn on_event(&self, event: &ConnectionEvent) {
            self.events.lock().push(event.clone());
        }
    }

    /// Removes itself and registers `next` on its first event.
    struct Handoff {
        list: Arc<ObserverList>,
        me: Mutex<Option<Arc<dyn ConnectionObserver>>>,
        next: Arc<dyn ConnectionObserver>,
    }

    impl ConnectionObserver for Handoff {
        fn on_event(&self, _event: &ConnectionEvent) {
            if let Some(me) = self.me.lock().take() {
                self.list.remove(&me);
                self.list.add(Arc::clone(&self.next));
            }
        }
    }

    fn event() -> ConnectionEvent {
        ConnectionEvent::WarmupCompleted { uid: Uid::new(1) }
    }

    #[test]
    fn test_add_is_idempotent() {
        let list = ObserverList::default();
        let recorder: Arc<dyn ConnectionObserver> = Arc::new(Recorder::default());
        list.add(Arc::clone(&recorder));
        list.add(Arc::clone(&recorder));
        assert_eq!(list.len(), 1);
        assert!(list.remove(&recorder));
        assert!(!list.remove(&recorder));
        assert!(list.is_empty());
    }

    #[test]
    fn test_mutation_during_dispatch_applies_next_time() {
        let list = Arc::new(ObserverList::default());
        let recorder = Arc::new(Recorder::default());
        let handoff = Arc::new(Handoff {
            list: Arc::clone(&list),
            me: Mutex::new(None),
            next: recorder.clone(),
        });
        let handoff_dyn: Arc<dyn ConnectionObserver> = handoff.clone();
        *handoff.me.lock() = Some(Arc::clone(&handoff_dyn));
        list.add(handoff_dyn);

        list.notify(&event());
        assert!(recorder.events.lock().is_empty());
        assert_eq!(list.len(), 1);

        list.notify(&event());
        assert_eq!(recorder.events.lock().len(), 1);
    }
}
