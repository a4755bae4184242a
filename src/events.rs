//! Progress events from the engine.
//!
//! The engine emits via [`EventBus::emit`]; the CLI (or anything else)
//! subscribes via [`EventBus::subscribe`]. Built on
//! [`tokio::sync::broadcast`] so listeners never slow the engine down.

use tokio::sync::broadcast;

/// Steps of one selection-and-execution cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// About to ask a strategy whether it can handle the task.
    Probing { strategy: String },
    /// The strategy said it cannot.
    Rejected { strategy: String },
    /// The strategy was picked and will run.
    Selected { strategy: String },
    /// `run` returned.
    RunFinished { strategy: String, success: bool },
    /// `cleanup` returned.
    CleanupFinished { strategy: String, success: bool },
    /// Nothing was feasible; carries every name probed, in rank order.
    NoneFeasible { attempted: Vec<String> },
}

/// A broadcast channel that any component can emit to or subscribe from.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all current subscribers.
    /// Returns the number of receivers that will see it.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Subscribe to future events. Past ones are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(Event::Selected {
            strategy: "rsync-local".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            Event::Selected {
                strategy: "rsync-local".to_string()
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(Event::NoneFeasible {
            attempted: vec!["native-copy".to_string()],
        });

        assert!(matches!(rx1.recv().await.unwrap(), Event::NoneFeasible { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), Event::NoneFeasible { .. }));
    }

    #[test]
    fn emit_without_subscribers_returns_zero() {
        let bus = EventBus::default();
        let count = bus.emit(Event::Probing {
            strategy: "rsync-ssh".to_string(),
        });
        assert_eq!(count, 0);
    }
}
