//! The out-of-band UI event bus: a broadcast channel behind the
//! [`EventSink`] trait. Emission is single-producer per subject, so
//! subscribers observe events for one subject in emission order.

use mcpr_core::{EventSink, UiEvent};
use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: UiEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpr_core::ServerStatus;

    #[tokio::test]
    async fn test_subscribers_see_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(UiEvent::ServerStatusChanged {
            server_id: "server-1".to_string(),
            status: ServerStatus::Starting,
        });
        bus.emit(UiEvent::ServerStatusChanged {
            server_id: "server-1".to_string(),
            status: ServerStatus::Running,
        });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            UiEvent::ServerStatusChanged {
                status: ServerStatus::Starting,
                ..
            }
        ));
        assert!(matches!(
            second,
            UiEvent::ServerStatusChanged {
                status: ServerStatus::Running,
                ..
            }
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(UiEvent::ApprovalNew {
            approval_id: "approval-1".to_string(),
        });
    }
}
