use pricebook_core::RowKey;
use tokio::sync::broadcast;

use crate::conflict::Resolution;

/// Change notifications for views and hosts. Delivery is best-effort; a
/// lagging subscriber skips ahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Merged rows changed; re-render.
    RowsChanged { rows: Vec<RowKey> },
    ConflictRaised { row: RowKey, server_version: u64 },
    ConflictResolved { row: RowKey, resolution: Resolution },
    WriteFailed { row: RowKey, error: String },
    TornDown,
}

#[derive(Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<EditorEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: EditorEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EditorEvent::TornDown);
        bus.emit(EditorEvent::RowsChanged { rows: vec![] });

        assert_eq!(rx.try_recv().unwrap(), EditorEvent::TornDown);
        assert_eq!(rx.try_recv().unwrap(), EditorEvent::RowsChanged { rows: vec![] });
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.emit(EditorEvent::TornDown);
    }
}
