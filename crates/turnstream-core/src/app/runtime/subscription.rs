use tokio::sync::mpsc;

use crate::app::domain::event::StreamEvent;
use crate::app::domain::types::{StreamId, SubscriberId};

/// An ordered slice of a stream delivered to one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBatch {
    pub seq: u64,
    pub events: Vec<StreamEvent>,
}

impl StreamBatch {
    pub fn has_terminal(&self) -> bool {
        self.events.iter().any(StreamEvent::is_terminal)
    }
}

/// Receiving side of a stream subscription.
///
/// Batches arrive in stream order. The channel closes when the subscriber is
/// unsubscribed or after the stream's terminal batch has been delivered.
pub struct EventSubscription {
    pub stream_id: StreamId,
    pub subscriber_id: SubscriberId,
    rx: mpsc::UnboundedReceiver<StreamBatch>,
}

impl EventSubscription {
    pub(crate) fn new(
        stream_id: StreamId,
        subscriber_id: SubscriberId,
        rx: mpsc::UnboundedReceiver<StreamBatch>,
    ) -> Self {
        Self {
            stream_id,
            subscriber_id,
            rx,
        }
    }

    pub async fn recv(&mut self) -> Option<StreamBatch> {
        self.rx.recv().await
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("stream_id", &self.stream_id)
            .field("subscriber_id", &self.subscriber_id)
            .finish_non_exhaustive()
    }
}
