use async_trait::async_trait;
use orrery_protocol::PlanetEvent;
use tokio::sync::mpsc;

/// Seam toward the real-time relay collaborator. The engine's mutation
/// services and the staging worker publish here after their change
/// commits; the permission engine itself never publishes.
#[async_trait]
pub trait RelayNotifier: Send + Sync {
    async fn publish(&self, event: PlanetEvent);
}

/// Relay that drops every event. For embedders without a live gateway.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRelay;

#[async_trait]
impl RelayNotifier for NullRelay {
    async fn publish(&self, _event: PlanetEvent) {}
}

/// Relay backed by an unbounded channel, for tests and in-process fanout.
pub struct BufferedRelay {
    tx: mpsc::UnboundedSender<PlanetEvent>,
}

impl BufferedRelay {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlanetEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl RelayNotifier for BufferedRelay {
    async fn publish(&self, event: PlanetEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(event = "relay.buffer.closed");
        }
    }
}
