use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use orrery_core::{ChannelId, MemberId, MessageId, PlanetId};
use orrery_protocol::RelayedMessage;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::{
    config::EngineConfig, errors::EngineError, relay::RelayNotifier, store::MessageSink,
};

pub(crate) mod drain;
pub(crate) mod worker;

/// A message as handed to the staging queue: no index, no timestamp.
/// Both are assigned by the worker at dequeue time, so index order always
/// matches persisted-write order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub id: MessageId,
    pub planet_id: PlanetId,
    pub channel_id: ChannelId,
    pub author_member_id: MemberId,
    pub content: String,
}

pub(crate) struct StagingShared {
    /// Staged but not yet persisted, keyed by message id.
    staged: RwLock<HashMap<MessageId, RelayedMessage>>,
    /// Ids removed before their draft was drained. Consulted and consumed
    /// at dequeue, so a removed message is never staged or persisted.
    blocked: Mutex<HashSet<MessageId>>,
}

/// Handle to the staging pipeline: a bounded queue in front of one drain
/// task that assigns per-channel indices, relays immediately, and
/// persists staged batches on a fixed interval.
pub struct MessageStaging {
    tx: mpsc::Sender<MessageDraft>,
    shared: Arc<StagingShared>,
    worker: JoinHandle<()>,
}

impl MessageStaging {
    /// Starts the drain worker on the current runtime.
    #[must_use]
    pub fn spawn(
        sink: Arc<dyn MessageSink>,
        relay: Arc<dyn RelayNotifier>,
        config: &EngineConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.staging_queue_capacity.max(1));
        let shared = Arc::new(StagingShared {
            staged: RwLock::new(HashMap::new()),
            blocked: Mutex::new(HashSet::new()),
        });
        let worker = tokio::spawn(worker::run(
            rx,
            Arc::clone(&shared),
            sink,
            relay,
            config.staging_flush_interval,
            config.staging_batch_limit,
        ));
        Self { tx, shared, worker }
    }

    /// Queues a draft without blocking. A full queue is backpressure the
    /// caller must surface, not a silent drop.
    ///
    /// # Errors
    /// Returns [`EngineError::StagingQueueFull`] when the queue is at
    /// capacity and [`EngineError::StagingUnavailable`] after shutdown.
    pub fn enqueue(&self, draft: MessageDraft) -> Result<(), EngineError> {
        match self.tx.try_send(draft) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(EngineError::StagingQueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EngineError::StagingUnavailable),
        }
    }

    /// Removes a message before it is persisted: drops it from the staged
    /// map and blocks it from being staged if its draft is still queued.
    pub async fn remove(&self, id: MessageId) {
        self.shared.staged.write().await.remove(&id);
        self.shared.blocked.lock().await.insert(id);
    }

    /// Up to `max` staged messages for the channel, newest first. Used to
    /// merge unpersisted tail messages into channel history reads.
    pub async fn staged_for_channel(&self, channel_id: ChannelId, max: usize) -> Vec<RelayedMessage> {
        let staged = self.shared.staged.read().await;
        let mut messages: Vec<RelayedMessage> = staged
            .values()
            .filter(|message| message.channel_id == channel_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| message.channel_index);
        if messages.len() > max {
            messages.drain(..messages.len() - max);
        }
        messages.reverse();
        messages
    }

    /// Closes the queue and waits for the worker's final flush.
    pub async fn shutdown(self) {
        let Self { tx, shared, worker } = self;
        drop(tx);
        drop(shared);
        if worker.await.is_err() {
            tracing::error!(event = "staging.worker.panicked");
        }
    }
}

pub(crate) fn now_unix() -> i64 {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs();
    i64::try_from(seconds).unwrap_or(i64::MAX)
}
