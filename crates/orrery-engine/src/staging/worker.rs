use std::collections::{hash_map::Entry, HashMap};
use std::sync::Arc;
use std::time::Duration;

use orrery_core::ChannelId;
use orrery_protocol::{PlanetEvent, RelayedMessage};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::{relay::RelayNotifier, store::MessageSink};

use super::{drain::drain_message_batch, now_unix, MessageDraft, StagingShared};

/// The single drain loop. Owns the per-channel index counters, so indices
/// are assigned exactly once and strictly increase in dequeue order.
/// Closing the queue triggers a final flush before the task exits.
pub(crate) async fn run(
    mut rx: mpsc::Receiver<MessageDraft>,
    shared: Arc<StagingShared>,
    sink: Arc<dyn MessageSink>,
    relay: Arc<dyn RelayNotifier>,
    flush_interval: Duration,
    batch_limit: usize,
) {
    let mut indices: HashMap<ChannelId, u64> = HashMap::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(first) => {
                    let batch = drain_message_batch(first, &mut rx, batch_limit);
                    for draft in batch {
                        stage_one(draft, &mut indices, &shared, sink.as_ref(), relay.as_ref())
                            .await;
                    }
                }
                None => {
                    flush(&shared, sink.as_ref()).await;
                    tracing::info!(event = "staging.worker.stopped");
                    break;
                }
            },
            _ = ticker.tick() => {
                flush(&shared, sink.as_ref()).await;
            }
        }
    }
}

async fn stage_one(
    draft: MessageDraft,
    indices: &mut HashMap<ChannelId, u64>,
    shared: &StagingShared,
    sink: &dyn MessageSink,
    relay: &dyn RelayNotifier,
) {
    if shared.blocked.lock().await.remove(&draft.id) {
        tracing::debug!(event = "staging.blocked_drop", message_id = %draft.id);
        return;
    }

    let index_slot = match indices.entry(draft.channel_id) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            let seed = match sink.message_count(draft.channel_id).await {
                Ok(count) => count,
                Err(error) => {
                    tracing::warn!(
                        event = "staging.index_seed_failed",
                        channel_id = %draft.channel_id,
                        error = %error
                    );
                    0
                }
            };
            entry.insert(seed)
        }
    };
    let channel_index = *index_slot;
    *index_slot += 1;

    let message = RelayedMessage {
        id: draft.id,
        planet_id: draft.planet_id,
        channel_id: draft.channel_id,
        author_member_id: draft.author_member_id,
        content: draft.content,
        channel_index,
        sent_at_unix: now_unix(),
    };

    relay
        .publish(PlanetEvent::MessageCreated {
            message: message.clone(),
        })
        .await;
    shared.staged.write().await.insert(message.id, message);
}

/// Persists the staged snapshot in per-channel index order. On failure
/// the snapshot stays staged and the next tick retries; entries added
/// while the write was in flight are untouched either way.
async fn flush(shared: &StagingShared, sink: &dyn MessageSink) {
    let mut snapshot: Vec<RelayedMessage> =
        shared.staged.read().await.values().cloned().collect();
    if snapshot.is_empty() {
        return;
    }
    snapshot.sort_by_key(|message| (message.channel_id, message.channel_index));

    match sink.persist_batch(&snapshot).await {
        Ok(()) => {
            let mut staged = shared.staged.write().await;
            for message in &snapshot {
                staged.remove(&message.id);
            }
            tracing::debug!(event = "staging.flushed", count = snapshot.len());
        }
        Err(error) => {
            tracing::warn!(event = "staging.flush_failed", error = %error);
        }
    }
}
