use tokio::sync::mpsc;

use super::MessageDraft;

/// Pulls whatever else is already queued after `first`, up to `max_batch`
/// drafts, without awaiting. Keeps the worker's dequeue loop from paying
/// one wakeup per message under load.
pub(crate) fn drain_message_batch(
    first: MessageDraft,
    rx: &mut mpsc::Receiver<MessageDraft>,
    max_batch: usize,
) -> Vec<MessageDraft> {
    let max_batch = max_batch.max(1);
    let mut batch = vec![first];
    while batch.len() < max_batch {
        let Ok(next) = rx.try_recv() else {
            break;
        };
        batch.push(next);
    }
    batch
}

#[cfg(test)]
mod tests {
    use orrery_core::{ChannelId, MemberId, MessageId, PlanetId};
    use tokio::sync::mpsc;

    use super::drain_message_batch;
    use crate::staging::MessageDraft;

    fn draft(id: i64) -> MessageDraft {
        MessageDraft {
            id: MessageId(id),
            planet_id: PlanetId(1),
            channel_id: ChannelId(2),
            author_member_id: MemberId(3),
            content: String::from("hello"),
        }
    }

    #[test]
    fn drains_up_to_max_batch_size() {
        let (tx, mut rx) = mpsc::channel::<MessageDraft>(8);
        tx.try_send(draft(2)).expect("second draft should queue");
        tx.try_send(draft(3)).expect("third draft should queue");

        let batch = drain_message_batch(draft(1), &mut rx, 2);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, MessageId(1));
        assert_eq!(batch[1].id, MessageId(2));
        assert_eq!(rx.try_recv().map(|draft| draft.id), Ok(MessageId(3)));
    }

    #[test]
    fn defaults_to_single_item_when_max_batch_is_zero() {
        let (tx, mut rx) = mpsc::channel::<MessageDraft>(4);
        tx.try_send(draft(2)).expect("second draft should queue");

        let batch = drain_message_batch(draft(1), &mut rx, 0);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, MessageId(1));
        assert_eq!(rx.try_recv().map(|draft| draft.id), Ok(MessageId(2)));
    }
}
