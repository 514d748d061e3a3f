use chrono::{DateTime, Utc};
use courier_proto::{MessageBody, ServerEvent};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Merges the two delivery paths a client observes: live pushes over the
/// event channel and authoritative fetches from the request/response
/// surface. Pushed payloads are treated as hints; a fetch replaces the
/// conversation it covers. Messages deduplicate by id, and an observed read
/// flag never reverts, even when a stale fetch races behind a receipt.
pub struct Reconciler {
    self_user_id: i64,
    conversations: HashMap<i64, BTreeMap<i64, MessageBody>>,
    pending_receipts: HashMap<i64, DateTime<Utc>>,
    presence: HashMap<i64, bool>,
    typing: HashMap<i64, bool>,
}

impl Reconciler {
    pub fn new(self_user_id: i64) -> Self {
        Reconciler {
            self_user_id,
            conversations: HashMap::new(),
            pending_receipts: HashMap::new(),
            presence: HashMap::new(),
            typing: HashMap::new(),
        }
    }

    /// Folds one pushed event into local state.
    pub fn apply_push(&mut self, event: &ServerEvent) {
        match event {
            ServerEvent::Message(body) | ServerEvent::MessageSent(body) => {
                self.upsert_message(body);
            }
            ServerEvent::ReadReceipt(receipt) => {
                self.apply_receipt(receipt.message_id, receipt.read_at);
            }
            ServerEvent::StatusChange(status) => {
                self.presence.insert(status.user_id, status.is_online);
                if !status.is_online {
                    self.typing.remove(&status.user_id);
                }
            }
            ServerEvent::Typing(typing) => {
                self.typing.insert(typing.sender_id, typing.is_typing);
            }
        }
    }

    /// Replaces the conversation with `peer_id` by the fetched history.
    /// Pushes that postdate the fetch snapshot (ids above the highest
    /// fetched id) survive the replacement; everything else is re-derived
    /// from the authoritative copy.
    pub fn apply_fetch(&mut self, peer_id: i64, messages: &[MessageBody]) {
        let max_fetched = messages.iter().map(|m| m.id).max().unwrap_or(0);
        let existing = self.conversations.remove(&peer_id).unwrap_or_default();
        let mut rebuilt = BTreeMap::new();
        for body in messages {
            let mut record = body.clone();
            let prior = existing.get(&record.id);
            self.settle_read_state(&mut record, prior);
            rebuilt.insert(record.id, record);
        }
        for (id, record) in existing {
            if id > max_fetched {
                rebuilt.insert(id, record);
            }
        }
        self.conversations.insert(peer_id, rebuilt);
    }

    /// The conversation with `peer_id`, ascending by `(created_at, id)`.
    pub fn conversation(&self, peer_id: i64) -> Vec<MessageBody> {
        let mut messages = self
            .conversations
            .get(&peer_id)
            .map(|thread| thread.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        messages
    }

    /// Messages from `peer_id` to this user not yet marked read.
    pub fn unread_from(&self, peer_id: i64) -> usize {
        self.conversations
            .get(&peer_id)
            .map(|thread| {
                thread
                    .values()
                    .filter(|m| m.sender_id == peer_id && !m.is_read)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.presence.get(&user_id).copied().unwrap_or(false)
    }

    pub fn is_typing(&self, peer_id: i64) -> bool {
        self.typing.get(&peer_id).copied().unwrap_or(false)
    }

    fn peer_of(&self, body: &MessageBody) -> Option<i64> {
        if body.sender_id == self.self_user_id {
            Some(body.receiver_id)
        } else if body.receiver_id == self.self_user_id {
            Some(body.sender_id)
        } else {
            None
        }
    }

    fn upsert_message(&mut self, body: &MessageBody) {
        let Some(peer) = self.peer_of(body) else {
            debug!(message = body.id, "pushed message does not involve this user");
            return;
        };
        let mut record = body.clone();
        let prior = self
            .conversations
            .get(&peer)
            .and_then(|t| t.get(&record.id))
            .cloned();
        self.settle_read_state(&mut record, prior.as_ref());
        self.conversations
            .entry(peer)
            .or_default()
            .insert(record.id, record);
    }

    fn apply_receipt(&mut self, message_id: i64, read_at: DateTime<Utc>) {
        for thread in self.conversations.values_mut() {
            if let Some(message) = thread.get_mut(&message_id) {
                if !message.is_read {
                    message.is_read = true;
                    message.read_at = Some(read_at);
                }
                return;
            }
        }
        // receipt raced ahead of its message; hold it for the merge
        self.pending_receipts.insert(message_id, read_at);
    }

    fn settle_read_state(&mut self, record: &mut MessageBody, prior: Option<&MessageBody>) {
        if let Some(read_at) = self.pending_receipts.remove(&record.id) {
            record.is_read = true;
            record.read_at = Some(read_at);
        }
        if let Some(prior) = prior {
            if prior.is_read && !record.is_read {
                record.is_read = true;
                record.read_at = prior.read_at;
            }
        }
    }
}
