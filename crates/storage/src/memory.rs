use crate::{
    ContactRecord, ConversationSummary, MessageRecord, NewUser, Repository, StorageError,
    UserRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Process-local repository backend with the same observable behavior as the
/// PostgreSQL implementation. Used for tests and as a standalone fallback.
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: BTreeMap<i64, UserRecord>,
    contacts: Vec<ContactRecord>,
    messages: BTreeMap<i64, MessageRecord>,
    next_user_id: i64,
    next_message_id: i64,
}

impl MemoryRepository {
    pub fn new() -> Self {
        MemoryRepository {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn conversation_matches(message: &MessageRecord, a: i64, b: i64) -> bool {
    (message.sender_id == a && message.receiver_id == b)
        || (message.sender_id == b && message.receiver_id == a)
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn find_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn find_user_by_username(
        &self,
        name: &str,
    ) -> Result<Option<UserRecord>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.username == name).cloned())
    }

    async fn create_user(&self, data: &NewUser) -> Result<UserRecord, StorageError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == data.username) {
            return Err(StorageError::Invalid);
        }
        state.next_user_id += 1;
        let now = Utc::now();
        let record = UserRecord {
            id: state.next_user_id,
            username: data.username.clone(),
            display_name: data.display_name.clone(),
            avatar_url: data.avatar_url.clone(),
            is_online: false,
            last_seen: now,
            created_at: now,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_user_presence(
        &self,
        id: i64,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<Option<UserRecord>, StorageError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&id) {
            Some(user) => {
                user.is_online = is_online;
                user.last_seen = last_seen;
                Ok(Some(user.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_contacts(&self, user_id: i64) -> Result<Vec<UserRecord>, StorageError> {
        let state = self.state.lock().await;
        let mut contacts = state
            .contacts
            .iter()
            .filter(|edge| edge.owner_id == user_id)
            .filter_map(|edge| state.users.get(&edge.contact_id).cloned())
            .collect::<Vec<_>>();
        contacts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(contacts)
    }

    async fn add_contact(
        &self,
        owner_id: i64,
        contact_id: i64,
    ) -> Result<ContactRecord, StorageError> {
        if owner_id == contact_id {
            return Err(StorageError::Invalid);
        }
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&owner_id) || !state.users.contains_key(&contact_id) {
            return Err(StorageError::Missing);
        }
        if let Some(existing) = state
            .contacts
            .iter()
            .find(|edge| edge.owner_id == owner_id && edge.contact_id == contact_id)
        {
            return Ok(existing.clone());
        }
        let record = ContactRecord {
            owner_id,
            contact_id,
            created_at: Utc::now(),
        };
        state.contacts.push(record.clone());
        Ok(record)
    }

    async fn remove_contact(
        &self,
        owner_id: i64,
        contact_id: i64,
    ) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        let before = state.contacts.len();
        state
            .contacts
            .retain(|edge| !(edge.owner_id == owner_id && edge.contact_id == contact_id));
        Ok(state.contacts.len() < before)
    }

    async fn list_messages(
        &self,
        user_id: i64,
        contact_id: i64,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let state = self.state.lock().await;
        let mut messages = state
            .messages
            .values()
            .filter(|m| conversation_matches(m, user_id, contact_id))
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn create_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<MessageRecord, StorageError> {
        if content.is_empty() {
            return Err(StorageError::Invalid);
        }
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&sender_id) || !state.users.contains_key(&receiver_id) {
            return Err(StorageError::Missing);
        }
        state.next_message_id += 1;
        let record = MessageRecord {
            id: state.next_message_id,
            sender_id,
            receiver_id,
            content: content.to_string(),
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
        };
        state.messages.insert(record.id, record.clone());
        Ok(record)
    }

    async fn mark_message_read(
        &self,
        message_id: i64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let mut state = self.state.lock().await;
        match state.messages.get_mut(&message_id) {
            Some(message) => {
                if !message.is_read {
                    message.is_read = true;
                    message.read_at = Some(Utc::now());
                }
                Ok(Some(message.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_recent_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        let state = self.state.lock().await;
        let mut summaries = Vec::new();
        for edge in state.contacts.iter().filter(|e| e.owner_id == user_id) {
            let Some(contact) = state.users.get(&edge.contact_id) else {
                continue;
            };
            let last_message = state
                .messages
                .values()
                .filter(|m| conversation_matches(m, user_id, edge.contact_id))
                .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            if let Some(message) = last_message {
                summaries.push(ConversationSummary {
                    contact: contact.clone(),
                    last_message: message.clone(),
                });
            }
        }
        summaries.sort_by(|a, b| {
            b.last_message
                .created_at
                .cmp(&a.last_message.created_at)
                .then(b.last_message.id.cmp(&a.last_message.id))
        });
        Ok(summaries)
    }

    async fn readiness(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
