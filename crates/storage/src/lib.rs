mod memory;
mod pg;

pub use memory::MemoryRepository;
pub use pg::{connect, PgRepository};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum StorageError {
    Postgres,
    Missing,
    Invalid,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres failure"),
            Self::Missing => write!(f, "missing record"),
            Self::Invalid => write!(f, "invalid state"),
        }
    }
}

impl Error for StorageError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub owner_id: i64,
    pub contact_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub contact: UserRecord,
    pub last_message: MessageRecord,
}

/// Durable CRUD over users, contacts and messages.
///
/// Both implementations (PostgreSQL and in-memory) honor the same contract:
/// `add_contact` is idempotent, `mark_message_read` never reverts the read
/// flag and keeps the first `read_at` stamp, `list_messages` is ascending by
/// `(created_at, id)` and `list_recent_conversations` is descending by the
/// last exchanged message, omitting contacts without history.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn find_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError>;
    async fn find_user_by_username(&self, name: &str) -> Result<Option<UserRecord>, StorageError>;
    async fn create_user(&self, data: &NewUser) -> Result<UserRecord, StorageError>;
    async fn set_user_presence(
        &self,
        id: i64,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<Option<UserRecord>, StorageError>;
    async fn list_contacts(&self, user_id: i64) -> Result<Vec<UserRecord>, StorageError>;
    async fn add_contact(&self, owner_id: i64, contact_id: i64)
        -> Result<ContactRecord, StorageError>;
    async fn remove_contact(&self, owner_id: i64, contact_id: i64)
        -> Result<bool, StorageError>;
    async fn list_messages(
        &self,
        user_id: i64,
        contact_id: i64,
    ) -> Result<Vec<MessageRecord>, StorageError>;
    async fn create_message(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
    ) -> Result<MessageRecord, StorageError>;
    async fn mark_message_read(
        &self,
        message_id: i64,
    ) -> Result<Option<MessageRecord>, StorageError>;
    async fn list_recent_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StorageError>;
    async fn readiness(&self) -> Result<(), StorageError>;
}
