use crate::{
    ContactRecord, ConversationSummary, MessageRecord, NewUser, Repository, StorageError,
    UserRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};

const INIT_SQL: &str = include_str!("../migrations/001_init.sql");

pub struct PgRepository {
    client: Client,
    _connection_task: JoinHandle<()>,
}

/// Establishes connectivity to the PostgreSQL backend.
pub async fn connect(dsn: &str) -> Result<PgRepository, StorageError> {
    let (client, connection) = tokio_postgres::connect(dsn, NoTls)
        .await
        .map_err(|_| StorageError::Postgres)?;
    let task = tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::error!("postgres connection stopped: {}", error);
        }
    });
    Ok(PgRepository {
        client,
        _connection_task: task,
    })
}

fn user_from_row(row: &Row) -> UserRecord {
    UserRecord {
        id: row.get(0),
        username: row.get(1),
        display_name: row.get(2),
        avatar_url: row.get(3),
        is_online: row.get(4),
        last_seen: row.get(5),
        created_at: row.get(6),
    }
}

fn message_from_row(row: &Row) -> MessageRecord {
    MessageRecord {
        id: row.get(0),
        sender_id: row.get(1),
        receiver_id: row.get(2),
        content: row.get(3),
        created_at: row.get(4),
        is_read: row.get(5),
        read_at: row.get(6),
    }
}

impl PgRepository {
    /// Applies bundled migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        self.client
            .batch_execute(INIT_SQL)
            .await
            .map_err(|_| StorageError::Postgres)
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn find_user(&self, id: i64) -> Result<Option<UserRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, username, display_name, avatar_url, is_online, last_seen, created_at
                FROM app_user WHERE id = $1",
                &[&id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn find_user_by_username(
        &self,
        name: &str,
    ) -> Result<Option<UserRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                "SELECT id, username, display_name, avatar_url, is_online, last_seen, created_at
                FROM app_user WHERE username = $1",
                &[&name],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn create_user(&self, data: &NewUser) -> Result<UserRecord, StorageError> {
        let now = Utc::now();
        let row = self
            .client
            .query_opt(
                "INSERT INTO app_user (username, display_name, avatar_url, is_online, last_seen, created_at)
                VALUES ($1, $2, $3, FALSE, $4, $4)
                ON CONFLICT (username) DO NOTHING
                RETURNING id, username, display_name, avatar_url, is_online, last_seen, created_at",
                &[&data.username, &data.display_name, &data.avatar_url, &now],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        row.map(|row| user_from_row(&row)).ok_or(StorageError::Invalid)
    }

    async fn set_user_presence(
        &self,
        id: i64,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<Option<UserRecord>, StorageError> {
        let row = self
            .client
            .query_opt(
                "UPDATE app_user SET is_online = $2, last_seen = $3 WHERE id = $1
                RETURNING id, username, display_name, avatar_url, is_online, last_seen, created_at",
                &[&id, &is_online, &last_seen],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| user_from_row(&row)))
    }

    async fn list_contacts(&self, user_id: i64) -> Result<Vec<UserRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT u.id, u.username, u.display_name, u.avatar_url, u.is_online, u.last_seen, u.created_at
                FROM app_user u
                INNER JOIN contact c ON u.id = c.contact_id
                WHERE c.owner_id = $1 ORDER BY u.username ASC",
                &[&user_id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn add_contact(
        &self,
        owner_id: i64,
        contact_id: i64,
    ) -> Result<ContactRecord, StorageError> {
        if owner_id == contact_id {
            return Err(StorageError::Invalid);
        }
        let now = Utc::now();
        self.client
            .execute(
                "INSERT INTO contact (owner_id, contact_id, created_at)
                SELECT $1, $2, $3
                WHERE EXISTS (SELECT 1 FROM app_user WHERE id = $1)
                  AND EXISTS (SELECT 1 FROM app_user WHERE id = $2)
                ON CONFLICT (owner_id, contact_id) DO NOTHING",
                &[&owner_id, &contact_id, &now],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        let row = self
            .client
            .query_opt(
                "SELECT owner_id, contact_id, created_at FROM contact
                WHERE owner_id = $1 AND contact_id = $2",
                &[&owner_id, &contact_id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        let row = row.ok_or(StorageError::Missing)?;
        Ok(ContactRecord {
            owner_id: row.get(0),
            contact_id: row.get(1),
            created_at: row.get(2),
        })
    }

    async fn remove_contact(
        &self,
        owner_id: i64,
        contact_id: i64,
    ) -> Result<bool, StorageError> {
        let affected = self
            .client
            .execute(
                "DELETE FROM contact WHERE owner_id = $1 AND contact_id = $2",
                &[&owner_id, &contact_id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(affected > 0)
    }

    async fn list_messages(
        &self,
        user_id: i64,
        contact_id: i64,
    ) -> Result<Vec<MessageRecord>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT id, sender_id, receiver_id, content, created_at, is_read, read_at
                FROM message
                WHERE (sender_id = $1 AND receiver_id = $2)
                   OR (sender_id = $2 AND receiver_id = $1)
                ORDER BY created_at ASC, id ASC",
                &[&user_id, &contact_id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(rows.iter().map(message_from_row).collect())
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
        let now = Utc::now();
        let row = self
            .client
            .query_opt(
                "INSERT INTO message (sender_id, receiver_id, content, created_at, is_read)
                SELECT $1, $2, $3, $4, FALSE
                WHERE EXISTS (SELECT 1 FROM app_user WHERE id = $1)
                  AND EXISTS (SELECT 1 FROM app_user WHERE id = $2)
                RETURNING id, sender_id, receiver_id, content, created_at, is_read, read_at",
                &[&sender_id, &receiver_id, &content, &now],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        row.map(|row| message_from_row(&row)).ok_or(StorageError::Missing)
    }

    async fn mark_message_read(
        &self,
        message_id: i64,
    ) -> Result<Option<MessageRecord>, StorageError> {
        let now = Utc::now();
        let row = self
            .client
            .query_opt(
                "UPDATE message SET is_read = TRUE, read_at = COALESCE(read_at, $2)
                WHERE id = $1
                RETURNING id, sender_id, receiver_id, content, created_at, is_read, read_at",
                &[&message_id, &now],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(row.map(|row| message_from_row(&row)))
    }

    async fn list_recent_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationSummary>, StorageError> {
        let rows = self
            .client
            .query(
                "SELECT u.id, u.username, u.display_name, u.avatar_url, u.is_online, u.last_seen, u.created_at,
                        m.id, m.sender_id, m.receiver_id, m.content, m.created_at, m.is_read, m.read_at
                FROM contact c
                INNER JOIN app_user u ON u.id = c.contact_id
                INNER JOIN LATERAL (
                    SELECT id, sender_id, receiver_id, content, created_at, is_read, read_at
                    FROM message
                    WHERE (sender_id = c.owner_id AND receiver_id = c.contact_id)
                       OR (sender_id = c.contact_id AND receiver_id = c.owner_id)
                    ORDER BY created_at DESC, id DESC
                    LIMIT 1
                ) m ON TRUE
                WHERE c.owner_id = $1
                ORDER BY m.created_at DESC, m.id DESC",
                &[&user_id],
            )
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                contact: UserRecord {
                    id: row.get(0),
                    username: row.get(1),
                    display_name: row.get(2),
                    avatar_url: row.get(3),
                    is_online: row.get(4),
                    last_seen: row.get(5),
                    created_at: row.get(6),
                },
                last_message: MessageRecord {
                    id: row.get(7),
                    sender_id: row.get(8),
                    receiver_id: row.get(9),
                    content: row.get(10),
                    created_at: row.get(11),
                    is_read: row.get(12),
                    read_at: row.get(13),
                },
            })
            .collect())
    }

    async fn readiness(&self) -> Result<(), StorageError> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map_err(|_| StorageError::Postgres)?;
        Ok(())
    }
}
