//! Group message repository for database operations.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::MessageWithSenderEntity;
use crate::metrics::QueryTimer;

/// Repository for group chat messages.
#[derive(Clone)]
pub struct MessageRepository {
    pool: PgPool,
}

impl MessageRepository {
    /// Creates a new MessageRepository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a message and return it joined with the sender's profile.
    pub async fn insert_message(
        &self,
        group_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<MessageWithSenderEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_group_message");
        let result = sqlx::query_as::<_, MessageWithSenderEntity>(
            r#"
            WITH inserted AS (
                INSERT INTO group_messages (group_id, sender_id, content)
                VALUES ($1, $2, $3)
                RETURNING id, group_id, sender_id, content, created_at
            )
            SELECT i.id, i.group_id, i.sender_id, i.content, i.created_at,
                   u.display_name, u.contact_number, u.avatar_url, u.gender
            FROM inserted i
            JOIN users u ON i.sender_id = u.id
            "#,
        )
        .bind(group_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await;
        timer.record();
        result
    }

    /// Load the most recent messages of a group in chronological order.
    pub async fn list_recent(
        &self,
        group_id: Uuid,
        limit: i64,
    ) -> Result<Vec<MessageWithSenderEntity>, sqlx::Error> {
        let timer = QueryTimer::new("list_recent_group_messages");
        let result = sqlx::query_as::<_, MessageWithSenderEntity>(
            r#"
            SELECT id, group_id, sender_id, content, created_at,
                   display_name, contact_number, avatar_url, gender
            FROM (
                SELECT m.id, m.group_id, m.sender_id, m.content, m.created_at,
                       u.display_name, u.contact_number, u.avatar_url, u.gender
                FROM group_messages m
                JOIN users u ON m.sender_id = u.id
                WHERE m.group_id = $1
                ORDER BY m.created_at DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC
            "#,
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.record();
        result
    }
}

#[cfg(test)]
mod tests {
    // Note: MessageRepository tests require a database connection and are covered by integration tests
}
