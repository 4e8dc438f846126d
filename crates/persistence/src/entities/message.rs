//! Group message entity (database row mapping).

use chrono::{DateTime, Utc};
use domain::models::message::ChatMessage;
use domain::models::user::PublicUserProfile;
use sqlx::FromRow;
use uuid::Uuid;

use super::user::GenderDb;

/// Message row joined with the sender's public profile.
#[derive(Debug, Clone, FromRow)]
pub struct MessageWithSenderEntity {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub display_name: String,
    pub contact_number: Option<String>,
    pub avatar_url: Option<String>,
    pub gender: GenderDb,
}

impl From<MessageWithSenderEntity> for ChatMessage {
    fn from(entity: MessageWithSenderEntity) -> Self {
        Self {
            id: entity.id,
            group_id: entity.group_id,
            sender: PublicUserProfile {
                id: entity.sender_id,
                display_name: entity.display_name,
                contact_number: entity.contact_number,
                avatar_url: entity.avatar_url,
                gender: entity.gender.into(),
            },
            content: entity.content,
            sent_at: entity.created_at,
        }
    }
}
