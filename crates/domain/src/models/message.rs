//! Group chat message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::user::PublicUserProfile;

/// A chat message with its sender's public profile, as delivered over the
/// channel and returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender: PublicUserProfile,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

/// Maximum chat message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Validated chat message content.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MessageContent {
    #[validate(custom(function = "shared::validation::validate_non_blank"))]
    #[validate(length(max = 2000, message = "Message must be at most 2000 characters"))]
    pub content: String,
}

/// Response for the message history endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MessagesResponse {
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_validation() {
        let ok = MessageContent {
            content: "leaving in 5".to_string(),
        };
        assert!(ok.validate().is_ok());

        let blank = MessageContent {
            content: "   ".to_string(),
        };
        assert!(blank.validate().is_err());

        let long = MessageContent {
            content: "x".repeat(MAX_MESSAGE_LENGTH + 1),
        };
        assert!(long.validate().is_err());
    }
}
