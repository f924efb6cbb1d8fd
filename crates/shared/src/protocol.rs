use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConversationId, EventId, Participant, UserId, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub content: String,
}

/// One immutable entry in a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    pub id: EventId,
    #[serde(rename = "chatId")]
    pub conversation_id: ConversationId,
    pub sender: UserProfile,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl ChatEvent {
    pub fn content(&self) -> &str {
        &self.payload.content
    }

    pub fn is_from(&self, identity: &UserId) -> bool {
        &self.sender.id == identity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<Participant>,
    /// The server ships the preview as a list holding at most the newest event.
    #[serde(default, rename = "events")]
    pub recent_events: Vec<ChatEvent>,
}

impl ConversationSummary {
    pub fn preview(&self) -> Option<&ChatEvent> {
        self.recent_events.first()
    }

    pub fn set_preview(&mut self, event: ChatEvent) {
        self.recent_events = vec![event];
    }

    pub fn counterpart(&self, me: &UserId) -> Option<&UserProfile> {
        self.participants
            .iter()
            .map(|participant| &participant.user)
            .find(|user| &user.id != me)
    }

    pub fn has_participant(&self, identity: &UserId) -> bool {
        self.participants
            .iter()
            .any(|participant| &participant.user.id == identity)
    }
}

/// Frames pushed by the server over the live channel. Unrecognised `type`
/// tags decode to [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    NewEvent {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        event: ChatEvent,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    SendMessage {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub user_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenResponse {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_id: UserId,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
