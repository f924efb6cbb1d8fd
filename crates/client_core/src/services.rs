//! Collaborators the core consumes but does not own.

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ConversationId, UserId, UserProfile},
    protocol::{ChatEvent, ConversationSummary},
};

use crate::error::AuthError;

/// Shortest query the user directory is asked about.
pub const MIN_SEARCH_QUERY_LEN: usize = 2;

pub fn is_searchable(query: &str) -> bool {
    query.chars().count() >= MIN_SEARCH_QUERY_LEN
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn register(&self, user_name: &str, secret: &str) -> Result<String, AuthError>;
    async fn login(&self, user_name: &str, secret: &str) -> Result<String, AuthError>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    async fn list_conversations(&self, identity: &UserId) -> Result<Vec<ConversationSummary>>;
    async fn create_conversation(&self, other: &UserId) -> Result<ConversationSummary>;
    /// History of one conversation, oldest first.
    async fn fetch_history(&self, conversation_id: &ConversationId) -> Result<Vec<ChatEvent>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Implementations return an empty list without a round trip when
    /// [`is_searchable`] rejects the prefix.
    async fn search(&self, prefix: &str) -> Result<Vec<UserProfile>>;
}
