use std::collections::HashMap;

use shared::{
    domain::ConversationId,
    protocol::{ChatEvent, ConversationSummary},
};
use tracing::debug;

/// Conversation summaries keyed by id. Unordered; presenters sort.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    entries: HashMap<ConversationId, ConversationSummary>,
    last_error: Option<String>,
}

impl ConversationIndex {
    /// Replaces every entry with a fresh snapshot.
    pub fn replace(&mut self, snapshot: Vec<ConversationSummary>) {
        self.entries = snapshot
            .into_iter()
            .map(|summary| (summary.id.clone(), summary))
            .collect();
        self.last_error = None;
    }

    /// Moves the preview of the matching conversation to `event`, unless the
    /// current preview is that event or a newer one.
    ///
    /// Events for conversations that are not indexed yet are dropped; the
    /// refresh that follows conversation creation picks them up.
    pub fn apply_event(&mut self, event: &ChatEvent) -> bool {
        let Some(entry) = self.entries.get_mut(&event.conversation_id) else {
            debug!(conversation_id = %event.conversation_id, "index: event for unknown conversation dropped");
            return false;
        };
        if let Some(preview) = entry.preview() {
            if preview.id == event.id || event.created_at < preview.created_at {
                return false;
            }
        }
        entry.set_preview(event.clone());
        true
    }

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn get(&self, conversation_id: &ConversationId) -> Option<&ConversationSummary> {
        self.entries.get(conversation_id)
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.entries.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationSummary> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_error = None;
    }
}

#[cfg(test)]
#[path = "tests/index_tests.rs"]
mod tests;
