use std::collections::HashSet;

use shared::{domain::ConversationId, protocol::ChatEvent};
use tracing::debug;

/// Proof that a history request was issued for a particular selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionTicket {
    conversation_id: ConversationId,
    epoch: u64,
}

impl SelectionTicket {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HistoryState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

/// Ordered history of the selected conversation.
///
/// Events are kept ascending by creation time; equal timestamps keep the order
/// in which they reached the timeline.
#[derive(Debug, Default)]
pub struct ConversationTimeline {
    selected: Option<ConversationId>,
    epoch: u64,
    events: Vec<ChatEvent>,
    history: HistoryState,
}

impl ConversationTimeline {
    /// Switches to `conversation_id`, dropping everything shown so far.
    pub fn select(&mut self, conversation_id: ConversationId) -> SelectionTicket {
        self.epoch += 1;
        self.events.clear();
        self.history = HistoryState::Loading;
        self.selected = Some(conversation_id.clone());
        SelectionTicket {
            conversation_id,
            epoch: self.epoch,
        }
    }

    /// Ticket for re-fetching the current selection without clearing it.
    pub fn refetch(&mut self) -> Option<SelectionTicket> {
        let conversation_id = self.selected.clone()?;
        self.history = HistoryState::Loading;
        Some(SelectionTicket {
            conversation_id,
            epoch: self.epoch,
        })
    }

    pub fn clear(&mut self) {
        self.epoch += 1;
        self.selected = None;
        self.events.clear();
        self.history = HistoryState::Idle;
    }

    pub fn is_current(&self, ticket: &SelectionTicket) -> bool {
        ticket.epoch == self.epoch && self.selected.as_ref() == Some(&ticket.conversation_id)
    }

    /// Merges a history fetch with whatever already arrived for the same
    /// selection. Returns `false` when the selection moved on meanwhile.
    pub fn apply_history(&mut self, ticket: &SelectionTicket, fetched: Vec<ChatEvent>) -> bool {
        if !self.is_current(ticket) {
            debug!(conversation_id = %ticket.conversation_id, "timeline: discarding stale history");
            return false;
        }

        let interim = std::mem::take(&mut self.events);
        let mut seen = HashSet::with_capacity(fetched.len() + interim.len());
        let mut merged = Vec::with_capacity(fetched.len() + interim.len());
        for event in fetched.into_iter().chain(interim) {
            if event.conversation_id != ticket.conversation_id {
                continue;
            }
            if seen.insert(event.id.clone()) {
                merged.push(event);
            }
        }
        merged.sort_by_key(|event| event.created_at);

        self.events = merged;
        self.history = HistoryState::Loaded;
        true
    }

    pub fn record_failure(&mut self, ticket: &SelectionTicket, message: impl Into<String>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.history = HistoryState::Failed(message.into());
        true
    }

    /// Adds a pushed event to the selected conversation. Duplicates and
    /// events for any other conversation are ignored.
    pub fn apply_pushed_event(&mut self, event: ChatEvent) -> bool {
        if self.selected.as_ref() != Some(&event.conversation_id) {
            return false;
        }
        if self.contains(&event) {
            return false;
        }
        let position = self
            .events
            .partition_point(|existing| existing.created_at <= event.created_at);
        self.events.insert(position, event);
        true
    }

    fn contains(&self, event: &ChatEvent) -> bool {
        self.events.iter().any(|existing| existing.id == event.id)
    }

    pub fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    pub fn events(&self) -> &[ChatEvent] {
        &self.events
    }

    pub fn history_state(&self) -> &HistoryState {
        &self.history
    }
}

#[cfg(test)]
#[path = "tests/timeline_tests.rs"]
mod tests;
