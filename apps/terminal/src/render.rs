//! Text rendering of client state.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use client_core::ChannelStatus;
use shared::{
    domain::{ConversationId, EventId, UserId, UserProfile},
    protocol::{ChatEvent, ConversationSummary},
};

pub const NO_MESSAGES: &str = "No messages yet.";
pub const NO_CONVERSATIONS: &str = "No chats yet. Use search to start one.";

/// "a few seconds ago", "5 minutes ago", "a day ago" and so on. Timestamps in
/// the future count as now.
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;

    let seconds = (now - then).num_seconds().max(0);
    let rounded = |unit: i64| (seconds + unit / 2) / unit;
    match seconds {
        s if s < 45 => "a few seconds ago".to_string(),
        s if s < 90 => "a minute ago".to_string(),
        s if s < 45 * MINUTE => format!("{} minutes ago", rounded(MINUTE)),
        s if s < 90 * MINUTE => "an hour ago".to_string(),
        s if s < 22 * HOUR => format!("{} hours ago", rounded(HOUR)),
        s if s < 36 * HOUR => "a day ago".to_string(),
        s if s < 26 * DAY => format!("{} days ago", rounded(DAY)),
        s if s < 46 * DAY => "a month ago".to_string(),
        s if s < 320 * DAY => format!("{} months ago", rounded(30 * DAY)),
        s if s < 548 * DAY => "a year ago".to_string(),
        _ => format!("{} years ago", rounded(365 * DAY)),
    }
}

/// Conversations worth listing, most recently active first. Entries with no
/// other participant are left out.
pub fn listing_order(
    mut conversations: Vec<ConversationSummary>,
    me: &UserId,
) -> Vec<ConversationSummary> {
    conversations.retain(|summary| summary.counterpart(me).is_some());
    conversations.sort_by(|a, b| {
        let a_at = a.preview().map(|event| event.created_at);
        let b_at = b.preview().map(|event| event.created_at);
        b_at.cmp(&a_at).then_with(|| a.id.cmp(&b.id))
    });
    conversations
}

pub fn conversation_line(
    position: usize,
    summary: &ConversationSummary,
    me: &UserId,
    selected: Option<&ConversationId>,
    now: DateTime<Utc>,
) -> String {
    let name = summary
        .counterpart(me)
        .map(|user| user.user_name.as_str())
        .unwrap_or("?");
    let marker = if selected == Some(&summary.id) { '*' } else { ' ' };
    let preview = match summary.preview() {
        Some(event) => format!(
            "{} ({})",
            event.content(),
            relative_time(event.created_at, now)
        ),
        None => NO_MESSAGES.to_string(),
    };
    format!("{marker}{position:>3}. {name}: {preview}")
}

pub fn event_line(event: &ChatEvent, me: Option<&UserId>, now: DateTime<Utc>) -> String {
    let sender = if me.is_some_and(|me| event.is_from(me)) {
        "you"
    } else {
        event.sender.user_name.as_str()
    };
    format!(
        "[{}] {sender}: {}",
        relative_time(event.created_at, now),
        event.content()
    )
}

pub fn user_line(position: usize, user: &UserProfile) -> String {
    format!("{position:>3}. {}", user.user_name)
}

pub fn status_line(status: &ChannelStatus) -> String {
    match status {
        ChannelStatus::Connecting => "Connecting to live updates...".to_string(),
        ChannelStatus::Connected => "Live updates connected.".to_string(),
        ChannelStatus::Disconnected => {
            "Live updates disconnected; /resync to catch up.".to_string()
        }
        ChannelStatus::Failed(reason) => {
            format!("Live updates unavailable ({reason}); /resync to catch up.")
        }
        ChannelStatus::Closed => "Live updates closed.".to_string(),
    }
}

/// Remembers which events of the open conversation were already printed, so
/// each timeline update prints only what is new.
#[derive(Debug, Default)]
pub struct TimelineCursor {
    conversation: Option<ConversationId>,
    shown: HashSet<EventId>,
}

impl TimelineCursor {
    pub fn advance(
        &mut self,
        conversation_id: &ConversationId,
        events: &[ChatEvent],
        me: Option<&UserId>,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        if self.conversation.as_ref() != Some(conversation_id) {
            self.conversation = Some(conversation_id.clone());
            self.shown.clear();
        }
        events
            .iter()
            .filter(|event| self.shown.insert(event.id.clone()))
            .map(|event| event_line(event, me, now))
            .collect()
    }

    pub fn reset(&mut self) {
        self.conversation = None;
        self.shown.clear();
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
