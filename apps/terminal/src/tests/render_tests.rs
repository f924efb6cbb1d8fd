use chrono::{Duration, TimeZone};
use shared::{domain::UserId, protocol::EventPayload};

use super::*;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("timestamp")
}

fn user(id: &str) -> UserProfile {
    UserProfile {
        id: UserId::new(id),
        user_name: id.trim_start_matches("u-").to_string(),
    }
}

fn event(id: &str, chat: &str, sender: &str, minutes_ago: i64) -> ChatEvent {
    ChatEvent {
        id: EventId::new(id),
        conversation_id: ConversationId::new(chat),
        sender: user(sender),
        payload: EventPayload {
            content: format!("text {id}"),
        },
        created_at: now() - Duration::minutes(minutes_ago),
    }
}

fn chat(id: &str, other: &str, preview: Option<ChatEvent>) -> ConversationSummary {
    ConversationSummary {
        id: ConversationId::new(id),
        participants: vec![
            shared::domain::Participant { user: user("u-me") },
            shared::domain::Participant { user: user(other) },
        ],
        recent_events: preview.into_iter().collect(),
    }
}

#[test]
fn relative_time_buckets() {
    let at = |seconds: i64| relative_time(now() - Duration::seconds(seconds), now());

    assert_eq!(at(10), "a few seconds ago");
    assert_eq!(at(60), "a minute ago");
    assert_eq!(at(5 * 60), "5 minutes ago");
    assert_eq!(at(60 * 60), "an hour ago");
    assert_eq!(at(3 * 60 * 60), "3 hours ago");
    assert_eq!(at(30 * 60 * 60), "a day ago");
    assert_eq!(at(4 * 24 * 60 * 60), "4 days ago");
    assert_eq!(at(600 * 24 * 60 * 60), "2 years ago");
    assert_eq!(at(-30), "a few seconds ago");
}

#[test]
fn listing_puts_recent_activity_first_and_skips_solo_chats() {
    let me = UserId::new("u-me");
    let solo = ConversationSummary {
        id: ConversationId::new("solo"),
        participants: vec![shared::domain::Participant { user: user("u-me") }],
        recent_events: Vec::new(),
    };
    let listed = listing_order(
        vec![
            chat("quiet", "u-bob", None),
            chat("old", "u-carol", Some(event("e1", "old", "u-carol", 90))),
            solo,
            chat("fresh", "u-dave", Some(event("e2", "fresh", "u-dave", 1))),
        ],
        &me,
    );

    let ids: Vec<_> = listed.iter().map(|summary| summary.id.as_str()).collect();
    assert_eq!(ids, vec!["fresh", "old", "quiet"]);
}

#[test]
fn conversation_line_shows_counterpart_and_preview() {
    let me = UserId::new("u-me");
    let with_preview = chat("c1", "u-bob", Some(event("e1", "c1", "u-bob", 5)));
    let empty = chat("c2", "u-carol", None);

    assert_eq!(
        conversation_line(1, &with_preview, &me, Some(&ConversationId::new("c1")), now()),
        "*  1. bob: text e1 (5 minutes ago)"
    );
    assert_eq!(
        conversation_line(2, &empty, &me, None, now()),
        "   2. carol: No messages yet."
    );
}

#[test]
fn own_messages_are_labelled_you() {
    let me = UserId::new("u-me");

    assert_eq!(
        event_line(&event("e1", "c1", "u-me", 0), Some(&me), now()),
        "[a few seconds ago] you: text e1"
    );
    assert_eq!(
        event_line(&event("e2", "c1", "u-bob", 0), Some(&me), now()),
        "[a few seconds ago] bob: text e2"
    );
}

#[test]
fn cursor_prints_each_event_once_per_conversation() {
    let mut cursor = TimelineCursor::default();
    let c1 = ConversationId::new("c1");
    let first = vec![event("e1", "c1", "u-bob", 2)];
    let second = vec![event("e1", "c1", "u-bob", 2), event("e2", "c1", "u-bob", 1)];

    assert_eq!(cursor.advance(&c1, &first, None, now()).len(), 1);
    let lines = cursor.advance(&c1, &second, None, now());
    assert_eq!(lines, vec!["[a minute ago] bob: text e2".to_string()]);

    let c2 = ConversationId::new("c2");
    assert!(cursor.advance(&c2, &[], None, now()).is_empty());
    assert_eq!(cursor.advance(&c1, &second, None, now()).len(), 2);
}
