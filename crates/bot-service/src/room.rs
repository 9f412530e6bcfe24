//! Room snapshots built from full state.

use crate::homeserver::RoomEvent;
use common::types::{RoomId, UserId};
use serde_json::Value;
use std::collections::BTreeSet;

/// Immutable snapshot of a room, folded from its state events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRef {
    pub id: RoomId,
    /// `m.room.name`, else the canonical alias, else the room id.
    pub name: String,
    pub topic: Option<String>,
    pub alias: Option<String>,
    /// Users whose membership is `join`.
    pub members: BTreeSet<UserId>,
}

impl RoomRef {
    /// Fold a state snapshot into a `RoomRef`.
    ///
    /// Later events win when the same state key appears more than once.
    #[must_use]
    pub fn from_state_events(id: RoomId, events: &[RoomEvent]) -> Self {
        let mut name = None;
        let mut topic = None;
        let mut alias = None;
        let mut members = BTreeSet::new();

        for event in events {
            match event.event_type.as_str() {
                "m.room.name" => name = content_str(&event.content, "name"),
                "m.room.topic" => topic = content_str(&event.content, "topic"),
                "m.room.canonical_alias" => alias = content_str(&event.content, "alias"),
                "m.room.member" => {
                    let Some(user) = event.state_key.as_deref() else {
                        continue;
                    };
                    let user = UserId::from(user);
                    if event.content.get("membership").and_then(Value::as_str) == Some("join") {
                        members.insert(user);
                    } else {
                        members.remove(&user);
                    }
                }
                _ => {}
            }
        }

        let name = name
            .or_else(|| alias.clone())
            .unwrap_or_else(|| id.to_string());

        Self {
            id,
            name,
            topic,
            alias,
            members,
        }
    }

    /// A snapshot with nothing but the id, for rooms whose state is unknown.
    #[must_use]
    pub fn bare(id: RoomId) -> Self {
        Self::from_state_events(id, &[])
    }
}

fn content_str(content: &Value, key: &str) -> Option<String> {
    content
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(event_type: &str, state_key: &str, content: Value) -> RoomEvent {
        RoomEvent {
            event_type: event_type.to_string(),
            sender: "@admin:example.org".to_string(),
            event_id: format!("${event_type}"),
            state_key: Some(state_key.to_string()),
            content,
        }
    }

    #[test]
    fn test_folds_name_topic_alias_and_members() {
        let events = vec![
            state("m.room.name", "", json!({"name": "Standup"})),
            state("m.room.topic", "", json!({"topic": "Daily sync"})),
            state(
                "m.room.canonical_alias",
                "",
                json!({"alias": "#standup:example.org"}),
            ),
            state("m.room.member", "@alice:example.org", json!({"membership": "join"})),
            state("m.room.member", "@bob:example.org", json!({"membership": "leave"})),
            state("m.room.member", "@carol:example.org", json!({"membership": "invite"})),
        ];

        let room = RoomRef::from_state_events(RoomId::from("!r:example.org"), &events);

        assert_eq!(room.name, "Standup");
        assert_eq!(room.topic.as_deref(), Some("Daily sync"));
        assert_eq!(room.alias.as_deref(), Some("#standup:example.org"));
        assert_eq!(
            room.members.iter().map(UserId::as_str).collect::<Vec<_>>(),
            vec!["@alice:example.org"]
        );
    }

    #[test]
    fn test_name_falls_back_to_alias_then_id() {
        let with_alias = RoomRef::from_state_events(
            RoomId::from("!r:example.org"),
            &[state(
                "m.room.canonical_alias",
                "",
                json!({"alias": "#lobby:example.org"}),
            )],
        );
        assert_eq!(with_alias.name, "#lobby:example.org");

        let bare = RoomRef::bare(RoomId::from("!r:example.org"));
        assert_eq!(bare.name, "!r:example.org");
        assert!(bare.members.is_empty());
    }

    #[test]
    fn test_later_membership_wins() {
        let events = vec![
            state("m.room.member", "@alice:example.org", json!({"membership": "join"})),
            state("m.room.member", "@alice:example.org", json!({"membership": "leave"})),
        ];
        let room = RoomRef::from_state_events(RoomId::from("!r:example.org"), &events);
        assert!(room.members.is_empty());
    }
}
