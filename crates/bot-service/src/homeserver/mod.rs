//! Homeserver collaborator.
//!
//! `HomeserverApi` is the seam between the engine and the chat protocol.
//! `MatrixHomeserverClient` implements it over HTTP; tests use the scripted
//! mock from `bot-test-utils`.

mod client;
mod message;

pub use client::MatrixHomeserverClient;
pub use message::OutgoingMessage;

use crate::errors::HomeserverError;
use async_trait::async_trait;
use common::secret::SecretString;
use common::types::{DeviceId, RoomId, UserId};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

/// Chat message event type.
pub const ROOM_MESSAGE: &str = "m.room.message";

/// Call-membership state event type.
pub const CALL_MEMBER_EVENT: &str = "org.matrix.msc3401.call.member";

/// Identity of the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhoAmI {
    pub user_id: UserId,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

/// Short-lived identity assertion for third-party services.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenIdToken {
    pub access_token: SecretString,
    pub token_type: String,
    pub matrix_server_name: String,
    pub expires_in: u64,
}

/// A room event as delivered by sync or the state endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub content: Value,
}

impl RoomEvent {
    /// Body of a chat message event, if this is one and the body is a string.
    #[must_use]
    pub fn message_body(&self) -> Option<&str> {
        if self.event_type != ROOM_MESSAGE {
            return None;
        }
        self.content.get("body").and_then(Value::as_str)
    }

    /// Whether this is a call-membership state event.
    #[must_use]
    pub fn is_call_membership(&self) -> bool {
        self.event_type == CALL_MEMBER_EVENT && self.state_key.is_some()
    }
}

/// One long-poll response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncBatch {
    #[serde(default)]
    pub next_batch: Option<String>,
    #[serde(default)]
    pub rooms: SyncRooms,
}

impl SyncBatch {
    /// Number of timeline events across joined rooms.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.rooms
            .join
            .0
            .iter()
            .map(|(_, room)| room.timeline.events.len())
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SyncRooms {
    #[serde(default)]
    pub join: JoinedRooms,
}

/// Joined rooms in the order the server serialized them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinedRooms(pub Vec<(RoomId, JoinedRoom)>);

impl<'de> Deserialize<'de> for JoinedRooms {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedRooms;

        impl<'de> Visitor<'de> for OrderedRooms {
            type Value = JoinedRooms;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of room id to joined room")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut rooms = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((id, room)) = map.next_entry::<String, JoinedRoom>()? {
                    rooms.push((RoomId::from(id), room));
                }
                Ok(JoinedRooms(rooms))
            }
        }

        deserializer.deserialize_map(OrderedRooms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

/// Operations the engine consumes from the homeserver.
#[async_trait]
pub trait HomeserverApi: Send + Sync {
    /// Resolve the identity behind the access token.
    async fn whoami(&self) -> Result<WhoAmI, HomeserverError>;

    /// Long-poll for events after `since`, waiting up to `timeout_ms`
    /// server-side.
    async fn sync(&self, since: Option<&str>, timeout_ms: u64)
        -> Result<SyncBatch, HomeserverError>;

    async fn joined_room_ids(&self) -> Result<Vec<RoomId>, HomeserverError>;

    /// Full state snapshot of a room.
    async fn room_state(&self, room_id: &RoomId) -> Result<Vec<RoomEvent>, HomeserverError>;

    /// Send a chat message, returning the new event id.
    async fn send_message(
        &self,
        room_id: &RoomId,
        message: &OutgoingMessage,
    ) -> Result<String, HomeserverError>;

    /// Write the call-membership state event under `state_key`.
    async fn set_call_membership(
        &self,
        room_id: &RoomId,
        state_key: &str,
        content: &Value,
    ) -> Result<(), HomeserverError>;

    async fn request_openid_token(&self, user_id: &UserId)
        -> Result<OpenIdToken, HomeserverError>;

    /// Display name of a user, if set.
    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, HomeserverError>;

    /// Release transport resources. Later requests fail.
    async fn close(&self);
}
