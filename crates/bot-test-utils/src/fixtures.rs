//! Identities, events and sync batches shared by the integration tests.

use bot_service::calls::{membership_content, membership_state_key, CallOrchestrator};
use bot_service::discovery::{ClientConfig, RtcFocus};
use bot_service::homeserver::{
    JoinedRoom, JoinedRooms, OpenIdToken, RoomEvent, SyncBatch, SyncRooms, Timeline,
    CALL_MEMBER_EVENT, ROOM_MESSAGE,
};
use bot_service::session::SessionContext;
use common::secret::SecretString;
use common::types::{DeviceId, RoomId, UserId};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::mock_homeserver::MockHomeserver;
use crate::mock_media::RecordingMediaConnector;
use crate::mock_sfu::MockSfu;

pub const BOT_USER: &str = "@bot:example.org";
pub const BOT_DEVICE: &str = "BOTDEVICE";
pub const ALICE: &str = "@alice:example.org";
pub const BOB: &str = "@bob:example.org";
pub const SFU_SERVICE_URL: &str = "https://sfu.example.org/livekit/jwt";

#[must_use]
pub fn room_id(local: &str) -> RoomId {
    RoomId::from(format!("!{local}:example.org"))
}

#[must_use]
pub fn focus() -> RtcFocus {
    RtcFocus::new("livekit", Some(SFU_SERVICE_URL.to_string()))
}

#[must_use]
pub fn client_config() -> ClientConfig {
    ClientConfig {
        homeserver_base_url: "https://matrix.example.org".to_string(),
        rtc_foci: vec![focus()],
    }
}

#[must_use]
pub fn session_context() -> SessionContext {
    SessionContext {
        user_id: UserId::from(BOT_USER),
        device_id: DeviceId::from(BOT_DEVICE),
        focus: focus(),
        display_name: Some("Call Bot".to_string()),
    }
}

#[must_use]
pub fn openid_token() -> OpenIdToken {
    OpenIdToken {
        access_token: SecretString::from("openid-assertion"),
        token_type: "Bearer".to_string(),
        matrix_server_name: "example.org".to_string(),
        expires_in: 3600,
    }
}

/// An orchestrator wired to the given mocks with `session_context()`.
#[must_use]
pub fn orchestrator(
    homeserver: &MockHomeserver,
    sfu: &MockSfu,
    media: &RecordingMediaConnector,
) -> CallOrchestrator {
    CallOrchestrator::new(
        Arc::new(homeserver.clone()),
        Arc::new(sfu.clone()),
        Arc::new(media.clone()),
        session_context(),
    )
}

#[must_use]
pub fn message_event(sender: &str, body: &str) -> RoomEvent {
    RoomEvent {
        event_type: ROOM_MESSAGE.to_string(),
        sender: sender.to_string(),
        event_id: format!("${}", uuid::Uuid::new_v4().simple()),
        state_key: None,
        content: json!({"msgtype": "m.text", "body": body}),
    }
}

fn state_event(event_type: &str, state_key: &str, content: Value) -> RoomEvent {
    RoomEvent {
        event_type: event_type.to_string(),
        sender: ALICE.to_string(),
        event_id: format!("${}", uuid::Uuid::new_v4().simple()),
        state_key: Some(state_key.to_string()),
        content,
    }
}

#[must_use]
pub fn name_event(name: &str) -> RoomEvent {
    state_event("m.room.name", "", json!({"name": name}))
}

#[must_use]
pub fn member_event(user: &str, membership: &str) -> RoomEvent {
    state_event("m.room.member", user, json!({"membership": membership}))
}

#[must_use]
pub fn call_member_event(state_key: &str, content: Value) -> RoomEvent {
    state_event(CALL_MEMBER_EVENT, state_key, content)
}

/// Active membership of the bot's own device.
#[must_use]
pub fn own_active_membership() -> RoomEvent {
    call_member_event(
        &membership_state_key(&UserId::from(BOT_USER), &DeviceId::from(BOT_DEVICE)),
        membership_content(&DeviceId::from(BOT_DEVICE), &focus()),
    )
}

/// A sync response delivering `rooms` in the given order.
#[must_use]
pub fn sync_batch(next_batch: &str, rooms: Vec<(RoomId, Vec<RoomEvent>)>) -> SyncBatch {
    SyncBatch {
        next_batch: Some(next_batch.to_string()),
        rooms: SyncRooms {
            join: JoinedRooms(
                rooms
                    .into_iter()
                    .map(|(id, events)| {
                        (
                            id,
                            JoinedRoom {
                                timeline: Timeline { events },
                            },
                        )
                    })
                    .collect(),
            ),
        },
    }
}
