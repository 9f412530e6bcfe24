//! Scripted homeserver for engine tests.
//!
//! Sync responses are served from a FIFO script. Once the script is empty,
//! `sync` parks forever and signals `wait_until_drained`, so a test can
//! cancel the loop at a known point.
//!
//! Membership writes are folded back into the room's state, so a later
//! state read sees what the bot announced.
//!
//! # Example
//!
//! ```rust,ignore
//! let homeserver = MockHomeserver::new()
//!     .with_sync(sync_batch("s1", vec![]))
//!     .with_sync_error(server_error(502));
//!
//! // run the bot, then:
//! homeserver.wait_until_drained().await;
//! assert_eq!(homeserver.close_count(), 1);
//! ```

use async_trait::async_trait;
use bot_service::errors::HomeserverError;
use bot_service::homeserver::{
    HomeserverApi, OpenIdToken, OutgoingMessage, RoomEvent, SyncBatch, WhoAmI, CALL_MEMBER_EVENT,
};
use common::types::{RoomId, UserId};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::fixtures::{openid_token, BOT_DEVICE, BOT_USER};

/// One request the bot made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum HomeserverCall {
    WhoAmI,
    Sync { since: Option<String>, timeout_ms: u64 },
    JoinedRooms,
    RoomState(RoomId),
    SendMessage { room_id: RoomId, message: OutgoingMessage },
    SetCallMembership { room_id: RoomId, state_key: String, content: Value },
    OpenIdToken(UserId),
    DisplayName(UserId),
    Close,
}

/// `404 M_NOT_FOUND`.
#[must_use]
pub fn not_found() -> HomeserverError {
    status_error(404, "M_NOT_FOUND", "Event not found")
}

/// `401 M_UNKNOWN_TOKEN`.
#[must_use]
pub fn unknown_token() -> HomeserverError {
    status_error(401, "M_UNKNOWN_TOKEN", "Invalid access token")
}

/// A 5xx without an errcode.
#[must_use]
pub fn server_error(status: u16) -> HomeserverError {
    HomeserverError::Status {
        status,
        errcode: None,
        message: "upstream unavailable".to_string(),
    }
}

/// No response at all.
#[must_use]
pub fn transport_error() -> HomeserverError {
    HomeserverError::Transport("connection reset by peer".to_string())
}

#[must_use]
pub fn status_error(status: u16, errcode: &str, message: &str) -> HomeserverError {
    HomeserverError::Status {
        status,
        errcode: Some(errcode.to_string()),
        message: message.to_string(),
    }
}

/// Scripted `HomeserverApi`. Clones share state.
#[derive(Debug, Clone)]
pub struct MockHomeserver {
    inner: Arc<Mutex<MockHomeserverInner>>,
    drained: Arc<Notify>,
}

#[derive(Debug)]
struct MockHomeserverInner {
    whoami: Result<WhoAmI, HomeserverError>,
    display_name: Result<Option<String>, HomeserverError>,
    syncs: VecDeque<Result<SyncBatch, HomeserverError>>,
    joined_rooms: Option<Result<Vec<RoomId>, HomeserverError>>,
    room_states: HashMap<RoomId, Vec<RoomEvent>>,
    room_state_errors: HashMap<RoomId, HomeserverError>,
    membership_errors: HashMap<RoomId, HomeserverError>,
    openid: Result<OpenIdToken, HomeserverError>,
    send_error: Option<HomeserverError>,
    calls: Vec<HomeserverCall>,
    close_count: usize,
}

impl Default for MockHomeserver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHomeserver {
    /// A homeserver that knows the bot as `BOT_USER` on `BOT_DEVICE` and has
    /// nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockHomeserverInner {
                whoami: Ok(WhoAmI {
                    user_id: UserId::from(BOT_USER),
                    device_id: Some(BOT_DEVICE.into()),
                }),
                display_name: Ok(Some("Call Bot".to_string())),
                syncs: VecDeque::new(),
                joined_rooms: None,
                room_states: HashMap::new(),
                room_state_errors: HashMap::new(),
                membership_errors: HashMap::new(),
                openid: Ok(openid_token()),
                send_error: None,
                calls: Vec::new(),
                close_count: 0,
            })),
            drained: Arc::new(Notify::new()),
        }
    }

    #[must_use]
    pub fn with_whoami(self, whoami: WhoAmI) -> Self {
        self.inner.lock().unwrap().whoami = Ok(whoami);
        self
    }

    #[must_use]
    pub fn with_whoami_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().whoami = Err(error);
        self
    }

    #[must_use]
    pub fn with_display_name_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().display_name = Err(error);
        self
    }

    /// Queue a successful sync response.
    #[must_use]
    pub fn with_sync(self, batch: SyncBatch) -> Self {
        self.inner.lock().unwrap().syncs.push_back(Ok(batch));
        self
    }

    /// Queue a failed sync response.
    #[must_use]
    pub fn with_sync_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().syncs.push_back(Err(error));
        self
    }

    /// Full state of `room_id`. The room is also reported as joined unless
    /// `with_joined_rooms` overrides the list.
    #[must_use]
    pub fn with_room_state(self, room_id: &RoomId, events: Vec<RoomEvent>) -> Self {
        self.inner
            .lock()
            .unwrap()
            .room_states
            .insert(room_id.clone(), events);
        self
    }

    #[must_use]
    pub fn with_room_state_error(self, room_id: &RoomId, error: HomeserverError) -> Self {
        self.inner
            .lock()
            .unwrap()
            .room_state_errors
            .insert(room_id.clone(), error);
        self
    }

    #[must_use]
    pub fn with_joined_rooms(self, room_ids: Vec<RoomId>) -> Self {
        self.inner.lock().unwrap().joined_rooms = Some(Ok(room_ids));
        self
    }

    #[must_use]
    pub fn with_joined_rooms_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().joined_rooms = Some(Err(error));
        self
    }

    #[must_use]
    pub fn with_openid_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().openid = Err(error);
        self
    }

    /// Fail every membership write in `room_id`.
    #[must_use]
    pub fn with_membership_error(self, room_id: &RoomId, error: HomeserverError) -> Self {
        self.inner
            .lock()
            .unwrap()
            .membership_errors
            .insert(room_id.clone(), error);
        self
    }

    #[must_use]
    pub fn with_send_error(self, error: HomeserverError) -> Self {
        self.inner.lock().unwrap().send_error = Some(error);
        self
    }

    /// Resolves once `sync` has been called with an empty script.
    pub async fn wait_until_drained(&self) {
        self.drained.notified().await;
    }

    /// Every request so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<HomeserverCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// `(since, timeout_ms)` of each sync request.
    #[must_use]
    pub fn sync_requests(&self) -> Vec<(Option<String>, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HomeserverCall::Sync { since, timeout_ms } => Some((since, timeout_ms)),
                _ => None,
            })
            .collect()
    }

    /// Messages sent, with their room.
    #[must_use]
    pub fn sent_messages(&self) -> Vec<(RoomId, OutgoingMessage)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HomeserverCall::SendMessage { room_id, message } => Some((room_id, message)),
                _ => None,
            })
            .collect()
    }

    /// Bodies of sent messages, in order.
    #[must_use]
    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent_messages()
            .into_iter()
            .map(|(_, message)| message.body)
            .collect()
    }

    /// Membership writes attempted, including failed ones.
    #[must_use]
    pub fn membership_writes(&self) -> Vec<(RoomId, String, Value)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                HomeserverCall::SetCallMembership {
                    room_id,
                    state_key,
                    content,
                } => Some((room_id, state_key, content)),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.inner.lock().unwrap().close_count
    }

    fn record(&self, call: HomeserverCall) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl HomeserverApi for MockHomeserver {
    async fn whoami(&self) -> Result<WhoAmI, HomeserverError> {
        self.record(HomeserverCall::WhoAmI);
        self.inner.lock().unwrap().whoami.clone()
    }

    async fn sync(
        &self,
        since: Option<&str>,
        timeout_ms: u64,
    ) -> Result<SyncBatch, HomeserverError> {
        self.record(HomeserverCall::Sync {
            since: since.map(str::to_string),
            timeout_ms,
        });

        let next = self.inner.lock().unwrap().syncs.pop_front();
        match next {
            Some(response) => response,
            None => {
                self.drained.notify_one();
                std::future::pending().await
            }
        }
    }

    async fn joined_room_ids(&self) -> Result<Vec<RoomId>, HomeserverError> {
        self.record(HomeserverCall::JoinedRooms);
        let inner = self.inner.lock().unwrap();
        match &inner.joined_rooms {
            Some(result) => result.clone(),
            None => {
                let mut ids: Vec<RoomId> = inner
                    .room_states
                    .keys()
                    .chain(inner.room_state_errors.keys())
                    .cloned()
                    .collect();
                ids.sort();
                ids.dedup();
                Ok(ids)
            }
        }
    }

    async fn room_state(&self, room_id: &RoomId) -> Result<Vec<RoomEvent>, HomeserverError> {
        self.record(HomeserverCall::RoomState(room_id.clone()));
        let inner = self.inner.lock().unwrap();
        if let Some(error) = inner.room_state_errors.get(room_id) {
            return Err(error.clone());
        }
        inner
            .room_states
            .get(room_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn send_message(
        &self,
        room_id: &RoomId,
        message: &OutgoingMessage,
    ) -> Result<String, HomeserverError> {
        self.record(HomeserverCall::SendMessage {
            room_id: room_id.clone(),
            message: message.clone(),
        });
        if let Some(error) = self.inner.lock().unwrap().send_error.clone() {
            return Err(error);
        }
        Ok(format!("${}", uuid::Uuid::new_v4().simple()))
    }

    async fn set_call_membership(
        &self,
        room_id: &RoomId,
        state_key: &str,
        content: &Value,
    ) -> Result<(), HomeserverError> {
        self.record(HomeserverCall::SetCallMembership {
            room_id: room_id.clone(),
            state_key: state_key.to_string(),
            content: content.clone(),
        });

        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.membership_errors.get(room_id) {
            return Err(error.clone());
        }

        let state = inner.room_states.entry(room_id.clone()).or_default();
        state.retain(|event| {
            !(event.event_type == CALL_MEMBER_EVENT
                && event.state_key.as_deref() == Some(state_key))
        });
        state.push(RoomEvent {
            event_type: CALL_MEMBER_EVENT.to_string(),
            sender: BOT_USER.to_string(),
            event_id: format!("${}", uuid::Uuid::new_v4().simple()),
            state_key: Some(state_key.to_string()),
            content: content.clone(),
        });
        Ok(())
    }

    async fn request_openid_token(
        &self,
        user_id: &UserId,
    ) -> Result<OpenIdToken, HomeserverError> {
        self.record(HomeserverCall::OpenIdToken(user_id.clone()));
        self.inner.lock().unwrap().openid.clone()
    }

    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, HomeserverError> {
        self.record(HomeserverCall::DisplayName(user_id.clone()));
        self.inner.lock().unwrap().display_name.clone()
    }

    async fn close(&self) {
        self.record(HomeserverCall::Close);
        self.inner.lock().unwrap().close_count += 1;
    }
}
