//! Call orchestration.
//!
//! Joining a call is a strictly ordered four-step protocol:
//!
//! 1. Request an OpenID token for the bot's own user.
//! 2. Exchange it at the focus's SFU endpoint for signaling credentials.
//! 3. Announce membership with a `org.matrix.msc3401.call.member` state
//!    event keyed `_{userId}_{deviceId}_m.call`.
//! 4. Connect the media session and publish the audio track.
//!
//! The first failing step aborts the join. Completed steps are not rolled
//! back: a failure at step 4 leaves the membership from step 3 announced
//! until `leave`, `disconnect_all` or the startup sweep clears it.
//!
//! Leaving overwrites the membership with `{}`, which clients read as
//! "left the call".

use crate::discovery::RtcFocus;
use crate::errors::{CallError, HomeserverError, JoinStep, RtcError};
use crate::homeserver::HomeserverApi;
use crate::observability::metrics;
use crate::rtc::{AudioClip, AudioPlayer, MediaConnector, MediaSession, SfuTokenApi};
use crate::room::RoomRef;
use crate::session::SessionContext;
use chrono::{DateTime, Utc};
use common::types::{DeviceId, RoomId, UserId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Membership lifetime announced to other clients (2 hours).
pub const MEMBERSHIP_EXPIRES_MS: u64 = 7_200_000;

/// State key of this device's call membership.
#[must_use]
pub fn membership_state_key(user_id: &UserId, device_id: &DeviceId) -> String {
    format!("_{user_id}_{device_id}_m.call")
}

/// Prefix shared by every membership key of `user_id`, across devices.
#[must_use]
pub fn membership_key_prefix(user_id: &UserId) -> String {
    format!("_{user_id}_")
}

/// Membership content announcing an audio call through `focus`.
#[must_use]
pub fn membership_content(device_id: &DeviceId, focus: &RtcFocus) -> Value {
    json!({
        "application": "m.call",
        "call_id": "",
        "scope": "m.room",
        "device_id": device_id,
        "expires": MEMBERSHIP_EXPIRES_MS,
        "focus_active": {
            "type": focus.focus_type,
            "focus_selection": "oldest_membership",
        },
        "foci_preferred": [focus],
        "m.call.intent": "audio",
    })
}

/// One call this process participates in.
pub struct CallSession {
    pub room: RoomRef,
    pub joined_at: DateTime<Utc>,
    media: Box<dyn MediaSession>,
    player: AudioPlayer,
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("room", &self.room.id)
            .field("joined_at", &self.joined_at)
            .finish_non_exhaustive()
    }
}

/// Summary of an active call for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveCall {
    pub room_id: RoomId,
    pub room_name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// A session already existed; nothing was repeated.
    AlreadyJoined,
}

/// Owns every `CallSession` and sequences join and leave.
pub struct CallOrchestrator {
    homeserver: Arc<dyn HomeserverApi>,
    sfu: Arc<dyn SfuTokenApi>,
    media: Arc<dyn MediaConnector>,
    session: SessionContext,
    calls: HashMap<RoomId, CallSession>,
    audio_cancel: CancellationToken,
}

impl CallOrchestrator {
    pub fn new(
        homeserver: Arc<dyn HomeserverApi>,
        sfu: Arc<dyn SfuTokenApi>,
        media: Arc<dyn MediaConnector>,
        session: SessionContext,
    ) -> Self {
        Self {
            homeserver,
            sfu,
            media,
            session,
            calls: HashMap::new(),
            audio_cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    #[must_use]
    pub fn is_in_call(&self, room_id: &RoomId) -> bool {
        self.calls.contains_key(room_id)
    }

    /// Active calls, oldest first.
    #[must_use]
    pub fn active_calls(&self) -> Vec<ActiveCall> {
        let mut calls: Vec<ActiveCall> = self
            .calls
            .values()
            .map(|c| ActiveCall {
                room_id: c.room.id.clone(),
                room_name: c.room.name.clone(),
                joined_at: c.joined_at,
            })
            .collect();
        calls.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.room_id.cmp(&b.room_id)));
        calls
    }

    fn own_state_key(&self) -> String {
        membership_state_key(&self.session.user_id, &self.session.device_id)
    }

    /// Join the call in `room`.
    ///
    /// # Errors
    ///
    /// `CallError::Join` naming the first step that failed. Later steps are
    /// never attempted.
    #[instrument(skip_all, fields(room_id = %room.id))]
    pub async fn join(&mut self, room: &RoomRef) -> Result<JoinOutcome, CallError> {
        if self.calls.contains_key(&room.id) {
            debug!(target: "bot.calls", "Already in this call");
            return Ok(JoinOutcome::AlreadyJoined);
        }

        // Refuse before announcing a membership no media session can back.
        if !self.media.is_available() {
            return Err(join_failed(
                JoinStep::MediaSession,
                RtcError::MediaUnavailable("no media backend in this build".to_string()),
            ));
        }

        let started = Instant::now();

        let openid = self
            .homeserver
            .request_openid_token(&self.session.user_id)
            .await
            .map_err(|e| join_failed(JoinStep::OpenIdToken, e))?;

        let service_url = self.session.focus_service_url().ok_or_else(|| {
            join_failed(
                JoinStep::RtcCredentials,
                format!("focus '{}' has no service URL", self.session.focus.focus_type),
            )
        })?;
        let credentials = self
            .sfu
            .exchange(service_url, &openid, &room.id, &self.session.device_id)
            .await
            .map_err(|e| join_failed(JoinStep::RtcCredentials, e))?;

        let content = membership_content(&self.session.device_id, &self.session.focus);
        self.homeserver
            .set_call_membership(&room.id, &self.own_state_key(), &content)
            .await
            .map_err(|e| join_failed(JoinStep::AnnounceMembership, e))?;

        let media = self
            .media
            .connect(&credentials)
            .await
            .map_err(|e| join_failed(JoinStep::MediaSession, e))?;

        let player = AudioPlayer::spawn(media.audio_sink(), self.audio_cancel.child_token());

        self.calls.insert(
            room.id.clone(),
            CallSession {
                room: room.clone(),
                joined_at: Utc::now(),
                media,
                player,
            },
        );

        metrics::record_call_join("success");
        metrics::record_call_join_duration(started.elapsed());
        metrics::set_calls_active(self.calls.len());
        info!(target: "bot.calls", room = %room.name, "Joined call");

        Ok(JoinOutcome::Joined)
    }

    /// Leave the call in `room_id`: clear the membership, then close the
    /// local session if there is one.
    ///
    /// Clearing is idempotent, so leaving a room without a call is allowed.
    /// Returns whether a local session was closed.
    ///
    /// # Errors
    ///
    /// `CallError::Leave` if the membership could not be cleared; the local
    /// session is kept in that case.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn leave(&mut self, room_id: &RoomId) -> Result<bool, CallError> {
        let state_key = self.own_state_key();
        self.clear_membership(room_id, &state_key)
            .await
            .map_err(CallError::Leave)?;

        Ok(self.close_session(room_id).await)
    }

    /// Scan every joined room and clear each membership this bot's user
    /// holds there. Rooms whose state cannot be read, or whose membership
    /// cannot be cleared, are skipped.
    ///
    /// Returns the rooms that were left.
    ///
    /// # Errors
    ///
    /// `CallError::RoomScan` only when the joined-room list itself fails.
    #[instrument(skip_all)]
    pub async fn disconnect_all(&mut self) -> Result<Vec<RoomId>, CallError> {
        let room_ids = self
            .homeserver
            .joined_room_ids()
            .await
            .map_err(CallError::RoomScan)?;
        let prefix = membership_key_prefix(&self.session.user_id);

        let mut left = Vec::new();
        for room_id in room_ids {
            let state = match self.homeserver.room_state(&room_id).await {
                Ok(state) => state,
                Err(e) if e.is_client_error() => {
                    debug!(target: "bot.calls", room_id = %room_id, error = %e, "No readable call state");
                    continue;
                }
                Err(e) => {
                    warn!(target: "bot.calls", room_id = %room_id, error = %e, "Skipping room during disconnect scan");
                    continue;
                }
            };

            let own_keys: Vec<String> = state
                .iter()
                .filter(|event| event.is_call_membership() && is_active_membership(&event.content))
                .filter_map(|event| event.state_key.clone())
                .filter(|key| key.starts_with(&prefix))
                .collect();

            let mut cleared = false;
            for key in &own_keys {
                match self.clear_membership(&room_id, key).await {
                    Ok(()) => cleared = true,
                    Err(e) => {
                        warn!(target: "bot.calls", room_id = %room_id, error = %e, "Failed to clear call membership");
                    }
                }
            }

            let closed = self.close_session(&room_id).await;
            if cleared || closed {
                info!(target: "bot.calls", room_id = %room_id, "Disconnected from call");
                left.push(room_id);
            }
        }

        Ok(left)
    }

    /// Leave every call owned by this process. Used at shutdown; failures
    /// are logged and the local session is closed regardless.
    pub async fn leave_all_active(&mut self) -> Vec<RoomId> {
        let room_ids: Vec<RoomId> = self.calls.keys().cloned().collect();
        let mut left = Vec::with_capacity(room_ids.len());

        for room_id in room_ids {
            match self.leave(&room_id).await {
                Ok(_) => left.push(room_id),
                Err(e) => {
                    warn!(target: "bot.calls", room_id = %room_id, error = %e, "Failed to leave call at shutdown");
                    self.close_session(&room_id).await;
                }
            }
        }

        self.audio_cancel.cancel();
        left
    }

    /// Queue a decoded clip into the room's call.
    ///
    /// # Errors
    ///
    /// `CallError::NoActiveCall` if there is no session in the room, or the
    /// audio error if the queue rejects the clip.
    pub fn play(&self, room_id: &RoomId, clip: AudioClip) -> Result<(), CallError> {
        let call = self
            .calls
            .get(room_id)
            .ok_or_else(|| CallError::NoActiveCall(room_id.clone()))?;
        call.player.enqueue(clip)?;
        Ok(())
    }

    async fn clear_membership(
        &self,
        room_id: &RoomId,
        state_key: &str,
    ) -> Result<(), HomeserverError> {
        self.homeserver
            .set_call_membership(room_id, state_key, &json!({}))
            .await?;
        metrics::record_call_leave();
        debug!(target: "bot.calls", room_id = %room_id, "Call membership cleared");
        Ok(())
    }

    async fn close_session(&mut self, room_id: &RoomId) -> bool {
        let Some(call) = self.calls.remove(room_id) else {
            return false;
        };

        call.player.stop().await;
        if let Err(e) = call.media.close().await {
            warn!(target: "bot.calls", room_id = %room_id, error = %e, "Failed to close media session");
        }

        metrics::set_calls_active(self.calls.len());
        info!(target: "bot.calls", room = %call.room.name, "Call session closed");
        true
    }
}

fn join_failed(step: JoinStep, reason: impl fmt::Display) -> CallError {
    metrics::record_call_join(step.as_str());
    warn!(target: "bot.calls", step = step.as_str(), error = %reason, "Join aborted");
    CallError::join(step, reason)
}

/// Empty content marks a membership that was already left.
fn is_active_membership(content: &Value) -> bool {
    content.as_object().is_some_and(|c| !c.is_empty())
}
