//! Call join/leave protocol tests.
//!
//! Verifies step ordering, short-circuiting on the first failed step, and
//! membership cleanup across rooms.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use bot_service::calls::{membership_state_key, CallOrchestrator, JoinOutcome};
use bot_service::errors::{CallError, JoinStep, RtcError};
use bot_service::room::RoomRef;
use bot_service::rtc::{AudioClip, AudioFrame, UnavailableMediaConnector};
use bot_test_utils::*;
use common::types::{DeviceId, UserId};
use serde_json::json;

fn own_state_key() -> String {
    membership_state_key(&UserId::from(BOT_USER), &DeviceId::from(BOT_DEVICE))
}

fn room(local: &str) -> RoomRef {
    RoomRef::from_state_events(room_id(local), &[name_event(&local.to_uppercase())])
}

fn is_join_failure(result: &Result<JoinOutcome, CallError>, expected: JoinStep) -> bool {
    matches!(result, Err(CallError::Join { step, .. }) if *step == expected)
}

// ============================================================================
// Join
// ============================================================================

#[tokio::test]
async fn test_join_runs_steps_in_order() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    let outcome = calls.join(&room("a")).await.unwrap();
    assert_eq!(outcome, JoinOutcome::Joined);

    let requests = homeserver.calls();
    let openid = requests
        .iter()
        .position(|c| *c == HomeserverCall::OpenIdToken(UserId::from(BOT_USER)))
        .expect("openid requested");
    let announce = requests
        .iter()
        .position(|c| matches!(c, HomeserverCall::SetCallMembership { .. }))
        .expect("membership announced");
    assert!(openid < announce);

    assert_eq!(
        sfu.exchanges(),
        vec![SfuExchange {
            service_url: SFU_SERVICE_URL.to_string(),
            room_id: room_id("a"),
            device_id: DeviceId::from(BOT_DEVICE),
        }]
    );

    let writes = homeserver.membership_writes();
    assert_eq!(writes.len(), 1);
    let (written_room, state_key, content) = &writes[0];
    assert_eq!(*written_room, room_id("a"));
    assert_eq!(*state_key, own_state_key());
    assert_eq!(content["m.call.intent"], json!("audio"));
    assert_eq!(content["device_id"], json!(BOT_DEVICE));
    assert_eq!(content["foci_preferred"][0]["livekit_service_url"], json!(SFU_SERVICE_URL));

    assert_eq!(media.connected_urls(), vec![SIGNALING_URL.to_string()]);
    assert!(calls.is_in_call(&room_id("a")));

    let active = calls.active_calls();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].room_name, "A");
}

#[tokio::test]
async fn test_join_is_idempotent() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    assert_eq!(calls.join(&room("a")).await.unwrap(), JoinOutcome::Joined);
    assert_eq!(calls.join(&room("a")).await.unwrap(), JoinOutcome::AlreadyJoined);

    assert_eq!(sfu.exchanges().len(), 1);
    assert_eq!(homeserver.membership_writes().len(), 1);
    assert_eq!(media.connects(), 1);
}

#[tokio::test]
async fn test_openid_failure_stops_before_sfu() {
    let homeserver = MockHomeserver::new().with_openid_error(server_error(502));
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    let result = calls.join(&room("a")).await;

    assert!(is_join_failure(&result, JoinStep::OpenIdToken), "{result:?}");
    assert!(sfu.exchanges().is_empty());
    assert!(homeserver.membership_writes().is_empty());
    assert_eq!(media.connects(), 0);
}

#[tokio::test]
async fn test_sfu_failure_stops_before_membership() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::failing(RtcError::Status(403));
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    let result = calls.join(&room("a")).await;

    assert!(is_join_failure(&result, JoinStep::RtcCredentials), "{result:?}");
    let message = result.unwrap_err().to_string();
    assert!(message.contains("exchanging RTC credentials"), "{message}");
    assert!(homeserver.membership_writes().is_empty());
    assert_eq!(media.connects(), 0);
    assert!(!calls.is_in_call(&room_id("a")));
}

#[tokio::test]
async fn test_membership_failure_stops_before_media() {
    let homeserver =
        MockHomeserver::new().with_membership_error(&room_id("a"), status_error(403, "M_FORBIDDEN", "no"));
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    let result = calls.join(&room("a")).await;

    assert!(is_join_failure(&result, JoinStep::AnnounceMembership), "{result:?}");
    assert_eq!(media.connects(), 0);
}

#[tokio::test]
async fn test_media_failure_leaves_membership_announced() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::failing(RtcError::Media("signal timeout".to_string()));
    let mut calls = orchestrator(&homeserver, &sfu, &media);

    let result = calls.join(&room("a")).await;

    assert!(is_join_failure(&result, JoinStep::MediaSession), "{result:?}");
    // No rollback: the announced membership stays until a leave or sweep.
    let writes = homeserver.membership_writes();
    assert_eq!(writes.len(), 1);
    assert_ne!(writes[0].2, json!({}));
    assert!(!calls.is_in_call(&room_id("a")));
}

#[tokio::test]
async fn test_join_without_media_backend_announces_nothing() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::new();
    let mut calls = CallOrchestrator::new(
        Arc::new(homeserver.clone()),
        Arc::new(sfu.clone()),
        Arc::new(UnavailableMediaConnector),
        session_context(),
    );

    let result = calls.join(&room("a")).await;

    assert!(is_join_failure(&result, JoinStep::MediaSession), "{result:?}");
    assert!(homeserver.membership_writes().is_empty());
    assert!(!homeserver
        .calls()
        .iter()
        .any(|c| matches!(c, HomeserverCall::OpenIdToken(_))));
    assert!(sfu.exchanges().is_empty());
    assert!(!calls.is_in_call(&room_id("a")));
}

// ============================================================================
// Leave
// ============================================================================

#[tokio::test]
async fn test_leave_clears_membership_and_closes_session() {
    let homeserver = MockHomeserver::new();
    let sfu = MockSfu::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &sfu, &media);
    calls.join(&room("a")).await.unwrap();

    assert!(calls.leave(&room_id("a")).await.unwrap());

    let writes = homeserver.membership_writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[1], (room_id("a"), own_state_key(), json!({})));
    assert_eq!(media.closes(), 1);
    assert!(!calls.is_in_call(&room_id("a")));
}

#[tokio::test]
async fn test_leave_without_call_still_clears() {
    let homeserver = MockHomeserver::new();
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());

    assert!(!calls.leave(&room_id("a")).await.unwrap());
    assert!(!calls.leave(&room_id("a")).await.unwrap());

    assert_eq!(
        homeserver.membership_writes(),
        vec![
            (room_id("a"), own_state_key(), json!({})),
            (room_id("a"), own_state_key(), json!({})),
        ]
    );
}

#[tokio::test]
async fn test_leave_failure_keeps_session() {
    let homeserver = MockHomeserver::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &media);
    calls.join(&room("a")).await.unwrap();

    // Clones share state, so this fails later writes only.
    let _ = homeserver
        .clone()
        .with_membership_error(&room_id("a"), server_error(500));

    let result = calls.leave(&room_id("a")).await;

    assert!(matches!(result, Err(CallError::Leave(_))), "{result:?}");
    assert!(calls.is_in_call(&room_id("a")));
    assert_eq!(media.closes(), 0);
}

#[tokio::test]
async fn test_leave_all_active_closes_every_session() {
    let homeserver = MockHomeserver::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &media);
    calls.join(&room("a")).await.unwrap();
    calls.join(&room("b")).await.unwrap();

    let mut left = calls.leave_all_active().await;
    left.sort();

    assert_eq!(left, vec![room_id("a"), room_id("b")]);
    assert_eq!(media.closes(), 2);
    assert!(calls.active_calls().is_empty());
}

// ============================================================================
// Disconnect all
// ============================================================================

#[tokio::test]
async fn test_disconnect_all_clears_only_own_active_memberships() {
    let other_device_key =
        membership_state_key(&UserId::from(BOT_USER), &DeviceId::from("OLDDEVICE"));
    let alice_key = membership_state_key(&UserId::from(ALICE), &DeviceId::from("ALICEDEV"));

    let homeserver = MockHomeserver::new()
        // Stale membership from a previous run.
        .with_room_state(&room_id("r1"), vec![name_event("One"), own_active_membership()])
        // State unreadable.
        .with_room_state_error(&room_id("r2"), status_error(403, "M_FORBIDDEN", "no"))
        // Joined but the membership state is missing.
        .with_room_state_error(&room_id("r5"), not_found())
        // Someone else's call and our own, already-left membership.
        .with_room_state(
            &room_id("r3"),
            vec![
                call_member_event(&alice_key, json!({"application": "m.call"})),
                call_member_event(&own_state_key(), json!({})),
            ],
        )
        // Membership held by an older device of the same user.
        .with_room_state(
            &room_id("r4"),
            vec![call_member_event(&other_device_key, json!({"application": "m.call"}))],
        );
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());

    let left = calls.disconnect_all().await.unwrap();

    assert_eq!(left, vec![room_id("r1"), room_id("r4")]);
    for unreadable in ["r2", "r5"] {
        assert!(homeserver
            .calls()
            .contains(&HomeserverCall::RoomState(room_id(unreadable))));
    }
    assert_eq!(
        homeserver.membership_writes(),
        vec![
            (room_id("r1"), own_state_key(), json!({})),
            (room_id("r4"), other_device_key, json!({})),
        ]
    );
}

#[tokio::test]
async fn test_disconnect_all_skips_room_when_clear_fails() {
    let homeserver = MockHomeserver::new()
        .with_room_state(&room_id("r1"), vec![own_active_membership()])
        .with_room_state(&room_id("r2"), vec![own_active_membership()])
        .with_membership_error(&room_id("r1"), server_error(500));
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());

    let left = calls.disconnect_all().await.unwrap();

    assert_eq!(left, vec![room_id("r2")]);
}

#[tokio::test]
async fn test_disconnect_all_closes_local_sessions() {
    let homeserver = MockHomeserver::new().with_room_state(&room_id("a"), vec![name_event("A")]);
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &media);
    calls.join(&room("a")).await.unwrap();

    let left = calls.disconnect_all().await.unwrap();

    assert_eq!(left, vec![room_id("a")]);
    assert_eq!(media.closes(), 1);
    assert!(!calls.is_in_call(&room_id("a")));
    let writes = homeserver.membership_writes();
    assert_eq!(writes.last().unwrap().2, json!({}));
}

#[tokio::test]
async fn test_disconnect_all_fails_when_room_list_fails() {
    let homeserver = MockHomeserver::new().with_joined_rooms_error(server_error(503));
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());

    let result = calls.disconnect_all().await;

    assert!(matches!(result, Err(CallError::RoomScan(_))), "{result:?}");
}

// ============================================================================
// Playback
// ============================================================================

#[tokio::test]
async fn test_play_requires_active_call() {
    let homeserver = MockHomeserver::new();
    let calls = orchestrator(&homeserver, &MockSfu::new(), &RecordingMediaConnector::new());
    let clip = AudioClip {
        name: "intro.ogg".to_string(),
        frames: vec![AudioFrame::silence()],
    };

    let result = calls.play(&room_id("a"), clip);

    assert!(matches!(result, Err(CallError::NoActiveCall(_))), "{result:?}");
}

#[tokio::test(start_paused = true)]
async fn test_play_streams_clip_into_session() {
    let homeserver = MockHomeserver::new();
    let media = RecordingMediaConnector::new();
    let mut calls = orchestrator(&homeserver, &MockSfu::new(), &media);
    calls.join(&room("a")).await.unwrap();

    let clip = AudioClip {
        name: "tone".to_string(),
        frames: vec![
            AudioFrame {
                samples: vec![1000; 960],
            };
            5
        ],
    };
    calls.play(&room_id("a"), clip).unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(media.audible_frames(), 5);
    assert!(media.frames() > 5);
}
