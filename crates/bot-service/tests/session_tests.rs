//! Session bootstrap tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bot_service::discovery::{ClientConfig, RtcFocus};
use bot_service::errors::BootstrapError;
use bot_service::homeserver::WhoAmI;
use bot_service::session::bootstrap;
use bot_test_utils::*;
use common::types::{DeviceId, UserId};

#[tokio::test]
async fn test_bootstrap_resolves_identity_and_focus() {
    let homeserver = MockHomeserver::new();

    let session = bootstrap(&homeserver, &client_config()).await.unwrap();

    assert_eq!(session.user_id, UserId::from(BOT_USER));
    assert_eq!(session.device_id, DeviceId::from(BOT_DEVICE));
    assert_eq!(session.focus_service_url(), Some(SFU_SERVICE_URL));
    assert_eq!(session.display_name.as_deref(), Some("Call Bot"));
}

#[tokio::test]
async fn test_bootstrap_prefers_livekit_focus() {
    let homeserver = MockHomeserver::new();
    let config = ClientConfig {
        homeserver_base_url: "https://matrix.example.org".to_string(),
        rtc_foci: vec![
            RtcFocus::new("full_mesh", None),
            RtcFocus::new("livekit", Some(SFU_SERVICE_URL.to_string())),
        ],
    };

    let session = bootstrap(&homeserver, &config).await.unwrap();

    assert_eq!(session.focus.focus_type, "livekit");
}

#[tokio::test]
async fn test_bootstrap_rejected_token_is_fatal() {
    let homeserver = MockHomeserver::new().with_whoami_error(unknown_token());

    let result = bootstrap(&homeserver, &client_config()).await;

    assert!(
        matches!(&result, Err(BootstrapError::IdentityLookup(e)) if e.is_auth_failure()),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_bootstrap_requires_device_id() {
    let homeserver = MockHomeserver::new().with_whoami(WhoAmI {
        user_id: UserId::from(BOT_USER),
        device_id: None,
    });

    let result = bootstrap(&homeserver, &client_config()).await;

    assert!(matches!(result, Err(BootstrapError::MissingDeviceId)), "{result:?}");
}

#[tokio::test]
async fn test_bootstrap_requires_focus() {
    let homeserver = MockHomeserver::new();
    let config = ClientConfig {
        homeserver_base_url: "https://matrix.example.org".to_string(),
        rtc_foci: vec![],
    };

    let result = bootstrap(&homeserver, &config).await;

    assert!(matches!(result, Err(BootstrapError::NoRtcFocus)), "{result:?}");
}

#[tokio::test]
async fn test_bootstrap_requires_service_url() {
    let homeserver = MockHomeserver::new();
    let config = ClientConfig {
        homeserver_base_url: "https://matrix.example.org".to_string(),
        rtc_foci: vec![RtcFocus::new("livekit", None)],
    };

    let result = bootstrap(&homeserver, &config).await;

    assert!(
        matches!(&result, Err(BootstrapError::MissingServiceUrl(kind)) if kind == "livekit"),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_display_name_failure_is_not_fatal() {
    let homeserver = MockHomeserver::new().with_display_name_error(server_error(500));

    let session = bootstrap(&homeserver, &client_config()).await.unwrap();

    assert_eq!(session.display_name, None);
}
