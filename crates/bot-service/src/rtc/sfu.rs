//! SFU credential exchange.
//!
//! Trades the homeserver's OpenID assertion for the signaling URL and JWT of
//! the selected focus: `POST {service_url}/sfu/get`.

use crate::errors::RtcError;
use crate::homeserver::OpenIdToken;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{DeviceId, RoomId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const SFU_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Signaling credentials for one join attempt. Never persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct RtcCredentials {
    /// Signaling server URL.
    pub url: String,
    /// Access token for the signaling server.
    pub jwt: SecretString,
}

#[derive(Serialize)]
struct OpenIdBody<'a> {
    access_token: &'a str,
    token_type: &'a str,
    matrix_server_name: &'a str,
    expires_in: u64,
}

#[derive(Serialize)]
struct SfuRequest<'a> {
    room: &'a str,
    openid_token: OpenIdBody<'a>,
    device_id: &'a str,
}

/// Exchanges an identity assertion for RTC credentials.
#[async_trait]
pub trait SfuTokenApi: Send + Sync {
    async fn exchange(
        &self,
        service_url: &str,
        openid: &OpenIdToken,
        room_id: &RoomId,
        device_id: &DeviceId,
    ) -> Result<RtcCredentials, RtcError>;
}

/// HTTP implementation of `SfuTokenApi`.
#[derive(Clone)]
pub struct SfuTokenClient {
    client: Client,
}

impl SfuTokenClient {
    /// # Errors
    ///
    /// Returns `RtcError::Configuration` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, RtcError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(SFU_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| RtcError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SfuTokenApi for SfuTokenClient {
    #[instrument(skip(self, openid), fields(room_id = %room_id))]
    async fn exchange(
        &self,
        service_url: &str,
        openid: &OpenIdToken,
        room_id: &RoomId,
        device_id: &DeviceId,
    ) -> Result<RtcCredentials, RtcError> {
        let url = format!("{}/sfu/get", service_url.trim_end_matches('/'));

        let body = SfuRequest {
            room: room_id.as_str(),
            openid_token: OpenIdBody {
                access_token: openid.access_token.expose_secret(),
                token_type: &openid.token_type,
                matrix_server_name: &openid.matrix_server_name,
                expires_in: openid.expires_in,
            },
            device_id: device_id.as_str(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "bot.rtc", error = %e, "SFU request failed");
                RtcError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(target: "bot.rtc", status = %status, "SFU rejected credential exchange");
            return Err(RtcError::Status(status.as_u16()));
        }

        let credentials: RtcCredentials = response.json().await.map_err(|e| {
            warn!(target: "bot.rtc", error = %e, "Failed to parse SFU response");
            RtcError::InvalidResponse(e.to_string())
        })?;

        debug!(target: "bot.rtc", signaling_url = %credentials.url, "Obtained RTC credentials");
        Ok(credentials)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openid() -> OpenIdToken {
        OpenIdToken {
            access_token: SecretString::from("oid"),
            token_type: "Bearer".to_string(),
            matrix_server_name: "example.org".to_string(),
            expires_in: 3600,
        }
    }

    #[tokio::test]
    async fn test_exchange_posts_openid_and_room() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sfu/get"))
            .and(body_json(json!({
                "room": "!r:example.org",
                "openid_token": {
                    "access_token": "oid",
                    "token_type": "Bearer",
                    "matrix_server_name": "example.org",
                    "expires_in": 3600
                },
                "device_id": "DEV"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "url": "wss://sfu.example.org",
                "jwt": "eyJ.jwt"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = SfuTokenClient::new(Duration::from_secs(5)).unwrap();
        let credentials = client
            .exchange(
                &format!("{}/", server.uri()),
                &openid(),
                &RoomId::from("!r:example.org"),
                &DeviceId::from("DEV"),
            )
            .await
            .unwrap();

        assert_eq!(credentials.url, "wss://sfu.example.org");
        assert_eq!(credentials.jwt.expose_secret(), "eyJ.jwt");
        assert!(!format!("{credentials:?}").contains("eyJ.jwt"));
    }

    #[tokio::test]
    async fn test_exchange_maps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sfu/get"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SfuTokenClient::new(Duration::from_secs(5)).unwrap();
        let result = client
            .exchange(
                &server.uri(),
                &openid(),
                &RoomId::from("!r:example.org"),
                &DeviceId::from("DEV"),
            )
            .await;

        assert!(matches!(result, Err(RtcError::Status(500))));
    }
}
