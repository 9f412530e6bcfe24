//! HTTP implementation of `HomeserverApi` (client-server API v3).
//!
//! Every request carries the bearer access token. Path segments built from
//! identifiers are percent-encoded by `Url::path_segments_mut`.

use super::{
    HomeserverApi, OpenIdToken, OutgoingMessage, RoomEvent, SyncBatch, WhoAmI, CALL_MEMBER_EVENT,
    ROOM_MESSAGE,
};
use crate::errors::HomeserverError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use common::types::{RoomId, UserId};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// =============================================================================
// Constants
// =============================================================================

/// Connection timeout for every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Margin added to the server-side wait for long-poll and OpenID requests so
/// the local deadline never races the server's.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// Server-side budget assumed for OpenID token requests.
const OPENID_TIMEOUT: Duration = Duration::from_secs(30);

const API_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];

// =============================================================================
// Response bodies
// =============================================================================

#[derive(Debug, Deserialize)]
struct MatrixErrorBody {
    errcode: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JoinedRoomsResponse {
    joined_rooms: Vec<RoomId>,
}

#[derive(Debug, Deserialize)]
struct EventIdResponse {
    event_id: String,
}

#[derive(Debug, Deserialize)]
struct DisplayNameResponse {
    displayname: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// Homeserver client over reqwest.
pub struct MatrixHomeserverClient {
    client: Client,
    base_url: Url,
    access_token: SecretString,
    closed: AtomicBool,
}

impl MatrixHomeserverClient {
    /// Create a client for `base_url`.
    ///
    /// `http_timeout` applies to every request except sync and OpenID, which
    /// derive their own deadline.
    ///
    /// # Errors
    ///
    /// Returns `HomeserverError::Configuration` if the URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        access_token: SecretString,
        http_timeout: Duration,
    ) -> Result<Self, HomeserverError> {
        let base_url = Url::parse(base_url).map_err(|e| {
            HomeserverError::Configuration(format!("Invalid homeserver URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(HomeserverError::Configuration(format!(
                "Homeserver URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(http_timeout)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                HomeserverError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            access_token,
            closed: AtomicBool::new(false),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, HomeserverError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                HomeserverError::Configuration("Homeserver URL cannot carry a path".to_string())
            })?
            .pop_if_empty()
            .extend(API_PREFIX)
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, HomeserverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HomeserverError::Configuration(
                "Homeserver client is closed".to_string(),
            ));
        }

        let url = self.endpoint(segments)?;
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(self.access_token.expose_secret()))
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, HomeserverError> {
        let response = request.send().await.map_err(|e| {
            warn!(target: "bot.homeserver", error = %e, "Homeserver request failed");
            HomeserverError::Transport(e.to_string())
        })?;

        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| {
                warn!(target: "bot.homeserver", error = %e, "Failed to parse homeserver response");
                HomeserverError::InvalidResponse(e.to_string())
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            let parsed: Option<MatrixErrorBody> = serde_json::from_str(&body).ok();
            let (errcode, message) = match parsed {
                Some(b) => (b.errcode, b.error.unwrap_or_else(|| status.to_string())),
                None => (None, status.to_string()),
            };

            if status.is_server_error() {
                warn!(target: "bot.homeserver", status = %status, "Homeserver returned server error");
            } else {
                debug!(target: "bot.homeserver", status = %status, errcode = ?errcode, "Homeserver rejected request");
            }

            Err(HomeserverError::Status {
                status: status.as_u16(),
                errcode,
                message,
            })
        }
    }
}

#[async_trait]
impl HomeserverApi for MatrixHomeserverClient {
    #[instrument(skip_all)]
    async fn whoami(&self) -> Result<WhoAmI, HomeserverError> {
        let request = self.request(Method::GET, &["account", "whoami"])?;
        self.execute(request).await
    }

    #[instrument(skip(self, since), fields(has_since = since.is_some()))]
    async fn sync(
        &self,
        since: Option<&str>,
        timeout_ms: u64,
    ) -> Result<SyncBatch, HomeserverError> {
        let mut query = vec![("timeout", timeout_ms.to_string())];
        if let Some(since) = since {
            query.push(("since", since.to_string()));
        }

        let request = self
            .request(Method::GET, &["sync"])?
            .query(&query)
            .timeout(Duration::from_millis(timeout_ms) + CLIENT_TIMEOUT_MARGIN);

        self.execute(request).await
    }

    #[instrument(skip_all)]
    async fn joined_room_ids(&self) -> Result<Vec<RoomId>, HomeserverError> {
        let request = self.request(Method::GET, &["joined_rooms"])?;
        let response: JoinedRoomsResponse = self.execute(request).await?;
        Ok(response.joined_rooms)
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn room_state(&self, room_id: &RoomId) -> Result<Vec<RoomEvent>, HomeserverError> {
        let request = self.request(Method::GET, &["rooms", room_id.as_str(), "state"])?;
        self.execute(request).await
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn send_message(
        &self,
        room_id: &RoomId,
        message: &OutgoingMessage,
    ) -> Result<String, HomeserverError> {
        let txn_id = format!("bot-{}", Uuid::new_v4());
        let request = self
            .request(
                Method::PUT,
                &["rooms", room_id.as_str(), "send", ROOM_MESSAGE, &txn_id],
            )?
            .json(&message.to_content());

        let response: EventIdResponse = self.execute(request).await?;
        debug!(target: "bot.homeserver", event_id = %response.event_id, "Message sent");
        Ok(response.event_id)
    }

    #[instrument(skip(self, content), fields(room_id = %room_id))]
    async fn set_call_membership(
        &self,
        room_id: &RoomId,
        state_key: &str,
        content: &Value,
    ) -> Result<(), HomeserverError> {
        let request = self
            .request(
                Method::PUT,
                &["rooms", room_id.as_str(), "state", CALL_MEMBER_EVENT, state_key],
            )?
            .json(content);

        let response: EventIdResponse = self.execute(request).await?;
        debug!(target: "bot.homeserver", event_id = %response.event_id, "Call membership written");
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn request_openid_token(
        &self,
        user_id: &UserId,
    ) -> Result<OpenIdToken, HomeserverError> {
        let request = self
            .request(
                Method::POST,
                &["user", user_id.as_str(), "openid", "request_token"],
            )?
            .json(&json!({}))
            .timeout(OPENID_TIMEOUT + CLIENT_TIMEOUT_MARGIN);

        self.execute(request).await
    }

    #[instrument(skip_all, fields(user_id = %user_id))]
    async fn display_name(&self, user_id: &UserId) -> Result<Option<String>, HomeserverError> {
        let request = self.request(
            Method::GET,
            &["profile", user_id.as_str(), "displayname"],
        )?;

        match self.execute::<DisplayNameResponse>(request).await {
            Ok(response) => Ok(response.displayname),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(target: "bot.homeserver", "Homeserver client closed");
        }
    }
}
