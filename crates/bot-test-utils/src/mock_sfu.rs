//! SFU token mock.

use async_trait::async_trait;
use bot_service::errors::RtcError;
use bot_service::homeserver::OpenIdToken;
use bot_service::rtc::{RtcCredentials, SfuTokenApi};
use common::secret::SecretString;
use common::types::{DeviceId, RoomId};
use std::sync::{Arc, Mutex};

pub const SIGNALING_URL: &str = "wss://sfu.example.org";

/// One exchange request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfuExchange {
    pub service_url: String,
    pub room_id: RoomId,
    pub device_id: DeviceId,
}

/// `SfuTokenApi` returning fixed credentials or a fixed error.
#[derive(Debug, Clone)]
pub struct MockSfu {
    inner: Arc<Mutex<MockSfuInner>>,
}

#[derive(Debug)]
struct MockSfuInner {
    error: Option<RtcError>,
    exchanges: Vec<SfuExchange>,
}

impl Default for MockSfu {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSfu {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockSfuInner {
                error: None,
                exchanges: Vec::new(),
            })),
        }
    }

    /// Every exchange fails with `error`.
    #[must_use]
    pub fn failing(error: RtcError) -> Self {
        let sfu = Self::new();
        sfu.inner.lock().unwrap().error = Some(error);
        sfu
    }

    #[must_use]
    pub fn exchanges(&self) -> Vec<SfuExchange> {
        self.inner.lock().unwrap().exchanges.clone()
    }
}

#[async_trait]
impl SfuTokenApi for MockSfu {
    async fn exchange(
        &self,
        service_url: &str,
        _openid: &OpenIdToken,
        room_id: &RoomId,
        device_id: &DeviceId,
    ) -> Result<RtcCredentials, RtcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.exchanges.push(SfuExchange {
            service_url: service_url.to_string(),
            room_id: room_id.clone(),
            device_id: device_id.clone(),
        });
        if let Some(error) = &inner.error {
            return Err(error.clone());
        }
        Ok(RtcCredentials {
            url: SIGNALING_URL.to_string(),
            jwt: SecretString::from("sfu-jwt"),
        })
    }
}
