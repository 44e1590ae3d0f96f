//! Push delivery through the Firebase Cloud Messaging HTTP v1 API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::auth::TokenSource;
use crate::models::notification::PushNotification;
use crate::processor::dispatch::{PushBackend, PushError};

const FCM_BASE_URL: &str = "https://fcm.googleapis.com/v1";

/// iOS delivery hints attached to every message.
#[derive(Debug, Clone)]
pub struct ApnsOptions {
    pub sound: String,
    pub badge: u32,
    pub content_available: bool,
}

impl Default for ApnsOptions {
    fn default() -> Self {
        Self {
            sound: "default".to_string(),
            badge: 1,
            content_available: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    message: MessagePayload<'a>,
}

#[derive(Debug, Serialize)]
struct MessagePayload<'a> {
    token: &'a str,
    notification: Alert<'a>,
    data: &'a BTreeMap<String, String>,
    apns: ApnsConfig<'a>,
}

#[derive(Debug, Serialize)]
struct Alert<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ApnsConfig<'a> {
    payload: ApnsPayload<'a>,
}

#[derive(Debug, Serialize)]
struct ApnsPayload<'a> {
    aps: Aps<'a>,
}

#[derive(Debug, Serialize)]
struct Aps<'a> {
    alert: Alert<'a>,
    sound: &'a str,
    badge: u32,
    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FcmErrorResponse {
    error: FcmErrorDetails,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetails {
    #[serde(default)]
    message: String,
}

pub struct FcmPushBackend {
    client: Client,
    auth: Arc<dyn TokenSource>,
    base_url: String,
    project_id: String,
    apns: ApnsOptions,
}

impl FcmPushBackend {
    pub fn new(
        client: Client,
        auth: Arc<dyn TokenSource>,
        project_id: &str,
        apns: ApnsOptions,
    ) -> Self {
        Self {
            client,
            auth,
            base_url: FCM_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            apns,
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn message<'a>(
        &'a self,
        device_token: &'a str,
        notification: &'a PushNotification,
    ) -> FcmMessage<'a> {
        let alert = || Alert {
            title: &notification.title,
            body: &notification.body,
        };
        FcmMessage {
            message: MessagePayload {
                token: device_token,
                notification: alert(),
                data: &notification.data,
                apns: ApnsConfig {
                    payload: ApnsPayload {
                        aps: Aps {
                            alert: alert(),
                            sound: &self.apns.sound,
                            badge: self.apns.badge,
                            content_available: self.apns.content_available.then_some(1),
                        },
                    },
                },
            },
        }
    }
}

/// Maps an FCM error reply to a push error. Unregistered or malformed
/// registration tokens are permanent and reported separately.
fn classify_error(status: StatusCode, body: &str, device_token: &str) -> PushError {
    let message = serde_json::from_str::<FcmErrorResponse>(body)
        .ok()
        .map(|r| r.error.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    let unregistered = status == StatusCode::NOT_FOUND
        || body.contains("UNREGISTERED")
        || message.to_lowercase().contains("not registered");
    let bad_token = status == StatusCode::BAD_REQUEST
        && message.to_lowercase().contains("registration token");

    if unregistered || bad_token {
        PushError::InvalidToken(device_token.to_string())
    } else {
        PushError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl PushBackend for FcmPushBackend {
    async fn send(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<String, PushError> {
        let access_token = self
            .auth
            .access_token()
            .await
            .map_err(|e| PushError::Auth(e.to_string()))?;

        let url = format!(
            "{}/projects/{}/messages:send",
            self.base_url, self.project_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&access_token)
            .json(&self.message(device_token, notification))
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, device_token));
        }

        let sent: SendResponse = response
            .json()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;
        Ok(sent.name)
    }
}
