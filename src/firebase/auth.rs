//! OAuth2 access tokens for a Google service account.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Scopes needed to read Firestore and send through FCM.
pub const SCOPES: &str =
    "https://www.googleapis.com/auth/datastore https://www.googleapis.com/auth/firebase.messaging";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to load credentials: {0}")]
    Credentials(String),
    #[error("failed to create JWT: {0}")]
    Jwt(String),
    #[error("token exchange failed: {0}")]
    Token(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// The parts of a service account key file we use.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: Option<String>,
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    /// Loads a key from inline JSON or from a file path.
    pub fn load(source: &str) -> Result<Self, AuthError> {
        if source.trim().starts_with('{') {
            serde_json::from_str(source)
                .map_err(|e| AuthError::Credentials(format!("Invalid JSON: {}", e)))
        } else {
            let content = std::fs::read_to_string(source).map_err(|e| {
                AuthError::Credentials(format!("Failed to read '{}': {}", source, e))
            })?;
            serde_json::from_str(&content)
                .map_err(|e| AuthError::Credentials(format!("Invalid credentials JSON: {}", e)))
        }
    }
}

/// Anything that can hand out a bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;
}

#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Exchanges a signed JWT for an access token and caches it until shortly
/// before it expires. Concurrent callers wait for a single refresh.
pub struct ServiceAccountTokenProvider {
    client: Client,
    key: ServiceAccountKey,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenProvider {
    pub fn new(client: Client, key: ServiceAccountKey) -> Self {
        Self {
            client,
            key,
            cache: Mutex::new(None),
        }
    }

    fn signed_assertion(&self) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = JwtClaims {
            iss: self.key.client_email.clone(),
            scope: SCOPES.to_string(),
            aud: self.key.token_uri.clone(),
            iat: now,
            exp: now + 3600,
        };

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AuthError::Jwt(format!("Invalid private key: {}", e)))?;
        jsonwebtoken::encode(&header, &claims, &encoding_key).map_err(|e| AuthError::Jwt(e.to_string()))
    }

    async fn fetch(&self) -> Result<CachedToken, AuthError> {
        let assertion = self.signed_assertion()?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AuthError::Token(error_text));
        }

        let token: TokenResponse = response.json().await?;
        debug!("Fetched access token valid for {}s", token.expires_in);
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenProvider {
    async fn access_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        if let Some(token) = cache.as_ref() {
            if token.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.fetch().await?;
        let access_token = token.access_token.clone();
        *cache = Some(token);
        Ok(access_token)
    }
}

#[cfg(test)]
pub struct StaticToken(pub &'static str);

#[cfg(test)]
#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.to_string())
    }
}
