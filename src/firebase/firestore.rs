//! Alarm documents read through the Firestore REST API.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::auth::TokenSource;
use crate::models::alarm::{AlarmDocument, FieldValue};
use crate::processor::source::{AlarmScan, AlarmSource, SourceError};

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: &str = "300";
// Users whose alarm subcollections are listed at the same time.
const USER_CONCURRENCY: usize = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDocumentsResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Document {
    // projects/{p}/databases/(default)/documents/users/{uid}/alarms/{aid}
    name: String,
    // Decoded per field in `into_alarm`, so one odd value cannot fail a page.
    #[serde(default)]
    fields: HashMap<String, serde_json::Value>,
}

impl Document {
    fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Fields that do not decode as a Firestore value are left out, which
    /// makes the alarm invalid if the field was required.
    fn into_alarm(self, user_id: &str) -> AlarmDocument {
        let alarm_id = self.id().to_string();
        let fields = self
            .fields
            .into_iter()
            .filter_map(|(name, raw)| match serde_json::from_value::<FieldValue>(raw) {
                Ok(value) => Some((name, value)),
                Err(err) => {
                    debug!(
                        alarm_id = %alarm_id,
                        "Dropping undecodable field '{}': {}",
                        name,
                        err
                    );
                    None
                }
            })
            .collect();

        AlarmDocument {
            user_id: user_id.to_string(),
            alarm_id,
            fields,
        }
    }
}

pub struct FirestoreAlarmSource {
    client: Client,
    auth: Arc<dyn TokenSource>,
    base_url: String,
    project_id: String,
    users_collection: String,
    alarms_collection: String,
}

impl FirestoreAlarmSource {
    pub fn new(
        client: Client,
        auth: Arc<dyn TokenSource>,
        project_id: &str,
        users_collection: &str,
        alarms_collection: &str,
    ) -> Self {
        Self {
            client,
            auth,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id: project_id.to_string(),
            users_collection: users_collection.to_string(),
            alarms_collection: alarms_collection.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn documents_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}/databases/(default)/documents/{}",
            self.base_url, self.project_id, path
        )
    }

    fn alarms_path(&self, user_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.users_collection, user_id, self.alarms_collection
        )
    }

    /// Lists a whole collection, following page tokens. With `show_missing`,
    /// documents that only exist as parents of subcollections are included.
    async fn list_documents(
        &self,
        collection_path: &str,
        show_missing: bool,
    ) -> Result<Vec<Document>, SourceError> {
        let url = self.documents_url(collection_path);
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let token = self.auth.access_token().await?;
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("pageSize", PAGE_SIZE)]);
            if show_missing {
                request = request.query(&[("showMissing", "true")]);
            }
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let page: ListDocumentsResponse = decode(request.send().await?).await?;
            documents.extend(page.documents);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(documents)
    }

    /// A user's alarms. An unreadable subcollection is logged and yields none.
    async fn alarms_for_user(&self, user: Document) -> Vec<AlarmDocument> {
        let user_id = user.id().to_string();
        match self.list_documents(&self.alarms_path(&user_id), false).await {
            Ok(alarms) => {
                if !alarms.is_empty() {
                    info!("  > User {}: Found {} alarm(s)", user_id, alarms.len());
                }
                alarms
                    .into_iter()
                    .map(|doc| doc.into_alarm(&user_id))
                    .collect()
            }
            Err(err) => {
                warn!(
                    "Could not access alarms subcollection for user {}: {}",
                    user_id, err
                );
                Vec::new()
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, SourceError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(SourceError::Api {
            status: status.as_u16(),
            message,
        });
    }
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Decode(e.to_string()))
}

#[async_trait]
impl AlarmSource for FirestoreAlarmSource {
    async fn list_all_alarms(&self) -> Result<AlarmScan, SourceError> {
        let users = self.list_documents(&self.users_collection, true).await?;
        let users_processed = users.len();

        let per_user: Vec<Vec<AlarmDocument>> = stream::iter(users)
            .map(|user| self.alarms_for_user(user))
            .buffer_unordered(USER_CONCURRENCY)
            .collect()
            .await;

        Ok(AlarmScan {
            users_processed,
            alarms: per_user.into_iter().flatten().collect(),
        })
    }

    async fn get_alarm(
        &self,
        user_id: &str,
        alarm_id: &str,
    ) -> Result<Option<AlarmDocument>, SourceError> {
        let url = self.documents_url(&format!("{}/{}", self.alarms_path(user_id), alarm_id));
        let token = self.auth.access_token().await?;
        let response = self.client.get(&url).bearer_auth(&token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc: Document = decode(response).await?;
        Ok(Some(doc.into_alarm(user_id)))
    }
}
