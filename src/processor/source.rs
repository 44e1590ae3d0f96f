use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::firebase::auth::AuthError;
use crate::models::alarm::{AlarmConfig, AlarmDocument};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("alarm store returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to decode alarm store response: {0}")]
    Decode(String),
    #[error("diagnostic read of {target} failed: {reason}")]
    Probe { target: String, reason: String },
}

/// Every alarm document found in one scan of the store.
#[derive(Debug, Default)]
pub struct AlarmScan {
    pub users_processed: usize,
    pub alarms: Vec<AlarmDocument>,
}

/// Read access to the `users/{userId}/alarms/{alarmId}` hierarchy.
#[async_trait]
pub trait AlarmSource: Send + Sync {
    async fn list_all_alarms(&self) -> Result<AlarmScan, SourceError>;

    async fn get_alarm(
        &self,
        user_id: &str,
        alarm_id: &str,
    ) -> Result<Option<AlarmDocument>, SourceError>;
}

/// Reads one known alarm and checks it is complete, to fail fast when the
/// credentials cannot see the store.
pub async fn probe_alarm<S: AlarmSource + ?Sized>(
    source: &S,
    user_id: &str,
    alarm_id: &str,
) -> Result<(), SourceError> {
    let target = format!("alarm '{}' of user '{}'", alarm_id, user_id);
    let doc = source
        .get_alarm(user_id, alarm_id)
        .await?
        .ok_or_else(|| SourceError::Probe {
            target: target.clone(),
            reason: "document not found".to_string(),
        })?;

    let alarm = AlarmConfig::from_document(&doc).map_err(|err| SourceError::Probe {
        target: target.clone(),
        reason: err.to_string(),
    })?;

    info!(
        "Read access confirmed for {}: MMSI='{}', name='{}', token present",
        target, alarm.vessel_id, alarm.display_name
    );
    Ok(())
}
