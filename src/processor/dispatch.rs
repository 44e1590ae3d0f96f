use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::models::notification::{
    DispatchOutcome, DispatchResult, NotificationCandidate, NotificationTemplate, PushNotification,
};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("device token is not registered: {0}")]
    InvalidToken(String),
    #[error("push backend returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not authorize push request: {0}")]
    Auth(String),
}

/// Delivers one push message. Implementations apply their own timeouts.
#[async_trait]
pub trait PushBackend: Send + Sync + 'static {
    /// Returns the message identifier assigned by the backend.
    async fn send(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<String, PushError>;
}

/// Sends notifications with at most `max_workers` in flight.
pub struct DispatchEngine<B: PushBackend> {
    backend: Arc<B>,
    max_workers: usize,
    template: NotificationTemplate,
}

impl<B: PushBackend> DispatchEngine<B> {
    pub fn new(backend: Arc<B>, max_workers: usize) -> Self {
        Self {
            backend,
            max_workers: max_workers.max(1),
            template: NotificationTemplate,
        }
    }

    /// Sends every candidate once and returns one outcome per candidate, in
    /// completion order.
    pub async fn dispatch(&self, candidates: Vec<NotificationCandidate>) -> Vec<DispatchOutcome> {
        if candidates.is_empty() {
            return Vec::new();
        }
        info!(
            "Sending {} messages in parallel (max {} workers)...",
            candidates.len(),
            self.max_workers
        );

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            // The semaphore is never closed.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let backend = Arc::clone(&self.backend);
            let notification = self.template.render(&candidate);

            tasks.spawn(async move {
                // A panicking backend still yields an outcome for its candidate.
                let result = AssertUnwindSafe(send_one(backend.as_ref(), &candidate, &notification))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        error!(
                            alarm_id = %candidate.alarm_id,
                            "Push backend panicked while sending"
                        );
                        DispatchResult::Failed("push backend panicked".to_string())
                    });
                drop(permit);
                DispatchOutcome { candidate, result }
            });

            // Collect whatever already finished so the set stays small.
            while let Some(joined) = tasks.try_join_next() {
                collect(joined, &mut outcomes);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut outcomes);
        }
        outcomes
    }
}

async fn send_one<B: PushBackend>(
    backend: &B,
    candidate: &NotificationCandidate,
    notification: &PushNotification,
) -> DispatchResult {
    match backend.send(&candidate.device_token, notification).await {
        Ok(message_id) => {
            debug!(
                alarm_id = %candidate.alarm_id,
                mmsi = %candidate.vessel_id,
                response = %message_id,
                "Alarm notification sent"
            );
            DispatchResult::Sent(message_id)
        }
        Err(PushError::InvalidToken(_)) => {
            warn!(
                alarm_id = %candidate.alarm_id,
                user_id = %candidate.user_id,
                "Device token is stale or invalid"
            );
            DispatchResult::InvalidToken
        }
        Err(err) => {
            error!(
                alarm_id = %candidate.alarm_id,
                mmsi = %candidate.vessel_id,
                error = %err,
                "[FAILURE] {} (MMSI: {})",
                candidate.display_name,
                candidate.vessel_id
            );
            DispatchResult::Failed(err.to_string())
        }
    }
}

fn collect(
    joined: Result<DispatchOutcome, tokio::task::JoinError>,
    outcomes: &mut Vec<DispatchOutcome>,
) {
    match joined {
        Ok(outcome) => outcomes.push(outcome),
        // Tasks are never aborted and panics are caught inside them.
        Err(err) => error!("Dispatch task failed: {}", err),
    }
}
