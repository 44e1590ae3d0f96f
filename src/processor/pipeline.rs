use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::report::RunReport;
use crate::db::pool::ConnectionPool;
use crate::db::Connector;
use crate::geofence;
use crate::models::alarm::{AlarmConfig, AlarmDocument, InvalidAlarm};
use crate::models::notification::NotificationCandidate;

/// Terminal state of one alarm in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum AlarmOutcome {
    Fired(NotificationCandidate),
    NotFired,
    SkippedInvalid(InvalidAlarm),
    SkippedInactive,
    SkippedNoPosition,
    LookupFailed(String),
}

/// Decides, for every alarm of a run, whether it fires.
pub struct AlarmEvaluationPipeline<C: Connector> {
    pool: Arc<ConnectionPool<C>>,
    workers: usize,
}

impl<C: Connector> AlarmEvaluationPipeline<C> {
    pub fn new(pool: Arc<ConnectionPool<C>>, workers: usize) -> Self {
        Self {
            pool,
            workers: workers.max(1),
        }
    }

    /// Evaluates all documents and returns the candidates of fired alarms.
    /// No single alarm can abort the batch.
    pub async fn evaluate(
        &self,
        documents: Vec<AlarmDocument>,
        report: &mut RunReport,
    ) -> Vec<NotificationCandidate> {
        let mut candidates = Vec::new();
        let mut alarms = Vec::with_capacity(documents.len());

        for doc in documents {
            match AlarmConfig::from_document(&doc) {
                Ok(alarm) if alarm.active => alarms.push(alarm),
                Ok(alarm) => {
                    debug!("Alarm {} is inactive, skipping", alarm.alarm_id);
                    fold(AlarmOutcome::SkippedInactive, report, &mut candidates);
                }
                Err(err) => {
                    warn!(
                        user_id = %doc.user_id,
                        "Alarm {} found but invalid. Skipping: {}",
                        doc.alarm_id,
                        err
                    );
                    fold(AlarmOutcome::SkippedInvalid(err), report, &mut candidates);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for alarm in alarms {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let pool = Arc::clone(&self.pool);
            tasks.spawn(async move {
                let outcome = evaluate_one(&pool, &alarm).await;
                drop(permit);
                outcome
            });

            while let Some(joined) = tasks.try_join_next() {
                fold_joined(joined, report, &mut candidates);
            }
        }
        while let Some(joined) = tasks.join_next().await {
            fold_joined(joined, report, &mut candidates);
        }

        candidates
    }
}

/// Looks up the vessel and applies the geofence. The connection goes back to
/// the pool before the decision is made.
pub async fn evaluate_one<C: Connector>(
    pool: &Arc<ConnectionPool<C>>,
    alarm: &AlarmConfig,
) -> AlarmOutcome {
    let mut conn = match pool.acquire().await {
        Ok(conn) => conn,
        Err(err) => {
            error!(alarm_id = %alarm.alarm_id, error = %err, "No connection for position lookup");
            return AlarmOutcome::LookupFailed(err.to_string());
        }
    };
    if conn.is_transient() {
        debug!(alarm_id = %alarm.alarm_id, "Position lookup on transient connection");
    }
    let lookup = conn.latest_position(&alarm.vessel_id).await;
    conn.release().await;

    let position = match lookup {
        Ok(Some(position)) => position,
        Ok(None) => {
            warn!("No position found for MMSI {} (alarm {})", alarm.vessel_id, alarm.alarm_id);
            return AlarmOutcome::SkippedNoPosition;
        }
        Err(err) => {
            error!(
                alarm_id = %alarm.alarm_id,
                mmsi = %alarm.vessel_id,
                error = %err,
                "Position lookup failed"
            );
            return AlarmOutcome::LookupFailed(err.to_string());
        }
    };

    // AIS reports 91/181 when the fix is not available.
    if !position.coordinate().is_valid() {
        warn!(
            "Unusable position ({}, {}) for MMSI {} (alarm {})",
            position.latitude, position.longitude, alarm.vessel_id, alarm.alarm_id
        );
        return AlarmOutcome::SkippedNoPosition;
    }

    let distance = geofence::distance_meters(position.coordinate(), alarm.center);
    debug!(
        "Distance for MMSI {}: {:.2} meters (radius {} m, {})",
        alarm.vessel_id, distance, alarm.radius_meters, alarm.mode
    );

    if geofence::evaluate(
        alarm.mode,
        position.coordinate(),
        alarm.center,
        alarm.radius_meters,
    ) {
        AlarmOutcome::Fired(NotificationCandidate::fired(alarm, Utc::now().timestamp()))
    } else {
        AlarmOutcome::NotFired
    }
}

fn fold(outcome: AlarmOutcome, report: &mut RunReport, candidates: &mut Vec<NotificationCandidate>) {
    match outcome {
        AlarmOutcome::SkippedInvalid(_) => report.record_invalid(),
        AlarmOutcome::SkippedInactive => report.record_inactive(),
        AlarmOutcome::Fired(candidate) => {
            report.record_checked();
            candidates.push(candidate);
        }
        AlarmOutcome::NotFired => report.record_checked(),
        AlarmOutcome::SkippedNoPosition => {
            report.record_checked();
            report.record_no_position();
        }
        AlarmOutcome::LookupFailed(_) => {
            report.record_checked();
            report.record_lookup_error();
        }
    }
}

fn fold_joined(
    joined: Result<AlarmOutcome, tokio::task::JoinError>,
    report: &mut RunReport,
    candidates: &mut Vec<NotificationCandidate>,
) {
    let outcome = joined.unwrap_or_else(|err| {
        error!("Alarm evaluation task failed: {}", err);
        AlarmOutcome::LookupFailed(err.to_string())
    });
    fold(outcome, report, candidates);
}
