pub mod dispatch;
pub mod pipeline;
pub mod report;
pub mod source;

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::db::pool::ConnectionPool;
use crate::db::Connector;
use dispatch::{DispatchEngine, PushBackend};
use pipeline::AlarmEvaluationPipeline;
use report::RunReport;
use source::{AlarmSource, SourceError};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub eval_workers: usize,
    pub max_workers: usize,
}

/// One scheduled invocation: scan alarms, evaluate them, send notifications
/// for the ones that fired. Only an unreachable alarm store is fatal.
pub async fn run<S, C, B>(
    source: &S,
    pool: Arc<ConnectionPool<C>>,
    backend: Arc<B>,
    settings: &RunSettings,
) -> Result<RunReport, SourceError>
where
    S: AlarmSource + ?Sized,
    C: Connector,
    B: PushBackend,
{
    let started = Instant::now();
    let mut report = RunReport::default();

    info!("--- Starting Parallel Alarm Processing ---");
    let scan = source.list_all_alarms().await?;
    report.record_users(scan.users_processed);
    info!(
        "Found {} alarm(s) across {} user(s)",
        scan.alarms.len(),
        scan.users_processed
    );

    let pipeline = AlarmEvaluationPipeline::new(pool, settings.eval_workers);
    let candidates = pipeline.evaluate(scan.alarms, &mut report).await;

    let engine = DispatchEngine::new(backend, settings.max_workers);
    let outcomes = engine.dispatch(candidates).await;
    for outcome in &outcomes {
        report.record_dispatch(outcome);
    }
    if !outcomes.is_empty() {
        info!(
            "[RESULT] Sent: {}, Failed: {} (Invalid tokens: {})",
            report.sent, report.failed, report.invalid_tokens
        );
    }

    report.finish(started.elapsed());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::PoolOptions;
    use crate::testing::{alarm_document, MemoryAlarmSource, MemoryConnector, RecordingBackend};
    use std::time::Duration;

    const CENTER_LAT: f64 = 55.6902;
    const CENTER_LON: f64 = 12.7099;

    fn settings() -> RunSettings {
        RunSettings {
            eval_workers: 4,
            max_workers: 4,
        }
    }

    async fn memory_pool(connector: MemoryConnector) -> Arc<ConnectionPool<MemoryConnector>> {
        ConnectionPool::initialize(
            connector,
            PoolOptions {
                capacity: 4,
                health_check_interval: Duration::from_secs(60),
            },
        )
        .await
        .unwrap()
    }

    fn alarm(mode: &str, radius: f64) -> serde_json::Value {
        serde_json::json!({
            "FCMDeviceToken": { "stringValue": "device-token-1" },
            "vesselMMSI": { "stringValue": "219000001" },
            "name": { "stringValue": "Øresund Ferry" },
            "mode": { "stringValue": mode },
            "center": { "geoPointValue": { "latitude": CENTER_LAT, "longitude": CENTER_LON } },
            "radiusMeters": { "doubleValue": radius }
        })
    }

    #[tokio::test]
    async fn test_inside_radius_fires_and_sends() {
        // 3245.67 m due north of the center.
        let connector =
            MemoryConnector::new().with_position("219000001", 55.719389, CENTER_LON, 1_764_396_915);
        let source = MemoryAlarmSource::default()
            .with_user("u1", vec![alarm_document("u1", "a1", alarm("inside_radius", 5000.0))]);
        let backend = Arc::new(RecordingBackend::default());

        let report = run(&source, memory_pool(connector).await, Arc::clone(&backend), &settings())
            .await
            .unwrap();

        assert_eq!(report.users_processed, 1);
        assert_eq!(report.alerts_checked, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped_invalid_data, 0);
        assert_eq!(report.skipped_no_position, 0);

        let sent = backend.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "device-token-1");
        assert_eq!(sent[0].1.title, "🚨 Ship Alert: Øresund Ferry Detected!");
        assert_eq!(sent[0].1.data["vesselMMSI"], "219000001");
    }

    #[tokio::test]
    async fn test_outside_radius_at_center_does_not_fire() {
        let connector = MemoryConnector::new().with_position("219000001", CENTER_LAT, CENTER_LON, 1);
        let source = MemoryAlarmSource::default()
            .with_user("u1", vec![alarm_document("u1", "a1", alarm("outside_radius", 5000.0))]);
        let backend = Arc::new(RecordingBackend::default());

        let report = run(&source, memory_pool(connector).await, Arc::clone(&backend), &settings())
            .await
            .unwrap();

        assert_eq!(report.alerts_checked, 1);
        assert_eq!(report.sent, 0);
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_device_token_is_skipped() {
        let mut fields = alarm("inside_radius", 5000.0);
        fields.as_object_mut().unwrap().remove("FCMDeviceToken");
        let connector = MemoryConnector::new().with_position("219000001", CENTER_LAT, CENTER_LON, 1);
        let source =
            MemoryAlarmSource::default().with_user("u1", vec![alarm_document("u1", "a1", fields)]);
        let backend = Arc::new(RecordingBackend::default());

        let report = run(&source, memory_pool(connector).await, Arc::clone(&backend), &settings())
            .await
            .unwrap();

        assert_eq!(report.skipped_invalid_data, 1);
        assert_eq!(report.alerts_checked, 0);
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vessel_without_position_is_skipped() {
        let source = MemoryAlarmSource::default()
            .with_user("u1", vec![alarm_document("u1", "a1", alarm("inside_radius", 5000.0))]);
        let backend = Arc::new(RecordingBackend::default());

        let report = run(
            &source,
            memory_pool(MemoryConnector::new()).await,
            Arc::clone(&backend),
            &settings(),
        )
        .await
        .unwrap();

        assert_eq!(report.skipped_no_position, 1);
        assert_eq!(report.sent, 0);
        assert!(backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_alarm_store_is_fatal() {
        let source = MemoryAlarmSource {
            unreachable: true,
            ..Default::default()
        };
        let result = run(
            &source,
            memory_pool(MemoryConnector::new()).await,
            Arc::new(RecordingBackend::default()),
            &settings(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mixed_run_counts() {
        let connector = MemoryConnector::new()
            .with_position("219000001", 55.719389, CENTER_LON, 1)
            .with_position("219000002", 55.719389, CENTER_LON, 1)
            .with_position("219000003", 55.719389, CENTER_LON, 1);
        let doc = |user: &str, id: &str, mmsi: &str, token: &str| {
            let mut fields = alarm("inside_radius", 5000.0);
            fields["vesselMMSI"] = serde_json::json!({ "stringValue": mmsi });
            fields["FCMDeviceToken"] = serde_json::json!({ "stringValue": token });
            alarm_document(user, id, fields)
        };
        let source = MemoryAlarmSource::default()
            .with_user("u1", vec![doc("u1", "a1", "219000001", "ok")])
            .with_user(
                "u2",
                vec![
                    doc("u2", "a2", "219000002", "stale"),
                    doc("u2", "a3", "219000003", "broken"),
                    doc("u2", "a4", "219000404", "ok"),
                ],
            )
            .with_user("u3", vec![]);
        let mut backend = RecordingBackend::default();
        backend.invalid_tokens.insert("stale".to_string());
        backend.failing_tokens.insert("broken".to_string());

        let report = run(&source, memory_pool(connector).await, Arc::new(backend), &settings())
            .await
            .unwrap();

        assert_eq!(report.users_processed, 3);
        assert_eq!(report.alerts_checked, 4);
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.invalid_tokens, 1);
        assert_eq!(report.skipped_no_position, 1);
    }
}
