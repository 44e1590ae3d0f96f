mod config;
mod db;
mod firebase;
mod geofence;
mod models;
mod processor;
#[cfg(test)]
mod testing;

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use config::AppConfig;
use db::pool::{ConnectionPool, PoolOptions};
use db::PgConnector;
use firebase::auth::{ServiceAccountKey, ServiceAccountTokenProvider, TokenSource};
use firebase::firestore::FirestoreAlarmSource;
use firebase::messaging::{ApnsOptions, FcmPushBackend};
use processor::source::probe_alarm;
use processor::RunSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    let span = info_span!("run", run_id = %Uuid::new_v4());
    async move {
        let result = run(config).await;
        if let Err(err) = &result {
            error!("Fatal error, aborting run: {:#}", err);
        }
        result
    }
    .instrument(span)
    .await
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting Vessel Alarm Service...");
    if config.db_pool_size < config.max_workers {
        warn!(
            "DB_POOL_SIZE ({}) is below MAX_WORKERS ({}); lookups beyond the pool will use transient connections",
            config.db_pool_size, config.max_workers
        );
    }

    // Init Firebase clients
    let key = ServiceAccountKey::load(&config.firebase_credentials)?;
    let project_id = config
        .firebase_project_id
        .clone()
        .or_else(|| key.project_id.clone())
        .ok_or_else(|| anyhow!("no Firebase project id in FIREBASE_PROJECT_ID or the service account key"))?;

    let client = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()?;
    let auth: Arc<dyn TokenSource> =
        Arc::new(ServiceAccountTokenProvider::new(client.clone(), key));
    let source = FirestoreAlarmSource::new(
        client.clone(),
        Arc::clone(&auth),
        &project_id,
        &config.users_collection,
        &config.alarms_collection,
    );
    let backend = Arc::new(FcmPushBackend::new(
        client,
        auth,
        &project_id,
        ApnsOptions {
            sound: config.notification_sound.clone(),
            badge: config.notification_badge,
            content_available: config.notification_content_available,
        },
    ));
    info!("Firebase project: {}", project_id);

    if let Some((user_id, alarm_id)) = config.probe_target() {
        probe_alarm(&source, user_id, alarm_id).await?;
    }

    // Init DB
    let pool = ConnectionPool::initialize(
        PgConnector::new(&config.database_url, config.connect_timeout()),
        PoolOptions {
            capacity: config.db_pool_size,
            health_check_interval: config.health_check_interval(),
        },
    )
    .await?;
    info!("Connected to database ({} pooled connections)", config.db_pool_size);

    let settings = RunSettings {
        eval_workers: config.eval_workers,
        max_workers: config.max_workers,
    };
    let result = processor::run(&source, Arc::clone(&pool), backend, &settings).await;

    let stats = pool.stats();
    pool.shutdown().await;
    info!(
        "Connection pool closed (replaced: {}, transient opened: {})",
        stats.replaced, stats.transient_opened
    );

    let report = result?;
    report.log_summary();
    Ok(())
}
