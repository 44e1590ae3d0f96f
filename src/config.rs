use anyhow::{ensure, Result};
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_pool_size: usize,
    pub db_connect_timeout_secs: u64,
    pub db_health_check_interval_secs: u64,
    pub max_workers: usize,
    pub eval_workers: usize,
    pub firebase_credentials: String,
    pub firebase_project_id: Option<String>,
    pub users_collection: String,
    pub alarms_collection: String,
    pub probe_user_id: Option<String>,
    pub probe_alarm_id: Option<String>,
    pub http_timeout_ms: u64,
    pub notification_sound: String,
    pub notification_badge: u32,
    pub notification_content_available: bool,
    pub log_level: String,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_host = text("DB_HOST", "localhost");
        let db_port = text("DB_PORT", "5432");
        let db_name = text("DB_DATABASE", "vesselinfo");
        let db_user = text("DB_USER", "vessel");
        let db_pwd = text("DB_PWD", "vessel");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let db_pool_size = number(&lookup, "DB_POOL_SIZE", 10);
        let max_workers = number(&lookup, "MAX_WORKERS", 10);
        let eval_workers = number(&lookup, "EVAL_WORKERS", db_pool_size);
        ensure!(db_pool_size > 0, "DB_POOL_SIZE must be at least 1");
        ensure!(max_workers > 0, "MAX_WORKERS must be at least 1");
        ensure!(eval_workers > 0, "EVAL_WORKERS must be at least 1");

        let notification_content_available = match optional("NOTIFICATION_CONTENT_AVAILABLE") {
            Some(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
            None => true,
        };

        Ok(Self {
            database_url,
            db_pool_size,
            db_connect_timeout_secs: number(&lookup, "DB_CONNECT_TIMEOUT_SECS", 5),
            db_health_check_interval_secs: number(&lookup, "DB_HEALTH_CHECK_INTERVAL_SECS", 30),
            max_workers,
            eval_workers,
            firebase_credentials: text("FIREBASE_CREDENTIALS", "./serviceAccountKey.json"),
            firebase_project_id: optional("FIREBASE_PROJECT_ID"),
            users_collection: text("ALARM_USERS_COLLECTION", "users"),
            alarms_collection: text("ALARM_SUBCOLLECTION", "alarms"),
            probe_user_id: optional("ALARM_PROBE_USER_ID"),
            probe_alarm_id: optional("ALARM_PROBE_ALARM_ID"),
            http_timeout_ms: number(&lookup, "HTTP_TIMEOUT_MS", 10_000),
            notification_sound: text("NOTIFICATION_SOUND", "default"),
            notification_badge: number(&lookup, "NOTIFICATION_BADGE", 1),
            notification_content_available,
            log_level: text("LOG_LEVEL", "info"),
        })
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.db_connect_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.db_health_check_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// The diagnostic read runs only when both ids are configured.
    pub fn probe_target(&self) -> Option<(&str, &str)> {
        match (&self.probe_user_id, &self.probe_alarm_id) {
            (Some(user), Some(alarm)) => Some((user.as_str(), alarm.as_str())),
            _ => None,
        }
    }
}

fn number<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
