use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::position::{PositionRow, VesselPosition};

pub mod pool;
pub mod queries;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection already released")]
    Released,
}

/// One live handle to the vessel-position data source.
#[async_trait]
pub trait PositionStore: Sized + Send + 'static {
    /// Latest known fix for `vessel_id`, or `None` if the vessel has no rows.
    async fn latest_position(&mut self, vessel_id: &str)
        -> Result<Option<VesselPosition>, StoreError>;

    /// Lightweight liveness probe.
    async fn ping(&mut self) -> Result<(), StoreError>;

    async fn close(self) -> Result<(), StoreError>;
}

/// Opens new `PositionStore` handles.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Store: PositionStore;

    async fn connect(&self) -> Result<Self::Store, StoreError>;
}

pub struct PgConnector {
    database_url: String,
    connect_timeout: Duration,
}

impl PgConnector {
    pub fn new(database_url: &str, connect_timeout: Duration) -> Self {
        Self {
            database_url: database_url.to_string(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Store = PgPositionStore;

    async fn connect(&self) -> Result<PgPositionStore, StoreError> {
        let conn = tokio::time::timeout(
            self.connect_timeout,
            PgConnection::connect(&self.database_url),
        )
        .await
        .map_err(|_| StoreError::Timeout(self.connect_timeout))??;
        Ok(PgPositionStore {
            conn,
            timeout: self.connect_timeout,
        })
    }
}

pub struct PgPositionStore {
    conn: PgConnection,
    // Bounds each query as well as the initial connect.
    timeout: Duration,
}

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn latest_position(
        &mut self,
        vessel_id: &str,
    ) -> Result<Option<VesselPosition>, StoreError> {
        let query = sqlx::query_as::<_, PositionRow>(queries::SELECT_LATEST_POSITION)
            .bind(vessel_id)
            .fetch_optional(&mut self.conn);
        let row = tokio::time::timeout(self.timeout, query)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;

        if row.is_none() {
            debug!("No position found for MMSI {}", vessel_id);
        }
        Ok(row.map(|r| r.into_position(vessel_id)))
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        tokio::time::timeout(self.timeout, self.conn.ping())
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))??;
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}
