//! Fixed-capacity pool of position-store connections.
//!
//! The pool owns `capacity` connections. When all of them are checked out,
//! `acquire` opens a transient connection instead of waiting; transient
//! connections are closed on release rather than returned. Idle connections
//! are probed before reuse once their last check is older than the
//! configured interval, or right away if their last query failed.

use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{Connector, PositionStore, StoreError};
use crate::models::position::VesselPosition;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open {capacity} initial connections: {source}")]
    Initialization {
        capacity: usize,
        #[source]
        source: StoreError,
    },
    #[error("failed to open connection: {0}")]
    Connect(#[from] StoreError),
    #[error("connection pool is shut down")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub capacity: usize,
    pub health_check_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Pooled,
    Transient,
}

struct IdleConnection<S> {
    store: S,
    last_checked: Instant,
    suspect: bool,
}

impl<S> IdleConnection<S> {
    fn fresh(store: S) -> Self {
        Self {
            store,
            last_checked: Instant::now(),
            suspect: false,
        }
    }

    fn due_for_probe(&self, interval: Duration) -> bool {
        self.suspect || self.last_checked.elapsed() >= interval
    }
}

struct PoolState<S> {
    idle: Vec<IdleConnection<S>>,
    // Pool-owned connections, idle or checked out.
    owned: usize,
    transient_live: usize,
    transient_opened: usize,
    replaced: usize,
    closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub owned: usize,
    pub idle: usize,
    pub transient_live: usize,
    pub transient_opened: usize,
    pub replaced: usize,
}

pub struct ConnectionPool<C: Connector> {
    connector: C,
    options: PoolOptions,
    state: Mutex<PoolState<C::Store>>,
}

impl<C: Connector> ConnectionPool<C> {
    /// Opens all `capacity` connections up front. If any of them fails, the
    /// ones already opened are closed and no pool is returned.
    pub async fn initialize(connector: C, options: PoolOptions) -> Result<Arc<Self>, PoolError> {
        let capacity = options.capacity;
        let attempts = join_all((0..capacity).map(|_| connector.connect())).await;

        let mut idle = Vec::with_capacity(capacity);
        let mut failure = None;
        for attempt in attempts {
            match attempt {
                Ok(store) => idle.push(IdleConnection::fresh(store)),
                Err(err) => failure = failure.or(Some(err)),
            }
        }

        if let Some(source) = failure {
            join_all(idle.into_iter().map(|conn| conn.store.close())).await;
            return Err(PoolError::Initialization { capacity, source });
        }

        info!("Connection pool ready with {} connections", capacity);
        Ok(Arc::new(Self {
            connector,
            options,
            state: Mutex::new(PoolState {
                idle,
                owned: capacity,
                transient_live: 0,
                transient_opened: 0,
                replaced: 0,
                closed: false,
            }),
        }))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<C::Store>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands out a connection for one unit of work. Never waits for another
    /// caller to release; see the module docs.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<C>, PoolError> {
        enum Next<S> {
            Idle(IdleConnection<S>),
            Grow,
            Transient,
        }

        let next = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = state.idle.pop() {
                Next::Idle(conn)
            } else if state.owned < self.options.capacity {
                state.owned += 1;
                Next::Grow
            } else {
                state.transient_live += 1;
                state.transient_opened += 1;
                Next::Transient
            }
        };

        match next {
            Next::Idle(conn) => self.checkout(conn).await,
            Next::Grow => {
                debug!("Restoring pool capacity with a new connection");
                self.open(Origin::Pooled).await
            }
            Next::Transient => {
                warn!(
                    capacity = self.options.capacity,
                    "Connection pool exhausted, opening transient connection"
                );
                self.open(Origin::Transient).await
            }
        }
    }

    async fn checkout(
        self: &Arc<Self>,
        mut conn: IdleConnection<C::Store>,
    ) -> Result<PooledConnection<C>, PoolError> {
        if !conn.due_for_probe(self.options.health_check_interval) {
            return Ok(self.guard(conn.store, Origin::Pooled, conn.last_checked));
        }

        match conn.store.ping().await {
            Ok(()) => Ok(self.guard(conn.store, Origin::Pooled, Instant::now())),
            Err(err) => {
                warn!(error = %err, "Pooled connection failed liveness probe, replacing it");
                drop(conn);
                self.lock().replaced += 1;
                self.open(Origin::Pooled).await
            }
        }
    }

    // The slot for `origin` has already been reserved in the state.
    async fn open(self: &Arc<Self>, origin: Origin) -> Result<PooledConnection<C>, PoolError> {
        match self.connector.connect().await {
            Ok(store) => Ok(self.guard(store, origin, Instant::now())),
            Err(err) => {
                let mut state = self.lock();
                match origin {
                    Origin::Pooled => state.owned = state.owned.saturating_sub(1),
                    Origin::Transient => {
                        state.transient_live = state.transient_live.saturating_sub(1)
                    }
                }
                Err(err.into())
            }
        }
    }

    fn guard(self: &Arc<Self>, store: C::Store, origin: Origin, last_checked: Instant) -> PooledConnection<C> {
        PooledConnection {
            store: Some(store),
            origin,
            last_checked,
            suspect: false,
            pool: Arc::clone(self),
        }
    }

    /// Takes a connection back. Returns it when the caller has to close it.
    fn check_in(
        &self,
        store: C::Store,
        origin: Origin,
        last_checked: Instant,
        suspect: bool,
    ) -> Option<C::Store> {
        let mut state = self.lock();
        match origin {
            Origin::Transient => {
                state.transient_live = state.transient_live.saturating_sub(1);
                Some(store)
            }
            Origin::Pooled if state.closed => {
                state.owned = state.owned.saturating_sub(1);
                Some(store)
            }
            Origin::Pooled => {
                state.idle.push(IdleConnection {
                    store,
                    last_checked,
                    suspect,
                });
                None
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            capacity: self.options.capacity,
            owned: state.owned,
            idle: state.idle.len(),
            transient_live: state.transient_live,
            transient_opened: state.transient_opened,
            replaced: state.replaced,
        }
    }

    /// Closes every idle connection and stops handing out new ones.
    /// Connections still checked out are closed when they are released.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.lock();
            if state.closed && state.idle.is_empty() {
                return;
            }
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            state.owned = state.owned.saturating_sub(idle.len());
            idle
        };

        let count = idle.len();
        let results = join_all(idle.into_iter().map(|conn| conn.store.close())).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            warn!("{} connections did not close cleanly", failed);
        }
        info!("Connection pool shut down, closed {} connections", count);
    }
}

/// A connection checked out of the pool. Dropping it releases it.
pub struct PooledConnection<C: Connector> {
    // Always `Some` until released.
    store: Option<C::Store>,
    origin: Origin,
    last_checked: Instant,
    suspect: bool,
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connector> PooledConnection<C> {
    pub fn is_transient(&self) -> bool {
        self.origin == Origin::Transient
    }

    #[cfg(test)]
    pub fn store(&self) -> &C::Store {
        self.store.as_ref().expect("connection used after release")
    }

    /// Runs the latest-position query. A failed query flags the connection
    /// so it gets probed before its next use.
    pub async fn latest_position(
        &mut self,
        vessel_id: &str,
    ) -> Result<Option<VesselPosition>, StoreError> {
        let Some(store) = self.store.as_mut() else {
            return Err(StoreError::Released);
        };
        let result = store.latest_position(vessel_id).await;
        if result.is_err() {
            self.suspect = true;
        }
        result
    }

    /// Returns the connection to the pool, or closes it if it is transient
    /// or the pool has been shut down.
    pub async fn release(mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        if let Some(store) = self
            .pool
            .check_in(store, self.origin, self.last_checked, self.suspect)
        {
            if let Err(err) = store.close().await {
                debug!(error = %err, "Error closing released connection");
            }
        }
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let Some(store) = self.store.take() else {
            return;
        };
        if let Some(store) = self
            .pool
            .check_in(store, self.origin, self.last_checked, self.suspect)
        {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = store.close().await;
                });
            }
        }
    }
}
