//! In-memory doubles for the external collaborators.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::db::{Connector, PositionStore, StoreError};
use crate::models::alarm::{AlarmDocument, FieldValue};
use crate::models::notification::PushNotification;
use crate::models::position::VesselPosition;
use crate::processor::dispatch::{PushBackend, PushError};
use crate::processor::source::{AlarmScan, AlarmSource, SourceError};

#[derive(Default)]
struct StoreShared {
    positions: HashMap<String, VesselPosition>,
    failing_vessels: HashSet<String>,
    fail_connects_after: Option<usize>,
    connect_failing: AtomicBool,
    next_id: AtomicUsize,
    dead: Mutex<HashSet<usize>>,
    closed: Mutex<HashSet<usize>>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    shared: Arc<StoreShared>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(mut self, f: impl FnOnce(&mut StoreShared)) -> Self {
        f(Arc::get_mut(&mut self.shared).expect("configure before cloning"));
        self
    }

    pub fn with_position(self, vessel_id: &str, latitude: f64, longitude: f64, at: i64) -> Self {
        self.configure(|s| {
            s.positions.insert(
                vessel_id.to_string(),
                VesselPosition {
                    vessel_id: vessel_id.to_string(),
                    latitude,
                    longitude,
                    observed_at_unix_seconds: at,
                },
            );
        })
    }

    pub fn with_failing_vessel(self, vessel_id: &str) -> Self {
        self.configure(|s| {
            s.failing_vessels.insert(vessel_id.to_string());
        })
    }

    pub fn fail_connects_after(self, n: usize) -> Self {
        self.configure(|s| s.fail_connects_after = Some(n))
    }

    pub fn set_connect_failing(&self, failing: bool) {
        self.shared.connect_failing.store(failing, Ordering::SeqCst);
    }

    pub fn kill(&self, id: usize) {
        self.shared.dead.lock().unwrap().insert(id);
    }

    pub fn connects(&self) -> usize {
        self.shared.next_id.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.shared.closed.lock().unwrap().len()
    }

    pub fn is_closed(&self, id: usize) -> bool {
        self.shared.closed.lock().unwrap().contains(&id)
    }
}

fn store_error(msg: &str) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(msg.to_string()))
}

#[async_trait]
impl Connector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore, StoreError> {
        if self.shared.connect_failing.load(Ordering::SeqCst) {
            return Err(store_error("connection refused"));
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        if matches!(self.shared.fail_connects_after, Some(n) if id >= n) {
            return Err(store_error("connection refused"));
        }
        Ok(MemoryStore {
            id,
            shared: Arc::clone(&self.shared),
        })
    }
}

pub struct MemoryStore {
    pub id: usize,
    shared: Arc<StoreShared>,
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn latest_position(
        &mut self,
        vessel_id: &str,
    ) -> Result<Option<VesselPosition>, StoreError> {
        if self.shared.failing_vessels.contains(vessel_id) {
            return Err(store_error("query failed"));
        }
        Ok(self.shared.positions.get(vessel_id).cloned())
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        if self.shared.dead.lock().unwrap().contains(&self.id) {
            return Err(store_error("connection reset"));
        }
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        self.shared.closed.lock().unwrap().insert(self.id);
        Ok(())
    }
}

/// Builds an alarm document from Firestore-style JSON fields.
pub fn alarm_document(user_id: &str, alarm_id: &str, fields: serde_json::Value) -> AlarmDocument {
    let fields: HashMap<String, FieldValue> = serde_json::from_value(fields).unwrap();
    AlarmDocument {
        user_id: user_id.to_string(),
        alarm_id: alarm_id.to_string(),
        fields,
    }
}

#[derive(Default)]
pub struct MemoryAlarmSource {
    pub users: Vec<(String, Vec<AlarmDocument>)>,
    pub unreachable: bool,
}

impl MemoryAlarmSource {
    pub fn with_user(mut self, user_id: &str, alarms: Vec<AlarmDocument>) -> Self {
        self.users.push((user_id.to_string(), alarms));
        self
    }
}

#[async_trait]
impl AlarmSource for MemoryAlarmSource {
    async fn list_all_alarms(&self) -> Result<AlarmScan, SourceError> {
        if self.unreachable {
            return Err(SourceError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(AlarmScan {
            users_processed: self.users.len(),
            alarms: self
                .users
                .iter()
                .flat_map(|(_, alarms)| alarms.iter().cloned())
                .collect(),
        })
    }

    async fn get_alarm(
        &self,
        user_id: &str,
        alarm_id: &str,
    ) -> Result<Option<AlarmDocument>, SourceError> {
        Ok(self
            .users
            .iter()
            .filter(|(uid, _)| uid == user_id)
            .flat_map(|(_, alarms)| alarms.iter())
            .find(|doc| doc.alarm_id == alarm_id)
            .cloned())
    }
}

/// Push backend that records every send and tracks how many run at once.
#[derive(Default)]
pub struct RecordingBackend {
    pub delay: Duration,
    pub invalid_tokens: HashSet<String>,
    pub failing_tokens: HashSet<String>,
    pub panicking_tokens: HashSet<String>,
    pub sent: Mutex<Vec<(String, PushNotification)>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PushBackend for RecordingBackend {
    async fn send(
        &self,
        device_token: &str,
        notification: &PushNotification,
    ) -> Result<String, PushError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panicking_tokens.contains(device_token) {
            panic!("backend crashed on {device_token}");
        }
        if self.invalid_tokens.contains(device_token) {
            return Err(PushError::InvalidToken(device_token.to_string()));
        }
        if self.failing_tokens.contains(device_token) {
            return Err(PushError::Api {
                status: 500,
                message: "internal".to_string(),
            });
        }

        let mut sent = self.sent.lock().unwrap();
        sent.push((device_token.to_string(), notification.clone()));
        Ok(format!("projects/test/messages/{}", sent.len()))
    }
}
