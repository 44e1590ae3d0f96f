use std::collections::BTreeMap;

use super::alarm::AlarmConfig;

/// An alarm whose geofence condition held during this run.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationCandidate {
    pub alarm_id: String,
    pub user_id: String,
    pub vessel_id: String,
    pub display_name: String,
    pub device_token: String,
    pub fired_at_unix_seconds: i64,
}

impl NotificationCandidate {
    pub fn fired(alarm: &AlarmConfig, fired_at_unix_seconds: i64) -> Self {
        Self {
            alarm_id: alarm.alarm_id.clone(),
            user_id: alarm.user_id.clone(),
            vessel_id: alarm.vessel_id.clone(),
            display_name: alarm.display_name.clone(),
            device_token: alarm.device_token.clone(),
            fired_at_unix_seconds,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    /// Accepted by the backend, with the message name it assigned.
    Sent(String),
    Failed(String),
    /// The backend rejected the device token permanently.
    InvalidToken,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub candidate: NotificationCandidate,
    pub result: DispatchResult,
}

/// Content of one push message, independent of the delivery backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

/// Builds the user-facing text of an alarm notification.
#[derive(Debug, Clone, Default)]
pub struct NotificationTemplate;

impl NotificationTemplate {
    pub fn render(&self, candidate: &NotificationCandidate) -> PushNotification {
        let title = format!("🚨 Ship Alert: {} Detected!", candidate.display_name);
        let body = format!(
            "Vessel MMSI: {}. This is a critical alert for the vessel you are tracking.",
            candidate.vessel_id
        );

        let mut data = BTreeMap::new();
        data.insert("vesselMMSI".to_string(), candidate.vessel_id.clone());
        data.insert("alertName".to_string(), candidate.display_name.clone());
        data.insert("alarmId".to_string(), candidate.alarm_id.clone());
        data.insert(
            "timestamp".to_string(),
            candidate.fired_at_unix_seconds.to_string(),
        );

        PushNotification { title, body, data }
    }
}
