use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::position::Coordinate;

// Field names of an alarm document.
pub const FCM_TOKEN_FIELD: &str = "FCMDeviceToken";
pub const MMSI_FIELD: &str = "vesselMMSI";
pub const NAME_FIELD: &str = "name";
pub const MODE_FIELD: &str = "mode";
pub const CENTER_FIELD: &str = "center";
pub const RADIUS_FIELD: &str = "radiusMeters";
pub const ACTIVE_FIELD: &str = "active";

/// A typed value as Firestore encodes it in its REST payloads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldValue {
    NullValue(()),
    BooleanValue(bool),
    // int64 travels as a JSON string
    IntegerValue(String),
    DoubleValue(#[serde(deserialize_with = "double_value")] f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue {
        #[serde(default)]
        latitude: f64,
        #[serde(default)]
        longitude: f64,
    },
    ArrayValue {
        #[serde(default)]
        values: Vec<FieldValue>,
    },
    MapValue {
        #[serde(default)]
        fields: HashMap<String, FieldValue>,
    },
}

// Non-finite doubles arrive as the strings "NaN", "Infinity" and "-Infinity".
fn double_value<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Wire {
        Number(f64),
        Text(String),
    }

    match Wire::deserialize(deserializer)? {
        Wire::Number(n) => Ok(n),
        Wire::Text(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other.trim().parse().map_err(serde::de::Error::custom),
        },
    }
}

impl FieldValue {
    /// Non-empty text. Integers are accepted as well since MMSIs are
    /// sometimes stored as numbers.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::StringValue(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            FieldValue::IntegerValue(i) => Some(i.clone()),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::DoubleValue(d) => Some(*d),
            FieldValue::IntegerValue(i) => i.parse().ok(),
            FieldValue::StringValue(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }

    /// A geo point, or a map carrying `lat`/`lon` (or `latitude`/`longitude`).
    pub fn as_coordinate(&self) -> Option<Coordinate> {
        match self {
            FieldValue::GeoPointValue {
                latitude,
                longitude,
            } => Some(Coordinate::new(*latitude, *longitude)),
            FieldValue::MapValue { fields } => {
                let pick = |short: &str, long: &str| {
                    fields
                        .get(short)
                        .or_else(|| fields.get(long))
                        .and_then(FieldValue::as_f64)
                };
                Some(Coordinate::new(
                    pick("lat", "latitude")?,
                    pick("lon", "longitude")?,
                ))
            }
            _ => None,
        }
    }
}

/// An alarm exactly as read from `users/{userId}/alarms/{alarmId}`,
/// before any validation.
#[derive(Debug, Clone)]
pub struct AlarmDocument {
    pub user_id: String,
    pub alarm_id: String,
    pub fields: HashMap<String, FieldValue>,
}

impl AlarmDocument {
    fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmMode {
    InsideRadius,
    OutsideRadius,
}

impl fmt::Display for AlarmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlarmMode::InsideRadius => write!(f, "inside_radius"),
            AlarmMode::OutsideRadius => write!(f, "outside_radius"),
        }
    }
}

impl FromStr for AlarmMode {
    type Err = InvalidAlarm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inside_radius" => Ok(AlarmMode::InsideRadius),
            "outside_radius" => Ok(AlarmMode::OutsideRadius),
            _ => Err(InvalidAlarm::UnknownMode(s.to_string())),
        }
    }
}

/// Why an alarm document cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidAlarm {
    #[error("missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("radius must be a positive number of meters, got {0}")]
    InvalidRadius(f64),
    #[error("center ({0}, {1}) is out of range")]
    InvalidCenter(f64, f64),
}

/// A validated alarm, read-only for the rest of the run.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmConfig {
    pub alarm_id: String,
    pub user_id: String,
    pub vessel_id: String,
    pub display_name: String,
    pub device_token: String,
    pub mode: AlarmMode,
    pub center: Coordinate,
    pub radius_meters: f64,
    pub active: bool,
}

impl AlarmConfig {
    /// Parses and validates a raw document. All missing required fields are
    /// reported together.
    pub fn from_document(doc: &AlarmDocument) -> Result<Self, InvalidAlarm> {
        let device_token = doc.text(FCM_TOKEN_FIELD);
        let vessel_id = doc.text(MMSI_FIELD);
        let display_name = doc.text(NAME_FIELD);
        let mode = doc.text(MODE_FIELD);
        let center = doc.fields.get(CENTER_FIELD).and_then(FieldValue::as_coordinate);
        let radius = doc.fields.get(RADIUS_FIELD).and_then(FieldValue::as_f64);

        let mut missing = Vec::new();
        if device_token.is_none() {
            missing.push(FCM_TOKEN_FIELD);
        }
        if vessel_id.is_none() {
            missing.push(MMSI_FIELD);
        }
        if display_name.is_none() {
            missing.push(NAME_FIELD);
        }
        if mode.is_none() {
            missing.push(MODE_FIELD);
        }
        if center.is_none() {
            missing.push(CENTER_FIELD);
        }
        if radius.is_none() {
            missing.push(RADIUS_FIELD);
        }

        let (
            Some(device_token),
            Some(vessel_id),
            Some(display_name),
            Some(mode),
            Some(center),
            Some(radius_meters),
        ) = (device_token, vessel_id, display_name, mode, center, radius)
        else {
            return Err(InvalidAlarm::MissingFields(missing));
        };

        let mode: AlarmMode = mode.parse()?;
        if !center.is_valid() {
            return Err(InvalidAlarm::InvalidCenter(center.latitude, center.longitude));
        }
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(InvalidAlarm::InvalidRadius(radius_meters));
        }

        let active = doc
            .fields
            .get(ACTIVE_FIELD)
            .and_then(FieldValue::as_bool)
            .unwrap_or(true);

        Ok(Self {
            alarm_id: doc.alarm_id.clone(),
            user_id: doc.user_id.clone(),
            vessel_id,
            display_name,
            device_token,
            mode,
            center,
            radius_meters,
            active,
        })
    }
}
