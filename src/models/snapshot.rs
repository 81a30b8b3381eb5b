use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One captured payload. The file name is derived from `captured_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(with = "iso8601")]
    pub captured_at: DateTime<Utc>,
    pub data: Value,
}

impl Snapshot {
    /// Timestamps are kept at millisecond precision, matching what lands on disk.
    pub fn new(captured_at: DateTime<Utc>, data: Value) -> Self {
        Self {
            captured_at: captured_at.trunc_subsecs(3),
            data,
        }
    }

    pub fn filename(&self) -> String {
        snapshot_filename(&self.captured_at)
    }
}

/// Singleton record naming the current snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    #[serde(with = "iso8601")]
    pub captured_at: DateTime<Utc>,
    pub filename: String,
}

impl Pointer {
    pub fn for_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            captured_at: snapshot.captured_at,
            filename: snapshot.filename(),
        }
    }
}

/// What the store found when it looked for the pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum PointerState {
    Missing,
    Present(Pointer),
    Corrupt(String),
}

impl PointerState {
    pub fn pointer(&self) -> Option<&Pointer> {
        match self {
            PointerState::Present(pointer) => Some(pointer),
            _ => None,
        }
    }
}

/// e.g. `aqi_2024_01_01_12_30_05.json`; unique to the second.
pub fn snapshot_filename(captured_at: &DateTime<Utc>) -> String {
    captured_at.format("aqi_%Y_%m_%d_%H_%M_%S.json").to_string()
}

pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) mod iso8601 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| serde::de::Error::custom(format!("invalid timestamp '{raw}': {err}")))
    }
}
