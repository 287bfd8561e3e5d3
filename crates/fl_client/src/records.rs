//! Typed wire records of the platform REST API.
//!
//! Field names follow the API's camelCase convention on the wire;
//! instants are RFC 3339 strings deserialized into [`jiff::Timestamp`].

use std::collections::BTreeMap;

use base64::Engine as _;
use jiff::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};

/// A registered device.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    /// Organization-defined custom properties.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// The abbreviated device object embedded in other records.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: String,
    pub name: String,
}

/// A timestamped (or instantaneous, when `end == start`) event.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub device_id: String,
    #[serde(default)]
    pub device: Option<DeviceSummary>,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One contiguous range of recorded data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coverage {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceSummary>,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: String,
    pub path: String,
    pub size: u64,
    #[serde(default)]
    pub message_count: Option<u64>,
    pub created_at: Timestamp,
    /// `None` until the recording has been imported.
    #[serde(default)]
    pub imported_at: Option<Timestamp>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub import_status: String,
    #[serde(default)]
    pub site: Option<serde_json::Value>,
    #[serde(default)]
    pub edge_site: Option<serde_json::Value>,
    #[serde(default)]
    pub device: Option<DeviceSummary>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// A file attached to a recording.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub recording_id: String,
    pub site_id: String,
    pub name: String,
    pub media_type: String,
    pub size: u64,
    pub crc: u32,
    pub fingerprint: String,
    pub log_time: Timestamp,
    pub create_time: Timestamp,
}

/// A completed import of uploaded data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Import {
    pub import_id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub import_time: Timestamp,
    pub start: Timestamp,
    pub end: Timestamp,
    pub input_type: String,
    pub output_type: String,
    pub filename: String,
    pub input_size: u64,
    pub total_output_size: u64,
}

/// A topic recorded within a time range.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub topic: String,
    pub version: String,
    pub encoding: String,
    pub schema_encoding: String,
    pub schema_name: String,
    /// The raw schema definition; present only when the listing was
    /// requested with schemas included. Base64 on the wire.
    #[serde(default, deserialize_with = "deserialize_base64_opt")]
    pub schema: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRef {
    pub id: String,
}

/// A session: a keyed grouping of recordings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub device: Option<DeviceSummary>,
    #[serde(default)]
    pub key: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub recordings: Vec<RecordingRef>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub org_member_count: u64,
    #[serde(default)]
    pub last_seen_at: Option<Timestamp>,
}

/// The result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// The signed link the payload was PUT to.
    pub link: String,
    /// The storage backend's response body.
    pub text: String,
    pub code: u16,
}

fn deserialize_base64_opt<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = Option::<String>::deserialize(deserializer)?;
    encoded
        .map(|encoded| {
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(serde::de::Error::custom)
        })
        .transpose()
}
