//! The persisted cache entry record.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Entry payload: text as written, or raw bytes when compressed.
///
/// Bytes are stored as `{"base64": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WireData")]
pub enum EntryData {
    Text(String),
    Bytes(Vec<u8>),
}

/// Accepted stored shapes. Byte arrays come from older records.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireData {
    Text(String),
    Encoded { base64: String },
    Array(Vec<u8>),
}

impl TryFrom<WireData> for EntryData {
    type Error = base64::DecodeError;

    fn try_from(wire: WireData) -> Result<Self, Self::Error> {
        Ok(match wire {
            WireData::Text(text) => Self::Text(text),
            WireData::Encoded { base64 } => Self::Bytes(STANDARD.decode(base64)?),
            WireData::Array(bytes) => Self::Bytes(bytes),
        })
    }
}

impl Serialize for EntryData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(text) => serializer.serialize_str(text),
            Self::Bytes(bytes) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("base64", &STANDARD.encode(bytes))?;
                map.end()
            }
        }
    }
}

impl EntryData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Bytes(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text view, replacing invalid UTF-8.
    pub fn to_text_lossy(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// A cached upstream response.
///
/// `version`, `data` and `createdAt` are required to read a record back;
/// everything else tolerates older records that lack it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: EntryData,
    #[serde(default)]
    pub compressed: bool,
    pub version: u32,
    /// Write time, ms since the epoch.
    pub created_at: u64,
    /// Lifetime in seconds.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Absolute expiry, ms since the epoch.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub path: String,
    /// Sanitized response headers to replay.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_extended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker_extended_at: Option<u64>,
}

impl CacheEntry {
    /// Create an entry with `ttl` and the derived `expiresAt` populated.
    pub fn new(data: EntryData, version: u32, created_at: u64, ttl: u64, path: &str) -> Self {
        Self {
            data,
            compressed: false,
            version,
            created_at,
            ttl: Some(ttl),
            expires_at: Some(created_at + ttl * 1000),
            path: path.to_string(),
            headers: BTreeMap::new(),
            etag: None,
            last_modified: None,
            invalidated_at: None,
            circuit_breaker_extended: None,
            circuit_breaker_extended_at: None,
        }
    }

    /// Age in milliseconds.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    /// Whether an invalidation marker is set.
    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }
}
