//! Snapshot blobs embedded in action responses
//!
//! `mtr:get_railway_snapshot` answers with
//! `{"snapshots": [{"dimension": "...", "payload": "<base64 msgpack>"}, ...]}`.
//! Decoding is left to the caller so one bad blob never fails the request.

use crate::error::Result;
use crate::normalize::Normalizer;
use crate::value::SnapshotValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Base64-encoded MessagePack document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotBlob(String);

impl SnapshotBlob {
    pub fn new(base64: impl Into<String>) -> Self {
        Self(base64.into())
    }

    /// The encoded text as received
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Raw MessagePack bytes
    pub fn bytes(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.0.trim())?)
    }

    /// Decoded value tree
    pub fn decode(&self) -> Result<SnapshotValue> {
        SnapshotValue::from_msgpack(&self.bytes()?)
    }

    /// Decoded and normalized to JSON
    pub fn to_json(&self, normalizer: &Normalizer) -> Result<Value> {
        Ok(normalizer.normalize(&self.decode()?))
    }
}

/// One entry of a railway snapshot response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub payload: Option<SnapshotBlob>,
}

/// Pull the snapshot entries out of a response payload.
///
/// Missing or malformed `snapshots` yields an empty list; entries that do not
/// have the expected shape are skipped.
pub fn snapshot_entries(payload: &Value) -> Vec<SnapshotEntry> {
    payload
        .get("snapshots")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
