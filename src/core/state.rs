//! Mutable flow position and its serializable snapshot.
//!
//! `FlowState` is the single mutable record of where the flow is; it only
//! changes inside a committed transition or an explicit data update.
//! `EngineState` is a versioned point-in-time copy suitable for persistence,
//! encodable as JSON or a compact binary format.

use crate::core::history::FlowHistory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Version identifier for the snapshot format.
pub const STATE_VERSION: u32 = 1;

/// Errors from snapshot encoding, decoding, and validation.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Snapshot version is not supported by this build
    #[error("Unsupported snapshot version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Snapshot data failed validation
    #[error("Snapshot validation failed: {0}")]
    ValidationFailed(String),
}

/// The live, mutable position of a flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowState {
    /// Name of the stage the flow is currently in.
    pub current: String,
    /// Data committed with the current stage, if any.
    pub data: Option<Value>,
    /// Append-only record of visited stages.
    pub history: FlowHistory,
    /// Per-plugin state, keyed by plugin name.
    pub plugin_state: HashMap<String, Value>,
}

impl FlowState {
    /// A fresh state positioned at `initial`, with empty history.
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            current: initial.into(),
            data: None,
            history: FlowHistory::new(),
            plugin_state: HashMap::new(),
        }
    }

    /// Commit a transition: move to `stage`, replace the data, append to
    /// history.
    pub fn commit(&mut self, stage: String, data: Option<Value>) {
        self.history.record(stage.clone(), data.clone());
        self.current = stage;
        self.data = data;
    }

    /// Return to `initial` with history, data, and plugin state cleared.
    pub fn reset(&mut self, initial: &str) {
        self.current = initial.to_string();
        self.data = None;
        self.history = FlowHistory::new();
        self.plugin_state.clear();
    }
}

/// Serializable snapshot of an engine's state.
/// Does NOT include stage definitions or callbacks (not serializable).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineState {
    /// Snapshot format version
    pub version: u32,

    /// Unique snapshot identifier
    pub id: Uuid,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// Initial stage of the flow
    pub initial: String,

    /// Current stage of the flow
    pub current: String,

    /// Data committed with the current stage
    pub data: Option<Value>,

    /// Complete visit history
    pub history: FlowHistory,

    /// Per-plugin state
    pub plugin_state: HashMap<String, Value>,
}

impl EngineState {
    /// Capture a snapshot of `state`, timestamped now.
    pub fn capture(initial: &str, state: &FlowState) -> Self {
        Self {
            version: STATE_VERSION,
            id: Uuid::new_v4(),
            taken_at: Utc::now(),
            initial: initial.to_string(),
            current: state.current.clone(),
            data: state.data.clone(),
            history: state.history.clone(),
            plugin_state: state.plugin_state.clone(),
        }
    }

    /// Encode as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    /// Decode from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Encode as compact binary.
    ///
    /// JSON payloads travel as text inside the binary frame; bincode cannot
    /// decode format-free `Value`s.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SnapshotError> {
        let wire = BinaryState::from_snapshot(self)?;
        bincode::serialize(&wire).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    /// Decode from binary and validate.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let wire: BinaryState = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        let snapshot = wire.into_snapshot()?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        validate_snapshot(self.version, &self.current)
    }
}

/// Binary wire form of [`EngineState`], with every JSON payload rendered to
/// text.
#[derive(Serialize, Deserialize)]
struct BinaryState {
    version: u32,
    id: Uuid,
    taken_at: DateTime<Utc>,
    initial: String,
    current: String,
    data: Option<String>,
    history: Vec<BinaryHistoryEntry>,
    plugin_state: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
struct BinaryHistoryEntry {
    stage: String,
    timestamp: DateTime<Utc>,
    data: Option<String>,
}

impl BinaryState {
    fn from_snapshot(snapshot: &EngineState) -> Result<Self, SnapshotError> {
        let history = snapshot
            .history
            .entries()
            .iter()
            .map(|entry| {
                Ok(BinaryHistoryEntry {
                    stage: entry.stage.clone(),
                    timestamp: entry.timestamp,
                    data: entry.data.as_ref().map(value_to_text).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        let mut plugin_state = snapshot
            .plugin_state
            .iter()
            .map(|(name, value)| Ok((name.clone(), value_to_text(value)?)))
            .collect::<Result<Vec<_>, SnapshotError>>()?;
        plugin_state.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            version: snapshot.version,
            id: snapshot.id,
            taken_at: snapshot.taken_at,
            initial: snapshot.initial.clone(),
            current: snapshot.current.clone(),
            data: snapshot.data.as_ref().map(value_to_text).transpose()?,
            history,
            plugin_state,
        })
    }

    fn into_snapshot(self) -> Result<EngineState, SnapshotError> {
        let entries = self
            .history
            .into_iter()
            .map(|entry| {
                Ok(crate::core::history::HistoryEntry {
                    stage: entry.stage,
                    timestamp: entry.timestamp,
                    data: entry.data.as_deref().map(text_to_value).transpose()?,
                })
            })
            .collect::<Result<Vec<_>, SnapshotError>>()?;

        let plugin_state = self
            .plugin_state
            .into_iter()
            .map(|(name, text)| Ok((name, text_to_value(&text)?)))
            .collect::<Result<HashMap<_, _>, SnapshotError>>()?;

        Ok(EngineState {
            version: self.version,
            id: self.id,
            taken_at: self.taken_at,
            initial: self.initial,
            current: self.current,
            data: self.data.as_deref().map(text_to_value).transpose()?,
            history: FlowHistory::from_entries(entries),
            plugin_state,
        })
    }
}

fn value_to_text(value: &Value) -> Result<String, SnapshotError> {
    serde_json::to_string(value).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
}

fn text_to_value(text: &str) -> Result<Value, SnapshotError> {
    serde_json::from_str(text).map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))
}

fn validate_snapshot(version: u32, current: &str) -> Result<(), SnapshotError> {
    if version != STATE_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: version,
            supported: STATE_VERSION,
        });
    }
    if current.is_empty() {
        return Err(SnapshotError::ValidationFailed(
            "current stage is empty".to_string(),
        ));
    }
    Ok(())
}
