//! Inbound status frames and their classification.
//!
//! The proxy service emits JSON objects carrying any subset of the fields
//! below, in any order and any number of times:
//!
//! | field         | shape                                          |
//! |---------------|------------------------------------------------|
//! | `data`        | progress/log message                           |
//! | `url`         | work item the message pertains to              |
//! | `responseIP`  | address of the responding upstream             |
//! | `proxyIP`     | address of the proxy node                      |
//! | `cacheStats`  | `{hits, misses}` absolute snapshot             |
//! | `nodeStatus`  | `[string]` node description snapshot           |
//! | `traceReport` | `{packetsSent, packetsReceived, proxyIP}`      |
//! | `final`       | explicit terminal marker                       |
//!
//! Plain-text (non-JSON) frames are legal too and are treated as if they
//! were `{"data": <raw text>}`. [`classify`] turns one raw frame into the
//! ordered list of [`InboundEvent`]s it carries.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Wire field names
// ---------------------------------------------------------------------------

pub const FIELD_DATA: &str = "data";
pub const FIELD_URL: &str = "url";
pub const FIELD_RESPONSE_IP: &str = "responseIP";
pub const FIELD_PROXY_IP: &str = "proxyIP";
pub const FIELD_CACHE_STATS: &str = "cacheStats";
pub const FIELD_NODE_STATUS: &str = "nodeStatus";
pub const FIELD_TRACE_REPORT: &str = "traceReport";
pub const FIELD_FINAL: &str = "final";

// ---------------------------------------------------------------------------
// Snapshot payloads
// ---------------------------------------------------------------------------

/// Absolute cache counters reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Network trace telemetry for the proxy node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    #[serde(rename = "proxyIP")]
    pub proxy_address: String,
}

/// A progress/log message, optionally tied to a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub message: String,
    pub work_item: Option<String>,
    pub responder_address: Option<String>,
    pub proxy_address: Option<String>,
}

impl ProgressEvent {
    /// A progress event carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            work_item: None,
            responder_address: None,
            proxy_address: None,
        }
    }
}

// ---------------------------------------------------------------------------
// InboundEvent
// ---------------------------------------------------------------------------

/// One concern carried by an inbound frame.
///
/// A single frame may yield several events (for example a progress message
/// together with a cache snapshot). [`classify`] always returns them in
/// application order: trace, cache stats, node status, progress or
/// malformed, terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Trace(TraceSnapshot),
    CacheStats(CacheStats),
    NodeStatus { statuses: Vec<String> },
    Progress(ProgressEvent),
    /// A payload that is not a JSON object. Handled as progress whose
    /// message is the raw text.
    Malformed { raw: String },
    Terminal,
}

impl InboundEvent {
    /// Whether this event accounts for one handled work item.
    pub fn counts_as_item(&self) -> bool {
        matches!(
            self,
            InboundEvent::Progress(_) | InboundEvent::Malformed { .. }
        )
    }
}

/// Classify one raw inbound frame.
///
/// Never fails. Text that does not parse as JSON becomes a single
/// [`InboundEvent::Malformed`]. Valid JSON that is not an object carries no
/// known field and yields no events. Inside an object, a field with the wrong
/// JSON type is skipped without affecting the others, and an empty `data`
/// string counts as absent.
pub fn classify(raw: &str) -> Vec<InboundEvent> {
    let map = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::debug!(frame = %other, "Ignoring JSON frame that is not an object");
            return Vec::new();
        }
        Err(_) => {
            return vec![InboundEvent::Malformed {
                raw: raw.to_string(),
            }]
        }
    };

    let mut events = Vec::with_capacity(2);

    if let Some(trace) = field::<TraceSnapshot>(&map, FIELD_TRACE_REPORT) {
        events.push(InboundEvent::Trace(trace));
    }
    if let Some(stats) = field::<CacheStats>(&map, FIELD_CACHE_STATS) {
        events.push(InboundEvent::CacheStats(stats));
    }
    if let Some(statuses) = field::<Vec<String>>(&map, FIELD_NODE_STATUS) {
        events.push(InboundEvent::NodeStatus { statuses });
    }
    if let Some(message) = field::<String>(&map, FIELD_DATA).filter(|m| !m.is_empty()) {
        events.push(InboundEvent::Progress(ProgressEvent {
            message,
            work_item: field(&map, FIELD_URL),
            responder_address: field(&map, FIELD_RESPONSE_IP),
            proxy_address: field(&map, FIELD_PROXY_IP),
        }));
    }
    if field::<bool>(&map, FIELD_FINAL) == Some(true) {
        events.push(InboundEvent::Terminal);
    }

    events
}

/// Extract and decode one optional field. `null` counts as absent.
fn field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str) -> Option<T> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(value) => match T::deserialize(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                tracing::warn!(field = key, error = %e, "Ignoring malformed frame field");
                None
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
