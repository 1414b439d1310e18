//! Session event types
//!
//! Two views of the same event stream:
//!
//! - the stored view ([`CacheEvent`], [`SessionRecording`]): event type plus
//!   the opaque payload map, exactly as received, so replay hands downstream
//!   consumers the original fields;
//! - the typed view ([`SessionEvent`]): one variant per event type carrying
//!   only the fields that type uses, decoded on demand when an event is
//!   applied to application state.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Payload of an event: the inbound message minus its `type` field
pub type EventData = Map<String, Value>;

/// Closed set of session lifecycle event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    AgentSpawned,
    AgentProgress,
    ToolCalled,
    ToolResult,
    DataReceived,
    AgentComplete,
    SessionComplete,
    FinalResult,
    #[serde(alias = "error")]
    SessionError,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::SessionStarted,
        EventType::AgentSpawned,
        EventType::AgentProgress,
        EventType::ToolCalled,
        EventType::ToolResult,
        EventType::DataReceived,
        EventType::AgentComplete,
        EventType::SessionComplete,
        EventType::FinalResult,
        EventType::SessionError,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionStarted => "session_started",
            EventType::AgentSpawned => "agent_spawned",
            EventType::AgentProgress => "agent_progress",
            EventType::ToolCalled => "tool_called",
            EventType::ToolResult => "tool_result",
            EventType::DataReceived => "data_received",
            EventType::AgentComplete => "agent_complete",
            EventType::SessionComplete => "session_complete",
            EventType::FinalResult => "final_result",
            EventType::SessionError => "session_error",
        }
    }

    /// Terminal events end a session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::SessionComplete | EventType::FinalResult | EventType::SessionError
        )
    }

    /// Terminal events that carry a usable result
    pub fn is_success_terminal(&self) -> bool {
        matches!(self, EventType::SessionComplete | EventType::FinalResult)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized event type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventType(pub String);

impl fmt::Display for UnknownEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEventType {}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "error" {
            return Ok(EventType::SessionError);
        }
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// One recorded lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,

    #[serde(default)]
    pub data: EventData,

    /// Capture time, milliseconds since the Unix epoch
    pub timestamp: i64,

    /// Gap since the previous event in the same recording, in milliseconds
    pub delay: u64,
}

/// A sealed session, the unit persisted in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecording {
    pub prompt_hash: String,
    pub prompt: String,
    #[serde(default)]
    pub events: Vec<CacheEvent>,
    /// ISO-8601 finalization time
    pub recorded_at: String,
    /// Milliseconds between recorder creation and finalization
    pub total_duration: u64,
    #[serde(default)]
    pub is_complete: bool,
}

impl SessionRecording {
    /// Whether this recording may be served from cache
    pub fn is_valid(&self) -> bool {
        self.is_complete && !self.events.is_empty()
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            prompt_hash: self.prompt_hash.clone(),
            prompt: self.prompt.clone(),
            event_count: self.events.len(),
            total_duration: self.total_duration,
            recorded_at: self.recorded_at.clone(),
        }
    }
}

/// Listing view of a cached recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub prompt_hash: String,
    pub prompt: String,
    pub event_count: usize,
    pub total_duration: u64,
    pub recorded_at: String,
}

/// A normalized inbound message: known type plus payload
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event_type: EventType,
    pub data: EventData,
}

/// Why an inbound message was not turned into an [`InboundEvent`]
#[derive(Debug)]
pub enum InboundRejection {
    /// Not valid JSON
    Malformed(serde_json::Error),
    /// JSON, but not an object
    NotAnObject,
    /// Object without a string `type`
    MissingType,
    /// Type outside the known taxonomy
    UnknownType(String),
}

impl fmt::Display for InboundRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundRejection::Malformed(e) => write!(f, "malformed JSON: {}", e),
            InboundRejection::NotAnObject => f.write_str("message is not a JSON object"),
            InboundRejection::MissingType => f.write_str("message has no 'type' field"),
            InboundRejection::UnknownType(t) => write!(f, "unknown event type '{}'", t),
        }
    }
}

impl InboundEvent {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self { event_type, data }
    }

    /// Parse a raw wire message
    pub fn parse(raw: &str) -> Result<Self, InboundRejection> {
        let value: Value = serde_json::from_str(raw).map_err(InboundRejection::Malformed)?;
        Self::from_value(value)
    }

    /// Split a JSON object into its type and remaining payload
    pub fn from_value(value: Value) -> Result<Self, InboundRejection> {
        let Value::Object(mut data) = value else {
            return Err(InboundRejection::NotAnObject);
        };

        let type_name = match data.remove("type") {
            Some(Value::String(s)) => s,
            _ => return Err(InboundRejection::MissingType),
        };

        let event_type = type_name
            .parse::<EventType>()
            .map_err(|e| InboundRejection::UnknownType(e.0))?;

        Ok(Self { event_type, data })
    }
}

impl From<&CacheEvent> for InboundEvent {
    fn from(event: &CacheEvent) -> Self {
        Self {
            event_type: event.event_type,
            data: event.data.clone(),
        }
    }
}

// ─── Typed payloads ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionStarted {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentSpawned {
    pub agent_id: String,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Upstream node whose output feeds this agent
    #[serde(default)]
    pub input_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentProgress {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolCalled {
    pub agent_id: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolResult {
    pub agent_id: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub tool_result: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DataReceived {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub coordinates: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentComplete {
    pub agent_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output_summary: Option<Value>,
}

/// Structured outcome of a safety query
///
/// Every field decodes on its own: a value of the wrong shape falls back to
/// the field default instead of failing the whole result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionResult {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub safety_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub rating: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub analysis: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient_text_list")]
    pub recommendations: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub coordinates: Vec<Value>,
    /// Tabular rows returned by the data agent
    #[serde(default, deserialize_with = "lenient")]
    pub data: Vec<Value>,
    /// Generated query text
    #[serde(default, deserialize_with = "lenient_text")]
    pub sql: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub incident_breakdown: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionComplete {
    #[serde(default, deserialize_with = "lenient_text")]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub duration_ms: Option<u64>,
    #[serde(default, deserialize_with = "lenient_text_list")]
    pub flow_trace: Vec<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub final_response: Option<SessionResult>,
}

/// `final_result` carries the result fields at the top level
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FinalResult {
    #[serde(default, deserialize_with = "lenient")]
    pub success: Option<bool>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub duration_ms: Option<u64>,
    #[serde(default, deserialize_with = "lenient_text_list")]
    pub flow_trace: Vec<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub result: SessionResult,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionError {
    #[serde(default, deserialize_with = "lenient_text")]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: Option<String>,
}

/// Typed event, one variant per [`EventType`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    SessionStarted(SessionStarted),
    AgentSpawned(AgentSpawned),
    AgentProgress(AgentProgress),
    ToolCalled(ToolCalled),
    ToolResult(ToolResult),
    DataReceived(DataReceived),
    AgentComplete(AgentComplete),
    SessionComplete(SessionComplete),
    FinalResult(FinalResult),
    SessionError(SessionError),
}

impl SessionEvent {
    /// Decode the payload for `event_type`
    ///
    /// Missing optional fields take defaults. For agent and tool events a
    /// field of the wrong JSON type, or a missing required id, is an error.
    /// Terminal events always decode.
    pub fn decode(event_type: EventType, data: &EventData) -> Result<Self, serde_json::Error> {
        let value = Value::Object(data.clone());
        Ok(match event_type {
            EventType::SessionStarted => SessionEvent::SessionStarted(serde_json::from_value(value)?),
            EventType::AgentSpawned => SessionEvent::AgentSpawned(serde_json::from_value(value)?),
            EventType::AgentProgress => SessionEvent::AgentProgress(serde_json::from_value(value)?),
            EventType::ToolCalled => SessionEvent::ToolCalled(serde_json::from_value(value)?),
            EventType::ToolResult => SessionEvent::ToolResult(serde_json::from_value(value)?),
            EventType::DataReceived => SessionEvent::DataReceived(serde_json::from_value(value)?),
            EventType::AgentComplete => SessionEvent::AgentComplete(serde_json::from_value(value)?),
            EventType::SessionComplete => {
                SessionEvent::SessionComplete(serde_json::from_value(value)?)
            }
            EventType::FinalResult => SessionEvent::FinalResult(serde_json::from_value(value)?),
            EventType::SessionError => SessionEvent::SessionError(serde_json::from_value(value)?),
        })
    }

    pub fn event_type(&self) -> EventType {
        match self {
            SessionEvent::SessionStarted(_) => EventType::SessionStarted,
            SessionEvent::AgentSpawned(_) => EventType::AgentSpawned,
            SessionEvent::AgentProgress(_) => EventType::AgentProgress,
            SessionEvent::ToolCalled(_) => EventType::ToolCalled,
            SessionEvent::ToolResult(_) => EventType::ToolResult,
            SessionEvent::DataReceived(_) => EventType::DataReceived,
            SessionEvent::AgentComplete(_) => EventType::AgentComplete,
            SessionEvent::SessionComplete(_) => EventType::SessionComplete,
            SessionEvent::FinalResult(_) => EventType::FinalResult,
            SessionEvent::SessionError(_) => EventType::SessionError,
        }
    }
}

/// Accept a number, a numeric string, or null
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Decode into `T`, or fall back to its default
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Strings pass through; other non-null values keep their JSON text
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

/// A list of strings; a lone string is a one-element list
fn lenient_text_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Null => None,
                Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

/// Whole milliseconds from an integer, a float or a numeric string
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| ms.round() as u64))
}
