//! Span records collected by the tracer
//!
//! A [`SpanContext`] is the mutable, in-progress view of a span. Finishing it
//! yields an immutable [`SpanRecord`], which is what the exporter serializes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What the span represents in an LLM pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    /// Model invocation
    Llm,
    /// Composite step wrapping other spans
    Chain,
    /// Vector store or search lookup
    Retriever,
    Embedding,
    Tool,
    Agent,
    /// Anything else
    Internal,
}

impl SpanKind {
    /// Parse the `span_kind` field value used by instrumented code
    ///
    /// ```
    /// use catalyst_sdk::tracer::span::SpanKind;
    ///
    /// assert_eq!(SpanKind::parse("LLM"), SpanKind::Llm);
    /// assert_eq!(SpanKind::parse("retrieval"), SpanKind::Retriever);
    /// assert_eq!(SpanKind::parse("whatever"), SpanKind::Internal);
    /// ```
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "llm" => Self::Llm,
            "chain" => Self::Chain,
            "retriever" | "retrieval" => Self::Retriever,
            "embedding" => Self::Embedding,
            "tool" => Self::Tool,
            "agent" => Self::Agent,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// Event recorded inside a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// In-progress span
///
/// Root spans get a fresh trace id; children inherit it from their parent.
#[derive(Debug, Clone)]
pub struct SpanContext {
    trace_id: String,
    span_id: String,
    parent_id: Option<String>,
    name: String,
    kind: SpanKind,
    start_time: DateTime<Utc>,
    status: SpanStatus,
    attributes: Map<String, Value>,
    events: Vec<SpanEvent>,
}

impl SpanContext {
    /// Start a root span of a new trace
    pub fn new_root(name: impl Into<String>) -> Self {
        Self::with_trace_id(new_trace_id(), name)
    }

    /// Start a root span inside an existing trace id
    pub fn with_trace_id(trace_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: new_span_id(),
            parent_id: None,
            name: name.into(),
            kind: SpanKind::Internal,
            start_time: Utc::now(),
            status: SpanStatus::Ok,
            attributes: Map::new(),
            events: Vec::new(),
        }
    }

    /// Start a child span inheriting the trace id
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut child = Self::with_trace_id(self.trace_id.clone(), name);
        child.parent_id = Some(self.span_id.clone());
        child
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn set_kind(&mut self, kind: SpanKind) {
        self.kind = kind;
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.status = status;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn add_event(&mut self, name: impl Into<String>, attributes: Map<String, Value>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    /// Close the span now
    pub fn finish(self) -> SpanRecord {
        self.finish_at(Utc::now())
    }

    pub fn finish_at(self, end_time: DateTime<Utc>) -> SpanRecord {
        SpanRecord {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_id: self.parent_id,
            name: self.name,
            kind: self.kind,
            start_time: self.start_time,
            end_time,
            status: self.status,
            attributes: self.attributes,
            events: self.events,
        }
    }
}

/// Finished span, as written to the spool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    trace_id: String,
    span_id: String,
    #[serde(default)]
    parent_id: Option<String>,
    name: String,
    #[serde(rename = "event_type")]
    kind: SpanKind,
    #[serde(with = "rfc3339")]
    start_time: DateTime<Utc>,
    #[serde(with = "rfc3339")]
    end_time: DateTime<Utc>,
    status: SpanStatus,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    events: Vec<SpanEvent>,
}

impl SpanRecord {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpanKind {
        self.kind
    }

    pub fn status(&self) -> SpanStatus {
        self.status
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn events(&self) -> &[SpanEvent] {
        &self.events
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds().max(0)
    }

    /// JSON document form embedded in the trace batch
    pub fn to_document(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }
}

/// 32-char lower-hex trace id
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 16-char lower-hex span id
pub fn new_span_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

mod rfc3339 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
