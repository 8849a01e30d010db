//! Tracing layer feeding the span exporter
//!
//! Applications compose [`TraceLayer`] into their subscriber. While the
//! tracer is active, every span opened by an accepted target (and everything
//! nested under it) is recorded; when the root span closes, the whole trace
//! is exported as one batch.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::tracer::exporter::{ExportResult, SpanExporter};
use crate::tracer::instrumentor::Instrumentor;
use crate::tracer::span::{SpanContext, SpanKind, SpanRecord, SpanStatus};

/// Targets of this crate; never captured so upload logging cannot loop back
const INTERNAL_TARGET: &str = "catalyst_sdk";

/// State shared by the tracer facade and its layers
pub(crate) struct LayerState {
    active: AtomicBool,
    instrumentor: Arc<dyn Instrumentor>,
    exporter: Arc<SpanExporter>,
    /// Finished spans per trace id, waiting for their root to close
    buffers: DashMap<String, Vec<SpanRecord>>,
}

impl LayerState {
    pub(crate) fn new(exporter: Arc<SpanExporter>, instrumentor: Arc<dyn Instrumentor>) -> Self {
        Self {
            active: AtomicBool::new(false),
            instrumentor,
            exporter,
            buffers: DashMap::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns false when already active
    pub(crate) fn activate(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns false when already inactive
    pub(crate) fn deactivate(&self) -> bool {
        self.active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Export traces whose root span has not closed yet
    pub(crate) fn flush_in_flight(&self) -> usize {
        let trace_ids: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();
        let mut exported = 0;
        for trace_id in trace_ids {
            if let Some((_, spans)) = self.buffers.remove(&trace_id) {
                if self.exporter.export(spans) == ExportResult::Success {
                    exported += 1;
                }
            }
        }
        exported
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.buffers.len()
    }

    fn finish(&self, record: SpanRecord) {
        let is_root = record.parent_id().is_none();
        let trace_id = record.trace_id().to_string();

        self.buffers.entry(trace_id.clone()).or_default().push(record);

        if is_root {
            if let Some((_, spans)) = self.buffers.remove(&trace_id) {
                self.exporter.export(spans);
            }
        }
    }
}

/// `tracing_subscriber` layer capturing spans for upload
#[derive(Clone)]
pub struct TraceLayer {
    state: Arc<LayerState>,
}

impl TraceLayer {
    pub(crate) fn new(state: Arc<LayerState>) -> Self {
        Self { state }
    }
}

fn is_internal(target: &str) -> bool {
    target == INTERNAL_TARGET
        || target
            .strip_prefix(INTERNAL_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

impl<S> Layer<S> for TraceLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if !self.state.is_active() {
            return;
        }
        let metadata = attrs.metadata();
        if is_internal(metadata.target()) {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };

        let name = metadata.name();
        let parent = span.scope().skip(1).find_map(|ancestor| {
            ancestor
                .extensions()
                .get::<SpanContext>()
                .map(|parent| parent.child(name))
        });

        let mut context = match parent {
            Some(context) => context,
            None if self.state.instrumentor.accepts(metadata) => SpanContext::new_root(name),
            None => return,
        };
        context.set_attribute("target", metadata.target());

        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        visitor.apply(&mut context);

        span.extensions_mut().insert(context);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(context) = extensions.get_mut::<SpanContext>() {
            let mut visitor = FieldVisitor::default();
            values.record(&mut visitor);
            visitor.apply(context);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_internal(metadata.target()) {
            return;
        }
        let Some(span) = ctx.event_span(event) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let Some(context) = extensions.get_mut::<SpanContext>() else {
            return;
        };

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let name = visitor
            .message
            .take()
            .unwrap_or_else(|| metadata.name().to_string());
        let mut attributes = visitor.fields;
        attributes.insert("level".to_string(), Value::String(metadata.level().to_string()));

        if *metadata.level() == Level::ERROR {
            context.set_status(SpanStatus::Error);
        }
        context.add_event(name, attributes);
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let Some(context) = span.extensions_mut().remove::<SpanContext>() else {
            return;
        };
        // spans closing after stop() belong to a trace that was already flushed
        if !self.state.is_active() {
            return;
        }
        self.state.finish(context.finish());
    }
}

/// Collects span and event fields as JSON values
///
/// `span_kind` selects the [`SpanKind`]; an `error` field marks the span as
/// failed; `message` becomes the event name.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    kind: Option<SpanKind>,
    error: bool,
    fields: Map<String, Value>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => {
                self.message = Some(match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
            }
            "span_kind" => {
                if let Value::String(s) = &value {
                    self.kind = Some(SpanKind::parse(s));
                }
            }
            name => {
                if name == "error" {
                    self.error = true;
                }
                self.fields.insert(name.to_string(), value);
            }
        }
    }

    fn apply(self, context: &mut SpanContext) {
        if let Some(kind) = self.kind {
            context.set_kind(kind);
        }
        if self.error {
            context.set_status(SpanStatus::Error);
        }
        for (key, value) in self.fields {
            context.set_attribute(key, value);
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{:?}", value);
        self.insert(field, Value::String(rendered.trim_matches('"').to_string()));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::String(value.to_string()));
    }
}
