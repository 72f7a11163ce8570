//! Lightweight trace spans with optional batched export.
//!
//! A span is opened per `call_tool` and a child span per upstream
//! HTTP request. When a collector endpoint is configured the spans
//! are queued to a background exporter that batches them and POSTs
//! JSON; without an endpoint every span is dropped at the `export`
//! call for the cost of an atomic check. The hot path never blocks on
//! the exporter: a full queue drops the span, not the call.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Export queue bound; spans beyond it are dropped, never buffered
/// unboundedly.
const QUEUE_CAPACITY: usize = 1024;
/// Spans per export POST.
const BATCH_SIZE: usize = 64;
/// Maximum time a span waits in the batch buffer.
const BATCH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Terminal status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
    Cancelled,
}

/// One finished span, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub status: SpanStatus,
    pub attributes: Vec<(String, Value)>,
}

/// A span that is still open. Finish it with [`SpanBuilder::finish`]
/// and hand the result to [`Tracer::export`].
#[derive(Debug)]
pub struct SpanBuilder {
    trace_id: String,
    span_id: String,
    parent_span_id: Option<String>,
    name: String,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    attributes: Vec<(String, Value)>,
}

impl SpanBuilder {
    /// Opens a root span; the trace id doubles as the wire
    /// correlation id for the call.
    pub fn root(name: &str, trace_id: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: None,
            name: name.to_string(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
            attributes: Vec::new(),
        }
    }

    /// Opens a child span under an already-running span identified
    /// by id. Used across component boundaries where the parent
    /// builder cannot be borrowed.
    pub fn with_parent(name: &str, trace_id: &str, parent_span_id: Option<&str>) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: parent_span_id.map(str::to_string),
            name: name.to_string(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
            attributes: Vec::new(),
        }
    }

    /// Opens a child span under this one.
    pub fn child(&self, name: &str) -> SpanBuilder {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: Uuid::new_v4().to_string(),
            parent_span_id: Some(self.span_id.clone()),
            name: name.to_string(),
            started_at: Utc::now(),
            started_instant: Instant::now(),
            attributes: Vec::new(),
        }
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<Value>) {
        self.attributes.push((key.to_string(), value.into()));
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn finish(self, status: SpanStatus) -> Span {
        Span {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name,
            started_at: self.started_at,
            duration_ms: self.started_instant.elapsed().as_secs_f64() * 1000.0,
            status,
            attributes: self.attributes,
        }
    }
}

enum ExporterMessage {
    Span(Box<Span>),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the pipeline and transport to emit spans.
#[derive(Clone)]
pub struct Tracer {
    sender: Option<mpsc::Sender<ExporterMessage>>,
}

impl Tracer {
    /// Builds the tracer. With an endpoint the second element is the
    /// exporter worker to spawn; without one the tracer is inert.
    pub fn new(endpoint: Option<String>) -> (Arc<Tracer>, Option<TraceExporter>) {
        match endpoint {
            None => (Arc::new(Tracer { sender: None }), None),
            Some(endpoint) => {
                let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
                let tracer = Arc::new(Tracer { sender: Some(tx) });
                let exporter = TraceExporter { endpoint, receiver: rx };
                (tracer, Some(exporter))
            }
        }
    }

    pub fn enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queues a finished span for export. Dropped silently when
    /// export is disabled or the queue is full.
    pub fn export(&self, span: Span) {
        if let Some(sender) = &self.sender {
            if sender.try_send(ExporterMessage::Span(Box::new(span))).is_err() {
                debug!("trace export queue full, dropping span");
            }
        }
    }

    /// Flushes buffered spans; called once at shutdown.
    pub async fn flush(&self) {
        if let Some(sender) = &self.sender {
            let (ack_tx, ack_rx) = oneshot::channel();
            if sender.send(ExporterMessage::Flush(ack_tx)).await.is_ok() {
                let _ = tokio::time::timeout(std::time::Duration::from_secs(5), ack_rx).await;
            }
        }
    }
}

/// Background worker draining the span queue toward the collector.
pub struct TraceExporter {
    endpoint: String,
    receiver: mpsc::Receiver<ExporterMessage>,
}

impl TraceExporter {
    /// Runs until every `Tracer` clone is dropped. Spawn on the
    /// runtime at bootstrap.
    pub async fn run(mut self) {
        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("trace exporter disabled, HTTP client failed to build: {}", e);
                return;
            }
        };
        let mut batch: Vec<Span> = Vec::with_capacity(BATCH_SIZE);
        let mut ticker = tokio::time::interval(BATCH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(ExporterMessage::Span(span)) => {
                        batch.push(*span);
                        if batch.len() >= BATCH_SIZE {
                            Self::post(&client, &self.endpoint, &mut batch).await;
                        }
                    }
                    Some(ExporterMessage::Flush(ack)) => {
                        Self::post(&client, &self.endpoint, &mut batch).await;
                        let _ = ack.send(());
                    }
                    None => {
                        Self::post(&client, &self.endpoint, &mut batch).await;
                        return;
                    }
                },
                _ = ticker.tick() => {
                    Self::post(&client, &self.endpoint, &mut batch).await;
                }
            }
        }
    }

    async fn post(client: &reqwest::Client, endpoint: &str, batch: &mut Vec<Span>) {
        if batch.is_empty() {
            return;
        }
        let spans = std::mem::take(batch);
        let count = spans.len();
        let payload = serde_json::json!({ "spans": spans });
        match client.post(endpoint).json(&payload).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(
                    "trace collector rejected batch of {} spans with {}",
                    count,
                    response.status()
                );
            }
            Err(e) => warn!("trace export failed, dropping {} spans: {}", count, e),
            Ok(_) => {}
        }
    }
}
