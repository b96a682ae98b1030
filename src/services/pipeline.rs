//! Event pipeline and background record dispatcher
//!
//! Records are queued on a bounded channel and written by one worker task,
//! so writes reach the sink in the order they were produced and callers never
//! wait on I/O. When the queue is full the newest record is dropped. There is
//! no retry: a failed write is logged and dropped.

use crate::mirror::{Mirror, MirrorCommand};
use crate::models::{Event, SinkRecord};
use crate::sink::Sink;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Records held while the sink is slow before new ones are dropped
pub const QUEUE_CAPACITY: usize = 1024;

// ============================================
// Dispatcher
// ============================================

pub struct Dispatcher {
    tx: Option<mpsc::Sender<SinkRecord>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the worker on the current Tokio runtime. Without a runtime the
    /// dispatcher drops everything it is given.
    pub fn spawn(sink: Arc<dyn Sink>) -> Self {
        Self::with_capacity(sink, QUEUE_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn Sink>, capacity: usize) -> Self {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(error = %e, "No async runtime; analytics records will be dropped");
                return Self { tx: None, worker: None };
            }
        };

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = handle.spawn(run_worker(sink, rx));

        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn send(&self, record: SinkRecord) {
        let Some(tx) = &self.tx else {
            tracing::debug!(kind = record.kind(), "Dispatcher closed, record dropped");
            return;
        };

        match tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                tracing::debug!(kind = record.kind(), "Dispatcher queue full, record dropped");
            }
            Err(TrySendError::Closed(record)) => {
                tracing::debug!(kind = record.kind(), "Dispatcher worker gone, record dropped");
            }
        }
    }

    /// Stop accepting records and wait for queued ones to be written
    pub async fn close(&mut self) {
        self.tx.take();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "Analytics dispatcher worker failed");
            }
        }
    }
}

async fn run_worker(sink: Arc<dyn Sink>, mut rx: mpsc::Receiver<SinkRecord>) {
    while let Some(record) = rx.recv().await {
        if let Err(e) = sink.write(&record).await {
            tracing::debug!(
                kind = record.kind(),
                session_id = %record.session_id(),
                error = %e,
                "Analytics sink write failed, record dropped"
            );
        }
    }
}

// ============================================
// Event Pipeline
// ============================================

pub struct EventPipeline {
    dispatcher: Dispatcher,
    mirror: Arc<dyn Mirror>,
    measurement_id: Option<String>,
}

impl EventPipeline {
    pub fn new(sink: Arc<dyn Sink>, mirror: Arc<dyn Mirror>, measurement_id: Option<String>) -> Self {
        Self {
            dispatcher: Dispatcher::spawn(sink),
            mirror,
            measurement_id,
        }
    }

    /// Queue a session or page view record
    pub fn write(&self, record: SinkRecord) {
        self.dispatcher.send(record);
    }

    /// Tag a named event with session, path and time, then send it to the
    /// sink and the mirror
    pub fn track(
        &self,
        session_id: &str,
        page_path: &str,
        timestamp: DateTime<Utc>,
        event_type: &str,
        data: Option<Value>,
    ) -> Event {
        let data = match data {
            Some(Value::Null) | None => Value::Object(Map::new()),
            Some(other) => other,
        };

        let event = Event {
            session_id: session_id.to_string(),
            event_type: event_type.to_string(),
            category: string_field(&data, "category"),
            action: string_field(&data, "action"),
            label: string_field(&data, "label"),
            value: data.get("value").and_then(Value::as_f64).filter(|v| v.is_finite()),
            page_path: page_path.to_string(),
            timestamp,
            data,
        };

        self.dispatcher.send(SinkRecord::Event(event.clone()));

        let mut params = match &event.data {
            Value::Object(map) => map.clone(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other.clone());
                map
            }
        };
        params.insert("page_path".into(), Value::String(event.page_path.clone()));
        self.mirror_emit(MirrorCommand::Event, event_type, &Value::Object(params));

        event
    }

    /// Tell the mirror which page is now displayed
    pub fn mirror_page(&self, page_path: &str, page_title: Option<&str>) {
        let Some(id) = self.measurement_id.as_deref() else {
            return;
        };

        let params = serde_json::json!({
            "page_path": page_path,
            "page_title": page_title,
        });
        self.mirror_emit(MirrorCommand::Config, id, &params);
    }

    pub async fn close(&mut self) {
        self.dispatcher.close().await;
    }

    fn mirror_emit(&self, command: MirrorCommand, identifier: &str, params: &Value) {
        if let Err(e) = self.mirror.emit(command, identifier, params) {
            tracing::debug!(%command, identifier, error = %e, "Mirror report failed");
        }
    }
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(String::from)
}
