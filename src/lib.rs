//! Studio Analytics
//!
//! Client-side instrumentation engine for the studio site:
//! - Tab-scoped visitor sessions with device and attribution details
//! - Page view lifecycle with dwell time, scroll depth and clicks
//! - Custom events sent to a pluggable sink and an optional mirror
//! - Exit handling for route changes, tab hiding and unload
//!
//! Nothing here ever fails into the host page. Storage, sink and mirror
//! failures are logged with `tracing` and otherwise ignored.
//!
//! # Usage
//!
//! Build one [`Analytics`] at the application root and share it:
//!
//! ```rust,ignore
//! use studio_analytics::{Analytics, AnalyticsConfig, Signal};
//!
//! let analytics = Arc::new(Analytics::builder(AnalyticsConfig::from_env()).connect().await);
//! analytics.initialize().await;
//! analytics.track_page_change("/portfolio").await;
//! analytics.track_event("lead_submitted", Some(json!({ "source": "Referral" }))).await;
//! analytics.handle(Signal::VisibilityHidden).await;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod hooks;
pub mod host;
pub mod identity;
pub mod mirror;
pub mod models;
pub mod services;
pub mod sink;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AnalyticsConfig, SinkKind};
pub use error::AnalyticsError;
pub use hooks::{ExitCoordinator, Signal};
pub use host::{Host, NavigationTiming, StaticHost};
pub use mirror::{FnMirror, Mirror, MirrorCommand, NullMirror};
pub use models::*;
pub use services::ScrollMetrics;
pub use sink::{MemorySink, NoopSink, Sink};
pub use storage::{KeyValueStore, MemoryStore, UnavailableStore};

use services::{EventPipeline, SessionLifecycleManager};
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================
// Builder
// ============================================

/// Collects the engine's collaborators. Anything not supplied falls back to
/// an in-memory or no-op implementation.
pub struct AnalyticsBuilder {
    config: AnalyticsConfig,
    tab_store: Option<Arc<dyn KeyValueStore>>,
    durable_store: Option<Arc<dyn KeyValueStore>>,
    host: Option<Arc<dyn Host>>,
    clock: Option<Arc<dyn Clock>>,
    sink: Option<Arc<dyn Sink>>,
    mirror: Option<Arc<dyn Mirror>>,
}

impl AnalyticsBuilder {
    fn new(config: AnalyticsConfig) -> Self {
        Self {
            config,
            tab_store: None,
            durable_store: None,
            host: None,
            clock: None,
            sink: None,
            mirror: None,
        }
    }

    /// Storage cleared when the tab closes
    pub fn tab_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.tab_store = Some(store);
        self
    }

    /// Storage that outlives the tab
    pub fn durable_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.durable_store = Some(store);
        self
    }

    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn mirror(mut self, mirror: Arc<dyn Mirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Build with the sink chosen by configuration unless one was supplied.
    /// A sink that cannot be set up is replaced by [`NoopSink`].
    pub async fn connect(mut self) -> Analytics {
        if self.sink.is_none() && self.config.validate().is_ok() {
            match sink::from_config(&self.config).await {
                Ok(sink) => self.sink = Some(sink),
                Err(e) => tracing::warn!(error = %e, "Analytics sink unavailable, records will be dropped"),
            }
        }
        self.build()
    }

    /// Build the engine. Must run inside a Tokio runtime for records to be
    /// delivered.
    pub fn build(self) -> Analytics {
        let config = match self.config.validate() {
            Ok(()) => self.config,
            Err(e) => {
                tracing::warn!(error = %e, "Invalid analytics configuration, tracking disabled");
                AnalyticsConfig {
                    tracking_enabled: false,
                    ..AnalyticsConfig::default()
                }
            }
        };

        let (sink, mirror): (Arc<dyn Sink>, Arc<dyn Mirror>) = if config.tracking_enabled {
            (
                self.sink.unwrap_or_else(|| Arc::new(NoopSink)),
                self.mirror.unwrap_or_else(|| Arc::new(NullMirror)),
            )
        } else {
            (Arc::new(NoopSink), Arc::new(NullMirror))
        };

        let tab_store = self.tab_store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let durable_store = self.durable_store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let host = self.host.unwrap_or_else(|| Arc::new(StaticHost::default()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let sessions = SessionLifecycleManager::new(&config, tab_store, durable_store);
        let pipeline = EventPipeline::new(sink, mirror, config.mirror_measurement_id.clone());
        let core = ExitCoordinator::new(config, host, clock, sessions, pipeline);

        Analytics {
            core: Mutex::new(core),
        }
    }
}

// ============================================
// Engine
// ============================================

/// The analytics engine for one tab. Share it as `Arc<Analytics>`; every
/// method may be called from any mount point.
pub struct Analytics {
    core: Mutex<ExitCoordinator>,
}

impl Analytics {
    /// The single construction point
    pub fn builder(config: AnalyticsConfig) -> AnalyticsBuilder {
        AnalyticsBuilder::new(config)
    }

    /// Start the session. Safe to call any number of times.
    pub async fn initialize(&self) {
        self.core.lock().await.initialize();
    }

    /// Router bridge entry point: finalize the current page and open `path`,
    /// titled with the host document's current title
    pub async fn track_page_change(&self, path: &str) {
        let mut core = self.core.lock().await;
        let title = core.document_title();
        core.page_change(path, title.as_deref());
    }

    /// Record a custom event against the current session and page
    pub async fn track_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.core.lock().await.track_event(event_type, data);
    }

    /// Deliver a browser signal
    pub async fn handle(&self, signal: Signal) {
        self.core.lock().await.dispatch(signal);
    }

    /// Ignore all further browser signals
    pub async fn detach(&self) {
        self.core.lock().await.detach();
    }

    /// Detach and wait for queued records to reach the sink
    pub async fn shutdown(&self) {
        self.core.lock().await.shutdown().await;
    }

    pub async fn session_id(&self) -> Option<String> {
        self.core.lock().await.session().map(|s| s.session_id.clone())
    }

    pub async fn session(&self) -> Option<Session> {
        self.core.lock().await.session().cloned()
    }

    pub async fn current_page_view(&self) -> Option<PageView> {
        self.core.lock().await.current_page_view().cloned()
    }
}

// ============================================
// Module Tests
// ============================================
