//! Browser signal handling
//!
//! Route changes, visibility changes, unload, scroll, animation frames and
//! clicks all arrive here as [`Signal`]s. The three exit triggers share one
//! flush routine; duplicates are absorbed by the page view tracker (an exited
//! view is gone) and by last-write-wins session exits.
//!
//! When a hidden tab becomes visible again without a route change, a fresh
//! page view of the same path is opened. Dwell time therefore covers one
//! continuous foreground interval and never includes time spent hidden.

use crate::clock::Clock;
use crate::config::AnalyticsConfig;
use crate::host::{self, Host};
use crate::models::{PageView, Session, SinkRecord};
use crate::services::{EngagementCollectors, EventPipeline, PageViewTracker, ScrollMetrics, SessionLifecycleManager};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// A browser-originated notification
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    RouteChange { path: String, title: Option<String> },
    VisibilityHidden,
    VisibilityVisible,
    Unload,
    Scroll(ScrollMetrics),
    AnimationFrame,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    RouteChange,
    Hidden,
    Unload,
}

impl ExitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTrigger::RouteChange => "route_change",
            ExitTrigger::Hidden => "visibility_hidden",
            ExitTrigger::Unload => "unload",
        }
    }
}

/// Owns the session and page view state and routes every signal to it
pub struct ExitCoordinator {
    config: AnalyticsConfig,
    host: Arc<dyn Host>,
    clock: Arc<dyn Clock>,
    sessions: SessionLifecycleManager,
    pages: PageViewTracker,
    engagement: EngagementCollectors,
    pipeline: EventPipeline,
    attached: bool,
    hidden: bool,
}

impl ExitCoordinator {
    pub fn new(
        config: AnalyticsConfig,
        host: Arc<dyn Host>,
        clock: Arc<dyn Clock>,
        sessions: SessionLifecycleManager,
        pipeline: EventPipeline,
    ) -> Self {
        Self {
            config,
            host,
            clock,
            sessions,
            pages: PageViewTracker::new(),
            engagement: EngagementCollectors::new(),
            pipeline,
            attached: true,
            hidden: false,
        }
    }

    /// Start the session once. Later calls do nothing.
    pub fn initialize(&mut self) {
        self.start_session(None);
    }

    /// Close the current page view and open one for `path`
    pub fn page_change(&mut self, path: &str, title: Option<&str>) {
        let excluded = self.config.is_excluded(path);
        self.start_session((!excluded).then_some(path));
        let Some(session_id) = self.sessions.session_id().map(String::from) else {
            return;
        };
        let now = self.clock.now();
        self.engagement.reset();

        if excluded {
            tracing::debug!(page_path = path, "Excluded path, no page view opened");
            self.flush(ExitTrigger::RouteChange, now);
            self.pages.clear_last_page();
            return;
        }

        let load_time_ms = self.host.navigation_timing().and_then(|t| t.load_time_ms());
        let change = self.pages.on_page_change(&session_id, path, title, now, load_time_ms);

        if let Some(exited) = change.exited {
            self.finalized(exited, ExitTrigger::RouteChange);
        }
        // the exit record carries the count including the view just opened
        self.opened(change.entered);
        if let Some(exit) = self.sessions.record_exit(now) {
            self.pipeline.write(SinkRecord::SessionExit(exit));
        }
    }

    pub fn track_event(&mut self, event_type: &str, data: Option<Value>) {
        self.start_session(None);
        let Some(session_id) = self.sessions.session_id().map(String::from) else {
            return;
        };

        let page_path = self
            .pages
            .current_path()
            .map(String::from)
            .unwrap_or_else(|| host::location_path(&self.host.location()));

        self.pipeline
            .track(&session_id, &page_path, self.clock.now(), event_type, data);
    }

    pub fn dispatch(&mut self, signal: Signal) {
        if !self.attached {
            tracing::trace!(?signal, "Listeners detached, signal ignored");
            return;
        }

        match signal {
            Signal::RouteChange { path, title } => self.page_change(&path, title.as_deref()),
            Signal::VisibilityHidden => {
                self.hidden = true;
                self.flush(ExitTrigger::Hidden, self.clock.now());
            }
            Signal::VisibilityVisible => self.foreground(),
            Signal::Unload => self.flush(ExitTrigger::Unload, self.clock.now()),
            Signal::Scroll(metrics) => self.engagement.scroll(metrics),
            Signal::AnimationFrame => self.engagement.frame(&mut self.pages),
            Signal::Click => self.engagement.click(&mut self.pages),
        }
    }

    /// Stop reacting to browser signals
    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Detach and wait until every queued record has reached the sink
    pub async fn shutdown(&mut self) {
        self.detach();
        self.pipeline.close().await;
    }

    pub fn session(&self) -> Option<&Session> {
        self.sessions.session()
    }

    pub fn current_page_view(&self) -> Option<&PageView> {
        self.pages.current()
    }

    pub fn document_title(&self) -> Option<String> {
        self.host.document_title()
    }

    fn flush(&mut self, trigger: ExitTrigger, now: DateTime<Utc>) {
        if let Some(exited) = self.pages.exit(now) {
            self.finalized(exited, trigger);
        }
        if let Some(exit) = self.sessions.record_exit(now) {
            self.pipeline.write(SinkRecord::SessionExit(exit));
        }
    }

    fn foreground(&mut self) {
        if !self.hidden {
            return;
        }
        self.hidden = false;

        let Some(session_id) = self.sessions.session_id().map(String::from) else {
            return;
        };
        self.engagement.reset();
        if let Some(view) = self.pages.resume(&session_id, self.clock.now()) {
            self.opened(view);
        }
    }

    fn start_session(&mut self, landing_path: Option<&str>) {
        if self.sessions.is_started() {
            return;
        }

        let now = self.clock.now();
        if let Some(session) = self.sessions.start(self.host.as_ref(), now, landing_path) {
            self.pipeline.write(SinkRecord::Session(session));
        }
    }

    fn opened(&mut self, view: PageView) {
        self.sessions.note_page_view();
        self.pipeline.mirror_page(&view.page_path, view.page_title.as_deref());
        self.pipeline.write(SinkRecord::PageView(view));
    }

    fn finalized(&self, view: PageView, trigger: ExitTrigger) {
        tracing::debug!(
            session_id = %view.session_id,
            page_path = %view.page_path,
            trigger = trigger.as_str(),
            time_on_page_seconds = view.time_on_page_seconds,
            "Page view finalized"
        );
        self.pipeline.write(SinkRecord::PageView(view));
    }
}
