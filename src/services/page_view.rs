//! Page view Enter/Exit state machine
//!
//! At most one page view is open at a time. Exit moves it out of the tracker,
//! so a finalized view can never be touched again and a repeated exit finds
//! nothing to do.

use crate::clock::elapsed_seconds;
use crate::models::PageView;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of a route change: the view that was closed and the one opened
#[derive(Debug, Clone, PartialEq)]
pub struct PageChange {
    pub exited: Option<PageView>,
    pub entered: PageView,
}

#[derive(Debug)]
struct OpenPageView {
    record: PageView,
    max_scroll: f64,
}

#[derive(Debug, Default)]
pub struct PageViewTracker {
    current: Option<OpenPageView>,
    last_page: Option<(String, Option<String>)>,
    entered: u32,
}

impl PageViewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the open view and open one for `path` in a single step
    pub fn on_page_change(
        &mut self,
        session_id: &str,
        path: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
        navigation_load_ms: Option<i64>,
    ) -> PageChange {
        let exited = self.exit(now);
        let entered = self.enter(session_id, path, title, now, navigation_load_ms);
        PageChange { exited, entered }
    }

    /// Finalize the open view. Returns `None` when nothing is open.
    pub fn exit(&mut self, now: DateTime<Utc>) -> Option<PageView> {
        let open = self.current.take()?;
        let mut record = open.record;

        record.exit_at = Some(now);
        record.time_on_page_seconds = elapsed_seconds(record.viewed_at, now);
        Some(record)
    }

    /// Reopen the most recent path as a fresh view, if nothing is open
    pub fn resume(&mut self, session_id: &str, now: DateTime<Utc>) -> Option<PageView> {
        if self.current.is_some() {
            return None;
        }
        let (path, title) = self.last_page.clone()?;
        Some(self.enter(session_id, &path, title.as_deref(), now, None))
    }

    /// Forget the last path so a later resume opens nothing
    pub fn clear_last_page(&mut self) {
        self.last_page = None;
    }

    pub fn record_scroll(&mut self, percent: f64) {
        let Some(open) = self.current.as_mut() else {
            return;
        };
        if percent.is_finite() && percent > open.max_scroll {
            open.max_scroll = percent.min(100.0);
            open.record.scroll_depth_percent = open.max_scroll.round() as i32;
        }
    }

    pub fn record_click(&mut self) {
        if let Some(open) = self.current.as_mut() {
            open.record.clicks_count = open.record.clicks_count.saturating_add(1);
        }
    }

    pub fn current(&self) -> Option<&PageView> {
        self.current.as_ref().map(|open| &open.record)
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current().map(|p| p.page_path.as_str())
    }

    /// Number of views opened so far
    pub fn entered_count(&self) -> u32 {
        self.entered
    }

    fn enter(
        &mut self,
        session_id: &str,
        path: &str,
        title: Option<&str>,
        now: DateTime<Utc>,
        navigation_load_ms: Option<i64>,
    ) -> PageView {
        // only the initial document load has navigation timing
        let load_time_ms = if self.entered == 0 { navigation_load_ms } else { None };

        let record = PageView {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            page_path: path.to_string(),
            page_title: title.map(String::from),
            viewed_at: now,
            exit_at: None,
            time_on_page_seconds: 0,
            scroll_depth_percent: 0,
            clicks_count: 0,
            load_time_ms,
        };

        self.current = Some(OpenPageView {
            record: record.clone(),
            max_scroll: 0.0,
        });
        self.last_page = Some((path.to_string(), title.map(String::from)));
        self.entered += 1;
        record
    }
}
