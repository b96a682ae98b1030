//! Record sinks
//!
//! A [`Sink`] receives session, page view and event records from the
//! background dispatcher. Which one runs is a configuration choice; the
//! "analytics off" state is simply [`NoopSink`].

pub mod postgres;

use crate::config::{AnalyticsConfig, SinkKind};
use crate::error::{AnalyticsError, SinkError};
use crate::models::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Insert the session if no row exists for its id. Never resets an existing row.
    async fn upsert_session(&self, session: &Session) -> Result<(), SinkError>;

    /// Overwrite the session's end time, duration and page view count
    async fn record_session_exit(&self, exit: &SessionExit) -> Result<(), SinkError>;

    /// Insert or update a page view by id. A finalized row is never overwritten.
    async fn save_page_view(&self, page_view: &PageView) -> Result<(), SinkError>;

    async fn insert_event(&self, event: &Event) -> Result<(), SinkError>;

    async fn write(&self, record: &SinkRecord) -> Result<(), SinkError> {
        match record {
            SinkRecord::Session(session) => self.upsert_session(session).await,
            SinkRecord::SessionExit(exit) => self.record_session_exit(exit).await,
            SinkRecord::PageView(page_view) => self.save_page_view(page_view).await,
            SinkRecord::Event(event) => self.insert_event(event).await,
        }
    }
}

/// Build the sink selected by configuration
pub async fn from_config(config: &AnalyticsConfig) -> Result<Arc<dyn Sink>, AnalyticsError> {
    if !config.tracking_enabled {
        return Ok(Arc::new(NoopSink));
    }

    match config.sink {
        SinkKind::Disabled => Ok(Arc::new(NoopSink)),
        SinkKind::Memory => Ok(Arc::new(MemorySink::new())),
        SinkKind::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                AnalyticsError::Config("DATABASE_URL must be set for the postgres sink".into())
            })?;
            let sink = postgres::PgSink::connect(url, config.max_connections).await?;
            sink.run_migrations().await?;
            Ok(Arc::new(sink))
        }
    }
}

// ============================================
// No-op Sink
// ============================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl Sink for NoopSink {
    async fn upsert_session(&self, _session: &Session) -> Result<(), SinkError> {
        Ok(())
    }

    async fn record_session_exit(&self, _exit: &SessionExit) -> Result<(), SinkError> {
        Ok(())
    }

    async fn save_page_view(&self, _page_view: &PageView) -> Result<(), SinkError> {
        Ok(())
    }

    async fn insert_event(&self, _event: &Event) -> Result<(), SinkError> {
        Ok(())
    }
}

// ============================================
// Memory Sink
// ============================================

#[derive(Debug, Default)]
struct MemoryTables {
    sessions: Vec<Session>,
    page_views: Vec<PageView>,
    page_view_index: HashMap<Uuid, usize>,
    events: Vec<Event>,
    log: Vec<SinkRecord>,
}

/// Sink holding rows in process memory with the same upsert rules as the
/// database sink. Every accepted write is also appended to a log.
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: RwLock<MemoryTables>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sessions(&self) -> Vec<Session> {
        self.tables.read().await.sessions.clone()
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.tables
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
    }

    /// Page views in first-write order
    pub async fn page_views(&self) -> Vec<PageView> {
        self.tables.read().await.page_views.clone()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.tables.read().await.events.clone()
    }

    /// Every write accepted so far, in arrival order
    pub async fn log(&self) -> Vec<SinkRecord> {
        self.tables.read().await.log.clone()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn upsert_session(&self, session: &Session) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        if tables.sessions.iter().any(|s| s.session_id == session.session_id) {
            return Ok(());
        }
        tables.sessions.push(session.clone());
        tables.log.push(SinkRecord::Session(session.clone()));
        Ok(())
    }

    async fn record_session_exit(&self, exit: &SessionExit) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables
            .sessions
            .iter_mut()
            .find(|s| s.session_id == exit.session_id)
        else {
            return Err(SinkError::Rejected(format!("unknown session {}", exit.session_id)));
        };

        session.ended_at = Some(exit.ended_at);
        session.duration_seconds = Some(exit.duration_seconds);
        session.page_views = exit.page_views;
        tables.log.push(SinkRecord::SessionExit(exit.clone()));
        Ok(())
    }

    async fn save_page_view(&self, page_view: &PageView) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;

        if let Some(&index) = tables.page_view_index.get(&page_view.id) {
            if tables.page_views[index].is_finalized() {
                return Ok(());
            }
            tables.page_views[index] = page_view.clone();
        } else {
            let index = tables.page_views.len();
            tables.page_views.push(page_view.clone());
            tables.page_view_index.insert(page_view.id, index);
        }

        tables.log.push(SinkRecord::PageView(page_view.clone()));
        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), SinkError> {
        let mut tables = self.tables.write().await;
        tables.events.push(event.clone());
        tables.log.push(SinkRecord::Event(event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn session(id: &str) -> Session {
        Session {
            session_id: id.into(),
            started_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
            device_type: DeviceType::Desktop,
            browser: "Firefox".into(),
            browser_version: "121".into(),
            os: "Linux".into(),
            screen_width: 1920,
            screen_height: 1080,
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            utm_term: None,
            utm_content: None,
            landing_page: "/".into(),
            is_new_visitor: true,
            page_views: 0,
        }
    }

    fn page_view(session_id: &str) -> PageView {
        PageView {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            page_path: "/".into(),
            page_title: None,
            viewed_at: Utc::now(),
            exit_at: None,
            time_on_page_seconds: 0,
            scroll_depth_percent: 0,
            clicks_count: 0,
            load_time_ms: None,
        }
    }

    #[tokio::test]
    async fn test_session_upsert_keeps_first_row() {
        let sink = MemorySink::new();
        let first = session("s1");
        let mut repeat = session("s1");
        repeat.started_at = first.started_at + Duration::seconds(30);

        sink.upsert_session(&first).await.unwrap();
        sink.upsert_session(&repeat).await.unwrap();

        let sessions = sink.sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].started_at, first.started_at);
    }

    #[tokio::test]
    async fn test_session_exit_last_write_wins() {
        let sink = MemorySink::new();
        sink.upsert_session(&session("s1")).await.unwrap();

        for duration in [12, 40] {
            let exit = SessionExit {
                session_id: "s1".into(),
                ended_at: Utc::now(),
                duration_seconds: duration,
                page_views: 2,
            };
            sink.record_session_exit(&exit).await.unwrap();
        }

        let stored = sink.session("s1").await.unwrap();
        assert_eq!(stored.duration_seconds, Some(40));
        assert_eq!(stored.page_views, 2);
    }

    #[tokio::test]
    async fn test_session_exit_for_unknown_session_rejected() {
        let sink = MemorySink::new();
        let exit = SessionExit {
            session_id: "missing".into(),
            ended_at: Utc::now(),
            duration_seconds: 1,
            page_views: 0,
        };
        assert!(matches!(
            sink.record_session_exit(&exit).await,
            Err(SinkError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_finalized_page_view_not_overwritten() {
        let sink = MemorySink::new();
        let open = page_view("s1");
        sink.save_page_view(&open).await.unwrap();

        let mut finalized = open.clone();
        finalized.exit_at = Some(Utc::now());
        finalized.time_on_page_seconds = 5;
        sink.save_page_view(&finalized).await.unwrap();

        let mut late = finalized.clone();
        late.time_on_page_seconds = 99;
        sink.save_page_view(&late).await.unwrap();

        let rows = sink.page_views().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].time_on_page_seconds, 5);
        assert_eq!(sink.log().await.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_config_selects_noop() {
        let config = AnalyticsConfig {
            tracking_enabled: false,
            sink: SinkKind::Postgres,
            ..AnalyticsConfig::default()
        };

        // no database is contacted when tracking is off
        let sink = from_config(&config).await.unwrap();
        assert!(sink.upsert_session(&session("s1")).await.is_ok());
    }
}
