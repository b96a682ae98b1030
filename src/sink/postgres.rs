//! PostgreSQL sink

use super::Sink;
use crate::error::SinkError;
use crate::models::*;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

pub struct PgSink {
    db: PgPool,
}

impl PgSink {
    /// Connect a pool lazily; the first write opens the first connection
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SinkError> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect_lazy(database_url)?;

        Ok(Self { db })
    }

    /// Create analytics tables
    pub async fn run_migrations(&self) -> Result<(), SinkError> {
        tracing::info!("Running analytics database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics_sessions (
                session_id VARCHAR(64) PRIMARY KEY,
                device_type VARCHAR(16) NOT NULL,
                browser VARCHAR(64) NOT NULL,
                browser_version VARCHAR(32) NOT NULL,
                os VARCHAR(64) NOT NULL,
                screen_width INTEGER NOT NULL DEFAULT 0,
                screen_height INTEGER NOT NULL DEFAULT 0,
                referrer TEXT,
                utm_source VARCHAR(255),
                utm_medium VARCHAR(255),
                utm_campaign VARCHAR(255),
                utm_term VARCHAR(255),
                utm_content VARCHAR(255),
                landing_page TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                ended_at TIMESTAMPTZ,
                duration_seconds BIGINT CHECK (duration_seconds >= 0),
                is_new_visitor BOOLEAN NOT NULL DEFAULT TRUE,
                page_views INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics_page_views (
                id UUID PRIMARY KEY,
                session_id VARCHAR(64) NOT NULL REFERENCES analytics_sessions(session_id) ON DELETE CASCADE,
                page_path TEXT NOT NULL,
                page_title TEXT,
                viewed_at TIMESTAMPTZ NOT NULL,
                exit_at TIMESTAMPTZ,
                time_on_page_seconds BIGINT NOT NULL DEFAULT 0,
                scroll_depth_percent INTEGER NOT NULL DEFAULT 0
                    CHECK (scroll_depth_percent BETWEEN 0 AND 100),
                clicks_count INTEGER NOT NULL DEFAULT 0,
                load_time_ms BIGINT
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analytics_page_views_session ON analytics_page_views(session_id, viewed_at);",
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analytics_events (
                id BIGSERIAL PRIMARY KEY,
                session_id VARCHAR(64) NOT NULL REFERENCES analytics_sessions(session_id) ON DELETE CASCADE,
                event_type VARCHAR(128) NOT NULL,
                category VARCHAR(128),
                action VARCHAR(128),
                label TEXT,
                value DOUBLE PRECISION,
                page_path TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                data JSONB NOT NULL DEFAULT '{}'::jsonb
            );
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_analytics_events_session ON analytics_events(session_id, timestamp);",
        )
        .execute(&self.db)
        .await?;

        tracing::info!("Analytics migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl Sink for PgSink {
    async fn upsert_session(&self, session: &Session) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO analytics_sessions
            (session_id, device_type, browser, browser_version, os, screen_width, screen_height,
             referrer, utm_source, utm_medium, utm_campaign, utm_term, utm_content,
             landing_page, started_at, is_new_visitor, page_views)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session.session_id)
        .bind(session.device_type.as_str())
        .bind(&session.browser)
        .bind(&session.browser_version)
        .bind(&session.os)
        .bind(i32::try_from(session.screen_width).unwrap_or(i32::MAX))
        .bind(i32::try_from(session.screen_height).unwrap_or(i32::MAX))
        .bind(&session.referrer)
        .bind(&session.utm_source)
        .bind(&session.utm_medium)
        .bind(&session.utm_campaign)
        .bind(&session.utm_term)
        .bind(&session.utm_content)
        .bind(&session.landing_page)
        .bind(session.started_at)
        .bind(session.is_new_visitor)
        .bind(session.page_views)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn record_session_exit(&self, exit: &SessionExit) -> Result<(), SinkError> {
        let result = sqlx::query(
            r#"
            UPDATE analytics_sessions
            SET ended_at = $1,
                duration_seconds = $2,
                page_views = $3
            WHERE session_id = $4
            "#,
        )
        .bind(exit.ended_at)
        .bind(exit.duration_seconds.max(0))
        .bind(exit.page_views)
        .bind(&exit.session_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SinkError::Rejected(format!("unknown session {}", exit.session_id)));
        }

        Ok(())
    }

    async fn save_page_view(&self, page_view: &PageView) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO analytics_page_views
            (id, session_id, page_path, page_title, viewed_at, exit_at,
             time_on_page_seconds, scroll_depth_percent, clicks_count, load_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                exit_at = EXCLUDED.exit_at,
                time_on_page_seconds = EXCLUDED.time_on_page_seconds,
                scroll_depth_percent = EXCLUDED.scroll_depth_percent,
                clicks_count = EXCLUDED.clicks_count
            WHERE analytics_page_views.exit_at IS NULL
            "#,
        )
        .bind(page_view.id)
        .bind(&page_view.session_id)
        .bind(&page_view.page_path)
        .bind(&page_view.page_title)
        .bind(page_view.viewed_at)
        .bind(page_view.exit_at)
        .bind(page_view.time_on_page_seconds)
        .bind(page_view.scroll_depth_percent)
        .bind(page_view.clicks_count)
        .bind(page_view.load_time_ms)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn insert_event(&self, event: &Event) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO analytics_events
            (session_id, event_type, category, action, label, value, page_path, timestamp, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.session_id)
        .bind(&event.event_type)
        .bind(&event.category)
        .bind(&event.action)
        .bind(&event.label)
        .bind(event.value)
        .bind(&event.page_path)
        .bind(event.timestamp)
        .bind(&event.data)
        .execute(&self.db)
        .await?;

        Ok(())
    }
}
