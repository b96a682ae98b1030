//! Analytics Configuration
//!
//! Values can be deserialized from site settings or loaded from environment
//! variables. Every field has a default, so an empty settings object is valid.

use crate::error::AnalyticsError;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use validator::Validate;

/// Which sink receives session, page view and event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Records are accepted and dropped
    #[default]
    Disabled,
    /// Records are kept in process memory
    Memory,
    /// Records are written to PostgreSQL
    Postgres,
}

impl FromStr for SinkKind {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "disabled" | "none" | "off" => Ok(SinkKind::Disabled),
            "memory" => Ok(SinkKind::Memory),
            "postgres" | "postgresql" => Ok(SinkKind::Postgres),
            other => Err(AnalyticsError::Config(format!("Unknown sink kind: {}", other))),
        }
    }
}

/// Analytics engine configuration
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Master switch. When false the engine runs against a no-op sink and mirror
    /// (from ANALYTICS_ENABLED env var)
    pub tracking_enabled: bool,

    /// Sink selection (from ANALYTICS_SINK env var)
    pub sink: SinkKind,

    /// PostgreSQL connection string, required for the postgres sink (from DATABASE_URL env var)
    pub database_url: Option<String>,

    /// Maximum pooled database connections (from ANALYTICS_DB_MAX_CONNECTIONS env var)
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,

    /// Tab-scoped storage key holding the session id (from ANALYTICS_SESSION_KEY env var)
    #[validate(length(min = 1, max = 64))]
    pub session_storage_key: String,

    /// Durable storage key holding the returning visitor marker (from ANALYTICS_VISITOR_KEY env var)
    #[validate(length(min = 1, max = 64))]
    pub visitor_storage_key: String,

    /// Mirror measurement id used for page `config` commands (from ANALYTICS_MIRROR_ID env var)
    pub mirror_measurement_id: Option<String>,

    /// Path prefixes that never open a page view (from ANALYTICS_EXCLUDED_PATHS env var)
    pub excluded_paths: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            sink: SinkKind::Disabled,
            database_url: None,
            max_connections: 5,
            session_storage_key: "analytics_session_id".into(),
            visitor_storage_key: "analytics_returning_visitor".into(),
            mirror_measurement_id: None,
            excluded_paths: vec!["/admin".into()],
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            tracking_enabled: env::var("ANALYTICS_ENABLED")
                .ok()
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(defaults.tracking_enabled),

            sink: env::var("ANALYTICS_SINK")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.sink),

            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),

            max_connections: env::var("ANALYTICS_DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),

            session_storage_key: env::var("ANALYTICS_SESSION_KEY")
                .unwrap_or(defaults.session_storage_key),

            visitor_storage_key: env::var("ANALYTICS_VISITOR_KEY")
                .unwrap_or(defaults.visitor_storage_key),

            mirror_measurement_id: env::var("ANALYTICS_MIRROR_ID").ok().filter(|v| !v.is_empty()),

            excluded_paths: env::var("ANALYTICS_EXCLUDED_PATHS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.excluded_paths),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        Validate::validate(self)?;

        if self.session_storage_key == self.visitor_storage_key {
            return Err(AnalyticsError::Config(
                "ANALYTICS_SESSION_KEY and ANALYTICS_VISITOR_KEY must differ".to_string(),
            ));
        }

        if self.sink == SinkKind::Postgres && self.database_url.is_none() {
            return Err(AnalyticsError::Config(
                "DATABASE_URL must be set for the postgres sink".to_string(),
            ));
        }

        if self.excluded_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(AnalyticsError::Config(
                "ANALYTICS_EXCLUDED_PATHS entries must start with '/'".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a page path is one of the excluded paths or lies below one
    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            match path.strip_prefix(prefix) {
                Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.is_empty(),
                None => false,
            }
        })
    }

    /// Tab-scoped key holding the serialized session record
    pub fn session_state_key(&self) -> String {
        format!("{}_state", self.session_storage_key)
    }
}
