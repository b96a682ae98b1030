//! Analytics Data Models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device class derived from the user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Device, browser and screen details detected once per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub screen_width: u32,
    pub screen_height: u32,
}

/// Marketing attribution parameters from the landing URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

/// A visitor session, one per tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub device_type: DeviceType,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub landing_page: String,
    pub is_new_visitor: bool,
    pub page_views: i32,
}

/// Latest known end of a session. Each write replaces the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExit {
    pub session_id: String,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    pub page_views: i32,
}

/// A single display of a path, from Enter to Exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageView {
    pub id: Uuid,
    pub session_id: String,
    pub page_path: String,
    pub page_title: Option<String>,
    pub viewed_at: DateTime<Utc>,
    pub exit_at: Option<DateTime<Utc>>,
    pub time_on_page_seconds: i64,
    pub scroll_depth_percent: i32,
    pub clicks_count: i32,
    pub load_time_ms: Option<i64>,
}

impl PageView {
    /// Whether the exit has been recorded
    pub fn is_finalized(&self) -> bool {
        self.exit_at.is_some()
    }
}

/// A free-form tracked event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub session_id: String,
    pub event_type: String,
    pub category: Option<String>,
    pub action: Option<String>,
    pub label: Option<String>,
    pub value: Option<f64>,
    pub page_path: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Unit of work handed to a sink
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Session(Session),
    SessionExit(SessionExit),
    PageView(PageView),
    Event(Event),
}

impl SinkRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            SinkRecord::Session(_) => "session",
            SinkRecord::SessionExit(_) => "session_exit",
            SinkRecord::PageView(_) => "page_view",
            SinkRecord::Event(_) => "event",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SinkRecord::Session(s) => &s.session_id,
            SinkRecord::SessionExit(e) => &e.session_id,
            SinkRecord::PageView(p) => &p.session_id,
            SinkRecord::Event(e) => &e.session_id,
        }
    }
}
