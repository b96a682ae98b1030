//! Session creation and finalization

use crate::clock::elapsed_seconds;
use crate::config::AnalyticsConfig;
use crate::error::StorageError;
use crate::host::{self, Host};
use crate::identity::{self, SessionIdentity};
use crate::models::{Session, SessionExit};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct SessionLifecycleManager {
    identity: SessionIdentity,
    tab_store: Arc<dyn KeyValueStore>,
    durable_store: Arc<dyn KeyValueStore>,
    state_key: String,
    visitor_key: String,
    session: Option<Session>,
}

impl SessionLifecycleManager {
    pub fn new(
        config: &AnalyticsConfig,
        tab_store: Arc<dyn KeyValueStore>,
        durable_store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            identity: SessionIdentity::new(tab_store.clone(), config.session_storage_key.clone()),
            tab_store,
            durable_store,
            state_key: config.session_state_key(),
            visitor_key: config.visitor_storage_key.clone(),
            session: None,
        }
    }

    /// Build the session record. Returns `None` when a session already exists,
    /// so repeated calls produce nothing to write.
    ///
    /// After a reload in the same tab the stored record is restored as is,
    /// keeping its start time, landing page, page view count and visitor flag.
    /// `landing_path` is the first routed path when the session starts from a
    /// page change; otherwise the host location is used.
    pub fn start(&mut self, host: &dyn Host, now: DateTime<Utc>, landing_path: Option<&str>) -> Option<Session> {
        if self.session.is_some() {
            return None;
        }

        let session_id = self.identity.get_or_create_id(now);
        let session = match self.restore(&session_id, now) {
            Ok(Some(stored)) => {
                tracing::debug!(session_id = %stored.session_id, page_views = stored.page_views, "Analytics session restored");
                stored
            }
            Ok(None) => self.create(session_id, host, now, landing_path),
            Err(e) => {
                tracing::warn!(error = %e, "Discarding stored session state");
                self.create(session_id, host, now, landing_path)
            }
        };

        self.session = Some(session.clone());
        self.persist();
        Some(session)
    }

    /// Record the session's latest end. Each call replaces the previous duration.
    pub fn record_exit(&mut self, now: DateTime<Utc>) -> Option<SessionExit> {
        let session = self.session.as_mut()?;
        let duration_seconds = elapsed_seconds(session.started_at, now);

        session.ended_at = Some(now);
        session.duration_seconds = Some(duration_seconds);

        Some(SessionExit {
            session_id: session.session_id.clone(),
            ended_at: now,
            duration_seconds,
            page_views: session.page_views,
        })
    }

    pub fn note_page_view(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.page_views = session.page_views.saturating_add(1);
            self.persist();
        }
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id.as_str())
    }

    fn create(&self, session_id: String, host: &dyn Host, now: DateTime<Utc>, landing_path: Option<&str>) -> Session {
        let device = identity::detect(host);
        let location = host.location();
        let utm = identity::parse_utm(&location);
        let landing_page = landing_path
            .map(String::from)
            .unwrap_or_else(|| host::location_path(&location));

        let session = Session {
            session_id,
            started_at: now,
            ended_at: None,
            duration_seconds: None,
            device_type: device.device_type,
            browser: device.browser,
            browser_version: device.browser_version,
            os: device.os,
            screen_width: device.screen_width,
            screen_height: device.screen_height,
            referrer: host.referrer().filter(|r| !r.is_empty()),
            utm_source: utm.source,
            utm_medium: utm.medium,
            utm_campaign: utm.campaign,
            utm_term: utm.term,
            utm_content: utm.content,
            landing_page,
            is_new_visitor: self.mark_returning_visitor(),
            page_views: 0,
        };

        tracing::debug!(
            session_id = %session.session_id,
            landing_page = %session.landing_page,
            is_new_visitor = session.is_new_visitor,
            "Analytics session started"
        );
        session
    }

    /// Session record stored for this tab, if it belongs to `session_id`
    fn restore(&self, session_id: &str, now: DateTime<Utc>) -> Result<Option<Session>, StorageError> {
        let Some(raw) = self.tab_store.get(&self.state_key)? else {
            return Ok(None);
        };

        let stored: Session = serde_json::from_str(&raw).map_err(|_| StorageError::Corrupt {
            key: self.state_key.clone(),
        })?;
        if stored.session_id != session_id {
            return Ok(None);
        }
        if stored.started_at > now || stored.page_views < 0 {
            return Err(StorageError::Corrupt {
                key: self.state_key.clone(),
            });
        }
        Ok(Some(stored))
    }

    fn persist(&self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to encode session state");
                return;
            }
        };
        if let Err(e) = self.tab_store.set(&self.state_key, &raw) {
            tracing::debug!(error = %e, "Failed to persist session state");
        }
    }

    /// Whether this is the visitor's first session; sets the durable marker
    fn mark_returning_visitor(&self) -> bool {
        match self.durable_store.get(&self.visitor_key) {
            Ok(Some(_)) => false,
            Ok(None) => {
                if let Err(e) = self.durable_store.set(&self.visitor_key, "true") {
                    tracing::warn!(error = %e, "Failed to persist returning visitor marker");
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Durable storage unavailable, treating visitor as new");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticHost;
    use crate::models::DeviceType;
    use crate::storage::{MemoryStore, UnavailableStore};
    use chrono::Duration;

    fn manager(tab: Arc<dyn KeyValueStore>, durable: Arc<dyn KeyValueStore>) -> SessionLifecycleManager {
        SessionLifecycleManager::new(&AnalyticsConfig::default(), tab, durable)
    }

    fn landing_host() -> StaticHost {
        StaticHost::new()
            .with_user_agent("Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1")
            .with_screen(390, 844)
            .with_referrer("https://www.google.com/")
            .with_location("https://studio.example/weddings?utm_source=google&utm_medium=cpc")
    }

    #[test]
    fn test_start_builds_session() {
        let mut sessions = manager(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
        let session = sessions.start(&landing_host(), Utc::now(), None).unwrap();

        assert_eq!(session.device_type, DeviceType::Mobile);
        assert_eq!(session.landing_page, "/weddings");
        assert_eq!(session.utm_source.as_deref(), Some("google"));
        assert_eq!(session.utm_medium.as_deref(), Some("cpc"));
        assert_eq!(session.utm_campaign, None);
        assert_eq!(session.referrer.as_deref(), Some("https://www.google.com/"));
        assert!(session.is_new_visitor);
        assert_eq!(session.page_views, 0);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut sessions = manager(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
        let t0 = Utc::now();

        let first = sessions.start(&landing_host(), t0, None).unwrap();
        assert!(sessions.start(&landing_host(), t0 + Duration::seconds(10), None).is_none());
        assert_eq!(sessions.session().unwrap().started_at, first.started_at);
    }

    #[test]
    fn test_reload_restores_stored_session() {
        let tab: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let t0 = Utc::now();

        let mut first_load = manager(tab.clone(), durable.clone());
        let before = first_load.start(&landing_host(), t0, Some("/weddings/2025")).unwrap();
        first_load.note_page_view();
        first_load.note_page_view();

        let reloaded = landing_host().with_location("https://studio.example/book");
        let after = manager(tab, durable)
            .start(&reloaded, t0 + Duration::seconds(20), None)
            .unwrap();

        assert_eq!(before.session_id, after.session_id);
        assert_eq!(before.started_at, after.started_at);
        assert_eq!(after.landing_page, "/weddings/2025");
        assert_eq!(after.page_views, 2);
        assert!(before.is_new_visitor);
        assert!(after.is_new_visitor);
    }

    #[test]
    fn test_corrupt_state_starts_fresh_record() {
        let tab: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let config = AnalyticsConfig::default();
        tab.set(&config.session_storage_key, "1714658400000-abc123xyz").unwrap();
        tab.set(&config.session_state_key(), "{not json").unwrap();

        let now = Utc::now();
        let mut sessions = manager(tab.clone(), Arc::new(MemoryStore::new()));
        let session = sessions.start(&landing_host(), now, None).unwrap();

        assert_eq!(session.session_id, "1714658400000-abc123xyz");
        assert_eq!(session.started_at, now);
        assert_eq!(session.page_views, 0);

        let stored: Session = serde_json::from_str(&tab.get(&config.session_state_key()).unwrap().unwrap()).unwrap();
        assert_eq!(stored, session);
    }

    #[test]
    fn test_landing_page_from_first_routed_path() {
        let mut sessions = manager(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
        let session = sessions.start(&StaticHost::new(), Utc::now(), Some("/weddings")).unwrap();
        assert_eq!(session.landing_page, "/weddings");
    }

    #[test]
    fn test_returning_visitor_in_new_tab() {
        let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());

        let first = manager(Arc::new(MemoryStore::new()), durable.clone())
            .start(&landing_host(), Utc::now(), None)
            .unwrap();
        let second = manager(Arc::new(MemoryStore::new()), durable)
            .start(&landing_host(), Utc::now(), None)
            .unwrap();

        assert_ne!(first.session_id, second.session_id);
        assert!(first.is_new_visitor);
        assert!(!second.is_new_visitor);
    }

    #[test]
    fn test_record_exit_last_write_wins() {
        let mut sessions = manager(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        assert!(sessions.record_exit(t0).is_none());

        sessions.start(&landing_host(), t0, None);
        sessions.note_page_view();

        let hidden = sessions.record_exit(t0 + Duration::seconds(30)).unwrap();
        let closed = sessions.record_exit(t0 + Duration::seconds(75)).unwrap();

        assert_eq!(hidden.duration_seconds, 30);
        assert_eq!(closed.duration_seconds, 75);
        assert_eq!(closed.page_views, 1);
        assert_eq!(sessions.session().unwrap().duration_seconds, Some(75));
    }

    #[test]
    fn test_storage_failure_still_starts_session() {
        let mut sessions = manager(Arc::new(UnavailableStore), Arc::new(UnavailableStore));
        let session = sessions.start(&landing_host(), Utc::now(), None).unwrap();

        assert!(!session.session_id.is_empty());
        assert!(session.is_new_visitor);
    }
}
