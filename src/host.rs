//! Host page environment
//!
//! Everything the engine reads from the browser besides storage goes through
//! [`Host`]. [`StaticHost`] is a settable snapshot used by native hosts and
//! tests.

use std::sync::RwLock;

/// Navigation timing entry for the initial document load, in milliseconds
/// relative to the time origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub load_event_end: f64,
}

impl NavigationTiming {
    /// Load duration, or `None` when the entry is incomplete or nonsensical
    pub fn load_time_ms(&self) -> Option<i64> {
        let elapsed = self.load_event_end - self.navigation_start;
        if elapsed.is_finite() && elapsed > 0.0 && self.load_event_end > 0.0 {
            Some(elapsed.round() as i64)
        } else {
            None
        }
    }
}

pub trait Host: Send + Sync {
    fn user_agent(&self) -> String;
    fn screen_size(&self) -> (u32, u32);
    fn referrer(&self) -> Option<String>;
    /// Current location: a full URL or a path with optional query string
    fn location(&self) -> String;
    fn document_title(&self) -> Option<String>;
    fn navigation_timing(&self) -> Option<NavigationTiming>;
}

/// Path part of a location, without query string or fragment
pub fn location_path(location: &str) -> String {
    if let Ok(parsed) = url::Url::parse(location) {
        return parsed.path().to_string();
    }

    let end = location.find(['?', '#']).unwrap_or(location.len());
    let path = &location[..end];
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

#[derive(Debug, Clone)]
struct HostSnapshot {
    user_agent: String,
    screen: (u32, u32),
    referrer: Option<String>,
    location: String,
    title: Option<String>,
    timing: Option<NavigationTiming>,
}

/// Host whose values are set explicitly
#[derive(Debug)]
pub struct StaticHost {
    snapshot: RwLock<HostSnapshot>,
}

impl Default for StaticHost {
    fn default() -> Self {
        Self {
            snapshot: RwLock::new(HostSnapshot {
                user_agent: String::new(),
                screen: (0, 0),
                referrer: None,
                location: "/".into(),
                title: None,
                timing: None,
            }),
        }
    }
}

impl StaticHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(self, user_agent: impl Into<String>) -> Self {
        self.update(|s| s.user_agent = user_agent.into());
        self
    }

    pub fn with_screen(self, width: u32, height: u32) -> Self {
        self.update(|s| s.screen = (width, height));
        self
    }

    pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
        self.update(|s| s.referrer = Some(referrer.into()));
        self
    }

    pub fn with_location(self, location: impl Into<String>) -> Self {
        self.set_location(location);
        self
    }

    pub fn with_navigation_timing(self, timing: NavigationTiming) -> Self {
        self.update(|s| s.timing = Some(timing));
        self
    }

    pub fn set_location(&self, location: impl Into<String>) {
        self.update(|s| s.location = location.into());
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.update(|s| s.title = Some(title.into()));
    }

    fn update(&self, f: impl FnOnce(&mut HostSnapshot)) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            f(&mut snapshot);
        }
    }

    fn read<T>(&self, f: impl FnOnce(&HostSnapshot) -> T, fallback: T) -> T {
        self.snapshot.read().map(|s| f(&s)).unwrap_or(fallback)
    }
}

impl Host for StaticHost {
    fn user_agent(&self) -> String {
        self.read(|s| s.user_agent.clone(), String::new())
    }

    fn screen_size(&self) -> (u32, u32) {
        self.read(|s| s.screen, (0, 0))
    }

    fn referrer(&self) -> Option<String> {
        self.read(|s| s.referrer.clone(), None)
    }

    fn location(&self) -> String {
        self.read(|s| s.location.clone(), "/".to_string())
    }

    fn document_title(&self) -> Option<String> {
        self.read(|s| s.title.clone(), None)
    }

    fn navigation_timing(&self) -> Option<NavigationTiming> {
        self.read(|s| s.timing, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_path() {
        assert_eq!(location_path("https://studio.example/portfolio?utm_source=x"), "/portfolio");
        assert_eq!(location_path("/book?utm_source=x#form"), "/book");
        assert_eq!(location_path("?utm_source=x"), "/");
        assert_eq!(location_path("/"), "/");
    }

    #[test]
    fn test_load_time_guards() {
        let ok = NavigationTiming { navigation_start: 0.0, load_event_end: 812.4 };
        assert_eq!(ok.load_time_ms(), Some(812));

        let pending = NavigationTiming { navigation_start: 0.0, load_event_end: 0.0 };
        assert_eq!(pending.load_time_ms(), None);

        let broken = NavigationTiming { navigation_start: f64::NAN, load_event_end: 100.0 };
        assert_eq!(broken.load_time_ms(), None);
    }

    #[test]
    fn test_static_host_updates() {
        let host = StaticHost::new().with_screen(1440, 900).with_location("/gallery");
        host.set_title("Gallery");

        assert_eq!(host.screen_size(), (1440, 900));
        assert_eq!(host.location(), "/gallery");
        assert_eq!(host.document_title().as_deref(), Some("Gallery"));
    }
}
