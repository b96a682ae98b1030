//! Session identity, device detection and attribution parsing

use crate::host::Host;
use crate::models::{DeviceInfo, DeviceType, UtmParams};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;

const ID_SUFFIX_CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Tab-scoped session id slot
pub struct SessionIdentity {
    tab_store: Arc<dyn KeyValueStore>,
    key: String,
}

impl SessionIdentity {
    pub fn new(tab_store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        Self {
            tab_store,
            key: key.into(),
        }
    }

    /// Return the id stored for this tab, creating and storing one if needed.
    ///
    /// When the store cannot be read a fresh id is generated and kept only in
    /// memory by the caller, so every initialization gets a new one.
    pub fn get_or_create_id(&self, now: DateTime<Utc>) -> String {
        match self.tab_store.get(&self.key) {
            Ok(Some(id)) if !id.trim().is_empty() => return id,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Session storage unreadable, using in-memory session id");
                return generate_session_id(now);
            }
        }

        let id = generate_session_id(now);
        if let Err(e) = self.tab_store.set(&self.key, &id) {
            tracing::warn!(error = %e, "Failed to persist session id");
        }
        id
    }
}

/// Opaque id: millisecond timestamp prefix and a random base-36 suffix
pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_CHARSET[rng.gen_range(0..ID_SUFFIX_CHARSET.len())] as char)
        .collect();

    format!("{}-{}", now.timestamp_millis().max(0), suffix)
}

// ============================================
// Device Detection
// ============================================

/// Detect device class, browser, OS and screen size from the host
pub fn detect(host: &dyn Host) -> DeviceInfo {
    let ua = host.user_agent();
    let (browser, browser_version) = detect_browser(&ua);
    let (screen_width, screen_height) = host.screen_size();

    DeviceInfo {
        device_type: detect_device_type(&ua),
        browser,
        browser_version,
        os: detect_os(&ua),
        screen_width,
        screen_height,
    }
}

pub fn detect_device_type(user_agent: &str) -> DeviceType {
    let ua = user_agent.to_lowercase();

    let is_tablet = ["ipad", "tablet", "playbook", "silk"]
        .iter()
        .any(|p| ua.contains(p))
        || (ua.contains("android") && !ua.contains("mobi"));
    if is_tablet {
        return DeviceType::Tablet;
    }

    let is_mobile = [
        "mobile",
        "iphone",
        "ipod",
        "android",
        "blackberry",
        "iemobile",
        "opera mini",
        "opera mobi",
        "webos",
        "kindle",
    ]
    .iter()
    .any(|p| ua.contains(p));
    if is_mobile {
        return DeviceType::Mobile;
    }

    DeviceType::Desktop
}

/// Browser name and major version. Order matters: Edge and Opera also
/// advertise Chrome, and Chrome also advertises Safari.
pub fn detect_browser(user_agent: &str) -> (String, String) {
    const RULES: &[(&str, &str, &str)] = &[
        ("edg/", "Edge", "Edg/"),
        ("edge/", "Edge", "Edge/"),
        ("opr/", "Opera", "OPR/"),
        ("samsungbrowser/", "Samsung Internet", "SamsungBrowser/"),
        ("firefox/", "Firefox", "Firefox/"),
        ("fxios/", "Firefox", "FxiOS/"),
        ("crios/", "Chrome", "CriOS/"),
        ("chrome/", "Chrome", "Chrome/"),
        ("safari/", "Safari", "Version/"),
        ("msie ", "Internet Explorer", "MSIE "),
        ("trident/", "Internet Explorer", "rv:"),
    ];

    let lower = user_agent.to_lowercase();
    for (needle, name, version_token) in RULES {
        if lower.contains(needle) {
            let version = major_version(user_agent, version_token)
                .unwrap_or_else(|| "Unknown".to_string());
            return (name.to_string(), version);
        }
    }

    ("Unknown".to_string(), "Unknown".to_string())
}

pub fn detect_os(user_agent: &str) -> String {
    const RULES: &[(&[&str], &str)] = &[
        (&["windows"], "Windows"),
        (&["iphone", "ipad", "ipod"], "iOS"),
        (&["mac os", "macintosh"], "macOS"),
        (&["android"], "Android"),
        (&["cros"], "Chrome OS"),
        (&["linux"], "Linux"),
    ];

    let lower = user_agent.to_lowercase();
    RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn major_version(user_agent: &str, token: &str) -> Option<String> {
    let start = user_agent.find(token)? + token.len();
    let digits: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

// ============================================
// Attribution
// ============================================

/// Read utm_* parameters from a location. Missing or empty values are `None`.
pub fn parse_utm(location: &str) -> UtmParams {
    let query = match url::Url::parse(location) {
        Ok(parsed) => parsed.query().unwrap_or_default().to_string(),
        Err(_) => location
            .split_once('?')
            .map(|(_, q)| q.split('#').next().unwrap_or_default().to_string())
            .unwrap_or_default(),
    };

    let mut utm = UtmParams::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let slot = match key.as_ref() {
            "utm_source" => &mut utm.source,
            "utm_medium" => &mut utm.medium,
            "utm_campaign" => &mut utm.campaign,
            "utm_term" => &mut utm.term,
            "utm_content" => &mut utm.content,
            _ => continue,
        };
        // first occurrence wins, as URLSearchParams.get does
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }

    utm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StaticHost;
    use crate::storage::{MemoryStore, UnavailableStore};
    use std::collections::HashSet;

    const CHROME_MAC: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36";
    const SAFARI_IPHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
    const SAFARI_IPAD: &str = "Mozilla/5.0 (iPad; CPU OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";
    const EDGE_WINDOWS: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.2210.77";
    const FIREFOX_LINUX: &str = "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";
    const ANDROID_TABLET: &str = "Mozilla/5.0 (Linux; Android 13; SM-X700) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
    const ANDROID_PHONE: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";

    #[test]
    fn test_id_is_stable_within_tab() {
        let store = Arc::new(MemoryStore::new());
        let identity = SessionIdentity::new(store.clone(), "sid");

        let first = identity.get_or_create_id(Utc::now());
        let second = identity.get_or_create_id(Utc::now());

        assert_eq!(first, second);
        assert_eq!(store.get("sid").unwrap(), Some(first));
    }

    #[test]
    fn test_separate_tabs_get_separate_ids() {
        let now = Utc::now();
        let a = SessionIdentity::new(Arc::new(MemoryStore::new()), "sid").get_or_create_id(now);
        let b = SessionIdentity::new(Arc::new(MemoryStore::new()), "sid").get_or_create_id(now);
        assert_ne!(a, b);
    }

    #[test]
    fn test_unavailable_storage_falls_back_to_fresh_ids() {
        let identity = SessionIdentity::new(Arc::new(UnavailableStore), "sid");
        let first = identity.get_or_create_id(Utc::now());
        let second = identity.get_or_create_id(Utc::now());

        assert!(!first.is_empty());
        assert_ne!(first, second);
    }

    #[test]
    fn test_ids_unique_across_ten_thousand_tabs() {
        let now = Utc::now();
        let ids: HashSet<String> = (0..10_000).map(|_| generate_session_id(now)).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_id_shape() {
        let id = generate_session_id(Utc::now());
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert!(prefix.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), ID_SUFFIX_LEN);
    }

    #[test]
    fn test_device_detection() {
        assert_eq!(detect_device_type(CHROME_MAC), DeviceType::Desktop);
        assert_eq!(detect_device_type(SAFARI_IPHONE), DeviceType::Mobile);
        assert_eq!(detect_device_type(SAFARI_IPAD), DeviceType::Tablet);
        assert_eq!(detect_device_type(ANDROID_TABLET), DeviceType::Tablet);
        assert_eq!(detect_device_type(ANDROID_PHONE), DeviceType::Mobile);
        assert_eq!(detect_device_type(""), DeviceType::Desktop);
    }

    #[test]
    fn test_browser_detection() {
        assert_eq!(detect_browser(CHROME_MAC), ("Chrome".into(), "120".into()));
        assert_eq!(detect_browser(EDGE_WINDOWS), ("Edge".into(), "120".into()));
        assert_eq!(detect_browser(SAFARI_IPHONE), ("Safari".into(), "17".into()));
        assert_eq!(detect_browser(FIREFOX_LINUX), ("Firefox".into(), "121".into()));
        assert_eq!(detect_browser("curl/8.4.0"), ("Unknown".into(), "Unknown".into()));
    }

    #[test]
    fn test_os_detection() {
        assert_eq!(detect_os(CHROME_MAC), "macOS");
        assert_eq!(detect_os(SAFARI_IPAD), "iOS");
        assert_eq!(detect_os(EDGE_WINDOWS), "Windows");
        assert_eq!(detect_os(ANDROID_PHONE), "Android");
        assert_eq!(detect_os(FIREFOX_LINUX), "Linux");
        assert_eq!(detect_os("curl/8.4.0"), "Unknown");
    }

    #[test]
    fn test_detect_reads_host() {
        let host = StaticHost::new().with_user_agent(SAFARI_IPHONE).with_screen(390, 844);
        let info = detect(&host);

        assert_eq!(info.device_type, DeviceType::Mobile);
        assert_eq!(info.browser, "Safari");
        assert_eq!(info.os, "iOS");
        assert_eq!((info.screen_width, info.screen_height), (390, 844));
    }

    #[test]
    fn test_parse_utm_full_url() {
        let utm = parse_utm(
            "https://studio.example/weddings?utm_source=instagram&utm_medium=social&utm_campaign=spring%20minis",
        );

        assert_eq!(utm.source.as_deref(), Some("instagram"));
        assert_eq!(utm.medium.as_deref(), Some("social"));
        assert_eq!(utm.campaign.as_deref(), Some("spring minis"));
        assert_eq!(utm.term, None);
        assert_eq!(utm.content, None);
    }

    #[test]
    fn test_parse_utm_relative_and_empty_values() {
        let utm = parse_utm("/book?utm_source=&utm_term=headshots#top");
        assert_eq!(utm.source, None);
        assert_eq!(utm.term.as_deref(), Some("headshots"));

        assert_eq!(parse_utm("/"), UtmParams::default());
    }
}
