//! Scroll depth and click collectors

use super::page_view::PageViewTracker;

/// Scroll position and document geometry at one scroll event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_y: f64,
    pub document_height: f64,
    pub viewport_height: f64,
}

impl ScrollMetrics {
    /// Percentage of the scrollable height reached, clamped to 0..=100.
    /// A page that cannot scroll reports 0.
    pub fn percent(&self) -> f64 {
        let scrollable = self.document_height - self.viewport_height;
        if !scrollable.is_finite() || scrollable <= 0.0 || !self.scroll_y.is_finite() {
            return 0.0;
        }
        (self.scroll_y * 100.0 / scrollable).clamp(0.0, 100.0)
    }
}

/// Coalesces scroll events so at most one depth computation runs per frame
#[derive(Debug, Default)]
pub struct ScrollSampler {
    pending: Option<ScrollMetrics>,
}

impl ScrollSampler {
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) {
        self.pending = Some(metrics);
    }

    pub fn on_frame(&mut self) -> Option<f64> {
        self.pending.take().map(|m| m.percent())
    }

    pub fn reset(&mut self) {
        self.pending = None;
    }
}

/// Feeds scroll and click signals into whichever page view is open
#[derive(Debug, Default)]
pub struct EngagementCollectors {
    sampler: ScrollSampler,
}

impl EngagementCollectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scroll(&mut self, metrics: ScrollMetrics) {
        self.sampler.on_scroll(metrics);
    }

    pub fn frame(&mut self, pages: &mut PageViewTracker) {
        if let Some(percent) = self.sampler.on_frame() {
            pages.record_scroll(percent);
        }
    }

    pub fn click(&mut self, pages: &mut PageViewTracker) {
        pages.record_click();
    }

    /// Drop a sample taken on the previous page
    pub fn reset(&mut self) {
        self.sampler.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(scroll_y: f64) -> ScrollMetrics {
        ScrollMetrics {
            scroll_y,
            document_height: 3000.0,
            viewport_height: 1000.0,
        }
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(at(0.0).percent(), 0.0);
        assert_eq!(at(1000.0).percent(), 50.0);
        assert_eq!(at(2000.0).percent(), 100.0);
        assert_eq!(at(2600.0).percent(), 100.0);
        assert_eq!(at(-40.0).percent(), 0.0);
        assert_eq!(at(f64::NAN).percent(), 0.0);
    }

    #[test]
    fn test_short_page_reports_zero() {
        let metrics = ScrollMetrics {
            scroll_y: 0.0,
            document_height: 800.0,
            viewport_height: 1000.0,
        };
        assert_eq!(metrics.percent(), 0.0);
    }

    #[test]
    fn test_sampler_coalesces_to_latest_per_frame() {
        let mut sampler = ScrollSampler::default();
        sampler.on_scroll(at(200.0));
        sampler.on_scroll(at(400.0));
        sampler.on_scroll(at(600.0));

        assert_eq!(sampler.on_frame(), Some(30.0));
        assert_eq!(sampler.on_frame(), None);
    }

    #[test]
    fn test_reset_discards_pending_sample() {
        let mut sampler = ScrollSampler::default();
        sampler.on_scroll(at(600.0));
        sampler.reset();
        assert_eq!(sampler.on_frame(), None);
    }
}
