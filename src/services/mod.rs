//! Analytics Services

pub mod engagement;
pub mod page_view;
pub mod pipeline;
pub mod session;

pub use engagement::{EngagementCollectors, ScrollMetrics, ScrollSampler};
pub use page_view::{PageChange, PageViewTracker};
pub use pipeline::{Dispatcher, EventPipeline};
pub use session::SessionLifecycleManager;
