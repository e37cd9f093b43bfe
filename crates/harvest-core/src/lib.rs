pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod facet;
pub mod models;
pub mod orchestrator;
pub mod paginate;
pub mod progress;
pub mod store;
pub mod traits;
pub mod util;

#[cfg(test)]
pub mod testutil;

pub use config::{
    CrawlConfig, Delays, FacetBounds, KnownItemPolicy, ScanDirection, SessionLimits, SiteProfile,
    StrategyPreference,
};
pub use context::{CrawlContext, SessionCounters};
pub use error::{DriverError, HarvestError};
pub use extract::ExtractionStrategy;
pub use facet::FacetDomain;
pub use models::{Record, RecordSet};
pub use orchestrator::{
    CrawlEvent, CrawlOrchestrator, CrawlOutcome, CrawlReporter, CrawlState, CrawlSummary,
    LimitReason, TracingCrawlReporter,
};
pub use progress::CrawlProgress;
pub use store::{JsonProgressStore, JsonRecordStore};
pub use traits::{DriverElement, Lookup, PageDriver, ProgressStore, RecordStore, WaitPolicy};
