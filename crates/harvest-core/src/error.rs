use thiserror::Error;

/// Failures surfaced by a page driver.
///
/// Every driver call is time-boxed and fallible. Only [`DriverError::SessionLost`]
/// and [`DriverError::Launch`] are fatal; everything else is a soft failure the
/// crawl logs and steps around.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A selector matched nothing where something was required.
    #[error("Element not found: {0}")]
    NotFound(String),

    /// The driver gave up waiting.
    #[error("Driver call timed out after {0} ms")]
    Timeout(u64),

    /// Navigation to a URL failed.
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// In-page script evaluation failed.
    #[error("Script error: {0}")]
    Script(String),

    /// Click, key press or attribute read failed on a live element.
    #[error("Interaction error: {0}")]
    Interaction(String),

    /// The browser session or its connection is gone.
    #[error("Driver session lost: {0}")]
    SessionLost(String),

    /// The browser could not be started at all.
    #[error("Failed to launch driver: {0}")]
    Launch(String),
}

impl DriverError {
    /// Returns true if the run cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_) | DriverError::Launch(_))
    }
}

/// Application-wide error types for the harvester.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Page driver failure that escaped soft handling.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// The listing page never loaded, so nothing can be crawled.
    #[error("Landing page {url} failed to load: {source}")]
    LandingFailed { url: String, source: DriverError },

    /// Reading or writing persisted state failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl HarvestError {
    /// Returns true if the orchestrator must abort the run on this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            HarvestError::Driver(e) => e.is_fatal(),
            HarvestError::LandingFailed { .. }
            | HarvestError::Io(_)
            | HarvestError::Serialization(_)
            | HarvestError::Config(_) => true,
        }
    }
}
