use std::future::Future;
use std::time::Duration;

use crate::error::{DriverError, HarvestError};
use crate::models::RecordSet;
use crate::progress::CrawlProgress;

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// DOM parsed; client-side rendering may still be running.
    #[default]
    DomContentLoaded,
    /// Full `load` event.
    Load,
}

/// A live element handle owned by a [`PageDriver`].
pub trait DriverElement: Send + Sync + Sized {
    fn click(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Attribute value, `None` if the attribute is absent.
    fn attribute(&self, name: &str)
    -> impl Future<Output = Result<Option<String>, DriverError>> + Send;

    /// Rendered inner text.
    fn text(&self) -> impl Future<Output = Result<String, DriverError>> + Send;

    fn scroll_into_view(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// First descendant matching `selector`.
    fn query_single(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<Self>, DriverError>> + Send;

    /// All descendants matching `selector`.
    fn query_all(&self, selector: &str)
    -> impl Future<Output = Result<Vec<Self>, DriverError>> + Send;
}

/// Navigates and queries a rendered page.
///
/// Implemented by the headless-browser client and by the scripted test
/// driver. Every call is fallible and time-boxed by the implementation.
pub trait PageDriver: Send + Sync + Sized {
    type Element: DriverElement;

    fn navigate(
        &self,
        url: &str,
        wait: WaitPolicy,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn query_single(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Option<Self::Element>, DriverError>> + Send;

    fn query_all(
        &self,
        selector: &str,
    ) -> impl Future<Output = Result<Vec<Self::Element>, DriverError>> + Send;

    /// Evaluate a script in the page and return its JSON result.
    ///
    /// `undefined` results come back as `Value::Null`.
    fn evaluate(
        &self,
        script: &str,
    ) -> impl Future<Output = Result<serde_json::Value, DriverError>> + Send;

    /// Wait until `selector` matches at least one element.
    fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Send a key press to the focused document (e.g. `"Escape"`).
    fn press_key(&self, key: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Open a short-lived page in the same browser session.
    fn open_auxiliary(&self) -> impl Future<Output = Result<Self, DriverError>> + Send;

    /// Close this page. Errors are swallowed by implementations.
    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Outcome of an optional UI lookup.
///
/// Missing elements are normal control flow on a client-rendered page, so
/// they are values rather than errors.
#[derive(Debug)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Transient(DriverError),
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Result<Option<T>, DriverError>> for Lookup<T> {
    fn from(result: Result<Option<T>, DriverError>) -> Self {
        match result {
            Ok(Some(v)) => Lookup::Found(v),
            Ok(None) | Err(DriverError::NotFound(_)) => Lookup::NotFound,
            Err(e) => Lookup::Transient(e),
        }
    }
}

/// Persists the harvested record collection.
pub trait RecordStore: Send + Sync {
    /// Load every stored record. A missing document is an empty set.
    fn load(&self) -> impl Future<Output = Result<RecordSet, HarvestError>> + Send;

    /// Replace the stored collection atomically.
    fn save(&self, records: &RecordSet) -> impl Future<Output = Result<(), HarvestError>> + Send;
}

/// Persists the crawl cursor between invocations.
pub trait ProgressStore: Send + Sync {
    /// Stored progress, `None` on a first run.
    fn load(&self) -> impl Future<Output = Result<Option<CrawlProgress>, HarvestError>> + Send;

    /// Replace the stored progress atomically.
    fn checkpoint(
        &self,
        progress: &CrawlProgress,
    ) -> impl Future<Output = Result<(), HarvestError>> + Send;
}
