//! Extraction strategies: turn the currently rendered listing page into records.
//!
//! Two variants exist. Structured extraction reads the page's client-side
//! state in one script evaluation; DOM extraction parses each rendered card
//! and can follow the card to its detail view. They are tried in a fixed
//! order once per run and the first that yields items is kept for the rest of
//! the run. Both produce identically shaped [`Record`]s.

pub mod dom;
pub mod structured;

use std::fmt;

use crate::config::StrategyPreference;
use crate::context::CrawlContext;
use crate::error::DriverError;
use crate::models::Record;
use crate::traits::PageDriver;

/// The two ways of reading a listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    Structured,
    Dom,
}

impl ExtractionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStrategy::Structured => "structured",
            ExtractionStrategy::Dom => "dom",
        }
    }

    /// Whether new items from this strategy still need a detail fetch.
    pub fn needs_detail_fetch(&self) -> bool {
        matches!(self, ExtractionStrategy::Dom)
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Picks the strategy for the run and remembers the one that worked.
#[derive(Debug, Clone)]
pub struct StrategySelector {
    preference: StrategyPreference,
    adopted: Option<ExtractionStrategy>,
}

impl StrategySelector {
    pub fn new(preference: StrategyPreference) -> Self {
        Self {
            preference,
            adopted: None,
        }
    }

    pub fn adopted(&self) -> Option<ExtractionStrategy> {
        self.adopted
    }

    /// Strategies to try on the next page, in priority order.
    pub fn candidates(&self) -> Vec<ExtractionStrategy> {
        if let Some(adopted) = self.adopted {
            return vec![adopted];
        }
        match self.preference {
            StrategyPreference::Auto => {
                vec![ExtractionStrategy::Structured, ExtractionStrategy::Dom]
            }
            StrategyPreference::Structured => vec![ExtractionStrategy::Structured],
            StrategyPreference::Dom => vec![ExtractionStrategy::Dom],
        }
    }

    fn adopt(&mut self, strategy: ExtractionStrategy) {
        if self.adopted.is_none() {
            tracing::info!(%strategy, "Adopted extraction strategy for this run");
            self.adopted = Some(strategy);
        }
    }
}

/// Cheaply extracted records for one listing page.
#[derive(Debug, Default)]
pub struct PageExtraction {
    pub strategy: Option<ExtractionStrategy>,
    pub records: Vec<Record>,
    /// Items seen on the page that could not be turned into a record.
    pub rejected: usize,
    /// Items dropped because they belong to a different facet value.
    pub off_facet: usize,
}

impl PageExtraction {
    /// True when no strategy found any item on the page.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.rejected == 0 && self.off_facet == 0
    }
}

/// Read the current page with the adopted strategy, or try each candidate.
///
/// A strategy counts as working once it sees at least one item. Non-fatal
/// failures of a candidate move on to the next one; a lost session is
/// returned as an error.
pub async fn extract_page<D: PageDriver>(
    ctx: &mut CrawlContext<D>,
    facet: i32,
) -> Result<PageExtraction, DriverError> {
    let mut last_error = None;
    for strategy in ctx.strategy.candidates() {
        let attempt = match strategy {
            ExtractionStrategy::Structured => structured::extract(ctx, facet).await,
            ExtractionStrategy::Dom => dom::extract_cards(ctx, facet).await,
        };
        match attempt {
            Ok(Some(mut page)) if !page.is_empty() => {
                ctx.strategy.adopt(strategy);
                page.strategy = Some(strategy);
                return Ok(page);
            }
            Ok(_) => {
                tracing::debug!(%strategy, "Strategy found no items on this page");
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(%strategy, error = %e, "Strategy failed on this page");
                last_error = Some(e);
            }
        }
    }
    match last_error {
        // only an error when nothing could even look at the page
        Some(e) if ctx.strategy.adopted().is_some() => Err(e),
        _ => Ok(PageExtraction::default()),
    }
}
