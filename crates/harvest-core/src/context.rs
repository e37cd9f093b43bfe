use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::CrawlConfig;
use crate::extract::StrategySelector;
use crate::traits::PageDriver;

/// Counters accumulated over one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub facets_completed: usize,
    pub new_records: usize,
    pub updated_records: usize,
    pub known_items: usize,
    pub pages_walked: usize,
    pub soft_failures: usize,
}

/// Explicit run state handed to every component.
///
/// Holds the single driver session, the configuration, session counters,
/// the adopted extraction strategy and the run-level cancellation token.
pub struct CrawlContext<D: PageDriver> {
    pub driver: D,
    pub config: CrawlConfig,
    pub counters: SessionCounters,
    pub strategy: StrategySelector,
    pub cancel: CancellationToken,
}

impl<D: PageDriver> CrawlContext<D> {
    pub fn new(driver: D, config: CrawlConfig) -> Self {
        let strategy = StrategySelector::new(config.strategy);
        Self {
            driver,
            config,
            counters: SessionCounters::default(),
            strategy,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token (Ctrl-C handler, deadline timer).
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Let client-side rendering settle. Returns early on cancellation.
    pub async fn settle(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = self.cancel.cancelled() => {}
        }
    }
}
