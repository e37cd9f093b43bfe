//! The crawl state machine.
//!
//! One run walks the facet domain in order: filter to a year, drain its
//! pages, merge the records, persist, then move on. Progress is persisted
//! after every facet so the next invocation resumes where this one stopped.

use std::fmt;

use crate::context::{CrawlContext, SessionCounters};
use crate::error::HarvestError;
use crate::extract::ExtractionStrategy;
use crate::facet::{self, FacetDomain, FilterOutcome};
use crate::models::{MergeStats, Record, RecordSet};
use crate::paginate::{self, WalkSummary};
use crate::progress::CrawlProgress;
use crate::traits::{PageDriver, ProgressStore, RecordStore, WaitPolicy};

/// Why a session stopped before the domain was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitReason {
    MaxFacets,
    MaxNewItems,
    Cancelled,
}

impl fmt::Display for LimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitReason::MaxFacets => write!(f, "facet limit reached"),
            LimitReason::MaxNewItems => write!(f, "new item limit reached"),
            LimitReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Orchestrator states. Facet-scoped states carry the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Init,
    DiscoveringFacets,
    ResumingProgress,
    SelectingFacet(i32),
    FilteringApplied(i32),
    Walking(i32),
    Checkpointing(i32),
    SessionLimitReached(LimitReason),
    DomainExhausted,
    FatalAbort,
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    DomainExhausted,
    LimitReached(LimitReason),
}

impl fmt::Display for CrawlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlOutcome::DomainExhausted => write!(f, "all facets completed"),
            CrawlOutcome::LimitReached(reason) => write!(f, "stopped early: {reason}"),
        }
    }
}

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum CrawlEvent<'a> {
    Transition {
        state: CrawlState,
    },
    Loaded {
        records: usize,
        resumed: bool,
    },
    DomainResolved {
        domain: &'a FacetDomain,
    },
    Resumed {
        progress: &'a CrawlProgress,
    },
    FacetStarted {
        facet: i32,
        remaining: usize,
    },
    FacetSkipped {
        facet: i32,
        reason: &'a str,
    },
    PageWalked {
        facet: i32,
        page: usize,
        added: usize,
        updated: usize,
    },
    FacetFinished {
        summary: &'a WalkSummary,
        completed: bool,
    },
    Checkpointed {
        progress: &'a CrawlProgress,
    },
    Stopped {
        outcome: CrawlOutcome,
    },
    Aborted {
        error: &'a HarvestError,
    },
}

/// Trait for receiving crawl events (decoupled logging).
pub trait CrawlReporter: Send + Sync {
    fn report(&self, event: CrawlEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCrawlReporter;

impl CrawlReporter for TracingCrawlReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Transition { state } => {
                tracing::debug!(?state, "State transition");
            }
            CrawlEvent::Loaded { records, resumed } => {
                tracing::info!(records, resumed, "Loaded stored state");
            }
            CrawlEvent::DomainResolved { domain } => {
                tracing::info!(
                    years = domain.len(),
                    fallback = domain.is_fallback(),
                    "Facet domain resolved"
                );
            }
            CrawlEvent::Resumed { progress } => {
                tracing::info!(
                    current = ?progress.current,
                    completed = progress.completed_in_domain(),
                    remaining = progress.remaining(),
                    "Resuming crawl"
                );
            }
            CrawlEvent::FacetStarted { facet, remaining } => {
                tracing::info!(facet, remaining, "Crawling year");
            }
            CrawlEvent::FacetSkipped { facet, reason } => {
                tracing::warn!(facet, %reason, "Year skipped");
            }
            CrawlEvent::PageWalked {
                facet,
                page,
                added,
                updated,
            } => {
                tracing::info!(facet, page, added, updated, "Page merged");
            }
            CrawlEvent::FacetFinished { summary, completed } => {
                tracing::info!(
                    facet = summary.facet,
                    pages = summary.pages,
                    new = summary.new_records,
                    known = summary.known,
                    skipped = summary.rejected,
                    truncated = summary.truncated,
                    completed,
                    "Year finished"
                );
            }
            CrawlEvent::Checkpointed { progress } => {
                tracing::info!(
                    total_records = progress.total_records,
                    completed = progress.completed_in_domain(),
                    remaining = progress.remaining(),
                    "Progress saved"
                );
            }
            CrawlEvent::Stopped { outcome } => {
                tracing::info!(%outcome, "Crawl session ended");
            }
            CrawlEvent::Aborted { error } => {
                tracing::error!(%error, "Crawl aborted");
            }
        }
    }
}

/// Final accounting for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub outcome: CrawlOutcome,
    pub strategy: Option<ExtractionStrategy>,
    pub new_records: usize,
    pub updated_records: usize,
    pub total_records: usize,
    pub facets_completed_session: usize,
    pub facets_completed_total: usize,
    pub facets_remaining: usize,
    pub pages_walked: usize,
    pub soft_failures: usize,
}

/// Mutable state of one run, kept outside `self` so a fatal error can
/// still checkpoint it.
#[derive(Default)]
struct RunState {
    records: RecordSet,
    progress: Option<CrawlProgress>,
}

/// Drives one crawl session over a page driver and two stores.
pub struct CrawlOrchestrator<D, R, P>
where
    D: PageDriver,
    R: RecordStore,
    P: ProgressStore,
{
    ctx: CrawlContext<D>,
    record_store: R,
    progress_store: P,
}

impl<D, R, P> CrawlOrchestrator<D, R, P>
where
    D: PageDriver,
    R: RecordStore,
    P: ProgressStore,
{
    pub fn new(ctx: CrawlContext<D>, record_store: R, progress_store: P) -> Self {
        Self {
            ctx,
            record_store,
            progress_store,
        }
    }

    pub fn context(&self) -> &CrawlContext<D> {
        &self.ctx
    }

    pub fn into_context(self) -> CrawlContext<D> {
        self.ctx
    }

    /// Run one session until the domain is exhausted, a limit is hit, or a
    /// fatal error occurs.
    ///
    /// On a fatal error the latest progress is checkpointed with the error
    /// message before the error is returned.
    pub async fn run<CR: CrawlReporter>(
        &mut self,
        reporter: &CR,
    ) -> Result<CrawlSummary, HarvestError> {
        let mut run = RunState::default();
        match self.drive(&mut run, reporter).await {
            Ok(outcome) => {
                reporter.report(CrawlEvent::Stopped { outcome });
                Ok(self.summary(outcome, &run))
            }
            Err(error) => {
                self.enter(CrawlState::FatalAbort, reporter);
                reporter.report(CrawlEvent::Aborted { error: &error });
                self.save_after_abort(&mut run, &error).await;
                Err(error)
            }
        }
    }

    async fn drive<CR: CrawlReporter>(
        &mut self,
        run: &mut RunState,
        reporter: &CR,
    ) -> Result<CrawlOutcome, HarvestError> {
        self.enter(CrawlState::Init, reporter);
        let stored = self.progress_store.load().await?;
        run.records = self.record_store.load().await?;
        // an abort before resuming still stamps its error on the stored progress
        run.progress = stored.clone();
        reporter.report(CrawlEvent::Loaded {
            records: run.records.len(),
            resumed: stored.is_some(),
        });

        let listing = self.ctx.config.site.listing_url();
        self.ctx
            .driver
            .navigate(&listing, WaitPolicy::DomContentLoaded)
            .await
            .map_err(|source| HarvestError::LandingFailed {
                url: listing.clone(),
                source,
            })?;
        self.ctx.settle(self.ctx.config.delays.ui_settle).await;

        self.enter(CrawlState::DiscoveringFacets, reporter);
        let domain = facet::discover(&self.ctx).await?;
        reporter.report(CrawlEvent::DomainResolved { domain: &domain });

        self.enter(CrawlState::ResumingProgress, reporter);
        let progress = run
            .progress
            .insert(CrawlProgress::resume(stored, &domain));
        progress.session_new = 0;
        progress.last_error = None;
        reporter.report(CrawlEvent::Resumed {
            progress: &*progress,
        });
        self.persist(&run.records, progress, reporter).await?;

        let mut facets_this_session = 0;
        for year in progress.pending() {
            if self.ctx.is_cancelled() {
                return Ok(self.stop(LimitReason::Cancelled, reporter));
            }
            self.enter(CrawlState::SelectingFacet(year), reporter);
            progress.set_current(year);
            reporter.report(CrawlEvent::FacetStarted {
                facet: year,
                remaining: progress.remaining(),
            });

            let skipped = match facet::apply(&self.ctx, year).await {
                FilterOutcome::Applied => None,
                FilterOutcome::OptionMissing => Some("no filter option for this year".to_string()),
                FilterOutcome::Failed(e) if e.is_fatal() => return Err(e.into()),
                FilterOutcome::Failed(e) => Some(e.to_string()),
            };

            if let Some(reason) = skipped {
                // nothing to walk; the year counts as done with zero records
                reporter.report(CrawlEvent::FacetSkipped {
                    facet: year,
                    reason: &reason,
                });
                self.ctx.counters.soft_failures += 1;
                self.enter(CrawlState::Checkpointing(year), reporter);
                progress.mark_completed(year);
                self.ctx.counters.facets_completed += 1;
                facets_this_session += 1;
                self.persist(&run.records, progress, reporter).await?;
            } else {
                self.enter(CrawlState::FilteringApplied(year), reporter);
                self.enter(CrawlState::Walking(year), reporter);
                let (summary, stats) = self.walk_facet(year, &mut run.records, reporter).await?;

                self.enter(CrawlState::Checkpointing(year), reporter);
                self.ctx.counters.new_records += stats.added;
                self.ctx.counters.updated_records += stats.updated;
                if summary.soft_error.is_some() {
                    self.ctx.counters.soft_failures += 1;
                }
                let completed = !summary.interrupted;
                if completed {
                    progress.mark_completed(year);
                    self.ctx.counters.facets_completed += 1;
                    facets_this_session += 1;
                }
                reporter.report(CrawlEvent::FacetFinished {
                    summary: &summary,
                    completed,
                });
                self.persist(&run.records, progress, reporter).await?;
                if !completed {
                    return Ok(self.stop(LimitReason::Cancelled, reporter));
                }
            }

            if let Err(e) = facet::reset(&self.ctx).await {
                if e.is_fatal() {
                    return Err(e.into());
                }
                tracing::warn!(error = %e, "Could not reset filter");
            }

            if let Some(reason) = self.limit_reached(facets_this_session) {
                return Ok(self.stop(reason, reporter));
            }
        }

        self.enter(CrawlState::DomainExhausted, reporter);
        Ok(CrawlOutcome::DomainExhausted)
    }

    /// Drain one filtered facet into `records`, page by page.
    async fn walk_facet<CR: CrawlReporter>(
        &mut self,
        year: i32,
        records: &mut RecordSet,
        reporter: &CR,
    ) -> Result<(WalkSummary, MergeStats), HarvestError> {
        let index = records.index();
        let mut walk = paginate::walk(&mut self.ctx, year, &index);
        let mut total = MergeStats::default();
        while let Some(batch) = walk.next_page().await? {
            let stats = merge_batch(records, batch);
            total.added += stats.added;
            total.updated += stats.updated;
            reporter.report(CrawlEvent::PageWalked {
                facet: year,
                page: walk.summary().pages,
                added: stats.added,
                updated: stats.updated,
            });
        }
        Ok((walk.summary().clone(), total))
    }

    /// Save records first, then the progress that refers to them.
    async fn persist<CR: CrawlReporter>(
        &self,
        records: &RecordSet,
        progress: &mut CrawlProgress,
        reporter: &CR,
    ) -> Result<(), HarvestError> {
        progress.total_records = records.len();
        progress.session_new = self.ctx.counters.new_records;
        progress.touch();
        self.record_store.save(records).await?;
        self.progress_store.checkpoint(progress).await?;
        reporter.report(CrawlEvent::Checkpointed {
            progress: &*progress,
        });
        Ok(())
    }

    async fn save_after_abort(&self, run: &mut RunState, error: &HarvestError) {
        let Some(progress) = run.progress.as_mut() else {
            return;
        };
        progress.last_error = Some(error.to_string());
        progress.total_records = run.records.len();
        progress.session_new = self.ctx.counters.new_records;
        progress.touch();
        if let Err(e) = self.record_store.save(&run.records).await {
            tracing::error!(error = %e, "Failed to save records after abort");
        }
        if let Err(e) = self.progress_store.checkpoint(progress).await {
            tracing::error!(error = %e, "Failed to checkpoint after abort");
        }
    }

    fn limit_reached(&self, facets_this_session: usize) -> Option<LimitReason> {
        let limits = &self.ctx.config.limits;
        if self.ctx.is_cancelled() {
            return Some(LimitReason::Cancelled);
        }
        if limits.max_facets.is_some_and(|max| facets_this_session >= max) {
            return Some(LimitReason::MaxFacets);
        }
        if limits
            .max_new_items
            .is_some_and(|max| self.ctx.counters.new_records >= max)
        {
            return Some(LimitReason::MaxNewItems);
        }
        None
    }

    fn stop<CR: CrawlReporter>(&self, reason: LimitReason, reporter: &CR) -> CrawlOutcome {
        self.enter(CrawlState::SessionLimitReached(reason), reporter);
        CrawlOutcome::LimitReached(reason)
    }

    fn enter<CR: CrawlReporter>(&self, state: CrawlState, reporter: &CR) {
        reporter.report(CrawlEvent::Transition { state });
    }

    fn summary(&self, outcome: CrawlOutcome, run: &RunState) -> CrawlSummary {
        let SessionCounters {
            facets_completed,
            new_records,
            updated_records,
            pages_walked,
            soft_failures,
            ..
        } = self.ctx.counters;
        let (completed_total, remaining) = run
            .progress
            .as_ref()
            .map_or((0, 0), |p| (p.completed_in_domain(), p.remaining()));
        CrawlSummary {
            outcome,
            strategy: self.ctx.strategy.adopted(),
            new_records,
            updated_records,
            total_records: run.records.len(),
            facets_completed_session: facets_completed,
            facets_completed_total: completed_total,
            facets_remaining: remaining,
            pages_walked,
            soft_failures,
        }
    }
}

/// Merge one page batch; refreshed known records keep their stored details.
fn merge_batch(records: &mut RecordSet, mut batch: Vec<Record>) -> MergeStats {
    for record in &mut batch {
        if let Some(old) = records.get(&record.key) {
            record.refresh_from(old);
        }
    }
    records.merge(batch)
}
