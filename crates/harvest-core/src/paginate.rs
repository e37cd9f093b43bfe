use std::collections::HashSet;

use crate::config::KnownItemPolicy;
use crate::context::CrawlContext;
use crate::error::DriverError;
use crate::extract::{self, dom};
use crate::models::{DedupIndex, Record};
use crate::traits::{DriverElement, Lookup, PageDriver};

/// What happened while walking one facet value.
#[derive(Debug, Clone, Default)]
pub struct WalkSummary {
    pub facet: i32,
    pub pages: usize,
    pub new_records: usize,
    /// Items whose key was already stored.
    pub known: usize,
    /// Known items re-emitted under [`KnownItemPolicy::Refresh`].
    pub refreshed: usize,
    pub rejected: usize,
    pub off_facet: usize,
    /// Stopped at the page bound while a next page still existed.
    pub truncated: bool,
    /// Stopped by cancellation before the facet was exhausted.
    pub interrupted: bool,
    /// Non-fatal failure that ended the walk early.
    pub soft_error: Option<DriverError>,
}

/// Start walking the filtered listing for `facet` from its first page.
pub fn walk<'a, D: PageDriver>(
    ctx: &'a mut CrawlContext<D>,
    facet: i32,
    index: &'a DedupIndex,
) -> FacetWalk<'a, D> {
    FacetWalk::new(ctx, facet, index)
}

/// Lazy walk over the pages of one filtered listing.
///
/// Each [`FacetWalk::next_page`] call processes one page and advances the
/// pager. The dedup index is read-only for the whole walk.
pub struct FacetWalk<'a, D: PageDriver> {
    ctx: &'a mut CrawlContext<D>,
    index: &'a DedupIndex,
    seen: HashSet<String>,
    summary: WalkSummary,
    done: bool,
}

impl<'a, D: PageDriver> FacetWalk<'a, D> {
    pub fn new(ctx: &'a mut CrawlContext<D>, facet: i32, index: &'a DedupIndex) -> Self {
        Self {
            ctx,
            index,
            seen: HashSet::new(),
            summary: WalkSummary {
                facet,
                ..WalkSummary::default()
            },
            done: false,
        }
    }

    pub fn summary(&self) -> &WalkSummary {
        &self.summary
    }

    /// Process the current page and advance.
    ///
    /// Returns the page's records to merge, or `None` once the facet is
    /// finished. Only a lost driver session is an error.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>, DriverError> {
        if self.done {
            return Ok(None);
        }
        if self.ctx.is_cancelled() {
            self.summary.interrupted = true;
            self.done = true;
            return Ok(None);
        }

        let facet = self.summary.facet;
        let page_no = self.summary.pages + 1;
        let item_wait = self.ctx.config.delays.item_wait;
        if let Err(e) = self
            .ctx
            .driver
            .wait_for(&self.ctx.config.site.item, item_wait)
            .await
        {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::debug!(facet, page = page_no, error = %e, "No items rendered");
            self.done = true;
            return Ok(None);
        }

        let extraction = match extract::extract_page(self.ctx, facet).await {
            Ok(extraction) => extraction,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(facet, page = page_no, error = %e, "Page extraction failed");
                self.summary.soft_error = Some(e);
                self.done = true;
                return Ok(None);
            }
        };
        if extraction.is_empty() {
            tracing::info!(facet, page = page_no, "No items on page");
            self.done = true;
            return Ok(None);
        }

        self.summary.pages = page_no;
        self.summary.rejected += extraction.rejected;
        self.summary.off_facet += extraction.off_facet;
        self.ctx.counters.pages_walked += 1;
        tracing::info!(
            facet,
            page = page_no,
            items = extraction.records.len(),
            "Processing page"
        );

        let detail_fetch = self.ctx.config.fetch_details
            && extraction.strategy.is_some_and(|s| s.needs_detail_fetch());
        let mut batch = Vec::with_capacity(extraction.records.len());
        for mut record in extraction.records {
            if !self.seen.insert(record.key.clone()) {
                continue;
            }
            if self.index.contains(&record.key) {
                self.summary.known += 1;
                self.ctx.counters.known_items += 1;
                if self.ctx.config.known_items == KnownItemPolicy::Refresh {
                    self.summary.refreshed += 1;
                    batch.push(record);
                }
                continue;
            }
            if detail_fetch {
                // an unenriched record would never be revisited once stored
                if self.ctx.is_cancelled() {
                    self.summary.interrupted = true;
                    self.done = true;
                    break;
                }
                dom::enrich(self.ctx, &mut record).await?;
            }
            tracing::debug!(facet, title = %record.title, "New record");
            self.summary.new_records += 1;
            batch.push(record);
        }

        if !self.done {
            self.advance(page_no).await?;
        }
        Ok(Some(batch))
    }

    /// Drain the walk, returning every emitted record and the summary.
    pub async fn collect(mut self) -> Result<(Vec<Record>, WalkSummary), DriverError> {
        let mut records = Vec::new();
        while let Some(batch) = self.next_page().await? {
            records.extend(batch);
        }
        Ok((records, self.summary))
    }

    async fn advance(&mut self, page_no: usize) -> Result<(), DriverError> {
        let next = match self.find_next().await {
            Lookup::Found(next) => next,
            Lookup::NotFound => {
                tracing::info!(facet = self.summary.facet, pages = page_no, "Reached last page");
                self.done = true;
                return Ok(());
            }
            Lookup::Transient(e) if e.is_fatal() => return Err(e),
            Lookup::Transient(e) => {
                tracing::info!(facet = self.summary.facet, error = %e, "No next page");
                self.done = true;
                return Ok(());
            }
        };

        if page_no >= self.ctx.config.max_pages_per_facet {
            tracing::warn!(
                facet = self.summary.facet,
                max_pages = self.ctx.config.max_pages_per_facet,
                "Page bound reached, treating facet as complete"
            );
            self.summary.truncated = true;
            self.done = true;
            return Ok(());
        }

        if let Err(e) = next.click().await {
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(facet = self.summary.facet, error = %e, "Could not change page");
            self.summary.soft_error = Some(e);
            self.done = true;
            return Ok(());
        }
        self.ctx.settle(self.ctx.config.delays.page_settle).await;
        Ok(())
    }

    /// The enabled pager button carrying the "next" icon.
    async fn find_next(&self) -> Lookup<D::Element> {
        let site = &self.ctx.config.site;
        let buttons = match self.ctx.driver.query_all(&site.pagination_button).await {
            Ok(buttons) => buttons,
            Err(e) => return Lookup::from(Err::<Option<D::Element>, _>(e)),
        };
        for button in buttons {
            match Lookup::from(button.query_single(&site.next_icon).await) {
                Lookup::Found(_) => {}
                Lookup::Transient(e) if e.is_fatal() => return Lookup::Transient(e),
                _ => continue,
            }
            let disabled = matches!(button.attribute("disabled").await, Ok(Some(_)))
                || matches!(
                    button.attribute("class").await,
                    Ok(Some(class)) if class.contains("--disabled")
                );
            if !disabled {
                return Lookup::Found(button);
            }
        }
        Lookup::NotFound
    }
}
