//! Facet domain discovery and the year filter control.
//!
//! The listing exposes a single filter (year) behind a dropdown button. The
//! discoverer reads the dropdown once per run to learn which years exist; the
//! filter helpers apply one year at a time and reset the listing afterwards.

use crate::config::ScanDirection;
use crate::context::CrawlContext;
use crate::error::DriverError;
use crate::traits::{DriverElement, Lookup, PageDriver, WaitPolicy};
use crate::util::parse_year_label;

/// Ordered, duplicate-free set of facet values for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetDomain {
    values: Vec<i32>,
    fallback: bool,
}

impl FacetDomain {
    pub fn from_values(values: impl IntoIterator<Item = i32>, direction: ScanDirection) -> Self {
        let mut values: Vec<i32> = values.into_iter().collect();
        values.sort_unstable();
        values.dedup();
        if direction == ScanDirection::Descending {
            values.reverse();
        }
        Self {
            values,
            fallback: false,
        }
    }

    /// The configured default range, used when discovery yields nothing.
    pub fn default_range((start, end): (i32, i32), direction: ScanDirection) -> Self {
        let mut domain = Self::from_values(start..=end, direction);
        domain.fallback = true;
        domain
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    pub fn first(&self) -> Option<i32> {
        self.values.first().copied()
    }

    pub fn contains(&self, year: i32) -> bool {
        self.values.contains(&year)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when this domain came from the default range.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }
}

/// Result of trying to filter the listing to one facet value.
#[derive(Debug)]
pub enum FilterOutcome {
    Applied,
    /// The dropdown had no option for this value.
    OptionMissing,
    Failed(DriverError),
}

/// Enumerate the years offered by the filter control.
///
/// Falls back to the configured default range when the control cannot be
/// used or offers no usable years. Only a lost driver session is an error.
pub async fn discover<D: PageDriver>(ctx: &CrawlContext<D>) -> Result<FacetDomain, DriverError> {
    let direction = ctx.config.direction;
    let fallback = || FacetDomain::default_range(ctx.config.default_domain, direction);

    match read_filter_options(ctx).await {
        Ok(years) if !years.is_empty() => {
            let domain = FacetDomain::from_values(years, direction);
            tracing::info!(years = ?domain.values(), "Discovered facet domain");
            Ok(domain)
        }
        Ok(_) => {
            let domain = fallback();
            tracing::warn!(
                years = ?domain.values(),
                "Filter control offered no usable years, using default domain"
            );
            Ok(domain)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            let domain = fallback();
            tracing::warn!(
                error = %e,
                years = ?domain.values(),
                "Facet discovery failed, using default domain"
            );
            Ok(domain)
        }
    }
}

async fn read_filter_options<D: PageDriver>(
    ctx: &CrawlContext<D>,
) -> Result<Vec<i32>, DriverError> {
    let site = &ctx.config.site;
    open_filter(ctx).await?;

    let result = async {
        ctx.driver
            .wait_for(&site.filter_option, ctx.config.delays.option_wait)
            .await?;
        let options = ctx.driver.query_all(&site.filter_option).await?;
        let mut years = Vec::with_capacity(options.len());
        for option in &options {
            let label = match option.text().await {
                Ok(label) => label,
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => continue,
            };
            if let Some(year) = parse_year_label(&label) {
                if ctx.config.bounds.contains(year) {
                    years.push(year);
                }
            }
        }
        Ok::<_, DriverError>(years)
    }
    .await;

    close_filter(ctx).await;
    result
}

/// Filter the listing to `year` and wait for its items to render.
pub async fn apply<D: PageDriver>(ctx: &CrawlContext<D>, year: i32) -> FilterOutcome {
    let site = &ctx.config.site;
    if let Err(e) = open_filter(ctx).await {
        return FilterOutcome::Failed(e);
    }

    if let Err(e) = ctx
        .driver
        .wait_for(&site.filter_option, ctx.config.delays.option_wait)
        .await
    {
        close_filter(ctx).await;
        return FilterOutcome::Failed(e);
    }

    let wanted = year.to_string();
    let option = match find_labelled(&ctx.driver, &site.filter_option, &wanted, true).await {
        Lookup::Found(option) => option,
        Lookup::NotFound => {
            close_filter(ctx).await;
            return FilterOutcome::OptionMissing;
        }
        Lookup::Transient(e) => {
            close_filter(ctx).await;
            return FilterOutcome::Failed(e);
        }
    };

    match option.scroll_into_view().await {
        Err(e) if e.is_fatal() => return FilterOutcome::Failed(e),
        _ => {}
    }
    if let Err(e) = option.click().await {
        close_filter(ctx).await;
        return FilterOutcome::Failed(e);
    }
    ctx.settle(ctx.config.delays.page_settle).await;

    match ctx
        .driver
        .wait_for(&site.item, ctx.config.delays.item_wait)
        .await
    {
        Ok(()) => FilterOutcome::Applied,
        Err(e) => FilterOutcome::Failed(e),
    }
}

/// Clear the active filter, re-navigating the listing if there is no reset button.
pub async fn reset<D: PageDriver>(ctx: &CrawlContext<D>) -> Result<(), DriverError> {
    let site = &ctx.config.site;
    match find_labelled(&ctx.driver, &site.filter_button, &site.reset_label, false).await {
        Lookup::Found(button) => {
            button.click().await?;
            ctx.settle(ctx.config.delays.ui_settle).await;
            tracing::debug!("Filter reset");
            Ok(())
        }
        Lookup::NotFound => {
            tracing::debug!("No reset button, reloading listing");
            ctx.driver
                .navigate(&site.listing_url(), WaitPolicy::DomContentLoaded)
                .await?;
            ctx.settle(ctx.config.delays.ui_settle).await;
            Ok(())
        }
        Lookup::Transient(e) => Err(e),
    }
}

async fn open_filter<D: PageDriver>(ctx: &CrawlContext<D>) -> Result<(), DriverError> {
    let site = &ctx.config.site;
    match find_labelled(&ctx.driver, &site.filter_button, &site.filter_label, false).await {
        Lookup::Found(button) => {
            button.click().await?;
            ctx.settle(ctx.config.delays.ui_settle).await;
            Ok(())
        }
        Lookup::NotFound => Err(DriverError::NotFound(format!(
            "{} labelled '{}'",
            site.filter_button, site.filter_label
        ))),
        Lookup::Transient(e) => Err(e),
    }
}

async fn close_filter<D: PageDriver>(ctx: &CrawlContext<D>) {
    if let Err(e) = ctx.driver.press_key("Escape").await {
        tracing::debug!(error = %e, "Could not close filter control");
    }
    ctx.settle(ctx.config.delays.ui_settle / 2).await;
}

/// First element under `selector` whose text matches `label`.
///
/// `exact` compares trimmed text; otherwise a case-insensitive substring
/// match is used, mirroring how buttons carry icons next to their label.
async fn find_labelled<D: PageDriver>(
    driver: &D,
    selector: &str,
    label: &str,
    exact: bool,
) -> Lookup<D::Element> {
    let elements = match driver.query_all(selector).await {
        Ok(elements) => elements,
        Err(e) => return Lookup::from(Err::<Option<D::Element>, _>(e)),
    };
    let needle = label.to_lowercase();
    for element in elements {
        let text = match element.text().await {
            Ok(text) => text,
            Err(e) if e.is_fatal() => return Lookup::Transient(e),
            Err(_) => continue,
        };
        let text = text.trim();
        let hit = if exact {
            text == label
        } else {
            text.to_lowercase().contains(&needle)
        };
        if hit {
            return Lookup::Found(element);
        }
    }
    Lookup::NotFound
}
