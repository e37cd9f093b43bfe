use crate::context::CrawlContext;
use crate::error::DriverError;
use crate::extract::PageExtraction;
use crate::models::{Record, push_unique};
use crate::traits::{DriverElement, Lookup, PageDriver, WaitPolicy};
use crate::util::{join_url, parse_background_image, squash_whitespace, truncate_text};

const TYPE_TOKENS: &[&str] = &["TV", "MOVIE", "OVA", "ONA", "SPECIAL"];
const LOCALE_TOKENS: &[&str] = &["SUB", "DUB", "RAW", "JP", "EN"];

/// Parse every rendered item card on the current listing page.
///
/// Returns `Some` with an empty extraction when the page has no cards.
pub async fn extract_cards<D: PageDriver>(
    ctx: &CrawlContext<D>,
    facet: i32,
) -> Result<Option<PageExtraction>, DriverError> {
    let cards = ctx.driver.query_all(&ctx.config.site.item).await?;
    let mut page = PageExtraction::default();
    for (i, card) in cards.iter().enumerate() {
        match parse_card(ctx, card, facet).await {
            Ok(Some(record)) => {
                tracing::debug!(n = i + 1, title = %record.title, "Parsed card");
                page.records.push(record);
            }
            Ok(None) => page.rejected += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(n = i + 1, error = %e, "Card could not be read");
                page.rejected += 1;
            }
        }
    }
    Ok(Some(page))
}

/// Build a record from one card. `None` when the card has no detail link.
async fn parse_card<D: PageDriver>(
    ctx: &CrawlContext<D>,
    card: &D::Element,
    facet: i32,
) -> Result<Option<Record>, DriverError> {
    let site = &ctx.config.site;

    let Some(link) = Lookup::from(card.query_single(&site.item_link).await).found() else {
        return Ok(None);
    };
    let Some(href) = link.attribute("href").await? else {
        return Ok(None);
    };
    let Some(key) = join_url(&site.base_url, &href) else {
        return Ok(None);
    };

    let title = match Lookup::from(card.query_single(&site.item_title).await) {
        Lookup::Found(el) => el.text().await.unwrap_or_default(),
        _ => link.text().await.unwrap_or_default(),
    };
    let title = squash_whitespace(&title);
    let title = if title.is_empty() {
        "Untitled".to_string()
    } else {
        title
    };

    let mut record = Record::new(key, title);
    record.year = Some(facet);
    record.poster_url = card_poster(card, &site.item_poster, &site.base_url).await;

    if let Ok(badges) = card.query_all(&site.item_badge).await {
        for badge in &badges {
            if let Ok(text) = badge.text().await {
                classify_badge(ctx, &mut record, &text);
            }
        }
    }

    Ok(Some(record))
}

async fn card_poster<E: DriverElement>(card: &E, selector: &str, base_url: &str) -> Option<String> {
    let poster = Lookup::from(card.query_single(selector).await).found()?;
    let style = poster.attribute("style").await.ok()??;
    let path = parse_background_image(&style)?;
    join_url(base_url, &path)
}

/// Sort a badge into type, locale, duration or genre.
fn classify_badge<D: PageDriver>(ctx: &CrawlContext<D>, record: &mut Record, text: &str) {
    let token = squash_whitespace(text);
    if token.is_empty() {
        return;
    }
    let upper = token.to_uppercase();
    if TYPE_TOKENS.contains(&upper.as_str()) {
        record.kind.get_or_insert(token);
    } else if LOCALE_TOKENS.contains(&upper.as_str()) {
        push_unique(&mut record.locales, &token);
    } else if ctx.config.site.is_non_genre(&token) {
        if token.ends_with(['m', 'h']) && record.duration.is_none() {
            record.duration = Some(token);
        }
    } else {
        push_unique(&mut record.genres, &token);
    }
}

/// Fields harvested from an item's detail view.
#[derive(Debug, Default)]
struct DetailFields {
    synopsis: Option<String>,
    title_en: Option<String>,
    status: Option<String>,
    watch_href: Option<String>,
}

/// Follow a new record to its detail (and optionally watch) view.
///
/// Each navigation runs in its own auxiliary page that is closed before
/// returning. A failed navigation leaves its fields `None`; only a lost
/// session is returned as an error.
pub async fn enrich<D: PageDriver>(
    ctx: &CrawlContext<D>,
    record: &mut Record,
) -> Result<(), DriverError> {
    let detail = match on_auxiliary_page(ctx, &record.key, read_detail).await {
        Ok(detail) => detail,
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => {
            tracing::warn!(url = %record.key, error = %e, "Detail view unavailable");
            return Ok(());
        }
    };

    record.synopsis = detail
        .synopsis
        .map(|s| truncate_text(&s, ctx.config.synopsis_cap));
    if record.title_en.is_none() {
        record.title_en = detail.title_en.filter(|en| *en != record.title);
    }
    if record.status.is_none() {
        record.status = detail.status;
    }

    if !ctx.config.fetch_watch {
        return Ok(());
    }
    let Some(watch_url) = detail
        .watch_href
        .and_then(|href| join_url(&record.key, &href))
    else {
        return Ok(());
    };
    match on_auxiliary_page(ctx, &watch_url, read_player).await {
        Ok(src) => record.watch_url = src.and_then(|s| join_url(&watch_url, &s)),
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => tracing::warn!(url = %watch_url, error = %e, "Watch view unavailable"),
    }
    Ok(())
}

/// Scoped auxiliary page: open, navigate, read, always close.
async fn on_auxiliary_page<D, T>(
    ctx: &CrawlContext<D>,
    url: &str,
    read: for<'a> fn(&'a CrawlContext<D>, &'a D) -> ReadFuture<'a, T>,
) -> Result<T, DriverError>
where
    D: PageDriver,
{
    let aux = ctx.driver.open_auxiliary().await?;
    let result = match aux.navigate(url, WaitPolicy::DomContentLoaded).await {
        Ok(()) => read(ctx, &aux).await,
        Err(e) => Err(e),
    };
    aux.close().await;
    result
}

type ReadFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, DriverError>> + Send + 'a>>;

fn read_detail<'a, D: PageDriver>(
    ctx: &'a CrawlContext<D>,
    page: &'a D,
) -> ReadFuture<'a, DetailFields> {
    Box::pin(async move {
        let site = &ctx.config.site;
        // the synopsis is rendered client-side; a missing one is not an error
        match page
            .wait_for(&site.detail_synopsis, ctx.config.delays.option_wait)
            .await
        {
            Err(e) if e.is_fatal() => return Err(e),
            _ => {}
        }
        Ok(DetailFields {
            synopsis: text_of(page, &site.detail_synopsis).await?,
            title_en: text_of(page, &site.detail_title_en).await?,
            status: text_of(page, &site.detail_status).await?,
            watch_href: attribute_of(page, &site.detail_watch_link, "href").await?,
        })
    })
}

fn read_player<'a, D: PageDriver>(
    ctx: &'a CrawlContext<D>,
    page: &'a D,
) -> ReadFuture<'a, Option<String>> {
    Box::pin(async move {
        let site = &ctx.config.site;
        match page
            .wait_for(&site.watch_player, ctx.config.delays.option_wait)
            .await
        {
            Err(e) if e.is_fatal() => return Err(e),
            _ => {}
        }
        attribute_of(page, &site.watch_player, "src").await
    })
}

/// Trimmed text of the first match; `None` unless a fatal error occurs.
async fn text_of<D: PageDriver>(page: &D, selector: &str) -> Result<Option<String>, DriverError> {
    match Lookup::from(page.query_single(selector).await) {
        Lookup::Found(el) => match el.text().await {
            Ok(text) => Ok(Some(squash_whitespace(&text)).filter(|t| !t.is_empty())),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(None),
        },
        Lookup::Transient(e) if e.is_fatal() => Err(e),
        _ => Ok(None),
    }
}

async fn attribute_of<D: PageDriver>(
    page: &D,
    selector: &str,
    name: &str,
) -> Result<Option<String>, DriverError> {
    match Lookup::from(page.query_single(selector).await) {
        Lookup::Found(el) => match el.attribute(name).await {
            Ok(value) => Ok(value.filter(|v| !v.trim().is_empty())),
            Err(e) if e.is_fatal() => Err(e),
            Err(_) => Ok(None),
        },
        Lookup::Transient(e) if e.is_fatal() => Err(e),
        _ => Ok(None),
    }
}
