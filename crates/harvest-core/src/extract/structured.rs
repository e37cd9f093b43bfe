use serde::Deserialize;
use serde_json::Value;

use crate::config::CrawlConfig;
use crate::context::CrawlContext;
use crate::error::DriverError;
use crate::extract::PageExtraction;
use crate::models::{Record, push_unique, year_from_json};
use crate::traits::PageDriver;
use crate::util::{join_url, squash_whitespace, truncate_text};

/// One catalog entry as exposed by the page runtime.
///
/// String fields must be strings or the item is rejected; the fields whose
/// shape varies between site versions are kept as raw JSON and coerced.
#[derive(Debug, Deserialize)]
struct RawShow {
    slug: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    title_en: Option<String>,
    #[serde(default)]
    year: Value,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "genre")]
    genres: Value,
    #[serde(default, alias = "locale")]
    locales: Value,
    #[serde(default, alias = "description")]
    synopsis: Option<String>,
    #[serde(default, alias = "image")]
    poster: Value,
    #[serde(default, alias = "episode_duration")]
    duration: Value,
}

/// Read every loaded item from the page state in one round trip.
///
/// Returns `None` when the page exposes no structured state at all.
pub async fn extract<D: PageDriver>(
    ctx: &CrawlContext<D>,
    facet: i32,
) -> Result<Option<PageExtraction>, DriverError> {
    let state = ctx.driver.evaluate(&ctx.config.site.structured_script).await?;
    let Value::Array(items) = state else {
        return Ok(None);
    };
    Ok(Some(normalize_items(items, facet, &ctx.config)))
}

/// Coerce raw page-state items into records for the active facet.
pub fn normalize_items(items: Vec<Value>, facet: i32, config: &CrawlConfig) -> PageExtraction {
    let mut page = PageExtraction::default();
    for item in items {
        let raw: RawShow = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected malformed structured item");
                page.rejected += 1;
                continue;
            }
        };
        match normalize(raw, facet, config) {
            Normalized::Record(record) => page.records.push(*record),
            Normalized::OffFacet => page.off_facet += 1,
            Normalized::Rejected(reason) => {
                tracing::debug!(reason, "Rejected structured item");
                page.rejected += 1;
            }
        }
    }
    page
}

enum Normalized {
    Record(Box<Record>),
    OffFacet,
    Rejected(&'static str),
}

fn normalize(raw: RawShow, facet: i32, config: &CrawlConfig) -> Normalized {
    let site = &config.site;
    let slug = raw.slug.trim().trim_matches('/');
    if slug.is_empty() {
        return Normalized::Rejected("empty slug");
    }
    let Some(key) = join_url(&site.base_url, &format!("{}{}", site.detail_prefix, slug)) else {
        return Normalized::Rejected("unjoinable slug");
    };

    let year = year_from_json(&raw.year);
    if year.is_some_and(|y| y != facet) {
        return Normalized::OffFacet;
    }

    let title_en = non_blank(raw.title_en);
    let title = match non_blank(raw.title).or_else(|| title_en.clone()) {
        Some(title) => title,
        None => return Normalized::Rejected("no title"),
    };

    let mut record = Record::new(key, title);
    record.title_en = title_en.filter(|en| *en != record.title);
    record.year = year;
    record.kind = non_blank(raw.kind);
    record.status = non_blank(raw.status);
    record.genres = string_list(&raw.genres);
    record.locales = string_list(&raw.locales);
    record.synopsis = non_blank(raw.synopsis)
        .map(|s| truncate_text(&squash_whitespace(&s), config.synopsis_cap));
    record.poster_url = poster_url(&raw.poster, &site.base_url);
    record.duration = match raw.duration {
        Value::String(s) => non_blank(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    Normalized::Record(Box::new(record))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accepts `["Action"]`, `[{"name": "Action"}]` or `"Action, Drama"`.
fn string_list(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::String(s) => push_unique(&mut out, s),
                    Value::Object(obj) => {
                        if let Some(Value::String(s)) = obj.get("name") {
                            push_unique(&mut out, s);
                        }
                    }
                    _ => {}
                }
            }
        }
        Value::String(s) => {
            for part in s.split(',') {
                push_unique(&mut out, part);
            }
        }
        _ => {}
    }
    out
}

/// Poster may be a URL string or an object of size variants.
fn poster_url(value: &Value, base_url: &str) -> Option<String> {
    let candidate = match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => ["hq", "url", "src", "sm"]
            .iter()
            .filter_map(|k| obj.get(*k).and_then(Value::as_str))
            .find(|s| s.contains('/') || s.contains('.')),
        _ => None,
    }?;
    join_url(base_url, candidate)
}
