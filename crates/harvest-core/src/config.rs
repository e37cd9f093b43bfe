use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

/// Default in-page script for structured extraction.
///
/// Walks the client-side state tree and returns every object that looks like
/// a catalog entry (has a slug and a title). Returns `null` when the page
/// exposes no state at all.
pub const DEFAULT_STRUCTURED_SCRIPT: &str = r#"(() => {
  const root = window.__NUXT__;
  if (!root) return null;
  const found = [];
  const seen = new Set();
  const walk = (value, depth) => {
    if (!value || typeof value !== 'object' || depth > 8) return;
    if (Array.isArray(value)) {
      for (const item of value) {
        if (item && typeof item === 'object' && item.slug && (item.title || item.title_en)) {
          if (!seen.has(item.slug)) { seen.add(item.slug); found.push(item); }
        } else {
          walk(item, depth + 1);
        }
      }
      return;
    }
    for (const key of Object.keys(value)) walk(value[key], depth + 1);
  };
  walk(root, 0);
  return found;
})()"#;

/// CSS selectors, labels and URLs for one target site.
///
/// Defaults describe the Vuetify-based anime listing the harvester was
/// written for. A JSON file with the same field names overrides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    pub base_url: String,
    pub listing_path: String,
    /// Prefix joined with a structured item's slug to form its detail URL.
    pub detail_prefix: String,
    /// Buttons in the filter bar; the facet button is picked by label.
    pub filter_button: String,
    pub filter_label: String,
    pub reset_label: String,
    pub filter_option: String,
    pub item: String,
    pub item_poster: String,
    pub item_link: String,
    pub item_title: String,
    pub item_badge: String,
    pub pagination_button: String,
    pub next_icon: String,
    pub detail_synopsis: String,
    pub detail_title_en: String,
    pub detail_status: String,
    pub detail_watch_link: String,
    pub watch_player: String,
    /// Badge texts that are never genres (languages, types, ratings).
    pub non_genre_tokens: Vec<String>,
    pub structured_script: String,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: "https://kickass-anime.ru".into(),
            listing_path: "/anime".into(),
            detail_prefix: "/".into(),
            filter_button: ".v-btn".into(),
            filter_label: "Year".into(),
            reset_label: "Reset All".into(),
            filter_option: ".v-list-item".into(),
            item: ".show-item".into(),
            item_poster: ".v-image__image--cover".into(),
            item_link: "h2.show-title a".into(),
            item_title: "h2.show-title span".into(),
            item_badge: ".v-chip".into(),
            pagination_button: ".v-pagination__navigation".into(),
            next_icon: ".mdi-chevron-right".into(),
            detail_synopsis: ".synopsis".into(),
            detail_title_en: ".show-title-en".into(),
            detail_status: ".show-status".into(),
            detail_watch_link: "a.watch-now".into(),
            watch_player: "iframe.player".into(),
            non_genre_tokens: [
                "SUB", "DUB", "RAW", "JP", "EN", "TV", "MOVIE", "OVA", "ONA", "SPECIAL", "PG",
                "PG-13", "R", "R+", "G", "HD", "SD",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            structured_script: DEFAULT_STRUCTURED_SCRIPT.into(),
        }
    }
}

impl SiteProfile {
    /// Load a profile from a JSON file; missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, HarvestError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn listing_url(&self) -> String {
        crate::util::join_url(&self.base_url, &self.listing_path)
            .unwrap_or_else(|| format!("{}{}", self.base_url, self.listing_path))
    }

    /// True when a badge text is language/type/rating/duration/year noise.
    pub fn is_non_genre(&self, token: &str) -> bool {
        let token = token.trim();
        if token.is_empty() || crate::util::is_year_token(token) {
            return true;
        }
        // durations such as "24m" or "1h 30m"
        if token.chars().next().is_some_and(|c| c.is_ascii_digit())
            && token.ends_with(['m', 'h'])
        {
            return true;
        }
        self.non_genre_tokens
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
    }
}

/// Order in which facet values are walked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDirection {
    Ascending,
    #[default]
    Descending,
}

impl FromStr for ScanDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(ScanDirection::Ascending),
            "desc" | "descending" => Ok(ScanDirection::Descending),
            _ => Err(format!("Unknown scan direction: {s}")),
        }
    }
}

/// What to do with items whose identity key is already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnownItemPolicy {
    /// Drop them without further work.
    #[default]
    Skip,
    /// Re-emit the cheaply extracted fields; stored detail fields are kept.
    Refresh,
}

impl FromStr for KnownItemPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(KnownItemPolicy::Skip),
            "refresh" => Ok(KnownItemPolicy::Refresh),
            _ => Err(format!("Unknown known-item policy: {s}")),
        }
    }
}

/// Which extraction strategy a run may use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Structured first, DOM as fallback; first one that works sticks.
    #[default]
    Auto,
    Structured,
    Dom,
}

impl FromStr for StrategyPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(StrategyPreference::Auto),
            "structured" => Ok(StrategyPreference::Structured),
            "dom" => Ok(StrategyPreference::Dom),
            _ => Err(format!("Unknown extraction strategy: {s}")),
        }
    }
}

/// Inclusive year range accepted as a facet value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacetBounds {
    pub min: i32,
    pub max: i32,
}

impl FacetBounds {
    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }
}

impl Default for FacetBounds {
    /// 1900 through next year.
    fn default() -> Self {
        Self {
            min: 1900,
            max: chrono::Utc::now().year() + 1,
        }
    }
}

/// Per-session bounds for time-limited invocations (CI runners, cron).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_facets: Option<usize>,
    pub max_new_items: Option<usize>,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_facets: None,
            max_new_items: Some(50),
        }
    }
}

/// Waits that let client-side rendering settle after an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// After opening or closing the filter control.
    pub ui_settle: Duration,
    /// After choosing a filter option or changing page.
    pub page_settle: Duration,
    /// Upper bound for waiting on the item list to appear.
    pub item_wait: Duration,
    /// Upper bound for waiting on filter options to appear.
    pub option_wait: Duration,
}

impl Delays {
    /// No sleeping at all; for scripted drivers.
    pub fn none() -> Self {
        Self {
            ui_settle: Duration::ZERO,
            page_settle: Duration::ZERO,
            item_wait: Duration::from_millis(50),
            option_wait: Duration::from_millis(50),
        }
    }
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            ui_settle: Duration::from_secs(2),
            page_settle: Duration::from_secs(3),
            item_wait: Duration::from_secs(30),
            option_wait: Duration::from_secs(10),
        }
    }
}

/// Everything a crawl run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub site: SiteProfile,
    pub limits: SessionLimits,
    pub delays: Delays,
    pub bounds: FacetBounds,
    /// Domain used when discovery fails or finds nothing.
    pub default_domain: (i32, i32),
    pub direction: ScanDirection,
    pub max_pages_per_facet: usize,
    pub known_items: KnownItemPolicy,
    pub strategy: StrategyPreference,
    /// DOM mode: open each new item's detail view for synopsis and metadata.
    pub fetch_details: bool,
    /// DOM mode: follow the detail view's watch link for a playback URL.
    pub fetch_watch: bool,
    pub synopsis_cap: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            site: SiteProfile::default(),
            limits: SessionLimits::default(),
            delays: Delays::default(),
            bounds: FacetBounds::default(),
            default_domain: (2000, chrono::Utc::now().year()),
            direction: ScanDirection::default(),
            max_pages_per_facet: 20,
            known_items: KnownItemPolicy::default(),
            strategy: StrategyPreference::default(),
            fetch_details: true,
            fetch_watch: false,
            synopsis_cap: 1000,
        }
    }
}

impl CrawlConfig {
    /// Reject configurations that would make a run meaningless.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.max_pages_per_facet == 0 {
            return Err(HarvestError::Config(
                "max_pages_per_facet must be at least 1".into(),
            ));
        }
        if self.bounds.min > self.bounds.max {
            return Err(HarvestError::Config(format!(
                "Facet bounds are inverted: {} > {}",
                self.bounds.min, self.bounds.max
            )));
        }
        let (start, end) = self.default_domain;
        if start > end || !self.bounds.contains(start) || !self.bounds.contains(end) {
            return Err(HarvestError::Config(format!(
                "Default domain {start}..={end} must be ordered and within {}..={}",
                self.bounds.min, self.bounds.max
            )));
        }
        if self.limits.max_facets == Some(0) || self.limits.max_new_items == Some(0) {
            return Err(HarvestError::Config(
                "Session limits must be at least 1 when set".into(),
            ));
        }
        if self.synopsis_cap == 0 {
            return Err(HarvestError::Config("synopsis_cap must be at least 1".into()));
        }
        url::Url::parse(&self.site.base_url).map_err(|e| {
            HarvestError::Config(format!("Invalid base URL '{}': {e}", self.site.base_url))
        })?;
        Ok(())
    }
}
