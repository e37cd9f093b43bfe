use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One harvested catalog entry.
///
/// `key` is the canonical absolute detail URL. It is the identity used for
/// dedup and merge and never changes once assigned.
///
/// Field aliases accept documents written by the earlier year-scraper script
/// (`judul`, `url_detail`, `tahun`, ...), so an existing collection can be
/// resumed without conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(alias = "url_detail")]
    pub key: String,
    #[serde(alias = "judul")]
    pub title: String,
    /// English title when the source title is romanised or localised.
    #[serde(default)]
    pub title_en: Option<String>,
    /// `None` when the year was unknown at capture time.
    #[serde(default, alias = "tahun", deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "genre")]
    pub genres: Vec<String>,
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default, alias = "sinopsis", deserialize_with = "blank_as_none")]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default, alias = "url_poster", deserialize_with = "blank_as_none")]
    pub poster_url: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub watch_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
}

impl Record {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            title_en: None,
            year: None,
            kind: None,
            status: None,
            genres: Vec::new(),
            locales: Vec::new(),
            synopsis: None,
            duration: None,
            poster_url: None,
            watch_url: None,
            captured_at: Utc::now(),
        }
    }

    /// Fill every field this (refreshed) record lacks from the stored copy.
    ///
    /// A cheap re-scrape of a known item skips the detail fetch, so synopsis
    /// and watch URL would otherwise be wiped on merge.
    pub fn refresh_from(&mut self, old: &Record) {
        fn keep(new: &mut Option<String>, old: &Option<String>) {
            if new.is_none() {
                new.clone_from(old);
            }
        }
        keep(&mut self.title_en, &old.title_en);
        keep(&mut self.kind, &old.kind);
        keep(&mut self.status, &old.status);
        keep(&mut self.synopsis, &old.synopsis);
        keep(&mut self.duration, &old.duration);
        keep(&mut self.poster_url, &old.poster_url);
        keep(&mut self.watch_url, &old.watch_url);
        if self.year.is_none() {
            self.year = old.year;
        }
        if self.genres.is_empty() {
            self.genres.clone_from(&old.genres);
        }
        if self.locales.is_empty() {
            self.locales.clone_from(&old.locales);
        }
    }

    /// Same record ignoring the capture timestamp.
    pub fn same_content(&self, other: &Record) -> bool {
        let mut a = self.clone();
        a.captured_at = other.captured_at;
        a == *other
    }
}

/// Push `value` into `list` unless it is blank or already present.
pub fn push_unique(list: &mut Vec<String>, value: &str) {
    let value = value.trim();
    if !value.is_empty() && !list.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        list.push(value.to_string());
    }
}

fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(year_from_json(&value))
}

/// Placeholders the earlier script wrote instead of leaving a field empty.
const LEGACY_PLACEHOLDERS: &[&str] = &["Tidak tersedia"];

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| {
        let s = s.trim();
        !s.is_empty()
            && !LEGACY_PLACEHOLDERS
                .iter()
                .any(|p| p.eq_ignore_ascii_case(s))
    }))
}

/// Coerce a JSON year that may be a number, a numeric string, or junk.
pub fn year_from_json(value: &serde_json::Value) -> Option<i32> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Counts produced by [`RecordSet::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
}

/// Identity keys already present in the record collection.
///
/// Built once from the loaded set and consulted by the pagination walker.
/// Only rebuilt after a merge.
#[derive(Debug, Clone, Default)]
pub struct DedupIndex {
    keys: HashSet<String>,
}

impl DedupIndex {
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<String> for DedupIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

/// Ordered record collection keyed by identity key.
///
/// Order is first-seen order, so rewriting an unchanged collection yields the
/// same document.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    records: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from a stored sequence. Later duplicates replace earlier ones.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut set = Self::new();
        set.merge(records);
        set
    }

    /// Union with `incoming`; same-key records overwrite in place, new keys append.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Record>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in incoming {
            match self.positions.get(&record.key) {
                Some(&pos) => {
                    self.records[pos] = record;
                    stats.updated += 1;
                }
                None => {
                    self.positions
                        .insert(record.key.clone(), self.records.len());
                    self.records.push(record);
                    stats.added += 1;
                }
            }
        }
        stats
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.positions.get(key).map(|&pos| &self.records[pos])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn index(&self) -> DedupIndex {
        self.positions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, title: &str) -> Record {
        Record::new(format!("https://site.test/{key}"), title)
    }

    #[test]
    fn test_merge_appends_new_and_replaces_existing() {
        let mut set = RecordSet::from_records(vec![record("a", "A"), record("b", "B")]);

        let stats = set.merge(vec![record("b", "B2"), record("c", "C")]);

        assert_eq!(stats, MergeStats { added: 1, updated: 1 });
        let titles: Vec<_> = set.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, ["A", "B2", "C"]);
    }

    #[test]
    fn test_from_records_dedups_by_key() {
        let set = RecordSet::from_records(vec![record("a", "old"), record("a", "new")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("https://site.test/a").unwrap().title, "new");
    }

    #[test]
    fn test_index_reflects_keys() {
        let set = RecordSet::from_records(vec![record("a", "A")]);
        let index = set.index();
        assert!(index.contains("https://site.test/a"));
        assert!(!index.contains("https://site.test/b"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_refresh_keeps_detail_fields() {
        let mut old = record("a", "A");
        old.synopsis = Some("Long story".into());
        old.watch_url = Some("https://player.test/1".into());
        old.genres = vec!["Action".into()];

        let mut fresh = record("a", "A (updated)");
        fresh.status = Some("Finished".into());
        fresh.refresh_from(&old);

        assert_eq!(fresh.title, "A (updated)");
        assert_eq!(fresh.status.as_deref(), Some("Finished"));
        assert_eq!(fresh.synopsis.as_deref(), Some("Long story"));
        assert_eq!(fresh.watch_url.as_deref(), Some("https://player.test/1"));
        assert_eq!(fresh.genres, ["Action"]);
    }

    #[test]
    fn test_legacy_document_loads() {
        let legacy = serde_json::json!({
            "judul": "Old Show",
            "tahun": "2021",
            "url_poster": "https://site.test/p.webp",
            "url_detail": "https://site.test/old-show",
            "scraping_tahun": 2021,
            "last_updated": 1234.5,
            "genre": [],
            "sinopsis": "",
            "metadata": []
        });

        let rec: Record = serde_json::from_value(legacy).unwrap();

        assert_eq!(rec.key, "https://site.test/old-show");
        assert_eq!(rec.title, "Old Show");
        assert_eq!(rec.year, Some(2021));
        assert_eq!(rec.synopsis, None);
        assert_eq!(rec.poster_url.as_deref(), Some("https://site.test/p.webp"));
    }

    #[test]
    fn test_legacy_placeholder_poster_is_none() {
        let legacy = serde_json::json!({
            "judul": "No Poster",
            "tahun": 2020,
            "url_poster": "Tidak tersedia",
            "url_detail": "https://site.test/no-poster",
            "sinopsis": " tidak tersedia "
        });

        let rec: Record = serde_json::from_value(legacy).unwrap();

        assert_eq!(rec.poster_url, None);
        assert_eq!(rec.synopsis, None);
        assert_eq!(rec.year, Some(2020));
    }

    #[test]
    fn test_year_from_json_shapes() {
        assert_eq!(year_from_json(&serde_json::json!(2020)), Some(2020));
        assert_eq!(year_from_json(&serde_json::json!(" 2019 ")), Some(2019));
        assert_eq!(year_from_json(&serde_json::json!("unknown")), None);
        assert_eq!(year_from_json(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_push_unique() {
        let mut genres = vec!["Action".to_string()];
        push_unique(&mut genres, "action");
        push_unique(&mut genres, " Drama ");
        push_unique(&mut genres, "");
        assert_eq!(genres, ["Action", "Drama"]);
    }
}
