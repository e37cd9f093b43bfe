use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::facet::FacetDomain;

/// Resumable cursor over the facet domain.
///
/// Invariants: `current ∉ completed`, and `completed` never shrinks. Values
/// completed under an earlier domain are kept even when the current domain
/// no longer lists them; only [`CrawlProgress::completed_in_domain`] counts
/// against the domain. Legacy field names from the earlier script are
/// accepted on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlProgress {
    #[serde(default, alias = "current_year")]
    pub current: Option<i32>,
    /// Completed facet values in completion order.
    #[serde(default, alias = "completed_years")]
    pub completed: Vec<i32>,
    #[serde(default, alias = "available_years")]
    pub domain: Vec<i32>,
    #[serde(default, alias = "total_anime")]
    pub total_records: usize,
    /// New records added by the most recent session.
    #[serde(default, alias = "session_scraped")]
    pub session_new: usize,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "error")]
    pub last_error: Option<String>,
}

impl CrawlProgress {
    /// Fresh progress positioned on the first domain value.
    pub fn new(domain: &FacetDomain) -> Self {
        Self {
            current: domain.first(),
            completed: Vec::new(),
            domain: domain.values().to_vec(),
            total_records: 0,
            session_new: 0,
            updated_at: None,
            last_error: None,
        }
    }

    /// Reconcile stored progress with a freshly discovered domain.
    ///
    /// Every stored completed value is kept, including ones outside the new
    /// domain, so a fallback domain never erases work. A stored current value
    /// that is gone or already completed falls back to the first undone
    /// domain value.
    pub fn resume(stored: Option<CrawlProgress>, domain: &FacetDomain) -> Self {
        let Some(stored) = stored else {
            return Self::new(domain);
        };

        let mut completed = Vec::with_capacity(stored.completed.len());
        for year in stored.completed {
            if !completed.contains(&year) {
                completed.push(year);
            }
        }

        let mut progress = Self {
            current: None,
            completed,
            domain: domain.values().to_vec(),
            total_records: stored.total_records,
            session_new: stored.session_new,
            updated_at: stored.updated_at,
            last_error: stored.last_error,
        };

        progress.current = match stored.current {
            Some(year) if domain.contains(year) && !progress.is_completed(year) => Some(year),
            _ => progress.first_undone(),
        };
        progress
    }

    pub fn is_completed(&self, year: i32) -> bool {
        self.completed.contains(&year)
    }

    /// Undone facets in domain order, rotated so `current` comes first.
    pub fn pending(&self) -> Vec<i32> {
        let undone: Vec<i32> = self
            .domain
            .iter()
            .copied()
            .filter(|y| !self.is_completed(*y))
            .collect();
        match self
            .current
            .and_then(|c| undone.iter().position(|y| *y == c))
        {
            Some(pos) => {
                let mut rotated = undone[pos..].to_vec();
                rotated.extend_from_slice(&undone[..pos]);
                rotated
            }
            None => undone,
        }
    }

    /// Completed values that belong to the current domain.
    pub fn completed_in_domain(&self) -> usize {
        self.domain.iter().filter(|y| self.is_completed(**y)).count()
    }

    pub fn remaining(&self) -> usize {
        self.domain.iter().filter(|y| !self.is_completed(**y)).count()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Mark a facet done and move `current` to the next undone value.
    pub fn mark_completed(&mut self, year: i32) {
        if !self.is_completed(year) {
            self.completed.push(year);
        }
        if self.current.is_none_or(|c| self.is_completed(c)) {
            self.current = self.next_undone_after(year);
        }
    }

    /// Record the facet being worked on.
    pub fn set_current(&mut self, year: i32) {
        if !self.is_completed(year) {
            self.current = Some(year);
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }

    fn first_undone(&self) -> Option<i32> {
        self.domain
            .iter()
            .copied()
            .find(|y| !self.is_completed(*y))
    }

    fn next_undone_after(&self, year: i32) -> Option<i32> {
        let start = self
            .domain
            .iter()
            .position(|y| *y == year)
            .map_or(0, |p| p + 1);
        self.domain[start..]
            .iter()
            .copied()
            .find(|y| !self.is_completed(*y))
            .or_else(|| self.first_undone())
    }
}
