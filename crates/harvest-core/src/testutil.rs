//! Test utilities: a scripted catalog site and mock implementations of the
//! core traits.
//!
//! `MockSite` holds the whole site (years, pages, shows, UI state) behind an
//! `Arc<Mutex<_>>`; every `MockDriver` and `MockElement` shares it, so tests
//! can assert on UI state after the code under test has driven it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::config::SiteProfile;
use crate::error::{DriverError, HarvestError};
use crate::models::{Record, RecordSet};
use crate::orchestrator::{CrawlEvent, CrawlReporter, CrawlState};
use crate::progress::CrawlProgress;
use crate::traits::{DriverElement, PageDriver, ProgressStore, RecordStore, WaitPolicy};

// ---------------------------------------------------------------------------
// MockShow
// ---------------------------------------------------------------------------

/// One catalog entry on the scripted site.
#[derive(Debug, Clone)]
pub struct MockShow {
    pub slug: String,
    pub title: String,
    badges: Vec<String>,
    link: bool,
    synopsis: Option<String>,
    title_en: Option<String>,
    player: Option<String>,
    broken_detail: bool,
    broken_watch: bool,
}

impl MockShow {
    pub fn new(slug: &str, title: &str) -> Self {
        Self {
            slug: slug.to_string(),
            title: title.to_string(),
            badges: Vec::new(),
            link: true,
            synopsis: None,
            title_en: None,
            player: None,
            broken_detail: false,
            broken_watch: false,
        }
    }

    pub fn with_badges(mut self, badges: &[&str]) -> Self {
        self.badges = badges.iter().map(|b| (*b).to_string()).collect();
        self
    }

    /// Card renders without its title link.
    pub fn without_link(mut self) -> Self {
        self.link = false;
        self
    }

    pub fn with_synopsis(mut self, synopsis: &str) -> Self {
        self.synopsis = Some(synopsis.to_string());
        self
    }

    pub fn with_title_en(mut self, title_en: &str) -> Self {
        self.title_en = Some(title_en.to_string());
        self
    }

    /// Detail view links to a watch view embedding `src`.
    pub fn with_player(mut self, src: &str) -> Self {
        self.player = Some(src.to_string());
        self
    }

    pub fn with_broken_detail_view(mut self) -> Self {
        self.broken_detail = true;
        self
    }

    pub fn with_broken_watch_view(mut self) -> Self {
        self.broken_watch = true;
        self
    }

    fn structured(&self, year: i32) -> Value {
        json!({
            "slug": self.slug,
            "title": self.title,
            "title_en": self.title_en,
            "year": year,
            "synopsis": self.synopsis,
            "genres": self.badges,
            "poster": {"hq": format!("/image/poster/{}.webp", self.slug)},
        })
    }
}

/// `n` plain shows with slugs `{prefix}-1..={n}`.
pub fn shows(prefix: &str, n: usize) -> Vec<MockShow> {
    (1..=n)
        .map(|i| MockShow::new(&format!("{prefix}-{i}"), &format!("{prefix} {i}")))
        .collect()
}

// ---------------------------------------------------------------------------
// MockSite
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SiteState {
    /// Pages of shows per year, as the filtered listing renders them.
    years: BTreeMap<i32, Vec<Vec<MockShow>>>,
    extra_options: Vec<String>,
    no_filter_button: bool,
    structured: bool,
    structured_leak: Option<i32>,
    failing_landing: bool,
    lose_session_at: Option<i32>,
    session_lost: bool,
    fail_next_wait: bool,
    fail_next_scroll: bool,
    dropdown_open: bool,
    active_year: Option<i32>,
    page: usize,
    filters_applied: usize,
    aux_open: usize,
    aux_opened: usize,
}

/// A scripted listing site driven through the default [`SiteProfile`].
#[derive(Debug, Clone, Default)]
pub struct MockSite {
    state: Arc<Mutex<SiteState>>,
    profile: Arc<SiteProfile>,
}

impl MockSite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Year offered by the filter, with its listing pages.
    pub fn with_year(self, year: i32, pages: Vec<Vec<MockShow>>) -> Self {
        self.lock().years.insert(year, pages);
        self
    }

    /// Additional dropdown labels listed after the years.
    pub fn with_extra_options(self, labels: &[&str]) -> Self {
        self.lock()
            .extra_options
            .extend(labels.iter().map(|l| (*l).to_string()));
        self
    }

    pub fn without_filter_button(self) -> Self {
        self.lock().no_filter_button = true;
        self
    }

    /// Expose the listing through page runtime state.
    pub fn with_structured_state(self) -> Self {
        self.lock().structured = true;
        self
    }

    /// Runtime state also carries the first page of `year`, whatever the filter.
    pub fn with_structured_leak(self, year: i32) -> Self {
        self.lock().structured_leak = Some(year);
        self
    }

    pub fn with_failing_landing(self) -> Self {
        self.lock().failing_landing = true;
        self
    }

    /// The session dies as soon as `year` is selected.
    pub fn lose_session_at(self, year: i32) -> Self {
        self.lock().lose_session_at = Some(year);
        self
    }

    pub fn lose_session(&self) {
        self.lock().session_lost = true;
    }

    /// The next `wait_for` reports a lost session; later calls succeed.
    pub fn fail_next_wait(&self) {
        self.lock().fail_next_wait = true;
    }

    /// The next `scroll_into_view` reports a lost session; later calls succeed.
    pub fn fail_next_scroll(&self) {
        self.lock().fail_next_scroll = true;
    }

    fn take_failure(&self, flag: fn(&mut SiteState) -> &mut bool) -> Result<(), DriverError> {
        if std::mem::take(flag(&mut self.lock())) {
            Err(DriverError::SessionLost("connection reset".into()))
        } else {
            Ok(())
        }
    }

    pub fn base_url(&self) -> String {
        self.profile.base_url.clone()
    }

    pub fn dropdown_open(&self) -> bool {
        self.lock().dropdown_open
    }

    pub fn active_year(&self) -> Option<i32> {
        self.lock().active_year
    }

    /// Number of year options clicked so far.
    pub fn filters_applied(&self) -> usize {
        self.lock().filters_applied
    }

    /// Auxiliary pages currently open.
    pub fn open_aux_pages(&self) -> usize {
        self.lock().aux_open
    }

    pub fn aux_pages_opened(&self) -> usize {
        self.lock().aux_opened
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SiteState> {
        self.state.lock().unwrap()
    }

    fn check_session(&self) -> Result<(), DriverError> {
        if self.lock().session_lost {
            Err(DriverError::SessionLost("browser closed".into()))
        } else {
            Ok(())
        }
    }

    fn find_show(&self, slug: &str) -> Option<MockShow> {
        self.lock()
            .years
            .values()
            .flatten()
            .flatten()
            .find(|s| s.slug == slug)
            .cloned()
    }

    fn current_page(&self) -> (Option<i32>, Vec<MockShow>, usize, usize) {
        let state = self.lock();
        let Some(year) = state.active_year else {
            return (None, Vec::new(), 0, 0);
        };
        let pages = state.years.get(&year).map_or(&[][..], Vec::as_slice);
        let shows = pages.get(state.page).cloned().unwrap_or_default();
        (Some(year), shows, state.page, pages.len())
    }

    fn select(&self, label: &str) {
        let mut state = self.lock();
        state.dropdown_open = false;
        let Ok(year) = label.trim().parse::<i32>() else {
            return;
        };
        state.filters_applied += 1;
        state.active_year = Some(year);
        state.page = 0;
        if state.lose_session_at == Some(year) {
            state.session_lost = true;
        }
    }
}

// ---------------------------------------------------------------------------
// MockElement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    Button(String),
    YearOption(String),
    Card(MockShow),
    Link(MockShow),
    Title(String),
    Poster(String),
    Badge(String),
    Pager { next: bool, disabled: bool },
    Icon,
    Text(String),
    WatchLink(String),
    Player(String),
}

/// Element handle into a [`MockSite`].
#[derive(Debug, Clone)]
pub struct MockElement {
    site: MockSite,
    node: Node,
}

impl MockElement {
    fn children(&self, selector: &str) -> Vec<MockElement> {
        let p = &self.site.profile;
        let nodes = match &self.node {
            Node::Card(show) => {
                if selector == p.item_link && show.link {
                    vec![Node::Link(show.clone())]
                } else if selector == p.item_title {
                    vec![Node::Title(show.title.clone())]
                } else if selector == p.item_poster {
                    vec![Node::Poster(show.slug.clone())]
                } else if selector == p.item_badge {
                    show.badges.iter().cloned().map(Node::Badge).collect()
                } else {
                    Vec::new()
                }
            }
            Node::Pager { next: true, .. } if selector == p.next_icon => vec![Node::Icon],
            _ => Vec::new(),
        };
        nodes
            .into_iter()
            .map(|node| MockElement {
                site: self.site.clone(),
                node,
            })
            .collect()
    }
}

impl DriverElement for MockElement {
    async fn click(&self) -> Result<(), DriverError> {
        self.site.check_session()?;
        match &self.node {
            Node::Button(label) if *label == self.site.profile.filter_label => {
                let mut state = self.site.lock();
                state.dropdown_open = !state.dropdown_open;
            }
            Node::Button(label) if *label == self.site.profile.reset_label => {
                let mut state = self.site.lock();
                state.active_year = None;
                state.page = 0;
            }
            Node::YearOption(label) => self.site.select(label),
            Node::Pager {
                next: true,
                disabled: false,
            } => self.site.lock().page += 1,
            Node::Pager { disabled: true, .. } => {
                return Err(DriverError::Interaction("button is disabled".into()));
            }
            _ => {}
        }
        Ok(())
    }

    async fn attribute(&self, name: &str) -> Result<Option<String>, DriverError> {
        self.site.check_session()?;
        let value = match (&self.node, name) {
            (Node::Link(show), "href") => Some(format!("/{}", show.slug)),
            (Node::Poster(slug), "style") => Some(format!(
                "background-image: url(\"/image/poster/{slug}.webp\"); background-size: cover;"
            )),
            (Node::Pager { disabled, .. }, "disabled") => disabled.then(|| "disabled".to_string()),
            (Node::Pager { .. }, "class") => Some("v-pagination__navigation".to_string()),
            (Node::WatchLink(href), "href") => Some(href.clone()),
            (Node::Player(src), "src") => Some(src.clone()),
            _ => None,
        };
        Ok(value)
    }

    async fn text(&self) -> Result<String, DriverError> {
        self.site.check_session()?;
        let text = match &self.node {
            Node::Button(label) | Node::YearOption(label) => format!(" {label} "),
            Node::Link(show) => show.title.clone(),
            Node::Card(show) => show.title.clone(),
            Node::Title(text) | Node::Badge(text) | Node::Text(text) => text.clone(),
            _ => String::new(),
        };
        Ok(text)
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError> {
        self.site.check_session()?;
        self.site.take_failure(|s| &mut s.fail_next_scroll)
    }

    async fn query_single(&self, selector: &str) -> Result<Option<MockElement>, DriverError> {
        self.site.check_session()?;
        Ok(self.children(selector).into_iter().next())
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<MockElement>, DriverError> {
        self.site.check_session()?;
        Ok(self.children(selector))
    }
}

// ---------------------------------------------------------------------------
// MockDriver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Location {
    Blank,
    Listing,
    Detail(String),
    Watch(String),
}

/// Page driver over a [`MockSite`]. Starts on the listing page.
#[derive(Debug)]
pub struct MockDriver {
    site: MockSite,
    location: Mutex<Location>,
    auxiliary: bool,
}

impl MockDriver {
    pub fn new(site: MockSite) -> Self {
        Self {
            site,
            location: Mutex::new(Location::Listing),
            auxiliary: false,
        }
    }

    fn location(&self) -> Location {
        self.location.lock().unwrap().clone()
    }

    fn element(&self, node: Node) -> MockElement {
        MockElement {
            site: self.site.clone(),
            node,
        }
    }

    fn resolve(&self, url: &str) -> Result<Location, DriverError> {
        let p = &self.site.profile;
        if url == p.listing_url() {
            if self.site.lock().failing_landing {
                return Err(DriverError::Navigation(format!("{url}: net::ERR_TIMED_OUT")));
            }
            return Ok(Location::Listing);
        }
        let not_found = || DriverError::Navigation(format!("{url}: 404"));
        let path = url.strip_prefix(&p.base_url).ok_or_else(not_found)?;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [slug] => match self.site.find_show(slug) {
                Some(show) if !show.broken_detail => Ok(Location::Detail(show.slug)),
                _ => Err(not_found()),
            },
            [slug, _episode] => match self.site.find_show(slug) {
                Some(show) if !show.broken_watch && show.player.is_some() => {
                    Ok(Location::Watch(show.slug))
                }
                _ => Err(not_found()),
            },
            _ => Err(not_found()),
        }
    }

    fn nodes(&self, selector: &str) -> Vec<Node> {
        let p = &self.site.profile;
        match self.location() {
            Location::Blank => Vec::new(),
            Location::Listing => self.listing_nodes(selector),
            Location::Detail(slug) => {
                let Some(show) = self.site.find_show(&slug) else {
                    return Vec::new();
                };
                let node = if selector == p.detail_synopsis {
                    show.synopsis.map(Node::Text)
                } else if selector == p.detail_title_en {
                    show.title_en.map(Node::Text)
                } else if selector == p.detail_watch_link {
                    show.player.map(|_| Node::WatchLink(format!("/{slug}/ep-1")))
                } else {
                    None
                };
                node.into_iter().collect()
            }
            Location::Watch(slug) => {
                let player = self.site.find_show(&slug).and_then(|s| s.player);
                match player {
                    Some(src) if selector == p.watch_player => vec![Node::Player(src)],
                    _ => Vec::new(),
                }
            }
        }
    }

    fn listing_nodes(&self, selector: &str) -> Vec<Node> {
        let p = &self.site.profile;
        if selector == p.filter_button {
            let mut buttons = vec![Node::Button("Genre".into())];
            if !self.site.lock().no_filter_button {
                buttons.push(Node::Button(p.filter_label.clone()));
            }
            buttons.push(Node::Button(p.reset_label.clone()));
            return buttons;
        }
        if selector == p.filter_option {
            let state = self.site.lock();
            if !state.dropdown_open {
                return Vec::new();
            }
            return state
                .years
                .keys()
                .rev()
                .map(|y| y.to_string())
                .chain(state.extra_options.iter().cloned())
                .map(Node::YearOption)
                .collect();
        }
        let (_, shows, page, pages) = self.site.current_page();
        if selector == p.item {
            return shows.into_iter().map(Node::Card).collect();
        }
        if selector == p.pagination_button && pages > 0 {
            return vec![
                Node::Pager {
                    next: false,
                    disabled: page == 0,
                },
                Node::Pager {
                    next: true,
                    disabled: page + 1 >= pages,
                },
            ];
        }
        Vec::new()
    }

    fn runtime_state(&self) -> Value {
        if self.location() != Location::Listing || !self.site.lock().structured {
            return Value::Null;
        }
        let (year, shows, _, _) = self.site.current_page();
        let mut items: Vec<Value> = match year {
            Some(year) => shows.iter().map(|s| s.structured(year)).collect(),
            None => Vec::new(),
        };
        let leak = self.site.lock().structured_leak;
        if let Some(leak) = leak.filter(|l| Some(*l) != year) {
            let first = self
                .site
                .lock()
                .years
                .get(&leak)
                .and_then(|pages| pages.first().cloned())
                .unwrap_or_default();
            items.extend(first.iter().map(|s| s.structured(leak)));
        }
        Value::Array(items)
    }
}

impl PageDriver for MockDriver {
    type Element = MockElement;

    async fn navigate(&self, url: &str, _wait: WaitPolicy) -> Result<(), DriverError> {
        self.site.check_session()?;
        let location = self.resolve(url)?;
        if location == Location::Listing && !self.auxiliary {
            let mut state = self.site.lock();
            state.active_year = None;
            state.page = 0;
            state.dropdown_open = false;
        }
        *self.location.lock().unwrap() = location;
        Ok(())
    }

    async fn query_single(&self, selector: &str) -> Result<Option<MockElement>, DriverError> {
        self.site.check_session()?;
        Ok(self
            .nodes(selector)
            .into_iter()
            .next()
            .map(|n| self.element(n)))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<MockElement>, DriverError> {
        self.site.check_session()?;
        Ok(self
            .nodes(selector)
            .into_iter()
            .map(|n| self.element(n))
            .collect())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value, DriverError> {
        self.site.check_session()?;
        Ok(self.runtime_state())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        self.site.check_session()?;
        self.site.take_failure(|s| &mut s.fail_next_wait)?;
        if self.nodes(selector).is_empty() {
            Err(DriverError::Timeout(timeout.as_millis() as u64))
        } else {
            Ok(())
        }
    }

    async fn press_key(&self, key: &str) -> Result<(), DriverError> {
        self.site.check_session()?;
        if key == "Escape" {
            self.site.lock().dropdown_open = false;
        }
        Ok(())
    }

    async fn open_auxiliary(&self) -> Result<MockDriver, DriverError> {
        self.site.check_session()?;
        {
            let mut state = self.site.lock();
            state.aux_open += 1;
            state.aux_opened += 1;
        }
        Ok(MockDriver {
            site: self.site.clone(),
            location: Mutex::new(Location::Blank),
            auxiliary: true,
        })
    }

    async fn close(self) {
        if self.auxiliary {
            self.site.lock().aux_open -= 1;
        }
    }
}

// ---------------------------------------------------------------------------
// MockRecordStore
// ---------------------------------------------------------------------------

/// In-memory record store. Clones share the stored set.
#[derive(Clone, Default)]
pub struct MockRecordStore {
    records: Arc<Mutex<RecordSet>>,
    saves: Arc<Mutex<usize>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MockRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent save fails with an I/O error.
    pub fn fail_saves(&self) {
        *self.fail_saves.lock().unwrap() = true;
    }

    /// Store pre-seeded with `records`, as if an earlier run saved them.
    pub fn with_records(records: Vec<Record>) -> Self {
        let store = Self::default();
        *store.records.lock().unwrap() = RecordSet::from_records(records);
        store
    }

    pub fn saved(&self) -> Vec<Record> {
        self.records.lock().unwrap().records().to_vec()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

impl RecordStore for MockRecordStore {
    async fn load(&self) -> Result<RecordSet, HarvestError> {
        Ok(self.records.lock().unwrap().clone())
    }

    async fn save(&self, records: &RecordSet) -> Result<(), HarvestError> {
        if *self.fail_saves.lock().unwrap() {
            return Err(HarvestError::Io(std::io::Error::other("disk full")));
        }
        *self.records.lock().unwrap() = records.clone();
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockProgressStore
// ---------------------------------------------------------------------------

/// In-memory progress store. Clones share the stored progress.
#[derive(Clone, Default)]
pub struct MockProgressStore {
    stored: Arc<Mutex<Option<CrawlProgress>>>,
    checkpoints: Arc<Mutex<usize>>,
}

impl MockProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, progress: CrawlProgress) {
        *self.stored.lock().unwrap() = Some(progress);
    }

    pub fn clear(&self) {
        *self.stored.lock().unwrap() = None;
    }

    pub fn stored(&self) -> Option<CrawlProgress> {
        self.stored.lock().unwrap().clone()
    }

    pub fn checkpoint_count(&self) -> usize {
        *self.checkpoints.lock().unwrap()
    }
}

impl ProgressStore for MockProgressStore {
    async fn load(&self) -> Result<Option<CrawlProgress>, HarvestError> {
        Ok(self.stored())
    }

    async fn checkpoint(&self, progress: &CrawlProgress) -> Result<(), HarvestError> {
        *self.stored.lock().unwrap() = Some(progress.clone());
        *self.checkpoints.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records states and facet outcomes, and can cancel the run.
#[derive(Default)]
pub struct MockReporter {
    states: Mutex<Vec<CrawlState>>,
    finished: Mutex<Vec<i32>>,
    skipped: Mutex<Vec<i32>>,
    pages: Mutex<usize>,
    cancel_on_page: Option<usize>,
    cancel: CancellationToken,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the run once `n` pages have been merged.
    pub fn cancel_on_page(mut self, n: usize) -> Self {
        self.cancel_on_page = Some(n);
        self
    }

    /// Token to hand to the crawl context.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn states(&self) -> Vec<CrawlState> {
        self.states.lock().unwrap().clone()
    }

    /// Facets finished and marked completed, in order.
    pub fn finished(&self) -> Vec<i32> {
        self.finished.lock().unwrap().clone()
    }

    pub fn skipped(&self) -> Vec<i32> {
        self.skipped.lock().unwrap().clone()
    }
}

impl CrawlReporter for MockReporter {
    fn report(&self, event: CrawlEvent<'_>) {
        match event {
            CrawlEvent::Transition { state } => self.states.lock().unwrap().push(state),
            CrawlEvent::FacetFinished {
                summary,
                completed: true,
            } => self.finished.lock().unwrap().push(summary.facet),
            CrawlEvent::FacetSkipped { facet, .. } => self.skipped.lock().unwrap().push(facet),
            CrawlEvent::PageWalked { .. } => {
                let mut pages = self.pages.lock().unwrap();
                *pages += 1;
                if self.cancel_on_page == Some(*pages) {
                    self.cancel.cancel();
                }
            }
            _ => {}
        }
    }
}
