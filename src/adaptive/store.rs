//! Collaborator interfaces and the process-local stores behind them.
//!
//! `ItemCatalog` and `ResponseLog` are the narrow seams to external storage;
//! the in-memory implementations back the binary and the tests. `LearnerStore`
//! owns per-learner model state (ability history, mastery, review records,
//! administration history and tracer states).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::adaptive::calibration::apply_result;
use crate::adaptive::error::{AdaptiveError, AdaptiveResult};
use crate::adaptive::knowledge::TracerState;
use crate::adaptive::types::{
    AbilityEstimate, AbilityScope, CalibrationResult, ConceptId, ConceptMastery, CourseId, Item,
    ItemFilter, ItemId, ItemParams, LearnerId, ResponseEvent, ReviewItemState,
};

/// Minimum administration history kept per learner; the selector only looks
/// at its tail. A larger recency window raises the bound.
pub const RECENT_HISTORY_CAP: usize = 256;

#[async_trait]
pub trait ItemCatalog: Send + Sync {
    async fn fetch_items(&self, filter: &ItemFilter) -> AdaptiveResult<Vec<Item>>;

    async fn get_item(&self, item_id: &str) -> AdaptiveResult<Option<Item>>;

    /// Returns the exposure count after the increment.
    async fn increment_exposure(&self, item_id: &str) -> AdaptiveResult<u64>;

    /// Returns the observed success rate after recording the response.
    async fn update_success_rate(&self, item_id: &str, correct: bool) -> AdaptiveResult<f64>;

    /// Applies `result` only if the item's parameter version still equals
    /// `result.from_version`. Returns the parameters now in effect.
    async fn swap_parameters(&self, item_id: &str, result: &CalibrationResult) -> AdaptiveResult<ItemParams>;
}

#[async_trait]
pub trait ResponseLog: Send + Sync {
    async fn append(&self, event: ResponseEvent) -> AdaptiveResult<()>;

    async fn fetch_by_item(&self, item_id: &str) -> AdaptiveResult<Vec<ResponseEvent>>;

    /// Most recent events for the learner, oldest first.
    async fn fetch_by_learner(&self, learner_id: &str, limit: Option<usize>) -> AdaptiveResult<Vec<ResponseEvent>>;
}

/// Attempts live in the high half of the outcome word, successes in the low
/// half, so one `fetch_add` records a response and readers never see
/// `successes > attempts`.
const ATTEMPT: u64 = 1 << 32;
const SUCCESS_MASK: u64 = ATTEMPT - 1;

fn pack_outcomes(attempts: u64, successes: u64) -> u64 {
    let attempts = attempts.min(SUCCESS_MASK);
    (attempts << 32) | successes.min(attempts)
}

fn outcome_rate(packed: u64) -> f64 {
    let attempts = packed >> 32;
    if attempts == 0 {
        return 0.0;
    }
    (packed & SUCCESS_MASK) as f64 / attempts as f64
}

struct CatalogEntry {
    item: RwLock<Item>,
    exposure: AtomicU64,
    outcomes: AtomicU64,
}

impl CatalogEntry {
    fn new(item: Item) -> Self {
        let attempts = item.exposure_count;
        let successes = (item.success_rate.clamp(0.0, 1.0) * attempts as f64).round() as u64;
        Self {
            exposure: AtomicU64::new(item.exposure_count),
            outcomes: AtomicU64::new(pack_outcomes(attempts, successes)),
            item: RwLock::new(item),
        }
    }

    fn success_rate(&self) -> f64 {
        outcome_rate(self.outcomes.load(Ordering::Relaxed))
    }

    fn snapshot(&self) -> Item {
        let mut item = self.item.read().clone();
        item.exposure_count = self.exposure.load(Ordering::Relaxed);
        item.success_rate = self.success_rate();
        item
    }
}

#[derive(Default)]
pub struct InMemoryItemCatalog {
    entries: RwLock<HashMap<ItemId, Arc<CatalogEntry>>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let catalog = Self::new();
        for item in items {
            catalog.insert(item);
        }
        catalog
    }

    /// Inserts or replaces an item, resetting its counters to the item's values.
    pub fn insert(&self, item: Item) {
        self.entries
            .write()
            .insert(item.id.clone(), Arc::new(CatalogEntry::new(item)));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn entry(&self, item_id: &str) -> AdaptiveResult<Arc<CatalogEntry>> {
        self.entries
            .read()
            .get(item_id)
            .cloned()
            .ok_or_else(|| AdaptiveError::UnknownItem(item_id.to_string()))
    }
}

#[async_trait]
impl ItemCatalog for InMemoryItemCatalog {
    async fn fetch_items(&self, filter: &ItemFilter) -> AdaptiveResult<Vec<Item>> {
        let entries: Vec<Arc<CatalogEntry>> = self.entries.read().values().cloned().collect();
        let mut items: Vec<Item> = entries
            .iter()
            .map(|entry| entry.snapshot())
            .filter(|item| filter.matches(item))
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get_item(&self, item_id: &str) -> AdaptiveResult<Option<Item>> {
        Ok(self.entries.read().get(item_id).map(|entry| entry.snapshot()))
    }

    async fn increment_exposure(&self, item_id: &str) -> AdaptiveResult<u64> {
        let entry = self.entry(item_id)?;
        Ok(entry.exposure.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn update_success_rate(&self, item_id: &str, correct: bool) -> AdaptiveResult<f64> {
        let entry = self.entry(item_id)?;
        let delta = if correct { ATTEMPT + 1 } else { ATTEMPT };
        let previous = entry.outcomes.fetch_add(delta, Ordering::Relaxed);
        Ok(outcome_rate(previous.wrapping_add(delta)))
    }

    async fn swap_parameters(&self, item_id: &str, result: &CalibrationResult) -> AdaptiveResult<ItemParams> {
        let entry = self.entry(item_id)?;
        let mut item = entry.item.write();
        if item.params.version != result.from_version {
            return Err(AdaptiveError::StaleCalibration {
                item_id: item_id.to_string(),
                from_version: result.from_version,
                current_version: item.params.version,
            });
        }
        item.params = apply_result(&item.params, result);
        Ok(item.params)
    }
}

#[derive(Default)]
struct ResponseIndex {
    events: Vec<ResponseEvent>,
    by_item: HashMap<ItemId, Vec<usize>>,
    by_learner: HashMap<LearnerId, Vec<usize>>,
}

/// Append-only event log with per-item and per-learner indices.
#[derive(Default)]
pub struct InMemoryResponseLog {
    inner: RwLock<ResponseIndex>,
}

impl InMemoryResponseLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().events.is_empty()
    }
}

#[async_trait]
impl ResponseLog for InMemoryResponseLog {
    async fn append(&self, event: ResponseEvent) -> AdaptiveResult<()> {
        let mut inner = self.inner.write();
        let idx = inner.events.len();
        inner.by_item.entry(event.item_id.clone()).or_default().push(idx);
        inner
            .by_learner
            .entry(event.learner_id.clone())
            .or_default()
            .push(idx);
        inner.events.push(event);
        Ok(())
    }

    async fn fetch_by_item(&self, item_id: &str) -> AdaptiveResult<Vec<ResponseEvent>> {
        let inner = self.inner.read();
        Ok(inner
            .by_item
            .get(item_id)
            .map(|ids| ids.iter().map(|&i| inner.events[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn fetch_by_learner(&self, learner_id: &str, limit: Option<usize>) -> AdaptiveResult<Vec<ResponseEvent>> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_learner.get(learner_id) else {
            return Ok(Vec::new());
        };
        let skip = limit.map_or(0, |limit| ids.len().saturating_sub(limit));
        Ok(ids[skip..].iter().map(|&i| inner.events[i].clone()).collect())
    }
}

/// Reads a JSON array of items.
pub fn load_catalog_file(path: impl AsRef<Path>) -> AdaptiveResult<Vec<Item>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)?;
    let items: Vec<Item> = serde_json::from_str(&raw)?;

    let mut seen = std::collections::HashSet::new();
    for item in &items {
        if !seen.insert(item.id.as_str()) {
            return Err(AdaptiveError::Config(format!(
                "duplicate item id {} in {}",
                item.id,
                path.display()
            )));
        }
    }

    let degenerate = items.iter().filter(|item| !item.params.is_valid()).count();
    if degenerate > 0 {
        tracing::warn!(
            path = %path.display(),
            degenerate,
            "catalog contains items with degenerate parameters; they will never be selected"
        );
    }
    tracing::info!(path = %path.display(), items = items.len(), "item catalog loaded");
    Ok(items)
}

/// Model state for one learner.
#[derive(Debug, Default)]
pub struct LearnerRecord {
    pub abilities: HashMap<AbilityScope, Vec<AbilityEstimate>>,
    pub mastery: HashMap<ConceptId, ConceptMastery>,
    pub reviews: HashMap<String, ReviewItemState>,
    pub recent_items: VecDeque<ItemId>,
    pub last_seen: HashMap<ItemId, DateTime<Utc>>,
    pub tracer_states: HashMap<CourseId, TracerState>,
}

impl LearnerRecord {
    pub fn current_ability(&self, scope: &AbilityScope) -> Option<&AbilityEstimate> {
        self.abilities.get(scope).and_then(|history| history.last())
    }

    /// Appends; earlier values stay as history.
    pub fn push_ability(&mut self, estimate: AbilityEstimate) {
        self.abilities
            .entry(estimate.scope.clone())
            .or_default()
            .push(estimate);
    }

    /// Keeps at least `window` recent administrations, and never fewer than
    /// `RECENT_HISTORY_CAP`.
    pub fn record_administration(&mut self, item_id: &str, at: DateTime<Utc>, window: usize) {
        let cap = window.max(RECENT_HISTORY_CAP);
        self.recent_items.push_back(item_id.to_string());
        while self.recent_items.len() > cap {
            self.recent_items.pop_front();
        }
        self.last_seen.insert(item_id.to_string(), at);
    }
}

#[derive(Default)]
pub struct LearnerStore {
    learners: RwLock<HashMap<LearnerId, Arc<Mutex<LearnerRecord>>>>,
}

impl LearnerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, learner_id: &str) -> Arc<Mutex<LearnerRecord>> {
        if let Some(record) = self.learners.read().get(learner_id) {
            return record.clone();
        }
        self.learners
            .write()
            .entry(learner_id.to_string())
            .or_default()
            .clone()
    }

    /// Runs `f` with exclusive access to the learner's record, creating it if needed.
    pub fn update<R>(&self, learner_id: &str, f: impl FnOnce(&mut LearnerRecord) -> R) -> R {
        let record = self.record(learner_id);
        let mut guard = record.lock();
        f(&mut guard)
    }

    /// Runs `f` against an existing record only.
    pub fn read<R>(&self, learner_id: &str, f: impl FnOnce(&LearnerRecord) -> R) -> Option<R> {
        let record = self.learners.read().get(learner_id).cloned()?;
        let guard = record.lock();
        Some(f(&guard))
    }

    pub fn contains(&self, learner_id: &str) -> bool {
        self.learners.read().contains_key(learner_id)
    }

    pub fn evict(&self, learner_id: &str) -> bool {
        self.learners.write().remove(learner_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.learners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.learners.read().is_empty()
    }

    pub fn learner_ids(&self) -> Vec<LearnerId> {
        self.learners.read().keys().cloned().collect()
    }

    /// Drops every learner's tracer state for `course_id`.
    pub fn clear_tracer_states(&self, course_id: &str) {
        let records: Vec<Arc<Mutex<LearnerRecord>>> = self.learners.read().values().cloned().collect();
        for record in records {
            record.lock().tracer_states.remove(course_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptive::types::EstimationMethod;
    use chrono::Duration;

    fn item(id: &str, course: &str) -> Item {
        Item::new(id, ItemParams::new(1.0, 0.0, 0.2)).with_course(course)
    }

    fn event(learner: &str, item: &str, at: DateTime<Utc>) -> ResponseEvent {
        ResponseEvent {
            learner_id: learner.into(),
            item_id: item.into(),
            session_id: None,
            correct: true,
            theta_before: 0.0,
            latency_ms: 1500,
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn test_catalog_filter_and_counters() {
        let catalog = InMemoryItemCatalog::from_items(vec![
            item("b", "algebra"),
            item("a", "algebra"),
            item("c", "geometry"),
        ]);
        let algebra = catalog.fetch_items(&ItemFilter::course("algebra")).await.unwrap();
        assert_eq!(algebra.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        assert_eq!(catalog.increment_exposure("a").await.unwrap(), 1);
        assert_eq!(catalog.increment_exposure("a").await.unwrap(), 2);
        catalog.update_success_rate("a", true).await.unwrap();
        let rate = catalog.update_success_rate("a", false).await.unwrap();
        assert_eq!(rate, 0.5);

        let a = catalog.get_item("a").await.unwrap().unwrap();
        assert_eq!(a.exposure_count, 2);
        assert_eq!(a.success_rate, 0.5);

        assert!(matches!(
            catalog.increment_exposure("missing").await,
            Err(AdaptiveError::UnknownItem(_))
        ));
        assert!(catalog.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_swap_requires_matching_version() {
        let catalog = InMemoryItemCatalog::from_items(vec![item("a", "algebra")]);
        let result = CalibrationResult {
            item_id: "a".into(),
            a: 1.5,
            b: 0.3,
            c: None,
            sample_size: 40,
            confidence: 0.84,
            neg_log_likelihood: 20.0,
            from_version: 0,
            timestamp: Utc::now(),
        };
        let params = catalog.swap_parameters("a", &result).await.unwrap();
        assert_eq!(params.version, 1);
        assert_eq!(params.a, 1.5);
        assert_eq!(params.c, 0.2);

        match catalog.swap_parameters("a", &result).await {
            Err(AdaptiveError::StaleCalibration {
                from_version,
                current_version,
                ..
            }) => {
                assert_eq!(from_version, 0);
                assert_eq!(current_version, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_exposure_increments() {
        let catalog = Arc::new(InMemoryItemCatalog::from_items(vec![item("a", "algebra")]));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    catalog.increment_exposure("a").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let a = catalog.get_item("a").await.unwrap().unwrap();
        assert_eq!(a.exposure_count, 800);
    }

    #[tokio::test]
    async fn test_response_log_indices() {
        let log = InMemoryResponseLog::new();
        let start = Utc::now();
        for i in 0..5 {
            log.append(event("l1", if i % 2 == 0 { "x" } else { "y" }, start + Duration::seconds(i)))
                .await
                .unwrap();
        }
        log.append(event("l2", "x", start)).await.unwrap();

        assert_eq!(log.len(), 6);
        assert_eq!(log.fetch_by_item("x").await.unwrap().len(), 4);
        let recent = log.fetch_by_learner("l1", Some(2)).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].timestamp < recent[1].timestamp);
        assert_eq!(log.fetch_by_learner("l1", None).await.unwrap().len(), 5);
        assert!(log.fetch_by_learner("nobody", None).await.unwrap().is_empty());
    }

    #[test]
    fn test_learner_store_history() {
        let store = LearnerStore::new();
        assert!(store.read("l", |_| ()).is_none());
        for theta in [0.1, 0.4] {
            store.update("l", |record| {
                record.push_ability(AbilityEstimate {
                    learner_id: "l".into(),
                    scope: AbilityScope::Global,
                    theta,
                    standard_error: Some(0.5),
                    method: EstimationMethod::ExpectedAPosteriori,
                    low_confidence: false,
                    response_count: 1,
                    timestamp: Utc::now(),
                });
            });
        }
        let (current, history) = store
            .read("l", |record| {
                (
                    record.current_ability(&AbilityScope::Global).map(|e| e.theta),
                    record.abilities[&AbilityScope::Global].len(),
                )
            })
            .unwrap();
        assert_eq!(current, Some(0.4));
        assert_eq!(history, 2);
        assert!(store.evict("l"));
        assert!(!store.contains("l"));
    }

    #[test]
    fn test_recent_history_is_capped() {
        let mut record = LearnerRecord::default();
        let now = Utc::now();
        for i in 0..(RECENT_HISTORY_CAP + 10) {
            record.record_administration(&format!("i{i}"), now, 5);
        }
        assert_eq!(record.recent_items.len(), RECENT_HISTORY_CAP);
        assert_eq!(record.recent_items.front().map(String::as_str), Some("i10"));
        assert_eq!(record.last_seen.len(), RECENT_HISTORY_CAP + 10);
    }

    #[test]
    fn test_recent_history_grows_with_large_window() {
        let mut record = LearnerRecord::default();
        let now = Utc::now();
        let window = RECENT_HISTORY_CAP * 2;
        for i in 0..(window + 3) {
            record.record_administration(&format!("i{i}"), now, window);
        }
        assert_eq!(record.recent_items.len(), window);
        assert_eq!(record.recent_items.front().map(String::as_str), Some("i3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_success_rate_stays_in_unit_interval() {
        let catalog = Arc::new(InMemoryItemCatalog::from_items(vec![item("a", "algebra")]));
        let mut handles = Vec::new();
        for task in 0..6 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                let mut max_rate: f64 = 0.0;
                for i in 0..5_000 {
                    let correct = task % 2 == 0 || i % 3 == 0;
                    let rate = catalog.update_success_rate("a", correct).await.unwrap();
                    max_rate = max_rate.max(rate);
                }
                max_rate
            }));
        }
        for handle in handles {
            let max_rate = handle.await.unwrap();
            assert!(max_rate <= 1.0, "success rate {max_rate} above 1");
        }
        let a = catalog.get_item("a").await.unwrap().unwrap();
        assert!((0.0..=1.0).contains(&a.success_rate));
    }

    #[test]
    fn test_outcome_packing_bounds_successes() {
        assert_eq!(outcome_rate(pack_outcomes(0, 0)), 0.0);
        assert_eq!(outcome_rate(pack_outcomes(4, 3)), 0.75);
        assert_eq!(outcome_rate(pack_outcomes(2, 9)), 1.0);
    }
}
