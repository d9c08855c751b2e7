use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adaptive::ability::{AbilityEstimator, ScoredResponse, ThetaEstimate};
use crate::adaptive::calibration::{CalibrationObservation, ItemCalibrator};
use crate::adaptive::config::AdaptiveConfig;
use crate::adaptive::error::{AdaptiveError, AdaptiveResult};
use crate::adaptive::knowledge::{Interaction, KnowledgeTracer, TracerRegistry, TrainingReport};
use crate::adaptive::mastery::{MasteryAssessment, MasteryDelta, MasteryTracker};
use crate::adaptive::memory::{DueReview, ReviewDifficulty, SpacedRepetitionScheduler};
use crate::adaptive::selection::{ItemSelector, SelectionContext};
use crate::adaptive::session::{
    EvictionStats, Session, SessionBudget, SessionId, SessionRegistry, SessionSummary,
    TerminationReason,
};
use crate::adaptive::store::{
    InMemoryItemCatalog, InMemoryResponseLog, ItemCatalog, LearnerRecord, LearnerStore, ResponseLog,
};
use crate::adaptive::types::{
    AbilityEstimate, AbilityScope, Answer, CalibrationOutcome, ConceptId, ConceptMastery, Item,
    ItemFilter, ItemId, LearnerId, ResponseEvent, ReviewItemState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action", content = "reason")]
pub enum NextAction {
    Continue,
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub correct: bool,
    pub ability: AbilityEstimate,
    pub mastery_delta: Vec<MasteryDelta>,
    pub reviews: Vec<ReviewItemState>,
    pub next_action: NextAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: usize,
    pub calibrated: usize,
    pub insufficient_data: usize,
    pub not_converged: usize,
    /// Fitted, but the item's parameters changed while fitting.
    pub stale: usize,
    /// Fitted items whose swap failed in the catalog; not counted above.
    pub failures: Vec<CalibrationFailure>,
    pub outcomes: Vec<CalibrationOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationFailure {
    pub item_id: ItemId,
    pub error: String,
}

/// Entry point of the adaptive core. Shared as `Arc<AdaptiveEngine>`.
pub struct AdaptiveEngine {
    config: AdaptiveConfig,
    catalog: Arc<dyn ItemCatalog>,
    responses: Arc<dyn ResponseLog>,
    estimator: AbilityEstimator,
    selector: ItemSelector,
    calibrator: Arc<ItemCalibrator>,
    mastery: MasteryTracker,
    scheduler: SpacedRepetitionScheduler,
    sessions: SessionRegistry,
    learners: LearnerStore,
    tracers: TracerRegistry,
    rng: Mutex<StdRng>,
}

impl AdaptiveEngine {
    pub fn new(
        config: AdaptiveConfig,
        catalog: Arc<dyn ItemCatalog>,
        responses: Arc<dyn ResponseLog>,
    ) -> Self {
        Self {
            estimator: AbilityEstimator::new(config.ability.clone()),
            selector: ItemSelector::new(config.selector.clone()),
            calibrator: Arc::new(ItemCalibrator::new(config.calibration.clone())),
            mastery: MasteryTracker::new(
                config.mastery.clone(),
                config.two_state.clone(),
                config.tracer.tracer_weight,
            ),
            scheduler: SpacedRepetitionScheduler::new(config.scheduler.clone()),
            sessions: SessionRegistry::new(),
            learners: LearnerStore::new(),
            tracers: TracerRegistry::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
            config,
            catalog,
            responses,
        }
    }

    /// Engine over process-local collaborators.
    pub fn in_memory(config: AdaptiveConfig, items: Vec<Item>) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryItemCatalog::from_items(items)),
            Arc::new(InMemoryResponseLog::new()),
        )
    }

    /// Fixes the selector's random source, for reproducible simulations.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn ItemCatalog> {
        &self.catalog
    }

    pub fn response_log(&self) -> &Arc<dyn ResponseLog> {
        &self.responses
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn learners(&self) -> &LearnerStore {
        &self.learners
    }

    pub fn tracers(&self) -> &TracerRegistry {
        &self.tracers
    }

    // ========== Sessions ==========

    pub async fn start_session(
        &self,
        learner_id: &str,
        filter: ItemFilter,
        budget: SessionBudget,
    ) -> AdaptiveResult<SessionId> {
        let now = Utc::now();
        let pool = self.catalog.fetch_items(&filter).await?;
        let history = self.history_responses(learner_id, &pool).await?;

        let previous = self
            .learners
            .read(learner_id, |record| {
                record
                    .current_ability(&AbilityScope::Global)
                    .map(theta_from_estimate)
            })
            .flatten();
        let estimate = self.estimator.estimate(
            &history,
            self.config.ability.default_method,
            previous.as_ref(),
        );

        let session_id = Uuid::new_v4().to_string();
        let budget = budget.with_defaults(&self.config.session, now);
        let pool_size = pool.len();
        let history_len = history.len();
        let theta = estimate.theta;
        self.sessions.insert(Session::new(
            session_id.clone(),
            learner_id,
            filter,
            budget,
            pool,
            history,
            estimate,
            now,
        ));

        tracing::info!(
            session_id = %session_id,
            learner_id = %learner_id,
            pool_size,
            history = history_len,
            theta,
            "session started"
        );
        Ok(session_id)
    }

    /// The pending item if one is outstanding, otherwise a fresh selection.
    /// `None` once the session has terminated.
    pub async fn next_item(&self, session_id: &str) -> AdaptiveResult<Option<Item>> {
        let handle = self.sessions.get(session_id)?;
        let mut session = handle.lock().await;

        if session.is_terminated() {
            return Ok(None);
        }
        if let Some(item) = session.pending_item() {
            return Ok(Some(item.clone()));
        }

        let now = Utc::now();
        if session.budget_expired(now) {
            self.finish(&mut session, TerminationReason::BudgetExpired, now);
            return Ok(None);
        }

        let candidates = session.candidates();
        let window = self.config.selector.recency_window;
        let (recent, last_seen) = self
            .learners
            .read(session.learner_id(), |record| {
                let skip = record.recent_items.len().saturating_sub(window);
                let recent: Vec<ItemId> = record.recent_items.iter().skip(skip).cloned().collect();
                let last_seen: HashMap<ItemId, DateTime<Utc>> = candidates
                    .iter()
                    .filter_map(|item| record.last_seen.get(&item.id).map(|at| (item.id.clone(), *at)))
                    .collect();
                (recent, last_seen)
            })
            .unwrap_or_default();

        let ctx = SelectionContext {
            theta: session.estimate().theta,
            recent: &recent,
            last_seen: &last_seen,
            now,
        };
        let selection = {
            let mut rng = self.rng.lock();
            self.selector.select(&candidates, &ctx, &mut *rng)
        };

        let Some(selection) = selection else {
            self.finish(&mut session, TerminationReason::PoolExhausted, now);
            return Ok(None);
        };

        let exposure = self.catalog.increment_exposure(&selection.item.id).await?;
        self.learners.update(session.learner_id(), |record| {
            record.record_administration(&selection.item.id, now, window)
        });

        tracing::debug!(
            session_id = %session_id,
            item_id = %selection.item.id,
            information = selection.information,
            novelty = selection.novelty,
            reason = ?selection.reason,
            exposure,
            "item selected"
        );

        let item = selection.item;
        session.offer(item.clone(), now);
        Ok(Some(item))
    }

    pub async fn submit_response(
        &self,
        session_id: &str,
        item_id: &str,
        answer: Answer,
        latency_ms: u64,
    ) -> AdaptiveResult<SubmitOutcome> {
        let handle = self.sessions.get(session_id)?;
        let mut session = handle.lock().await;

        let item = session.validate_response(item_id)?.clone();
        let correct = answer.score(item.answer_key.as_deref()).ok_or_else(|| {
            AdaptiveError::MalformedResponse(format!(
                "text answer for item {} which has no answer key",
                item.id
            ))
        })?;

        let now = Utc::now();
        let learner_id = session.learner_id().to_string();
        let theta_before = session.estimate().theta;

        self.responses
            .append(ResponseEvent {
                learner_id: learner_id.clone(),
                item_id: item.id.clone(),
                session_id: Some(session_id.to_string()),
                correct,
                theta_before,
                latency_ms,
                timestamp: now,
            })
            .await?;
        self.catalog.update_success_rate(&item.id, correct).await?;

        let response = ScoredResponse {
            params: item.params,
            correct,
            concepts: item.concepts.clone(),
        };
        let mut pattern = session.responses().to_vec();
        pattern.push(response.clone());

        let method = self.config.ability.default_method;
        let estimate = self
            .estimator
            .estimate(&pattern, method, Some(session.estimate()));

        let previous_concepts: Vec<Option<ThetaEstimate>> = self
            .learners
            .read(&learner_id, |record| {
                item.concepts
                    .iter()
                    .map(|c| {
                        record
                            .current_ability(&AbilityScope::Concept(c.clone()))
                            .map(theta_from_estimate)
                    })
                    .collect()
            })
            .unwrap_or_else(|| vec![None; item.concepts.len()]);
        let concept_estimates: Vec<(ConceptId, ThetaEstimate)> = item
            .concepts
            .iter()
            .zip(&previous_concepts)
            .map(|(concept, previous)| {
                let est = self
                    .estimator
                    .estimate_concept(&pattern, concept, method, previous.as_ref());
                (concept.clone(), est)
            })
            .collect();

        let tracer = item
            .course_id
            .as_deref()
            .and_then(|course| self.tracers.get(course).map(|model| (course.to_string(), model)));
        let difficulty = ReviewDifficulty::from_latency(latency_ms, self.scheduler.config());

        let (ability, mastery_delta, reviews) = self.learners.update(&learner_id, |record| {
            let ability = estimate_record(&learner_id, AbilityScope::Global, &estimate, now);
            record.push_ability(ability.clone());
            for (concept, est) in &concept_estimates {
                record.push_ability(estimate_record(
                    &learner_id,
                    AbilityScope::Concept(concept.clone()),
                    est,
                    now,
                ));
            }

            let tracer_probabilities = match &tracer {
                Some((course, model)) => advance_tracer(record, course, model, &item, correct, now),
                None => HashMap::new(),
            };

            let deltas: Vec<MasteryDelta> = item
                .concepts
                .iter()
                .map(|concept| {
                    let entry = record.mastery.entry(concept.clone()).or_insert_with(|| {
                        self.mastery
                            .initial(&learner_id, concept, item.course_id.clone())
                    });
                    self.mastery.update(
                        entry,
                        correct,
                        tracer_probabilities.get(concept).copied(),
                        now,
                    )
                })
                .collect();

            let reviews: Vec<ReviewItemState> = item
                .review_units()
                .into_iter()
                .map(|unit| {
                    let next = self.scheduler.review(
                        record.reviews.get(&unit),
                        &learner_id,
                        &unit,
                        correct,
                        difficulty,
                        now,
                    );
                    record.reviews.insert(unit, next.clone());
                    next
                })
                .collect();

            (ability, deltas, reviews)
        });

        for delta in mastery_delta.iter().filter(|d| d.newly_mastered) {
            tracing::info!(
                learner_id = %learner_id,
                concept_id = %delta.concept_id,
                mastery = delta.after,
                "concept mastered"
            );
        }

        session.record_turn(response, estimate, latency_ms, now)?;
        let next_action = match session.termination_due(&self.config.session, now) {
            Some(reason) => {
                self.finish(&mut session, reason, now);
                NextAction::Terminated(reason)
            }
            None => NextAction::Continue,
        };

        tracing::debug!(
            session_id = %session_id,
            learner_id = %learner_id,
            item_id = %item.id,
            correct,
            theta_before,
            theta_after = ability.theta,
            standard_error = ?ability.standard_error,
            low_confidence = ability.low_confidence,
            "response recorded"
        );

        Ok(SubmitOutcome {
            correct,
            ability,
            mastery_delta,
            reviews,
            next_action,
        })
    }

    pub async fn end_session(&self, session_id: &str) -> AdaptiveResult<SessionSummary> {
        let handle = self.sessions.get(session_id)?;
        let mut session = handle.lock().await;
        self.finish(&mut session, TerminationReason::Closed, Utc::now());
        Ok(session.summary())
    }

    pub async fn session_summary(&self, session_id: &str) -> AdaptiveResult<SessionSummary> {
        let handle = self.sessions.get(session_id)?;
        let session = handle.lock().await;
        Ok(session.summary())
    }

    pub fn cleanup_sessions(&self, max_idle: Duration) -> EvictionStats {
        self.sessions.evict_idle(max_idle, Utc::now())
    }

    fn finish(&self, session: &mut Session, reason: TerminationReason, now: DateTime<Utc>) {
        if session.terminate(reason, now) {
            let summary = session.summary();
            tracing::info!(
                session_id = %summary.session_id,
                learner_id = %summary.learner_id,
                reason = reason.as_str(),
                answered = summary.items_answered,
                correct = summary.correct,
                theta = summary.theta,
                "session terminated"
            );
        }
    }

    async fn history_responses(
        &self,
        learner_id: &str,
        pool: &[Item],
    ) -> AdaptiveResult<Vec<ScoredResponse>> {
        let window = self.config.session.history_window;
        if window == 0 {
            return Ok(Vec::new());
        }
        let events = self
            .responses
            .fetch_by_learner(learner_id, Some(window))
            .await?;

        let by_id: HashMap<&str, &Item> = pool.iter().map(|item| (item.id.as_str(), item)).collect();
        let mut history = Vec::with_capacity(events.len());
        for event in events {
            let item = match by_id.get(event.item_id.as_str()) {
                Some(item) => (*item).clone(),
                None => match self.catalog.get_item(&event.item_id).await? {
                    Some(item) => item,
                    None => continue,
                },
            };
            history.push(ScoredResponse {
                params: item.params,
                correct: event.correct,
                concepts: item.concepts,
            });
        }
        Ok(history)
    }

    // ========== Learner model ==========

    /// Current global estimate; the prior for a learner with no responses.
    pub fn get_ability(&self, learner_id: &str) -> AbilityEstimate {
        self.learners
            .read(learner_id, |record| {
                record.current_ability(&AbilityScope::Global).cloned()
            })
            .flatten()
            .unwrap_or_else(|| {
                let prior = self.estimator.prior(self.config.ability.default_method);
                estimate_record(learner_id, AbilityScope::Global, &prior, Utc::now())
            })
    }

    pub fn get_concept_ability(&self, learner_id: &str, concept_id: &str) -> Option<AbilityEstimate> {
        self.learners
            .read(learner_id, |record| {
                record
                    .current_ability(&AbilityScope::Concept(concept_id.to_string()))
                    .cloned()
            })
            .flatten()
    }

    pub fn ability_history(&self, learner_id: &str, scope: &AbilityScope) -> Vec<AbilityEstimate> {
        self.learners
            .read(learner_id, |record| {
                record.abilities.get(scope).cloned().unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Mastery records sorted by concept, optionally restricted to one course.
    pub fn get_mastery(&self, learner_id: &str, course_id: Option<&str>) -> Vec<ConceptMastery> {
        let mut records: Vec<ConceptMastery> = self
            .learners
            .read(learner_id, |record| {
                record
                    .mastery
                    .values()
                    .filter(|m| course_id.is_none() || m.course_id.as_deref() == course_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.concept_id.cmp(&b.concept_id));
        records
    }

    pub fn assess_mastery(&self, learner_id: &str, concept_id: &str) -> MasteryAssessment {
        let record = self
            .learners
            .read(learner_id, |record| record.mastery.get(concept_id).cloned())
            .flatten();
        self.mastery.assess(concept_id, record.as_ref())
    }

    pub fn get_due_reviews(&self, learner_id: &str, limit: Option<usize>) -> Vec<ReviewItemState> {
        self.review_queue(learner_id, limit)
            .into_iter()
            .map(|due| due.state)
            .collect()
    }

    pub fn review_queue(&self, learner_id: &str, limit: Option<usize>) -> Vec<DueReview> {
        let now = Utc::now();
        self.learners
            .read(learner_id, |record| {
                self.scheduler.queue(record.reviews.values(), now, limit)
            })
            .unwrap_or_default()
    }

    // ========== Calibration ==========

    async fn observations(&self, item_id: &str) -> AdaptiveResult<Vec<CalibrationObservation>> {
        Ok(self
            .responses
            .fetch_by_item(item_id)
            .await?
            .into_iter()
            .map(|event| CalibrationObservation {
                theta: event.theta_before,
                correct: event.correct,
            })
            .collect())
    }

    /// Refits one item and swaps its parameters when the fit succeeds.
    pub async fn run_calibration(&self, item_id: &str) -> AdaptiveResult<CalibrationOutcome> {
        let item = self
            .catalog
            .get_item(item_id)
            .await?
            .ok_or_else(|| AdaptiveError::UnknownItem(item_id.to_string()))?;
        let observations = self.observations(item_id).await?;

        let calibrator = Arc::clone(&self.calibrator);
        let now = Utc::now();
        let outcome =
            tokio::task::spawn_blocking(move || calibrator.calibrate(&item, &observations, now))
                .await?;

        let result = match outcome {
            CalibrationOutcome::Calibrated(result) => result,
            other => return Ok(other),
        };
        match self.catalog.swap_parameters(item_id, &result).await {
            Ok(params) => {
                tracing::info!(
                    item_id = %item_id,
                    a = params.a,
                    b = params.b,
                    c = params.c,
                    version = params.version,
                    sample_size = result.sample_size,
                    "item parameters recalibrated"
                );
                Ok(CalibrationOutcome::Calibrated(result))
            }
            Err(AdaptiveError::StaleCalibration {
                item_id,
                from_version,
                current_version,
            }) => Ok(stale_outcome(item_id, from_version, current_version)),
            Err(err) => Err(err),
        }
    }

    pub async fn run_calibration_batch(&self, filter: &ItemFilter) -> AdaptiveResult<CalibrationReport> {
        let started_at = Utc::now();
        let items = self.catalog.fetch_items(filter).await?;
        let mut batch = Vec::with_capacity(items.len());
        for item in items {
            let observations = self.observations(&item.id).await?;
            batch.push((item, observations));
        }

        let calibrator = Arc::clone(&self.calibrator);
        let outcomes =
            tokio::task::spawn_blocking(move || calibrator.calibrate_batch(&batch, started_at))
                .await?;

        let mut report = CalibrationReport {
            started_at,
            finished_at: started_at,
            items: outcomes.len(),
            calibrated: 0,
            insufficient_data: 0,
            not_converged: 0,
            stale: 0,
            failures: Vec::new(),
            outcomes: Vec::with_capacity(outcomes.len()),
        };
        for outcome in outcomes {
            let outcome = match outcome {
                CalibrationOutcome::Calibrated(result) => {
                    match self.catalog.swap_parameters(&result.item_id, &result).await {
                        Ok(_) => CalibrationOutcome::Calibrated(result),
                        Err(AdaptiveError::StaleCalibration {
                            item_id,
                            from_version,
                            current_version,
                        }) => stale_outcome(item_id, from_version, current_version),
                        Err(err) => {
                            tracing::warn!(
                                item_id = %result.item_id,
                                error = %err,
                                "parameter swap failed, item left unchanged"
                            );
                            report.failures.push(CalibrationFailure {
                                item_id: result.item_id,
                                error: err.to_string(),
                            });
                            continue;
                        }
                    }
                }
                other => other,
            };
            match &outcome {
                CalibrationOutcome::Calibrated(_) => report.calibrated += 1,
                CalibrationOutcome::InsufficientData { .. } => report.insufficient_data += 1,
                CalibrationOutcome::NotConverged { .. } => report.not_converged += 1,
                CalibrationOutcome::Stale { .. } => report.stale += 1,
            }
            report.outcomes.push(outcome);
        }
        report.finished_at = Utc::now();

        tracing::info!(
            items = report.items,
            calibrated = report.calibrated,
            insufficient_data = report.insufficient_data,
            not_converged = report.not_converged,
            stale = report.stale,
            failed = report.failures.len(),
            "calibration batch finished"
        );
        Ok(report)
    }

    // ========== Knowledge tracing ==========

    /// Fits a tracer on every logged sequence for the course's items and
    /// installs it, seeding each learner's state from their history.
    pub async fn train_tracer(&self, course_id: &str) -> AdaptiveResult<TrainingReport> {
        let items = self.catalog.fetch_items(&ItemFilter::course(course_id)).await?;
        let mut concepts: Vec<ConceptId> = items
            .iter()
            .flat_map(|item| item.concepts.iter().cloned())
            .collect();
        concepts.sort();
        concepts.dedup();
        if concepts.is_empty() {
            return Err(AdaptiveError::Config(format!(
                "course {course_id} has no concept-tagged items"
            )));
        }

        let mut grouped: BTreeMap<LearnerId, Vec<(DateTime<Utc>, ConceptId, bool)>> = BTreeMap::new();
        for item in &items {
            for event in self.responses.fetch_by_item(&item.id).await? {
                let steps = grouped.entry(event.learner_id.clone()).or_default();
                for concept in &item.concepts {
                    steps.push((event.timestamp, concept.clone(), event.correct));
                }
            }
        }
        let (learners, sequences): (Vec<LearnerId>, Vec<Vec<Interaction>>) = grouped
            .into_iter()
            .map(|(learner, mut steps)| {
                steps.sort_by_key(|(timestamp, _, _)| *timestamp);
                let sequence: Vec<Interaction> = steps
                    .into_iter()
                    .map(|(timestamp, concept_id, correct)| Interaction {
                        concept_id,
                        correct,
                        timestamp,
                    })
                    .collect();
                (learner, sequence)
            })
            .unzip();

        let mut tracer = KnowledgeTracer::new(concepts, self.config.tracer.clone())?;
        let (tracer, report, states) = tokio::task::spawn_blocking(move || {
            let report = tracer.train(&sequences);
            let states: Vec<_> = learners
                .into_iter()
                .zip(&sequences)
                .filter_map(|(learner, sequence)| {
                    tracer.replay(sequence).ok().map(|(state, _)| (learner, state))
                })
                .collect();
            (tracer, report, states)
        })
        .await?;

        self.learners.clear_tracer_states(course_id);
        let seeded = states.len();
        for (learner, state) in states {
            self.learners.update(&learner, |record| {
                record.tracer_states.insert(course_id.to_string(), state);
            });
        }
        self.tracers.install(course_id, tracer);

        tracing::info!(
            course_id = %course_id,
            sequences = report.sequences,
            learners = seeded,
            final_loss = report.final_loss,
            "knowledge tracer installed"
        );
        Ok(report)
    }

    /// Installs a pre-trained tracer. Learner states for the course restart.
    pub fn install_tracer(&self, course_id: &str, tracer: KnowledgeTracer) -> Option<Arc<KnowledgeTracer>> {
        self.learners.clear_tracer_states(course_id);
        self.tracers.install(course_id, tracer)
    }
}

/// Steps the learner's tracer state through the item's concepts and returns
/// the post-response probabilities once the state is warm.
fn advance_tracer(
    record: &mut LearnerRecord,
    course_id: &str,
    model: &KnowledgeTracer,
    item: &Item,
    correct: bool,
    now: DateTime<Utc>,
) -> HashMap<ConceptId, f64> {
    let state = record
        .tracer_states
        .entry(course_id.to_string())
        .or_insert_with(|| model.initial_state());
    for concept in &item.concepts {
        let interaction = Interaction {
            concept_id: concept.clone(),
            correct,
            timestamp: now,
        };
        if let Err(err) = model.step(state, &interaction) {
            tracing::warn!(
                course_id = %course_id,
                item_id = %item.id,
                error = %err,
                "tracer step rejected, using two-state mastery"
            );
            return HashMap::new();
        }
    }
    if !model.is_warm(state) {
        return HashMap::new();
    }
    let probabilities = model.predict(state);
    item.concepts
        .iter()
        .filter_map(|concept| {
            model
                .concept_index(concept)
                .map(|q| (concept.clone(), probabilities[q]))
        })
        .collect()
}

fn stale_outcome(item_id: ItemId, from_version: u32, current_version: u32) -> CalibrationOutcome {
    tracing::warn!(
        item_id = %item_id,
        from_version,
        current_version,
        "calibration result is stale, parameters left unchanged"
    );
    CalibrationOutcome::Stale {
        item_id,
        from_version,
        current_version,
    }
}

fn theta_from_estimate(estimate: &AbilityEstimate) -> ThetaEstimate {
    ThetaEstimate {
        theta: estimate.theta,
        standard_error: estimate.standard_error,
        method: estimate.method,
        converged: !estimate.low_confidence,
        low_confidence: estimate.low_confidence,
        response_count: estimate.response_count,
    }
}

fn estimate_record(
    learner_id: &str,
    scope: AbilityScope,
    estimate: &ThetaEstimate,
    now: DateTime<Utc>,
) -> AbilityEstimate {
    AbilityEstimate {
        learner_id: learner_id.to_string(),
        scope,
        theta: estimate.theta,
        standard_error: estimate.standard_error,
        method: estimate.method,
        low_confidence: estimate.low_confidence,
        response_count: estimate.response_count,
        timestamp: now,
    }
}
