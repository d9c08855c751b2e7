//! Testing session state machine and the registry that owns live sessions.
//!
//! `NotStarted → InProgress → Terminated(reason)`. A session snapshots item
//! parameters at start; calibration swaps never change items mid-session.
//! Only the engine mutates a session, one turn at a time under its mutex.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::adaptive::ability::{ScoredResponse, ThetaEstimate};
use crate::adaptive::config::SessionConfig;
use crate::adaptive::error::{AdaptiveError, AdaptiveResult};
use crate::adaptive::types::{Item, ItemFilter, ItemId, LearnerId};

pub type SessionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    PoolExhausted,
    MaxItemsReached,
    PrecisionReached,
    BudgetExpired,
    Closed,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolExhausted => "pool_exhausted",
            Self::MaxItemsReached => "max_items_reached",
            Self::PrecisionReached => "precision_reached",
            Self::BudgetExpired => "budget_expired",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SessionState {
    NotStarted,
    InProgress,
    Terminated(TerminationReason),
}

/// Caller-imposed limits on top of the configured session policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBudget {
    pub max_turns: Option<usize>,
    pub deadline: Option<DateTime<Utc>>,
}

impl SessionBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn turns(max_turns: usize) -> Self {
        Self {
            max_turns: Some(max_turns),
            deadline: None,
        }
    }

    pub fn until(deadline: DateTime<Utc>) -> Self {
        Self {
            max_turns: None,
            deadline: Some(deadline),
        }
    }

    /// Fills an absent deadline from the configured time budget.
    pub fn with_defaults(mut self, config: &SessionConfig, now: DateTime<Utc>) -> Self {
        if self.deadline.is_none() {
            self.deadline = config
                .time_budget_secs
                .map(|secs| now + Duration::seconds(secs as i64));
        }
        self
    }

    pub fn is_expired(&self, turns: usize, now: DateTime<Utc>) -> bool {
        self.max_turns.is_some_and(|max| turns >= max) || self.deadline.is_some_and(|d| now >= d)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub item_id: ItemId,
    pub correct: bool,
    pub theta_before: f64,
    pub theta_after: f64,
    pub standard_error: Option<f64>,
    pub latency_ms: u64,
    pub offered_at: DateTime<Utc>,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub learner_id: LearnerId,
    pub state: SessionState,
    pub items_administered: usize,
    pub items_answered: usize,
    pub correct: usize,
    pub theta: f64,
    pub standard_error: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct Pending {
    item: Item,
    offered_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    learner_id: LearnerId,
    filter: ItemFilter,
    budget: SessionBudget,
    state: SessionState,
    pool: Vec<Item>,
    administered: Vec<ItemId>,
    pending: Option<Pending>,
    estimate: ThetaEstimate,
    responses: Vec<ScoredResponse>,
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// `history` seeds the estimator with prior responses; it is not counted
    /// towards this session's turns.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        learner_id: impl Into<String>,
        filter: ItemFilter,
        budget: SessionBudget,
        pool: Vec<Item>,
        history: Vec<ScoredResponse>,
        estimate: ThetaEstimate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            learner_id: learner_id.into(),
            filter,
            budget,
            state: SessionState::NotStarted,
            pool,
            administered: Vec::new(),
            pending: None,
            estimate,
            responses: history,
            turns: Vec::new(),
            created_at: now,
            last_activity_at: now,
            ended_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn filter(&self) -> &ItemFilter {
        &self.filter
    }

    pub fn budget(&self) -> &SessionBudget {
        &self.budget
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn estimate(&self) -> &ThetaEstimate {
        &self.estimate
    }

    pub fn responses(&self) -> &[ScoredResponse] {
        &self.responses
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn administered(&self) -> &[ItemId] {
        &self.administered
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state, SessionState::Terminated(_))
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self.state {
            SessionState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn pending_item(&self) -> Option<&Item> {
        self.pending.as_ref().map(|p| &p.item)
    }

    /// Snapshot items not yet administered in this session.
    pub fn candidates(&self) -> Vec<Item> {
        self.pool
            .iter()
            .filter(|item| !self.administered.contains(&item.id))
            .cloned()
            .collect()
    }

    pub fn budget_expired(&self, now: DateTime<Utc>) -> bool {
        self.budget.is_expired(self.turns.len(), now)
    }

    pub fn offer(&mut self, item: Item, now: DateTime<Utc>) {
        self.administered.push(item.id.clone());
        self.pending = Some(Pending {
            item,
            offered_at: now,
        });
        self.state = SessionState::InProgress;
        self.last_activity_at = now;
    }

    /// Checks a response against the pending item without mutating anything.
    pub fn validate_response(&self, item_id: &str) -> AdaptiveResult<&Item> {
        if self.is_terminated() {
            return Err(AdaptiveError::SessionTerminated(self.id.clone()));
        }
        let pending = self
            .pending
            .as_ref()
            .ok_or_else(|| AdaptiveError::NoPendingItem(self.id.clone()))?;
        if pending.item.id != item_id {
            return Err(AdaptiveError::ItemNotOffered {
                expected: pending.item.id.clone(),
                got: item_id.to_string(),
            });
        }
        Ok(&pending.item)
    }

    /// Records the scored response for the pending item and the new estimate.
    pub fn record_turn(
        &mut self,
        response: ScoredResponse,
        estimate: ThetaEstimate,
        latency_ms: u64,
        now: DateTime<Utc>,
    ) -> AdaptiveResult<&Turn> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| AdaptiveError::NoPendingItem(self.id.clone()))?;
        let turn = Turn {
            item_id: pending.item.id,
            correct: response.correct,
            theta_before: self.estimate.theta,
            theta_after: estimate.theta,
            standard_error: estimate.standard_error,
            latency_ms,
            offered_at: pending.offered_at,
            answered_at: now,
        };
        self.responses.push(response);
        self.estimate = estimate;
        self.turns.push(turn);
        self.last_activity_at = now;
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Evaluated after each turn; pool exhaustion is detected here when no
    /// candidates remain and otherwise at the next selection.
    pub fn termination_due(&self, config: &SessionConfig, now: DateTime<Utc>) -> Option<TerminationReason> {
        let answered = self.turns.len();
        if answered >= config.max_items {
            return Some(TerminationReason::MaxItemsReached);
        }
        if answered >= config.min_items
            && self
                .estimate
                .standard_error
                .is_some_and(|se| se <= config.target_standard_error)
        {
            return Some(TerminationReason::PrecisionReached);
        }
        if self.budget_expired(now) {
            return Some(TerminationReason::BudgetExpired);
        }
        if self.pending.is_none() && self.candidates().is_empty() {
            return Some(TerminationReason::PoolExhausted);
        }
        None
    }

    /// First reason wins; later calls are no-ops.
    pub fn terminate(&mut self, reason: TerminationReason, now: DateTime<Utc>) -> bool {
        if self.is_terminated() {
            return false;
        }
        self.state = SessionState::Terminated(reason);
        self.pending = None;
        self.ended_at = Some(now);
        self.last_activity_at = now;
        true
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            learner_id: self.learner_id.clone(),
            state: self.state,
            items_administered: self.administered.len(),
            items_answered: self.turns.len(),
            correct: self.turns.iter().filter(|t| t.correct).count(),
            theta: self.estimate.theta,
            standard_error: self.estimate.standard_error,
            started_at: self.created_at,
            ended_at: self.ended_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionStats {
    pub terminated: usize,
    pub abandoned: usize,
    pub busy: usize,
    pub remaining: usize,
}

impl EvictionStats {
    pub fn evicted(&self) -> usize {
        self.terminated + self.abandoned
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) -> Arc<Mutex<Session>> {
        let id = session.id.clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().insert(id, handle.clone());
        handle
    }

    pub fn get(&self, session_id: &str) -> AdaptiveResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AdaptiveError::UnknownSession(session_id.to_string()))
    }

    pub fn evict(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Removes sessions idle for longer than `max_idle`. Sessions whose turn
    /// lock is currently held are in use and skipped.
    pub fn evict_idle(&self, max_idle: Duration, now: DateTime<Utc>) -> EvictionStats {
        let snapshot: Vec<(SessionId, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut stats = EvictionStats::default();
        let mut expired = Vec::new();
        for (id, handle) in snapshot {
            let Ok(session) = handle.try_lock() else {
                stats.busy += 1;
                continue;
            };
            if now - session.last_activity_at < max_idle {
                continue;
            }
            if session.is_terminated() {
                stats.terminated += 1;
            } else {
                stats.abandoned += 1;
            }
            expired.push(id);
        }

        let mut sessions = self.sessions.write();
        for id in &expired {
            sessions.remove(id);
        }
        stats.remaining = sessions.len();
        stats
    }
}
