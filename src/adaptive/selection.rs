//! Maximum-information item selection with recency exclusion, ε-exploration
//! over never-seen items, and a bounded novelty bonus.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::adaptive::config::SelectorConfig;
use crate::adaptive::irt;
use crate::adaptive::types::{Item, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    MaxInformation,
    Exploration,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub item: Item,
    pub information: f64,
    pub novelty: f64,
    pub reason: SelectionReason,
}

/// Per-call inputs. `recent` is the learner's administration history, oldest
/// first; only its tail of `recency_window` entries is excluded.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub theta: f64,
    pub recent: &'a [ItemId],
    pub last_seen: &'a HashMap<ItemId, DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub struct ItemSelector {
    config: SelectorConfig,
}

impl ItemSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    pub fn select<R: Rng + ?Sized>(
        &self,
        candidates: &[Item],
        ctx: &SelectionContext<'_>,
        rng: &mut R,
    ) -> Option<Selection> {
        let window_start = ctx.recent.len().saturating_sub(self.config.recency_window);
        let window = &ctx.recent[window_start..];

        let eligible: Vec<(&Item, f64)> = candidates
            .iter()
            .filter(|item| !window.contains(&item.id))
            .filter_map(|item| {
                let info = irt::fisher_information(ctx.theta, &item.params);
                (info > 0.0).then_some((item, info))
            })
            .collect();

        if eligible.is_empty() {
            return None;
        }

        if self.config.exploration_rate > 0.0
            && rng.random_bool(self.config.exploration_rate.clamp(0.0, 1.0))
        {
            let unseen: Vec<&(&Item, f64)> = eligible
                .iter()
                .filter(|(item, _)| !ctx.last_seen.contains_key(&item.id))
                .collect();
            if let Some(&&(item, info)) = unseen.choose(rng) {
                return Some(Selection {
                    item: item.clone(),
                    information: info,
                    novelty: self.novelty(item, ctx),
                    reason: SelectionReason::Exploration,
                });
            }
        }

        let mut best: Option<(&Item, f64, f64, f64)> = None;
        for &(item, info) in &eligible {
            let novelty = self.novelty(item, ctx);
            let score = info + novelty;
            let better = match best {
                None => true,
                Some((current, _, _, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && (item.exposure_count, &item.id)
                                < (current.exposure_count, &current.id))
                }
            };
            if better {
                best = Some((item, info, novelty, score));
            }
        }

        best.map(|(item, information, novelty, _)| Selection {
            item: item.clone(),
            information,
            novelty,
            reason: SelectionReason::MaxInformation,
        })
    }

    /// Full bonus for unseen items, growing linearly with age up to the horizon.
    pub fn novelty(&self, item: &Item, ctx: &SelectionContext<'_>) -> f64 {
        let bonus = self.config.novelty_bonus.max(0.0);
        match ctx.last_seen.get(&item.id) {
            None => bonus,
            Some(seen_at) => {
                let days = (ctx.now - *seen_at).num_seconds().max(0) as f64 / 86_400.0;
                let horizon = self.config.novelty_horizon_days.max(f64::EPSILON);
                bonus * (days / horizon).min(1.0)
            }
        }
    }
}

impl Default for ItemSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}
