//! Hot ranking for Semaphore.
//!
//! Items are scored by dampened engagement decayed by age:
//!
//! ```text
//! score = (b + ln(L+1)*wL + ln(S+1)*wS) / (age_hours + s)^g
//! ```
//!
//! Results are totally ordered by `(score DESC, item_id DESC)`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::DbPool;
use crate::item::ItemRepository;
use crate::Result;

/// Scoring constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreParams {
    /// Base score `b`.
    pub base: f64,
    /// Like weight `wL`.
    pub like_weight: f64,
    /// Save weight `wS`.
    pub save_weight: f64,
    /// Smoothing hours `s`.
    pub smoothing: f64,
    /// Gravity exponent `g`.
    pub gravity: f64,
}

impl Default for ScoreParams {
    fn default() -> Self {
        Self {
            base: 1.0,
            like_weight: 1.0,
            save_weight: 3.0,
            smoothing: 10.0,
            gravity: 1.5,
        }
    }
}

/// Per-item inputs to the score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInput {
    pub item_id: i64,
    pub likes: i64,
    pub saves: i64,
    /// Start of the item's age.
    pub published_at: DateTime<Utc>,
}

/// A scored item. Ephemeral, captured in pagination snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    pub item_id: i64,
    pub score: f64,
}

impl ItemScore {
    /// Rank order: higher score first, then higher ID first.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.item_id.cmp(&self.item_id))
    }
}

/// Compute the score of one item at `now`.
pub fn score(params: &ScoreParams, input: &ScoreInput, now: DateTime<Utc>) -> f64 {
    let age_hours = ((now - input.published_at).num_milliseconds() as f64 / 3_600_000.0).max(0.0);
    let likes = input.likes.max(0) as f64;
    let saves = input.saves.max(0) as f64;

    let engagement =
        params.base + (likes + 1.0).ln() * params.like_weight + (saves + 1.0).ln() * params.save_weight;
    engagement / (age_hours + params.smoothing).powf(params.gravity)
}

/// Score and order `inputs`, keeping the top `limit`.
pub fn rank(
    params: &ScoreParams,
    inputs: &[ScoreInput],
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<ItemScore> {
    let mut scores: Vec<ItemScore> = inputs
        .iter()
        .map(|input| ItemScore {
            item_id: input.item_id,
            score: score(params, input, now),
        })
        .collect();

    scores.sort_by(ItemScore::rank_cmp);
    scores.truncate(limit);
    scores
}

/// Produces ranked snapshots of a wall.
pub struct RankingEngine<'a> {
    pool: &'a DbPool,
    params: ScoreParams,
    candidate_pool: usize,
}

impl<'a> RankingEngine<'a> {
    /// Create a new engine.
    ///
    /// At most `candidate_pool` of the most recent items are scored.
    pub fn new(pool: &'a DbPool, params: ScoreParams, candidate_pool: usize) -> Self {
        Self {
            pool,
            params,
            candidate_pool,
        }
    }

    /// Rank a wall's items at `now`, keeping the top `size`.
    pub async fn snapshot(
        &self,
        wall_id: i64,
        size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemScore>> {
        let inputs = ItemRepository::new(self.pool)
            .score_inputs_for_wall(wall_id, self.candidate_pool.max(size))
            .await?;

        let ranked = rank(&self.params, &inputs, now, size);
        debug!(
            wall_id,
            candidates = inputs.len(),
            ranked = ranked.len(),
            "ranked snapshot"
        );
        Ok(ranked)
    }
}
