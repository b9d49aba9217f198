//! Decay engine implementing the [`DecayCalculator`] trait.
//!
//! Decay is linear in elapsed time: `fraction = rate * elapsed / (100 * year)`,
//! capped at 1.0. The decayed amount is split between stakers and the
//! assertion author, and [`DecayEngine::advance`] folds it into the two
//! side accumulators. All arithmetic is integer-only with u128 values and
//! exact [`mul_div`] products.

use ante_core::constants::{FIXED_ONE, PERCENT_PRECISION, SECONDS_PER_YEAR};
use ante_core::error::MathError;
use ante_core::math::{checked_add, checked_sub, mul_div, percent_of};
use ante_core::traits::DecayCalculator;
use ante_core::types::{DecaySplit, DecayState, PoolConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a call to [`DecayEngine::advance`] did.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecayOutcome {
    /// The pool has failed; nothing was touched.
    Frozen,
    /// Clock refreshed only: a side is empty or no time passed.
    Paused,
    /// Decay was moved across the sides.
    Applied {
        split: DecaySplit,
        /// The challenger side decayed completely and its accumulator
        /// moved to a new epoch.
        challengers_wiped: bool,
    },
}

impl DecayOutcome {
    pub fn split(&self) -> Option<DecaySplit> {
        match self {
            DecayOutcome::Applied { split, .. } => Some(*split),
            _ => None,
        }
    }

    pub fn challengers_wiped(&self) -> bool {
        matches!(self, DecayOutcome::Applied { challengers_wiped: true, .. })
    }
}

/// The production decay calculator for one pool.
///
/// Rates are integer percentages fixed at pool creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayEngine {
    decay_rate: u64,
    author_reward_rate: u64,
}

impl DecayEngine {
    pub fn new(decay_rate: u64, author_reward_rate: u64) -> Self {
        Self { decay_rate, author_reward_rate }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.decay_rate, config.author_reward_rate)
    }

    pub fn decay_rate(&self) -> u64 {
        self.decay_rate
    }

    pub fn author_reward_rate(&self) -> u64 {
        self.author_reward_rate
    }

    /// Split `total` at `fraction`. A fraction of 1.0 or more takes the
    /// whole amount.
    fn split_at(&self, total: u128, fraction: u128) -> Result<DecaySplit, MathError> {
        let fraction = fraction.min(FIXED_ONE);
        let decayed = if fraction == FIXED_ONE {
            total
        } else {
            mul_div(total, fraction, FIXED_ONE)?
        };
        let author_share = percent_of(decayed, self.author_reward_rate as u128)?;
        // Rounding remainder stays with the stakers.
        let staker_share = checked_sub(decayed, author_share)?;
        Ok(DecaySplit { fraction, total: decayed, staker_share, author_share })
    }

    /// Bring `state` forward to `timestamp` / `block`.
    ///
    /// A frozen state is left untouched. Otherwise the clock always moves
    /// forward, even when decay is paused, so idle time never accrues later.
    pub fn advance(
        &self,
        state: &mut DecayState,
        timestamp: u64,
        block: u64,
    ) -> Result<DecayOutcome, MathError> {
        if state.frozen {
            return Ok(DecayOutcome::Frozen);
        }

        let elapsed = timestamp.saturating_sub(state.last_update_timestamp);
        if !state.is_decaying() || elapsed == 0 {
            fold_parked(state)?;
            touch(state, timestamp, block);
            return Ok(DecayOutcome::Paused);
        }

        let challenger_total = state.challengers.total_amount;
        let mut split = self.compute_decay(challenger_total, elapsed)?;

        let remaining = if split.fraction >= FIXED_ONE {
            0
        } else {
            mul_div(
                state.challengers.accumulator.multiplier,
                FIXED_ONE - split.fraction,
                FIXED_ONE,
            )?
        };
        let challengers_wiped = remaining == 0;
        if challengers_wiped {
            // Multiplier underflowed: everything left is decayed.
            split = self.split_at(challenger_total, FIXED_ONE)?;
            state.challengers.accumulator.rebase();
            state.challengers.total_amount = 0;
            state.challengers.num_users = 0;
            debug!(
                epoch = state.challengers.accumulator.epoch,
                decayed = split.total,
                "decay: challenger side exhausted, accumulator rebased"
            );
        } else {
            state.challengers.accumulator.multiplier = remaining;
            state.challengers.total_amount = checked_sub(challenger_total, split.total)?;
        }

        state.parked_staker_decay = checked_add(state.parked_staker_decay, split.staker_share)?;
        fold_parked(state)?;
        state.unclaimed_author_reward =
            checked_add(state.unclaimed_author_reward, split.author_share)?;
        touch(state, timestamp, block);

        debug!(
            elapsed,
            fraction = split.fraction,
            decayed = split.total,
            staker_share = split.staker_share,
            author_share = split.author_share,
            "decay: applied"
        );
        Ok(DecayOutcome::Applied { split, challengers_wiped })
    }

    /// `state` as it would read at `timestamp`, without mutating it.
    pub fn preview(&self, state: &DecayState, timestamp: u64) -> Result<DecayState, MathError> {
        let mut projected = *state;
        self.advance(&mut projected, timestamp, state.last_update_block)?;
        Ok(projected)
    }
}

/// Credit parked staker decay once a supporter total exists to absorb it.
fn fold_parked(state: &mut DecayState) -> Result<(), MathError> {
    let parked = state.parked_staker_decay;
    let total = state.supporters.total_amount;
    if parked == 0 || total == 0 {
        return Ok(());
    }
    let grown = checked_add(total, parked)?;
    let acc = &mut state.supporters.accumulator;
    acc.multiplier = mul_div(acc.multiplier, grown, total)?;
    state.supporters.total_amount = grown;
    state.parked_staker_decay = 0;
    Ok(())
}

fn touch(state: &mut DecayState, timestamp: u64, block: u64) {
    state.last_update_timestamp = state.last_update_timestamp.max(timestamp);
    state.last_update_block = state.last_update_block.max(block);
}

impl DecayCalculator for DecayEngine {
    fn decay_fraction(&self, elapsed_secs: u64) -> Result<u128, MathError> {
        if elapsed_secs == 0 {
            return Ok(0);
        }
        let per_year = FIXED_ONE
            .checked_mul(self.decay_rate as u128)
            .ok_or(MathError::Overflow)?;
        let denominator = PERCENT_PRECISION * SECONDS_PER_YEAR as u128;
        let fraction = mul_div(per_year, elapsed_secs as u128, denominator)?;
        Ok(fraction.min(FIXED_ONE))
    }

    fn compute_decay(&self, challenger_total: u128, elapsed_secs: u64) -> Result<DecaySplit, MathError> {
        let fraction = self.decay_fraction(elapsed_secs)?;
        self.split_at(challenger_total, fraction)
    }
}
