//! Challenge registration and confirmation.
//!
//! Exposure is capped: the decayed challenger total may never exceed
//! `supporter_total / payout_ratio`. A registered challenge only shares the
//! supporter pool on failure once confirmed, which requires waiting
//! [`CHALLENGER_TIMESTAMP_DELAY`] after the latest registration.

use ante_core::constants::CHALLENGER_TIMESTAMP_DELAY;
use ante_core::error::{MathError, PoolError};
use ante_core::math::checked_add;
use ante_core::types::{CallContext, Side};
use tracing::debug;

use crate::events::PoolEvent;
use crate::pool::AntePool;

impl AntePool {
    pub fn register_challenge(&mut self, ctx: &CallContext, amount: u128) -> Result<(), PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            if amount == 0 {
                return Err(PoolError::ZeroAmount);
            }
            let config = &pool.wiring()?.config;
            let (min, ratio) = (config.min_challenger_stake, config.challenger_payout_ratio);
            if amount < min {
                return Err(PoolError::BelowMinimum { side: Side::Challenger, amount, min });
            }
            pool.update_decay(ctx)?;

            let cap = pool.state.supporters.total_amount / ratio as u128;
            let challenged = pool.state.challengers.total_amount;
            if checked_add(challenged, amount)? > cap {
                return Err(PoolError::ChallengeCapExceeded {
                    requested: amount,
                    available: cap.saturating_sub(challenged),
                });
            }

            let challenger = ctx.caller;
            pool.ledger.credit(Side::Challenger, challenger, amount, &mut pool.state.challengers)?;
            let pos = pool.ledger.challenger_mut(challenger);
            pos.last_register_timestamp = ctx.timestamp;
            pos.last_register_block = ctx.block;

            debug!(pool = %pool.address(), %challenger, amount, cap, "pool: challenge registered");
            pool.emit(PoolEvent::ChallengeRegistered { challenger, amount });
            pool.pull(challenger, amount)
        })
    }

    /// Make the caller's current challenge eligible for a failure payout.
    /// Returns the confirmed balance.
    pub fn confirm_challenge(&mut self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            pool.update_decay(ctx)?;

            let challenger = ctx.caller;
            let acc = pool.state.challengers.accumulator;
            let balance = pool.ledger.balance(Side::Challenger, &challenger, &acc)?;
            if balance == 0 {
                return Err(PoolError::NotChallenger(challenger));
            }
            let registered_at = pool
                .ledger
                .challenger(&challenger)
                .map_or(0, |p| p.last_register_timestamp);
            let ready_at = registered_at
                .checked_add(CHALLENGER_TIMESTAMP_DELAY)
                .ok_or(MathError::Overflow)?;
            if ctx.timestamp < ready_at {
                return Err(PoolError::ConfirmationDelay { ready_at });
            }

            let added = pool.ledger.confirm(challenger, ctx.block, &acc)?;
            debug!(pool = %pool.address(), %challenger, confirmed = balance, added, "pool: challenge confirmed");
            pool.emit(PoolEvent::ChallengeConfirmed { challenger, confirmed: balance });
            Ok(balance)
        })
    }
}
