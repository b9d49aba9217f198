//! Staking, lock extension, unstaking and the two-phase withdrawal.
//!
//! Supporter exits go through a pending sub-balance released after
//! [`UNSTAKE_DELAY`]; challenger unstakes pay out immediately.

use ante_core::constants::{MAX_STAKE_COMMITMENT, MIN_STAKE_COMMITMENT, UNSTAKE_DELAY};
use ante_core::error::{MathError, PoolError};
use ante_core::types::{CallContext, Side};
use tracing::debug;

use crate::events::PoolEvent;
use crate::pool::AntePool;

fn check_commitment(secs: u64) -> Result<(), PoolError> {
    if secs < MIN_STAKE_COMMITMENT {
        return Err(PoolError::LockTooShort { secs, min: MIN_STAKE_COMMITMENT });
    }
    if secs > MAX_STAKE_COMMITMENT {
        return Err(PoolError::LockTooLong { secs, max: MAX_STAKE_COMMITMENT });
    }
    Ok(())
}

impl AntePool {
    /// Lock `amount` behind the assertion for at least `commit_secs`.
    pub fn stake(&mut self, ctx: &CallContext, amount: u128, commit_secs: u64) -> Result<(), PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            if amount == 0 {
                return Err(PoolError::ZeroAmount);
            }
            check_commitment(commit_secs)?;
            pool.update_decay(ctx)?;

            let staker = ctx.caller;
            let current = pool
                .ledger
                .balance(Side::Supporter, &staker, &pool.state.supporters.accumulator)?;
            let min = pool.wiring()?.config.min_supporter_stake;
            if current == 0 && amount < min {
                return Err(PoolError::BelowMinimum { side: Side::Supporter, amount, min });
            }

            let candidate = ctx.timestamp.checked_add(commit_secs).ok_or(MathError::Overflow)?;
            let existing = pool.unlock_time(&staker);
            if candidate < existing {
                return Err(PoolError::LockWouldShorten { current: existing, candidate });
            }

            pool.ledger.credit(Side::Supporter, staker, amount, &mut pool.state.supporters)?;
            let pos = pool.ledger.supporter_mut(staker);
            pos.unlock_timestamp = candidate;
            pos.last_stake_timestamp = ctx.timestamp;
            pos.last_stake_block = ctx.block;

            debug!(pool = %pool.address(), %staker, amount, unlock = candidate, "pool: stake");
            pool.emit(PoolEvent::Stake { staker, amount, commit_secs });
            pool.pull(staker, amount)
        })
    }

    /// Push the caller's unlock time out by `extra_secs`.
    pub fn extend_stake_lock(&mut self, ctx: &CallContext, extra_secs: u64) -> Result<u64, PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            check_commitment(extra_secs)?;
            pool.update_decay(ctx)?;

            let staker = ctx.caller;
            let balance = pool
                .ledger
                .balance(Side::Supporter, &staker, &pool.state.supporters.accumulator)?;
            if balance == 0 {
                return Err(PoolError::NotSupporter(staker));
            }
            let pos = pool.ledger.supporter_mut(staker);
            let old_unlock = pos.unlock_timestamp;
            let new_unlock = old_unlock.checked_add(extra_secs).ok_or(MathError::Overflow)?;
            pos.unlock_timestamp = new_unlock;

            debug!(pool = %pool.address(), %staker, new_unlock, "pool: lock extended");
            pool.emit(PoolEvent::LockExtended { staker, old_unlock, new_unlock });
            Ok(new_unlock)
        })
    }

    /// Unstake `amount` of the caller's decayed balance on `side`.
    pub fn unstake(&mut self, ctx: &CallContext, amount: u128, side: Side) -> Result<(), PoolError> {
        self.transact(ctx, |pool, ctx| {
            if amount == 0 {
                return Err(PoolError::ZeroAmount);
            }
            pool.unstake_inner(ctx, amount, side)
        })
    }

    /// Unstake the caller's whole decayed balance on `side`. Returns the
    /// amount unstaked.
    pub fn unstake_all(&mut self, ctx: &CallContext, side: Side) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_can_exit(side)?;
            pool.update_decay(ctx)?;
            let balance = pool
                .ledger
                .balance(side, &ctx.caller, &pool.state.side(side).accumulator)?;
            if balance == 0 {
                return Err(PoolError::NothingToUnstake);
            }
            pool.unstake_inner(ctx, balance, side)?;
            Ok(balance)
        })
    }

    /// After failure challengers can only claim, and supporters are held
    /// while the failure froze an eligible balance that owns their stake.
    fn ensure_can_exit(&self, side: Side) -> Result<(), PoolError> {
        if !self.status.pending_failure {
            return Ok(());
        }
        match side {
            Side::Challenger => Err(PoolError::AlreadyFailed),
            Side::Supporter if self.status.eligible_balance_at_failure > 0 => Err(PoolError::AlreadyFailed),
            Side::Supporter => Ok(()),
        }
    }

    fn unstake_inner(&mut self, ctx: &CallContext, amount: u128, side: Side) -> Result<(), PoolError> {
        self.ensure_can_exit(side)?;
        self.update_decay(ctx)?;

        let user = ctx.caller;
        let acc = self.state.side(side).accumulator;
        let balance = self.ledger.balance(side, &user, &acc)?;
        if balance < amount {
            return Err(PoolError::InsufficientBalance { have: balance, need: amount });
        }
        if side == Side::Supporter {
            let unlock = self.unlock_time(&user);
            if ctx.timestamp < unlock {
                return Err(PoolError::StakeLocked { unlock });
            }
        }
        let remaining = balance - amount;
        let min = self.wiring()?.config.min_stake(side);
        if remaining != 0 && remaining < min {
            return Err(PoolError::DustRemainder { side, remaining, min });
        }

        self.ledger.debit(side, user, amount, self.state.side_mut(side))?;
        debug!(pool = %self.address(), %user, %side, amount, remaining, "pool: unstake");
        self.emit(PoolEvent::Unstake { staker: user, amount, side });

        match side {
            Side::Supporter => {
                let release_at = ctx.timestamp.checked_add(UNSTAKE_DELAY).ok_or(MathError::Overflow)?;
                self.ledger.queue_withdraw(user, amount, release_at)?;
                Ok(())
            }
            Side::Challenger => {
                self.ledger.cap_claimable(user, remaining, &acc)?;
                self.push(user, amount)
            }
        }
    }

    /// Pay out the caller's pending withdrawal once released.
    pub fn withdraw_stake(&mut self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            if pool.status.pending_failure && pool.status.eligible_balance_at_failure > 0 {
                return Err(PoolError::ClaimsOutstanding);
            }
            let staker = ctx.caller;
            let pending = pool.pending_withdraw_amount(&staker);
            if pending == 0 {
                return Err(PoolError::NothingToWithdraw);
            }
            let allowed_at = pool.pending_withdraw_allowed_time(&staker);
            if ctx.timestamp < allowed_at {
                return Err(PoolError::WithdrawalNotReady { allowed_at });
            }
            pool.update_decay(ctx)?;

            let amount = pool.ledger.take_pending(staker);
            debug!(pool = %pool.address(), %staker, amount, "pool: stake withdrawn");
            pool.emit(PoolEvent::StakeWithdrawn { staker, amount });
            pool.push(staker, amount)?;
            Ok(amount)
        })
    }

    /// Return the caller's pending withdrawal to their live stake.
    pub fn cancel_pending_withdraw(&mut self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            let staker = ctx.caller;
            if pool.pending_withdraw_amount(&staker) == 0 {
                return Err(PoolError::NothingToWithdraw);
            }
            pool.update_decay(ctx)?;

            let amount = pool.ledger.take_pending(staker);
            pool.ledger.credit(Side::Supporter, staker, amount, &mut pool.state.supporters)?;
            debug!(pool = %pool.address(), %staker, amount, "pool: withdrawal cancelled");
            pool.emit(PoolEvent::WithdrawalCancelled { staker, amount });
            Ok(amount)
        })
    }
}
