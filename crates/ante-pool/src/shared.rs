//! Lock-guarded pool handle.
//!
//! Entry never blocks: a call arriving while the pool is already executing
//! one (a token, predicate or sibling calling back in) fails fast with
//! [`PoolError::Reentrant`] instead of deadlocking or observing a
//! half-applied operation.

use std::sync::Arc;

use ante_core::error::PoolError;
use ante_core::traits::SiblingPool;
use ante_core::types::{Address, CallContext, PoolStatus, Side};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::events::PoolEvent;
use crate::failure;
use crate::pool::AntePool;

#[derive(Clone)]
pub struct SharedPool {
    address: Address,
    assertion: Address,
    inner: Arc<Mutex<AntePool>>,
}

impl SharedPool {
    pub fn new(pool: AntePool) -> Self {
        Self {
            address: pool.address(),
            assertion: pool.assertion_address().unwrap_or(Address::ZERO),
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Run `f` with exclusive access to the pool.
    pub fn with<T>(&self, f: impl FnOnce(&mut AntePool) -> Result<T, PoolError>) -> Result<T, PoolError> {
        let Some(mut pool) = self.inner.try_lock() else {
            debug!(pool = %self.address, "pool: reentrant call rejected");
            return Err(PoolError::Reentrant);
        };
        f(&mut pool)
    }

    /// Read-only access, under the same reentrancy rule.
    pub fn read<T>(&self, f: impl FnOnce(&AntePool) -> T) -> Result<T, PoolError> {
        let Some(pool) = self.inner.try_lock() else {
            return Err(PoolError::Reentrant);
        };
        Ok(f(&pool))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn stake(&self, ctx: &CallContext, amount: u128, commit_secs: u64) -> Result<(), PoolError> {
        self.with(|p| p.stake(ctx, amount, commit_secs))
    }

    pub fn extend_stake_lock(&self, ctx: &CallContext, extra_secs: u64) -> Result<u64, PoolError> {
        self.with(|p| p.extend_stake_lock(ctx, extra_secs))
    }

    pub fn unstake(&self, ctx: &CallContext, amount: u128, side: Side) -> Result<(), PoolError> {
        self.with(|p| p.unstake(ctx, amount, side))
    }

    pub fn unstake_all(&self, ctx: &CallContext, side: Side) -> Result<u128, PoolError> {
        self.with(|p| p.unstake_all(ctx, side))
    }

    pub fn withdraw_stake(&self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.with(|p| p.withdraw_stake(ctx))
    }

    pub fn cancel_pending_withdraw(&self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.with(|p| p.cancel_pending_withdraw(ctx))
    }

    pub fn register_challenge(&self, ctx: &CallContext, amount: u128) -> Result<(), PoolError> {
        self.with(|p| p.register_challenge(ctx, amount))
    }

    pub fn confirm_challenge(&self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.with(|p| p.confirm_challenge(ctx))
    }

    pub fn check_test(&self, ctx: &CallContext) -> Result<bool, PoolError> {
        self.run_check(ctx, None)
    }

    pub fn check_test_with_state(&self, ctx: &CallContext, state: &[u8]) -> Result<bool, PoolError> {
        self.run_check(ctx, Some(state))
    }

    /// The lock is released before fan-out so the registry can read this
    /// pool's failure flag.
    fn run_check(&self, ctx: &CallContext, state: Option<&[u8]>) -> Result<bool, PoolError> {
        let (failed, registry) = self.with(|p| Ok((p.check_local(ctx, state)?, p.registry())))?;
        if !failed {
            return Ok(true);
        }
        let outcome = failure::broadcast(registry, self.address, ctx);
        if let Err(err) = self.with(|p| {
            p.record_propagation(outcome);
            Ok(())
        }) {
            warn!(pool = %self.address, %err, "pool: fan-out outcome not recorded");
        }
        Ok(false)
    }

    /// Support share of the pool at `now`, in percent.
    pub fn trust_score(&self, now: u64) -> Result<u128, PoolError> {
        self.read(|p| p.trust_score(now))?
    }

    pub fn claim(&self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.with(|p| p.claim(ctx))
    }

    pub fn claim_reward(&self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.with(|p| p.claim_reward(ctx))
    }

    pub fn status(&self) -> Result<PoolStatus, PoolError> {
        self.read(|p| *p.status())
    }

    pub fn drain_events(&self) -> Result<Vec<PoolEvent>, PoolError> {
        self.with(|p| Ok(p.drain_events()))
    }
}

impl SiblingPool for SharedPool {
    fn address(&self) -> Address {
        self.address
    }

    fn assertion(&self) -> Address {
        self.assertion
    }

    fn is_failed(&self) -> Result<bool, PoolError> {
        self.read(|p| p.status().pending_failure)
    }

    fn mark_failed(&self, verifier: Address, ctx: &CallContext) -> Result<(), PoolError> {
        self.with(|p| p.mark_failed(verifier, ctx))
    }
}
