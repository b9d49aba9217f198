//! Failure detection, fan-out and payouts.
//!
//! A confirmed challenger runs the assertion through [`AntePool::check_test`].
//! If it fails the pool latches failure, freezes decay for good and asks the
//! registry to fail every sibling pool on the same assertion. Sibling errors
//! and panics are isolated and surfaced as events.
//!
//! Fan-out runs after the pool's own update has committed, so the registry
//! can confirm the origin really failed before touching any sibling.
//!
//! Payout for a claim:
//! `balance + claimable * (supporters + pending - bounty) / eligible_at_failure`,
//! plus the bounty for the eligible verifier. Before failure the same formula
//! runs against the current eligible balance as an estimate.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ante_core::constants::{CHALLENGER_BLOCK_DELAY, FAILURE_BOOKKEEPING_GAS, GAS_RESERVE_DIVISOR};
use ante_core::error::{PoolError, PredicateError};
use ante_core::gas::GasMeter;
use ante_core::math::{checked_add, checked_sub, mul_div};
use ante_core::traits::{FailureBroadcast, PoolRegistry};
use ante_core::types::{Address, CallContext, DecayState, Side};
use tracing::{debug, info, warn};

use crate::events::PoolEvent;
use crate::pool::AntePool;

/// Readable reason from a caught panic payload.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// What came back from asking the registry to fail the siblings.
pub(crate) enum Propagation {
    NoRegistry,
    Broadcast(FailureBroadcast),
    Rejected(String),
}

/// Ask `registry` to fail every sibling of `origin`. The pool is the caller;
/// `ctx.caller` is the verifier. Never panics.
pub(crate) fn broadcast(registry: Option<Arc<dyn PoolRegistry>>, origin: Address, ctx: &CallContext) -> Propagation {
    let Some(registry) = registry else {
        debug!(pool = %origin, "pool: no registry, failure stays local");
        return Propagation::NoRegistry;
    };
    let verifier = ctx.caller;
    let as_pool = ctx.as_caller(origin);
    let called = panic::catch_unwind(AssertUnwindSafe(|| registry.broadcast_failure(origin, verifier, &as_pool)));
    match called {
        Ok(Ok(report)) => Propagation::Broadcast(report),
        Ok(Err(err)) => {
            warn!(pool = %origin, %err, "pool: registry rejected failure broadcast");
            Propagation::Rejected(err.to_string())
        }
        Err(payload) => {
            let reason = panic_reason(payload.as_ref());
            warn!(pool = %origin, %reason, "pool: registry panicked during failure broadcast");
            Propagation::Rejected(reason)
        }
    }
}

impl AntePool {
    /// Check the assertion. Returns `Ok(true)` if it held.
    pub fn check_test(&mut self, ctx: &CallContext) -> Result<bool, PoolError> {
        self.run_check(ctx, None)
    }

    /// Check the assertion after handing it caller-supplied state. Legacy
    /// assertions reject with [`PoolError::StateNotSupported`].
    pub fn check_test_with_state(&mut self, ctx: &CallContext, state: &[u8]) -> Result<bool, PoolError> {
        self.run_check(ctx, Some(state))
    }

    fn run_check(&mut self, ctx: &CallContext, state: Option<&[u8]>) -> Result<bool, PoolError> {
        let failed = self.check_local(ctx, state)?;
        if failed {
            let outcome = broadcast(self.registry(), self.address(), ctx);
            self.record_propagation(outcome);
        }
        Ok(!failed)
    }

    /// Run the check against this pool only. Returns `true` if failure was
    /// latched; fan-out is left to the caller.
    pub(crate) fn check_local(&mut self, ctx: &CallContext, state: Option<&[u8]>) -> Result<bool, PoolError> {
        self.transact(ctx, |pool, ctx| {
            pool.ensure_live()?;
            let reserve = ctx.gas_limit / GAS_RESERVE_DIVISOR;
            if reserve < FAILURE_BOOKKEEPING_GAS {
                return Err(PoolError::InsufficientGas {
                    gas_limit: ctx.gas_limit,
                    reserve,
                    required: FAILURE_BOOKKEEPING_GAS,
                });
            }
            pool.update_decay(ctx)?;

            let checker = ctx.caller;
            let acc = pool.state.challengers.accumulator;
            let confirmed_block = pool
                .ledger
                .challenger(&checker)
                .and_then(|p| p.confirmed_block)
                .ok_or(PoolError::NotConfirmedChallenger(checker))?;
            if pool.ledger.claimable(&checker, &acc)? == 0 {
                return Err(PoolError::NotConfirmedChallenger(checker));
            }
            let allowed_block = confirmed_block.saturating_add(CHALLENGER_BLOCK_DELAY);
            if ctx.block < allowed_block {
                return Err(PoolError::CheckDelay { allowed_block });
            }

            let assertion = Arc::clone(&pool.wiring()?.assertion);
            let (mut meter, _) = GasMeter::forwarded(ctx.gas_limit);
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| match state {
                Some(bytes) => assertion.check_predicate_with_state(bytes, &mut meter),
                None => assertion.check_predicate(&mut meter),
            }))
            .unwrap_or_else(|payload| Err(PredicateError::Reverted(panic_reason(payload.as_ref()))));
            let passed = match verdict {
                Ok(passed) => passed,
                Err(PredicateError::Unsupported) => return Err(PoolError::StateNotSupported),
                Err(err) => {
                    warn!(pool = %pool.address(), %err, gas_used = meter.used(), "pool: predicate aborted");
                    false
                }
            };

            if passed {
                pool.status.last_verified_block = ctx.block;
                pool.status.last_verified_timestamp = ctx.timestamp;
                pool.status.num_times_verified += 1;
                debug!(pool = %pool.address(), %checker, gas_used = meter.used(), "pool: assertion holds");
                pool.emit(PoolEvent::LivenessChecked { checker, block: ctx.block });
                Ok(false)
            } else {
                pool.latch_failure(checker, ctx)?;
                Ok(true)
            }
        })
    }

    /// Latch failure proven by `verifier` in a sibling pool. The caller must
    /// be this pool's registry.
    pub fn mark_failed(&mut self, verifier: Address, ctx: &CallContext) -> Result<(), PoolError> {
        self.transact(ctx, |pool, ctx| {
            if pool.registry().map(|r| r.address()) != Some(ctx.caller) {
                return Err(PoolError::NotRegistry(ctx.caller));
            }
            pool.ensure_live()?;
            pool.update_decay(ctx)?;
            pool.latch_failure(verifier, ctx)
        })
    }

    /// Freeze decay and record the failure. Decay must already be current.
    fn latch_failure(&mut self, verifier: Address, ctx: &CallContext) -> Result<(), PoolError> {
        let eligible = self.ledger.eligible_balance(&self.state.challengers.accumulator)?;
        self.state.frozen = true;

        let status = &mut self.status;
        status.pending_failure = true;
        status.failed_block = ctx.block;
        status.failed_timestamp = ctx.timestamp;
        status.verifier = Some(verifier);
        status.eligible_balance_at_failure = eligible;
        status.last_verified_block = ctx.block;
        status.last_verified_timestamp = ctx.timestamp;

        info!(pool = %self.address(), %verifier, eligible, block = ctx.block, "pool: failure latched");
        self.emit(PoolEvent::FailureOccurred { verifier, block: ctx.block });
        Ok(())
    }

    /// Surface sibling and registry errors from a fan-out as events.
    pub(crate) fn record_propagation(&mut self, outcome: Propagation) {
        let origin = self.address();
        match outcome {
            Propagation::NoRegistry => {}
            Propagation::Broadcast(report) => {
                for (sibling, reason) in report.errors() {
                    warn!(pool = %origin, %sibling, %reason, "pool: sibling failure propagation error");
                    self.emit(PoolEvent::SiblingFailurePropagationError {
                        sibling: Some(*sibling),
                        reason: reason.to_string(),
                    });
                }
                info!(pool = %origin, siblings_failed = report.failed_count(), "pool: failure propagated");
            }
            Propagation::Rejected(reason) => {
                self.emit(PoolEvent::SiblingFailurePropagationError { sibling: None, reason });
            }
        }
    }

    /// Claim amount for `user` against `state`.
    fn payout_for(&self, user: &Address, state: &DecayState) -> Result<u128, PoolError> {
        let acc = &state.challengers.accumulator;
        let balance = self.ledger.balance(Side::Challenger, user, acc)?;
        let claimable = self.ledger.claimable(user, acc)?;
        if claimable == 0 {
            return Ok(balance);
        }

        let pot = checked_add(state.supporters.total_amount, self.ledger.total_pending_withdraw())?;
        let bounty = self.bounty_of(pot)?;
        let eligible = if self.status.pending_failure {
            self.status.eligible_balance_at_failure
        } else {
            self.ledger.eligible_balance(acc)?
        };
        let mut payout = balance;
        if eligible > 0 {
            let share = mul_div(claimable, checked_sub(pot, bounty)?, eligible)?;
            payout = checked_add(payout, share)?;
        }
        if self.status.verifier == Some(*user) {
            payout = checked_add(payout, bounty)?;
        }
        Ok(payout)
    }

    /// What `user` would receive from [`claim`](Self::claim) at `now`. Before
    /// failure this estimates the payout were the pool to fail at `now`,
    /// without the verifier bounty.
    pub fn challenger_payout(&self, user: &Address, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        self.payout_for(user, &state)
    }

    /// Collect the caller's share after failure. One-shot.
    pub fn claim(&mut self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            if !pool.status.pending_failure {
                return Err(PoolError::NotFailed);
            }
            let claimer = ctx.caller;
            let state = pool.state;
            let payout = pool.payout_for(&claimer, &state)?;
            let (balance, claimable) = pool.ledger.close_challenger(claimer, &mut pool.state.challengers)?;
            if balance == 0 && claimable == 0 {
                return Err(PoolError::NoChallengerBalance);
            }

            pool.status.total_paid_out = checked_add(pool.status.total_paid_out, payout)?;
            pool.status.num_paid_out += 1;
            info!(pool = %pool.address(), %claimer, payout, balance, claimable, "pool: claim paid");
            pool.emit(PoolEvent::ClaimPaid { claimer, amount: payout });
            pool.push(claimer, payout)?;
            Ok(payout)
        })
    }

    /// Pay the accrued decay reward to the assertion author.
    pub fn claim_reward(&mut self, ctx: &CallContext) -> Result<u128, PoolError> {
        self.transact(ctx, |pool, ctx| {
            let author = pool.wiring()?.assertion.author();
            if ctx.caller != author {
                return Err(PoolError::NotAuthor(ctx.caller));
            }
            pool.update_decay(ctx)?;
            let amount = pool.state.unclaimed_author_reward;
            if amount == 0 {
                return Err(PoolError::NoReward);
            }
            pool.state.unclaimed_author_reward = 0;

            info!(pool = %pool.address(), %author, amount, "pool: author reward paid");
            pool.emit(PoolEvent::RewardPaid { author, amount });
            pool.push(author, amount)?;
            Ok(amount)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::*;
    use ante_core::constants::{CHALLENGER_TIMESTAMP_DELAY, MIN_STAKE_COMMITMENT, UNSTAKE_DELAY};
    use ante_core::math::percent_of;

    /// Staker 100, challenger 5 confirmed, ready to check at `check_at`.
    fn armed() -> (Fixture, u64) {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        fx.challenge(challenger(), ONE * 5, 0);
        fx.pool.confirm_challenge(&ctx_at(challenger(), CHALLENGER_TIMESTAMP_DELAY)).unwrap();
        let check_at = CHALLENGER_TIMESTAMP_DELAY + 12 * CHALLENGER_BLOCK_DELAY;
        (fx, check_at)
    }

    // --- check_test ---

    #[test]
    fn passing_check_records_verification() {
        let (mut fx, at) = armed();
        let ctx = ctx_at(challenger(), at);
        assert!(fx.pool.check_test(&ctx).unwrap());
        assert_eq!(fx.pool.status().num_times_verified, 1);
        assert_eq!(fx.pool.status().last_verified_block, ctx.block);
        assert!(!fx.pool.status().pending_failure);
    }

    #[test]
    fn check_requires_block_delay() {
        let (mut fx, at) = armed();
        let early = ctx_at(challenger(), at - 12);
        let allowed_block = fx.pool.check_allowed_block(&challenger()).unwrap();
        assert_eq!(fx.pool.check_test(&early), Err(PoolError::CheckDelay { allowed_block }));
    }

    #[test]
    fn unconfirmed_challenger_cannot_check() {
        let (mut fx, at) = armed();
        fx.challenge(other(), ONE, at);
        assert_eq!(
            fx.pool.check_test(&ctx_at(other(), at + 1_000)),
            Err(PoolError::NotConfirmedChallenger(other()))
        );
        assert_eq!(
            fx.pool.check_test(&ctx_at(staker(), at)),
            Err(PoolError::NotConfirmedChallenger(staker()))
        );
    }

    #[test]
    fn starved_gas_is_rejected_before_predicate() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        let ctx = ctx_at(challenger(), at).with_gas_limit(FAILURE_BOOKKEEPING_GAS * GAS_RESERVE_DIVISOR - 1);
        assert!(matches!(fx.pool.check_test(&ctx), Err(PoolError::InsufficientGas { .. })));
        assert!(!fx.pool.status().pending_failure);
        assert_eq!(fx.assertion.calls(), 0);
    }

    #[test]
    fn failing_check_latches_and_freezes() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        let ctx = ctx_at(challenger(), at);
        assert!(!fx.pool.check_test(&ctx).unwrap());

        let status = *fx.pool.status();
        assert!(status.pending_failure);
        assert_eq!(status.verifier, Some(challenger()));
        assert_eq!(status.failed_block, ctx.block);
        assert_eq!(status.eligible_balance_at_failure, fx.pool.eligible_balance(ctx.timestamp).unwrap());
        assert!(fx.pool.decay_state().frozen);

        // Time no longer moves value.
        let staked = fx.pool.total_staked(ctx.timestamp).unwrap();
        assert_eq!(fx.pool.total_staked(ctx.timestamp + YEAR).unwrap(), staked);
        assert_eq!(fx.pool.check_test(&ctx_at(challenger(), at + 1)), Err(PoolError::AlreadyFailed));
    }

    #[test]
    fn failure_is_broadcast_by_the_pool() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        fx.pool.check_test(&ctx_at(challenger(), at)).unwrap();
        let pool = fx.pool.address();
        assert_eq!(fx.registry.broadcasts(), vec![(pool, challenger(), pool)]);
    }

    #[test]
    fn passing_check_broadcasts_nothing() {
        let (mut fx, at) = armed();
        fx.pool.check_test(&ctx_at(challenger(), at)).unwrap();
        assert!(fx.registry.broadcasts().is_empty());
    }

    #[test]
    fn mark_failed_rejects_non_registry_callers() {
        let (mut fx, at) = armed();
        for caller in [challenger(), staker(), fx.pool.address()] {
            assert_eq!(
                fx.pool.mark_failed(caller, &ctx_at(caller, at)),
                Err(PoolError::NotRegistry(caller))
            );
        }
        assert!(!fx.pool.status().pending_failure);
        assert!(!fx.pool.decay_state().frozen);
    }

    #[test]
    fn out_of_gas_counts_as_failure() {
        let (mut fx, at) = armed();
        fx.assertion.set_gas_cost(u64::MAX);
        assert!(!fx.pool.check_test(&ctx_at(challenger(), at)).unwrap());
        assert!(fx.pool.status().pending_failure);
    }

    #[test]
    fn legacy_assertion_rejects_state_without_side_effects() {
        let (mut fx, at) = armed();
        let before = *fx.pool.decay_state();
        let ctx = ctx_at(challenger(), at);
        assert_eq!(fx.pool.check_test_with_state(&ctx, b"state"), Err(PoolError::StateNotSupported));
        assert_eq!(*fx.pool.decay_state(), before);
        assert!(fx.pool.check_test(&ctx).unwrap());
    }

    // --- gating after failure ---

    #[test]
    fn failed_pool_rejects_entry() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        fx.pool.check_test(&ctx_at(challenger(), at)).unwrap();
        let later = at + MIN_STAKE_COMMITMENT;

        assert_eq!(fx.pool.stake(&ctx_at(staker(), later), ONE * 10, MIN_STAKE_COMMITMENT), Err(PoolError::AlreadyFailed));
        assert_eq!(fx.pool.register_challenge(&ctx_at(other(), later), ONE), Err(PoolError::AlreadyFailed));
        assert_eq!(fx.pool.unstake_all(&ctx_at(staker(), later), Side::Supporter), Err(PoolError::AlreadyFailed));
        assert_eq!(fx.pool.unstake(&ctx_at(challenger(), later), ONE, Side::Challenger), Err(PoolError::AlreadyFailed));
        assert_eq!(fx.pool.withdraw_stake(&ctx_at(staker(), later)), Err(PoolError::ClaimsOutstanding));
        assert_eq!(fx.pool.cancel_pending_withdraw(&ctx_at(staker(), later)), Err(PoolError::AlreadyFailed));
        assert_eq!(fx.pool.extend_stake_lock(&ctx_at(staker(), later), MIN_STAKE_COMMITMENT), Err(PoolError::AlreadyFailed));
    }

    #[test]
    fn supporters_exit_when_nothing_was_eligible() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        fx.pool.mark_failed(challenger(), &ctx_at(registry_address(), 10)).unwrap();
        assert_eq!(fx.pool.status().eligible_balance_at_failure, 0);

        let at = MIN_STAKE_COMMITMENT;
        assert_eq!(fx.pool.unstake_all(&ctx_at(staker(), at), Side::Supporter).unwrap(), ONE * 100);
        assert_eq!(fx.pool.withdraw_stake(&ctx_at(staker(), at + UNSTAKE_DELAY)).unwrap(), ONE * 100);
    }

    // --- claim ---

    #[test]
    fn verifier_claim_includes_bounty() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        let ctx = ctx_at(challenger(), at);
        fx.pool.check_test(&ctx).unwrap();

        let pot = fx.pool.total_staked(ctx.timestamp).unwrap();
        let bounty = percent_of(pot, 5).unwrap();
        assert_eq!(fx.pool.verifier_bounty(ctx.timestamp).unwrap(), bounty);
        let balance = fx.pool.stored_balance(&challenger(), Side::Challenger, ctx.timestamp).unwrap();
        // Sole eligible challenger takes the whole pot.
        let expected = balance + (pot - bounty) + bounty;
        assert_eq!(fx.pool.challenger_payout(&challenger(), ctx.timestamp).unwrap(), expected);

        let before = fx.token.balance(challenger());
        assert_eq!(fx.pool.claim(&ctx_at(challenger(), at + 1)).unwrap(), expected);
        assert_eq!(fx.token.balance(challenger()), before + expected);
        assert_eq!(fx.pool.status().num_paid_out, 1);
        assert_eq!(fx.pool.status().total_paid_out, expected);
    }

    #[test]
    fn payout_estimate_before_failure() {
        let (mut fx, at) = armed();
        fx.challenge(other(), ONE, at - 1);
        let now = T0 + at;

        let balance = fx.pool.stored_balance(&challenger(), Side::Challenger, now).unwrap();
        let claimable = fx.pool.claimable_shares(&challenger(), now).unwrap();
        let eligible = fx.pool.eligible_balance(now).unwrap();
        let pot = fx.pool.total_staked(now).unwrap();
        let bounty = fx.pool.verifier_bounty(now).unwrap();
        assert_eq!(claimable, eligible);

        // Sole eligible challenger: its balance plus the pot net of the
        // bounty, which no one has earned yet.
        let estimate = fx.pool.challenger_payout(&challenger(), now).unwrap();
        assert_eq!(estimate, balance + mul_div(claimable, pot - bounty, eligible).unwrap());
        assert_eq!(estimate, balance + (pot - bounty));
        assert!(estimate > ONE * 99);

        // Unconfirmed challengers would only get their balance back.
        let raw = fx.pool.stored_balance(&other(), Side::Challenger, now).unwrap();
        assert_eq!(fx.pool.challenger_payout(&other(), now).unwrap(), raw);
        assert!(!fx.pool.status().pending_failure);
    }

    #[test]
    fn claim_is_one_shot() {
        let (mut fx, at) = armed();
        fx.assertion.set_will_fail(true);
        fx.pool.check_test(&ctx_at(challenger(), at)).unwrap();
        fx.pool.claim(&ctx_at(challenger(), at + 1)).unwrap();
        assert_eq!(fx.pool.claim(&ctx_at(challenger(), at + 2)), Err(PoolError::NoChallengerBalance));
        assert_eq!(fx.pool.claim(&ctx_at(other(), at + 2)), Err(PoolError::NoChallengerBalance));
    }

    #[test]
    fn ineligible_challenger_gets_raw_balance() {
        let (mut fx, at) = armed();
        fx.challenge(other(), ONE, at - 1);
        fx.assertion.set_will_fail(true);
        let ctx = ctx_at(challenger(), at);
        fx.pool.check_test(&ctx).unwrap();

        let raw = fx.pool.stored_balance(&other(), Side::Challenger, ctx.timestamp).unwrap();
        assert!(raw > 0);
        assert_eq!(fx.pool.claim(&ctx_at(other(), at + 1)).unwrap(), raw);
    }

    #[test]
    fn claim_before_failure_is_rejected() {
        let (mut fx, at) = armed();
        assert_eq!(fx.pool.claim(&ctx_at(challenger(), at)), Err(PoolError::NotFailed));
    }

    // --- claim_reward ---

    #[test]
    fn author_collects_reward() {
        let (mut fx, at) = armed();
        let later = at + YEAR;
        let expected = fx.pool.author_reward(T0 + later).unwrap();
        assert!(expected > 0);
        assert_eq!(fx.pool.claim_reward(&ctx_at(author(), later)).unwrap(), expected);
        assert_eq!(fx.pool.claim_reward(&ctx_at(author(), later)), Err(PoolError::NoReward));
    }

    #[test]
    fn only_author_collects_reward() {
        let (mut fx, at) = armed();
        assert_eq!(
            fx.pool.claim_reward(&ctx_at(staker(), at + YEAR)),
            Err(PoolError::NotAuthor(staker()))
        );
    }

    #[test]
    fn no_reward_without_challengers() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        assert_eq!(fx.pool.claim_reward(&ctx_at(author(), YEAR)), Err(PoolError::NoReward));
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_reason(payload.as_ref()), "panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_reason(payload.as_ref()), "panicked");
    }
}
