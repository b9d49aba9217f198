//! The pool aggregate root.
//!
//! [`AntePool`] owns the decay state, the position ledger and the failure
//! status. Every public operation runs inside [`AntePool::transact`], which
//! captures a small checkpoint and restores it if the operation errors, so a
//! call either applies completely or not at all. Token transfers run last.
//!
//! Lifecycle operations live in [`crate::stake`], [`crate::challenge`] and
//! [`crate::failure`].

use std::sync::{Arc, Weak};

use ante_core::error::{ConfigError, PoolError};
use ante_core::math::{checked_add, mul_div, percent_of};
use ante_core::constants::CHALLENGER_BLOCK_DELAY;
use ante_core::traits::{AnteAssertion, CollateralToken, PoolRegistry};
use ante_core::types::{
    Address, CallContext, DecayState, PoolConfig, PoolStatus, Side, StateField,
};
use ante_decay::{DecayEngine, DecayOutcome};
use tracing::{debug, info, warn};

use crate::events::PoolEvent;
use crate::ledger::{LedgerCheckpoint, PositionLedger};

/// Collaborators bound at initialization.
pub(crate) struct Wiring {
    pub(crate) config: PoolConfig,
    pub(crate) engine: DecayEngine,
    pub(crate) token: Arc<dyn CollateralToken>,
    pub(crate) assertion: Arc<dyn AnteAssertion>,
    pub(crate) registry: Option<Weak<dyn PoolRegistry>>,
}

enum Phase {
    /// Logic template; can never be initialized.
    Template,
    Uninitialized,
    Ready(Wiring),
}

struct Checkpoint {
    state: DecayState,
    status: PoolStatus,
    ledger: LedgerCheckpoint,
    events: usize,
}

pub struct AntePool {
    address: Address,
    phase: Phase,
    pub(crate) state: DecayState,
    pub(crate) status: PoolStatus,
    pub(crate) ledger: PositionLedger,
    events: Vec<PoolEvent>,
}

impl AntePool {
    /// A pool that rejects every operation until [`initialize`](Self::initialize).
    pub fn uninitialized(address: Address) -> Self {
        Self {
            address,
            phase: Phase::Uninitialized,
            state: DecayState::default(),
            status: PoolStatus::default(),
            ledger: PositionLedger::new(),
            events: Vec::new(),
        }
    }

    /// A logic template. Initialization always fails with
    /// [`PoolError::AlreadyInitialized`].
    pub fn template(address: Address) -> Self {
        Self { phase: Phase::Template, ..Self::uninitialized(address) }
    }

    pub fn new(
        address: Address,
        config: PoolConfig,
        token: Arc<dyn CollateralToken>,
        assertion: Arc<dyn AnteAssertion>,
        registry: Option<Weak<dyn PoolRegistry>>,
        ctx: &CallContext,
    ) -> Result<Self, PoolError> {
        let mut pool = Self::uninitialized(address);
        pool.initialize(config, token, assertion, registry, ctx)?;
        Ok(pool)
    }

    /// Bind the pool to its collaborators. Runs once.
    pub fn initialize(
        &mut self,
        config: PoolConfig,
        token: Arc<dyn CollateralToken>,
        assertion: Arc<dyn AnteAssertion>,
        registry: Option<Weak<dyn PoolRegistry>>,
        ctx: &CallContext,
    ) -> Result<(), PoolError> {
        if !matches!(self.phase, Phase::Uninitialized) {
            return Err(PoolError::AlreadyInitialized);
        }
        if config.assertion != assertion.address() {
            return Err(ConfigError::Invalid("assertion does not match config".into()).into());
        }
        if config.token != token.address() {
            return Err(ConfigError::Invalid("token does not match config".into()).into());
        }

        info!(
            pool = %self.address,
            assertion = %config.assertion,
            min_challenger_stake = config.min_challenger_stake,
            payout_ratio = config.challenger_payout_ratio,
            decay_rate = config.decay_rate,
            "pool: initialized"
        );
        self.state = DecayState::starting_at(ctx.timestamp, ctx.block);
        self.phase = Phase::Ready(Wiring {
            engine: DecayEngine::from_config(&config),
            config,
            token,
            assertion,
            registry,
        });
        Ok(())
    }

    pub(crate) fn wiring(&self) -> Result<&Wiring, PoolError> {
        match &self.phase {
            Phase::Ready(wiring) => Ok(wiring),
            _ => Err(PoolError::Uninitialized),
        }
    }

    pub(crate) fn registry(&self) -> Option<Arc<dyn PoolRegistry>> {
        self.wiring().ok()?.registry.as_ref()?.upgrade()
    }

    /// Run `op` atomically: on error every change it made is rolled back and
    /// the events it buffered are discarded.
    pub(crate) fn transact<T>(
        &mut self,
        ctx: &CallContext,
        op: impl FnOnce(&mut Self, &CallContext) -> Result<T, PoolError>,
    ) -> Result<T, PoolError> {
        self.wiring()?;
        let checkpoint = Checkpoint {
            state: self.state,
            status: self.status,
            ledger: self.ledger.checkpoint(ctx.caller),
            events: self.events.len(),
        };
        let was_decaying = self.state.is_decaying();

        match op(self, ctx) {
            Ok(value) => {
                self.note_decay_transition(was_decaying, ctx.timestamp);
                Ok(value)
            }
            Err(err) => {
                self.state = checkpoint.state;
                self.status = checkpoint.status;
                self.ledger.restore(checkpoint.ledger);
                self.events.truncate(checkpoint.events);
                debug!(pool = %self.address, caller = %ctx.caller, %err, "pool: call reverted");
                Err(err)
            }
        }
    }

    fn note_decay_transition(&mut self, was_decaying: bool, timestamp: u64) {
        match (was_decaying, self.state.is_decaying()) {
            (false, true) => {
                debug!(pool = %self.address, timestamp, "pool: decay started");
                self.emit(PoolEvent::DecayStarted { timestamp });
            }
            (true, false) => {
                debug!(pool = %self.address, timestamp, "pool: decay paused");
                self.emit(PoolEvent::DecayPaused { timestamp });
            }
            _ => {}
        }
    }

    /// Bring decay forward to the call's clock.
    pub(crate) fn update_decay(&mut self, ctx: &CallContext) -> Result<DecayOutcome, PoolError> {
        let engine = self.wiring()?.engine;
        Ok(engine.advance(&mut self.state, ctx.timestamp, ctx.block)?)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), PoolError> {
        if self.status.pending_failure {
            return Err(PoolError::AlreadyFailed);
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, event: PoolEvent) {
        self.events.push(event);
    }

    /// Pull `amount` of collateral from `from` into the pool.
    pub(crate) fn pull(&self, from: Address, amount: u128) -> Result<(), PoolError> {
        let token = &self.wiring()?.token;
        if !token.transfer_from(from, self.address, amount) {
            warn!(pool = %self.address, %from, amount, "pool: collateral pull rejected");
            return Err(PoolError::TransferFailed { amount });
        }
        Ok(())
    }

    /// Pay `amount` of collateral out of the pool to `to`.
    pub(crate) fn push(&self, to: Address, amount: u128) -> Result<(), PoolError> {
        let token = &self.wiring()?.token;
        if !token.transfer(self.address, to, amount) {
            warn!(pool = %self.address, %to, amount, "pool: collateral payout rejected");
            return Err(PoolError::TransferFailed { amount });
        }
        Ok(())
    }

    /// Decay state projected to `now` without mutating the pool.
    pub(crate) fn projected(&self, now: u64) -> Result<DecayState, PoolError> {
        let engine = self.wiring()?.engine;
        Ok(engine.preview(&self.state, now)?)
    }

    pub(crate) fn bounty_of(&self, pot: u128) -> Result<u128, PoolError> {
        let pct = self.wiring()?.config.verifier_bounty_pct;
        Ok(percent_of(pot, pct)?)
    }

    // --- identity and configuration ---

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.phase, Phase::Ready(_))
    }

    pub fn is_template(&self) -> bool {
        matches!(self.phase, Phase::Template)
    }

    pub fn config(&self) -> Result<&PoolConfig, PoolError> {
        Ok(&self.wiring()?.config)
    }

    pub fn assertion_address(&self) -> Option<Address> {
        self.wiring().ok().map(|w| w.config.assertion)
    }

    pub fn assertion_author(&self) -> Result<Address, PoolError> {
        Ok(self.wiring()?.assertion.author())
    }

    /// State layout accepted by the assertion, if it takes state at all.
    pub fn assertion_state_fields(&self) -> Result<Option<Vec<StateField>>, PoolError> {
        Ok(self.wiring()?.assertion.state_fields())
    }

    pub fn status(&self) -> &PoolStatus {
        &self.status
    }

    pub fn decay_state(&self) -> &DecayState {
        &self.state
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn is_decaying(&self) -> bool {
        self.state.is_decaying()
    }

    pub fn events(&self) -> &[PoolEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<PoolEvent> {
        std::mem::take(&mut self.events)
    }

    // --- balances as of `now` ---

    pub fn total_staked(&self, now: u64) -> Result<u128, PoolError> {
        Ok(self.projected(now)?.supporters.total_amount)
    }

    pub fn total_challenged(&self, now: u64) -> Result<u128, PoolError> {
        Ok(self.projected(now)?.challengers.total_amount)
    }

    pub fn total_pending_withdraw(&self) -> u128 {
        self.ledger.total_pending_withdraw()
    }

    pub fn num_users(&self, side: Side, now: u64) -> Result<u64, PoolError> {
        Ok(self.projected(now)?.side(side).num_users)
    }

    pub fn multiplier(&self, side: Side, now: u64) -> Result<u128, PoolError> {
        Ok(self.projected(now)?.side(side).accumulator.multiplier)
    }

    pub fn eligible_balance(&self, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        Ok(self.ledger.eligible_balance(&state.challengers.accumulator)?)
    }

    pub fn stored_balance(&self, user: &Address, side: Side, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        Ok(self.ledger.balance(side, user, &state.side(side).accumulator)?)
    }

    pub fn claimable_shares(&self, user: &Address, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        Ok(self.ledger.claimable(user, &state.challengers.accumulator)?)
    }

    pub fn start_amount(&self, user: &Address, side: Side) -> u128 {
        self.ledger.stake_snapshot(side, user).amount
    }

    pub fn start_multiplier(&self, user: &Address, side: Side) -> u128 {
        self.ledger.stake_snapshot(side, user).multiplier
    }

    pub fn pending_withdraw_amount(&self, user: &Address) -> u128 {
        self.ledger.supporter(user).map_or(0, |p| p.pending_withdraw)
    }

    pub fn pending_withdraw_allowed_time(&self, user: &Address) -> u64 {
        self.ledger.supporter(user).map_or(0, |p| p.pending_release_at)
    }

    pub fn unlock_time(&self, user: &Address) -> u64 {
        self.ledger.supporter(user).map_or(0, |p| p.unlock_timestamp)
    }

    /// First block at which `user` may check the assertion.
    pub fn check_allowed_block(&self, user: &Address) -> Option<u64> {
        self.ledger
            .challenger(user)
            .and_then(|p| p.confirmed_block)
            .map(|block| block.saturating_add(CHALLENGER_BLOCK_DELAY))
    }

    /// `(supporter total + pending withdrawals) * bounty%`.
    pub fn verifier_bounty(&self, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        let pot = checked_add(state.supporters.total_amount, self.ledger.total_pending_withdraw())?;
        self.bounty_of(pot)
    }

    /// Author reward accrued up to `now`.
    pub fn author_reward(&self, now: u64) -> Result<u128, PoolError> {
        Ok(self.projected(now)?.unclaimed_author_reward)
    }

    /// Share of the pool's value backing the assertion, in whole percent:
    /// `(supporters + pending) * 100 / (supporters + pending + challengers)`.
    /// An empty pool scores 0.
    pub fn trust_score(&self, now: u64) -> Result<u128, PoolError> {
        let state = self.projected(now)?;
        let support = checked_add(state.supporters.total_amount, self.ledger.total_pending_withdraw())?;
        let value = checked_add(support, state.challengers.total_amount)?;
        if value == 0 {
            return Ok(0);
        }
        Ok(mul_div(support, 100, value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::*;
    use ante_core::constants::{FIXED_ONE, MIN_STAKE_COMMITMENT};

    // --- initialization ---

    #[test]
    fn uninitialized_pool_rejects_operations() {
        let mut pool = AntePool::uninitialized(Address::repeat(0x50));
        let ctx = ctx_at(staker(), 0);
        assert_eq!(pool.stake(&ctx, ONE * 10, MIN_STAKE_COMMITMENT), Err(PoolError::Uninitialized));
        assert_eq!(pool.check_test(&ctx), Err(PoolError::Uninitialized));
        assert_eq!(pool.total_staked(0), Err(PoolError::Uninitialized));
        assert!(!pool.is_initialized());
    }

    #[test]
    fn initialize_runs_once() {
        let fx = Fixture::new();
        let mut pool = AntePool::uninitialized(Address::repeat(0x51));
        let config = fx.config();
        pool.initialize(config.clone(), fx.token.clone(), fx.assertion.clone(), None, &ctx_at(staker(), 0))
            .unwrap();
        assert!(pool.is_initialized());
        assert_eq!(
            pool.initialize(config, fx.token.clone(), fx.assertion.clone(), None, &ctx_at(staker(), 0)),
            Err(PoolError::AlreadyInitialized)
        );
    }

    #[test]
    fn template_can_never_be_initialized() {
        let fx = Fixture::new();
        let mut pool = AntePool::template(Address::repeat(0x52));
        assert!(pool.is_template());
        assert_eq!(
            pool.initialize(fx.config(), fx.token.clone(), fx.assertion.clone(), None, &ctx_at(staker(), 0)),
            Err(PoolError::AlreadyInitialized)
        );
        assert_eq!(pool.claim(&ctx_at(challenger(), 0)), Err(PoolError::Uninitialized));
    }

    #[test]
    fn mismatched_assertion_is_rejected() {
        let fx = Fixture::new();
        let mut config = fx.config();
        config.assertion = Address::repeat(0xee);
        let err = AntePool::new(Address::repeat(0x53), config, fx.token.clone(), fx.assertion.clone(), None, &ctx_at(staker(), 0));
        assert!(matches!(err, Err(PoolError::InvalidConfig(_))));
    }

    // --- atomicity ---

    #[test]
    fn failed_transfer_rolls_back_everything() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        let before_total = fx.pool.total_staked(T0).unwrap();
        let before_events = fx.pool.events().len();

        fx.token.set_failing(true);
        let err = fx.pool.stake(&ctx_at(staker(), 10), ONE * 5, MIN_STAKE_COMMITMENT);
        assert_eq!(err, Err(PoolError::TransferFailed { amount: ONE * 5 }));

        assert_eq!(fx.pool.total_staked(T0).unwrap(), before_total);
        assert_eq!(fx.pool.stored_balance(&staker(), Side::Supporter, T0).unwrap(), ONE * 100);
        assert_eq!(fx.pool.events().len(), before_events);
        assert_eq!(fx.pool.decay_state().last_update_timestamp, T0);
    }

    #[test]
    fn rollback_removes_new_position() {
        let mut fx = Fixture::new();
        fx.token.set_failing(true);
        let _ = fx.pool.stake(&ctx_at(staker(), 0), ONE * 100, MIN_STAKE_COMMITMENT);
        assert!(fx.pool.ledger().supporter(&staker()).is_none());
        assert_eq!(fx.pool.num_users(Side::Supporter, T0).unwrap(), 0);
    }

    // --- decay notifications ---

    #[test]
    fn decay_start_and_pause_are_emitted() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        fx.challenge(challenger(), ONE, 1);
        assert!(fx.pool.is_decaying());
        assert!(fx.pool.events().contains(&PoolEvent::DecayStarted { timestamp: T0 + 1 }));

        fx.pool.unstake_all(&ctx_at(challenger(), 2), Side::Challenger).unwrap();
        assert!(!fx.pool.is_decaying());
        assert!(fx.pool.events().contains(&PoolEvent::DecayPaused { timestamp: T0 + 2 }));
    }

    #[test]
    fn accessors_project_to_now() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        fx.challenge(challenger(), ONE * 10, 0);
        let later = T0 + YEAR;
        // 10%/yr on 10 tokens, 10% of that to the author.
        assert_eq!(fx.pool.total_challenged(later).unwrap(), ONE * 9);
        assert_eq!(fx.pool.author_reward(later).unwrap(), ONE / 10);
        assert_eq!(fx.pool.total_staked(later).unwrap(), ONE * 100 + ONE * 9 / 10);
        assert_eq!(fx.pool.multiplier(Side::Challenger, later).unwrap(), FIXED_ONE * 9 / 10);
        // Nothing was written.
        assert_eq!(fx.pool.decay_state().challengers.total_amount, ONE * 10);
    }

    // --- trust score ---

    #[test]
    fn empty_pool_scores_zero() {
        let fx = Fixture::new();
        assert_eq!(fx.pool.trust_score(T0).unwrap(), 0);
    }

    #[test]
    fn trust_score_is_support_share() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        assert_eq!(fx.pool.trust_score(T0).unwrap(), 100);
        fx.challenge(challenger(), ONE * 10, 0);
        // 100 / 110, floored.
        assert_eq!(fx.pool.trust_score(T0).unwrap(), 90);

        let later = T0 + YEAR;
        let support = fx.pool.total_staked(later).unwrap();
        let value = support + fx.pool.total_challenged(later).unwrap();
        assert_eq!(fx.pool.trust_score(later).unwrap(), support * 100 / value);
    }

    #[test]
    fn pending_withdrawals_count_as_support() {
        let mut fx = Fixture::new();
        fx.stake(staker(), ONE * 100, 0);
        let at = MIN_STAKE_COMMITMENT;
        fx.pool.unstake(&ctx_at(staker(), at), ONE * 50, Side::Supporter).unwrap();
        fx.challenge(challenger(), ONE * 5, at);
        // (50 + 50) / 105, not 50 / 55.
        assert_eq!(fx.pool.trust_score(T0 + at).unwrap(), 95);
    }

    #[test]
    fn uninitialized_pool_has_no_score() {
        let pool = AntePool::uninitialized(Address::repeat(0x54));
        assert_eq!(pool.trust_score(T0), Err(PoolError::Uninitialized));
    }
}
