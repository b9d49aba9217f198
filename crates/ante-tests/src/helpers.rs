//! Shared test doubles: collateral token, scripted assertions, broken
//! siblings and a block clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ante_core::constants::FIXED_ONE;
use ante_core::error::{PoolError, PredicateError};
use ante_core::gas::GasMeter;
use ante_core::traits::{AnteAssertion, CollateralToken, SiblingPool};
use ante_core::types::{Address, CallContext, StateField};
use ante_pool::{PoolFactory, SharedPool};
use parking_lot::Mutex;

pub const ONE: u128 = FIXED_ONE;
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
pub const GENESIS_BLOCK: u64 = 18_000_000;
pub const BLOCK_SECS: u64 = 12;
/// Balance minted to every fixture user.
pub const FUNDING: u128 = 1_000_000 * ONE;

pub fn supporter(n: u8) -> Address {
    Address::repeat(0x10 + n)
}

pub fn challenger(n: u8) -> Address {
    Address::repeat(0x40 + n)
}

pub fn outsider() -> Address {
    Address::repeat(0x90)
}

pub fn author() -> Address {
    Address::repeat(0xa0)
}

/// Install a test subscriber once; filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Wall clock and block height moving together, one block per
/// [`BLOCK_SECS`].
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub timestamp: u64,
    pub block: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self { timestamp: GENESIS_TIMESTAMP, block: GENESIS_BLOCK }
    }
}

impl Clock {
    pub fn advance(&mut self, secs: u64) {
        self.timestamp += secs;
        self.block += secs / BLOCK_SECS;
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.advance(blocks * BLOCK_SECS);
    }

    pub fn ctx(&self, caller: Address) -> CallContext {
        CallContext::new(caller, self.timestamp, self.block)
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

pub struct InMemoryToken {
    address: Address,
    balances: Mutex<HashMap<Address, u128>>,
    failing: AtomicBool,
}

impl InMemoryToken {
    pub fn new(address: Address) -> Arc<Self> {
        Arc::new(Self { address, balances: Mutex::new(HashMap::new()), failing: AtomicBool::new(false) })
    }

    pub fn mint(&self, to: Address, amount: u128) {
        *self.balances.lock().entry(to).or_default() += amount;
    }

    /// Make every transfer return `false` until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn balance(&self, owner: Address) -> u128 {
        self.balances.lock().get(&owner).copied().unwrap_or(0)
    }

    pub fn total_supply(&self) -> u128 {
        self.balances.lock().values().sum()
    }

    fn shift(&self, from: Address, to: Address, amount: u128) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return false;
        }
        let mut balances = self.balances.lock();
        let have = balances.get(&from).copied().unwrap_or(0);
        if have < amount {
            return false;
        }
        balances.insert(from, have - amount);
        *balances.entry(to).or_default() += amount;
        true
    }
}

impl CollateralToken for InMemoryToken {
    fn address(&self) -> Address {
        self.address
    }

    fn transfer_from(&self, from: Address, to: Address, amount: u128) -> bool {
        self.shift(from, to, amount)
    }

    fn transfer(&self, from: Address, to: Address, amount: u128) -> bool {
        self.shift(from, to, amount)
    }

    fn balance_of(&self, owner: Address) -> u128 {
        self.balance(owner)
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// What a [`ScriptedAssertion`] does on its next evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    Revert,
    /// Burn the whole forwarded budget.
    OutOfGas,
    Panic,
}

/// An assertion driven by the test.
///
/// Stateful assertions accept a one-byte state: `0` means unhealthy. A
/// re-entry target, when armed, is poked from inside the predicate and the
/// result is recorded.
pub struct ScriptedAssertion {
    address: Address,
    stateful: bool,
    verdict: Mutex<Verdict>,
    gas_cost: AtomicU64,
    calls: AtomicU64,
    last_state: Mutex<Option<Vec<u8>>>,
    reentry: Mutex<Option<SharedPool>>,
    reentry_result: Mutex<Option<Result<bool, PoolError>>>,
}

impl ScriptedAssertion {
    fn build(address: Address, stateful: bool) -> Arc<Self> {
        Arc::new(Self {
            address,
            stateful,
            verdict: Mutex::new(Verdict::Pass),
            gas_cost: AtomicU64::new(50_000),
            calls: AtomicU64::new(0),
            last_state: Mutex::new(None),
            reentry: Mutex::new(None),
            reentry_result: Mutex::new(None),
        })
    }

    /// Predicate without a state-taking variant.
    pub fn legacy(address: Address) -> Arc<Self> {
        Self::build(address, false)
    }

    pub fn stateful(address: Address) -> Arc<Self> {
        Self::build(address, true)
    }

    pub fn set_verdict(&self, verdict: Verdict) {
        *self.verdict.lock() = verdict;
    }

    pub fn set_gas_cost(&self, gas: u64) {
        self.gas_cost.store(gas, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_state(&self) -> Option<Vec<u8>> {
        self.last_state.lock().clone()
    }

    /// Re-enter `pool` from inside the next evaluation.
    pub fn arm_reentry(&self, pool: SharedPool) {
        *self.reentry.lock() = Some(pool);
    }

    pub fn reentry_result(&self) -> Option<Result<bool, PoolError>> {
        self.reentry_result.lock().clone()
    }

    fn evaluate(&self, meter: &mut GasMeter) -> Result<bool, PredicateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let target = self.reentry.lock().take();
        if let Some(pool) = target {
            let attempt = pool.check_test(&CallContext::new(outsider(), GENESIS_TIMESTAMP, GENESIS_BLOCK));
            *self.reentry_result.lock() = Some(attempt);
        }
        let verdict = *self.verdict.lock();
        match verdict {
            Verdict::Pass => {
                meter.consume(self.gas_cost.load(Ordering::SeqCst))?;
                Ok(true)
            }
            Verdict::Fail => Ok(false),
            Verdict::Revert => Err(PredicateError::Reverted("scripted revert".into())),
            Verdict::OutOfGas => {
                meter.consume(meter.remaining())?;
                meter.consume(1)?;
                Ok(true)
            }
            Verdict::Panic => panic!("scripted panic"),
        }
    }
}

impl AnteAssertion for ScriptedAssertion {
    fn address(&self) -> Address {
        self.address
    }

    fn author(&self) -> Address {
        author()
    }

    fn check_predicate(&self, meter: &mut GasMeter) -> Result<bool, PredicateError> {
        self.evaluate(meter)
    }

    fn check_predicate_with_state(&self, state: &[u8], meter: &mut GasMeter) -> Result<bool, PredicateError> {
        if !self.stateful {
            return Err(PredicateError::Unsupported);
        }
        *self.last_state.lock() = Some(state.to_vec());
        if state.first() == Some(&0) {
            return Ok(false);
        }
        self.evaluate(meter)
    }

    fn state_fields(&self) -> Option<Vec<StateField>> {
        self.stateful.then(|| vec![StateField { name: "healthy".into(), ty: "bool".into() }])
    }
}

// ---------------------------------------------------------------------------
// Siblings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breakage {
    Panics,
    Errors,
}

/// A sibling from another implementation version that cannot be failed.
pub struct BrokenSibling {
    pub address: Address,
    pub assertion: Address,
    pub breakage: Breakage,
}

impl SiblingPool for BrokenSibling {
    fn address(&self) -> Address {
        self.address
    }

    fn assertion(&self) -> Address {
        self.assertion
    }

    fn is_failed(&self) -> Result<bool, PoolError> {
        Ok(false)
    }

    fn mark_failed(&self, _verifier: Address, _ctx: &CallContext) -> Result<(), PoolError> {
        match self.breakage {
            Breakage::Panics => panic!("sibling storage corrupted"),
            Breakage::Errors => Err(PoolError::Uninitialized),
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// A factory, one token and one assertion, with funded users.
pub struct Deployment {
    pub factory: Arc<PoolFactory>,
    pub token: Arc<InMemoryToken>,
    pub assertion: Arc<ScriptedAssertion>,
    pub clock: Clock,
}

impl Deployment {
    pub fn new(assertion: Arc<ScriptedAssertion>) -> Self {
        init_tracing();
        let token = InMemoryToken::new(Address::repeat(0x70));
        for n in 0..8 {
            token.mint(supporter(n), FUNDING);
            token.mint(challenger(n), FUNDING);
        }
        token.mint(outsider(), FUNDING);
        Self { factory: PoolFactory::with_defaults(), token, assertion, clock: Clock::default() }
    }

    pub fn legacy() -> Self {
        Self::new(ScriptedAssertion::legacy(Address::repeat(0x80)))
    }

    pub fn stateful() -> Self {
        Self::new(ScriptedAssertion::stateful(Address::repeat(0x81)))
    }

    /// Pool with min challenger stake 1, 10% decay and 10% author reward.
    pub fn pool(&self, payout_ratio: u64) -> SharedPool {
        self.pool_with(ONE, payout_ratio)
    }

    pub fn pool_with(&self, min_challenger_stake: u128, payout_ratio: u64) -> SharedPool {
        self.factory
            .create_pool(
                self.assertion.clone(),
                self.token.clone(),
                min_challenger_stake,
                payout_ratio,
                10,
                10,
                &self.clock.ctx(supporter(0)),
            )
            .expect("pool creation")
    }

    pub fn ctx(&self, caller: Address) -> CallContext {
        self.clock.ctx(caller)
    }
}
