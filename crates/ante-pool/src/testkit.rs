//! Shared unit-test doubles and fixtures.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ante_core::constants::{FIXED_ONE, MIN_STAKE_COMMITMENT, SECONDS_PER_YEAR};
use ante_core::error::{PredicateError, RegistryError};
use ante_core::gas::GasMeter;
use ante_core::types::{Address, CallContext, PoolConfig};
use parking_lot::Mutex;

pub use ante_core::traits::{AnteAssertion, CollateralToken, FailureBroadcast, PoolRegistry};

use crate::pool::AntePool;

pub const ONE: u128 = FIXED_ONE;
pub const T0: u64 = 1_700_000_000;
pub const B0: u64 = 18_000_000;
pub const YEAR: u64 = SECONDS_PER_YEAR;

pub fn staker() -> Address {
    Address::repeat(0x11)
}

pub fn challenger() -> Address {
    Address::repeat(0x22)
}

pub fn other() -> Address {
    Address::repeat(0x33)
}

pub fn author() -> Address {
    Address::repeat(0xa0)
}

pub fn registry_address() -> Address {
    Address::repeat(0x60)
}

/// Context `offset_secs` after `T0`, one block per 12 seconds.
pub fn ctx_at(caller: Address, offset_secs: u64) -> CallContext {
    CallContext::new(caller, T0 + offset_secs, B0 + offset_secs / 12)
}

pub struct MockToken {
    balances: Mutex<HashMap<Address, u128>>,
    failing: AtomicBool,
}

impl MockToken {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { balances: Mutex::new(HashMap::new()), failing: AtomicBool::new(false) })
    }

    pub fn mint(&self, to: Address, amount: u128) {
        *self.balances.lock().entry(to).or_default() += amount;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn balance(&self, owner: Address) -> u128 {
        self.balances.lock().get(&owner).copied().unwrap_or(0)
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

impl CollateralToken for MockToken {
    fn address(&self) -> Address {
        Address::repeat(0x70)
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

/// Legacy assertion: no state-taking variant.
pub struct MockAssertion {
    will_fail: AtomicBool,
    gas_cost: AtomicU64,
    calls: AtomicU64,
}

impl MockAssertion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            will_fail: AtomicBool::new(false),
            gas_cost: AtomicU64::new(21_000),
            calls: AtomicU64::new(0),
        })
    }

    pub fn set_will_fail(&self, fail: bool) {
        self.will_fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_gas_cost(&self, gas: u64) {
        self.gas_cost.store(gas, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AnteAssertion for MockAssertion {
    fn address(&self) -> Address {
        Address::repeat(0x80)
    }

    fn author(&self) -> Address {
        author()
    }

    fn check_predicate(&self, meter: &mut GasMeter) -> Result<bool, PredicateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        meter.consume(self.gas_cost.load(Ordering::SeqCst))?;
        Ok(!self.will_fail.load(Ordering::SeqCst))
    }
}

/// Registry with no siblings that records every broadcast as
/// `(origin, verifier, caller)`.
pub struct StubRegistry {
    broadcasts: Mutex<Vec<(Address, Address, Address)>>,
}

impl StubRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { broadcasts: Mutex::new(Vec::new()) })
    }

    pub fn broadcasts(&self) -> Vec<(Address, Address, Address)> {
        self.broadcasts.lock().clone()
    }
}

impl PoolRegistry for StubRegistry {
    fn address(&self) -> Address {
        registry_address()
    }

    fn broadcast_failure(
        &self,
        origin: Address,
        verifier: Address,
        ctx: &CallContext,
    ) -> Result<FailureBroadcast, RegistryError> {
        self.broadcasts.lock().push((origin, verifier, ctx.caller));
        Ok(FailureBroadcast::default())
    }
}

/// Initialized pool at `T0`: min challenger 1, ratio 10, decay 10%, author 10%.
pub struct Fixture {
    pub token: Arc<MockToken>,
    pub assertion: Arc<MockAssertion>,
    pub registry: Arc<StubRegistry>,
    pub pool: AntePool,
}

impl Fixture {
    pub fn new() -> Self {
        let token = MockToken::new();
        let assertion = MockAssertion::new();
        for user in [staker(), challenger(), other(), author()] {
            token.mint(user, ONE * 1_000_000);
        }
        let registry = StubRegistry::new();
        let as_registry: Arc<dyn PoolRegistry> = registry.clone();
        let weak: Weak<dyn PoolRegistry> = Arc::downgrade(&as_registry);
        let config = Self::config_for(&token, &assertion);
        let pool = AntePool::new(
            Address::repeat(0x50),
            config,
            token.clone(),
            assertion.clone(),
            Some(weak),
            &ctx_at(staker(), 0),
        )
        .unwrap();
        Self { token, assertion, registry, pool }
    }

    fn config_for(token: &MockToken, assertion: &MockAssertion) -> PoolConfig {
        PoolConfig::new(assertion.address(), token.address(), ONE, 10, 10, 10).unwrap()
    }

    pub fn config(&self) -> PoolConfig {
        Self::config_for(&self.token, &self.assertion)
    }

    pub fn stake(&mut self, user: Address, amount: u128, offset_secs: u64) {
        self.pool.stake(&ctx_at(user, offset_secs), amount, MIN_STAKE_COMMITMENT).unwrap();
    }

    pub fn challenge(&mut self, user: Address, amount: u128, offset_secs: u64) {
        self.pool.register_challenge(&ctx_at(user, offset_secs), amount).unwrap();
    }
}
