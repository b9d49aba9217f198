//! In-memory pool registry.
//!
//! [`PoolFactory`] creates pools, indexes them by assertion and config hash,
//! and fans a failure out to every sibling sharing the failed assertion.
//! Pools built elsewhere (another implementation version) join through
//! [`PoolFactory::register_pool`] and take part in fan-out via the
//! [`SiblingPool`] contract only.
//!
//! Fan-out is fault-isolated: each sibling is called under `catch_unwind`
//! and its error or panic lands in the returned [`FailureBroadcast`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use ante_core::error::{ConfigError, PoolError, RegistryError};
use ante_core::gas::GasMeter;
use ante_core::traits::{
    AnteAssertion, CollateralToken, FailureBroadcast, PoolRegistry, SiblingOutcome, SiblingPool,
};
use ante_core::types::{Address, CallContext, PoolConfig};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tracing::{debug, info, warn};

use crate::config::FactoryConfig;
use crate::failure::panic_reason;
use crate::pool::AntePool;
use crate::shared::SharedPool;

/// Domain separator for derived pool addresses.
const POOL_ADDRESS_DOMAIN: &str = "ante-pool";
const FACTORY_ADDRESS_DOMAIN: &str = "ante-pool-factory";

static FACTORY_NONCE: AtomicU64 = AtomicU64::new(0);

pub struct PoolFactory {
    address: Address,
    config: FactoryConfig,
    self_ref: Weak<PoolFactory>,
    /// Every registered pool, by address.
    pools: DashMap<Address, Arc<dyn SiblingPool>>,
    /// Pool addresses per assertion, in registration order.
    by_assertion: DashMap<Address, Vec<Address>>,
    by_config: DashMap<[u8; 32], Address>,
    /// Handles for pools created here.
    handles: DashMap<Address, SharedPool>,
    failed_assertions: DashSet<Address>,
}

impl PoolFactory {
    pub fn new(config: FactoryConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::build(FactoryConfig::default())
    }

    /// Each factory gets a fresh address, like a contract deployed from a
    /// nonce.
    fn build(config: FactoryConfig) -> Arc<Self> {
        let nonce = FACTORY_NONCE.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|self_ref| Self {
            address: Address::derive(FACTORY_ADDRESS_DOMAIN, &nonce.to_be_bytes()),
            config,
            self_ref: self_ref.clone(),
            pools: DashMap::new(),
            by_assertion: DashMap::new(),
            by_config: DashMap::new(),
            handles: DashMap::new(),
            failed_assertions: DashSet::new(),
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Create, initialize and register a pool.
    #[allow(clippy::too_many_arguments)]
    pub fn create_pool(
        &self,
        assertion: Arc<dyn AnteAssertion>,
        token: Arc<dyn CollateralToken>,
        min_challenger_stake: u128,
        payout_ratio: u64,
        decay_rate: u64,
        author_reward_rate: u64,
        ctx: &CallContext,
    ) -> Result<SharedPool, RegistryError> {
        let assertion_addr = assertion.address();
        if self.failed_assertions.contains(&assertion_addr) {
            return Err(RegistryError::AssertionPreviouslyFailed(assertion_addr));
        }
        let config = PoolConfig::new(
            assertion_addr,
            token.address(),
            min_challenger_stake,
            payout_ratio,
            decay_rate,
            author_reward_rate,
        )?;
        let hash = config.config_hash();
        if self.by_config.contains_key(&hash) {
            return Err(RegistryError::DuplicateConfig(hex::encode(hash)));
        }
        self.ensure_room(&assertion_addr)?;
        if self.config.check_assertion_on_create && !self.assertion_passes(assertion.as_ref()) {
            return Err(RegistryError::AssertionFailing(assertion_addr));
        }

        let address = Address::derive(POOL_ADDRESS_DOMAIN, &hash);
        let registry: Weak<dyn PoolRegistry> = self.self_ref.clone();
        let pool = AntePool::new(address, config, token, assertion, Some(registry), ctx)?;
        let handle = SharedPool::new(pool);

        match self.by_config.entry(hash) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateConfig(hex::encode(hash))),
            Entry::Vacant(slot) => {
                slot.insert(address);
            }
        }
        self.handles.insert(address, handle.clone());
        self.track(Arc::new(handle.clone()));

        info!(
            pool = %address,
            assertion = %assertion_addr,
            config_hash = %hex::encode(hash),
            "factory: pool created"
        );
        Ok(handle)
    }

    /// Register a pool created outside this factory.
    pub fn register_pool(&self, pool: Arc<dyn SiblingPool>) -> Result<(), RegistryError> {
        let address = pool.address();
        let assertion = pool.assertion();
        if self.pools.contains_key(&address) {
            return Err(RegistryError::DuplicateConfig(format!("pool {address} already registered")));
        }
        if self.failed_assertions.contains(&assertion) {
            return Err(RegistryError::AssertionPreviouslyFailed(assertion));
        }
        self.ensure_room(&assertion)?;
        self.track(pool);
        info!(pool = %address, %assertion, "factory: external pool registered");
        Ok(())
    }

    fn ensure_room(&self, assertion: &Address) -> Result<(), RegistryError> {
        let max = self.config.max_pools_per_assertion;
        if self.num_pools_by_assertion(assertion) >= max {
            return Err(RegistryError::MaxPoolsReached(max));
        }
        Ok(())
    }

    fn assertion_passes(&self, assertion: &dyn AnteAssertion) -> bool {
        let mut meter = GasMeter::new(self.config.creation_gas_limit);
        let verdict = panic::catch_unwind(AssertUnwindSafe(|| assertion.check_predicate(&mut meter)));
        matches!(verdict, Ok(Ok(true)))
    }

    fn track(&self, pool: Arc<dyn SiblingPool>) {
        let address = pool.address();
        let assertion = pool.assertion();
        self.pools.insert(address, pool);
        self.by_assertion.entry(assertion).or_default().push(address);
    }

    pub fn pools_by_assertion(&self, assertion: &Address) -> Vec<Address> {
        self.by_assertion
            .get(assertion)
            .map(|pools| pools.value().clone())
            .unwrap_or_default()
    }

    pub fn num_pools_by_assertion(&self, assertion: &Address) -> usize {
        self.by_assertion.get(assertion).map_or(0, |pools| pools.len())
    }

    pub fn pool_by_config(&self, config_hash: &[u8; 32]) -> Option<Address> {
        self.by_config.get(config_hash).map(|entry| *entry.value())
    }

    /// Every registered pool address, sorted.
    pub fn all_pools(&self) -> Vec<Address> {
        let mut all: Vec<Address> = self.pools.iter().map(|entry| *entry.key()).collect();
        all.sort();
        all
    }

    /// Handle for a pool created by this factory.
    pub fn pool(&self, address: &Address) -> Option<SharedPool> {
        self.handles.get(address).map(|entry| entry.value().clone())
    }

    pub fn has_failed(&self, assertion: &Address) -> bool {
        self.failed_assertions.contains(assertion)
    }

    /// Trust score of a pool created here, in percent. See
    /// [`AntePool::trust_score`].
    pub fn trust_score(&self, pool: &Address, now: u64) -> Result<u128, RegistryError> {
        let handle = self.pool(pool).ok_or(RegistryError::NotAPool(*pool))?;
        Ok(handle.trust_score(now)?)
    }
}

impl PoolRegistry for PoolFactory {
    fn address(&self) -> Address {
        self.address
    }

    fn broadcast_failure(
        &self,
        origin: Address,
        verifier: Address,
        ctx: &CallContext,
    ) -> Result<FailureBroadcast, RegistryError> {
        if ctx.caller != origin {
            warn!(%origin, caller = %ctx.caller, "factory: broadcast from a non-origin caller rejected");
            return Err(RegistryError::NotAPool(ctx.caller));
        }
        let origin_pool = self
            .pools
            .get(&origin)
            .map(|pool| Arc::clone(pool.value()))
            .ok_or(RegistryError::NotAPool(origin))?;
        if origin_pool.is_failed() != Ok(true) {
            warn!(%origin, "factory: broadcast from a live pool rejected");
            return Err(RegistryError::OriginNotFailed(origin));
        }
        let assertion = origin_pool.assertion();
        self.failed_assertions.insert(assertion);
        let as_registry = ctx.as_caller(self.address);

        // Collect first so no map guard is held while siblings run.
        let siblings: Vec<Arc<dyn SiblingPool>> = self
            .pools_by_assertion(&assertion)
            .into_iter()
            .filter(|address| *address != origin)
            .filter_map(|address| self.pools.get(&address).map(|p| Arc::clone(p.value())))
            .collect();

        let mut report = FailureBroadcast::default();
        for sibling in siblings {
            let address = sibling.address();
            let called = panic::catch_unwind(AssertUnwindSafe(|| sibling.mark_failed(verifier, &as_registry)));
            let outcome = match called {
                Ok(Ok(())) => SiblingOutcome::Failed,
                Ok(Err(PoolError::AlreadyFailed)) => SiblingOutcome::AlreadyFailed,
                Ok(Err(err)) => SiblingOutcome::Error(err.to_string()),
                Err(payload) => SiblingOutcome::Error(panic_reason(payload.as_ref())),
            };
            match &outcome {
                SiblingOutcome::Error(reason) => {
                    warn!(%origin, sibling = %address, %reason, "factory: sibling could not be failed");
                }
                _ => debug!(%origin, sibling = %address, ?outcome, "factory: sibling notified"),
            }
            report.outcomes.push((address, outcome));
        }

        info!(
            %origin,
            %assertion,
            %verifier,
            notified = report.outcomes.len(),
            failed = report.failed_count(),
            "factory: failure broadcast"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::*;

    struct PanickingSibling {
        address: Address,
        assertion: Address,
    }

    impl SiblingPool for PanickingSibling {
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
            panic!("sibling exploded")
        }
    }

    fn create(factory: &PoolFactory, fx: &Fixture, ratio: u64) -> Result<SharedPool, RegistryError> {
        factory.create_pool(fx.assertion.clone(), fx.token.clone(), ONE, ratio, 10, 10, &ctx_at(staker(), 0))
    }

    #[test]
    fn created_pool_is_indexed() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let pool = create(&factory, &fx, 10).unwrap();
        let assertion = fx.assertion.address();

        assert_eq!(factory.pools_by_assertion(&assertion), vec![pool.address()]);
        assert_eq!(factory.num_pools_by_assertion(&assertion), 1);
        assert_eq!(factory.pool_by_config(&fx.config().config_hash()), Some(pool.address()));
        assert_eq!(factory.all_pools(), vec![pool.address()]);
        assert!(factory.pool(&pool.address()).is_some());
    }

    #[test]
    fn duplicate_config_is_rejected() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        create(&factory, &fx, 10).unwrap();
        assert!(matches!(create(&factory, &fx, 10), Err(RegistryError::DuplicateConfig(_))));
        assert!(create(&factory, &fx, 11).is_ok());
    }

    #[test]
    fn pool_limit_per_assertion() {
        let fx = Fixture::new();
        let config = FactoryConfig { max_pools_per_assertion: 2, ..FactoryConfig::default() };
        let factory = PoolFactory::new(config).unwrap();
        create(&factory, &fx, 2).unwrap();
        create(&factory, &fx, 3).unwrap();
        assert_eq!(create(&factory, &fx, 4).err(), Some(RegistryError::MaxPoolsReached(2)));
    }

    #[test]
    fn failing_assertion_cannot_get_a_pool() {
        let fx = Fixture::new();
        fx.assertion.set_will_fail(true);
        let factory = PoolFactory::with_defaults();
        assert_eq!(
            create(&factory, &fx, 10).err(),
            Some(RegistryError::AssertionFailing(fx.assertion.address()))
        );
    }

    #[test]
    fn invalid_config_surfaces() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        assert!(matches!(create(&factory, &fx, 1), Err(RegistryError::Config(_))));
    }

    #[test]
    fn unknown_origin_is_not_a_pool() {
        let factory = PoolFactory::with_defaults();
        let stranger = Address::repeat(0x99);
        assert_eq!(
            factory.broadcast_failure(stranger, challenger(), &ctx_at(stranger, 0)).err(),
            Some(RegistryError::NotAPool(stranger))
        );
    }

    #[test]
    fn only_a_failed_origin_may_broadcast() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let origin = create(&factory, &fx, 10).unwrap();
        let sibling = create(&factory, &fx, 11).unwrap();
        let attacker = Address::repeat(0xde);

        assert_eq!(
            factory.broadcast_failure(origin.address(), attacker, &ctx_at(attacker, 5)).err(),
            Some(RegistryError::NotAPool(attacker))
        );
        // Even with the origin as caller, a live origin cannot fan out.
        assert_eq!(
            factory.broadcast_failure(origin.address(), attacker, &ctx_at(origin.address(), 5)).err(),
            Some(RegistryError::OriginNotFailed(origin.address()))
        );

        assert_eq!(origin.is_failed(), Ok(false));
        assert_eq!(sibling.is_failed(), Ok(false));
        assert_eq!(sibling.status().unwrap().verifier, None);
        assert!(!factory.has_failed(&fx.assertion.address()));
        assert!(create(&factory, &fx, 12).is_ok());
    }

    #[test]
    fn pools_accept_failure_only_from_their_factory() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let pool = create(&factory, &fx, 10).unwrap();
        let attacker = Address::repeat(0xde);

        assert_eq!(pool.mark_failed(attacker, &ctx_at(attacker, 5)), Err(PoolError::NotRegistry(attacker)));
        assert_eq!(pool.is_failed(), Ok(false));

        let other_factory = PoolFactory::with_defaults();
        assert_ne!(other_factory.address(), factory.address());
        let forged = ctx_at(other_factory.address(), 5);
        assert_eq!(pool.mark_failed(attacker, &forged), Err(PoolError::NotRegistry(other_factory.address())));
        assert_eq!(pool.is_failed(), Ok(false));

        pool.mark_failed(challenger(), &ctx_at(factory.address(), 5)).unwrap();
        assert_eq!(pool.status().unwrap().verifier, Some(challenger()));
    }

    #[test]
    fn trust_score_needs_a_known_pool() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let pool = create(&factory, &fx, 10).unwrap();
        assert_eq!(factory.trust_score(&pool.address(), T0), Ok(0));
        let stranger = Address::repeat(0x99);
        assert_eq!(factory.trust_score(&stranger, T0), Err(RegistryError::NotAPool(stranger)));
    }

    #[test]
    fn default_factory_matches_default_config() {
        let factory = PoolFactory::with_defaults();
        assert_eq!(factory.config(), &FactoryConfig::default());
        assert!(PoolFactory::new(FactoryConfig::default()).is_ok());
    }

    #[test]
    fn broadcast_isolates_panicking_sibling() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let origin = create(&factory, &fx, 10).unwrap();
        let healthy = create(&factory, &fx, 11).unwrap();
        let broken = Address::repeat(0xbb);
        factory
            .register_pool(Arc::new(PanickingSibling { address: broken, assertion: fx.assertion.address() }))
            .unwrap();

        origin.mark_failed(challenger(), &ctx_at(factory.address(), 5)).unwrap();
        let report = factory
            .broadcast_failure(origin.address(), challenger(), &ctx_at(origin.address(), 5))
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.failed_count(), 1);
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors, vec![(&broken, "panicked: sibling exploded")]);
        assert_eq!(healthy.is_failed(), Ok(true));
        assert!(factory.has_failed(&fx.assertion.address()));

        // A failed assertion takes no new pools.
        assert_eq!(
            create(&factory, &fx, 12).err(),
            Some(RegistryError::AssertionPreviouslyFailed(fx.assertion.address()))
        );
    }

    #[test]
    fn register_rejects_known_address() {
        let fx = Fixture::new();
        let factory = PoolFactory::with_defaults();
        let pool = create(&factory, &fx, 10).unwrap();
        assert!(matches!(
            factory.register_pool(Arc::new(pool)),
            Err(RegistryError::DuplicateConfig(_))
        ));
    }
}
