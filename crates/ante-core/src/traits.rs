//! Trait interfaces between the pool and its collaborators.
//!
//! - [`CollateralToken`]: the fungible asset backing both sides
//! - [`AnteAssertion`]: the external pass/fail predicate ("the test")
//! - [`PoolRegistry`]: fans a failure out to sibling pools
//! - [`SiblingPool`]: what the registry needs from each pool it notifies
//! - [`DecayCalculator`]: decay math (ante-decay implements)
//!
//! Everything behind these traits is untrusted: results are validated and
//! failures are isolated by the caller.

use serde::{Deserialize, Serialize};

use crate::error::{MathError, PoolError, PredicateError, RegistryError};
use crate::gas::GasMeter;
use crate::types::{Address, CallContext, DecaySplit, StateField};

/// The collateral asset.
///
/// Implementations may signal failure either by returning `false` or by
/// being unable to move funds; both abort the calling operation.
pub trait CollateralToken: Send + Sync {
    fn address(&self) -> Address;

    /// Pull `amount` from `from` into `to`. Returns `false` on failure.
    fn transfer_from(&self, from: Address, to: Address, amount: u128) -> bool;

    /// Push `amount` held by `from` to `to`. Returns `false` on failure.
    fn transfer(&self, from: Address, to: Address, amount: u128) -> bool;

    fn balance_of(&self, owner: Address) -> u128;
}

/// The external boolean assertion backing a pool.
///
/// A predicate that returns `Ok(false)` or any error other than
/// [`PredicateError::Unsupported`] means the assertion failed.
pub trait AnteAssertion: Send + Sync {
    /// Identity of the assertion contract.
    fn address(&self) -> Address;

    /// Author entitled to the decay reward.
    fn author(&self) -> Address;

    /// Evaluate the assertion, charging `meter` for the work done.
    fn check_predicate(&self, meter: &mut GasMeter) -> Result<bool, PredicateError>;

    /// Evaluate the assertion after applying caller-supplied state.
    ///
    /// Legacy assertions keep the default, which reports
    /// [`PredicateError::Unsupported`].
    fn check_predicate_with_state(
        &self,
        _state: &[u8],
        _meter: &mut GasMeter,
    ) -> Result<bool, PredicateError> {
        Err(PredicateError::Unsupported)
    }

    /// Field names and types of the accepted state, for tooling.
    fn state_fields(&self) -> Option<Vec<StateField>> {
        None
    }
}

/// Outcome of notifying one sibling pool.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum SiblingOutcome {
    Failed,
    AlreadyFailed,
    Error(String),
}

/// Per-sibling report returned by [`PoolRegistry::broadcast_failure`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct FailureBroadcast {
    pub outcomes: Vec<(Address, SiblingOutcome)>,
}

impl FailureBroadcast {
    pub fn errors(&self) -> impl Iterator<Item = (&Address, &str)> {
        self.outcomes.iter().filter_map(|(addr, outcome)| match outcome {
            SiblingOutcome::Error(reason) => Some((addr, reason.as_str())),
            _ => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SiblingOutcome::Failed))
            .count()
    }
}

/// Registry that knows every pool sharing an assertion.
pub trait PoolRegistry: Send + Sync {
    /// Caller identity used when the registry fails a sibling. Pools accept
    /// [`SiblingPool::mark_failed`] only from this address.
    fn address(&self) -> Address;

    /// Mark every sibling of `origin` failed. The caller must be `origin`
    /// itself and it must already have failed. A misbehaving sibling is
    /// reported, never propagated.
    fn broadcast_failure(
        &self,
        origin: Address,
        verifier: Address,
        ctx: &CallContext,
    ) -> Result<FailureBroadcast, RegistryError>;
}

/// The part of a pool the registry talks to during fan-out.
pub trait SiblingPool: Send + Sync {
    fn address(&self) -> Address;

    fn assertion(&self) -> Address;

    fn is_failed(&self) -> Result<bool, PoolError>;

    /// Latch failure proven by `verifier` in another pool. Only the pool's
    /// registry may call this.
    fn mark_failed(&self, verifier: Address, ctx: &CallContext) -> Result<(), PoolError>;
}

/// Pure decay math.
///
/// Rates are fixed at construction; all values are fixed-point or base
/// units. Implemented by the decay engine (ante-decay).
pub trait DecayCalculator: Send + Sync {
    /// Fraction of challenger collateral decayed over `elapsed_secs`,
    /// as fixed-point capped at 1.0.
    fn decay_fraction(&self, elapsed_secs: u64) -> Result<u128, MathError>;

    /// Decay of `challenger_total` over `elapsed_secs`, split between
    /// stakers and author.
    fn compute_decay(&self, challenger_total: u128, elapsed_secs: u64) -> Result<DecaySplit, MathError>;

    /// Remaining balance after decay. Default: `total - compute_decay(..).total`.
    fn effective_value(&self, challenger_total: u128, elapsed_secs: u64) -> Result<u128, MathError> {
        let split = self.compute_decay(challenger_total, elapsed_secs)?;
        challenger_total
            .checked_sub(split.total)
            .ok_or(MathError::Overflow)
    }
}
