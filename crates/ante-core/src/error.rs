//! Error types for Ante bonding pools.
use thiserror::Error;

use crate::types::{Address, Side};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("arithmetic overflow")] Overflow,
    #[error("division by zero")] DivisionByZero,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("minimum challenger stake must be non-zero")] ZeroMinimumStake,
    #[error("payout ratio {0} outside allowed range")] PayoutRatioOutOfRange(u64),
    #[error("decay rate {0} outside allowed range")] DecayRateOutOfRange(u64),
    #[error("author reward rate {0} exceeds maximum")] AuthorRewardRateTooHigh(u64),
    #[error("invalid factory config: {0}")] Invalid(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    // Validation
    #[error("amount must be non-zero")] ZeroAmount,
    #[error("{side} stake {amount} below minimum {min}")] BelowMinimum { side: Side, amount: u128, min: u128 },
    #[error("cannot commit stake for less than {min} seconds (got {secs})")] LockTooShort { secs: u64, min: u64 },
    #[error("cannot commit stake for more than {max} seconds (got {secs})")] LockTooLong { secs: u64, max: u64 },
    #[error("new unlock {candidate} would shorten existing unlock {current}")] LockWouldShorten { current: u64, candidate: u64 },
    #[error("challenge of {requested} exceeds remaining cap {available}")] ChallengeCapExceeded { requested: u128, available: u128 },
    #[error("{side} remainder {remaining} between zero and minimum {min}")] DustRemainder { side: Side, remaining: u128, min: u128 },
    #[error("insufficient balance: have {have}, need {need}")] InsufficientBalance { have: u128, need: u128 },
    #[error(transparent)] InvalidConfig(#[from] ConfigError),
    // Authorization
    #[error("caller {0} is not a supporter")] NotSupporter(Address),
    #[error("caller {0} has no challenge")] NotChallenger(Address),
    #[error("caller {0} is not a confirmed challenger")] NotConfirmedChallenger(Address),
    #[error("caller {0} is not the assertion author")] NotAuthor(Address),
    #[error("caller {0} is not the pool registry")] NotRegistry(Address),
    #[error("pool not initialized")] Uninitialized,
    // Timing
    #[error("stake locked until {unlock}")] StakeLocked { unlock: u64 },
    #[error("challenge can be confirmed at {ready_at}")] ConfirmationDelay { ready_at: u64 },
    #[error("test can be checked from block {allowed_block}")] CheckDelay { allowed_block: u64 },
    #[error("withdrawal available at {allowed_at}")] WithdrawalNotReady { allowed_at: u64 },
    // State
    #[error("pool already initialized")] AlreadyInitialized,
    #[error("test already failed")] AlreadyFailed,
    #[error("test has not failed")] NotFailed,
    #[error("nothing to unstake")] NothingToUnstake,
    #[error("nothing to withdraw")] NothingToWithdraw,
    #[error("no challenger staking balance")] NoChallengerBalance,
    #[error("no reward")] NoReward,
    #[error("cannot withdraw while challenger claims are outstanding")] ClaimsOutstanding,
    #[error("gas limit {gas_limit} leaves reserve {reserve} below {required}")] InsufficientGas { gas_limit: u64, reserve: u64, required: u64 },
    #[error("assertion does not accept state")] StateNotSupported,
    #[error("pool is already executing a call")] Reentrant,
    // External
    #[error("collateral transfer of {amount} failed")] TransferFailed { amount: u128 },
    #[error(transparent)] Math(#[from] MathError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("caller {0} is not a registered pool")] NotAPool(Address),
    #[error("pool {0} has not failed")] OriginNotFailed(Address),
    #[error("pool with the same config already exists: {0}")] DuplicateConfig(String),
    #[error("max pools per assertion reached ({0})")] MaxPoolsReached(usize),
    #[error("assertion {0} has previously failed")] AssertionPreviouslyFailed(Address),
    #[error("assertion {0} does not pass")] AssertionFailing(Address),
    #[error(transparent)] Pool(#[from] PoolError),
    #[error(transparent)] Config(#[from] ConfigError),
}

/// Failure raised by an assertion predicate. Every variant counts as a failed
/// test except [`PredicateError::Unsupported`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("predicate reverted: {0}")] Reverted(String),
    #[error("predicate ran out of gas")] OutOfGas,
    #[error("predicate variant not implemented")] Unsupported,
}

#[derive(Error, Debug)]
pub enum AnteError {
    #[error(transparent)] Pool(#[from] PoolError),
    #[error(transparent)] Registry(#[from] RegistryError),
    #[error(transparent)] Math(#[from] MathError),
    #[error(transparent)] Config(#[from] ConfigError),
}
