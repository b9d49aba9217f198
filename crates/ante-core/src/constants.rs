//! Protocol constants. All collateral amounts are in token base units.

/// Fixed-point representation of 1.0 for exchange-rate multipliers and decay
/// fractions.
pub const FIXED_ONE: u128 = 1_000_000_000_000_000_000;

pub const ONE_DAY_SECS: u64 = 86_400;
pub const SECONDS_PER_YEAR: u64 = 365 * ONE_DAY_SECS;

/// Percent denominator used by decay, author reward and bounty rates.
pub const PERCENT_PRECISION: u128 = 100;

pub const MIN_CHALLENGER_PAYOUT_RATIO: u64 = 2;
pub const MAX_CHALLENGER_PAYOUT_RATIO: u64 = 20;
pub const MIN_ANNUAL_DECAY_RATE: u64 = 5;
pub const MAX_ANNUAL_DECAY_RATE: u64 = 50;
pub const MAX_AUTHOR_REWARD_RATE: u64 = 10;

/// Share of the supporter pool paid to the challenger who proves failure.
pub const VERIFIER_BOUNTY_PCT: u128 = 5;

/// Shortest allowed supporter lock commitment.
pub const MIN_STAKE_COMMITMENT: u64 = ONE_DAY_SECS;
/// Longest allowed supporter lock commitment (730 days).
pub const MAX_STAKE_COMMITMENT: u64 = 2 * SECONDS_PER_YEAR;

/// Release delay between a supporter unstake and the matching withdrawal.
pub const UNSTAKE_DELAY: u64 = ONE_DAY_SECS;

/// Seconds a challenger must wait after registering before confirming.
pub const CHALLENGER_TIMESTAMP_DELAY: u64 = 180;

/// Blocks a challenger must wait after confirming before checking the test.
pub const CHALLENGER_BLOCK_DELAY: u64 = 12;

/// Divisor of the call gas limit held back from the assertion predicate.
pub const GAS_RESERVE_DIVISOR: u64 = 64;

/// Gas the held-back reserve must cover to finish failure bookkeeping.
///
/// Measured for a single pool; the fan-out itself runs outside the metered
/// predicate call.
pub const FAILURE_BOOKKEEPING_GAS: u64 = 181_000;

/// Upper bound on pools that may share one assertion in a registry.
pub const MAX_POOLS_PER_ASSERTION: usize = 32;
