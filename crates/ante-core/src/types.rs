//! Core domain types: identities, pool configuration, accumulators and
//! aggregate state.
//!
//! Amounts are `u128` token base units; multipliers are fixed-point with
//! [`FIXED_ONE`] as 1.0.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{
    FIXED_ONE, MAX_ANNUAL_DECAY_RATE, MAX_AUTHOR_REWARD_RATE, MAX_CHALLENGER_PAYOUT_RATIO,
    MIN_ANNUAL_DECAY_RATE, MIN_CHALLENGER_PAYOUT_RATIO, VERIFIER_BOUNTY_PCT,
};
use crate::error::{ConfigError, MathError};
use crate::math::mul_div;

/// A 20-byte account identity (user, pool, token or assertion).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Self = Self([0u8; 20]);

    /// Address whose every byte is `seed`. Handy for fixtures.
    pub fn repeat(seed: u8) -> Self {
        Self([seed; 20])
    }

    /// Derive an address from the BLAKE3 hash of `domain || data`.
    pub fn derive(domain: &str, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(data);
        let digest = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_bytes()[..20]);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let mut out = [0u8; 20];
        hex::decode_to_slice(raw, &mut out)?;
        Ok(Self(out))
    }
}

/// Which side of the pool a position sits on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Supporter,
    Challenger,
}

impl Side {
    pub fn from_is_challenger(is_challenger: bool) -> Self {
        if is_challenger { Side::Challenger } else { Side::Supporter }
    }

    pub fn is_challenger(self) -> bool {
        matches!(self, Side::Challenger)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Supporter => f.write_str("supporter"),
            Side::Challenger => f.write_str("challenger"),
        }
    }
}

/// Caller-supplied execution context. "Now" is always read from here.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Address,
    pub timestamp: u64,
    pub block: u64,
    pub gas_limit: u64,
}

impl CallContext {
    pub const DEFAULT_GAS_LIMIT: u64 = 30_000_000;

    pub fn new(caller: Address, timestamp: u64, block: u64) -> Self {
        Self { caller, timestamp, block, gas_limit: Self::DEFAULT_GAS_LIMIT }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    /// Same clock, different caller.
    pub fn as_caller(mut self, caller: Address) -> Self {
        self.caller = caller;
        self
    }
}

/// Immutable pool parameters, validated at construction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub assertion: Address,
    pub token: Address,
    pub min_challenger_stake: u128,
    /// Derived: `min_challenger_stake * challenger_payout_ratio`.
    pub min_supporter_stake: u128,
    pub challenger_payout_ratio: u64,
    /// Percent of challenger collateral decayed per year.
    pub decay_rate: u64,
    /// Percent of each decay routed to the assertion author.
    pub author_reward_rate: u64,
    pub verifier_bounty_pct: u128,
}

impl PoolConfig {
    pub fn new(
        assertion: Address,
        token: Address,
        min_challenger_stake: u128,
        challenger_payout_ratio: u64,
        decay_rate: u64,
        author_reward_rate: u64,
    ) -> Result<Self, ConfigError> {
        if min_challenger_stake == 0 {
            return Err(ConfigError::ZeroMinimumStake);
        }
        if !(MIN_CHALLENGER_PAYOUT_RATIO..=MAX_CHALLENGER_PAYOUT_RATIO)
            .contains(&challenger_payout_ratio)
        {
            return Err(ConfigError::PayoutRatioOutOfRange(challenger_payout_ratio));
        }
        if !(MIN_ANNUAL_DECAY_RATE..=MAX_ANNUAL_DECAY_RATE).contains(&decay_rate) {
            return Err(ConfigError::DecayRateOutOfRange(decay_rate));
        }
        if author_reward_rate > MAX_AUTHOR_REWARD_RATE {
            return Err(ConfigError::AuthorRewardRateTooHigh(author_reward_rate));
        }
        let min_supporter_stake = min_challenger_stake
            .checked_mul(challenger_payout_ratio as u128)
            .ok_or_else(|| ConfigError::Invalid("minimum supporter stake overflows".into()))?;
        Ok(Self {
            assertion,
            token,
            min_challenger_stake,
            min_supporter_stake,
            challenger_payout_ratio,
            decay_rate,
            author_reward_rate,
            verifier_bounty_pct: VERIFIER_BOUNTY_PCT,
        })
    }

    /// BLAKE3 over the fields that make two pools interchangeable.
    pub fn config_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.assertion.as_bytes());
        hasher.update(self.token.as_bytes());
        hasher.update(&self.min_challenger_stake.to_be_bytes());
        hasher.update(&(self.challenger_payout_ratio as u128).to_be_bytes());
        hasher.update(&(self.decay_rate as u128).to_be_bytes());
        hasher.update(&(self.author_reward_rate as u128).to_be_bytes());
        *hasher.finalize().as_bytes()
    }

    pub fn min_stake(&self, side: Side) -> u128 {
        match side {
            Side::Supporter => self.min_supporter_stake,
            Side::Challenger => self.min_challenger_stake,
        }
    }
}

/// A shared, monotone exchange-rate accumulator for one side.
///
/// The epoch increments whenever the multiplier would reach zero; snapshots
/// from an older epoch read as zero.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Accumulator {
    pub multiplier: u128,
    pub epoch: u32,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self { multiplier: FIXED_ONE, epoch: 0 }
    }
}

impl Accumulator {
    /// Restart at 1.0 in a fresh epoch.
    pub fn rebase(&mut self) {
        self.multiplier = FIXED_ONE;
        self.epoch = self.epoch.wrapping_add(1);
    }
}

/// An amount pinned to an accumulator value.
///
/// The live value is `amount * current / multiplier`; see [`Snapshot::value`].
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub amount: u128,
    pub multiplier: u128,
    pub epoch: u32,
}

impl Snapshot {
    pub fn at(amount: u128, acc: &Accumulator) -> Self {
        Self { amount, multiplier: acc.multiplier, epoch: acc.epoch }
    }

    /// Current value against `acc`. Empty or stale snapshots are zero.
    pub fn value(&self, acc: &Accumulator) -> Result<u128, MathError> {
        if self.amount == 0 || self.epoch != acc.epoch {
            return Ok(0);
        }
        mul_div(self.amount, acc.multiplier, self.multiplier)
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }
}

/// Aggregate counters for one side of the pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SideAggregate {
    /// Decay-adjusted total of all live positions.
    pub total_amount: u128,
    /// Positions with a non-zero live balance.
    pub num_users: u64,
    pub accumulator: Accumulator,
}

/// The inputs and outputs of the decay engine.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DecayState {
    pub supporters: SideAggregate,
    pub challengers: SideAggregate,
    pub last_update_timestamp: u64,
    pub last_update_block: u64,
    pub unclaimed_author_reward: u128,
    /// Staker decay accrued while the supporter total was zero.
    pub parked_staker_decay: u128,
    /// Set once the pool fails; decay never runs again.
    pub frozen: bool,
}

impl DecayState {
    pub fn starting_at(timestamp: u64, block: u64) -> Self {
        Self { last_update_timestamp: timestamp, last_update_block: block, ..Self::default() }
    }

    pub fn side(&self, side: Side) -> &SideAggregate {
        match side {
            Side::Supporter => &self.supporters,
            Side::Challenger => &self.challengers,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut SideAggregate {
        match side {
            Side::Supporter => &mut self.supporters,
            Side::Challenger => &mut self.challengers,
        }
    }

    /// Decay only runs while both sides hold at least one user.
    pub fn is_decaying(&self) -> bool {
        !self.frozen && self.supporters.num_users > 0 && self.challengers.num_users > 0
    }
}

/// How one decay update splits between the challenger side, the stakers and
/// the assertion author.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DecaySplit {
    /// Fixed-point fraction of challenger collateral removed, capped at 1.0.
    pub fraction: u128,
    pub total: u128,
    pub staker_share: u128,
    pub author_share: u128,
}

/// Failure and bookkeeping status of a pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub pending_failure: bool,
    pub failed_block: u64,
    pub failed_timestamp: u64,
    pub verifier: Option<Address>,
    /// Eligible challenger balance at the moment decay froze.
    pub eligible_balance_at_failure: u128,
    pub total_paid_out: u128,
    pub num_paid_out: u64,
    pub last_verified_block: u64,
    pub last_verified_timestamp: u64,
    pub num_times_verified: u64,
}

/// Name and type of one field an assertion accepts as external state.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct StateField {
    pub name: String,
    pub ty: String,
}
