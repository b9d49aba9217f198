//! Observable pool events.
//!
//! Events are buffered on the pool as each call runs and dropped if the call
//! aborts. Callers collect them with [`AntePool::drain_events`](crate::AntePool::drain_events).

use ante_core::types::{Address, Side};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    Stake { staker: Address, amount: u128, commit_secs: u64 },
    Unstake { staker: Address, amount: u128, side: Side },
    LockExtended { staker: Address, old_unlock: u64, new_unlock: u64 },
    ChallengeRegistered { challenger: Address, amount: u128 },
    ChallengeConfirmed { challenger: Address, confirmed: u128 },
    DecayStarted { timestamp: u64 },
    DecayPaused { timestamp: u64 },
    LivenessChecked { checker: Address, block: u64 },
    FailureOccurred { verifier: Address, block: u64 },
    StakeWithdrawn { staker: Address, amount: u128 },
    WithdrawalCancelled { staker: Address, amount: u128 },
    ClaimPaid { claimer: Address, amount: u128 },
    RewardPaid { author: Address, amount: u128 },
    /// A sibling pool could not be marked failed. `sibling` is `None` when
    /// the registry itself errored.
    SiblingFailurePropagationError { sibling: Option<Address>, reason: String },
}

impl PoolEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            PoolEvent::Stake { .. } => "stake",
            PoolEvent::Unstake { .. } => "unstake",
            PoolEvent::LockExtended { .. } => "lock_extended",
            PoolEvent::ChallengeRegistered { .. } => "challenge_registered",
            PoolEvent::ChallengeConfirmed { .. } => "challenge_confirmed",
            PoolEvent::DecayStarted { .. } => "decay_started",
            PoolEvent::DecayPaused { .. } => "decay_paused",
            PoolEvent::LivenessChecked { .. } => "liveness_checked",
            PoolEvent::FailureOccurred { .. } => "failure_occurred",
            PoolEvent::StakeWithdrawn { .. } => "stake_withdrawn",
            PoolEvent::WithdrawalCancelled { .. } => "withdrawal_cancelled",
            PoolEvent::ClaimPaid { .. } => "claim_paid",
            PoolEvent::RewardPaid { .. } => "reward_paid",
            PoolEvent::SiblingFailurePropagationError { .. } => "sibling_failure_propagation_error",
        }
    }
}
