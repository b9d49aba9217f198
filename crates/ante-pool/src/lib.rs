//! # ante-pool: Ante bonding pool state machine.
//!
//! [`AntePool`] is the aggregate root: supporters stake behind an external
//! assertion, challengers bet against it, and challenger collateral decays
//! toward supporters until the assertion is proven to fail. After failure
//! the supporter pool is paid out to confirmed challengers.
//!
//! Layout:
//! - [`ledger`]: per-user positions pinned to the side accumulators
//! - [`stake`] / [`challenge`] / [`failure`]: the lifecycle operations
//! - [`shared`]: lock-guarded handle that rejects reentrant calls
//! - [`factory`]: in-memory registry fanning failures out to siblings

pub mod challenge;
pub mod config;
pub mod events;
pub mod factory;
pub mod failure;
pub mod ledger;
pub mod pool;
pub mod shared;
pub mod stake;

#[cfg(test)]
mod testkit;

pub use config::FactoryConfig;
pub use events::PoolEvent;
pub use factory::PoolFactory;
pub use ledger::{ChallengerPosition, PositionLedger, SupporterPosition};
pub use pool::AntePool;
pub use shared::SharedPool;
