//! # ante-decay: Continuous challenger decay.
//!
//! Challenger collateral shrinks linearly with time at the pool's annual
//! rate while both sides are populated. The decayed value flows to
//! supporters through a shared exchange-rate accumulator, minus the
//! author's cut.
//!
//! Balances are never iterated: each side carries one fixed-point
//! multiplier and every position stores a [`Snapshot`](ante_core::types::Snapshot)
//! of it, so a read is a single `mul_div`.

pub mod engine;

pub use engine::{DecayEngine, DecayOutcome};
