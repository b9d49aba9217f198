//! # ante-core
//! Foundation types and traits for Ante bonding pools.
//!
//! Everything here is pure data and arithmetic: the pool accounting lives in
//! `ante-pool`, the decay math in `ante-decay`. Collateral tokens, assertions
//! and the pool registry are external collaborators reached only through the
//! traits in [`traits`].

pub mod constants;
pub mod error;
pub mod gas;
pub mod math;
pub mod traits;
pub mod types;
