//! End-to-end and adversarial test suite for Ante bonding pools.
//!
//! The integration tests under `tests/` drive pools the way an outside
//! caller would: through a [`PoolFactory`](ante_pool::PoolFactory) and
//! [`SharedPool`](ante_pool::SharedPool) handles, with scripted tokens and
//! assertions standing in for external contracts. Shared doubles live in
//! [`helpers`].

pub mod helpers;
