//! Per-user positions pinned to the side accumulators.
//!
//! A position never stores its live balance. It stores a [`Snapshot`] of the
//! amount and the side multiplier at its last change; the balance is derived
//! on read. Merges re-snapshot at the current multiplier before changing the
//! amount, so older growth or decay is never applied twice.
//!
//! Challengers also hold claimable shares: the part of their stake that was
//! confirmed and will share the supporter pool on failure. Claimable shares
//! and the pool-wide eligible balance are snapshots on the challenger
//! accumulator, so both decay in step with the stake they cover.

use std::collections::HashMap;

use ante_core::error::{MathError, PoolError};
use ante_core::math::checked_add;
use ante_core::types::{Accumulator, Address, SideAggregate, Side, Snapshot};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SupporterPosition {
    pub stake: Snapshot,
    pub last_stake_timestamp: u64,
    pub last_stake_block: u64,
    /// Never moves backwards.
    pub unlock_timestamp: u64,
    /// Unstaked, awaiting withdrawal. Does not earn decay.
    pub pending_withdraw: u128,
    pub pending_release_at: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ChallengerPosition {
    pub stake: Snapshot,
    pub last_register_timestamp: u64,
    pub last_register_block: u64,
    pub claimable: Snapshot,
    /// Block of the latest confirmation; the liveness check delay counts
    /// from here.
    pub confirmed_block: Option<u64>,
}

/// State restored when an operation aborts.
///
/// Holds only what one call can touch: the caller's two positions and the
/// ledger-wide counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerCheckpoint {
    user: Address,
    supporter: Option<SupporterPosition>,
    challenger: Option<ChallengerPosition>,
    total_pending_withdraw: u128,
    eligible: Snapshot,
}

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    supporters: HashMap<Address, SupporterPosition>,
    challengers: HashMap<Address, ChallengerPosition>,
    total_pending_withdraw: u128,
    /// Confirmed challenger balance, on the challenger accumulator.
    eligible: Snapshot,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supporter(&self, user: &Address) -> Option<&SupporterPosition> {
        self.supporters.get(user)
    }

    pub fn challenger(&self, user: &Address) -> Option<&ChallengerPosition> {
        self.challengers.get(user)
    }

    pub(crate) fn supporter_mut(&mut self, user: Address) -> &mut SupporterPosition {
        self.supporters.entry(user).or_default()
    }

    pub(crate) fn challenger_mut(&mut self, user: Address) -> &mut ChallengerPosition {
        self.challengers.entry(user).or_default()
    }

    pub fn stake_snapshot(&self, side: Side, user: &Address) -> Snapshot {
        match side {
            Side::Supporter => self.supporters.get(user).map(|p| p.stake),
            Side::Challenger => self.challengers.get(user).map(|p| p.stake),
        }
        .unwrap_or_default()
    }

    fn set_stake_snapshot(&mut self, side: Side, user: Address, snapshot: Snapshot) {
        match side {
            Side::Supporter => self.supporter_mut(user).stake = snapshot,
            Side::Challenger => self.challenger_mut(user).stake = snapshot,
        }
    }

    /// Live (decay-adjusted) balance of `user` on `side`.
    pub fn balance(&self, side: Side, user: &Address, acc: &Accumulator) -> Result<u128, MathError> {
        self.stake_snapshot(side, user).value(acc)
    }

    /// Merge `amount` into the position. Returns `true` when this opened a
    /// position that had no live balance.
    pub fn credit(
        &mut self,
        side: Side,
        user: Address,
        amount: u128,
        agg: &mut SideAggregate,
    ) -> Result<bool, MathError> {
        let current = self.balance(side, &user, &agg.accumulator)?;
        let merged = checked_add(current, amount)?;
        self.set_stake_snapshot(side, user, Snapshot::at(merged, &agg.accumulator));
        agg.total_amount = checked_add(agg.total_amount, amount)?;
        let opened = current == 0 && merged > 0;
        if opened {
            agg.num_users += 1;
        }
        Ok(opened)
    }

    /// Remove `amount` from the position. Returns the remaining balance.
    pub fn debit(
        &mut self,
        side: Side,
        user: Address,
        amount: u128,
        agg: &mut SideAggregate,
    ) -> Result<u128, PoolError> {
        let current = self.balance(side, &user, &agg.accumulator)?;
        if current < amount {
            return Err(PoolError::InsufficientBalance { have: current, need: amount });
        }
        let remaining = current - amount;
        self.set_stake_snapshot(side, user, Snapshot::at(remaining, &agg.accumulator));
        // Per-position flooring can leave the sum of balances a few units
        // above the aggregate.
        agg.total_amount = agg.total_amount.saturating_sub(amount);
        if remaining == 0 && current > 0 {
            agg.num_users = agg.num_users.saturating_sub(1);
        }
        Ok(remaining)
    }

    // --- eligibility ---

    pub fn eligible_balance(&self, acc: &Accumulator) -> Result<u128, MathError> {
        self.eligible.value(acc)
    }

    pub fn claimable(&self, user: &Address, acc: &Accumulator) -> Result<u128, MathError> {
        self.challengers
            .get(user)
            .map_or(Ok(0), |p| p.claimable.value(acc))
    }

    /// Make the caller's whole live challenge claimable. Returns the amount
    /// that became newly eligible.
    pub fn confirm(&mut self, user: Address, block: u64, acc: &Accumulator) -> Result<u128, MathError> {
        let balance = self.balance(Side::Challenger, &user, acc)?;
        let before = self.claimable(&user, acc)?;
        let added = balance.saturating_sub(before);
        let eligible = checked_add(self.eligible.value(acc)?, added)?;
        self.eligible = Snapshot::at(eligible, acc);

        let pos = self.challenger_mut(user);
        pos.claimable = Snapshot::at(balance, acc);
        pos.confirmed_block = Some(block);
        Ok(added)
    }

    /// Shrink claimable shares to at most `remaining`.
    pub fn cap_claimable(&mut self, user: Address, remaining: u128, acc: &Accumulator) -> Result<(), MathError> {
        let claimable = self.claimable(&user, acc)?;
        if claimable <= remaining {
            return Ok(());
        }
        let eligible = self.eligible.value(acc)?.saturating_sub(claimable - remaining);
        self.eligible = Snapshot::at(eligible, acc);

        let pos = self.challenger_mut(user);
        pos.claimable = Snapshot::at(remaining, acc);
        if remaining == 0 {
            pos.confirmed_block = None;
        }
        Ok(())
    }

    /// Zero a challenger position after a claim. Returns its balance and
    /// claimable shares as they stood.
    pub fn close_challenger(&mut self, user: Address, agg: &mut SideAggregate) -> Result<(u128, u128), MathError> {
        let balance = self.balance(Side::Challenger, &user, &agg.accumulator)?;
        let claimable = self.claimable(&user, &agg.accumulator)?;
        let pos = self.challenger_mut(user);
        pos.stake = Snapshot::default();
        pos.claimable = Snapshot::default();
        pos.confirmed_block = None;
        if balance > 0 {
            agg.total_amount = agg.total_amount.saturating_sub(balance);
            agg.num_users = agg.num_users.saturating_sub(1);
        }
        Ok((balance, claimable))
    }

    // --- pending withdrawals ---

    pub fn total_pending_withdraw(&self) -> u128 {
        self.total_pending_withdraw
    }

    /// Add `amount` to the pending sub-balance and restart its release timer.
    pub fn queue_withdraw(&mut self, user: Address, amount: u128, release_at: u64) -> Result<(), MathError> {
        self.total_pending_withdraw = checked_add(self.total_pending_withdraw, amount)?;
        let pos = self.supporter_mut(user);
        pos.pending_withdraw = checked_add(pos.pending_withdraw, amount)?;
        pos.pending_release_at = release_at;
        Ok(())
    }

    /// Clear the pending sub-balance and return it.
    pub fn take_pending(&mut self, user: Address) -> u128 {
        let pos = self.supporter_mut(user);
        let amount = pos.pending_withdraw;
        pos.pending_withdraw = 0;
        pos.pending_release_at = 0;
        self.total_pending_withdraw = self.total_pending_withdraw.saturating_sub(amount);
        amount
    }

    // --- rollback ---

    pub fn checkpoint(&self, user: Address) -> LedgerCheckpoint {
        LedgerCheckpoint {
            user,
            supporter: self.supporters.get(&user).copied(),
            challenger: self.challengers.get(&user).copied(),
            total_pending_withdraw: self.total_pending_withdraw,
            eligible: self.eligible,
        }
    }

    pub fn restore(&mut self, cp: LedgerCheckpoint) {
        match cp.supporter {
            Some(pos) => self.supporters.insert(cp.user, pos),
            None => self.supporters.remove(&cp.user),
        };
        match cp.challenger {
            Some(pos) => self.challengers.insert(cp.user, pos),
            None => self.challengers.remove(&cp.user),
        };
        self.total_pending_withdraw = cp.total_pending_withdraw;
        self.eligible = cp.eligible;
    }
}
