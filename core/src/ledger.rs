// ============ Ownership Ledger ============
// One uniform share table keyed by (owner, pool). Each entry carries the
// holder's balance and the part of it a vault has locked.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tidepool_types::{AccountId, ExchangeError, PoolId, Result};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub balance: u128,
    /// Never transferred with the shares; always <= balance
    pub locked: u128,
}

impl Position {
    pub fn unlocked(&self) -> u128 {
        self.balance - self.locked
    }

    fn is_empty(&self) -> bool {
        self.balance == 0 && self.locked == 0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OwnershipLedger {
    positions: BTreeMap<(AccountId, PoolId), Position>,
    supply: BTreeMap<PoolId, u128>,
    /// (owner, operator) pairs
    approvals: BTreeSet<(AccountId, AccountId)>,
}

impl OwnershipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ============ Queries ============

    pub fn position(&self, owner: &AccountId, pool: PoolId) -> Position {
        self.positions
            .get(&(*owner, pool))
            .copied()
            .unwrap_or_default()
    }

    pub fn balance_of(&self, owner: &AccountId, pool: PoolId) -> u128 {
        self.position(owner, pool).balance
    }

    pub fn locked_balance_of(&self, owner: &AccountId, pool: PoolId) -> u128 {
        self.position(owner, pool).locked
    }

    pub fn unlocked_balance_of(&self, owner: &AccountId, pool: PoolId) -> u128 {
        self.position(owner, pool).unlocked()
    }

    pub fn balance_of_batch(&self, queries: &[(AccountId, PoolId)]) -> Vec<u128> {
        queries
            .iter()
            .map(|(owner, pool)| self.balance_of(owner, *pool))
            .collect()
    }

    pub fn total_supply(&self, pool: PoolId) -> u128 {
        self.supply.get(&pool).copied().unwrap_or(0)
    }

    pub fn is_approved_for_all(&self, owner: &AccountId, operator: &AccountId) -> bool {
        self.approvals.contains(&(*owner, *operator))
    }

    /// Holders of a pool with a non-empty position, in id order.
    pub fn holders(&self, pool: PoolId) -> impl Iterator<Item = (&AccountId, &Position)> {
        self.positions
            .iter()
            .filter(move |((_, p), _)| *p == pool)
            .map(|((owner, _), position)| (owner, position))
    }

    // ============ Supply ============

    pub fn mint(&mut self, owner: &AccountId, pool: PoolId, amount: u128) -> Result<()> {
        let mut position = self.position(owner, pool);
        position.balance = position
            .balance
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;
        let supply = self
            .total_supply(pool)
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;

        self.write(owner, pool, position);
        self.supply.insert(pool, supply);
        debug!(%owner, %pool, amount, supply, "minted shares");
        Ok(())
    }

    /// Burns unlocked shares only.
    pub fn burn(&mut self, owner: &AccountId, pool: PoolId, amount: u128) -> Result<()> {
        let mut position = self.position(owner, pool);
        if position.unlocked() < amount {
            return Err(ExchangeError::InsufficientBalance {
                available: position.unlocked(),
                required: amount,
            });
        }
        position.balance -= amount;
        let supply = self.total_supply(pool) - amount;

        self.write(owner, pool, position);
        self.supply.insert(pool, supply);
        debug!(%owner, %pool, amount, supply, "burned shares");
        Ok(())
    }

    // ============ Transfers ============

    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        pool: PoolId,
        amount: u128,
    ) -> Result<()> {
        let mut sender = self.position(from, pool);
        if sender.unlocked() < amount {
            return Err(ExchangeError::Locked {
                unlocked: sender.unlocked(),
                requested: amount,
            });
        }
        if from == to {
            return Ok(());
        }

        let mut receiver = self.position(to, pool);
        receiver.balance = receiver
            .balance
            .checked_add(amount)
            .ok_or(ExchangeError::Overflow)?;
        sender.balance -= amount;

        self.write(from, pool, sender);
        self.write(to, pool, receiver);
        debug!(%from, %to, %pool, amount, "transferred shares");
        Ok(())
    }

    pub fn set_approval_for_all(&mut self, owner: &AccountId, operator: &AccountId, approved: bool) {
        if approved {
            self.approvals.insert((*owner, *operator));
        } else {
            self.approvals.remove(&(*owner, *operator));
        }
        debug!(%owner, %operator, approved, "operator approval");
    }

    pub fn transfer_from(
        &mut self,
        operator: &AccountId,
        from: &AccountId,
        to: &AccountId,
        pool: PoolId,
        amount: u128,
    ) -> Result<()> {
        self.check_operator(operator, from)?;
        self.transfer(from, to, pool, amount)
    }

    /// Moves several pool positions at once; either every entry moves or none does.
    pub fn batch_transfer_from(
        &mut self,
        operator: &AccountId,
        from: &AccountId,
        to: &AccountId,
        entries: &[(PoolId, u128)],
    ) -> Result<()> {
        self.check_operator(operator, from)?;

        let mut totals: BTreeMap<PoolId, u128> = BTreeMap::new();
        for (pool, amount) in entries {
            let total = totals.entry(*pool).or_insert(0);
            *total = total.checked_add(*amount).ok_or(ExchangeError::Overflow)?;
        }
        for (pool, amount) in &totals {
            let sender = self.position(from, *pool);
            if sender.unlocked() < *amount {
                return Err(ExchangeError::Locked {
                    unlocked: sender.unlocked(),
                    requested: *amount,
                });
            }
            self.position(to, *pool)
                .balance
                .checked_add(*amount)
                .ok_or(ExchangeError::Overflow)?;
        }

        for (pool, amount) in totals {
            self.transfer(from, to, pool, amount)?;
        }
        Ok(())
    }

    fn check_operator(&self, operator: &AccountId, from: &AccountId) -> Result<()> {
        if operator != from && !self.is_approved_for_all(from, operator) {
            return Err(ExchangeError::NotApproved);
        }
        Ok(())
    }

    // ============ Locks ============

    /// Sets the absolute locked amount. Only vaults hold this capability.
    pub(crate) fn set_locked(&mut self, owner: &AccountId, pool: PoolId, amount: u128) -> Result<()> {
        let mut position = self.position(owner, pool);
        if amount > position.balance {
            return Err(ExchangeError::LockExceedsBalance {
                lock: amount,
                balance: position.balance,
            });
        }
        position.locked = amount;
        self.write(owner, pool, position);
        debug!(%owner, %pool, locked = amount, "lock updated");
        Ok(())
    }

    // ============ Internal ============

    fn write(&mut self, owner: &AccountId, pool: PoolId, position: Position) {
        if position.is_empty() {
            self.positions.remove(&(*owner, pool));
        } else {
            self.positions.insert((*owner, pool), position);
        }
    }

    pub(crate) fn raw_position(&self, owner: &AccountId, pool: PoolId) -> Option<Position> {
        self.positions.get(&(*owner, pool)).copied()
    }

    pub(crate) fn raw_supply(&self, pool: PoolId) -> Option<u128> {
        self.supply.get(&pool).copied()
    }

    pub(crate) fn restore_position(&mut self, owner: &AccountId, pool: PoolId, saved: Option<Position>) {
        match saved {
            Some(position) => self.positions.insert((*owner, pool), position),
            None => self.positions.remove(&(*owner, pool)),
        };
    }

    pub(crate) fn restore_supply(&mut self, pool: PoolId, saved: Option<u128>) {
        match saved {
            Some(supply) => self.supply.insert(pool, supply),
            None => self.supply.remove(&pool),
        };
    }

    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update(b"ledger");
        for ((owner, pool), position) in &self.positions {
            hasher.update(owner.0);
            hasher.update(pool.0.to_le_bytes());
            hasher.update(position.balance.to_le_bytes());
            hasher.update(position.locked.to_le_bytes());
        }
        for (pool, supply) in &self.supply {
            hasher.update(pool.0.to_le_bytes());
            hasher.update(supply.to_le_bytes());
        }
        for (owner, operator) in &self.approvals {
            hasher.update(owner.0);
            hasher.update(operator.0);
        }
    }
}
