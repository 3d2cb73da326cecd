// ============ Asset Bank ============
// Boundary to the external fungible assets. The exchange hands the bank one
// settlement batch as the last step of an operation, after all internal
// state has been committed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tidepool_types::{AccountId, AssetId, BankError};
use tracing::trace;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transfer {
    /// transferFrom(holder -> custodian), spending the holder's allowance
    Pull {
        asset: AssetId,
        from: AccountId,
        amount: u128,
    },
    /// transfer(custodian -> recipient)
    Push {
        asset: AssetId,
        to: AccountId,
        amount: u128,
    },
}

pub trait AssetBank {
    /// Applies every transfer or none of them.
    fn settle(&mut self, custodian: &AccountId, transfers: &[Transfer]) -> Result<(), BankError>;
}

// ============ In-Memory Bank ============

/// Standard mint/approve/transfer token semantics kept in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryBank {
    balances: BTreeMap<(AssetId, AccountId), u128>,
    /// (asset, owner, spender) -> allowance
    allowances: BTreeMap<(AssetId, AccountId, AccountId), u128>,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, asset: &AssetId, owner: &AccountId) -> u128 {
        self.balances.get(&(*asset, *owner)).copied().unwrap_or(0)
    }

    pub fn allowance(&self, asset: &AssetId, owner: &AccountId, spender: &AccountId) -> u128 {
        self.allowances
            .get(&(*asset, *owner, *spender))
            .copied()
            .unwrap_or(0)
    }

    pub fn mint(&mut self, asset: &AssetId, to: &AccountId, amount: u128) -> Result<(), BankError> {
        let balance = self
            .balance_of(asset, to)
            .checked_add(amount)
            .ok_or_else(|| BankError::Rejected("balance overflow".to_string()))?;
        self.balances.insert((*asset, *to), balance);
        Ok(())
    }

    pub fn approve(&mut self, asset: &AssetId, owner: &AccountId, spender: &AccountId, amount: u128) {
        self.allowances.insert((*asset, *owner, *spender), amount);
    }
}

impl AssetBank for MemoryBank {
    fn settle(&mut self, custodian: &AccountId, transfers: &[Transfer]) -> Result<(), BankError> {
        // Stage every touched entry, commit only if the whole batch clears
        let mut balances: BTreeMap<(AssetId, AccountId), u128> = BTreeMap::new();
        let mut allowances: BTreeMap<(AssetId, AccountId, AccountId), u128> = BTreeMap::new();

        for transfer in transfers {
            let (asset, from, to, amount) = match *transfer {
                Transfer::Pull { asset, from, amount } => {
                    let key = (asset, from, *custodian);
                    let available = *allowances
                        .entry(key)
                        .or_insert_with(|| self.allowance(&asset, &from, custodian));
                    if available < amount {
                        return Err(BankError::InsufficientAllowance {
                            asset,
                            available,
                            required: amount,
                        });
                    }
                    allowances.insert(key, available - amount);
                    (asset, from, *custodian, amount)
                }
                Transfer::Push { asset, to, amount } => (asset, *custodian, to, amount),
            };
            if amount == 0 {
                continue;
            }

            let source = *balances
                .entry((asset, from))
                .or_insert_with(|| self.balance_of(&asset, &from));
            if source < amount {
                return Err(BankError::InsufficientFunds {
                    asset,
                    available: source,
                    required: amount,
                });
            }
            balances.insert((asset, from), source - amount);

            let target = *balances
                .entry((asset, to))
                .or_insert_with(|| self.balance_of(&asset, &to));
            let target = target
                .checked_add(amount)
                .ok_or_else(|| BankError::Rejected("balance overflow".to_string()))?;
            balances.insert((asset, to), target);
            trace!(%asset, %from, %to, amount, "staged transfer");
        }

        self.balances.extend(balances);
        self.allowances.extend(allowances);
        Ok(())
    }
}
