// ============ Reward Vaults ============
// Per-pool staking vaults. Depositors lock ledger shares and earn a linear
// emission of the vault's seeded reward through a reward-per-share
// accumulator with per-depositor debt snapshots.
//
// Accrual is lazy: the accumulator only moves when an operation touches the
// vault, using the timestamp the caller supplies. The accumulator is 256-bit:
// a single locked unit against a large reward scales past u128.

use crate::ledger::OwnershipLedger;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tidepool_math::{checked_mul_div, PRECISION, U256};
use tidepool_types::{
    AccountId, AssetId, ExchangeError, IdleRewardPolicy, PoolId, Result, VaultConfig, VaultId,
};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub pool: PoolId,
    pub id: VaultId,
    pub reward_asset: AssetId,
    pub total_reward: u128,
    /// Reward already folded into the accumulator
    pub emitted: u128,
    /// Reward dropped under [`IdleRewardPolicy::Forfeit`]
    pub forfeited: u128,
    pub paid_out: u128,
    pub total_locked: u128,
    /// Reward per locked share, scaled by 1e18
    #[serde(with = "u256_decimal")]
    pub acc_reward_per_share: U256,
    pub last_update: u64,
}

impl Vault {
    /// Reward not yet emitted or forfeited.
    pub fn remaining(&self) -> u128 {
        self.total_reward - self.emitted - self.forfeited
    }

    /// Copy of the vault advanced to `now`.
    fn accrued(&self, now: u64, config: &VaultConfig) -> Result<Vault> {
        let mut next = self.clone();
        if now <= self.last_update {
            return Ok(next);
        }

        let remaining = self.remaining();
        let period = config.emission_period_secs;
        let emission = if period == 0 {
            remaining
        } else {
            // Past one full period everything left is due anyway
            let elapsed = (now - self.last_update).min(period);
            checked_mul_div(self.total_reward, elapsed as u128, period as u128)?.min(remaining)
        };

        if self.total_locked == 0 {
            match config.idle_policy {
                // Clock stays put so the idle interval is emitted later
                IdleRewardPolicy::CarryForward => return Ok(next),
                IdleRewardPolicy::Forfeit => {
                    next.forfeited += emission;
                    next.last_update = now;
                    return Ok(next);
                }
            }
        }

        let increment =
            U256::from(emission) * U256::from(PRECISION) / U256::from(self.total_locked);
        next.acc_reward_per_share = self
            .acc_reward_per_share
            .checked_add(increment)
            .ok_or(ExchangeError::Overflow)?;
        next.emitted += emission;
        next.last_update = now;
        Ok(next)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stake {
    pub locked: u128,
    /// Accumulator value at the last settlement
    #[serde(with = "u256_decimal")]
    pub reward_debt: U256,
    /// Reward settled but not yet paid
    pub unclaimed: u128,
}

impl Stake {
    fn owed(&self, acc_reward_per_share: U256) -> Result<u128> {
        let fresh = U256::from(self.locked)
            .checked_mul(acc_reward_per_share - self.reward_debt)
            .ok_or(ExchangeError::Overflow)?
            / U256::from(PRECISION);
        self.unclaimed
            .checked_add(fresh.to_u128()?)
            .ok_or(ExchangeError::Overflow)
    }
}

mod u256_decimal {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use tidepool_math::U256;

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        U256::from_dec_str(&raw).map_err(|e| D::Error::custom(format!("{e:?}")))
    }
}

/// Reward owed to a depositor, paid by the exchange after state is committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPayout {
    pub asset: AssetId,
    pub amount: u128,
}

type VaultKey = (PoolId, VaultId);
type StakeKey = (PoolId, VaultId, AccountId);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RewardVaults {
    config: VaultConfig,
    vaults: BTreeMap<VaultKey, Vault>,
    stakes: BTreeMap<StakeKey, Stake>,
}

impl RewardVaults {
    pub fn new(config: VaultConfig) -> Self {
        Self {
            config,
            vaults: BTreeMap::new(),
            stakes: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn vault(&self, pool: PoolId, id: VaultId) -> Result<&Vault> {
        self.vaults
            .get(&(pool, id))
            .ok_or(ExchangeError::VaultNotFound { pool, vault: id })
    }

    pub fn stake(&self, pool: PoolId, id: VaultId, depositor: &AccountId) -> Stake {
        self.stakes
            .get(&(pool, id, *depositor))
            .copied()
            .unwrap_or_default()
    }

    pub fn vaults_for(&self, pool: PoolId) -> impl Iterator<Item = &Vault> {
        self.vaults
            .range((pool, VaultId(0))..=(pool, VaultId(u64::MAX)))
            .map(|(_, vault)| vault)
    }

    /// Reward a depositor would receive from a claim at `now`.
    pub fn pending_reward(
        &self,
        pool: PoolId,
        id: VaultId,
        depositor: &AccountId,
        now: u64,
    ) -> Result<u128> {
        let vault = self.vault(pool, id)?.accrued(now, &self.config)?;
        self.stake(pool, id, depositor)
            .owed(vault.acc_reward_per_share)
    }

    // ============ Lifecycle ============

    /// Uninitialized -> Active. The caller funds `reward_amount` of `reward_asset`.
    pub fn create(
        &mut self,
        pool: PoolId,
        id: VaultId,
        reward_asset: AssetId,
        reward_amount: u128,
        now: u64,
    ) -> Result<&Vault> {
        if self.vaults.contains_key(&(pool, id)) {
            return Err(ExchangeError::VaultExists { pool, vault: id });
        }
        if reward_amount == 0 {
            return Err(ExchangeError::ZeroAmount);
        }

        debug!(%pool, vault = %id, reward_amount, now, "vault created");
        Ok(self.vaults.entry((pool, id)).or_insert(Vault {
            pool,
            id,
            reward_asset,
            total_reward: reward_amount,
            emitted: 0,
            forfeited: 0,
            paid_out: 0,
            total_locked: 0,
            acc_reward_per_share: U256::zero(),
            last_update: now,
        }))
    }

    pub fn deposit(
        &mut self,
        ledger: &mut OwnershipLedger,
        depositor: &AccountId,
        pool: PoolId,
        id: VaultId,
        shares: u128,
        now: u64,
    ) -> Result<()> {
        let vault = self.vault(pool, id)?;
        if shares == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        let position = ledger.position(depositor, pool);
        if position.unlocked() < shares {
            return Err(ExchangeError::InsufficientBalance {
                available: position.unlocked(),
                required: shares,
            });
        }

        let mut vault = vault.accrued(now, &self.config)?;
        let mut stake = self.stake(pool, id, depositor);
        stake.unclaimed = stake.owed(vault.acc_reward_per_share)?;
        stake.locked += shares;
        stake.reward_debt = vault.acc_reward_per_share;
        vault.total_locked = vault
            .total_locked
            .checked_add(shares)
            .ok_or(ExchangeError::Overflow)?;

        ledger.set_locked(depositor, pool, position.locked + shares)?;

        debug!(%pool, vault = %id, %depositor, shares, total_locked = vault.total_locked, "shares locked");
        self.vaults.insert((pool, id), vault);
        self.stakes.insert((pool, id, *depositor), stake);
        Ok(())
    }

    /// Unlocks `shares` and settles every reward owed to the depositor.
    pub fn withdraw(
        &mut self,
        ledger: &mut OwnershipLedger,
        depositor: &AccountId,
        pool: PoolId,
        id: VaultId,
        shares: u128,
        now: u64,
    ) -> Result<RewardPayout> {
        self.vault(pool, id)?;
        if shares == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        self.settle(ledger, depositor, pool, id, shares, now)
    }

    /// Pays accrued reward without unlocking anything.
    pub fn claim(
        &mut self,
        ledger: &mut OwnershipLedger,
        depositor: &AccountId,
        pool: PoolId,
        id: VaultId,
        now: u64,
    ) -> Result<RewardPayout> {
        self.settle(ledger, depositor, pool, id, 0, now)
    }

    fn settle(
        &mut self,
        ledger: &mut OwnershipLedger,
        depositor: &AccountId,
        pool: PoolId,
        id: VaultId,
        shares: u128,
        now: u64,
    ) -> Result<RewardPayout> {
        let vault = self.vault(pool, id)?;
        let mut stake = self.stake(pool, id, depositor);
        if stake.locked < shares {
            return Err(ExchangeError::InsufficientLocked {
                locked: stake.locked,
                requested: shares,
            });
        }

        let mut vault = vault.accrued(now, &self.config)?;
        let owed = stake.owed(vault.acc_reward_per_share)?;
        stake.locked -= shares;
        stake.reward_debt = vault.acc_reward_per_share;
        stake.unclaimed = 0;
        vault.total_locked -= shares;
        vault.paid_out = vault
            .paid_out
            .checked_add(owed)
            .ok_or(ExchangeError::Overflow)?;

        if shares > 0 {
            let locked = ledger.locked_balance_of(depositor, pool);
            ledger.set_locked(depositor, pool, locked - shares)?;
        }

        debug!(%pool, vault = %id, %depositor, shares, reward = owed, "stake settled");
        let payout = RewardPayout {
            asset: vault.reward_asset,
            amount: owed,
        };
        self.vaults.insert((pool, id), vault);
        if stake.locked == 0 {
            self.stakes.remove(&(pool, id, *depositor));
        } else {
            self.stakes.insert((pool, id, *depositor), stake);
        }
        Ok(payout)
    }

    // ============ Internal ============

    pub(crate) fn raw_vault(&self, pool: PoolId, id: VaultId) -> Option<Vault> {
        self.vaults.get(&(pool, id)).cloned()
    }

    pub(crate) fn raw_stake(&self, pool: PoolId, id: VaultId, depositor: &AccountId) -> Option<Stake> {
        self.stakes.get(&(pool, id, *depositor)).copied()
    }

    pub(crate) fn restore_vault(&mut self, pool: PoolId, id: VaultId, saved: Option<Vault>) {
        match saved {
            Some(vault) => self.vaults.insert((pool, id), vault),
            None => self.vaults.remove(&(pool, id)),
        };
    }

    pub(crate) fn restore_stake(&mut self, pool: PoolId, id: VaultId, depositor: &AccountId, saved: Option<Stake>) {
        match saved {
            Some(stake) => self.stakes.insert((pool, id, *depositor), stake),
            None => self.stakes.remove(&(pool, id, *depositor)),
        };
    }

    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update(b"vaults");
        for vault in self.vaults.values() {
            hasher.update(vault.pool.0.to_le_bytes());
            hasher.update(vault.id.0.to_le_bytes());
            hasher.update(vault.reward_asset.0);
            for value in [
                vault.total_reward,
                vault.emitted,
                vault.forfeited,
                vault.paid_out,
                vault.total_locked,
            ] {
                hasher.update(value.to_le_bytes());
            }
            for word in vault.acc_reward_per_share.0 {
                hasher.update(word.to_le_bytes());
            }
            hasher.update(vault.last_update.to_le_bytes());
        }
        for ((pool, id, depositor), stake) in &self.stakes {
            hasher.update(pool.0.to_le_bytes());
            hasher.update(id.0.to_le_bytes());
            hasher.update(depositor.0);
            hasher.update(stake.locked.to_le_bytes());
            for word in stake.reward_debt.0 {
                hasher.update(word.to_le_bytes());
            }
            hasher.update(stake.unclaimed.to_le_bytes());
        }
    }
}
