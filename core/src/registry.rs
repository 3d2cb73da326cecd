// ============ Pool Registry ============
// Owns every pool and its reserves. Amounts come from the pool's curve;
// share issuance goes through the ownership ledger.
//
// Each operation validates and computes everything first, then applies the
// ledger change (which is itself all-or-nothing) and finally the reserve
// update, which cannot fail.

use crate::curve::{Curve, Reserves, SwapCurve};
use crate::ledger::OwnershipLedger;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tidepool_math::mul_cmp;
use tidepool_types::{AccountId, AssetId, ExchangeConfig, ExchangeError, PoolId, Result};
use tracing::debug;

/// Which pool asset an operation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub asset_a: AssetId,
    pub asset_b: AssetId,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub curve: Curve,
    pub fee_bps: u16,
}

impl Pool {
    pub fn side_of(&self, asset: &AssetId) -> Option<Side> {
        if *asset == self.asset_a {
            Some(Side::A)
        } else if *asset == self.asset_b {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn reserves(&self) -> Reserves {
        Reserves {
            a: self.reserve_a,
            b: self.reserve_b,
        }
    }

    /// (reserve_in, reserve_out) for a swap entering on `side`.
    fn directed(&self, side: Side) -> (u128, u128) {
        match side {
            Side::A => (self.reserve_a, self.reserve_b),
            Side::B => (self.reserve_b, self.reserve_a),
        }
    }
}

// ============ Receipts ============

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCreated {
    pub pool_id: PoolId,
    /// Shares credited to the owner (minimum liquidity excluded)
    pub shares: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub asset_in: AssetId,
    pub amount_in: u128,
    pub asset_out: AssetId,
    pub amount_out: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityReceipt {
    pub shares: u128,
    pub amount_a: u128,
    pub amount_b: u128,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub amount_a: u128,
    pub amount_b: u128,
}

// ============ Registry ============

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolRegistry {
    pools: BTreeMap<PoolId, Pool>,
    next_id: u64,
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn pool(&self, id: PoolId) -> Result<&Pool> {
        self.pools.get(&id).ok_or(ExchangeError::PoolNotFound(id))
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Id the next `create_pair` will assign.
    pub fn next_pool_id(&self) -> PoolId {
        PoolId(self.next_id)
    }

    // ============ Pool Creation ============

    #[allow(clippy::too_many_arguments)]
    pub fn create_pair(
        &mut self,
        ledger: &mut OwnershipLedger,
        config: &ExchangeConfig,
        owner: &AccountId,
        asset_a: AssetId,
        asset_b: AssetId,
        amount_a: u128,
        amount_b: u128,
        curve: Curve,
        fee_bps: u16,
    ) -> Result<PairCreated> {
        if asset_a == asset_b {
            return Err(ExchangeError::InvalidAsset);
        }
        if amount_a == 0 || amount_b == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        if fee_bps > config.max_fee_bps {
            return Err(ExchangeError::InvalidFee {
                fee_bps,
                max_bps: config.max_fee_bps,
            });
        }

        let bootstrap = curve.initial_shares(amount_a, amount_b)?;
        if bootstrap <= config.minimum_liquidity {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        let shares = bootstrap - config.minimum_liquidity;
        let next_id = self.next_id.checked_add(1).ok_or(ExchangeError::Overflow)?;
        let id = PoolId(self.next_id);

        if config.minimum_liquidity > 0 {
            ledger.mint(&AccountId::BURN, id, config.minimum_liquidity)?;
        }
        ledger.mint(owner, id, shares)?;

        self.pools.insert(
            id,
            Pool {
                id,
                asset_a,
                asset_b,
                reserve_a: amount_a,
                reserve_b: amount_b,
                curve,
                fee_bps,
            },
        );
        self.next_id = next_id;

        debug!(%id, %owner, amount_a, amount_b, shares, ?curve, fee_bps, "pair created");
        Ok(PairCreated { pool_id: id, shares })
    }

    // ============ Swap ============

    /// Read-only preview of [`PoolRegistry::swap`].
    pub fn quote_swap(&self, id: PoolId, asset_in: &AssetId, amount_in: u128) -> Result<SwapReceipt> {
        let pool = self.pool(id)?;
        let side = pool.side_of(asset_in).ok_or(ExchangeError::InvalidAsset)?;
        let (reserve_in, reserve_out) = pool.directed(side);

        let amount_out =
            pool.curve
                .compute_swap_out(reserve_in, reserve_out, amount_in, pool.fee_bps)?;
        if amount_out >= reserve_out {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        reserve_in
            .checked_add(amount_in)
            .ok_or(ExchangeError::Overflow)?;

        let asset_out = match side {
            Side::A => pool.asset_b,
            Side::B => pool.asset_a,
        };
        Ok(SwapReceipt {
            asset_in: *asset_in,
            amount_in,
            asset_out,
            amount_out,
        })
    }

    pub fn swap(&mut self, id: PoolId, asset_in: &AssetId, amount_in: u128) -> Result<SwapReceipt> {
        let receipt = self.quote_swap(id, asset_in, amount_in)?;
        let pool = self
            .pools
            .get_mut(&id)
            .ok_or(ExchangeError::PoolNotFound(id))?;

        let (old_a, old_b) = (pool.reserve_a, pool.reserve_b);
        match pool.side_of(asset_in) {
            Some(Side::A) => {
                pool.reserve_a += amount_in;
                pool.reserve_b -= receipt.amount_out;
            }
            Some(Side::B) => {
                pool.reserve_b += amount_in;
                pool.reserve_a -= receipt.amount_out;
            }
            None => return Err(ExchangeError::InvalidAsset),
        }
        debug_assert!(
            pool.curve != Curve::ConstantProduct
                || mul_cmp(pool.reserve_a, pool.reserve_b, old_a, old_b)
                    != core::cmp::Ordering::Less
        );

        debug!(%id, amount_in, amount_out = receipt.amount_out, "swap applied");
        Ok(receipt)
    }

    // ============ Liquidity ============

    pub fn add_liquidity(
        &mut self,
        ledger: &mut OwnershipLedger,
        recipient: &AccountId,
        id: PoolId,
        amount_a: u128,
        amount_b: u128,
    ) -> Result<LiquidityReceipt> {
        let pool = self.pool(id)?;
        let quote = pool.curve.compute_mint_shares(
            pool.reserves(),
            ledger.total_supply(id),
            amount_a,
            amount_b,
        )?;
        let new_a = pool
            .reserve_a
            .checked_add(quote.amount_a)
            .ok_or(ExchangeError::Overflow)?;
        let new_b = pool
            .reserve_b
            .checked_add(quote.amount_b)
            .ok_or(ExchangeError::Overflow)?;

        ledger.mint(recipient, id, quote.shares)?;

        let pool = self
            .pools
            .get_mut(&id)
            .ok_or(ExchangeError::PoolNotFound(id))?;
        pool.reserve_a = new_a;
        pool.reserve_b = new_b;

        debug!(%id, %recipient, shares = quote.shares, amount_a = quote.amount_a, amount_b = quote.amount_b, "liquidity added");
        Ok(LiquidityReceipt {
            shares: quote.shares,
            amount_a: quote.amount_a,
            amount_b: quote.amount_b,
        })
    }

    /// Burns `shares` from the caller's unlocked balance.
    pub fn remove_liquidity(
        &mut self,
        ledger: &mut OwnershipLedger,
        caller: &AccountId,
        id: PoolId,
        shares: u128,
    ) -> Result<Withdrawal> {
        let pool = self.pool(id)?;
        if shares == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        let unlocked = ledger.unlocked_balance_of(caller, id);
        if unlocked < shares {
            return Err(ExchangeError::InsufficientBalance {
                available: unlocked,
                required: shares,
            });
        }
        let (amount_a, amount_b) =
            pool.curve
                .compute_burn_amounts(pool.reserves(), ledger.total_supply(id), shares)?;

        ledger.burn(caller, id, shares)?;

        let pool = self
            .pools
            .get_mut(&id)
            .ok_or(ExchangeError::PoolNotFound(id))?;
        pool.reserve_a -= amount_a;
        pool.reserve_b -= amount_b;

        debug!(%id, %caller, shares, amount_a, amount_b, "liquidity removed");
        Ok(Withdrawal { amount_a, amount_b })
    }

    // ============ Internal ============

    pub(crate) fn raw_pool(&self, id: PoolId) -> Option<Pool> {
        self.pools.get(&id).cloned()
    }

    pub(crate) fn restore_pool(&mut self, id: PoolId, saved: Option<Pool>) {
        match saved {
            Some(pool) => self.pools.insert(id, pool),
            None => self.pools.remove(&id),
        };
    }

    pub(crate) fn restore_next_id(&mut self, next: PoolId) {
        self.next_id = next.0;
    }

    pub(crate) fn digest_into(&self, hasher: &mut Sha256) {
        hasher.update(b"registry");
        hasher.update(self.next_id.to_le_bytes());
        for pool in self.pools.values() {
            hasher.update(pool.id.0.to_le_bytes());
            hasher.update(pool.asset_a.0);
            hasher.update(pool.asset_b.0);
            hasher.update(pool.reserve_a.to_le_bytes());
            hasher.update(pool.reserve_b.to_le_bytes());
            hasher.update([pool.curve.tag()]);
            hasher.update(pool.fee_bps.to_le_bytes());
        }
    }
}
