// ============ Swap Curves ============
// Stateless pricing strategies. A curve only computes amounts; the registry
// owns reserves and applies whatever the curve returns.

use serde::{Deserialize, Serialize};
use tidepool_math::{cpmm, sqrt_product};
use tidepool_types::{ExchangeError, Result};

/// Reserve snapshot handed to a curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reserves {
    pub a: u128,
    pub b: u128,
}

/// Shares a deposit mints and the amounts it actually consumes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub shares: u128,
    pub amount_a: u128,
    pub amount_b: u128,
}

/// Pricing and share math for one family of pools.
pub trait SwapCurve {
    /// Output for `amount_in` moving from `reserve_in` to `reserve_out`.
    fn compute_swap_out(
        &self,
        reserve_in: u128,
        reserve_out: u128,
        amount_in: u128,
        fee_bps: u16,
    ) -> Result<u128>;

    /// Shares issued for the first deposit into an empty pool.
    fn initial_shares(&self, amount_a: u128, amount_b: u128) -> Result<u128>;

    fn compute_mint_shares(
        &self,
        reserves: Reserves,
        total_shares: u128,
        amount_a: u128,
        amount_b: u128,
    ) -> Result<MintQuote> {
        if amount_a == 0 || amount_b == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        if total_shares == 0 {
            return Ok(MintQuote {
                shares: self.initial_shares(amount_a, amount_b)?,
                amount_a,
                amount_b,
            });
        }

        let (used_a, used_b) =
            cpmm::calculate_optimal_liquidity(amount_a, amount_b, reserves.a, reserves.b)?;
        let shares =
            cpmm::proportional_shares(used_a, used_b, reserves.a, reserves.b, total_shares)?;
        if shares == 0 || used_a == 0 || used_b == 0 {
            return Err(ExchangeError::InsufficientLiquidity);
        }

        Ok(MintQuote {
            shares,
            amount_a: used_a,
            amount_b: used_b,
        })
    }

    fn compute_burn_amounts(
        &self,
        reserves: Reserves,
        total_shares: u128,
        shares: u128,
    ) -> Result<(u128, u128)> {
        let (amount_a, amount_b) =
            cpmm::burn_amounts(shares, reserves.a, reserves.b, total_shares)?;

        if amount_a == 0 || amount_b == 0 {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        // Shares would remain outstanding against an empty reserve
        if shares < total_shares && (amount_a == reserves.a || amount_b == reserves.b) {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        Ok((amount_a, amount_b))
    }
}

// ============ Constant Product ============

/// x * y = k. Bootstrap shares are the geometric mean of the deposit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstantProduct;

impl SwapCurve for ConstantProduct {
    fn compute_swap_out(
        &self,
        reserve_in: u128,
        reserve_out: u128,
        amount_in: u128,
        fee_bps: u16,
    ) -> Result<u128> {
        let out = cpmm::get_amount_out(amount_in, reserve_in, reserve_out, fee_bps as u128)?;
        check_output(out, reserve_out)
    }

    fn initial_shares(&self, amount_a: u128, amount_b: u128) -> Result<u128> {
        Ok(sqrt_product(amount_a, amount_b))
    }
}

// ============ Constant Sum ============

/// x + y = k. Assets trade 1:1 less the fee until one side runs dry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConstantSum;

impl SwapCurve for ConstantSum {
    fn compute_swap_out(
        &self,
        reserve_in: u128,
        reserve_out: u128,
        amount_in: u128,
        fee_bps: u16,
    ) -> Result<u128> {
        if amount_in == 0 {
            return Err(ExchangeError::ZeroAmount);
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(ExchangeError::InsufficientLiquidity);
        }
        let fee = cpmm::fee_amount(amount_in, fee_bps as u128)?;
        check_output(amount_in - fee, reserve_out)
    }

    fn initial_shares(&self, amount_a: u128, amount_b: u128) -> Result<u128> {
        amount_a.checked_add(amount_b).ok_or(ExchangeError::Overflow)
    }
}

fn check_output(out: u128, reserve_out: u128) -> Result<u128> {
    if out == 0 {
        return Err(ExchangeError::InsufficientOutputAmount);
    }
    if out >= reserve_out {
        return Err(ExchangeError::InsufficientLiquidity);
    }
    Ok(out)
}

// ============ Curve Selector ============

/// Closed set of curves a pool can be created with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    ConstantProduct,
    ConstantSum,
}

impl Curve {
    pub fn tag(&self) -> u8 {
        match self {
            Curve::ConstantProduct => 0,
            Curve::ConstantSum => 1,
        }
    }

    fn strategy(&self) -> &'static dyn SwapCurve {
        match self {
            Curve::ConstantProduct => &ConstantProduct,
            Curve::ConstantSum => &ConstantSum,
        }
    }
}

impl SwapCurve for Curve {
    fn compute_swap_out(
        &self,
        reserve_in: u128,
        reserve_out: u128,
        amount_in: u128,
        fee_bps: u16,
    ) -> Result<u128> {
        self.strategy()
            .compute_swap_out(reserve_in, reserve_out, amount_in, fee_bps)
    }

    fn initial_shares(&self, amount_a: u128, amount_b: u128) -> Result<u128> {
        self.strategy().initial_shares(amount_a, amount_b)
    }

    fn compute_mint_shares(
        &self,
        reserves: Reserves,
        total_shares: u128,
        amount_a: u128,
        amount_b: u128,
    ) -> Result<MintQuote> {
        self.strategy()
            .compute_mint_shares(reserves, total_shares, amount_a, amount_b)
    }

    fn compute_burn_amounts(
        &self,
        reserves: Reserves,
        total_shares: u128,
        shares: u128,
    ) -> Result<(u128, u128)> {
        self.strategy()
            .compute_burn_amounts(reserves, total_shares, shares)
    }
}
