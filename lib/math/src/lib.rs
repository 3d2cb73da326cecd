// ============ Tidepool Math Library ============
// Integer-only arithmetic for pool pricing and reward accrual.
// All amounts are u128; ratios and accumulators use 18 decimal precision (1e18)

#![cfg_attr(feature = "no_std", no_std)]

use uint::construct_uint;

// ============ Constants ============

pub const PRECISION: u128 = 1_000_000_000_000_000_000; // 1e18
pub const BPS_DENOMINATOR: u128 = 10_000;

// ============ Error Types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    ZeroInput,
    InsufficientLiquidity,
    InvalidAmounts,
    InvalidFee,
    DivisionByZero,
    Overflow,
}

// ============ Constant Product Module ============

pub mod cpmm {
    use super::*;

    /// Output amount for `amount_in` against (reserve_in, reserve_out).
    ///
    /// out = reserve_out * in_after_fee / (reserve_in + in_after_fee), floored,
    /// so rounding always stays with the pool.
    pub fn get_amount_out(
        amount_in: u128,
        reserve_in: u128,
        reserve_out: u128,
        fee_rate_bps: u128,
    ) -> Result<u128, MathError> {
        if amount_in == 0 {
            return Err(MathError::ZeroInput);
        }
        if reserve_in == 0 || reserve_out == 0 {
            return Err(MathError::InsufficientLiquidity);
        }
        if fee_rate_bps >= BPS_DENOMINATOR {
            return Err(MathError::InvalidFee);
        }

        let amount_in_with_fee = amount_in
            .checked_mul(BPS_DENOMINATOR - fee_rate_bps)
            .ok_or(MathError::Overflow)?;
        let denominator = reserve_in
            .checked_mul(BPS_DENOMINATOR)
            .ok_or(MathError::Overflow)?
            .checked_add(amount_in_with_fee)
            .ok_or(MathError::Overflow)?;

        super::checked_mul_div(amount_in_with_fee, reserve_out, denominator)
    }

    /// Clamp desired deposit amounts to the current reserve ratio.
    /// The limiting side is consumed in full, the other proportionally.
    pub fn calculate_optimal_liquidity(
        amount0_desired: u128,
        amount1_desired: u128,
        reserve0: u128,
        reserve1: u128,
    ) -> Result<(u128, u128), MathError> {
        if reserve0 == 0 && reserve1 == 0 {
            return Ok((amount0_desired, amount1_desired));
        }
        if reserve0 == 0 || reserve1 == 0 {
            return Err(MathError::InsufficientLiquidity);
        }

        let amount1_optimal = super::checked_mul_div(amount0_desired, reserve1, reserve0)?;

        if amount1_optimal <= amount1_desired {
            Ok((amount0_desired, amount1_optimal))
        } else {
            let amount0_optimal = super::checked_mul_div(amount1_desired, reserve0, reserve1)?;
            if amount0_optimal > amount0_desired {
                return Err(MathError::InvalidAmounts);
            }
            Ok((amount0_optimal, amount1_desired))
        }
    }

    /// Shares minted for a deposit into a pool that already has supply.
    /// Proportional to the smaller of the two deposit-to-reserve ratios.
    pub fn proportional_shares(
        amount0: u128,
        amount1: u128,
        reserve0: u128,
        reserve1: u128,
        total_supply: u128,
    ) -> Result<u128, MathError> {
        if reserve0 == 0 || reserve1 == 0 {
            return Err(MathError::InsufficientLiquidity);
        }
        let liquidity0 = super::checked_mul_div(amount0, total_supply, reserve0)?;
        let liquidity1 = super::checked_mul_div(amount1, total_supply, reserve1)?;
        Ok(liquidity0.min(liquidity1))
    }

    /// Reserve amounts released by burning `shares` of `total_supply`.
    pub fn burn_amounts(
        shares: u128,
        reserve0: u128,
        reserve1: u128,
        total_supply: u128,
    ) -> Result<(u128, u128), MathError> {
        if shares == 0 {
            return Err(MathError::ZeroInput);
        }
        if total_supply == 0 || shares > total_supply {
            return Err(MathError::InsufficientLiquidity);
        }
        Ok((
            super::checked_mul_div(shares, reserve0, total_supply)?,
            super::checked_mul_div(shares, reserve1, total_supply)?,
        ))
    }

    /// Fee charged on `amount` at `fee_rate_bps`, rounded up so any nonzero
    /// rate takes at least one unit.
    pub fn fee_amount(amount: u128, fee_rate_bps: u128) -> Result<u128, MathError> {
        if fee_rate_bps >= BPS_DENOMINATOR {
            return Err(MathError::InvalidFee);
        }
        super::checked_mul_div_up(amount, fee_rate_bps, BPS_DENOMINATOR)
    }
}

// ============ Integer Square Root (Newton's Method) ============

pub fn sqrt(x: u128) -> u128 {
    if x == 0 {
        return 0;
    }
    let mut z = x / 2 + 1;
    let mut y = x;
    while z < y {
        y = z;
        z = (x / z + z) / 2;
    }
    y
}

// ============ 256-bit Arithmetic Helpers ============

/// Multiply two u128 values, returning (hi, lo) as a 256-bit result.
pub fn wide_mul(a: u128, b: u128) -> (u128, u128) {
    let mask: u128 = u64::MAX as u128;
    let a_lo = a & mask;
    let a_hi = a >> 64;
    let b_lo = b & mask;
    let b_hi = b >> 64;

    let p0 = a_lo * b_lo;
    let p1 = a_lo * b_hi;
    let p2 = a_hi * b_lo;
    let p3 = a_hi * b_hi;

    let mid = (p0 >> 64) + (p1 & mask) + (p2 & mask);
    let lo = (p0 & mask) | ((mid & mask) << 64);
    let hi = p3 + (p1 >> 64) + (p2 >> 64) + (mid >> 64);

    (hi, lo)
}

/// Compare a*b vs c*d without overflow.
pub fn mul_cmp(a: u128, b: u128, c: u128, d: u128) -> core::cmp::Ordering {
    let (hi_ab, lo_ab) = wide_mul(a, b);
    let (hi_cd, lo_cd) = wide_mul(c, d);
    match hi_ab.cmp(&hi_cd) {
        core::cmp::Ordering::Equal => lo_ab.cmp(&lo_cd),
        ord => ord,
    }
}

/// Floor of sqrt(a * b), exact for any pair of u128 inputs.
pub fn sqrt_product(a: u128, b: u128) -> u128 {
    match a.checked_mul(b) {
        Some(product) => sqrt(product),
        None => {
            // Bisect on r such that r*r <= a*b. The root fits in u128.
            let mut low: u128 = 0;
            let mut high: u128 = u128::MAX;
            while low < high {
                let diff = high - low;
                let mid = low + diff / 2 + diff % 2;
                if mul_cmp(mid, mid, a, b) == core::cmp::Ordering::Greater {
                    high = mid - 1;
                } else {
                    low = mid;
                }
            }
            low
        }
    }
}

/// Divide a 256-bit number (hi, lo) by d. Requires hi < d so the quotient fits.
fn wide_div(hi: u128, lo: u128, d: u128) -> u128 {
    if hi == 0 {
        return lo / d;
    }

    let mut low: u128 = 0;
    let mut high: u128 = u128::MAX;

    while low < high {
        let diff = high - low;
        let mid = low + diff / 2 + diff % 2;
        let (mh, ml) = wide_mul(mid, d);
        if mh > hi || (mh == hi && ml > lo) {
            high = mid - 1;
        } else {
            low = mid;
        }
    }
    low
}

/// (a * b) / c with a 256-bit intermediate, floored.
pub fn checked_mul_div(a: u128, b: u128, c: u128) -> Result<u128, MathError> {
    if c == 0 {
        return Err(MathError::DivisionByZero);
    }
    match a.checked_mul(b) {
        Some(product) => Ok(product / c),
        None => {
            let (hi, lo) = wide_mul(a, b);
            if hi >= c {
                return Err(MathError::Overflow);
            }
            Ok(wide_div(hi, lo, c))
        }
    }
}

/// (a * b) / c rounded up.
pub fn checked_mul_div_up(a: u128, b: u128, c: u128) -> Result<u128, MathError> {
    let floor = checked_mul_div(a, b, c)?;
    let (hi, lo) = wide_mul(floor, c);
    if (hi, lo) == wide_mul(a, b) {
        Ok(floor)
    } else {
        floor.checked_add(1).ok_or(MathError::Overflow)
    }
}

// ============ 256-bit Integer ============

construct_uint! {
    /// Unsigned 256-bit integer for values that outgrow u128, such as the
    /// reward-per-share accumulator.
    pub struct U256(4);
}

impl U256 {
    /// Narrows to u128, or `Overflow` if the value does not fit.
    pub fn to_u128(self) -> Result<u128, MathError> {
        if self > U256::from(u128::MAX) {
            return Err(MathError::Overflow);
        }
        Ok(self.low_u128())
    }
}

// ============ Tests ============
