//! Fixed-point protocol math on U256.
//!
//! Debt, collateral USD values and health factors are integers scaled by
//! `PRECISION` (1e18). Token USD prices are scaled by `PRICE_PRECISION` (1e8).
//! Nothing here allocates besides decimal parsing, and nothing panics on
//! user-controlled input: multiplications saturate and divisions check for zero.

use alloy::primitives::{I256, U256};
use thiserror::Error;

/// 1e18 fixed-point scale
pub const PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// 1e8 scale of token USD prices
pub const PRICE_PRECISION: U256 = U256::from_limbs([100_000_000u64, 0, 0, 0]);

/// Number of fraction digits in a scaled price
pub const PRICE_DECIMALS: u8 = 8;

/// 1e10, lifts a 1e8-scaled USD value to 1e18
pub const ADDITIONAL_PRICE_PRECISION: U256 = U256::from_limbs([10_000_000_000u64, 0, 0, 0]);

/// Share of collateral value counted toward debt capacity, over `LIQUIDATION_PRECISION`
pub const LIQUIDATION_THRESHOLD: U256 = U256::from_limbs([50u64, 0, 0, 0]);
pub const LIQUIDATION_PRECISION: U256 = U256::from_limbs([100u64, 0, 0, 0]);

/// Health factor below which a position is liquidatable (1.0)
pub const MIN_HEALTH_FACTOR: U256 = PRECISION;

/// Upper health factor bound declared by the protocol (9.0). Not applied to the
/// zero-debt case, which reports `PRECISION`.
pub const MAX_HEALTH_FACTOR: U256 = U256::from_limbs([9_000_000_000_000_000_000u64, 0, 0, 0]);

/// Warning threshold (1.5)
pub const AT_RISK_HEALTH_FACTOR: U256 = U256::from_limbs([1_500_000_000_000_000_000u64, 0, 0, 0]);

/// Percentages are computed in basis points, then divided by 100.0
pub const BPS_DENOMINATOR: U256 = U256::from_limbs([10000u64, 0, 0, 0]);

const LIQUIDATION_DIVISOR: U256 = U256::from_limbs([2u64, 0, 0, 0]);

/// Errors from numeric parsing and conversion.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("invalid decimal string {0:?}")]
    InvalidDecimal(String),

    #[error("value {0} does not fit in a signed 256-bit integer")]
    Overflow(U256),
}

/// Health factor: `(collateral_usd * 50 / 100) * PRECISION / debt`.
///
/// Zero debt reports exactly `PRECISION`.
#[inline(always)]
pub fn health_factor(collateral_usd: U256, debt: U256) -> U256 {
    if debt.is_zero() {
        return PRECISION;
    }
    let adjusted = collateral_usd.saturating_mul(LIQUIDATION_THRESHOLD) / LIQUIDATION_PRECISION;
    adjusted.saturating_mul(PRECISION) / debt
}

#[inline(always)]
pub fn is_liquidatable(hf: U256) -> bool {
    hf < MIN_HEALTH_FACTOR
}

#[inline(always)]
pub fn is_at_risk(hf: U256) -> bool {
    hf < AT_RISK_HEALTH_FACTOR
}

/// `value / total` as a percentage with two decimals; 0 for a zero total.
#[inline(always)]
pub fn percentage_of(value: U256, total: U256) -> f64 {
    if total.is_zero() {
        return 0.0;
    }
    let bps = value.saturating_mul(BPS_DENOMINATOR) / total;
    u64::try_from(bps).unwrap_or(u64::MAX) as f64 / 100.0
}

/// Protocol collateral over outstanding debt, as a percentage.
pub fn collateralization_ratio(total_collateral: U256, total_debt: U256) -> f64 {
    percentage_of(total_collateral, total_debt)
}

/// Collateral backing of the circulating supply, as a percentage.
pub fn backing_percentage(total_collateral: U256, circulating: U256) -> f64 {
    percentage_of(total_collateral, circulating)
}

/// Stablecoin still mintable against `collateral_usd` (1e8 scale) given `debt` (1e18 scale).
pub fn max_mintable(collateral_usd: U256, debt: U256) -> U256 {
    let adjusted = collateral_usd
        .saturating_mul(ADDITIONAL_PRICE_PRECISION)
        .saturating_mul(LIQUIDATION_THRESHOLD)
        / LIQUIDATION_PRECISION;
    adjusted.saturating_sub(debt)
}

/// Debt a liquidator must cover: half the outstanding debt.
pub fn liquidation_amount(debt: Option<U256>) -> U256 {
    debt.map_or(U256::ZERO, |d| d / LIQUIDATION_DIVISOR)
}

/// Mean of summed 1e18 health factors, as a float for display.
pub fn average_health_factor(sum: U256, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    wad_to_f64(sum / U256::from(count))
}

/// Parse a decimal string into an integer with exactly `decimals` fraction digits.
///
/// Excess fraction digits are truncated, missing ones zero-padded:
/// `parse_decimal("100.5", 8) == 10050000000`.
pub fn parse_decimal(value: &str, decimals: u8) -> Result<U256, MathError> {
    let invalid = || MathError::InvalidDecimal(value.to_string());
    let trimmed = value.trim();

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let scale = decimals as usize;
    let mut digits = String::with_capacity(whole.len() + scale);
    digits.push_str(whole);
    digits.extend(fraction.chars().take(scale));
    digits.extend(std::iter::repeat('0').take(scale.saturating_sub(fraction.len())));

    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 10).map_err(|_| invalid())
}

/// USD value (1e8 scale) of a raw 18-decimal token amount at a decimal price string.
pub fn token_amount_in_usd(amount: U256, price: &str) -> Result<U256, MathError> {
    let scaled_price = parse_decimal(price, PRICE_DECIMALS)?;
    Ok(amount.saturating_mul(scaled_price) / PRECISION)
}

/// Negative ledger values read as zero.
#[inline(always)]
pub fn clamp_non_negative(value: I256) -> U256 {
    if value.is_negative() {
        U256::ZERO
    } else {
        value.into_raw()
    }
}

/// Lift an unsigned amount into a signed ledger delta.
pub fn to_signed(value: U256) -> Result<I256, MathError> {
    I256::try_from(value).map_err(|_| MathError::Overflow(value))
}

/// Convert a 1e18-scaled value to f64. Display only.
#[inline(always)]
pub fn wad_to_f64(wad: U256) -> f64 {
    if wad <= U256::from(u128::MAX) {
        let value: u128 = wad.to();
        value as f64 / 1e18
    } else {
        let value = wad
            .as_limbs()
            .iter()
            .rev()
            .fold(0.0, |acc, &limb| acc * 18_446_744_073_709_551_616.0 + limb as f64);
        value / 1e18
    }
}
