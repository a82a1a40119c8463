mod wide;

pub use wide::{I256, ParseI256Error};

use crate::error::DividendError;
use crate::ledger::Amount;

/// Signed value scaled by [`MAGNITUDE`].
pub type Magnified = I256;

/// Scaling factor for per-share values (2^128).
///
/// A deposit loses less than `total_supply / 2^128` base units to truncation.
/// Per-share values stay below `2^192` because total deposits fit in `u64`, so
/// `per_share * balance` only leaves the 256-bit range when a balance near
/// `u64::MAX` meets deposits near `u64::MAX` spread over a supply of a few
/// units.
pub const MAGNITUDE: Magnified = I256::from_high(1);

/// Per-share increment produced by one deposit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShareIncrement {
    /// `floor(amount * MAGNITUDE / total_supply)`
    pub per_share: Magnified,
    /// `(amount * MAGNITUDE) mod total_supply`, the scaled value lost to
    /// truncation.
    pub dust: Magnified,
}

pub fn per_share_increment(
    amount: Amount,
    total_supply: Amount,
) -> Result<ShareIncrement, DividendError> {
    if total_supply == 0 {
        return Err(DividendError::NoDistributionTarget);
    }
    let scaled = Magnified::from_high(i128::from(amount));
    let (per_share, dust) = scaled
        .checked_div_rem_u64(total_supply)
        .ok_or_else(|| DividendError::overflow("deposit scaling"))?;
    Ok(ShareIncrement {
        per_share,
        dust: Magnified::from(dust),
    })
}

/// `per_share * value`, the scaled dividend attached to `value` units.
pub fn scaled_product(per_share: Magnified, value: Amount) -> Result<Magnified, DividendError> {
    per_share
        .checked_mul_u64(value)
        .ok_or_else(|| DividendError::overflow("per-share product"))
}

pub fn checked_add(a: Magnified, b: Magnified, context: &str) -> Result<Magnified, DividendError> {
    a.checked_add(b)
        .ok_or_else(|| DividendError::overflow(context))
}

pub fn checked_sub(a: Magnified, b: Magnified, context: &str) -> Result<Magnified, DividendError> {
    a.checked_sub(b)
        .ok_or_else(|| DividendError::overflow(context))
}

/// Floor division by [`MAGNITUDE`] (rounds toward negative infinity).
pub fn descale_floor(value: Magnified) -> i128 {
    value.high()
}

/// Narrow a descaled value back to an [`Amount`]. Negative or oversized
/// values mean the accounting is broken.
pub fn to_amount(value: i128, context: &str) -> Result<Amount, DividendError> {
    if value < 0 {
        return Err(DividendError::InvariantViolation(format!(
            "{context} is negative ({value})"
        )));
    }
    Amount::try_from(value).map_err(|_| DividendError::overflow(context))
}
