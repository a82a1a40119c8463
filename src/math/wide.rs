use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Signed 256-bit integer, two's complement over little-endian `u64` limbs.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct I256([u64; 4]);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid 256-bit integer: {0:?}")]
pub struct ParseI256Error(String);

const DECIMAL_CHUNK: u64 = 10_000_000_000_000_000_000;

impl I256 {
    pub const ZERO: Self = Self([0; 4]);
    pub const MAX: Self = Self([u64::MAX, u64::MAX, u64::MAX, i64::MAX as u64]);
    pub const MIN: Self = Self([0, 0, 0, 1 << 63]);

    pub const fn from_u64(value: u64) -> Self {
        Self([value, 0, 0, 0])
    }

    pub const fn from_i128(value: i128) -> Self {
        let ext = if value < 0 { u64::MAX } else { 0 };
        Self([value as u64, (value >> 64) as u64, ext, ext])
    }

    /// `high * 2^128`.
    pub const fn from_high(high: i128) -> Self {
        Self([0, 0, high as u64, (high >> 64) as u64])
    }

    pub fn is_negative(self) -> bool {
        self.0[3] >> 63 == 1
    }

    /// Upper 128 bits, i.e. `floor(self / 2^128)`.
    pub fn high(self) -> i128 {
        ((u128::from(self.0[3]) << 64) | u128::from(self.0[2])) as i128
    }

    /// Lower 128 bits, i.e. `self mod 2^128`.
    pub fn low(self) -> u128 {
        (u128::from(self.0[1]) << 64) | u128::from(self.0[0])
    }

    pub fn to_le_bytes(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        for (chunk, limb) in out.chunks_exact_mut(8).zip(self.0) {
            chunk.copy_from_slice(&limb.to_le_bytes());
        }
        out
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        let sum = self.wrapping_add(rhs);
        if self.is_negative() == rhs.is_negative() && sum.is_negative() != self.is_negative() {
            None
        } else {
            Some(sum)
        }
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let diff = self.wrapping_add(rhs.wrapping_neg());
        if self.is_negative() != rhs.is_negative() && diff.is_negative() != self.is_negative() {
            None
        } else {
            Some(diff)
        }
    }

    pub fn checked_neg(self) -> Option<Self> {
        (self != Self::MIN).then(|| self.wrapping_neg())
    }

    pub fn checked_mul_u64(self, rhs: u64) -> Option<Self> {
        let (product, carry) = mul_limbs(self.unsigned_abs(), rhs);
        if carry != 0 {
            return None;
        }
        let product = Self(product);
        match (self.is_negative(), product.is_negative()) {
            (false, false) => Some(product),
            (true, false) => Some(product.wrapping_neg()),
            // Magnitude 2^255 is only representable as MIN.
            (true, true) if product == Self::MIN => Some(Self::MIN),
            _ => None,
        }
    }

    /// Quotient and remainder of a non-negative value by `divisor`.
    pub fn checked_div_rem_u64(self, divisor: u64) -> Option<(Self, u64)> {
        if self.is_negative() || divisor == 0 {
            return None;
        }
        let (quotient, rem) = div_rem_limbs(self.0, divisor);
        Some((Self(quotient), rem))
    }

    fn wrapping_add(self, rhs: Self) -> Self {
        let mut out = [0u64; 4];
        let mut carry = false;
        for (i, slot) in out.iter_mut().enumerate() {
            let (partial, c1) = self.0[i].overflowing_add(rhs.0[i]);
            let (sum, c2) = partial.overflowing_add(u64::from(carry));
            *slot = sum;
            carry = c1 || c2;
        }
        Self(out)
    }

    fn wrapping_neg(self) -> Self {
        Self(self.0.map(|limb| !limb)).wrapping_add(Self::from_u64(1))
    }

    fn unsigned_abs(self) -> [u64; 4] {
        if self.is_negative() {
            self.wrapping_neg().0
        } else {
            self.0
        }
    }
}

fn mul_limbs(limbs: [u64; 4], rhs: u64) -> ([u64; 4], u64) {
    let mut out = [0u64; 4];
    let mut carry: u128 = 0;
    for (slot, limb) in out.iter_mut().zip(limbs) {
        let wide = u128::from(limb) * u128::from(rhs) + carry;
        *slot = wide as u64;
        carry = wide >> 64;
    }
    (out, carry as u64)
}

fn div_rem_limbs(limbs: [u64; 4], divisor: u64) -> ([u64; 4], u64) {
    let divisor = u128::from(divisor);
    let mut quotient = [0u64; 4];
    let mut rem: u128 = 0;
    for i in (0..4).rev() {
        let current = (rem << 64) | u128::from(limbs[i]);
        quotient[i] = (current / divisor) as u64;
        rem = current % divisor;
    }
    (quotient, rem as u64)
}

impl From<u64> for I256 {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<i128> for I256 {
    fn from(value: i128) -> Self {
        Self::from_i128(value)
    }
}

impl Ord for I256 {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_negative(), other.is_negative()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.0.iter().rev().cmp(other.0.iter().rev()),
        }
    }
}

impl PartialOrd for I256 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut magnitude = self.unsigned_abs();
        let mut chunks = Vec::new();
        loop {
            let (quotient, rem) = div_rem_limbs(magnitude, DECIMAL_CHUNK);
            chunks.push(rem);
            magnitude = quotient;
            if magnitude == [0; 4] {
                break;
            }
        }
        let mut digits = String::new();
        for (i, chunk) in chunks.iter().rev().enumerate() {
            if i == 0 {
                digits.push_str(&chunk.to_string());
            } else {
                digits.push_str(&format!("{chunk:019}"));
            }
        }
        f.pad_integral(!self.is_negative(), "", &digits)
    }
}

impl fmt::Debug for I256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for I256 {
    type Err = ParseI256Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseI256Error(s.to_string());
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() {
            return Err(invalid());
        }
        let mut value = Self::ZERO;
        for ch in digits.chars() {
            let digit = ch.to_digit(10).ok_or_else(invalid)?;
            value = value
                .checked_mul_u64(10)
                .and_then(|v| v.checked_sub(Self::from_u64(u64::from(digit))))
                .ok_or_else(invalid)?;
        }
        // Accumulated as a negative number so MIN parses.
        if negative {
            Ok(value)
        } else {
            value.checked_neg().ok_or_else(invalid)
        }
    }
}

impl Serialize for I256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for I256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}
