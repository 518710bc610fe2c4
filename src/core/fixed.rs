//! Fixed-point helpers.
//!
//! Every quantity in the engine is a [`Decimal`] in natural units. Products
//! and quotients are computed exactly on the integer mantissas and only then
//! truncated toward zero to [`PRECISION_DECIMALS`] places, so fees and
//! payouts are deterministic and never exceed the exact value.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Number of decimal places kept after every multiply or divide step.
pub const PRECISION_DECIMALS: u32 = 18;

/// Arithmetic failures. Surfaced instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("division by zero")]
    DivisionByZero,
}

/// Drop every digit past [`PRECISION_DECIMALS`], rounding toward zero.
pub fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PRECISION_DECIMALS, RoundingStrategy::ToZero)
}

/// `a + b`, failing instead of overflowing.
pub fn add(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_add(b).ok_or(MathError::Overflow)
}

/// `a - b`, failing instead of overflowing.
pub fn sub(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    a.checked_sub(b).ok_or(MathError::Overflow)
}

/// `a * b`, truncated.
pub fn mul(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    exact_quotient(&[a, b], Decimal::ONE)
}

/// `a / b`, truncated.
pub fn div(a: Decimal, b: Decimal) -> Result<Decimal, MathError> {
    exact_quotient(&[a], b)
}

/// `a * b / c` with a single truncation at the end.
pub fn mul_div(a: Decimal, b: Decimal, c: Decimal) -> Result<Decimal, MathError> {
    exact_quotient(&[a, b], c)
}

/// `a - b`, floored at zero.
pub fn saturating_sub(a: Decimal, b: Decimal) -> Decimal {
    if b >= a {
        Decimal::ZERO
    } else {
        a - b
    }
}

/// Integer power by repeated truncated multiplication.
pub fn pow(base: Decimal, exponent: u32) -> Result<Decimal, MathError> {
    let mut acc = Decimal::ONE;
    for _ in 0..exponent {
        acc = mul(acc, base)?;
    }
    Ok(acc)
}

// --- Exact arithmetic ---

/// `product(factors) / divisor`, truncated to [`PRECISION_DECIMALS`].
///
/// With mantissas `m` and scales `s`, the result mantissa at the target
/// scale is `Πm_f · 10^(s_d + P) / (m_d · 10^Σs_f)`, computed in 512 bits.
fn exact_quotient(factors: &[Decimal], divisor: Decimal) -> Result<Decimal, MathError> {
    if divisor.is_zero() {
        return Err(MathError::DivisionByZero);
    }
    if factors.iter().any(Decimal::is_zero) {
        return Ok(Decimal::ZERO);
    }
    let negative = factors
        .iter()
        .filter(|f| f.is_sign_negative())
        .count()
        % 2
        == 1;
    let negative = negative != divisor.is_sign_negative();

    let mut numerator = Wide::from_u128(1);
    let mut factor_scale = 0;
    for factor in factors {
        numerator = numerator.mul(&Wide::from_u128(factor.mantissa().unsigned_abs()))?;
        factor_scale += factor.scale();
    }
    numerator.mul_pow10(divisor.scale() + PRECISION_DECIMALS)?;
    let mut denominator = Wide::from_u128(divisor.mantissa().unsigned_abs());
    denominator.mul_pow10(factor_scale)?;

    to_decimal(numerator.div(&denominator), negative)
}

/// Build a decimal from a mantissa at [`PRECISION_DECIMALS`], giving up
/// trailing places when the mantissa is wider than 96 bits.
fn to_decimal(mut mantissa: Wide, negative: bool) -> Result<Decimal, MathError> {
    let mut scale = PRECISION_DECIMALS;
    while mantissa.bits() > 96 {
        if scale == 0 {
            return Err(MathError::Overflow);
        }
        mantissa.div_small(10);
        scale -= 1;
    }
    let magnitude = mantissa.to_u128().ok_or(MathError::Overflow)? as i128;
    let signed = if negative { -magnitude } else { magnitude };
    Decimal::try_from_i128_with_scale(signed, scale)
        .map(|d| d.normalize())
        .map_err(|_| MathError::Overflow)
}

const LIMBS: usize = 16;

/// Unsigned 512-bit integer, little-endian 32-bit limbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Wide([u32; LIMBS]);

impl Wide {
    fn zero() -> Self {
        Wide([0; LIMBS])
    }

    fn from_u128(value: u128) -> Self {
        let mut limbs = [0u32; LIMBS];
        for (i, limb) in limbs.iter_mut().take(4).enumerate() {
            *limb = (value >> (32 * i)) as u32;
        }
        Wide(limbs)
    }

    fn to_u128(self) -> Option<u128> {
        if self.bits() > 128 {
            return None;
        }
        Some(
            self.0
                .iter()
                .take(4)
                .enumerate()
                .fold(0u128, |acc, (i, limb)| acc | (u128::from(*limb) << (32 * i))),
        )
    }

    fn bits(&self) -> u32 {
        for i in (0..LIMBS).rev() {
            if self.0[i] != 0 {
                return 32 * i as u32 + (32 - self.0[i].leading_zeros());
            }
        }
        0
    }

    fn bit(&self, i: u32) -> bool {
        (self.0[(i / 32) as usize] >> (i % 32)) & 1 == 1
    }

    fn set_bit(&mut self, i: u32) {
        self.0[(i / 32) as usize] |= 1 << (i % 32);
    }

    fn mul(&self, other: &Wide) -> Result<Wide, MathError> {
        let mut out = [0u32; LIMBS];
        for i in 0..LIMBS {
            if self.0[i] == 0 {
                continue;
            }
            let mut carry = 0u64;
            for j in 0..LIMBS {
                let k = i + j;
                let current = if k < LIMBS { u64::from(out[k]) } else { 0 };
                let term = u64::from(self.0[i]) * u64::from(other.0[j]) + current + carry;
                if k >= LIMBS {
                    if term != 0 {
                        return Err(MathError::Overflow);
                    }
                    continue;
                }
                out[k] = term as u32;
                carry = term >> 32;
            }
            if carry != 0 {
                return Err(MathError::Overflow);
            }
        }
        Ok(Wide(out))
    }

    fn mul_small(&mut self, factor: u32) -> Result<(), MathError> {
        let mut carry = 0u64;
        for limb in self.0.iter_mut() {
            let term = u64::from(*limb) * u64::from(factor) + carry;
            *limb = term as u32;
            carry = term >> 32;
        }
        if carry != 0 {
            return Err(MathError::Overflow);
        }
        Ok(())
    }

    fn mul_pow10(&mut self, mut exponent: u32) -> Result<(), MathError> {
        while exponent >= 9 {
            self.mul_small(1_000_000_000)?;
            exponent -= 9;
        }
        if exponent > 0 {
            self.mul_small(10u32.pow(exponent))?;
        }
        Ok(())
    }

    /// Divide in place by a small divisor, returning the remainder.
    fn div_small(&mut self, divisor: u32) -> u32 {
        let mut rem = 0u64;
        for limb in self.0.iter_mut().rev() {
            let current = (rem << 32) | u64::from(*limb);
            *limb = (current / u64::from(divisor)) as u32;
            rem = current % u64::from(divisor);
        }
        rem as u32
    }

    fn shl1(&mut self) {
        let mut carry = 0u32;
        for limb in self.0.iter_mut() {
            let next = *limb >> 31;
            *limb = (*limb << 1) | carry;
            carry = next;
        }
    }

    fn ge(&self, other: &Wide) -> bool {
        for i in (0..LIMBS).rev() {
            if self.0[i] != other.0[i] {
                return self.0[i] > other.0[i];
            }
        }
        true
    }

    fn sub_assign(&mut self, other: &Wide) {
        let mut borrow = 0i64;
        for i in 0..LIMBS {
            let diff = i64::from(self.0[i]) - i64::from(other.0[i]) - borrow;
            if diff < 0 {
                self.0[i] = (diff + (1i64 << 32)) as u32;
                borrow = 1;
            } else {
                self.0[i] = diff as u32;
                borrow = 0;
            }
        }
    }

    /// Floor division. `divisor` must be non-zero.
    fn div(&self, divisor: &Wide) -> Wide {
        if let (Some(n), Some(d)) = (self.to_u128(), divisor.to_u128()) {
            return Wide::from_u128(n / d);
        }
        if divisor.bits() <= 32 {
            let mut quotient = *self;
            quotient.div_small(divisor.0[0]);
            return quotient;
        }
        let mut quotient = Wide::zero();
        let mut rem = Wide::zero();
        for i in (0..self.bits()).rev() {
            rem.shl1();
            if self.bit(i) {
                rem.0[0] |= 1;
            }
            if rem.ge(divisor) {
                rem.sub_assign(divisor);
                quotient.set_bit(i);
            }
        }
        quotient
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_div_truncates_toward_zero() {
        // 5000 / 3400 = 1.470588235294117647058...
        let result = div(dec!(5000), dec!(3400)).unwrap();
        assert_eq!(result, dec!(1.470588235294117647));
    }

    #[test]
    fn test_mul_truncates() {
        let third = div(Decimal::ONE, dec!(3)).unwrap();
        assert_eq!(third, dec!(0.333333333333333333));
        assert_eq!(mul(third, dec!(3)).unwrap(), dec!(0.999999999999999999));
    }

    #[test]
    fn test_mul_div_single_truncation() {
        assert_eq!(mul_div(dec!(2), dec!(5), dec!(3)).unwrap(), dec!(3.333333333333333333));
    }

    #[test]
    fn test_products_past_28_places_never_round_up() {
        // Exact value 0.49999999999999999999999999995.
        let amount = dec!(0.9999999999999999999999999999);
        assert_eq!(mul(amount, dec!(0.5)).unwrap(), dec!(0.499999999999999999));
        assert_eq!(div(amount, dec!(2)).unwrap(), dec!(0.499999999999999999));
        assert_eq!(mul_div(amount, dec!(3), dec!(6)).unwrap(), dec!(0.499999999999999999));
    }

    #[test]
    fn test_wide_operands() {
        // 7.9e28 * 7.9e28 / 7.9e28 needs more than 128 bits in between.
        assert_eq!(mul_div(Decimal::MAX, Decimal::MAX, Decimal::MAX).unwrap(), Decimal::MAX);
        assert_eq!(mul(Decimal::MAX, Decimal::MAX), Err(MathError::Overflow));
        assert_eq!(mul(dec!(-2.5), dec!(4)).unwrap(), dec!(-10));
        assert_eq!(div(dec!(-1), dec!(3)).unwrap(), dec!(-0.333333333333333333));
    }

    #[test]
    fn test_large_results_lose_places_not_magnitude() {
        // 10^15 at 18 places needs a 33-digit mantissa.
        let big = dec!(1000000000000000);
        assert_eq!(mul(big, dec!(1.5)).unwrap(), dec!(1500000000000000));
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(div(Decimal::ONE, Decimal::ZERO), Err(MathError::DivisionByZero));
        assert_eq!(
            mul_div(Decimal::ONE, Decimal::ONE, Decimal::ZERO),
            Err(MathError::DivisionByZero)
        );
    }

    #[test]
    fn test_checked_add_sub() {
        assert_eq!(add(Decimal::MAX, Decimal::ONE), Err(MathError::Overflow));
        assert_eq!(sub(Decimal::MIN, Decimal::ONE), Err(MathError::Overflow));
        assert_eq!(add(dec!(1.5), dec!(2)).unwrap(), dec!(3.5));
    }

    #[test]
    fn test_saturating_sub() {
        assert_eq!(saturating_sub(dec!(1), dec!(3)), Decimal::ZERO);
        assert_eq!(saturating_sub(dec!(3), dec!(1)), dec!(2));
    }

    #[test]
    fn test_pow() {
        assert_eq!(pow(dec!(0.5), 2).unwrap(), dec!(0.25));
        assert_eq!(pow(dec!(7), 0).unwrap(), Decimal::ONE);
    }
}
