//! # Modular Inverse
//!
//! Multiplicative inverse of an odd constant modulo a power of two, computed
//! with the extended Euclidean algorithm.
//!
//! Decoding an AN-coded value multiplies it by `A⁻¹ mod 2^W`, so every codec
//! computes this once at construction. Only odd numbers are invertible
//! modulo `2^W`.
//!
//! ## Example
//!
//! ```rust
//! use ancode::modular_inverse;
//!
//! let inv = modular_inverse(63877, 32).unwrap();
//! assert_eq!(inv, 3_510_769_485);
//! assert_eq!((63877u64 * inv) % (1 << 32), 1);
//! ```

use crate::Error;

/// Largest supported modulus exponent.
pub const MAX_WIDTH: u32 = 64;

/// Compute `a⁻¹ mod 2^width`.
///
/// The Euclidean steps run on `(2^width, a)`, which needs `width + 1` bits of
/// signed headroom. All intermediate values are held in `i128`, enough for
/// `width = 64`.
///
/// # Errors
///
/// - `Error::InvalidWidth` if `width` is 0 or larger than 64.
/// - `Error::ConstantOutOfRange` if `a` does not fit in `width` bits.
/// - `Error::NoInverseExists` if `a` is zero or even.
pub fn modular_inverse(a: u64, width: u32) -> Result<u64, Error> {
    if width == 0 || width > MAX_WIDTH {
        return Err(Error::InvalidWidth);
    }
    let modulus: i128 = 1i128 << width;
    if i128::from(a) >= modulus {
        return Err(Error::ConstantOutOfRange);
    }
    if a == 0 || a & 1 == 0 {
        return Err(Error::NoInverseExists);
    }

    // Invariant: old_r ≡ old_t * a and r ≡ t * a (mod 2^width).
    let (mut old_r, mut r) = (modulus, i128::from(a));
    let (mut old_t, mut t) = (0i128, 1i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_t, t) = (t, old_t - q * t);
    }
    if old_r != 1 {
        return Err(Error::NoInverseExists);
    }

    let inverse = old_t.rem_euclid(modulus) as u64;

    let mask = (modulus - 1) as u128;
    if (u128::from(a) * u128::from(inverse)) & mask != 1 {
        return Err(Error::NoInverseExists);
    }
    Ok(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mul_mod(a: u64, b: u64, width: u32) -> u128 {
        (u128::from(a) * u128::from(b)) & ((1u128 << width) - 1)
    }

    #[test]
    fn test_known_inverse_32() {
        assert_eq!(modular_inverse(63877, 32), Ok(3_510_769_485));
    }

    #[test]
    fn test_known_inverse_16_and_64() {
        assert_eq!(modular_inverse(63877, 16), Ok(5965));
        assert_eq!(modular_inverse(233, 16), Ok(55129));
        assert_eq!(modular_inverse(3, 64), Ok(12_297_829_382_473_034_411));
        assert_eq!(modular_inverse(63877, 64), Ok(9_368_486_693_100_984_141));
    }

    #[test]
    fn test_one_is_self_inverse() {
        for width in 1..=64 {
            assert_eq!(modular_inverse(1, width), Ok(1), "width {width}");
        }
    }

    #[test]
    fn test_all_odd_8_and_16_bit() {
        for width in [8u32, 16] {
            for a in (1..(1u64 << width)).step_by(2) {
                let inv = modular_inverse(a, width).unwrap();
                assert!(inv < (1 << width));
                assert_eq!(mul_mod(a, inv, width), 1, "a={a} width={width}");
            }
        }
    }

    #[test]
    fn test_large_odd_64_bit() {
        // Values near the top of the range exercise the i128 headroom
        for a in [u64::MAX, u64::MAX - 2, (1u64 << 63) + 1, 0xDEAD_BEEF_CAFE_F00D] {
            let inv = modular_inverse(a, 64).unwrap();
            assert_eq!(a.wrapping_mul(inv), 1, "a={a:#x}");
        }
    }

    #[test]
    fn test_even_has_no_inverse() {
        assert_eq!(modular_inverse(0, 32), Err(Error::NoInverseExists));
        for a in (2..4096u64).step_by(2) {
            assert_eq!(modular_inverse(a, 16), Err(Error::NoInverseExists));
        }
        assert_eq!(modular_inverse(u64::MAX - 1, 64), Err(Error::NoInverseExists));
    }

    #[test]
    fn test_invalid_width() {
        assert_eq!(modular_inverse(3, 0), Err(Error::InvalidWidth));
        assert_eq!(modular_inverse(3, 65), Err(Error::InvalidWidth));
    }

    #[test]
    fn test_constant_must_fit_width() {
        assert_eq!(modular_inverse(257, 8), Err(Error::ConstantOutOfRange));
        assert_eq!(modular_inverse(255, 8), Ok(255));
    }
}
