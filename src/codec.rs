//! # AN Codec
//!
//! A raw value `v` of width `W` is stored as `v * A` in an integer of width
//! `2W`. Any odd `A` is invertible modulo `2^2W`, so decoding is a second
//! multiplication by `A⁻¹`. A stored value is valid when it is a multiple of
//! `A`, or equivalently when decoding lands back inside the raw range.
//!
//! ```text
//!   encode:  c = widen(v) * A        (mod 2^2W)
//!   decode:  v = truncate(c * A⁻¹)   (mod 2^2W, then mod 2^W)
//!   valid:   c * A⁻¹ ∈ [MIN_raw, MAX_raw]   or   c mod A == 0
//! ```
//!
//! ## Example
//!
//! ```rust
//! use ancode::AnCodec;
//!
//! let codec = AnCodec::<u16>::new(63877).unwrap();
//! let c = codec.encode(12783);
//! assert_eq!(c, 816_539_691);
//! assert_eq!(codec.decode(c), 12783);
//! assert!(codec.is_valid(c));
//! assert!(!codec.is_valid(c + 1));
//! ```

use std::fmt;
use std::ops::BitXor;

use crate::backend::Backend;
use crate::inverse::modular_inverse;
use crate::{simd, Error};

// =============================================================================
// Word Types
// =============================================================================

/// A raw integer type that can be AN-coded into an integer of twice its width.
///
/// Implemented for `u8`, `u16`, `u32` (encoded as `u16`, `u32`, `u64`) and
/// their signed counterparts. All encoded-domain arithmetic wraps at exactly
/// the encoded width.
pub trait AnWord:
    Copy + PartialEq + Default + fmt::Debug + BitXor<Output = Self> + Send + Sync + 'static
{
    /// Encoded integer type, twice as wide as `Self`.
    type Enc: Copy + PartialEq + Default + fmt::Debug + Send + Sync + 'static;

    /// Width of the raw domain in bits.
    const BITS: u32;
    /// Whether raw and encoded values are two's complement.
    const SIGNED: bool;
    /// Short type name for reports (`"u16"`, `"i32"`, ...).
    const NAME: &'static str;

    /// Zero- or sign-extend into the encoded type.
    fn widen(self) -> Self::Enc;
    /// Keep the low `BITS` bits of an encoded-width value.
    fn truncate(enc: Self::Enc) -> Self;
    /// Reinterpret the low bits of `bits` as a raw value.
    fn from_bits(bits: u64) -> Self;
    /// Wrapping division; the caller rules out a zero divisor.
    fn wrapping_div(self, rhs: Self) -> Self;
    /// `true` if `self` is zero.
    fn is_zero(self) -> bool;

    /// Reinterpret the low bits of `bits` as an encoded value.
    fn enc_from_bits(bits: u64) -> Self::Enc;
    /// Exact value of an encoded word.
    fn enc_to_i128(enc: Self::Enc) -> i128;
    /// Wrapping multiplication at the encoded width.
    fn enc_mul(lhs: Self::Enc, rhs: Self::Enc) -> Self::Enc;
    /// Wrapping addition at the encoded width.
    fn enc_add(lhs: Self::Enc, rhs: Self::Enc) -> Self::Enc;
    /// Wrapping subtraction at the encoded width.
    fn enc_sub(lhs: Self::Enc, rhs: Self::Enc) -> Self::Enc;
    /// `true` if a decoded product lies inside the raw range.
    fn enc_in_range(dec: Self::Enc) -> bool;
    /// `true` if `enc` is a multiple of `a`.
    fn enc_divisible(enc: Self::Enc, a: Self::Enc) -> bool;

    /// Vectorized encode for a non-scalar backend.
    ///
    /// The default runs the generic lane kernels; types with hand-written
    /// intrinsics override it.
    #[doc(hidden)]
    fn encode_vector(backend: Backend, codec: &AnCodec<Self>, raw: &[Self], out: &mut [Self::Enc]) {
        simd::encode(backend, codec, raw, out);
    }

    /// Vectorized check, returning the index of the first invalid element.
    #[doc(hidden)]
    fn check_vector(backend: Backend, codec: &AnCodec<Self>, encoded: &[Self::Enc]) -> Option<usize> {
        simd::check(backend, codec, encoded)
    }

    /// Vectorized decode for a non-scalar backend.
    #[doc(hidden)]
    fn decode_vector(backend: Backend, codec: &AnCodec<Self>, encoded: &[Self::Enc], out: &mut [Self]) {
        simd::decode(backend, codec, encoded, out);
    }
}

macro_rules! impl_an_word {
    // 16 -> 32 bit words have hand-written SSE4.2/AVX2/AVX-512 kernels.
    (@vector w16, $signed:literal) => {
        fn encode_vector(backend: Backend, codec: &AnCodec<Self>, raw: &[Self], out: &mut [Self::Enc]) {
            // SAFETY: the 16/32 bit signed and unsigned types share size and alignment.
            let (raw, out) = unsafe { (simd::cast_slice(raw), simd::cast_slice_mut(out)) };
            simd::w16::encode::<$signed>(backend, codec.a() as u32, raw, out);
        }

        fn check_vector(backend: Backend, codec: &AnCodec<Self>, encoded: &[Self::Enc]) -> Option<usize> {
            if codec.policy() != CheckPolicy::Range {
                return simd::check(backend, codec, encoded);
            }
            // SAFETY: as above.
            let encoded = unsafe { simd::cast_slice(encoded) };
            simd::w16::check::<$signed>(backend, codec.a_inv() as u32, encoded)
        }

        fn decode_vector(backend: Backend, codec: &AnCodec<Self>, encoded: &[Self::Enc], out: &mut [Self]) {
            // SAFETY: as above.
            let (encoded, out) = unsafe { (simd::cast_slice(encoded), simd::cast_slice_mut(out)) };
            simd::w16::decode(backend, codec.a_inv() as u32, encoded, out);
        }
    };
    ($raw:ty, $enc:ty, $signed:literal $(, vector = $vec:ident)?) => {
        impl AnWord for $raw {
            type Enc = $enc;

            const BITS: u32 = <$raw>::BITS;
            const SIGNED: bool = $signed;
            const NAME: &'static str = stringify!($raw);

            #[inline(always)]
            fn widen(self) -> $enc {
                self as $enc
            }

            #[inline(always)]
            fn truncate(enc: $enc) -> Self {
                enc as $raw
            }

            #[inline(always)]
            fn from_bits(bits: u64) -> Self {
                bits as $raw
            }

            #[inline(always)]
            fn wrapping_div(self, rhs: Self) -> Self {
                <$raw>::wrapping_div(self, rhs)
            }

            #[inline(always)]
            fn is_zero(self) -> bool {
                self == 0
            }

            #[inline(always)]
            fn enc_from_bits(bits: u64) -> $enc {
                bits as $enc
            }

            #[inline(always)]
            fn enc_to_i128(enc: $enc) -> i128 {
                i128::from(enc)
            }

            #[inline(always)]
            fn enc_mul(lhs: $enc, rhs: $enc) -> $enc {
                lhs.wrapping_mul(rhs)
            }

            #[inline(always)]
            fn enc_add(lhs: $enc, rhs: $enc) -> $enc {
                lhs.wrapping_add(rhs)
            }

            #[inline(always)]
            fn enc_sub(lhs: $enc, rhs: $enc) -> $enc {
                lhs.wrapping_sub(rhs)
            }

            #[inline(always)]
            fn enc_in_range(dec: $enc) -> bool {
                ((<$raw>::MIN as $enc)..=(<$raw>::MAX as $enc)).contains(&dec)
            }

            #[inline(always)]
            fn enc_divisible(enc: $enc, a: $enc) -> bool {
                enc.wrapping_rem(a) == 0
            }

            $(impl_an_word!(@vector $vec, $signed);)?
        }
    };
}

impl_an_word!(u8, u16, false);
impl_an_word!(u16, u32, false, vector = w16);
impl_an_word!(u32, u64, false);
impl_an_word!(i8, i16, true);
impl_an_word!(i16, i32, true, vector = w16);
impl_an_word!(i32, i64, true);

// =============================================================================
// Codec
// =============================================================================

/// Which predicate decides whether an encoded value is intact.
///
/// The two are not interchangeable: a corrupted value can be a multiple of
/// `A` whose quotient lies outside the raw range, which only the range check
/// rejects. Each codec uses exactly one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckPolicy {
    /// `c * A⁻¹` must lie in the raw range.
    #[default]
    Range,
    /// `c mod A` must be zero.
    Divisibility,
}

impl CheckPolicy {
    /// Short name for reports.
    pub fn name(self) -> &'static str {
        match self {
            CheckPolicy::Range => "range",
            CheckPolicy::Divisibility => "divisibility",
        }
    }
}

impl fmt::Display for CheckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// AN codec parameters for one raw type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnCodec<R: AnWord> {
    a: R::Enc,
    a_inv: R::Enc,
    policy: CheckPolicy,
}

impl<R: AnWord> AnCodec<R> {
    /// Create a codec with constant `a` and the range check policy.
    ///
    /// # Errors
    ///
    /// - `Error::NoInverseExists` if `a` is zero or even.
    /// - `Error::ConstantOutOfRange` if `a` does not fit in the raw width.
    pub fn new(a: u64) -> Result<Self, Error> {
        Self::with_policy(a, CheckPolicy::Range)
    }

    /// Create a codec with an explicit check policy.
    ///
    /// `a` is limited to the raw width so that `v * A` never wraps for any
    /// raw `v`; that keeps both policies exact on uncorrupted data.
    pub fn with_policy(a: u64, policy: CheckPolicy) -> Result<Self, Error> {
        if a == 0 || a & 1 == 0 {
            return Err(Error::NoInverseExists);
        }
        if a >> R::BITS != 0 {
            return Err(Error::ConstantOutOfRange);
        }
        let a_inv = modular_inverse(a, 2 * R::BITS)?;
        tracing::debug!(
            raw = R::NAME,
            a,
            a_inv,
            policy = policy.name(),
            "AN codec constructed"
        );
        Ok(Self {
            a: R::enc_from_bits(a),
            a_inv: R::enc_from_bits(a_inv),
            policy,
        })
    }

    /// The constant `A`.
    #[inline]
    pub fn a(&self) -> R::Enc {
        self.a
    }

    /// `A⁻¹ mod 2^(2 * BITS)`.
    #[inline]
    pub fn a_inv(&self) -> R::Enc {
        self.a_inv
    }

    #[inline]
    pub fn policy(&self) -> CheckPolicy {
        self.policy
    }

    #[inline(always)]
    pub fn encode(&self, raw: R) -> R::Enc {
        R::enc_mul(raw.widen(), self.a)
    }

    #[inline(always)]
    pub fn decode(&self, enc: R::Enc) -> R {
        R::truncate(R::enc_mul(enc, self.a_inv))
    }

    /// Apply this codec's check policy.
    #[inline(always)]
    pub fn is_valid(&self, enc: R::Enc) -> bool {
        match self.policy {
            CheckPolicy::Range => self.is_valid_range(enc),
            CheckPolicy::Divisibility => self.is_valid_divisible(enc),
        }
    }

    /// Range check regardless of the configured policy.
    #[inline(always)]
    pub fn is_valid_range(&self, enc: R::Enc) -> bool {
        R::enc_in_range(R::enc_mul(enc, self.a_inv))
    }

    /// Divisibility check regardless of the configured policy.
    #[inline(always)]
    pub fn is_valid_divisible(&self, enc: R::Enc) -> bool {
        R::enc_divisible(enc, self.a)
    }

    /// Recover the raw sum from a sum of codewords.
    ///
    /// A sum of codewords is the codeword of the sum, held exactly in `i128`.
    /// Returns `None` if the sum is not a multiple of `A`.
    pub fn decode_sum(&self, encoded_sum: i128) -> Option<i128> {
        let a = R::enc_to_i128(self.a);
        (encoded_sum % a == 0).then(|| encoded_sum / a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A16: u64 = 63877;

    #[test]
    fn test_codec_parameters() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        assert_eq!(codec.a(), 63877);
        assert_eq!(codec.a_inv(), 3_510_769_485);
        assert_eq!(codec.policy(), CheckPolicy::Range);
        assert_eq!(codec.a().wrapping_mul(codec.a_inv()), 1);
    }

    #[test]
    fn test_codec_invalid_constant() {
        assert_eq!(AnCodec::<u16>::new(0).unwrap_err(), Error::NoInverseExists);
        assert_eq!(AnCodec::<u16>::new(64).unwrap_err(), Error::NoInverseExists);
        assert_eq!(AnCodec::<u8>::new(257).unwrap_err(), Error::ConstantOutOfRange);
        assert_eq!(AnCodec::<i8>::new(257).unwrap_err(), Error::ConstantOutOfRange);
        assert!(AnCodec::<u8>::new(233).is_ok());
        assert!(AnCodec::<i8>::new(255).is_ok());
    }

    #[test]
    fn test_concrete_scenario_values() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        let raw = [0u16, 1, 65535, 12783];
        let encoded: Vec<u32> = raw.iter().map(|&v| codec.encode(v)).collect();
        assert_eq!(encoded, vec![0, 63877, 4_186_179_195, 816_539_691]);

        let decoded: Vec<u16> = encoded.iter().map(|&c| codec.decode(c)).collect();
        assert_eq!(decoded, raw);

        assert!(encoded.iter().all(|&c| codec.is_valid(c)));
        assert!(!codec.is_valid(encoded[2] + 1));
    }

    #[test]
    fn test_roundtrip_exhaustive_8_and_16_bit() {
        let u8c = AnCodec::<u8>::new(233).unwrap();
        for v in u8::MIN..=u8::MAX {
            let c = u8c.encode(v);
            assert_eq!(u8c.decode(c), v);
            assert!(u8c.is_valid_range(c) && u8c.is_valid_divisible(c));
        }

        let i8c = AnCodec::<i8>::new(107).unwrap();
        for v in i8::MIN..=i8::MAX {
            let c = i8c.encode(v);
            assert_eq!(i8c.decode(c), v);
            assert!(i8c.is_valid_range(c) && i8c.is_valid_divisible(c));
        }

        let u16c = AnCodec::<u16>::new(A16).unwrap();
        for v in u16::MIN..=u16::MAX {
            let c = u16c.encode(v);
            assert_eq!(u16c.decode(c), v);
            assert!(u16c.is_valid_range(c) && u16c.is_valid_divisible(c));
        }

        let i16c = AnCodec::<i16>::new(32749).unwrap();
        for v in i16::MIN..=i16::MAX {
            let c = i16c.encode(v);
            assert_eq!(i16c.decode(c), v);
            assert!(i16c.is_valid_range(c) && i16c.is_valid_divisible(c));
        }
    }

    #[test]
    fn test_roundtrip_32_bit_edges() {
        let u32c = AnCodec::<u32>::new(A16).unwrap();
        for v in [0u32, 1, 2, u32::MAX / 2, u32::MAX - 1, u32::MAX] {
            let c = u32c.encode(v);
            assert_eq!(u32c.decode(c), v);
            assert!(u32c.is_valid(c));
        }

        let i32c = AnCodec::<i32>::new(A16).unwrap();
        for v in [i32::MIN, -1, 0, 1, i32::MAX] {
            let c = i32c.encode(v);
            assert_eq!(i32c.decode(c), v);
            assert!(i32c.is_valid(c));
        }
    }

    #[test]
    fn test_single_bit_flip_detected_by_both_policies() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        for v in [0u16, 1, 255, 12783, 65535] {
            let c = codec.encode(v);
            for bit in 0..32 {
                let corrupted = c ^ (1 << bit);
                assert!(!codec.is_valid_range(corrupted), "v={v} bit={bit}");
                assert!(!codec.is_valid_divisible(corrupted), "v={v} bit={bit}");
            }
        }

        let codec = AnCodec::<i16>::new(32749).unwrap();
        for v in [i16::MIN, -1, 0, 1, i16::MAX] {
            let c = codec.encode(v);
            for bit in 0..32 {
                let corrupted = c ^ (1 << bit);
                assert!(!codec.is_valid_range(corrupted), "v={v} bit={bit}");
                assert!(!codec.is_valid_divisible(corrupted), "v={v} bit={bit}");
            }
        }
    }

    #[test]
    fn test_policies_disagree_outside_raw_range() {
        // 3 * 65536 is a multiple of A = 3, but its quotient is out of range
        let range = AnCodec::<u16>::with_policy(3, CheckPolicy::Range).unwrap();
        let divisible = AnCodec::<u16>::with_policy(3, CheckPolicy::Divisibility).unwrap();
        let c = 3u32 * 65536;
        assert!(!range.is_valid(c));
        assert!(divisible.is_valid(c));
    }

    #[test]
    fn test_decode_sum() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        let values = [7u16, 65535, 12783, 0, 1];
        let sum: i128 = values.iter().map(|&v| i128::from(codec.encode(v))).sum();
        let expected: i128 = values.iter().map(|&v| i128::from(v)).sum();
        assert_eq!(codec.decode_sum(sum), Some(expected));
        assert_eq!(codec.decode_sum(sum + 1), None);

        let codec = AnCodec::<i8>::new(107).unwrap();
        let sum: i128 = [-128i8, 127, -5]
            .iter()
            .map(|&v| i128::from(codec.encode(v)))
            .sum();
        assert_eq!(codec.decode_sum(sum), Some(-6));
    }
}
