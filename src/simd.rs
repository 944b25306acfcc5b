//! Vector kernels for the batch operations.
//!
//! Every kernel walks its buffer in three stages: unrolled blocks of
//! [`UNROLL`] registers, single registers, then a scalar tail. The
//! per-element work is identical in all three, so results never depend on
//! where the lane boundaries fall.
//!
//! Generic kernels are compiled once per instruction set through
//! `#[target_feature]` wrappers and left to the auto-vectorizer. The 16 → 32
//! bit codecs, the common benchmark configuration, use hand-written
//! intrinsics in [`w16`].

use crate::backend::{Backend, Capabilities, UNROLL};
use crate::codec::{AnCodec, AnWord, CheckPolicy};

/// Reinterpret a slice as another element type of identical layout.
///
/// # Safety
///
/// `A` and `B` must have the same size and alignment and every bit pattern
/// of `A` must be a valid `B`.
#[inline(always)]
pub(crate) unsafe fn cast_slice<A, B>(src: &[A]) -> &[B] {
    debug_assert_eq!(std::mem::size_of::<A>(), std::mem::size_of::<B>());
    debug_assert_eq!(std::mem::align_of::<A>(), std::mem::align_of::<B>());
    std::slice::from_raw_parts(src.as_ptr().cast(), src.len())
}

/// Mutable counterpart of [`cast_slice`].
///
/// # Safety
///
/// Same as [`cast_slice`], in both directions.
#[inline(always)]
pub(crate) unsafe fn cast_slice_mut<A, B>(src: &mut [A]) -> &mut [B] {
    debug_assert_eq!(std::mem::size_of::<A>(), std::mem::size_of::<B>());
    debug_assert_eq!(std::mem::align_of::<A>(), std::mem::align_of::<B>());
    std::slice::from_raw_parts_mut(src.as_mut_ptr().cast(), src.len())
}

/// The backend that will actually run: `backend` if the CPU has it, scalar
/// otherwise.
#[inline]
fn active(backend: Backend) -> Backend {
    if backend.is_available(Capabilities::get()) {
        backend
    } else {
        Backend::Scalar
    }
}

// =============================================================================
// Generic Lane Kernels
// =============================================================================

/// `dst[i] = f(src[i])` in blocks of `lanes * UNROLL`, then `lanes`, then one.
#[inline(always)]
fn map_lanes<A: Copy, B>(lanes: usize, src: &[A], dst: &mut [B], f: impl Fn(A) -> B) {
    debug_assert_eq!(src.len(), dst.len());
    let block = lanes * UNROLL;

    let mut src_blocks = src.chunks_exact(block);
    let mut dst_blocks = dst.chunks_exact_mut(block);
    for (s, d) in (&mut src_blocks).zip(&mut dst_blocks) {
        for (x, y) in s.iter().zip(d.iter_mut()) {
            *y = f(*x);
        }
    }

    let mut src_lanes = src_blocks.remainder().chunks_exact(lanes);
    let mut dst_lanes = dst_blocks.into_remainder().chunks_exact_mut(lanes);
    for (s, d) in (&mut src_lanes).zip(&mut dst_lanes) {
        for (x, y) in s.iter().zip(d.iter_mut()) {
            *y = f(*x);
        }
    }

    for (x, y) in src_lanes.remainder().iter().zip(dst_lanes.into_remainder()) {
        *y = f(*x);
    }
}

/// Index of the first element failing `valid`.
///
/// Whole blocks are reduced without branching; only a block that contains a
/// failure is rescanned to locate it.
#[inline(always)]
fn find_lanes<A: Copy>(lanes: usize, src: &[A], valid: impl Fn(A) -> bool) -> Option<usize> {
    let block = lanes * UNROLL;
    let mut base = 0;

    let mut blocks = src.chunks_exact(block);
    for chunk in &mut blocks {
        if !chunk.iter().fold(true, |ok, &x| ok & valid(x)) {
            return chunk.iter().position(|&x| !valid(x)).map(|i| base + i);
        }
        base += block;
    }

    let mut singles = blocks.remainder().chunks_exact(lanes);
    for chunk in &mut singles {
        if !chunk.iter().fold(true, |ok, &x| ok & valid(x)) {
            return chunk.iter().position(|&x| !valid(x)).map(|i| base + i);
        }
        base += lanes;
    }

    singles
        .remainder()
        .iter()
        .position(|&x| !valid(x))
        .map(|i| base + i)
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod x86 {
    use super::{find_lanes, map_lanes};

    macro_rules! lane_kernels {
        ($map:ident, $find:ident, $feature:literal, $bytes:literal) => {
            #[target_feature(enable = $feature)]
            pub(super) unsafe fn $map<E, A: Copy, B>(src: &[A], dst: &mut [B], f: impl Fn(A) -> B) {
                map_lanes(($bytes / std::mem::size_of::<E>()).max(1), src, dst, f)
            }

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn $find<E, A: Copy>(src: &[A], valid: impl Fn(A) -> bool) -> Option<usize> {
                find_lanes(($bytes / std::mem::size_of::<E>()).max(1), src, valid)
            }
        };
    }

    lane_kernels!(map_sse42, find_sse42, "sse4.2", 16);
    lane_kernels!(map_avx2, find_avx2, "avx2", 32);
    lane_kernels!(map_avx512, find_avx512, "avx512f", 64);
}

/// Map `f` over `src` on `backend`, sizing lanes by the element type `E`.
#[inline]
pub(crate) fn map<E, A: Copy, B>(backend: Backend, src: &[A], dst: &mut [B], f: impl Fn(A) -> B) {
    assert_eq!(src.len(), dst.len(), "source and destination lengths differ");
    match active(backend) {
        // SAFETY: `active` only returns backends the CPU supports.
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Sse42 => unsafe { x86::map_sse42::<E, A, B>(src, dst, f) },
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Avx2 => unsafe { x86::map_avx2::<E, A, B>(src, dst, f) },
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Avx512 => unsafe { x86::map_avx512::<E, A, B>(src, dst, f) },
        _ => map_lanes(1, src, dst, f),
    }
}

/// First index of `src` failing `valid` on `backend`.
#[inline]
pub(crate) fn find<E, A: Copy>(backend: Backend, src: &[A], valid: impl Fn(A) -> bool) -> Option<usize> {
    match active(backend) {
        // SAFETY: `active` only returns backends the CPU supports.
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Sse42 => unsafe { x86::find_sse42::<E, A>(src, valid) },
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Avx2 => unsafe { x86::find_avx2::<E, A>(src, valid) },
        #[cfg(all(feature = "simd", target_arch = "x86_64"))]
        Backend::Avx512 => unsafe { x86::find_avx512::<E, A>(src, valid) },
        _ => src.iter().position(|&x| !valid(x)),
    }
}

pub(crate) fn encode<R: AnWord>(backend: Backend, codec: &AnCodec<R>, raw: &[R], out: &mut [R::Enc]) {
    map::<R::Enc, _, _>(backend, raw, out, |v| codec.encode(v));
}

pub(crate) fn decode<R: AnWord>(backend: Backend, codec: &AnCodec<R>, encoded: &[R::Enc], out: &mut [R]) {
    map::<R::Enc, _, _>(backend, encoded, out, |c| codec.decode(c));
}

pub(crate) fn check<R: AnWord>(backend: Backend, codec: &AnCodec<R>, encoded: &[R::Enc]) -> Option<usize> {
    // Hoist the policy out of the loop.
    match codec.policy() {
        CheckPolicy::Range => find::<R::Enc, _>(backend, encoded, |c| codec.is_valid_range(c)),
        CheckPolicy::Divisibility => {
            find::<R::Enc, _>(backend, encoded, |c| codec.is_valid_divisible(c))
        }
    }
}

// =============================================================================
// 16 -> 32 bit Intrinsics
// =============================================================================

/// Hand-written kernels for 16-bit raw values coded into 32 bits.
///
/// Signed and unsigned share one implementation: raw lanes are sign- or
/// zero-extended according to `SIGNED`, and the range check biases signed
/// products by `0x8000` so that both reduce to "upper 16 bits are zero".
pub(crate) mod w16 {
    use super::active;
    use crate::backend::Backend;

    #[inline(always)]
    fn widen<const SIGNED: bool>(v: u16) -> u32 {
        if SIGNED {
            v as i16 as i32 as u32
        } else {
            u32::from(v)
        }
    }

    #[inline(always)]
    fn is_valid<const SIGNED: bool>(c: u32, a_inv: u32) -> bool {
        let d = c.wrapping_mul(a_inv);
        let biased = if SIGNED { d.wrapping_add(0x8000) } else { d };
        biased >> 16 == 0
    }

    fn encode_scalar<const SIGNED: bool>(a: u32, raw: &[u16], out: &mut [u32]) {
        for (r, o) in raw.iter().zip(out.iter_mut()) {
            *o = widen::<SIGNED>(*r).wrapping_mul(a);
        }
    }

    fn check_scalar<const SIGNED: bool>(a_inv: u32, encoded: &[u32]) -> Option<usize> {
        encoded.iter().position(|&c| !is_valid::<SIGNED>(c, a_inv))
    }

    fn decode_scalar(a_inv: u32, encoded: &[u32], out: &mut [u16]) {
        for (c, o) in encoded.iter().zip(out.iter_mut()) {
            *o = c.wrapping_mul(a_inv) as u16;
        }
    }

    pub(crate) fn encode<const SIGNED: bool>(backend: Backend, a: u32, raw: &[u16], out: &mut [u32]) {
        assert_eq!(raw.len(), out.len(), "source and destination lengths differ");
        match active(backend) {
            // SAFETY: `active` only returns backends the CPU supports.
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Sse42 => unsafe { x86::encode_sse42::<SIGNED>(a, raw, out) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx2 => unsafe { x86::encode_avx2::<SIGNED>(a, raw, out) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx512 => unsafe { x86::encode_avx512::<SIGNED>(a, raw, out) },
            _ => encode_scalar::<SIGNED>(a, raw, out),
        }
    }

    pub(crate) fn check<const SIGNED: bool>(backend: Backend, a_inv: u32, encoded: &[u32]) -> Option<usize> {
        match active(backend) {
            // SAFETY: `active` only returns backends the CPU supports.
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Sse42 => unsafe { x86::check_sse42::<SIGNED>(a_inv, encoded) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx2 => unsafe { x86::check_avx2::<SIGNED>(a_inv, encoded) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx512 => unsafe { x86::check_avx512::<SIGNED>(a_inv, encoded) },
            _ => check_scalar::<SIGNED>(a_inv, encoded),
        }
    }

    pub(crate) fn decode(backend: Backend, a_inv: u32, encoded: &[u32], out: &mut [u16]) {
        assert_eq!(encoded.len(), out.len(), "source and destination lengths differ");
        match active(backend) {
            // SAFETY: `active` only returns backends the CPU supports.
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Sse42 => unsafe { x86::decode_sse42(a_inv, encoded, out) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx2 => unsafe { x86::decode_avx2(a_inv, encoded, out) },
            #[cfg(all(feature = "simd", target_arch = "x86_64"))]
            Backend::Avx512 => unsafe { x86::decode_avx512(a_inv, encoded, out) },
            _ => decode_scalar(a_inv, encoded, out),
        }
    }

    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    mod x86 {
        use super::{check_scalar, decode_scalar, encode_scalar};
        use crate::backend::UNROLL;
        use std::arch::x86_64::*;

        // ---------------------------------------------------------------------
        // SSE4.2: 4 lanes
        // ---------------------------------------------------------------------

        #[inline]
        #[target_feature(enable = "sse4.2")]
        unsafe fn encode_4<const SIGNED: bool>(src: *const u16, dst: *mut u32, va: __m128i) {
            let v = _mm_loadl_epi64(src as *const __m128i);
            let wide = if SIGNED {
                _mm_cvtepi16_epi32(v)
            } else {
                _mm_cvtepu16_epi32(v)
            };
            _mm_storeu_si128(dst as *mut __m128i, _mm_mullo_epi32(wide, va));
        }

        /// Upper 16 bits of the (biased) decoded lanes; zero iff all lanes are valid.
        #[inline]
        #[target_feature(enable = "sse4.2")]
        unsafe fn overflow_4(src: *const u32, vinv: __m128i, bias: __m128i) -> __m128i {
            let d = _mm_mullo_epi32(_mm_loadu_si128(src as *const __m128i), vinv);
            _mm_srli_epi32(_mm_add_epi32(d, bias), 16)
        }

        #[inline]
        #[target_feature(enable = "sse4.2")]
        unsafe fn decode_4(src: *const u32, dst: *mut u16, vinv: __m128i, mask: __m128i) {
            let d = _mm_mullo_epi32(_mm_loadu_si128(src as *const __m128i), vinv);
            let low = _mm_and_si128(d, mask);
            _mm_storel_epi64(dst as *mut __m128i, _mm_packus_epi32(low, low));
        }

        #[target_feature(enable = "sse4.2")]
        pub(super) unsafe fn encode_sse42<const SIGNED: bool>(a: u32, raw: &[u16], out: &mut [u32]) {
            let len = raw.len();
            let va = _mm_set1_epi32(a as i32);
            let src = raw.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 4 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                encode_4::<SIGNED>(src.add(i), dst.add(i), va);
                encode_4::<SIGNED>(src.add(i + 4), dst.add(i + 4), va);
                encode_4::<SIGNED>(src.add(i + 8), dst.add(i + 8), va);
                encode_4::<SIGNED>(src.add(i + 12), dst.add(i + 12), va);
                i += block;
            }
            let lanes_end = len / 4 * 4;
            while i < lanes_end {
                encode_4::<SIGNED>(src.add(i), dst.add(i), va);
                i += 4;
            }
            encode_scalar::<SIGNED>(a, &raw[i..], &mut out[i..]);
        }

        #[target_feature(enable = "sse4.2")]
        pub(super) unsafe fn check_sse42<const SIGNED: bool>(a_inv: u32, encoded: &[u32]) -> Option<usize> {
            let len = encoded.len();
            let vinv = _mm_set1_epi32(a_inv as i32);
            let bias = _mm_set1_epi32(if SIGNED { 0x8000 } else { 0 });
            let src = encoded.as_ptr();

            let block = 4 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                let h0 = overflow_4(src.add(i), vinv, bias);
                let h1 = overflow_4(src.add(i + 4), vinv, bias);
                let h2 = overflow_4(src.add(i + 8), vinv, bias);
                let h3 = overflow_4(src.add(i + 12), vinv, bias);
                let any = _mm_or_si128(_mm_or_si128(h0, h1), _mm_or_si128(h2, h3));
                if _mm_testz_si128(any, any) == 0 {
                    return check_scalar::<SIGNED>(a_inv, &encoded[i..i + block]).map(|j| i + j);
                }
                i += block;
            }
            let lanes_end = len / 4 * 4;
            while i < lanes_end {
                let h = overflow_4(src.add(i), vinv, bias);
                if _mm_testz_si128(h, h) == 0 {
                    return check_scalar::<SIGNED>(a_inv, &encoded[i..i + 4]).map(|j| i + j);
                }
                i += 4;
            }
            check_scalar::<SIGNED>(a_inv, &encoded[i..]).map(|j| i + j)
        }

        #[target_feature(enable = "sse4.2")]
        pub(super) unsafe fn decode_sse42(a_inv: u32, encoded: &[u32], out: &mut [u16]) {
            let len = encoded.len();
            let vinv = _mm_set1_epi32(a_inv as i32);
            let mask = _mm_set1_epi32(0xFFFF);
            let src = encoded.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 4 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                decode_4(src.add(i), dst.add(i), vinv, mask);
                decode_4(src.add(i + 4), dst.add(i + 4), vinv, mask);
                decode_4(src.add(i + 8), dst.add(i + 8), vinv, mask);
                decode_4(src.add(i + 12), dst.add(i + 12), vinv, mask);
                i += block;
            }
            let lanes_end = len / 4 * 4;
            while i < lanes_end {
                decode_4(src.add(i), dst.add(i), vinv, mask);
                i += 4;
            }
            decode_scalar(a_inv, &encoded[i..], &mut out[i..]);
        }

        // ---------------------------------------------------------------------
        // AVX2: 8 lanes
        // ---------------------------------------------------------------------

        #[inline]
        #[target_feature(enable = "avx2")]
        unsafe fn encode_8<const SIGNED: bool>(src: *const u16, dst: *mut u32, va: __m256i) {
            let v = _mm_loadu_si128(src as *const __m128i);
            let wide = if SIGNED {
                _mm256_cvtepi16_epi32(v)
            } else {
                _mm256_cvtepu16_epi32(v)
            };
            _mm256_storeu_si256(dst as *mut __m256i, _mm256_mullo_epi32(wide, va));
        }

        #[inline]
        #[target_feature(enable = "avx2")]
        unsafe fn overflow_8(src: *const u32, vinv: __m256i, bias: __m256i) -> __m256i {
            let d = _mm256_mullo_epi32(_mm256_loadu_si256(src as *const __m256i), vinv);
            _mm256_srli_epi32(_mm256_add_epi32(d, bias), 16)
        }

        #[inline]
        #[target_feature(enable = "avx2")]
        unsafe fn decode_8(src: *const u32, dst: *mut u16, vinv: __m256i, mask: __m256i) {
            let d = _mm256_mullo_epi32(_mm256_loadu_si256(src as *const __m256i), vinv);
            let low = _mm256_and_si256(d, mask);
            // packus works per 128-bit half; gather the two useful quadwords
            let packed = _mm256_permute4x64_epi64(_mm256_packus_epi32(low, low), 0b11_01_10_00);
            _mm_storeu_si128(dst as *mut __m128i, _mm256_castsi256_si128(packed));
        }

        #[target_feature(enable = "avx2")]
        pub(super) unsafe fn encode_avx2<const SIGNED: bool>(a: u32, raw: &[u16], out: &mut [u32]) {
            let len = raw.len();
            let va = _mm256_set1_epi32(a as i32);
            let src = raw.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 8 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                encode_8::<SIGNED>(src.add(i), dst.add(i), va);
                encode_8::<SIGNED>(src.add(i + 8), dst.add(i + 8), va);
                encode_8::<SIGNED>(src.add(i + 16), dst.add(i + 16), va);
                encode_8::<SIGNED>(src.add(i + 24), dst.add(i + 24), va);
                i += block;
            }
            let lanes_end = len / 8 * 8;
            while i < lanes_end {
                encode_8::<SIGNED>(src.add(i), dst.add(i), va);
                i += 8;
            }
            encode_scalar::<SIGNED>(a, &raw[i..], &mut out[i..]);
        }

        #[target_feature(enable = "avx2")]
        pub(super) unsafe fn check_avx2<const SIGNED: bool>(a_inv: u32, encoded: &[u32]) -> Option<usize> {
            let len = encoded.len();
            let vinv = _mm256_set1_epi32(a_inv as i32);
            let bias = _mm256_set1_epi32(if SIGNED { 0x8000 } else { 0 });
            let src = encoded.as_ptr();

            let block = 8 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                let h0 = overflow_8(src.add(i), vinv, bias);
                let h1 = overflow_8(src.add(i + 8), vinv, bias);
                let h2 = overflow_8(src.add(i + 16), vinv, bias);
                let h3 = overflow_8(src.add(i + 24), vinv, bias);
                let any = _mm256_or_si256(_mm256_or_si256(h0, h1), _mm256_or_si256(h2, h3));
                if _mm256_testz_si256(any, any) == 0 {
                    return check_scalar::<SIGNED>(a_inv, &encoded[i..i + block]).map(|j| i + j);
                }
                i += block;
            }
            let lanes_end = len / 8 * 8;
            while i < lanes_end {
                let h = overflow_8(src.add(i), vinv, bias);
                if _mm256_testz_si256(h, h) == 0 {
                    return check_scalar::<SIGNED>(a_inv, &encoded[i..i + 8]).map(|j| i + j);
                }
                i += 8;
            }
            check_scalar::<SIGNED>(a_inv, &encoded[i..]).map(|j| i + j)
        }

        #[target_feature(enable = "avx2")]
        pub(super) unsafe fn decode_avx2(a_inv: u32, encoded: &[u32], out: &mut [u16]) {
            let len = encoded.len();
            let vinv = _mm256_set1_epi32(a_inv as i32);
            let mask = _mm256_set1_epi32(0xFFFF);
            let src = encoded.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 8 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                decode_8(src.add(i), dst.add(i), vinv, mask);
                decode_8(src.add(i + 8), dst.add(i + 8), vinv, mask);
                decode_8(src.add(i + 16), dst.add(i + 16), vinv, mask);
                decode_8(src.add(i + 24), dst.add(i + 24), vinv, mask);
                i += block;
            }
            let lanes_end = len / 8 * 8;
            while i < lanes_end {
                decode_8(src.add(i), dst.add(i), vinv, mask);
                i += 8;
            }
            decode_scalar(a_inv, &encoded[i..], &mut out[i..]);
        }

        // ---------------------------------------------------------------------
        // AVX-512: 16 lanes
        // ---------------------------------------------------------------------

        #[inline]
        #[target_feature(enable = "avx512f")]
        unsafe fn encode_16<const SIGNED: bool>(src: *const u16, dst: *mut u32, va: __m512i) {
            let v = _mm256_loadu_si256(src as *const __m256i);
            let wide = if SIGNED {
                _mm512_cvtepi16_epi32(v)
            } else {
                _mm512_cvtepu16_epi32(v)
            };
            _mm512_storeu_si512(dst as *mut __m512i, _mm512_mullo_epi32(wide, va));
        }

        #[inline]
        #[target_feature(enable = "avx512f")]
        unsafe fn overflow_16(src: *const u32, vinv: __m512i, bias: __m512i) -> __mmask16 {
            let d = _mm512_mullo_epi32(_mm512_loadu_si512(src as *const __m512i), vinv);
            let high = _mm512_srli_epi32(_mm512_add_epi32(d, bias), 16);
            _mm512_test_epi32_mask(high, high)
        }

        #[inline]
        #[target_feature(enable = "avx512f")]
        unsafe fn decode_16(src: *const u32, dst: *mut u16, vinv: __m512i) {
            let d = _mm512_mullo_epi32(_mm512_loadu_si512(src as *const __m512i), vinv);
            // vpmovdw truncates each lane to its low 16 bits
            _mm256_storeu_si256(dst as *mut __m256i, _mm512_cvtepi32_epi16(d));
        }

        #[target_feature(enable = "avx512f")]
        pub(super) unsafe fn encode_avx512<const SIGNED: bool>(a: u32, raw: &[u16], out: &mut [u32]) {
            let len = raw.len();
            let va = _mm512_set1_epi32(a as i32);
            let src = raw.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 16 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                encode_16::<SIGNED>(src.add(i), dst.add(i), va);
                encode_16::<SIGNED>(src.add(i + 16), dst.add(i + 16), va);
                encode_16::<SIGNED>(src.add(i + 32), dst.add(i + 32), va);
                encode_16::<SIGNED>(src.add(i + 48), dst.add(i + 48), va);
                i += block;
            }
            let lanes_end = len / 16 * 16;
            while i < lanes_end {
                encode_16::<SIGNED>(src.add(i), dst.add(i), va);
                i += 16;
            }
            encode_scalar::<SIGNED>(a, &raw[i..], &mut out[i..]);
        }

        #[target_feature(enable = "avx512f")]
        pub(super) unsafe fn check_avx512<const SIGNED: bool>(a_inv: u32, encoded: &[u32]) -> Option<usize> {
            let len = encoded.len();
            let vinv = _mm512_set1_epi32(a_inv as i32);
            let bias = _mm512_set1_epi32(if SIGNED { 0x8000 } else { 0 });
            let src = encoded.as_ptr();

            let block = 16 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                let m = overflow_16(src.add(i), vinv, bias)
                    | overflow_16(src.add(i + 16), vinv, bias)
                    | overflow_16(src.add(i + 32), vinv, bias)
                    | overflow_16(src.add(i + 48), vinv, bias);
                if m != 0 {
                    return check_scalar::<SIGNED>(a_inv, &encoded[i..i + block]).map(|j| i + j);
                }
                i += block;
            }
            let lanes_end = len / 16 * 16;
            while i < lanes_end {
                let m = overflow_16(src.add(i), vinv, bias);
                if m != 0 {
                    return Some(i + m.trailing_zeros() as usize);
                }
                i += 16;
            }
            check_scalar::<SIGNED>(a_inv, &encoded[i..]).map(|j| i + j)
        }

        #[target_feature(enable = "avx512f")]
        pub(super) unsafe fn decode_avx512(a_inv: u32, encoded: &[u32], out: &mut [u16]) {
            let len = encoded.len();
            let vinv = _mm512_set1_epi32(a_inv as i32);
            let src = encoded.as_ptr();
            let dst = out.as_mut_ptr();

            let block = 16 * UNROLL;
            let blocks_end = len / block * block;
            let mut i = 0;
            while i < blocks_end {
                decode_16(src.add(i), dst.add(i), vinv);
                decode_16(src.add(i + 16), dst.add(i + 16), vinv);
                decode_16(src.add(i + 32), dst.add(i + 32), vinv);
                decode_16(src.add(i + 48), dst.add(i + 48), vinv);
                i += block;
            }
            let lanes_end = len / 16 * 16;
            while i < lanes_end {
                decode_16(src.add(i), dst.add(i), vinv);
                i += 16;
            }
            decode_scalar(a_inv, &encoded[i..], &mut out[i..]);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const A: u32 = 63877;
        const A_INV: u32 = 3_510_769_485;

        #[test]
        fn test_w16_scalar_matches_codec() {
            let codec = crate::AnCodec::<u16>::new(u64::from(A)).unwrap();
            let raw: Vec<u16> = (0..=u16::MAX).step_by(97).collect();
            let mut out = vec![0u32; raw.len()];
            encode_scalar::<false>(A, &raw, &mut out);
            for (r, c) in raw.iter().zip(&out) {
                assert_eq!(*c, codec.encode(*r));
                assert!(is_valid::<false>(*c, A_INV));
            }
        }

        #[test]
        fn test_w16_signed_bias() {
            // -32768 and 32767 are the edges of the signed range
            for v in [i16::MIN, -1, 0, 1, i16::MAX] {
                let c = widen::<true>(v as u16).wrapping_mul(A);
                assert!(is_valid::<true>(c, A_INV), "v={v}");
                assert_eq!(c.wrapping_mul(A_INV) as u16 as i16, v);
            }
            // 32768 decoded as signed is out of range
            let c = 32768u32.wrapping_mul(A);
            assert!(!is_valid::<true>(c, A_INV));
            assert!(is_valid::<false>(c, A_INV));
        }

        #[test]
        fn test_w16_all_backends_agree() {
            let raw: Vec<u16> = (0..1000u32).map(|i| (i * 7919 % 65536) as u16).collect();
            let mut expected = vec![0u32; raw.len()];
            encode_scalar::<false>(A, &raw, &mut expected);

            for backend in Backend::ALL {
                for len in [0usize, 1, 3, 4, 5, 15, 16, 17, 63, 64, 65, 1000] {
                    let mut out = vec![0u32; len];
                    encode::<false>(backend, A, &raw[..len], &mut out);
                    assert_eq!(out, expected[..len], "{backend} len={len}");

                    let mut decoded = vec![0u16; len];
                    decode(backend, A_INV, &out, &mut decoded);
                    assert_eq!(decoded, raw[..len], "{backend} len={len}");

                    assert_eq!(check::<false>(backend, A_INV, &out), None);
                    if len > 0 {
                        let mut bad = out.clone();
                        bad[len - 1] ^= 1 << 20;
                        assert_eq!(check::<false>(backend, A_INV, &bad), Some(len - 1));
                    }
                }
            }
        }
    }
}
