//! # XOR Checksum Codec
//!
//! Baseline for comparing AN-coding throughput. The raw buffer is cut into
//! blocks of `block_size` values and each block is followed by the XOR of
//! its values:
//!
//! ```text
//!   raw:      v0 v1 v2 v3 | v4 v5 v6 v7 | v8 v9
//!   encoded:  v0 v1 v2 v3 x0 v4 v5 v6 v7 x1 v8 v9 x2
//! ```
//!
//! The checksum only covers storage. Arithmetic on the encoded buffer is
//! not possible, and two flips of the same bit inside one block cancel out.

use crate::codec::AnWord;
use crate::{Error, ErrorSignal};

/// Context attached to signals raised by [`XorCodec::check`].
pub const XOR_CONTEXT: &str = "xor checksum";

/// Block-wise XOR checksum over raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XorCodec<T> {
    block_size: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: AnWord> XorCodec<T> {
    /// # Errors
    ///
    /// Returns `Error::InvalidParams` if `block_size` is zero.
    pub fn new(block_size: usize) -> Result<Self, Error> {
        if block_size == 0 {
            return Err(Error::InvalidParams);
        }
        Ok(Self {
            block_size,
            _marker: std::marker::PhantomData,
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Encoded length for `raw_len` values: one checksum per started block.
    #[inline]
    pub fn encoded_len(&self, raw_len: usize) -> usize {
        raw_len + raw_len.div_ceil(self.block_size)
    }

    /// Raw length carried by an encoded buffer of `encoded_len` values.
    #[inline]
    pub fn decoded_len(&self, encoded_len: usize) -> usize {
        encoded_len - encoded_len.div_ceil(self.block_size + 1)
    }

    fn checksum(block: &[T]) -> T {
        block.iter().fold(T::default(), |acc, &v| acc ^ v)
    }

    /// Copy `raw` into `encoded`, appending a checksum after every block.
    ///
    /// # Panics
    ///
    /// If `encoded.len() != self.encoded_len(raw.len())`.
    pub fn encode(&self, raw: &[T], encoded: &mut [T]) {
        assert_eq!(
            encoded.len(),
            self.encoded_len(raw.len()),
            "encoded buffer has the wrong length"
        );
        for (block, out) in raw
            .chunks(self.block_size)
            .zip(encoded.chunks_mut(self.block_size + 1))
        {
            let (data, sum) = out.split_at_mut(block.len());
            data.copy_from_slice(block);
            sum[0] = Self::checksum(block);
        }
    }

    /// Recompute every block checksum, stopping at the first mismatch.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorSignal`] whose offset is the position of the failing
    /// block's checksum in `encoded`.
    pub fn check(&self, encoded: &[T], iteration: usize) -> Result<(), ErrorSignal> {
        let stride = self.block_size + 1;
        for (i, block) in encoded.chunks(stride).enumerate() {
            let (sum, data) = match block.split_last() {
                Some(parts) => parts,
                None => continue,
            };
            if Self::checksum(data) != *sum {
                let offset = i * stride + data.len();
                return Err(ErrorSignal::new(offset, iteration).with_context(XOR_CONTEXT));
            }
        }
        Ok(())
    }

    /// Strip the checksums. Does not validate.
    ///
    /// # Panics
    ///
    /// If `raw.len() != self.decoded_len(encoded.len())`.
    pub fn decode(&self, encoded: &[T], raw: &mut [T]) {
        assert_eq!(
            raw.len(),
            self.decoded_len(encoded.len()),
            "raw buffer has the wrong length"
        );
        for (block, out) in encoded
            .chunks(self.block_size + 1)
            .zip(raw.chunks_mut(self.block_size))
        {
            out.copy_from_slice(&block[..out.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_parity() {
        let codec = XorCodec::<u8>::new(4).unwrap();
        let raw = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66];

        let mut encoded = vec![0u8; codec.encoded_len(raw.len())];
        assert_eq!(encoded.len(), 8);
        codec.encode(&raw, &mut encoded);

        // Each block is followed by the XOR of its values
        assert_eq!(&encoded[..4], &raw[..4]);
        assert_eq!(encoded[4], 0x11 ^ 0x22 ^ 0x33 ^ 0x44);
        assert_eq!(&encoded[5..7], &raw[4..]);
        assert_eq!(encoded[7], 0x55 ^ 0x66);
    }

    #[test]
    fn test_round_trip() {
        let codec = XorCodec::<i32>::new(7).unwrap();
        for len in [0usize, 1, 6, 7, 8, 100] {
            let raw: Vec<i32> = (0..len as i32).map(|i| i.wrapping_mul(-40503)).collect();
            let mut encoded = vec![0; codec.encoded_len(len)];
            codec.encode(&raw, &mut encoded);
            assert!(codec.check(&encoded, 0).is_ok());

            assert_eq!(codec.decoded_len(encoded.len()), len);
            let mut result = vec![0; len];
            codec.decode(&encoded, &mut result);
            assert_eq!(raw, result);
        }
    }

    #[test]
    fn test_check_reports_checksum_slot() {
        let codec = XorCodec::<u16>::new(4).unwrap();
        let raw: Vec<u16> = (1..=10).collect();
        let mut encoded = vec![0; codec.encoded_len(raw.len())];
        codec.encode(&raw, &mut encoded);

        // Corrupt a value in the second block (encoded indices 5..=9)
        encoded[6] ^= 0x0100;
        let err = codec.check(&encoded, 3).unwrap_err();
        assert_eq!(err.offset(), 9);
        assert_eq!(err.iteration(), 3);
        assert_eq!(err.context(), Some(XOR_CONTEXT));

        // An earlier block wins
        encoded[0] ^= 1;
        assert_eq!(codec.check(&encoded, 3).unwrap_err().offset(), 4);
    }

    #[test]
    fn test_corrupt_tail_block() {
        let codec = XorCodec::<u32>::new(4).unwrap();
        let raw = [1u32, 2, 3, 4, 5];
        let mut encoded = vec![0; codec.encoded_len(raw.len())];
        codec.encode(&raw, &mut encoded);

        encoded[6] ^= 0x8000_0000;
        assert_eq!(codec.check(&encoded, 0).unwrap_err().offset(), 6);
    }

    #[test]
    fn test_paired_flips_cancel() {
        let codec = XorCodec::<u8>::new(4).unwrap();
        let mut encoded = vec![0u8; 5];
        codec.encode(&[1, 2, 3, 4], &mut encoded);
        encoded[0] ^= 0x10;
        encoded[2] ^= 0x10;
        assert!(codec.check(&encoded, 0).is_ok());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        assert_eq!(XorCodec::<u8>::new(0), Err(Error::InvalidParams));
    }
}
