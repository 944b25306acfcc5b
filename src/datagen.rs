//! Deterministic test data for benchmark runs.
//!
//! Values come from a seeded [`StdRng`], so two runs with the same
//! configuration see the same input. Masking low or high bits to zero
//! models columns with small magnitudes or aligned values.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::AnWord;
use crate::Error;

/// Shape of generated raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataGenConfig {
    zero_low_bits: u32,
    zero_high_bits: u32,
    seed: u64,
}

impl Default for DataGenConfig {
    fn default() -> Self {
        Self {
            zero_low_bits: 0,
            zero_high_bits: 0,
            seed: 0x5EED,
        }
    }
}

impl DataGenConfig {
    /// Clear `zero_low_bits` low and `zero_high_bits` high bits of every value.
    pub fn new(zero_low_bits: u32, zero_high_bits: u32) -> Self {
        Self {
            zero_low_bits,
            zero_high_bits,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[inline]
    pub fn zero_low_bits(&self) -> u32 {
        self.zero_low_bits
    }

    #[inline]
    pub fn zero_high_bits(&self) -> u32 {
        self.zero_high_bits
    }

    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Check the masks against the width of `R`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParams` if more bits are masked than `R` has.
    pub fn validate<R: AnWord>(&self) -> Result<(), Error> {
        match self.zero_low_bits.checked_add(self.zero_high_bits) {
            Some(masked) if masked <= R::BITS => Ok(()),
            _ => Err(Error::InvalidParams),
        }
    }

    /// Bits of an `R` that survive masking.
    fn mask<R: AnWord>(&self) -> u64 {
        let kept = R::BITS - self.zero_high_bits;
        let upper = if kept >= 64 { u64::MAX } else { (1u64 << kept) - 1 };
        let lower = if self.zero_low_bits >= 64 {
            0
        } else {
            u64::MAX << self.zero_low_bits
        };
        upper & lower
    }

    /// Overwrite `buf` with the configured sequence.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParams` if the configuration does not fit `R`.
    pub fn fill<R: AnWord>(&self, buf: &mut [R]) -> Result<(), Error> {
        self.validate::<R>()?;
        let mask = self.mask::<R>();
        let mut rng = StdRng::seed_from_u64(self.seed);
        for v in buf.iter_mut() {
            *v = R::from_bits(rng.gen::<u64>() & mask);
        }
        tracing::trace!(
            len = buf.len(),
            ty = R::NAME,
            mask,
            "generated raw data"
        );
        Ok(())
    }
}
