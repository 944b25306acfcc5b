//! AN-coding - arithmetic error detection for integer columns
//!
//! A raw integer `v` is protected by storing `v * A` in an integer of twice
//! the width, for an odd constant `A`. Corruption shows up as a value that
//! is no longer a multiple of `A`. Codewords still support addition,
//! subtraction and multiplication by plain integers, so data can be
//! processed without decoding.
//!
//! This crate provides the codec, batch drivers with scalar and x86 SIMD
//! (SSE4.2, AVX2, AVX-512) kernels, an XOR checksum baseline, and the
//! `an-bench` throughput benchmark.
//!
//! # Example
//!
//! ```rust
//! use ancode::{AnCodec, Backend, BatchCodec, Capabilities};
//!
//! let codec = AnCodec::<u16>::new(63877).unwrap();
//! let batch = BatchCodec::new(codec, Backend::best(Capabilities::get())).unwrap();
//!
//! let raw = [0u16, 1, 65535, 12783];
//! let mut encoded = [0u32; 4];
//! batch.run_encode(&raw, &mut encoded);
//! assert!(batch.run_check(&encoded, 0).is_ok());
//!
//! // Corrupt one codeword: the check stops at it
//! encoded[2] += 1;
//! let err = batch.run_check(&encoded, 0).unwrap_err();
//! assert_eq!(err.offset(), 2);
//! ```

use std::fmt;

pub mod arith;
pub mod backend;
pub mod batch;
pub mod codec;
pub mod datagen;
pub mod inverse;
mod simd;
pub mod xor;

pub use arith::Operation;
pub use backend::{Backend, Capabilities};
pub use batch::BatchCodec;
pub use codec::{AnCodec, AnWord, CheckPolicy};
pub use datagen::DataGenConfig;
pub use inverse::modular_inverse;
pub use xor::XorCodec;

/// Error type for codec configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The constant is zero or even, so it has no inverse modulo 2^W
    NoInverseExists,
    /// Modulus width outside 1..=64
    InvalidWidth,
    /// The constant does not fit the raw width
    ConstantOutOfRange,
    /// The requested backend is not supported by this CPU or build
    BackendUnavailable(Backend),
    /// The worker thread pool could not be created
    ThreadPool,
    /// Invalid parameter values (zero sizes, too many masked bits)
    InvalidParams,
    /// Operand not allowed for the operation (division by zero)
    InvalidOperand,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoInverseExists => write!(f, "constant has no inverse modulo 2^W (zero or even)"),
            Error::InvalidWidth => write!(f, "modulus width must be within 1..=64"),
            Error::ConstantOutOfRange => write!(f, "constant does not fit the raw width"),
            Error::BackendUnavailable(backend) => write!(f, "backend {backend} is not available"),
            Error::ThreadPool => write!(f, "failed to build worker thread pool"),
            Error::InvalidParams => write!(f, "invalid parameters"),
            Error::InvalidOperand => write!(f, "invalid operand"),
        }
    }
}

impl std::error::Error for Error {}

/// First corrupted element found by a check.
///
/// Carries the element's index in the checked buffer and the benchmark
/// iteration that found it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSignal {
    offset: usize,
    iteration: usize,
    context: Option<&'static str>,
}

impl ErrorSignal {
    #[inline]
    pub fn new(offset: usize, iteration: usize) -> Self {
        Self {
            offset,
            iteration,
            context: None,
        }
    }

    /// Attach a short description of what was being checked.
    #[inline]
    pub fn with_context(mut self, context: &'static str) -> Self {
        self.context = Some(context);
        self
    }

    /// Zero-based index of the corrupted element.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    #[inline]
    pub fn context(&self) -> Option<&'static str> {
        self.context
    }
}

impl fmt::Display for ErrorSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "corrupted element at offset {} (iteration {})",
            self.offset, self.iteration
        )?;
        if let Some(context) = self.context {
            write!(f, ": {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorSignal {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_signal_accessors() {
        let signal = ErrorSignal::new(7, 3);
        assert_eq!(signal.offset(), 7);
        assert_eq!(signal.iteration(), 3);
        assert_eq!(signal.context(), None);
        assert_eq!(signal.to_string(), "corrupted element at offset 7 (iteration 3)");

        let signal = signal.with_context("AN check");
        assert_eq!(signal.context(), Some("AN check"));
        assert!(signal.to_string().ends_with(": AN check"));
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::BackendUnavailable(Backend::Avx512).to_string(),
            "backend avx512 is not available"
        );
        assert!(Error::NoInverseExists.to_string().contains("even"));
    }
}
