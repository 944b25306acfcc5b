//! # Arithmetic on Encoded Data
//!
//! AN-codes are closed under addition and subtraction of codewords and under
//! multiplication by an uncoded integer:
//!
//! ```text
//!   vA + cA = (v + c)A      vA - cA = (v - c)A      vA * c = (vc)A
//! ```
//!
//! so those operations run directly on codewords. Division is not closed
//! and goes through decode, divide, encode. Results that leave the raw
//! range are not caught here; a following check reports them.

use std::fmt;

use crate::codec::{AnCodec, AnWord};
use crate::Error;

/// An arithmetic operation with a raw (uncoded) operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation<R> {
    Add(R),
    Sub(R),
    Mul(R),
    Div(R),
}

impl<R: AnWord> Operation<R> {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add(_) => "add",
            Operation::Sub(_) => "sub",
            Operation::Mul(_) => "mul",
            Operation::Div(_) => "div",
        }
    }

    /// The raw operand.
    pub fn operand(&self) -> R {
        match *self {
            Operation::Add(c) | Operation::Sub(c) | Operation::Mul(c) | Operation::Div(c) => c,
        }
    }

    /// Resolve the operand against `codec` once, ahead of a batch pass.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOperand` for division by zero.
    pub(crate) fn prepare(self, codec: &AnCodec<R>) -> Result<Prepared<R>, Error> {
        Ok(match self {
            Operation::Add(c) => Prepared::Add(codec.encode(c)),
            Operation::Sub(c) => Prepared::Sub(codec.encode(c)),
            Operation::Mul(c) => Prepared::Mul(c.widen()),
            Operation::Div(c) if c.is_zero() => return Err(Error::InvalidOperand),
            Operation::Div(c) => Prepared::Div(c),
        })
    }

    /// Apply to a single codeword.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOperand` for division by zero.
    pub fn apply(self, codec: &AnCodec<R>, enc: R::Enc) -> Result<R::Enc, Error> {
        Ok(self.prepare(codec)?.apply(codec, enc))
    }
}

impl<R: AnWord> fmt::Display for Operation<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.name(), self.operand())
    }
}

/// Operation with its operand already in the form the loop needs.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Prepared<R: AnWord> {
    /// Encoded addend.
    Add(R::Enc),
    /// Encoded subtrahend.
    Sub(R::Enc),
    /// Widened, unencoded factor.
    Mul(R::Enc),
    /// Raw, non-zero divisor.
    Div(R),
}

impl<R: AnWord> Prepared<R> {
    #[inline(always)]
    pub(crate) fn apply(self, codec: &AnCodec<R>, enc: R::Enc) -> R::Enc {
        match self {
            Prepared::Add(c) => R::enc_add(enc, c),
            Prepared::Sub(c) => R::enc_sub(enc, c),
            Prepared::Mul(c) => R::enc_mul(enc, c),
            Prepared::Div(c) => codec.encode(codec.decode(enc).wrapping_div(c)),
        }
    }
}
