//! # Batch Codec
//!
//! Applies an [`AnCodec`] to whole buffers on a chosen [`Backend`], optionally
//! spreading the index range over a fixed-size worker pool.
//!
//! ```text
//!   raw ──run_encode──▶ encoded ──run_check──▶ Ok / ErrorSignal(first offset)
//!                          │
//!                          └──run_decode──▶ result
//! ```
//!
//! `run_check` is fail-fast: it reports the lowest corrupted index and
//! nothing else. `run_decode` never validates, so callers that need
//! assurance check first.
//!
//! ## Example
//!
//! ```rust
//! use ancode::{AnCodec, Backend, BatchCodec};
//!
//! let batch = BatchCodec::new(AnCodec::<u8>::new(233).unwrap(), Backend::Scalar).unwrap();
//! let raw: Vec<u8> = (0..=255).collect();
//! let mut encoded = vec![0u16; raw.len()];
//! let mut result = vec![0u8; raw.len()];
//!
//! batch.run_encode(&raw, &mut encoded);
//! batch.run_check(&encoded, 0).unwrap();
//! batch.run_decode(&encoded, &mut result);
//! assert_eq!(raw, result);
//! ```

use rayon::prelude::*;

use crate::arith::{Operation, Prepared};
use crate::backend::{Backend, Capabilities};
use crate::codec::{AnCodec, AnWord};
use crate::{simd, Error, ErrorSignal};

/// Smallest slice handed to a single worker.
const MIN_PARALLEL_CHUNK: usize = 16 * 1024;

/// Buffer-level driver for one codec and backend.
#[derive(Debug)]
pub struct BatchCodec<R: AnWord> {
    codec: AnCodec<R>,
    backend: Backend,
    pool: Option<rayon::ThreadPool>,
}

impl<R: AnWord> BatchCodec<R> {
    /// Single-threaded driver on `backend`, checked against this CPU.
    ///
    /// # Errors
    ///
    /// Returns `Error::BackendUnavailable` if the CPU or build lacks `backend`.
    pub fn new(codec: AnCodec<R>, backend: Backend) -> Result<Self, Error> {
        Self::with_capabilities(codec, backend, Capabilities::get())
    }

    /// Like [`BatchCodec::new`], against an explicit capability snapshot.
    ///
    /// A snapshot can only narrow what the CPU offers; kernels still verify
    /// the running CPU before using vector instructions.
    pub fn with_capabilities(
        codec: AnCodec<R>,
        backend: Backend,
        caps: &Capabilities,
    ) -> Result<Self, Error> {
        if !backend.is_available(caps) {
            return Err(Error::BackendUnavailable(backend));
        }
        Ok(Self {
            codec,
            backend,
            pool: None,
        })
    }

    /// Split every batch operation over `threads` workers.
    ///
    /// `threads <= 1` keeps the driver single-threaded.
    ///
    /// # Errors
    ///
    /// Returns `Error::ThreadPool` if the pool cannot be created.
    pub fn with_threads(mut self, threads: usize) -> Result<Self, Error> {
        if threads <= 1 {
            self.pool = None;
            return Ok(self);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ancode-worker-{i}"))
            .build()
            .map_err(|e| {
                tracing::warn!(error = %e, threads, "thread pool creation failed");
                Error::ThreadPool
            })?;
        tracing::debug!(threads, backend = %self.backend, "batch codec using worker pool");
        self.pool = Some(pool);
        Ok(self)
    }

    #[inline]
    pub fn codec(&self) -> &AnCodec<R> {
        &self.codec
    }

    #[inline]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Number of workers; 1 when single-threaded.
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    fn chunk_len(&self, len: usize) -> usize {
        let threads = self.threads();
        len.div_ceil(threads).max(MIN_PARALLEL_CHUNK)
    }

    // =========================================================================
    // Serial kernels (one contiguous range)
    // =========================================================================

    fn encode_range(&self, raw: &[R], encoded: &mut [R::Enc]) {
        match self.backend {
            Backend::Scalar => {
                for (r, e) in raw.iter().zip(encoded.iter_mut()) {
                    *e = self.codec.encode(*r);
                }
            }
            backend => R::encode_vector(backend, &self.codec, raw, encoded),
        }
    }

    fn check_range(&self, encoded: &[R::Enc]) -> Option<usize> {
        match self.backend {
            Backend::Scalar => encoded.iter().position(|&c| !self.codec.is_valid(c)),
            backend => R::check_vector(backend, &self.codec, encoded),
        }
    }

    fn decode_range(&self, encoded: &[R::Enc], result: &mut [R]) {
        match self.backend {
            Backend::Scalar => {
                for (e, r) in encoded.iter().zip(result.iter_mut()) {
                    *r = self.codec.decode(*e);
                }
            }
            backend => R::decode_vector(backend, &self.codec, encoded, result),
        }
    }

    fn arithmetic_range(&self, op: Prepared<R>, input: &[R::Enc], output: &mut [R::Enc]) {
        let codec = &self.codec;
        // Resolve the operation once, not per element.
        let backend = self.backend;
        match op {
            Prepared::Add(c) => {
                simd::map::<R::Enc, _, _>(backend, input, output, |x| R::enc_add(x, c));
            }
            Prepared::Sub(c) => {
                simd::map::<R::Enc, _, _>(backend, input, output, |x| R::enc_sub(x, c));
            }
            Prepared::Mul(c) => {
                simd::map::<R::Enc, _, _>(backend, input, output, |x| R::enc_mul(x, c));
            }
            Prepared::Div(_) => {
                simd::map::<R::Enc, _, _>(backend, input, output, |x| op.apply(codec, x));
            }
        }
    }

    fn sum_range(encoded: &[R::Enc]) -> i128 {
        encoded.iter().map(|&c| R::enc_to_i128(c)).sum()
    }

    // =========================================================================
    // Batch operations
    // =========================================================================

    /// Encode every element of `raw` into `encoded`, in order.
    ///
    /// # Panics
    ///
    /// If the buffers differ in length.
    pub fn run_encode(&self, raw: &[R], encoded: &mut [R::Enc]) {
        assert_eq!(raw.len(), encoded.len(), "raw and encoded buffers differ in length");
        match &self.pool {
            Some(pool) if raw.len() > MIN_PARALLEL_CHUNK => {
                let chunk = self.chunk_len(raw.len());
                pool.install(|| {
                    raw.par_chunks(chunk)
                        .zip(encoded.par_chunks_mut(chunk))
                        .for_each(|(r, e)| self.encode_range(r, e));
                });
            }
            _ => self.encode_range(raw, encoded),
        }
    }

    /// Validate `encoded`, stopping at the first corrupted element.
    ///
    /// With a worker pool each chunk reports its own first failure and the
    /// lowest index wins, so the result matches the sequential scan.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorSignal`] with the lowest invalid offset and
    /// `iteration`.
    pub fn run_check(&self, encoded: &[R::Enc], iteration: usize) -> Result<(), ErrorSignal> {
        let first = match &self.pool {
            Some(pool) if encoded.len() > MIN_PARALLEL_CHUNK => {
                let chunk = self.chunk_len(encoded.len());
                pool.install(|| {
                    encoded
                        .par_chunks(chunk)
                        .enumerate()
                        .find_map_first(|(i, c)| self.check_range(c).map(|j| i * chunk + j))
                })
            }
            _ => self.check_range(encoded),
        };
        match first {
            Some(offset) => Err(ErrorSignal::new(offset, iteration)),
            None => Ok(()),
        }
    }

    /// Decode every element of `encoded` into `result` without validating.
    ///
    /// # Panics
    ///
    /// If the buffers differ in length.
    pub fn run_decode(&self, encoded: &[R::Enc], result: &mut [R]) {
        assert_eq!(encoded.len(), result.len(), "encoded and result buffers differ in length");
        match &self.pool {
            Some(pool) if encoded.len() > MIN_PARALLEL_CHUNK => {
                let chunk = self.chunk_len(encoded.len());
                pool.install(|| {
                    encoded
                        .par_chunks(chunk)
                        .zip(result.par_chunks_mut(chunk))
                        .for_each(|(e, r)| self.decode_range(e, r));
                });
            }
            _ => self.decode_range(encoded, result),
        }
    }

    /// Apply `op` to every codeword of `input`, writing codewords to `output`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidOperand` for division by zero; nothing is written.
    ///
    /// # Panics
    ///
    /// If the buffers differ in length.
    pub fn run_arithmetic(
        &self,
        op: Operation<R>,
        input: &[R::Enc],
        output: &mut [R::Enc],
    ) -> Result<(), Error> {
        assert_eq!(input.len(), output.len(), "input and output buffers differ in length");
        let op = op.prepare(&self.codec)?;
        match &self.pool {
            Some(pool) if input.len() > MIN_PARALLEL_CHUNK => {
                let chunk = self.chunk_len(input.len());
                pool.install(|| {
                    input
                        .par_chunks(chunk)
                        .zip(output.par_chunks_mut(chunk))
                        .for_each(|(i, o)| self.arithmetic_range(op, i, o));
                });
            }
            _ => self.arithmetic_range(op, input, output),
        }
        Ok(())
    }

    /// Exact sum of all codewords, which is the codeword of the raw sum.
    ///
    /// Use [`AnCodec::decode_sum`] to recover and verify the raw total.
    pub fn run_sum(&self, encoded: &[R::Enc]) -> i128 {
        match &self.pool {
            Some(pool) if encoded.len() > MIN_PARALLEL_CHUNK => {
                let chunk = self.chunk_len(encoded.len());
                pool.install(|| encoded.par_chunks(chunk).map(Self::sum_range).sum())
            }
            _ => Self::sum_range(encoded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckPolicy;

    const A16: u64 = 63877;

    fn batches<R: AnWord>(a: u64, policy: CheckPolicy) -> Vec<BatchCodec<R>> {
        let codec = AnCodec::<R>::with_policy(a, policy).unwrap();
        Backend::available(Capabilities::get())
            .map(|b| BatchCodec::new(codec, b).unwrap())
            .collect()
    }

    #[test]
    fn test_concrete_scenario() {
        for batch in batches::<u16>(A16, CheckPolicy::Range) {
            let raw = [0u16, 1, 65535, 12783];
            let mut encoded = [0u32; 4];
            batch.run_encode(&raw, &mut encoded);
            assert_eq!(
                encoded,
                [
                    0,
                    63877,
                    (63877u64 * 65535 % (1 << 32)) as u32,
                    (63877u64 * 12783 % (1 << 32)) as u32
                ]
            );

            let mut result = [0u16; 4];
            batch.run_decode(&encoded, &mut result);
            assert_eq!(result, raw);
            assert_eq!(batch.run_check(&encoded, 0), Ok(()));

            encoded[2] += 1;
            let signal = batch.run_check(&encoded, 5).unwrap_err();
            assert_eq!(signal.offset(), 2, "backend {}", batch.backend());
            assert_eq!(signal.iteration(), 5);
        }
    }

    #[test]
    fn test_empty_buffers() {
        for batch in batches::<u32>(A16, CheckPolicy::Range) {
            batch.run_encode(&[], &mut []);
            batch.run_decode(&[], &mut []);
            assert_eq!(batch.run_check(&[], 0), Ok(()));
            assert_eq!(batch.run_sum(&[]), 0);
        }
    }

    #[test]
    fn test_fail_fast_reports_lowest_offset() {
        for batch in batches::<u8>(233, CheckPolicy::Divisibility) {
            let raw: Vec<u8> = (0..500u32).map(|i| (i * 31) as u8).collect();
            let mut encoded = vec![0u16; raw.len()];
            batch.run_encode(&raw, &mut encoded);
            encoded[300] ^= 0x40;
            encoded[17] ^= 0x01;
            encoded[450] ^= 0x80;
            assert_eq!(batch.run_check(&encoded, 0).unwrap_err().offset(), 17);
        }
    }

    #[test]
    fn test_unavailable_backend_rejected() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        let none = Capabilities::none();
        let err = BatchCodec::with_capabilities(codec, Backend::Avx2, &none).unwrap_err();
        assert_eq!(err, Error::BackendUnavailable(Backend::Avx2));
        assert!(BatchCodec::with_capabilities(codec, Backend::Scalar, &none).is_ok());
    }

    #[test]
    #[should_panic(expected = "differ in length")]
    fn test_length_mismatch_panics() {
        let batch = BatchCodec::new(AnCodec::<u16>::new(A16).unwrap(), Backend::Scalar).unwrap();
        let mut encoded = [0u32; 3];
        batch.run_encode(&[1u16, 2], &mut encoded);
    }

    #[test]
    fn test_arithmetic_and_sum() {
        for batch in batches::<i16>(32749, CheckPolicy::Range) {
            let raw: Vec<i16> = (-500..500).collect();
            let mut encoded = vec![0i32; raw.len()];
            batch.run_encode(&raw, &mut encoded);

            let mut out = vec![0i32; raw.len()];
            let mut decoded = vec![0i16; raw.len()];
            let cases: [(Operation<i16>, fn(i16) -> i16); 4] = [
                (Operation::Add(7), |v| v + 7),
                (Operation::Sub(7), |v| v - 7),
                (Operation::Mul(3), |v| v * 3),
                (Operation::Div(4), |v| v / 4),
            ];
            for (op, f) in cases {
                batch.run_arithmetic(op, &encoded, &mut out).unwrap();
                assert_eq!(batch.run_check(&out, 0), Ok(()), "{op}");
                batch.run_decode(&out, &mut decoded);
                let expected: Vec<i16> = raw.iter().map(|&v| f(v)).collect();
                assert_eq!(decoded, expected, "{op} on {}", batch.backend());
            }

            assert_eq!(
                batch.run_arithmetic(Operation::Div(0), &encoded, &mut out),
                Err(Error::InvalidOperand)
            );

            let sum = batch.run_sum(&encoded);
            assert_eq!(batch.codec().decode_sum(sum), Some(-500));
        }
    }

    #[test]
    fn test_parallel_matches_serial() {
        let codec = AnCodec::<u16>::new(A16).unwrap();
        let serial = BatchCodec::new(codec, Backend::Scalar).unwrap();
        let parallel = BatchCodec::new(codec, Backend::best(Capabilities::get()))
            .unwrap()
            .with_threads(4)
            .unwrap();
        assert_eq!(parallel.threads(), 4);

        let len = 5 * MIN_PARALLEL_CHUNK + 123;
        let raw: Vec<u16> = (0..len as u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 7) as u16).collect();

        let mut expected = vec![0u32; len];
        let mut actual = vec![0u32; len];
        serial.run_encode(&raw, &mut expected);
        parallel.run_encode(&raw, &mut actual);
        assert_eq!(expected, actual);

        let mut result = vec![0u16; len];
        parallel.run_decode(&actual, &mut result);
        assert_eq!(result, raw);
        assert_eq!(parallel.run_sum(&actual), serial.run_sum(&expected));

        // Corruptions in different chunks: the earliest still wins
        actual[len - 1] ^= 1;
        actual[3 * MIN_PARALLEL_CHUNK + 9] ^= 1 << 30;
        actual[MIN_PARALLEL_CHUNK + 1] ^= 1 << 4;
        assert_eq!(
            parallel.run_check(&actual, 2).unwrap_err(),
            ErrorSignal::new(MIN_PARALLEL_CHUNK + 1, 2)
        );
    }

    #[test]
    fn test_single_thread_request_is_serial() {
        let batch = BatchCodec::new(AnCodec::<u8>::new(233).unwrap(), Backend::Scalar)
            .unwrap()
            .with_threads(1)
            .unwrap();
        assert_eq!(batch.threads(), 1);
    }
}
