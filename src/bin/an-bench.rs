//! AN-coding throughput benchmark
//!
//! Generates a deterministic raw column, then times encode, check,
//! arithmetic, sum and decode on every requested backend.
//!
//! Usage:
//!   # All available backends, 16-bit unsigned, default constant
//!   an-bench --values 1048576 --iterations 20
//!
//!   # Signed 32-bit data on AVX2 with four workers, CSV output
//!   an-bench --width 32 --signed --backend avx2 --threads 4 --csv
//!
//!   # XOR checksum baseline with 64-value blocks
//!   an-bench --codec xor --block-size 64

use std::hint::black_box;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn, Level};

use ancode::{
    AnCodec, AnWord, Backend, BatchCodec, Capabilities, CheckPolicy, DataGenConfig, Operation,
    XorCodec,
};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "an-bench")]
#[command(about = "Measure AN-coding and XOR checksum throughput")]
struct Args {
    /// Timed repetitions per backend
    #[arg(long, default_value = "10")]
    iterations: usize,

    /// Number of raw values per buffer
    #[arg(long, default_value = "1048576")]
    values: usize,

    /// Raw integer width in bits
    #[arg(long, default_value = "16")]
    width: Width,

    /// Use two's complement raw values
    #[arg(long)]
    signed: bool,

    /// Odd AN constant (defaults per width)
    #[arg(short = 'a', long = "constant")]
    constant: Option<u64>,

    /// Validity test used by the check
    #[arg(long, default_value = "range")]
    policy: PolicyArg,

    /// Instruction set to run on
    #[arg(long, default_value = "all")]
    backend: BackendArg,

    /// Worker threads per batch operation
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Low bits cleared in generated values
    #[arg(long, default_value = "0")]
    zero_low_bits: u32,

    /// High bits cleared in generated values
    #[arg(long, default_value = "0")]
    zero_high_bits: u32,

    /// Seed for data generation
    #[arg(long, default_value = "24301")]
    seed: u64,

    /// Protection scheme to measure
    #[arg(long, default_value = "an")]
    codec: CodecKind,

    /// Values per XOR checksum block
    #[arg(long, default_value = "64")]
    block_size: usize,

    /// Print results as CSV
    #[arg(long)]
    csv: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Width {
    #[value(name = "8")]
    W8,
    #[value(name = "16")]
    W16,
    #[value(name = "32")]
    W32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyArg {
    Range,
    Divisibility,
}

impl From<PolicyArg> for CheckPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Range => CheckPolicy::Range,
            PolicyArg::Divisibility => CheckPolicy::Divisibility,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    Scalar,
    Sse42,
    Avx2,
    Avx512,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CodecKind {
    An,
    Xor,
}

impl Width {
    /// Largest tested constant that fits the raw width.
    fn default_constant(self) -> u64 {
        match self {
            Width::W8 => 233,
            Width::W16 | Width::W32 => 63877,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Timings for one codec, type and backend.
#[derive(Debug)]
struct Report {
    codec: &'static str,
    ty: &'static str,
    backend: Backend,
    threads: usize,
    raw_bytes: usize,
    values: usize,
    iterations: usize,
    phases: Vec<(&'static str, Duration)>,
    verified: bool,
}

impl Report {
    fn ns_per_element(&self, elapsed: Duration) -> f64 {
        let elements = (self.values * self.iterations).max(1);
        elapsed.as_nanos() as f64 / elements as f64
    }

    fn mib_per_sec(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs == 0.0 {
            return f64::INFINITY;
        }
        let bytes = (self.values * self.raw_bytes * self.iterations) as f64;
        bytes / secs / (1024.0 * 1024.0)
    }
}

fn print_table(reports: &[Report]) {
    println!(
        "{:<5} {:<4} {:<8} {:>7} {:<10} {:>10} {:>12}  {}",
        "codec", "type", "backend", "threads", "phase", "ns/elem", "MiB/s", "status"
    );
    for report in reports {
        for &(phase, elapsed) in &report.phases {
            println!(
                "{:<5} {:<4} {:<8} {:>7} {:<10} {:>10.3} {:>12.1}  {}",
                report.codec,
                report.ty,
                report.backend.name(),
                report.threads,
                phase,
                report.ns_per_element(elapsed),
                report.mib_per_sec(elapsed),
                if report.verified { "ok" } else { "FAILED" }
            );
        }
    }
}

fn print_csv(reports: &[Report]) {
    println!("codec,type,backend,threads,phase,iterations,ns_per_element,mib_per_sec,verified");
    for report in reports {
        for &(phase, elapsed) in &report.phases {
            println!(
                "{},{},{},{},{},{},{:.3},{:.1},{}",
                report.codec,
                report.ty,
                report.backend.name(),
                report.threads,
                phase,
                report.iterations,
                report.ns_per_element(elapsed),
                report.mib_per_sec(elapsed),
                report.verified
            );
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

fn timed<T>(acc: &mut Duration, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    *acc += start.elapsed();
    out
}

fn select_backends(arg: BackendArg) -> Result<Vec<Backend>> {
    let caps = Capabilities::get();
    let backend = match arg {
        BackendArg::All => return Ok(Backend::available(caps).collect()),
        BackendArg::Scalar => Backend::Scalar,
        BackendArg::Sse42 => Backend::Sse42,
        BackendArg::Avx2 => Backend::Avx2,
        BackendArg::Avx512 => Backend::Avx512,
    };
    if !backend.is_available(caps) {
        bail!("backend {} is not available on this CPU or build", backend);
    }
    Ok(vec![backend])
}

fn run_an<R: AnWord>(args: &Args, data: DataGenConfig) -> Result<Vec<Report>> {
    let a = args.constant.unwrap_or_else(|| args.width.default_constant());
    let codec = AnCodec::<R>::with_policy(a, args.policy.into())
        .with_context(|| format!("invalid AN constant {} for {}", a, R::NAME))?;
    info!(
        ty = R::NAME,
        a = a,
        policy = %codec.policy(),
        values = args.values,
        iterations = args.iterations,
        "AN-coding benchmark"
    );

    let n = args.values;
    let mut raw = vec![R::default(); n];
    let mut encoded = vec![R::Enc::default(); n];
    let mut scratch = vec![R::Enc::default(); n];
    let mut result = vec![R::default(); n];
    let addend = Operation::Add(R::from_bits(1));

    let mut reports = Vec::new();
    for backend in select_backends(args.backend)? {
        let batch = BatchCodec::new(codec, backend)
            .and_then(|b| b.with_threads(args.threads))
            .with_context(|| format!("failed to set up {} backend", backend))?;
        debug!(backend = %backend, threads = batch.threads(), "running");

        let mut encode = Duration::ZERO;
        let mut check = Duration::ZERO;
        let mut arithmetic = Duration::ZERO;
        let mut sum = Duration::ZERO;
        let mut decode = Duration::ZERO;
        let mut completed = 0;
        let mut verified = true;

        for iteration in 0..args.iterations {
            data.with_seed(data.seed().wrapping_add(iteration as u64))
                .fill(&mut raw)
                .context("data generation failed")?;

            timed(&mut encode, || batch.run_encode(&raw, &mut encoded));

            if let Err(signal) = timed(&mut check, || batch.run_check(&encoded, iteration)) {
                warn!(backend = %backend, %signal, "check failed");
                verified = false;
                break;
            }

            timed(&mut arithmetic, || {
                batch.run_arithmetic(addend, &encoded, &mut scratch)
            })
            .context("arithmetic pass failed")?;
            black_box(&scratch);

            let total = timed(&mut sum, || batch.run_sum(&encoded));
            let expected: i128 = raw.iter().map(|&v| R::enc_to_i128(v.widen())).sum();
            if codec.decode_sum(total) != Some(expected) {
                warn!(backend = %backend, iteration, total, expected, "sum mismatch");
                verified = false;
                break;
            }

            timed(&mut decode, || batch.run_decode(&encoded, &mut result));
            if let Some(offset) = raw.iter().zip(&result).position(|(r, d)| r != d) {
                warn!(backend = %backend, iteration, offset, "decode mismatch");
                verified = false;
                break;
            }
            completed += 1;
        }

        reports.push(Report {
            codec: "an",
            ty: R::NAME,
            backend,
            threads: batch.threads(),
            raw_bytes: std::mem::size_of::<R>(),
            values: n,
            iterations: completed,
            phases: vec![
                ("encode", encode),
                ("check", check),
                ("arithmetic", arithmetic),
                ("sum", sum),
                ("decode", decode),
            ],
            verified,
        });
    }
    Ok(reports)
}

fn run_xor<R: AnWord>(args: &Args, data: DataGenConfig) -> Result<Vec<Report>> {
    let codec = XorCodec::<R>::new(args.block_size).context("invalid XOR block size")?;
    info!(
        ty = R::NAME,
        block_size = codec.block_size(),
        values = args.values,
        iterations = args.iterations,
        "XOR checksum benchmark"
    );
    if args.backend != BackendArg::All && args.backend != BackendArg::Scalar {
        debug!("XOR checksum runs on the scalar backend only");
    }

    let n = args.values;
    let mut raw = vec![R::default(); n];
    let mut encoded = vec![R::default(); codec.encoded_len(n)];
    let mut result = vec![R::default(); n];

    let mut encode = Duration::ZERO;
    let mut check = Duration::ZERO;
    let mut decode = Duration::ZERO;
    let mut completed = 0;
    let mut verified = true;

    for iteration in 0..args.iterations {
        data.with_seed(data.seed().wrapping_add(iteration as u64))
            .fill(&mut raw)
            .context("data generation failed")?;

        timed(&mut encode, || codec.encode(&raw, &mut encoded));

        if let Err(signal) = timed(&mut check, || codec.check(&encoded, iteration)) {
            warn!(%signal, "check failed");
            verified = false;
            break;
        }

        timed(&mut decode, || codec.decode(&encoded, &mut result));
        if raw != result {
            warn!(iteration, "decode mismatch");
            verified = false;
            break;
        }
        completed += 1;
    }

    Ok(vec![Report {
        codec: "xor",
        ty: R::NAME,
        backend: Backend::Scalar,
        threads: 1,
        raw_bytes: std::mem::size_of::<R>(),
        values: n,
        iterations: completed,
        phases: vec![("encode", encode), ("check", check), ("decode", decode)],
        verified,
    }])
}

fn run<R: AnWord>(args: &Args) -> Result<Vec<Report>> {
    let data = DataGenConfig::new(args.zero_low_bits, args.zero_high_bits).with_seed(args.seed);
    data.validate::<R>().with_context(|| {
        format!(
            "cannot clear {} low and {} high bits of {}",
            args.zero_low_bits,
            args.zero_high_bits,
            R::NAME
        )
    })?;
    match args.codec {
        CodecKind::An => run_an::<R>(args, data),
        CodecKind::Xor => run_xor::<R>(args, data),
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if args.iterations == 0 || args.values == 0 {
        bail!("--iterations and --values must be positive");
    }

    let reports = match (args.width, args.signed) {
        (Width::W8, false) => run::<u8>(&args)?,
        (Width::W8, true) => run::<i8>(&args)?,
        (Width::W16, false) => run::<u16>(&args)?,
        (Width::W16, true) => run::<i16>(&args)?,
        (Width::W32, false) => run::<u32>(&args)?,
        (Width::W32, true) => run::<i32>(&args)?,
    };

    if args.csv {
        print_csv(&reports);
    } else {
        print_table(&reports);
    }

    let failed = reports.iter().filter(|r| !r.verified).count();
    if failed > 0 {
        warn!(failed, total = reports.len(), "some configurations failed verification");
    } else {
        info!(total = reports.len(), "all configurations verified");
    }
    Ok(())
}
