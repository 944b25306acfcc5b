//! # Backends and CPU Capabilities
//!
//! A [`Backend`] names the instruction set a batch operation runs on. The
//! host's [`Capabilities`] are probed once per process and shared by
//! reference; a backend is usable only if the snapshot says so.
//!
//! | Backend  | Register | Lanes (u32) | Requires   |
//! |----------|----------|-------------|------------|
//! | Scalar   | -        | 1           | -          |
//! | Sse42    | 128 bit  | 4           | SSE4.2     |
//! | Avx2     | 256 bit  | 8           | AVX2       |
//! | Avx512   | 512 bit  | 16          | AVX-512F   |

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::Error;

/// Number of vector registers processed per unrolled block.
pub const UNROLL: usize = 4;

/// SIMD features relevant to the kernels, detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub sse42: bool,
    pub avx2: bool,
    pub avx512f: bool,
}

impl Capabilities {
    /// Probe the running CPU.
    #[cfg(target_arch = "x86_64")]
    pub fn detect() -> Self {
        Self {
            sse42: std::arch::is_x86_feature_detected!("sse4.2"),
            avx2: std::arch::is_x86_feature_detected!("avx2"),
            avx512f: std::arch::is_x86_feature_detected!("avx512f"),
        }
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub fn detect() -> Self {
        Self::none()
    }

    /// Scalar only.
    pub const fn none() -> Self {
        Self {
            sse42: false,
            avx2: false,
            avx512f: false,
        }
    }

    /// Process-wide snapshot, probed on first use.
    pub fn get() -> &'static Capabilities {
        static CAPS: OnceLock<Capabilities> = OnceLock::new();
        CAPS.get_or_init(|| {
            let caps = Self::detect();
            tracing::debug!(?caps, "detected CPU capabilities");
            caps
        })
    }
}

/// Instruction set a batch operation dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// One element at a time, no vector code.
    Scalar,
    /// 128-bit SSE4.2 registers.
    Sse42,
    /// 256-bit AVX2 registers.
    Avx2,
    /// 512-bit AVX-512F registers.
    Avx512,
}

impl Backend {
    /// Every backend, narrowest first.
    pub const ALL: [Backend; 4] = [Backend::Scalar, Backend::Sse42, Backend::Avx2, Backend::Avx512];

    pub fn name(self) -> &'static str {
        match self {
            Backend::Scalar => "scalar",
            Backend::Sse42 => "sse4.2",
            Backend::Avx2 => "avx2",
            Backend::Avx512 => "avx512",
        }
    }

    /// Vector register width in bytes; `None` for scalar.
    pub fn register_bytes(self) -> Option<usize> {
        match self {
            Backend::Scalar => None,
            Backend::Sse42 => Some(16),
            Backend::Avx2 => Some(32),
            Backend::Avx512 => Some(64),
        }
    }

    /// Elements of type `T` per vector register.
    #[inline]
    pub fn lanes<T>(self) -> usize {
        self.register_bytes()
            .map_or(1, |bytes| (bytes / std::mem::size_of::<T>()).max(1))
    }

    /// Elements of type `T` per unrolled block.
    #[inline]
    pub fn block_len<T>(self) -> usize {
        match self {
            Backend::Scalar => 1,
            _ => self.lanes::<T>() * UNROLL,
        }
    }

    /// Whether this build and `caps` allow the backend.
    pub fn is_available(self, caps: &Capabilities) -> bool {
        let simd = cfg!(all(feature = "simd", target_arch = "x86_64"));
        match self {
            Backend::Scalar => true,
            Backend::Sse42 => simd && caps.sse42,
            Backend::Avx2 => simd && caps.avx2,
            Backend::Avx512 => simd && caps.avx512f,
        }
    }

    /// The widest available backend.
    pub fn best(caps: &Capabilities) -> Backend {
        Self::ALL
            .into_iter()
            .rev()
            .find(|b| b.is_available(caps))
            .unwrap_or(Backend::Scalar)
    }

    /// All available backends, narrowest first.
    pub fn available(caps: &Capabilities) -> impl Iterator<Item = Backend> + '_ {
        Self::ALL.into_iter().filter(move |b| b.is_available(caps))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scalar" => Ok(Backend::Scalar),
            "sse42" | "sse4.2" => Ok(Backend::Sse42),
            "avx2" => Ok(Backend::Avx2),
            "avx512" | "avx512f" => Ok(Backend::Avx512),
            _ => Err(Error::InvalidParams),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lanes() {
        assert_eq!(Backend::Scalar.lanes::<u32>(), 1);
        assert_eq!(Backend::Sse42.lanes::<u32>(), 4);
        assert_eq!(Backend::Avx2.lanes::<u16>(), 16);
        assert_eq!(Backend::Avx512.lanes::<u64>(), 8);
        assert_eq!(Backend::Avx2.block_len::<u32>(), 32);
        assert_eq!(Backend::Scalar.block_len::<u64>(), 1);
    }

    #[test]
    fn test_scalar_always_available() {
        let none = Capabilities::none();
        assert!(Backend::Scalar.is_available(&none));
        assert!(!Backend::Avx2.is_available(&none));
        assert_eq!(Backend::best(&none), Backend::Scalar);
        assert_eq!(Backend::available(&none).collect::<Vec<_>>(), vec![Backend::Scalar]);
    }

    #[test]
    fn test_best_prefers_widest() {
        let caps = Capabilities {
            sse42: true,
            avx2: true,
            avx512f: false,
        };
        let expected = if cfg!(all(feature = "simd", target_arch = "x86_64")) {
            Backend::Avx2
        } else {
            Backend::Scalar
        };
        assert_eq!(Backend::best(&caps), expected);
    }

    #[test]
    fn test_capabilities_snapshot_is_stable() {
        let first = Capabilities::get();
        let second = Capabilities::get();
        assert!(std::ptr::eq(first, second));
        assert_eq!(*first, Capabilities::detect());
    }

    #[test]
    fn test_parse_backend() {
        assert_eq!("AVX2".parse::<Backend>(), Ok(Backend::Avx2));
        assert_eq!("sse4.2".parse::<Backend>(), Ok(Backend::Sse42));
        assert_eq!("neon".parse::<Backend>(), Err(Error::InvalidParams));
        for backend in Backend::ALL {
            assert_eq!(backend.name().parse::<Backend>(), Ok(backend));
        }
    }
}
