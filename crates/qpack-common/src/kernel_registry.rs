//! Packed-backend registry: the list of weight-packing backends.
//!
//! Every packed linear handle carries one of these tags; unpack dispatch and
//! serialized state both key off it.

use crate::{KernelError, QPackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The packing backend a handle was produced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackedBackend {
    /// Blocked, row-interleaved int8 layout for server x86 GEMM.
    Fbgemm,
    /// Blocked half-precision layout for fp16 GEMM.
    FbgemmFp16,
    /// Unsigned-shifted nr×kr tile layout for mobile GEMM.
    Qnnpack,
    /// Vendor math-library handle that keeps the original tensors.
    Onednn,
}

impl PackedBackend {
    pub const ALL: [PackedBackend; 4] = [
        PackedBackend::Fbgemm,
        PackedBackend::FbgemmFp16,
        PackedBackend::Qnnpack,
        PackedBackend::Onednn,
    ];

    /// Whether handles of this backend hold int8 quantized weights.
    pub fn is_quantized(self) -> bool {
        !matches!(self, PackedBackend::FbgemmFp16)
    }

    /// Whether unpack returns the retained originals instead of decoding.
    pub fn is_passthrough(self) -> bool {
        matches!(self, PackedBackend::Onednn)
    }
}

impl fmt::Display for PackedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackedBackend::Fbgemm => write!(f, "fbgemm"),
            PackedBackend::FbgemmFp16 => write!(f, "fbgemm-fp16"),
            PackedBackend::Qnnpack => write!(f, "qnnpack"),
            PackedBackend::Onednn => write!(f, "onednn"),
        }
    }
}

impl FromStr for PackedBackend {
    type Err = QPackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fbgemm" => Ok(PackedBackend::Fbgemm),
            "fbgemm-fp16" | "fbgemm_fp16" | "fp16" => Ok(PackedBackend::FbgemmFp16),
            "qnnpack" => Ok(PackedBackend::Qnnpack),
            "onednn" | "mkldnn" => Ok(PackedBackend::Onednn),
            other => Err(KernelError::BackendUnavailable { backend: other.to_string() }.into()),
        }
    }
}

/// Snapshot of which backends a build provides.
///
/// The linear crate fills this in from its cargo features; this crate only
/// knows how to order and summarize it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelCapabilities {
    pub fbgemm: bool,
    pub qnnpack: bool,
    pub onednn: bool,
}

impl KernelCapabilities {
    /// Whether `backend` can be packed and unpacked in this build.
    pub fn supports(&self, backend: PackedBackend) -> bool {
        match backend {
            PackedBackend::Fbgemm | PackedBackend::FbgemmFp16 => self.fbgemm,
            PackedBackend::Qnnpack => self.qnnpack,
            PackedBackend::Onednn => self.onednn,
        }
    }

    /// Compiled backends in priority order (best first).
    pub fn compiled_backends(&self) -> Vec<PackedBackend> {
        let mut backends = Vec::new();
        if self.fbgemm {
            backends.push(PackedBackend::Fbgemm);
        }
        if self.onednn {
            backends.push(PackedBackend::Onednn);
        }
        if self.qnnpack {
            backends.push(PackedBackend::Qnnpack);
        }
        if self.fbgemm {
            backends.push(PackedBackend::FbgemmFp16);
        }
        backends
    }

    /// Best quantized backend for the target architecture, falling back to
    /// whatever is compiled.
    pub fn best_for_arch(&self) -> Option<PackedBackend> {
        let arch_choice = if cfg!(target_arch = "x86_64") {
            PackedBackend::Fbgemm
        } else {
            PackedBackend::Qnnpack
        };
        if self.supports(arch_choice) {
            return Some(arch_choice);
        }
        self.compiled_backends().into_iter().find(|b| b.is_quantized())
    }

    /// Human-readable summary for logs.
    pub fn summary(&self) -> String {
        let backends: Vec<String> =
            self.compiled_backends().iter().map(|b| b.to_string()).collect();
        format!("backends=[{}]", backends.join(","))
    }
}
