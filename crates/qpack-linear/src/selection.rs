//! Choosing the packing backend for a linear layer.
//!
//! Answers "requested X, compiled Y, selected Z" and returns that as a
//! one-line summary so it can go into logs next to the packed weights.

use crate::capabilities;
use qpack_common::{KernelCapabilities, KernelError, PackedBackend, PackingConfig, Result};
use std::fmt;

/// A caller's backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRequest {
    /// Configured preference if compiled, otherwise the best quantized
    /// backend for this architecture.
    Auto,
    Fbgemm,
    FbgemmFp16,
    Qnnpack,
    Onednn,
}

impl fmt::Display for BackendRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendRequest::Auto => write!(f, "auto"),
            BackendRequest::Fbgemm => write!(f, "fbgemm"),
            BackendRequest::FbgemmFp16 => write!(f, "fbgemm-fp16"),
            BackendRequest::Qnnpack => write!(f, "qnnpack"),
            BackendRequest::Onednn => write!(f, "onednn"),
        }
    }
}

impl From<PackedBackend> for BackendRequest {
    fn from(backend: PackedBackend) -> Self {
        match backend {
            PackedBackend::Fbgemm => BackendRequest::Fbgemm,
            PackedBackend::FbgemmFp16 => BackendRequest::FbgemmFp16,
            PackedBackend::Qnnpack => BackendRequest::Qnnpack,
            PackedBackend::Onednn => BackendRequest::Onednn,
        }
    }
}

impl BackendRequest {
    fn explicit(self) -> Option<PackedBackend> {
        match self {
            BackendRequest::Auto => None,
            BackendRequest::Fbgemm => Some(PackedBackend::Fbgemm),
            BackendRequest::FbgemmFp16 => Some(PackedBackend::FbgemmFp16),
            BackendRequest::Qnnpack => Some(PackedBackend::Qnnpack),
            BackendRequest::Onednn => Some(PackedBackend::Onednn),
        }
    }
}

/// The outcome of backend selection.
#[derive(Debug, Clone)]
pub struct BackendSelection {
    pub requested: BackendRequest,
    /// Backends compiled into this build, best first.
    pub compiled: Vec<PackedBackend>,
    pub selected: PackedBackend,
    pub rationale: String,
}

impl BackendSelection {
    /// Format: `requested=auto compiled=[fbgemm,qnnpack] selected=fbgemm`
    pub fn summary(&self) -> String {
        let compiled: Vec<String> = self.compiled.iter().map(|b| b.to_string()).collect();
        format!(
            "requested={} compiled=[{}] selected={}",
            self.requested,
            compiled.join(","),
            self.selected,
        )
    }
}

/// Resolve `request` against this build's backends and the configured
/// preference.
pub fn select_backend(request: BackendRequest, config: &PackingConfig) -> Result<BackendSelection> {
    let selection = select_backend_with(request, config.preferred_backend, &capabilities())?;
    tracing::info!(summary = %selection.summary(), rationale = %selection.rationale, "selected packing backend");
    Ok(selection)
}

pub(crate) fn select_backend_with(
    request: BackendRequest,
    preferred: Option<PackedBackend>,
    caps: &KernelCapabilities,
) -> Result<BackendSelection> {
    let compiled = caps.compiled_backends();

    let (selected, rationale) = match request.explicit() {
        Some(backend) => {
            if !caps.supports(backend) {
                return Err(KernelError::BackendUnavailable { backend: backend.to_string() }.into());
            }
            (backend, format!("{backend} explicitly requested"))
        }
        None => match preferred {
            Some(backend) if caps.supports(backend) => {
                (backend, format!("{backend} preferred by configuration"))
            }
            _ => {
                let best = caps.best_for_arch().ok_or(KernelError::NoProvider)?;
                let rationale = match preferred {
                    Some(p) => format!("preferred {p} not compiled; best for {}", std::env::consts::ARCH),
                    None => format!("best for {}", std::env::consts::ARCH),
                };
                (best, rationale)
            }
        },
    };

    Ok(BackendSelection { requested: request, compiled, selected, rationale })
}
