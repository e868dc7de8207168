//! Prepacked quantized linear weights and their reconstruction
//!
//! A linear layer's weight is packed once into whatever layout the selected
//! GEMM backend wants. This crate owns the other direction as well: given a
//! packed handle, recover the `[out_features, in_features]` weight tensor
//! together with the bias so it can be inspected, serialized or repacked for
//! a different backend.
//!
//! - [`LinearPackedParams`]: the per-backend handle, tagged with a
//!   [`PackedBackend`]
//! - [`prepack`] / [`unpack`]: the entry points
//! - [`LinearParamsState`]: serializable form used to move weights between
//!   backends
//!
//! Which backends exist is decided by cargo features (`fbgemm`, which also
//! provides the fp16 path, `qnnpack` and `onednn`); see [`capabilities`].

use candle_core::{DType, Tensor};
use qpack_common::{
    KernelCapabilities, KernelError, PackedBackend, PackingConfig, QPackError, QuantizationError,
    QuantizedTensor, Result,
};

#[cfg(feature = "fbgemm")]
pub mod fbgemm;
#[cfg(feature = "fbgemm")]
pub mod fp16;
#[cfg(feature = "onednn")]
pub mod onednn;
#[cfg(feature = "qnnpack")]
pub mod qnnpack;
pub mod selection;
pub mod state;

#[cfg(feature = "fbgemm")]
pub use fbgemm::PackedLinearWeight;
#[cfg(feature = "fbgemm")]
pub use fp16::PackedLinearWeightFp16;
#[cfg(feature = "onednn")]
pub use onednn::PackedLinearWeightsOnednn;
#[cfg(feature = "qnnpack")]
pub use qnnpack::PackedLinearWeightsQnnp;
pub use selection::{BackendRequest, BackendSelection, select_backend};
pub use state::{LinearParamsState, WeightState, repack};

/// Weight of a linear layer, either int8 quantized or floating point.
#[derive(Debug, Clone)]
pub enum LinearWeight {
    Quantized(QuantizedTensor),
    Float(Tensor),
}

impl LinearWeight {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            LinearWeight::Quantized(q) => q.shape().to_vec(),
            LinearWeight::Float(t) => t.dims().to_vec(),
        }
    }

    pub fn as_quantized(&self) -> Option<&QuantizedTensor> {
        match self {
            LinearWeight::Quantized(q) => Some(q),
            LinearWeight::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&Tensor> {
        match self {
            LinearWeight::Float(t) => Some(t),
            LinearWeight::Quantized(_) => None,
        }
    }

    /// Real-valued f32 view: dequantized, or converted.
    pub fn to_f32(&self) -> Result<Tensor> {
        match self {
            LinearWeight::Quantized(q) => q.dequantize(),
            LinearWeight::Float(t) => Ok(t.to_dtype(DType::F32)?),
        }
    }

    fn into_quantized(self, backend: PackedBackend) -> Result<QuantizedTensor> {
        match self {
            LinearWeight::Quantized(q) => Ok(q),
            LinearWeight::Float(_) => Err(QPackError::Validation(format!(
                "{backend} packs int8 quantized weights, got a float tensor"
            ))),
        }
    }
}

impl From<QuantizedTensor> for LinearWeight {
    fn from(q: QuantizedTensor) -> Self {
        LinearWeight::Quantized(q)
    }
}

impl From<Tensor> for LinearWeight {
    fn from(t: Tensor) -> Self {
        LinearWeight::Float(t)
    }
}

/// A linear layer's weight and bias packed for one backend.
///
/// Handles are immutable once built; `unpack` reads the packed data and
/// returns a fresh weight (or the retained original, for backends that keep
/// one) plus the bias shared with the handle.
pub trait LinearPackedParams: Send + Sync + std::fmt::Debug {
    fn backend(&self) -> PackedBackend;

    /// `[out_features, in_features]`.
    fn weight_shape(&self) -> [usize; 2];

    fn bias(&self) -> Option<Tensor>;

    /// Recover the original weight and bias.
    fn unpack(&self) -> Result<(LinearWeight, Option<Tensor>)>;
}

/// Backends compiled into this build.
pub fn capabilities() -> KernelCapabilities {
    KernelCapabilities {
        fbgemm: cfg!(feature = "fbgemm"),
        qnnpack: cfg!(feature = "qnnpack"),
        onednn: cfg!(feature = "onednn"),
    }
}

/// Pack a linear layer's weight (`[out_features, in_features]`) and
/// optional bias (`[out_features]`) for `backend`.
pub fn prepack(
    weight: impl Into<LinearWeight>,
    bias: Option<Tensor>,
    backend: PackedBackend,
    config: &PackingConfig,
) -> Result<Box<dyn LinearPackedParams>> {
    let weight = weight.into();
    if !capabilities().supports(backend) {
        return Err(KernelError::BackendUnavailable { backend: backend.to_string() }.into());
    }
    tracing::debug!(%backend, shape = ?weight.shape(), has_bias = bias.is_some(), "prepack linear weight");

    match backend {
        #[cfg(feature = "fbgemm")]
        PackedBackend::Fbgemm => Ok(Box::new(PackedLinearWeight::prepack(
            &weight.into_quantized(backend)?,
            bias,
            config.fbgemm,
        )?)),
        #[cfg(feature = "fbgemm")]
        PackedBackend::FbgemmFp16 => {
            Ok(Box::new(PackedLinearWeightFp16::prepack(&weight, bias, config.fp16)?))
        }
        #[cfg(feature = "qnnpack")]
        PackedBackend::Qnnpack => Ok(Box::new(PackedLinearWeightsQnnp::prepack(
            &weight.into_quantized(backend)?,
            bias,
            config.qnnpack,
        )?)),
        #[cfg(feature = "onednn")]
        PackedBackend::Onednn => {
            Ok(Box::new(PackedLinearWeightsOnednn::prepack(weight.into_quantized(backend)?, bias)?))
        }
        #[allow(unreachable_patterns)]
        other => Err(KernelError::BackendUnavailable { backend: other.to_string() }.into()),
    }
}

/// Recover `(weight, bias)` from any packed handle.
pub fn unpack(params: &dyn LinearPackedParams) -> Result<(LinearWeight, Option<Tensor>)> {
    let backend = params.backend();
    let _span = tracing::debug_span!("unpack", %backend).entered();
    let (weight, bias) = params.unpack()?;
    tracing::debug!(
        shape = ?weight.shape(),
        quantized = weight.as_quantized().is_some(),
        passthrough = backend.is_passthrough(),
        has_bias = bias.is_some(),
        "unpacked linear weight"
    );
    Ok((weight, bias))
}

/// Split a rank-2 quantized weight into `(out_features, in_features)`,
/// rejecting empty matrices.
pub(crate) fn linear_dims(weight: &QuantizedTensor) -> Result<(usize, usize)> {
    let (n, k) = weight.dims2()?;
    if n == 0 || k == 0 {
        return Err(QPackError::Validation(format!("empty linear weight {:?}", weight.shape())));
    }
    Ok((n, k))
}

/// Bias must be a float vector with one entry per output feature.
pub(crate) fn check_bias(bias: Option<&Tensor>, out_features: usize) -> Result<()> {
    let Some(bias) = bias else {
        return Ok(());
    };
    if bias.rank() != 1 {
        return Err(
            QuantizationError::InvalidRank { expected: 1, shape: bias.dims().to_vec() }.into()
        );
    }
    if !bias.dtype().is_float() {
        return Err(QPackError::Validation(format!(
            "bias must be floating point, got {:?}",
            bias.dtype()
        )));
    }
    if bias.dims()[0] != out_features {
        return Err(QPackError::Validation(format!(
            "bias has {} elements, weight has {out_features} output features",
            bias.dims()[0]
        )));
    }
    Ok(())
}
