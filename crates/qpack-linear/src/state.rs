//! Serializable linear parameters
//!
//! [`LinearParamsState`] is what a packed handle looks like on disk: the
//! unpacked weight, the bias and the backend it was packed for. Packed
//! buffers themselves are never serialized since their layout depends on
//! build-time blocking parameters.

use crate::{LinearPackedParams, LinearWeight, prepack, unpack};
use candle_core::{DType, Device, Tensor};
use qpack_common::{PackedBackend, PackingConfig, QuantizedTensor, Quantizer, Result};
use serde::{Deserialize, Serialize};

/// Unpacked weight in plain vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WeightState {
    QInt8 { shape: Vec<usize>, int_repr: Vec<i8>, quantizer: Quantizer },
    Float { shape: Vec<usize>, data: Vec<f32> },
}

impl WeightState {
    fn from_weight(weight: &LinearWeight) -> Result<Self> {
        Ok(match weight {
            LinearWeight::Quantized(q) => WeightState::QInt8 {
                shape: q.shape().to_vec(),
                int_repr: q.int_repr().to_vec(),
                quantizer: q.quantizer().clone(),
            },
            LinearWeight::Float(t) => WeightState::Float {
                shape: t.dims().to_vec(),
                data: t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?,
            },
        })
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            WeightState::QInt8 { shape, .. } | WeightState::Float { shape, .. } => shape,
        }
    }

    /// Rebuild the weight, validating lengths and quantization parameters.
    pub fn to_weight(&self) -> Result<LinearWeight> {
        Ok(match self {
            WeightState::QInt8 { shape, int_repr, quantizer } => LinearWeight::Quantized(
                QuantizedTensor::from_int_repr(int_repr.clone(), shape, quantizer.clone())?,
            ),
            WeightState::Float { shape, data } => {
                LinearWeight::Float(Tensor::from_vec(data.clone(), shape.as_slice(), &Device::Cpu)?)
            }
        })
    }
}

/// Backend tag, weight and bias of a packed linear layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParamsState {
    pub backend: PackedBackend,
    pub weight: WeightState,
    pub bias: Option<Vec<f32>>,
}

impl LinearParamsState {
    /// Unpack `params` and copy the result out.
    pub fn capture(params: &dyn LinearPackedParams) -> Result<Self> {
        let (weight, bias) = unpack(params)?;
        let bias = bias
            .map(|b| b.to_dtype(DType::F32)?.to_vec1::<f32>())
            .transpose()?;
        Ok(Self { backend: params.backend(), weight: WeightState::from_weight(&weight)?, bias })
    }

    pub fn weight(&self) -> Result<LinearWeight> {
        self.weight.to_weight()
    }

    pub fn bias(&self) -> Result<Option<Tensor>> {
        Ok(self
            .bias
            .as_ref()
            .map(|b| Tensor::new(b.as_slice(), &Device::Cpu))
            .transpose()?)
    }

    /// Pack again for the recorded backend.
    pub fn restore(&self, config: &PackingConfig) -> Result<Box<dyn LinearPackedParams>> {
        prepack(self.weight()?, self.bias()?, self.backend, config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Move a packed layer to another backend by unpacking and packing again.
///
/// Weights from the fp16 backend are float and cannot be repacked for an
/// int8 backend; that returns a validation error.
pub fn repack(
    params: &dyn LinearPackedParams,
    target: PackedBackend,
    config: &PackingConfig,
) -> Result<Box<dyn LinearPackedParams>> {
    let (weight, bias) = unpack(params)?;
    tracing::debug!(from = %params.backend(), to = %target, "repack linear weight");
    prepack(weight, bias, target, config)
}
