//! Quantized tensor representation and factory functions
//!
//! A [`QuantizedTensor`] is a contiguous row-major int8 buffer plus the
//! affine parameters that map it back to real values:
//! `real = scale * (q - zero_point)`. Storage is reference counted so a
//! handle can hand out its retained weight without copying it.

use crate::{QPackError, QScheme, QuantizationError, Result};
use candle_core::{DType, Device, Tensor};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Affine quantization parameters attached to a tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quantizer {
    PerTensorAffine { scale: f64, zero_point: i64 },
    PerChannelAffine { scales: Vec<f64>, zero_points: Vec<i64>, axis: usize },
}

impl Quantizer {
    pub fn qscheme(&self) -> QScheme {
        match self {
            Quantizer::PerTensorAffine { .. } => QScheme::PerTensorAffine,
            Quantizer::PerChannelAffine { .. } => QScheme::PerChannelAffine,
        }
    }

    /// Check the parameters against a tensor shape.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        match self {
            Quantizer::PerTensorAffine { scale, zero_point } => {
                check_scale(*scale)?;
                check_zero_point(*zero_point)
            }
            Quantizer::PerChannelAffine { scales, zero_points, axis } => {
                let channels = *shape.get(*axis).ok_or_else(|| {
                    QPackError::Validation(format!(
                        "channel axis {axis} out of range for shape {shape:?}"
                    ))
                })?;
                for len in [scales.len(), zero_points.len()] {
                    if len != channels {
                        return Err(QuantizationError::ParamLengthMismatch {
                            expected: channels,
                            got: len,
                        }
                        .into());
                    }
                }
                scales.iter().try_for_each(|&s| check_scale(s))?;
                zero_points.iter().try_for_each(|&z| check_zero_point(z))
            }
        }
    }
}

fn check_scale(scale: f64) -> Result<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(QuantizationError::InvalidScale { scale }.into())
    }
}

fn is_int8(zero_point: i64) -> bool {
    (i8::MIN as i64..=i8::MAX as i64).contains(&zero_point)
}

fn check_zero_point(zero_point: i64) -> Result<()> {
    if is_int8(zero_point) {
        Ok(())
    } else {
        Err(QuantizationError::InvalidZeroPoint { zero_point }.into())
    }
}

fn check_len(shape: &[usize], got: usize) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != got {
        return Err(QPackError::Validation(format!(
            "shape {shape:?} requires {expected} elements, got {got}"
        )));
    }
    Ok(())
}

/// Size of the contiguous block owned by one index of `axis`.
fn inner_size(shape: &[usize], axis: usize) -> usize {
    shape[axis + 1..].iter().product()
}

#[inline]
fn quantize_value(value: f32, scale: f64, zero_point: i64) -> i8 {
    let q = (value as f64 / scale).round() as i64 + zero_point;
    q.clamp(i8::MIN as i64, i8::MAX as i64) as i8
}

/// Int8 tensor with affine quantization parameters.
#[derive(Debug, Clone)]
pub struct QuantizedTensor {
    shape: Vec<usize>,
    data: Arc<Vec<i8>>,
    quantizer: Quantizer,
}

impl QuantizedTensor {
    /// Allocate a zero-filled per-tensor-affine tensor.
    ///
    /// # Panics
    ///
    /// Panics if `zero_point` does not fit in an `i8`.
    pub fn empty_affine(shape: &[usize], scale: f64, zero_point: i64) -> Self {
        assert!(is_int8(zero_point), "zero point {zero_point} is outside the int8 range");
        let numel = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: Arc::new(vec![0; numel]),
            quantizer: Quantizer::PerTensorAffine { scale, zero_point },
        }
    }

    /// Allocate a zero-filled per-channel-affine tensor.
    ///
    /// # Panics
    ///
    /// Panics if `axis` is out of range, if the parameter vectors do not have
    /// one entry per slice along `axis`, or if a zero point does not fit in
    /// an `i8`. Callers establish this when the parameters are packed, so a
    /// mismatch is a bug, not bad input.
    pub fn empty_per_channel_affine(
        shape: &[usize],
        scales: Vec<f64>,
        zero_points: Vec<i64>,
        axis: usize,
    ) -> Self {
        assert!(axis < shape.len(), "channel axis {axis} out of range for shape {shape:?}");
        assert_eq!(scales.len(), shape[axis], "per-channel scales must match dim {axis}");
        assert_eq!(zero_points.len(), shape[axis], "per-channel zero points must match dim {axis}");
        assert!(
            zero_points.iter().all(|&z| is_int8(z)),
            "per-channel zero points must be in the int8 range"
        );
        let numel = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: Arc::new(vec![0; numel]),
            quantizer: Quantizer::PerChannelAffine { scales, zero_points, axis },
        }
    }

    /// Wrap an existing int8 buffer as a per-tensor-affine tensor.
    pub fn from_int_repr_per_tensor(
        data: Vec<i8>,
        shape: &[usize],
        scale: f64,
        zero_point: i64,
    ) -> Result<Self> {
        Self::from_int_repr(data, shape, Quantizer::PerTensorAffine { scale, zero_point })
    }

    /// Wrap an existing int8 buffer with arbitrary validated parameters.
    pub fn from_int_repr(data: Vec<i8>, shape: &[usize], quantizer: Quantizer) -> Result<Self> {
        check_len(shape, data.len())?;
        quantizer.validate(shape)?;
        Ok(Self { shape: shape.to_vec(), data: Arc::new(data), quantizer })
    }

    /// Quantize a float tensor with one scale and zero point.
    pub fn quantize_per_tensor(tensor: &Tensor, scale: f64, zero_point: i64) -> Result<Self> {
        check_scale(scale)?;
        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let data = values.par_iter().map(|&v| quantize_value(v, scale, zero_point)).collect();
        Self::from_int_repr_per_tensor(data, tensor.dims(), scale, zero_point)
    }

    /// Quantize a float tensor with one scale and zero point per slice of `axis`.
    pub fn quantize_per_channel(
        tensor: &Tensor,
        scales: Vec<f64>,
        zero_points: Vec<i64>,
        axis: usize,
    ) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let quantizer = Quantizer::PerChannelAffine { scales, zero_points, axis };
        quantizer.validate(&shape)?;

        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let inner = inner_size(&shape, axis);
        let channels = shape[axis];
        let Quantizer::PerChannelAffine { scales, zero_points, .. } = &quantizer else {
            unreachable!("constructed as per-channel above")
        };
        let data = values
            .par_iter()
            .enumerate()
            .map(|(i, &v)| {
                let ch = (i / inner) % channels;
                quantize_value(v, scales[ch], zero_points[ch])
            })
            .collect();

        Ok(Self { shape, data: Arc::new(data), quantizer })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Rows and columns of a rank-2 tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(QuantizationError::InvalidRank { expected: 2, shape: self.shape.clone() }.into()),
        }
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    pub fn qscheme(&self) -> QScheme {
        self.quantizer.qscheme()
    }

    pub fn q_scale(&self) -> Option<f64> {
        match &self.quantizer {
            Quantizer::PerTensorAffine { scale, .. } => Some(*scale),
            Quantizer::PerChannelAffine { .. } => None,
        }
    }

    pub fn q_zero_point(&self) -> Option<i64> {
        match &self.quantizer {
            Quantizer::PerTensorAffine { zero_point, .. } => Some(*zero_point),
            Quantizer::PerChannelAffine { .. } => None,
        }
    }

    pub fn q_per_channel_scales(&self) -> Option<&[f64]> {
        match &self.quantizer {
            Quantizer::PerChannelAffine { scales, .. } => Some(scales),
            Quantizer::PerTensorAffine { .. } => None,
        }
    }

    pub fn q_per_channel_zero_points(&self) -> Option<&[i64]> {
        match &self.quantizer {
            Quantizer::PerChannelAffine { zero_points, .. } => Some(zero_points),
            Quantizer::PerTensorAffine { .. } => None,
        }
    }

    pub fn q_per_channel_axis(&self) -> Option<usize> {
        match &self.quantizer {
            Quantizer::PerChannelAffine { axis, .. } => Some(*axis),
            Quantizer::PerTensorAffine { .. } => None,
        }
    }

    /// Raw int8 values in row-major order.
    pub fn int_repr(&self) -> &[i8] {
        &self.data
    }

    /// Mutable raw storage. Copies first if the storage is shared.
    pub fn data_mut(&mut self) -> &mut [i8] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Whether both tensors view the same allocation.
    pub fn shares_storage(&self, other: &QuantizedTensor) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// Map back to real values as an f32 tensor on the CPU.
    pub fn dequantize(&self) -> Result<Tensor> {
        let values: Vec<f32> = match &self.quantizer {
            Quantizer::PerTensorAffine { scale, zero_point } => self
                .data
                .par_iter()
                .map(|&q| (*scale * (q as i64 - zero_point) as f64) as f32)
                .collect(),
            Quantizer::PerChannelAffine { scales, zero_points, axis } => {
                let inner = inner_size(&self.shape, *axis);
                let channels = self.shape[*axis];
                self.data
                    .par_iter()
                    .enumerate()
                    .map(|(i, &q)| {
                        let ch = (i / inner) % channels;
                        (scales[ch] * (q as i64 - zero_points[ch]) as f64) as f32
                    })
                    .collect()
            }
        };
        Ok(Tensor::from_vec(values, self.shape.as_slice(), &Device::Cpu)?)
    }
}
