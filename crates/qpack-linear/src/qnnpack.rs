//! Int8 linear weights in the unsigned mobile layout
//!
//! The mobile kernels work on `u8` operands, so signed weights are shifted
//! by +128 before packing and zero points move with them. The handle keeps
//! the original signed weight until [`PackedLinearWeightsQnnp::release_original`]
//! is called; after that `unpack` has to rebuild it from the packed tiles.

use crate::{LinearPackedParams, LinearWeight, check_bias, linear_dims};
use candle_core::Tensor;
use qpack_common::{
    PackedBackend, QScheme, QuantizationError, QuantizedTensor, Quantizer, QnnpackTileParams,
    Result,
};
use qpack_kernels::QnnpackPackBMatrix;

const SHIFT: i64 = 128;

fn to_kernel_zero_point(zero_point: i64) -> Result<u8> {
    if !(i8::MIN as i64..=i8::MAX as i64).contains(&zero_point) {
        return Err(QuantizationError::InvalidZeroPoint { zero_point }.into());
    }
    Ok((zero_point + SHIFT) as u8)
}

#[derive(Debug)]
pub struct PackedLinearWeightsQnnp {
    w: QnnpackPackBMatrix,
    orig_weight: Option<QuantizedTensor>,
    bias: Option<Tensor>,
    w_scales: Vec<f32>,
    /// Unsigned-domain zero points, one per output channel.
    w_zero_points: Vec<u8>,
    weight_sizes: [usize; 2],
    q_scheme: QScheme,
}

impl PackedLinearWeightsQnnp {
    pub fn prepack(
        weight: &QuantizedTensor,
        bias: Option<Tensor>,
        tile: QnnpackTileParams,
    ) -> Result<Self> {
        let (n, k) = linear_dims(weight)?;
        check_bias(bias.as_ref(), n)?;

        let (w_scales, w_zero_points) = match weight.quantizer() {
            Quantizer::PerTensorAffine { scale, zero_point } => {
                let zp = to_kernel_zero_point(*zero_point)?;
                (vec![*scale as f32; n], vec![zp; n])
            }
            Quantizer::PerChannelAffine { scales, zero_points, axis } => {
                if *axis != 0 {
                    return Err(QuantizationError::UnsupportedScheme {
                        backend: PackedBackend::Qnnpack.to_string(),
                        scheme: format!("per-channel-affine on axis {axis}"),
                    }
                    .into());
                }
                let zps = zero_points
                    .iter()
                    .map(|&z| to_kernel_zero_point(z))
                    .collect::<Result<Vec<_>>>()?;
                (scales.iter().map(|&s| s as f32).collect(), zps)
            }
        };

        let shifted: Vec<u8> =
            weight.int_repr().iter().map(|&v| (v as i16 + SHIFT as i16) as u8).collect();
        // The accumulator bias depends on the input scale, which is only known
        // at run time, so the packed bias slots stay zero.
        let w = QnnpackPackBMatrix::pack(n, k, &shifted, &w_zero_points, None, tile)?;

        Ok(Self {
            w,
            orig_weight: Some(weight.clone()),
            bias,
            w_scales,
            w_zero_points,
            weight_sizes: [n, k],
            q_scheme: weight.qscheme(),
        })
    }

    /// Drop the retained signed weight. Later unpacks rebuild it from the
    /// packed buffer.
    pub fn release_original(&mut self) -> Option<QuantizedTensor> {
        let released = self.orig_weight.take();
        if released.is_some() {
            tracing::debug!(shape = ?self.weight_sizes, "released original qnnpack weight");
        }
        released
    }

    pub fn has_original(&self) -> bool {
        self.orig_weight.is_some()
    }

    pub fn packed(&self) -> &QnnpackPackBMatrix {
        &self.w
    }

    pub fn qscheme(&self) -> QScheme {
        self.q_scheme
    }

    pub fn w_scales(&self) -> &[f32] {
        &self.w_scales
    }

    pub fn w_zero_points(&self) -> &[u8] {
        &self.w_zero_points
    }

    fn unpack_from_packed(&self) -> Result<QuantizedTensor> {
        if self.q_scheme == QScheme::PerChannelAffine {
            tracing::warn!(
                shape = ?self.weight_sizes,
                "per-channel qnnpack weight cannot be rebuilt without the original"
            );
            return Err(QuantizationError::UnsupportedScheme {
                backend: PackedBackend::Qnnpack.to_string(),
                scheme: QScheme::PerChannelAffine.to_string(),
            }
            .into());
        }

        let [n, k] = self.weight_sizes;
        let mut data = vec![0i8; n * k];
        self.w.unpack_weights(&self.w_zero_points, &mut data)?;
        for v in data.iter_mut() {
            *v = v.wrapping_add(i8::MIN);
        }

        let weight = QuantizedTensor::from_int_repr_per_tensor(
            data,
            &self.weight_sizes,
            self.w_scales[0] as f64,
            self.w_zero_points[0] as i64 - SHIFT,
        )?;
        assert_eq!(
            weight.qscheme(),
            QScheme::PerTensorAffine,
            "rebuilt qnnpack weight must be per-tensor affine"
        );
        Ok(weight)
    }
}

impl LinearPackedParams for PackedLinearWeightsQnnp {
    fn backend(&self) -> PackedBackend {
        PackedBackend::Qnnpack
    }

    fn weight_shape(&self) -> [usize; 2] {
        self.weight_sizes
    }

    fn bias(&self) -> Option<Tensor> {
        self.bias.clone()
    }

    fn unpack(&self) -> Result<(LinearWeight, Option<Tensor>)> {
        let weight = match &self.orig_weight {
            Some(orig) => orig.clone(),
            None => self.unpack_from_packed()?,
        };
        Ok((LinearWeight::Quantized(weight), self.bias.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpack_common::QPackError;

    fn full_range(n: usize, k: usize) -> QuantizedTensor {
        let data = (0..n * k).map(|i| (i % 256) as u8 as i8).collect();
        QuantizedTensor::from_int_repr_per_tensor(data, &[n, k], 0.125, 5).unwrap()
    }

    #[test]
    fn zero_points_are_shifted_and_replicated() {
        let w = full_range(3, 4);
        let packed = PackedLinearWeightsQnnp::prepack(&w, None, Default::default()).unwrap();
        assert_eq!(packed.w_zero_points(), &[133, 133, 133]);
        assert_eq!(packed.w_scales(), &[0.125; 3]);
    }

    #[test]
    fn packed_path_recovers_every_int8_value() {
        let w = full_range(16, 16);
        let mut packed = PackedLinearWeightsQnnp::prepack(&w, None, Default::default()).unwrap();
        assert!(packed.release_original().is_some());
        assert!(!packed.has_original());

        let (out, _) = packed.unpack().unwrap();
        let out = out.as_quantized().unwrap().clone();
        assert_eq!(out.int_repr(), w.int_repr());
        assert_eq!(out.qscheme(), QScheme::PerTensorAffine);
        assert_eq!(out.q_scale(), Some(0.125));
        assert_eq!(out.q_zero_point(), Some(5));
    }

    #[test]
    fn retained_original_shares_storage() {
        let w = full_range(2, 3);
        let packed = PackedLinearWeightsQnnp::prepack(&w, None, Default::default()).unwrap();
        let (out, _) = packed.unpack().unwrap();
        assert!(out.as_quantized().unwrap().shares_storage(&w));
    }

    #[test]
    fn per_channel_without_original_is_unsupported() {
        let w = QuantizedTensor::from_int_repr(
            vec![1, 2, 3, 4],
            &[2, 2],
            Quantizer::PerChannelAffine { scales: vec![0.5, 0.25], zero_points: vec![0, 1], axis: 0 },
        )
        .unwrap();
        let mut packed = PackedLinearWeightsQnnp::prepack(&w, None, Default::default()).unwrap();
        assert_eq!(packed.w_zero_points(), &[128, 129]);
        packed.release_original();
        assert!(matches!(
            packed.unpack(),
            Err(QPackError::Quantization(QuantizationError::UnsupportedScheme { .. }))
        ));
    }

    #[test]
    fn kernel_zero_point_covers_int8_only() {
        assert_eq!(to_kernel_zero_point(-128).unwrap(), 0);
        assert_eq!(to_kernel_zero_point(127).unwrap(), 255);
        assert!(matches!(
            to_kernel_zero_point(200),
            Err(QPackError::Quantization(QuantizationError::InvalidZeroPoint { zero_point: 200 }))
        ));
    }
}
