//! Int8 linear weights in the blocked server-GEMM layout

use crate::{LinearPackedParams, LinearWeight, check_bias, linear_dims};
use candle_core::Tensor;
use qpack_common::{
    BlockingParams, MatrixOp, PackedBackend, QScheme, QuantizationError, QuantizedTensor,
    Quantizer, Result,
};
use qpack_kernels::{PackBMatrix, PackedMatrix};

fn to_i32_zero_point(zero_point: i64) -> Result<i32> {
    i32::try_from(zero_point)
        .map_err(|_| QuantizationError::InvalidZeroPoint { zero_point }.into())
}

/// Packed int8 weight with per-tensor or per-channel affine parameters.
///
/// The `[N, K]` weight is packed as the transposed `K x N` B operand, so
/// `num_cols()` of the packed matrix is the number of output channels.
#[derive(Debug)]
pub struct PackedLinearWeight {
    w: PackBMatrix,
    bias: Option<Tensor>,
    col_offsets: Vec<i32>,
    w_scale: Vec<f32>,
    w_zp: Vec<i32>,
    q_scheme: QScheme,
}

impl PackedLinearWeight {
    pub fn prepack(
        weight: &QuantizedTensor,
        bias: Option<Tensor>,
        blocking: BlockingParams,
    ) -> Result<Self> {
        let (n, k) = linear_dims(weight)?;
        check_bias(bias.as_ref(), n)?;

        let (w_scale, w_zp) = match weight.quantizer() {
            Quantizer::PerTensorAffine { scale, zero_point } => {
                (vec![*scale as f32], vec![to_i32_zero_point(*zero_point)?])
            }
            Quantizer::PerChannelAffine { scales, zero_points, axis } => {
                if *axis != 0 {
                    return Err(QuantizationError::UnsupportedScheme {
                        backend: PackedBackend::Fbgemm.to_string(),
                        scheme: format!("per-channel-affine on axis {axis}"),
                    }
                    .into());
                }
                (
                    scales.iter().map(|&s| s as f32).collect(),
                    zero_points.iter().map(|&z| to_i32_zero_point(z)).collect::<Result<_>>()?,
                )
            }
        };

        let w = PackBMatrix::pack(MatrixOp::Transpose, k, n, weight.int_repr(), blocking)?;
        let col_offsets = w.col_offsets(&w_zp)?;

        Ok(Self { w, bias, col_offsets, w_scale, w_zp, q_scheme: weight.qscheme() })
    }

    pub fn packed(&self) -> &PackBMatrix {
        &self.w
    }

    pub fn qscheme(&self) -> QScheme {
        self.q_scheme
    }

    pub fn w_scale(&self) -> &[f32] {
        &self.w_scale
    }

    pub fn w_zp(&self) -> &[i32] {
        &self.w_zp
    }

    /// Per-output-channel requantization offsets.
    pub fn col_offsets(&self) -> &[i32] {
        &self.col_offsets
    }
}

impl LinearPackedParams for PackedLinearWeight {
    fn backend(&self) -> PackedBackend {
        PackedBackend::Fbgemm
    }

    fn weight_shape(&self) -> [usize; 2] {
        [self.w.num_cols(), self.w.num_rows()]
    }

    fn bias(&self) -> Option<Tensor> {
        self.bias.clone()
    }

    fn unpack(&self) -> Result<(LinearWeight, Option<Tensor>)> {
        let shape = self.weight_shape();

        let mut weight = match self.q_scheme {
            QScheme::PerTensorAffine => QuantizedTensor::empty_affine(
                &shape,
                self.w_scale[0] as f64,
                self.w_zp[0] as i64,
            ),
            QScheme::PerChannelAffine => QuantizedTensor::empty_per_channel_affine(
                &shape,
                self.w_scale.iter().map(|&s| s as f64).collect(),
                self.w_zp.iter().map(|&z| z as i64).collect(),
                0,
            ),
        };

        self.w.unpack(weight.data_mut())?;
        Ok((LinearWeight::Quantized(weight), self.bias.clone()))
    }
}
