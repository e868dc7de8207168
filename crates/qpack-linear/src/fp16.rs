//! Half-precision linear weights for the fp16 GEMM path

use crate::{LinearPackedParams, LinearWeight, check_bias};
use candle_core::{DType, Device, Tensor};
use half::f16;
use qpack_common::{Fp16BlockingParams, MatrixOp, PackedBackend, QPackError, Result};
use qpack_kernels::{PackedGemmMatrixFp16, PackedMatrix};

/// Weight stored as packed half floats. No quantization parameters.
#[derive(Debug)]
pub struct PackedLinearWeightFp16 {
    w: PackedGemmMatrixFp16,
    bias: Option<Tensor>,
}

impl PackedLinearWeightFp16 {
    /// Pack a float weight, or the dequantized values of an int8 one.
    /// Values outside the half range saturate.
    pub fn prepack(
        weight: &LinearWeight,
        bias: Option<Tensor>,
        blocking: Fp16BlockingParams,
    ) -> Result<Self> {
        let weight = weight.to_f32()?;
        let (n, k) = weight.dims2()?;
        if n == 0 || k == 0 {
            return Err(QPackError::Validation(format!("empty linear weight {:?}", weight.dims())));
        }
        check_bias(bias.as_ref(), n)?;

        let values = weight.flatten_all()?.to_vec1::<f32>()?;
        let w = PackedGemmMatrixFp16::pack_f32(MatrixOp::Transpose, k, n, &values, blocking)?;
        Ok(Self { w, bias })
    }

    pub fn packed(&self) -> &PackedGemmMatrixFp16 {
        &self.w
    }
}

impl LinearPackedParams for PackedLinearWeightFp16 {
    fn backend(&self) -> PackedBackend {
        PackedBackend::FbgemmFp16
    }

    fn weight_shape(&self) -> [usize; 2] {
        [self.w.num_cols(), self.w.num_rows()]
    }

    fn bias(&self) -> Option<Tensor> {
        self.bias.clone()
    }

    fn unpack(&self) -> Result<(LinearWeight, Option<Tensor>)> {
        let (rows, cols) = (self.w.num_rows(), self.w.num_cols());
        let mut unpacked = vec![f16::ZERO; rows * cols];
        self.w.unpack_with(&mut unpacked, MatrixOp::Transpose)?;

        let weight = Tensor::from_vec(unpacked, (cols, rows), &Device::Cpu)?.to_dtype(DType::F32)?;
        Ok((LinearWeight::Float(weight), self.bias.clone()))
    }
}
