//! Int8 linear weights handed to the vendor math library as-is

use crate::{LinearPackedParams, LinearWeight, check_bias, linear_dims};
use candle_core::Tensor;
use qpack_common::{PackedBackend, QuantizedTensor, Result};

/// oneDNN handle. The library reorders weights internally, so the handle
/// only needs the original weight and bias to answer `unpack`.
#[derive(Debug)]
pub struct PackedLinearWeightsOnednn {
    orig_weight: QuantizedTensor,
    orig_bias: Option<Tensor>,
}

impl PackedLinearWeightsOnednn {
    pub fn prepack(weight: QuantizedTensor, bias: Option<Tensor>) -> Result<Self> {
        let (n, _) = linear_dims(&weight)?;
        check_bias(bias.as_ref(), n)?;
        Ok(Self { orig_weight: weight, orig_bias: bias })
    }
}

impl LinearPackedParams for PackedLinearWeightsOnednn {
    fn backend(&self) -> PackedBackend {
        PackedBackend::Onednn
    }

    fn weight_shape(&self) -> [usize; 2] {
        let shape = self.orig_weight.shape();
        [shape[0], shape[1]]
    }

    fn bias(&self) -> Option<Tensor> {
        self.orig_bias.clone()
    }

    fn unpack(&self) -> Result<(LinearWeight, Option<Tensor>)> {
        Ok((LinearWeight::Quantized(self.orig_weight.clone()), self.orig_bias.clone()))
    }
}
