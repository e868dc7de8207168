//! Packed-matrix layouts for quantized and half-precision GEMM kernels
//!
//! Each type here owns a weight matrix rearranged into the memory layout a
//! family of GEMM micro-kernels expects, and knows how to write it back out
//! in plain row-major order. Callers treat them as opaque through
//! [`PackedMatrix`]; nothing outside this crate depends on the layouts.

use qpack_common::{KernelError, Result};

pub mod fbgemm;
pub mod fbgemm_fp16;
pub mod qnnpack;

pub use fbgemm::PackBMatrix;
pub use fbgemm_fp16::PackedGemmMatrixFp16;
pub use qnnpack::QnnpackPackBMatrix;

/// A matrix held in a kernel-specific packed layout.
pub trait PackedMatrix: Send + Sync {
    /// Element type written by [`PackedMatrix::unpack`].
    type Elem: Copy + Send + Sync;

    fn name(&self) -> &'static str;

    /// Logical row count of the packed matrix.
    fn num_rows(&self) -> usize;

    /// Logical column count of the packed matrix.
    fn num_cols(&self) -> usize;

    /// Write the matrix into `dest` in its default orientation.
    ///
    /// `dest` must hold exactly `num_rows() * num_cols()` elements; the
    /// primitive never allocates.
    fn unpack(&self, dest: &mut [Self::Elem]) -> Result<()>;

    fn numel(&self) -> usize {
        self.num_rows() * self.num_cols()
    }
}

/// Fail unless a caller-provided buffer has exactly `expected` elements.
pub(crate) fn check_len(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(KernelError::BufferSizeMismatch { expected, got }.into());
    }
    Ok(())
}

#[inline]
pub(crate) fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}
