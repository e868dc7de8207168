//! Shared enums describing quantization schemes and matrix orientation

use serde::{Deserialize, Serialize};
use std::fmt;

/// How quantization parameters map onto a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QScheme {
    /// One (scale, zero point) pair for the whole tensor.
    PerTensorAffine,
    /// One (scale, zero point) pair per slice along the channel axis.
    PerChannelAffine,
}

impl fmt::Display for QScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QScheme::PerTensorAffine => write!(f, "per-tensor-affine"),
            QScheme::PerChannelAffine => write!(f, "per-channel-affine"),
        }
    }
}

/// Orientation of a source or destination buffer relative to the logical
/// `[rows, cols]` matrix held by a packed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatrixOp {
    NoTranspose,
    Transpose,
}

impl MatrixOp {
    /// Shape of a buffer holding a `[rows, cols]` matrix under this op.
    pub fn buffer_shape(self, rows: usize, cols: usize) -> [usize; 2] {
        match self {
            MatrixOp::NoTranspose => [rows, cols],
            MatrixOp::Transpose => [cols, rows],
        }
    }

    /// Row-major offset of logical element `(r, c)` inside such a buffer.
    #[inline]
    pub fn offset(self, r: usize, c: usize, rows: usize, cols: usize) -> usize {
        match self {
            MatrixOp::NoTranspose => r * cols + c,
            MatrixOp::Transpose => c * rows + r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qscheme_display() {
        assert_eq!(QScheme::PerTensorAffine.to_string(), "per-tensor-affine");
        assert_eq!(QScheme::PerChannelAffine.to_string(), "per-channel-affine");
    }

    #[test]
    fn transpose_offsets_walk_columns() {
        // 2x3 logical matrix stored as its 3x2 transpose
        assert_eq!(MatrixOp::Transpose.buffer_shape(2, 3), [3, 2]);
        assert_eq!(MatrixOp::Transpose.offset(0, 0, 2, 3), 0);
        assert_eq!(MatrixOp::Transpose.offset(1, 0, 2, 3), 1);
        assert_eq!(MatrixOp::Transpose.offset(0, 2, 2, 3), 4);
        assert_eq!(MatrixOp::NoTranspose.offset(1, 2, 2, 3), 5);
    }
}
