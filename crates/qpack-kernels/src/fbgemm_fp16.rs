//! Blocked half-precision layout for the B operand of an fp16 GEMM
//!
//! The logical `K x N` matrix is split into `block_rows x block_cols`
//! tiles stored tile-row major; each tile is row-major. Values are kept as
//! IEEE half floats and padding is zero.

use crate::{PackedMatrix, check_len};
use half::f16;
use qpack_common::{Fp16BlockingParams, MatrixOp, QPackError, Result};
use rayon::prelude::*;

/// Largest finite half-precision value.
pub const FP16_MAX: f32 = 65504.0;

/// Packed fp16 B matrix.
#[derive(Debug, Clone)]
pub struct PackedGemmMatrixFp16 {
    rows: usize,
    cols: usize,
    block_rows: usize,
    block_cols: usize,
    col_blocks: usize,
    packed: Vec<f16>,
}

impl PackedGemmMatrixFp16 {
    /// Pack a `rows x cols` half matrix; `Transpose` means `src` is `cols x rows`.
    pub fn pack(
        op: MatrixOp,
        rows: usize,
        cols: usize,
        src: &[f16],
        params: Fp16BlockingParams,
    ) -> Result<Self> {
        params.validate()?;
        if rows == 0 || cols == 0 {
            return Err(QPackError::Validation(format!(
                "cannot pack an empty {rows}x{cols} matrix"
            )));
        }
        check_len(rows * cols, src.len())?;

        let block_rows = params.block_rows.min(rows);
        let block_cols = params.block_cols;
        let row_blocks = rows.div_ceil(block_rows);
        let col_blocks = cols.div_ceil(block_cols);
        let tile = block_rows * block_cols;

        let mut packed = vec![f16::ZERO; row_blocks * col_blocks * tile];
        packed.par_chunks_mut(tile).enumerate().for_each(|(block, out)| {
            let r0 = (block / col_blocks) * block_rows;
            let c0 = (block % col_blocks) * block_cols;
            for r in 0..block_rows.min(rows - r0) {
                for c in 0..block_cols.min(cols - c0) {
                    out[r * block_cols + c] = src[op.offset(r0 + r, c0 + c, rows, cols)];
                }
            }
        });

        let matrix = Self { rows, cols, block_rows, block_cols, col_blocks, packed };
        tracing::debug!(
            layout = matrix.name(),
            rows,
            cols,
            ?op,
            block_rows,
            block_cols,
            "packed fp16 B matrix"
        );
        Ok(matrix)
    }

    /// Pack single-precision input, rounding to half and saturating at
    /// ±[`FP16_MAX`].
    pub fn pack_f32(
        op: MatrixOp,
        rows: usize,
        cols: usize,
        src: &[f32],
        params: Fp16BlockingParams,
    ) -> Result<Self> {
        let halves: Vec<f16> =
            src.par_iter().map(|&v| f16::from_f32(v.clamp(-FP16_MAX, FP16_MAX))).collect();
        Self::pack(op, rows, cols, &halves, params)
    }

    #[inline]
    fn addr(&self, r: usize, c: usize) -> usize {
        let block = (r / self.block_rows) * self.col_blocks + c / self.block_cols;
        block * self.block_rows * self.block_cols
            + (r % self.block_rows) * self.block_cols
            + c % self.block_cols
    }

    pub fn get(&self, r: usize, c: usize) -> f16 {
        self.packed[self.addr(r, c)]
    }

    /// Effective tile shape.
    pub fn blocking(&self) -> Fp16BlockingParams {
        Fp16BlockingParams { block_rows: self.block_rows, block_cols: self.block_cols }
    }

    pub fn packed_len(&self) -> usize {
        self.packed.len()
    }

    /// Write the matrix into `dest`, transposing on the way out when
    /// `op == Transpose` (`dest` is then `cols x rows`).
    pub fn unpack_with(&self, dest: &mut [f16], op: MatrixOp) -> Result<()> {
        check_len(self.numel(), dest.len())?;
        let [_, width] = op.buffer_shape(self.rows, self.cols);
        dest.par_chunks_mut(width).enumerate().for_each(|(i, line)| {
            for (j, v) in line.iter_mut().enumerate() {
                *v = match op {
                    MatrixOp::NoTranspose => self.get(i, j),
                    MatrixOp::Transpose => self.get(j, i),
                };
            }
        });
        Ok(())
    }
}

impl PackedMatrix for PackedGemmMatrixFp16 {
    type Elem = f16;

    fn name(&self) -> &'static str {
        "fbgemm-fp16"
    }

    fn num_rows(&self) -> usize {
        self.rows
    }

    fn num_cols(&self) -> usize {
        self.cols
    }

    fn unpack(&self, dest: &mut [f16]) -> Result<()> {
        self.unpack_with(dest, MatrixOp::NoTranspose)
    }
}
