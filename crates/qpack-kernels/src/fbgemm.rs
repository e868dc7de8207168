//! Blocked, row-interleaved int8 layout for the B operand of an int8 GEMM
//!
//! The logical matrix is `K x N` (rows x cols). It is cut into blocks of
//! `kcb x ncb`; blocks are stored row-block major, and inside a block every
//! group of `row_interleave` consecutive rows is stored column by column so
//! a micro-kernel can load `row_interleave` values of one column at once:
//!
//! ```text
//! offset(k, n) = block_base(k / kcb, n / ncb)
//!              + (kr / ri) * ncb * ri + nc * ri + kr % ri
//! ```
//!
//! Padding rows and columns are zero.

use crate::{PackedMatrix, check_len, round_up};
use qpack_common::{BlockingParams, MatrixOp, QPackError, Result};
use rayon::prelude::*;

/// Packed int8 B matrix.
#[derive(Debug, Clone)]
pub struct PackBMatrix {
    op: MatrixOp,
    rows: usize,
    cols: usize,
    blocking: BlockingParams,
    col_blocks: usize,
    packed: Vec<i8>,
}

impl PackBMatrix {
    /// Pack a `rows x cols` matrix.
    ///
    /// With [`MatrixOp::Transpose`] the source is the `cols x rows`
    /// transpose in row-major order, which is how a linear layer's
    /// `[out_features, in_features]` weight is handed over. Unpacking writes
    /// the same orientation back.
    pub fn pack(
        op: MatrixOp,
        rows: usize,
        cols: usize,
        src: &[i8],
        params: BlockingParams,
    ) -> Result<Self> {
        params.validate()?;
        if rows == 0 || cols == 0 {
            return Err(QPackError::Validation(format!(
                "cannot pack an empty {rows}x{cols} matrix"
            )));
        }
        check_len(rows * cols, src.len())?;

        // Short matrices get one block of rows rounded to the interleave.
        let kcb = params.kcb.min(round_up(rows, params.row_interleave));
        let blocking = BlockingParams { kcb, ..params };
        let row_blocks = rows.div_ceil(kcb);
        let col_blocks = cols.div_ceil(blocking.ncb);
        let block_len = kcb * blocking.ncb;

        let mut matrix = Self {
            op,
            rows,
            cols,
            blocking,
            col_blocks,
            packed: vec![0; row_blocks * col_blocks * block_len],
        };

        let mut packed = std::mem::take(&mut matrix.packed);
        packed.par_chunks_mut(block_len).enumerate().for_each(|(block, out)| {
            let k0 = (block / col_blocks) * kcb;
            let n0 = (block % col_blocks) * blocking.ncb;
            for kr in 0..kcb.min(rows - k0) {
                for nc in 0..blocking.ncb.min(cols - n0) {
                    out[matrix.inner_offset(kr, nc)] = src[op.offset(k0 + kr, n0 + nc, rows, cols)];
                }
            }
        });
        matrix.packed = packed;

        tracing::debug!(
            layout = matrix.name(),
            rows,
            cols,
            ?op,
            ncb = blocking.ncb,
            kcb,
            packed_len = matrix.packed.len(),
            "packed int8 B matrix"
        );
        Ok(matrix)
    }

    #[inline]
    fn inner_offset(&self, kr: usize, nc: usize) -> usize {
        let ri = self.blocking.row_interleave;
        (kr / ri) * self.blocking.ncb * ri + nc * ri + kr % ri
    }

    #[inline]
    fn addr(&self, k: usize, n: usize) -> usize {
        let BlockingParams { ncb, kcb, .. } = self.blocking;
        let block = (k / kcb) * self.col_blocks + n / ncb;
        block * kcb * ncb + self.inner_offset(k % kcb, n % ncb)
    }

    /// Logical element `(k, n)`.
    pub fn get(&self, k: usize, n: usize) -> i8 {
        self.packed[self.addr(k, n)]
    }

    pub fn op(&self) -> MatrixOp {
        self.op
    }

    /// Effective blocking (row block shrunk to fit the matrix).
    pub fn blocking(&self) -> BlockingParams {
        self.blocking
    }

    /// Length of the packed buffer including padding.
    pub fn packed_len(&self) -> usize {
        self.packed.len()
    }

    pub fn packed_data(&self) -> &[i8] {
        &self.packed
    }

    /// Column sums with the zero-point correction the int8 GEMM needs:
    /// `sum_k B[k][n] - zp[n] * K`.
    ///
    /// `zero_points` holds either one value for the whole matrix or one per
    /// column.
    pub fn col_offsets(&self, zero_points: &[i32]) -> Result<Vec<i32>> {
        if zero_points.len() != 1 {
            check_len(self.cols, zero_points.len())?;
        }
        let offsets = (0..self.cols)
            .into_par_iter()
            .map(|n| {
                let zp = zero_points[if zero_points.len() == 1 { 0 } else { n }];
                let sum: i32 = (0..self.rows).map(|k| self.get(k, n) as i32).sum();
                sum - zp * self.rows as i32
            })
            .collect();
        Ok(offsets)
    }
}

impl PackedMatrix for PackBMatrix {
    type Elem = i8;

    fn name(&self) -> &'static str {
        "fbgemm-int8"
    }

    fn num_rows(&self) -> usize {
        self.rows
    }

    fn num_cols(&self) -> usize {
        self.cols
    }

    /// Writes the matrix in the orientation it was packed from.
    fn unpack(&self, dest: &mut [i8]) -> Result<()> {
        check_len(self.numel(), dest.len())?;
        let [_, width] = self.op.buffer_shape(self.rows, self.cols);
        dest.par_chunks_mut(width).enumerate().for_each(|(i, line)| {
            for (j, v) in line.iter_mut().enumerate() {
                let (k, n) = match self.op {
                    MatrixOp::NoTranspose => (i, j),
                    MatrixOp::Transpose => (j, i),
                };
                *v = self.get(k, n);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpack_common::{KernelError, QPackError};

    fn ramp(len: usize) -> Vec<i8> {
        (0..len).map(|i| (i % 251) as i8).collect()
    }

    #[test]
    fn row_interleave_layout_of_first_block() {
        // 4x2, ri=2, ncb=2: rows 0-1 interleaved per column, then rows 2-3.
        let src: Vec<i8> = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let params = BlockingParams { ncb: 2, kcb: 4, row_interleave: 2 };
        let b = PackBMatrix::pack(MatrixOp::NoTranspose, 4, 2, &src, params).unwrap();
        assert_eq!(b.packed_data(), &[1, 3, 2, 4, 5, 7, 6, 8]);
        assert_eq!(b.name(), "fbgemm-int8");
    }

    #[test]
    fn short_matrix_shrinks_row_block() {
        let params = BlockingParams::default();
        let b = PackBMatrix::pack(MatrixOp::NoTranspose, 3, 5, &ramp(15), params).unwrap();
        assert_eq!(b.blocking().kcb, 4);
        // one row block of 4, one column block of 8
        assert_eq!(b.packed_len(), 4 * 8);
    }

    #[test]
    fn padding_is_zero() {
        let params = BlockingParams { ncb: 4, kcb: 4, row_interleave: 4 };
        let b = PackBMatrix::pack(MatrixOp::NoTranspose, 3, 3, &[-1; 9], params).unwrap();
        let nonzero = b.packed_data().iter().filter(|&&v| v != 0).count();
        assert_eq!(nonzero, 9);
    }

    #[test]
    fn unpack_restores_transposed_source() {
        let params = BlockingParams { ncb: 3, kcb: 4, row_interleave: 2 };
        // source is [N=7, K=10], logical B is 10x7
        let src = ramp(70);
        let b = PackBMatrix::pack(MatrixOp::Transpose, 10, 7, &src, params).unwrap();
        assert_eq!(b.get(2, 1), src[1 * 10 + 2]);
        let mut out = vec![0i8; 70];
        b.unpack(&mut out).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn unpack_rejects_wrong_buffer() {
        let b = PackBMatrix::pack(MatrixOp::NoTranspose, 2, 2, &[1, 2, 3, 4], Default::default())
            .unwrap();
        let mut out = vec![0i8; 3];
        assert!(matches!(
            b.unpack(&mut out),
            Err(QPackError::Kernel(KernelError::BufferSizeMismatch { expected: 4, got: 3 }))
        ));
    }

    #[test]
    fn col_offsets_subtract_zero_point() {
        // B = [[1, 2], [3, 4]], per-tensor zp 1 and per-column zps
        let b = PackBMatrix::pack(MatrixOp::NoTranspose, 2, 2, &[1, 2, 3, 4], Default::default())
            .unwrap();
        assert_eq!(b.col_offsets(&[1]).unwrap(), vec![4 - 2, 6 - 2]);
        assert_eq!(b.col_offsets(&[0, 3]).unwrap(), vec![4, 0]);
        assert!(b.col_offsets(&[0, 1, 2]).is_err());
    }

    #[test]
    fn empty_matrix_is_rejected() {
        assert!(PackBMatrix::pack(MatrixOp::NoTranspose, 0, 4, &[], Default::default()).is_err());
    }
}
