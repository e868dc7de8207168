//! Unsigned nr x kr tile layout used by mobile int8 GEMM micro-kernels
//!
//! Weights arrive as `[N, K]` uint8 values in the kernel's unsigned domain
//! (signed weight + 128). For every group of `nr` output channels the packed
//! buffer holds:
//!
//! ```text
//! [ nr x i32 bias (little endian) ][ K/kr groups x nr lanes x kr bytes ]
//! ```
//!
//! Columns past `K` are padded with the lane's kernel zero point so they
//! contribute nothing to the dot product; lanes past `N` repeat the last
//! channel's zero point.

use crate::{PackedMatrix, check_len, round_up};
use qpack_common::{KernelError, QPackError, QnnpackTileParams, Result};

const BIAS_BYTES: usize = std::mem::size_of::<i32>();

/// Packed uint8 weight matrix with interleaved bias slots.
#[derive(Debug, Clone)]
pub struct QnnpackPackBMatrix {
    output_channels: usize,
    input_channels: usize,
    tile: QnnpackTileParams,
    k_stride: usize,
    packed: Vec<u8>,
}

impl QnnpackPackBMatrix {
    /// Pack `[output_channels, input_channels]` unsigned weights.
    ///
    /// `kernel_zero_points` has one entry per output channel; `bias`, when
    /// given, is the int32 accumulator bias per output channel.
    pub fn pack(
        output_channels: usize,
        input_channels: usize,
        weights: &[u8],
        kernel_zero_points: &[u8],
        bias: Option<&[i32]>,
        tile: QnnpackTileParams,
    ) -> Result<Self> {
        tile.validate()?;
        if output_channels == 0 || input_channels == 0 {
            return Err(QPackError::Validation(format!(
                "cannot pack an empty {output_channels}x{input_channels} matrix"
            )));
        }
        check_len(output_channels * input_channels, weights.len())?;
        check_len(output_channels, kernel_zero_points.len())?;
        if let Some(bias) = bias {
            check_len(output_channels, bias.len())?;
        }

        let k_stride = round_up(input_channels, tile.kr);
        let mut matrix = Self {
            output_channels,
            input_channels,
            tile,
            k_stride,
            packed: Vec::new(),
        };
        let blocks = output_channels.div_ceil(tile.nr);
        let mut packed = vec![0u8; blocks * matrix.block_len()];

        for block in 0..blocks {
            let base = block * matrix.block_len();
            for lane in 0..tile.nr {
                let ch = block * tile.nr + lane;
                let b = match bias {
                    Some(bias) if ch < output_channels => bias[ch],
                    _ => 0,
                };
                let slot = base + lane * BIAS_BYTES;
                packed[slot..slot + BIAS_BYTES].copy_from_slice(&b.to_le_bytes());
            }
        }
        matrix.for_each_slot(|ch, k, pos| {
            packed[pos] = match (ch < output_channels, k < input_channels) {
                (true, true) => weights[ch * input_channels + k],
                (true, false) => kernel_zero_points[ch],
                (false, _) => kernel_zero_points[output_channels - 1],
            };
        });
        matrix.packed = packed;

        tracing::debug!(
            layout = matrix.name(),
            output_channels,
            input_channels,
            nr = tile.nr,
            kr = tile.kr,
            packed_len = matrix.packed.len(),
            "packed qnnpack weights"
        );
        Ok(matrix)
    }

    fn block_len(&self) -> usize {
        self.tile.nr * (BIAS_BYTES + self.k_stride)
    }

    /// Visit every weight slot as `(channel, column, packed offset)`,
    /// padding included.
    fn for_each_slot(&self, mut f: impl FnMut(usize, usize, usize)) {
        let QnnpackTileParams { nr, kr } = self.tile;
        let blocks = self.output_channels.div_ceil(nr);
        for block in 0..blocks {
            let weights_base = block * self.block_len() + nr * BIAS_BYTES;
            for group in 0..self.k_stride / kr {
                for lane in 0..nr {
                    for kk in 0..kr {
                        let pos = weights_base + group * nr * kr + lane * kr + kk;
                        f(block * nr + lane, group * kr + kk, pos);
                    }
                }
            }
        }
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    pub fn tile(&self) -> QnnpackTileParams {
        self.tile
    }

    pub fn packed_len(&self) -> usize {
        self.packed.len()
    }

    /// Bias values stored in the packed buffer, one per output channel.
    pub fn bias(&self) -> Vec<i32> {
        (0..self.output_channels)
            .map(|ch| {
                let (block, lane) = (ch / self.tile.nr, ch % self.tile.nr);
                let slot = block * self.block_len() + lane * BIAS_BYTES;
                let mut bytes = [0u8; BIAS_BYTES];
                bytes.copy_from_slice(&self.packed[slot..slot + BIAS_BYTES]);
                i32::from_le_bytes(bytes)
            })
            .collect()
    }

    /// Write the `[N, K]` weights into an int8 buffer without changing their
    /// bits: each byte is the unsigned kernel value reinterpreted as `i8`.
    ///
    /// The padding columns of each channel are checked against
    /// `kernel_zero_points`; a mismatch means the buffer was corrupted or
    /// packed with different zero points.
    pub fn unpack_weights(&self, kernel_zero_points: &[u8], dest: &mut [i8]) -> Result<()> {
        check_len(self.output_channels, kernel_zero_points.len())?;
        check_len(self.numel(), dest.len())?;

        let mut corrupt = None;
        self.for_each_slot(|ch, k, pos| {
            if ch >= self.output_channels {
                return;
            }
            let value = self.packed[pos];
            if k < self.input_channels {
                dest[ch * self.input_channels + k] = value as i8;
            } else if value != kernel_zero_points[ch] && corrupt.is_none() {
                corrupt = Some((ch, k, value));
            }
        });

        if let Some((ch, k, value)) = corrupt {
            return Err(KernelError::CorruptPacking {
                reason: format!(
                    "padding at channel {ch}, column {k} is {value}, expected zero point {}",
                    kernel_zero_points[ch]
                ),
            }
            .into());
        }
        Ok(())
    }
}

impl PackedMatrix for QnnpackPackBMatrix {
    type Elem = u8;

    fn name(&self) -> &'static str {
        "qnnpack"
    }

    fn num_rows(&self) -> usize {
        self.output_channels
    }

    fn num_cols(&self) -> usize {
        self.input_channels
    }

    /// Raw unsigned kernel values as `[N, K]`.
    fn unpack(&self, dest: &mut [u8]) -> Result<()> {
        check_len(self.numel(), dest.len())?;
        self.for_each_slot(|ch, k, pos| {
            if ch < self.output_channels && k < self.input_channels {
                dest[ch * self.input_channels + k] = self.packed[pos];
            }
        });
        Ok(())
    }
}
