//! Packing configuration: layout parameters for each backend
//!
//! Defaults mirror the block sizes the reference kernels use on AVX2-class
//! hardware. Values can be loaded from a TOML or JSON file and overridden
//! through `QPACK_*` environment variables.

use crate::{KernelError, PackedBackend, QPackError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Blocking of the int8 `PackBMatrix` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingParams {
    /// Columns per block.
    pub ncb: usize,
    /// Rows per block before shrinking to the matrix height.
    pub kcb: usize,
    /// Consecutive rows stored together for each column.
    pub row_interleave: usize,
}

impl Default for BlockingParams {
    fn default() -> Self {
        Self { ncb: 8, kcb: 512, row_interleave: 4 }
    }
}

impl BlockingParams {
    pub fn validate(&self) -> Result<()> {
        if self.ncb == 0 || self.kcb == 0 || self.row_interleave == 0 {
            return Err(KernelError::InvalidBlocking {
                reason: format!("block sizes must be non-zero: {self:?}"),
            }
            .into());
        }
        if self.kcb % self.row_interleave != 0 {
            return Err(KernelError::InvalidBlocking {
                reason: format!(
                    "kcb {} is not a multiple of row_interleave {}",
                    self.kcb, self.row_interleave
                ),
            }
            .into());
        }
        Ok(())
    }
}

/// Blocking of the half-precision packed layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fp16BlockingParams {
    pub block_rows: usize,
    pub block_cols: usize,
}

impl Default for Fp16BlockingParams {
    fn default() -> Self {
        Self { block_rows: 512, block_cols: 16 }
    }
}

impl Fp16BlockingParams {
    pub fn validate(&self) -> Result<()> {
        if self.block_rows == 0 || self.block_cols == 0 {
            return Err(KernelError::InvalidBlocking {
                reason: format!("fp16 block sizes must be non-zero: {self:?}"),
            }
            .into());
        }
        Ok(())
    }
}

/// Micro-kernel tile of the unsigned mobile layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QnnpackTileParams {
    /// Output channels per tile.
    pub nr: usize,
    /// Input columns per group inside a tile.
    pub kr: usize,
}

impl Default for QnnpackTileParams {
    fn default() -> Self {
        Self { nr: 8, kr: 1 }
    }
}

impl QnnpackTileParams {
    pub fn validate(&self) -> Result<()> {
        if self.nr == 0 || self.kr == 0 {
            return Err(KernelError::InvalidBlocking {
                reason: format!("tile sizes must be non-zero: {self:?}"),
            }
            .into());
        }
        Ok(())
    }
}

/// Top-level packing configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackingConfig {
    pub fbgemm: BlockingParams,
    pub fp16: Fp16BlockingParams,
    pub qnnpack: QnnpackTileParams,
    /// Backend used when a caller asks for automatic selection.
    pub preferred_backend: Option<PackedBackend>,
}

impl PackingConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            other => {
                return Err(QPackError::Config(format!(
                    "unsupported config format: {}",
                    other.unwrap_or("<none>")
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env()
    }

    /// Apply `QPACK_*` environment overrides on top of `self`.
    pub fn merge_env(mut self) -> Result<Self> {
        if let Some(v) = env_usize("QPACK_FBGEMM_NCB")? {
            self.fbgemm.ncb = v;
        }
        if let Some(v) = env_usize("QPACK_FBGEMM_KCB")? {
            self.fbgemm.kcb = v;
        }
        if let Some(v) = env_usize("QPACK_FBGEMM_ROW_INTERLEAVE")? {
            self.fbgemm.row_interleave = v;
        }
        if let Some(v) = env_usize("QPACK_FP16_BLOCK_ROWS")? {
            self.fp16.block_rows = v;
        }
        if let Some(v) = env_usize("QPACK_FP16_BLOCK_COLS")? {
            self.fp16.block_cols = v;
        }
        if let Some(v) = env_usize("QPACK_QNNPACK_NR")? {
            self.qnnpack.nr = v;
        }
        if let Some(v) = env_usize("QPACK_QNNPACK_KR")? {
            self.qnnpack.kr = v;
        }
        if let Ok(v) = env::var("QPACK_BACKEND") {
            self.preferred_backend = match v.trim() {
                "" | "auto" => None,
                name => Some(name.parse()?),
            };
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.fbgemm.validate()?;
        self.fp16.validate()?;
        self.qnnpack.validate()
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| QPackError::Config(format!("{name}={v:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PackingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fbgemm, BlockingParams { ncb: 8, kcb: 512, row_interleave: 4 });
        assert_eq!(config.qnnpack, QnnpackTileParams { nr: 8, kr: 1 });
        assert!(config.preferred_backend.is_none());
    }

    #[test]
    fn kcb_must_be_multiple_of_interleave() {
        let params = BlockingParams { ncb: 8, kcb: 10, row_interleave: 4 };
        assert!(matches!(
            params.validate(),
            Err(QPackError::Kernel(KernelError::InvalidBlocking { .. }))
        ));
    }

    #[test]
    fn zero_tile_is_rejected() {
        assert!(QnnpackTileParams { nr: 0, kr: 1 }.validate().is_err());
        assert!(Fp16BlockingParams { block_rows: 4, block_cols: 0 }.validate().is_err());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: PackingConfig = toml::from_str(
            r#"
            preferred_backend = "qnnpack"

            [fbgemm]
            ncb = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.fbgemm.ncb, 16);
        assert_eq!(config.fbgemm.kcb, 512);
        assert_eq!(config.preferred_backend, Some(PackedBackend::Qnnpack));
    }
}
