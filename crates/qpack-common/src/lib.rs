//! Common types, traits, and utilities for packed quantized linear weights
//!
//! This crate provides the foundational types shared by the kernel and
//! linear-layer crates: the error taxonomy, quantization schemes, the
//! quantized tensor factory, the packed-backend registry and configuration.

pub mod config;
pub mod error;
pub mod kernel_registry;
pub mod tensor;
pub mod types;

pub use config::*;
pub use error::*;
pub use kernel_registry::{KernelCapabilities, PackedBackend};
pub use tensor::*;
pub use types::*;
