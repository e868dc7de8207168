//! Property-based tests for the quantized tensor and configuration types.
//!
//! - zero-point range checks in `Quantizer::validate`
//! - exact `dequantize` / `quantize_per_*` round trips for power-of-two scales
//! - `PackingConfig` serde round trip

use proptest::prelude::*;
use qpack_common::{
    BlockingParams, PackedBackend, PackingConfig, QPackError, QuantizationError, QuantizedTensor,
    Quantizer,
};

fn pow2_scale() -> impl Strategy<Value = f64> {
    (0i32..12).prop_map(|e| 2f64.powi(-e))
}

// ── Quantizer::validate ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_int8_zero_points_validate(zp in -128i64..=127, scale in pow2_scale()) {
        let q = Quantizer::PerTensorAffine { scale, zero_point: zp };
        prop_assert!(q.validate(&[3, 4]).is_ok());
    }

    #[test]
    fn prop_wide_zero_points_are_rejected(
        zp in prop_oneof![i64::MIN..-128i64, 128i64..i64::MAX],
        channel in 0usize..4,
    ) {
        let per_tensor = Quantizer::PerTensorAffine { scale: 1.0, zero_point: zp };
        prop_assert!(matches!(
            per_tensor.validate(&[4, 2]),
            Err(QPackError::Quantization(QuantizationError::InvalidZeroPoint { .. }))
        ), "expected InvalidZeroPoint error");

        let mut zero_points = vec![0i64; 4];
        zero_points[channel] = zp;
        let per_channel = Quantizer::PerChannelAffine { scales: vec![1.0; 4], zero_points, axis: 0 };
        prop_assert!(per_channel.validate(&[4, 2]).is_err());
    }
}

// ── dequantize / quantize round trips ────────────────────────────────────────

proptest! {
    /// With a power-of-two scale, `scale * (q - zp)` is exact in f32 and
    /// quantizing it again gives back `q`.
    #[test]
    fn prop_per_tensor_round_trip(
        (rows, cols, data) in (1usize..16, 1usize..16).prop_flat_map(|(r, c)| {
            (Just(r), Just(c), prop::collection::vec(any::<i8>(), r * c))
        }),
        zp in -128i64..=127,
        scale in pow2_scale(),
    ) {
        let q = QuantizedTensor::from_int_repr_per_tensor(data.clone(), &[rows, cols], scale, zp).unwrap();
        let real = q.dequantize().unwrap();
        let values = real.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (&v, &raw) in values.iter().zip(&data) {
            prop_assert_eq!(v as f64, scale * (raw as i64 - zp) as f64);
        }

        let again = QuantizedTensor::quantize_per_tensor(&real, scale, zp).unwrap();
        prop_assert_eq!(again.int_repr(), data.as_slice());
    }

    #[test]
    fn prop_per_channel_round_trip(
        (rows, cols, data) in (1usize..12, 1usize..12).prop_flat_map(|(r, c)| {
            (Just(r), Just(c), prop::collection::vec(any::<i8>(), r * c))
        }),
        seed in any::<u64>(),
    ) {
        let scales: Vec<f64> = (0..rows).map(|i| 2f64.powi(-(((seed >> i) & 7) as i32))).collect();
        let zero_points: Vec<i64> = (0..rows).map(|i| ((seed >> (i % 56)) & 0xff) as u8 as i8 as i64).collect();
        let quantizer = Quantizer::PerChannelAffine {
            scales: scales.clone(),
            zero_points: zero_points.clone(),
            axis: 0,
        };
        let q = QuantizedTensor::from_int_repr(data.clone(), &[rows, cols], quantizer).unwrap();
        let real = q.dequantize().unwrap();

        let again = QuantizedTensor::quantize_per_channel(&real, scales, zero_points, 0).unwrap();
        prop_assert_eq!(again.int_repr(), data.as_slice());
    }
}

// ── PackingConfig serde ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_packing_config_json_round_trip(
        ncb in 1usize..64,
        ri in 1usize..8,
        groups in 1usize..128,
        backend in proptest::option::of(prop::sample::select(PackedBackend::ALL.to_vec())),
    ) {
        let config = PackingConfig {
            fbgemm: BlockingParams { ncb, kcb: ri * groups, row_interleave: ri },
            preferred_backend: backend,
            ..Default::default()
        };
        prop_assert!(config.validate().is_ok());
        let json = serde_json::to_string(&config).unwrap();
        let decoded: PackingConfig = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(decoded, config);
    }
}
