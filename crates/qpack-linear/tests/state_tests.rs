#![cfg(all(feature = "fbgemm", feature = "qnnpack", feature = "onednn"))]

use anyhow::Result;
use candle_core::{Device, Tensor};
use qpack_common::{PackedBackend, PackingConfig, QPackError, QuantizedTensor, Quantizer};
use qpack_linear::{
    BackendRequest, LinearParamsState, WeightState, prepack, repack, select_backend, unpack,
};

fn weight() -> Result<QuantizedTensor> {
    let data = (0..24).map(|i| (i * 11 % 256) as u8 as i8).collect();
    Ok(QuantizedTensor::from_int_repr_per_tensor(data, &[4, 6], 0.5, -1)?)
}

fn bias() -> Result<Tensor> {
    Ok(Tensor::new(&[0.5f32, -1.0, 2.0, 0.0], &Device::Cpu)?)
}

#[test]
fn capture_json_restore_round_trip() -> Result<()> {
    let config = PackingConfig::default();
    let w = weight()?;
    let packed = prepack(w.clone(), Some(bias()?), PackedBackend::Fbgemm, &config)?;

    let state = LinearParamsState::capture(packed.as_ref())?;
    assert_eq!(state.backend, PackedBackend::Fbgemm);
    assert_eq!(state.bias, Some(vec![0.5, -1.0, 2.0, 0.0]));
    match &state.weight {
        WeightState::QInt8 { shape, int_repr, quantizer } => {
            assert_eq!(shape, &[4, 6]);
            assert_eq!(int_repr.as_slice(), w.int_repr());
            assert_eq!(quantizer, &Quantizer::PerTensorAffine { scale: 0.5, zero_point: -1 });
        }
        other => panic!("expected int8 state, got {other:?}"),
    }

    let json = state.to_json()?;
    let decoded = LinearParamsState::from_json(&json)?;
    assert_eq!(decoded, state);

    let restored = decoded.restore(&config)?;
    assert_eq!(restored.backend(), PackedBackend::Fbgemm);
    let (out, b) = unpack(restored.as_ref())?;
    assert_eq!(out.as_quantized().expect("int8").int_repr(), w.int_repr());
    assert_eq!(b.expect("bias restored").to_vec1::<f32>()?, vec![0.5, -1.0, 2.0, 0.0]);
    Ok(())
}

#[test]
fn repack_between_int8_backends_preserves_values() -> Result<()> {
    let config = PackingConfig::default();
    let w = weight()?;
    let mut current = prepack(w.clone(), Some(bias()?), PackedBackend::Fbgemm, &config)?;

    for target in [PackedBackend::Qnnpack, PackedBackend::Onednn, PackedBackend::Fbgemm] {
        current = repack(current.as_ref(), target, &config)?;
        assert_eq!(current.backend(), target);
        let (out, b) = unpack(current.as_ref())?;
        let out = out.as_quantized().expect("int8");
        assert_eq!(out.int_repr(), w.int_repr(), "{target}");
        assert_eq!(out.q_zero_point(), Some(-1), "{target}");
        assert!(b.is_some());
    }
    Ok(())
}

#[test]
fn repack_to_fp16_dequantizes() -> Result<()> {
    let config = PackingConfig::default();
    let w = weight()?;
    let packed = prepack(w.clone(), None, PackedBackend::Qnnpack, &config)?;
    let fp16 = repack(packed.as_ref(), PackedBackend::FbgemmFp16, &config)?;

    let state = LinearParamsState::capture(fp16.as_ref())?;
    match state.weight {
        WeightState::Float { shape, data } => {
            assert_eq!(shape, vec![4, 6]);
            assert_eq!(data, w.dequantize()?.flatten_all()?.to_vec1::<f32>()?);
        }
        other => panic!("expected float state, got {other:?}"),
    }
    Ok(())
}

#[test]
fn fp16_cannot_be_repacked_as_int8() -> Result<()> {
    let config = PackingConfig::default();
    let x = Tensor::ones((2, 2), candle_core::DType::F32, &Device::Cpu)?;
    let fp16 = prepack(x, None, PackedBackend::FbgemmFp16, &config)?;
    assert!(matches!(
        repack(fp16.as_ref(), PackedBackend::Fbgemm, &config),
        Err(QPackError::Validation(_))
    ));
    Ok(())
}

#[test]
fn selection_feeds_prepack() -> Result<()> {
    let config = PackingConfig { preferred_backend: Some(PackedBackend::Onednn), ..Default::default() };
    let selection = select_backend(BackendRequest::Auto, &config)?;
    assert_eq!(selection.selected, PackedBackend::Onednn);

    let packed = prepack(weight()?, None, selection.selected, &config)?;
    assert_eq!(packed.backend(), PackedBackend::Onednn);
    Ok(())
}
