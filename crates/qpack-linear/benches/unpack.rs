use candle_core::{Device, Tensor};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use qpack_common::{PackedBackend, PackingConfig, QuantizedTensor};
use qpack_linear::{PackedLinearWeightsQnnp, prepack, unpack};
use std::hint::black_box;

const SHAPES: [(usize, usize); 3] = [(256, 256), (1024, 1024), (4096, 1024)];

fn weight(n: usize, k: usize) -> QuantizedTensor {
    let data = (0..n * k).map(|i| (i % 251) as u8 as i8).collect();
    QuantizedTensor::from_int_repr_per_tensor(data, &[n, k], 0.05, 0).unwrap()
}

fn bench_unpack(c: &mut Criterion) {
    let config = PackingConfig::default();
    let mut group = c.benchmark_group("unpack");

    for (n, k) in SHAPES {
        let id = format!("{n}x{k}");
        let w = weight(n, k);

        for backend in [PackedBackend::Fbgemm, PackedBackend::Onednn] {
            let packed = prepack(w.clone(), None, backend, &config).unwrap();
            group.bench_with_input(BenchmarkId::new(backend.to_string(), &id), &packed, |b, p| {
                b.iter(|| black_box(unpack(p.as_ref()).unwrap()))
            });
        }

        let mut qnnp = PackedLinearWeightsQnnp::prepack(&w, None, config.qnnpack).unwrap();
        qnnp.release_original();
        group.bench_with_input(BenchmarkId::new("qnnpack-packed", &id), &qnnp, |b, p| {
            b.iter(|| black_box(unpack(p).unwrap()))
        });

        let x = Tensor::randn(0f32, 1.0, (n, k), &Device::Cpu).unwrap();
        let fp16 = prepack(x, None, PackedBackend::FbgemmFp16, &config).unwrap();
        group.bench_with_input(BenchmarkId::new("fbgemm-fp16", &id), &fp16, |b, p| {
            b.iter(|| black_box(unpack(p.as_ref()).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_unpack);
criterion_main!(benches);
