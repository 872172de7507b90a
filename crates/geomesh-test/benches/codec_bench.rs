//! Benchmarks for signed report encoding and verification

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use geomesh_core::{GeoLocation, HazardData, HazardType, Severity, Timestamp};
use geomesh_crypto::codec::{decode_verified, encode_report, sign, verify};
use geomesh_crypto::Identity;

const NOW: Timestamp = Timestamp(1_700_000_000_000);

fn hazard() -> HazardData {
    HazardData {
        hazard_type: HazardType::Accident,
        severity: Severity::High,
        description: Some("two cars, left lane blocked".to_string()),
        direction: Some(270.0),
        lane_affected: Some("left".to_string()),
    }
}

fn bench_sign(c: &mut Criterion) {
    let identity = Identity::generate();
    let location = GeoLocation::new(52.52, 13.405, NOW);

    c.bench_function("sign_hazard", |b| {
        b.iter(|| {
            sign(
                black_box(hazard()),
                black_box(location.clone()),
                &identity,
                NOW,
            )
            .unwrap()
        })
    });
}

fn bench_verify(c: &mut Criterion) {
    let identity = Identity::generate();
    let report = sign(hazard(), GeoLocation::new(52.52, 13.405, NOW), &identity, NOW).unwrap();

    c.bench_function("verify_hazard", |b| b.iter(|| verify(black_box(&report))));
}

fn bench_decode_verified(c: &mut Criterion) {
    let identity = Identity::generate();
    let report = sign(hazard(), GeoLocation::new(52.52, 13.405, NOW), &identity, NOW).unwrap();
    let bytes = encode_report(&report).unwrap();

    let mut group = c.benchmark_group("inbound_hazard");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("decode_verified", |b| {
        b.iter(|| decode_verified::<HazardData>(black_box(&bytes), NOW).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_sign, bench_verify, bench_decode_verified);
criterion_main!(benches);
