//! Criterion benchmarks for bulwark-sketch hot paths.
//!
//! Covers: ladder height reads and steps, and membership adds.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bulwark_sketch::{AgingMembershipSketch, BinomialLadderSketch, MembershipConfig};

fn bench_ladder_get_height(c: &mut Criterion) {
    let ladder = BinomialLadderSketch::with_key(1 << 20, 48, [7u8; 32]).unwrap();

    c.bench_function("ladder_get_height", |b| {
        b.iter(|| ladder.get_height(black_box(b"correcthorsebatterystaple")))
    });
}

fn bench_ladder_step(c: &mut Criterion) {
    let ladder = BinomialLadderSketch::with_key(1 << 20, 48, [7u8; 32]).unwrap();
    let mut i = 0u64;

    c.bench_function("ladder_step", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            ladder.step(black_box(&i.to_le_bytes()))
        })
    });
}

fn bench_membership_add(c: &mut Criterion) {
    let sketch = AgingMembershipSketch::new(&MembershipConfig::default()).unwrap();
    let mut i = 0u64;

    c.bench_function("membership_add", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            sketch.add_member(black_box(&i.to_le_bytes()))
        })
    });
}

criterion_group!(benches, bench_ladder_get_height, bench_ladder_step, bench_membership_add);
criterion_main!(benches);
