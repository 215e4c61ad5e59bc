//! Benchmark for hex pattern parsing.
//!
//! Covers both [`memscan::hex::from_hex`] (strict, no wildcards) and
//! [`memscan::Pattern::from_hex`] (accepts `??`), which users drive
//! interactively and which therefore shouldn't be slow even on long input.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use memscan::Pattern;
use memscan::hex;

fn benchmark_hex_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hex_parsing");

    let test_patterns = [
        ("short_compact", "4D5A"),
        ("short_spaced", "4D 5A"),
        ("medium_compact", "DEADBEEF12345678"),
        ("medium_spaced", "DE AD BE EF 12 34 56 78"),
        (
            "long_compact",
            "4D5A90000300000004000000FFFF00000800000000000000",
        ),
        (
            "long_spaced",
            "4D 5A 90 00 03 00 00 00 04 00 00 00 FF FF 00 00 08 00 00 00 00 00 00 00",
        ),
        ("very_long", &"DEADBEEF".repeat(32)),
    ];

    for (name, pattern) in test_patterns.iter() {
        group.throughput(Throughput::Bytes(pattern.len() as u64));

        group.bench_with_input(BenchmarkId::new("from_hex", name), pattern, |b, &pattern| {
            b.iter(|| hex::from_hex(black_box(pattern)));
        });
    }

    group.finish();
}

fn benchmark_pattern_from_hex_with_wildcards(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_from_hex_wildcards");

    let patterns = [
        ("no_wildcards", "4D 5A 90 00 03 00 00 00"),
        ("sparse_wildcards", "4D 5A ?? ?? 03 00 ?? 00"),
        ("heavy_wildcards", "4D ?? ?? ?? ?? ?? ?? 00"),
        ("long_mixed", &"4D 5A ?? 00 ".repeat(16)),
    ];

    for (name, pattern) in patterns.iter() {
        group.throughput(Throughput::Bytes(pattern.len() as u64));

        group.bench_with_input(BenchmarkId::new("pattern", name), pattern, |b, &pattern| {
            b.iter(|| Pattern::from_hex(black_box(pattern)));
        });
    }

    group.finish();
}

fn benchmark_hex_parsing_variations(c: &mut Criterion) {
    let mut group = c.benchmark_group("hex_parsing_variations");

    let variations = [
        ("no_spaces", "DEADBEEF12345678CAFEBABE"),
        ("single_spaces", "DE AD BE EF 12 34 56 78 CA FE BA BE"),
        (
            "double_spaces",
            "DE  AD  BE  EF  12  34  56  78  CA  FE  BA  BE",
        ),
        ("mixed_spaces", "DEAD BEEF  1234 5678   CAFE BABE"),
        ("lowercase", "deadbeef12345678cafebabe"),
        ("mixed_case", "DeAdBeEf12345678CaFeBaBe"),
    ];

    for (name, pattern) in variations.iter() {
        group.throughput(Throughput::Bytes(pattern.len() as u64));

        group.bench_with_input(BenchmarkId::new("variation", name), pattern, |b, &pattern| {
            b.iter(|| hex::from_hex(black_box(pattern)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_hex_parsing,
    benchmark_pattern_from_hex_with_wildcards,
    benchmark_hex_parsing_variations
);
criterion_main!(benches);
