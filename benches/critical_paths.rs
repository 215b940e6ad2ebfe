//! Criterion benchmarks for snuff critical paths
//!
//! Benchmarks the operations every build pass leans on:
//! - Cipher: RC4 keystream over script payloads
//! - Script: full compile / decompile of a container
//! - Header: container prefix validation
//! - Ledger: encode / decode of the persisted image
//! - Sync: scanning a source tree against the ledger

use chrono::{DateTime, Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use snuff::build::ledger_format::{decode, encode};
use snuff::build::{BuildEntry, BuildLedger};
use snuff::compiler::cipher::apply_keystream;
use snuff::compiler::{Compiler, FileHeader, HeapAllocator, ScriptCompiler};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// =============================================================================
// Test Data Generators
// =============================================================================

/// Generate a script body of roughly `len` bytes
fn make_script(len: usize) -> Vec<u8> {
    b"var x = call(1, 2);\n".iter().copied().cycle().take(len).collect()
}

/// Generate `count` ledger entries spread over a few directories
fn make_entries(count: usize) -> Vec<BuildEntry> {
    let epoch = DateTime::<Utc>::default();
    (0..count)
        .map(|i| BuildEntry {
            path: format!("scripts/group{}/file{:05}.js", i % 8, i),
            is_content: true,
            was_built: i % 3 != 0,
            last_modified: epoch + Duration::seconds(i as i64),
            last_built: epoch + Duration::seconds(2 * i as i64),
        })
        .collect()
}

/// Populate a temporary source tree with `count` scripts
fn make_tree(count: usize) -> TempDir {
    let temp = TempDir::new().expect("temp dir");
    for i in 0..count {
        let dir = temp.path().join(format!("src/dir{}", i % 10));
        fs::create_dir_all(&dir).expect("create dir");
        fs::write(dir.join(format!("s{}.js", i)), b"x=1;").expect("write file");
    }
    temp
}

// =============================================================================
// Cipher Benchmarks
// =============================================================================

fn bench_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");

    for size in [64usize, 4 * 1024, 256 * 1024].iter() {
        let data = make_script(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("rc4", size), &data, |b, data| {
            let mut buf = data.clone();
            b.iter(|| apply_keystream(black_box(b"snuff.script.v1"), &mut buf))
        });
    }

    group.finish();
}

// =============================================================================
// Script Compiler Benchmarks
// =============================================================================

fn bench_script(c: &mut Criterion) {
    let mut group = c.benchmark_group("script");
    let mut compiler = ScriptCompiler::new(Arc::new(HeapAllocator));

    for size in [256usize, 64 * 1024].iter() {
        let source = make_script(*size);
        let container =
            compiler.compile(&source, Path::new("bench.js")).expect("compile").to_vec();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("compile", size), &source, |b, source| {
            b.iter(|| {
                compiler.compile(black_box(source), Path::new("bench.js")).map(|out| out.len())
            })
        });
        group.bench_with_input(BenchmarkId::new("decompile", size), &container, |b, container| {
            b.iter(|| compiler.decompile(black_box(container)).map(|out| out.len()))
        });
    }

    group.finish();
}

fn bench_header(c: &mut Criterion) {
    let mut compiler = ScriptCompiler::new(Arc::new(HeapAllocator));
    let container = compiler.compile(b"x=1;", Path::new("a.js")).expect("compile").to_vec();

    c.bench_function("header_read", |b| b.iter(|| FileHeader::read(black_box(&container))));
}

// =============================================================================
// Ledger Benchmarks
// =============================================================================

fn bench_ledger(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger");

    for count in [100usize, 10_000].iter() {
        let entries = make_entries(*count);
        let image = encode(&entries);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("encode", count), &entries, |b, entries| {
            b.iter(|| encode(black_box(entries)))
        });
        group.bench_with_input(BenchmarkId::new("decode", count), &image, |b, image| {
            b.iter(|| decode(black_box(image)))
        });
    }

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    group.sample_size(20);

    for count in [50usize, 500].iter() {
        let temp = make_tree(*count);
        let src = temp.path().join("src");
        let bin = temp.path().join("bin");
        let ledger = BuildLedger::new();
        ledger.sync(&src, &bin);

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_function(BenchmarkId::new("unchanged_tree", count), |b| {
            b.iter(|| ledger.sync(black_box(&src), &bin))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cipher, bench_script, bench_header, bench_ledger, bench_sync);
criterion_main!(benches);
