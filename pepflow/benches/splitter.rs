//! Benchmarks for splitting spectra files and encoding queue messages.
//!
//! These benchmarks measure:
//! - Record-aligned splitting of an in-memory MGF input at several chunk sizes
//! - Encoding and decoding of `created` announcements

#![allow(missing_docs)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

use pepflow::splitter::split;
use pepflow::{ChunkCreated, ChunkKey, HeadMessage, JobId, SearcherKind};

const RECORDS: usize = 2_000;

fn create_runtime() -> Runtime {
    Runtime::new().expect("Failed to create tokio runtime")
}

fn mgf_input(records: usize) -> Vec<u8> {
    let mut out = String::new();
    for i in 0..records {
        out.push_str(&format!(
            "BEGIN IONS\nTITLE=spectrum {i}\nPEPMASS={:.4}\nCHARGE=2+\n",
            400.0 + i as f64 * 0.25
        ));
        for peak in 0..40 {
            out.push_str(&format!("{}.{} {}\n", 100 + peak * 7, i % 10, peak + 1));
        }
        out.push_str("END IONS\n");
    }
    out.into_bytes()
}

fn bench_split(c: &mut Criterion) {
    let rt = create_runtime();
    let input = mgf_input(RECORDS);
    let out_dir = tempfile::tempdir().expect("Failed to create bench directory");

    let mut group = c.benchmark_group("split");
    group.throughput(Throughput::Bytes(input.len() as u64));
    for spectra_count in [10u32, 100, 1_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(spectra_count),
            &spectra_count,
            |b, &spectra_count| {
                b.to_async(&rt).iter(|| async {
                    let chunks = split(input.as_slice(), out_dir.path(), "bench", spectra_count)
                        .await
                        .expect("split failed");
                    black_box(chunks)
                });
            },
        );
    }
    group.finish();
}

fn bench_created_codec(c: &mut Criterion) {
    let message = HeadMessage::Created(ChunkCreated {
        chunk_count: 200,
        bytes: 48_213,
        sendtime: 1_700_000_000.25,
        chunk_key: ChunkKey::derive("a1b2c3/bench-00000042.mgf"),
        job_id: JobId::new(),
        object_key: "a1b2c3/bench-00000042.mgf".to_string(),
        parameter_object_key: "a1b2c3/parameters.conf".to_string(),
        bucket: "pepflow".to_string(),
        searcher: SearcherKind::Tandem,
    });
    let body = message.encode().expect("encode failed");

    let mut group = c.benchmark_group("created_codec");
    group.bench_function("encode", |b| {
        b.iter(|| black_box(message.encode().expect("encode failed")))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(HeadMessage::decode(black_box(&body)).expect("decode failed")))
    });
    group.finish();
}

criterion_group!(benches, bench_split, bench_created_codec);
criterion_main!(benches);
