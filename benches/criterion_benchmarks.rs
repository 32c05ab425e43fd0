use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use oxiflate::Mode;
use oxiflate::io::{Execution, TransformOptions, transform_bytes};
use std::fs;
use std::path::Path;

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    // Mix of literal noise and repeated runs so levels differ.
    let mut s = seed;
    let mut out = Vec::with_capacity(size);
    while out.len() < size {
        s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
        let run = ((s >> 58) as usize) + 1;
        let byte = (s >> 33) as u8;
        if s & 1 == 0 {
            out.extend(std::iter::repeat_n(byte, run));
        } else {
            out.push(byte);
        }
    }
    out.truncate(size);
    out
}

fn opts(mode: Mode, chunk_size: usize, execution: Execution) -> TransformOptions {
    let mut opts = TransformOptions::new(mode);
    opts.chunk_size = chunk_size;
    opts.execution = execution;
    opts
}

fn write_ratio_snapshot() {
    let data = gen_data(2 * 1024 * 1024, 123);
    let mut csv = String::from("level,compressed_bytes,input_bytes,ratio\n");
    for level in -1i32..=9 {
        let mut o = opts(Mode::Deflate, 64 * 1024, Execution::Sync);
        o.level = level;
        let Ok(packed) = transform_bytes(&data, &o) else {
            continue;
        };
        let ratio = packed.len() as f64 / data.len() as f64;
        csv.push_str(&format!("{level},{},{},{}\n", packed.len(), data.len(), ratio));
    }
    let out_dir = Path::new("target/criterion/custom_reports");
    let _ = fs::create_dir_all(out_dir);
    let _ = fs::write(out_dir.join("ratio_snapshot.csv"), csv);
}

fn bench_compress_speed(c: &mut Criterion) {
    let mut g = c.benchmark_group("compress_speed_mb_s");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let data = gen_data(size, 1);
        let o = opts(Mode::Deflate, 16 * 1024, Execution::Sync);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(transform_bytes(black_box(&data), &o).unwrap()));
        });
    }
    g.finish();
}

fn bench_decompress_speed(c: &mut Criterion) {
    let mut g = c.benchmark_group("decompress_speed_mb_s");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let data = gen_data(size, 2);
        let packed = transform_bytes(&data, &opts(Mode::Gzip, 64 * 1024, Execution::Sync)).unwrap();
        let o = opts(Mode::Gunzip, 16 * 1024, Execution::Sync);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(transform_bytes(black_box(&packed), &o).unwrap()));
        });
    }
    g.finish();
}

fn bench_sync_vs_async(c: &mut Criterion) {
    let mut g = c.benchmark_group("sync_vs_async_chunk_size");
    let data = gen_data(1024 * 1024, 3);
    g.throughput(Throughput::Bytes(data.len() as u64));
    for chunk_size in [1024usize, 16 * 1024, 256 * 1024] {
        let sync = opts(Mode::Deflate, chunk_size, Execution::Sync);
        g.bench_with_input(BenchmarkId::new("sync", chunk_size), &chunk_size, |b, _| {
            b.iter(|| black_box(transform_bytes(&data, &sync).unwrap()));
        });
        let offloaded = opts(Mode::Deflate, chunk_size, Execution::Async { threads: 1 });
        g.bench_with_input(BenchmarkId::new("async", chunk_size), &chunk_size, |b, _| {
            b.iter(|| black_box(transform_bytes(&data, &offloaded).unwrap()));
        });
    }
    g.finish();
}

fn bench_ratio_vs_level(c: &mut Criterion) {
    write_ratio_snapshot();
    let mut g = c.benchmark_group("compression_ratio_vs_level");
    let data = gen_data(2 * 1024 * 1024, 4);
    for level in 0i32..=9 {
        let mut o = opts(Mode::Deflate, 64 * 1024, Execution::Sync);
        o.level = level;
        g.bench_with_input(BenchmarkId::from_parameter(level), &level, |b, _| {
            b.iter(|| {
                let packed = transform_bytes(&data, &o).unwrap();
                black_box(packed.len() as f64 / data.len() as f64);
            });
        });
    }
    g.finish();
}

fn bench_auto_detect(c: &mut Criterion) {
    let mut g = c.benchmark_group("auto_unzip_vs_explicit");
    let data = gen_data(1024 * 1024, 5);
    let packed = transform_bytes(&data, &opts(Mode::Gzip, 64 * 1024, Execution::Sync)).unwrap();
    g.throughput(Throughput::Bytes(data.len() as u64));
    for (name, mode) in [("gunzip", Mode::Gunzip), ("auto_unzip", Mode::AutoUnzip)] {
        let o = opts(mode, 16 * 1024, Execution::Sync);
        g.bench_function(name, |b| {
            b.iter(|| black_box(transform_bytes(&packed, &o).unwrap()));
        });
    }
    g.finish();
}

criterion_group!(
    benches,
    bench_compress_speed,
    bench_decompress_speed,
    bench_sync_vs_async,
    bench_ratio_vs_level,
    bench_auto_detect
);
criterion_main!(benches);
