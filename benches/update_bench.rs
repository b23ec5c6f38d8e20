//! Update benchmarks: applying, merging and diffing encoded updates.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tandem::{Doc, Options, Version, diff_update, encode_state_vector, merge_updates};

const SIZES: [usize; 3] = [100, 1_000, 10_000];

/// One update per keystroke, typed by two alternating clients.
fn keystroke_updates(count: usize, version: Version) -> (Vec<Vec<u8>>, Doc) {
    let mut a = Doc::with_options(Options { client_id: 1, gc: true });
    let mut b = Doc::with_options(Options { client_id: 2, gc: true });
    let mut updates = Vec::with_capacity(count);
    for i in 0..count {
        let (writer, reader) = if i % 2 == 0 { (&mut a, &mut b) } else { (&mut b, &mut a) };
        let before = writer.state_vector();
        let len = writer.len("text");
        writer.insert_text("text", (i as u32 * 7) % (len + 1), "x").unwrap();
        if i % 10 == 9 {
            writer.remove_range("text", 0, 1).unwrap();
        }
        let update = writer.encode_state_as_update(Some(&before), version);
        reader.apply_update(&update, version).unwrap();
        updates.push(update);
    }
    return (updates, a);
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    for size in SIZES {
        for version in [Version::V1, Version::V2] {
            let (updates, _) = keystroke_updates(size, version);
            group.throughput(Throughput::Elements(size as u64));
            let id = BenchmarkId::new(format!("{version:?}"), size);
            group.bench_with_input(id, &updates, |b, updates| {
                b.iter(|| {
                    let mut doc = Doc::with_client_id(3);
                    for update in updates {
                        doc.apply_update(update, version).unwrap();
                    }
                    black_box(doc.len("text"))
                });
            });
        }
    }
    group.finish();
}

fn bench_apply_reversed(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_reversed");
    for size in [100, 1_000] {
        let (mut updates, _) = keystroke_updates(size, Version::V1);
        updates.reverse();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &updates, |b, updates| {
            b.iter(|| {
                let mut doc = Doc::with_client_id(3);
                for update in updates {
                    doc.apply_update(update, Version::V1).unwrap();
                }
                black_box(doc.len("text"))
            });
        });
    }
    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    for size in SIZES {
        for version in [Version::V1, Version::V2] {
            let (updates, _) = keystroke_updates(size, version);
            group.throughput(Throughput::Elements(size as u64));
            let id = BenchmarkId::new(format!("{version:?}"), size);
            group.bench_with_input(id, &updates, |b, updates| {
                b.iter(|| black_box(merge_updates(updates, version).unwrap()));
            });
        }
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for size in SIZES {
        let (updates, doc) = keystroke_updates(size, Version::V1);
        let full = doc.encode_state_as_update(None, Version::V1);
        let mut half = Doc::with_client_id(3);
        for update in &updates[..size / 2] {
            half.apply_update(update, Version::V1).unwrap();
        }
        let sv = encode_state_vector(&half.state_vector());
        group.throughput(Throughput::Bytes(full.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &(full, sv), |b, (full, sv)| {
            b.iter(|| black_box(diff_update(full, sv, Version::V1).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_apply, bench_apply_reversed, bench_merge, bench_diff);
criterion_main!(benches);
