use criterion::{black_box, criterion_group, criterion_main, Criterion};
use chainarc::archive::{Archive, ArchiveOptions};
use chainarc::processor::{get_processor, ProcessorTag};
use std::fs;
use tempfile::tempdir;

fn bench_add(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let src = dir.path().join("input.bin");
    fs::write(&src, vec![42u8; 1024 * 1024]).unwrap();

    c.bench_function("add_1mb_raw", |b| {
        b.iter(|| {
            let mut ar = Archive::create(dir.path().join("bench"), ArchiveOptions::default()).unwrap();
            ar.add(black_box(&src), None).unwrap();
        })
    });

    c.bench_function("add_1mb_comp", |b| {
        let comp = get_processor(ProcessorTag::Compression).unwrap();
        b.iter(|| {
            let mut ar = Archive::create(dir.path().join("bench"), ArchiveOptions::default()).unwrap();
            ar.add(black_box(&src), Some(comp)).unwrap();
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let src = dir.path().join("input.bin");
    fs::write(&src, (0..1024 * 1024u32).map(|i| i as u8).collect::<Vec<u8>>()).unwrap();
    let mut ar = Archive::create(dir.path().join("bench"), ArchiveOptions::default()).unwrap();
    ar.add(&src, None).unwrap();
    let dest = dir.path().join("output.bin");

    c.bench_function("extract_1mb_raw", |b| {
        b.iter(|| ar.extract(black_box("input.bin"), &dest).unwrap())
    });
}

fn bench_reuse(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let src = dir.path().join("small.bin");
    fs::write(&src, vec![7u8; 64 * 1024]).unwrap();
    let mut ar = Archive::create(dir.path().join("bench"), ArchiveOptions::default()).unwrap();
    ar.add(&src, None).unwrap();

    c.bench_function("remove_then_readd_64k", |b| {
        b.iter(|| {
            ar.remove("small.bin").unwrap();
            ar.add(black_box(&src), None).unwrap();
        })
    });
}

criterion_group!(benches, bench_add, bench_extract, bench_reuse);
criterion_main!(benches);
