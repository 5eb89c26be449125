//! Performance benchmarks for a3s-bind
//!
//! Run with: cargo bench

use a3s_bind::locator::split_composite;
use a3s_bind::{
    BindStatusCallback, InternetSession, Locator, MemoryContainerStore, RecordingCallback,
    Zone, ZonePolicyEngine, ZoneRule,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;

const LOCATORS: &[&str] = &[
    "http://www.example.com/path/to/page.html?q=1#top",
    "https://user@sub.example.com:8443/a/b/../c",
    "file:///usr/share/doc/index.html",
    "its:C:\\docs\\help.chm::/topics/intro.htm",
    "mk:@MSITStore:http://host/a.chm::/x.html",
    "about:blank",
];

fn bench_locator_parse(c: &mut Criterion) {
    c.bench_function("Locator::parse", |b| {
        b.iter(|| {
            for text in LOCATORS {
                black_box(Locator::parse(black_box(text)).unwrap());
            }
        });
    });

    c.bench_function("split_composite", |b| {
        b.iter(|| black_box(split_composite(black_box("ms-its:help.chm::/sub/page.htm"))));
    });

    let base = Locator::parse("http://www.example.com/a/b/c.html").unwrap();
    c.bench_function("resolve_reference", |b| {
        b.iter(|| black_box(base.resolve_reference(black_box("../d/e.html")).unwrap()));
    });
}

fn bench_zone_classify(c: &mut Criterion) {
    let engine = ZonePolicyEngine::new();
    for i in 0..100 {
        engine
            .add_rule(ZoneRule::new(format!("host{}.example.com", i), None, Zone::Trusted))
            .unwrap();
    }
    engine
        .add_rule(ZoneRule::new("*.corp.example", Some("https"), Zone::Intranet))
        .unwrap();

    let hit = Locator::parse("https://wiki.corp.example/page").unwrap();
    let archive = Locator::parse("its:/docs/help.chm::/index.html").unwrap();

    c.bench_function("classify (cached)", |b| {
        b.iter(|| black_box(engine.classify(black_box(&hit)).unwrap()));
    });

    c.bench_function("classify (archive)", |b| {
        b.iter(|| black_box(engine.classify(black_box(&archive)).unwrap()));
    });

    c.bench_function("check_zone_elevation", |b| {
        b.iter(|| black_box(engine.check_zone_elevation(&hit, &archive, None).unwrap()));
    });
}

fn bench_scheme_resolve(c: &mut Criterion) {
    let session = InternetSession::default();
    let locator = Locator::parse("https://www.example.com/").unwrap();

    c.bench_function("resolve (builtin)", |b| {
        b.iter(|| black_box(session.registry().resolve_locator(&locator).unwrap()));
    });
}

fn bench_archive_bind(c: &mut Criterion) {
    let containers = Arc::new(MemoryContainerStore::new());
    containers
        .insert("help.chm", "/index.html", vec![b'x'; 16 * 1024])
        .unwrap();
    let session = InternetSession::builder()
        .containers(containers)
        .build()
        .unwrap();

    c.bench_function("archive bind + read 16KiB", |b| {
        b.iter(|| {
            let callback: Arc<dyn BindStatusCallback> = Arc::new(RecordingCallback::new());
            let bind = session.bind("its:help.chm::/index.html", &callback).unwrap();
            black_box(bind.read_available().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_locator_parse,
    bench_zone_classify,
    bench_scheme_resolve,
    bench_archive_bind,
);
criterion_main!(benches);
