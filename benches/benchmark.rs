use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

use placequery::compiler::compile_to_clauses;
use placequery::construct::CachedDataset;
use placequery::optimizer::optimize;
use placequery::provider::normalize_records;
use placequery::splitter::split_category_keyword;

fn dataset(from: usize, to: usize) -> CachedDataset {
    CachedDataset::new(normalize_records(&json!({
        "places": (from..to).map(|i| json!({
            "id": format!("place{}", i),
            "displayName": { "text": format!("Place {}", i) },
            "location": { "latitude": 59.3, "longitude": 18.0 },
            "types": ["cafe"]
        })).collect::<Vec<_>>()
    })))
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let simple = "restaurant OR cafe";
    c.bench_function("compile simple", |b| b.iter(|| compile_to_clauses(black_box(simple))));

    let nested = "(a OR b) AND (c OR d) AND (e OR f) AND NOT (g AND h)";
    c.bench_function("compile nested", |b| b.iter(|| compile_to_clauses(black_box(nested))));

    let wide: Vec<String> = (0..26).map(|i| format!("t{}", i)).collect();
    let wide = wide.join(" OR ");
    c.bench_function("compile 26 terms", |b| b.iter(|| compile_to_clauses(black_box(&wide))));

    let mixed = "(restaurant OR cafe) AND NOT @fast food@ OR (@live music@ AND bar)";
    c.bench_function("split mixed", |b| b.iter(|| split_category_keyword(black_box(mixed))));

    let clauses = compile_to_clauses(&wide).expect("compiles");
    c.bench_function("optimize 26 terms", |b| b.iter(|| optimize(black_box(&clauses), None)));

    let a = dataset(0, 1_000);
    let d = dataset(500, 1_500);
    c.bench_function("difference 1k", |b| b.iter(|| a.difference(black_box(&d))));
    c.bench_function("union 1k", |b| b.iter(|| CachedDataset::union([&a, black_box(&d)])));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
