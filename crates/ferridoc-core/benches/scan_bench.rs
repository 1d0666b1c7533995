//! Full-scan benchmarks: filter matching in memory and through the store.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use ferridoc_core::{Document, Filter, Store};
use serde_json::{Value, json};

const DOCS: usize = 10_000;

fn sample_docs() -> Vec<Document> {
    (0..DOCS)
        .map(|i| {
            let doc = json!({
                "user_id": i,
                "name": format!("user-{i}"),
                "mode": (["ban", "mute", "warn"][i % 3]),
                "warns": i % 5,
            });
            match doc {
                Value::Object(map) => map,
                _ => unreachable!(),
            }
        })
        .collect()
}

fn filter_matches_benchmark(c: &mut Criterion) {
    let docs = sample_docs();
    let filter = Filter::parse(
        &json!({
            "$or": [{"mode": "ban"}, {"mode": "mute"}],
            "warns": {"$gte": 2},
            "name": {"$regex": "^USER-1", "$options": "i"},
        }),
        false,
    )
    .unwrap();

    c.bench_function("filter_matches_10000", |b| {
        b.iter(|| black_box(docs.iter().filter(|d| filter.matches(d)).count()))
    });
}

fn store_count_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let store = Store::open_in_memory().unwrap();
    let users = store.collection("users");
    let docs: Vec<Value> = sample_docs().into_iter().map(Value::Object).collect();
    runtime.block_on(users.insert_many(docs)).unwrap();

    let filter = json!({"warns": {"$gte": 2}});
    c.bench_function("store_count_documents_10000", |b| {
        b.iter(|| black_box(runtime.block_on(users.count_documents(&filter)).unwrap()))
    });
}

criterion_group!(benches, filter_matches_benchmark, store_count_benchmark);
criterion_main!(benches);
