//! Benchmarks for cleaning, validating and constructing documents
//!
//! Run with: cargo bench --bench clean_bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use document_model_sdk::fields::FieldValidateOptions;
use document_model_sdk::{
    CleanOptions, DataModel, Field, ModelClass, ModelOptions, Record, SchemaField,
};
use serde_json::{Value, json};

fn item() -> ModelClass {
    ModelClass::builder("Item")
        .schema(
            SchemaField::new()
                .field("_id", Field::document_id())
                .field("name", Field::string().blank(false).required())
                .field("quantity", Field::number().integer().min(0.0).initial(1))
                .field("weight", Field::number().min(0.0).step(0.1).initial(0)),
        )
        .build()
}

fn actor() -> ModelClass {
    ModelClass::builder("Actor")
        .schema(
            SchemaField::new()
                .field("_id", Field::document_id())
                .field("name", Field::string().required())
                .field(
                    "attributes",
                    Field::schema(
                        SchemaField::new()
                            .field("hp", Field::number().integer().min(0.0).initial(10))
                            .field("speed", Field::number().initial(30)),
                    ),
                )
                .field("tags", Field::set(Field::string()))
                .field("items", Field::embedded_collection(item())),
        )
        .build()
}

/// Generate an actor record with `count` embedded items
fn generate_actor(count: usize) -> Record {
    let items: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "name": format!("Item {}", i),
                "quantity": (i % 20).to_string(),
                "weight": i as f64 * 0.37
            })
        })
        .collect();
    json!({
        "_id": "abcdefghijklmnop",
        "name": "Hero",
        "attributes": {"hp": "25"},
        "tags": ["brave", "tall", "brave"],
        "items": items
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// Benchmark schema cleaning with varying collection sizes
fn bench_clean(c: &mut Criterion) {
    let mut group = c.benchmark_group("clean");
    let class = actor();

    for count in [10, 100, 500].iter() {
        let source = generate_actor(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("clean_data", count), &source, |b, source| {
            b.iter(|| black_box(class.clean_data(source.clone(), &CleanOptions::default())));
        });
    }

    group.finish();
}

/// Benchmark field validation of an already cleaned record
fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("validate");
    let class = actor();

    for count in [10, 100, 500].iter() {
        let Ok(cleaned) = class.clean_data(generate_actor(*count), &CleanOptions::default()) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("schema_validate", count), &cleaned, |b, cleaned| {
            b.iter(|| {
                let mut record = cleaned.clone();
                black_box(class.schema().validate(&mut record, &FieldValidateOptions::default()))
            });
        });
    }

    group.finish();
}

/// Benchmark full construction including collection initialization
fn bench_construct(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct");
    let class = actor();

    for count in [10, 100].iter() {
        let source = generate_actor(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::new("data_model_new", count), &source, |b, source| {
            b.iter(|| {
                black_box(DataModel::new(class.clone(), source.clone(), &ModelOptions::default()))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_clean, bench_validate, bench_construct);
criterion_main!(benches);
