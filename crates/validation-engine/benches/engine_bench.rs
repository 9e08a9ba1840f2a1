//! 规则引擎性能基准测试
//!
//! 覆盖注册编译、单条目求值与批量校验三条路径。

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use validation_engine::{
    ExpressionAdapter, RegistrationRequest, RegistrationService, RuleSetStore, ValidationDefinition,
    ValidationItem, ValidationService, VariableDecl,
};
use ve_cel::CancelFlag;
use ve_shared::config::EngineConfig;

fn item_definition() -> ValidationDefinition {
    ValidationDefinition::new(
        "item",
        vec![
            "price > 0",
            "price <= 1000000 && discount >= 0.0 && discount < 1.0",
            "size(name) < 64 && name.matches('^[a-z0-9_]+$')",
            "sku.startsWith('SKU-') || sku.endsWith('-LEGACY')",
        ],
        vec![
            VariableDecl::new("price", "int"),
            VariableDecl::new("discount", "double"),
            VariableDecl::new("name", "string"),
            VariableDecl::new("sku", "string"),
        ],
    )
}

fn item(i: usize) -> ValidationItem {
    ValidationItem::new(
        "item",
        [
            ("price", json!(i as i64 - 10)),
            ("discount", json!(0.25)),
            ("name", json!(format!("product_{}", i))),
            ("sku", json!(format!("SKU-{:06}", i))),
        ],
    )
}

fn setup() -> (RegistrationService, ValidationService) {
    let config = EngineConfig::default();
    let store = RuleSetStore::new();
    let adapter = Arc::new(ExpressionAdapter::new(&config));
    let registration = RegistrationService::new(store.clone(), adapter.clone(), &config);
    registration
        .register(RegistrationRequest {
            validations: vec![item_definition()],
        })
        .expect("注册基准规则失败");
    let validation = ValidationService::new(store, adapter, &config);
    (registration, validation)
}

/// 编译基准
fn bench_compile(c: &mut Criterion) {
    let adapter = ExpressionAdapter::default();
    let definition = item_definition();

    c.bench_function("compile_definition", |b| {
        b.iter(|| adapter.compile_definition(black_box(&definition)))
    });
}

/// 单条目求值基准
fn bench_validate_item(c: &mut Criterion) {
    let (_, validation) = setup();
    let cancel = CancelFlag::new();
    let passing = item(100);
    let failing = item(1);

    let mut group = c.benchmark_group("validate_item");
    group.bench_function("passing", |b| {
        b.iter(|| validation.validate_item(black_box(&passing), &cancel))
    });
    group.bench_function("failing", |b| {
        b.iter(|| validation.validate_item(black_box(&failing), &cancel))
    });
    group.finish();
}

/// 批量校验在不同批次大小下的吞吐
fn bench_validate_batch(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("创建 tokio runtime 失败");
    let (_, validation) = setup();

    let mut group = c.benchmark_group("validate_batch");
    for size in [1usize, 10, 100, 1000].iter() {
        let items: Vec<_> = (0..*size).map(item).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                runtime.block_on(validation.validate(black_box(items.clone()), CancelFlag::new()))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_validate_item, bench_validate_batch);

criterion_main!(benches);
