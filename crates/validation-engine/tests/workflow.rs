//! 规则引擎集成测试
//!
//! 测试完整的注册、替换、校验工作流。

use std::sync::Arc;

use serde_json::json;
use validation_engine::{
    ErrorKind, ExpressionAdapter, RegistrationRequest, RegistrationService, RejectedError,
    RuleSetStore, ValidationItem, ValidationService,
};
use ve_cel::CancelFlag;
use ve_shared::config::EngineConfig;

struct Engine {
    registration: RegistrationService,
    validation: ValidationService,
    store: RuleSetStore,
}

fn engine(config: EngineConfig) -> Engine {
    let store = RuleSetStore::new();
    let adapter = Arc::new(ExpressionAdapter::new(&config));
    Engine {
        registration: RegistrationService::new(store.clone(), adapter.clone(), &config),
        validation: ValidationService::new(store.clone(), adapter, &config),
        store,
    }
}

fn registration(value: serde_json::Value) -> RegistrationRequest {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn test_register_then_validate() {
    let engine = engine(EngineConfig::default());

    let accepted = engine
        .registration
        .register(registration(json!({
            "validations": [
                {
                    "id": "item",
                    "cels": ["price > 0", "size(image) < 360"],
                    "variables": [
                        {"name": "price", "type": "int"},
                        {"name": "image", "type": "bytes"}
                    ]
                },
                {
                    "id": "user",
                    "cels": ["size(name) < 20"],
                    "variables": [{"name": "name", "type": "string"}]
                }
            ]
        })))
        .unwrap();
    assert_eq!(accepted.registered, vec!["item", "user"]);

    let verdicts = engine
        .validation
        .validate(
            vec![
                ValidationItem::new(
                    "item",
                    [("price", json!(-100)), ("image", json!("aGVsbG8gd29ybGQ="))],
                ),
                ValidationItem::new("user", [("name", json!("alice"))]),
                ValidationItem::new("missing", serde_json::Map::new()),
            ],
            CancelFlag::new(),
        )
        .await
        .unwrap();

    assert_eq!(verdicts.len(), 3);
    assert!(!verdicts[0].passed);
    assert!(!verdicts[0].diagnostics[0].passed);
    assert!(verdicts[0].diagnostics[1].passed);
    assert!(verdicts[1].passed);
    assert_eq!(
        verdicts[2].diagnostics[0].error_kind(),
        Some(ErrorKind::NotFound)
    );
}

#[tokio::test]
async fn test_reregister_replaces_rules() {
    let engine = engine(EngineConfig::default());
    let define = |limit: i64| {
        registration(json!({
            "validations": [{
                "id": "order",
                "cels": [format!("amount < {}", limit)],
                "variables": [{"name": "amount", "type": "int"}]
            }]
        }))
    };

    engine.registration.register(define(100)).unwrap();
    engine.registration.register(define(10)).unwrap();

    let verdicts = engine
        .validation
        .validate(
            vec![ValidationItem::new("order", [("amount", json!(50))])],
            CancelFlag::new(),
        )
        .await
        .unwrap();

    assert!(!verdicts[0].passed);
    assert_eq!(verdicts[0].message, "failed validations: amount < 10");
    assert_eq!(engine.store.len(), 1);
    assert_eq!(engine.store.generation(), 2);
}

#[test]
fn test_rejected_registration_is_atomic() {
    let engine = engine(EngineConfig::default());

    let err = engine
        .registration
        .register(registration(json!({
            "validations": [
                {
                    "id": "ok",
                    "cels": ["x > 0"],
                    "variables": [{"name": "x", "type": "int"}]
                },
                {
                    "id": "broken",
                    "cels": ["y > 0"],
                    "variables": [{"name": "x", "type": "int"}]
                }
            ]
        })))
        .unwrap_err();

    assert!(matches!(err, RejectedError::UnknownVariable { .. }));
    assert!(engine.store.is_empty());
    assert!(engine.registration.read().validations.is_empty());
}

#[test]
fn test_adversarial_expressions_rejected() {
    let engine = engine(EngineConfig::default());

    let nested = format!("{}x{} > 0", "(".repeat(200), ")".repeat(200));
    let err = engine
        .registration
        .register(registration(json!({
            "validations": [{
                "id": "deep",
                "cels": [nested],
                "variables": [{"name": "x", "type": "int"}]
            }]
        })))
        .unwrap_err();
    assert_eq!(err.code(), "COMPILE_FAILED");

    let long = format!("x > 0{}", " && x > 0".repeat(400));
    let err = engine
        .registration
        .register(registration(json!({
            "validations": [{
                "id": "long",
                "cels": [long],
                "variables": [{"name": "x", "type": "int"}]
            }]
        })))
        .unwrap_err();
    assert_eq!(err.code(), "LIMIT_EXCEEDED");
}

#[test]
fn test_runaway_evaluation_times_out() {
    let engine = engine(EngineConfig {
        max_eval_steps: 50,
        ..Default::default()
    });
    let clauses = vec!["s.contains('z')"; 40].join(" || ");

    engine
        .registration
        .register(registration(json!({
            "validations": [{
                "id": "slow",
                "cels": [clauses],
                "variables": [{"name": "s", "type": "string"}]
            }]
        })))
        .unwrap();

    let verdicts = tokio_test::block_on(engine.validation.validate(
        vec![ValidationItem::new("slow", [("s", json!("abc"))])],
        CancelFlag::new(),
    ))
    .unwrap();

    assert_eq!(
        verdicts[0].diagnostics[0].error_kind(),
        Some(ErrorKind::Timeout)
    );
}

#[test]
fn test_dry_run_with_list_test_case_format() {
    let engine = engine(EngineConfig::default());

    let report = engine
        .registration
        .test(registration(json!({
            "validations": [{
                "id": "user",
                "cels": ["size(name) < 20"],
                "variables": [{"name": "name", "type": "string"}],
                "testCases": [
                    {"name": "short", "variables": [{"name": "name", "value": "bob"}], "expected": true},
                    {"name": "long", "variables": [{"name": "name", "value": "abcdefghijklmnopqrstu"}], "expected": false}
                ]
            }]
        })))
        .unwrap();

    assert!(report.all_passed());
    assert!(engine.store.is_empty());
}
