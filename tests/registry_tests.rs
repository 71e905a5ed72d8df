//! Registry integration tests
//!
//! Discovery over the fixture component roots plus the composition
//! scenarios: forward references, replacement, format screening and the
//! raw/compiled round trip.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use component_schemas::{
    BuildOptions, RegisterOptions, SchemaConfig, SchemaError, SchemaRegistry,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn components() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/components")
}

fn roots() -> Vec<PathBuf> {
    vec![components().join("catalog"), components().join("lms")]
}

fn config_with_formats(formats: &[(&str, &str)]) -> SchemaConfig {
    let mut config = SchemaConfig::default();
    config.formats = formats
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    config
}

fn base() -> Value {
    json!({"$id": "course", "type": "object", "properties": {"title": {"type": "string"}}})
}

fn extension(id: &str, field: &str) -> Value {
    json!({
        "$id": id,
        "$patch": {"source": {"$ref": "course"}},
        "properties": {field: {"type": "integer"}},
        "description": id
    })
}

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn test_discovery_registers_in_order_and_collects_failures() {
    let registry = SchemaRegistry::default();
    let report = registry.discover(&roots()).await;

    assert_eq!(report.registered, vec!["course-ext", "course", "lesson"]);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("catalog/schema/broken.schema.json"));
    assert_eq!(report.failures[0].error.kind(), "LoadError");

    // notes.json sits outside schema/ and is never loaded
    assert!(!registry.contains("not-a-schema"));
    assert!(registry.pending_extensions().is_empty());
    assert_eq!(registry.extensions_of("course"), Some(vec!["course-ext".to_string()]));
}

#[tokio::test]
async fn test_discovery_replaces_previous_catalog() {
    let registry = SchemaRegistry::default();
    registry
        .register_document(json!({"$id": "stale"}), RegisterOptions::default())
        .unwrap();

    let report = registry.discover(&vec![components().join("lms")]).await;
    assert!(report.is_clean());
    assert_eq!(registry.names(), vec!["course", "lesson"]);
}

#[tokio::test]
async fn test_missing_root_is_reported() {
    let registry = SchemaRegistry::default();
    let missing = components().join("does-not-exist");
    let report = registry
        .discover(&vec![missing.clone(), components().join("lms")])
        .await;

    assert_eq!(report.registered, vec!["course", "lesson"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, missing);
    assert_eq!(report.failures[0].error.kind(), "NotFound");
}

#[tokio::test]
async fn test_timed_out_discovery_reports_load_failures() {
    let registry = SchemaRegistry::default();
    let mut config = SchemaConfig::default();
    config.discovery.read_timeout_ms = 0;
    registry.apply_config(&config);

    let report = registry.discover(&vec![components().join("lms")]).await;

    assert!(report.registered.is_empty());
    assert!(!report.failures.is_empty());
    for failure in &report.failures {
        assert_eq!(failure.error.kind(), "LoadError");
        assert!(failure.error.to_string().contains("timed out"), "{}", failure.error);
    }
}

#[tokio::test]
async fn test_discovered_schemas_merge_and_validate() {
    let registry = SchemaRegistry::default();
    registry.apply_config(&config_with_formats(&[("course-code", "^[A-Z]{3}-[0-9]{3}$")]));
    registry.discover(&roots()).await;

    let course = registry.resolve_document("course").unwrap();
    assert_eq!(course["required"], json!(["title", "code"]));
    let properties: Vec<&String> = course["properties"].as_object().unwrap().keys().collect();
    for field in ["title", "version", "code", "seats"] {
        assert!(properties.iter().any(|p| p.as_str() == field), "missing {field}");
    }

    assert!(registry
        .validate("course", &json!({"title": "Rust", "code": "CSC-101", "version": "1.2.0"}))
        .is_ok());
    assert!(registry
        .validate("course", &json!({"title": "Rust", "code": "csc101"}))
        .is_err());

    // lesson references course, which carries the extension too
    assert!(registry
        .validate(
            "lesson",
            &json!({"slug": "intro", "course": {"title": "Rust", "code": "CSC-101"}})
        )
        .is_ok());
    let err = registry
        .validate("lesson", &json!({"slug": "intro", "course": {"title": "Rust"}}))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationFailed");
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn test_start_applies_config_before_discovery() {
    let registry = SchemaRegistry::default();
    let mut config = config_with_formats(&[("course-code", "^[A-Z]{3}-[0-9]{3}$")]);
    config.discovery.roots = vec![components().join("lms")];

    let report = registry
        .start(&vec![components().join("catalog")], async move {
            Ok::<_, SchemaError>(config)
        })
        .await;

    assert_eq!(report.registered, vec!["course-ext", "course", "lesson"]);
    assert!(registry
        .validate("course", &json!({"title": "Rust", "code": "bad"}))
        .is_err());
}

#[tokio::test]
async fn test_start_survives_config_failure() {
    let registry = SchemaRegistry::default();
    let report = registry
        .start(&vec![components().join("lms")], async {
            Err::<SchemaConfig, _>(SchemaError::invalid_param("config"))
        })
        .await;

    assert_eq!(report.registered, vec!["course", "lesson"]);
}

// =============================================================================
// Composition
// =============================================================================

#[test]
fn test_resolution_is_independent_of_registration_order() {
    let orders: [[&str; 3]; 3] = [
        ["course", "ext-a", "ext-b"],
        ["ext-a", "course", "ext-b"],
        ["ext-a", "ext-b", "course"],
    ];

    let mut results = Vec::new();
    for order in orders {
        let registry = SchemaRegistry::default();
        for id in order {
            let document = match id {
                "course" => base(),
                "ext-a" => extension("ext-a", "seats"),
                _ => extension("ext-b", "credits"),
            };
            registry
                .register_document(document, RegisterOptions::default())
                .unwrap();
        }
        assert_eq!(
            registry.extensions_of("course"),
            Some(vec!["ext-a".to_string(), "ext-b".to_string()])
        );
        results.push(registry.resolve_document("course").unwrap());
    }

    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert_eq!(results[0]["description"], json!("ext-b"));
}

#[test]
fn test_raw_document_compiles_to_the_same_validator() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::default())
        .unwrap();

    let raw = registry.resolve("course", BuildOptions::raw()).unwrap();
    assert!(raw.compiled().is_none());

    let recompiled = registry.compile(raw.document()).unwrap();
    let compiled = registry.resolve_compiled("course").unwrap();
    assert_eq!(recompiled, *compiled);

    for instance in [json!({"seats": 3}), json!({"seats": "three"}), json!({"title": 1})] {
        assert_eq!(recompiled.is_valid(&instance), compiled.is_valid(&instance));
    }
}

#[test]
fn test_reregistering_an_extension_does_not_duplicate_it() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::default())
        .unwrap();
    let before = registry.resolve_document("course").unwrap();

    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::replacing())
        .unwrap();

    assert_eq!(registry.extensions_of("course"), Some(vec!["ext-a".to_string()]));
    assert_eq!(registry.resolve_document("course").unwrap(), before);
}

#[test]
fn test_replacing_an_extension_keeps_its_position() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(extension("x", "seats"), RegisterOptions::default())
        .unwrap();
    registry
        .register_document(extension("y", "credits"), RegisterOptions::default())
        .unwrap();
    let before = registry.resolve_document("course").unwrap();
    assert_eq!(before["description"], json!("y"));

    registry
        .register_document(extension("x", "seats"), RegisterOptions::replacing())
        .unwrap();

    assert_eq!(
        registry.extensions_of("course"),
        Some(vec!["x".to_string(), "y".to_string()])
    );
    assert_eq!(registry.resolve_document("course").unwrap(), before);
}

#[test]
fn test_replacing_a_deferred_extension_keeps_its_position() {
    let registry = SchemaRegistry::default();
    registry
        .register_document(extension("x", "seats"), RegisterOptions::default())
        .unwrap();
    registry
        .register_document(extension("y", "credits"), RegisterOptions::default())
        .unwrap();
    registry
        .register_document(extension("x", "seats"), RegisterOptions::replacing())
        .unwrap();

    assert_eq!(
        registry.pending_extensions(),
        BTreeMap::from([("course".to_string(), vec!["x".to_string(), "y".to_string()])])
    );

    registry.register_document(base(), RegisterOptions::default()).unwrap();
    assert_eq!(
        registry.extensions_of("course"),
        Some(vec!["x".to_string(), "y".to_string()])
    );
    assert_eq!(registry.resolve_document("course").unwrap()["description"], json!("y"));
}

#[test]
fn test_replace_removes_stale_relationships() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(json!({"$id": "lesson", "type": "object"}), RegisterOptions::default())
        .unwrap();
    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::default())
        .unwrap();

    registry
        .register_document(
            json!({"$id": "ext-a", "$patch": {"source": {"$ref": "lesson"}}, "minProperties": 1}),
            RegisterOptions::replacing(),
        )
        .unwrap();

    assert_eq!(registry.extensions_of("course"), Some(vec![]));
    assert_eq!(registry.extensions_of("lesson"), Some(vec!["ext-a".to_string()]));
    assert!(registry
        .resolve_document("course")
        .unwrap()
        .pointer("/properties/seats")
        .is_none());
    assert_eq!(registry.resolve_document("lesson").unwrap()["minProperties"], json!(1));
}

#[test]
fn test_replaced_source_keeps_its_extensions() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::default())
        .unwrap();

    registry
        .register_document(
            json!({"$id": "course", "type": "object", "title": "Course v2"}),
            RegisterOptions::replacing(),
        )
        .unwrap();

    let merged = registry.resolve_document("course").unwrap();
    assert_eq!(merged["title"], json!("Course v2"));
    assert_eq!(merged["properties"]["seats"], json!({"type": "integer"}));
}

#[test]
fn test_deregistered_source_parks_extensions() {
    let registry = SchemaRegistry::default();
    registry.register_document(base(), RegisterOptions::default()).unwrap();
    registry
        .register_document(extension("ext-a", "seats"), RegisterOptions::default())
        .unwrap();

    assert!(registry.deregister("course"));
    assert!(matches!(
        registry.resolve("course", BuildOptions::raw()),
        Err(SchemaError::NotFound { .. })
    ));
    assert_eq!(
        registry.pending_extensions(),
        BTreeMap::from([("course".to_string(), vec!["ext-a".to_string()])])
    );

    // The extension itself stays resolvable, without its patch declaration
    let ext = registry.resolve_document("ext-a").unwrap();
    assert!(ext.get("$patch").is_none());

    assert!(registry.deregister("ext-a"));
    assert!(registry.pending_extensions().is_empty());
}

#[test]
fn test_longer_extension_cycle_fails_the_build() {
    let registry = SchemaRegistry::default();
    registry
        .register_document(
            json!({"$id": "a", "$patch": {"source": {"$ref": "b"}}}),
            RegisterOptions::default(),
        )
        .unwrap();
    registry
        .register_document(
            json!({"$id": "b", "$patch": {"source": {"$ref": "a"}}}),
            RegisterOptions::default(),
        )
        .unwrap();

    let err = registry.resolve("a", BuildOptions::raw()).unwrap_err();
    assert_eq!(err.kind(), "CircularExtension");
}

// =============================================================================
// Formats and registration inputs
// =============================================================================

#[test]
fn test_catastrophic_format_is_neutralized() {
    let registry = SchemaRegistry::default();
    let format = registry.register_format("greedy", "(a+)+$");
    assert!(format.substituted());
    assert!(!format.verdict.is_safe());

    registry
        .register_document(
            json!({"$id": "tag", "type": "string", "format": "greedy"}),
            RegisterOptions::default(),
        )
        .unwrap();
    let hostile = format!("{}!", "a".repeat(64));
    assert!(registry.validate("tag", &json!(hostile)).is_ok());
}

#[test]
fn test_config_formats_override_builtins_and_are_screened() {
    let registry = SchemaRegistry::default();
    registry.apply_config(&config_with_formats(&[("slug", "^[A-Z]+$"), ("evil", "(a+)+$")]));

    registry
        .register_document(
            json!({"$id": "code", "type": "string", "format": "slug"}),
            RegisterOptions::default(),
        )
        .unwrap();
    registry
        .register_document(
            json!({"$id": "tag", "type": "string", "format": "evil"}),
            RegisterOptions::default(),
        )
        .unwrap();

    assert!(registry.validate("code", &json!("ABC")).is_ok());
    assert!(registry.validate("code", &json!("abc")).is_err());

    // the rejected pattern falls back to accepting anything
    assert!(registry.validate("tag", &json!("zzz!")).is_ok());
}

#[tokio::test]
async fn test_started_registry_enforces_overridden_builtin() {
    let registry = SchemaRegistry::default();
    let config = config_with_formats(&[("slug", "^[A-Z]+$")]);
    registry
        .start(&vec![components().join("lms")], async move {
            Ok::<_, SchemaError>(config)
        })
        .await;

    registry
        .register_document(
            json!({"$id": "code", "type": "string", "format": "slug"}),
            RegisterOptions::default(),
        )
        .unwrap();
    assert!(registry.validate("code", &json!("ABC")).is_ok());
    assert!(registry.validate("code", &json!("abc")).is_err());
}

#[tokio::test]
async fn test_register_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("room.schema.json");
    std::fs::write(&path, r#"{"type": "object", "required": ["number"]}"#).unwrap();

    let registry = SchemaRegistry::default();
    let name = registry
        .register(path.as_path(), RegisterOptions::default())
        .await
        .unwrap();
    assert_eq!(name, "room");
    assert_eq!(registry.source_of("room"), Some(path.clone()));

    let err = registry
        .register(path.as_path(), RegisterOptions::default())
        .await
        .unwrap_err();
    match err {
        SchemaError::SchemaExists { name, filepath } => {
            assert_eq!(name, "room");
            assert_eq!(filepath, Some(path));
        }
        other => panic!("Expected SchemaExists, got {:?}", other),
    }
}

#[tokio::test]
async fn test_register_rejects_bad_handles() {
    let registry = SchemaRegistry::default();

    let err = registry
        .register(PathBuf::new(), RegisterOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidParams");

    let err = registry
        .register(components().join("nope.schema.json"), RegisterOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "LoadError");

    let err = registry
        .register(json!({"type": "object"}), RegisterOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidParams");
}
