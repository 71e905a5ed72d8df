//! Component Schema Registry
//!
//! Discovers JSON Schema documents spread across independently versioned
//! components, composes them through `$patch` extensions and cross-schema
//! `$ref`s, and compiles them into cached validators.
//!
//! ## Features
//!
//! - **Order-independent composition**: a schema may patch another that is not
//!   loaded yet; the relationship is parked until the source arrives
//! - **Deterministic merges**: extensions apply in registration order, later
//!   keys win
//! - **Guarded formats**: format patterns with catastrophic-backtracking shapes
//!   are replaced by a permissive fallback
//! - **Custom keywords**: macro keywords expanded before compilation
//!
//! ## Layout
//!
//! ```text
//! <component root>/
//! └── schema/
//!     ├── course.schema.json        {"$id": "course", ...}
//!     └── course-ext.schema.json    {"$patch": {"source": {"$ref": "course"}}, ...}
//! ```
//!
//! ## Example
//!
//! ```
//! use component_schemas::{RegisterOptions, SchemaRegistry};
//! use serde_json::json;
//!
//! let registry = SchemaRegistry::default();
//! registry
//!     .register_document(json!({"$id": "course", "required": ["title"]}), RegisterOptions::default())
//!     .unwrap();
//! assert!(registry.validate("course", &json!({"title": "Rust"})).is_ok());
//! ```

pub mod checksum;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod format_guard;
pub mod keyword;
pub mod ledger;
pub mod references;
pub mod registry;
pub mod schema;

pub use checksum::Checksum;
pub use config::SchemaConfig;
pub use discovery::{ComponentSource, DiscoveryFailure, DiscoveryReport};
pub use engine::{CompiledSchema, JsonSchemaEngine, ValidationEngine};
pub use error::{Result, SchemaError};
pub use format_guard::{FormatGuard, GuardedFormat, Verdict};
pub use keyword::KeywordDefinition;
pub use ledger::ExtensionLedger;
pub use registry::{RegisterOptions, SchemaRegistry, SchemaSource, SearchHit};
pub use schema::{BuildOptions, Resolved, SchemaUnit};
