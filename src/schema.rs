//! Schema units
//!
//! A [`SchemaUnit`] is one loaded schema document: its name, the raw
//! document, the schema it patches (if any) and the ordered list of schemas
//! that patch it. Building a unit merges the extensions over the raw
//! document and optionally compiles the result.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::trace;

use crate::checksum::Checksum;
use crate::engine::{CompiledSchema, ValidationEngine};
use crate::error::{Result, SchemaError};
use crate::references::SchemaResolver;

/// File name suffix of schema documents
pub const SCHEMA_SUFFIX: &str = ".schema.json";

/// Key holding the patch declaration
pub const PATCH_KEY: &str = "$patch";

/// Access to other units while merging and compiling
pub trait UnitLookup {
    fn unit(&self, name: &str) -> Option<&SchemaUnit>;
}

impl UnitLookup for HashMap<String, SchemaUnit> {
    fn unit(&self, name: &str) -> Option<&SchemaUnit> {
        self.get(name)
    }
}

/// Options for [`SchemaUnit::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Produce a validator; `false` returns the merged raw document
    pub compiled: bool,
    /// Reuse and store the memoized validator
    pub cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            compiled: true,
            cache: true,
        }
    }
}

impl BuildOptions {
    /// Merged document only
    pub fn raw() -> Self {
        Self {
            compiled: false,
            ..Self::default()
        }
    }
}

/// Result of building a unit
#[derive(Debug, Clone)]
pub enum Resolved {
    Compiled(Arc<CompiledSchema>),
    Document(Value),
}

impl Resolved {
    /// The merged document, or the document the validator was compiled from
    pub fn document(&self) -> &Value {
        match self {
            Resolved::Compiled(schema) => schema.document(),
            Resolved::Document(document) => document,
        }
    }

    pub fn compiled(&self) -> Option<&Arc<CompiledSchema>> {
        match self {
            Resolved::Compiled(schema) => Some(schema),
            Resolved::Document(_) => None,
        }
    }

    pub fn into_document(self) -> Value {
        match self {
            Resolved::Compiled(schema) => schema.document().clone(),
            Resolved::Document(document) => document,
        }
    }
}

/// Everything a build needs besides the unit itself
pub struct BuildContext<'a> {
    pub units: &'a dyn UnitLookup,
    pub engine: &'a dyn ValidationEngine,
}

impl SchemaResolver for BuildContext<'_> {
    fn resolve_document(&self, name: &str) -> Result<Value> {
        self.units
            .unit(name)
            .ok_or_else(|| SchemaError::schema_not_found(name))?
            .merged_document(self.units)
    }

    fn is_registered(&self, name: &str) -> bool {
        self.units.unit(name).is_some()
    }
}

#[derive(Debug)]
struct CachedBuild {
    key: Checksum,
    schema: Arc<CompiledSchema>,
}

/// One loaded schema document
#[derive(Debug)]
pub struct SchemaUnit {
    name: String,
    document: Value,
    source: Option<PathBuf>,
    patch_source: Option<String>,
    extensions: Vec<String>,
    registered_at: DateTime<Utc>,
    compiled: RefCell<Option<CachedBuild>>,
}

impl SchemaUnit {
    /// Parse a schema file's content. The name is the document's `$id`, or
    /// the file name without its `.schema.json` suffix.
    pub fn from_source(path: &Path, content: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(content).map_err(|e| SchemaError::Load {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::create(document, Some(path.to_path_buf()))
    }

    /// Wrap an in-memory document, which must carry a `$id`
    pub fn from_document(document: Value) -> Result<Self> {
        Self::create(document, None)
    }

    fn create(document: Value, source: Option<PathBuf>) -> Result<Self> {
        let Value::Object(map) = &document else {
            return Err(SchemaError::invalid_param("document must be a JSON object"));
        };

        let name = match map.get("$id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(_) => return Err(SchemaError::invalid_param("$id must be a non-empty string")),
            None => source
                .as_deref()
                .and_then(name_from_path)
                .ok_or_else(|| SchemaError::invalid_param("$id"))?,
        };

        let patch_source = patch_source_of(&document).map_err(|reason| SchemaError::Load {
            source_name: source
                .as_ref()
                .map_or_else(|| name.clone(), |p| p.display().to_string()),
            reason,
        })?;

        Ok(Self {
            name,
            document,
            source,
            patch_source,
            extensions: Vec::new(),
            registered_at: Utc::now(),
            compiled: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The document as loaded, `$patch` included
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// File the unit was loaded from
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Name of the schema this unit patches
    pub fn patch_source(&self) -> Option<&str> {
        self.patch_source.as_deref()
    }

    /// Names of the units patching this one, in application order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Whether a compiled validator is memoized
    pub fn is_compiled(&self) -> bool {
        self.compiled.borrow().is_some()
    }

    /// Record `extension` as patching this unit. Adding an extension that is
    /// already present changes nothing; otherwise the memoized validator is
    /// dropped.
    pub fn add_extension(&mut self, extension: &str) -> bool {
        if self.extensions.iter().any(|e| e == extension) {
            return false;
        }
        self.extensions.push(extension.to_string());
        self.invalidate();
        true
    }

    pub fn remove_extension(&mut self, extension: &str) -> bool {
        let before = self.extensions.len();
        self.extensions.retain(|e| e != extension);
        let removed = self.extensions.len() != before;
        if removed {
            self.invalidate();
        }
        removed
    }

    /// Drop the memoized validator
    pub fn invalidate(&self) {
        self.compiled.borrow_mut().take();
    }

    /// The raw document without its patch declaration
    pub fn own_document(&self) -> Value {
        let mut document = self.document.clone();
        if let Value::Object(map) = &mut document {
            map.remove(PATCH_KEY);
        }
        document
    }

    /// The raw document with every extension merged over it, in registration
    /// order. Extensions contribute their own merged documents.
    pub fn merged_document(&self, units: &dyn UnitLookup) -> Result<Value> {
        let mut visiting = Vec::new();
        self.merge_into(units, &mut visiting)
    }

    fn merge_into(&self, units: &dyn UnitLookup, visiting: &mut Vec<String>) -> Result<Value> {
        if visiting.iter().any(|n| n == &self.name) {
            let mut chain = visiting.clone();
            chain.push(self.name.clone());
            return Err(SchemaError::CircularExtension { chain });
        }
        visiting.push(self.name.clone());

        let mut merged = self.own_document();
        for extension in &self.extensions {
            let Some(unit) = units.unit(extension) else {
                trace!(schema = %self.name, extension = %extension, "Skipping unregistered extension");
                continue;
            };
            let mut patch = unit.merge_into(units, visiting)?;
            if let Value::Object(map) = &mut patch {
                map.remove("$id");
            }
            deep_merge(&mut merged, patch);
        }

        visiting.pop();
        Ok(merged)
    }

    /// Produce the merged document or a compiled validator for it
    pub fn build(&self, context: &BuildContext<'_>, options: BuildOptions) -> Result<Resolved> {
        let merged = self.merged_document(context.units)?;
        if !options.compiled {
            return Ok(Resolved::Document(merged));
        }

        let prepared = context.engine.prepare(&self.name, &merged, context)?;
        let key = Checksum::for_compilation(context.engine.generation(), &prepared);

        if options.cache {
            if let Some(cached) = self.compiled.borrow().as_ref().filter(|c| c.key == key) {
                trace!(schema = %self.name, "Compiled schema cache hit");
                return Ok(Resolved::Compiled(Arc::clone(&cached.schema)));
            }
        }

        let schema = Arc::new(context.engine.compile_prepared(&self.name, prepared)?);
        if options.cache {
            *self.compiled.borrow_mut() = Some(CachedBuild {
                key,
                schema: Arc::clone(&schema),
            });
        }
        Ok(Resolved::Compiled(schema))
    }
}

/// Schema name derived from a file name: `course.schema.json` -> `course`
pub fn name_from_path(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let name = file_name
        .strip_suffix(SCHEMA_SUFFIX)
        .or_else(|| file_name.strip_suffix(".json"))
        .unwrap_or(file_name);
    (!name.is_empty()).then(|| name.to_string())
}

fn patch_source_of(document: &Value) -> std::result::Result<Option<String>, String> {
    let Some(patch) = document.get(PATCH_KEY) else {
        return Ok(None);
    };
    match patch.pointer("/source/$ref") {
        Some(Value::String(reference)) => {
            let target = reference
                .split_once('#')
                .map_or(reference.as_str(), |(target, _)| target);
            if target.is_empty() {
                Err(format!("{PATCH_KEY}.source.$ref does not name a schema"))
            } else {
                Ok(Some(target.to_string()))
            }
        }
        _ => Err(format!("{PATCH_KEY}.source.$ref must be a string")),
    }
}

/// Overlay `patch` onto `base`: objects merge key by key, anything else in
/// `patch` replaces what is in `base`.
pub fn deep_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => merge_maps(base_map, patch_map),
        (base, patch) => *base = patch,
    }
}

fn merge_maps(base: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        match base.get_mut(&key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                deep_merge(existing, value)
            }
            _ => {
                base.insert(key, value);
            }
        }
    }
}
