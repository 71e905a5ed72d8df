//! Validation engine
//!
//! The registry only talks to the engine through [`ValidationEngine`]: add a
//! format, add a keyword, compile a document. [`JsonSchemaEngine`] is the
//! implementation backed by the `jsonschema` crate.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::format_guard::GuardedFormat;
use crate::keyword::{self, KeywordDefinition, RESERVED_KEYWORDS};
use crate::references::{self, SchemaResolver};

/// Executable form of a compiled document
pub trait InstanceValidator: Send + Sync {
    /// Quick yes/no check
    fn is_valid(&self, instance: &Value) -> bool;

    /// Every validation error, rendered
    fn errors(&self, instance: &Value) -> Vec<String>;
}

impl InstanceValidator for jsonschema::Validator {
    fn is_valid(&self, instance: &Value) -> bool {
        jsonschema::Validator::is_valid(self, instance)
    }

    fn errors(&self, instance: &Value) -> Vec<String> {
        self.iter_errors(instance).map(|e| format!("{e}")).collect()
    }
}

/// A compiled schema: the self-contained document plus its validator
pub struct CompiledSchema {
    name: String,
    document: Value,
    validator: Box<dyn InstanceValidator>,
}

impl CompiledSchema {
    pub fn new(name: impl Into<String>, document: Value, validator: Box<dyn InstanceValidator>) -> Self {
        Self {
            name: name.into(),
            document,
            validator,
        }
    }

    /// Registry name the schema was compiled under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The document handed to the engine (references bundled, keywords expanded)
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Validate an instance.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::ValidationFailed` listing every violation.
    pub fn validate(&self, instance: &Value) -> Result<()> {
        let errors = self.validator.errors(instance);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::ValidationFailed { errors })
        }
    }
}

impl PartialEq for CompiledSchema {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("name", &self.name)
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

/// Capability surface of a validation engine
pub trait ValidationEngine: Send {
    /// Install (or replace) a string format. The format has already been
    /// screened by the Format Guard.
    fn add_format(&mut self, format: GuardedFormat);

    /// Install a custom keyword.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::KeywordRegistration` for malformed definitions.
    fn add_keyword(&mut self, definition: KeywordDefinition) -> Result<()>;

    /// Apply registry settings
    fn configure(&mut self, settings: &RegistryConfig);

    /// Counter bumped whenever formats, keywords or settings change
    fn generation(&self) -> u64;

    /// Turn a merged document into the self-contained document that will be
    /// compiled: registered references are resolved through `resolver` and
    /// bundled, custom keywords are checked and expanded.
    fn prepare(&self, name: &str, document: &Value, resolver: &dyn SchemaResolver) -> Result<Value>;

    /// Compile a document returned by [`ValidationEngine::prepare`]
    fn compile_prepared(&self, name: &str, prepared: Value) -> Result<CompiledSchema>;

    /// Prepare and compile in one step
    fn compile(&self, name: &str, document: &Value, resolver: &dyn SchemaResolver) -> Result<CompiledSchema> {
        let prepared = self.prepare(name, document, resolver)?;
        self.compile_prepared(name, prepared)
    }
}

struct InstalledKeyword {
    definition: KeywordDefinition,
    meta: Option<jsonschema::Validator>,
}

/// `jsonschema`-backed engine
pub struct JsonSchemaEngine {
    formats: BTreeMap<String, GuardedFormat>,
    keywords: Vec<InstalledKeyword>,
    validate_formats: bool,
    generation: u64,
}

impl Default for JsonSchemaEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSchemaEngine {
    pub fn new() -> Self {
        Self {
            formats: BTreeMap::new(),
            keywords: Vec::new(),
            validate_formats: true,
            generation: 0,
        }
    }

    /// Installed format, if any
    pub fn format(&self, name: &str) -> Option<&GuardedFormat> {
        self.formats.get(name)
    }

    /// Names of installed custom keywords
    pub fn keyword_names(&self) -> Vec<&str> {
        self.keywords
            .iter()
            .map(|k| k.definition.keyword.as_str())
            .collect()
    }

    fn check_keyword_values(&self, name: &str, document: &Value) -> Result<()> {
        for installed in &self.keywords {
            let Some(meta) = &installed.meta else {
                continue;
            };
            let mut values = Vec::new();
            keyword::occurrences(document, &installed.definition.keyword, &mut values);
            for value in values {
                if !meta.is_valid(value) {
                    return Err(SchemaError::Compile {
                        name: name.to_string(),
                        reason: format!(
                            "invalid value {} for keyword '{}'",
                            value, installed.definition.keyword
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

fn keyword_error(keyword: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::KeywordRegistration {
        keyword: keyword.to_string(),
        reason: reason.into(),
    }
}

impl ValidationEngine for JsonSchemaEngine {
    fn add_format(&mut self, format: GuardedFormat) {
        debug!(format = %format.name, pattern = %format.installed, "Installing format");
        self.formats.insert(format.name.clone(), format);
        self.generation += 1;
    }

    fn add_keyword(&mut self, definition: KeywordDefinition) -> Result<()> {
        let name = definition.keyword.trim();
        if name.is_empty() {
            return Err(keyword_error(&definition.keyword, "keyword name is empty"));
        }
        if RESERVED_KEYWORDS.contains(&name) {
            return Err(keyword_error(name, "shadows a standard keyword"));
        }
        if self.keywords.iter().any(|k| k.definition.keyword == name) {
            return Err(keyword_error(name, "already registered"));
        }
        match (definition.template.is_some(), definition.has_expander()) {
            (false, false) => return Err(keyword_error(name, "no expansion given")),
            (true, true) => {
                return Err(keyword_error(name, "both a template and an expander given"))
            }
            _ => {}
        }

        let meta = match &definition.meta_schema {
            Some(meta_schema) => Some(
                jsonschema::validator_for(meta_schema)
                    .map_err(|e| keyword_error(name, format!("invalid meta-schema: {e}")))?,
            ),
            None => None,
        };

        debug!(keyword = %name, "Installing keyword");
        self.keywords.push(InstalledKeyword { definition, meta });
        self.generation += 1;
        Ok(())
    }

    fn configure(&mut self, settings: &RegistryConfig) {
        if self.validate_formats != settings.validate_formats {
            self.validate_formats = settings.validate_formats;
            self.generation += 1;
        }
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn prepare(&self, name: &str, document: &Value, resolver: &dyn SchemaResolver) -> Result<Value> {
        let mut prepared = references::bundle(name, document, resolver)?;
        self.check_keyword_values(name, &prepared)?;
        for installed in &self.keywords {
            keyword::expand_in_place(&mut prepared, &installed.definition);
        }
        Ok(prepared)
    }

    fn compile_prepared(&self, name: &str, prepared: Value) -> Result<CompiledSchema> {
        let mut options = jsonschema::options();
        options.should_validate_formats(self.validate_formats);
        for format in self.formats.values() {
            let format = format.clone();
            options.with_format(format.name.clone(), move |value: &str| format.is_match(value));
        }

        let validator = options.build(&prepared).map_err(|e| SchemaError::Compile {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(CompiledSchema::new(name, prepared, Box::new(validator)))
    }
}
