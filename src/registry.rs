//! Schema Registry
//!
//! Catalog of schema units keyed by name. Registration wires up patch
//! relationships (deferring them in the [`ExtensionLedger`] while the patched
//! schema is missing), resolution merges and compiles on demand, and
//! discovery loads every `schema/*.schema.json` under the component roots.
//!
//! All state sits behind one mutex, so registration, deregistration and
//! resolution never observe a half-applied change.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{RegistryConfig, SchemaConfig};
use crate::discovery::{self, ComponentSource, DiscoveryReport};
use crate::engine::{CompiledSchema, JsonSchemaEngine, ValidationEngine};
use crate::error::{Result, SchemaError};
use crate::format_guard::{FormatGuard, GuardedFormat};
use crate::keyword::KeywordDefinition;
use crate::ledger::ExtensionLedger;
use crate::schema::{BuildContext, BuildOptions, Resolved, SchemaUnit};

/// Formats installed when a registry is created
pub const BUILTIN_FORMATS: &[(&str, &str)] = &[
    ("identifier", "^[A-Za-z_][A-Za-z0-9_]*$"),
    (
        "semver",
        r"^(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)\.(0|[1-9][0-9]*)(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?$",
    ),
    ("slug", "^[a-z0-9]+(?:-[a-z0-9]+)*$"),
    ("sha256", "^[a-f0-9]{64}$"),
    ("hex-color", "^#(?:[0-9a-fA-F]{3}){1,2}$"),
    ("locale", "^[a-z]{2,3}(?:-[A-Z]{2})?$"),
];

/// Where a schema comes from
#[derive(Debug, Clone)]
pub enum SchemaSource {
    File(PathBuf),
    Document(Value),
}

impl From<PathBuf> for SchemaSource {
    fn from(path: PathBuf) -> Self {
        SchemaSource::File(path)
    }
}

impl From<&Path> for SchemaSource {
    fn from(path: &Path) -> Self {
        SchemaSource::File(path.to_path_buf())
    }
}

impl From<Value> for SchemaSource {
    fn from(document: Value) -> Self {
        SchemaSource::Document(document)
    }
}

/// Options for [`SchemaRegistry::register`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Replace an existing schema with the same name instead of failing
    pub replace: bool,
}

impl RegisterOptions {
    pub fn replacing() -> Self {
        Self { replace: true }
    }
}

/// A fuzzy search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub name: String,
    pub score: i64,
    pub source: Option<PathBuf>,
}

struct RegistryState {
    catalog: HashMap<String, SchemaUnit>,
    ledger: ExtensionLedger,
    engine: Box<dyn ValidationEngine>,
    settings: RegistryConfig,
    roots: Vec<PathBuf>,
    read_timeout: Duration,
}

impl RegistryState {
    fn context(&self) -> BuildContext<'_> {
        BuildContext {
            units: &self.catalog,
            engine: self.engine.as_ref(),
        }
    }

    fn insert(&mut self, unit: SchemaUnit, options: RegisterOptions) -> Result<String> {
        let name = unit.name().to_string();

        if unit.patch_source() == Some(name.as_str()) {
            return Err(SchemaError::CircularExtension {
                chain: vec![name.clone(), name],
            });
        }

        if let Some(existing) = self.catalog.get(&name) {
            if !options.replace {
                return Err(SchemaError::SchemaExists {
                    name,
                    filepath: existing.source().map(Path::to_path_buf),
                });
            }
            // Same patch source: keep the extension's slot in its source's order
            let keep_link = existing.patch_source() == unit.patch_source();
            debug!(schema = %name, keep_link, "Replacing registered schema");
            self.remove(&name, !keep_link);
            if keep_link {
                return Ok(self.admit(unit, None));
            }
        }

        let patch_source = unit.patch_source().map(str::to_string);
        Ok(self.admit(unit, patch_source))
    }

    /// Put a unit in the catalog, hand it the extensions waiting for it and,
    /// when `link_to` is given, attach it to that patch source.
    fn admit(&mut self, unit: SchemaUnit, link_to: Option<String>) -> String {
        let name = unit.name().to_string();
        let source = unit.source().map(|p| p.display().to_string()).unwrap_or_default();
        self.catalog.insert(name.clone(), unit);
        info!(schema = %name, source = %source, "Registered schema");

        let pending = self.ledger.drain(&name);
        if !pending.is_empty() {
            debug!(schema = %name, extensions = ?pending, "Applying deferred extensions");
        }
        if let Some(unit) = self.catalog.get_mut(&name) {
            for extension in &pending {
                unit.add_extension(extension);
            }
        }

        if let Some(source) = link_to {
            self.link_extension(&source, &name);
        }

        name
    }

    /// Record `extension` as patching `source`, now or once `source` arrives
    fn link_extension(&mut self, source: &str, extension: &str) {
        match self.catalog.get_mut(source) {
            Some(base) => {
                if base.add_extension(extension) {
                    debug!(schema = %source, extension = %extension, "Extension attached");
                }
            }
            None => {
                debug!(schema = %source, extension = %extension, "Patch source not registered; deferring extension");
                self.ledger.defer(source, extension);
            }
        }
    }

    /// Take a unit out of the catalog along with its relationships. Units
    /// extending it go back to the ledger so a later registration under the
    /// same name picks them up again in the same order. With `detach` unset
    /// the unit's own entry in its patch source (or the ledger) stays put.
    fn remove(&mut self, name: &str, detach: bool) -> Option<SchemaUnit> {
        let unit = self.catalog.remove(name)?;

        if let Some(source) = unit.patch_source().filter(|_| detach) {
            if let Some(base) = self.catalog.get_mut(source) {
                base.remove_extension(name);
            }
            self.ledger.withdraw(source, name);
        }

        for extension in unit.extensions() {
            if self.catalog.contains_key(extension) {
                self.ledger.defer(name, extension);
            }
        }

        Some(unit)
    }

    fn install_format(&mut self, guard: &FormatGuard, name: &str, pattern: &str) -> GuardedFormat {
        let format = guard.check(name, pattern);
        self.engine.add_format(format.clone());
        format
    }
}

/// The schema registry
pub struct SchemaRegistry {
    state: Mutex<RegistryState>,
    guard: FormatGuard,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new(&SchemaConfig::default())
    }
}

impl SchemaRegistry {
    /// Create a registry backed by the `jsonschema` engine
    pub fn new(config: &SchemaConfig) -> Self {
        Self::with_engine(config, Box::new(JsonSchemaEngine::new()))
    }

    /// Create a registry over any validation engine. Built-in formats are
    /// installed right away; `config` only supplies settings here, its format
    /// overrides are applied by [`SchemaRegistry::apply_config`].
    pub fn with_engine(config: &SchemaConfig, mut engine: Box<dyn ValidationEngine>) -> Self {
        engine.configure(&config.registry);
        let mut state = RegistryState {
            catalog: HashMap::new(),
            ledger: ExtensionLedger::new(),
            engine,
            settings: config.registry.clone(),
            roots: config.discovery_roots(),
            read_timeout: config.discovery.read_timeout(),
        };

        let guard = FormatGuard::new();
        for (name, pattern) in BUILTIN_FORMATS {
            state.install_format(&guard, name, pattern);
        }

        Self {
            state: Mutex::new(state),
            guard,
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for configuration, apply it, then discover schemas under
    /// `components` and the configured roots.
    ///
    /// A configuration failure is logged; startup goes on with the current
    /// settings.
    pub async fn start<C, F, E>(&self, components: &C, config: F) -> DiscoveryReport
    where
        C: ComponentSource + ?Sized,
        F: Future<Output = std::result::Result<SchemaConfig, E>>,
        E: Display,
    {
        match config.await {
            Ok(config) => self.apply_config(&config),
            Err(e) => warn!(error = %e, "Configuration unavailable; continuing with current settings"),
        }
        self.discover(components).await
    }

    /// Apply registry settings, discovery settings and format overrides
    pub fn apply_config(&self, config: &SchemaConfig) {
        {
            let mut state = self.state();
            state.engine.configure(&config.registry);
            state.settings = config.registry.clone();
            state.roots = config.discovery_roots();
            state.read_timeout = config.discovery.read_timeout();
            if !state.settings.cache_compiled {
                state.catalog.values().for_each(SchemaUnit::invalidate);
            }
        }
        if !config.formats.is_empty() {
            self.register_formats(config.formats.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
        debug!(formats = config.formats.len(), "Configuration applied");
    }

    /// Empty the catalog and reload it from every component root.
    ///
    /// Per-file failures are collected in the report; discovery itself never
    /// fails.
    pub async fn discover<C>(&self, components: &C) -> DiscoveryReport
    where
        C: ComponentSource + ?Sized,
    {
        let (roots, timeout) = {
            let mut state = self.state();
            state.catalog.clear();
            state.ledger.clear();
            let mut roots = components.component_roots();
            for root in &state.roots {
                if !roots.contains(root) {
                    roots.push(root.clone());
                }
            }
            (roots, state.read_timeout)
        };

        info!(roots = roots.len(), "Starting schema discovery");
        let mut report = DiscoveryReport::default();

        let mut files = Vec::new();
        for root in &roots {
            let scan_root = root.clone();
            let scan = tokio::task::spawn_blocking(move || discovery::scan_root(&scan_root));
            let scanned = match tokio::time::timeout(timeout, scan).await {
                Ok(Ok(scanned)) => scanned,
                Ok(Err(e)) => Err(SchemaError::Load {
                    source_name: root.display().to_string(),
                    reason: format!("scan task failed: {e}"),
                }),
                Err(_) => Err(SchemaError::Load {
                    source_name: root.display().to_string(),
                    reason: format!("scan timed out after {}ms", timeout.as_millis()),
                }),
            };
            match scanned {
                Ok(found) => files.extend(found),
                Err(error) => report.fail(root.clone(), error),
            }
        }

        for (path, loaded) in discovery::load_all(files, timeout).await {
            let registered = loaded.and_then(|unit| self.state().insert(unit, RegisterOptions::default()));
            match registered {
                Ok(name) => report.registered.push(name),
                Err(error) => report.fail(path, error),
            }
        }

        let pending = self.state().ledger.len();
        info!(
            registered = report.registered.len(),
            failed = report.failures.len(),
            awaiting_patch_source = pending,
            "Schema discovery complete"
        );
        report
    }

    /// Register a schema from a file or an in-memory document
    pub async fn register(&self, source: impl Into<SchemaSource>, options: RegisterOptions) -> Result<String> {
        match source.into() {
            SchemaSource::File(path) => {
                if path.as_os_str().is_empty() {
                    return Err(SchemaError::invalid_param("path"));
                }
                let timeout = self.state().read_timeout;
                let unit = discovery::load_file(&path, timeout).await?;
                self.state().insert(unit, options)
            }
            SchemaSource::Document(document) => self.register_document(document, options),
        }
    }

    /// Register an in-memory document; its `$id` is the schema name
    pub fn register_document(&self, document: Value, options: RegisterOptions) -> Result<String> {
        let unit = SchemaUnit::from_document(document)?;
        self.state().insert(unit, options)
    }

    /// Remove a schema. Returns whether anything was removed.
    pub fn deregister(&self, name: &str) -> bool {
        match self.state().remove(name, true) {
            Some(_) => {
                info!(schema = %name, "Deregistered schema");
                true
            }
            None => {
                debug!(schema = %name, "Deregister requested for unknown schema");
                false
            }
        }
    }

    /// Install a string format after screening its pattern
    pub fn register_format(&self, name: &str, pattern: &str) -> GuardedFormat {
        self.state().install_format(&self.guard, name, pattern)
    }

    /// Install several formats, each screened on its own
    pub fn register_formats<'a, I>(&self, formats: I) -> Vec<GuardedFormat>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut state = self.state();
        formats
            .into_iter()
            .map(|(name, pattern)| state.install_format(&self.guard, name, pattern))
            .collect()
    }

    /// Install a custom keyword. Failures are logged and reported as `false`.
    pub fn register_keyword(&self, definition: KeywordDefinition) -> bool {
        let keyword = definition.keyword.clone();
        match self.state().engine.add_keyword(definition) {
            Ok(()) => {
                info!(keyword = %keyword, "Registered keyword");
                true
            }
            Err(e) => {
                warn!(keyword = %keyword, error = %e, "Keyword registration failed");
                false
            }
        }
    }

    /// Build a registered schema: a compiled validator, or the merged raw
    /// document when `options.compiled` is false.
    pub fn resolve(&self, name: &str, options: BuildOptions) -> Result<Resolved> {
        let state = self.state();
        let unit = state
            .catalog
            .get(name)
            .ok_or_else(|| SchemaError::schema_not_found(name))?;
        let options = BuildOptions {
            cache: options.cache && state.settings.cache_compiled,
            ..options
        };
        unit.build(&state.context(), options)
    }

    /// Merged raw document of a registered schema
    pub fn resolve_document(&self, name: &str) -> Result<Value> {
        self.resolve(name, BuildOptions::raw()).map(Resolved::into_document)
    }

    /// Compiled validator for a registered schema
    pub fn resolve_compiled(&self, name: &str) -> Result<Arc<CompiledSchema>> {
        match self.resolve(name, BuildOptions::default())? {
            Resolved::Compiled(schema) => Ok(schema),
            Resolved::Document(_) => Err(SchemaError::Compile {
                name: name.to_string(),
                reason: "engine returned an uncompiled document".to_string(),
            }),
        }
    }

    /// Compile a document that is not (necessarily) registered. References
    /// to registered schemas resolve as usual.
    pub fn compile(&self, document: &Value) -> Result<CompiledSchema> {
        let name = document
            .get("$id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let state = self.state();
        let context = state.context();
        state.engine.compile(&name, document, &context)
    }

    /// Validate an instance against a registered schema
    pub fn validate(&self, name: &str, instance: &Value) -> Result<()> {
        self.resolve_compiled(name)?.validate(instance)
    }

    /// Drop every memoized validator
    pub fn clear_cache(&self) {
        let state = self.state();
        state.catalog.values().for_each(SchemaUnit::invalidate);
        debug!(schemas = state.catalog.len(), "Compiled schema cache cleared");
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().catalog.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state().catalog.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.state().catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().catalog.is_empty()
    }

    /// Extensions of a registered schema, in application order
    pub fn extensions_of(&self, name: &str) -> Option<Vec<String>> {
        self.state().catalog.get(name).map(|u| u.extensions().to_vec())
    }

    /// Source file of a registered schema
    pub fn source_of(&self, name: &str) -> Option<PathBuf> {
        self.state()
            .catalog
            .get(name)
            .and_then(|u| u.source().map(Path::to_path_buf))
    }

    /// Extensions still waiting for their patch source
    pub fn pending_extensions(&self) -> BTreeMap<String, Vec<String>> {
        self.state().ledger.snapshot()
    }

    /// Fuzzy search over registered names, best match first
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        use fuzzy_matcher::skim::SkimMatcherV2;
        use fuzzy_matcher::FuzzyMatcher;

        let matcher = SkimMatcherV2::default();
        let state = self.state();
        let mut hits: Vec<SearchHit> = state
            .catalog
            .values()
            .filter_map(|unit| {
                matcher.fuzzy_match(unit.name(), query).map(|score| SearchHit {
                    name: unit.name().to_string(),
                    score,
                    source: unit.source().map(Path::to_path_buf),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        hits.truncate(limit);
        hits
    }
}
