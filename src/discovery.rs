//! Schema discovery across component roots
//!
//! Each component root is scanned for `schema/*.schema.json`. Files are read
//! and parsed concurrently; the registry then registers them one by one in
//! (root, path) order so the outcome does not depend on read timing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobMatcher};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::SchemaConfig;
use crate::error::{Result, SchemaError};
use crate::schema::SchemaUnit;

/// Location of schema files inside a component root
pub const SCHEMA_GLOB: &str = "schema/*.schema.json";

/// Anything that can name component roots
pub trait ComponentSource {
    fn component_roots(&self) -> Vec<PathBuf>;
}

impl ComponentSource for [PathBuf] {
    fn component_roots(&self) -> Vec<PathBuf> {
        self.to_vec()
    }
}

impl ComponentSource for Vec<PathBuf> {
    fn component_roots(&self) -> Vec<PathBuf> {
        self.clone()
    }
}

impl ComponentSource for SchemaConfig {
    fn component_roots(&self) -> Vec<PathBuf> {
        self.discovery_roots()
    }
}

/// A file that could not be registered
#[derive(Debug)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: SchemaError,
}

/// Outcome of a discovery pass
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names registered, in registration order
    pub registered: Vec<String>,
    pub failures: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, path: PathBuf, error: SchemaError) {
        warn!(path = %path.display(), error = %error, "Schema discovery failure");
        self.failures.push(DiscoveryFailure { path, error });
    }
}

fn schema_matcher() -> Result<GlobMatcher> {
    GlobBuilder::new(SCHEMA_GLOB)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| SchemaError::invalid_param(format!("{SCHEMA_GLOB}: {e}")))
}

/// Schema files under one component root, sorted by path
pub fn scan_root(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(SchemaError::NotFound {
            kind: "component root".to_string(),
            id: root.display().to_string(),
        });
    }

    let matcher = schema_matcher()?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| SchemaError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if matcher.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    debug!(root = %root.display(), count = files.len(), "Scanned component root");
    Ok(files)
}

/// Read and parse one schema file, giving up after `timeout`
pub async fn load_file(path: &Path, timeout: Duration) -> Result<SchemaUnit> {
    let content = match tokio::time::timeout(timeout, tokio::fs::read_to_string(path)).await {
        Ok(read) => read.map_err(|e| SchemaError::Load {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?,
        Err(_) => {
            return Err(SchemaError::Load {
                source_name: path.display().to_string(),
                reason: format!("read timed out after {}ms", timeout.as_millis()),
            })
        }
    };
    SchemaUnit::from_source(path, &content)
}

/// Load every file concurrently. Results come back in input order.
pub async fn load_all(files: Vec<PathBuf>, timeout: Duration) -> Vec<(PathBuf, Result<SchemaUnit>)> {
    let handles: Vec<(PathBuf, JoinHandle<Result<SchemaUnit>>)> = files
        .into_iter()
        .map(|path| {
            let task_path = path.clone();
            let handle = tokio::spawn(async move { load_file(&task_path, timeout).await });
            (path, handle)
        })
        .collect();

    let mut loaded = Vec::with_capacity(handles.len());
    for (path, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            Err(SchemaError::Load {
                source_name: path.display().to_string(),
                reason: format!("loader task failed: {e}"),
            })
        });
        loaded.push((path, result));
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_scan_root_matches_naming_convention_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("schema/b.schema.json"), "{}");
        write(&root.join("schema/a.schema.json"), "{}");
        write(&root.join("schema/notes.json"), "{}");
        write(&root.join("schema/nested/c.schema.json"), "{}");
        write(&root.join("d.schema.json"), "{}");

        let files = scan_root(root).unwrap();
        assert_eq!(
            files,
            vec![root.join("schema/a.schema.json"), root.join("schema/b.schema.json")]
        );
    }

    #[test]
    fn test_scan_missing_root() {
        let err = scan_root(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { ref kind, .. } if kind == "component root"));
    }

    #[tokio::test]
    async fn test_load_all_keeps_order_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("schema/good.schema.json");
        let bad = dir.path().join("schema/bad.schema.json");
        write(&good, r#"{"$id": "good"}"#);
        write(&bad, "{ not json");
        let missing = dir.path().join("schema/missing.schema.json");

        let loaded = load_all(
            vec![bad.clone(), good.clone(), missing.clone()],
            Duration::from_secs(5),
        )
        .await;

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].0, bad);
        assert!(matches!(loaded[0].1, Err(SchemaError::Load { .. })));
        assert_eq!(loaded[1].1.as_ref().unwrap().name(), "good");
        assert!(loaded[2].1.is_err());
    }

    #[test]
    fn test_component_sources() {
        let roots = vec![PathBuf::from("/a"), PathBuf::from("/b")];
        assert_eq!(roots.component_roots(), roots);
        assert_eq!(roots.as_slice().component_roots(), roots);

        let mut config = SchemaConfig::default();
        config.discovery.roots = vec![PathBuf::from("/srv/lms")];
        assert_eq!(config.component_roots(), vec![PathBuf::from("/srv/lms")]);
    }
}
