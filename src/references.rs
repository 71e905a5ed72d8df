//! Cross-schema reference resolution
//!
//! Before compilation every `$ref` that points at another registered schema
//! is resolved through a [`SchemaResolver`] and bundled into the root's
//! `$defs`, so the compiled document is self-contained:
//!
//! ```text
//! {"$ref": "address#/properties/zip"}
//!   -> {"$ref": "#/$defs/address/properties/zip"}   + $defs.address = <address doc>
//! ```
//!
//! Local references inside a bundled document are re-rooted under its
//! `$defs` entry. References back to the root schema become local.

use std::collections::{HashMap, HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::error::{Result, SchemaError};

/// Lookup hook used during compilation
pub trait SchemaResolver {
    /// Fully merged raw document of a registered schema
    fn resolve_document(&self, name: &str) -> Result<Value>;

    /// Whether `name` is a registered schema
    fn is_registered(&self, name: &str) -> bool;
}

/// Inline every registered schema reachable from `document` via `$ref`
///
/// `root_name` is the registry name of `document` itself, used to turn
/// references back to the root into local ones.
pub fn bundle(root_name: &str, document: &Value, resolver: &dyn SchemaResolver) -> Result<Value> {
    let mut root = document.clone();
    strip_identity(&mut root);

    let mut keys = DefKeys::default();
    if let Some(Value::Object(existing)) = root.get("$defs") {
        keys.taken.extend(existing.keys().cloned());
    }
    let mut queue: VecDeque<String> = VecDeque::new();

    rewrite_refs(&mut root, root_name, None, resolver, &mut keys, &mut queue)?;

    let mut bundled: Vec<(String, Value)> = Vec::new();
    while let Some(name) = queue.pop_front() {
        let key = keys.key_for(&name);
        let mut doc = resolver.resolve_document(&name)?;
        strip_identity(&mut doc);
        if let Value::Object(map) = &mut doc {
            // Dialect is declared once, at the root
            map.remove("$schema");
        }
        rewrite_refs(&mut doc, root_name, Some(&key), resolver, &mut keys, &mut queue)?;
        bundled.push((key, doc));
    }

    if bundled.is_empty() {
        return Ok(root);
    }

    if let Value::Object(map) = &mut root {
        let defs = map
            .entry("$defs".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(defs) = defs {
            for (key, doc) in bundled {
                defs.insert(key, doc);
            }
        }
    }

    Ok(root)
}

fn strip_identity(document: &mut Value) {
    if let Value::Object(map) = document {
        map.remove("$id");
    }
}

fn split_reference(reference: &str) -> (&str, &str) {
    match reference.split_once('#') {
        Some((target, fragment)) => (target, fragment),
        None => (reference, ""),
    }
}

/// Escape a `$defs` key for use inside a JSON pointer
fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// `$defs` keys assigned to bundled schemas
#[derive(Default)]
struct DefKeys {
    by_name: HashMap<String, String>,
    taken: HashSet<String>,
}

impl DefKeys {
    fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    fn key_for(&mut self, name: &str) -> String {
        if let Some(key) = self.by_name.get(name) {
            return key.clone();
        }
        let base: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let mut key = base.clone();
        let mut suffix = 1;
        while self.taken.contains(&key) {
            key = format!("{base}_{suffix}");
            suffix += 1;
        }
        self.taken.insert(key.clone());
        self.by_name.insert(name.to_string(), key.clone());
        key
    }
}

fn rewrite_refs(
    value: &mut Value,
    root_name: &str,
    current_key: Option<&str>,
    resolver: &dyn SchemaResolver,
    keys: &mut DefKeys,
    queue: &mut VecDeque<String>,
) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "$ref" {
                    if let Value::String(reference) = child {
                        if let Some(rewritten) =
                            rewrite_reference(reference, root_name, current_key, resolver, keys, queue)?
                        {
                            *reference = rewritten;
                        }
                    }
                } else {
                    rewrite_refs(child, root_name, current_key, resolver, keys, queue)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                rewrite_refs(item, root_name, current_key, resolver, keys, queue)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn rewrite_reference(
    reference: &str,
    root_name: &str,
    current_key: Option<&str>,
    resolver: &dyn SchemaResolver,
    keys: &mut DefKeys,
    queue: &mut VecDeque<String>,
) -> Result<Option<String>> {
    let (target, fragment) = split_reference(reference);

    let anchor = !fragment.is_empty() && !fragment.starts_with('/');
    let local = |key: &str| {
        if anchor {
            format!("#{fragment}")
        } else {
            format!("#/$defs/{}{}", escape_pointer_token(key), fragment)
        }
    };

    if target.is_empty() {
        // Local reference: only documents bundled under $defs need re-rooting
        return Ok(current_key.map(local));
    }

    if target == root_name {
        return Ok(Some(format!("#{fragment}")));
    }

    if !resolver.is_registered(target) {
        return Err(SchemaError::schema_not_found(target));
    }

    let is_new = !keys.contains(target);
    let key = keys.key_for(target);
    if is_new {
        queue.push_back(target.to_string());
    }
    Ok(Some(local(&key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixed(HashMap<&'static str, Value>);

    impl SchemaResolver for Fixed {
        fn resolve_document(&self, name: &str) -> Result<Value> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| SchemaError::schema_not_found(name))
        }

        fn is_registered(&self, name: &str) -> bool {
            self.0.contains_key(name)
        }
    }

    fn resolver() -> Fixed {
        Fixed(HashMap::from([
            (
                "address",
                json!({
                    "$id": "address",
                    "type": "object",
                    "properties": {
                        "zip": {"$ref": "#/definitions/zip"},
                        "owner": {"$ref": "person"}
                    },
                    "definitions": {"zip": {"type": "string"}}
                }),
            ),
            (
                "person",
                json!({
                    "$id": "person",
                    "type": "object",
                    "properties": {"home": {"$ref": "address"}}
                }),
            ),
        ]))
    }

    #[test]
    fn test_document_without_references_is_unchanged() {
        let doc = json!({"type": "object", "properties": {"a": {"$ref": "#/$defs/a"}}});
        let bundled = bundle("root", &doc, &resolver()).unwrap();
        assert_eq!(bundled, doc);
    }

    #[test]
    fn test_bundles_transitive_and_cyclic_references() {
        let doc = json!({
            "$id": "course",
            "properties": {"location": {"$ref": "address"}}
        });
        let bundled = bundle("course", &doc, &resolver()).unwrap();

        assert_eq!(bundled["properties"]["location"]["$ref"], json!("#/$defs/address"));
        assert_eq!(
            bundled["$defs"]["address"]["properties"]["zip"]["$ref"],
            json!("#/$defs/address/definitions/zip")
        );
        assert_eq!(
            bundled["$defs"]["address"]["properties"]["owner"]["$ref"],
            json!("#/$defs/person")
        );
        assert_eq!(
            bundled["$defs"]["person"]["properties"]["home"]["$ref"],
            json!("#/$defs/address")
        );
        assert!(bundled.get("$id").is_none());
        assert!(bundled["$defs"]["address"].get("$id").is_none());
    }

    #[test]
    fn test_reference_back_to_root_becomes_local() {
        let bundled = bundle("person", &resolver().0["person"], &resolver()).unwrap();
        assert_eq!(
            bundled["$defs"]["address"]["properties"]["owner"]["$ref"],
            json!("#")
        );
    }

    #[test]
    fn test_unknown_reference_is_not_found() {
        let doc = json!({"$ref": "missing#/x"});
        let err = bundle("root", &doc, &resolver()).unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { ref id, .. } if id == "missing"));
    }

    #[test]
    fn test_def_keys_are_sanitized_and_unique() {
        let mut keys = DefKeys::default();
        assert_eq!(keys.key_for("https://x/a b"), "https___x_a_b");
        assert_eq!(keys.key_for("https://x/a_b"), "https___x_a_b_1");
        assert_eq!(keys.key_for("https://x/a b"), "https___x_a_b");
    }

    #[test]
    fn test_existing_defs_are_preserved() {
        let doc = json!({
            "$defs": {"address": {"type": "string"}},
            "properties": {"home": {"$ref": "address"}}
        });
        let bundled = bundle("root", &doc, &resolver()).unwrap();
        assert_eq!(bundled["$defs"]["address"], json!({"type": "string"}));
        assert_eq!(bundled["properties"]["home"]["$ref"], json!("#/$defs/address_1"));
        assert_eq!(bundled["$defs"]["address_1"]["type"], json!("object"));
    }
}
