//! Custom validation keywords
//!
//! A keyword is a macro: each occurrence of `"<keyword>": <value>` inside a
//! schema is removed and the expansion of `<value>` is appended to the
//! enclosing schema's `allOf`. Expansions are either a JSON template, where
//! every `"$value"` string is replaced by the keyword's value, or a Rust
//! closure.
//!
//! ```
//! use component_schemas::KeywordDefinition;
//! use serde_json::json;
//!
//! let even = KeywordDefinition::template("x-even", json!({"multipleOf": 2}))
//!     .with_meta_schema(json!({"const": true}));
//! assert_eq!(even.expand(&json!(true)), json!({"multipleOf": 2}));
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Placeholder substituted by the keyword's value in template expansions
pub const VALUE_PLACEHOLDER: &str = "$value";

/// Keys whose values are data rather than subschemas; never rewritten
const DATA_KEYS: &[&str] = &["const", "enum", "examples", "default"];

/// Standard vocabulary that custom keywords may not shadow
pub const RESERVED_KEYWORDS: &[&str] = &[
    "$id", "$schema", "$ref", "$defs", "$anchor", "$dynamicRef", "$dynamicAnchor", "$comment",
    "$vocabulary", "$patch", "definitions", "type", "enum", "const", "multipleOf", "maximum",
    "exclusiveMaximum", "minimum", "exclusiveMinimum", "maxLength", "minLength", "pattern",
    "maxItems", "minItems", "uniqueItems", "maxContains", "minContains", "maxProperties",
    "minProperties", "required", "dependentRequired", "allOf", "anyOf", "oneOf", "not", "if",
    "then", "else", "dependentSchemas", "prefixItems", "items", "contains", "properties",
    "patternProperties", "additionalProperties", "propertyNames", "unevaluatedItems",
    "unevaluatedProperties", "format", "title", "description", "default", "deprecated",
    "readOnly", "writeOnly", "examples", "contentEncoding", "contentMediaType", "contentSchema",
];

/// Closure form of a keyword expansion
pub type Expander = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Definition of a custom keyword
///
/// Deserializable so definitions can be shipped as data; closure expanders
/// are only available through [`KeywordDefinition::with_expander`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordDefinition {
    /// Keyword name as it appears in schemas
    pub keyword: String,
    /// Schema the keyword's value must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_schema: Option<Value>,
    /// JSON template expansion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Value>,
    #[serde(skip)]
    expander: Option<Expander>,
}

impl KeywordDefinition {
    /// Keyword expanded from a JSON template
    pub fn template(keyword: impl Into<String>, template: Value) -> Self {
        Self {
            keyword: keyword.into(),
            meta_schema: None,
            template: Some(template),
            expander: None,
        }
    }

    /// Keyword expanded by a closure
    pub fn with_expander<F>(keyword: impl Into<String>, expander: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            keyword: keyword.into(),
            meta_schema: None,
            template: None,
            expander: Some(Arc::new(expander)),
        }
    }

    /// Constrain the keyword's value
    pub fn with_meta_schema(mut self, meta_schema: Value) -> Self {
        self.meta_schema = Some(meta_schema);
        self
    }

    pub fn has_expander(&self) -> bool {
        self.expander.is_some()
    }

    /// Expansion of one occurrence of the keyword
    pub fn expand(&self, value: &Value) -> Value {
        match (&self.expander, &self.template) {
            (Some(expander), _) => expander(value),
            (None, Some(template)) => substitute(template, value),
            (None, None) => Value::Bool(true),
        }
    }
}

impl fmt::Debug for KeywordDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordDefinition")
            .field("keyword", &self.keyword)
            .field("meta_schema", &self.meta_schema)
            .field("template", &self.template)
            .field("expander", &self.expander.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

fn substitute(template: &Value, value: &Value) -> Value {
    match template {
        Value::String(s) if s == VALUE_PLACEHOLDER => value.clone(),
        Value::Array(items) => Value::Array(items.iter().map(|t| substitute(t, value)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, t)| (k.clone(), substitute(t, value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Every value `keyword` takes anywhere in `document`
pub fn occurrences<'a>(document: &'a Value, keyword: &str, out: &mut Vec<&'a Value>) {
    match document {
        Value::Object(map) => {
            for (key, child) in map {
                if key == keyword {
                    out.push(child);
                } else if !DATA_KEYS.contains(&key.as_str()) {
                    occurrences(child, keyword, out);
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| occurrences(item, keyword, out)),
        _ => {}
    }
}

/// Rewrite every occurrence of the definition's keyword into `allOf` branches
pub fn expand_in_place(document: &mut Value, definition: &KeywordDefinition) {
    match document {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if !DATA_KEYS.contains(&key.as_str()) {
                    expand_in_place(child, definition);
                }
            }
            if let Some(value) = map.remove(&definition.keyword) {
                let expansion = definition.expand(&value);
                push_all_of(map, expansion);
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| expand_in_place(item, definition)),
        _ => {}
    }
}

fn push_all_of(map: &mut Map<String, Value>, expansion: Value) {
    match map.get_mut("allOf") {
        Some(Value::Array(branches)) => branches.push(expansion),
        _ => {
            map.insert("allOf".to_string(), Value::Array(vec![expansion]));
        }
    }
}
