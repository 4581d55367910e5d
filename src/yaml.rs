//! Fixture YAML to JSON conversion.
//!
//! Fixture files may hold several documents. Each becomes a
//! `serde_json::Value` so it can be sent as a `DynamicObject` without a
//! typed schema.

use serde_json::{Map, Number, Value};
use thiserror::Error;
use yaml_rust2::{Yaml, YamlLoader};

/// Why a fixture document could not be converted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum YamlError {
    /// The scanner rejected the input
    #[error("syntax: {0}")]
    Syntax(String),
    /// A mapping key was a sequence, mapping or other non-scalar
    #[error("document {doc}: mapping key must be a scalar")]
    ComplexKey {
        /// Zero-based document index
        doc: usize,
    },
    /// A scalar the loader could not type
    #[error("document {doc}: invalid value {value:?}")]
    Invalid {
        /// Zero-based document index
        doc: usize,
        /// Offending text
        value: String,
    },
}

/// Parse every non-empty document of `input`.
///
/// A trailing `---` produces an empty document, which is skipped.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, YamlError> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| YamlError::Syntax(e.to_string()))?;
    let mut out = Vec::with_capacity(docs.len());
    for (doc, yaml) in docs.into_iter().enumerate() {
        if matches!(yaml, Yaml::Null) {
            continue;
        }
        out.push(convert(doc, yaml)?);
    }
    Ok(out)
}

fn convert(doc: usize, yaml: Yaml) -> Result<Value, YamlError> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::from(i),
        Yaml::String(s) => Value::String(s),
        Yaml::Real(text) => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or(YamlError::Invalid { doc, value: text })?,
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert(doc, item))
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut object = Map::with_capacity(entries.len());
            for (key, value) in entries {
                object.insert(scalar_key(doc, key)?, convert(doc, value)?);
            }
            Value::Object(object)
        }
        Yaml::Alias(id) => {
            return Err(YamlError::Invalid {
                doc,
                value: format!("<unresolved alias {id}>"),
            })
        }
        Yaml::BadValue => {
            return Err(YamlError::Invalid {
                doc,
                value: "<bad value>".to_string(),
            })
        }
    })
}

/// Stringify a scalar mapping key; JSON objects only have string keys
fn scalar_key(doc: usize, key: Yaml) -> Result<String, YamlError> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        _ => Err(YamlError::ComplexKey { doc }),
    }
}
