//! The live configuration tree.
//!
//! A [`Config`] is a YAML mapping addressed with dotted paths
//! (`"hhd.http.port"`). Values are stored untyped and coerced lazily with
//! [`Config::to`], so a plugin only pays for the conversion it asks for.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::error::ConfigError;

/// Hierarchical value store with lazy coercion and recursive merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    root: Mapping,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a parsed YAML document. `null` (an empty file) is an empty tree.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(root) => Ok(Self { root }),
            _ => Err(ConfigError::NotAMapping {
                path: "<root>".to_string(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn as_mapping(&self) -> &Mapping {
        &self.root
    }

    pub fn into_value(self) -> Value {
        Value::Mapping(self.root)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut cur = self.root.get(parts.next()?)?;
        for part in parts {
            cur = cur.as_mapping()?.get(part)?;
        }
        Some(cur)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Store `value` at `path`, creating intermediate mappings on the way.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let (parents, leaf) = match path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, path),
        };

        let mut cur = &mut self.root;
        if let Some(parents) = parents {
            let mut walked = String::new();
            for part in parents.split('.') {
                if !walked.is_empty() {
                    walked.push('.');
                }
                walked.push_str(part);
                cur = cur
                    .entry(Value::String(part.to_owned()))
                    .or_insert_with(|| Value::Mapping(Mapping::new()))
                    .as_mapping_mut()
                    .ok_or_else(|| ConfigError::NotAMapping {
                        path: walked.clone(),
                    })?;
            }
        }
        cur.insert(Value::String(leaf.to_owned()), value.into());
        Ok(())
    }

    pub fn remove(&mut self, path: &str) -> Option<Value> {
        match path.rsplit_once('.') {
            None => self.root.remove(path),
            Some((parents, leaf)) => {
                let mut cur = &mut self.root;
                for part in parents.split('.') {
                    cur = cur.get_mut(part)?.as_mapping_mut()?;
                }
                cur.remove(leaf)
            }
        }
    }

    /// Coerce the value stored at `path` into `T`.
    pub fn to<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConfigError> {
        let value = self.get(path).ok_or_else(|| ConfigError::Missing {
            path: path.to_string(),
        })?;
        serde_yaml::from_value(value.clone()).map_err(|source| ConfigError::TypeMismatch {
            path: path.to_string(),
            expected: std::any::type_name::<T>(),
            source,
        })
    }

    /// Merge `partial` into this tree. Only the leaves present in `partial`
    /// are overwritten; nested mappings are merged rather than replaced.
    pub fn update(&mut self, partial: &Config) {
        merge_mapping(&mut self.root, &partial.root);
    }
}

impl TryFrom<Value> for Config {
    type Error = ConfigError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

/// True when a document holds nothing but whitespace and comments.
///
/// serde_yaml rejects an empty stream, while an empty profile or state file
/// means "no values".
pub fn is_blank_yaml(text: &str) -> bool {
    text.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#') || line == "---"
    })
}

fn merge_mapping(into: &mut Mapping, from: &Mapping) {
    for (key, value) in from {
        if let (Some(Value::Mapping(existing)), Value::Mapping(incoming)) =
            (into.get_mut(key), value)
        {
            merge_mapping(existing, incoming);
            continue;
        }
        into.insert(key.clone(), value.clone());
    }
}
