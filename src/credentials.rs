//! Credential resolution for the remote object store.
//!
//! A credential document is YAML carrying an access/secret pair, either
//! flat:
//!
//! ```yaml
//! access_key: abc123
//! secret_key: shh
//! ```
//!
//! or scoped by deployment environment, so one file serves every
//! environment:
//!
//! ```yaml
//! test:
//!   access_key: abc123
//!   secret_key: shh
//! production:
//!   access_key: def456
//!   secret_key: hush
//! ```
//!
//! `${VAR}` references are expanded from the process environment before
//! parsing, allowing indirection to external secret stores.

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::path::PathBuf;

use serde_yaml::Value;

use crate::error::StorageError;

/// Canonical field name for the access key.
const ACCESS_KEY: &str = "access_key";
/// Canonical field name for the secret key.
const SECRET_KEY: &str = "secret_key";

/// Accepted aliases, normalized to the canonical names during resolution.
const ACCESS_KEY_ALIASES: [&str; 2] = [ACCESS_KEY, "access_key_id"];
const SECRET_KEY_ALIASES: [&str; 2] = [SECRET_KEY, "secret_access_key"];

/// An access/secret pair for the object-storage API.
///
/// Immutable once resolved; safely cloneable and shareable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Access key identifier.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
}

/// Where credentials come from.
///
/// The three accepted shapes: a document on disk, an already open reader
/// over such a document, or an in-memory mapping.
pub enum CredentialSource {
    /// Path to a YAML credential document.
    Path(PathBuf),
    /// An open reader over a YAML credential document.
    Reader(Box<dyn Read + Send>),
    /// An in-memory mapping, either flat or environment-scoped.
    Map(HashMap<String, Value>),
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
            Self::Map(map) => f.debug_tuple("Map").field(map).finish(),
        }
    }
}

impl CredentialSource {
    /// Source over a document on disk.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// Source over an already open reader.
    #[must_use]
    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    /// Source over an in-memory mapping.
    #[must_use]
    pub fn map(map: HashMap<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl Credentials {
    /// Resolve a credential source into a single access/secret pair.
    ///
    /// If the document contains a sub-mapping keyed by `environment`, that
    /// sub-mapping is the pair; otherwise the top-level mapping itself is.
    /// The active environment is an explicit parameter, never read from
    /// ambient process state.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the source cannot be read or
    /// parsed, or when the selected mapping lacks either key field. The
    /// message names the offending field and what was received.
    pub fn resolve(source: CredentialSource, environment: &str) -> Result<Self, StorageError> {
        let mapping = match source {
            CredentialSource::Path(path) => {
                let text = std::fs::read_to_string(&path).map_err(|e| {
                    StorageError::configuration(format!(
                        "cannot read credentials file '{}': {e}",
                        path.display()
                    ))
                })?;
                parse_document(&text)?
            }
            CredentialSource::Reader(mut reader) => {
                let mut text = String::new();
                reader.read_to_string(&mut text).map_err(|e| {
                    StorageError::configuration(format!("cannot read credentials source: {e}"))
                })?;
                parse_document(&text)?
            }
            CredentialSource::Map(map) => map
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        };

        let selected = select_environment(mapping, environment);
        extract_pair(&selected)
    }
}

/// Expand the document through the environment, parse it as YAML, and
/// lowercase the top-level keys.
fn parse_document(text: &str) -> Result<HashMap<String, Value>, StorageError> {
    let expanded = expand_env_vars(text);
    let value: Value = serde_yaml::from_str(&expanded).map_err(|e| {
        StorageError::configuration(format!("credentials document is not valid YAML: {e}"))
    })?;
    into_string_keyed(value)
}

fn into_string_keyed(value: Value) -> Result<HashMap<String, Value>, StorageError> {
    let Value::Mapping(mapping) = value else {
        return Err(StorageError::configuration(format!(
            "credentials document must be a key/value mapping (received {})",
            value_kind(&value)
        )));
    };

    let mut out = HashMap::with_capacity(mapping.len());
    for (key, val) in mapping {
        let Some(key) = key.as_str() else {
            return Err(StorageError::configuration(format!(
                "credentials document has a non-string key (received {})",
                value_kind(&key)
            )));
        };
        out.insert(key.to_lowercase(), val);
    }
    Ok(out)
}

/// Pick the sub-mapping for the active environment when present, falling
/// back to the top-level mapping itself.
fn select_environment(
    mut mapping: HashMap<String, Value>,
    environment: &str,
) -> HashMap<String, Value> {
    match mapping.remove(&environment.to_lowercase()) {
        Some(Value::Mapping(scoped)) => scoped
            .into_iter()
            .filter_map(|(k, v)| k.as_str().map(|k| (k.to_lowercase(), v)))
            .collect(),
        Some(other) => {
            // The environment key exists but is not a mapping; restore it
            // and treat the document as flat.
            mapping.insert(environment.to_lowercase(), other);
            mapping
        }
        None => mapping,
    }
}

fn extract_pair(mapping: &HashMap<String, Value>) -> Result<Credentials, StorageError> {
    let access_key = lookup(mapping, &ACCESS_KEY_ALIASES, ACCESS_KEY)?;
    let secret_key = lookup(mapping, &SECRET_KEY_ALIASES, SECRET_KEY)?;
    Ok(Credentials {
        access_key,
        secret_key,
    })
}

fn lookup(
    mapping: &HashMap<String, Value>,
    aliases: &[&str],
    canonical: &str,
) -> Result<String, StorageError> {
    for alias in aliases {
        if let Some(value) = mapping.get(*alias) {
            return value.as_str().map(ToString::to_string).ok_or_else(|| {
                StorageError::configuration(format!(
                    "credential field '{canonical}' must be a string (received {})",
                    value_kind(value)
                ))
            });
        }
    }
    let mut present: Vec<&str> = mapping.keys().map(String::as_str).collect();
    present.sort_unstable();
    Err(StorageError::configuration(format!(
        "credentials are missing '{canonical}' (present keys: {present:?})"
    )))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Replace `${NAME}` references with the named environment variable.
/// Unset variables expand to the empty string.
fn expand_env_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let name = &after[..end];
            out.push_str(&std::env::var(name).unwrap_or_default());
            rest = &after[end + 1..];
        } else {
            out.push_str(&rest[start..]);
            rest = "";
        }
    }
    out.push_str(rest);
    out
}
