//! In-place YAML value updates that keep comments and layout.

mod document;
mod scalar;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

pub use document::YamlDocument;

use crate::catalog::YamlSet;

/// Placeholder replaced by the image tag in `yaml_set` values.
pub const IMAGE_TAG_PLACEHOLDER: &str = "${IMAGE_TAG}";

#[derive(Error, Debug)]
pub enum YamlPatchError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid path '{0}': segments must be non-empty")]
    InvalidPath(String),

    #[error("Cannot update '{0}': the mapping layout cannot be edited in place")]
    Unsupported(String),

    #[error("Updated document does not hold the new value at '{0}'")]
    Verification(String),
}

pub type Result<T> = std::result::Result<T, YamlPatchError>;

impl YamlDocument {
    /// Parses `input`, rejecting anything that is not valid YAML.
    pub fn parse(input: &str) -> Result<Self> {
        for document in serde_yaml::Deserializer::from_str(input) {
            Value::deserialize(document)?;
        }
        Ok(Self::from_lines(input))
    }

    /// Sets the string at the `/`-separated `path` of the first document.
    pub fn set_path(&mut self, path: &str, value: &str) -> Result<()> {
        let segments = split_path(path)?;
        self.set(&segments, value)
    }
}

/// Returns `input` with the value at `path` set to `value`.
pub fn set_value(input: &str, path: &str, value: &str) -> Result<String> {
    let mut document = YamlDocument::parse(input)?;
    document.set_path(path, value)?;
    let output = document.to_string();

    verify(&output, path, value)?;
    Ok(output)
}

/// Rewrites `file` in place with the value at `path` set to `value`.
pub fn set_in_file(file: &Path, path: &str, value: &str) -> Result<()> {
    let input = std::fs::read_to_string(file).map_err(|source| YamlPatchError::Read {
        path: file.to_path_buf(),
        source,
    })?;

    let output = set_value(&input, path, value)?;
    if output == input {
        return Ok(());
    }

    std::fs::write(file, output).map_err(|source| YamlPatchError::Write {
        path: file.to_path_buf(),
        source,
    })
}

impl YamlSet {
    /// The value with the image tag substituted.
    pub fn resolved_value(&self, image_tag: &str) -> String {
        self.value.replace(IMAGE_TAG_PLACEHOLDER, image_tag)
    }

    /// Applies this update to `file`.
    pub fn apply_to(&self, file: &Path, image_tag: &str) -> Result<()> {
        set_in_file(file, &self.path, &self.resolved_value(image_tag))
    }
}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(YamlPatchError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

/// Reads the result back and checks the value landed where it should.
fn verify(output: &str, path: &str, expected: &str) -> Result<()> {
    let first = serde_yaml::Deserializer::from_str(output)
        .next()
        .map(Value::deserialize)
        .transpose()?
        .unwrap_or(Value::Null);

    let mut node = untagged(&first);
    for segment in path.split('/') {
        let found = node.as_mapping().and_then(|mapping| {
            mapping
                .iter()
                .find(|(key, _)| key_matches(key, segment))
                .map(|(_, value)| value)
        });
        match found {
            Some(value) => node = untagged(value),
            None => return Err(YamlPatchError::Verification(path.to_string())),
        }
    }

    match node {
        Value::String(actual) if actual == expected => Ok(()),
        _ => Err(YamlPatchError::Verification(path.to_string())),
    }
}

fn untagged(value: &Value) -> &Value {
    match value {
        Value::Tagged(tagged) => untagged(&tagged.value),
        other => other,
    }
}

fn key_matches(key: &Value, segment: &str) -> bool {
    match key {
        Value::String(s) => s == segment,
        Value::Number(n) => n.to_string() == segment,
        Value::Bool(b) => b.to_string() == segment,
        _ => false,
    }
}
