//! Flat `key=value` files.
//!
//! Registration files, device configuration files and skin descriptors all
//! use the same line format:
//!
//! ```text
//! # comment
//! hw.lcd.width = 1080
//! avd.name=Pixel_7
//! ```
//!
//! Reading keeps the order in which keys appear so that an update rewrites
//! the file with untouched keys where they were.  Updates go through a
//! sibling temporary file that is renamed over the original, so a reader
//! never observes a half-written file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

/// Errors that can occur while reading or writing key-value files.
#[derive(Debug, Error)]
pub enum KeyValueError {
    /// A file-system operation failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered contents of a key-value file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    entries: Vec<(String, String)>,
}

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses file contents.  Blank lines, `#` comments and lines without
    /// `=` are skipped; a repeated key keeps its first position and its last
    /// value.
    pub fn parse(content: &str) -> Self {
        let mut values = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if !key.is_empty() {
                    values.set(key, value.trim());
                }
            }
        }
        values
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Parses the value of `key`; `None` when missing or unparsable.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Replaces the value of an existing key in place or appends a new one.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Copies every entry of `other` over this one.
    pub fn merge(&mut self, other: &KeyValues) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Renders the entries as file contents, one `key=value` per line.
    pub fn to_file_contents(&self) -> String {
        self.entries.iter().map(|(k, v)| format!("{k}={v}\n")).collect()
    }
}

/// Reads a key-value file.
///
/// # Errors
///
/// Returns [`KeyValueError::Io`] if the file cannot be read.
pub fn read_key_value_file(path: &Path) -> Result<KeyValues, KeyValueError> {
    let content = std::fs::read_to_string(path).map_err(|source| KeyValueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(KeyValues::parse(&content))
}

/// Applies `updates` to the key-value file at `path`.
///
/// A `Some` value sets the key, a `None` value deletes it; keys not
/// mentioned are kept unchanged and in place.  A missing file is treated as
/// empty.
///
/// # Errors
///
/// Returns [`KeyValueError::Io`] if the file cannot be read, written or
/// replaced.
pub fn update_key_value_file(path: &Path, updates: &[(&str, Option<&str>)]) -> Result<(), KeyValueError> {
    let mut values = match std::fs::read_to_string(path) {
        Ok(content) => KeyValues::parse(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => KeyValues::new(),
        Err(source) => {
            return Err(KeyValueError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    for (key, value) in updates {
        match value {
            Some(value) => values.set(key, value),
            None => {
                values.remove(key);
            }
        }
    }

    write_key_value_file(path, &values)
}

/// Writes `values` to `path` atomically.
///
/// # Errors
///
/// Returns [`KeyValueError::Io`] if the temporary file cannot be written or
/// renamed over `path`.
pub fn write_key_value_file(path: &Path, values: &KeyValues) -> Result<(), KeyValueError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, values.to_file_contents()).map_err(|source| KeyValueError::Io {
        path: temp.clone(),
        source,
    })?;
    std::fs::rename(&temp, path).map_err(|source| {
        // Best effort: do not leave the temporary file behind.
        let _ = std::fs::remove_file(&temp);
        KeyValueError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
