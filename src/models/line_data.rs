use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Extra data attached to a cart or order line (schema version 1).
///
/// Keys are free-form strings except [`LineData::FILE_KEY`], which holds the
/// URL of a file uploaded for the line. Two lines for the same variant are the
/// same line exactly when their canonical forms are equal, so the canonical
/// form is what gets stored and compared.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineData(BTreeMap<String, String>);

impl LineData {
    pub const FILE_KEY: &'static str = "file";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(url: impl Into<String>) -> Self {
        let mut data = Self::new();
        data.insert(Self::FILE_KEY, url);
        data
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn file(&self) -> Option<&str> {
        self.get(Self::FILE_KEY).filter(|url| !url.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted keys, no whitespace. `{}` when empty.
    pub fn canonical(&self) -> String {
        // A map of strings cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn from_canonical(raw: &str) -> Result<Self, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw)
    }
}
