use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ArchiveError;

/// Name of the manifest entry inside an archive.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// File name to hex SHA-256 digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    files: BTreeMap<String, String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, digest: impl Into<String>) {
        self.files.insert(name.into(), digest.into());
    }

    /// Recorded digest for `name`, if any.
    pub fn digest(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, ArchiveError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ArchiveError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_a_flat_json_object() {
        let mut manifest = Manifest::new();
        manifest.insert("main.py", "abc");
        let json: serde_json::Value = serde_json::from_slice(&manifest.to_json().unwrap()).unwrap();
        assert_eq!(json, serde_json::json!({"main.py": "abc"}));
    }

    #[test]
    fn parse_rejects_non_object() {
        assert!(Manifest::from_json(b"[1, 2]").is_err());
    }
}
