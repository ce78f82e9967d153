//! Classification reference data
//!
//! Versioned lookup tables used by the transformer: code labels, the registry
//! allow-list and category keywords. Loaded once at startup, either from
//! `IMPORT_REFERENCE_PATH` or from the copy bundled into the binary.

use roster_common::{Result, RosterError};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

const BUNDLED: &str = include_str!("../../../../reference/taxonomy.json");

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryKeyword {
    pub keyword: String,
    pub category: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceData {
    pub version: String,
    /// Classification code -> human label
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Codes that admit a registry record
    #[serde(default)]
    pub registry_allow_list: HashSet<String>,
    /// Checked in order; the first keyword found in a name wins
    #[serde(default)]
    pub category_keywords: Vec<CategoryKeyword>,
}

impl ReferenceData {
    /// Load from `path`, or the bundled copy when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let data = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    RosterError::ReferenceData(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_json(&text)?
            },
            None => Self::bundled()?,
        };

        info!(
            version = %data.version,
            labels = data.labels.len(),
            allowed_codes = data.registry_allow_list.len(),
            "Loaded classification reference data"
        );
        Ok(data)
    }

    pub fn bundled() -> Result<Self> {
        Self::from_json(BUNDLED)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let mut data: Self = serde_json::from_str(text)
            .map_err(|e| RosterError::ReferenceData(format!("invalid reference data: {}", e)))?;

        for entry in &mut data.category_keywords {
            entry.keyword = entry.keyword.to_lowercase();
        }
        Ok(data)
    }

    pub fn label(&self, code: &str) -> Option<&str> {
        self.labels.get(code).map(String::as_str)
    }

    pub fn is_allowed(&self, code: &str) -> bool {
        self.registry_allow_list.contains(code)
    }

    /// Category strongly implied by a name, if any
    pub fn infer_category(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.category_keywords
            .iter()
            .find(|k| name.contains(&k.keyword))
            .map(|k| k.category.as_str())
    }
}
