//! Locator catalog
//!
//! UI modules describe their targets as data:
//!
//! ```yaml
//! submit_order:
//!   - css=button[type=submit]
//!   - text=Place order
//! search_box:
//!   - "#search"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::LocatorError;
use crate::types::{validate_candidates, Locator, LocatorSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorCatalog {
    entries: BTreeMap<String, Vec<Locator>>,
}

impl LocatorCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, LocatorError> {
        let catalog: LocatorCatalog =
            serde_yaml::from_str(raw).map_err(|err| LocatorError::Catalog(err.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, LocatorError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| LocatorError::Catalog(format!("{}: {}", path.display(), err)))?;
        Self::from_yaml_str(&raw)
    }

    pub fn insert(&mut self, set: LocatorSet) -> Result<(), LocatorError> {
        set.validate()?;
        self.entries.insert(set.logical_name, set.candidates);
        Ok(())
    }

    pub fn get(&self, logical_name: &str) -> Option<LocatorSet> {
        self.entries
            .get(logical_name)
            .map(|candidates| LocatorSet::new(logical_name, candidates.clone()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn validate(&self) -> Result<(), LocatorError> {
        for (name, candidates) in &self.entries {
            validate_candidates(name, candidates)?;
        }
        Ok(())
    }
}
