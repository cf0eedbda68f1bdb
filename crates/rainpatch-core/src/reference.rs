//! Reference (target) datasets and the catalog that names them.
//!
//! The catalog is an explicit value handed to whoever needs it; datasets are
//! never registered globally.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

/// A retrieval target provided by a reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalTarget {
    pub name: String,
    /// Finite values below this limit are treated as zero.
    #[serde(default)]
    pub lower_limit: Option<f32>,
}

impl RetrievalTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), lower_limit: None }
    }

    pub fn with_lower_limit(mut self, limit: f32) -> Self {
        self.lower_limit = Some(limit);
        self
    }

    /// Zero every finite value below the lower limit. NaN is left untouched.
    pub fn apply_lower_limit(&self, array: &mut ArrayD<f32>) {
        if let Some(limit) = self.lower_limit {
            array.mapv_inplace(|v| if v.is_finite() && v < limit { 0.0 } else { v });
        }
    }
}

/// Properties of a reference dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub name: String,
    /// Resolution of the reference grid relative to the finest input grid.
    pub scale: usize,
    pub targets: Vec<RetrievalTarget>,
    /// Name of the variable holding the per-pixel quality index.
    pub quality_index: String,
}

/// Reference datasets by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceCatalog {
    datasets: BTreeMap<String, ReferenceData>,
}

#[derive(Deserialize)]
struct CatalogFile {
    references: Vec<ReferenceData>,
}

impl ReferenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `data`, replacing any dataset of the same name.
    pub fn insert(&mut self, data: ReferenceData) -> Option<ReferenceData> {
        self.datasets.insert(data.name.clone(), data)
    }

    pub fn get(&self, name: &str) -> SceneResult<&ReferenceData> {
        self.datasets
            .get(name)
            .ok_or_else(|| SceneError::UnknownReference {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Dataset names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.datasets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Parse a catalog of the form `{"references": [ ... ]}`. The list must
    /// not be empty and every scale must be positive.
    pub fn from_json_str(text: &str) -> SceneResult<Self> {
        let file: CatalogFile = serde_json::from_str(text)?;
        let catalog = file
            .references
            .into_iter()
            .map(|data| {
                if data.scale == 0 {
                    Err(SceneError::configuration(format!(
                        "reference data '{}' has scale 0",
                        data.name
                    )))
                } else {
                    Ok(data)
                }
            })
            .collect::<SceneResult<Self>>()?;
        if catalog.is_empty() {
            return Err(SceneError::configuration("reference catalog lists no datasets"));
        }
        Ok(catalog)
    }

    pub fn from_json_file(path: &Path) -> SceneResult<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}

impl FromIterator<ReferenceData> for ReferenceCatalog {
    fn from_iter<I: IntoIterator<Item = ReferenceData>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for data in iter {
            catalog.insert(data);
        }
        catalog
    }
}
