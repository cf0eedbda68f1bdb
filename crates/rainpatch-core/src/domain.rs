//! Training domains: a named region of interest and the grid scales on which
//! training data is produced for it.
//! Coordinates are geographic degrees in f64; projection math lives elsewhere.

use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

/// Longitude/latitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub lon_min: f64,
    pub lat_min: f64,
    pub lon_max: f64,
    pub lat_max: f64,
}

impl RegionOfInterest {
    pub fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self { lon_min, lat_min, lon_max, lat_max }
    }

    /// Whether (lon, lat) lies inside the box, edges included.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.lon_min && lon <= self.lon_max && lat >= self.lat_min && lat <= self.lat_max
    }

    /// Whether the two boxes share any area.
    pub fn overlaps(&self, other: &RegionOfInterest) -> bool {
        self.lon_min < other.lon_max
            && self.lon_max > other.lon_min
            && self.lat_min < other.lat_max
            && self.lat_max > other.lat_min
    }
}

/// A named training domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub name: String,
    pub roi: RegionOfInterest,
    /// Available grid scales, finest first.
    pub scales: Vec<usize>,
}

impl Domain {
    /// Northern Europe.
    pub fn nordics() -> Self {
        Self {
            name: "nordics".to_string(),
            roi: RegionOfInterest::new(
                -9.05380216185029,
                51.77251844681491,
                45.24074941367874,
                73.3321989854415,
            ),
            scales: vec![1, 2, 4, 8],
        }
    }

    /// Contiguous United States.
    pub fn conus() -> Self {
        Self {
            name: "conus".to_string(),
            roi: RegionOfInterest::new(-129.995, 20.005, -60.005, 54.995),
            scales: vec![4, 8, 16],
        }
    }

    /// Look up a built-in domain, case-insensitively.
    pub fn by_name(name: &str) -> SceneResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nordics" => Ok(Self::nordics()),
            "conus" => Ok(Self::conus()),
            _ => Err(SceneError::configuration(format!(
                "unknown domain '{name}', expected one of: nordics, conus"
            ))),
        }
    }

    pub fn has_scale(&self, scale: usize) -> bool {
        self.scales.contains(&scale)
    }
}
