//! Error types shared by every module of the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Errors raised while loading, sampling or tiling scenes.
#[derive(Error, Debug)]
pub enum SceneError {
    /// Parameters that can never produce a valid crop or tiling.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No proposed window passed the quality constraint within the attempt cap.
    #[error("no crop satisfied the quality constraint after {attempts} attempts")]
    SamplingExhausted { attempts: usize },

    /// The requested variable is not present in the source file.
    #[error("variable '{variable}' not found in {}", path.display())]
    MissingVariable { variable: String, path: PathBuf },

    /// Input data with the wrong shape, type or format.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup of a reference dataset that the catalog does not hold.
    #[error("unknown reference data '{name}', available: {available:?}")]
    UnknownReference { name: String, available: Vec<String> },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("NPY read error: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("NPZ read error: {0}")]
    ReadNpz(#[from] ndarray_npy::ReadNpzError),

    #[error("NPZ write error: {0}")]
    WriteNpz(#[from] ndarray_npy::WriteNpzError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SceneError {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}
