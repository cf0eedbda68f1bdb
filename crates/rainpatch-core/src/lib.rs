//! Training-scene assembly for satellite precipitation retrievals: quality
//! arrays, quality-constrained random crops, crop extraction and tiling.

pub mod domain;
pub mod error;
pub mod goes;
pub mod quality;
pub mod reference;
pub mod sampler;
pub mod store;
pub mod tiling;
pub mod window;

pub use error::{SceneError, SceneResult};
pub use quality::{load_quality, QualityArray};
pub use reference::{ReferenceCatalog, ReferenceData, RetrievalTarget};
pub use sampler::{sample_crop, sample_crops, search_crop, SampleOutcome, SamplerConfig};
pub use tiling::Tiler;
pub use window::{extract, Augmentation, CropWindow};
