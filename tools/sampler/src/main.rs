/// Training-crop sampler: reads reference scenes, draws quality-constrained
/// random crops and writes each crop as a compressed .npz with a manifest.
///
/// Input scenes:  {input_dir}/*.npz | *.npy | *.tif
/// Output crops:  {output}/{reference}/{stem}_{ext}_{k:04}.npz
/// Manifest:      {output}/{reference}/manifest.json
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use ndarray::ArrayD;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::Serialize;

use rainpatch_core::domain::Domain;
use rainpatch_core::store::{self, StoreFormat};
use rainpatch_core::{
    extract, load_quality, search_crop, Augmentation, CropWindow, ReferenceCatalog,
    ReferenceData, SampleOutcome, SamplerConfig,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sampler",
    about = "Extract quality-constrained random training crops from reference scenes"
)]
struct Args {
    /// Directory containing reference scenes (*.npz, *.npy, *.tif)
    #[arg(long, default_value = "data/reference")]
    input_dir: PathBuf,

    /// Path to the reference catalog JSON
    #[arg(long, default_value = "data/reference.json")]
    catalog: PathBuf,

    /// Reference dataset to sample (must be listed in the catalog)
    #[arg(short, long)]
    reference: String,

    /// Training domain recorded in the manifest
    #[arg(long, default_value = "conus")]
    domain: String,

    /// Output root directory (created if absent)
    #[arg(short, long, default_value = "data/crops")]
    output: PathBuf,

    /// Crop starts are multiples of this value
    #[arg(long, default_value = "4")]
    multiple: usize,

    /// Crop side length in pixels (square)
    #[arg(long, default_value = "256")]
    window_size: usize,

    /// Minimum quality index for a pixel to count as valid
    #[arg(long, default_value = "0.8")]
    qi_thresh: f32,

    /// Fraction of valid pixels a crop must exceed
    #[arg(long, default_value = "0.2")]
    valid_fraction: f64,

    /// Proposals per crop before a scene is given up
    #[arg(long, default_value = "1000")]
    max_attempts: usize,

    /// Crops drawn from each scene
    #[arg(long, default_value = "1")]
    samples_per_file: usize,

    /// Seed for the per-scene random generators
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Mirror each crop left-right with probability 0.5
    #[arg(long)]
    flip: bool,

    /// Probability of blanking each leading-axis slice (time step, channel) with NaN
    #[arg(long, default_value = "0.0")]
    dropout: f64,
}

impl Args {
    fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            multiple: self.multiple,
            window_size: self.window_size,
            qi_thresh: self.qi_thresh,
            valid_fraction: self.valid_fraction,
            max_attempts: self.max_attempts,
        }
    }

    fn augmentation(&self) -> Augmentation {
        Augmentation { flip: self.flip, dropout: self.dropout }
    }
}

// ── Output manifest ──────────────────────────────────────────────────────────

#[derive(Serialize, Debug, Clone, PartialEq)]
struct CropRecord {
    file: String,
    scene: String,
    window: CropWindow,
    attempts: usize,
    flipped: bool,
}

#[derive(Serialize, Debug)]
struct FailedScene {
    scene: String,
    error: String,
}

#[derive(Serialize)]
struct Manifest {
    reference: String,
    reference_scale: usize,
    domain: Domain,
    sampler: SamplerConfig,
    augmentation: Augmentation,
    seed: u64,
    samples_per_file: usize,
    crops: Vec<CropRecord>,
    exhausted: Vec<String>,
    failed: Vec<FailedScene>,
}

/// What happened to one scene.
#[derive(Debug)]
struct SceneReport {
    crops: Vec<CropRecord>,
    exhausted: bool,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Seed of the generator for scene `index`, independent of processing order.
fn scene_seed(seed: u64, index: usize) -> u64 {
    seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Array stores in `dir`, sorted by path so scene indices are stable.
fn list_scenes(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut scenes = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && StoreFormat::from_path(&path).is_ok() {
            scenes.push(path);
        }
    }
    scenes.sort();
    Ok(scenes)
}

/// Crop-file prefix of a scene: the file stem joined with the extension, so
/// `scene.npz` and `scene.npy` never write to the same crops.
fn scene_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}

// ── Scene processing ─────────────────────────────────────────────────────────

/// Draw up to `samples` crops from one scene and write them to `out_dir`.
/// Sampling stops early if the scene is exhausted.
fn process_scene(
    path: &Path,
    reference: &ReferenceData,
    config: &SamplerConfig,
    augmentation: &Augmentation,
    samples: usize,
    seed: u64,
    out_dir: &Path,
) -> Result<SceneReport> {
    let quality = load_quality(path, &reference.quality_index)
        .with_context(|| format!("Cannot load '{}' from {}", reference.quality_index, path.display()))?;
    let base_shape = quality.shape();

    let available = store::variable_names(path)?;
    let name = scene_name(path);
    if !StoreFormat::from_path(path)?.is_named() && !reference.targets.is_empty() {
        warn!(
            "  {} holds a single unnamed array, skipping {} target(s) of '{}'",
            name,
            reference.targets.len(),
            reference.name
        );
    }
    let mut targets: Vec<(String, ArrayD<f32>)> = Vec::new();
    for target in &reference.targets {
        if !available.contains(&target.name) {
            continue;
        }
        let mut values = store::load_variable(path, &target.name)
            .with_context(|| format!("Cannot load target '{}' from {}", target.name, path.display()))?;
        target.apply_lower_limit(&mut values);
        targets.push((target.name.clone(), values));
    }

    let quality_dyn = quality.view().into_dyn();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = SceneReport { crops: Vec::new(), exhausted: false };

    for k in 0..samples {
        let (window, attempts) = match search_crop(&quality, config, &mut rng)? {
            SampleOutcome::Accepted { window, attempts } => (window, attempts),
            SampleOutcome::Exhausted { attempts } => {
                warn!("  {} exhausted after {} attempts, skipping", name, attempts);
                report.exhausted = true;
                break;
            }
        };

        let mut crops = Vec::with_capacity(targets.len() + 1);
        crops.push(extract(&quality_dyn, base_shape, &window)?);
        for (target, values) in &targets {
            let crop = extract(&values.view(), base_shape, &window)
                .with_context(|| format!("Cannot crop target '{}' of {}", target, name))?;
            crops.push(crop);
        }
        let flipped = augmentation.apply(&mut crops, &mut rng)?;

        let names = std::iter::once(&reference.quality_index).chain(targets.iter().map(|(n, _)| n));
        let arrays: Vec<(String, ArrayD<f32>)> = names.cloned().zip(crops).collect();

        let file = format!("{}_{:04}.npz", name, k);
        let out_path = out_dir.join(&file);
        store::write_npz(&out_path, &arrays)
            .with_context(|| format!("Write failed: {}", out_path.display()))?;

        report.crops.push(CropRecord { file, scene: name.clone(), window, attempts, flipped });
    }

    Ok(report)
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let catalog = ReferenceCatalog::from_json_file(&args.catalog)
        .with_context(|| format!("Cannot read catalog {}", args.catalog.display()))?;
    info!("[sampler] catalog lists {} reference dataset(s)", catalog.len());
    let reference = catalog.get(&args.reference)?.clone();
    let domain = Domain::by_name(&args.domain)?;
    if !domain.has_scale(reference.scale) {
        warn!(
            "reference '{}' has scale {} which domain '{}' does not provide ({:?})",
            reference.name, reference.scale, domain.name, domain.scales
        );
    }

    let config = args.sampler_config();
    config.validate()?;
    let augmentation = args.augmentation();
    augmentation.validate()?;

    let out_dir = args.output.join(&reference.name);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("Cannot create {}", out_dir.display()))?;

    let scenes = list_scenes(&args.input_dir)?;
    info!(
        "[sampler] {} scenes of '{}' in {}",
        scenes.len(),
        reference.name,
        args.input_dir.display()
    );

    let results: Vec<(String, Result<SceneReport>)> = scenes
        .par_iter()
        .enumerate()
        .map(|(i, path)| {
            let report = process_scene(
                path,
                &reference,
                &config,
                &augmentation,
                args.samples_per_file,
                scene_seed(args.seed, i),
                &out_dir,
            );
            (scene_name(path), report)
        })
        .collect();

    let mut crops = Vec::new();
    let mut exhausted = Vec::new();
    let mut failed = Vec::new();
    for (scene, result) in results {
        match result {
            Ok(report) => {
                info!("  {} → {} crops", scene, report.crops.len());
                if report.exhausted {
                    exhausted.push(scene);
                }
                crops.extend(report.crops);
            }
            Err(e) => {
                error!("  {} failed: {:#}", scene, e);
                failed.push(FailedScene { scene, error: format!("{:#}", e) });
            }
        }
    }

    let manifest = Manifest {
        reference: reference.name.clone(),
        reference_scale: reference.scale,
        domain,
        sampler: config,
        augmentation,
        seed: args.seed,
        samples_per_file: args.samples_per_file,
        crops,
        exhausted,
        failed,
    };
    let manifest_path = out_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
        .with_context(|| format!("Write failed: {}", manifest_path.display()))?;

    info!(
        "[sampler] Done: {} crops, {} exhausted, {} failed",
        manifest.crops.len(),
        manifest.exhausted.len(),
        manifest.failed.len()
    );
    Ok(())
}
