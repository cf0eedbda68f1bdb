//! Quality-constrained random crop search.
//!
//! Windows are proposed with starts drawn uniformly on a grid of `multiple`
//! cells and accepted once the fraction of cells whose quality index exceeds
//! `qi_thresh` is strictly greater than `valid_fraction`. The search gives up
//! after `max_attempts` proposals.

use log::{debug, trace, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};
use crate::quality::QualityArray;
use crate::window::CropWindow;

/// Immutable crop-search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Crop starts are multiples of this value.
    pub multiple: usize,
    /// Side length of the square crop in cells.
    pub window_size: usize,
    /// A cell is valid when its quality index is strictly above this.
    pub qi_thresh: f32,
    /// Minimum fraction of valid cells (exclusive) for a crop to be accepted.
    pub valid_fraction: f64,
    /// Proposals drawn before the search reports exhaustion.
    pub max_attempts: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            multiple: 4,
            window_size: 256,
            qi_thresh: 0.8,
            valid_fraction: 0.2,
            max_attempts: 1000,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> SceneResult<()> {
        if self.multiple == 0 {
            return Err(SceneError::configuration("multiple must be positive"));
        }
        if self.window_size == 0 {
            return Err(SceneError::configuration("window_size must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(SceneError::configuration("max_attempts must be positive"));
        }
        if !(0.0..=1.0).contains(&self.qi_thresh) {
            return Err(SceneError::configuration(format!(
                "qi_thresh must lie in [0, 1], got {}",
                self.qi_thresh
            )));
        }
        if !(0.0..=1.0).contains(&self.valid_fraction) {
            return Err(SceneError::configuration(format!(
                "valid_fraction must lie in [0, 1], got {}",
                self.valid_fraction
            )));
        }
        Ok(())
    }

    /// Number of aligned start positions along an axis of length `n`:
    /// `(n - window_size) / multiple`. Zero means no crop can be drawn.
    fn start_units(&self, n: usize, axis: &str) -> SceneResult<usize> {
        if n < self.window_size {
            return Err(SceneError::configuration(format!(
                "window_size {} exceeds {axis} count {n}",
                self.window_size
            )));
        }
        let units = (n - self.window_size) / self.multiple;
        if units == 0 {
            return Err(SceneError::configuration(format!(
                "{axis} count {n} leaves no aligned start for window_size {} with multiple {}",
                self.window_size, self.multiple
            )));
        }
        Ok(units)
    }
}

/// Result of a bounded crop search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// A window passed the quality constraint on proposal number `attempts`.
    Accepted { window: CropWindow, attempts: usize },
    /// `attempts` proposals were drawn and none passed.
    Exhausted { attempts: usize },
}

impl SampleOutcome {
    pub fn window(&self) -> Option<CropWindow> {
        match self {
            Self::Accepted { window, .. } => Some(*window),
            Self::Exhausted { .. } => None,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            Self::Accepted { attempts, .. } | Self::Exhausted { attempts } => *attempts,
        }
    }

    pub fn into_result(self) -> SceneResult<CropWindow> {
        match self {
            Self::Accepted { window, .. } => Ok(window),
            Self::Exhausted { attempts } => Err(SceneError::SamplingExhausted { attempts }),
        }
    }
}

/// Propose one aligned window of `config.window_size` cells.
fn propose<R: Rng + ?Sized>(
    row_units: usize,
    col_units: usize,
    config: &SamplerConfig,
    rng: &mut R,
) -> CropWindow {
    let i_start = rng.gen_range(0..row_units) * config.multiple;
    let j_start = rng.gen_range(0..col_units) * config.multiple;
    CropWindow::square(i_start, j_start, config.window_size)
}

fn accepts(quality: &QualityArray, window: &CropWindow, config: &SamplerConfig) -> bool {
    quality.valid_fraction(window, config.qi_thresh) > config.valid_fraction
}

/// Search for a window satisfying the quality constraint.
///
/// Configuration errors (including arrays too small for the window) are
/// returned as `Err`; running out of attempts is `Ok(SampleOutcome::Exhausted)`.
pub fn search_crop<R: Rng + ?Sized>(
    quality: &QualityArray,
    config: &SamplerConfig,
    rng: &mut R,
) -> SceneResult<SampleOutcome> {
    config.validate()?;
    let (n_rows, n_cols) = quality.shape();
    let row_units = config.start_units(n_rows, "row")?;
    let col_units = config.start_units(n_cols, "column")?;

    for attempt in 1..=config.max_attempts {
        let window = propose(row_units, col_units, config, rng);
        if accepts(quality, &window, config) {
            debug!("accepted crop {:?} after {} attempt(s)", window.bounds(), attempt);
            return Ok(SampleOutcome::Accepted { window, attempts: attempt });
        }
        trace!("rejected crop {:?}", window.bounds());
    }

    warn!(
        "no crop above {:.0}% valid (qi > {}) in {}×{} array after {} attempts",
        config.valid_fraction * 100.0,
        config.qi_thresh,
        n_rows,
        n_cols,
        config.max_attempts
    );
    Ok(SampleOutcome::Exhausted { attempts: config.max_attempts })
}

/// Like [`search_crop`], but exhaustion is reported as
/// [`SceneError::SamplingExhausted`].
pub fn sample_crop<R: Rng + ?Sized>(
    quality: &QualityArray,
    config: &SamplerConfig,
    rng: &mut R,
) -> SceneResult<CropWindow> {
    search_crop(quality, config, rng)?.into_result()
}

/// Draw `n` independent crops from the same array.
pub fn sample_crops<R: Rng + ?Sized>(
    quality: &QualityArray,
    config: &SamplerConfig,
    rng: &mut R,
    n: usize,
) -> SceneResult<Vec<CropWindow>> {
    (0..n).map(|_| sample_crop(quality, config, rng)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn check_invariants(w: &CropWindow, qa: &QualityArray, cfg: &SamplerConfig) {
        let (rows, cols) = qa.shape();
        assert_eq!(w.height(), cfg.window_size);
        assert_eq!(w.width(), cfg.window_size);
        assert_eq!(w.i_start % cfg.multiple, 0);
        assert_eq!(w.j_start % cfg.multiple, 0);
        assert!(w.i_end <= rows && w.j_end <= cols);
        assert!(qa.valid_fraction(w, cfg.qi_thresh) > cfg.valid_fraction);
    }

    #[test]
    fn all_valid_array_accepts_first_proposal() {
        let qa = QualityArray::filled(512, 512, 1.0);
        let cfg = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let outcome = search_crop(&qa, &cfg, &mut rng).unwrap();
            assert_eq!(outcome.attempts(), 1);
            check_invariants(&outcome.window().unwrap(), &qa, &cfg);
        }
    }

    #[test]
    fn all_invalid_array_is_exhausted() {
        let qa = QualityArray::filled(512, 512, 0.0);
        let cfg = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = search_crop(&qa, &cfg, &mut rng).unwrap();
        assert_eq!(outcome, SampleOutcome::Exhausted { attempts: 1000 });

        let err = sample_crop(&qa, &SamplerConfig { max_attempts: 25, ..cfg }, &mut rng);
        assert!(matches!(err, Err(SceneError::SamplingExhausted { attempts: 25 })));
    }

    #[test]
    fn single_start_unit_yields_origin() {
        let qa = QualityArray::filled(260, 260, 1.0);
        let cfg = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let w = sample_crop(&qa, &cfg, &mut rng).unwrap();
        assert_eq!(w.bounds(), (0, 256, 0, 256));
    }

    #[test]
    fn converges_on_single_valid_block() {
        let mut qa = QualityArray::filled(512, 512, 0.0);
        let block = CropWindow::square(100, 100, 256);
        qa.fill_window(&block, 1.0);
        let cfg = SamplerConfig::default();
        let mut rng = StdRng::seed_from_u64(2024);

        let outcome = search_crop(&qa, &cfg, &mut rng).unwrap();
        let w = outcome.window().expect("block should be found");
        assert!(outcome.attempts() <= 10, "took {} attempts", outcome.attempts());
        assert!(w.overlap(&block) > 0);
        check_invariants(&w, &qa, &cfg);
    }

    #[test]
    fn seeded_runs_are_identical() {
        let mut qa = QualityArray::filled(300, 420, 0.0);
        qa.fill_window(&CropWindow::new(0, 300, 200, 420), 0.95);
        let cfg = SamplerConfig { window_size: 64, multiple: 8, ..Default::default() };

        let a = sample_crops(&qa, &cfg, &mut StdRng::seed_from_u64(99), 16).unwrap();
        let b = sample_crops(&qa, &cfg, &mut StdRng::seed_from_u64(99), 16).unwrap();
        assert_eq!(a, b);
        for w in &a {
            check_invariants(w, &qa, &cfg);
        }
    }

    #[test]
    fn acceptance_is_strictly_greater() {
        // Exactly 25% valid cells: accepted at 0.2, never at 0.25.
        let mut qa = QualityArray::filled(40, 40, 0.0);
        for i in (0..40).step_by(2) {
            for j in (0..40).step_by(2) {
                qa.fill_window(&CropWindow::square(i, j, 1), 1.0);
            }
        }
        let mut rng = StdRng::seed_from_u64(3);
        let lenient = SamplerConfig { window_size: 16, multiple: 4, ..Default::default() };
        assert!(sample_crop(&qa, &lenient, &mut rng).is_ok());

        let strict = SamplerConfig { valid_fraction: 0.25, max_attempts: 50, ..lenient };
        assert!(matches!(
            sample_crop(&qa, &strict, &mut rng),
            Err(SceneError::SamplingExhausted { .. })
        ));
    }

    #[test]
    fn window_larger_than_array_is_configuration_error() {
        let qa = QualityArray::filled(128, 512, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = search_crop(&qa, &SamplerConfig::default(), &mut rng);
        assert!(matches!(err, Err(SceneError::Configuration(_))));
    }

    #[test]
    fn degenerate_range_is_configuration_error() {
        // 258 - 256 = 2 < multiple: no aligned start can be drawn.
        let qa = QualityArray::filled(258, 512, 1.0);
        let mut rng = StdRng::seed_from_u64(0);
        let err = search_crop(&qa, &SamplerConfig::default(), &mut rng);
        assert!(matches!(err, Err(SceneError::Configuration(_))));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let bad = [
            SamplerConfig { multiple: 0, ..Default::default() },
            SamplerConfig { window_size: 0, ..Default::default() },
            SamplerConfig { max_attempts: 0, ..Default::default() },
            SamplerConfig { qi_thresh: 1.5, ..Default::default() },
            SamplerConfig { valid_fraction: f64::NAN, ..Default::default() },
        ];
        for cfg in &bad {
            assert!(matches!(cfg.validate(), Err(SceneError::Configuration(_))), "{cfg:?}");
        }
        assert!(SamplerConfig::default().validate().is_ok());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: SamplerConfig = serde_json::from_str(r#"{"window_size": 128}"#).unwrap();
        assert_eq!(cfg.window_size, 128);
        assert_eq!(cfg.multiple, 4);
        assert_eq!(cfg.max_attempts, 1000);
    }
}
