use std::path::Path;

use ndarray::{s, Array2, ArrayView2, Ix2};

use crate::error::{SceneError, SceneResult};
use crate::store;
use crate::window::CropWindow;

/// A 2D grid of per-pixel quality scores, row-major.
/// Cells are "valid" when their score strictly exceeds a threshold; NaN never is.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityArray {
    data: Array2<f32>,
}

impl QualityArray {
    pub fn from_array(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// Build from row-major values. Fails if `data.len() != rows * cols`.
    pub fn from_shape_vec(rows: usize, cols: usize, data: Vec<f32>) -> SceneResult<Self> {
        let len = data.len();
        let data = Array2::from_shape_vec((rows, cols), data).map_err(|_| {
            SceneError::invalid_input(format!(
                "{len} values cannot form a {rows}×{cols} quality array"
            ))
        })?;
        Ok(Self { data })
    }

    /// Create a QualityArray filled with the given value.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Self { data: Array2::from_elem((rows, cols), value) }
    }

    /// `(n_rows, n_cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }

    /// Overwrite every cell of `window` with `value`.
    ///
    /// # Panics
    ///
    /// If `window` does not fit inside the array (see [`CropWindow::fits`]).
    pub fn fill_window(&mut self, window: &CropWindow, value: f32) {
        self.data
            .slice_mut(s![window.rows(), window.cols()])
            .fill(value);
    }

    /// Number of cells in `window` whose score exceeds `qi_thresh`.
    ///
    /// # Panics
    ///
    /// If `window` does not fit inside the array (see [`CropWindow::fits`]).
    pub fn valid_count(&self, window: &CropWindow, qi_thresh: f32) -> usize {
        self.data
            .slice(s![window.rows(), window.cols()])
            .iter()
            .filter(|&&qi| qi > qi_thresh)
            .count()
    }

    /// Fraction of cells in `window` whose score exceeds `qi_thresh`.
    /// An empty window has fraction 0. Panics like [`Self::valid_count`].
    pub fn valid_fraction(&self, window: &CropWindow, qi_thresh: f32) -> f64 {
        let total = window.height() * window.width();
        if total == 0 {
            return 0.0;
        }
        self.valid_count(window, qi_thresh) as f64 / total as f64
    }
}

impl From<Array2<f32>> for QualityArray {
    fn from(data: Array2<f32>) -> Self {
        Self::from_array(data)
    }
}

/// Read the quality-index variable `name` from the store at `path`.
/// The file is closed before this returns, whatever the outcome.
pub fn load_quality(path: &Path, name: &str) -> SceneResult<QualityArray> {
    let array = store::load_variable(path, name)?;
    let shape = array.shape().to_vec();
    let data = array.into_dimensionality::<Ix2>().map_err(|_| {
        SceneError::invalid_input(format!(
            "quality variable '{name}' in {} has shape {shape:?}, expected 2 dimensions",
            path.display()
        ))
    })?;
    Ok(QualityArray::from_array(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_shape_vec_checks_length() {
        assert!(QualityArray::from_shape_vec(2, 3, vec![0.0; 6]).is_ok());
        assert!(matches!(
            QualityArray::from_shape_vec(2, 3, vec![0.0; 5]),
            Err(SceneError::InvalidInput(_))
        ));
    }

    #[test]
    fn valid_fraction_is_strict_and_ignores_nan() {
        let qa = QualityArray::from_shape_vec(2, 2, vec![0.8, 0.9, f32::NAN, 1.0]).unwrap();
        let w = CropWindow::square(0, 0, 2);
        assert_eq!(qa.valid_count(&w, 0.8), 2);
        assert!((qa.valid_fraction(&w, 0.8) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn fill_window_only_touches_window() {
        let mut qa = QualityArray::filled(6, 6, 0.0);
        qa.fill_window(&CropWindow::square(2, 2, 2), 1.0);
        assert_eq!(qa.valid_count(&CropWindow::square(0, 0, 6), 0.5), 4);
        assert_eq!(qa.view()[[2, 3]], 1.0);
        assert_eq!(qa.view()[[4, 4]], 0.0);
    }

    #[test]
    #[should_panic]
    fn valid_count_panics_outside_array() {
        let qa = QualityArray::filled(4, 4, 1.0);
        qa.valid_count(&CropWindow::square(2, 2, 4), 0.5);
    }

    #[test]
    fn load_quality_rejects_non_2d_variables() {
        let path = std::env::temp_dir().join(format!("rainpatch_q3d_{}.npz", std::process::id()));
        let cube = ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 4, 4]));
        store::write_npz(&path, &[("qi".to_string(), cube)]).unwrap();
        let result = load_quality(&path, "qi");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(SceneError::InvalidInput(_))));
    }
}
