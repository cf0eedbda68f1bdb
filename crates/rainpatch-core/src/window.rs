//! Crop windows, their extraction from co-registered arrays, and random
//! augmentation of the extracted crops.
//!
//! A window is expressed in the index space of the base (quality) grid. Arrays
//! on coarser grids are cropped by dividing the window bounds by the integer
//! resolution ratio, which is why crop starts are aligned to a multiple.

use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, Axis, Slice};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{SceneError, SceneResult};

/// Half-open row/column bounds `[i_start, i_end) × [j_start, j_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropWindow {
    pub i_start: usize,
    pub i_end: usize,
    pub j_start: usize,
    pub j_end: usize,
}

impl CropWindow {
    pub fn new(i_start: usize, i_end: usize, j_start: usize, j_end: usize) -> Self {
        Self { i_start, i_end, j_start, j_end }
    }

    /// Square window of side `size` anchored at `(i_start, j_start)`.
    pub fn square(i_start: usize, j_start: usize, size: usize) -> Self {
        Self::new(i_start, i_start + size, j_start, j_start + size)
    }

    /// Row count; zero for an inverted window.
    #[inline]
    pub fn height(&self) -> usize {
        self.i_end.saturating_sub(self.i_start)
    }

    /// Column count; zero for an inverted window.
    #[inline]
    pub fn width(&self) -> usize {
        self.j_end.saturating_sub(self.j_start)
    }

    pub fn rows(&self) -> Range<usize> {
        self.i_start..self.i_end
    }

    pub fn cols(&self) -> Range<usize> {
        self.j_start..self.j_end
    }

    /// Tuple form `(i_start, i_end, j_start, j_end)`.
    pub fn bounds(&self) -> (usize, usize, usize, usize) {
        (self.i_start, self.i_end, self.j_start, self.j_end)
    }

    /// Whether the window lies inside a grid of `rows × cols`.
    pub fn fits(&self, rows: usize, cols: usize) -> bool {
        self.i_start <= self.i_end && self.j_start <= self.j_end && self.i_end <= rows && self.j_end <= cols
    }

    /// Number of cells shared with `other`.
    pub fn overlap(&self, other: &CropWindow) -> usize {
        let rows = self.i_end.min(other.i_end).saturating_sub(self.i_start.max(other.i_start));
        let cols = self.j_end.min(other.j_end).saturating_sub(self.j_start.max(other.j_start));
        rows * cols
    }

    /// Map the window onto a grid that is `factor` times coarser.
    /// Every bound must be divisible by `factor`.
    pub fn scaled(&self, factor: usize) -> SceneResult<CropWindow> {
        if factor == 0 {
            return Err(SceneError::configuration("scale factor must be positive"));
        }
        let (i0, i1, j0, j1) = self.bounds();
        if [i0, i1, j0, j1].iter().any(|b| b % factor != 0) {
            return Err(SceneError::invalid_input(format!(
                "window {:?} is not aligned to scale factor {factor}",
                self.bounds()
            )));
        }
        Ok(CropWindow::new(i0 / factor, i1 / factor, j0 / factor, j1 / factor))
    }
}

/// Integer ratio between the base grid and the spatial shape of an array.
/// The ratio must be identical for rows and columns and divide both exactly.
pub fn resolution_factor(base_shape: (usize, usize), shape: (usize, usize)) -> SceneResult<usize> {
    let (base_rows, base_cols) = base_shape;
    let (rows, cols) = shape;
    if rows == 0 || cols == 0 || base_rows % rows != 0 || base_cols % cols != 0 {
        return Err(SceneError::invalid_input(format!(
            "spatial shape {shape:?} is incompatible with base shape {base_shape:?}"
        )));
    }
    let row_factor = base_rows / rows;
    let col_factor = base_cols / cols;
    if row_factor != col_factor {
        return Err(SceneError::invalid_input(format!(
            "spatial shape {shape:?} has unequal scales ({row_factor}, {col_factor}) relative to {base_shape:?}"
        )));
    }
    Ok(row_factor)
}

/// Spatial `(rows, cols)` of an array: its last two axes.
pub fn spatial_shape(array: &ArrayViewD<'_, f32>) -> SceneResult<(usize, usize)> {
    let shape = array.shape();
    if shape.len() < 2 {
        return Err(SceneError::invalid_input(format!(
            "array with shape {shape:?} has no spatial axes"
        )));
    }
    Ok((shape[shape.len() - 2], shape[shape.len() - 1]))
}

/// Crop `array` to `window`, where `window` is expressed on a base grid of
/// `base_shape`. Leading (non-spatial) axes are kept whole.
pub fn extract(
    array: &ArrayViewD<'_, f32>,
    base_shape: (usize, usize),
    window: &CropWindow,
) -> SceneResult<ArrayD<f32>> {
    let (rows, cols) = spatial_shape(array)?;
    let factor = resolution_factor(base_shape, (rows, cols))?;
    let local = window.scaled(factor)?;
    if !local.fits(rows, cols) {
        return Err(SceneError::invalid_input(format!(
            "window {:?} exceeds array of spatial shape ({rows}, {cols})",
            local.bounds()
        )));
    }

    let row_axis = array.ndim() - 2;
    let col_axis = array.ndim() - 1;
    let view = array.slice_each_axis(|ax| {
        let index = ax.axis.index();
        if index == row_axis {
            Slice::from(local.rows())
        } else if index == col_axis {
            Slice::from(local.cols())
        } else {
            Slice::from(..)
        }
    });
    Ok(view.to_owned())
}

/// Mirror `array` left-right along its last axis.
pub fn flip_columns(array: &mut ArrayD<f32>) -> SceneResult<()> {
    spatial_shape(&array.view())?;
    let col_axis = Axis(array.ndim() - 1);
    let mut flipped = array.view();
    flipped.invert_axis(col_axis);
    let flipped = flipped.as_standard_layout().into_owned();
    *array = flipped;
    Ok(())
}

/// Set every slice of `array` along the leading `axis` to NaN, each one
/// independently with `probability`. Returns the number of slices blanked.
pub fn drop_out<R: Rng + ?Sized>(
    array: &mut ArrayD<f32>,
    axis: Axis,
    probability: f64,
    rng: &mut R,
) -> SceneResult<usize> {
    if axis.index() + 2 >= array.ndim() {
        return Err(SceneError::invalid_input(format!(
            "axis {} is not a leading axis of an array with shape {:?}",
            axis.index(),
            array.shape()
        )));
    }
    if !(0.0..=1.0).contains(&probability) {
        return Err(SceneError::configuration(format!(
            "dropout probability must lie in [0, 1], got {probability}"
        )));
    }
    let mut dropped = 0;
    for mut slice in array.axis_iter_mut(axis) {
        if rng.gen_bool(probability) {
            slice.fill(f32::NAN);
            dropped += 1;
        }
    }
    Ok(dropped)
}

/// Random augmentation of a set of co-registered crops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    /// Mirror the crops left-right with probability 0.5.
    pub flip: bool,
    /// Probability of blanking each slice of every leading axis with NaN.
    pub dropout: f64,
}

impl Augmentation {
    pub fn validate(&self) -> SceneResult<()> {
        if !(0.0..=1.0).contains(&self.dropout) {
            return Err(SceneError::configuration(format!(
                "dropout must lie in [0, 1], got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Augment `crops` in place and return whether they were flipped.
    ///
    /// A single flip draw covers every crop so they stay co-registered;
    /// dropout is drawn per crop. Nothing is drawn from `rng` for disabled
    /// augmentations.
    pub fn apply<R: Rng + ?Sized>(&self, crops: &mut [ArrayD<f32>], rng: &mut R) -> SceneResult<bool> {
        self.validate()?;
        let flipped = self.flip && rng.gen_bool(0.5);
        for crop in crops.iter_mut() {
            if flipped {
                flip_columns(crop)?;
            }
            if self.dropout > 0.0 {
                for axis in 0..crop.ndim().saturating_sub(2) {
                    drop_out(crop, Axis(axis), self.dropout, rng)?;
                }
            }
        }
        Ok(flipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn square_window_has_requested_size() {
        let w = CropWindow::square(8, 12, 16);
        assert_eq!(w.bounds(), (8, 24, 12, 28));
        assert_eq!(w.height(), 16);
        assert_eq!(w.width(), 16);
    }

    #[test]
    fn scaled_divides_bounds() {
        let w = CropWindow::new(8, 24, 4, 20);
        assert_eq!(w.scaled(4).unwrap(), CropWindow::new(2, 6, 1, 5));
    }

    #[test]
    fn scaled_rejects_misaligned_window() {
        let w = CropWindow::new(2, 18, 0, 16);
        assert!(matches!(w.scaled(4), Err(SceneError::InvalidInput(_))));
    }

    #[test]
    fn overlap_counts_shared_cells() {
        let a = CropWindow::square(0, 0, 10);
        let b = CropWindow::square(5, 8, 10);
        assert_eq!(a.overlap(&b), 5 * 2);
        assert_eq!(a.overlap(&CropWindow::square(20, 20, 4)), 0);
    }

    #[test]
    fn extract_keeps_leading_axes() {
        // 3 channels on an 8×8 grid, value = channel * 100 + row * 10 + col.
        let array = Array::from_shape_fn(IxDyn(&[3, 8, 8]), |ix| {
            (ix[0] * 100 + ix[1] * 10 + ix[2]) as f32
        });
        let w = CropWindow::new(2, 6, 4, 8);
        let crop = extract(&array.view(), (8, 8), &w).unwrap();
        assert_eq!(crop.shape(), &[3, 4, 4]);
        assert_eq!(crop[[0, 0, 0]], 24.0);
        assert_eq!(crop[[2, 3, 3]], 257.0);
    }

    #[test]
    fn extract_scales_coarser_arrays() {
        // 4×4 array on a grid twice as coarse as the 8×8 base.
        let array = Array::from_shape_fn(IxDyn(&[4, 4]), |ix| (ix[0] * 4 + ix[1]) as f32);
        let w = CropWindow::new(4, 8, 0, 4);
        let crop = extract(&array.view(), (8, 8), &w).unwrap();
        assert_eq!(crop.shape(), &[2, 2]);
        assert_eq!(crop[[0, 0]], 8.0);
        assert_eq!(crop[[1, 1]], 13.0);
    }

    #[test]
    fn extract_rejects_unequal_scales() {
        let array = ArrayD::<f32>::zeros(IxDyn(&[4, 8]));
        let w = CropWindow::square(0, 0, 4);
        assert!(matches!(
            extract(&array.view(), (8, 8), &w),
            Err(SceneError::InvalidInput(_))
        ));
    }

    #[test]
    fn inverted_window_is_empty() {
        let w = CropWindow::new(10, 4, 6, 2);
        assert_eq!((w.height(), w.width()), (0, 0));
        assert!(!w.fits(20, 20));
    }

    #[test]
    fn flip_columns_mirrors_last_axis() {
        let mut array = Array::from_shape_fn(IxDyn(&[2, 3, 4]), |ix| {
            (ix[0] * 100 + ix[1] * 10 + ix[2]) as f32
        });
        flip_columns(&mut array).unwrap();
        assert_eq!(array.shape(), &[2, 3, 4]);
        assert_eq!(array[[0, 0, 0]], 3.0);
        assert_eq!(array[[1, 2, 3]], 120.0);

        let mut line = ArrayD::<f32>::zeros(IxDyn(&[5]));
        assert!(matches!(flip_columns(&mut line), Err(SceneError::InvalidInput(_))));
    }

    #[test]
    fn drop_out_blanks_whole_slices() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut array = ArrayD::<f32>::ones(IxDyn(&[4, 3, 2, 2]));
        assert_eq!(drop_out(&mut array, Axis(0), 0.0, &mut rng).unwrap(), 0);
        assert!(array.iter().all(|v| *v == 1.0));

        assert_eq!(drop_out(&mut array, Axis(1), 1.0, &mut rng).unwrap(), 3);
        assert!(array.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn drop_out_rejects_spatial_axes_and_bad_probability() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut array = ArrayD::<f32>::ones(IxDyn(&[3, 4, 4]));
        assert!(matches!(
            drop_out(&mut array, Axis(1), 0.5, &mut rng),
            Err(SceneError::InvalidInput(_))
        ));
        assert!(matches!(
            drop_out(&mut array, Axis(0), 1.5, &mut rng),
            Err(SceneError::Configuration(_))
        ));
    }

    #[test]
    fn augmentation_flips_all_crops_together() {
        let fine = Array::from_shape_fn(IxDyn(&[4, 4]), |ix| ix[1] as f32);
        let coarse = Array::from_shape_fn(IxDyn(&[2, 2]), |ix| ix[1] as f32);
        let aug = Augmentation { flip: true, dropout: 0.0 };
        let mut rng = StdRng::seed_from_u64(9);

        let mut seen = [false, false];
        for _ in 0..32 {
            let mut crops = vec![fine.clone(), coarse.clone()];
            let flipped = aug.apply(&mut crops, &mut rng).unwrap();
            seen[flipped as usize] = true;
            let expected = if flipped { (3.0, 1.0) } else { (0.0, 0.0) };
            assert_eq!((crops[0][[0, 0]], crops[1][[0, 0]]), expected);
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn disabled_augmentation_leaves_crops_and_rng_untouched() {
        let crop = Array::from_shape_fn(IxDyn(&[2, 4, 4]), |ix| ix[2] as f32);
        let mut crops = vec![crop.clone()];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!Augmentation::default().apply(&mut crops, &mut rng).unwrap());
        assert_eq!(crops[0], crop);
        assert_eq!(rng.gen::<u64>(), StdRng::seed_from_u64(1).gen::<u64>());

        let bad = Augmentation { flip: false, dropout: -0.1 };
        assert!(matches!(bad.validate(), Err(SceneError::Configuration(_))));
    }
}
