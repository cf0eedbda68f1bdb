//! Two-dimensional tiling of retrieval inputs and weighted reassembly of
//! tiled results.
//!
//! Tiles overlap by `overlap` cells. When results are reassembled, neighbouring
//! tiles are blended with linear ramps across the overlap so the weights of
//! all tiles covering a cell sum to one. With `wrap_columns` the last column of
//! tiles runs past the right edge and wraps onto column 0, which handles scenes
//! that span the antimeridian.

use std::ops::Range;

use ndarray::{Array2, Array3, ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use crate::error::{SceneError, SceneResult};
use crate::window::{resolution_factor, spatial_shape, CropWindow};

/// Start offsets of the tiles along one axis of length `n`, and the number of
/// cells to clip between each pair of neighbours.
///
/// With `soft_end` the last tile starts on the regular stride and may extend
/// past `n`; otherwise it is pulled back to end exactly at `n`.
pub fn start_and_clips(
    n: usize,
    tile_size: usize,
    overlap: usize,
    soft_end: bool,
) -> (Vec<usize>, Vec<usize>) {
    let stride = tile_size - overlap;
    let mut starts = Vec::new();
    let mut clips = Vec::new();

    let mut j = 0usize;
    while j + tile_size < n {
        starts.push(j);
        if j > 0 {
            clips.push(overlap / 2);
        }
        j += stride;
    }
    if soft_end {
        starts.push(j);
    } else {
        starts.push(n.saturating_sub(tile_size));
    }
    if starts.len() > 1 {
        let k = starts.len();
        clips.push((starts[k - 2] + tile_size - starts[k - 1]) / 2);
    }
    (starts, clips)
}

/// `l` evenly spaced values from `a` to `b`, both inclusive.
fn linspace(a: f32, b: f32, l: usize) -> Vec<f32> {
    match l {
        0 => Vec::new(),
        1 => vec![a],
        _ => (0..l)
            .map(|k| a + (b - a) * k as f32 / (l - 1) as f32)
            .collect(),
    }
}

/// Write `values` into `w` starting at `offset`, dropping anything past the end.
fn put(w: &mut [f32], offset: usize, values: &[f32]) {
    for (k, &v) in values.iter().enumerate() {
        if let Some(slot) = w.get_mut(offset + k) {
            *slot = v;
        }
    }
}

fn zero_from(w: &mut [f32], offset: usize) {
    for v in w.iter_mut().skip(offset) {
        *v = 0.0;
    }
}

fn zero_until(w: &mut [f32], end: usize) {
    for v in w.iter_mut().take(end) {
        *v = 0.0;
    }
}

/// Symmetric padding that brings an image up to a multiple of some size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

/// Padding required to make `rows` and `cols` multiples of `multiple_of`.
/// Odd amounts put the extra cell on the right/bottom.
pub fn calculate_padding(rows: usize, cols: usize, multiple_of: usize) -> SceneResult<Padding> {
    if multiple_of == 0 {
        return Err(SceneError::configuration("multiple_of must be positive"));
    }
    let d_cols = cols.div_ceil(multiple_of) * multiple_of - cols;
    let d_rows = rows.div_ceil(multiple_of) * multiple_of - rows;
    Ok(Padding {
        left: d_cols / 2,
        right: d_cols - d_cols / 2,
        top: d_rows / 2,
        bottom: d_rows - d_rows / 2,
    })
}

/// Tiling of an `rows × cols` base grid.
#[derive(Debug, Clone)]
pub struct Tiler {
    rows: usize,
    cols: usize,
    tile_size: (usize, usize),
    overlap: usize,
    wrap_columns: bool,
    i_start: Vec<usize>,
    i_clip: Vec<usize>,
    j_start: Vec<usize>,
    j_clip: Vec<usize>,
}

impl Tiler {
    /// `tile_size` is clamped to the grid. The overlap may not exceed half of
    /// the smaller tile side.
    pub fn new(
        rows: usize,
        cols: usize,
        tile_size: (usize, usize),
        overlap: usize,
        wrap_columns: bool,
    ) -> SceneResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(SceneError::configuration(format!(
                "cannot tile an empty {rows}×{cols} grid"
            )));
        }
        if tile_size.0 == 0 || tile_size.1 == 0 {
            return Err(SceneError::configuration("tile size must be positive"));
        }
        let tile_size = (rows.min(tile_size.0), cols.min(tile_size.1));
        let min_len = tile_size.0.min(tile_size.1);
        if overlap > min_len / 2 {
            return Err(SceneError::configuration(format!(
                "overlap {overlap} exceeds half of the tile size {tile_size:?}"
            )));
        }

        let (i_start, i_clip) = start_and_clips(rows, tile_size.0, overlap, false);
        let (j_start, j_clip) = start_and_clips(cols, tile_size.1, overlap, wrap_columns);

        Ok(Self {
            rows,
            cols,
            tile_size,
            overlap,
            wrap_columns,
            i_start,
            i_clip,
            j_start,
            j_clip,
        })
    }

    /// Number of tile rows.
    pub fn n_rows(&self) -> usize {
        self.i_start.len()
    }

    /// Number of tile columns.
    pub fn n_cols(&self) -> usize {
        self.j_start.len()
    }

    pub fn tile_size(&self) -> (usize, usize) {
        self.tile_size
    }

    /// Window of tile `(i, j)` on the base grid. With column wrapping, the
    /// last tile column may end past `cols`.
    pub fn tile(&self, i: usize, j: usize) -> CropWindow {
        CropWindow::new(
            self.i_start[i],
            self.i_start[i] + self.tile_size.0,
            self.j_start[j],
            self.j_start[j] + self.tile_size.1,
        )
    }

    /// Extract tile `(i, j)` from `array`, whose spatial shape may be the base
    /// grid or an integer factor coarser.
    pub fn get_tile(&self, array: &ArrayViewD<'_, f32>, i: usize, j: usize) -> SceneResult<ArrayD<f32>> {
        let (rows, cols) = spatial_shape(array)?;
        let scale = resolution_factor((self.rows, self.cols), (rows, cols))?;
        let w = self.tile(i, j);
        let row_axis = Axis(array.ndim() - 2);
        let col_axis = Axis(array.ndim() - 1);

        let row_view = array.slice_axis(row_axis, Slice::from(w.i_start / scale..w.i_end / scale));
        let col_indices: Vec<usize> = (w.j_start / scale..w.j_end / scale)
            .map(|c| c % cols)
            .collect();
        Ok(row_view.select(col_axis, &col_indices))
    }

    /// Ranges within tile `(i, j)` that, taken over all tiles, partition the
    /// base grid without overlap.
    pub fn clip_ranges(&self, i: usize, j: usize) -> (Range<usize>, Range<usize>) {
        let (th, tw) = self.tile_size;
        let row_lo = if i == 0 { 0 } else { self.i_clip[i - 1] };
        let row_hi = if i + 1 >= self.n_rows() { th } else { th - self.i_clip[i] };
        let col_lo = if j == 0 { 0 } else { self.j_clip[j - 1] };
        let col_hi = if j + 1 >= self.n_cols() { tw } else { tw - self.j_clip[j] };
        (row_lo..row_hi, col_lo..col_hi)
    }

    /// Blending profile along rows for tile row `i`.
    fn row_profile(&self, i: usize) -> Vec<f32> {
        let size = self.tile_size.0;
        let starts = &self.i_start;
        let mut w = vec![1.0f32; size];

        if i > 0 {
            let mut trans_start = starts[i];
            if i > 1 {
                trans_start = trans_start.max(starts[i - 2] + size);
            }
            let zeros = trans_start - starts[i];
            let trans_end = starts[i - 1] + size;
            let l = trans_end.saturating_sub(trans_start).min(self.overlap);
            zero_until(&mut w, zeros);
            put(&mut w, zeros, &linspace(0.0, 1.0, l));
        }
        if i + 1 < starts.len() {
            let mut trans_start = starts[i + 1];
            if i > 0 {
                trans_start = trans_start.max(starts[i - 1] + size);
            }
            let trans_end = starts[i] + size;
            let l = trans_end.saturating_sub(trans_start).min(self.overlap);
            let start = trans_start - starts[i];
            put(&mut w, start, &linspace(1.0, 0.0, l));
            zero_from(&mut w, start + l);
        }
        w
    }

    /// Blending profile along columns for tile column `j`, including the
    /// seam across the right edge when columns wrap.
    fn col_profile(&self, j: usize) -> Vec<f32> {
        let size = self.tile_size.1;
        let starts = &self.j_start;
        let last = starts.len() - 1;
        let mut w = vec![1.0f32; size];

        if j > 0 {
            let mut trans_start = starts[j];
            if j > 1 && !self.wrap_columns {
                trans_start = trans_start.max(starts[j - 2] + size);
            }
            let zeros = trans_start - starts[j];
            let trans_end = starts[j - 1] + size;
            let l = trans_end.saturating_sub(trans_start).min(self.overlap);
            zero_until(&mut w, zeros);
            put(&mut w, zeros, &linspace(0.0, 1.0, l));
        } else if self.wrap_columns {
            let overhang = (starts[last] + size).saturating_sub(self.cols);
            let l = overhang.min(self.overlap);
            put(&mut w, 0, &linspace(0.0, 1.0, l));
        }

        if j < last {
            let mut trans_start = starts[j + 1];
            if j > 0 {
                trans_start = trans_start.max(starts[j - 1] + size);
            }
            let trans_end = starts[j] + size;
            let l = trans_end.saturating_sub(trans_start).min(self.overlap);
            let start = trans_start - starts[j];
            put(&mut w, start, &linspace(1.0, 0.0, l));
            zero_from(&mut w, start + l);
        } else if self.wrap_columns {
            let l = ((starts[last] + size) % self.cols).min(self.overlap);
            let start = self.cols.saturating_sub(starts[last]);
            put(&mut w, start, &linspace(1.0, 0.0, l));
            zero_from(&mut w, start + l);
        }
        w
    }

    /// Blending weights of tile `(i, j)` on the base grid.
    pub fn weights(&self, i: usize, j: usize) -> Array2<f32> {
        let w_i = self.row_profile(i);
        let w_j = self.col_profile(j);
        Array2::from_shape_fn(self.tile_size, |(r, c)| w_i[r] * w_j[c])
    }

    /// Blend per-tile results, `tiles[i][j]`, back onto the full grid.
    ///
    /// Results may be coarser than the tiles by an integer factor; the output
    /// then has the base shape divided by that factor. Leading axes must match
    /// across tiles.
    pub fn assemble(&self, tiles: &[Vec<ArrayD<f32>>]) -> SceneResult<ArrayD<f32>> {
        if tiles.len() != self.n_rows() || tiles.iter().any(|row| row.len() != self.n_cols()) {
            return Err(SceneError::invalid_input(format!(
                "expected {}×{} tile results",
                self.n_rows(),
                self.n_cols()
            )));
        }
        let first = &tiles[0][0];
        let first_view = first.view();
        let scale = resolution_factor(self.tile_size, spatial_shape(&first_view)?)?;
        let lead_shape = first.shape()[..first.ndim() - 2].to_vec();
        let lead: usize = lead_shape.iter().product();

        let (th, tw) = (self.tile_size.0 / scale, self.tile_size.1 / scale);
        let (out_rows, out_cols) = (self.rows / scale, self.cols / scale);
        let mut out = Array3::<f32>::zeros((lead, out_rows, out_cols));

        for (i, row) in tiles.iter().enumerate() {
            for (j, result) in row.iter().enumerate() {
                let shape = result.shape();
                if shape.len() != lead_shape.len() + 2
                    || shape[..lead_shape.len()] != lead_shape[..]
                    || shape[shape.len() - 2..] != [th, tw]
                {
                    return Err(SceneError::invalid_input(format!(
                        "tile ({i}, {j}) result has shape {shape:?}, expected {lead_shape:?} + [{th}, {tw}]"
                    )));
                }
                let result = result
                    .as_standard_layout()
                    .into_owned()
                    .into_shape((lead, th, tw))
                    .map_err(|e| SceneError::invalid_input(e.to_string()))?;

                let w = self.weights(i, j);
                let window = self.tile(i, j);
                let (r0, c0) = (window.i_start / scale, window.j_start / scale);
                for l in 0..lead {
                    for r in 0..th {
                        for c in 0..tw {
                            let weight = w[[r * scale, c * scale]];
                            out[[l, r0 + r, (c0 + c) % out_cols]] += weight * result[[l, r, c]];
                        }
                    }
                }
            }
        }

        let mut full_shape = lead_shape;
        full_shape.extend([out_rows, out_cols]);
        out.into_shape(IxDyn(&full_shape))
            .map_err(|e| SceneError::invalid_input(e.to_string()))
    }

    /// Apply `predict` to every tile of `array` and blend the results.
    pub fn predict<F>(&self, array: &ArrayViewD<'_, f32>, mut predict: F) -> SceneResult<ArrayD<f32>>
    where
        F: FnMut(ArrayD<f32>) -> SceneResult<ArrayD<f32>>,
    {
        let mut results = Vec::with_capacity(self.n_rows());
        for i in 0..self.n_rows() {
            let mut row = Vec::with_capacity(self.n_cols());
            for j in 0..self.n_cols() {
                row.push(predict(self.get_tile(array, i, j)?)?);
            }
            results.push(row);
        }
        self.assemble(&results)
    }
}

impl std::fmt::Display for Tiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tiler(tile_size={:?}, overlap={})", self.tile_size, self.overlap)
    }
}
