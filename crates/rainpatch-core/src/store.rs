//! Gridded array stores: reading named variables and writing crop archives.
//!
//! Supported formats, chosen by file extension:
//!   .npz        named arrays (`name` or `name.npy` inside the archive)
//!   .npy        one unnamed array; the requested name is ignored
//!   .tif/.tiff  one single-band raster; the requested name is ignored
//!
//! Payloads are read as f32. f64 payloads are narrowed; integer TIFF samples
//! are widened.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek};
use std::path::Path;

use log::debug;
use ndarray::{ArrayD, IxDyn};
use ndarray_npy::{read_npy, NpzReader, NpzWriter, ReadNpzError};
use tiff::decoder::{Decoder, DecodingResult};

use crate::error::{SceneError, SceneResult};

/// On-disk store kind, from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Npz,
    Npy,
    Tiff,
}

impl StoreFormat {
    pub fn from_path(path: &Path) -> SceneResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("npz") => Ok(Self::Npz),
            Some("npy") => Ok(Self::Npy),
            Some("tif") | Some("tiff") => Ok(Self::Tiff),
            _ => Err(SceneError::invalid_input(format!(
                "unsupported array store: {}",
                path.display()
            ))),
        }
    }

    /// Whether the format holds several addressable variables.
    pub fn is_named(self) -> bool {
        matches!(self, Self::Npz)
    }
}

/// Names of the variables held by the store. Single-array formats report none.
pub fn variable_names(path: &Path) -> SceneResult<Vec<String>> {
    match StoreFormat::from_path(path)? {
        StoreFormat::Npz => {
            let mut npz = NpzReader::new(BufReader::new(File::open(path)?))?;
            let names = npz.names()?;
            Ok(names
                .into_iter()
                .map(|n| n.trim_end_matches(".npy").to_string())
                .collect())
        }
        StoreFormat::Npy | StoreFormat::Tiff => Ok(Vec::new()),
    }
}

/// Load variable `name` from the store at `path`.
pub fn load_variable(path: &Path, name: &str) -> SceneResult<ArrayD<f32>> {
    let array = match StoreFormat::from_path(path)? {
        StoreFormat::Npz => {
            let mut npz = NpzReader::new(BufReader::new(File::open(path)?))?;
            let names = npz.names()?;
            let entry = names
                .iter()
                .find(|n| n.as_str() == name || n.trim_end_matches(".npy") == name)
                .cloned()
                .ok_or_else(|| SceneError::MissingVariable {
                    variable: name.to_string(),
                    path: path.to_path_buf(),
                })?;
            read_npz_entry(&mut npz, &entry)?
        }
        StoreFormat::Npy => match read_npy::<_, ArrayD<f32>>(path) {
            Ok(a) => a,
            Err(_) => read_npy::<_, ArrayD<f64>>(path)?.mapv(|v| v as f32),
        },
        StoreFormat::Tiff => read_tiff(path)?,
    };
    debug!("loaded '{}' {:?} from {}", name, array.shape(), path.display());
    Ok(array)
}

fn read_npz_entry<R: Read + Seek>(
    npz: &mut NpzReader<R>,
    entry: &str,
) -> Result<ArrayD<f32>, ReadNpzError> {
    match npz.by_name::<ndarray::OwnedRepr<f32>, IxDyn>(entry) {
        Ok(a) => Ok(a),
        Err(_) => {
            let wide: ArrayD<f64> = npz.by_name(entry)?;
            Ok(wide.mapv(|v| v as f32))
        }
    }
}

fn read_tiff(path: &Path) -> SceneResult<ArrayD<f32>> {
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);

    let data: Vec<f32> = match decoder.read_image()? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        _ => {
            return Err(SceneError::invalid_input(format!(
                "unsupported TIFF sample type in {}",
                path.display()
            )))
        }
    };
    if data.len() != rows * cols {
        return Err(SceneError::invalid_input(format!(
            "{} is not a single-band raster ({} samples for {rows}×{cols} pixels)",
            path.display(),
            data.len()
        )));
    }
    ArrayD::from_shape_vec(IxDyn(&[rows, cols]), data)
        .map_err(|e| SceneError::invalid_input(e.to_string()))
}

/// Write `arrays` as a compressed `.npz` archive, one entry per name.
pub fn write_npz(path: &Path, arrays: &[(String, ArrayD<f32>)]) -> SceneResult<()> {
    let mut npz = NpzWriter::new_compressed(BufWriter::new(File::create(path)?));
    for (name, array) in arrays {
        npz.add_array(name.as_str(), array)?;
    }
    npz.finish()?;
    Ok(())
}
