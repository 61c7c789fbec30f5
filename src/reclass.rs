use crate::chunking::RowChunks;
use crate::error::{MovingWindowError, Result};
use crate::raster::Raster;
use log::debug;
use ndarray::{concatenate, Array, Array3, ArrayView, ArrayView3, Axis, Dimension};
use rayon::prelude::*;

/// Values to match against. Never empty; every value is finite.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSet {
    values: Vec<f64>,
}

impl MatchSet {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Result<Self> {
        let mut values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Err(MovingWindowError::EmptyMatchSet);
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(MovingWindowError::InvalidMatchValue(bad.to_string()));
        }
        values.sort_by(f64::total_cmp);
        values.dedup();
        Ok(Self { values })
    }

    /// Parse a comma-separated list such as `1,2,3.5`.
    pub fn parse(list: &str) -> Result<Self> {
        let values = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>()
                    .map_err(|_| MovingWindowError::InvalidMatchValue(s.to_string()))
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::new(values)
    }

    pub fn contains(&self, value: f64) -> bool {
        self.values
            .binary_search_by(|entry| entry.total_cmp(&value))
            .is_ok()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    fn code(&self, value: f64, invert: bool) -> u8 {
        u8::from(self.contains(value) != invert)
    }
}

/// What to reclassify.
pub enum ReclassSource<'a> {
    /// Masked cells become 0 regardless of `invert`.
    Raster(&'a Raster),
    Array(ArrayView3<'a, f64>),
    /// Chunks are reclassified independently and stacked in order.
    Chunks(RowChunks<'a>),
}

/// Reclassify `source` into 0/1 codes of shape `(rows, cols, bands)`.
pub fn reclassify(source: ReclassSource<'_>, matches: &MatchSet, invert: bool) -> Result<Array3<u8>> {
    match source {
        ReclassSource::Raster(raster) => {
            let cells = raster.cells()?;
            let mut codes = reclassify_array(cells.view(), matches, invert);
            codes.zip_mut_with(&cells, |code, &v| {
                if raster.is_no_data(v) {
                    *code = 0;
                }
            });
            Ok(codes)
        }
        ReclassSource::Array(cells) => Ok(reclassify_array(cells, matches, invert)),
        ReclassSource::Chunks(chunks) => reclassify_chunks(chunks, matches, invert),
    }
}

/// Reclassify a plain array of any dimensionality.
pub fn reclassify_array<D: Dimension>(
    cells: ArrayView<'_, f64, D>,
    matches: &MatchSet,
    invert: bool,
) -> Array<u8, D> {
    cells.mapv(|v| matches.code(v, invert))
}

/// Reclassify a sequence of row chunks in parallel and stack the results
/// in their original order.
pub fn reclassify_chunks<'a, I>(chunks: I, matches: &MatchSet, invert: bool) -> Result<Array3<u8>>
where
    I: IntoIterator<Item = ArrayView3<'a, f64>>,
{
    let chunks: Vec<ArrayView3<'a, f64>> = chunks.into_iter().collect();
    if chunks.is_empty() {
        return Err(MovingWindowError::InvalidInput(
            "no row chunks to reclassify".to_string(),
        ));
    }
    debug!("Reclassifying {} row chunks", chunks.len());

    let coded: Vec<Array3<u8>> = chunks
        .into_par_iter()
        .map(|chunk| reclassify_array(chunk, matches, invert))
        .collect();
    let views: Vec<ArrayView3<'_, u8>> = coded.iter().map(|c| c.view()).collect();
    Ok(concatenate(Axis(0), &views)?)
}
