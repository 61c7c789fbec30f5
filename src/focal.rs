use crate::cache::DiscCache;
use crate::chunking::padded_row_chunks;
use crate::dtype::DataType;
use crate::error::{MovingWindowError, Result};
use crate::footprint::{Footprint, WindowShape};
use crate::memory::{self, ArrayLike};
use crate::raster::Raster;
use crate::reducer::Reducer;
use log::{debug, info};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3, Axis, Ix3};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// A bare size (the footprint radius) or an explicit footprint.
#[derive(Debug, Clone)]
pub enum Window {
    Size(usize),
    Footprint(Footprint),
}

impl Window {
    /// `<w>x<w>` for a size, `<rows>x<cols>` for a footprint.
    pub fn label(&self) -> String {
        match self {
            Window::Size(size) => format!("{}x{}", size, size),
            Window::Footprint(footprint) => {
                let (rows, cols) = footprint.dim();
                format!("{}x{}", rows, cols)
            }
        }
    }
}

impl From<usize> for Window {
    fn from(size: usize) -> Self {
        Window::Size(size)
    }
}

impl From<Footprint> for Window {
    fn from(footprint: Footprint) -> Self {
        Window::Footprint(footprint)
    }
}

pub enum FilterSource<'a> {
    Raster(&'a Raster),
    /// A bare band; results cannot be written without georeferencing.
    Array(ArrayView2<'a, f64>),
}

#[derive(Debug, Clone)]
pub struct OutputTarget {
    pub path: PathBuf,
    pub overwrite: bool,
}

#[derive(Debug)]
pub enum FilterOutput {
    Array(Array3<f64>),
    Raster { raster: Raster, written: bool },
}

impl FilterOutput {
    pub fn cells(&self) -> Result<ArrayView3<'_, f64>> {
        match self {
            FilterOutput::Array(cells) => Ok(cells.view()),
            FilterOutput::Raster { raster, .. } => raster.cells(),
        }
    }

    pub fn written(&self) -> bool {
        matches!(self, FilterOutput::Raster { written: true, .. })
    }

    pub fn into_raster(self) -> Option<Raster> {
        match self {
            FilterOutput::Raster { raster, .. } => Some(raster),
            FilterOutput::Array(_) => None,
        }
    }
}

/// A moving-window request.
#[derive(Debug, Clone)]
pub struct MovingWindow {
    reducer: Reducer,
    window: Window,
    shape: WindowShape,
    data_type: Option<DataType>,
    output: Option<OutputTarget>,
    chunk_rows: Option<usize>,
}

impl MovingWindow {
    pub fn new(reducer: Reducer, window: impl Into<Window>) -> Self {
        Self {
            reducer,
            window: window.into(),
            shape: WindowShape::default(),
            data_type: None,
            output: None,
            chunk_rows: None,
        }
    }

    /// Footprint shape synthesised for a bare size.
    pub fn with_shape(mut self, shape: WindowShape) -> Self {
        self.shape = shape;
        self
    }

    /// Cast results into `data_type`.
    pub fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    /// Write results to `path` when the source is georeferenced.
    pub fn with_output(mut self, path: impl Into<PathBuf>, overwrite: bool) -> Self {
        self.output = Some(OutputTarget {
            path: path.into(),
            overwrite,
        });
        self
    }

    /// Output rows per chunk when filtering a disc-backed raster. Sized
    /// from free memory when unset.
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = Some(chunk_rows);
        self
    }

    pub fn reducer(&self) -> &Reducer {
        &self.reducer
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn footprint(&self) -> Result<Footprint> {
        match &self.window {
            Window::Size(size) => Footprint::with_shape(self.shape, *size)
                .ok_or(MovingWindowError::InvalidWindowSize(*size)),
            Window::Footprint(footprint) => Ok(footprint.clone()),
        }
    }

    pub fn apply(&self, source: FilterSource<'_>) -> Result<FilterOutput> {
        let footprint = self.footprint()?;
        info!(
            "Applying {} over a {} window ({} cells)",
            self.reducer,
            self.window.label(),
            footprint.len()
        );

        match source {
            FilterSource::Array(band) => {
                let mut cells = self.compute(band.insert_axis(Axis(2)), &footprint)?;
                if let Some(data_type) = self.data_type {
                    cells.mapv_inplace(|v| data_type.cast(v));
                }
                if self.output.is_some() {
                    debug!("Source is a bare array without georeferencing; result not written");
                }
                Ok(FilterOutput::Array(cells))
            }
            FilterSource::Raster(raster) => {
                let result = match raster.cache_dir() {
                    Some(dir) => self.compute_on_disc(raster, &footprint, dir)?,
                    None => {
                        let filled = raster.filled(0.0)?;
                        Raster::from_array(self.compute(filled.view(), &footprint)?)
                    }
                };

                let mut result = result
                    .with_data_type(self.data_type.unwrap_or(DataType::Float64))?
                    .with_no_data(raster.no_data());
                if let Some(geotransform) = raster.geotransform() {
                    result = result.with_geotransform(geotransform);
                }
                match (raster.geo_keys(), raster.projection()) {
                    (Some(keys), _) => result = result.with_geo_keys(keys.clone()),
                    (None, Some(projection)) => result = result.with_projection(projection),
                    (None, None) => {}
                }

                let written = match &self.output {
                    Some(_) if result.geotransform().is_none() => {
                        debug!("Source has no georeferencing; result not written");
                        false
                    }
                    Some(target) => {
                        info!("Writing {}", target.path.display());
                        result.write(&target.path, target.overwrite)?
                    }
                    None => false,
                };

                Ok(FilterOutput::Raster {
                    raster: result,
                    written,
                })
            }
        }
    }

    fn compute(&self, cells: ArrayView3<'_, f64>, footprint: &Footprint) -> Result<Array3<f64>> {
        let (rows, cols, bands) = cells.dim();
        let budget = memory::check_budget(
            ArrayLike::Shape(&[rows, cols, bands]),
            Some(DataType::Float64),
        )?;
        memory::advise(&budget, "the moving-window result");

        let mut out = Array3::zeros((rows, cols, bands));
        for (band, mut target) in cells.axis_iter(Axis(2)).zip(out.axis_iter_mut(Axis(2))) {
            target.assign(&filter_band(band, footprint, &self.reducer)?);
        }
        Ok(out)
    }

    /// Filter a disc-backed raster chunk by chunk into a new disc cache in
    /// `dir`. Only one padded slab of rows is held in memory at a time.
    fn compute_on_disc(&self, raster: &Raster, footprint: &Footprint, dir: &Path) -> Result<Raster> {
        let (rows, cols, bands) = raster.shape();
        let padding = footprint
            .offsets()
            .iter()
            .map(|&(dy, _)| dy.unsigned_abs())
            .max()
            .unwrap_or(0);
        let chunk_rows = self
            .chunk_rows
            .unwrap_or_else(|| rows_within(memory::free_memory() / 4, cols * bands, padding));
        let chunks = padded_row_chunks(rows, chunk_rows, padding)?;
        info!(
            "Filtering disc-backed raster in {} chunks of <= {} rows",
            chunks.len(),
            chunk_rows
        );

        let cells = raster.cells()?;
        let mut cache = DiscCache::create_in(dir, &[rows, cols, bands], DataType::Float64, None)?;
        {
            let mut target = cache.view_mut::<f64>()?.into_dimensionality::<Ix3>()?;
            for chunk in &chunks {
                let slab = cells
                    .slice(s![chunk.input.clone(), .., ..])
                    .mapv(|v| if raster.is_no_data(v) { 0.0 } else { v });
                let filtered = self.compute(slab.view(), footprint)?;
                target
                    .slice_mut(s![chunk.output.clone(), .., ..])
                    .assign(&filtered.slice(s![chunk.local(), .., ..]));
            }
        }
        cache.flush()?;
        debug!("Disc-backed result in {}", cache.path().display());
        Raster::from_disc(cache)
    }
}

/// Output rows per chunk that fit `budget_bytes`, given `row_cells` cells
/// per row and `padding` extra rows on each side. Each row is held three
/// times as `f64`: the slab, the result and the per-band scratch.
fn rows_within(budget_bytes: u64, row_cells: usize, padding: usize) -> usize {
    let row_bytes = (row_cells as u64).saturating_mul(3 * 8).max(1);
    let fit = usize::try_from(budget_bytes / row_bytes).unwrap_or(usize::MAX);
    fit.saturating_sub(2 * padding).max(1)
}

/// Filter a single band. Rows are processed in parallel.
pub fn filter_band(
    band: ArrayView2<'_, f64>,
    footprint: &Footprint,
    reducer: &Reducer,
) -> Result<Array2<f64>> {
    let (rows, cols) = band.dim();
    if rows == 0 || cols == 0 {
        return Ok(Array2::zeros((rows, cols)));
    }

    // prefix sums would smear a NaN along the whole row
    let runs = if reducer.is_summed() && band.iter().all(|v| v.is_finite()) {
        footprint.row_runs()
    } else {
        None
    };

    let values: Vec<f64> = match runs {
        Some(runs) => {
            debug!("Summed fast path over {} row runs", runs.len());
            summed_rows(band, &runs, footprint.len(), reducer)
        }
        None => sampled_rows(band, &footprint.offsets(), reducer),
    };
    Ok(Array2::from_shape_vec((rows, cols), values)?)
}

fn sampled_rows(band: ArrayView2<'_, f64>, offsets: &[(isize, isize)], reducer: &Reducer) -> Vec<f64> {
    let (rows, cols) = band.dim();
    let rows: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut sample = Vec::with_capacity(offsets.len());
            (0..cols)
                .map(|col| {
                    sample.clear();
                    sample.extend(
                        offsets
                            .iter()
                            .map(|&(dy, dx)| cell_or_zero(&band, row, col, dy, dx)),
                    );
                    reducer.reduce(&mut sample)
                })
                .collect()
        })
        .collect();
    rows.into_iter().flatten().collect()
}

fn summed_rows(
    band: ArrayView2<'_, f64>,
    runs: &[(isize, isize, isize)],
    count: usize,
    reducer: &Reducer,
) -> Vec<f64> {
    let (rows, cols) = band.dim();
    let mut prefix = Array2::<f64>::zeros((rows, cols + 1));
    for (line, mut acc) in band.outer_iter().zip(prefix.outer_iter_mut()) {
        for (c, &v) in line.iter().enumerate() {
            acc[c + 1] = acc[c] + v;
        }
    }

    let last_col = cols as isize - 1;
    let rows_out: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            (0..cols)
                .map(|col| {
                    let total: f64 = runs
                        .iter()
                        .map(|&(dy, x0, x1)| {
                            let r = row as isize + dy;
                            if r < 0 || r >= rows as isize {
                                return 0.0;
                            }
                            let c0 = (col as isize + x0).max(0);
                            let c1 = (col as isize + x1).min(last_col);
                            if c0 > c1 {
                                return 0.0;
                            }
                            let r = r as usize;
                            prefix[[r, c1 as usize + 1]] - prefix[[r, c0 as usize]]
                        })
                        .sum();
                    reducer.from_total(total, count)
                })
                .collect()
        })
        .collect();
    rows_out.into_iter().flatten().collect()
}

#[inline]
fn cell_or_zero(band: &ArrayView2<'_, f64>, row: usize, col: usize, dy: isize, dx: isize) -> f64 {
    let r = row as isize + dy;
    let c = col as isize + dx;
    if r < 0 || c < 0 {
        return 0.0;
    }
    band.get((r as usize, c as usize)).copied().unwrap_or(0.0)
}
