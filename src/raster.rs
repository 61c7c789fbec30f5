use crate::cache::{unique_path, DiscCache};
use crate::chunking::RowChunks;
use crate::dtype::DataType;
use crate::error::{MovingWindowError, Result};
use crate::io::{self, GeoKeys, GeoTransform, RasterMetadata};
use crate::memory::{self, ArrayLike};
use crate::reclass::{self, MatchSet, ReclassSource};
use log::{debug, info, warn};
use ndarray::{Array2, Array3, ArrayView3, ArrayViewMut3, Axis, Ix3};
use std::path::{Path, PathBuf};

/// No-data value given to empty containers.
pub const DEFAULT_NO_DATA: f64 = 65535.0;

/// How a raster is opened from a file.
#[derive(Debug, Clone, Default)]
pub struct RasterOptions {
    /// Cast cells into this type on load instead of the file's own type.
    pub data_type: Option<DataType>,
    /// Replace the file's no-data value.
    pub no_data: Option<f64>,
    /// Hold cells in a memory-mapped file instead of RAM.
    pub disc_cache: bool,
    /// Directory for the backing file; the system temp dir when unset.
    pub cache_dir: Option<PathBuf>,
}

#[derive(Debug)]
enum Storage {
    Memory(Array3<f64>),
    Disc(DiscCache),
}

#[derive(Debug)]
pub struct Raster {
    storage: Storage,
    data_type: DataType,
    no_data: Option<f64>,
    geotransform: Option<GeoTransform>,
    projection: Option<String>,
    geo_keys: Option<GeoKeys>,
    path: Option<PathBuf>,
}

/// Fit a no-data value to `data_type` the same way cells are cast.
/// Negative values cannot be stored against unsigned types; they become 0.
pub fn sanitize_no_data(data_type: DataType, no_data: Option<f64>) -> Option<f64> {
    no_data.map(|value| {
        if data_type.is_unsigned() && value < 0.0 {
            warn!(
                "No-data value {} is negative for unsigned type {}; using 0",
                value, data_type
            );
            return 0.0;
        }
        let cast = data_type.cast(value);
        if cast != value && !value.is_nan() {
            debug!("No-data value {} cast to {} for {}", value, cast, data_type);
        }
        cast
    })
}

fn matches_no_data(value: f64, no_data: Option<f64>) -> bool {
    match no_data {
        Some(nd) if nd.is_nan() => value.is_nan(),
        Some(nd) => value == nd,
        None => false,
    }
}

impl Raster {
    /// Open a raster file, reading georeferencing and no-data from its tags.
    pub fn open(path: &Path, options: &RasterOptions) -> Result<Self> {
        let header = io::read_metadata(path)?;
        if !options.disc_cache {
            let budget = memory::check_budget(
                ArrayLike::Shape(&[header.height, header.width, header.bands]),
                Some(DataType::Float64),
            )?;
            memory::advise(&budget, &path.display().to_string());
        }

        let (mut cells, metadata) = io::read_raster(path)?;
        let data_type = match options.data_type {
            Some(target) if target != metadata.data_type => {
                info!("Casting {} from {} to {}", path.display(), metadata.data_type, target);
                cells.mapv_inplace(|v| target.cast(v));
                target
            }
            _ => metadata.data_type,
        };
        let no_data = sanitize_no_data(data_type, options.no_data.or(metadata.nodata));

        let mut raster = Self {
            storage: Storage::Memory(cells),
            data_type,
            no_data,
            geotransform: metadata.geotransform,
            projection: metadata.projection,
            geo_keys: metadata.geo_keys,
            path: Some(path.to_path_buf()),
        };
        if options.disc_cache {
            let dir = options.cache_dir.clone().unwrap_or_else(std::env::temp_dir);
            raster = raster.into_disc_cache(&dir)?;
        }

        let (rows, cols, bands) = raster.shape();
        info!(
            "Opened {}: {}x{} x{} bands, {}, no-data {:?}",
            path.display(),
            cols,
            rows,
            bands,
            raster.data_type,
            raster.no_data
        );
        Ok(raster)
    }

    /// Wrap `(rows, cols, bands)` cells as a `Float64` raster without
    /// georeferencing.
    pub fn from_array(cells: Array3<f64>) -> Self {
        Self {
            storage: Storage::Memory(cells),
            data_type: DataType::Float64,
            no_data: None,
            geotransform: None,
            projection: None,
            geo_keys: None,
            path: None,
        }
    }

    /// Adopt a `Float64` disc cache of `(rows, cols, bands)` cells.
    pub(crate) fn from_disc(cache: DiscCache) -> Result<Self> {
        if cache.shape().len() != 3 || cache.data_type() != DataType::Float64 {
            return Err(MovingWindowError::InvalidInput(format!(
                "disc cache {} holds {:?} {}, not (rows, cols, bands) float64",
                cache.path().display(),
                cache.shape(),
                cache.data_type()
            )));
        }
        let no_data = cache.no_data();
        Ok(Self {
            no_data,
            storage: Storage::Disc(cache),
            ..Self::from_array(Array3::zeros((0, 0, 1)))
        })
    }

    /// Wrap a single band.
    pub fn from_band(band: Array2<f64>) -> Self {
        Self::from_array(band.insert_axis(Axis(2)))
    }

    /// A container with no cells, typed `UInt16` with no-data 65535.
    pub fn empty() -> Self {
        Self {
            data_type: DataType::UInt16,
            no_data: Some(DEFAULT_NO_DATA),
            ..Self::from_array(Array3::zeros((0, 0, 1)))
        }
    }

    /// Declare the element type, casting the cells and no-data into it.
    pub fn with_data_type(mut self, data_type: DataType) -> Result<Self> {
        self.set_data_type(data_type)?;
        Ok(self)
    }

    /// As [`Raster::with_data_type`], in place. On error the raster keeps
    /// its previous type.
    pub fn set_data_type(&mut self, data_type: DataType) -> Result<()> {
        match &mut self.storage {
            Storage::Memory(cells) => cells.mapv_inplace(|v| data_type.cast(v)),
            Storage::Disc(cache) => {
                cache.view_mut::<f64>()?.mapv_inplace(|v| data_type.cast(v));
                cache.flush()?;
            }
        }
        self.data_type = data_type;
        self.no_data = sanitize_no_data(data_type, self.no_data);
        Ok(())
    }

    pub fn with_no_data(mut self, no_data: Option<f64>) -> Self {
        self.no_data = sanitize_no_data(self.data_type, no_data);
        self
    }

    pub fn with_geotransform(mut self, geotransform: GeoTransform) -> Self {
        self.geotransform = Some(geotransform);
        self
    }

    /// Set a projection by name. Any GeoKeys read from a file are dropped,
    /// so the output is keyed as user-defined with this citation.
    pub fn with_projection(mut self, projection: impl Into<String>) -> Self {
        self.projection = Some(projection.into());
        self.geo_keys = None;
        self
    }

    /// Carry a GeoKey directory, written verbatim.
    pub fn with_geo_keys(mut self, geo_keys: GeoKeys) -> Self {
        self.projection = geo_keys.projection();
        self.geo_keys = Some(geo_keys);
        self
    }

    /// Move the cells into a new disc cache under `dir`. A raster that is
    /// already disc-backed is returned unchanged.
    pub fn into_disc_cache(mut self, dir: &Path) -> Result<Self> {
        if let Storage::Memory(cells) = &self.storage {
            let cache = DiscCache::from_array(cells.view(), self.no_data, Some(&unique_path(dir)))?;
            debug!("Raster cells moved to disc cache {}", cache.path().display());
            self.storage = Storage::Disc(cache);
        }
        Ok(self)
    }

    /// `(rows, cols, bands)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        match &self.storage {
            Storage::Memory(cells) => cells.dim(),
            Storage::Disc(cache) => match cache.shape() {
                &[rows, cols, bands] => (rows, cols, bands),
                _ => (0, 0, 0),
            },
        }
    }

    pub fn rows(&self) -> usize {
        self.shape().0
    }

    pub fn cols(&self) -> usize {
        self.shape().1
    }

    pub fn bands(&self) -> usize {
        self.shape().2
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    pub fn geotransform(&self) -> Option<GeoTransform> {
        self.geotransform
    }

    pub fn projection(&self) -> Option<&str> {
        self.projection.as_deref()
    }

    pub fn geo_keys(&self) -> Option<&GeoKeys> {
        self.geo_keys.as_ref()
    }

    /// File the raster was opened from.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_disc_cached(&self) -> bool {
        matches!(self.storage, Storage::Disc(_))
    }

    pub fn cache_path(&self) -> Option<&Path> {
        match &self.storage {
            Storage::Disc(cache) => Some(cache.path()),
            Storage::Memory(_) => None,
        }
    }

    /// Directory holding the backing file of a disc-backed raster.
    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_path().and_then(Path::parent)
    }

    pub fn cells(&self) -> Result<ArrayView3<'_, f64>> {
        match &self.storage {
            Storage::Memory(cells) => Ok(cells.view()),
            Storage::Disc(cache) => Ok(cache.view::<f64>()?.into_dimensionality::<Ix3>()?),
        }
    }

    pub fn cells_mut(&mut self) -> Result<ArrayViewMut3<'_, f64>> {
        match &mut self.storage {
            Storage::Memory(cells) => Ok(cells.view_mut()),
            Storage::Disc(cache) => Ok(cache.view_mut::<f64>()?.into_dimensionality::<Ix3>()?),
        }
    }

    pub fn is_no_data(&self, value: f64) -> bool {
        matches_no_data(value, self.no_data)
    }

    /// `true` where a cell is masked.
    pub fn mask(&self) -> Result<Array3<bool>> {
        let no_data = self.no_data;
        Ok(self.cells()?.mapv(|v| matches_no_data(v, no_data)))
    }

    /// A copy of the cells with masked cells replaced by `fill`.
    pub fn filled(&self, fill: f64) -> Result<Array3<f64>> {
        let no_data = self.no_data;
        Ok(self
            .cells()?
            .mapv(|v| if matches_no_data(v, no_data) { fill } else { v }))
    }

    /// Number of unmasked cells.
    pub fn valid_count(&self) -> Result<usize> {
        Ok(self.cells()?.iter().filter(|&&v| !self.is_no_data(v)).count())
    }

    pub fn metadata(&self) -> RasterMetadata {
        let (rows, cols, bands) = self.shape();
        RasterMetadata {
            width: cols,
            height: rows,
            bands,
            data_type: self.data_type,
            geotransform: self.geotransform,
            projection: self.projection.clone(),
            geo_keys: self.geo_keys.clone(),
            nodata: self.no_data,
        }
    }

    /// Write the raster to `path`. An existing file is left alone unless
    /// `overwrite` is set; returns whether the file was written.
    pub fn write(&self, path: &Path, overwrite: bool) -> Result<bool> {
        if path.exists() && !overwrite {
            info!("{} already exists; not overwriting", path.display());
            return Ok(false);
        }
        io::write_raster(path, self.cells()?, &self.metadata())?;
        Ok(true)
    }

    /// Copy the raster into new storage. A disc-backed raster gets a new
    /// backing file next to the original.
    pub fn try_clone(&self) -> Result<Self> {
        let storage = match &self.storage {
            Storage::Memory(cells) => Storage::Memory(cells.clone()),
            Storage::Disc(cache) => {
                let dir = cache
                    .path()
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(std::env::temp_dir);
                Storage::Disc(DiscCache::from_array(
                    cache.view::<f64>()?,
                    cache.no_data(),
                    Some(&unique_path(&dir)),
                )?)
            }
        };
        Ok(Self {
            storage,
            data_type: self.data_type,
            no_data: self.no_data,
            geotransform: self.geotransform,
            projection: self.projection.clone(),
            geo_keys: self.geo_keys.clone(),
            path: self.path.clone(),
        })
    }

    /// Recode the cells in place to 0/1 membership of `matches`. Masked
    /// cells become 0, the type becomes `UInt8` and no-data is cleared.
    pub fn reclassify(&mut self, matches: &MatchSet, invert: bool) -> Result<()> {
        let binary = reclass::reclassify(ReclassSource::Raster(&*self), matches, invert)?;
        self.cells_mut()?
            .zip_mut_with(&binary, |cell, &code| *cell = f64::from(code));
        self.data_type = DataType::UInt8;
        self.no_data = None;
        if let Storage::Disc(cache) = &self.storage {
            cache.flush()?;
        }
        Ok(())
    }

    /// Iterate over the cells in chunks of at most `chunk_rows` rows.
    pub fn row_chunks(&self, chunk_rows: usize) -> Result<RowChunks<'_>> {
        RowChunks::by_height(self.cells()?, chunk_rows)
    }

    /// Release the disc cache, if any, removing its backing file.
    pub fn close(self) -> Result<()> {
        if let Storage::Disc(mut cache) = self.storage {
            cache.release()?;
        }
        Ok(())
    }
}

impl TryFrom<&Path> for Raster {
    type Error = MovingWindowError;

    fn try_from(path: &Path) -> Result<Self> {
        Self::open(path, &RasterOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn sample() -> Raster {
        Raster::from_band(arr2(&[[1.0, 2.0, -9999.0], [4.0, -9999.0, 6.0]]))
            .with_no_data(Some(-9999.0))
    }

    #[test]
    fn test_from_band_shape() {
        let raster = sample();
        assert_eq!(raster.shape(), (2, 3, 1));
        assert_eq!(raster.data_type(), DataType::Float64);
        assert!(!raster.is_disc_cached());
    }

    #[test]
    fn test_negative_no_data_on_unsigned_becomes_zero() {
        let raster = Raster::from_band(Array2::zeros((2, 2)))
            .with_data_type(DataType::UInt8)
            .unwrap()
            .with_no_data(Some(-1.0));
        assert_eq!(raster.no_data(), Some(0.0));

        let signed = Raster::from_band(Array2::zeros((2, 2)))
            .with_data_type(DataType::Int16)
            .unwrap()
            .with_no_data(Some(-1.0));
        assert_eq!(signed.no_data(), Some(-1.0));
    }

    #[test]
    fn test_with_data_type_casts_cells() {
        let raster = Raster::from_band(arr2(&[[1.6, -3.0]]))
            .with_data_type(DataType::UInt8)
            .unwrap();
        let cells = raster.cells().unwrap();
        assert_eq!(cells[[0, 0, 0]], 2.0);
        assert_eq!(cells[[0, 1, 0]], 0.0);
    }

    #[test]
    fn test_mask_and_filled() {
        let raster = sample();
        let mask = raster.mask().unwrap();
        assert!(mask[[0, 2, 0]]);
        assert!(mask[[1, 1, 0]]);
        assert!(!mask[[0, 0, 0]]);
        assert_eq!(raster.valid_count().unwrap(), 4);

        let filled = raster.filled(0.0).unwrap();
        assert_eq!(filled[[0, 2, 0]], 0.0);
        assert_eq!(filled[[1, 2, 0]], 6.0);
        // the source is untouched
        assert_eq!(raster.cells().unwrap()[[0, 2, 0]], -9999.0);
    }

    #[test]
    fn test_nan_no_data_masks_nan_cells() {
        let raster = Raster::from_band(arr2(&[[f64::NAN, 1.0]])).with_no_data(Some(f64::NAN));
        assert_eq!(raster.valid_count().unwrap(), 1);
    }

    #[test]
    fn test_empty_container_defaults() {
        let raster = Raster::empty();
        assert_eq!(raster.shape(), (0, 0, 1));
        assert_eq!(raster.data_type(), DataType::UInt16);
        assert_eq!(raster.no_data(), Some(DEFAULT_NO_DATA));
    }

    #[test]
    fn test_try_clone_owns_its_cells() {
        let raster = sample();
        let mut copy = raster.try_clone().unwrap();
        copy.cells_mut().unwrap()[[0, 0, 0]] = 42.0;
        assert_eq!(raster.cells().unwrap()[[0, 0, 0]], 1.0);
        assert_eq!(copy.no_data(), raster.no_data());
    }

    #[test]
    fn test_disc_cached_raster_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let raster = sample().into_disc_cache(dir.path()).unwrap();
        assert!(raster.is_disc_cached());
        let backing = raster.cache_path().unwrap().to_path_buf();
        assert!(backing.exists());
        assert_eq!(raster.cells().unwrap()[[1, 2, 0]], 6.0);

        let copy = raster.try_clone().unwrap();
        let copy_backing = copy.cache_path().unwrap().to_path_buf();
        assert_ne!(backing, copy_backing);

        raster.close().unwrap();
        assert!(!backing.exists());
        assert!(copy_backing.exists());
        drop(copy);
        assert!(!copy_backing.exists());
    }

    #[test]
    fn test_reclassify_in_place() {
        let mut raster = sample();
        let matches = MatchSet::new([1.0, 6.0]).unwrap();
        raster.reclassify(&matches, false).unwrap();

        assert_eq!(raster.data_type(), DataType::UInt8);
        assert_eq!(raster.no_data(), None);
        let cells = raster.cells().unwrap();
        assert_eq!(
            cells.index_axis(Axis(2), 0),
            arr2(&[[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]])
        );
    }

    #[test]
    fn test_write_respects_overwrite_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tif");
        let raster = sample().with_geotransform([0.0, 30.0, 0.0, 60.0, 0.0, -30.0]);

        assert!(raster.write(&path, false).unwrap());
        assert!(!raster.write(&path, false).unwrap());
        assert!(raster.write(&path, true).unwrap());
    }

    #[test]
    fn test_open_with_options() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.tif");
        sample()
            .with_data_type(DataType::Int16)
            .unwrap()
            .with_geotransform([10.0, 1.0, 0.0, 20.0, 0.0, -1.0])
            .write(&path, false)
            .unwrap();

        let options = RasterOptions {
            data_type: Some(DataType::UInt8),
            disc_cache: true,
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let raster = Raster::open(&path, &options).unwrap();
        assert_eq!(raster.data_type(), DataType::UInt8);
        // -9999 does not fit an unsigned type
        assert_eq!(raster.no_data(), Some(0.0));
        assert!(raster.is_disc_cached());
        assert_eq!(raster.path(), Some(path.as_path()));
        assert_eq!(raster.cells().unwrap()[[0, 2, 0]], 0.0);
        raster.close().unwrap();
    }

    #[test]
    fn test_no_data_is_cast_with_the_cells() {
        let raster = Raster::from_band(arr2(&[[1.0, -9999.5], [2.0, 3.0]]))
            .with_no_data(Some(-9999.5))
            .with_data_type(DataType::Int16)
            .unwrap();

        assert_eq!(raster.no_data(), Some(-10000.0));
        assert_eq!(raster.cells().unwrap()[[0, 1, 0]], -10000.0);
        assert!(raster.mask().unwrap()[[0, 1, 0]]);
        assert_eq!(raster.valid_count().unwrap(), 3);
        assert_eq!(raster.filled(0.0).unwrap()[[0, 1, 0]], 0.0);
    }

    #[test]
    fn test_open_with_type_override_keeps_no_data_masked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float32.tif");
        Raster::from_band(arr2(&[[1.5, -3.4e38], [2.0, 3.0]]))
            .with_data_type(DataType::Float32)
            .unwrap()
            .with_no_data(Some(-3.4e38))
            .with_geotransform([0.0, 1.0, 0.0, 2.0, 0.0, -1.0])
            .write(&path, false)
            .unwrap();

        let options = RasterOptions {
            data_type: Some(DataType::Int32),
            ..Default::default()
        };
        let raster = Raster::open(&path, &options).unwrap();
        assert_eq!(raster.data_type(), DataType::Int32);
        assert_eq!(raster.no_data(), Some(f64::from(i32::MIN)));
        assert!(raster.mask().unwrap()[[0, 1, 0]]);
        assert_eq!(raster.valid_count().unwrap(), 3);
    }

    #[test]
    fn test_set_data_type_on_released_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache =
            DiscCache::create_in(dir.path(), &[2, 2, 1], DataType::Float64, None).unwrap();
        cache.release().unwrap();
        let mut raster = Raster::from_disc(cache).unwrap();

        assert!(raster.set_data_type(DataType::UInt8).is_err());
        assert_eq!(raster.data_type(), DataType::Float64);
    }

    #[test]
    fn test_from_disc_requires_float64_cells() {
        let dir = tempfile::tempdir().unwrap();
        let flat = DiscCache::create_in(dir.path(), &[4], DataType::Float64, None).unwrap();
        assert!(Raster::from_disc(flat).is_err());

        let typed = DiscCache::create_in(dir.path(), &[2, 2, 1], DataType::UInt8, None).unwrap();
        assert!(Raster::from_disc(typed).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_projection_name_replaces_file_geo_keys() {
        let keys = GeoKeys {
            directory: vec![1, 1, 0, 1, 3072, 0, 1, 5070],
            doubles: None,
            ascii: None,
        };
        let keyed = sample().with_geo_keys(keys.clone());
        assert_eq!(keyed.projection(), Some("EPSG:5070"));
        assert_eq!(keyed.metadata().geo_keys, Some(keys));

        let renamed = keyed.with_projection("PROJCS[\"Albers\"]");
        assert_eq!(renamed.geo_keys(), None);
        assert_eq!(renamed.projection(), Some("PROJCS[\"Albers\"]"));
    }
}
