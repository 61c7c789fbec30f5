//! Memory-mapped, file-backed arrays.
//!
//! A [`DiscCache`] owns its backing file exclusively. The file is created
//! fresh for every cache (never reused) and removed when the cache is
//! released or dropped.

use crate::dtype::{dispatch_element, DataType, Element};
use crate::error::{MovingWindowError, Result};
use crate::io;
use crate::raster::sanitize_no_data;
use log::{debug, warn};
use memmap2::MmapMut;
use ndarray::{ArrayView, ArrayViewD, ArrayViewMutD, Dimension, IxDyn};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where the initial contents of a cache come from.
#[derive(Debug)]
pub enum CacheSource<'a> {
    /// A raster file, copied in full.
    File(&'a Path),
    /// An in-memory array, copied in logical (row-major) order.
    Array(ArrayViewD<'a, f64>),
}

#[derive(Debug)]
pub struct DiscCache {
    path: PathBuf,
    data_type: DataType,
    shape: Vec<usize>,
    no_data: Option<f64>,
    // None once released
    mmap: Option<MmapMut>,
}

/// A fresh backing-file path inside `dir`.
pub fn unique_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}_array.dat", Uuid::new_v4().simple()))
}

impl DiscCache {
    /// Allocate a zero-filled cache of `shape` elements of `data_type`.
    ///
    /// Without a `backing_path`, a unique file is created in the system
    /// temporary directory. An existing file at `backing_path` is never
    /// reused; that case fails with a storage error.
    pub fn create(
        shape: &[usize],
        data_type: DataType,
        no_data: Option<f64>,
        backing_path: Option<&Path>,
    ) -> Result<Self> {
        let too_large =
            || MovingWindowError::InvalidInput(format!("disc cache shape {:?} is too large", shape));
        let len = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(too_large)?;
        if shape.is_empty() || len == 0 {
            return Err(MovingWindowError::InvalidInput(format!(
                "cannot allocate a disc cache with shape {:?}",
                shape
            )));
        }
        let byte_len = len.checked_mul(data_type.size_of()).ok_or_else(too_large)?;

        let path = match backing_path {
            Some(path) => path.to_path_buf(),
            None => unique_path(&std::env::temp_dir()),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| MovingWindowError::storage(&path, source))?;

        let mmap = match map_zeroed(&file, byte_len as u64) {
            Ok(mmap) => mmap,
            Err(source) => {
                // leave nothing behind on a failed allocation
                let _ = fs::remove_file(&path);
                return Err(MovingWindowError::storage(&path, source));
            }
        };

        debug!(
            "Allocated disc cache {} ({:?} {}, {} bytes)",
            path.display(),
            shape,
            data_type,
            byte_len
        );

        Ok(Self {
            path,
            data_type,
            shape: shape.to_vec(),
            no_data,
            mmap: Some(mmap),
        })
    }

    /// Allocate a cache in `dir` under a generated unique name.
    pub fn create_in(
        dir: &Path,
        shape: &[usize],
        data_type: DataType,
        no_data: Option<f64>,
    ) -> Result<Self> {
        Self::create(shape, data_type, no_data, Some(&unique_path(dir)))
    }

    /// Allocate a new cache and populate it from `source`.
    ///
    /// For a file, the element type and no-data value default to the file's
    /// own; for an array they default to `Float64` and none.
    pub fn from_source(
        source: CacheSource<'_>,
        data_type: Option<DataType>,
        no_data: Option<f64>,
        backing_path: Option<&Path>,
    ) -> Result<Self> {
        match source {
            CacheSource::File(path) => {
                let (cells, metadata) = io::read_raster(path)?;
                let data_type = data_type.unwrap_or(metadata.data_type);
                let no_data = sanitize_no_data(data_type, no_data.or(metadata.nodata));
                let mut cache = Self::create(cells.shape(), data_type, no_data, backing_path)?;
                cache.store_f64(cells.iter().copied())?;
                Ok(cache)
            }
            CacheSource::Array(array) => {
                let data_type = data_type.unwrap_or(DataType::Float64);
                let mut cache = Self::create(array.shape(), data_type, no_data, backing_path)?;
                cache.store_f64(array.iter().copied())?;
                Ok(cache)
            }
        }
    }

    /// Allocate a new cache holding a copy of `array`, inheriting its shape
    /// and element type.
    pub fn from_array<T: Element, D: Dimension>(
        array: ArrayView<'_, T, D>,
        no_data: Option<f64>,
        backing_path: Option<&Path>,
    ) -> Result<Self> {
        let mut cache = Self::create(array.shape(), T::DATA_TYPE, no_data, backing_path)?;
        let slice = cache.as_mut_slice::<T>()?;
        for (dst, src) in slice.iter_mut().zip(array.iter()) {
            *dst = *src;
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.mmap.is_none()
    }

    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_element::<T>()?;
        let mmap = self.mmap.as_ref().ok_or_else(|| released_error(&self.path))?;
        bytemuck::try_cast_slice(&mmap[..]).map_err(|e| {
            MovingWindowError::InvalidInput(format!("cannot view disc cache as {}: {}", T::DATA_TYPE, e))
        })
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_element::<T>()?;
        let path = &self.path;
        let mmap = self.mmap.as_mut().ok_or_else(|| released_error(path))?;
        bytemuck::try_cast_slice_mut(&mut mmap[..]).map_err(|e| {
            MovingWindowError::InvalidInput(format!("cannot view disc cache as {}: {}", T::DATA_TYPE, e))
        })
    }

    pub fn view<T: Element>(&self) -> Result<ArrayViewD<'_, T>> {
        let slice = self.as_slice::<T>()?;
        Ok(ArrayViewD::from_shape(IxDyn(&self.shape), slice)?)
    }

    pub fn view_mut<T: Element>(&mut self) -> Result<ArrayViewMutD<'_, T>> {
        let shape = IxDyn(&self.shape);
        let slice = self.as_mut_slice::<T>()?;
        Ok(ArrayViewMutD::from_shape(shape, slice)?)
    }

    /// Overwrite the cache contents from `values`, casting each into the
    /// cache's element type.
    pub fn store_f64(&mut self, values: impl Iterator<Item = f64>) -> Result<()> {
        dispatch_element!(self.data_type, T => {
            let slice = self.as_mut_slice::<T>()?;
            for (dst, value) in slice.iter_mut().zip(values) {
                *dst = T::from_f64(value);
            }
            Ok(())
        })
    }

    /// Copy the cache contents out as `f64` values in row-major order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        dispatch_element!(self.data_type, T => {
            Ok(self.as_slice::<T>()?.iter().map(|&v| v.to_f64()).collect())
        })
    }

    pub fn flush(&self) -> Result<()> {
        let mmap = self.mmap.as_ref().ok_or_else(|| released_error(&self.path))?;
        mmap.flush()
            .map_err(|source| MovingWindowError::storage(&self.path, source))
    }

    /// Unmap and delete the backing file. Releasing twice is a no-op.
    pub fn release(&mut self) -> Result<()> {
        let Some(mmap) = self.mmap.take() else {
            return Ok(());
        };
        drop(mmap);

        if self.path.exists() {
            fs::remove_file(&self.path)
                .map_err(|source| MovingWindowError::storage(&self.path, source))?;
            debug!("Removed disc cache {}", self.path.display());
        }
        Ok(())
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        if T::DATA_TYPE != self.data_type {
            return Err(MovingWindowError::InvalidInput(format!(
                "disc cache holds {}, not {}",
                self.data_type,
                T::DATA_TYPE
            )));
        }
        Ok(())
    }
}

fn released_error(path: &Path) -> MovingWindowError {
    MovingWindowError::InvalidInput(format!(
        "disc cache {} has already been released",
        path.display()
    ))
}

impl Drop for DiscCache {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to remove disc cache: {}", e);
        }
    }
}

fn map_zeroed(file: &File, byte_len: u64) -> std::io::Result<MmapMut> {
    file.set_len(byte_len)?;
    // SAFETY: the file was created exclusively for this cache and is never
    // handed out, so no other mapping or writer can alias it.
    unsafe { MmapMut::map_mut(file) }
}
