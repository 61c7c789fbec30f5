use crate::dtype::DataType;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MovingWindowError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown reducer function: {0}")]
    UnknownReducer(String),

    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    #[error("Unsupported data type for raster cells: {0}")]
    UnsupportedDataType(DataType),

    #[error("Match set for reclassification is empty")]
    EmptyMatchSet,

    #[error("Invalid match value: {0} (must be a finite number)")]
    InvalidMatchValue(String),

    #[error("Invalid window size: {0} (must be positive)")]
    InvalidWindowSize(usize),

    #[error("Raster has invalid dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),

    #[error("Disc cache storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read {path} as a raster: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Array shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl MovingWindowError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MovingWindowError>;
