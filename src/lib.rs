// Library exports for testing and reuse

pub mod cache;
pub mod chunking;
pub mod cli;
pub mod dtype;
pub mod error;
pub mod focal;
pub mod footprint;
pub mod io;
pub mod memory;
pub mod pipeline;
pub mod raster;
pub mod reclass;
pub mod reducer;

// Re-export commonly used types
pub use cache::{CacheSource, DiscCache};
pub use dtype::DataType;
pub use error::{MovingWindowError, Result};
pub use focal::{filter_band, FilterOutput, FilterSource, MovingWindow, Window};
pub use footprint::{Footprint, WindowShape};
pub use io::{read_metadata, read_raster, write_raster, GeoKeys, GeoTransform, RasterMetadata};
pub use memory::{check_budget, estimate_size, ArrayLike, MemoryBudget};
pub use raster::{Raster, RasterOptions};
pub use reclass::{reclassify, MatchSet, ReclassSource};
pub use reducer::Reducer;
