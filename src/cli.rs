use crate::footprint::WindowShape;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "moving-windows")]
#[command(about = "Apply moving-window reducers to a GeoTIFF raster, optionally after binary reclassification")]
#[command(version)]
pub struct Args {
    /// Input GeoTIFF path
    #[arg(short, long, value_name = "FILE")]
    pub raster: PathBuf,

    /// Reducer applied over each window (sum, mean, median, sd, min, max)
    #[arg(short, long, value_name = "NAME")]
    pub fun: String,

    /// Comma-separated window sizes, in cells (e.g. 3,11,33)
    #[arg(short, long, value_name = "SIZES", value_delimiter = ',', required = true)]
    pub window_sizes: Vec<usize>,

    /// Reclassification classes as label=v1,v2;label2=v3
    #[arg(short = 'c', long, value_name = "SPEC")]
    pub reclass: Option<String>,

    /// Footprint shape synthesised from each window size
    #[arg(short, long, value_enum, default_value_t = ShapeArg::Circle)]
    pub shape: ShapeArg,

    /// Element type of the output rasters
    #[arg(long, value_name = "TYPE", default_value = "float32")]
    pub dtype: String,

    /// Output path prefix (default: derived from the input raster)
    #[arg(short, long, value_name = "FILE")]
    pub outfile: Option<PathBuf>,

    /// Replace existing output files
    #[arg(long)]
    pub overwrite: bool,

    /// Override nodata value (default: read from input)
    #[arg(long, value_name = "VALUE")]
    pub nodata: Option<f64>,

    /// Hold the input raster in a memory-mapped file instead of RAM
    #[arg(long)]
    pub disc_cache: bool,

    /// Directory for disc cache files (default: system temp dir)
    #[arg(long, value_name = "DIR", env = "MOVING_WINDOWS_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeArg {
    Circle,
    Square,
}

impl From<ShapeArg> for WindowShape {
    fn from(shape: ShapeArg) -> Self {
        match shape {
            ShapeArg::Circle => WindowShape::Circle,
            ShapeArg::Square => WindowShape::Square,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let args = Args::try_parse_from([
            "moving-windows",
            "-r",
            "in.tif",
            "-f",
            "mean",
            "-w",
            "3,11",
            "-c",
            "crop=1,2;grass=3",
            "-s",
            "square",
            "--disc-cache",
            "-d",
        ])
        .unwrap();

        assert_eq!(args.raster, PathBuf::from("in.tif"));
        assert_eq!(args.window_sizes, vec![3, 11]);
        assert_eq!(args.reclass.as_deref(), Some("crop=1,2;grass=3"));
        assert_eq!(args.shape, ShapeArg::Square);
        assert_eq!(args.dtype, "float32");
        assert!(args.disc_cache);
        assert!(args.debug);
        assert!(!args.overwrite);
    }

    #[test]
    fn test_missing_window_sizes_is_an_error() {
        let result = Args::try_parse_from(["moving-windows", "-r", "in.tif", "-f", "sum"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_raster_is_an_error() {
        let result = Args::try_parse_from(["moving-windows", "-f", "sum", "-w", "3"]);
        assert!(result.is_err());
    }
}
