use crate::cli::Args;
use crate::dtype::DataType;
use crate::error::{MovingWindowError, Result};
use crate::focal::{FilterSource, MovingWindow, Window};
use crate::footprint::WindowShape;
use crate::raster::{Raster, RasterOptions};
use crate::reclass::MatchSet;
use crate::reducer::Reducer;
use log::info;
use std::path::{Path, PathBuf};

/// A labelled match set, e.g. `row_crop=1,2`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReclassClass {
    pub label: String,
    pub matches: MatchSet,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub raster_path: PathBuf,
    pub reducer: Reducer,
    pub window_sizes: Vec<usize>,
    pub reclass: Vec<ReclassClass>,
    pub shape: WindowShape,
    pub data_type: DataType,
    pub output_prefix: String,
    pub overwrite: bool,
    pub raster_options: RasterOptions,
}

impl RunConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let reducer = Reducer::from_name(&args.fun)?;
        let data_type: DataType = args.dtype.parse()?;
        validate_window_sizes(&args.window_sizes)?;
        let reclass = match &args.reclass {
            Some(spec) => parse_reclass(spec)?,
            None => Vec::new(),
        };

        Ok(Self {
            raster_path: args.raster.clone(),
            reducer,
            window_sizes: args.window_sizes.clone(),
            reclass,
            shape: args.shape.into(),
            data_type,
            output_prefix: output_prefix(args.outfile.as_deref(), &args.raster),
            overwrite: args.overwrite,
            raster_options: RasterOptions {
                data_type: None,
                no_data: args.nodata,
                disc_cache: args.disc_cache,
                cache_dir: args.cache_dir.clone(),
            },
        })
    }
}

fn validate_window_sizes(sizes: &[usize]) -> Result<()> {
    if sizes.is_empty() {
        return Err(MovingWindowError::InvalidInput(
            "at least one window size is required".to_string(),
        ));
    }
    match sizes.iter().find(|&&s| s == 0) {
        Some(&size) => Err(MovingWindowError::InvalidWindowSize(size)),
        None => Ok(()),
    }
}

/// Parse `label=v1,v2;label2=v3`. Class order is preserved.
pub fn parse_reclass(spec: &str) -> Result<Vec<ReclassClass>> {
    let classes = spec
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (label, values) = entry.split_once('=').ok_or_else(|| {
                MovingWindowError::InvalidInput(format!(
                    "reclass entry {:?} is not of the form label=v1,v2",
                    entry
                ))
            })?;
            let label = label.trim();
            if label.is_empty() {
                return Err(MovingWindowError::InvalidInput(format!(
                    "reclass entry {:?} has no label",
                    entry
                )));
            }
            Ok(ReclassClass {
                label: label.to_string(),
                matches: MatchSet::parse(values)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if classes.is_empty() {
        return Err(MovingWindowError::InvalidInput(
            "reclass specification lists no classes".to_string(),
        ));
    }
    Ok(classes)
}

/// `outfile` (or the raster path) without a trailing `.tif`/`.tiff`, plus
/// `_mw`.
pub fn output_prefix(outfile: Option<&Path>, raster: &Path) -> String {
    let base = outfile.unwrap_or(raster).to_string_lossy().into_owned();
    let lowered = base.to_lowercase();
    let stem = [".tiff", ".tif"]
        .iter()
        .find(|ext| lowered.ends_with(*ext))
        .map_or(base.as_str(), |ext| &base[..base.len() - ext.len()]);
    format!("{}_mw", stem)
}

/// `<prefix>_<w>x<w>.tif`, or `<prefix>_<label>_<w>x<w>.tif` for a class.
pub fn output_path(prefix: &str, label: Option<&str>, window: &Window) -> PathBuf {
    match label {
        Some(label) => PathBuf::from(format!("{}_{}_{}.tif", prefix, label, window.label())),
        None => PathBuf::from(format!("{}_{}.tif", prefix, window.label())),
    }
}

/// Run the workflow and return the paths that were written.
pub fn run(config: &RunConfig) -> Result<Vec<PathBuf>> {
    let raster = Raster::open(&config.raster_path, &config.raster_options)?;
    let mut written = Vec::new();

    if config.reclass.is_empty() {
        filter_all(config, &raster, None, &mut written)?;
    } else {
        for class in &config.reclass {
            info!("Reclassifying {} as {:?}", class.label, class.matches.values());
            let mut binary = raster.try_clone()?;
            binary.reclassify(&class.matches, false)?;
            filter_all(config, &binary, Some(&class.label), &mut written)?;
            binary.close()?;
        }
    }

    raster.close()?;
    Ok(written)
}

fn filter_all(
    config: &RunConfig,
    raster: &Raster,
    label: Option<&str>,
    written: &mut Vec<PathBuf>,
) -> Result<()> {
    for &size in &config.window_sizes {
        let window = Window::Size(size);
        let path = output_path(&config.output_prefix, label, &window);
        let request = MovingWindow::new(config.reducer.clone(), window)
            .with_shape(config.shape)
            .with_data_type(config.data_type)
            .with_output(&path, config.overwrite);

        let output = request.apply(FilterSource::Raster(raster))?;
        if output.written() {
            written.push(path);
        }
        if let Some(result) = output.into_raster() {
            result.close()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use ndarray::arr2;

    #[test]
    fn test_parse_reclass_keeps_order() {
        let classes = parse_reclass("row_crop=1,2; grass = 3 ;").unwrap();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].label, "row_crop");
        assert_eq!(classes[0].matches.values(), &[1.0, 2.0]);
        assert_eq!(classes[1].label, "grass");
    }

    #[test]
    fn test_parse_reclass_errors() {
        assert!(parse_reclass("crop").is_err());
        assert!(parse_reclass("=1,2").is_err());
        assert!(parse_reclass("crop=").is_err());
        assert!(parse_reclass(";").is_err());
    }

    #[test]
    fn test_output_prefix() {
        assert_eq!(output_prefix(None, Path::new("data/lc.tif")), "data/lc_mw");
        assert_eq!(output_prefix(None, Path::new("data/lc.TIFF")), "data/lc_mw");
        assert_eq!(
            output_prefix(Some(Path::new("out/result")), Path::new("lc.tif")),
            "out/result_mw"
        );
    }

    #[test]
    fn test_output_path() {
        let window = Window::Size(11);
        assert_eq!(output_path("a_mw", None, &window), PathBuf::from("a_mw_11x11.tif"));
        assert_eq!(
            output_path("a_mw", Some("crop"), &window),
            PathBuf::from("a_mw_crop_11x11.tif")
        );
    }

    #[test]
    fn test_config_rejects_unknown_reducer() {
        let args = Args::try_parse_from(["mw", "-r", "in.tif", "-f", "percentile", "-w", "3"]).unwrap();
        assert!(matches!(
            RunConfig::from_args(&args),
            Err(MovingWindowError::UnknownReducer(_))
        ));
    }

    #[test]
    fn test_config_rejects_zero_window() {
        let args = Args::try_parse_from(["mw", "-r", "in.tif", "-f", "sum", "-w", "3,0"]).unwrap();
        assert!(matches!(
            RunConfig::from_args(&args),
            Err(MovingWindowError::InvalidWindowSize(0))
        ));
    }

    #[test]
    fn test_run_writes_one_file_per_class_and_window() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("lc.tif");
        Raster::from_band(arr2(&[
            [1.0, 1.0, 2.0, 2.0],
            [1.0, 1.0, 2.0, 2.0],
            [3.0, 3.0, 4.0, 4.0],
            [3.0, 3.0, 4.0, 4.0],
        ]))
        .with_data_type(DataType::UInt8)
        .unwrap()
        .with_geotransform([0.0, 30.0, 0.0, 120.0, 0.0, -30.0])
        .write(&input, false)
        .unwrap();

        let args = Args::try_parse_from([
            "mw",
            "-r",
            input.to_str().unwrap(),
            "-f",
            "sum",
            "-w",
            "1,2",
            "-c",
            "low=1,2;high=4",
            "--disc-cache",
            "--cache-dir",
            dir.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = RunConfig::from_args(&args).unwrap();
        let written = run(&config).unwrap();

        let prefix = dir.path().join("lc_mw").to_string_lossy().into_owned();
        let expected: Vec<PathBuf> = ["low_1x1", "low_2x2", "high_1x1", "high_2x2"]
            .iter()
            .map(|suffix| PathBuf::from(format!("{}_{}.tif", prefix, suffix)))
            .collect();
        assert_eq!(written, expected);

        let low = Raster::open(&expected[0], &RasterOptions::default()).unwrap();
        assert_eq!(low.data_type(), DataType::Float32);
        // plus-shaped window at (1,1) over the top-half mask: 1+1+1+1+0
        assert_eq!(low.cells().unwrap()[[1, 1, 0]], 4.0);

        // only the inputs and outputs remain; disc caches are gone
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "dat"))
            .count();
        assert_eq!(leftovers, 0);

        // a second run without --overwrite writes nothing
        assert!(run(&config).unwrap().is_empty());
    }
}
