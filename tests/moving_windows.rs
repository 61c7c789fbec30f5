use moving_windows::{
    reclassify, DataType, DiscCache, FilterSource, Footprint, MatchSet, MovingWindow, Raster,
    RasterOptions, ReclassSource, Reducer, Window,
};
use moving_windows::io::read_metadata;
use ndarray::{arr2, Array2, Axis};
use std::fs::File;
use std::io::BufWriter;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

fn quadrants() -> Array2<f64> {
    arr2(&[
        [1.0, 1.0, 2.0, 2.0],
        [1.0, 1.0, 2.0, 2.0],
        [3.0, 3.0, 4.0, 4.0],
        [3.0, 3.0, 4.0, 4.0],
    ])
}

#[test]
fn reclassify_top_half() {
    let raster = Raster::from_band(quadrants());
    let matches = MatchSet::new([1.0, 2.0]).unwrap();
    let codes = reclassify(ReclassSource::Raster(&raster), &matches, false).unwrap();
    assert_eq!(
        codes.index_axis(Axis(2), 0),
        arr2(&[[1u8, 1, 1, 1], [1, 1, 1, 1], [0, 0, 0, 0], [0, 0, 0, 0]])
    );
}

#[test]
fn reclassify_binary_is_idempotent() {
    let binary = arr2(&[[1.0, 0.0, 1.0], [0.0, 0.0, 1.0]]);
    let raster = Raster::from_band(binary.clone());
    let matches = MatchSet::new([1.0]).unwrap();
    let codes = reclassify(ReclassSource::Raster(&raster), &matches, false).unwrap();
    assert_eq!(codes.index_axis(Axis(2), 0).mapv(f64::from), binary);
}

#[test]
fn circular_sum_at_interior_cell() {
    let raster = Raster::from_band(quadrants());
    let output = MovingWindow::new(Reducer::Sum, Window::Size(1))
        .apply(FilterSource::Raster(&raster))
        .unwrap();
    let cells = output.cells().unwrap();
    assert!((cells[[1, 1, 0]] - 8.0).abs() < 1e-9);
}

#[test]
fn sum_matches_brute_force_at_interior_and_edge() {
    let band = Array2::from_shape_fn((8, 8), |(r, c)| (r * 3 + c * 5 % 7) as f64);
    let footprint = Footprint::circular(2).unwrap();
    let output = MovingWindow::new(Reducer::Sum, Window::Footprint(footprint.clone()))
        .apply(FilterSource::Array(band.view()))
        .unwrap();
    let cells = output.cells().unwrap();

    let brute = |row: isize, col: isize| -> f64 {
        footprint
            .offsets()
            .iter()
            .map(|&(dy, dx)| {
                let (r, c) = (row + dy, col + dx);
                if r < 0 || c < 0 || r >= 8 || c >= 8 {
                    0.0
                } else {
                    band[[r as usize, c as usize]]
                }
            })
            .sum()
    };

    for (row, col) in [(4, 4), (0, 0), (0, 5), (7, 3)] {
        let expected = brute(row as isize, col as isize);
        assert!((cells[[row, col, 0]] - expected).abs() < 1e-9, "({row}, {col})");
    }
}

#[test]
fn small_input_keeps_its_shape() {
    let band = Array2::from_elem((3, 3), 1.0);
    let output = MovingWindow::new(Reducer::Mean, Window::Size(1))
        .apply(FilterSource::Array(band.view()))
        .unwrap();
    assert_eq!(output.cells().unwrap().dim(), (3, 3, 1));
}

#[test]
fn no_data_cell_contributes_zero() {
    let raster = Raster::from_band(arr2(&[
        [2.0, 2.0, 2.0],
        [2.0, 255.0, 2.0],
        [2.0, 2.0, 2.0],
    ]))
    .with_data_type(DataType::UInt8)
    .unwrap()
    .with_no_data(Some(255.0));

    let output = MovingWindow::new(Reducer::Sum, Window::Size(1))
        .apply(FilterSource::Raster(&raster))
        .unwrap();
    let cells = output.cells().unwrap();
    // (1,0): itself, up, down, right (masked) and the padded left neighbour
    assert_eq!(cells[[1, 0, 0]], 6.0);
}

#[test]
fn write_and_reopen_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("round_trip.tif");
    let original = Raster::from_band(arr2(&[[1.0, -32768.0, 3.0], [4.0, 5.0, -7.0]]))
        .with_data_type(DataType::Int16)
        .unwrap()
        .with_no_data(Some(-32768.0))
        .with_geotransform([1000.0, 10.0, 0.0, 2000.0, 0.0, -10.0])
        .with_projection("PROJCS[\"Albers\"]");
    assert!(original.write(&path, false).unwrap());

    let reopened = Raster::open(&path, &RasterOptions::default()).unwrap();
    assert_eq!(reopened.cells().unwrap(), original.cells().unwrap());
    assert_eq!(reopened.mask().unwrap(), original.mask().unwrap());
    assert_eq!(reopened.geotransform(), original.geotransform());
    assert_eq!(reopened.projection(), original.projection());
    assert_eq!(reopened.no_data(), original.no_data());
    assert_eq!(reopened.data_type(), DataType::Int16);
}

#[test]
fn disc_cache_release_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = DiscCache::create_in(dir.path(), &[16, 16], DataType::Float32, None).unwrap();
    let path = cache.path().to_path_buf();
    assert!(path.exists());

    cache.release().unwrap();
    assert!(!path.exists());
    cache.release().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn disc_cached_filtering_matches_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let band = Array2::from_shape_fn((10, 12), |(r, c)| ((r + 2 * c) % 9) as f64);
    let in_memory = Raster::from_band(band.clone());
    let on_disc = Raster::from_band(band).into_disc_cache(dir.path()).unwrap();

    let request = MovingWindow::new(Reducer::Median, Window::Size(2));
    let a = request.apply(FilterSource::Raster(&in_memory)).unwrap();
    let b = request.apply(FilterSource::Raster(&on_disc)).unwrap();
    assert_eq!(a.cells().unwrap(), b.cells().unwrap());

    let result = b.into_raster().unwrap();
    assert!(result.is_disc_cached());
    result.close().unwrap();
    on_disc.close().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn filtered_output_keeps_epsg_geo_keys() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("albers.tif");
    let directory: [u16; 16] = [
        1, 1, 0, 3, //
        1024, 0, 1, 1, //
        1025, 0, 1, 1, //
        3072, 0, 1, 5070,
    ];
    {
        let data: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let file = File::create(&input).unwrap();
        let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();
        let mut image = encoder.new_image::<colortype::Gray32Float>(5, 4).unwrap();
        let tags = image.encoder();
        tags.write_tag(Tag::GeoKeyDirectoryTag, directory.as_slice()).unwrap();
        tags.write_tag(Tag::ModelPixelScaleTag, [30.0, 30.0, 0.0].as_slice()).unwrap();
        tags.write_tag(
            Tag::ModelTiepointTag,
            [0.0, 0.0, 0.0, 1500000.0, 2100000.0, 0.0].as_slice(),
        )
        .unwrap();
        image.write_data(&data).unwrap();
    }

    let raster = Raster::open(&input, &RasterOptions::default()).unwrap();
    assert_eq!(raster.projection(), Some("EPSG:5070"));

    let output = dir.path().join("albers_mw_1x1.tif");
    let result = MovingWindow::new(Reducer::Mean, Window::Size(1))
        .with_output(&output, false)
        .apply(FilterSource::Raster(&raster))
        .unwrap();
    assert!(result.written());

    let written = read_metadata(&output).unwrap();
    let keys = written.geo_keys.unwrap();
    assert_eq!(keys.directory, directory.to_vec());
    assert_eq!(keys.epsg(), Some(5070));
    assert_eq!(written.projection.as_deref(), Some("EPSG:5070"));
    assert_eq!(
        written.geotransform,
        Some([1500000.0, 30.0, 0.0, 2100000.0, 0.0, -30.0])
    );
}
