//! GeoTIFF reading and writing.
//!
//! The GeoKey directory and its parameter tags are carried verbatim, so a
//! CRS read from a file is written back unchanged. No-data travels in the
//! GDAL no-data tag.

use crate::dtype::{dispatch_element, DataType, Element};
use crate::error::{MovingWindowError, Result};
use bytemuck::cast_slice;
use log::{debug, info, warn};
use ndarray::{Array3, ArrayView3};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use tiff::decoder::{ifd::Value, Decoder, DecodingResult, Limits};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind};
use tiff::tags::Tag;
use tiff::TiffResult;

/// Affine pixel-to-map transform in GDAL order:
/// origin-x, pixel-width, x-skew, origin-y, y-skew, pixel-height.
/// The origin is the outer corner of the first cell.
pub type GeoTransform = [f64; 6];

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const MODEL_TRANSFORMATION: u16 = 34264;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GT_CITATION_GEO_KEY: u16 = 1026;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const USER_DEFINED: u16 = 32767;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// The raw GeoKey directory plus the parameter tags its keys point into.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoKeys {
    pub directory: Vec<u16>,
    pub doubles: Option<Vec<f64>>,
    pub ascii: Option<String>,
}

impl GeoKeys {
    /// A user-defined model carrying `projection` as its citation.
    pub fn user_defined(projection: Option<&str>) -> Self {
        let ascii = projection.map(|p| format!("{}|", p));

        let mut directory: Vec<u16> = vec![1, 1, 0, 0];
        directory.extend_from_slice(&[GT_MODEL_TYPE_GEO_KEY, 0, 1, USER_DEFINED]);
        directory.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
        if let Some(citation) = &ascii {
            let count = u16::try_from(citation.len()).unwrap_or(u16::MAX);
            directory.extend_from_slice(&[GT_CITATION_GEO_KEY, GEO_ASCII_PARAMS, count, 0]);
        }
        directory[3] = ((directory.len() - 4) / 4) as u16;

        Self {
            directory,
            doubles: None,
            ascii,
        }
    }

    /// Value of a key stored inline in the directory.
    pub fn get(&self, key: u16) -> Option<u16> {
        self.directory
            .get(4..)?
            .chunks_exact(4)
            .find(|entry| entry[0] == key && entry[1] == 0)
            .map(|entry| entry[3])
    }

    pub fn is_pixel_is_point(&self) -> bool {
        self.get(GT_RASTER_TYPE_GEO_KEY) == Some(RASTER_PIXEL_IS_POINT)
    }

    /// EPSG code of the projected or geographic CRS, if one is keyed.
    pub fn epsg(&self) -> Option<u16> {
        [PROJECTED_CS_TYPE_GEO_KEY, GEOGRAPHIC_TYPE_GEO_KEY]
            .iter()
            .filter_map(|&key| self.get(key))
            .find(|&code| code != 0 && code != USER_DEFINED)
    }

    /// The citation text, or `EPSG:<code>` when there is none.
    pub fn projection(&self) -> Option<String> {
        let citation = self
            .ascii
            .as_deref()
            .map(|s| s.trim_end_matches(['\0', '|']).to_string())
            .filter(|s| !s.is_empty());
        citation.or_else(|| self.epsg().map(|code| format!("EPSG:{}", code)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub data_type: DataType,
    pub geotransform: Option<GeoTransform>,
    pub projection: Option<String>,
    /// Written verbatim when set; otherwise built from `projection`.
    pub geo_keys: Option<GeoKeys>,
    pub nodata: Option<f64>,
}

impl RasterMetadata {
    pub fn pixel_width(&self) -> Option<f64> {
        self.geotransform.map(|gt| gt[1].abs())
    }

    pub fn pixel_height(&self) -> Option<f64> {
        self.geotransform.map(|gt| gt[5].abs())
    }
}

fn geo_tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// Move the origin between the corner and the centre of the first cell.
fn shift_half_pixel(gt: GeoTransform, sign: f64) -> GeoTransform {
    [
        gt[0] + sign * 0.5 * (gt[1] + gt[2]),
        gt[1],
        gt[2],
        gt[3] + sign * 0.5 * (gt[4] + gt[5]),
        gt[4],
        gt[5],
    ]
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| MovingWindowError::format(path, e))?
        .with_limits(Limits::unlimited());
    Ok(decoder)
}

/// Read raster dimensions and georeferencing without decoding cells.
pub fn read_metadata(path: &Path) -> Result<RasterMetadata> {
    let mut decoder = open_decoder(path)?;
    read_header(&mut decoder, path)
}

/// Read a raster and its metadata. Cells come back as `(rows, cols, bands)`.
pub fn read_raster(path: &Path) -> Result<(Array3<f64>, RasterMetadata)> {
    info!("Reading raster: {}", path.display());
    let mut decoder = open_decoder(path)?;
    let mut metadata = read_header(&mut decoder, path)?;

    let image = decoder
        .read_image()
        .map_err(|e| MovingWindowError::format(path, e))?;
    let (values, data_type): (Vec<f64>, DataType) = match image {
        DecodingResult::U8(v) => (widen(v), DataType::UInt8),
        DecodingResult::I8(v) => (widen(v), DataType::Int8),
        DecodingResult::U16(v) => (widen(v), DataType::UInt16),
        DecodingResult::I16(v) => (widen(v), DataType::Int16),
        DecodingResult::U32(v) => (widen(v), DataType::UInt32),
        DecodingResult::I32(v) => (widen(v), DataType::Int32),
        DecodingResult::F32(v) => (widen(v), DataType::Float32),
        DecodingResult::F64(v) => (v, DataType::Float64),
        _ => {
            return Err(MovingWindowError::format(
                path,
                "unsupported sample type (64-bit integer or half float)",
            ))
        }
    };
    metadata.data_type = data_type;

    let expected = metadata.height * metadata.width * metadata.bands;
    if values.len() != expected {
        return Err(MovingWindowError::format(
            path,
            format!("decoded {} samples, expected {}", values.len(), expected),
        ));
    }

    debug!(
        "Raster {}: {}x{} x{} bands, {}",
        path.display(),
        metadata.width,
        metadata.height,
        metadata.bands,
        metadata.data_type
    );

    let cells = Array3::from_shape_vec((metadata.height, metadata.width, metadata.bands), values)?;
    Ok((cells, metadata))
}

fn widen<T: Element>(values: Vec<T>) -> Vec<f64> {
    values.into_iter().map(Element::to_f64).collect()
}

fn read_header<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<RasterMetadata> {
    let format_err = |e: tiff::TiffError| MovingWindowError::format(path, e);

    let (width, height) = decoder.dimensions().map_err(format_err)?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err(MovingWindowError::InvalidDimensions(width, height));
    }

    let bands = first_u16(decoder, Tag::SamplesPerPixel).map_err(format_err)?.unwrap_or(1) as usize;
    let bits = first_u16(decoder, Tag::BitsPerSample).map_err(format_err)?.unwrap_or(1);
    let sample_format = first_u16(decoder, Tag::SampleFormat).map_err(format_err)?.unwrap_or(1);
    let data_type = match (sample_format, bits) {
        (1, 8) => DataType::UInt8,
        (2, 8) => DataType::Int8,
        (1, 16) => DataType::UInt16,
        (2, 16) => DataType::Int16,
        (1, 32) => DataType::UInt32,
        (2, 32) => DataType::Int32,
        (3, 32) => DataType::Float32,
        (3, 64) => DataType::Float64,
        (format, bits) => {
            return Err(MovingWindowError::format(
                path,
                format!("unsupported sample layout (format {}, {} bits)", format, bits),
            ))
        }
    };

    let geo_keys = read_geo_keys(decoder).map_err(format_err)?;
    let pixel_is_point = geo_keys.as_ref().map_or(false, GeoKeys::is_pixel_is_point);
    // GDAL reports point-registered origins at the cell corner
    let geotransform = read_geotransform(decoder)
        .map_err(format_err)?
        .map(|gt| if pixel_is_point { shift_half_pixel(gt, -1.0) } else { gt });
    let projection = geo_keys.as_ref().and_then(GeoKeys::projection);

    let nodata = match find_ascii(decoder, GDAL_NODATA).map_err(format_err)? {
        Some(text) => {
            let text = text.trim_end_matches('\0').trim();
            match text.parse::<f64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring unparseable no-data value {:?} in {}", text, path.display());
                    None
                }
            }
        }
        None => None,
    };

    Ok(RasterMetadata {
        width,
        height,
        bands,
        data_type,
        geotransform,
        projection,
        geo_keys,
        nodata,
    })
}

// Single-count tags may decode as scalars rather than one-element lists.
fn u16_values(value: Value) -> TiffResult<Vec<u16>> {
    match value {
        Value::List(values) => values.into_iter().map(Value::into_u16).collect(),
        scalar => Ok(vec![scalar.into_u16()?]),
    }
}

fn f64_values(value: Value) -> TiffResult<Vec<f64>> {
    match value {
        Value::List(values) => values.into_iter().map(Value::into_f64).collect(),
        scalar => Ok(vec![scalar.into_f64()?]),
    }
}

fn first_u16<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> TiffResult<Option<u16>> {
    Ok(decoder
        .find_tag(tag)?
        .map(u16_values)
        .transpose()?
        .and_then(|v| v.first().copied()))
}

fn find_f64s<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> TiffResult<Option<Vec<f64>>> {
    decoder.find_tag(geo_tag(code))?.map(f64_values).transpose()
}

fn find_ascii<R: Read + Seek>(decoder: &mut Decoder<R>, code: u16) -> TiffResult<Option<String>> {
    decoder
        .find_tag(geo_tag(code))?
        .map(|v| v.into_string())
        .transpose()
}

fn read_geo_keys<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Option<GeoKeys>> {
    let Some(directory) = decoder
        .find_tag(geo_tag(GEO_KEY_DIRECTORY))?
        .map(u16_values)
        .transpose()?
    else {
        return Ok(None);
    };
    let doubles = find_f64s(decoder, GEO_DOUBLE_PARAMS)?;
    let ascii = find_ascii(decoder, GEO_ASCII_PARAMS)?.map(|s| s.trim_end_matches('\0').to_string());
    Ok(Some(GeoKeys {
        directory,
        doubles,
        ascii,
    }))
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Option<GeoTransform>> {
    if let Some(m) = find_f64s(decoder, MODEL_TRANSFORMATION)? {
        if m.len() >= 8 {
            return Ok(Some([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let scale = find_f64s(decoder, MODEL_PIXEL_SCALE)?;
    let tiepoint = find_f64s(decoder, MODEL_TIEPOINT)?;
    Ok(match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => Some([
            t[3] - t[0] * s[0],
            s[0],
            0.0,
            t[4] + t[1] * s[1],
            0.0,
            -s[1],
        ]),
        _ => None,
    })
}

/// Write `cells` (`(rows, cols, bands)`) as a GeoTIFF, casting every value
/// into `metadata.data_type`. An existing file at `path` is replaced.
pub fn write_raster(path: &Path, cells: ArrayView3<'_, f64>, metadata: &RasterMetadata) -> Result<()> {
    let (height, width, bands) = cells.dim();
    if width == 0 || height == 0 || bands == 0 {
        return Err(MovingWindowError::InvalidDimensions(width, height));
    }

    let bytes: Vec<u8> = dispatch_element!(metadata.data_type, T => {
        let samples: Vec<T> = cells.iter().map(|&v| T::from_f64(v)).collect();
        Ok(cast_slice::<T, u8>(&samples).to_vec())
    })?;

    info!("Writing raster: {}", path.display());

    let writer = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(writer)?;
    write_image(&mut encoder, width, height, bands, &bytes, metadata)?;

    debug!(
        "Wrote {}x{} x{} bands ({}) to {}",
        width,
        height,
        bands,
        metadata.data_type,
        path.display()
    );
    Ok(())
}

fn write_image<W: Write + Seek>(
    encoder: &mut TiffEncoder<W>,
    width: usize,
    height: usize,
    bands: usize,
    bytes: &[u8],
    metadata: &RasterMetadata,
) -> Result<()> {
    let too_large = || {
        MovingWindowError::InvalidInput(format!(
            "raster of {}x{} x{} bands is too large for a classic TIFF",
            width, height, bands
        ))
    };
    let width = u32::try_from(width).map_err(|_| too_large())?;
    let height = u32::try_from(height).map_err(|_| too_large())?;
    let samples = u16::try_from(bands).map_err(|_| too_large())?;
    let byte_count = u32::try_from(bytes.len()).map_err(|_| too_large())?;

    let bits = (metadata.data_type.size_of() * 8) as u16;
    let sample_format: u16 = if metadata.data_type.is_float() {
        3
    } else if metadata.data_type.is_unsigned() {
        1
    } else {
        2
    };

    let mut dir = encoder.image_directory()?;
    dir.write_tag(Tag::ImageWidth, width)?;
    dir.write_tag(Tag::ImageLength, height)?;
    dir.write_tag(Tag::BitsPerSample, vec![bits; bands].as_slice())?;
    dir.write_tag(Tag::Compression, 1u16)?;
    // BlackIsZero
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, samples)?;
    dir.write_tag(Tag::SampleFormat, vec![sample_format; bands].as_slice())?;
    // chunky: samples interleaved per pixel, matching (rows, cols, bands)
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::RowsPerStrip, height)?;
    if bands > 1 {
        dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
    }

    write_geo_tags(&mut dir, metadata)?;

    let offset = dir.write_data(bytes)?;
    let offset = u32::try_from(offset).map_err(|_| too_large())?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, byte_count)?;
    dir.finish()?;
    Ok(())
}

fn write_geo_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    metadata: &RasterMetadata,
) -> Result<()> {
    let keys = match &metadata.geo_keys {
        Some(keys) => keys.clone(),
        None => GeoKeys::user_defined(metadata.projection.as_deref()),
    };

    if let Some(gt) = metadata.geotransform {
        let gt = if keys.is_pixel_is_point() {
            shift_half_pixel(gt, 1.0)
        } else {
            gt
        };
        let north_up = gt[2] == 0.0 && gt[4] == 0.0 && gt[5] < 0.0;
        if north_up {
            let scale = [gt[1], -gt[5], 0.0];
            let tiepoint = [0.0, 0.0, 0.0, gt[0], gt[3], 0.0];
            dir.write_tag(geo_tag(MODEL_PIXEL_SCALE), scale.as_slice())?;
            dir.write_tag(geo_tag(MODEL_TIEPOINT), tiepoint.as_slice())?;
        } else {
            let transformation = [
                gt[1], gt[2], 0.0, gt[0], //
                gt[4], gt[5], 0.0, gt[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(geo_tag(MODEL_TRANSFORMATION), transformation.as_slice())?;
        }
    }

    dir.write_tag(geo_tag(GEO_KEY_DIRECTORY), keys.directory.as_slice())?;
    if let Some(doubles) = &keys.doubles {
        dir.write_tag(geo_tag(GEO_DOUBLE_PARAMS), doubles.as_slice())?;
    }
    if let Some(ascii) = &keys.ascii {
        dir.write_tag(geo_tag(GEO_ASCII_PARAMS), ascii.as_str())?;
    }
    if let Some(nodata) = metadata.nodata {
        dir.write_tag(geo_tag(GDAL_NODATA), nodata.to_string().as_str())?;
    }
    Ok(())
}
