//! Minimal single-band float32 GeoTIFF encoding and decoding.
//!
//! Georeferencing is carried in the GeoTIFF tags:
//!
//! | tag | code | content |
//! |---|---|---|
//! | ModelPixelScale | 33550 | `[dx, dy, 0]` |
//! | ModelTiepoint | 33922 | raster `(0, 0)` at the transform origin |
//! | GeoKeyDirectory | 34735 | geographic model, PixelIsArea, EPSG code |
//! | GeoAsciiParams | 34737 | PROJ string citation |
//! | GDAL_NODATA | 42113 | nodata sentinel as text |

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek};
use std::path::Path;

use grid_common::{CrsCode, RasterTransform};
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype::Gray32Float, TiffEncoder};
use tiff::tags::Tag;

use crate::error::{RasterError, RasterResult};
use crate::tile::RasterTile;

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

// GeoKey ids and values
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const GEOG_CITATION: u16 = 2049;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

/// A decoded GeoTIFF band.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoRaster {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
    pub transform: RasterTransform,
    pub nodata: Option<f32>,
    pub epsg: Option<u16>,
}

impl GeoRaster {
    pub fn crs(&self) -> Option<CrsCode> {
        self.epsg.and_then(CrsCode::from_epsg)
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }
}

#[rustfmt::skip]
fn geo_key_directory(crs: CrsCode, citation_len: usize) -> Vec<u16> {
    vec![
        // version, revision, minor revision, number of keys
        1, 1, 0, 4,
        GT_MODEL_TYPE, 0, 1, MODEL_TYPE_GEOGRAPHIC,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        GEOGRAPHIC_TYPE, 0, 1, crs.epsg(),
        GEOG_CITATION, GEO_ASCII_PARAMS, citation_len as u16, 0,
    ]
}

/// Encode `tile` as an uncompressed GeoTIFF in memory.
pub fn encode_geotiff(tile: &RasterTile) -> RasterResult<Vec<u8>> {
    let t = &tile.transform;
    let scale = [t.pixel_width, -t.pixel_height, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0];
    let citation = format!("{}|", tile.crs.proj_string());
    let keys = geo_key_directory(tile.crs, citation.len());
    let nodata = tile.nodata.to_string();

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        let mut image = encoder.new_image::<Gray32Float>(tile.cols as u32, tile.rows as u32)?;
        let dir = image.encoder();
        dir.write_tag(tag(MODEL_PIXEL_SCALE), &scale[..])?;
        dir.write_tag(tag(MODEL_TIEPOINT), &tiepoint[..])?;
        dir.write_tag(tag(GEO_KEY_DIRECTORY), &keys[..])?;
        dir.write_tag(tag(GEO_ASCII_PARAMS), citation.as_str())?;
        dir.write_tag(tag(GDAL_NODATA), nodata.as_str())?;
        image.write_data(&tile.data)?;
    }
    Ok(cursor.into_inner())
}

/// Decode a single-band float32 GeoTIFF.
pub fn decode_geotiff<R: Read + Seek>(reader: R) -> RasterResult<GeoRaster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;

    let scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE))?;
    let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(RasterError::Georeference(format!(
            "pixel scale {:?} / tiepoint {:?}",
            scale, tiepoint
        )));
    }
    // Tiepoint raster position (i, j) maps to model (x, y).
    let west = tiepoint[3] - tiepoint[0] * scale[0];
    let north = tiepoint[4] + tiepoint[1] * scale[1];
    let transform = RasterTransform::from_origin(west, north, scale[0], scale[1]);

    let epsg = match decoder.find_tag(tag(GEO_KEY_DIRECTORY))? {
        Some(value) => epsg_from_keys(&value.into_u16_vec()?),
        None => None,
    };
    let nodata = match decoder.find_tag(tag(GDAL_NODATA))? {
        Some(value) => {
            let text = value.into_string()?;
            let parsed = text.trim().trim_end_matches('\0').parse::<f32>().map_err(|_| {
                RasterError::Georeference(format!("unparseable nodata '{}'", text))
            })?;
            Some(parsed)
        }
        None => None,
    };

    let data = match decoder.read_image()? {
        DecodingResult::F32(values) => values,
        _ => {
            return Err(RasterError::Georeference(
                "expected float32 samples".to_string(),
            ))
        }
    };

    Ok(GeoRaster {
        width: width as usize,
        height: height as usize,
        data,
        transform,
        nodata,
        epsg,
    })
}

fn epsg_from_keys(keys: &[u16]) -> Option<u16> {
    let count = *keys.get(3)? as usize;
    keys.get(4..4 + count * 4)?
        .chunks_exact(4)
        .find(|entry| entry[0] == GEOGRAPHIC_TYPE && entry[1] == 0)
        .map(|entry| entry[3])
}

/// Read a GeoTIFF file from disk.
pub fn read_geotiff(path: &Path) -> RasterResult<GeoRaster> {
    let file = File::open(path).map_err(|e| RasterError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    decode_geotiff(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(data: Vec<f32>) -> RasterTile {
        RasterTile::new(
            2,
            2,
            data,
            RasterTransform::from_origin(100.0, 10.0, 1.0, 1.0),
            -999.0,
            CrsCode::Epsg4326,
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_bits() {
        let data = vec![0.1, -999.0, 3.402_823_5e38, -0.0];
        let bytes = encode_geotiff(&tile(data.clone())).unwrap();
        let back = decode_geotiff(Cursor::new(bytes)).unwrap();

        assert_eq!((back.width, back.height), (2, 2));
        let bits: Vec<u32> = back.data.iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u32> = data.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
        assert_eq!(back.nodata.map(f32::to_bits), Some((-999.0f32).to_bits()));
        assert_eq!(back.crs(), Some(CrsCode::Epsg4326));
        assert_eq!(back.transform, RasterTransform::from_origin(100.0, 10.0, 1.0, 1.0));
    }

    #[test]
    fn test_epsg_from_keys() {
        let keys = geo_key_directory(CrsCode::Epsg4269, 10);
        assert_eq!(epsg_from_keys(&keys), Some(4269));
        assert_eq!(epsg_from_keys(&keys[..6]), None);
    }

    #[test]
    fn test_not_a_tiff() {
        assert!(decode_geotiff(Cursor::new(b"GIF89a".to_vec())).is_err());
    }
}
