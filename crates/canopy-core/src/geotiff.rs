//! Minimal GeoTIFF codec for 8-bit rasters (1, 3 or 4 samples per pixel).
//!
//! Georeferencing lives in ModelPixelScale + ModelTiepoint; the coordinate
//! system goes into the GeoKey directory (ProjectedCSTypeGeoKey when the
//! code fits in 16 bits) and always into an ASCII `WKID:<code>|` citation,
//! since Esri WKIDs such as 102039 do not fit a GeoKey short.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Seek, Write};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{CanopyError, Result};
use crate::grid::Crs;
use crate::raster::{Raster, RasterMeta};

const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

const GT_MODEL_TYPE_KEY: u16 = 1024;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;
const PCS_CITATION_KEY: u16 = 3073;
const MODEL_TYPE_PROJECTED: u16 = 1;

fn tag(code: u16) -> Tag {
    Tag::from_u16_exhaustive(code)
}

// ── Reading ──────────────────────────────────────────────────────────────────

fn open(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| CanopyError::io(path, e))?;
    Decoder::new(BufReader::new(file))
        .map(|d| d.with_limits(Limits::unlimited()))
        .map_err(|e| CanopyError::tiff(path, e))
}

fn read_meta_from(decoder: &mut Decoder<BufReader<File>>, path: &Path) -> Result<RasterMeta> {
    let err = |e| CanopyError::tiff(path, e);
    let (width, height) = decoder.dimensions().map_err(err)?;
    let bands = match decoder.colortype().map_err(err)? {
        ColorType::Gray(8) => 1,
        ColorType::RGB(8) => 3,
        ColorType::RGBA(8) => 4,
        other => return Err(CanopyError::unsupported(path, format!("pixel type {other:?}"))),
    };

    let scale = decoder
        .find_tag(tag(MODEL_PIXEL_SCALE))
        .map_err(err)?
        .map(|v| v.into_f64_vec())
        .transpose()
        .map_err(err)?;
    let tiepoint = decoder
        .find_tag(tag(MODEL_TIEPOINT))
        .map_err(err)?
        .map(|v| v.into_f64_vec())
        .transpose()
        .map_err(err)?;
    let (Some(scale), Some(tiepoint)) = (scale, tiepoint) else {
        return Err(CanopyError::unsupported(path, "missing georeferencing tags"));
    };
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(CanopyError::unsupported(path, "malformed georeferencing tags"));
    }
    let (cell_width, cell_height) = (scale[0], scale[1]);
    let xmin = tiepoint[3] - tiepoint[0] * cell_width;
    let ymax = tiepoint[4] + tiepoint[1] * cell_height;

    let keys = decoder
        .find_tag(tag(GEO_KEY_DIRECTORY))
        .map_err(err)?
        .map(|v| v.into_u16_vec())
        .transpose()
        .map_err(err)?
        .unwrap_or_default();
    let citation = decoder
        .find_tag(tag(GEO_ASCII_PARAMS))
        .map_err(err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(err)?;
    let crs = crs_from_keys(&keys).or_else(|| citation.as_deref().and_then(crs_from_citation));

    let nodata = decoder
        .find_tag(tag(GDAL_NODATA))
        .map_err(err)?
        .map(|v| v.into_string())
        .transpose()
        .map_err(err)?
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<u8>().ok());

    Ok(RasterMeta {
        width: width as usize,
        height: height as usize,
        bands,
        xmin,
        ymax,
        cell_width,
        cell_height,
        crs,
        nodata,
    })
}

/// Read only the georeferencing of a GeoTIFF.
pub fn read_meta(path: &Path) -> Result<RasterMeta> {
    let mut decoder = open(path)?;
    read_meta_from(&mut decoder, path)
}

pub fn read(path: &Path) -> Result<Raster> {
    let mut decoder = open(path)?;
    let meta = read_meta_from(&mut decoder, path)?;
    let data = match decoder.read_image().map_err(|e| CanopyError::tiff(path, e))? {
        DecodingResult::U8(v) => v,
        _ => return Err(CanopyError::unsupported(path, "expected 8-bit samples")),
    };
    if data.len() != meta.width * meta.height * meta.bands {
        return Err(CanopyError::unsupported(path, "sample count does not match dimensions"));
    }
    Ok(Raster { meta, data })
}

fn crs_from_keys(keys: &[u16]) -> Option<Crs> {
    // Header is four shorts; each key entry is (id, location, count, value).
    keys.get(4..)?
        .chunks_exact(4)
        .find(|k| k[0] == PROJECTED_CS_TYPE_KEY && k[1] == 0)
        .map(|k| Crs(u32::from(k[3])))
}

fn crs_from_citation(citation: &str) -> Option<Crs> {
    let rest = &citation[citation.find("WKID:")? + 5..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok().map(Crs)
}

// ── Writing ──────────────────────────────────────────────────────────────────

fn geo_keys(crs: Crs, citation_len: usize) -> Vec<u16> {
    let mut entries = vec![
        [GT_MODEL_TYPE_KEY, 0, 1, MODEL_TYPE_PROJECTED],
        [PCS_CITATION_KEY, GEO_ASCII_PARAMS, citation_len as u16, 0],
    ];
    if let Ok(code) = u16::try_from(crs.0) {
        entries.push([PROJECTED_CS_TYPE_KEY, 0, 1, code]);
    }
    // Keys must be sorted by id.
    entries.sort_by_key(|e| e[0]);
    let mut keys = vec![1, 1, 0, entries.len() as u16];
    keys.extend(entries.into_iter().flatten());
    keys
}

fn write_image<C, W>(encoder: &mut TiffEncoder<W>, raster: &Raster) -> tiff::TiffResult<()>
where
    C: colortype::ColorType<Inner = u8>,
    W: Write + Seek,
{
    let m = &raster.meta;
    let mut image = encoder.new_image::<C>(m.width as u32, m.height as u32)?;
    let dir = image.encoder();
    dir.write_tag(tag(MODEL_PIXEL_SCALE), &[m.cell_width, m.cell_height, 0.0][..])?;
    dir.write_tag(tag(MODEL_TIEPOINT), &[0.0, 0.0, 0.0, m.xmin, m.ymax, 0.0][..])?;
    if let Some(crs) = m.crs {
        let citation = format!("{crs}|");
        dir.write_tag(tag(GEO_KEY_DIRECTORY), &geo_keys(crs, citation.len())[..])?;
        dir.write_tag(tag(GEO_ASCII_PARAMS), citation.as_str())?;
    }
    if let Some(nd) = m.nodata {
        dir.write_tag(tag(GDAL_NODATA), nd.to_string().as_str())?;
    }
    image.write_data(&raster.data)
}

/// Encode `raster` as GeoTIFF bytes. `path` only names the destination in
/// errors.
pub fn encode(raster: &Raster, path: &Path) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf).map_err(|e| CanopyError::tiff(path, e))?;
        let result = match raster.meta.bands {
            1 => write_image::<colortype::Gray8, _>(&mut encoder, raster),
            3 => write_image::<colortype::RGB8, _>(&mut encoder, raster),
            4 => write_image::<colortype::RGBA8, _>(&mut encoder, raster),
            n => return Err(CanopyError::unsupported(path, format!("{n} bands"))),
        };
        result.map_err(|e| CanopyError::tiff(path, e))?;
    }
    Ok(buf.into_inner())
}

/// Encode `raster` to `path`. Callers that need atomicity go through
/// [`crate::status::write_atomic`] with [`encode`] instead.
pub fn write(raster: &Raster, path: &Path) -> Result<()> {
    let bytes = encode(raster, path)?;
    fs::write(path, bytes).map_err(|e| CanopyError::io(path, e))
}
