//! File naming conventions shared by every stage.
//!
//! Tile outputs are the tile's file name behind a stage prefix
//! (`r` reprojected, `fr` final, `cfr` clipped final). Region outputs are
//! `<kind>_<year>_<Region_Name>.<ext>`.

use crate::status::Stage;

/// Acquisition metadata encoded in a NAIP quarter-quad file name such as
/// `m_3408504_nw_16_1_20090824`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// Seven-digit quadrangle id, e.g. `3408504`.
    pub quadrangle: String,
    /// `ne`, `nw`, `se` or `sw`.
    pub quadrant: String,
    pub utm_zone: u8,
    /// Resolution token as written (`1` for 1 m, `060` for 0.6 m).
    pub resolution: String,
    /// `YYYYMMDD`.
    pub date: String,
}

/// An imagery tile's canonical name, derived from the tile layer's file
/// name field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileName {
    stem: String,
}

impl TileName {
    /// Strips a `.tif` extension and a trailing publication date
    /// (`m_..._20090824_20091207.tif` → `m_..._20090824`).
    pub fn from_field(raw: &str) -> Self {
        let mut stem = raw.trim();
        for ext in [".tif", ".TIF", ".tiff"] {
            if let Some(s) = stem.strip_suffix(ext) {
                stem = s;
                break;
            }
        }
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() == 7 && is_date(parts[5]) && is_date(parts[6]) {
            stem = &stem[..stem.len() - 9];
        }
        Self { stem: stem.to_string() }
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Source imagery file name (`<stem>.tif`).
    pub fn file_name(&self) -> String {
        format!("{}.tif", self.stem)
    }

    /// File name this tile takes after `stage`.
    pub fn staged(&self, stage: Stage) -> String {
        format!("{}{}.tif", stage.prefix(), self.stem)
    }

    /// Name the external classifier gives its output for this tile, without
    /// extension (`r<stem>`).
    pub fn artifact_stem(&self) -> String {
        format!("{}{}", Stage::Reprojected.prefix(), self.stem)
    }

    pub fn acquisition(&self) -> Option<Acquisition> {
        let parts: Vec<&str> = self.stem.split('_').collect();
        let [_, quad, quadrant, zone, res, date] = parts.as_slice() else {
            return None;
        };
        if quad.len() != 7 || !quad.chars().all(|c| c.is_ascii_digit()) || !is_date(date) {
            return None;
        }
        Some(Acquisition {
            quadrangle: quad.to_string(),
            quadrant: quadrant.to_string(),
            utm_zone: zone.parse().ok()?,
            resolution: res.to_string(),
            date: date.to_string(),
        })
    }

    /// Imagery sub-folder holding the source tile: the five-digit
    /// latitude/longitude block of the quadrangle id.
    pub fn folder(&self) -> Option<String> {
        self.acquisition().map(|a| a.quadrangle[..5].to_string())
    }
}

fn is_date(s: &str) -> bool {
    s.len() == 8 && s.chars().all(|c| c.is_ascii_digit())
}

/// Folder-safe region name (spaces and hyphens become underscores).
pub fn region_dir_name(name: &str) -> String {
    name.replace([' ', '-'], "_")
}

/// Year-stamped per-region output names.
#[derive(Debug, Clone, Copy)]
pub struct RegionFiles<'a> {
    pub year: u16,
    pub region: &'a str,
}

impl RegionFiles<'_> {
    pub fn mosaic(&self) -> String {
        format!("mosaic_{}_{}.tif", self.year, self.region)
    }

    pub fn canopy(&self) -> String {
        format!("canopy_{}_{}.tif", self.year, self.region)
    }

    pub fn corrected(&self) -> String {
        format!("corrected_canopy_{}_{}.tif", self.year, self.region)
    }

    pub fn polygons(&self) -> String {
        format!("canopy_{}_{}.geojson", self.year, self.region)
    }

    pub fn gtpoints(&self) -> String {
        format!("gtpoints_{}_{}.geojson", self.year, self.region)
    }
}

/// Parse the year out of a `gtpoints_<year>_<region>.geojson` file name.
pub fn gtpoints_year(file_name: &str, region: &str) -> Option<u16> {
    let rest = file_name.strip_prefix("gtpoints_")?;
    let rest = rest.strip_suffix(".geojson")?;
    let (year, name) = rest.split_once('_')?;
    (name == region).then(|| year.parse().ok()).flatten()
}
