//! Coordinate transforms between the systems the pipeline meets: NAIP's
//! UTM zones, geographic NAD83/WGS84 and the Albers target.

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{CanopyError, Result};
use crate::geometry::{Extent, Point};
use crate::grid::{Crs, ReferenceGrid};
use crate::raster::RasterMeta;

/// Samples taken along each extent edge when projecting an extent.
const EDGE_SAMPLES: usize = 16;

const ALBERS_CONUS: &str =
    "+proj=aea +lat_0=23 +lon_0=-96 +lat_1=29.5 +lat_2=45.5 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs";

/// proj definition for a WKID/EPSG code, and whether it is geographic.
fn definition(crs: Crs) -> Option<(String, bool)> {
    let def = match crs.0 {
        4326 => return Some(("+proj=longlat +datum=WGS84 +no_defs".into(), true)),
        4269 => return Some(("+proj=longlat +datum=NAD83 +no_defs".into(), true)),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs".into(),
        // Esri's USA Contiguous Albers Equal Area Conic USGS and its EPSG twin.
        5070 | 102039 => ALBERS_CONUS.into(),
        code @ 26901..=26923 => format!("+proj=utm +zone={} +datum=NAD83 +units=m +no_defs", code - 26900),
        code @ 32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600),
        code @ 32701..=32760 => format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", code - 32700),
        _ => return None,
    };
    Some((def, false))
}

/// A reusable point transform from one coordinate system to another.
pub struct CrsTransform {
    from: Crs,
    to: Crs,
    source: Proj,
    target: Proj,
    source_geographic: bool,
    target_geographic: bool,
}

impl std::fmt::Debug for CrsTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrsTransform").field("from", &self.from).field("to", &self.to).finish_non_exhaustive()
    }
}

impl CrsTransform {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let fail = |reason: String| CanopyError::Projection { from, to, reason };
        let (src_def, source_geographic) =
            definition(from).ok_or_else(|| fail(format!("{from} is not a supported coordinate system")))?;
        let (dst_def, target_geographic) =
            definition(to).ok_or_else(|| fail(format!("{to} is not a supported coordinate system")))?;
        let source = Proj::from_proj_string(&src_def).map_err(|e| fail(format!("{e:?}")))?;
        let target = Proj::from_proj_string(&dst_def).map_err(|e| fail(format!("{e:?}")))?;
        Ok(Self { from, to, source, target, source_geographic, target_geographic })
    }

    /// Transform one point. Geographic coordinates are in degrees.
    pub fn apply(&self, p: Point) -> Result<Point> {
        let mut xyz = if self.source_geographic {
            (p.x.to_radians(), p.y.to_radians(), 0.0)
        } else {
            (p.x, p.y, 0.0)
        };
        transform(&self.source, &self.target, &mut xyz).map_err(|e| CanopyError::Projection {
            from: self.from,
            to: self.to,
            reason: format!("{e:?}"),
        })?;
        if self.target_geographic {
            Ok(Point::new(xyz.0.to_degrees(), xyz.1.to_degrees()))
        } else {
            Ok(Point::new(xyz.0, xyz.1))
        }
    }

    /// Bounding box of `extent` after projection, from points sampled along
    /// its edges so curved edges are covered.
    pub fn extent(&self, extent: &Extent) -> Result<Extent> {
        let mut out: Option<Extent> = None;
        for i in 0..=EDGE_SAMPLES {
            let t = i as f64 / EDGE_SAMPLES as f64;
            let x = extent.xmin + t * extent.width();
            let y = extent.ymin + t * extent.height();
            for p in [
                Point::new(x, extent.ymin),
                Point::new(x, extent.ymax),
                Point::new(extent.xmin, y),
                Point::new(extent.xmax, y),
            ] {
                let q = self.apply(p)?;
                let e = Extent::new(q.x, q.y, q.x, q.y);
                out = Some(out.map_or(e, |o| o.union(&e)));
            }
        }
        // The loop always runs at least once.
        out.ok_or_else(|| CanopyError::Geometry("empty extent".into()))
    }
}

/// The grid a raster would have in `crs`: its cell size, anchored at the
/// top-left corner of its projected extent.
pub fn grid_in(meta: &RasterMeta, crs: Crs) -> Result<ReferenceGrid> {
    let mut grid = meta.grid();
    if let Some(from) = meta.crs.filter(|&from| from != crs) {
        let projected = CrsTransform::new(from, crs)?.extent(&meta.extent())?;
        grid.origin_x = projected.xmin;
        grid.origin_y = projected.ymax;
    }
    grid.crs = Some(crs);
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn utm_to_albers_and_back() {
        let forward = CrsTransform::new(Crs(26916), Crs(102039)).unwrap();
        let back = CrsTransform::new(Crs(102039), Crs(26916)).unwrap();
        let p = Point::new(684_000.0, 3_764_000.0);
        let q = back.apply(forward.apply(p).unwrap()).unwrap();
        assert_abs_diff_eq!(q.x, p.x, epsilon = 1e-4);
        assert_abs_diff_eq!(q.y, p.y, epsilon = 1e-4);
    }

    #[test]
    fn albers_origin_is_the_projection_centre() {
        let t = CrsTransform::new(Crs(4269), Crs(102039)).unwrap();
        let q = t.apply(Point::new(-96.0, 23.0)).unwrap();
        assert_abs_diff_eq!(q.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(q.y, 0.0, epsilon = 1e-6);
        // East of the central meridian is positive x.
        assert!(t.apply(Point::new(-85.0, 34.0)).unwrap().x > 0.0);
    }

    #[test]
    fn esri_and_epsg_albers_agree() {
        let a = CrsTransform::new(Crs(26916), Crs(102039)).unwrap();
        let b = CrsTransform::new(Crs(26916), Crs(5070)).unwrap();
        let p = Point::new(700_000.0, 3_800_000.0);
        assert_eq!(a.apply(p).unwrap(), b.apply(p).unwrap());
    }

    #[test]
    fn unknown_code_is_a_projection_error() {
        assert!(matches!(
            CrsTransform::new(Crs(26916), Crs(999_999)),
            Err(CanopyError::Projection { .. })
        ));
    }

    #[test]
    fn projected_extent_contains_every_corner() {
        let t = CrsTransform::new(Crs(26916), Crs(102039)).unwrap();
        let e = Extent::new(684_000.0, 3_764_000.0, 690_000.0, 3_771_000.0);
        let out = t.extent(&e).unwrap();
        for (x, y) in [(e.xmin, e.ymin), (e.xmin, e.ymax), (e.xmax, e.ymin), (e.xmax, e.ymax)] {
            let q = t.apply(Point::new(x, y)).unwrap();
            assert!(q.x >= out.xmin && q.x <= out.xmax && q.y >= out.ymin && q.y <= out.ymax);
        }
    }
}
