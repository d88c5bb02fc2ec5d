//! Coordinate system ids and the reference grid outputs are aligned to.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::Extent;

/// Tolerance, in cells, when snapping coordinates onto a grid.
const SNAP_EPS: f64 = 1e-6;

/// Coordinate reference system identified by its numeric well-known id
/// (EPSG code or Esri WKID, e.g. 102039 for USA Contiguous Albers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(pub u32);

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WKID:{}", self.0)
    }
}

/// Canonical pixel alignment every stage output is resampled onto.
///
/// `origin_x`/`origin_y` is any grid node (usually the top-left corner of
/// the snap raster); cells are `cell_width` × `cell_height` with y growing
/// upwards in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGrid {
    pub crs: Option<Crs>,
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
}

impl ReferenceGrid {
    /// Grow `extent` outwards to the nearest grid lines.
    pub fn snap_outward(&self, extent: &Extent) -> Extent {
        Extent {
            xmin: snap_down(extent.xmin, self.origin_x, self.cell_width),
            ymin: snap_down(extent.ymin, self.origin_y, self.cell_height),
            xmax: snap_up(extent.xmax, self.origin_x, self.cell_width),
            ymax: snap_up(extent.ymax, self.origin_y, self.cell_height),
        }
    }

    /// Number of (columns, rows) an already-snapped extent spans.
    pub fn dimensions(&self, snapped: &Extent) -> (usize, usize) {
        let cols = (snapped.width() / self.cell_width).round().max(0.0) as usize;
        let rows = (snapped.height() / self.cell_height).round().max(0.0) as usize;
        (cols, rows)
    }

    /// Whether another grid shares this grid's cell size and node lattice.
    pub fn is_aligned_with(&self, other: &ReferenceGrid) -> bool {
        let same_size = (self.cell_width - other.cell_width).abs() <= self.cell_width * SNAP_EPS
            && (self.cell_height - other.cell_height).abs() <= self.cell_height * SNAP_EPS;
        same_size
            && on_lattice(other.origin_x, self.origin_x, self.cell_width)
            && on_lattice(other.origin_y, self.origin_y, self.cell_height)
    }
}

fn snap_down(v: f64, origin: f64, cell: f64) -> f64 {
    origin + ((v - origin) / cell + SNAP_EPS).floor() * cell
}

fn snap_up(v: f64, origin: f64, cell: f64) -> f64 {
    origin + ((v - origin) / cell - SNAP_EPS).ceil() * cell
}

fn on_lattice(v: f64, origin: f64, cell: f64) -> bool {
    let k = (v - origin) / cell;
    (k - k.round()).abs() <= SNAP_EPS * 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> ReferenceGrid {
        ReferenceGrid {
            crs: Some(Crs(102039)),
            origin_x: 0.5,
            origin_y: 100.0,
            cell_width: 1.0,
            cell_height: 1.0,
        }
    }

    #[test]
    fn snap_outward_aligns_to_origin() {
        let snapped = grid().snap_outward(&Extent::new(10.2, 20.7, 14.1, 25.0));
        assert_relative_eq!(snapped.xmin, 9.5);
        assert_relative_eq!(snapped.xmax, 14.5);
        assert_relative_eq!(snapped.ymin, 20.0);
        assert_relative_eq!(snapped.ymax, 25.0);
        assert_eq!(grid().dimensions(&snapped), (5, 5));
    }

    #[test]
    fn aligned_grids_share_lattice() {
        let mut shifted = grid();
        shifted.origin_x += 7.0;
        assert!(grid().is_aligned_with(&shifted));
        shifted.origin_x += 0.25;
        assert!(!grid().is_aligned_with(&shifted));
    }
}
