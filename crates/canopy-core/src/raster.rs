//! In-memory 8-bit rasters and the pixel operations the local engine builds
//! its stages from.

use crate::error::{CanopyError, Result};
use crate::geometry::{Extent, Point, Shape};
use crate::grid::{Crs, ReferenceGrid};

/// Canonical canopy class code.
pub const CANOPY: u8 = 1;
/// Canonical non-canopy class code.
pub const NON_CANOPY: u8 = 0;
/// Nodata value written into classification rasters.
pub const CLASS_NODATA: u8 = 255;

/// Map a world coordinate to a (row, column) cell index.
///
/// `col = floor((x - xmin) / width)`, `row = floor((ymax - y) / height)`.
/// Cells outside `[0, rows) × [0, cols)` are an error, never clamped.
pub fn calculate_row_column(
    xy: (f64, f64),
    extent: &Extent,
    resolution: (f64, f64),
) -> Result<(usize, usize)> {
    let (x, y) = xy;
    let (w, h) = resolution;
    let col = ((x - extent.xmin) / w).floor();
    let row = ((extent.ymax - y) / h).floor();
    let cols = (extent.width() / w).round();
    let rows = (extent.height() / h).round();
    if col < 0.0 || row < 0.0 || col >= cols || row >= rows || !col.is_finite() || !row.is_finite() {
        return Err(CanopyError::OutOfBounds { x, y });
    }
    Ok((row as usize, col as usize))
}

/// Georeferencing of a raster without its pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub xmin: f64,
    pub ymax: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub crs: Option<Crs>,
    pub nodata: Option<u8>,
}

impl RasterMeta {
    pub fn extent(&self) -> Extent {
        Extent {
            xmin: self.xmin,
            ymin: self.ymax - self.height as f64 * self.cell_height,
            xmax: self.xmin + self.width as f64 * self.cell_width,
            ymax: self.ymax,
        }
    }

    /// The grid this raster's pixels sit on.
    pub fn grid(&self) -> ReferenceGrid {
        ReferenceGrid {
            crs: self.crs,
            origin_x: self.xmin,
            origin_y: self.ymax,
            cell_width: self.cell_width,
            cell_height: self.cell_height,
        }
    }

    /// World coordinate of a cell centre.
    pub fn cell_center(&self, row: usize, col: usize) -> Point {
        Point::new(
            self.xmin + (col as f64 + 0.5) * self.cell_width,
            self.ymax - (row as f64 + 0.5) * self.cell_height,
        )
    }

    fn snapped(grid: &ReferenceGrid, extent: &Extent, bands: usize, nodata: Option<u8>) -> Self {
        let snapped = grid.snap_outward(extent);
        let (width, height) = grid.dimensions(&snapped);
        Self {
            width,
            height,
            bands,
            xmin: snapped.xmin,
            ymax: snapped.ymax,
            cell_width: grid.cell_width,
            cell_height: grid.cell_height,
            crs: grid.crs,
            nodata,
        }
    }
}

/// A north-up raster of 8-bit samples, pixel-interleaved, row 0 = north.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub meta: RasterMeta,
    pub data: Vec<u8>,
}

impl Raster {
    pub fn filled(meta: RasterMeta, fill: u8) -> Self {
        Self { data: vec![fill; meta.width * meta.height * meta.bands], meta }
    }

    #[inline]
    pub fn pixel(&self, row: usize, col: usize) -> &[u8] {
        let b = self.meta.bands;
        let i = (row * self.meta.width + col) * b;
        &self.data[i..i + b]
    }

    #[inline]
    pub fn pixel_mut(&mut self, row: usize, col: usize) -> &mut [u8] {
        let b = self.meta.bands;
        let i = (row * self.meta.width + col) * b;
        &mut self.data[i..i + b]
    }

    /// Single-band value at a world coordinate.
    pub fn value_at(&self, p: Point) -> Result<u8> {
        let (row, col) = calculate_row_column(
            (p.x, p.y),
            &self.meta.extent(),
            (self.meta.cell_width, self.meta.cell_height),
        )?;
        Ok(self.pixel(row, col)[0])
    }

    fn is_nodata(&self, px: &[u8]) -> bool {
        self.meta.nodata.is_some_and(|nd| px.iter().all(|&v| v == nd))
    }

    fn require_single_band(&self, op: &str) -> Result<()> {
        if self.meta.bands != 1 {
            return Err(CanopyError::GridMismatch(format!(
                "{op} needs a single-band raster, got {} bands",
                self.meta.bands
            )));
        }
        Ok(())
    }

    // ── Class operations ─────────────────────────────────────────────────────

    /// Remap single-band values through `table`; values without an entry
    /// become [`CLASS_NODATA`].
    pub fn reclassify(&self, table: &[(u8, u8)]) -> Result<Raster> {
        self.require_single_band("reclassify")?;
        let mut meta = self.meta;
        meta.nodata = Some(CLASS_NODATA);
        let data = self
            .data
            .iter()
            .map(|v| {
                table
                    .iter()
                    .find(|(from, _)| from == v)
                    .map_or(CLASS_NODATA, |&(_, to)| to)
            })
            .collect();
        Ok(Raster { meta, data })
    }

    /// Swap the two canonical class codes. Applying it twice is the identity.
    pub fn invert_classes(&self) -> Result<Raster> {
        self.require_single_band("class inversion")?;
        let data = self
            .data
            .iter()
            .map(|&v| match v {
                CANOPY => NON_CANOPY,
                NON_CANOPY => CANOPY,
                other => other,
            })
            .collect();
        Ok(Raster { meta: self.meta, data })
    }

    // ── Geometric operations ─────────────────────────────────────────────────

    /// Nearest-neighbour resample onto `grid`, covering this raster's extent.
    pub fn resample(&self, grid: &ReferenceGrid) -> Raster {
        self.warp(grid, &self.meta.extent(), Some)
    }

    /// Nearest-neighbour warp onto `grid` over `extent` (in the grid's
    /// coordinates). `to_source` maps a target cell centre into this
    /// raster's coordinates; cells it cannot map stay nodata.
    pub fn warp(&self, grid: &ReferenceGrid, extent: &Extent, to_source: impl Fn(Point) -> Option<Point>) -> Raster {
        let fill = self.meta.nodata.unwrap_or(0);
        let meta = RasterMeta::snapped(grid, extent, self.meta.bands, Some(fill));
        let mut out = Raster::filled(meta, fill);
        let src_extent = self.meta.extent();
        let res = (self.meta.cell_width, self.meta.cell_height);
        for row in 0..meta.height {
            for col in 0..meta.width {
                let Some(c) = to_source(meta.cell_center(row, col)) else {
                    continue;
                };
                if let Ok((r, k)) = calculate_row_column((c.x, c.y), &src_extent, res) {
                    out.pixel_mut(row, col).copy_from_slice(self.pixel(r, k));
                }
            }
        }
        out
    }

    /// Crop to `shape`'s extent and blank every cell whose centre lies
    /// outside it. The result never claims a cell the shape does not own.
    pub fn clip_to_shape(&self, shape: &Shape) -> Result<Raster> {
        let nodata = self.meta.nodata.unwrap_or(CLASS_NODATA);
        let window = self
            .meta
            .extent()
            .intersection(&shape.extent())
            .ok_or_else(|| CanopyError::Geometry("clip shape does not overlap the raster".into()))?;
        let meta = RasterMeta::snapped(&self.meta.grid(), &window, self.meta.bands, Some(nodata));
        let mut out = Raster::filled(meta, nodata);
        let src_extent = self.meta.extent();
        let res = (self.meta.cell_width, self.meta.cell_height);
        for row in 0..meta.height {
            for col in 0..meta.width {
                let c = meta.cell_center(row, col);
                if !shape.contains(c) {
                    continue;
                }
                if let Ok((r, k)) = calculate_row_column((c.x, c.y), &src_extent, res) {
                    out.pixel_mut(row, col).copy_from_slice(self.pixel(r, k));
                }
            }
        }
        Ok(out)
    }

    /// Burn class values into a new single-band raster on `template`'s grid.
    /// The first feature containing a cell centre wins; uncovered cells are
    /// nodata.
    pub fn rasterize(template: &RasterMeta, features: &[(Shape, u8)]) -> Raster {
        let meta = RasterMeta { bands: 1, nodata: Some(CLASS_NODATA), ..*template };
        let mut out = Raster::filled(meta, CLASS_NODATA);
        let extents: Vec<Extent> = features.iter().map(|(s, _)| s.extent()).collect();
        for row in 0..meta.height {
            for col in 0..meta.width {
                let c = meta.cell_center(row, col);
                let hit = features.iter().zip(&extents).find(|((shape, _), e)| {
                    c.x >= e.xmin && c.x <= e.xmax && c.y >= e.ymin && c.y <= e.ymax && shape.contains(c)
                });
                if let Some(((_, value), _)) = hit {
                    out.pixel_mut(row, col)[0] = *value;
                }
            }
        }
        out
    }

    /// Composite rasters sharing one grid into their union extent. Later
    /// inputs overwrite earlier ones only where they carry data.
    pub fn mosaic(inputs: &[Raster]) -> Result<Raster> {
        let first = inputs
            .first()
            .ok_or_else(|| CanopyError::GridMismatch("nothing to mosaic".into()))?;
        let grid = first.meta.grid();
        let bands = first.meta.bands;
        let mut union = first.meta.extent();
        for r in &inputs[1..] {
            if !grid.is_aligned_with(&r.meta.grid()) || r.meta.bands != bands {
                return Err(CanopyError::GridMismatch(
                    "mosaic inputs must share cell size, alignment and band count".into(),
                ));
            }
            union = union.union(&r.meta.extent());
        }
        let nodata = first.meta.nodata.unwrap_or(CLASS_NODATA);
        let meta = RasterMeta::snapped(&grid, &union, bands, Some(nodata));
        let mut out = Raster::filled(meta, nodata);
        for r in inputs {
            let col0 = ((r.meta.xmin - meta.xmin) / meta.cell_width).round() as usize;
            let row0 = ((meta.ymax - r.meta.ymax) / meta.cell_height).round() as usize;
            for row in 0..r.meta.height {
                for col in 0..r.meta.width {
                    let px = r.pixel(row, col);
                    if r.is_nodata(px) {
                        continue;
                    }
                    out.pixel_mut(row0 + row, col0 + col).copy_from_slice(px);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class_raster(xmin: f64, ymax: f64, width: usize, height: usize, fill: u8) -> Raster {
        Raster::filled(
            RasterMeta {
                width,
                height,
                bands: 1,
                xmin,
                ymax,
                cell_width: 1.0,
                cell_height: 1.0,
                crs: None,
                nodata: Some(CLASS_NODATA),
            },
            fill,
        )
    }

    #[test]
    fn row_column_maps_point_to_cell() {
        let extent = Extent::new(0.0, 0.0, 100.0, 100.0);
        assert_eq!(calculate_row_column((10.5, 89.5), &extent, (1.0, 1.0)).unwrap(), (10, 10));
        assert_eq!(calculate_row_column((0.0, 100.0), &extent, (1.0, 1.0)).unwrap(), (0, 0));
    }

    #[test]
    fn row_column_reports_out_of_bounds() {
        let extent = Extent::new(0.0, 0.0, 100.0, 100.0);
        for xy in [(-0.5, 50.0), (100.0, 50.0), (50.0, 100.5), (50.0, -3.0)] {
            assert!(matches!(
                calculate_row_column(xy, &extent, (1.0, 1.0)),
                Err(CanopyError::OutOfBounds { .. })
            ));
        }
    }

    #[test]
    fn inversion_is_an_involution() {
        let mut r = class_raster(0.0, 3.0, 3, 1, 0);
        r.data = vec![CANOPY, NON_CANOPY, CLASS_NODATA];
        let once = r.invert_classes().unwrap();
        assert_eq!(once.data, vec![NON_CANOPY, CANOPY, CLASS_NODATA]);
        assert_eq!(once.invert_classes().unwrap(), r);
    }

    #[test]
    fn reclassify_maps_transitional_codes() {
        let mut r = class_raster(0.0, 1.0, 4, 1, 0);
        r.data = vec![1, 2, 3, 2];
        let out = r.reclassify(&[(1, 0), (2, 1)]).unwrap();
        assert_eq!(out.data, vec![0, 1, CLASS_NODATA, 1]);
    }

    #[test]
    fn clip_blanks_cells_outside_shape() {
        let r = class_raster(0.0, 4.0, 4, 4, CANOPY);
        let clipped = r.clip_to_shape(&Shape::rectangle(0.0, 0.0, 2.0, 4.0)).unwrap();
        assert_eq!((clipped.meta.width, clipped.meta.height), (2, 4));
        assert!(clipped.data.iter().all(|&v| v == CANOPY));
    }

    #[test]
    fn mosaic_fills_union_extent() {
        let a = class_raster(0.0, 2.0, 2, 2, CANOPY);
        let b = class_raster(2.0, 2.0, 2, 2, NON_CANOPY);
        let m = Raster::mosaic(&[a, b]).unwrap();
        assert_eq!((m.meta.width, m.meta.height), (4, 2));
        assert_eq!(m.pixel(0, 0)[0], CANOPY);
        assert_eq!(m.pixel(1, 3)[0], NON_CANOPY);
    }

    #[test]
    fn mosaic_rejects_misaligned_inputs() {
        let a = class_raster(0.0, 2.0, 2, 2, CANOPY);
        let b = class_raster(2.5, 2.0, 2, 2, CANOPY);
        assert!(matches!(Raster::mosaic(&[a, b]), Err(CanopyError::GridMismatch(_))));
    }

    #[test]
    fn resample_snaps_to_grid() {
        let r = class_raster(0.3, 2.0, 2, 2, CANOPY);
        let grid = ReferenceGrid {
            crs: None,
            origin_x: 0.0,
            origin_y: 0.0,
            cell_width: 1.0,
            cell_height: 1.0,
        };
        let out = r.resample(&grid);
        assert_eq!(out.meta.xmin, 0.0);
        assert_eq!((out.meta.width, out.meta.height), (3, 2));
        // Cell centred at x=0.5 falls inside the source; x=2.5 does not.
        assert_eq!(out.pixel(0, 0)[0], CANOPY);
        assert_eq!(out.pixel(0, 2)[0], CLASS_NODATA);
    }
}
