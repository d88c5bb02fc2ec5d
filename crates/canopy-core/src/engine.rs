//! Raster engine interface and the local GeoTIFF implementation.

use std::path::Path;

use crate::error::Result;
use crate::geometry::Shape;
use crate::geotiff;
use crate::grid::ReferenceGrid;
use crate::projection::CrsTransform;
use crate::raster::{Raster, RasterMeta};
use crate::status::write_atomic;

/// Raster primitives the pipeline stages are built from.
pub trait RasterEngine {
    fn read(&self, path: &Path) -> Result<Raster>;

    /// Georeferencing only, without decoding pixels.
    fn read_meta(&self, path: &Path) -> Result<RasterMeta>;

    /// Write `raster` to `path`. A file under `path` must only ever appear
    /// complete.
    fn write(&self, raster: &Raster, path: &Path) -> Result<()>;

    /// Project and resample onto the reference grid.
    fn reproject(&self, raster: &Raster, grid: &ReferenceGrid) -> Result<Raster>;

    /// Burn `(shape, class)` features onto `template`'s grid.
    fn rasterize(&self, template: &RasterMeta, features: &[(Shape, u8)]) -> Result<Raster>;

    fn clip_to_shape(&self, raster: &Raster, shape: &Shape) -> Result<Raster>;

    fn mosaic(&self, inputs: &[Raster]) -> Result<Raster>;
}

/// GeoTIFF files on local disk, pure-Rust pixel operations.
///
/// Reprojection is nearest-neighbour: each target cell centre is mapped back
/// into the source system with proj4rs. A raster or grid without a
/// coordinate system is taken to already be in the other's.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalEngine;

impl RasterEngine for LocalEngine {
    fn read(&self, path: &Path) -> Result<Raster> {
        geotiff::read(path)
    }

    fn read_meta(&self, path: &Path) -> Result<RasterMeta> {
        geotiff::read_meta(path)
    }

    fn write(&self, raster: &Raster, path: &Path) -> Result<()> {
        write_atomic(path, &geotiff::encode(raster, path)?)
    }

    fn reproject(&self, raster: &Raster, grid: &ReferenceGrid) -> Result<Raster> {
        let mut out = match (raster.meta.crs, grid.crs) {
            (Some(from), Some(to)) if from != to => {
                let extent = CrsTransform::new(from, to)?.extent(&raster.meta.extent())?;
                let back = CrsTransform::new(to, from)?;
                raster.warp(grid, &extent, |p| back.apply(p).ok())
            }
            _ => raster.resample(grid),
        };
        out.meta.crs = grid.crs.or(raster.meta.crs);
        Ok(out)
    }

    fn rasterize(&self, template: &RasterMeta, features: &[(Shape, u8)]) -> Result<Raster> {
        Ok(Raster::rasterize(template, features))
    }

    fn clip_to_shape(&self, raster: &Raster, shape: &Shape) -> Result<Raster> {
        raster.clip_to_shape(shape)
    }

    fn mosaic(&self, inputs: &[Raster]) -> Result<Raster> {
        Raster::mosaic(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CanopyError;
    use crate::geometry::Point;
    use crate::grid::Crs;
    use crate::status::partial_path;
    use crate::test_utils::ScratchDir;

    fn meta(crs: Option<Crs>) -> RasterMeta {
        RasterMeta {
            width: 2,
            height: 2,
            bands: 1,
            xmin: 0.0,
            ymax: 2.0,
            cell_width: 1.0,
            cell_height: 1.0,
            crs,
            nodata: Some(255),
        }
    }

    #[test]
    fn write_leaves_no_partial_file() {
        let dir = ScratchDir::new("engine-write");
        let path = dir.path().join("out.tif");
        LocalEngine.write(&Raster::filled(meta(None), 1), &path).unwrap();
        assert!(path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn failed_encode_leaves_nothing_behind() {
        let dir = ScratchDir::new("engine-write-fail");
        let path = dir.path().join("out.tif");
        let two_band = RasterMeta { bands: 2, ..meta(None) };
        assert!(matches!(
            LocalEngine.write(&Raster::filled(two_band, 1), &path),
            Err(CanopyError::UnsupportedRaster { .. })
        ));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn reproject_moves_utm_tile_onto_albers_grid() {
        let source = RasterMeta {
            width: 10,
            height: 10,
            bands: 1,
            xmin: 684_000.0,
            ymax: 3_764_010.0,
            cell_width: 1.0,
            cell_height: 1.0,
            crs: Some(Crs(26916)),
            nodata: Some(255),
        };
        let raster = Raster::filled(source, 1);
        let grid = ReferenceGrid { crs: Some(Crs(102039)), origin_x: 0.0, origin_y: 0.0, cell_width: 1.0, cell_height: 1.0 };

        let out = LocalEngine.reproject(&raster, &grid).unwrap();
        assert_eq!(out.meta.crs, Some(Crs(102039)));
        assert!(out.meta.grid().is_aligned_with(&grid));

        let to_albers = CrsTransform::new(Crs(26916), Crs(102039)).unwrap();
        let centre = to_albers.apply(Point::new(684_005.0, 3_764_005.0)).unwrap();
        assert_eq!(out.value_at(centre).unwrap(), 1);
        assert!(out.meta.extent().xmin > 900_000.0);

        // Equal-area target: the data footprint keeps roughly its 100 cells.
        let filled = out.data.iter().filter(|&&v| v == 1).count();
        assert!((85..=115).contains(&filled), "{filled} cells carry data");
    }

    #[test]
    fn reproject_rejects_unknown_coordinate_system() {
        let raster = Raster::filled(meta(Some(Crs(999_999))), 1);
        let grid = meta(Some(Crs(102039))).grid();
        assert!(matches!(
            LocalEngine.reproject(&raster, &grid),
            Err(CanopyError::Projection { .. })
        ));
    }

    #[test]
    fn reproject_stamps_target_crs_on_unlabelled_source() {
        let raster = Raster::filled(meta(None), 1);
        let grid = meta(Some(Crs(102039))).grid();
        let out = LocalEngine.reproject(&raster, &grid).unwrap();
        assert_eq!(out.meta.crs, Some(Crs(102039)));
    }
}
