//! Grid normalizer: projects source imagery onto the reference grid.

use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::error::{CanopyError, Result};
use crate::grid::ReferenceGrid;
use crate::layers::{RegionId, TileRecord};
use crate::naming::TileName;
use crate::pipeline::{Pipeline, StageReport};
use crate::projection::grid_in;
use crate::status::{Stage, StatusLedger};

impl Pipeline {
    /// Reproject every tile of `region_ids` into `<region>/Inputs/r<tile>.tif`
    /// on the reference grid. Missing or unreadable sources are reported and
    /// skipped.
    pub fn reproject_input_tiles(&self, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let groups = self.regions_with_tiles(region_ids)?;
        let grid = self.reference_grid(groups.iter().flat_map(|(_, tiles)| tiles))?;
        let mut report = StageReport::default();

        for (region, tiles) in &groups {
            let dir_name = region.dir_name();
            let inputs = self.config.inputs_dir(&dir_name);
            let outputs = self.config.outputs_dir(&dir_name);
            for dir in [&inputs, &outputs] {
                fs::create_dir_all(dir).map_err(|e| CanopyError::io(dir, e))?;
            }
            log::info!("{}: reprojecting {} tiles", region.name, tiles.len());

            let mut ledger = StatusLedger::open(&self.config.region_dir(&dir_name))?;
            for tile in tiles {
                let stem = tile.name.stem();
                let out = inputs.join(tile.name.staged(Stage::Reprojected));
                if ledger.tile_done(stem, Stage::Reprojected, &out)? {
                    log::debug!("{stem}: already reprojected");
                    report.skipped += 1;
                    continue;
                }
                let src = self.source_tile_path(&tile.name);
                let read = if src.exists() {
                    self.engine.read(&src)
                } else {
                    Err(CanopyError::MissingInput(src))
                };
                let raster = match read {
                    Ok(r) => r,
                    Err(e) => {
                        log::warn!("{stem}: skipping, {e}");
                        report.missing += 1;
                        continue;
                    }
                };
                let Some(grid) = &grid else {
                    report.missing += 1;
                    continue;
                };
                let projected = self.engine.reproject(&raster, grid)?;
                self.engine.write(&projected, &out)?;
                ledger.record_tile(stem, Stage::Reprojected)?;
                report.written += 1;
            }
        }

        log::info!("reprojection: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    /// The grid every output is aligned to.
    ///
    /// Read from the snap raster when it exists. Otherwise one source tile is
    /// projected into the target system and written as the snap raster: the
    /// tile the snap raster's `r<tile>.tif` name points at when that source
    /// exists, else the first of `candidates` with a source on disk. `None`
    /// when no source imagery is available at all.
    pub fn reference_grid<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a TileRecord>,
    ) -> Result<Option<ReferenceGrid>> {
        let snap = &self.config.snap_raster;
        if snap.exists() {
            let mut grid = self.engine.read_meta(snap)?.grid();
            grid.crs = grid.crs.or(Some(self.config.crs()));
            return Ok(Some(grid));
        }

        let named = snap_tile_name(snap).map(|t| self.source_tile_path(&t));
        let src = named
            .filter(|p| p.exists())
            .or_else(|| candidates.into_iter().map(|t| self.source_tile_path(&t.name)).find(|p| p.exists()));
        let Some(src) = src else {
            log::warn!("no source imagery available to build the reference grid");
            return Ok(None);
        };

        log::info!("building reference grid {} from {}", snap.display(), src.display());
        let raster = self.engine.read(&src)?;
        let grid = grid_in(&raster.meta, self.config.crs())?;
        let projected = self.engine.reproject(&raster, &grid)?;
        if let Some(parent) = snap.parent() {
            fs::create_dir_all(parent).map_err(|e| CanopyError::io(parent, e))?;
        }
        self.engine.write(&projected, snap)?;
        Ok(Some(projected.meta.grid()))
    }
}

/// Tile a snap raster named `r<tile>.tif` was made from.
fn snap_tile_name(snap: &Path) -> Option<TileName> {
    let name = snap.file_name()?.to_str()?;
    let tile = name.strip_prefix(Stage::Reprojected.prefix())?;
    tile.ends_with(".tif").then(|| TileName::from_field(tile))
}
