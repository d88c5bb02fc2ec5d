//! Footprint clipper: trims each classified tile to its own footprint so
//! neighbouring tiles never claim the same ground pixel.

use std::time::Instant;

use crate::error::Result;
use crate::layers::RegionId;
use crate::pipeline::{has_outputs, Pipeline, StageReport};
use crate::status::{Stage, StatusLedger};

impl Pipeline {
    pub fn clip_final_tiles(&self, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let mut report = StageReport::default();

        for (region, tiles) in self.regions_with_tiles(region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            if !has_outputs(&outputs) {
                log::debug!("{}: nothing classified yet", region.name);
                continue;
            }
            log::info!("{}: clipping {} tiles", region.name, tiles.len());

            let mut ledger = StatusLedger::open(&self.config.region_dir(&dir_name))?;
            for tile in &tiles {
                let stem = tile.name.stem();
                let out = outputs.join(tile.name.staged(Stage::Clipped));
                if ledger.tile_done(stem, Stage::Clipped, &out)? {
                    log::debug!("{stem}: already clipped");
                    report.skipped += 1;
                    continue;
                }
                let classified = outputs.join(tile.name.staged(Stage::Classified));
                if !classified.exists() {
                    log::warn!("{stem}: not classified, nothing to clip");
                    report.missing += 1;
                    continue;
                }
                let raster = self.engine.read(&classified)?;
                let clipped = self.engine.clip_to_shape(&raster, &tile.footprint)?;
                self.engine.write(&clipped, &out)?;
                ledger.record_tile(stem, Stage::Clipped)?;
                report.written += 1;
            }
        }

        log::info!("clipping: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use crate::engine::{LocalEngine, RasterEngine};
    use crate::pipeline::fixtures::{study_area, TILES};
    use crate::pipeline::{Pipeline, StageReport};
    use crate::raster::{Raster, RasterMeta, CANOPY, CLASS_NODATA};
    use crate::test_utils::ScratchDir;

    /// Classified tiles one cell larger than their footprint on every side,
    /// the way neighbouring source tiles overlap.
    fn write_overlapping_final_tiles(outputs: &std::path::Path, tiles: &[(&str, f64, f64)]) {
        fs::create_dir_all(outputs).unwrap();
        for (name, x, y) in tiles {
            let stem = &name[..name.len() - 13];
            let meta = RasterMeta {
                width: 12,
                height: 12,
                bands: 1,
                xmin: x - 1.0,
                ymax: y + 11.0,
                cell_width: 1.0,
                cell_height: 1.0,
                crs: None,
                nodata: Some(CLASS_NODATA),
            };
            LocalEngine.write(&Raster::filled(meta, CANOPY), &outputs.join(format!("fr{stem}.tif"))).unwrap();
        }
    }

    fn claimed(raster: &Raster) -> HashSet<(i64, i64)> {
        let m = raster.meta;
        let mut cells = HashSet::new();
        for row in 0..m.height {
            for col in 0..m.width {
                if raster.pixel(row, col)[0] != CLASS_NODATA {
                    let c = m.cell_center(row, col);
                    cells.insert((c.x.floor() as i64, c.y.floor() as i64));
                }
            }
        }
        cells
    }

    #[test]
    fn clipped_tiles_claim_disjoint_pixels() {
        let dir = ScratchDir::new("clip");
        let config = study_area(dir.path());
        let pipeline = Pipeline::new(config.clone());
        pipeline.assign_regions_to_tiles().unwrap();
        let outputs = config.outputs_dir("Winder_Slope");
        write_overlapping_final_tiles(&outputs, &[TILES[0], TILES[2]]);

        let report = pipeline.clip_final_tiles(&[8]).unwrap();
        assert_eq!(report, StageReport { written: 2, skipped: 0, missing: 0 });

        let north = LocalEngine.read(&outputs.join("cfrm_3408504_nw_16_1_20090824.tif")).unwrap();
        let south = LocalEngine.read(&outputs.join("cfrm_3408504_sw_16_1_20090824.tif")).unwrap();
        let (a, b) = (claimed(&north), claimed(&south));
        assert_eq!(a.len(), 100);
        assert_eq!(b.len(), 100);
        assert!(a.is_disjoint(&b));

        let again = pipeline.clip_final_tiles(&[8]).unwrap();
        assert_eq!(again, StageReport { written: 0, skipped: 2, missing: 0 });
    }

    #[test]
    fn unclassified_tiles_are_reported() {
        let dir = ScratchDir::new("clip-missing");
        let config = study_area(dir.path());
        let pipeline = Pipeline::new(config.clone());
        pipeline.assign_regions_to_tiles().unwrap();
        write_overlapping_final_tiles(&config.outputs_dir("Winder_Slope"), &[TILES[0]]);

        let report = pipeline.clip_final_tiles(&[8]).unwrap();
        assert_eq!(report, StageReport { written: 1, skipped: 0, missing: 1 });
    }
}
