//! Classification normalizer: turns classifier artifacts into canonical
//! two-class `fr<tile>.tif` rasters.

use std::time::Instant;

use crate::afe::{load_class_features, Artifact, TRANSITIONAL_CODES};
use crate::error::Result;
use crate::layers::RegionId;
use crate::pipeline::{has_outputs, Pipeline, StageReport};
use crate::status::{Stage, StatusLedger};

impl Pipeline {
    /// Vector artifacts are rasterized onto the reprojected tile's grid with
    /// their class attribute; raster artifacts are remapped from {1, 2} to
    /// {0, 1}. Tiles without an artifact are reported and skipped.
    pub fn convert_afe_to_final_tiles(&self, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let mut report = StageReport::default();

        for (region, tiles) in self.regions_with_tiles(region_ids)? {
            let dir_name = region.dir_name();
            let inputs = self.config.inputs_dir(&dir_name);
            let outputs = self.config.outputs_dir(&dir_name);
            if !has_outputs(&outputs) {
                log::debug!("{}: nothing classified yet", region.name);
                continue;
            }
            log::info!("{}: normalizing {} classified tiles", region.name, tiles.len());

            let mut ledger = StatusLedger::open(&self.config.region_dir(&dir_name))?;
            for tile in &tiles {
                let stem = tile.name.stem();
                let out = outputs.join(tile.name.staged(Stage::Classified));
                if ledger.tile_done(stem, Stage::Classified, &out)? {
                    log::debug!("{stem}: already classified");
                    report.skipped += 1;
                    continue;
                }
                let classified = match self.source.locate(&outputs, &tile.name) {
                    None => {
                        log::warn!("{stem}: no classification artifact");
                        report.missing += 1;
                        continue;
                    }
                    Some(Artifact::Vector(path)) => {
                        let reprojected = inputs.join(tile.name.staged(Stage::Reprojected));
                        if !reprojected.exists() {
                            log::warn!("{stem}: vector artifact but no reprojected tile to take the grid from");
                            report.missing += 1;
                            continue;
                        }
                        let template = self.engine.read_meta(&reprojected)?;
                        let features = load_class_features(&path)?;
                        self.engine.rasterize(&template, &features)?
                    }
                    Some(Artifact::Raster(path)) => self.engine.read(&path)?.reclassify(&TRANSITIONAL_CODES)?,
                };
                self.engine.write(&classified, &out)?;
                ledger.record_tile(stem, Stage::Classified)?;
                report.written += 1;
            }
        }

        log::info!("classification: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}
