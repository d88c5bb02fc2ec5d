//! Inversion corrector for regions whose classifier swapped the classes.

use std::time::Instant;

use crate::error::Result;
use crate::layers::RegionId;
use crate::pipeline::{Pipeline, StageReport};

impl Pipeline {
    /// Write `corrected_canopy_<year>_<Region>.tif` with canopy and
    /// non-canopy swapped. Regions without a canopy raster are reported;
    /// an existing corrected raster is left alone.
    pub fn correct_inverted_canopy_tif(&self, inverted_region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let mut report = StageReport::default();

        for region in self.regions_by_ids(inverted_region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            let files = self.config.region_files(&dir_name);
            let canopy_path = outputs.join(files.canopy());
            let corrected_path = outputs.join(files.corrected());

            if corrected_path.exists() {
                log::debug!("{}: already corrected", region.name);
                report.skipped += 1;
                continue;
            }
            if !canopy_path.exists() {
                log::warn!("{}: no canopy raster to correct", region.name);
                report.missing += 1;
                continue;
            }
            let corrected = self.engine.read(&canopy_path)?.invert_classes()?;
            self.engine.write(&corrected, &corrected_path)?;
            log::info!("{}: wrote {}", region.name, corrected_path.display());
            report.written += 1;
        }

        log::info!("inversion correction: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}
