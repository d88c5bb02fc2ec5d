//! Region mosaicker: composites a region's clipped tiles and trims the
//! composite to the region boundary.

use std::time::Instant;

use crate::error::Result;
use crate::layers::RegionId;
use crate::pipeline::{has_outputs, Pipeline, StageReport};
use crate::status::{Stage, StatusLedger};

impl Pipeline {
    /// Produce `canopy_<year>_<Region>.tif` for each region, by way of the
    /// intermediate `mosaic_<year>_<Region>.tif`. A region whose canopy
    /// raster exists for the analysis year is skipped without any raster
    /// I/O. Tiles without a clipped output are left out with a warning; a
    /// region with no clipped tile at all is reported missing.
    pub fn mosaic_clipped_final_tiles(&self, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let year = self.config.analysis_year;
        let mut report = StageReport::default();

        for (region, tiles) in self.regions_with_tiles(region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            if !has_outputs(&outputs) {
                log::debug!("{}: nothing classified yet", region.name);
                continue;
            }
            let files = self.config.region_files(&dir_name);
            let canopy_path = outputs.join(files.canopy());
            let mut ledger = StatusLedger::open(&self.config.region_dir(&dir_name))?;
            if ledger.region_done(year, Stage::Mosaicked, &canopy_path)? {
                log::debug!("{}: canopy raster for {year} already exists", region.name);
                report.skipped += 1;
                continue;
            }

            let mosaic_path = outputs.join(files.mosaic());
            let mosaic = if mosaic_path.exists() {
                log::debug!("{}: reusing {}", region.name, mosaic_path.display());
                self.engine.read(&mosaic_path)?
            } else {
                let (inputs, absent): (Vec<_>, Vec<_>) = tiles
                    .iter()
                    .map(|t| outputs.join(t.name.staged(Stage::Clipped)))
                    .partition(|p| p.exists());
                for p in &absent {
                    log::warn!("{}: {} was never clipped, leaving it out", region.name, p.display());
                }
                if inputs.is_empty() {
                    log::warn!("{}: no clipped tiles to mosaic", region.name);
                    report.missing += 1;
                    continue;
                }
                log::info!("{}: mosaicking {} of {} tiles", region.name, inputs.len(), tiles.len());
                let rasters = inputs.iter().map(|p| self.engine.read(p)).collect::<Result<Vec<_>>>()?;
                let mosaic = self.engine.mosaic(&rasters)?;
                self.engine.write(&mosaic, &mosaic_path)?;
                mosaic
            };

            let canopy = self.engine.clip_to_shape(&mosaic, &region.boundary)?;
            self.engine.write(&canopy, &canopy_path)?;
            ledger.record_region(year, Stage::Mosaicked)?;
            report.written += 1;
        }

        log::info!("mosaicking: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::path::Path;
    use std::rc::Rc;

    use crate::afe::DirectorySource;
    use crate::config::Config;
    use crate::engine::{LocalEngine, RasterEngine};
    use crate::error::Result;
    use crate::geojson::GeoJsonStore;
    use crate::geometry::Shape;
    use crate::grid::ReferenceGrid;
    use crate::pipeline::fixtures::{study_area, tile_meta, TILES};
    use crate::pipeline::{Pipeline, StageReport};
    use crate::raster::{Raster, RasterMeta, CANOPY, CLASS_NODATA, NON_CANOPY};
    use crate::test_utils::ScratchDir;

    /// Local engine that counts raster reads and writes.
    #[derive(Default)]
    struct CountingEngine {
        reads: Rc<Cell<usize>>,
        writes: Rc<Cell<usize>>,
    }

    impl RasterEngine for CountingEngine {
        fn read(&self, path: &Path) -> Result<Raster> {
            self.reads.set(self.reads.get() + 1);
            LocalEngine.read(path)
        }
        fn read_meta(&self, path: &Path) -> Result<RasterMeta> {
            LocalEngine.read_meta(path)
        }
        fn write(&self, raster: &Raster, path: &Path) -> Result<()> {
            self.writes.set(self.writes.get() + 1);
            LocalEngine.write(raster, path)
        }
        fn reproject(&self, raster: &Raster, grid: &ReferenceGrid) -> Result<Raster> {
            LocalEngine.reproject(raster, grid)
        }
        fn rasterize(&self, template: &RasterMeta, features: &[(Shape, u8)]) -> Result<Raster> {
            LocalEngine.rasterize(template, features)
        }
        fn clip_to_shape(&self, raster: &Raster, shape: &Shape) -> Result<Raster> {
            LocalEngine.clip_to_shape(raster, shape)
        }
        fn mosaic(&self, inputs: &[Raster]) -> Result<Raster> {
            LocalEngine.mosaic(inputs)
        }
    }

    fn counting_pipeline(config: &Config) -> (Pipeline, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let engine = CountingEngine::default();
        let (reads, writes) = (engine.reads.clone(), engine.writes.clone());
        let store = GeoJsonStore::new(&config.regions_layer, &config.tiles_layer, config.layer_fields());
        let pipeline = Pipeline::with_parts(config.clone(), Box::new(store), Box::new(engine), Box::new(DirectorySource));
        (pipeline, reads, writes)
    }

    /// Clipped tiles of region 8: north half canopy, south half not.
    fn write_clipped_tiles(config: &Config) {
        let outputs = config.outputs_dir("Winder_Slope");
        std::fs::create_dir_all(&outputs).unwrap();
        for ((name, x, y), class) in [(TILES[0], CANOPY), (TILES[2], NON_CANOPY)] {
            let stem = &name[..name.len() - 13];
            let mut meta = tile_meta(x, y);
            meta.nodata = Some(CLASS_NODATA);
            LocalEngine.write(&Raster::filled(meta, class), &outputs.join(format!("cfr{stem}.tif"))).unwrap();
        }
    }

    #[test]
    fn composites_and_trims_to_the_boundary() {
        let dir = ScratchDir::new("mosaic");
        let config = study_area(dir.path());
        let (pipeline, _, _) = counting_pipeline(&config);
        pipeline.assign_regions_to_tiles().unwrap();
        write_clipped_tiles(&config);

        let report = pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();
        assert_eq!(report, StageReport { written: 1, skipped: 0, missing: 0 });

        let outputs = config.outputs_dir("Winder_Slope");
        let mosaic = LocalEngine.read(&outputs.join("mosaic_2009_Winder_Slope.tif")).unwrap();
        assert_eq!((mosaic.meta.width, mosaic.meta.height), (10, 20));
        let canopy = LocalEngine.read(&outputs.join("canopy_2009_Winder_Slope.tif")).unwrap();
        assert_eq!(canopy.pixel(0, 0), &[CANOPY]);
        assert_eq!(canopy.pixel(19, 0), &[NON_CANOPY]);
    }

    #[test]
    fn existing_canopy_raster_means_zero_writes() {
        let dir = ScratchDir::new("mosaic-skip");
        let config = study_area(dir.path());
        let (pipeline, reads, writes) = counting_pipeline(&config);
        pipeline.assign_regions_to_tiles().unwrap();
        write_clipped_tiles(&config);
        pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();

        reads.set(0);
        writes.set(0);
        let report = pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();
        assert_eq!(report, StageReport { written: 0, skipped: 1, missing: 0 });
        assert_eq!(writes.get(), 0);
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn existing_intermediate_mosaic_is_reused() {
        let dir = ScratchDir::new("mosaic-reuse");
        let config = study_area(dir.path());
        let (pipeline, _, writes) = counting_pipeline(&config);
        pipeline.assign_regions_to_tiles().unwrap();
        write_clipped_tiles(&config);
        pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();

        std::fs::remove_file(config.outputs_dir("Winder_Slope").join("canopy_2009_Winder_Slope.tif")).unwrap();
        writes.set(0);
        let report = pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(writes.get(), 1);
    }

    #[test]
    fn region_with_a_missing_source_tile_still_gets_a_canopy_raster() {
        let dir = ScratchDir::new("mosaic-partial");
        let config = study_area(dir.path());
        let (name, _, _) = TILES[2];
        let stem = &name[..name.len() - 13];
        std::fs::remove_file(config.imagery_root.join("34085").join(format!("{stem}.tif"))).unwrap();

        let pipeline = Pipeline::new(config.clone());
        pipeline.assign_regions_to_tiles().unwrap();
        pipeline.reproject_input_tiles(&[8]).unwrap();
        let outputs = config.outputs_dir("Winder_Slope");
        let (name, x, y) = TILES[0];
        let stem = &name[..name.len() - 13];
        LocalEngine.write(&Raster::filled(tile_meta(x, y), 2), &outputs.join(format!("r{stem}.tif"))).unwrap();

        let first = pipeline.convert_afe_to_canopy_tif(&[8]).unwrap();
        assert_eq!(first.mosaicked, StageReport { written: 1, skipped: 0, missing: 0 });
        let canopy = LocalEngine.read(&outputs.join("canopy_2009_Winder_Slope.tif")).unwrap();
        assert_eq!(canopy.pixel(0, 0), &[CANOPY]);
        assert_eq!((canopy.meta.width, canopy.meta.height), (10, 10));

        let second = pipeline.convert_afe_to_canopy_tif(&[8]).unwrap();
        assert_eq!(second.mosaicked, StageReport { written: 0, skipped: 1, missing: 0 });
    }

    #[test]
    fn region_without_clipped_tiles_is_missing() {
        let dir = ScratchDir::new("mosaic-none");
        let config = study_area(dir.path());
        let (pipeline, _, writes) = counting_pipeline(&config);
        pipeline.assign_regions_to_tiles().unwrap();
        let outputs = config.outputs_dir("Winder_Slope");
        std::fs::create_dir_all(&outputs).unwrap();
        std::fs::write(outputs.join("notes.txt"), "pending").unwrap();

        let report = pipeline.mosaic_clipped_final_tiles(&[8]).unwrap();
        assert_eq!(report, StageReport { written: 0, skipped: 0, missing: 1 });
        assert_eq!(writes.get(), 0);
    }
}
