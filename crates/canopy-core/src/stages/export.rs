//! Canopy raster to polygon export.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::{json, Map};

use crate::error::Result;
use crate::geojson::{write_collection, Feature, FeatureCollection, Geometry};
use crate::geometry::{Polygon, Shape};
use crate::layers::RegionId;
use crate::pipeline::{Pipeline, StageReport};
use crate::raster::Raster;

/// Class attribute on exported polygons.
pub const CANOPY_FIELD: &str = "Canopy";

impl Pipeline {
    /// Write `canopy_<year>_<Region>.geojson`, one MultiPolygon per class.
    /// The corrected canopy raster is preferred over the plain one when both
    /// exist. Cell edges are kept as they are, without simplification.
    pub fn export_canopy_polygons(&self, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let mut report = StageReport::default();

        for region in self.regions_by_ids(region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            let files = self.config.region_files(&dir_name);
            let out = outputs.join(files.polygons());
            if out.exists() {
                log::debug!("{}: polygons already exported", region.name);
                report.skipped += 1;
                continue;
            }
            let corrected = outputs.join(files.corrected());
            let plain = outputs.join(files.canopy());
            let Some(src) = [corrected, plain].into_iter().find(|p| p.exists()) else {
                log::warn!("{}: no canopy raster to export", region.name);
                report.missing += 1;
                continue;
            };

            let raster = self.engine.read(&src)?;
            let features = class_polygons(&raster)?
                .into_iter()
                .map(|(class, shape)| {
                    let mut props = Map::new();
                    props.insert(CANOPY_FIELD.into(), json!(class));
                    Feature::new(Geometry::from_shape(&shape), props)
                })
                .collect();
            write_collection(&out, &FeatureCollection::new(features))?;
            log::info!("{}: exported {}", region.name, src.display());
            report.written += 1;
        }

        log::info!("polygon export: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}

/// One shape per class value, made of the horizontal runs of equal cells in
/// each row. Nodata cells belong to no shape.
pub fn class_polygons(raster: &Raster) -> Result<BTreeMap<u8, Shape>> {
    let m = &raster.meta;
    let mut runs: BTreeMap<u8, Vec<Polygon>> = BTreeMap::new();
    for row in 0..m.height {
        let ymax = m.ymax - row as f64 * m.cell_height;
        let ymin = ymax - m.cell_height;
        let mut col = 0;
        while col < m.width {
            let value = raster.pixel(row, col)[0];
            let first = col;
            while col < m.width && raster.pixel(row, col)[0] == value {
                col += 1;
            }
            if m.nodata == Some(value) {
                continue;
            }
            let xmin = m.xmin + first as f64 * m.cell_width;
            let xmax = m.xmin + col as f64 * m.cell_width;
            runs.entry(value).or_default().push(Polygon::rectangle(xmin, ymin, xmax, ymax));
        }
    }
    runs.into_iter().map(|(class, polys)| Ok((class, Shape::new(polys)?))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LocalEngine, RasterEngine};
    use crate::geojson::read_collection;
    use crate::geometry::Point;
    use crate::pipeline::fixtures::{study_area, tile_meta};
    use crate::raster::{CANOPY, CLASS_NODATA, NON_CANOPY};
    use crate::test_utils::ScratchDir;
    use approx::assert_relative_eq;

    fn sample() -> Raster {
        let mut meta = tile_meta(0.0, 0.0);
        meta.nodata = Some(CLASS_NODATA);
        let mut r = Raster::filled(meta, NON_CANOPY);
        for col in 2..5 {
            r.pixel_mut(0, col)[0] = CANOPY;
        }
        r.pixel_mut(9, 9)[0] = CLASS_NODATA;
        r
    }

    #[test]
    fn runs_cover_each_class_exactly() {
        let shapes = class_polygons(&sample()).unwrap();
        assert_eq!(shapes.keys().copied().collect::<Vec<_>>(), [NON_CANOPY, CANOPY]);
        assert_relative_eq!(shapes[&CANOPY].area(), 3.0);
        assert_relative_eq!(shapes[&NON_CANOPY].area(), 96.0);
        assert!(shapes[&CANOPY].contains(Point::new(3.5, 9.5)));
        assert!(!shapes[&NON_CANOPY].contains(Point::new(9.5, 0.5)));
    }

    #[test]
    fn corrected_raster_is_preferred() {
        let dir = ScratchDir::new("export");
        let config = study_area(dir.path());
        let outputs = config.outputs_dir("Winder_Slope");
        std::fs::create_dir_all(&outputs).unwrap();
        let plain = sample();
        LocalEngine.write(&plain, &outputs.join("canopy_2009_Winder_Slope.tif")).unwrap();
        LocalEngine
            .write(&plain.invert_classes().unwrap(), &outputs.join("corrected_canopy_2009_Winder_Slope.tif"))
            .unwrap();

        let pipeline = Pipeline::new(config);
        let report = pipeline.export_canopy_polygons(&[8, 7]).unwrap();
        assert_eq!(report, StageReport { written: 1, skipped: 0, missing: 1 });

        let fc = read_collection(&outputs.join("canopy_2009_Winder_Slope.geojson")).unwrap();
        assert_eq!(fc.features.len(), 2);
        let canopy = fc.features.iter().find(|f| f.property(CANOPY_FIELD) == Some(&json!(CANOPY))).unwrap();
        assert_relative_eq!(canopy.shape().unwrap().area(), 96.0);

        let again = pipeline.export_canopy_polygons(&[8]).unwrap();
        assert_eq!(again.skipped, 1);
    }
}
