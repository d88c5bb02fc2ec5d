//! Ground-truth sampling: random validation points per region, and carrying
//! an earlier year's points forward.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{Map, Value};

use crate::error::{CanopyError, Result};
use crate::geojson::{read_collection, write_collection, Feature, FeatureCollection, Geometry};
use crate::geometry::Point;
use crate::layers::{Region, RegionId, TileRecord};
use crate::naming::gtpoints_year;
use crate::pipeline::{Pipeline, StageReport};
use crate::raster::{Raster, CANOPY, NON_CANOPY};
use crate::status::Stage;

/// Number of points for a region of `area` km², interpolated linearly
/// between the point bounds and rounded up, so any fraction of a point
/// counts as one.
///
/// Swapped bounds are put back in order. With equal area bounds the region
/// gets `max_points` at or above the bound and `min_points` below it.
pub fn point_count(area: f64, min_area: f64, max_area: f64, min_points: usize, max_points: usize) -> usize {
    let (min_area, max_area) = if min_area > max_area { (max_area, min_area) } else { (min_area, max_area) };
    let (min_points, max_points) = (min_points.min(max_points), min_points.max(max_points));
    if max_area == min_area {
        return if area >= max_area { max_points } else { min_points };
    }
    let t = (area - min_area) / (max_area - min_area);
    let raw = min_points as f64 + t * (max_points - min_points) as f64;
    (raw.ceil().max(0.0) as usize).clamp(min_points, max_points)
}

/// Name of the per-year ground-truth attribute.
pub fn gt_field(year: u16) -> String {
    format!("GT_{year}")
}

impl Pipeline {
    /// Write `gtpoints_<year>_<Region>.geojson` for each region: a point set
    /// sized by [`point_count`] with each point's class read from the
    /// clipped tile under it. An existing point set is kept.
    pub fn generate_gtpoints(
        &self,
        region_ids: &[RegionId],
        min_area: f64,
        max_area: f64,
        min_points: usize,
        max_points: usize,
    ) -> Result<StageReport> {
        let start = Instant::now();
        let field = gt_field(self.config.analysis_year);
        let tiles = self.store.tiles()?;
        let mut report = StageReport::default();

        for region in self.regions_by_ids(region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            let out = outputs.join(self.config.region_files(&dir_name).gtpoints());
            if out.exists() {
                log::debug!("{}: ground-truth points already exist", region.name);
                report.skipped += 1;
                continue;
            }

            let count = point_count(region.area_sqkm, min_area, max_area, min_points, max_points);
            log::info!("{}: {count} points for {:.2} km²", region.name, region.area_sqkm);
            let mut rng = StdRng::seed_from_u64(self.config.seed ^ region.id as u64);
            let points = region.boundary.random_points(count, &mut rng)?;

            let mut sampler = ValueSampler::new(self, &region, &tiles);
            let mut features = Vec::with_capacity(points.len());
            for p in points {
                let mut props = Map::new();
                props.insert(field.clone(), sampler.sample(p)?.map_or(Value::Null, Value::from));
                features.push(Feature::new(Geometry::point(p), props));
            }
            fs::create_dir_all(&outputs).map_err(|e| CanopyError::io(&outputs, e))?;
            write_collection(&out, &FeatureCollection::new(features))?;
            report.written += 1;
        }

        log::info!("ground-truth generation: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    /// Copy each region's most recent earlier point set out of
    /// `old_results_root` into this year's outputs, keeping every location
    /// and earlier attribute and adding this year's values.
    pub fn update_gtpoints(&self, old_results_root: &Path, region_ids: &[RegionId]) -> Result<StageReport> {
        let start = Instant::now();
        let year = self.config.analysis_year;
        let field = gt_field(year);
        let tiles = self.store.tiles()?;
        let mut report = StageReport::default();

        for region in self.regions_by_ids(region_ids)? {
            let dir_name = region.dir_name();
            let outputs = self.config.outputs_dir(&dir_name);
            let out = outputs.join(self.config.region_files(&dir_name).gtpoints());
            if out.exists() {
                log::debug!("{}: ground-truth points for {year} already exist", region.name);
                report.skipped += 1;
                continue;
            }
            let old_outputs = old_results_root.join(&dir_name).join("Outputs");
            let Some(prior) = latest_gtpoints(&old_outputs, &dir_name, year)? else {
                log::warn!("{}: no earlier ground-truth points under {}", region.name, old_outputs.display());
                report.missing += 1;
                continue;
            };
            log::info!("{}: updating {}", region.name, prior.display());

            let mut fc = read_collection(&prior)?;
            let mut sampler = ValueSampler::new(self, &region, &tiles);
            for f in &mut fc.features {
                let value = sampler.sample(f.point()?)?;
                f.set_property(&field, value.map_or(Value::Null, Value::from));
            }
            fs::create_dir_all(&outputs).map_err(|e| CanopyError::io(&outputs, e))?;
            write_collection(&out, &fc)?;
            report.written += 1;
        }

        log::info!("ground-truth update: {report} in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }
}

/// Most recent `gtpoints_<year>_<region>.geojson` in `dir` from before
/// `before`.
fn latest_gtpoints(dir: &Path, region: &str, before: u16) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CanopyError::io(dir, e)),
    };
    let mut best: Option<(u16, PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|e| CanopyError::io(dir, e))?;
        let name = entry.file_name();
        let Some(year) = name.to_str().and_then(|n| gtpoints_year(n, region)) else {
            continue;
        };
        if year < before && best.as_ref().map_or(true, |(y, _)| year > *y) {
            best = Some((year, entry.path()));
        }
    }
    Ok(best.map(|(_, p)| p))
}

/// Reads class values at points from a region's clipped tiles, holding
/// each tile in memory once opened.
struct ValueSampler<'a> {
    pipeline: &'a Pipeline,
    tiles: &'a [TileRecord],
    outputs: PathBuf,
    invert: bool,
    cache: HashMap<PathBuf, Raster>,
}

impl<'a> ValueSampler<'a> {
    fn new(pipeline: &'a Pipeline, region: &Region, tiles: &'a [TileRecord]) -> Self {
        Self {
            pipeline,
            tiles,
            outputs: pipeline.config.outputs_dir(&region.dir_name()),
            invert: pipeline.config.is_inverted(region.id),
            cache: HashMap::new(),
        }
    }

    /// Canonical class under `p`; `None` outside every clipped tile, out of
    /// bounds, or on nodata.
    fn sample(&mut self, p: Point) -> Result<Option<u8>> {
        let path = self
            .tiles
            .iter()
            .filter(|t| t.footprint.contains(p))
            .map(|t| self.outputs.join(t.name.staged(Stage::Clipped)))
            .find(|path| path.exists());
        let Some(path) = path else {
            return Ok(None);
        };
        let raster = match self.cache.entry(path) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let raster = self.pipeline.engine.read(e.key())?;
                e.insert(raster)
            }
        };
        let value = match raster.value_at(p) {
            Ok(v) if raster.meta.nodata == Some(v) => return Ok(None),
            Ok(v) => v,
            Err(CanopyError::OutOfBounds { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(match (self.invert, value) {
            (true, CANOPY) => NON_CANOPY,
            (true, NON_CANOPY) => CANOPY,
            (_, v) => v,
        }))
    }
}
