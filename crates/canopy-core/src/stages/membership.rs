//! Region membership index: records on every tile the regions it touches.

use std::time::Instant;

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::Result;
use crate::layers::{Region, RegionSet, TileId, TileRecord};
use crate::pipeline::Pipeline;

impl Pipeline {
    /// Recompute the membership field of every tile from scratch. Creates
    /// the field when absent; re-running gives the same result. Returns the
    /// number of tiles that touch at least one region.
    pub fn assign_regions_to_tiles(&self) -> Result<usize> {
        let start = Instant::now();
        let regions = self.store.regions()?;
        let tiles = self.store.tiles()?;
        log::info!("indexing {} tiles against {} regions", tiles.len(), regions.len());

        let memberships = compute_memberships(&tiles, &regions);
        self.store.write_memberships(&memberships)?;

        let assigned = memberships.iter().filter(|(_, set)| !set.is_empty()).count();
        log::info!(
            "{assigned} of {} tiles assigned in {:.1}s",
            tiles.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(assigned)
    }

    /// Same as [`assign_regions_to_tiles`](Self::assign_regions_to_tiles).
    pub fn assign_phyregs_to_naipqq(&self) -> Result<usize> {
        self.assign_regions_to_tiles()
    }
}

fn membership_of(tile: &TileRecord, regions: &[Region]) -> (TileId, RegionSet) {
    let set = regions
        .iter()
        .filter(|r| r.boundary.intersects(&tile.footprint))
        .map(|r| r.id)
        .collect();
    (tile.id, set)
}

#[cfg(not(feature = "threading"))]
fn compute_memberships(tiles: &[TileRecord], regions: &[Region]) -> Vec<(TileId, RegionSet)> {
    tiles.iter().map(|t| membership_of(t, regions)).collect()
}

#[cfg(feature = "threading")]
fn compute_memberships(tiles: &[TileRecord], regions: &[Region]) -> Vec<(TileId, RegionSet)> {
    tiles.par_iter().map(|t| membership_of(t, regions)).collect()
}

#[cfg(test)]
mod tests {
    use crate::geojson::read_collection;
    use crate::pipeline::fixtures::study_area;
    use crate::pipeline::Pipeline;
    use crate::test_utils::ScratchDir;
    use serde_json::{json, Value};
    use std::fs;

    fn memberships(path: &std::path::Path) -> Vec<Value> {
        read_collection(path)
            .unwrap()
            .features
            .iter()
            .map(|f| f.property("PHYREGS").cloned().unwrap_or(Value::Null))
            .collect()
    }

    #[test]
    fn every_tile_gets_its_regions() {
        let dir = ScratchDir::new("membership");
        let config = study_area(dir.path());
        let pipeline = Pipeline::new(config.clone());
        assert_eq!(pipeline.assign_phyregs_to_naipqq().unwrap(), 4);
        assert_eq!(memberships(&config.tiles_layer), [json!(",8,"), json!(",7,"), json!(",8,"), json!(",7,")]);
    }

    #[test]
    fn rerun_resets_stale_values() {
        let dir = ScratchDir::new("membership-rerun");
        let config = study_area(dir.path());
        let pipeline = Pipeline::new(config.clone());
        pipeline.assign_regions_to_tiles().unwrap();

        let stale = fs::read_to_string(&config.tiles_layer).unwrap().replace(",7,", ",7,12,");
        fs::write(&config.tiles_layer, stale).unwrap();
        pipeline.assign_regions_to_tiles().unwrap();
        let first = fs::read_to_string(&config.tiles_layer).unwrap();
        pipeline.assign_regions_to_tiles().unwrap();

        assert_eq!(memberships(&config.tiles_layer)[1], json!(",7,"));
        assert_eq!(fs::read_to_string(&config.tiles_layer).unwrap(), first);
    }

    #[test]
    fn tile_outside_every_region_gets_an_empty_set() {
        let dir = ScratchDir::new("membership-empty");
        let config = study_area(dir.path());
        let text = fs::read_to_string(&config.regions_layer).unwrap();
        let mut fc: Value = serde_json::from_str(&text).unwrap();
        fc["features"].as_array_mut().unwrap().truncate(1);
        fs::write(&config.regions_layer, fc.to_string()).unwrap();

        let pipeline = Pipeline::new(config.clone());
        assert_eq!(pipeline.assign_regions_to_tiles().unwrap(), 2);
        assert_eq!(memberships(&config.tiles_layer)[1], json!(","));
    }
}
