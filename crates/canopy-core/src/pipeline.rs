//! Pipeline orchestrator: owns the configuration and the collaborators every
//! stage runs against, and sequences the classification stages.
//!
//! The stage operations themselves live in [`crate::stages`], one module per
//! stage, as further `impl Pipeline` blocks.

use std::fmt;
use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::afe::{ClassificationSource, DirectorySource};
use crate::config::Config;
use crate::engine::{LocalEngine, RasterEngine};
use crate::error::{CanopyError, Result};
use crate::geojson::GeoJsonStore;
use crate::layers::{Region, RegionId, TileRecord, VectorStore};
use crate::naming::TileName;

// ── Reports ──────────────────────────────────────────────────────────────────

/// Per-item outcome counts of one stage invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub written: usize,
    /// Outputs already present.
    pub skipped: usize,
    /// Items omitted because an input was absent or unreadable.
    pub missing: usize,
}

impl AddAssign for StageReport {
    fn add_assign(&mut self, rhs: Self) {
        self.written += rhs.written;
        self.skipped += rhs.skipped;
        self.missing += rhs.missing;
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} written, {} skipped, {} missing", self.written, self.skipped, self.missing)
    }
}

/// Reports of the three stages run by [`Pipeline::convert_afe_to_canopy_tif`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanopyReport {
    pub classified: StageReport,
    pub clipped: StageReport,
    pub mosaicked: StageReport,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

pub struct Pipeline {
    pub(crate) config: Config,
    pub(crate) store: Box<dyn VectorStore>,
    pub(crate) engine: Box<dyn RasterEngine>,
    pub(crate) source: Box<dyn ClassificationSource>,
}

impl Pipeline {
    /// GeoJSON layers, local GeoTIFF engine and classifier artifacts read
    /// from each region's Outputs folder.
    pub fn new(config: Config) -> Self {
        let store = GeoJsonStore::new(&config.regions_layer, &config.tiles_layer, config.layer_fields());
        Self::with_parts(config, Box::new(store), Box::new(LocalEngine), Box::new(DirectorySource))
    }

    pub fn with_parts(
        config: Config,
        store: Box<dyn VectorStore>,
        engine: Box<dyn RasterEngine>,
        source: Box<dyn ClassificationSource>,
    ) -> Self {
        Self { config, store, engine, source }
    }

    /// Re-read the configuration file and rebuild every component from it.
    pub fn reload(self) -> Result<Self> {
        Ok(Self::new(self.config.reload()?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Classification → clipping → mosaicking over the same region set.
    /// Each stage runs exactly once; the first stage failure aborts the
    /// sequence.
    pub fn convert_afe_to_canopy_tif(&self, region_ids: &[RegionId]) -> Result<CanopyReport> {
        let start = Instant::now();
        let report = CanopyReport {
            classified: self.convert_afe_to_final_tiles(region_ids)?,
            clipped: self.clip_final_tiles(region_ids)?,
            mosaicked: self.mosaic_clipped_final_tiles(region_ids)?,
        };
        log::info!("canopy rasters done in {:.1}s", start.elapsed().as_secs_f64());
        Ok(report)
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    /// Regions for `ids` in the order given. Unknown ids are reported and
    /// dropped; duplicates are ignored.
    pub(crate) fn regions_by_ids(&self, ids: &[RegionId]) -> Result<Vec<Region>> {
        let mut all = self.store.regions()?;
        let mut out: Vec<Region> = Vec::with_capacity(ids.len());
        for &id in ids {
            if out.iter().any(|r| r.id == id) {
                continue;
            }
            match all.iter().position(|r| r.id == id) {
                Some(i) => out.push(all.swap_remove(i)),
                None => log::warn!("region {id} not found in the region layer"),
            }
        }
        Ok(out)
    }

    /// Tiles whose membership set holds any of `region_ids`, in dataset
    /// order. Fails when the tile layer has no membership field.
    pub fn select_tiles(&self, region_ids: &[RegionId]) -> Result<Vec<TileRecord>> {
        self.require_membership()?;
        Ok(self
            .store
            .tiles()?
            .into_iter()
            .filter(|t| t.membership.as_ref().is_some_and(|m| m.contains_any(region_ids)))
            .collect())
    }

    /// Each requested region paired with its tiles. The tile layer is read
    /// once.
    pub(crate) fn regions_with_tiles(&self, region_ids: &[RegionId]) -> Result<Vec<(Region, Vec<TileRecord>)>> {
        self.require_membership()?;
        let regions = self.regions_by_ids(region_ids)?;
        let tiles = self.store.tiles()?;
        Ok(regions
            .into_iter()
            .map(|region| {
                let mine = tiles
                    .iter()
                    .filter(|t| t.membership.as_ref().is_some_and(|m| m.contains(region.id)))
                    .cloned()
                    .collect();
                (region, mine)
            })
            .collect())
    }

    fn require_membership(&self) -> Result<()> {
        if self.store.has_membership_field()? {
            Ok(())
        } else {
            Err(CanopyError::MissingField {
                layer: self.store.tile_layer_name(),
                field: self.config.membership_field.clone(),
            })
        }
    }

    /// `<imagery_root>/<5-digit block>/<tile>.tif`, or directly under the
    /// root for names that do not follow the quarter-quad pattern.
    pub(crate) fn source_tile_path(&self, tile: &TileName) -> PathBuf {
        match tile.folder() {
            Some(folder) => self.config.imagery_root.join(folder).join(tile.file_name()),
            None => self.config.imagery_root.join(tile.file_name()),
        }
    }
}

/// Whether a region's Outputs folder holds anything to work on.
pub(crate) fn has_outputs(dir: &Path) -> bool {
    fs::read_dir(dir).map(|mut entries| entries.next().is_some()).unwrap_or(false)
}
