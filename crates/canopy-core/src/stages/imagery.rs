//! Source imagery lookup for checking ground-truth points by eye.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::geojson::read_collection;
use crate::pipeline::Pipeline;

impl Pipeline {
    /// Source tiles under any point of the point set at `points_path`,
    /// sorted by file name.
    pub fn tiles_for_points(&self, points_path: &Path) -> Result<Vec<PathBuf>> {
        let points = read_collection(points_path)?
            .features
            .iter()
            .map(|f| f.point())
            .collect::<Result<Vec<_>>>()?;
        let mut tiles: Vec<_> = self
            .store
            .tiles()?
            .into_iter()
            .filter(|t| points.iter().any(|&p| t.footprint.contains(p)))
            .map(|t| t.name)
            .collect();
        tiles.sort_by(|a, b| a.stem().cmp(b.stem()));
        tiles.dedup();
        log::info!("{} tiles under {} points", tiles.len(), points.len());
        Ok(tiles.iter().map(|t| self.source_tile_path(t)).collect())
    }
}
