//! Hand-off point with the external feature-extraction (AFE) classifier.
//!
//! The classifier runs outside this system and drops one artifact per
//! reprojected tile into the region's Outputs folder, named after the
//! reprojected tile (`r<stem>`). It is either a polygon layer with a class
//! attribute or a raster in the classifier's own {1, 2} coding.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::{CanopyError, Result};
use crate::geojson::read_collection;
use crate::geometry::Shape;
use crate::naming::TileName;

/// Class attribute on vector artifacts.
pub const CLASS_FIELD: &str = "CLASS_ID";

/// Transitional raster codes → canonical codes (1 → non-canopy, 2 → canopy).
pub const TRANSITIONAL_CODES: [(u8, u8); 2] = [(1, 0), (2, 1)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Vector(PathBuf),
    Raster(PathBuf),
}

/// Producer of per-tile classification artifacts.
pub trait ClassificationSource {
    fn locate(&self, outputs_dir: &Path, tile: &TileName) -> Option<Artifact>;
}

/// Looks for `r<stem>.geojson`, then `r<stem>.tif`, in the Outputs folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectorySource;

impl ClassificationSource for DirectorySource {
    fn locate(&self, outputs_dir: &Path, tile: &TileName) -> Option<Artifact> {
        let stem = tile.artifact_stem();
        let vector = outputs_dir.join(format!("{stem}.geojson"));
        if vector.exists() {
            return Some(Artifact::Vector(vector));
        }
        let raster = outputs_dir.join(format!("{stem}.tif"));
        raster.exists().then_some(Artifact::Raster(raster))
    }
}

/// Polygons and their class codes from a vector artifact.
pub fn load_class_features(path: &Path) -> Result<Vec<(Shape, u8)>> {
    let fc = read_collection(path)?;
    fc.features
        .iter()
        .map(|f| {
            let class = f
                .property(CLASS_FIELD)
                .and_then(Value::as_u64)
                .and_then(|v| u8::try_from(v).ok())
                .ok_or_else(|| CanopyError::MissingField {
                    layer: path.display().to_string(),
                    field: CLASS_FIELD.into(),
                })?;
            Ok((f.shape()?, class))
        })
        .collect()
}
