//! Error type shared by every pipeline component.

use std::path::PathBuf;

use thiserror::Error;

use crate::grid::Crs;

/// Errors raised by the canopy pipeline.
///
/// Per-item omissions (a missing source tile, a tile without a
/// classification artifact) are logged and counted by the stages instead of
/// being returned; everything here aborts the stage that hit it.
#[derive(Debug, Error)]
pub enum CanopyError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("TIFF error in {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("layer {layer} has no field {field}")]
    MissingField { layer: String, field: String },

    #[error("missing input: {0}")]
    MissingInput(PathBuf),

    #[error("invalid geometry: {0}")]
    Geometry(String),

    #[error("unsupported raster {path}: {reason}")]
    UnsupportedRaster { path: PathBuf, reason: String },

    #[error("cannot transform from {from} to {to}: {reason}")]
    Projection { from: Crs, to: Crs, reason: String },

    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    #[error("point ({x}, {y}) lies outside the raster")]
    OutOfBounds { x: f64, y: f64 },
}

pub type Result<T, E = CanopyError> = std::result::Result<T, E>;

impl CanopyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json { path: path.into(), source }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        Self::Tiff { path: path.into(), source }
    }

    pub(crate) fn unsupported(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::UnsupportedRaster { path: path.into(), reason: reason.into() }
    }
}
