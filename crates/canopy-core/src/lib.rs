//! Canopy mapping pipeline.
//!
//! Turns per-tile aerial imagery and externally produced canopy
//! classifications into one two-class canopy raster per physiographic
//! region, and generates the ground-truth point sets used to validate it.
//! Everything runs through [`pipeline::Pipeline`]; the stage operations are
//! in [`stages`].

pub mod afe;
pub mod config;
pub mod engine;
pub mod error;
pub mod geojson;
pub mod geometry;
pub mod geotiff;
pub mod grid;
pub mod layers;
pub mod naming;
pub mod pipeline;
pub mod projection;
pub mod raster;
pub mod stages;
pub mod status;

#[cfg(test)]
mod test_utils;

pub use config::Config;
pub use error::{CanopyError, Result};
pub use layers::RegionId;
pub use pipeline::{CanopyReport, Pipeline, StageReport};
