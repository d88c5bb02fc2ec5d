//! Pipeline stages, in processing order.
//!
//! Each module adds its operations to [`Pipeline`](crate::pipeline::Pipeline).
//! Tile stages skip outputs that are already done, report and skip items
//! whose inputs are missing, and fail the whole stage on schema, geometry
//! and projection errors.

pub mod membership;
pub mod reproject;
pub mod classify;
pub mod clip;
pub mod mosaic;
pub mod invert;
pub mod export;
pub mod sampling;
pub mod imagery;
