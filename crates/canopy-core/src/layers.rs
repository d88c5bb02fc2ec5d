//! Region and tile records and the vector store interface that serves them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CanopyError, Result};
use crate::geometry::Shape;
use crate::naming::{region_dir_name, TileName};

pub type RegionId = i64;
pub type TileId = i64;

/// An analysis region (physiographic district).
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub boundary: Shape,
    pub area_sqkm: f64,
}

impl Region {
    /// Folder-safe name used for the region's staging area and outputs.
    pub fn dir_name(&self) -> String {
        region_dir_name(&self.name)
    }
}

/// One imagery tile footprint from the tile layer.
#[derive(Debug, Clone)]
pub struct TileRecord {
    /// Object id, stable per source dataset.
    pub id: TileId,
    pub name: TileName,
    pub footprint: Shape,
    /// Regions the tile intersects; `None` when the membership field is
    /// absent on this feature.
    pub membership: Option<RegionSet>,
}

/// Ordered, duplicate-free set of region ids.
///
/// Persisted as a comma-delimited string with a delimiter on both sides of
/// every id (`,8,12,`), or `,` when empty, so text containment queries can
/// never confuse `1` with `12`. In memory, membership is a native lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionSet(Vec<RegionId>);

impl RegionSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append `id` unless already present; insertion order is kept.
    pub fn insert(&mut self, id: RegionId) {
        if !self.0.contains(&id) {
            self.0.push(id);
        }
    }

    pub fn contains(&self, id: RegionId) -> bool {
        self.0.contains(&id)
    }

    pub fn contains_any(&self, ids: &[RegionId]) -> bool {
        ids.iter().any(|&id| self.contains(id))
    }

    pub fn ids(&self) -> &[RegionId] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<RegionId> for RegionSet {
    fn from_iter<I: IntoIterator<Item = RegionId>>(iter: I) -> Self {
        let mut set = RegionSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Display for RegionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(",")?;
        for id in &self.0 {
            write!(f, "{id},")?;
        }
        Ok(())
    }
}

impl FromStr for RegionSet {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<RegionId>()
                    .map_err(|_| CanopyError::Config(format!("bad region id {t:?} in membership {s:?}")))
            })
            .collect()
    }
}

impl Serialize for RegionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RegionSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Region and tile layers.
///
/// Implementations serve features in dataset order; every stage iterates in
/// that order so repeated runs are deterministic.
pub trait VectorStore {
    fn regions(&self) -> Result<Vec<Region>>;

    fn tiles(&self) -> Result<Vec<TileRecord>>;

    /// Name of the tile layer, for error messages.
    fn tile_layer_name(&self) -> String;

    /// Whether every tile feature carries the membership field.
    fn has_membership_field(&self) -> Result<bool>;

    /// Replace the membership field of every listed tile; tiles not listed
    /// get an empty set. Creates the field when absent.
    fn write_memberships(&self, memberships: &[(TileId, RegionSet)]) -> Result<()>;
}
