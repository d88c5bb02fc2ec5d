//! GeoJSON-backed vector layers.
//!
//! Region and tile layers are FeatureCollections with Polygon or
//! MultiPolygon geometry. Unknown members are carried through untouched so
//! writing the membership field does not lose anything else in the file.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CanopyError, Result};
use crate::geometry::{Point, Polygon, Shape};
use crate::layers::{Region, RegionSet, TileId, TileRecord, VectorStore};
use crate::naming::TileName;
use crate::status::write_atomic;

// ── Document types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { kind: "FeatureCollection".into(), features, extra: Map::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            kind: "Feature".into(),
            id: None,
            geometry: Some(geometry),
            properties: Some(properties),
            extra: Map::new(),
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.as_ref()?.get(key).filter(|v| !v.is_null())
    }

    pub fn has_property(&self, key: &str) -> bool {
        self.properties.as_ref().is_some_and(|p| p.contains_key(key))
    }

    pub fn set_property(&mut self, key: &str, value: Value) {
        self.properties.get_or_insert_with(Map::new).insert(key.to_string(), value);
    }

    /// Area geometry of this feature.
    pub fn shape(&self) -> Result<Shape> {
        match &self.geometry {
            Some(g) => g.to_shape(),
            None => Err(CanopyError::Geometry("feature has no geometry".into())),
        }
    }

    pub fn point(&self) -> Result<Point> {
        match &self.geometry {
            Some(Geometry::Point { coordinates }) => position(coordinates),
            _ => Err(CanopyError::Geometry("expected a Point feature".into())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: Vec<f64> },
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
}

impl Geometry {
    pub fn point(p: Point) -> Self {
        Geometry::Point { coordinates: vec![p.x, p.y] }
    }

    /// Closed rings, as GeoJSON requires.
    pub fn from_shape(shape: &Shape) -> Self {
        let ring = |r: &[Point]| -> Vec<Vec<f64>> {
            let mut out: Vec<Vec<f64>> = r.iter().map(|p| vec![p.x, p.y]).collect();
            if r.first() != r.last() {
                if let Some(first) = r.first() {
                    out.push(vec![first.x, first.y]);
                }
            }
            out
        };
        Geometry::MultiPolygon {
            coordinates: shape
                .polygons
                .iter()
                .map(|p| std::iter::once(&p.exterior).chain(&p.holes).map(|r| ring(r)).collect())
                .collect(),
        }
    }

    pub fn to_shape(&self) -> Result<Shape> {
        match self {
            Geometry::Polygon { coordinates } => Shape::new(vec![polygon(coordinates)?]),
            Geometry::MultiPolygon { coordinates } => {
                Shape::new(coordinates.iter().map(|p| polygon(p)).collect::<Result<_>>()?)
            }
            Geometry::Point { .. } => Err(CanopyError::Geometry("expected an area geometry".into())),
        }
    }
}

fn position(c: &[f64]) -> Result<Point> {
    match c {
        [x, y, ..] => Ok(Point::new(*x, *y)),
        _ => Err(CanopyError::Geometry("position needs two coordinates".into())),
    }
}

fn polygon(rings: &[Vec<Vec<f64>>]) -> Result<Polygon> {
    let mut rings = rings
        .iter()
        .map(|r| r.iter().map(|c| position(c)).collect::<Result<Vec<_>>>());
    let exterior = rings
        .next()
        .ok_or_else(|| CanopyError::Geometry("polygon without rings".into()))??;
    let holes = rings.collect::<Result<Vec<_>>>()?;
    Polygon::new(exterior, holes)
}

// ── File helpers ─────────────────────────────────────────────────────────────

pub fn read_collection(path: &Path) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path).map_err(|e| CanopyError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| CanopyError::json(path, e))
}

pub fn write_collection(path: &Path, fc: &FeatureCollection) -> Result<()> {
    let json = serde_json::to_string(fc).map_err(|e| CanopyError::json(path, e))?;
    write_atomic(path, json.as_bytes())
}

fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

/// Field names the store reads and writes.
#[derive(Debug, Clone)]
pub struct LayerFields {
    pub region_id: String,
    pub region_name: String,
    pub region_area: Option<String>,
    pub tile_filename: String,
    pub membership: String,
}

/// Region and tile layers stored as two GeoJSON files.
#[derive(Debug, Clone)]
pub struct GeoJsonStore {
    regions_path: PathBuf,
    tiles_path: PathBuf,
    fields: LayerFields,
}

impl GeoJsonStore {
    pub fn new(regions_path: impl Into<PathBuf>, tiles_path: impl Into<PathBuf>, fields: LayerFields) -> Self {
        Self { regions_path: regions_path.into(), tiles_path: tiles_path.into(), fields }
    }

    fn missing(&self, layer: &Path, field: &str) -> CanopyError {
        CanopyError::MissingField { layer: layer.display().to_string(), field: field.to_string() }
    }

    /// Object id: the numeric feature id, else the feature's position.
    fn tile_id(feature: &Feature, index: usize) -> TileId {
        feature.id.as_ref().and_then(as_i64).unwrap_or(index as TileId)
    }

    fn region_from(&self, f: &Feature) -> Result<Region> {
        let id = f
            .property(&self.fields.region_id)
            .and_then(as_i64)
            .ok_or_else(|| self.missing(&self.regions_path, &self.fields.region_id))?;
        let name = f
            .property(&self.fields.region_name)
            .and_then(Value::as_str)
            .ok_or_else(|| self.missing(&self.regions_path, &self.fields.region_name))?
            .to_string();
        let boundary = f.shape()?;
        let area_sqkm = self
            .fields
            .region_area
            .as_deref()
            .and_then(|field| f.property(field))
            .and_then(Value::as_f64)
            .unwrap_or_else(|| boundary.area() / 1.0e6);
        Ok(Region { id, name, boundary, area_sqkm })
    }
}

impl VectorStore for GeoJsonStore {
    fn regions(&self) -> Result<Vec<Region>> {
        read_collection(&self.regions_path)?
            .features
            .iter()
            .map(|f| self.region_from(f))
            .collect()
    }

    fn tiles(&self) -> Result<Vec<TileRecord>> {
        let fc = read_collection(&self.tiles_path)?;
        fc.features
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let name = f
                    .property(&self.fields.tile_filename)
                    .and_then(Value::as_str)
                    .ok_or_else(|| self.missing(&self.tiles_path, &self.fields.tile_filename))?;
                let membership = f
                    .property(&self.fields.membership)
                    .and_then(Value::as_str)
                    .map(str::parse)
                    .transpose()?;
                Ok(TileRecord {
                    id: Self::tile_id(f, i),
                    name: TileName::from_field(name),
                    footprint: f.shape()?,
                    membership,
                })
            })
            .collect()
    }

    fn tile_layer_name(&self) -> String {
        self.tiles_path.display().to_string()
    }

    fn has_membership_field(&self) -> Result<bool> {
        let fc = read_collection(&self.tiles_path)?;
        Ok(fc.features.iter().all(|f| f.has_property(&self.fields.membership)))
    }

    fn write_memberships(&self, memberships: &[(TileId, RegionSet)]) -> Result<()> {
        let mut fc = read_collection(&self.tiles_path)?;
        let by_id: HashMap<TileId, &RegionSet> = memberships.iter().map(|(id, s)| (*id, s)).collect();
        let empty = RegionSet::new();
        for (i, f) in fc.features.iter_mut().enumerate() {
            let set = by_id.get(&Self::tile_id(f, i)).copied().unwrap_or(&empty);
            f.set_property(&self.fields.membership, Value::String(set.to_string()));
        }
        write_collection(&self.tiles_path, &fc)
    }
}
