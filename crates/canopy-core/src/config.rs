//! Pipeline configuration.
//!
//! A `Config` is an immutable value read from one JSON file. Components
//! receive it at construction; picking up edits means [`Config::reload`]
//! followed by rebuilding the components from the new value.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};
use crate::geojson::LayerFields;
use crate::grid::Crs;
use crate::layers::RegionId;
use crate::naming::RegionFiles;
use crate::status::write_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Region (physiographic district) polygon layer.
    pub regions_layer: PathBuf,
    pub region_id_field: String,
    pub region_name_field: String,
    /// Area attribute in square kilometres; computed from the boundary when
    /// unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_area_field: Option<String>,

    /// Imagery tile footprint layer.
    pub tiles_layer: PathBuf,
    pub tile_filename_field: String,
    /// Tile attribute holding the delimited region membership set.
    pub membership_field: String,

    /// Root of the source imagery tree (`<root>/<5-digit block>/<tile>.tif`).
    pub imagery_root: PathBuf,
    /// Numeric WKID / EPSG code every output is projected into.
    pub target_crs: u32,
    /// Reference grid raster. Synthesized from a reprojected tile when absent.
    pub snap_raster: PathBuf,

    pub results_root: PathBuf,
    pub analysis_year: u16,
    /// Regions whose classifier output is known to have the classes swapped.
    pub inverted_region_ids: Vec<RegionId>,
    /// Base seed for ground-truth point generation.
    pub seed: u64,

    #[serde(skip)]
    pub(crate) source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regions_layer: PathBuf::from("data/regions.geojson"),
            region_id_field: "PHYSIO_ID".into(),
            region_name_field: "NAME".into(),
            region_area_field: None,
            tiles_layer: PathBuf::from("data/naipqq.geojson"),
            tile_filename_field: "FileName".into(),
            membership_field: "PHYREGS".into(),
            imagery_root: PathBuf::from("naip"),
            target_crs: 102039,
            snap_raster: PathBuf::from("data/snap.tif"),
            results_root: PathBuf::from("results"),
            analysis_year: 2009,
            inverted_region_ids: Vec::new(),
            seed: 42,
            source: None,
        }
    }
}

impl Config {
    /// Parse `path`. Relative paths inside the file are taken relative to the
    /// file's own directory. Nothing else is checked here; a wrong layer or
    /// field name surfaces when a stage first touches it.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CanopyError::io(path, e))?;
        let mut config: Config = serde_json::from_str(&text).map_err(|e| CanopyError::json(path, e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        for p in [
            &mut config.regions_layer,
            &mut config.tiles_layer,
            &mut config.imagery_root,
            &mut config.snap_raster,
            &mut config.results_root,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Write the default configuration to `path`. Refuses to overwrite.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(CanopyError::Config(format!("{} already exists", path.display())));
        }
        let json = serde_json::to_string_pretty(&Config::default()).map_err(|e| CanopyError::json(path, e))?;
        write_atomic(path, json.as_bytes())
    }

    /// A fresh value read from the file this one was loaded from.
    pub fn reload(&self) -> Result<Self> {
        match &self.source {
            Some(path) => Config::load(path),
            None => Err(CanopyError::Config("configuration was not loaded from a file".into())),
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn crs(&self) -> Crs {
        Crs(self.target_crs)
    }

    pub fn is_inverted(&self, region: RegionId) -> bool {
        self.inverted_region_ids.contains(&region)
    }

    pub fn layer_fields(&self) -> LayerFields {
        LayerFields {
            region_id: self.region_id_field.clone(),
            region_name: self.region_name_field.clone(),
            region_area: self.region_area_field.clone(),
            tile_filename: self.tile_filename_field.clone(),
            membership: self.membership_field.clone(),
        }
    }

    // ── Staging layout ───────────────────────────────────────────────────────

    /// `<results_root>/<Region_Name>`
    pub fn region_dir(&self, region_dir_name: &str) -> PathBuf {
        self.results_root.join(region_dir_name)
    }

    /// Reprojected tiles.
    pub fn inputs_dir(&self, region_dir_name: &str) -> PathBuf {
        self.region_dir(region_dir_name).join("Inputs")
    }

    /// Classifier artifacts, stage outputs and region products.
    pub fn outputs_dir(&self, region_dir_name: &str) -> PathBuf {
        self.region_dir(region_dir_name).join("Outputs")
    }

    pub fn region_files<'a>(&self, region_dir_name: &'a str) -> RegionFiles<'a> {
        RegionFiles { year: self.analysis_year, region: region_dir_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScratchDir;

    #[test]
    fn missing_fields_take_defaults_and_paths_resolve_against_the_file() {
        let dir = ScratchDir::new("config");
        let path = dir.path().join("canopy.json");
        fs::write(&path, r#"{"analysis_year": 2019, "results_root": "out", "inverted_region_ids": [8]}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.analysis_year, 2019);
        assert_eq!(config.membership_field, "PHYREGS");
        assert_eq!(config.seed, 42);
        assert_eq!(config.results_root, dir.path().join("out"));
        assert!(config.is_inverted(8));
        assert!(!config.is_inverted(7));
        assert_eq!(config.outputs_dir("Winder_Slope"), dir.path().join("out/Winder_Slope/Outputs"));
    }

    #[test]
    fn reload_picks_up_edits_without_touching_the_old_value() {
        let dir = ScratchDir::new("config-reload");
        let path = dir.path().join("canopy.json");
        fs::write(&path, r#"{"analysis_year": 2009}"#).unwrap();
        let first = Config::load(&path).unwrap();

        fs::write(&path, r#"{"analysis_year": 2019}"#).unwrap();
        let second = first.reload().unwrap();
        assert_eq!(first.analysis_year, 2009);
        assert_eq!(second.analysis_year, 2019);
        assert!(Config::default().reload().is_err());
    }

    #[test]
    fn template_round_trips_and_is_not_overwritten() {
        let dir = ScratchDir::new("config-template");
        let path = dir.path().join("canopy.json");
        Config::write_template(&path).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.target_crs, Config::default().target_crs);
        assert!(Config::write_template(&path).is_err());
    }

    #[test]
    fn malformed_file_is_a_json_error() {
        let dir = ScratchDir::new("config-bad");
        let path = dir.path().join("canopy.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(CanopyError::Json { .. })));
    }
}
