//! Per-region processing ledger.
//!
//! Each region staging folder carries a `status.json` recording how far every
//! tile (and the region itself, per analysis year) has progressed. A stage
//! output is done when its file exists and the ledger records the stage. A
//! correctly named file the ledger has never seen is adopted: all writes go
//! through a temporary name and an atomic rename, so a final name always
//! means a complete file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CanopyError, Result};

pub const LEDGER_FILE: &str = "status.json";

/// Pipeline progress, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Pending,
    Reprojected,
    Classified,
    Clipped,
    Mosaicked,
}

impl Stage {
    /// File name prefix of a tile output at this stage.
    pub fn prefix(self) -> &'static str {
        match self {
            Stage::Reprojected => "r",
            Stage::Classified => "fr",
            Stage::Clipped => "cfr",
            Stage::Pending | Stage::Mosaicked => "",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    tiles: BTreeMap<String, Stage>,
    /// Region stage keyed by analysis year.
    #[serde(default)]
    region: BTreeMap<u16, Stage>,
}

#[derive(Debug)]
pub struct StatusLedger {
    path: PathBuf,
    state: LedgerFile,
}

impl StatusLedger {
    /// Load the ledger of a region staging folder; a missing file is an
    /// empty ledger.
    pub fn open(region_dir: &Path) -> Result<Self> {
        let path = region_dir.join(LEDGER_FILE);
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| CanopyError::json(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerFile::default(),
            Err(e) => return Err(CanopyError::io(&path, e)),
        };
        Ok(Self { path, state })
    }

    pub fn tile_stage(&self, tile: &str) -> Stage {
        self.state.tiles.get(tile).copied().unwrap_or_default()
    }

    pub fn region_stage(&self, year: u16) -> Stage {
        self.state.region.get(&year).copied().unwrap_or_default()
    }

    /// Record a tile's progress and persist. Never moves a tile backwards.
    pub fn record_tile(&mut self, tile: &str, stage: Stage) -> Result<()> {
        let entry = self.state.tiles.entry(tile.to_string()).or_default();
        if *entry < stage {
            *entry = stage;
        }
        self.save()
    }

    pub fn record_region(&mut self, year: u16, stage: Stage) -> Result<()> {
        let entry = self.state.region.entry(year).or_default();
        if *entry < stage {
            *entry = stage;
        }
        self.save()
    }

    /// Whether `tile` already reached `stage` with `output` on disk. A present
    /// but unrecorded output is adopted into the ledger.
    pub fn tile_done(&mut self, tile: &str, stage: Stage, output: &Path) -> Result<bool> {
        if !output.exists() {
            return Ok(false);
        }
        if self.tile_stage(tile) < stage {
            log::debug!("adopting existing {}", output.display());
            self.record_tile(tile, stage)?;
        }
        Ok(true)
    }

    /// Region-level counterpart of [`tile_done`](Self::tile_done).
    pub fn region_done(&mut self, year: u16, stage: Stage, output: &Path) -> Result<bool> {
        if !output.exists() {
            return Ok(false);
        }
        if self.region_stage(year) < stage {
            log::debug!("adopting existing {}", output.display());
            self.record_region(year, stage)?;
        }
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| CanopyError::json(&self.path, e))?;
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Temporary sibling name used while a file is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Write `bytes` to a temporary sibling and rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = partial_path(path);
    fs::write(&tmp, bytes).map_err(|e| CanopyError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| CanopyError::io(path, e))
}
