//! TOML configuration file for the `pedsim` binary.

use anyhow::{Context, Result};
use pedsim_core::{BoundaryMap, PedsimConfig, SweepConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Built-in wall layouts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MapLayout {
    /// Walls on the top and bottom rows only.
    #[default]
    Corridor,
    /// Walls on all four sides.
    Room,
}

/// Where the boundary map comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    pub layout: MapLayout,
    pub rows: usize,
    pub cols: usize,
    /// ASCII layout file (`#` wall, `.` floor); overrides `layout`, `rows` and `cols`.
    pub file: Option<PathBuf>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            layout: MapLayout::Corridor,
            rows: 12,
            cols: 60,
            file: None,
        }
    }
}

impl MapConfig {
    pub fn build(&self) -> Result<Arc<BoundaryMap>> {
        let map = match &self.file {
            Some(path) => {
                let layout = fs::read_to_string(path)
                    .with_context(|| format!("failed to read map file {}", path.display()))?;
                BoundaryMap::parse(&layout)
                    .with_context(|| format!("invalid map file {}", path.display()))?
            }
            None => match self.layout {
                MapLayout::Corridor => BoundaryMap::corridor(self.rows, self.cols)?,
                MapLayout::Room => BoundaryMap::room(self.rows, self.cols)?,
            },
        };
        Ok(Arc::new(map))
    }
}

/// Top-level file layout: `[simulation]`, `[sweep]` and `[map]` tables, all optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub simulation: PedsimConfig,
    pub sweep: SweepConfig,
    pub map: MapConfig,
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("failed to parse pedsim configuration")
    }

    /// Load from `path`, or fall back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&source).with_context(|| format!("in {}", path.display()))
    }
}
