//! Local state file
//!
//! Applied resources persist between runs in a JSON file (default
//! `nimbus.state.json`) next to the document.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nimbus_core::interpreter::StateMap;
use nimbus_core::resource::State;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    /// Bumped on every write
    pub serial: u64,
    /// Identifies one state history; a file from another lineage is never overwritten
    pub lineage: String,
    pub nimbus_version: String,
    pub resources: Vec<serde_json::Value>,
}

impl StateFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            nimbus_version: env!("CARGO_PKG_VERSION").to_string(),
            resources: Vec::new(),
        }
    }

    pub fn states(&self) -> Result<StateMap> {
        self.resources
            .iter()
            .map(|entry| {
                let state = State::from_json(entry)
                    .with_context(|| format!("malformed state entry: {}", entry))?;
                Ok((state.id.clone(), state))
            })
            .collect()
    }

    /// Replace the resources with `states`, sorted by address
    pub fn record(&mut self, states: &StateMap) {
        let mut sorted: Vec<&State> = states.values().filter(|s| s.exists).collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));
        self.resources = sorted.into_iter().map(State::to_json).collect();
        self.serial += 1;
        self.nimbus_version = env!("CARGO_PKG_VERSION").to_string();
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LocalState {
    path: PathBuf,
}

impl LocalState {
    pub const DEFAULT_FILE: &'static str = "nimbus.state.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored state, or a fresh one when the file does not exist yet
    pub fn read(&self) -> Result<StateFile> {
        if !self.path.exists() {
            return Ok(StateFile::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file {}", self.path.display()))?;
        let state: StateFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state file {}", self.path.display()))?;
        if state.version > StateFile::CURRENT_VERSION {
            bail!(
                "state file {} has version {}, this build understands up to {}",
                self.path.display(),
                state.version,
                StateFile::CURRENT_VERSION
            );
        }
        Ok(state)
    }

    pub fn write(&self, state: &StateFile) -> Result<()> {
        if self.path.exists()
            && let Ok(stored) = self.read()
            && stored.lineage != state.lineage
        {
            bail!(
                "state file {} belongs to lineage {}, refusing to overwrite it",
                self.path.display(),
                stored.lineage
            );
        }
        let content = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write state file {}", self.path.display()))?;
        log::debug!("wrote state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }
}
