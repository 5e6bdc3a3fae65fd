// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Persisted state: master volume, tempo, saved loops and the selected kit.
//!
//! The core accepts this as initialization input and hands back a fresh copy whenever
//! something worth keeping changes. Nothing here assumes process memory survives a
//! restart.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::kits::DEFAULT_KIT;
use crate::loops::Loop;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("unable to access state file: {0}")]
    Io(#[from] io::Error),
    #[error("malformed state file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PersistedState {
    pub master_volume: f32,
    /// None until a tempo has been chosen, so the configured default applies.
    pub bpm: Option<f64>,
    pub selected_kit: String,
    pub loops: Vec<Loop>,
    pub master_loop_length_ms: Option<f64>,
}

impl Default for PersistedState {
    fn default() -> Self {
        PersistedState {
            master_volume: 1.0,
            bpm: None,
            selected_kit: DEFAULT_KIT.to_string(),
            loops: Vec::new(),
            master_loop_length_ms: None,
        }
    }
}

/// Reads and writes [`PersistedState`] as JSON.
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: &Path) -> StateStore {
        StateStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state. A missing file yields the defaults.
    pub fn load(&self) -> Result<PersistedState, StateError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = ?self.path, "No saved state, starting fresh");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let state: PersistedState = serde_json::from_str(&contents)?;
        info!(
            path = ?self.path,
            loops = state.loops.len(),
            kit = state.selected_kit,
            "Loaded saved state"
        );
        Ok(state)
    }

    /// Loads the state for a session that will save over it. A malformed file is first
    /// moved aside to `<path>.bad` so the session's first save can't destroy it. On error
    /// the file is still in place and the session must not save.
    pub fn load_or_set_aside(&self) -> Result<PersistedState, StateError> {
        match self.load() {
            Err(StateError::Json(e)) => {
                let aside = self.sibling(".bad");
                fs::rename(&self.path, &aside)?;
                warn!(
                    path = ?self.path,
                    moved_to = ?aside,
                    err = %e,
                    "Saved state is malformed, starting fresh"
                );
                Ok(PersistedState::default())
            }
            result => result,
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Writes the state next to its destination first, then moves it into place.
    pub fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let staging = self.sibling(".tmp");

        fs::write(&staging, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&staging, &self.path)?;
        debug!(path = ?self.path, loops = state.loops.len(), "Saved state");
        Ok(())
    }
}
