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

//! The sample store: the single owner of every decoded sample.
//!
//! Handles only move forward through `Unloaded -> Loading -> Ready | Failed`.
//! A failed handle stays failed until [`SampleStore::retry_failed`] is called
//! explicitly, so a broken locator is never refetched behind the caller's back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::loader::{LoadedSample, SampleLoader};
use crate::clock::Clock;
use crate::kits::Kit;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_millis(8000);

/// Errors surfaced by kit loads. Each names the kit and pad involved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleLoadError {
    #[error("timed out loading pad {pad} of kit {kit} ({locator})")]
    Timeout {
        kit: String,
        pad: usize,
        locator: String,
    },

    #[error("unable to decode pad {pad} of kit {kit} ({locator}): {reason}")]
    Decode {
        kit: String,
        pad: usize,
        locator: String,
        reason: String,
    },

    #[error("unknown kit {0}")]
    UnknownKit(String),

    #[error("load of kit {0} was interrupted")]
    Interrupted(String),
}

impl SampleLoadError {
    /// The pad that failed, if the error concerns a single pad.
    pub fn pad(&self) -> Option<usize> {
        match self {
            SampleLoadError::Timeout { pad, .. } | SampleLoadError::Decode { pad, .. } => {
                Some(*pad)
            }
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            LoadState::Unloaded => "unloaded",
            LoadState::Loading => "loading",
            LoadState::Ready => "ready",
            LoadState::Failed => "failed",
        };
        write!(f, "{}", state)
    }
}

/// A loadable sample bound to one pad of one kit.
#[derive(Clone, Debug)]
pub struct SampleHandle {
    locator: String,
    state: LoadState,
    sample: Option<LoadedSample>,
    error: Option<SampleLoadError>,
    last_triggered: Option<Duration>,
}

impl SampleHandle {
    fn new(locator: &str) -> SampleHandle {
        SampleHandle {
            locator: locator.to_string(),
            state: LoadState::Unloaded,
            sample: None,
            error: None,
            last_triggered: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    pub fn sample(&self) -> Option<&LoadedSample> {
        self.sample.as_ref()
    }

    /// Why the handle failed, if it did.
    pub fn error(&self) -> Option<&SampleLoadError> {
        self.error.as_ref()
    }

    /// Clock time of the last successful trigger.
    pub fn last_triggered(&self) -> Option<Duration> {
        self.last_triggered
    }
}

/// Counts of handles per state plus decoded memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub unloaded: usize,
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
    pub memory_bytes: usize,
}

type LoadOutcome = Option<Result<(), SampleLoadError>>;

pub struct SampleStore {
    loader: Arc<dyn SampleLoader>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    /// Handles per kit, indexed by pad.
    handles: RwLock<HashMap<String, Vec<SampleHandle>>>,
    /// Kit loads in progress. Later callers wait on the same outcome.
    in_flight: Mutex<HashMap<String, watch::Receiver<LoadOutcome>>>,
}

impl SampleStore {
    pub fn new(loader: Arc<dyn SampleLoader>, clock: Arc<dyn Clock>, timeout: Duration) -> SampleStore {
        SampleStore {
            loader,
            clock,
            timeout,
            handles: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every pad of the kit that isn't loaded yet. Resolves once every pad is ready,
    /// or rejects naming the lowest failing pad. Pads that did load stay loaded.
    pub async fn load_kit(self: &Arc<Self>, kit: &Kit) -> Result<(), SampleLoadError> {
        if self.is_ready(kit.id()) {
            return Ok(());
        }

        let mut outcome = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(kit.id()) {
                Some(outcome) => {
                    debug!(kit = kit.id(), "Joining kit load already in flight");
                    outcome.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(kit.id().to_string(), rx.clone());

                    let store = self.clone();
                    let kit = kit.clone();
                    tokio::spawn(async move {
                        let result = store.load_pads(&kit).await;
                        let _ = tx.send(Some(result));
                        store.in_flight.lock().remove(kit.id());
                    });
                    rx
                }
            }
        };

        let result = match outcome.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Err(SampleLoadError::Interrupted(kit.id().to_string())))
    }

    async fn load_pads(&self, kit: &Kit) -> Result<(), SampleLoadError> {
        let kit_id = kit.id().to_string();
        let mut pending = Vec::new();
        {
            let mut handles = self.handles.write();
            let kit_handles = handles.entry(kit_id.clone()).or_insert_with(|| {
                kit.samples()
                    .iter()
                    .map(|sample| SampleHandle::new(sample.locator()))
                    .collect()
            });
            for (pad, handle) in kit_handles.iter_mut().enumerate() {
                if handle.state == LoadState::Unloaded {
                    handle.state = LoadState::Loading;
                    pending.push((pad, handle.locator.clone()));
                }
            }
        }

        if !pending.is_empty() {
            info!(kit = kit_id, pads = pending.len(), "Loading kit");
        }

        let mut tasks = JoinSet::new();
        for (pad, locator) in pending {
            let loader = self.loader.clone();
            let timeout = self.timeout;
            let kit_id = kit_id.clone();
            tasks.spawn(async move {
                let load = {
                    let locator = locator.clone();
                    tokio::task::spawn_blocking(move || loader.load(&locator))
                };
                let result = match tokio::time::timeout(timeout, load).await {
                    Ok(Ok(Ok(sample))) => Ok(sample),
                    Ok(Ok(Err(e))) => Err(SampleLoadError::Decode {
                        kit: kit_id,
                        pad,
                        locator,
                        reason: e.to_string(),
                    }),
                    Ok(Err(e)) => Err(SampleLoadError::Decode {
                        kit: kit_id,
                        pad,
                        locator,
                        reason: e.to_string(),
                    }),
                    Err(_) => Err(SampleLoadError::Timeout {
                        kit: kit_id,
                        pad,
                        locator,
                    }),
                };
                (pad, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (pad, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!(kit = kit_id, err = %e, "Sample load task failed");
                    continue;
                }
            };

            let mut handles = self.handles.write();
            let Some(handle) = handles.get_mut(&kit_id).and_then(|pads| pads.get_mut(pad)) else {
                continue;
            };
            match result {
                Ok(sample) => {
                    debug!(kit = kit_id, pad, "Pad ready");
                    handle.sample = Some(sample);
                    handle.state = LoadState::Ready;
                }
                Err(e) => {
                    warn!(kit = kit_id, pad, err = %e, "Pad failed to load");
                    handle.error = Some(e);
                    handle.state = LoadState::Failed;
                }
            }
        }

        let handles = self.handles.read();
        let first_failure = handles
            .get(&kit_id)
            .into_iter()
            .flatten()
            .find_map(|handle| handle.error.clone());
        match first_failure {
            Some(e) => Err(e),
            None => {
                info!(kit = kit_id, "Kit ready");
                Ok(())
            }
        }
    }

    /// True iff the kit has been activated and every pad is ready.
    pub fn is_ready(&self, kit: &str) -> bool {
        self.handles
            .read()
            .get(kit)
            .is_some_and(|pads| !pads.is_empty() && pads.iter().all(SampleHandle::is_ready))
    }

    /// Returns the sample to play for a pad, or None (with a warning) if it isn't ready.
    pub fn trigger(&self, pad: usize, kit: &str) -> Option<LoadedSample> {
        let mut handles = self.handles.write();
        let Some(handle) = handles.get_mut(kit).and_then(|pads| pads.get_mut(pad)) else {
            warn!(kit, pad, "No sample for pad");
            return None;
        };
        if handle.state != LoadState::Ready {
            warn!(kit, pad, state = %handle.state, "Sample not ready");
            return None;
        }
        handle.last_triggered = Some(self.clock.now());
        handle.sample.clone()
    }

    /// A snapshot of the handle for a pad.
    pub fn handle(&self, pad: usize, kit: &str) -> Option<SampleHandle> {
        self.handles
            .read()
            .get(kit)
            .and_then(|pads| pads.get(pad))
            .cloned()
    }

    /// Load state per pad for a kit, empty if the kit was never activated.
    pub fn pad_states(&self, kit: &str) -> Vec<LoadState> {
        self.handles
            .read()
            .get(kit)
            .map(|pads| pads.iter().map(SampleHandle::state).collect())
            .unwrap_or_default()
    }

    /// Moves the kit's failed handles back to unloaded so the next load refetches them.
    /// Returns how many were reset.
    pub fn retry_failed(&self, kit: &str) -> usize {
        let mut handles = self.handles.write();
        let Some(pads) = handles.get_mut(kit) else {
            return 0;
        };
        let mut reset = 0;
        for handle in pads.iter_mut().filter(|h| h.state == LoadState::Failed) {
            handle.state = LoadState::Unloaded;
            handle.error = None;
            reset += 1;
        }
        if reset > 0 {
            info!(kit, reset, "Failed pads will be retried");
        }
        reset
    }

    /// Forgets a kit's pads so a kit registered later under the same id loads fresh.
    pub fn evict(&self, kit: &str) -> usize {
        self.in_flight.lock().remove(kit);
        let evicted = self.handles.write().remove(kit).map_or(0, |pads| pads.len());
        if evicted > 0 {
            debug!(kit, evicted, "Evicted kit");
        }
        evicted
    }

    pub fn stats(&self) -> StoreStats {
        let handles = self.handles.read();
        let mut stats = StoreStats::default();
        for handle in handles.values().flatten() {
            match handle.state {
                LoadState::Unloaded => stats.unloaded += 1,
                LoadState::Loading => stats.loading += 1,
                LoadState::Ready => stats.ready += 1,
                LoadState::Failed => stats.failed += 1,
            }
            stats.memory_bytes += handle.sample.as_ref().map_or(0, LoadedSample::memory_size);
        }
        stats
    }

    /// Drops every handle. Only used when the engine is torn down.
    pub fn dispose(&self) {
        self.handles.write().clear();
        self.in_flight.lock().clear();
    }
}

impl fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("SampleStore")
            .field("ready", &stats.ready)
            .field("failed", &stats.failed)
            .field("memory_kb", &(stats.memory_bytes / 1024))
            .finish()
    }
}
