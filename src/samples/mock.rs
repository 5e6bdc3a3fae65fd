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
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::loader::{LoadError, LoadedSample, SampleLoader};

/// A loader that fabricates short samples, with per-locator failures and delays.
#[derive(Clone, Default)]
pub struct MockSampleLoader {
    failing: Arc<Mutex<HashSet<String>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    loads: Arc<AtomicUsize>,
}

impl MockSampleLoader {
    pub fn new() -> MockSampleLoader {
        MockSampleLoader::default()
    }

    /// Makes every load of the locator fail.
    pub fn fail(self, locator: &str) -> MockSampleLoader {
        self.failing.lock().insert(locator.to_string());
        self
    }

    /// Makes every load of the locator take at least the given time.
    pub fn delay(self, locator: &str, delay: Duration) -> MockSampleLoader {
        self.delays.lock().insert(locator.to_string(), delay);
        self
    }

    /// Lets a previously failing locator load again.
    pub fn heal(&self, locator: &str) {
        self.failing.lock().remove(locator);
    }

    /// How many loads have been attempted.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl SampleLoader for MockSampleLoader {
    fn load(&self, locator: &str) -> Result<LoadedSample, LoadError> {
        self.loads.fetch_add(1, Ordering::Relaxed);

        let delay = self.delays.lock().get(locator).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if self.failing.lock().contains(locator) {
            return Err(format!("404: {}", locator).into());
        }
        Ok(LoadedSample::new(vec![0.5; 64], 1, 44100))
    }
}
