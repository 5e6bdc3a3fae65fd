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
//! Sample storage for the pad grid.
//!
//! This module provides:
//! - Decoding and resampling of sample files into memory
//! - The sample store, which tracks the load state of every pad of every kit
//! - A mock loader for tests

mod loader;
#[cfg(test)]
pub mod mock;
mod store;

pub use loader::{transcode, FileSampleLoader, LoadError, LoadedSample, SampleLoader};
pub use store::{
    LoadState, SampleHandle, SampleLoadError, SampleStore, StoreStats, DEFAULT_LOAD_TIMEOUT,
};
