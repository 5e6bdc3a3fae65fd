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

//! The kit catalog: which sample sits on which pad.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// The number of pads on the standard 3x3 grid.
pub const DEFAULT_GRID_SIZE: usize = 9;

/// The kit selected when nothing else is configured.
pub const DEFAULT_KIT: &str = "drums";

/// Errors raised while registering kits.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum KitError {
    #[error("kit {0} is already registered")]
    Duplicate(String),

    #[error("kit {id} has {actual} samples, expected {expected}")]
    WrongPadCount {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("kit {0} is built in and cannot be removed")]
    BuiltIn(String),
}

/// One pad's sample within a kit.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct KitSample {
    /// Resource locator of the audio file, relative to the kits directory unless absolute.
    file: String,
    /// Label shown on the pad.
    label: String,
}

impl KitSample {
    pub fn new(file: &str, label: &str) -> KitSample {
        KitSample {
            file: file.to_string(),
            label: label.to_string(),
        }
    }

    pub fn locator(&self) -> &str {
        &self.file
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// A named set of samples, one per pad. Immutable once registered.
#[derive(Clone, Debug, PartialEq)]
pub struct Kit {
    id: String,
    display_name: String,
    samples: Vec<KitSample>,
    built_in: bool,
}

impl Kit {
    pub fn new(id: &str, display_name: &str, samples: Vec<KitSample>) -> Kit {
        Kit {
            id: id.to_string(),
            display_name: display_name.to_string(),
            samples,
            built_in: false,
        }
    }

    fn built_in(id: &str, display_name: &str, folder: &str, files: &[(&str, &str)]) -> Kit {
        Kit {
            id: id.to_string(),
            display_name: display_name.to_string(),
            samples: files
                .iter()
                .map(|(file, label)| KitSample::new(&format!("{}/{}", folder, file), label))
                .collect(),
            built_in: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn samples(&self) -> &[KitSample] {
        &self.samples
    }

    /// Returns the sample for the given pad, if the pad exists in this kit.
    pub fn sample(&self, pad: usize) -> Option<&KitSample> {
        self.samples.get(pad)
    }

    pub fn is_built_in(&self) -> bool {
        self.built_in
    }
}

impl fmt::Display for Kit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)?;
        for (pad, sample) in self.samples.iter().enumerate() {
            write!(f, "\n  - pad {}: {} [{}]", pad, sample.label, sample.file)?;
        }
        Ok(())
    }
}

/// Static mapping of kit id to its samples. Lookups keep registration order.
#[derive(Clone, Debug)]
pub struct KitCatalog {
    kits: Vec<Kit>,
    grid_size: usize,
}

impl KitCatalog {
    /// Creates an empty catalog for the given grid size.
    pub fn new(grid_size: usize) -> KitCatalog {
        KitCatalog {
            kits: Vec::new(),
            grid_size,
        }
    }

    /// Creates a catalog holding the built-in drums, piano and funk kits.
    pub fn with_built_ins() -> KitCatalog {
        let mut catalog = KitCatalog::new(DEFAULT_GRID_SIZE);
        catalog.kits = vec![
            Kit::built_in(
                "drums",
                "Drum Kit",
                "drums",
                &[
                    ("kick-drum-105.wav", "Kick"),
                    ("short-percussive-trap-snare-one-shot.wav", "Snare"),
                    ("open-hat-high.wav", "Hi-Hat"),
                    ("flame-phonk-kick_D#_major.wav", "Kick 2"),
                    ("clean-808-trap-clap.wav", "Clap"),
                    ("short-808-bass-boom_C_major.wav", "Bass"),
                    ("stomping-grind-808_103bpm_E_minor.wav", "Grind"),
                    ("kick-drum-118_F_minor.wav", "Kick 3"),
                    (
                        "female-vocal-singing-loop-want_125bpm_A_minor.wav",
                        "Vocal",
                    ),
                ],
            ),
            Kit::built_in(
                "piano",
                "Piano",
                "piano",
                &[
                    ("piano-c_C_major.wav", "C"),
                    ("piano-eb_D#_major.wav", "D#"),
                    ("piano-f_F_major.wav", "F"),
                    ("piano-g_G_major.wav", "G"),
                    ("piano-bb_A#_major.wav", "A#"),
                    ("playful-drama-wet-choir_120bpm_A_minor.wav", "Choir"),
                    ("piano-g_G#_major.wav", "G#"),
                    ("brazilian-funk-vocal-baile_130bpm_D_minor.wav", "Vocal 1"),
                    ("female-dry-vocals-dnb_120bpm_D#_minor.wav", "Vocal 2"),
                ],
            ),
            // The funk kit lives in the synth folder.
            Kit::built_in(
                "funk",
                "Funk",
                "synth",
                &[
                    ("brazillian-funk-kick_130bpm_C_major.wav", "Kick"),
                    ("brazilian-funk-snare.wav", "Snare"),
                    ("phonk-closed-hi-hats-thin_C_minor.wav", "Hi-Hat"),
                    ("brazilian-funk-kick_121bpm_F_minor.wav", "Kick 2"),
                    ("brazilian-funk-cowbell_C.wav", "Cowbell"),
                    ("aguda-brazilian-funk-synth_131bpm_A#_major.wav", "Synth"),
                    ("brazilian-boomy-vox-groove_99bpm_F_minor.wav", "Groove"),
                    (
                        "tight-kick-brazilian-funk-drums_119bpm_A_minor.wav",
                        "Tight",
                    ),
                    (
                        "aggressive-brazilian-funk-acapella-dia-delicia_130bpm.wav",
                        "Acapella",
                    ),
                ],
            ),
        ];
        catalog
    }

    /// Returns the grid size every kit must fill.
    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Registers a new kit. Duplicate ids and kits that don't fill the grid are rejected.
    pub fn register(&mut self, kit: Kit) -> Result<(), KitError> {
        if self.get(&kit.id).is_some() {
            warn!(kit = kit.id, "Kit already exists");
            return Err(KitError::Duplicate(kit.id));
        }
        if kit.samples.len() != self.grid_size {
            return Err(KitError::WrongPadCount {
                id: kit.id,
                expected: self.grid_size,
                actual: kit.samples.len(),
            });
        }

        info!(kit = kit.id, name = kit.display_name, "Kit registered");
        self.kits.push(kit);
        Ok(())
    }

    /// Removes a registered kit. Built-in kits stay.
    pub fn remove(&mut self, id: &str) -> Result<Option<Kit>, KitError> {
        match self.kits.iter().position(|kit| kit.id == id) {
            Some(index) if self.kits[index].built_in => Err(KitError::BuiltIn(id.to_string())),
            Some(index) => Ok(Some(self.kits.remove(index))),
            None => Ok(None),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Kit> {
        self.kits.iter().find(|kit| kit.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Returns the resource locator for a pad in a kit.
    pub fn locator(&self, id: &str, pad: usize) -> Option<&str> {
        self.get(id)
            .and_then(|kit| kit.sample(pad))
            .map(|sample| sample.locator())
    }

    /// Kit ids in registration order.
    pub fn ids(&self) -> Vec<&str> {
        self.kits.iter().map(|kit| kit.id.as_str()).collect()
    }

    pub fn kits(&self) -> &[Kit] {
        &self.kits
    }

    /// Returns the kit after the given one, wrapping around.
    pub fn next_kit(&self, current: &str) -> Option<&str> {
        self.step(current, 1)
    }

    /// Returns the kit before the given one, wrapping around.
    pub fn previous_kit(&self, current: &str) -> Option<&str> {
        self.step(current, self.kits.len().saturating_sub(1))
    }

    fn step(&self, current: &str, by: usize) -> Option<&str> {
        if self.kits.is_empty() {
            return None;
        }
        let index = self
            .kits
            .iter()
            .position(|kit| kit.id == current)
            .unwrap_or(0);
        Some(self.kits[(index + by) % self.kits.len()].id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom_kit(id: &str, pads: usize) -> Kit {
        Kit::new(
            id,
            "Custom",
            (0..pads)
                .map(|pad| KitSample::new(&format!("custom/{}.wav", pad), &format!("Pad {}", pad)))
                .collect(),
        )
    }

    #[test]
    fn test_built_ins() {
        let catalog = KitCatalog::with_built_ins();
        assert_eq!(vec!["drums", "piano", "funk"], catalog.ids());
        for kit in catalog.kits() {
            assert_eq!(DEFAULT_GRID_SIZE, kit.samples().len());
            assert!(kit.is_built_in());
        }
        assert_eq!(
            Some("drums/kick-drum-105.wav"),
            catalog.locator("drums", 0)
        );
        assert_eq!(
            Some("synth/brazilian-funk-snare.wav"),
            catalog.locator("funk", 1)
        );
        assert_eq!(None, catalog.locator("drums", 9));
        assert_eq!(None, catalog.locator("nope", 0));
    }

    #[test]
    fn test_register() {
        let mut catalog = KitCatalog::with_built_ins();
        assert!(catalog.register(custom_kit("lofi", 9)).is_ok());
        assert!(catalog.contains("lofi"));
        assert_eq!(
            Err(KitError::Duplicate("lofi".to_string())),
            catalog.register(custom_kit("lofi", 9))
        );
        assert_eq!(
            Err(KitError::Duplicate("drums".to_string())),
            catalog.register(custom_kit("drums", 9))
        );
        assert_eq!(
            Err(KitError::WrongPadCount {
                id: "short".to_string(),
                expected: 9,
                actual: 4
            }),
            catalog.register(custom_kit("short", 4))
        );
    }

    #[test]
    fn test_remove() {
        let mut catalog = KitCatalog::with_built_ins();
        catalog.register(custom_kit("lofi", 9)).unwrap();
        assert_eq!(
            Err(KitError::BuiltIn("piano".to_string())),
            catalog.remove("piano")
        );
        assert_eq!("lofi", catalog.remove("lofi").unwrap().unwrap().id());
        assert!(catalog.remove("lofi").unwrap().is_none());
    }

    #[test]
    fn test_cycling() {
        let catalog = KitCatalog::with_built_ins();
        assert_eq!(Some("piano"), catalog.next_kit("drums"));
        assert_eq!(Some("drums"), catalog.next_kit("funk"));
        assert_eq!(Some("funk"), catalog.previous_kit("drums"));
        assert_eq!(Some("piano"), catalog.previous_kit("funk"));
        assert_eq!(None, KitCatalog::new(9).next_kit("drums"));
    }
}
