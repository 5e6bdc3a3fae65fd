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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;
use tracing::{error, warn};

use crate::kits::{KitCatalog, DEFAULT_GRID_SIZE};

mod audio;
mod engine;
mod error;
mod kit;

pub use self::audio::Audio;
pub use self::engine::Engine;
pub use self::error::ConfigError;
pub use self::kit::KitDefinition;

pub const DEFAULT_KITS_PATH: &str = "kits";
pub const DEFAULT_STATE_FILE: &str = "padloop-state.json";

/// The top level padloop configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Padloop {
    /// The audio output.
    audio: Option<Audio>,

    /// The engine surface.
    #[serde(rename = "core")]
    engine: Option<Engine>,

    /// Base directory for relative sample locators.
    kits_path: Option<String>,

    /// Kits registered after the built-in ones.
    kits: Option<Vec<KitDefinition>>,

    /// Where the persisted state lives.
    state_file: Option<String>,

    /// Directory relative paths are resolved against. Set when loading from a file.
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Padloop {
    /// Parses the configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Padloop, ConfigError> {
        let mut padloop = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Padloop>()?;
        padloop.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        padloop.engine().validate()?;
        Ok(padloop)
    }

    /// Replaces the audio device, keeping every other setting.
    pub fn with_audio_device(mut self, device: &str) -> Padloop {
        self.audio = Some(self.audio().with_device(device));
        self
    }

    pub fn audio(&self) -> Audio {
        self.audio.clone().unwrap_or_default()
    }

    pub fn engine(&self) -> Engine {
        self.engine.clone().unwrap_or_default()
    }

    pub fn kits_path(&self) -> PathBuf {
        self.resolve(self.kits_path.as_deref().unwrap_or(DEFAULT_KITS_PATH))
    }

    pub fn state_file(&self) -> PathBuf {
        self.resolve(self.state_file.as_deref().unwrap_or(DEFAULT_STATE_FILE))
    }

    /// Builds the kit catalog: the built-in kits plus any configured ones.
    /// Kits that can't be registered are logged and skipped.
    pub fn catalog(&self) -> KitCatalog {
        let grid_size = self.engine().grid_size();
        let mut catalog = if grid_size == DEFAULT_GRID_SIZE {
            KitCatalog::with_built_ins()
        } else {
            warn!(grid_size, "Built-in kits only fit the default grid, skipping them");
            KitCatalog::new(grid_size)
        };

        for definition in self.kits.iter().flatten() {
            if let Err(e) = catalog.register(definition.to_kit()) {
                error!(kit = definition.id(), err = %e, "Unable to register kit");
            }
        }
        catalog
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = PathBuf::from(path);
        if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(yaml: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padloop.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_defaults() {
        let padloop = Padloop::default();
        assert_eq!("default", padloop.audio().device());
        assert_eq!(256, padloop.audio().buffer_size());
        assert_eq!(32, padloop.audio().max_voices());
        assert_eq!(PathBuf::from("kits"), padloop.kits_path());
        assert_eq!(vec!["drums", "piano", "funk"], padloop.catalog().ids());
    }

    #[test]
    fn test_deserialize() {
        let (dir, path) = write_config(
            r#"
audio:
  device: mock-device
  sample_rate: 48000
core:
  bpm_range: [70, 180]
  default_bpm: 100
kits_path: samples
state_file: /var/lib/padloop/state.json
kits:
  - id: lofi
    display_name: Lo-Fi
    samples:
      - {file: lofi/1.wav, label: One}
      - {file: lofi/2.wav, label: Two}
      - {file: lofi/3.wav, label: Three}
      - {file: lofi/4.wav, label: Four}
      - {file: lofi/5.wav, label: Five}
      - {file: lofi/6.wav, label: Six}
      - {file: lofi/7.wav, label: Seven}
      - {file: lofi/8.wav, label: Eight}
      - {file: lofi/9.wav, label: Nine}
  - id: short
    samples:
      - {file: short/1.wav, label: One}
"#,
        );

        let padloop = Padloop::deserialize(&path).unwrap();
        assert_eq!("mock-device", padloop.audio().device());
        assert_eq!(48000, padloop.audio().sample_rate());
        assert_eq!((70.0, 180.0), padloop.engine().bpm_range());
        assert_eq!(100.0, padloop.engine().default_bpm());
        assert_eq!(dir.path().join("samples"), padloop.kits_path());
        assert_eq!(
            PathBuf::from("/var/lib/padloop/state.json"),
            padloop.state_file()
        );

        // The short kit doesn't fill the grid and is skipped.
        let catalog = padloop.catalog();
        assert_eq!(vec!["drums", "piano", "funk", "lofi"], catalog.ids());
        assert_eq!("Lo-Fi", catalog.get("lofi").unwrap().display_name());
        assert_eq!(Some("lofi/5.wav"), catalog.locator("lofi", 4));
    }

    #[test]
    fn test_audio_device_override() {
        let (_dir, path) = write_config("audio:\n  device: hw:1\n  buffer_size: 512\n");
        let padloop = Padloop::deserialize(&path).unwrap().with_audio_device("mock");
        assert_eq!("mock", padloop.audio().device());
        assert_eq!(512, padloop.audio().buffer_size());
    }

    #[test]
    fn test_invalid_bpm_range() {
        let (_dir, path) = write_config("core:\n  bpm_range: [150, 90]\n");
        assert!(matches!(
            Padloop::deserialize(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Padloop::deserialize(Path::new("/nonexistent/padloop.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
