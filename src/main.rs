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
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use padloop::clock::SystemClock;
use padloop::controller::{keyboard, Controller};
use padloop::engine::AudioCore;
use padloop::samples::{FileSampleLoader, SampleStore};
use padloop::state::StateStore;
use padloop::{audio, config, verify};

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=padloop loop performance engine

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/padloop
ExecStart=/usr/local/bin/padloop start "$PADLOOP_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=padloop.service
"#;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A gesture and voice triggered loop performance engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the kits in the catalog.
    Kits {
        /// The path to the padloop config. Only built-in kits are listed without one.
        config_path: Option<String>,
    },
    /// Loads every sample of every kit and reports the ones that fail.
    Verify {
        /// The path to the padloop config.
        config_path: Option<String>,
    },
    /// Start will start the engine, reading pads and commands from the terminal.
    Start {
        /// The path to the padloop config.
        config_path: Option<String>,
        /// Overrides the configured audio device.
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

fn load_config(config_path: Option<String>) -> Result<config::Padloop, Box<dyn Error>> {
    Ok(match config_path {
        Some(path) => config::Padloop::deserialize(&PathBuf::from(path))?,
        None => config::Padloop::default(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Kits { config_path } => {
            let catalog = load_config(config_path)?.catalog();

            println!("Kits (count: {}):", catalog.kits().len());
            for kit in catalog.kits() {
                println!("- {}", kit);
                for (pad, sample) in kit.samples().iter().enumerate() {
                    println!("    {}: {} ({})", pad + 1, sample.label(), sample.locator());
                }
            }
        }
        Commands::Verify { config_path } => {
            let config = load_config(config_path)?;
            let catalog = config.catalog();
            let engine = config.engine();
            let store = Arc::new(SampleStore::new(
                Arc::new(FileSampleLoader::new(
                    &config.kits_path(),
                    config.audio().sample_rate(),
                )),
                SystemClock::shared(),
                engine.sample_load_timeout(),
            ));

            let report = verify::check_all_kits(&catalog, &store).await;
            verify::print_report(&report, &catalog);
            if report.has_errors() {
                return Err("kit verification failed".into());
            }
        }
        Commands::Start {
            config_path,
            device,
        } => {
            let mut config = load_config(config_path)?;
            if let Some(device) = device {
                config = config.with_audio_device(&device);
            }
            let audio = config.audio();

            let persistence = StateStore::new(&config.state_file());
            let (initial, persistence) = match persistence.load_or_set_aside() {
                Ok(initial) => (initial, Some(persistence)),
                Err(e) => {
                    warn!(
                        err = %e,
                        "Unable to read saved state, nothing will be saved this session"
                    );
                    (Default::default(), None)
                }
            };

            let mut core = AudioCore::new(
                config.engine(),
                config.catalog(),
                Arc::new(FileSampleLoader::new(
                    &config.kits_path(),
                    audio.sample_rate(),
                )),
                SystemClock::shared(),
                initial,
            );
            if let Some(persistence) = persistence {
                core = core.with_persistence(persistence);
            }
            core.initialize_output(&audio)?;

            let core = Arc::new(core);
            let driver = core.spawn_transport_driver();
            let ready = core.preload().await?;
            info!(kit = core.current_kit(), ready, "Ready to play");

            Controller::new(core.clone(), Arc::new(keyboard::Driver::new()))
                .join()
                .await?;

            core.dispose();
            driver.await?;
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
