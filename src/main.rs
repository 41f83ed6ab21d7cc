// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Bluelink Desktop Application

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bluelink_desktop::bluetooth::{BluezPlatform, Command, Coordinator};
use bluelink_desktop::config::Config;
use bluelink_desktop::state::{AppState, UiNotice};
use bluelink_desktop::ui::{self, TrayAction};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting Bluelink Desktop v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", Config::default_path().display());

    // Create application state
    let state = AppState::new();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiNotice>();

    // Without an adapter the tray still runs and reports it.
    let coordinator = match BluezPlatform::new(
        config.bluetooth.adapter.as_deref(),
        config.discovery_window(),
    )
    .await
    {
        Ok((platform, platform_events)) => {
            let (coordinator, handle) = Coordinator::new(
                platform,
                platform_events,
                config.coordinator_settings(),
                state.clone(),
                ui_tx,
            );
            Some((handle, tokio::spawn(coordinator.run())))
        }
        Err(err) => {
            warn!("Bluetooth unavailable: {:#}", err);
            state.mark_unsupported();
            None
        }
    };

    // Start system tray
    let (mut action_rx, tray) = ui::run_tray(state.clone())?;

    info!("Ready. System tray active.");

    loop {
        tokio::select! {
            Some(action) = action_rx.recv() => {
                let command = match action {
                    TrayAction::ToggleScanning => Command::ToggleScanning,
                    TrayAction::TogglePower => Command::SetPowered(!state.is_adapter_on()),
                    TrayAction::RefreshDevices => Command::RefreshDevices,
                    TrayAction::Device(choice, address) => Command::Device(choice, address),
                    TrayAction::Disconnect => Command::Disconnect,
                    TrayAction::Quit => {
                        info!("Quit requested");
                        break;
                    }
                };
                let Some((handle, _)) = &coordinator else {
                    debug!("Ignoring {:?}: no Bluetooth adapter", command);
                    continue;
                };
                if !handle.send(command) {
                    error!("Coordinator is no longer running");
                    break;
                }
            }
            Some(notice) = ui_rx.recv() => {
                if let UiNotice::Notice(message) = &notice {
                    info!("{}", message);
                }
                tray.update(|_| {});
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Some((handle, task)) = coordinator {
        handle.send(Command::Shutdown);
        if let Err(err) = task.await {
            warn!("Coordinator task ended abnormally: {}", err);
        }
    }

    info!("Bluelink Desktop stopped");
    Ok(())
}
