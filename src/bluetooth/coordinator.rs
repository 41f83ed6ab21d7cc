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

//! Device discovery and pairing coordinator.
//!
//! Owns the scan session, the device list, the single connection attempt and
//! the single open socket. UI commands, platform events and connect results
//! are all consumed by one loop, so state is never touched concurrently.
//! Only the blocking socket open runs on its own task, and its result is
//! routed back through the same loop.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{CoordinatorError, PlatformError};
use super::platform::{AdapterPower, BluetoothPlatform, PlatformEvent, ServiceId, StreamSocket};
use super::types::{
    BondState, ConnectionAttempt, DeviceAction, DeviceAddress, DeviceIdentity, DeviceList,
    ScanSession, Upsert,
};
use crate::state::{AppState, ConnectionStatus, UiNotice};

/// What to do when a discovery window ends while the user still wants to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RescanPolicy {
    /// Restart discovery after every window until the user stops.
    Continuous,
    /// Restart at most `max_restarts` times per scan.
    Limited { max_restarts: u32 },
    /// Run a single window.
    Once,
}

impl Default for RescanPolicy {
    fn default() -> Self {
        RescanPolicy::Continuous
    }
}

impl RescanPolicy {
    /// Whether another window may start after `restarts` restarts.
    pub fn allows_restart(&self, restarts: u32) -> bool {
        match self {
            RescanPolicy::Continuous => true,
            RescanPolicy::Limited { max_restarts } => restarts < *max_restarts,
            RescanPolicy::Once => false,
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinatorSettings {
    pub service: ServiceId,
    pub rescan: RescanPolicy,
}

/// Requests from the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScanning,
    StopScanning,
    ToggleScanning,
    /// A choice made in a device's options.
    Device(DeviceAction, DeviceAddress),
    Disconnect,
    SetPowered(bool),
    RefreshDevices,
    Shutdown,
}

/// Result of a socket open, delivered back to the coordinator loop.
#[derive(Debug)]
pub struct ConnectOutcome<S> {
    pub generation: u64,
    pub address: DeviceAddress,
    pub result: Result<S, PlatformError>,
}

/// Cloneable handle used by the UI to send commands.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    /// Send a command. Returns false once the coordinator has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }
}

enum Input<S> {
    Command(Command),
    Platform(PlatformEvent),
    Connect(ConnectOutcome<S>),
}

/// The discovery, pairing and connection coordinator.
pub struct Coordinator<P: BluetoothPlatform> {
    platform: Arc<P>,
    settings: CoordinatorSettings,
    state: Arc<AppState>,
    ui_tx: mpsc::UnboundedSender<UiNotice>,

    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<PlatformEvent>,
    outcome_tx: mpsc::UnboundedSender<ConnectOutcome<P::Socket>>,
    outcomes: mpsc::UnboundedReceiver<ConnectOutcome<P::Socket>>,

    session: ScanSession,
    devices: DeviceList,
    attempt: ConnectionAttempt,
    socket: Option<P::Socket>,
    connect_task: Option<JoinHandle<()>>,
    generation: u64,

    adapter_on: bool,
    /// The user still wants discovery to run.
    wants_scan: bool,
    /// The current scan was stopped by the user.
    stop_by_user: bool,
    restarts: u32,
    /// Finished events still owed for cancels the coordinator issued itself.
    expected_finishes: u32,

    status: ConnectionStatus,
    status_text: String,
}

impl<P: BluetoothPlatform> Coordinator<P> {
    /// Create a coordinator fed by `events` from `platform`.
    pub fn new(
        platform: Arc<P>,
        events: mpsc::UnboundedReceiver<PlatformEvent>,
        settings: CoordinatorSettings,
        state: Arc<AppState>,
        ui_tx: mpsc::UnboundedSender<UiNotice>,
    ) -> (Self, CoordinatorHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        let coordinator = Self {
            platform,
            settings,
            state,
            ui_tx,
            commands,
            events,
            outcome_tx,
            outcomes,
            session: ScanSession::Idle,
            devices: DeviceList::new(),
            attempt: ConnectionAttempt::Idle,
            socket: None,
            connect_task: None,
            generation: 0,
            adapter_on: false,
            wants_scan: false,
            stop_by_user: false,
            restarts: 0,
            expected_finishes: 0,
            status: ConnectionStatus::Disconnected,
            status_text: String::new(),
        };

        (coordinator, CoordinatorHandle { tx: command_tx })
    }

    pub fn session(&self) -> ScanSession {
        self.session
    }

    pub fn attempt(&self) -> &ConnectionAttempt {
        &self.attempt
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn is_scanning(&self) -> bool {
        self.wants_scan
    }

    pub fn has_open_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Dialog choices for a device.
    pub fn device_options(&self, address: &DeviceAddress) -> Vec<DeviceAction> {
        self.devices
            .get(address)
            .map(|record| DeviceAction::options_for(record.bond_state).to_vec())
            .unwrap_or_default()
    }

    /// Read the adapter state and the paired devices.
    pub async fn init(&mut self) {
        self.adapter_on = self.platform.is_powered().await;
        info!(
            "Bluetooth adapter is {}",
            if self.adapter_on { "on" } else { "off" }
        );
        if self.adapter_on {
            self.refresh_paired().await;
        }
        self.publish();
    }

    /// Run until a shutdown command arrives or every handle is dropped.
    pub async fn run(mut self) {
        self.init().await;
        while self.step().await {}
        self.shutdown().await;
        info!("Coordinator stopped");
    }

    /// Wait for and process one input. Returns false when the loop should end.
    pub async fn step(&mut self) -> bool {
        let input = tokio::select! {
            biased;
            Some(outcome) = self.outcomes.recv() => Input::Connect(outcome),
            Some(event) = self.events.recv() => Input::Platform(event),
            command = self.commands.recv() => match command {
                Some(command) => Input::Command(command),
                None => return false,
            },
        };

        match input {
            Input::Command(Command::Shutdown) => return false,
            Input::Command(command) => {
                if let Err(err) = self.handle_command(command).await {
                    warn!("Command failed: {}", err);
                    self.notify(err.to_string());
                }
            }
            Input::Platform(event) => self.handle_event(event).await,
            Input::Connect(outcome) => self.handle_connect_outcome(outcome).await,
        }

        true
    }

    /// Execute a UI command.
    pub async fn handle_command(&mut self, command: Command) -> Result<(), CoordinatorError> {
        debug!("Command: {:?}", command);

        match command {
            Command::StartScanning => self.start_scanning().await,
            Command::StopScanning => self.stop_scanning().await,
            Command::ToggleScanning => {
                if self.wants_scan {
                    self.stop_scanning().await
                } else {
                    self.start_scanning().await
                }
            }
            Command::Device(DeviceAction::Pair | DeviceAction::Connect, address) => {
                self.request_connect(&address).await
            }
            Command::Device(DeviceAction::Unpair, address) => self.request_unpair(&address).await,
            Command::Device(DeviceAction::Cancel, _) => Ok(()),
            Command::Disconnect => {
                self.disconnect().await;
                Ok(())
            }
            Command::SetPowered(on) => self.set_adapter_powered(on).await,
            Command::RefreshDevices => {
                self.refresh_paired().await;
                self.publish();
                Ok(())
            }
            Command::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        }
    }

    /// Begin a scan session.
    pub async fn start_scanning(&mut self) -> Result<(), CoordinatorError> {
        self.platform.ensure_permissions().await?;
        if !self.adapter_on {
            return Err(CoordinatorError::AdapterUnavailable);
        }

        if self.platform.is_discovering().await {
            self.cancel_discovery_quietly().await;
        }

        self.stop_by_user = false;
        self.wants_scan = true;
        self.restarts = 0;
        self.devices.clear_discovered();
        self.refresh_paired().await;
        self.session = ScanSession::Requested;
        self.publish();

        if let Err(err) = self.platform.start_discovery().await {
            warn!("Failed to start discovery: {}", err);
            self.wants_scan = false;
            self.session = ScanSession::Idle;
            self.publish();
            return Err(err.into());
        }

        self.session = ScanSession::Active;
        info!("Scanning for devices");
        self.publish();
        Ok(())
    }

    /// Stop the scan session at the user's request.
    pub async fn stop_scanning(&mut self) -> Result<(), CoordinatorError> {
        if !self.wants_scan {
            debug!("Stop requested while not scanning");
            return Ok(());
        }

        self.wants_scan = false;
        self.stop_by_user = true;
        self.session = ScanSession::StoppingByUser;

        if self.platform.is_discovering().await {
            if let Err(err) = self.platform.cancel_discovery().await {
                // No finished event will follow for this stop.
                warn!("Failed to cancel discovery: {}", err);
                self.finish_user_stop();
            }
        } else {
            self.finish_user_stop();
        }

        self.publish();
        Ok(())
    }

    /// Apply a platform event.
    pub async fn handle_event(&mut self, event: PlatformEvent) {
        debug!("Platform event: {:?}", event);

        match event {
            PlatformEvent::DeviceFound(identity) => self.on_device_found(identity),
            PlatformEvent::DiscoveryFinished => self.on_discovery_finished().await,
            PlatformEvent::AdapterStateChanged(power) => self.on_adapter_state(power).await,
            PlatformEvent::BondStateChanged { address, state } => {
                self.on_bond_state_changed(address, state).await
            }
        }

        self.publish();
    }

    /// Pair with a device, or connect to it if it is already bonded.
    pub async fn request_connect(&mut self, address: &DeviceAddress) -> Result<(), CoordinatorError> {
        self.platform.ensure_permissions().await?;

        let record = self
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| CoordinatorError::UnknownDevice(address.clone()))?;

        // A new request replaces the previous attempt and its socket.
        if self.attempt.is_in_flight() || self.socket.is_some() {
            info!("Replacing attempt {:?}", self.attempt);
            self.teardown_attempt().await;
        }

        if !record.is_bonded() {
            self.attempt = ConnectionAttempt::Pairing(address.clone());
            self.set_status(
                ConnectionStatus::Pairing,
                format!("Pairing with: {}", record.display_name()),
            );
            self.publish();

            if let Err(err) = self.platform.create_bond(address).await {
                warn!("Failed to request bonding with {}: {}", address, err);
                self.attempt = ConnectionAttempt::Failed {
                    address: address.clone(),
                    reason: err.to_string(),
                };
                self.set_status(ConnectionStatus::Error, "Pairing failed".to_string());
                self.publish();
                return Err(err.into());
            }

            self.notify(format!("Pairing with {}", record.display_name()));
            return Ok(());
        }

        self.begin_connect(address.clone()).await;
        Ok(())
    }

    /// Remove the bond with a device.
    pub async fn request_unpair(&mut self, address: &DeviceAddress) -> Result<(), CoordinatorError> {
        let name = self.name_of(address);

        let socket_to_device = self.socket.as_ref().map(|s| s.peer() == address).unwrap_or(false);
        let attempt_on_device = self.attempt.target() == Some(address);
        if socket_to_device || attempt_on_device {
            self.teardown_attempt().await;
            self.set_status(ConnectionStatus::Disconnected, String::new());
        }

        match self.platform.remove_bond(address).await {
            Ok(()) => {
                self.notify(format!("Unpairing {}", name));
                self.refresh_paired().await;
                self.publish();
                Ok(())
            }
            Err(err) => {
                warn!("Failed to unpair {}: {}", address, err);
                self.publish();
                Err(err.into())
            }
        }
    }

    /// Close the open connection, if any.
    pub async fn disconnect(&mut self) {
        self.teardown_attempt().await;
        self.set_status(ConnectionStatus::Disconnected, String::new());
        self.publish();
    }

    /// Switch the adapter on or off. The change arrives as an adapter event.
    pub async fn set_adapter_powered(&mut self, on: bool) -> Result<(), CoordinatorError> {
        self.platform.ensure_permissions().await?;
        self.platform.set_powered(on).await?;
        info!("Requested adapter power {}", if on { "on" } else { "off" });
        Ok(())
    }

    /// Release discovery and the socket.
    pub async fn shutdown(&mut self) {
        self.wants_scan = false;
        self.stop_by_user = false;
        if self.platform.is_discovering().await {
            self.cancel_discovery_quietly().await;
        }
        self.session = ScanSession::Idle;
        self.teardown_attempt().await;
        self.set_status(ConnectionStatus::Disconnected, String::new());
        self.publish();
    }

    fn on_device_found(&mut self, identity: DeviceIdentity) {
        let address = identity.address.clone();
        match self.devices.upsert_discovered(identity) {
            Upsert::Inserted => debug!("Found device {}", address),
            Upsert::Renamed => debug!("Device {} reported a new name", address),
            Upsert::Unchanged => {}
        }
    }

    async fn on_discovery_finished(&mut self) {
        if self.expected_finishes > 0 {
            self.expected_finishes -= 1;
            debug!("Discovery finished after internal cancel");
            return;
        }

        match self.session {
            ScanSession::StoppingByUser => self.finish_user_stop(),
            ScanSession::Active if self.wants_scan => {
                if !self.settings.rescan.allows_restart(self.restarts) {
                    info!("Scan ended after {} restarts", self.restarts);
                    self.wants_scan = false;
                    self.session = ScanSession::Finished;
                    return;
                }

                self.restarts += 1;
                debug!("Restarting discovery (window {})", self.restarts + 1);
                if let Err(err) = self.platform.start_discovery().await {
                    warn!("Failed to restart discovery: {}", err);
                    self.wants_scan = false;
                    self.session = ScanSession::Idle;
                    self.notify(format!("Scanning stopped: {}", err));
                }
            }
            ScanSession::Active => self.session = ScanSession::Finished,
            _ => debug!("Ignoring discovery finished in {:?}", self.session),
        }
    }

    async fn on_adapter_state(&mut self, power: AdapterPower) {
        match power {
            AdapterPower::On => {
                info!("Bluetooth enabled");
                self.adapter_on = true;
                self.refresh_paired().await;
            }
            AdapterPower::Off => {
                info!("Bluetooth disabled");
                self.adapter_on = false;
                self.wants_scan = false;
                self.stop_by_user = false;
                self.expected_finishes = 0;
                self.session = ScanSession::Idle;
                self.teardown_attempt().await;
                self.set_status(ConnectionStatus::Disconnected, String::new());
                self.devices.clear();
            }
        }
    }

    async fn on_bond_state_changed(&mut self, address: DeviceAddress, state: BondState) {
        let previous = self.devices.set_bond_state(&address, state);
        debug!("Bond state of {}: {:?} -> {:?}", address, previous, state);

        let pairing_this = self.attempt == ConnectionAttempt::Pairing(address.clone());

        match state {
            BondState::Bonded => {
                self.notify(format!("Successfully paired with {}", self.name_of(&address)));
                self.refresh_paired().await;
                if pairing_this {
                    self.begin_connect(address).await;
                }
            }
            BondState::Unbonded if pairing_this => {
                self.attempt = ConnectionAttempt::Failed {
                    address,
                    reason: "pairing was not completed".to_string(),
                };
                self.set_status(ConnectionStatus::Error, "Pairing failed".to_string());
                self.notify("Pairing failed");
            }
            BondState::Unbonded if previous == Some(BondState::Bonded) => {
                self.refresh_paired().await;
            }
            _ => {}
        }
    }

    /// Open a socket to a bonded device off the loop.
    async fn begin_connect(&mut self, address: DeviceAddress) {
        if self.platform.is_discovering().await {
            self.cancel_discovery_quietly().await;
        }
        if self.wants_scan {
            info!("Scan ended for connection attempt");
            self.wants_scan = false;
            self.session = ScanSession::Finished;
        }

        self.close_socket().await;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }

        self.generation += 1;
        let generation = self.generation;
        self.attempt = ConnectionAttempt::Connecting(address.clone());
        self.set_status(
            ConnectionStatus::Connecting,
            format!("Connecting to: {}", self.name_of(&address)),
        );
        self.publish();

        let platform = self.platform.clone();
        let outcome_tx = self.outcome_tx.clone();
        let service = self.settings.service;

        self.connect_task = Some(tokio::spawn(async move {
            let result = platform.open_stream(&address, service).await;
            let _ = outcome_tx.send(ConnectOutcome {
                generation,
                address,
                result,
            });
        }));
    }

    /// Apply the result of a socket open.
    pub async fn handle_connect_outcome(&mut self, outcome: ConnectOutcome<P::Socket>) {
        let current = outcome.generation == self.generation
            && self.attempt == ConnectionAttempt::Connecting(outcome.address.clone());

        if !current {
            debug!("Dropping stale connect result for {}", outcome.address);
            if let Ok(mut socket) = outcome.result {
                close_quietly(&mut socket).await;
            }
            return;
        }

        self.connect_task = None;
        let name = self.name_of(&outcome.address);

        match outcome.result {
            Ok(socket) => {
                info!("Connected to {}", outcome.address);
                self.socket = Some(socket);
                self.attempt = ConnectionAttempt::Connected(outcome.address);
                self.set_status(ConnectionStatus::Connected, format!("Connected to: {}", name));
                self.notify(format!("Connected to {}", name));
            }
            Err(err) => {
                warn!("Connection to {} failed: {}", outcome.address, err);
                self.attempt = ConnectionAttempt::Failed {
                    address: outcome.address,
                    reason: err.to_string(),
                };
                self.set_status(ConnectionStatus::Error, "Connection failed".to_string());
                self.notify(format!("Connection failed: {}", err));
            }
        }

        self.publish();
    }

    /// Abort a pending connect, close the socket and forget the attempt.
    async fn teardown_attempt(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        self.close_socket().await;
        self.attempt = ConnectionAttempt::Idle;
    }

    async fn close_socket(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            debug!("Closing socket to {}", socket.peer());
            close_quietly(&mut socket).await;
        }
    }

    async fn cancel_discovery_quietly(&mut self) {
        match self.platform.cancel_discovery().await {
            Ok(()) => self.expected_finishes += 1,
            Err(err) => warn!("Failed to cancel discovery: {}", err),
        }
    }

    fn finish_user_stop(&mut self) {
        self.stop_by_user = false;
        self.session = ScanSession::Idle;
        self.notify("Scanning finished");
    }

    async fn refresh_paired(&mut self) {
        match self.platform.bonded_devices().await {
            Ok(paired) => self.devices.replace_paired(paired),
            Err(err) => warn!("Failed to enumerate paired devices: {}", err),
        }
    }

    fn name_of(&self, address: &DeviceAddress) -> String {
        self.devices
            .get(address)
            .map(|r| r.display_name().to_string())
            .unwrap_or_else(|| address.to_string())
    }

    fn set_status(&mut self, status: ConnectionStatus, text: String) {
        self.status = status;
        self.status_text = text;
    }

    fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        info!("Notice: {}", message);
        self.state.set_last_notice(message.clone());
        let _ = self.ui_tx.send(UiNotice::Notice(message));
    }

    /// Copy the current state into the shared snapshot.
    fn publish(&self) {
        self.state.set_adapter_present(true);
        self.state.set_adapter_on(self.adapter_on);
        self.state.set_scanning(self.wants_scan);
        self.state.set_connection(self.status, self.status_text.clone());
        self.state.set_rows(self.devices.rows());
        let _ = self.ui_tx.send(UiNotice::Changed);
    }
}

async fn close_quietly<S: StreamSocket>(socket: &mut S) {
    if let Err(err) = socket.close().await {
        debug!("Ignoring error while closing socket: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rescan_policy() {
        assert!(RescanPolicy::Continuous.allows_restart(u32::MAX));
        assert!(!RescanPolicy::Once.allows_restart(0));

        let limited = RescanPolicy::Limited { max_restarts: 2 };
        assert!(limited.allows_restart(0));
        assert!(limited.allows_restart(1));
        assert!(!limited.allows_restart(2));
    }

    #[test]
    fn test_rescan_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            rescan: RescanPolicy,
        }

        let parsed: Wrapper = toml::from_str("rescan = { mode = \"limited\", max_restarts = 3 }").unwrap();
        assert_eq!(parsed.rescan, RescanPolicy::Limited { max_restarts: 3 });

        let parsed: Wrapper = toml::from_str("[rescan]\nmode = \"continuous\"").unwrap();
        assert_eq!(parsed.rescan, RescanPolicy::Continuous);
    }
}
