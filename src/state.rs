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

//! Application state management.
//!
//! The coordinator writes this snapshot; the tray only reads it.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::bluetooth::DeviceRow;

/// Label of the scan button while no scan is running.
pub const SCAN_LABEL_START: &str = "Scan for Devices";

/// Label of the scan button while scanning.
pub const SCAN_LABEL_STOP: &str = "Stop Scanning";

/// Notice shown when no adapter can be opened.
pub const BLUETOOTH_UNSUPPORTED: &str = "Bluetooth not supported";

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Pairing,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Pairing => "Pairing...",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Error => "Error",
        }
    }

    pub fn icon_name(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "bluetooth-disabled",
            ConnectionStatus::Pairing | ConnectionStatus::Connecting => "bluetooth-paired",
            ConnectionStatus::Connected => "bluetooth-active",
            ConnectionStatus::Error => "dialog-error",
        }
    }
}

/// Messages from the coordinator to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiNotice {
    /// The snapshot changed; redraw.
    Changed,
    /// A message the user should see once.
    Notice(String),
}

/// Shared application state.
#[derive(Debug)]
pub struct AppState {
    /// Whether a Bluetooth adapter could be opened at all.
    pub adapter_present: RwLock<bool>,

    /// Whether the adapter is powered.
    pub adapter_on: RwLock<bool>,

    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Connection status line, e.g. "Connected to: Headset".
    pub connection_text: RwLock<String>,

    /// Whether a scan session is running.
    pub scanning: RwLock<bool>,

    /// Device list rows, with section headers.
    pub rows: RwLock<Vec<DeviceRow>>,

    /// Last notice shown to the user (for tooltip).
    pub last_notice: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            adapter_present: RwLock::new(true),
            adapter_on: RwLock::new(false),
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            connection_text: RwLock::new(String::new()),
            scanning: RwLock::new(false),
            rows: RwLock::new(Vec::new()),
            last_notice: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_adapter_present(&self, present: bool) {
        *self.adapter_present.write() = present;
    }

    pub fn is_adapter_present(&self) -> bool {
        *self.adapter_present.read()
    }

    /// Show that no adapter is available; the tray stays up without one.
    pub fn mark_unsupported(&self) {
        self.set_adapter_present(false);
        self.set_adapter_on(false);
        self.set_scanning(false);
        self.set_rows(Vec::new());
        self.set_connection(ConnectionStatus::Disconnected, String::new());
        self.set_last_notice(BLUETOOTH_UNSUPPORTED.to_string());
    }

    pub fn set_adapter_on(&self, on: bool) {
        *self.adapter_on.write() = on;
    }

    pub fn is_adapter_on(&self) -> bool {
        *self.adapter_on.read()
    }

    /// "Status: Enabled", "Status: Disabled" or "Status: Unknown".
    pub fn adapter_status_text(&self) -> &'static str {
        if !self.is_adapter_present() {
            "Status: Unknown"
        } else if self.is_adapter_on() {
            "Status: Enabled"
        } else {
            "Status: Disabled"
        }
    }

    pub fn set_connection(&self, status: ConnectionStatus, text: String) {
        *self.connection_status.write() = status;
        *self.connection_text.write() = text;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_connection_text(&self) -> String {
        self.connection_text.read().clone()
    }

    pub fn set_scanning(&self, scanning: bool) {
        *self.scanning.write() = scanning;
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning.read()
    }

    pub fn scan_label(&self) -> &'static str {
        if self.is_scanning() {
            SCAN_LABEL_STOP
        } else {
            SCAN_LABEL_START
        }
    }

    pub fn set_rows(&self, rows: Vec<DeviceRow>) {
        *self.rows.write() = rows;
    }

    pub fn get_rows(&self) -> Vec<DeviceRow> {
        self.rows.read().clone()
    }

    pub fn set_last_notice(&self, notice: String) {
        *self.last_notice.write() = Some(notice);
    }

    pub fn get_last_notice(&self) -> Option<String> {
        self.last_notice.read().clone()
    }
}
