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

//! System tray implementation using ksni.

use anyhow::Result;
use ksni::{self, menu::StandardItem, menu::SubMenu, Handle, MenuItem, Tray, TrayService};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::bluetooth::{DeviceAction, DeviceAddress, DeviceRow};
use crate::state::{AppState, ConnectionStatus};

/// Actions that can be triggered from the tray menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayAction {
    ToggleScanning,
    TogglePower,
    RefreshDevices,
    Device(DeviceAction, DeviceAddress),
    Disconnect,
    Quit,
}

/// System tray icon and menu.
pub struct BluelinkTray {
    state: Arc<AppState>,
    action_tx: mpsc::UnboundedSender<TrayAction>,
}

impl BluelinkTray {
    pub fn new(state: Arc<AppState>, action_tx: mpsc::UnboundedSender<TrayAction>) -> Self {
        Self { state, action_tx }
    }

    fn device_items(&self) -> Vec<MenuItem<Self>> {
        let mut items = vec![];

        for row in self.state.get_rows() {
            match row {
                DeviceRow::Header(title) => {
                    items.push(MenuItem::Standard(StandardItem {
                        label: title,
                        enabled: false,
                        ..Default::default()
                    }));
                }
                DeviceRow::Device {
                    address,
                    label,
                    bond_state,
                } => {
                    let submenu = DeviceAction::options_for(bond_state)
                        .iter()
                        .filter(|action| **action != DeviceAction::Cancel)
                        .map(|action| {
                            let action = *action;
                            let address = address.clone();
                            MenuItem::Standard(StandardItem {
                                label: action.as_str().to_string(),
                                activate: Box::new(move |tray: &mut Self| {
                                    let _ = tray
                                        .action_tx
                                        .send(TrayAction::Device(action, address.clone()));
                                }),
                                ..Default::default()
                            })
                        })
                        .collect();

                    // Menus are single-line.
                    items.push(MenuItem::SubMenu(SubMenu {
                        label: label.replace('\n', "  "),
                        submenu,
                        ..Default::default()
                    }));
                }
            }
        }

        items
    }
}

impl Tray for BluelinkTray {
    fn icon_name(&self) -> String {
        if !self.state.is_adapter_on() {
            return "bluetooth-disabled".to_string();
        }
        self.state.get_status().icon_name().to_string()
    }

    fn title(&self) -> String {
        "Bluelink".to_string()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        let mut description = self.state.adapter_status_text().to_string();

        let connection = self.state.get_connection_text();
        if !connection.is_empty() {
            description.push('\n');
            description.push_str(&connection);
        }
        if let Some(notice) = self.state.get_last_notice() {
            description.push('\n');
            description.push_str(&notice);
        }

        ksni::ToolTip {
            icon_name: String::new(),
            icon_pixmap: Vec::new(),
            title: "Bluelink".to_string(),
            description,
        }
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        let status = self.state.get_status();
        let adapter_present = self.state.is_adapter_present();
        let adapter_on = self.state.is_adapter_on();

        let mut items = vec![];

        // Status header
        items.push(MenuItem::Standard(StandardItem {
            label: self.state.adapter_status_text().to_string(),
            enabled: false,
            ..Default::default()
        }));

        let connection = self.state.get_connection_text();
        items.push(MenuItem::Standard(StandardItem {
            label: if connection.is_empty() {
                status.as_str().to_string()
            } else {
                connection
            },
            enabled: false,
            ..Default::default()
        }));

        items.push(MenuItem::Separator);

        // Scan toggle
        items.push(MenuItem::Standard(StandardItem {
            label: self.state.scan_label().to_string(),
            enabled: adapter_on,
            activate: Box::new(|tray: &mut Self| {
                let _ = tray.action_tx.send(TrayAction::ToggleScanning);
            }),
            ..Default::default()
        }));

        // Adapter power
        items.push(MenuItem::Standard(StandardItem {
            label: if adapter_on {
                "Turn Bluetooth Off".to_string()
            } else {
                "Turn Bluetooth On".to_string()
            },
            enabled: adapter_present,
            activate: Box::new(|tray: &mut Self| {
                let _ = tray.action_tx.send(TrayAction::TogglePower);
            }),
            ..Default::default()
        }));

        items.push(MenuItem::Standard(StandardItem {
            label: "Refresh Devices".to_string(),
            enabled: adapter_on,
            activate: Box::new(|tray: &mut Self| {
                let _ = tray.action_tx.send(TrayAction::RefreshDevices);
            }),
            ..Default::default()
        }));

        if status == ConnectionStatus::Connected {
            items.push(MenuItem::Standard(StandardItem {
                label: "Disconnect".to_string(),
                activate: Box::new(|tray: &mut Self| {
                    let _ = tray.action_tx.send(TrayAction::Disconnect);
                }),
                ..Default::default()
            }));
        }

        if adapter_on {
            items.push(MenuItem::Separator);
            items.extend(self.device_items());
        }

        items.push(MenuItem::Separator);

        // Quit
        items.push(MenuItem::Standard(StandardItem {
            label: "Quit".to_string(),
            activate: Box::new(|tray: &mut Self| {
                let _ = tray.action_tx.send(TrayAction::Quit);
            }),
            ..Default::default()
        }));

        items
    }

    fn id(&self) -> String {
        "bluelink".to_string()
    }

    fn category(&self) -> ksni::Category {
        ksni::Category::Hardware
    }
}

/// Run the system tray service.
pub fn run_tray(
    state: Arc<AppState>,
) -> Result<(mpsc::UnboundedReceiver<TrayAction>, Handle<BluelinkTray>)> {
    let (action_tx, action_rx) = mpsc::unbounded_channel();

    let tray = BluelinkTray::new(state, action_tx);
    let service = TrayService::new(tray);
    let handle = service.handle();

    // Spawn the tray service
    std::thread::spawn(move || {
        let _ = service.run();
    });

    info!("System tray started");

    Ok((action_rx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::BLUETOOTH_UNSUPPORTED;

    fn standard_items(tray: &BluelinkTray) -> Vec<(String, bool)> {
        tray.menu()
            .into_iter()
            .filter_map(|item| match item {
                MenuItem::Standard(item) => Some((item.label, item.enabled)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_menu_without_adapter() {
        let state = AppState::new();
        state.mark_unsupported();
        let (action_tx, _action_rx) = mpsc::unbounded_channel();
        let tray = BluelinkTray::new(state, action_tx);

        let items = standard_items(&tray);
        assert_eq!(items[0], ("Status: Unknown".to_string(), false));
        for (label, enabled) in &items {
            if label != "Quit" {
                assert!(!enabled, "{} should be disabled", label);
            }
        }
        assert!(tray.tool_tip().description.contains(BLUETOOTH_UNSUPPORTED));
    }

    #[test]
    fn test_refresh_item_sends_action() {
        let state = AppState::new();
        state.set_adapter_on(true);
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let mut tray = BluelinkTray::new(state, action_tx);

        let refresh = tray
            .menu()
            .into_iter()
            .find_map(|item| match item {
                MenuItem::Standard(item) if item.label == "Refresh Devices" => Some(item),
                _ => None,
            })
            .unwrap();
        assert!(refresh.enabled);
        (refresh.activate)(&mut tray);

        assert_eq!(action_rx.try_recv().unwrap(), TrayAction::RefreshDevices);
    }
}
