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

//! Error types for the Bluetooth layer.

use std::io;
use thiserror::Error;

use super::types::DeviceAddress;

/// Failures reported by a platform adapter.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Bluetooth permissions were not granted")]
    PermissionDenied,

    #[error("Bluetooth adapter is not available")]
    AdapterUnavailable,

    /// The operation is not offered on this platform or version.
    #[error("Operation not available: {0}")]
    Unavailable(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("Bluetooth stack error: {0}")]
    Backend(String),
}

impl From<bluer::Error> for PlatformError {
    fn from(err: bluer::Error) -> Self {
        use bluer::ErrorKind;

        match err.kind {
            ErrorKind::NotAuthorized | ErrorKind::NotPermitted => PlatformError::PermissionDenied,
            ErrorKind::NotAvailable | ErrorKind::NotReady => PlatformError::AdapterUnavailable,
            ErrorKind::DoesNotExist => PlatformError::UnknownDevice(err.message),
            _ => PlatformError::Backend(err.to_string()),
        }
    }
}

/// Failures surfaced by the coordinator. None of them are fatal.
#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("All permissions are required for Bluetooth scanning")]
    PermissionDenied,

    #[error("Bluetooth is not available")]
    AdapterUnavailable,

    #[error("{0}")]
    IoFailure(String),

    #[error("Unpairing is not available on this system: {0}")]
    PrivilegedOperationUnavailable(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceAddress),
}

impl From<PlatformError> for CoordinatorError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::PermissionDenied => CoordinatorError::PermissionDenied,
            PlatformError::AdapterUnavailable => CoordinatorError::AdapterUnavailable,
            PlatformError::Unavailable(reason) => {
                CoordinatorError::PrivilegedOperationUnavailable(reason)
            }
            other => CoordinatorError::IoFailure(other.to_string()),
        }
    }
}
