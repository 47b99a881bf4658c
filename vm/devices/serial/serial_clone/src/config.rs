// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Registry configuration.

use crate::device::DeviceRole;
use thiserror::Error;

/// Errors found while validating a [`SerialCloneConfig`].
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The default receive queue size is zero or above the maximum.
    #[error("receive queue size {size} must be between 1 and {max}")]
    QueueSize {
        /// The configured default size.
        size: u32,
        /// The configured maximum size.
        max: u32,
    },
    /// An identity string is empty or contains a separator.
    #[error("identity field `{0}` must be non-empty and contain no separators")]
    Identity(&'static str),
}

/// Identity strings reported by the clone.
#[derive(Debug, Clone)]
pub struct CloneIdentity {
    /// Enumerator prefix of the device id.
    pub enumerator: String,
    /// Instance id of the synthesized node.
    pub instance_id: String,
    /// Hardware id reported for the clone role.
    pub clone_id: String,
    /// Hardware id reported for the filter role.
    pub filter_id: String,
}

impl CloneIdentity {
    /// The hardware id for `role`.
    pub fn hardware_id(&self, role: DeviceRole) -> &str {
        match role {
            DeviceRole::Clone => &self.clone_id,
            DeviceRole::Filter => &self.filter_id,
        }
    }

    /// The device id (`enumerator\hardware-id`) for `role`.
    pub fn device_id(&self, role: DeviceRole) -> String {
        format!("{}\\{}", self.enumerator, self.hardware_id(role))
    }
}

impl Default for CloneIdentity {
    fn default() -> Self {
        Self {
            enumerator: "SerialClone".into(),
            instance_id: "0000".into(),
            clone_id: "*GCH4133".into(),
            filter_id: "*GCH4134".into(),
        }
    }
}

/// Configuration shared by every device pair in a registry.
#[derive(Debug, Clone)]
pub struct SerialCloneConfig {
    /// Initial receive buffer capacity of each clone port, in bytes.
    pub rx_queue_size: u32,
    /// Largest receive buffer a caller may request. Larger requests fail
    /// with `INSUFFICIENT_RESOURCES`.
    pub max_rx_queue_size: u32,
    /// Identity strings.
    pub identity: CloneIdentity,
}

impl Default for SerialCloneConfig {
    fn default() -> Self {
        Self {
            rx_queue_size: 4096,
            max_rx_queue_size: 1024 * 1024,
            identity: CloneIdentity::default(),
        }
    }
}

impl SerialCloneConfig {
    /// Checks the configuration for consistency.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rx_queue_size == 0 || self.rx_queue_size > self.max_rx_queue_size {
            return Err(ConfigurationError::QueueSize {
                size: self.rx_queue_size,
                max: self.max_rx_queue_size,
            });
        }
        let identity = &self.identity;
        for (name, value) in [
            ("enumerator", &identity.enumerator),
            ("instance_id", &identity.instance_id),
            ("clone_id", &identity.clone_id),
            ("filter_id", &identity.filter_id),
        ] {
            if value.is_empty()
                || value.contains(['\\', '\0'])
                || value.contains(char::is_whitespace)
            {
                return Err(ConfigurationError::Identity(name));
            }
        }
        Ok(())
    }
}
