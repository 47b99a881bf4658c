// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Owns the filter and clone devices, keyed by handle.

use crate::clone::FilterTransport;
use crate::config::ConfigurationError;
use crate::config::SerialCloneConfig;
use crate::device::CloneExtension;
use crate::device::Device;
use crate::device::DeviceHandle;
use crate::device::DeviceRole;
use crate::device::FilterExtension;
use crate::device::RoleExtension;
use crate::irp::Irp;
use crate::irp::IrpParams;
use crate::irp::PendingIo;
use crate::lower::LowerDevice;
use crate::port::SerialPort;
use crate::power::PowerManager;
use crate::power::TracingPowerManager;
use parking_lot::Mutex;
use serial_ioctl::NtStatus;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// The handles of a newly created filter/clone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePair {
    /// The filter attached to the lower device.
    pub filter: DeviceHandle,
    /// The synthesized serial port.
    pub clone: DeviceHandle,
}

/// Creates device pairs and routes requests to them.
///
/// A device stays in the registry until its removal completes. Requests for
/// a handle that is no longer present complete with `NO_SUCH_DEVICE`.
pub struct DeviceRegistry {
    config: SerialCloneConfig,
    power: Arc<dyn PowerManager>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    devices: BTreeMap<DeviceHandle, Arc<Device>>,
}

impl Inner {
    fn allocate(&mut self) -> DeviceHandle {
        self.next_handle += 1;
        DeviceHandle(self.next_handle)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("config", &self.config)
            .field("devices", &self.inner.lock().devices)
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Creates a registry whose power requests need no serialization.
    pub fn new(config: SerialCloneConfig) -> Result<Self, ConfigurationError> {
        Self::with_power_manager(config, Arc::new(TracingPowerManager))
    }

    /// Creates a registry that signals `power` when a device is ready for
    /// its next power request.
    pub fn with_power_manager(
        config: SerialCloneConfig,
        power: Arc<dyn PowerManager>,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            config,
            power,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// The registry's configuration.
    pub fn config(&self) -> &SerialCloneConfig {
        &self.config
    }

    /// Attaches a filter above `lower` and synthesizes its clone.
    pub fn add_device(&self, lower: Arc<dyn LowerDevice>) -> DevicePair {
        let identity = &self.config.identity;
        let mut inner = self.inner.lock();
        let filter_handle = inner.allocate();
        let clone_handle = inner.allocate();

        let filter = Arc::new(Device::new(
            filter_handle,
            format!("{}{}", identity.hardware_id(DeviceRole::Filter), filter_handle),
            self.power.clone(),
            RoleExtension::Filter(FilterExtension { lower }),
        ));
        let clone_name = format!("{}{}", identity.hardware_id(DeviceRole::Clone), clone_handle);
        let port = SerialPort::new(
            clone_name.clone(),
            &self.config,
            Box::new(FilterTransport(Arc::downgrade(&filter))),
        );
        let clone = Arc::new(Device::new(
            clone_handle,
            clone_name,
            self.power.clone(),
            RoleExtension::Clone(CloneExtension {
                port,
                identity: identity.clone(),
                opened: AtomicBool::new(false),
            }),
        ));
        filter.set_counterpart(&clone);
        clone.set_counterpart(&filter);

        tracing::info!(
            filter = %filter.debug_name(),
            clone = %clone.debug_name(),
            "device pair added"
        );
        inner.devices.insert(filter_handle, filter);
        inner.devices.insert(clone_handle, clone);
        DevicePair {
            filter: filter_handle,
            clone: clone_handle,
        }
    }

    /// Looks up a device.
    pub fn get(&self, handle: DeviceHandle) -> Option<Arc<Device>> {
        self.inner.lock().devices.get(&handle).cloned()
    }

    /// The handles of every live device, in creation order.
    pub fn handles(&self) -> Vec<DeviceHandle> {
        self.inner.lock().devices.keys().copied().collect()
    }

    /// Routes `irp` to the device identified by `handle`.
    ///
    /// The registry lock is not held while the device handles the request,
    /// so a removal that blocks on in-flight requests does not stall other
    /// devices.
    pub fn dispatch(&self, handle: DeviceHandle, irp: Irp) {
        let Some(device) = self.get(handle) else {
            tracing::debug!(%handle, major = irp.params().major_name(), "no such device");
            irp.complete(NtStatus::NO_SUCH_DEVICE);
            return;
        };
        device.dispatch(irp);
        if device.is_deleted() {
            self.inner.lock().devices.remove(&handle);
            tracing::debug!(device = %device.debug_name(), "released");
        }
    }

    /// Submits a new request and returns the handle to wait on.
    pub fn submit(&self, handle: DeviceHandle, params: IrpParams) -> PendingIo {
        let (irp, pending) = Irp::new(params);
        self.dispatch(handle, irp);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeLower;
    use test_with_tracing::test;

    #[test]
    fn rejects_invalid_config() {
        let config = SerialCloneConfig {
            rx_queue_size: 10,
            max_rx_queue_size: 5,
            ..Default::default()
        };
        assert!(matches!(
            DeviceRegistry::new(config),
            Err(ConfigurationError::QueueSize { size: 10, max: 5 })
        ));
    }

    #[test]
    fn pair_is_linked() {
        let registry = DeviceRegistry::new(SerialCloneConfig::default()).unwrap();
        let pair = registry.add_device(FakeLower::new());
        assert_eq!(registry.handles(), vec![pair.filter, pair.clone]);

        let filter = registry.get(pair.filter).unwrap();
        let clone = registry.get(pair.clone).unwrap();
        assert_eq!(filter.role(), DeviceRole::Filter);
        assert_eq!(clone.role(), DeviceRole::Clone);
        assert_eq!(filter.counterpart().unwrap().handle(), pair.clone);
        assert_eq!(clone.counterpart().unwrap().handle(), pair.filter);
        assert!(clone.serial_port().is_some());
        assert!(filter.serial_port().is_none());
        assert_eq!(clone.debug_name(), format!("*GCH4133{}", pair.clone));
    }

    #[test]
    fn unknown_handle() {
        let registry = DeviceRegistry::new(SerialCloneConfig::default()).unwrap();
        let status = registry.submit(DeviceHandle(42), IrpParams::Create).wait();
        assert_eq!(status.status, NtStatus::NO_SUCH_DEVICE);
    }
}
