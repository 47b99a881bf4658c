// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Device instances.

use crate::clone;
use crate::config::CloneIdentity;
use crate::filter;
use crate::irp::Irp;
use crate::lower::DeviceCharacteristics;
use crate::lower::LowerDevice;
use crate::pnp::DeviceCapabilities;
use crate::pnp::PnpState;
use crate::pnp::PnpTracker;
use crate::port::SerialPort;
use crate::power::PowerManager;
use crate::remove_lock::RemoveLock;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::Weak;

/// Identifies a device in a [`DeviceRegistry`](crate::DeviceRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub(crate) u64);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The role of a device in a filter/clone pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    /// Attached above an existing serial device.
    Filter,
    /// The synthesized serial port.
    Clone,
}

pub(crate) struct FilterExtension {
    pub lower: Arc<dyn LowerDevice>,
}

pub(crate) struct CloneExtension {
    pub port: Arc<SerialPort>,
    pub identity: CloneIdentity,
    pub opened: AtomicBool,
}

pub(crate) enum RoleExtension {
    Filter(FilterExtension),
    Clone(CloneExtension),
}

/// A filter or clone device.
pub struct Device {
    handle: DeviceHandle,
    debug_name: String,
    remove_lock: RemoveLock,
    pnp: Mutex<PnpTracker>,
    characteristics: Mutex<DeviceCharacteristics>,
    capabilities: OnceLock<DeviceCapabilities>,
    counterpart: OnceLock<Weak<Device>>,
    power: Arc<dyn PowerManager>,
    deleted: AtomicBool,
    extension: RoleExtension,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle)
            .field("name", &self.debug_name)
            .field("role", &self.role())
            .field("pnp_state", &self.pnp_state())
            .finish()
    }
}

impl Device {
    pub(crate) fn new(
        handle: DeviceHandle,
        debug_name: String,
        power: Arc<dyn PowerManager>,
        extension: RoleExtension,
    ) -> Self {
        Self {
            handle,
            debug_name,
            remove_lock: RemoveLock::new(),
            pnp: Mutex::new(PnpTracker::new()),
            characteristics: Mutex::new(DeviceCharacteristics::new()),
            capabilities: OnceLock::new(),
            counterpart: OnceLock::new(),
            power,
            deleted: AtomicBool::new(false),
            extension,
        }
    }

    /// The device's handle.
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// The name used in logs.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// The device's role.
    pub fn role(&self) -> DeviceRole {
        match self.extension {
            RoleExtension::Filter(_) => DeviceRole::Filter,
            RoleExtension::Clone(_) => DeviceRole::Clone,
        }
    }

    /// The current plug and play state.
    pub fn pnp_state(&self) -> PnpState {
        self.pnp.lock().current()
    }

    /// The device's characteristics.
    pub fn characteristics(&self) -> DeviceCharacteristics {
        *self.characteristics.lock()
    }

    /// The capabilities snapshot cached by the filter, if any.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.capabilities.get()
    }

    /// The paired device, while it exists.
    pub fn counterpart(&self) -> Option<Arc<Device>> {
        self.counterpart.get().and_then(Weak::upgrade)
    }

    /// The serial port of a clone device.
    pub fn serial_port(&self) -> Option<&Arc<SerialPort>> {
        self.as_clone().map(|clone| &clone.port)
    }

    /// The number of in-flight requests, including the device's own
    /// reference until removal begins.
    pub fn outstanding_io(&self) -> usize {
        self.remove_lock.outstanding()
    }

    /// Returns true once removal has completed and the device should be
    /// released by its owner.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn as_filter(&self) -> Option<&FilterExtension> {
        match &self.extension {
            RoleExtension::Filter(filter) => Some(filter),
            RoleExtension::Clone(_) => None,
        }
    }

    pub(crate) fn as_clone(&self) -> Option<&CloneExtension> {
        match &self.extension {
            RoleExtension::Clone(clone) => Some(clone),
            RoleExtension::Filter(_) => None,
        }
    }

    pub(crate) fn remove_lock(&self) -> &RemoveLock {
        &self.remove_lock
    }

    pub(crate) fn power_manager(&self) -> &dyn PowerManager {
        self.power.as_ref()
    }

    pub(crate) fn set_counterpart(&self, counterpart: &Arc<Device>) {
        if self.counterpart.set(Arc::downgrade(counterpart)).is_err() {
            tracing::warn!(device = %self.debug_name, "counterpart already set");
        }
    }

    pub(crate) fn set_pnp_state(&self, state: PnpState) {
        let old = self.pnp.lock().set(state);
        tracing::info!(device = %self.debug_name, ?old, new = ?state, "pnp state change");
    }

    pub(crate) fn begin_pnp_query(&self, pending: PnpState) {
        self.pnp.lock().begin_query(pending);
        tracing::info!(device = %self.debug_name, new = ?pending, "pnp query");
    }

    pub(crate) fn is_pnp_state(&self, state: PnpState) -> bool {
        self.pnp.lock().current() == state
    }

    pub(crate) fn cancel_pnp_query(&self, pending: PnpState) -> bool {
        let restored = self.pnp.lock().cancel_query(pending);
        if restored {
            tracing::info!(
                device = %self.debug_name,
                state = ?self.pnp_state(),
                "pnp query cancelled"
            );
        }
        restored
    }

    pub(crate) fn update_characteristics(
        &self,
        f: impl FnOnce(DeviceCharacteristics) -> DeviceCharacteristics,
    ) {
        let mut characteristics = self.characteristics.lock();
        *characteristics = f(*characteristics);
    }

    /// Caches `capabilities` unless a snapshot is already present.
    pub(crate) fn cache_capabilities(&self, capabilities: DeviceCapabilities) {
        if let Err(capabilities) = self.capabilities.set(capabilities) {
            if self.capabilities.get() != Some(&capabilities) {
                tracing::debug!(
                    device = %self.debug_name,
                    "keeping first capabilities snapshot"
                );
            }
        }
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        tracing::info!(device = %self.debug_name, "device deleted");
    }

    /// Routes a request to the handler for the device's role.
    pub(crate) fn dispatch(&self, irp: Irp) {
        tracing::trace!(
            device = %self.debug_name,
            major = irp.params().major_name(),
            "dispatch"
        );
        match &self.extension {
            RoleExtension::Filter(ext) => filter::dispatch(self, ext, irp),
            RoleExtension::Clone(ext) => clone::dispatch(self, ext, irp),
        }
    }
}
