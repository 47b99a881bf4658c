// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Plug and play request types and the per-device state tracker shared by
//! the filter and clone roles.
//!
//! ```text
//!            start            query stop
//! Stopped ─────────▶ Started ◀──────────▶ StopPending ── stop ──▶ Stopped
//!    │                  │        cancel
//!    │  query remove    │ query remove
//!    ▼                  ▼
//! RemovePending ── remove ──▶ Removed
//!
//! any non-terminal state ── surprise removal ──▶ SurpriseRemoved
//! ```
//!
//! A query saves the current state before moving to the pending state, and
//! the matching cancel restores it.

use crate::power::DevicePowerState;
use crate::power::SystemPowerState;

/// Plug and play minor functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnpMinor {
    /// Start the device.
    StartDevice,
    /// Ask whether the device can be stopped.
    QueryStopDevice,
    /// Withdraw a previous stop query.
    CancelStopDevice,
    /// Stop the device.
    StopDevice,
    /// Ask whether the device can be removed.
    QueryRemoveDevice,
    /// Withdraw a previous remove query.
    CancelRemoveDevice,
    /// The device disappeared without warning.
    SurpriseRemoval,
    /// Remove the device.
    RemoveDevice,
    /// The device is on (or left) the path of a special file.
    DeviceUsageNotification {
        /// True when the device joins the path.
        in_path: bool,
        /// The kind of special file.
        usage: UsageNotificationType,
    },
    /// Query an identifier string.
    QueryId(BusQueryIdType),
    /// Query device capabilities.
    QueryCapabilities {
        /// Version of the caller's capabilities structure.
        version: u16,
    },
    /// Query related devices.
    QueryDeviceRelations(DeviceRelationType),
    /// Query the device's resource requirements.
    QueryResourceRequirements,
    /// Any other minor function, by number.
    Other(u8),
}

/// Identifier kinds for [`PnpMinor::QueryId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusQueryIdType {
    /// `enumerator\device` id.
    DeviceId,
    /// Hardware ids, most specific first.
    HardwareIds,
    /// Compatible ids.
    CompatibleIds,
    /// Instance id, unique among siblings.
    InstanceId,
    /// Device serial number.
    DeviceSerialNumber,
    /// Container id.
    ContainerId,
}

/// Relation kinds for [`PnpMinor::QueryDeviceRelations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRelationType {
    /// Child devices enumerated by the device.
    BusRelations,
    /// Devices to eject along with the device.
    EjectionRelations,
    /// Devices that must be removed along with the device.
    RemovalRelations,
    /// The device itself.
    TargetDeviceRelation,
}

/// Special file kinds for [`PnpMinor::DeviceUsageNotification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageNotificationType {
    /// Paging file.
    Paging,
    /// Hibernation file.
    Hibernation,
    /// Crash dump file.
    DumpFile,
}

/// Plug and play device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PnpState {
    /// Not started, or stopped.
    Stopped,
    /// Started and accepting requests.
    Started,
    /// A stop query succeeded.
    StopPending,
    /// A remove query succeeded.
    RemovePending,
    /// The device disappeared.
    SurpriseRemoved,
    /// The device was removed.
    Removed,
}

/// Tracks the current and previous plug and play state.
#[derive(Debug)]
pub(crate) struct PnpTracker {
    current: PnpState,
    previous: PnpState,
}

impl PnpTracker {
    pub fn new() -> Self {
        Self {
            current: PnpState::Stopped,
            previous: PnpState::Stopped,
        }
    }

    pub fn current(&self) -> PnpState {
        self.current
    }

    /// Moves to `state`, returning the old state.
    pub fn set(&mut self, state: PnpState) -> PnpState {
        std::mem::replace(&mut self.current, state)
    }

    /// Saves the current state and moves to `pending`.
    pub fn begin_query(&mut self, pending: PnpState) {
        self.previous = self.current;
        self.current = pending;
    }

    /// Restores the state saved by [`Self::begin_query`] if the tracker is
    /// still in `pending`. Returns false for a spurious cancel.
    pub fn cancel_query(&mut self, pending: PnpState) -> bool {
        if self.current == pending {
            self.current = self.previous;
            true
        } else {
            false
        }
    }
}

/// A device capabilities snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Structure version.
    pub version: u16,
    /// Supports D1.
    pub device_d1: bool,
    /// Supports D2.
    pub device_d2: bool,
    /// Supports locking to prevent ejection.
    pub lock_supported: bool,
    /// Supports software ejection.
    pub eject_supported: bool,
    /// Can be removed while the system runs.
    pub removable: bool,
    /// Is a docking device.
    pub dock_device: bool,
    /// The instance id is unique system-wide.
    pub unique_id: bool,
    /// Install without user interaction.
    pub silent_install: bool,
    /// Usable without a function driver.
    pub raw_device_ok: bool,
    /// Tolerates surprise removal.
    pub surprise_removal_ok: bool,
    /// Can wake the system from D0.
    pub wake_from_d0: bool,
    /// Can wake the system from D1.
    pub wake_from_d1: bool,
    /// Can wake the system from D2.
    pub wake_from_d2: bool,
    /// Can wake the system from D3.
    pub wake_from_d3: bool,
    /// Bus address.
    pub address: u32,
    /// User-visible slot number.
    pub ui_number: u32,
    /// Deepest device state for each system state, indexed by
    /// [`SystemPowerState`].
    pub device_state: [DevicePowerState; SystemPowerState::COUNT],
    /// Deepest system state the device can wake from.
    pub system_wake: SystemPowerState,
    /// Deepest device state the device can signal wake from.
    pub device_wake: DevicePowerState,
    /// D1 exit latency, in 100us units.
    pub d1_latency: u32,
    /// D2 exit latency, in 100us units.
    pub d2_latency: u32,
    /// D3 exit latency, in 100us units.
    pub d3_latency: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            version: 1,
            device_d1: false,
            device_d2: false,
            lock_supported: false,
            eject_supported: false,
            removable: false,
            dock_device: false,
            unique_id: false,
            silent_install: false,
            raw_device_ok: false,
            surprise_removal_ok: false,
            wake_from_d0: false,
            wake_from_d1: false,
            wake_from_d2: false,
            wake_from_d3: false,
            address: u32::MAX,
            ui_number: u32::MAX,
            device_state: [DevicePowerState::Unspecified; SystemPowerState::COUNT],
            system_wake: SystemPowerState::Unspecified,
            device_wake: DevicePowerState::Unspecified,
            d1_latency: 0,
            d2_latency: 0,
            d3_latency: 0,
        }
    }
}
