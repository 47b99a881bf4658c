// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Power and system control requests.
//!
//! Neither role manages power itself: the filter forwards power requests to
//! its lower device and the clone completes them locally. Both hold the
//! lifecycle guard while doing so and always let the power manager start the
//! next power request, even when rejecting one.

use crate::device::Device;
use crate::device::DeviceRole;
use crate::irp::Irp;
use crate::lower::LowerDevice;
use serial_ioctl::NtStatus;

/// System power states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPowerState {
    /// Unknown.
    Unspecified = 0,
    /// S0.
    Working = 1,
    /// S1.
    Sleeping1 = 2,
    /// S2.
    Sleeping2 = 3,
    /// S3.
    Sleeping3 = 4,
    /// S4.
    Hibernate = 5,
    /// S5.
    Shutdown = 6,
}

impl SystemPowerState {
    /// The number of system power states.
    pub const COUNT: usize = 7;
}

/// Device power states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePowerState {
    /// Unknown.
    Unspecified,
    /// Fully on.
    D0,
    /// Light sleep.
    D1,
    /// Deeper sleep.
    D2,
    /// Off.
    D3,
}

/// A target power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// A system power state.
    System(SystemPowerState),
    /// A device power state.
    Device(DevicePowerState),
}

/// Power minor functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerMinor {
    /// Arm the device for wake.
    WaitWake,
    /// Query the power sequence counters.
    PowerSequence,
    /// Change power state.
    SetPower(PowerState),
    /// Ask whether a power state change is acceptable.
    QueryPower(PowerState),
}

/// The system power manager.
pub trait PowerManager: Send + Sync {
    /// Signals that the device is ready for its next power request.
    fn start_next_power_irp(&self);
}

/// A power manager for hosts that do not serialize power requests.
#[derive(Debug, Default)]
pub struct TracingPowerManager;

impl PowerManager for TracingPowerManager {
    fn start_next_power_irp(&self) {
        tracing::trace!("next power request may start");
    }
}

/// Handles a power request for a device of `role`, forwarding to `lower` when
/// there is one and completing locally otherwise.
pub(crate) fn dispatch_power(
    device: &Device,
    role: DeviceRole,
    lower: Option<&dyn LowerDevice>,
    irp: Irp,
) {
    if device.role() != role {
        irp.complete(NtStatus::NO_SUCH_DEVICE);
        return;
    }
    let guard = match device.remove_lock().acquire() {
        Ok(guard) => guard,
        Err(err) => {
            tracing::warn!(
                device = %device.debug_name(),
                params = ?irp.params(),
                error = &err as &dyn std::error::Error,
                "rejecting power request"
            );
            device.power_manager().start_next_power_irp();
            irp.complete(NtStatus::DELETE_PENDING);
            return;
        }
    };
    tracing::debug!(device = %device.debug_name(), params = ?irp.params(), "power request");
    device.power_manager().start_next_power_irp();
    match lower {
        Some(lower) => lower.forward_async(irp),
        None => irp.complete(NtStatus::SUCCESS),
    }
    drop(guard);
}

/// Handles a system control request, like [`dispatch_power`] without the
/// power manager.
pub(crate) fn dispatch_system_control(
    device: &Device,
    role: DeviceRole,
    lower: Option<&dyn LowerDevice>,
    irp: Irp,
) {
    if device.role() != role {
        irp.complete(NtStatus::NO_SUCH_DEVICE);
        return;
    }
    let Ok(guard) = device.remove_lock().acquire() else {
        irp.complete(NtStatus::DELETE_PENDING);
        return;
    };
    match lower {
        Some(lower) => lower.forward_async(irp),
        None => irp.complete(NtStatus::SUCCESS),
    }
    drop(guard);
}
