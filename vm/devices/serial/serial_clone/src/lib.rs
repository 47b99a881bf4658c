// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A virtual serial port cloned from an existing serial device.
//!
//! Each device added to a [`DeviceRegistry`] produces two cooperating
//! devices:
//!
//! * a **filter** attached above the existing device, which forwards its
//!   traffic, tracks its plug and play state, and carries transmit traffic
//!   for the clone;
//! * a **clone**, a synthesized serial port that reports the filtered
//!   device's capabilities under its own identity and emulates the serial
//!   control interface on top of a [`SerialPort`].
//!
//! Requests are [`Irp`]s completed exactly once through a [`Completer`].
//! Request handlers never block; anything that has to wait is parked in a
//! port queue and completed later. The only blocking point is device
//! removal, which waits for in-flight requests to drain.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod clone;
mod config;
mod device;
mod filter;
mod ioctl;
mod irp;
mod lower;
mod pnp;
mod port;
mod power;
mod registry;
mod remove_lock;
mod uart;

#[cfg(test)]
mod test_support;

pub use config::CloneIdentity;
pub use config::ConfigurationError;
pub use config::SerialCloneConfig;
pub use device::Device;
pub use device::DeviceHandle;
pub use device::DeviceRole;
pub use ioctl::IoctlError;
pub use irp::Completer;
pub use irp::Information;
pub use irp::IoControl;
pub use irp::IoStatus;
pub use irp::Irp;
pub use irp::IrpParams;
pub use irp::PendingIo;
pub use lower::DeviceCharacteristics;
pub use lower::LowerDevice;
pub use pnp::BusQueryIdType;
pub use pnp::DeviceCapabilities;
pub use pnp::DeviceRelationType;
pub use pnp::PnpMinor;
pub use pnp::PnpState;
pub use pnp::UsageNotificationType;
pub use port::ModemLines;
pub use port::SerialPort;
pub use power::DevicePowerState;
pub use power::PowerManager;
pub use power::PowerMinor;
pub use power::PowerState;
pub use power::SystemPowerState;
pub use power::TracingPowerManager;
pub use registry::DevicePair;
pub use registry::DeviceRegistry;
pub use remove_lock::DeletePending;
pub use remove_lock::RemoveLock;
pub use remove_lock::RemoveLockGuard;
pub use uart::LineStatusRegister;
pub use uart::ModemStatusRegister;
