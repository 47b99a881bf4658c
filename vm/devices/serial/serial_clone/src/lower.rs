// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The downward interface from the filter to the device it is attached to.

use crate::irp::IoStatus;
use crate::irp::Irp;
use crate::irp::IrpParams;
use bitfield_struct::bitfield;

/// Device object characteristics reported by a lower device.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct DeviceCharacteristics {
    /// The device uses removable media.
    pub removable_media: bool,
    /// The device is read-only.
    pub read_only_device: bool,
    /// The device is a floppy drive.
    pub floppy_diskette: bool,
    /// The device supports write-once media.
    pub write_once_media: bool,
    /// The device is reached over a network.
    pub remote_device: bool,
    /// A file system is mounted on the device.
    pub device_is_mounted: bool,
    /// The device is a virtual volume.
    pub virtual_volume: bool,
    /// The device name was generated by the system.
    pub autogenerated_name: bool,
    /// Security checks apply to opens of the device.
    pub secure_open: bool,
    #[bits(23)]
    _reserved: u32,
}

/// The next-lower device in a filter's stack.
///
/// The filter does not own the lower device; it only forwards requests to it
/// until [`LowerDevice::detach`] is called during removal.
pub trait LowerDevice: Send + Sync {
    /// Sends a request down and waits for its completion.
    fn forward_sync(&self, params: &IrpParams) -> IoStatus;

    /// Hands a request to the lower device, which becomes responsible for
    /// completing it.
    fn forward_async(&self, irp: Irp) {
        let status = self.forward_sync(irp.params());
        irp.complete(status);
    }

    /// The lower device's characteristics.
    fn characteristics(&self) -> DeviceCharacteristics {
        DeviceCharacteristics::new()
    }

    /// Called once the filter has forwarded its removal and stops using
    /// the lower device.
    fn detach(&self) {}
}
