// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The filter role: attached above an existing serial device, it forwards
//! everything downward while tracking plug and play state, caching the
//! capabilities the clone reports, and carrying the clone's transmit
//! traffic.

use crate::device::Device;
use crate::device::DeviceRole;
use crate::device::FilterExtension;
use crate::irp::Completer;
use crate::irp::Information;
use crate::irp::IoStatus;
use crate::irp::Irp;
use crate::irp::IrpParams;
use crate::pnp::DeviceRelationType;
use crate::pnp::PnpMinor;
use crate::pnp::PnpState;
use crate::power;
use crate::remove_lock::RemoveLockGuard;
use serial_ioctl::NtStatus;

pub(crate) fn dispatch(device: &Device, filter: &FilterExtension, irp: Irp) {
    match irp.params() {
        &IrpParams::Pnp(minor) => pnp(device, minor, irp),
        IrpParams::Power(_) => {
            power::dispatch_power(device, DeviceRole::Filter, Some(&*filter.lower), irp)
        }
        IrpParams::SystemControl => {
            power::dispatch_system_control(device, DeviceRole::Filter, Some(&*filter.lower), irp)
        }
        IrpParams::Read { .. } => read(device, filter, irp),
        IrpParams::Create
        | IrpParams::Close
        | IrpParams::Cleanup
        | IrpParams::Write { .. }
        | IrpParams::DeviceControl(_)
        | IrpParams::InternalDeviceControl(_) => pass_through(device, filter, irp),
    }
}

fn pnp(device: &Device, minor: PnpMinor, irp: Irp) {
    let Some(filter) = device.as_filter() else {
        irp.complete(NtStatus::NO_SUCH_DEVICE);
        return;
    };
    let guard = match device.remove_lock().acquire() {
        Ok(guard) => guard,
        Err(err) => {
            tracing::debug!(
                device = %device.debug_name(),
                ?minor,
                error = &err as &dyn std::error::Error,
                "pnp request after removal"
            );
            irp.complete(NtStatus::DELETE_PENDING);
            return;
        }
    };
    tracing::debug!(device = %device.debug_name(), ?minor, "filter pnp");

    match minor {
        PnpMinor::StartDevice => {
            let status = filter.lower.forward_sync(irp.params());
            if status.is_success() {
                device.set_pnp_state(PnpState::Started);
                if filter.lower.characteristics().removable_media() {
                    device.update_characteristics(|c| c.with_removable_media(true));
                }
            } else {
                tracing::warn!(
                    device = %device.debug_name(),
                    status = ?status.status,
                    "lower device failed to start"
                );
            }
            irp.complete(status);
        }
        PnpMinor::QueryStopDevice => {
            device.begin_pnp_query(PnpState::StopPending);
            filter.lower.forward_async(irp);
        }
        PnpMinor::QueryRemoveDevice => {
            device.begin_pnp_query(PnpState::RemovePending);
            filter.lower.forward_async(irp);
        }
        PnpMinor::CancelStopDevice => cancel(device, filter, PnpState::StopPending, irp),
        PnpMinor::CancelRemoveDevice => cancel(device, filter, PnpState::RemovePending, irp),
        PnpMinor::StopDevice => {
            device.set_pnp_state(PnpState::Stopped);
            filter.lower.forward_async(irp);
        }
        PnpMinor::SurpriseRemoval => {
            device.set_pnp_state(PnpState::SurpriseRemoved);
            notify_transport_lost(device);
            filter.lower.forward_async(irp);
        }
        PnpMinor::RemoveDevice => {
            remove(device, filter, guard, irp);
            return;
        }
        PnpMinor::DeviceUsageNotification { .. } => {
            let status = filter.lower.forward_sync(irp.params());
            irp.complete(status);
        }
        PnpMinor::QueryCapabilities { version } if version >= 1 => {
            let status = filter.lower.forward_sync(irp.params());
            if status.is_success() {
                if let Information::Capabilities(capabilities) = &status.information {
                    match device.counterpart() {
                        Some(clone) => clone.cache_capabilities(capabilities.clone()),
                        None => tracing::debug!(
                            device = %device.debug_name(),
                            "no clone to receive capabilities"
                        ),
                    }
                }
            }
            irp.complete(status);
        }
        PnpMinor::QueryDeviceRelations(DeviceRelationType::BusRelations) => {
            match device.counterpart() {
                Some(clone) => irp.complete(IoStatus::with_information(
                    NtStatus::SUCCESS,
                    Information::Relations(vec![clone.handle()]),
                )),
                None => filter.lower.forward_async(irp),
            }
        }
        PnpMinor::QueryCapabilities { .. }
        | PnpMinor::QueryId(_)
        | PnpMinor::QueryDeviceRelations(_)
        | PnpMinor::QueryResourceRequirements
        | PnpMinor::Other(_) => filter.lower.forward_async(irp),
    }
    drop(guard);
}

/// Handles a cancel of the stop or remove query that moved the device to
/// `pending`.
fn cancel(device: &Device, filter: &FilterExtension, pending: PnpState, irp: Irp) {
    if !device.is_pnp_state(pending) {
        tracing::debug!(
            device = %device.debug_name(),
            state = ?device.pnp_state(),
            "spurious pnp cancel"
        );
        filter.lower.forward_async(irp);
        return;
    }
    let status = filter.lower.forward_sync(irp.params());
    if status.is_success() {
        device.cancel_pnp_query(pending);
    } else {
        // The stack is now inconsistent; there is nothing to roll back to.
        tracing::error!(
            device = %device.debug_name(),
            status = ?status.status,
            ?pending,
            "lower device failed pnp cancel"
        );
    }
    irp.complete(status);
}

/// Tears the filter down. The steps must run in this order: mark removed,
/// drain in-flight requests, forward the removal, detach, delete.
fn remove(device: &Device, filter: &FilterExtension, guard: RemoveLockGuard, irp: Irp) {
    device.set_pnp_state(PnpState::Removed);
    device.remove_lock().release_and_wait(guard);
    tracing::info!(device = %device.debug_name(), "filter drained");
    notify_transport_lost(device);
    filter.lower.forward_async(irp);
    filter.lower.detach();
    device.mark_deleted();
}

fn notify_transport_lost(device: &Device) {
    if let Some(port) = device
        .counterpart()
        .and_then(|clone| clone.serial_port().cloned())
    {
        port.transport_lost();
    }
}

fn pass_through(device: &Device, filter: &FilterExtension, irp: Irp) {
    let Ok(guard) = device.remove_lock().acquire() else {
        irp.complete(NtStatus::DELETE_PENDING);
        return;
    };
    if let IrpParams::DeviceControl(ioctl) = irp.params() {
        tracing::debug!(device = %device.debug_name(), code = ?ioctl.code, "observed ioctl");
    }
    filter.lower.forward_async(irp);
    drop(guard);
}

/// Forwards a read, holding the lifecycle guard until the lower device
/// completes it. Completed data is traced and mirrored into the clone's
/// receive path.
fn read(device: &Device, filter: &FilterExtension, irp: Irp) {
    let guard = match device.remove_lock().acquire() {
        Ok(guard) => guard,
        Err(_) => {
            irp.complete(NtStatus::DELETE_PENDING);
            return;
        }
    };
    let (params, completer) = irp.into_parts();
    let name = device.debug_name().to_owned();
    let port = device
        .counterpart()
        .and_then(|clone| clone.serial_port().cloned());
    let completer = Completer::from_fn(move |status: IoStatus| {
        let data = status.bytes();
        tracing::trace!(
            device = %name,
            status = ?status.status,
            len = data.len(),
            ?data,
            "read complete"
        );
        if status.is_success() && !data.is_empty() {
            if let Some(port) = port {
                port.receive(data);
            }
        }
        drop(guard);
        completer.complete(status);
    });
    filter.lower.forward_async(Irp::with_completer(params, completer));
}

/// Sends bytes for the paired clone through the lower device.
pub(crate) fn transmit(device: &Device, data: Vec<u8>, completer: Completer) {
    let Some(filter) = device.as_filter() else {
        completer.complete(NtStatus::NO_SUCH_DEVICE);
        return;
    };
    let Ok(guard) = device.remove_lock().acquire() else {
        completer.complete(NtStatus::DELETE_PENDING);
        return;
    };
    tracing::trace!(device = %device.debug_name(), len = data.len(), "transmit");
    let completer = Completer::from_fn(move |status: IoStatus| {
        drop(guard);
        completer.complete(status);
    });
    filter
        .lower
        .forward_async(Irp::with_completer(IrpParams::Write { data }, completer));
}
