// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The clone role: a synthesized serial port node that reports the filtered
//! device's capabilities under its own identity and emulates the serial
//! control interface, transmitting through the paired filter.

use crate::device::CloneExtension;
use crate::device::Device;
use crate::device::DeviceRole;
use crate::filter;
use crate::ioctl;
use crate::irp::Completer;
use crate::irp::Information;
use crate::irp::IoStatus;
use crate::irp::Irp;
use crate::irp::IrpParams;
use crate::pnp::BusQueryIdType;
use crate::pnp::DeviceCapabilities;
use crate::pnp::DeviceRelationType;
use crate::pnp::PnpMinor;
use crate::pnp::PnpState;
use crate::port::QueuedOp;
use crate::port::Transport;
use crate::power;
use serial_ioctl::NtStatus;
use std::sync::atomic::Ordering;
use std::sync::Weak;

/// Transmits through the paired filter device.
pub(crate) struct FilterTransport(pub Weak<Device>);

impl Transport for FilterTransport {
    fn transmit(&self, data: Vec<u8>, completer: Completer) {
        match self.0.upgrade() {
            Some(filter) => filter::transmit(&filter, data, completer),
            None => completer.complete(NtStatus::NO_SUCH_DEVICE),
        }
    }
}

pub(crate) fn dispatch(device: &Device, clone: &CloneExtension, irp: Irp) {
    let (params, completer) = irp.into_parts();
    match params {
        IrpParams::Pnp(minor) => pnp(device, minor, completer),
        params @ IrpParams::Power(_) => power::dispatch_power(
            device,
            DeviceRole::Clone,
            None,
            Irp::with_completer(params, completer),
        ),
        params @ IrpParams::SystemControl => power::dispatch_system_control(
            device,
            DeviceRole::Clone,
            None,
            Irp::with_completer(params, completer),
        ),
        params => io(device, clone, params, completer),
    }
}

/// Handles the file and data requests that target the serial port.
fn io(device: &Device, clone: &CloneExtension, params: IrpParams, completer: Completer) {
    let Ok(_guard) = device.remove_lock().acquire() else {
        completer.complete(NtStatus::DELETE_PENDING);
        return;
    };
    let port = &clone.port;
    match params {
        IrpParams::Create => {
            if clone.opened.swap(true, Ordering::AcqRel) {
                completer.complete(NtStatus::ACCESS_DENIED);
            } else {
                port.open();
                completer.complete(NtStatus::SUCCESS);
            }
        }
        IrpParams::Cleanup => {
            port.cancel_all(NtStatus::CANCELLED);
            completer.complete(NtStatus::SUCCESS);
        }
        IrpParams::Close => {
            clone.opened.store(false, Ordering::Release);
            port.close();
            completer.complete(NtStatus::SUCCESS);
        }
        IrpParams::Read { length: 0 } => completer.complete(IoStatus::output(Vec::new())),
        IrpParams::Read { length } => port.enqueue(QueuedOp::Read { length }, completer),
        IrpParams::Write { data } if data.is_empty() => completer.complete(
            IoStatus::with_information(NtStatus::SUCCESS, Information::Length(0)),
        ),
        IrpParams::Write { data } => port.enqueue(QueuedOp::Write { data }, completer),
        IrpParams::DeviceControl(control) => ioctl::dispatch(device, port, control, completer),
        IrpParams::InternalDeviceControl(control) => {
            tracing::debug!(
                device = %device.debug_name(),
                code = ?control.code,
                "internal ioctl not supported"
            );
            completer.complete(NtStatus::NOT_SUPPORTED);
        }
        IrpParams::Pnp(_) | IrpParams::Power(_) | IrpParams::SystemControl => {
            completer.complete(NtStatus::INVALID_DEVICE_REQUEST)
        }
    }
}

fn pnp(device: &Device, minor: PnpMinor, completer: Completer) {
    let Some(clone) = device.as_clone() else {
        completer.complete(NtStatus::NO_SUCH_DEVICE);
        return;
    };
    let Ok(guard) = device.remove_lock().acquire() else {
        completer.complete(NtStatus::DELETE_PENDING);
        return;
    };
    tracing::debug!(device = %device.debug_name(), ?minor, "clone pnp");

    let status: IoStatus = match minor {
        PnpMinor::StartDevice => {
            device.set_pnp_state(PnpState::Started);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::QueryStopDevice => {
            device.begin_pnp_query(PnpState::StopPending);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::QueryRemoveDevice => {
            device.begin_pnp_query(PnpState::RemovePending);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::CancelStopDevice => {
            device.cancel_pnp_query(PnpState::StopPending);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::CancelRemoveDevice => {
            device.cancel_pnp_query(PnpState::RemovePending);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::StopDevice => {
            device.set_pnp_state(PnpState::Stopped);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::SurpriseRemoval => {
            device.set_pnp_state(PnpState::SurpriseRemoved);
            clone.port.cancel_all(NtStatus::CANCELLED);
            NtStatus::SUCCESS.into()
        }
        PnpMinor::RemoveDevice => {
            device.set_pnp_state(PnpState::Removed);
            device.remove_lock().release_and_wait(guard);
            clone.port.cancel_all(NtStatus::CANCELLED);
            device.mark_deleted();
            completer.complete(NtStatus::SUCCESS);
            return;
        }
        PnpMinor::QueryId(kind) => query_id(clone, kind),
        PnpMinor::QueryCapabilities { version } => query_capabilities(device, version),
        PnpMinor::QueryDeviceRelations(kind) => query_relations(device, kind),
        PnpMinor::QueryResourceRequirements => NtStatus::SUCCESS.into(),
        PnpMinor::DeviceUsageNotification { .. } => match device
            .counterpart()
            .as_deref()
            .and_then(Device::as_filter)
        {
            Some(filter) => filter.lower.forward_sync(&IrpParams::Pnp(minor)),
            None => NtStatus::NO_SUCH_DEVICE.into(),
        },
        PnpMinor::Other(_) => NtStatus::NOT_SUPPORTED.into(),
    };
    drop(guard);
    completer.complete(status);
}

fn owned_id(id: &str) -> Result<String, NtStatus> {
    let mut owned = String::new();
    owned
        .try_reserve_exact(id.len())
        .map_err(|_| NtStatus::INSUFFICIENT_RESOURCES)?;
    owned.push_str(id);
    Ok(owned)
}

fn query_id(clone: &CloneExtension, kind: BusQueryIdType) -> IoStatus {
    let identity = &clone.identity;
    let information = match kind {
        BusQueryIdType::InstanceId => owned_id(&identity.instance_id).map(Information::Id),
        BusQueryIdType::DeviceId => {
            owned_id(&identity.device_id(DeviceRole::Clone)).map(Information::Id)
        }
        BusQueryIdType::HardwareIds => owned_id(identity.hardware_id(DeviceRole::Clone))
            .map(|id| Information::Ids(vec![id])),
        BusQueryIdType::CompatibleIds
        | BusQueryIdType::DeviceSerialNumber
        | BusQueryIdType::ContainerId => Err(NtStatus::NOT_SUPPORTED),
    };
    match information {
        Ok(information) => IoStatus::with_information(NtStatus::SUCCESS, information),
        Err(status) => status.into(),
    }
}

fn query_capabilities(device: &Device, version: u16) -> IoStatus {
    if version < 1 {
        // There is no lower device to hand an old structure to.
        return NtStatus::NOT_SUPPORTED.into();
    }
    let capabilities = match device.capabilities() {
        Some(capabilities) => capabilities.clone(),
        None => {
            tracing::warn!(
                device = %device.debug_name(),
                "no capabilities cached by the filter, reporting defaults"
            );
            DeviceCapabilities::default()
        }
    };
    IoStatus::with_information(NtStatus::SUCCESS, Information::Capabilities(capabilities))
}

fn query_relations(device: &Device, kind: DeviceRelationType) -> IoStatus {
    let relation = match kind {
        DeviceRelationType::TargetDeviceRelation => Some(device.handle()),
        DeviceRelationType::BusRelations => device.counterpart().map(|filter| filter.handle()),
        DeviceRelationType::EjectionRelations | DeviceRelationType::RemovalRelations => None,
    };
    match relation {
        Some(handle) => {
            IoStatus::with_information(NtStatus::SUCCESS, Information::Relations(vec![handle]))
        }
        None => NtStatus::NOT_SUPPORTED.into(),
    }
}
