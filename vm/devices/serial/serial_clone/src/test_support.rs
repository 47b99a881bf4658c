// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An instrumented lower device for tests.

use crate::irp::Information;
use crate::irp::IoStatus;
use crate::irp::Irp;
use crate::irp::IrpParams;
use crate::lower::DeviceCharacteristics;
use crate::lower::LowerDevice;
use crate::pnp::DeviceCapabilities;
use crate::pnp::PnpMinor;
use parking_lot::Mutex;
use serial_ioctl::NtStatus;
use std::collections::VecDeque;
use std::sync::Arc;

/// Something the fake lower device observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LowerEvent {
    /// A synchronous forward.
    Sync(IrpParams),
    /// An asynchronous forward.
    Async(IrpParams),
    /// A parked request was completed by the test.
    Completed(&'static str),
    /// The filter detached.
    Detach,
}

/// A lower device that records what it sees. Requests whose major function
/// is parked are held until the test completes them.
pub struct FakeLower {
    events: Mutex<Vec<LowerEvent>>,
    fail_next_sync: Mutex<Option<NtStatus>>,
    characteristics: Mutex<DeviceCharacteristics>,
    capabilities: Mutex<DeviceCapabilities>,
    read_data: Mutex<Vec<u8>>,
    parked_majors: Mutex<Vec<&'static str>>,
    parked: Mutex<VecDeque<Irp>>,
}

impl FakeLower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail_next_sync: Mutex::new(None),
            characteristics: Mutex::new(DeviceCharacteristics::new()),
            capabilities: Mutex::new(DeviceCapabilities {
                removable: true,
                surprise_removal_ok: true,
                address: 1,
                ui_number: 1,
                ..Default::default()
            }),
            read_data: Mutex::new(Vec::new()),
            parked_majors: Mutex::new(Vec::new()),
            parked: Mutex::new(VecDeque::new()),
        })
    }

    pub fn events(&self) -> Vec<LowerEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn fail_next_sync(&self, status: NtStatus) {
        *self.fail_next_sync.lock() = Some(status);
    }

    pub fn set_characteristics(&self, characteristics: DeviceCharacteristics) {
        *self.characteristics.lock() = characteristics;
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.lock().clone()
    }

    pub fn set_capabilities(&self, capabilities: DeviceCapabilities) {
        *self.capabilities.lock() = capabilities;
    }

    /// Bytes returned by the next read.
    pub fn set_read_data(&self, data: &[u8]) {
        *self.read_data.lock() = data.to_vec();
    }

    /// Holds asynchronous requests with this major function name.
    pub fn park(&self, major: &'static str) {
        self.parked_majors.lock().push(major);
    }

    pub fn parked_count(&self) -> usize {
        self.parked.lock().len()
    }

    /// The parameters of the oldest parked request.
    pub fn peek_parked(&self) -> Option<IrpParams> {
        self.parked.lock().front().map(|irp| irp.params().clone())
    }

    /// Completes the oldest parked request with the response the device
    /// would have given.
    pub fn complete_parked(&self) -> bool {
        let Some(irp) = self.parked.lock().pop_front() else {
            return false;
        };
        let major = irp.params().major_name();
        let status = self.respond(irp.params());
        self.events.lock().push(LowerEvent::Completed(major));
        irp.complete(status);
        true
    }

    /// Stops parking and completes every parked request, oldest first.
    pub fn release_parked(&self) {
        self.parked_majors.lock().clear();
        while self.complete_parked() {}
    }

    /// Writes forwarded so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                LowerEvent::Async(IrpParams::Write { data }) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn respond(&self, params: &IrpParams) -> IoStatus {
        match params {
            IrpParams::Pnp(PnpMinor::QueryCapabilities { .. }) => IoStatus::with_information(
                NtStatus::SUCCESS,
                Information::Capabilities(self.capabilities()),
            ),
            IrpParams::Read { length } => {
                let mut data = std::mem::take(&mut *self.read_data.lock());
                data.truncate(*length);
                IoStatus::output(data)
            }
            IrpParams::Write { data } => {
                IoStatus::with_information(NtStatus::SUCCESS, Information::Length(data.len()))
            }
            _ => NtStatus::SUCCESS.into(),
        }
    }
}

impl LowerDevice for FakeLower {
    fn forward_sync(&self, params: &IrpParams) -> IoStatus {
        self.events.lock().push(LowerEvent::Sync(params.clone()));
        if let Some(status) = self.fail_next_sync.lock().take() {
            return status.into();
        }
        self.respond(params)
    }

    fn forward_async(&self, irp: Irp) {
        let major = irp.params().major_name();
        self.events.lock().push(LowerEvent::Async(irp.params().clone()));
        if self.parked_majors.lock().contains(&major) {
            self.parked.lock().push_back(irp);
            return;
        }
        let status = self.respond(irp.params());
        irp.complete(status);
    }

    fn characteristics(&self) -> DeviceCharacteristics {
        *self.characteristics.lock()
    }

    fn detach(&self) {
        self.events.lock().push(LowerEvent::Detach);
    }
}
