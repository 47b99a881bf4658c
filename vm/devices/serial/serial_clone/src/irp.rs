// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The request packets that flow through the filter and clone devices.
//!
//! An [`Irp`] pairs the request parameters with a [`Completer`]. The
//! completer is consumed on completion, so every request completes exactly
//! once. A completer that is dropped without being completed reports
//! `CANCELLED` rather than leaving the caller waiting.

use crate::device::DeviceHandle;
use crate::pnp::DeviceCapabilities;
use crate::pnp::PnpMinor;
use crate::power::PowerMinor;
use futures::channel::oneshot;
use futures::FutureExt;
use serial_ioctl::IoctlCode;
use serial_ioctl::NtStatus;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

/// Request parameters, by major function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrpParams {
    /// Open the device.
    Create,
    /// Close the last handle to the device.
    Close,
    /// Cancel the caller's outstanding requests.
    Cleanup,
    /// Read up to `length` bytes.
    Read {
        /// Requested byte count.
        length: usize,
    },
    /// Write `data`.
    Write {
        /// Bytes to transmit.
        data: Vec<u8>,
    },
    /// A device I/O control request.
    DeviceControl(IoControl),
    /// A device I/O control request from another driver.
    InternalDeviceControl(IoControl),
    /// A plug and play request.
    Pnp(PnpMinor),
    /// A power request.
    Power(PowerMinor),
    /// A system management request.
    SystemControl,
}

impl IrpParams {
    /// The major function name, for logging.
    pub fn major_name(&self) -> &'static str {
        match self {
            IrpParams::Create => "create",
            IrpParams::Close => "close",
            IrpParams::Cleanup => "cleanup",
            IrpParams::Read { .. } => "read",
            IrpParams::Write { .. } => "write",
            IrpParams::DeviceControl(_) => "device_control",
            IrpParams::InternalDeviceControl(_) => "internal_device_control",
            IrpParams::Pnp(_) => "pnp",
            IrpParams::Power(_) => "power",
            IrpParams::SystemControl => "system_control",
        }
    }
}

/// Parameters of a device I/O control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoControl {
    /// The control code.
    pub code: IoctlCode,
    /// The input buffer.
    pub input: Vec<u8>,
    /// The capacity of the caller's output buffer.
    pub output_len: usize,
}

impl IoControl {
    /// Creates a control request.
    pub fn new(code: IoctlCode, input: impl Into<Vec<u8>>, output_len: usize) -> Self {
        Self {
            code,
            input: input.into(),
            output_len,
        }
    }
}

/// Result payload carried by a completed request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Information {
    /// No payload.
    #[default]
    None,
    /// Output buffer contents.
    Bytes(Vec<u8>),
    /// Number of bytes transferred.
    Length(usize),
    /// Device relations.
    Relations(Vec<DeviceHandle>),
    /// A single identifier string.
    Id(String),
    /// A list of identifier strings.
    Ids(Vec<String>),
    /// A device capabilities snapshot.
    Capabilities(DeviceCapabilities),
}

/// The final status of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoStatus {
    /// The completion status.
    pub status: NtStatus,
    /// The result payload.
    pub information: Information,
}

impl IoStatus {
    /// A status with no payload.
    pub fn new(status: NtStatus) -> Self {
        Self {
            status,
            information: Information::None,
        }
    }

    /// A status with a payload.
    pub fn with_information(status: NtStatus, information: Information) -> Self {
        Self {
            status,
            information,
        }
    }

    /// A successful status carrying output bytes.
    pub fn output(bytes: Vec<u8>) -> Self {
        Self::with_information(NtStatus::SUCCESS, Information::Bytes(bytes))
    }

    /// Returns true if the status is a success value.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The output bytes, or an empty slice if the payload is not bytes.
    pub fn bytes(&self) -> &[u8] {
        match &self.information {
            Information::Bytes(bytes) => bytes,
            _ => &[],
        }
    }
}

impl From<NtStatus> for IoStatus {
    fn from(status: NtStatus) -> Self {
        Self::new(status)
    }
}

/// Completes a request exactly once.
#[must_use]
pub struct Completer {
    inner: Option<CompleterInner>,
}

enum CompleterInner {
    Channel(oneshot::Sender<IoStatus>),
    Routine(Box<dyn FnOnce(IoStatus) + Send>),
}

impl Completer {
    /// Creates a completer whose status is delivered to the returned
    /// [`PendingIo`].
    pub fn channel() -> (Self, PendingIo) {
        let (send, recv) = oneshot::channel();
        (
            Self {
                inner: Some(CompleterInner::Channel(send)),
            },
            PendingIo(recv),
        )
    }

    /// Creates a completer that runs `f` on completion.
    ///
    /// This is how a forwarding layer observes a request's completion before
    /// passing it up to its own caller.
    pub fn from_fn(f: impl FnOnce(IoStatus) + Send + 'static) -> Self {
        Self {
            inner: Some(CompleterInner::Routine(Box::new(f))),
        }
    }

    /// Completes the request.
    pub fn complete(mut self, status: impl Into<IoStatus>) {
        self.finish(status.into());
    }

    fn finish(&mut self, status: IoStatus) {
        match self.inner.take() {
            Some(CompleterInner::Channel(send)) => {
                // The caller may have stopped waiting.
                let _ = send.send(status);
            }
            Some(CompleterInner::Routine(f)) => f(status),
            None => {}
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if self.inner.is_some() {
            tracing::warn!("request dropped without completion");
            self.finish(IoStatus::new(NtStatus::CANCELLED));
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            Some(CompleterInner::Channel(_)) => "channel",
            Some(CompleterInner::Routine(_)) => "routine",
            None => "completed",
        };
        f.debug_tuple("Completer").field(&kind).finish()
    }
}

/// The caller's side of a submitted request.
#[must_use]
#[derive(Debug)]
pub struct PendingIo(oneshot::Receiver<IoStatus>);

impl PendingIo {
    /// Returns the final status if the request has completed.
    pub fn try_status(&mut self) -> Option<IoStatus> {
        match self.0.try_recv() {
            Ok(status) => status,
            Err(oneshot::Canceled) => Some(IoStatus::new(NtStatus::CANCELLED)),
        }
    }

    /// Blocks the calling thread until the request completes.
    pub fn wait(self) -> IoStatus {
        futures::executor::block_on(self)
    }
}

impl Future for PendingIo {
    type Output = IoStatus;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<IoStatus> {
        self.0
            .poll_unpin(cx)
            .map(|r| r.unwrap_or_else(|oneshot::Canceled| IoStatus::new(NtStatus::CANCELLED)))
    }
}

/// A request packet.
#[derive(Debug)]
pub struct Irp {
    params: IrpParams,
    completer: Completer,
}

impl Irp {
    /// Creates a request and the handle the caller waits on.
    pub fn new(params: IrpParams) -> (Self, PendingIo) {
        let (completer, pending) = Completer::channel();
        (Self { params, completer }, pending)
    }

    /// Creates a request that completes through `completer`.
    pub fn with_completer(params: IrpParams, completer: Completer) -> Self {
        Self { params, completer }
    }

    /// The request parameters.
    pub fn params(&self) -> &IrpParams {
        &self.params
    }

    /// Completes the request.
    pub fn complete(self, status: impl Into<IoStatus>) {
        self.completer.complete(status);
    }

    /// Splits the request into its parameters and completer.
    pub fn into_parts(self) -> (IrpParams, Completer) {
        (self.params, self.completer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex;
    use test_with_tracing::test;

    #[test]
    fn channel_delivers_status() {
        let (irp, mut pending) = Irp::new(IrpParams::Create);
        assert!(pending.try_status().is_none());
        irp.complete(NtStatus::ACCESS_DENIED);
        assert_eq!(
            pending.try_status(),
            Some(IoStatus::new(NtStatus::ACCESS_DENIED))
        );
    }

    #[test]
    fn dropped_completer_reports_cancelled() {
        let (irp, pending) = Irp::new(IrpParams::Cleanup);
        drop(irp);
        assert_eq!(pending.wait().status, NtStatus::CANCELLED);
    }

    #[test]
    fn routine_chains_to_caller() {
        let seen = Arc::new(Mutex::new(None));
        let (outer, pending) = Completer::channel();
        let inner = Completer::from_fn({
            let seen = seen.clone();
            move |status: IoStatus| {
                *seen.lock().unwrap() = Some(status.status);
                outer.complete(status);
            }
        });
        inner.complete(IoStatus::output(vec![1, 2, 3]));
        assert_eq!(*seen.lock().unwrap(), Some(NtStatus::SUCCESS));
        assert_eq!(pending.wait().bytes(), &[1, 2, 3]);
    }
}
