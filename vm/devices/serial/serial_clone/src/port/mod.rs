// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The emulated serial port behind a clone device.
//!
//! All port state lives behind one short-hold mutex. Operations that cannot
//! complete immediately are parked in per-reason queues and completed later
//! by data arrival, transmit completion, a timer, or cancellation. Work that
//! leaves the port (completions and transmits) is collected while the lock
//! is held and run after it is released.

mod queues;

use crate::config::SerialCloneConfig;
use crate::irp::Completer;
use crate::irp::IoStatus;
use crate::uart::LineStatusRegister;
use crate::uart::Uart;
use bitfield_struct::bitfield;
use parking_lot::Mutex;
use serial_ioctl::flow;
use serial_ioctl::handshake;
use serial_ioctl::NtStatus;
use serial_ioctl::SerialChars;
use serial_ioctl::SerialHandflow;
use serial_ioctl::SerialPerfStats;
use serial_ioctl::SerialTimeouts;
use serial_ioctl::SerialXoffCounter;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use queues::PendingRead;
use queues::PendingWrite;

/// Carries transmitted bytes toward the line.
pub(crate) trait Transport: Send + Sync {
    /// Sends `data`, completing `completer` when the bytes have left.
    fn transmit(&self, data: Vec<u8>, completer: Completer);
}

/// An operation that completes through one of the port's queues.
pub(crate) enum QueuedOp {
    /// Read up to `length` bytes.
    Read { length: usize },
    /// Write `data`.
    Write { data: Vec<u8> },
    /// Replace the receive buffer with the larger, preallocated `buffer`.
    Resize { size: u32, buffer: Vec<u8> },
    /// Replace the wait mask.
    SetWaitMask(u32),
    /// Wait for an event in the wait mask.
    WaitOnMask,
    /// Purge queues and buffers.
    Purge(u32),
    /// Send XOFF and count received characters.
    XoffCounter(SerialXoffCounter),
    /// Send a character ahead of queued writes.
    ImmediateChar(u8),
}

impl fmt::Debug for QueuedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueuedOp::Read { length } => f.debug_struct("Read").field("length", length).finish(),
            QueuedOp::Write { data } => f.debug_struct("Write").field("len", &data.len()).finish(),
            QueuedOp::Resize { size, .. } => f.debug_struct("Resize").field("size", size).finish(),
            QueuedOp::SetWaitMask(mask) => f.debug_tuple("SetWaitMask").field(mask).finish(),
            QueuedOp::WaitOnMask => f.write_str("WaitOnMask"),
            QueuedOp::Purge(mask) => f.debug_tuple("Purge").field(mask).finish(),
            QueuedOp::XoffCounter(counter) => f.debug_tuple("XoffCounter").field(counter).finish(),
            QueuedOp::ImmediateChar(c) => f.debug_tuple("ImmediateChar").field(c).finish(),
        }
    }
}

/// The modem input lines as driven by the attached device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemLines {
    /// Clear to send.
    pub cts: bool,
    /// Data set ready.
    pub dsr: bool,
    /// Ring indicator.
    pub ri: bool,
    /// Data carrier detect.
    pub dcd: bool,
}

/// Reasons the transmitter is held.
#[bitfield(u8)]
pub(crate) struct TxHolding {
    pub cts: bool,
    pub dsr: bool,
    pub dcd: bool,
    pub xoff: bool,
    pub on_break: bool,
    #[bits(3)]
    _reserved: u8,
}

/// Reasons the receiver is held.
#[bitfield(u8)]
pub(crate) struct RxHolding {
    pub dtr: bool,
    pub rts: bool,
    pub xoff: bool,
    pub dsr: bool,
    #[bits(4)]
    _reserved: u8,
}

/// Which kind of transmit a completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TxKind {
    Write,
    Immediate,
    Flow,
}

/// A transmit that has been handed to the transport.
///
/// `completer` is cleared when the request completes early, through
/// cancellation or its write timeout, before the transport finishes.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub len: usize,
    pub deadline: Option<Instant>,
    pub completer: Option<Completer>,
}

/// An XOFF counter that is counting received characters.
#[derive(Debug)]
pub(crate) struct ActiveXoffCounter {
    pub remaining: i32,
    pub deadline: Option<Instant>,
    pub completer: Completer,
}

/// An entry in the read queue.
#[derive(Debug)]
pub(crate) enum ReadEntry {
    Read(PendingRead),
    Resize {
        size: u32,
        buffer: Vec<u8>,
        completer: Completer,
    },
}

/// An entry in the write queue.
#[derive(Debug)]
pub(crate) enum WriteEntry {
    Write(PendingWrite),
    XoffCounter {
        counter: SerialXoffCounter,
        completer: Completer,
    },
}

/// An entry in the mask queue.
#[derive(Debug)]
pub(crate) enum MaskEntry {
    Set(u32, Completer),
    Wait(Completer),
}

/// Side effects collected under the state lock.
#[derive(Debug, Default)]
pub(crate) struct Actions {
    completions: Vec<(Completer, IoStatus)>,
    transmits: Vec<(TxKind, Vec<u8>)>,
}

impl Actions {
    pub fn complete(&mut self, completer: Completer, status: impl Into<IoStatus>) {
        self.completions.push((completer, status.into()));
    }

    pub fn transmit(&mut self, kind: TxKind, data: Vec<u8>) {
        self.transmits.push((kind, data));
    }
}

/// Communication parameters and queues, guarded by [`SerialPort::state`].
#[derive(Debug)]
pub(crate) struct PortState {
    pub open: bool,
    pub baud_rate: u32,
    pub uart: Uart,
    pub data_mask: u8,
    pub timeouts: SerialTimeouts,
    pub chars: SerialChars,
    pub handflow: SerialHandflow,
    pub escape_char: u8,
    pub wait_mask: u32,
    pub history_mask: u32,
    pub error_word: u32,
    pub tx_holding: TxHolding,
    pub rx_holding: RxHolding,
    pub stats: SerialPerfStats,
    pub queue_size: u32,
    pub rx_buffer: VecDeque<u8>,
    pub pending_write_count: u32,
    pub read_queue: VecDeque<ReadEntry>,
    pub current_read: Option<PendingRead>,
    pub write_queue: VecDeque<WriteEntry>,
    pub current_write: Option<InFlight>,
    pub xoff_counter: Option<ActiveXoffCounter>,
    pub mask_queue: VecDeque<MaskEntry>,
    pub current_wait: Option<Completer>,
    pub purge_queue: VecDeque<(u32, Completer)>,
    pub immediate: Option<InFlight>,
}

impl PortState {
    fn new(queue_size: u32) -> Self {
        let limit = (queue_size / 5) as i32;
        Self {
            open: false,
            baud_rate: 1200,
            uart: Uart::new(),
            data_mask: 0xff,
            timeouts: SerialTimeouts::default(),
            chars: SerialChars {
                xon_char: 0x11,
                xoff_char: 0x13,
                ..Default::default()
            },
            handflow: SerialHandflow {
                control_handshake: handshake::DTR_CONTROL,
                flow_replace: flow::RTS_CONTROL,
                xon_limit: limit,
                xoff_limit: limit,
            },
            escape_char: 0,
            wait_mask: 0,
            history_mask: 0,
            error_word: 0,
            tx_holding: TxHolding::new(),
            rx_holding: RxHolding::new(),
            stats: SerialPerfStats::default(),
            queue_size,
            rx_buffer: VecDeque::with_capacity(queue_size as usize),
            pending_write_count: 0,
            read_queue: VecDeque::new(),
            current_read: None,
            write_queue: VecDeque::new(),
            current_write: None,
            xoff_counter: None,
            mask_queue: VecDeque::new(),
            current_wait: None,
            purge_queue: VecDeque::new(),
            immediate: None,
        }
    }

    /// Returns true if an abort-on-error condition rejects new reads, writes
    /// and control requests until the error word is read.
    pub fn error_abort_pending(&self) -> bool {
        self.handflow.control_handshake & handshake::ERROR_ABORT != 0 && self.error_word != 0
    }
}

thread_local! {
    /// Actions produced on this thread while it is already performing port
    /// actions. `None` when no `SerialPort::run` is active on the thread.
    static DEFERRED: RefCell<Option<VecDeque<(Arc<SerialPort>, Actions)>>> =
        const { RefCell::new(None) };
}

/// Ends the current thread's drain, dropping anything left over if the
/// drain unwinds. Dropped completers complete as cancelled.
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        let leftover = DEFERRED.with(|deferred| deferred.borrow_mut().take());
        drop(leftover);
    }
}

/// An emulated serial port.
pub struct SerialPort {
    debug_name: String,
    max_queue_size: u32,
    transport: Box<dyn Transport>,
    state: Mutex<PortState>,
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("name", &self.debug_name)
            .finish_non_exhaustive()
    }
}

impl SerialPort {
    pub(crate) fn new(
        debug_name: String,
        config: &SerialCloneConfig,
        transport: Box<dyn Transport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            debug_name,
            max_queue_size: config.max_rx_queue_size,
            transport,
            state: Mutex::new(PortState::new(config.rx_queue_size)),
        })
    }

    /// The name used in logs.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// The largest receive buffer a caller may request.
    pub fn max_queue_size(&self) -> u32 {
        self.max_queue_size
    }

    /// The current receive buffer capacity.
    pub fn rx_queue_size(&self) -> u32 {
        self.state.lock().queue_size
    }

    /// The number of received bytes waiting to be read.
    pub fn rx_buffered(&self) -> usize {
        self.state.lock().rx_buffer.len()
    }

    /// Runs `f` under the state lock, then performs the side effects it
    /// collected.
    pub(crate) fn locked<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut PortState, &mut Actions) -> R,
    ) -> R {
        let mut actions = Actions::default();
        let r = f(&mut self.state.lock(), &mut actions);
        self.run(actions);
        r
    }

    /// Performs `actions`.
    ///
    /// A transport may complete a transmit synchronously, which produces more
    /// actions from inside this call. Those are queued on the current thread
    /// and performed by the outermost call, so a long write backlog drains
    /// in a loop instead of through recursion.
    fn run(self: &Arc<Self>, actions: Actions) {
        let first = DEFERRED.with(|deferred| {
            let mut deferred = deferred.borrow_mut();
            match &mut *deferred {
                Some(queue) => {
                    queue.push_back((self.clone(), actions));
                    None
                }
                None => {
                    *deferred = Some(VecDeque::new());
                    Some(actions)
                }
            }
        });
        let Some(actions) = first else {
            return;
        };

        let _drain = DrainGuard;
        let mut next = Some((self.clone(), actions));
        while let Some((port, actions)) = next {
            port.perform(actions);
            next = DEFERRED.with(|deferred| {
                deferred
                    .borrow_mut()
                    .as_mut()
                    .and_then(|queue| queue.pop_front())
            });
        }
    }

    fn perform(self: &Arc<Self>, actions: Actions) {
        let Actions {
            completions,
            transmits,
        } = actions;
        for (completer, status) in completions {
            completer.complete(status);
        }
        for (kind, data) in transmits {
            let port = Arc::downgrade(self);
            let completer = Completer::from_fn(move |status: IoStatus| {
                if let Some(port) = port.upgrade() {
                    port.transmit_done(kind, status);
                }
            });
            self.transport.transmit(data, completer);
        }
    }

    fn transmit_done(self: &Arc<Self>, kind: TxKind, status: IoStatus) {
        tracing::trace!(port = %self.debug_name, ?kind, status = ?status.status, "transmit done");
        self.locked(|state, actions| state.transmit_done(kind, &status, actions, Instant::now()));
    }

    /// Queues `op`, completing it now if it can be satisfied immediately.
    pub(crate) fn enqueue(self: &Arc<Self>, op: QueuedOp, completer: Completer) {
        tracing::debug!(port = %self.debug_name, ?op, "enqueue");
        self.locked(|state, actions| state.enqueue(op, completer, actions, Instant::now()));
    }

    /// Completes every queued and in-flight request with `status`.
    pub(crate) fn cancel_all(self: &Arc<Self>, status: NtStatus) {
        self.locked(|state, actions| state.cancel_all(status, actions));
    }

    /// Called when the port is opened.
    pub(crate) fn open(self: &Arc<Self>) {
        tracing::info!(port = %self.debug_name, "open");
        self.locked(|state, _| state.open());
    }

    /// Called when the last handle to the port is closed.
    pub(crate) fn close(self: &Arc<Self>) {
        tracing::info!(port = %self.debug_name, "close");
        self.locked(|state, actions| state.close(actions));
    }

    /// Fails all transport-bound requests after the lower device went away.
    pub(crate) fn transport_lost(self: &Arc<Self>) {
        tracing::info!(port = %self.debug_name, "transport lost");
        self.locked(|state, actions| state.cancel_transmits(NtStatus::CANCELLED, actions));
    }

    /// Feeds bytes received from the line into the receive path.
    pub fn receive(self: &Arc<Self>, data: &[u8]) {
        tracing::trace!(port = %self.debug_name, len = data.len(), "receive");
        self.locked(|state, actions| state.receive(data, actions, Instant::now()));
    }

    /// Updates the modem input lines.
    pub fn set_modem_lines(self: &Arc<Self>, lines: ModemLines) {
        self.locked(|state, actions| state.set_modem_lines(lines, actions, Instant::now()));
    }

    /// Reports a line status change (receive errors or a break).
    pub fn line_status(self: &Arc<Self>, lsr: LineStatusRegister) {
        self.locked(|state, actions| state.line_status(lsr, actions, Instant::now()));
    }

    /// Expires read, write and XOFF counter deadlines that have passed at
    /// `now`.
    pub fn poll_timers(self: &Arc<Self>, now: Instant) {
        self.locked(|state, actions| state.poll_timers(actions, now));
    }
}
