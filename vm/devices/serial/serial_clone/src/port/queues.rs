// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Queue processing, the receive path and line-discipline behavior.
//!
//! Everything here runs under the port's state lock and never blocks. A
//! request leaves its queue exactly once: through [`Actions::complete`].

use super::Actions;
use super::ActiveXoffCounter;
use super::InFlight;
use super::MaskEntry;
use super::ModemLines;
use super::PortState;
use super::QueuedOp;
use super::ReadEntry;
use super::RxHolding;
use super::TxKind;
use super::WriteEntry;
use crate::irp::Completer;
use crate::irp::Information;
use crate::irp::IoStatus;
use crate::uart::LineStatusRegister;
use crate::uart::ModemStatusRegister;
use crate::uart::Uart;
use serial_ioctl::errors;
use serial_ioctl::events;
use serial_ioctl::flow;
use serial_ioctl::handshake;
use serial_ioctl::hold;
use serial_ioctl::lsrmst;
use serial_ioctl::purge;
use serial_ioctl::NtStatus;
use serial_ioctl::SerialHandflow;
use serial_ioctl::SerialStatus;
use serial_ioctl::SerialTimeouts;
use serial_ioctl::SerialXoffCounter;
use serial_ioctl::MAXULONG;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

/// `multiplier * length + constant` milliseconds, saturating.
fn total_timeout(multiplier: u32, length: usize, constant: u32) -> u64 {
    u64::from(multiplier)
        .saturating_mul(length.try_into().unwrap_or(u64::MAX))
        .saturating_add(constant.into())
}

fn deadline_after(now: Instant, millis: u64) -> Option<Instant> {
    if millis == 0 {
        None
    } else {
        now.checked_add(Duration::from_millis(millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Complete with whatever is buffered, even nothing.
    Immediate,
    /// Complete as soon as any byte is available, or at the deadline.
    WaitForAny,
    /// Complete when full, or when a total or interval timeout expires.
    Normal,
}

/// A read request, possibly partially filled.
#[derive(Debug)]
pub(crate) struct PendingRead {
    length: usize,
    data: Vec<u8>,
    completer: Completer,
    mode: ReadMode,
    total_deadline: Option<Instant>,
    interval: Option<Duration>,
    interval_deadline: Option<Instant>,
}

impl PendingRead {
    fn new(length: usize, completer: Completer) -> Self {
        Self {
            length,
            data: Vec::new(),
            completer,
            mode: ReadMode::Normal,
            total_deadline: None,
            interval: None,
            interval_deadline: None,
        }
    }

    /// Arms the timeouts. Called when the read reaches the head of the
    /// queue.
    fn start(&mut self, timeouts: &SerialTimeouts, now: Instant) {
        let interval = timeouts.read_interval_timeout;
        let multiplier = timeouts.read_total_timeout_multiplier;
        let constant = timeouts.read_total_timeout_constant;
        if interval == MAXULONG && multiplier == 0 && constant == 0 {
            self.mode = ReadMode::Immediate;
        } else if interval == MAXULONG
            && multiplier == MAXULONG
            && constant != 0
            && constant != MAXULONG
        {
            self.mode = ReadMode::WaitForAny;
            self.total_deadline = deadline_after(now, constant.into());
        } else {
            let total = total_timeout(multiplier, self.length, constant);
            self.total_deadline = deadline_after(now, total);
            if interval != 0 && interval != MAXULONG {
                self.interval = Some(Duration::from_millis(interval.into()));
            }
        }
    }

    fn fill(&mut self, rx: &mut VecDeque<u8>, now: Instant) {
        let n = (self.length - self.data.len()).min(rx.len());
        if n == 0 {
            return;
        }
        self.data.extend(rx.drain(..n));
        if let Some(interval) = self.interval {
            self.interval_deadline = now.checked_add(interval);
        }
    }

    fn satisfied(&self) -> bool {
        self.data.len() == self.length
            || self.mode == ReadMode::Immediate
            || (self.mode == ReadMode::WaitForAny && !self.data.is_empty())
    }

    fn expired(&self, now: Instant) -> bool {
        self.total_deadline.is_some_and(|d| d <= now)
            || self.interval_deadline.is_some_and(|d| d <= now)
    }

    fn finish(self, status: NtStatus, actions: &mut Actions) {
        actions.complete(
            self.completer,
            IoStatus::with_information(status, Information::Bytes(self.data)),
        );
    }
}

/// A write request waiting for the transmitter.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    data: Vec<u8>,
    deadline: Option<Instant>,
    completer: Completer,
}

fn output_u32(value: u32) -> IoStatus {
    IoStatus::output(value.to_le_bytes().to_vec())
}

impl PortState {
    pub fn enqueue(
        &mut self,
        op: QueuedOp,
        completer: Completer,
        actions: &mut Actions,
        now: Instant,
    ) {
        match op {
            QueuedOp::Read { length } => {
                if self.error_abort_pending() {
                    actions.complete(completer, NtStatus::CANCELLED);
                    return;
                }
                self.read_queue
                    .push_back(ReadEntry::Read(PendingRead::new(length, completer)));
                self.process_reads(actions, now);
            }
            QueuedOp::Resize { size, buffer } => {
                self.read_queue.push_back(ReadEntry::Resize {
                    size,
                    buffer,
                    completer,
                });
                self.process_reads(actions, now);
            }
            QueuedOp::Write { data } => {
                if self.error_abort_pending() {
                    actions.complete(completer, NtStatus::CANCELLED);
                    return;
                }
                // A new write ends an active XOFF counter.
                if let Some(counter) = self.xoff_counter.take() {
                    actions.complete(counter.completer, NtStatus::SERIAL_MORE_WRITES);
                }
                let total = total_timeout(
                    self.timeouts.write_total_timeout_multiplier,
                    data.len(),
                    self.timeouts.write_total_timeout_constant,
                );
                self.pending_write_count = self
                    .pending_write_count
                    .saturating_add(data.len().try_into().unwrap_or(u32::MAX));
                self.write_queue.push_back(WriteEntry::Write(PendingWrite {
                    data,
                    deadline: deadline_after(now, total),
                    completer,
                }));
                self.start_writes(actions, now);
            }
            QueuedOp::XoffCounter(counter) => {
                self.write_queue
                    .push_back(WriteEntry::XoffCounter { counter, completer });
                self.start_writes(actions, now);
            }
            QueuedOp::SetWaitMask(mask) => {
                self.mask_queue.push_back(MaskEntry::Set(mask, completer));
                self.process_masks(actions);
            }
            QueuedOp::WaitOnMask => {
                self.mask_queue.push_back(MaskEntry::Wait(completer));
                self.process_masks(actions);
            }
            QueuedOp::Purge(mask) => {
                self.purge_queue.push_back((mask, completer));
                self.process_purges(actions, now);
            }
            QueuedOp::ImmediateChar(c) => {
                if self.immediate.is_some() {
                    actions.complete(completer, NtStatus::INVALID_PARAMETER);
                    return;
                }
                self.immediate = Some(InFlight {
                    len: 1,
                    deadline: None,
                    completer: Some(completer),
                });
                self.pending_write_count = self.pending_write_count.saturating_add(1);
                actions.transmit(TxKind::Immediate, vec![c]);
            }
        }
    }

    pub fn open(&mut self) {
        self.open = true;
        self.rx_buffer.clear();
        self.error_word = 0;
        self.wait_mask = 0;
        self.history_mask = 0;
        self.rx_holding = RxHolding::new();
        if self.handflow.control_handshake & handshake::DTR_MASK != 0 {
            self.uart.set_dtr(true);
        }
        if self.handflow.flow_replace & flow::RTS_MASK == flow::RTS_CONTROL
            || self.handflow.flow_replace & flow::RTS_MASK == flow::RTS_HANDSHAKE
        {
            self.uart.set_rts(true);
        }
        self.update_tx_holds();
    }

    pub fn close(&mut self, actions: &mut Actions) {
        self.open = false;
        self.uart.set_break(false);
        self.tx_holding.set_on_break(false);
        self.uart.set_dtr(false);
        self.uart.set_rts(false);
        if let Some(wait) = self.current_wait.take() {
            actions.complete(wait, output_u32(0));
        }
        self.wait_mask = 0;
        self.history_mask = 0;
    }

    /// Moves reads forward: applies queued resizes, fills the current read
    /// from the receive buffer and completes it once satisfied.
    pub fn process_reads(&mut self, actions: &mut Actions, now: Instant) {
        loop {
            let mut read = match self.current_read.take() {
                Some(read) => read,
                None => match self.read_queue.pop_front() {
                    None => break,
                    Some(ReadEntry::Resize {
                        size,
                        buffer,
                        completer,
                    }) => {
                        self.install_rx_buffer(size, buffer);
                        actions.complete(completer, NtStatus::SUCCESS);
                        continue;
                    }
                    Some(ReadEntry::Read(mut read)) => {
                        read.start(&self.timeouts, now);
                        read
                    }
                },
            };
            read.fill(&mut self.rx_buffer, now);
            if read.satisfied() {
                read.finish(NtStatus::SUCCESS, actions);
            } else {
                self.current_read = Some(read);
                break;
            }
        }
        self.release_rx_flow(actions);
    }

    fn install_rx_buffer(&mut self, size: u32, buffer: Vec<u8>) {
        if size <= self.queue_size {
            // Another resize got there first.
            return;
        }
        let mut rx_buffer = VecDeque::from(buffer);
        rx_buffer.clear();
        rx_buffer.extend(self.rx_buffer.drain(..));
        self.rx_buffer = rx_buffer;
        self.queue_size = size;
        tracing::debug!(size, "receive buffer resized");
    }

    fn tx_held(&self) -> bool {
        self.tx_holding.into_bits() != 0
    }

    /// Starts the next write or XOFF counter if the transmitter is free.
    pub fn start_writes(&mut self, actions: &mut Actions, now: Instant) {
        while self.current_write.is_none() && self.xoff_counter.is_none() {
            match self.write_queue.front() {
                None => break,
                Some(WriteEntry::Write(_)) if self.tx_held() => break,
                Some(_) => {}
            }
            match self.write_queue.pop_front() {
                None => break,
                Some(WriteEntry::Write(write)) => {
                    self.current_write = Some(InFlight {
                        len: write.data.len(),
                        deadline: write.deadline,
                        completer: Some(write.completer),
                    });
                    actions.transmit(TxKind::Write, write.data);
                }
                Some(WriteEntry::XoffCounter { completer, .. })
                    if !self.write_queue.is_empty() =>
                {
                    actions.complete(completer, NtStatus::SERIAL_MORE_WRITES);
                }
                Some(WriteEntry::XoffCounter { counter, completer }) => {
                    self.start_xoff_counter(counter, completer, actions, now);
                }
            }
        }
    }

    fn start_xoff_counter(
        &mut self,
        counter: SerialXoffCounter,
        completer: Completer,
        actions: &mut Actions,
        now: Instant,
    ) {
        actions.transmit(TxKind::Flow, vec![counter.xoff_char]);
        self.xoff_counter = Some(ActiveXoffCounter {
            remaining: counter.counter,
            deadline: deadline_after(now, counter.timeout.into()),
            completer,
        });
    }

    pub fn transmit_done(
        &mut self,
        kind: TxKind,
        status: &IoStatus,
        actions: &mut Actions,
        now: Instant,
    ) {
        let done = match kind {
            TxKind::Write => self.current_write.take(),
            TxKind::Immediate => self.immediate.take(),
            TxKind::Flow => return,
        };
        let Some(done) = done else {
            tracing::warn!(?kind, "transmit completion without a transmit");
            return;
        };
        let len = done.len.try_into().unwrap_or(u32::MAX);
        self.pending_write_count = self.pending_write_count.saturating_sub(len);
        if status.is_success() {
            self.stats.transmitted_count = self.stats.transmitted_count.wrapping_add(len);
        }
        if let Some(completer) = done.completer {
            let result = if status.is_success() {
                IoStatus::with_information(NtStatus::SUCCESS, Information::Length(done.len))
            } else {
                status.status.into()
            };
            actions.complete(completer, result);
        }
        self.start_writes(actions, now);
        if self.current_write.is_none() && self.immediate.is_none() && self.write_queue.is_empty()
        {
            self.signal(events::EV_TXEMPTY, actions);
        }
    }

    fn process_masks(&mut self, actions: &mut Actions) {
        while let Some(entry) = self.mask_queue.pop_front() {
            match entry {
                MaskEntry::Set(mask, completer) => {
                    if let Some(wait) = self.current_wait.take() {
                        actions.complete(wait, output_u32(0));
                    }
                    self.wait_mask = mask;
                    self.history_mask = 0;
                    actions.complete(completer, NtStatus::SUCCESS);
                }
                MaskEntry::Wait(completer) => {
                    if self.current_wait.is_some() || self.wait_mask == 0 {
                        actions.complete(completer, NtStatus::INVALID_PARAMETER);
                    } else if self.history_mask != 0 {
                        let history = std::mem::take(&mut self.history_mask);
                        actions.complete(completer, output_u32(history));
                    } else {
                        self.current_wait = Some(completer);
                    }
                }
            }
        }
    }

    /// Records `events` that are in the wait mask and satisfies a pending
    /// wait.
    pub fn signal(&mut self, events: u32, actions: &mut Actions) {
        let events = events & self.wait_mask;
        if events == 0 {
            return;
        }
        self.history_mask |= events;
        if let Some(wait) = self.current_wait.take() {
            let history = std::mem::take(&mut self.history_mask);
            actions.complete(wait, output_u32(history));
        }
    }

    fn process_purges(&mut self, actions: &mut Actions, now: Instant) {
        while let Some((mask, completer)) = self.purge_queue.pop_front() {
            if mask & purge::TXABORT != 0 {
                self.cancel_writes(NtStatus::CANCELLED, actions);
            }
            if mask & purge::RXABORT != 0 {
                self.cancel_reads(NtStatus::CANCELLED, actions);
            }
            // Nothing is buffered below the write queue, so TXCLEAR has no
            // further effect.
            if mask & purge::RXCLEAR != 0 {
                self.rx_buffer.clear();
                self.release_rx_flow(actions);
            }
            actions.complete(completer, NtStatus::SUCCESS);
        }
        self.start_writes(actions, now);
    }

    fn cancel_reads(&mut self, status: NtStatus, actions: &mut Actions) {
        if let Some(read) = self.current_read.take() {
            read.finish(status, actions);
        }
        for entry in self.read_queue.drain(..) {
            match entry {
                ReadEntry::Read(read) => read.finish(status, actions),
                ReadEntry::Resize { completer, .. } => actions.complete(completer, status),
            }
        }
    }

    fn cancel_writes(&mut self, status: NtStatus, actions: &mut Actions) {
        if let Some(completer) = self
            .current_write
            .as_mut()
            .and_then(|write| write.completer.take())
        {
            actions.complete(completer, status);
        }
        if let Some(counter) = self.xoff_counter.take() {
            actions.complete(counter.completer, status);
        }
        for entry in std::mem::take(&mut self.write_queue) {
            match entry {
                WriteEntry::Write(write) => {
                    let len = write.data.len().try_into().unwrap_or(u32::MAX);
                    self.pending_write_count = self.pending_write_count.saturating_sub(len);
                    actions.complete(write.completer, status);
                }
                WriteEntry::XoffCounter { completer, .. } => actions.complete(completer, status),
            }
        }
    }

    /// Fails every request that is waiting on the transport.
    pub fn cancel_transmits(&mut self, status: NtStatus, actions: &mut Actions) {
        self.cancel_writes(status, actions);
        if let Some(completer) = self
            .immediate
            .as_mut()
            .and_then(|immediate| immediate.completer.take())
        {
            actions.complete(completer, status);
        }
    }

    pub fn cancel_all(&mut self, status: NtStatus, actions: &mut Actions) {
        self.cancel_reads(status, actions);
        self.cancel_transmits(status, actions);
        if let Some(wait) = self.current_wait.take() {
            actions.complete(wait, status);
        }
        for entry in self.mask_queue.drain(..) {
            match entry {
                MaskEntry::Set(_, completer) | MaskEntry::Wait(completer) => {
                    actions.complete(completer, status)
                }
            }
        }
        for (_, completer) in self.purge_queue.drain(..) {
            actions.complete(completer, status);
        }
    }

    /// Appends `bytes` to the receive buffer, returning the events raised.
    fn push_rx(&mut self, bytes: &[u8]) -> u32 {
        let capacity = self.queue_size as usize;
        let before = self.rx_buffer.len();
        if before + bytes.len() > capacity {
            self.error_word |= errors::QUEUEOVERRUN;
            self.stats.buffer_overrun_error_count =
                self.stats.buffer_overrun_error_count.wrapping_add(1);
            return events::EV_ERR;
        }
        self.rx_buffer.extend(bytes);
        let threshold = capacity * 8 / 10;
        if before < threshold && self.rx_buffer.len() >= threshold {
            events::EV_RX80FULL
        } else {
            0
        }
    }

    fn count_xoff(&mut self, actions: &mut Actions) {
        if let Some(counter) = &mut self.xoff_counter {
            counter.remaining -= 1;
            if counter.remaining <= 0 {
                if let Some(counter) = self.xoff_counter.take() {
                    actions.complete(counter.completer, NtStatus::SUCCESS);
                }
            }
        }
    }

    pub fn receive(&mut self, data: &[u8], actions: &mut Actions, now: Instant) {
        if !self.open {
            tracing::trace!(len = data.len(), "port closed, dropping received data");
            return;
        }
        let flow_replace = self.handflow.flow_replace;
        let mut raised = 0;
        let mut tx_released = false;
        for &byte in data {
            self.stats.received_count = self.stats.received_count.wrapping_add(1);
            let byte = byte & self.data_mask;
            if self.rx_holding.dsr() {
                continue;
            }
            if flow_replace & flow::NULL_STRIPPING != 0 && byte == 0 {
                continue;
            }
            if flow_replace & flow::AUTO_TRANSMIT != 0 {
                if byte == self.chars.xon_char {
                    tx_released |= self.tx_holding.xoff();
                    self.tx_holding.set_xoff(false);
                    continue;
                }
                if byte == self.chars.xoff_char {
                    self.tx_holding.set_xoff(true);
                    continue;
                }
            }
            self.count_xoff(actions);
            raised |= events::EV_RXCHAR;
            if byte == self.chars.event_char {
                raised |= events::EV_RXFLAG;
            }
            raised |= if self.escape_char != 0 && byte == self.escape_char {
                self.push_rx(&[self.escape_char, lsrmst::ESCAPE])
            } else {
                self.push_rx(&[byte])
            };
        }
        self.signal(raised, actions);
        if tx_released {
            self.start_writes(actions, now);
        }
        self.process_reads(actions, now);
        self.check_rx_flow(actions);
    }

    /// Holds the receiver once free space drops below the XOFF limit.
    fn check_rx_flow(&mut self, actions: &mut Actions) {
        let free = (self.queue_size as usize).saturating_sub(self.rx_buffer.len());
        if free >= self.handflow.xoff_limit.max(0) as usize {
            return;
        }
        let handflow = self.handflow;
        if handflow.control_handshake & handshake::DTR_MASK == handshake::DTR_HANDSHAKE
            && !self.rx_holding.dtr()
        {
            self.rx_holding.set_dtr(true);
            self.uart.set_dtr(false);
        }
        if handflow.flow_replace & flow::RTS_MASK == flow::RTS_HANDSHAKE && !self.rx_holding.rts()
        {
            self.rx_holding.set_rts(true);
            self.uart.set_rts(false);
        }
        if handflow.flow_replace & flow::AUTO_RECEIVE != 0 && !self.rx_holding.xoff() {
            self.rx_holding.set_xoff(true);
            actions.transmit(TxKind::Flow, vec![self.chars.xoff_char]);
        }
    }

    /// Releases receive holds once the buffer has drained to the XON limit.
    fn release_rx_flow(&mut self, actions: &mut Actions) {
        let held = self.rx_holding.dtr() || self.rx_holding.rts() || self.rx_holding.xoff();
        if !held || self.rx_buffer.len() > self.handflow.xon_limit.max(0) as usize {
            return;
        }
        if self.rx_holding.dtr() {
            self.rx_holding.set_dtr(false);
            self.uart.set_dtr(true);
        }
        if self.rx_holding.rts() {
            self.rx_holding.set_rts(false);
            self.uart.set_rts(true);
        }
        if self.rx_holding.xoff() {
            self.rx_holding.set_xoff(false);
            actions.transmit(TxKind::Flow, vec![self.chars.xon_char]);
        }
    }

    /// Recomputes the modem-line transmit holds, returning true if any hold
    /// was released.
    fn update_tx_holds(&mut self) -> bool {
        let msr = self.uart.effective_msr();
        let control = self.handflow.control_handshake;
        let before = self.tx_holding.into_bits();
        self.tx_holding
            .set_cts(control & handshake::CTS_HANDSHAKE != 0 && !msr.cts());
        self.tx_holding
            .set_dsr(control & handshake::DSR_HANDSHAKE != 0 && !msr.dsr());
        self.tx_holding
            .set_dcd(control & handshake::DCD_HANDSHAKE != 0 && !msr.dcd());
        self.rx_holding
            .set_dsr(control & handshake::DSR_SENSITIVITY != 0 && !msr.dsr());
        before & !self.tx_holding.into_bits() != 0
    }

    /// Applies `f` to the UART and raises the events for any resulting
    /// modem status change. Loopback makes output changes visible as input
    /// changes.
    pub fn update_modem(
        &mut self,
        actions: &mut Actions,
        now: Instant,
        f: impl FnOnce(&mut Uart),
    ) {
        let old = self.uart.effective_msr();
        f(&mut self.uart);
        let new = self.uart.effective_msr();
        self.modem_changed(old, new, actions, now);
    }

    pub fn set_modem_lines(&mut self, lines: ModemLines, actions: &mut Actions, now: Instant) {
        self.update_modem(actions, now, |uart| {
            uart.set_modem_lines(lines.cts, lines.dsr, lines.ri, lines.dcd)
        });
    }

    fn modem_changed(
        &mut self,
        old: ModemStatusRegister,
        new: ModemStatusRegister,
        actions: &mut Actions,
        now: Instant,
    ) {
        let mut raised = 0;
        if old.cts() != new.cts() {
            raised |= events::EV_CTS;
        }
        if old.dsr() != new.dsr() {
            raised |= events::EV_DSR;
        }
        if old.dcd() != new.dcd() {
            raised |= events::EV_RLSD;
        }
        if old.ri() && !new.ri() {
            raised |= events::EV_RING;
        }
        if raised == 0 {
            return;
        }
        if self.escape_char != 0 && self.open {
            raised |= self.push_rx(&[self.escape_char, lsrmst::MST, new.into()]);
        }
        let released = self.update_tx_holds();
        self.signal(raised, actions);
        if released {
            self.start_writes(actions, now);
        }
        self.process_reads(actions, now);
    }

    pub fn line_status(&mut self, lsr: LineStatusRegister, actions: &mut Actions, now: Instant) {
        let mut raised = 0;
        if lsr.overrun_error() {
            self.error_word |= errors::OVERRUN;
            self.stats.serial_overrun_error_count =
                self.stats.serial_overrun_error_count.wrapping_add(1);
            raised |= events::EV_ERR;
        }
        if lsr.parity_error() {
            self.error_word |= errors::PARITY;
            self.stats.parity_error_count = self.stats.parity_error_count.wrapping_add(1);
            raised |= events::EV_ERR;
        }
        if lsr.framing_error() {
            self.error_word |= errors::FRAMING;
            self.stats.frame_error_count = self.stats.frame_error_count.wrapping_add(1);
            raised |= events::EV_ERR;
        }
        if lsr.break_interrupt() {
            self.error_word |= errors::BREAK;
            raised |= events::EV_BREAK;
        }
        if raised == 0 {
            return;
        }
        if self.open {
            let flow_replace = self.handflow.flow_replace;
            if self.escape_char != 0 {
                raised |= self.push_rx(&[self.escape_char, lsrmst::LSR_NODATA, lsr.into()]);
            } else if lsr.break_interrupt() && flow_replace & flow::BREAK_CHAR != 0 {
                raised |= self.push_rx(&[self.chars.break_char]);
            } else if (lsr.parity_error() || lsr.framing_error())
                && flow_replace & flow::ERROR_CHAR != 0
            {
                raised |= self.push_rx(&[self.chars.error_char]);
            }
        }
        if self.error_abort_pending() {
            tracing::debug!(error_word = self.error_word, "aborting reads and writes on error");
            self.cancel_reads(NtStatus::CANCELLED, actions);
            self.cancel_writes(NtStatus::CANCELLED, actions);
        }
        self.signal(raised, actions);
        self.process_reads(actions, now);
    }

    pub fn poll_timers(&mut self, actions: &mut Actions, now: Instant) {
        if self.current_read.as_ref().is_some_and(|read| read.expired(now)) {
            if let Some(read) = self.current_read.take() {
                read.finish(NtStatus::TIMEOUT, actions);
            }
            self.process_reads(actions, now);
        }

        // A timed-out write keeps the transmitter until the transport is done.
        if let Some(write) = &mut self.current_write {
            if write.deadline.is_some_and(|d| d <= now) {
                write.deadline = None;
                if let Some(completer) = write.completer.take() {
                    actions.complete(completer, NtStatus::TIMEOUT);
                }
            }
        }

        for entry in std::mem::take(&mut self.write_queue) {
            match entry {
                WriteEntry::Write(write) if write.deadline.is_some_and(|d| d <= now) => {
                    let len = write.data.len().try_into().unwrap_or(u32::MAX);
                    self.pending_write_count = self.pending_write_count.saturating_sub(len);
                    actions.complete(write.completer, NtStatus::TIMEOUT);
                }
                entry => self.write_queue.push_back(entry),
            }
        }

        if self
            .xoff_counter
            .as_ref()
            .is_some_and(|counter| counter.deadline.is_some_and(|d| d <= now))
        {
            if let Some(counter) = self.xoff_counter.take() {
                actions.complete(counter.completer, NtStatus::SERIAL_COUNTER_TIMEOUT);
            }
            self.start_writes(actions, now);
        }
    }
}

/// Control-interface operations that reach into the line discipline.
impl PortState {
    /// Installs new handshake and flow settings, driving the modem outputs
    /// to match the new modes.
    pub fn set_handflow(&mut self, handflow: SerialHandflow, actions: &mut Actions, now: Instant) {
        let old = std::mem::replace(&mut self.handflow, handflow);

        let dtr_mode = handflow.control_handshake & handshake::DTR_MASK;
        if dtr_mode != old.control_handshake & handshake::DTR_MASK {
            if dtr_mode != handshake::DTR_HANDSHAKE {
                self.rx_holding.set_dtr(false);
            }
            let on = dtr_mode == handshake::DTR_CONTROL
                || (dtr_mode == handshake::DTR_HANDSHAKE && !self.rx_holding.dtr());
            self.update_modem(actions, now, |uart| uart.set_dtr(on));
        }

        let rts_mode = handflow.flow_replace & flow::RTS_MASK;
        if rts_mode != old.flow_replace & flow::RTS_MASK {
            if rts_mode != flow::RTS_HANDSHAKE {
                self.rx_holding.set_rts(false);
            }
            let on = rts_mode == flow::RTS_CONTROL
                || (rts_mode == flow::RTS_HANDSHAKE && !self.rx_holding.rts());
            self.update_modem(actions, now, |uart| uart.set_rts(on));
        }

        if handflow.flow_replace & flow::AUTO_RECEIVE == 0 && self.rx_holding.xoff() {
            self.rx_holding.set_xoff(false);
            actions.transmit(TxKind::Flow, vec![self.chars.xon_char]);
        }

        let mut released = self.update_tx_holds();
        if old.flow_replace & flow::AUTO_TRANSMIT != 0
            && handflow.flow_replace & flow::AUTO_TRANSMIT == 0
            && self.tx_holding.xoff()
        {
            self.tx_holding.set_xoff(false);
            released = true;
        }
        if released {
            self.start_writes(actions, now);
        }
        self.check_rx_flow(actions);
        self.release_rx_flow(actions);
    }

    /// Holds or releases the transmitter as if XOFF or XON was received.
    pub fn set_tx_xoff(&mut self, hold: bool, actions: &mut Actions, now: Instant) {
        self.tx_holding.set_xoff(hold);
        if !hold {
            self.start_writes(actions, now);
        }
    }

    pub fn set_break(&mut self, on: bool, actions: &mut Actions, now: Instant) {
        self.uart.set_break(on);
        self.tx_holding.set_on_break(on);
        if !on {
            self.start_writes(actions, now);
        }
    }

    pub fn reset_device(&mut self, actions: &mut Actions, now: Instant) {
        self.update_modem(actions, now, Uart::reset);
        self.tx_holding.set_on_break(false);
        self.update_tx_holds();
        self.start_writes(actions, now);
    }

    /// Reports the communication status and clears the error word.
    pub fn take_comm_status(&mut self) -> SerialStatus {
        let mut hold_reasons = 0;
        for (held, reason) in [
            (self.tx_holding.cts(), hold::TX_WAITING_FOR_CTS),
            (self.tx_holding.dsr(), hold::TX_WAITING_FOR_DSR),
            (self.tx_holding.dcd(), hold::TX_WAITING_FOR_DCD),
            (self.tx_holding.xoff(), hold::TX_WAITING_FOR_XON),
            (self.tx_holding.on_break(), hold::TX_WAITING_ON_BREAK),
            (self.rx_holding.xoff(), hold::TX_WAITING_XOFF_SENT),
            (self.rx_holding.dsr(), hold::RX_WAITING_FOR_DSR),
        ] {
            if held {
                hold_reasons |= reason;
            }
        }
        SerialStatus {
            errors: std::mem::take(&mut self.error_word),
            hold_reasons,
            amount_in_in_queue: self.rx_buffer.len().try_into().unwrap_or(u32::MAX),
            amount_in_out_queue: self.pending_write_count,
            eof_received: 0,
            wait_for_immediate: self.immediate.is_some().into(),
            reserved: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irp::PendingIo;
    use test_with_tracing::test;

    fn open_port() -> PortState {
        let mut state = PortState::new(100);
        state.open();
        state
    }

    fn op(state: &mut PortState, op: QueuedOp, now: Instant) -> (Actions, PendingIo) {
        let (completer, pending) = Completer::channel();
        let mut actions = Actions::default();
        state.enqueue(op, completer, &mut actions, now);
        (actions, pending)
    }

    fn run(actions: Actions) -> Vec<(TxKind, Vec<u8>)> {
        for (completer, status) in actions.completions {
            completer.complete(status);
        }
        actions.transmits
    }

    #[test]
    fn read_waits_for_data() {
        let now = Instant::now();
        let mut state = open_port();
        let (actions, mut pending) = op(&mut state, QueuedOp::Read { length: 3 }, now);
        run(actions);
        assert!(pending.try_status().is_none());

        let mut actions = Actions::default();
        state.receive(b"ab", &mut actions, now);
        run(actions);
        assert!(pending.try_status().is_none());

        let mut actions = Actions::default();
        state.receive(b"cd", &mut actions, now);
        run(actions);
        assert_eq!(pending.wait().bytes(), b"abc");
        assert_eq!(state.rx_buffer, [b'd']);
    }

    #[test]
    fn immediate_read_returns_what_is_buffered() {
        let now = Instant::now();
        let mut state = open_port();
        state.timeouts.read_interval_timeout = MAXULONG;
        let (actions, pending) = op(&mut state, QueuedOp::Read { length: 8 }, now);
        run(actions);
        let status = pending.wait();
        assert_eq!(status.status, NtStatus::SUCCESS);
        assert!(status.bytes().is_empty());
    }

    #[test]
    fn read_total_timeout_returns_partial_data() {
        let now = Instant::now();
        let mut state = open_port();
        state.timeouts.read_total_timeout_constant = 50;
        let (actions, pending) = op(&mut state, QueuedOp::Read { length: 4 }, now);
        run(actions);

        let mut actions = Actions::default();
        state.receive(b"x", &mut actions, now);
        state.poll_timers(&mut actions, now + Duration::from_millis(10));
        state.poll_timers(&mut actions, now + Duration::from_millis(50));
        run(actions);
        let status = pending.wait();
        assert_eq!(status.status, NtStatus::TIMEOUT);
        assert_eq!(status.bytes(), b"x");
    }

    #[test]
    fn interval_timeout_starts_after_first_byte() {
        let now = Instant::now();
        let mut state = open_port();
        state.timeouts.read_interval_timeout = 20;
        let (actions, mut pending) = op(&mut state, QueuedOp::Read { length: 4 }, now);
        run(actions);

        let mut actions = Actions::default();
        state.poll_timers(&mut actions, now + Duration::from_secs(5));
        run(actions);
        assert!(pending.try_status().is_none());

        let later = now + Duration::from_secs(5);
        let mut actions = Actions::default();
        state.receive(b"ok", &mut actions, later);
        state.poll_timers(&mut actions, later + Duration::from_millis(20));
        run(actions);
        let status = pending.wait();
        assert_eq!(status.status, NtStatus::TIMEOUT);
        assert_eq!(status.bytes(), b"ok");
    }

    #[test]
    fn resize_waits_behind_current_read() {
        let now = Instant::now();
        let mut state = open_port();
        let (actions, mut read) = op(&mut state, QueuedOp::Read { length: 1 }, now);
        run(actions);
        let (actions, mut resize) = op(
            &mut state,
            QueuedOp::Resize {
                size: 400,
                buffer: Vec::with_capacity(400),
            },
            now,
        );
        run(actions);
        assert!(resize.try_status().is_none());
        assert_eq!(state.queue_size, 100);

        let mut actions = Actions::default();
        state.receive(b"z", &mut actions, now);
        run(actions);
        assert_eq!(read.try_status().unwrap().bytes(), b"z");
        assert_eq!(resize.try_status().unwrap().status, NtStatus::SUCCESS);
        assert_eq!(state.queue_size, 400);
    }

    #[test]
    fn wait_mask_history_and_supersede() {
        let now = Instant::now();
        let mut state = open_port();
        let (actions, pending) = op(&mut state, QueuedOp::WaitOnMask, now);
        run(actions);
        assert_eq!(pending.wait().status, NtStatus::INVALID_PARAMETER);

        let (actions, _) = op(&mut state, QueuedOp::SetWaitMask(events::EV_RXCHAR), now);
        run(actions);
        let mut actions = Actions::default();
        state.receive(b"q", &mut actions, now);
        run(actions);
        let (actions, pending) = op(&mut state, QueuedOp::WaitOnMask, now);
        run(actions);
        assert_eq!(pending.wait().bytes(), events::EV_RXCHAR.to_le_bytes());

        let (actions, mut wait) = op(&mut state, QueuedOp::WaitOnMask, now);
        run(actions);
        assert!(wait.try_status().is_none());
        let (actions, mut second) = op(&mut state, QueuedOp::WaitOnMask, now);
        run(actions);
        assert_eq!(
            second.try_status().unwrap().status,
            NtStatus::INVALID_PARAMETER
        );
    }

    #[test]
    fn close_finishes_pending_wait() {
        let now = Instant::now();
        let mut state = open_port();
        let (actions, _) = op(&mut state, QueuedOp::SetWaitMask(events::EV_RXCHAR), now);
        run(actions);
        let (actions, mut wait) = op(&mut state, QueuedOp::WaitOnMask, now);
        run(actions);
        assert!(wait.try_status().is_none());

        let mut actions = Actions::default();
        state.close(&mut actions);
        run(actions);
        assert_eq!(wait.wait().bytes(), 0u32.to_le_bytes());
        assert_eq!(state.wait_mask, 0);
        assert!(!state.uart.mcr().dtr());
    }

    #[test]
    fn in_flight_write_times_out() {
        let now = Instant::now();
        let mut state = open_port();
        state.timeouts.write_total_timeout_constant = 100;
        let (actions, mut write) = op(&mut state, QueuedOp::Write { data: b"slow".to_vec() }, now);
        assert_eq!(run(actions), [(TxKind::Write, b"slow".to_vec())]);

        let mut actions = Actions::default();
        state.poll_timers(&mut actions, now + Duration::from_millis(99));
        run(actions);
        assert!(write.try_status().is_none());

        let mut actions = Actions::default();
        state.poll_timers(&mut actions, now + Duration::from_millis(100));
        run(actions);
        assert_eq!(write.wait().status, NtStatus::TIMEOUT);
        assert_eq!(state.pending_write_count, 4);

        // The late transmit completion only releases the transmitter.
        let mut actions = Actions::default();
        state.transmit_done(TxKind::Write, &NtStatus::SUCCESS.into(), &mut actions, now);
        assert!(actions.completions.is_empty());
        assert!(state.current_write.is_none());
        assert_eq!(state.pending_write_count, 0);
    }

    #[test]
    fn total_timeouts_saturate() {
        assert_eq!(total_timeout(2, 10, 5), 25);
        assert_eq!(total_timeout(MAXULONG, usize::MAX, MAXULONG), u64::MAX);

        let now = Instant::now();
        let mut state = open_port();
        state.timeouts.write_total_timeout_multiplier = MAXULONG;
        let (actions, mut write) = op(&mut state, QueuedOp::Write { data: vec![0; 64] }, now);
        run(actions);
        let mut actions = Actions::default();
        state.poll_timers(&mut actions, now + Duration::from_secs(86_400));
        run(actions);
        assert!(write.try_status().is_none());
    }

    #[test]
    fn auto_transmit_holds_writes_on_xoff() {
        let now = Instant::now();
        let mut state = open_port();
        state.handflow.flow_replace |= flow::AUTO_TRANSMIT;
        let mut actions = Actions::default();
        state.receive(&[0x13], &mut actions, now);
        run(actions);
        assert!(state.tx_holding.xoff());
        assert!(state.rx_buffer.is_empty());

        let (actions, mut write) = op(&mut state, QueuedOp::Write { data: b"hi".to_vec() }, now);
        assert!(run(actions).is_empty());
        assert!(write.try_status().is_none());

        let mut actions = Actions::default();
        state.receive(&[0x11], &mut actions, now);
        let transmits = run(actions);
        assert_eq!(transmits, [(TxKind::Write, b"hi".to_vec())]);
    }

    #[test]
    fn auto_receive_sends_xoff_then_xon() {
        let now = Instant::now();
        let mut state = open_port();
        state.handflow.flow_replace |= flow::AUTO_RECEIVE;
        state.handflow.xoff_limit = 10;
        state.handflow.xon_limit = 5;

        let mut actions = Actions::default();
        state.receive(&[b'a'; 91], &mut actions, now);
        assert_eq!(run(actions), [(TxKind::Flow, vec![0x13])]);
        assert!(state.rx_holding.xoff());

        let (actions, _read) = op(&mut state, QueuedOp::Read { length: 90 }, now);
        assert_eq!(run(actions), [(TxKind::Flow, vec![0x11])]);
        assert!(!state.rx_holding.xoff());
    }

    #[test]
    fn escape_char_inserts_modem_status() {
        let now = Instant::now();
        let mut state = open_port();
        state.escape_char = 0xff;
        let mut actions = Actions::default();
        state.set_modem_lines(
            ModemLines {
                cts: true,
                ..Default::default()
            },
            &mut actions,
            now,
        );
        state.receive(&[0xff], &mut actions, now);
        run(actions);
        let msr = ModemStatusRegister::new().with_cts(true).with_delta_cts(true);
        assert_eq!(
            state.rx_buffer,
            [0xff, lsrmst::MST, u8::from(msr), 0xff, lsrmst::ESCAPE]
        );
    }

    #[test]
    fn queue_overrun_sets_error() {
        let now = Instant::now();
        let mut state = open_port();
        let mut actions = Actions::default();
        state.receive(&[1; 101], &mut actions, now);
        run(actions);
        assert_eq!(state.rx_buffer.len(), 100);
        assert_eq!(state.error_word, errors::QUEUEOVERRUN);
        assert_eq!(state.stats.buffer_overrun_error_count, 1);
    }

    #[test]
    fn xoff_counter_completes_on_count() {
        let now = Instant::now();
        let mut state = open_port();
        let counter = SerialXoffCounter {
            timeout: 0,
            counter: 2,
            xoff_char: 0x13,
            reserved: [0; 3],
        };
        let (actions, mut pending) = op(&mut state, QueuedOp::XoffCounter(counter), now);
        assert_eq!(run(actions), [(TxKind::Flow, vec![0x13])]);
        let mut actions = Actions::default();
        state.receive(b"a", &mut actions, now);
        run(actions);
        assert!(pending.try_status().is_none());
        let mut actions = Actions::default();
        state.receive(b"b", &mut actions, now);
        run(actions);
        assert_eq!(pending.wait().status, NtStatus::SUCCESS);
    }

    #[test]
    fn xoff_counter_ends_on_write_or_timeout() {
        let now = Instant::now();
        let mut state = open_port();
        let counter = SerialXoffCounter {
            timeout: 100,
            counter: 5,
            xoff_char: 0x13,
            reserved: [0; 3],
        };
        let (actions, pending) = op(&mut state, QueuedOp::XoffCounter(counter), now);
        run(actions);
        let (actions, _write) = op(&mut state, QueuedOp::Write { data: vec![1] }, now);
        run(actions);
        assert_eq!(pending.wait().status, NtStatus::SERIAL_MORE_WRITES);

        let mut state = open_port();
        let (actions, pending) = op(&mut state, QueuedOp::XoffCounter(counter), now);
        run(actions);
        let mut actions = Actions::default();
        state.poll_timers(&mut actions, now + Duration::from_millis(100));
        run(actions);
        assert_eq!(pending.wait().status, NtStatus::SERIAL_COUNTER_TIMEOUT);
    }

    #[test]
    fn error_abort_cancels_and_rejects() {
        let now = Instant::now();
        let mut state = open_port();
        state.handflow.control_handshake |= handshake::ERROR_ABORT;
        let (actions, read) = op(&mut state, QueuedOp::Read { length: 1 }, now);
        run(actions);
        let mut actions = Actions::default();
        state.line_status(
            LineStatusRegister::new().with_framing_error(true),
            &mut actions,
            now,
        );
        run(actions);
        assert_eq!(read.wait().status, NtStatus::CANCELLED);
        let (actions, write) = op(&mut state, QueuedOp::Write { data: vec![1] }, now);
        run(actions);
        assert_eq!(write.wait().status, NtStatus::CANCELLED);
    }
}
