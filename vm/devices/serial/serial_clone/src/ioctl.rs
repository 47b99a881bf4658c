// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The serial control interface of a clone port.
//!
//! Requests are routed through a static table that records, per control
//! code, the minimum input and output buffer sizes and whether the handler
//! mutates device state (and so must hold the lifecycle guard). Handlers
//! validate before mutating: a rejected request leaves the port untouched.

use crate::device::Device;
use crate::irp::Completer;
use crate::irp::IoControl;
use crate::irp::IoStatus;
use crate::port::QueuedOp;
use crate::port::SerialPort;
use crate::remove_lock::DeletePending;
use crate::uart::decode_line_control;
use crate::uart::encode_line_control;
use serial_ioctl::commprop;
use serial_ioctl::events;
use serial_ioctl::flow;
use serial_ioctl::handshake;
use serial_ioctl::modem;
use serial_ioctl::purge;
use serial_ioctl::IoctlCode;
use serial_ioctl::NtStatus;
use serial_ioctl::SerialBaudRate;
use serial_ioctl::SerialChars;
use serial_ioctl::SerialCommProp;
use serial_ioctl::SerialHandflow;
use serial_ioctl::SerialLineControl;
use serial_ioctl::SerialPerfStats;
use serial_ioctl::SerialQueueSize;
use serial_ioctl::SerialStatus;
use serial_ioctl::SerialTimeouts;
use serial_ioctl::SerialXoffCounter;
use serial_ioctl::MAXULONG;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Errors returned by control requests.
#[derive(Debug, Error)]
pub enum IoctlError {
    /// An input or output buffer is smaller than the request needs.
    #[error("buffer too small: {required} bytes required, {actual} provided")]
    BufferTooSmall {
        /// The minimum size.
        required: usize,
        /// The size provided.
        actual: usize,
    },
    /// A parameter value was rejected.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    /// The device is being removed.
    #[error(transparent)]
    DeletePending(#[from] DeletePending),
    /// A receive buffer allocation failed or exceeded the quota.
    #[error("cannot allocate a {0} byte receive buffer")]
    InsufficientResources(u32),
    /// The control code is not part of the serial interface.
    #[error("unrecognized control code {0:?}")]
    Unrecognized(IoctlCode),
    /// A line error is pending and the port aborts requests on error.
    #[error("request aborted by a pending line error")]
    ErrorAbort,
}

impl IoctlError {
    /// The completion status reported for the error.
    pub fn status(&self) -> NtStatus {
        match self {
            IoctlError::BufferTooSmall { .. } => NtStatus::BUFFER_TOO_SMALL,
            IoctlError::InvalidParameter(_) | IoctlError::Unrecognized(_) => {
                NtStatus::INVALID_PARAMETER
            }
            IoctlError::DeletePending(_) => NtStatus::DELETE_PENDING,
            IoctlError::InsufficientResources(_) => NtStatus::INSUFFICIENT_RESOURCES,
            IoctlError::ErrorAbort => NtStatus::CANCELLED,
        }
    }
}

/// What a handler decided to do with a request.
#[derive(Debug)]
pub(crate) enum Disposition {
    /// Complete now with the given output bytes.
    Complete(Vec<u8>),
    /// Complete later through a port queue.
    Queue(QueuedOp),
}

type Handler = fn(&Arc<SerialPort>, &IoControl) -> Result<Disposition, IoctlError>;

struct IoctlEntry {
    code: IoctlCode,
    input: usize,
    output: usize,
    guarded: bool,
    handler: Handler,
}

const fn entry(
    code: IoctlCode,
    input: usize,
    output: usize,
    guarded: bool,
    handler: Handler,
) -> IoctlEntry {
    IoctlEntry {
        code,
        input,
        output,
        guarded,
        handler,
    }
}

const U32: usize = size_of::<u32>();

static IOCTLS: &[IoctlEntry] = &[
    entry(IoctlCode::SET_BAUD_RATE, size_of::<SerialBaudRate>(), 0, true, set_baud_rate),
    entry(IoctlCode::GET_BAUD_RATE, 0, size_of::<SerialBaudRate>(), true, get_baud_rate),
    entry(IoctlCode::SET_LINE_CONTROL, size_of::<SerialLineControl>(), 0, true, set_line_control),
    entry(IoctlCode::GET_LINE_CONTROL, 0, size_of::<SerialLineControl>(), false, get_line_control),
    entry(IoctlCode::SET_TIMEOUTS, size_of::<SerialTimeouts>(), 0, true, set_timeouts),
    entry(IoctlCode::GET_TIMEOUTS, 0, size_of::<SerialTimeouts>(), false, get_timeouts),
    entry(IoctlCode::SET_CHARS, size_of::<SerialChars>(), 0, true, set_chars),
    entry(IoctlCode::GET_CHARS, 0, size_of::<SerialChars>(), false, get_chars),
    entry(IoctlCode::SET_DTR, 0, 0, true, set_dtr),
    entry(IoctlCode::CLR_DTR, 0, 0, true, clr_dtr),
    entry(IoctlCode::SET_RTS, 0, 0, true, set_rts),
    entry(IoctlCode::CLR_RTS, 0, 0, true, clr_rts),
    entry(IoctlCode::GET_MODEM_CONTROL, 0, U32, true, get_modem_control),
    entry(IoctlCode::SET_MODEM_CONTROL, U32, 0, true, set_modem_control),
    entry(IoctlCode::SET_FIFO_CONTROL, U32, 0, true, set_fifo_control),
    entry(IoctlCode::RESET_DEVICE, 0, 0, true, reset_device),
    entry(IoctlCode::SET_XOFF, 0, 0, true, set_xoff),
    entry(IoctlCode::SET_XON, 0, 0, true, set_xon),
    entry(IoctlCode::SET_BREAK_ON, 0, 0, true, set_break_on),
    entry(IoctlCode::SET_BREAK_OFF, 0, 0, true, set_break_off),
    entry(IoctlCode::SET_QUEUE_SIZE, size_of::<SerialQueueSize>(), 0, true, set_queue_size),
    entry(IoctlCode::GET_WAIT_MASK, 0, U32, false, get_wait_mask),
    entry(IoctlCode::SET_WAIT_MASK, U32, 0, true, set_wait_mask),
    entry(IoctlCode::WAIT_ON_MASK, 0, U32, false, wait_on_mask),
    entry(IoctlCode::PURGE, U32, 0, true, purge_queues),
    entry(IoctlCode::IMMEDIATE_CHAR, 1, 0, true, immediate_char),
    entry(IoctlCode::GET_HANDFLOW, 0, size_of::<SerialHandflow>(), false, get_handflow),
    entry(IoctlCode::SET_HANDFLOW, size_of::<SerialHandflow>(), 0, true, set_handflow),
    entry(IoctlCode::GET_MODEMSTATUS, 0, U32, true, get_modem_status),
    entry(IoctlCode::GET_DTRRTS, 0, U32, true, get_dtr_rts),
    entry(IoctlCode::GET_COMMSTATUS, 0, size_of::<SerialStatus>(), false, get_comm_status),
    entry(IoctlCode::GET_PROPERTIES, 0, size_of::<SerialCommProp>(), false, get_properties),
    entry(IoctlCode::XOFF_COUNTER, size_of::<SerialXoffCounter>(), 0, true, xoff_counter),
    entry(IoctlCode::LSRMST_INSERT, 1, 0, true, lsrmst_insert),
    entry(IoctlCode::CONFIG_SIZE, 0, U32, false, config_size),
    entry(IoctlCode::GET_STATS, 0, size_of::<SerialPerfStats>(), false, get_stats),
    entry(IoctlCode::CLEAR_STATS, 0, 0, true, clear_stats),
];

/// Handles a device control request on a clone port. Completes `completer`
/// exactly once, now or through a port queue.
pub(crate) fn dispatch(
    device: &Device,
    port: &Arc<SerialPort>,
    ioctl: IoControl,
    completer: Completer,
) {
    match handle(device, port, &ioctl) {
        Ok(Disposition::Complete(output)) if output.is_empty() => {
            completer.complete(NtStatus::SUCCESS)
        }
        Ok(Disposition::Complete(output)) => completer.complete(IoStatus::output(output)),
        Ok(Disposition::Queue(op)) => port.enqueue(op, completer),
        Err(err) => {
            tracing::debug!(
                device = %device.debug_name(),
                code = ?ioctl.code,
                error = &err as &dyn std::error::Error,
                "ioctl failed"
            );
            completer.complete(err.status());
        }
    }
}

fn handle(
    device: &Device,
    port: &Arc<SerialPort>,
    ioctl: &IoControl,
) -> Result<Disposition, IoctlError> {
    let entry = IOCTLS
        .iter()
        .find(|entry| entry.code == ioctl.code)
        .ok_or(IoctlError::Unrecognized(ioctl.code))?;
    check_size(entry.input, ioctl.input.len())?;
    check_size(entry.output, ioctl.output_len)?;
    if entry.code != IoctlCode::GET_COMMSTATUS
        && port.locked(|state, _| state.error_abort_pending())
    {
        return Err(IoctlError::ErrorAbort);
    }
    let _guard = if entry.guarded {
        Some(device.remove_lock().acquire()?)
    } else {
        None
    };
    tracing::debug!(device = %device.debug_name(), code = ?ioctl.code, "ioctl");
    (entry.handler)(port, ioctl)
}

fn check_size(required: usize, actual: usize) -> Result<(), IoctlError> {
    if actual < required {
        return Err(IoctlError::BufferTooSmall { required, actual });
    }
    Ok(())
}

fn input<T: FromBytes + KnownLayout + Immutable>(ioctl: &IoControl) -> Result<T, IoctlError> {
    T::read_from_prefix(&ioctl.input)
        .map(|(value, _)| value)
        .map_err(|_| IoctlError::BufferTooSmall {
            required: size_of::<T>(),
            actual: ioctl.input.len(),
        })
}

fn input_byte(ioctl: &IoControl) -> Result<u8, IoctlError> {
    ioctl
        .input
        .first()
        .copied()
        .ok_or(IoctlError::BufferTooSmall {
            required: 1,
            actual: 0,
        })
}

fn output<T: IntoBytes + Immutable>(value: &T) -> Result<Disposition, IoctlError> {
    Ok(Disposition::Complete(value.as_bytes().to_vec()))
}

fn done() -> Result<Disposition, IoctlError> {
    Ok(Disposition::Complete(Vec::new()))
}

fn set_baud_rate(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let SerialBaudRate { baud_rate } = input(ioctl)?;
    port.locked(|state, _| state.baud_rate = baud_rate);
    done()
}

fn get_baud_rate(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    let baud_rate = port.locked(|state, _| state.baud_rate);
    output(&SerialBaudRate { baud_rate })
}

fn set_line_control(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let line: SerialLineControl = input(ioctl)?;
    let (lcr, data_mask) = encode_line_control(&line).map_err(IoctlError::InvalidParameter)?;
    port.locked(|state, _| {
        let lcr = lcr.with_break_on(state.uart.lcr().break_on());
        state.uart.write_lcr(lcr);
        state.data_mask = data_mask;
    });
    done()
}

fn get_line_control(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    let line = port.locked(|state, _| decode_line_control(state.uart.lcr()));
    output(&line)
}

fn set_timeouts(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let timeouts: SerialTimeouts = input(ioctl)?;
    if timeouts.read_interval_timeout == MAXULONG
        && timeouts.read_total_timeout_multiplier == MAXULONG
        && timeouts.read_total_timeout_constant == MAXULONG
    {
        return Err(IoctlError::InvalidParameter(
            "read interval, multiplier and constant cannot all be MAXULONG",
        ));
    }
    port.locked(|state, _| state.timeouts = timeouts);
    done()
}

fn get_timeouts(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.timeouts))
}

fn set_chars(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let chars: SerialChars = input(ioctl)?;
    port.locked(|state, _| {
        let escape = state.escape_char;
        if escape != 0 && (escape == chars.xon_char || escape == chars.xoff_char) {
            return Err(IoctlError::InvalidParameter(
                "XON and XOFF must differ from the escape character",
            ));
        }
        state.chars = chars;
        Ok(())
    })?;
    done()
}

fn get_chars(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.chars))
}

fn drive_dtr(port: &Arc<SerialPort>, on: bool) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| {
        if state.handflow.control_handshake & handshake::DTR_MASK == handshake::DTR_HANDSHAKE {
            return Err(IoctlError::InvalidParameter("DTR is under handshake control"));
        }
        state.update_modem(actions, Instant::now(), |uart| uart.set_dtr(on));
        Ok(())
    })?;
    done()
}

fn set_dtr(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    drive_dtr(port, true)
}

fn clr_dtr(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    drive_dtr(port, false)
}

fn drive_rts(port: &Arc<SerialPort>, on: bool) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| {
        let mode = state.handflow.flow_replace & flow::RTS_MASK;
        if mode == flow::RTS_HANDSHAKE || mode == flow::TRANSMIT_TOGGLE {
            return Err(IoctlError::InvalidParameter("RTS is under automatic control"));
        }
        state.update_modem(actions, Instant::now(), |uart| uart.set_rts(on));
        Ok(())
    })?;
    done()
}

fn set_rts(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    drive_rts(port, true)
}

fn clr_rts(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    drive_rts(port, false)
}

fn get_modem_control(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    let mcr = port.locked(|state, _| u8::from(state.uart.mcr()));
    output(&u32::from(mcr))
}

fn set_modem_control(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    // Only the low byte is a register value; the rest is not checked.
    let value: u32 = input(ioctl)?;
    port.locked(|state, actions| {
        state.update_modem(actions, Instant::now(), |uart| uart.write_mcr(value as u8))
    });
    done()
}

fn set_fifo_control(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let value: u32 = input(ioctl)?;
    port.locked(|state, _| state.uart.write_fcr(value as u8));
    done()
}

fn reset_device(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| state.reset_device(actions, Instant::now()));
    done()
}

fn set_xoff(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| state.set_tx_xoff(true, actions, Instant::now()));
    done()
}

fn set_xon(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| state.set_tx_xoff(false, actions, Instant::now()));
    done()
}

fn set_break_on(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| state.set_break(true, actions, Instant::now()));
    done()
}

fn set_break_off(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, actions| state.set_break(false, actions, Instant::now()));
    done()
}

fn set_queue_size(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let SerialQueueSize { in_size, .. } = input(ioctl)?;
    if in_size <= port.rx_queue_size() {
        return done();
    }
    if in_size > port.max_queue_size() {
        return Err(IoctlError::InsufficientResources(in_size));
    }
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(in_size as usize)
        .map_err(|_| IoctlError::InsufficientResources(in_size))?;
    Ok(Disposition::Queue(QueuedOp::Resize {
        size: in_size,
        buffer,
    }))
}

fn get_wait_mask(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.wait_mask))
}

fn set_wait_mask(_: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let mask: u32 = input(ioctl)?;
    if mask & !events::EV_ALL != 0 {
        return Err(IoctlError::InvalidParameter("unknown wait mask bits"));
    }
    Ok(Disposition::Queue(QueuedOp::SetWaitMask(mask)))
}

fn wait_on_mask(_: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    Ok(Disposition::Queue(QueuedOp::WaitOnMask))
}

fn purge_queues(_: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let mask: u32 = input(ioctl)?;
    if mask == 0 || mask & !purge::ALL != 0 {
        return Err(IoctlError::InvalidParameter("invalid purge mask"));
    }
    Ok(Disposition::Queue(QueuedOp::Purge(mask)))
}

fn immediate_char(_: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    Ok(Disposition::Queue(QueuedOp::ImmediateChar(input_byte(ioctl)?)))
}

fn get_handflow(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.handflow))
}

fn set_handflow(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let handflow: SerialHandflow = input(ioctl)?;
    if handflow.control_handshake & handshake::CONTROL_INVALID != 0 {
        return Err(IoctlError::InvalidParameter("invalid control handshake bits"));
    }
    if handflow.flow_replace & flow::FLOW_INVALID != 0 {
        return Err(IoctlError::InvalidParameter("invalid flow replace bits"));
    }
    if handflow.control_handshake & handshake::DTR_MASK == handshake::DTR_MASK {
        return Err(IoctlError::InvalidParameter("invalid DTR mode"));
    }
    port.locked(|state, actions| {
        for limit in [handflow.xon_limit, handflow.xoff_limit] {
            if u32::try_from(limit).map_or(true, |limit| limit > state.queue_size) {
                return Err(IoctlError::InvalidParameter(
                    "flow limit outside the receive buffer",
                ));
            }
        }
        if state.escape_char != 0 && handflow.flow_replace & flow::ERROR_CHAR != 0 {
            return Err(IoctlError::InvalidParameter(
                "error character replacement conflicts with the escape character",
            ));
        }
        state.set_handflow(handflow, actions, Instant::now());
        Ok(())
    })?;
    done()
}

fn get_modem_status(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    let msr = port.locked(|state, _| state.uart.read_msr());
    output(&u32::from(msr))
}

fn get_dtr_rts(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    let mcr = port.locked(|state, _| u32::from(u8::from(state.uart.mcr())));
    output(&(mcr & (modem::DTR_STATE | modem::RTS_STATE)))
}

fn get_comm_status(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.take_comm_status()))
}

fn get_properties(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    use commprop::*;

    let properties = SerialCommProp {
        packet_length: size_of::<SerialCommProp>() as u16,
        packet_version: 2,
        service_mask: SP_SERIALCOMM,
        max_baud: BAUD_USER,
        prov_sub_type: SP_RS232,
        prov_capabilities: PCF_DTRDSR
            | PCF_RTSCTS
            | PCF_CD
            | PCF_PARITY_CHECK
            | PCF_XONXOFF
            | PCF_SETXCHAR
            | PCF_TOTALTIMEOUTS
            | PCF_INTTIMEOUTS,
        settable_params: SP_PARITY
            | SP_BAUD
            | SP_DATABITS
            | SP_STOPBITS
            | SP_HANDSHAKING
            | SP_PARITY_CHECK
            | SP_CARRIER_DETECT,
        settable_baud: BAUD_USER
            | BAUD_075
            | BAUD_110
            | BAUD_134_5
            | BAUD_150
            | BAUD_300
            | BAUD_600
            | BAUD_1200
            | BAUD_1800
            | BAUD_2400
            | BAUD_4800
            | BAUD_7200
            | BAUD_9600
            | BAUD_14400
            | BAUD_19200
            | BAUD_38400
            | BAUD_56K
            | BAUD_57600
            | BAUD_115200
            | BAUD_128K,
        settable_data: DATABITS_5 | DATABITS_6 | DATABITS_7 | DATABITS_8,
        settable_stop_parity: STOPBITS_10
            | STOPBITS_15
            | STOPBITS_20
            | PARITY_NONE
            | PARITY_ODD
            | PARITY_EVEN
            | PARITY_MARK
            | PARITY_SPACE,
        current_rx_queue: port.rx_queue_size(),
        ..Default::default()
    };
    output(&properties)
}

fn xoff_counter(_: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let counter: SerialXoffCounter = input(ioctl)?;
    if counter.counter <= 0 {
        return Err(IoctlError::InvalidParameter("XOFF counter must be positive"));
    }
    Ok(Disposition::Queue(QueuedOp::XoffCounter(counter)))
}

fn lsrmst_insert(port: &Arc<SerialPort>, ioctl: &IoControl) -> Result<Disposition, IoctlError> {
    let escape = input_byte(ioctl)?;
    port.locked(|state, _| {
        if escape != 0
            && (escape == state.chars.xon_char
                || escape == state.chars.xoff_char
                || state.handflow.flow_replace & flow::ERROR_CHAR != 0)
        {
            return Err(IoctlError::InvalidParameter(
                "escape character conflicts with flow control settings",
            ));
        }
        state.escape_char = escape;
        Ok(())
    })?;
    done()
}

fn config_size(_: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&0u32)
}

fn get_stats(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    output(&port.locked(|state, _| state.stats))
}

fn clear_stats(port: &Arc<SerialPort>, _: &IoControl) -> Result<Disposition, IoctlError> {
    port.locked(|state, _| state.stats = SerialPerfStats::default());
    done()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_unique_codes() {
        for (i, a) in IOCTLS.iter().enumerate() {
            assert!(
                IOCTLS[i + 1..].iter().all(|b| b.code != a.code),
                "{:?} listed twice",
                a.code
            );
        }
    }

    #[test]
    fn table_covers_control_interface() {
        assert_eq!(IOCTLS.len(), 37);
        for entry in IOCTLS {
            let name = format!("{:?}", entry.code);
            assert!(!name.starts_with(|c: char| c.is_ascii_digit()), "{name}");
        }
    }

    #[test]
    fn error_statuses() {
        assert_eq!(
            IoctlError::BufferTooSmall {
                required: 4,
                actual: 0
            }
            .status(),
            NtStatus::BUFFER_TOO_SMALL
        );
        assert_eq!(
            IoctlError::Unrecognized(IoctlCode(0)).status(),
            NtStatus::INVALID_PARAMETER
        );
        assert_eq!(
            IoctlError::DeletePending(DeletePending).status(),
            NtStatus::DELETE_PENDING
        );
    }
}
