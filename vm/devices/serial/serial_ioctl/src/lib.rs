// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire definitions for the serial port control interface: device I/O
//! control codes, completion status codes, and the fixed-layout structures
//! exchanged through request buffers.
//!
//! All structures are little-endian `#[repr(C)]` layouts matching the
//! classic serial port driver interface, so they can be read from and
//! written to raw request buffers with `zerocopy`.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use open_enum::open_enum;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

open_enum! {
    /// A request completion status.
    ///
    /// Values follow the NTSTATUS encoding: the top two bits carry the
    /// severity, and any value with the top bit clear counts as success.
    #[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub enum NtStatus: u32 {
        /// The request succeeded.
        SUCCESS = 0,
        /// The request will complete later.
        PENDING = 0x0000_0103,
        /// A read did not receive all requested bytes before its deadline.
        TIMEOUT = 0x0000_0102,
        /// An XOFF counter was superseded by a later write.
        SERIAL_MORE_WRITES = 0x4001_0005,
        /// An XOFF counter ran out of time before the count was reached.
        SERIAL_COUNTER_TIMEOUT = 0x4001_0006,
        /// Generic failure.
        UNSUCCESSFUL = 0xC000_0001,
        /// A parameter value was rejected.
        INVALID_PARAMETER = 0xC000_000D,
        /// The target device does not exist or has the wrong role.
        NO_SUCH_DEVICE = 0xC000_000E,
        /// The request is not valid for the target device.
        INVALID_DEVICE_REQUEST = 0xC000_0010,
        /// The device is already opened by another caller.
        ACCESS_DENIED = 0xC000_0022,
        /// A request buffer is smaller than the operation needs.
        BUFFER_TOO_SMALL = 0xC000_0023,
        /// The device is being torn down.
        DELETE_PENDING = 0xC000_0056,
        /// An allocation could not be satisfied.
        INSUFFICIENT_RESOURCES = 0xC000_009A,
        /// The request kind is not supported by the device.
        NOT_SUPPORTED = 0xC000_00BB,
        /// The request was cancelled before it could be satisfied.
        CANCELLED = 0xC000_0120,
    }
}

impl NtStatus {
    /// Returns true for success and informational values.
    pub fn is_success(&self) -> bool {
        (self.0 as i32) >= 0
    }
}

/// `FILE_DEVICE_SERIAL_PORT`.
pub const FILE_DEVICE_SERIAL_PORT: u32 = 0x1b;

/// Builds a buffered, any-access control code for the serial device type.
pub const fn serial_ctl_code(function: u32) -> u32 {
    (FILE_DEVICE_SERIAL_PORT << 16) | (function << 2)
}

open_enum! {
    /// A device I/O control code.
    #[derive(IntoBytes, FromBytes, Immutable, KnownLayout)]
    pub enum IoctlCode: u32 {
        /// Input: [`SerialBaudRate`].
        SET_BAUD_RATE = serial_ctl_code(1),
        /// Input: [`SerialQueueSize`].
        SET_QUEUE_SIZE = serial_ctl_code(2),
        /// Input: [`SerialLineControl`].
        SET_LINE_CONTROL = serial_ctl_code(3),
        #[allow(missing_docs)]
        SET_BREAK_ON = serial_ctl_code(4),
        #[allow(missing_docs)]
        SET_BREAK_OFF = serial_ctl_code(5),
        /// Input: one byte.
        IMMEDIATE_CHAR = serial_ctl_code(6),
        /// Input: [`SerialTimeouts`].
        SET_TIMEOUTS = serial_ctl_code(7),
        /// Output: [`SerialTimeouts`].
        GET_TIMEOUTS = serial_ctl_code(8),
        #[allow(missing_docs)]
        SET_DTR = serial_ctl_code(9),
        #[allow(missing_docs)]
        CLR_DTR = serial_ctl_code(10),
        #[allow(missing_docs)]
        RESET_DEVICE = serial_ctl_code(11),
        #[allow(missing_docs)]
        SET_RTS = serial_ctl_code(12),
        #[allow(missing_docs)]
        CLR_RTS = serial_ctl_code(13),
        /// Emulates reception of an XOFF character.
        SET_XOFF = serial_ctl_code(14),
        /// Emulates reception of an XON character.
        SET_XON = serial_ctl_code(15),
        /// Output: `u32` wait mask.
        GET_WAIT_MASK = serial_ctl_code(16),
        /// Input: `u32` wait mask.
        SET_WAIT_MASK = serial_ctl_code(17),
        /// Output: `u32` event mask, completed when an event fires.
        WAIT_ON_MASK = serial_ctl_code(18),
        /// Input: `u32` purge mask.
        PURGE = serial_ctl_code(19),
        /// Output: [`SerialBaudRate`].
        GET_BAUD_RATE = serial_ctl_code(20),
        /// Output: [`SerialLineControl`].
        GET_LINE_CONTROL = serial_ctl_code(21),
        /// Output: [`SerialChars`].
        GET_CHARS = serial_ctl_code(22),
        /// Input: [`SerialChars`].
        SET_CHARS = serial_ctl_code(23),
        /// Output: [`SerialHandflow`].
        GET_HANDFLOW = serial_ctl_code(24),
        /// Input: [`SerialHandflow`].
        SET_HANDFLOW = serial_ctl_code(25),
        /// Output: `u32` modem status register.
        GET_MODEMSTATUS = serial_ctl_code(26),
        /// Output: [`SerialStatus`].
        GET_COMMSTATUS = serial_ctl_code(27),
        /// Input: [`SerialXoffCounter`].
        XOFF_COUNTER = serial_ctl_code(28),
        /// Output: [`SerialCommProp`].
        GET_PROPERTIES = serial_ctl_code(29),
        /// Output: `u32` with [`modem::DTR_STATE`] and [`modem::RTS_STATE`].
        GET_DTRRTS = serial_ctl_code(30),
        /// Input: one byte escape character.
        LSRMST_INSERT = serial_ctl_code(31),
        /// Output: `u32` configuration size.
        CONFIG_SIZE = serial_ctl_code(32),
        /// Output: [`SerialPerfStats`].
        GET_STATS = serial_ctl_code(35),
        #[allow(missing_docs)]
        CLEAR_STATS = serial_ctl_code(36),
        /// Output: `u32` modem control register.
        GET_MODEM_CONTROL = serial_ctl_code(37),
        /// Input: `u32` modem control register.
        SET_MODEM_CONTROL = serial_ctl_code(38),
        /// Input: `u32` FIFO control register.
        SET_FIFO_CONTROL = serial_ctl_code(39),
    }
}

/// `SERIAL_BAUD_RATE`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialBaudRate {
    pub baud_rate: u32,
}

/// `SERIAL_LINE_CONTROL`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct SerialLineControl {
    /// One of the [`stop_bits`] values.
    pub stop_bits: u8,
    /// One of the [`parity`] values.
    pub parity: u8,
    /// Data bits per character, 5 through 8.
    pub word_length: u8,
}

/// `SERIAL_TIMEOUTS`, all values in milliseconds.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialTimeouts {
    pub read_interval_timeout: u32,
    pub read_total_timeout_multiplier: u32,
    pub read_total_timeout_constant: u32,
    pub write_total_timeout_multiplier: u32,
    pub write_total_timeout_constant: u32,
}

/// Timeout value meaning "no limit" or, for the read fields, part of the
/// return-immediately convention.
pub const MAXULONG: u32 = u32::MAX;

/// `SERIAL_CHARS`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialChars {
    pub eof_char: u8,
    pub error_char: u8,
    pub break_char: u8,
    pub event_char: u8,
    pub xon_char: u8,
    pub xoff_char: u8,
}

/// `SERIAL_HANDFLOW`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialHandflow {
    /// Bits from [`handshake`].
    pub control_handshake: u32,
    /// Bits from [`flow`].
    pub flow_replace: u32,
    pub xon_limit: i32,
    pub xoff_limit: i32,
}

/// `SERIAL_QUEUE_SIZE`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialQueueSize {
    pub in_size: u32,
    pub out_size: u32,
}

/// `SERIAL_STATUS`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialStatus {
    /// Bits from [`errors`].
    pub errors: u32,
    /// Bits from [`hold`].
    pub hold_reasons: u32,
    pub amount_in_in_queue: u32,
    pub amount_in_out_queue: u32,
    pub eof_received: u8,
    pub wait_for_immediate: u8,
    pub reserved: [u8; 2],
}

/// `SERIAL_XOFF_COUNTER`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialXoffCounter {
    pub timeout: u32,
    pub counter: i32,
    pub xoff_char: u8,
    pub reserved: [u8; 3],
}

/// `SERIAL_COMMPROP`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialCommProp {
    pub packet_length: u16,
    pub packet_version: u16,
    pub service_mask: u32,
    pub reserved1: u32,
    pub max_tx_queue: u32,
    pub max_rx_queue: u32,
    pub max_baud: u32,
    pub prov_sub_type: u32,
    pub prov_capabilities: u32,
    pub settable_params: u32,
    pub settable_baud: u32,
    pub settable_data: u16,
    pub settable_stop_parity: u16,
    pub current_tx_queue: u32,
    pub current_rx_queue: u32,
    pub prov_spec1: u32,
    pub prov_spec2: u32,
    pub prov_char: [u16; 1],
    pub reserved2: u16,
}

/// `SERIALPERF_STATS`
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[allow(missing_docs)]
pub struct SerialPerfStats {
    pub received_count: u32,
    pub transmitted_count: u32,
    pub frame_error_count: u32,
    pub serial_overrun_error_count: u32,
    pub buffer_overrun_error_count: u32,
    pub parity_error_count: u32,
}

const_assert_eq!(size_of::<SerialBaudRate>(), 4);
const_assert_eq!(size_of::<SerialLineControl>(), 3);
const_assert_eq!(size_of::<SerialTimeouts>(), 20);
const_assert_eq!(size_of::<SerialChars>(), 6);
const_assert_eq!(size_of::<SerialHandflow>(), 16);
const_assert_eq!(size_of::<SerialQueueSize>(), 8);
const_assert_eq!(size_of::<SerialStatus>(), 20);
const_assert_eq!(size_of::<SerialXoffCounter>(), 12);
const_assert_eq!(size_of::<SerialCommProp>(), 64);
const_assert_eq!(size_of::<SerialPerfStats>(), 24);

/// [`SerialLineControl::parity`] values.
pub mod parity {
    #![allow(missing_docs)]
    pub const NO_PARITY: u8 = 0;
    pub const ODD_PARITY: u8 = 1;
    pub const EVEN_PARITY: u8 = 2;
    pub const MARK_PARITY: u8 = 3;
    pub const SPACE_PARITY: u8 = 4;
}

/// [`SerialLineControl::stop_bits`] values.
pub mod stop_bits {
    #![allow(missing_docs)]
    pub const STOP_BIT_1: u8 = 0;
    pub const STOP_BITS_1_5: u8 = 1;
    pub const STOP_BITS_2: u8 = 2;
}

/// Wait mask events.
pub mod events {
    #![allow(missing_docs)]
    pub const EV_RXCHAR: u32 = 0x0001;
    pub const EV_RXFLAG: u32 = 0x0002;
    pub const EV_TXEMPTY: u32 = 0x0004;
    pub const EV_CTS: u32 = 0x0008;
    pub const EV_DSR: u32 = 0x0010;
    pub const EV_RLSD: u32 = 0x0020;
    pub const EV_BREAK: u32 = 0x0040;
    pub const EV_ERR: u32 = 0x0080;
    pub const EV_RING: u32 = 0x0100;
    pub const EV_PERR: u32 = 0x0200;
    pub const EV_RX80FULL: u32 = 0x0400;
    pub const EV_EVENT1: u32 = 0x0800;
    pub const EV_EVENT2: u32 = 0x1000;

    /// Every event a wait mask may name.
    pub const EV_ALL: u32 = EV_RXCHAR
        | EV_RXFLAG
        | EV_TXEMPTY
        | EV_CTS
        | EV_DSR
        | EV_RLSD
        | EV_BREAK
        | EV_ERR
        | EV_RING
        | EV_PERR
        | EV_RX80FULL
        | EV_EVENT1
        | EV_EVENT2;
}

/// Purge mask flags.
pub mod purge {
    #![allow(missing_docs)]
    pub const TXABORT: u32 = 0x0001;
    pub const RXABORT: u32 = 0x0002;
    pub const TXCLEAR: u32 = 0x0004;
    pub const RXCLEAR: u32 = 0x0008;

    /// Every flag a purge mask may name.
    pub const ALL: u32 = TXABORT | RXABORT | TXCLEAR | RXCLEAR;
}

/// [`SerialHandflow::control_handshake`] bits.
pub mod handshake {
    #![allow(missing_docs)]
    pub const DTR_MASK: u32 = 0x03;
    pub const DTR_CONTROL: u32 = 0x01;
    pub const DTR_HANDSHAKE: u32 = 0x02;
    pub const CTS_HANDSHAKE: u32 = 0x08;
    pub const DSR_HANDSHAKE: u32 = 0x10;
    pub const DCD_HANDSHAKE: u32 = 0x20;
    pub const OUT_HANDSHAKEMASK: u32 = 0x38;
    pub const DSR_SENSITIVITY: u32 = 0x40;
    pub const ERROR_ABORT: u32 = 0x8000_0000;
    /// Bits that must never be set.
    pub const CONTROL_INVALID: u32 = 0x7fff_ff84;
}

/// [`SerialHandflow::flow_replace`] bits.
pub mod flow {
    #![allow(missing_docs)]
    pub const AUTO_TRANSMIT: u32 = 0x01;
    pub const AUTO_RECEIVE: u32 = 0x02;
    pub const ERROR_CHAR: u32 = 0x04;
    pub const NULL_STRIPPING: u32 = 0x08;
    pub const BREAK_CHAR: u32 = 0x10;
    pub const RTS_MASK: u32 = 0xc0;
    pub const RTS_CONTROL: u32 = 0x40;
    pub const RTS_HANDSHAKE: u32 = 0x80;
    pub const TRANSMIT_TOGGLE: u32 = 0xc0;
    pub const XOFF_CONTINUE: u32 = 0x8000_0000;
    /// Bits that must never be set.
    pub const FLOW_INVALID: u32 = 0x7fff_ff20;
}

/// [`SerialStatus::errors`] bits.
pub mod errors {
    #![allow(missing_docs)]
    pub const BREAK: u32 = 0x01;
    pub const FRAMING: u32 = 0x02;
    pub const OVERRUN: u32 = 0x04;
    pub const QUEUEOVERRUN: u32 = 0x08;
    pub const PARITY: u32 = 0x10;
}

/// [`SerialStatus::hold_reasons`] bits.
pub mod hold {
    #![allow(missing_docs)]
    pub const TX_WAITING_FOR_CTS: u32 = 0x01;
    pub const TX_WAITING_FOR_DSR: u32 = 0x02;
    pub const TX_WAITING_FOR_DCD: u32 = 0x04;
    pub const TX_WAITING_FOR_XON: u32 = 0x08;
    pub const TX_WAITING_XOFF_SENT: u32 = 0x10;
    pub const TX_WAITING_ON_BREAK: u32 = 0x20;
    pub const RX_WAITING_FOR_DSR: u32 = 0x40;
}

/// Modem line state bits reported by `GET_DTRRTS` and `GET_MODEMSTATUS`.
pub mod modem {
    #![allow(missing_docs)]
    pub const DTR_STATE: u32 = 0x01;
    pub const RTS_STATE: u32 = 0x02;
    pub const CTS_STATE: u32 = 0x10;
    pub const DSR_STATE: u32 = 0x20;
    pub const RI_STATE: u32 = 0x40;
    pub const DCD_STATE: u32 = 0x80;
}

/// Escape sequences inserted into the receive stream when an escape
/// character is configured with `LSRMST_INSERT`.
pub mod lsrmst {
    #![allow(missing_docs)]
    /// The escape character itself was received.
    pub const ESCAPE: u8 = 0x00;
    /// Followed by the line status byte and the data byte.
    pub const LSR_DATA: u8 = 0x01;
    /// Followed by the line status byte.
    pub const LSR_NODATA: u8 = 0x02;
    /// Followed by the modem status byte.
    pub const MST: u8 = 0x03;
}

/// [`SerialCommProp`] field values.
pub mod commprop {
    #![allow(missing_docs)]
    pub const SP_SERIALCOMM: u32 = 0x0000_0001;
    pub const SP_RS232: u32 = 0x0000_0001;

    pub const BAUD_075: u32 = 0x0000_0001;
    pub const BAUD_110: u32 = 0x0000_0002;
    pub const BAUD_134_5: u32 = 0x0000_0004;
    pub const BAUD_150: u32 = 0x0000_0008;
    pub const BAUD_300: u32 = 0x0000_0010;
    pub const BAUD_600: u32 = 0x0000_0020;
    pub const BAUD_1200: u32 = 0x0000_0040;
    pub const BAUD_1800: u32 = 0x0000_0080;
    pub const BAUD_2400: u32 = 0x0000_0100;
    pub const BAUD_4800: u32 = 0x0000_0200;
    pub const BAUD_7200: u32 = 0x0000_0400;
    pub const BAUD_9600: u32 = 0x0000_0800;
    pub const BAUD_14400: u32 = 0x0000_1000;
    pub const BAUD_19200: u32 = 0x0000_2000;
    pub const BAUD_38400: u32 = 0x0000_4000;
    pub const BAUD_56K: u32 = 0x0000_8000;
    pub const BAUD_128K: u32 = 0x0001_0000;
    pub const BAUD_115200: u32 = 0x0002_0000;
    pub const BAUD_57600: u32 = 0x0004_0000;
    pub const BAUD_USER: u32 = 0x1000_0000;

    pub const PCF_DTRDSR: u32 = 0x0001;
    pub const PCF_RTSCTS: u32 = 0x0002;
    pub const PCF_CD: u32 = 0x0004;
    pub const PCF_PARITY_CHECK: u32 = 0x0008;
    pub const PCF_XONXOFF: u32 = 0x0010;
    pub const PCF_SETXCHAR: u32 = 0x0020;
    pub const PCF_TOTALTIMEOUTS: u32 = 0x0040;
    pub const PCF_INTTIMEOUTS: u32 = 0x0080;
    pub const PCF_SPECIALCHARS: u32 = 0x0100;
    pub const PCF_16BITMODE: u32 = 0x0200;

    pub const SP_PARITY: u32 = 0x0001;
    pub const SP_BAUD: u32 = 0x0002;
    pub const SP_DATABITS: u32 = 0x0004;
    pub const SP_STOPBITS: u32 = 0x0008;
    pub const SP_HANDSHAKING: u32 = 0x0010;
    pub const SP_PARITY_CHECK: u32 = 0x0020;
    pub const SP_CARRIER_DETECT: u32 = 0x0040;

    pub const DATABITS_5: u16 = 0x0001;
    pub const DATABITS_6: u16 = 0x0002;
    pub const DATABITS_7: u16 = 0x0004;
    pub const DATABITS_8: u16 = 0x0008;

    pub const STOPBITS_10: u16 = 0x0001;
    pub const STOPBITS_15: u16 = 0x0002;
    pub const STOPBITS_20: u16 = 0x0004;
    pub const PARITY_NONE: u16 = 0x0100;
    pub const PARITY_ODD: u16 = 0x0200;
    pub const PARITY_EVEN: u16 = 0x0400;
    pub const PARITY_MARK: u16 = 0x0800;
    pub const PARITY_SPACE: u16 = 0x1000;
}
