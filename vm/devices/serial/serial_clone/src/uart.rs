// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Register-level view of the UART behind a clone port.
//!
//! Only the registers whose values are observable through the control
//! interface are modelled. Register layouts follow the 16550.

#![allow(missing_docs)]

use bitfield_struct::bitfield;
use serial_ioctl::parity;
use serial_ioctl::stop_bits;
use serial_ioctl::SerialLineControl;

/// FIFO configuration as last written through the control interface.
#[bitfield(u8)]
pub struct FifoControlRegister {
    pub enable: bool,
    /// Self-clearing.
    pub clear_rx: bool,
    /// Self-clearing.
    pub clear_tx: bool,
    #[bits(5)]
    _trigger: u8,
}

/// Framing of the line. The break bit is driven by the break requests and
/// is kept across line control updates.
#[bitfield(u8)]
pub struct LineControlRegister {
    /// Data bits minus five.
    #[bits(2)]
    pub word_length: u8,
    /// 1.5 stop bits for 5-bit words, 2 otherwise.
    pub long_stop: bool,
    #[bits(3)]
    pub parity: u8,
    pub break_on: bool,
    _divisor_latch: bool,
}

/// Modem outputs.
#[bitfield(u8)]
pub struct ModemControlRegister {
    pub dtr: bool,
    pub rts: bool,
    pub out1: bool,
    pub out2: bool,
    pub loopback: bool,
    #[bits(3)]
    _reserved: u8,
}

/// Line status reported by the attached device.
///
/// Only the error and break bits drive the receive path. The value is
/// inserted into the data stream unchanged when an escape character is set.
#[bitfield(u8)]
pub struct LineStatusRegister {
    _data_ready: bool,
    pub overrun_error: bool,
    pub parity_error: bool,
    pub framing_error: bool,
    pub break_interrupt: bool,
    #[bits(3)]
    _transmitter: u8,
}

/// Modem inputs, with the change bits latched until the next read.
#[bitfield(u8)]
pub struct ModemStatusRegister {
    pub delta_cts: bool,
    pub delta_dsr: bool,
    /// Ring indicator went from on to off.
    pub ri_trailing_edge: bool,
    pub delta_dcd: bool,
    pub cts: bool,
    pub dsr: bool,
    pub ri: bool,
    pub dcd: bool,
}

// Parity field encodings: enable, even select, stick.
const LCR_PARITY_NONE: u8 = 0b000;
const LCR_PARITY_ODD: u8 = 0b001;
const LCR_PARITY_EVEN: u8 = 0b011;
const LCR_PARITY_MARK: u8 = 0b101;
const LCR_PARITY_SPACE: u8 = 0b111;

/// Encodes a line control request into register form, returning the
/// register (with the break bit clear) and the receive data mask.
pub(crate) fn encode_line_control(
    line: &SerialLineControl,
) -> Result<(LineControlRegister, u8), &'static str> {
    let (word, mask) = match line.word_length {
        5 => (0, 0x1f),
        6 => (1, 0x3f),
        7 => (2, 0x7f),
        8 => (3, 0xff),
        _ => return Err("word length must be 5 through 8"),
    };
    let parity = match line.parity {
        parity::NO_PARITY => LCR_PARITY_NONE,
        parity::ODD_PARITY => LCR_PARITY_ODD,
        parity::EVEN_PARITY => LCR_PARITY_EVEN,
        parity::MARK_PARITY => LCR_PARITY_MARK,
        parity::SPACE_PARITY => LCR_PARITY_SPACE,
        _ => return Err("unknown parity"),
    };
    let long_stop = match line.stop_bits {
        stop_bits::STOP_BIT_1 => false,
        stop_bits::STOP_BITS_1_5 if line.word_length == 5 => true,
        stop_bits::STOP_BITS_1_5 => return Err("1.5 stop bits require 5 data bits"),
        stop_bits::STOP_BITS_2 => true,
        _ => return Err("unknown stop bits"),
    };
    let lcr = LineControlRegister::new()
        .with_word_length(word)
        .with_long_stop(long_stop)
        .with_parity(parity);
    Ok((lcr, mask))
}

/// Decodes the line control register.
pub(crate) fn decode_line_control(lcr: LineControlRegister) -> SerialLineControl {
    let word_length = lcr.word_length() + 5;
    let stop_bits = match (lcr.long_stop(), word_length) {
        (false, _) => stop_bits::STOP_BIT_1,
        (_, 5) => stop_bits::STOP_BITS_1_5,
        _ => stop_bits::STOP_BITS_2,
    };
    let parity = match lcr.parity() {
        LCR_PARITY_ODD => parity::ODD_PARITY,
        LCR_PARITY_EVEN => parity::EVEN_PARITY,
        LCR_PARITY_MARK => parity::MARK_PARITY,
        LCR_PARITY_SPACE => parity::SPACE_PARITY,
        _ => parity::NO_PARITY,
    };
    SerialLineControl {
        stop_bits,
        parity,
        word_length,
    }
}

/// The emulated register file.
#[derive(Debug)]
pub(crate) struct Uart {
    lcr: LineControlRegister,
    mcr: ModemControlRegister,
    msr: ModemStatusRegister,
    fcr: FifoControlRegister,
}

impl Uart {
    /// 8 data bits, no parity, one stop bit, all modem outputs low.
    pub fn new() -> Self {
        Self {
            lcr: LineControlRegister::new().with_word_length(3),
            mcr: ModemControlRegister::new(),
            msr: ModemStatusRegister::new(),
            fcr: FifoControlRegister::new(),
        }
    }

    pub fn lcr(&self) -> LineControlRegister {
        self.lcr
    }

    pub fn write_lcr(&mut self, lcr: LineControlRegister) {
        tracing::debug!(?lcr, "lcr update");
        self.lcr = lcr;
    }

    pub fn set_break(&mut self, enabled: bool) {
        self.lcr.set_break_on(enabled);
    }

    pub fn mcr(&self) -> ModemControlRegister {
        self.mcr
    }

    pub fn write_mcr(&mut self, data: u8) {
        let mcr = ModemControlRegister::from_bits(data & 0x1f);
        tracing::debug!(?mcr, "mcr update");
        // Toggling loopback swaps the inputs for the outputs.
        self.update_msr(|this| this.mcr = mcr);
    }

    pub fn set_dtr(&mut self, dtr: bool) {
        self.update_msr(|this| this.mcr.set_dtr(dtr));
    }

    pub fn set_rts(&mut self, rts: bool) {
        self.update_msr(|this| this.mcr.set_rts(rts));
    }

    pub fn write_fcr(&mut self, data: u8) {
        let fcr = FifoControlRegister::from_bits(data);
        tracing::debug!(old = ?self.fcr, new = ?fcr, "fcr update");
        self.fcr = if fcr.enable() {
            fcr.with_clear_rx(false).with_clear_tx(false)
        } else {
            FifoControlRegister::new()
        };
    }

    /// Updates the modem input lines as seen from the line side.
    pub fn set_modem_lines(&mut self, cts: bool, dsr: bool, ri: bool, dcd: bool) {
        self.update_msr(|this| {
            this.msr = this
                .msr
                .with_cts(cts)
                .with_dsr(dsr)
                .with_ri(ri)
                .with_dcd(dcd);
        });
    }

    /// Reads the MSR, clearing the change bits.
    pub fn read_msr(&mut self) -> u8 {
        let msr = self.effective_msr();
        self.msr = self
            .msr
            .with_delta_cts(false)
            .with_delta_dsr(false)
            .with_ri_trailing_edge(false)
            .with_delta_dcd(false);
        msr.into()
    }

    /// The inputs as the port sees them: in loopback, the outputs.
    pub fn effective_msr(&self) -> ModemStatusRegister {
        if self.mcr.loopback() {
            self.msr
                .with_cts(self.mcr.dtr())
                .with_dsr(self.mcr.rts())
                .with_ri(self.mcr.out1())
                .with_dcd(self.mcr.out2())
        } else {
            self.msr
        }
    }

    /// Runs `f` and latches the change bits for every input it moved.
    fn update_msr(&mut self, f: impl FnOnce(&mut Self)) {
        let old = self.effective_msr();
        f(self);
        let new = self.effective_msr();
        self.msr = self
            .msr
            .with_delta_cts(self.msr.delta_cts() || old.cts() != new.cts())
            .with_delta_dsr(self.msr.delta_dsr() || old.dsr() != new.dsr())
            .with_ri_trailing_edge(self.msr.ri_trailing_edge() || (old.ri() && !new.ri()))
            .with_delta_dcd(self.msr.delta_dcd() || old.dcd() != new.dcd());
    }

    /// Resets the modem outputs and FIFO configuration. Line settings and
    /// modem inputs are preserved.
    pub fn reset(&mut self) {
        self.update_msr(|this| this.mcr = ModemControlRegister::new());
        self.fcr = FifoControlRegister::new();
        self.lcr.set_break_on(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_control_round_trip() {
        for word_length in 5..=8 {
            for parity in 0..=4 {
                for stop in [stop_bits::STOP_BIT_1, stop_bits::STOP_BITS_2] {
                    let line = SerialLineControl {
                        stop_bits: stop,
                        parity,
                        word_length,
                    };
                    let (lcr, _) = encode_line_control(&line).unwrap();
                    let expected_stop = if word_length == 5 && stop == stop_bits::STOP_BITS_2 {
                        stop_bits::STOP_BITS_1_5
                    } else {
                        stop
                    };
                    assert_eq!(
                        decode_line_control(lcr),
                        SerialLineControl {
                            stop_bits: expected_stop,
                            ..line
                        }
                    );
                }
            }
        }
    }

    #[test]
    fn line_control_rejects() {
        let bad = [
            SerialLineControl {
                stop_bits: 0,
                parity: 0,
                word_length: 4,
            },
            SerialLineControl {
                stop_bits: 0,
                parity: 5,
                word_length: 8,
            },
            SerialLineControl {
                stop_bits: stop_bits::STOP_BITS_1_5,
                parity: 0,
                word_length: 8,
            },
            SerialLineControl {
                stop_bits: 3,
                parity: 0,
                word_length: 8,
            },
        ];
        for line in bad {
            assert!(encode_line_control(&line).is_err(), "{line:?}");
        }
    }

    #[test]
    fn data_mask_follows_word_length() {
        let line = SerialLineControl {
            stop_bits: 0,
            parity: 0,
            word_length: 7,
        };
        assert_eq!(encode_line_control(&line).unwrap().1, 0x7f);
    }

    #[test]
    fn loopback_reflects_outputs_and_tracks_changes() {
        let mut uart = Uart::new();
        uart.write_mcr(ModemControlRegister::new().with_loopback(true).with_dtr(true).into());
        let msr = ModemStatusRegister::from(uart.read_msr());
        assert!(msr.cts());
        assert!(msr.delta_cts());
        let msr = ModemStatusRegister::from(uart.read_msr());
        assert!(msr.cts());
        assert!(!msr.delta_cts());
    }

    #[test]
    fn reset_clears_outputs_and_fifo() {
        let mut uart = Uart::new();
        uart.write_fcr(0x07);
        assert!(uart.fcr.enable());
        assert!(!uart.fcr.clear_rx());
        uart.set_dtr(true);
        uart.set_break(true);
        uart.reset();
        assert_eq!(u8::from(uart.fcr), 0);
        assert!(!uart.mcr().dtr());
        assert!(!uart.lcr().break_on());
        assert_eq!(uart.lcr().word_length(), 3);
    }
}
