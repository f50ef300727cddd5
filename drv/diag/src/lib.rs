// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Diagnostics context.
//!
//! On enable the engine spends one tick checking its own arithmetic, then
//! listens for commands. A command is a strobe event with an opcode in the low
//! byte of `aux[0]`:
//!
//! | Opcode | Command | Effect |
//! |--------|---------|--------|
//! | `0x01` | PEEK    | reads bank `bank_select` at address `aux[1]` |
//! | `0x02` | SCAN    | CRCs all of bank `bank_select`, one word per tick |
//! | `0xFA` | INJECT  | faults on purpose |
//!
//! Anything else is a fault, and so is a PEEK or SCAN that names a bank or
//! address that doesn't exist. Faults hold until the context is disabled.

use drv_buffer_banks::BufferBanks;
use drv_ctrl_regs_api::Sample;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ringbuf::{ringbuf_entry, Ringbuf};
use status_band::{Context, StatusRecord, MAX_STATE};

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DiagState {
    SelfTest = 0,
    Listening = 1,
    Scanning = 2,
    Fault = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum Opcode {
    Peek = 0x01,
    Scan = 0x02,
    Inject = 0xfa,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiagFault {
    SelfTestFailed,
    /// Opcode was not recognized, or its arguments were out of range.
    UnknownCommand(u8),
    Injected,
}

impl From<DiagFault> for u8 {
    fn from(f: DiagFault) -> Self {
        match f {
            DiagFault::SelfTestFailed => 0xff,
            DiagFault::UnknownCommand(op) => op,
            DiagFault::Injected => Opcode::Inject as u8,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    SelfTest,
    Listening { last: u8 },
    Scanning { bank: usize, addr: usize, crc: u16 },
    Fault(DiagFault),
}

impl Phase {
    fn state(&self) -> DiagState {
        match self {
            Phase::SelfTest => DiagState::SelfTest,
            Phase::Listening { .. } => DiagState::Listening,
            Phase::Scanning { .. } => DiagState::Scanning,
            Phase::Fault(_) => DiagState::Fault,
        }
    }
}

/// Where the data output is driven from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Output {
    Nothing,
    ReadPort,
    Word(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    Reset,
    SelfTest { passed: bool },
    Command(u8),
    Peek { bank: u8, addr: u32 },
    ScanDone { bank: u8, crc: u16 },
    Faulted(DiagFault),
    StrobeIgnored(DiagState),
}

/// Runs the known-answer checks for the CRC engine and status encoder.
pub fn self_test() -> bool {
    let crc_ok = word_crc::checksum(&[0x3132_3334, 0x3536_3738]) == 0xa12b;

    let probe = StatusRecord::saturating(Context::Diagnostics, MAX_STATE, 0xff);
    let encoder_ok = matches!(
        status_band::decode(probe.encode_fault()),
        Ok(d) if d.record == probe && d.fault
    );

    crc_ok && encoder_ok
}

pub struct Diag {
    phase: Phase,
    output: Output,
    check: fn() -> bool,
    trace: Ringbuf<Trace, 16>,
}

impl Default for Diag {
    fn default() -> Self {
        Self::new()
    }
}

impl Diag {
    pub fn new() -> Self {
        Self::with_self_test(self_test)
    }

    /// Builds an engine with a substitute self test, for exercising the
    /// failure path.
    pub fn with_self_test(check: fn() -> bool) -> Self {
        Self {
            phase: Phase::SelfTest,
            output: Output::Nothing,
            check,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> DiagState {
        self.phase.state()
    }

    pub fn fault(&self) -> Option<DiagFault> {
        match self.phase {
            Phase::Fault(f) => Some(f),
            _ => None,
        }
    }

    /// Back to SelfTest, with the data output cleared.
    pub fn reset(&mut self) {
        if self.phase != Phase::SelfTest {
            ringbuf_entry!(self.trace, Trace::Reset);
        }
        self.phase = Phase::SelfTest;
        self.output = Output::Nothing;
    }

    pub fn status(&self, capacity: usize) -> StatusRecord {
        let status = match self.phase {
            Phase::SelfTest => 0,
            Phase::Listening { last } => last,
            Phase::Scanning { addr, .. } => (addr * 255 / capacity) as u8,
            Phase::Fault(f) => u8::from(f),
        };
        StatusRecord::saturating(
            Context::Diagnostics,
            self.state() as u8,
            status,
        )
    }

    /// The data output: the last PEEK result as seen on the read port, or the
    /// last SCAN checksum.
    pub fn data(&self, banks: &BufferBanks) -> u32 {
        match self.output {
            Output::Nothing => 0,
            Output::ReadPort => banks.read_data(),
            Output::Word(w) => w,
        }
    }

    pub fn tick(&mut self, input: &Sample, banks: &mut BufferBanks) {
        let next = match self.phase {
            Phase::SelfTest => {
                let passed = (self.check)();
                ringbuf_entry!(self.trace, Trace::SelfTest { passed });
                if passed {
                    Phase::Listening { last: 0 }
                } else {
                    Phase::Fault(DiagFault::SelfTestFailed)
                }
            }
            Phase::Listening { last } => {
                if input.strobe {
                    self.command(input, banks)
                } else {
                    Phase::Listening { last }
                }
            }
            Phase::Scanning { bank, addr, crc } => {
                if input.strobe {
                    ringbuf_entry!(
                        self.trace,
                        Trace::StrobeIgnored(DiagState::Scanning)
                    );
                }
                self.scan(bank, addr, crc, banks)
            }
            Phase::Fault(f) => {
                if input.strobe {
                    ringbuf_entry!(
                        self.trace,
                        Trace::StrobeIgnored(DiagState::Fault)
                    );
                }
                Phase::Fault(f)
            }
        };

        if let Phase::Fault(f) = next {
            if self.fault().is_none() {
                ringbuf_entry!(self.trace, Trace::Faulted(f));
            }
        }
        self.phase = next;
    }

    fn command(&mut self, input: &Sample, banks: &mut BufferBanks) -> Phase {
        let op = input.aux.word(0) as u8;
        let bank = input.cmd.bank_select();
        ringbuf_entry!(self.trace, Trace::Command(op));

        match Opcode::from_u8(op) {
            Some(Opcode::Peek) => {
                let addr = input.aux.word(1);
                ringbuf_entry!(self.trace, Trace::Peek { bank, addr });
                match banks.request_read(usize::from(bank), addr as usize) {
                    Ok(()) => {
                        self.output = Output::ReadPort;
                        Phase::Listening { last: op }
                    }
                    Err(_) => Phase::Fault(DiagFault::UnknownCommand(op)),
                }
            }
            Some(Opcode::Scan) => {
                if banks.reader().bank(usize::from(bank)).is_err() {
                    return Phase::Fault(DiagFault::UnknownCommand(op));
                }
                Phase::Scanning {
                    bank: usize::from(bank),
                    addr: 0,
                    crc: word_crc::INITIAL,
                }
            }
            Some(Opcode::Inject) => Phase::Fault(DiagFault::Injected),
            None => Phase::Fault(DiagFault::UnknownCommand(op)),
        }
    }

    fn scan(
        &mut self,
        bank: usize,
        addr: usize,
        crc: u16,
        banks: &BufferBanks,
    ) -> Phase {
        let reader = banks.reader();
        let Ok(word) = reader.word(bank, addr) else {
            let op = Opcode::Scan as u8;
            return Phase::Fault(DiagFault::UnknownCommand(op));
        };
        let crc = word_crc::update(crc, word);
        let addr = addr + 1;
        if addr < reader.capacity() {
            return Phase::Scanning { bank, addr, crc };
        }

        ringbuf_entry!(
            self.trace,
            Trace::ScanDone {
                bank: bank as u8,
                crc
            }
        );
        self.output = Output::Word(u32::from(crc));
        Phase::Listening {
            last: Opcode::Scan as u8,
        }
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 16> {
        &self.trace
    }
}
