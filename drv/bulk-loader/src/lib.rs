// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blind-handshake bulk loader.
//!
//! Provisions the buffer banks before the application takes over. The client
//! has no acknowledgment path: it writes the auxiliary registers, drops the
//! strobe, and moves on. Whether the load worked is only known at the end,
//! when each channel's running CRC is compared against the value the client
//! promised at Setup.
//!
//! The protocol, one strobe event at a time:
//!
//! 1. **Setup.** `channel_count` comes from the command word; `aux[c]` holds
//!    the expected checksum of channel `c`. Running checksums start at
//!    [`word_crc::INITIAL`]. A Setup strobe while the banks are still being
//!    zeroed is a fault, since the client has no way to see the sweep.
//! 2. **Transfer.** Each event writes `aux[i]` into bank `i` at the current
//!    offset (all banks at once), folds the word into the running checksum of
//!    every active channel, and advances the offset. Filling the bank moves on
//!    to Validate.
//! 3. **Validate.** Resolves on the first tick in the state, no strobe needed:
//!    Complete if every active channel matches, Fault otherwise.
//!
//! There is no retry and no timeout. A client that stops strobing mid-transfer
//! leaves the engine parked in Transfer until it is disabled; bounding that is
//! the client's job.

use drv_buffer_banks::{BankError, BufferBanks, Geometry};
use drv_ctrl_regs_api::{AuxRegs, Sample, AUX_REGS};
use num_derive::FromPrimitive;
use ringbuf::{ringbuf_entry, Ringbuf};
use status_band::{Context, StatusRecord};

/// Loader state ordinals, as rendered on the status channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum LoaderState {
    Setup = 0,
    Transfer = 1,
    Validate = 2,
    Complete = 3,
    Fault = 4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoaderFault {
    /// End-of-transfer CRC disagreed; bit `c` is set for each bad channel.
    ChecksumMismatch { mismatched: u8 },
    /// Setup asked for zero channels, or more channels than banks.
    BadChannelCount(u8),
    /// The bank manager refused a write.
    WriteRejected(BankError),
    /// A Setup strobe arrived while the zero sweep was still clearing the
    /// banks. The client can't see the sweep, so the session is refused
    /// loudly rather than dropped.
    SetupDuringSweep,
}

impl From<LoaderFault> for u8 {
    fn from(f: LoaderFault) -> Self {
        match f {
            LoaderFault::ChecksumMismatch { mismatched } => {
                0x10 | (mismatched & 0x0f)
            }
            LoaderFault::BadChannelCount(n) => 0x20 | (n & 0x0f),
            LoaderFault::WriteRejected(_) => 0x30,
            LoaderFault::SetupDuringSweep => 0x40,
        }
    }
}

/// Per-session state, alive from a Setup strobe until Complete or Fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Session {
    channel_count: u8,
    expected: [u16; AUX_REGS],
    running: [u16; AUX_REGS],
    word_offset: usize,
}

impl Session {
    fn open(channel_count: u8, aux: &AuxRegs) -> Self {
        let mut expected = [0; AUX_REGS];
        for (c, e) in expected
            .iter_mut()
            .enumerate()
            .take(usize::from(channel_count))
        {
            // Only the low half of the register carries the checksum.
            *e = aux.word(c) as u16;
        }
        Self {
            channel_count,
            expected,
            running: [word_crc::INITIAL; AUX_REGS],
            word_offset: 0,
        }
    }

    fn channels(&self) -> core::ops::Range<usize> {
        0..usize::from(self.channel_count)
    }

    fn mismatched(&self) -> u8 {
        self.channels()
            .filter(|&c| self.running[c] != self.expected[c])
            .fold(0, |mask, c| mask | (1 << c))
    }

    pub fn channel_count(&self) -> u8 {
        self.channel_count
    }

    pub fn expected(&self, channel: usize) -> Option<u16> {
        self.channels().contains(&channel).then(|| self.expected[channel])
    }

    pub fn running(&self, channel: usize) -> Option<u16> {
        self.channels().contains(&channel).then(|| self.running[channel])
    }

    pub fn word_offset(&self) -> usize {
        self.word_offset
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    Setup,
    Transfer(Session),
    Validate(Session),
    Complete { channel_count: u8 },
    Fault(LoaderFault),
}

impl Phase {
    fn state(&self) -> LoaderState {
        match self {
            Phase::Setup => LoaderState::Setup,
            Phase::Transfer(_) => LoaderState::Transfer,
            Phase::Validate(_) => LoaderState::Validate,
            Phase::Complete { .. } => LoaderState::Complete,
            Phase::Fault(_) => LoaderState::Fault,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    Reset,
    SessionOpen { channel_count: u8 },
    Validated { channel_count: u8 },
    Mismatch { channel: u8, expected: u16, running: u16 },
    Faulted(LoaderFault),
    StrobeIgnored(LoaderState),
}

pub struct Loader {
    geometry: Geometry,
    phase: Phase,
    trace: Ringbuf<Trace, 32>,
}

impl Loader {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            phase: Phase::Setup,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> LoaderState {
        self.phase.state()
    }

    /// The in-flight session, if the engine is in Transfer or Validate.
    pub fn session(&self) -> Option<&Session> {
        match &self.phase {
            Phase::Transfer(s) | Phase::Validate(s) => Some(s),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<LoaderFault> {
        match self.phase {
            Phase::Fault(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == LoaderState::Complete
    }

    /// True while a transfer session is open.
    pub fn in_flight(&self) -> bool {
        matches!(self.phase, Phase::Transfer(_) | Phase::Validate(_))
    }

    /// Drops any session and returns to Setup. Bank contents are untouched.
    pub fn reset(&mut self) {
        if self.phase != Phase::Setup {
            ringbuf_entry!(self.trace, Trace::Reset);
        }
        self.phase = Phase::Setup;
    }

    /// Status record for the telemetry channel.
    pub fn status(&self) -> StatusRecord {
        let status = match self.phase {
            Phase::Setup | Phase::Validate(_) => 0,
            Phase::Transfer(s) => {
                (s.word_offset * 255 / self.geometry.capacity()) as u8
            }
            Phase::Complete { channel_count } => channel_count,
            Phase::Fault(f) => u8::from(f),
        };
        StatusRecord::saturating(Context::Loader, self.state() as u8, status)
    }

    /// Advances one tick. The next phase depends only on the phase committed
    /// at the end of the previous tick and this tick's inputs.
    pub fn tick(&mut self, input: &Sample, banks: &mut BufferBanks) {
        let next = match self.phase {
            Phase::Setup => self.setup(input, banks),
            Phase::Transfer(session) => self.transfer(session, input, banks),
            Phase::Validate(session) => self.validate(session),
            held @ (Phase::Complete { .. } | Phase::Fault(_)) => {
                if input.strobe {
                    ringbuf_entry!(
                        self.trace,
                        Trace::StrobeIgnored(held.state())
                    );
                }
                held
            }
        };

        if let Phase::Fault(f) = next {
            if self.fault().is_none() {
                ringbuf_entry!(self.trace, Trace::Faulted(f));
            }
        }
        self.phase = next;
    }

    fn setup(&mut self, input: &Sample, banks: &BufferBanks) -> Phase {
        if !input.strobe {
            return Phase::Setup;
        }
        if banks.sweeping() {
            return Phase::Fault(LoaderFault::SetupDuringSweep);
        }

        let channel_count = input.cmd.channel_count();
        if channel_count == 0
            || usize::from(channel_count) > self.geometry.banks()
        {
            return Phase::Fault(LoaderFault::BadChannelCount(channel_count));
        }

        ringbuf_entry!(self.trace, Trace::SessionOpen { channel_count });
        Phase::Transfer(Session::open(channel_count, &input.aux))
    }

    fn transfer(
        &mut self,
        mut session: Session,
        input: &Sample,
        banks: &mut BufferBanks,
    ) -> Phase {
        if !input.strobe {
            return Phase::Transfer(session);
        }

        let words = input.aux.words();
        if let Err(e) = banks.writer().write_all(session.word_offset, words) {
            return Phase::Fault(LoaderFault::WriteRejected(e));
        }
        for c in session.channels() {
            session.running[c] = word_crc::update(session.running[c], words[c]);
        }
        session.word_offset += 1;

        if session.word_offset >= self.geometry.capacity() {
            Phase::Validate(session)
        } else {
            Phase::Transfer(session)
        }
    }

    fn validate(&mut self, session: Session) -> Phase {
        let mismatched = session.mismatched();
        if mismatched == 0 {
            ringbuf_entry!(
                self.trace,
                Trace::Validated {
                    channel_count: session.channel_count
                }
            );
            return Phase::Complete {
                channel_count: session.channel_count,
            };
        }

        for c in session.channels().filter(|&c| mismatched & (1 << c) != 0) {
            ringbuf_entry!(
                self.trace,
                Trace::Mismatch {
                    channel: c as u8,
                    expected: session.expected[c],
                    running: session.running[c],
                }
            );
        }
        Phase::Fault(LoaderFault::ChecksumMismatch { mismatched })
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 32> {
        &self.trace
    }
}
