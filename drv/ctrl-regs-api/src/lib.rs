// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command register interface.
//!
//! The instrument is driven through one primary command word, sampled once per
//! tick, and a small block of auxiliary data registers whose meaning depends on
//! the phase of whatever context is consuming them. Nothing here has state
//! except the strobe edge detector; everything else is a view of the bits the
//! client wrote.

#![cfg_attr(not(test), no_std)]

use bitfield::bitfield;

/// Number of auxiliary data registers.
pub const AUX_REGS: usize = 4;

/// Largest channel count the register can carry.
pub const MAX_CHANNEL_FIELD: u8 = 0b111;

// One-hot bits within `context_select`.
pub const SELECT_APPLICATION: u8 = 1 << 0;
pub const SELECT_DIAGNOSTICS: u8 = 1 << 1;
pub const SELECT_LOADER: u8 = 1 << 2;
pub const SELECT_SOFT_RESET: u8 = 1 << 3;

bitfield! {
    /// Primary command word.
    #[derive(Copy, Clone, Default, PartialEq, Eq)]
    pub struct CommandWord(u32);
    impl Debug;
    pub run_ready, set_run_ready: 0;
    pub run_user, set_run_user: 1;
    pub run_clock, set_run_clock: 2;
    pub u8, context_select, set_context_select: 6, 3;
    pub return_request, set_return_request: 7;
    pub u8, bank_select, set_bank_select: 9, 8;
    pub u8, channel_count, set_channel_count: 12, 10;
    pub data_strobe, set_data_strobe: 13;
}

/// Which context the select field asks for, after priority resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    None,
    Application,
    Diagnostics,
    Loader,
    /// Drops Ready back to Idle. The select field is a level, so holding
    /// this bit with RUN up bounces Idle and Ready on alternate ticks, and
    /// each entry to Ready starts a fresh zero sweep if one is configured.
    SoftReset,
}

impl Selection {
    /// The one-hot `context_select` encoding of this selection.
    pub fn select_bits(self) -> u8 {
        match self {
            Selection::None => 0,
            Selection::Application => SELECT_APPLICATION,
            Selection::Diagnostics => SELECT_DIAGNOSTICS,
            Selection::Loader => SELECT_LOADER,
            Selection::SoftReset => SELECT_SOFT_RESET,
        }
    }
}

/// Outcome of decoding `context_select`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub selection: Selection,
    /// More than one select bit was asserted; `selection` is the winner by
    /// priority (soft-reset > loader > diagnostics > application).
    pub conflict: bool,
}

impl CommandWord {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    /// A command word with only the three RUN bits set.
    pub fn running() -> Self {
        let mut cmd = Self::default();
        cmd.set_run_ready(true);
        cmd.set_run_user(true);
        cmd.set_run_clock(true);
        cmd
    }

    /// True only if all three RUN bits are set.
    pub fn run_gate(&self) -> bool {
        self.run_ready() && self.run_user() && self.run_clock()
    }

    pub fn decide(&self) -> Decision {
        let bits = self.context_select();
        let selection = if bits & SELECT_SOFT_RESET != 0 {
            Selection::SoftReset
        } else if bits & SELECT_LOADER != 0 {
            Selection::Loader
        } else if bits & SELECT_DIAGNOSTICS != 0 {
            Selection::Diagnostics
        } else if bits & SELECT_APPLICATION != 0 {
            Selection::Application
        } else {
            Selection::None
        };
        Decision {
            selection,
            conflict: bits.count_ones() > 1,
        }
    }

    pub fn with_select(self, selection: Selection) -> Self {
        self.with_select_bits(selection.select_bits())
    }

    pub fn with_select_bits(mut self, bits: u8) -> Self {
        self.set_context_select(bits & 0b1111);
        self
    }

    pub fn with_return(mut self, on: bool) -> Self {
        self.set_return_request(on);
        self
    }

    pub fn with_bank(mut self, bank: u8) -> Self {
        self.set_bank_select(bank & 0b11);
        self
    }

    pub fn with_channels(mut self, count: u8) -> Self {
        self.set_channel_count(count & MAX_CHANNEL_FIELD);
        self
    }

    pub fn with_strobe(mut self, on: bool) -> Self {
        self.set_data_strobe(on);
        self
    }
}

impl From<u32> for CommandWord {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<CommandWord> for u32 {
    fn from(cmd: CommandWord) -> Self {
        cmd.0
    }
}

/// The auxiliary data registers.
///
/// During a loader Setup phase these hold per-channel expected checksums
/// (low 16 bits); during Transfer they hold the per-bank payload word. The
/// diagnostics context reads them as an opcode and argument.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AuxRegs(pub [u32; AUX_REGS]);

impl AuxRegs {
    pub fn word(&self, index: usize) -> u32 {
        self.0.get(index).copied().unwrap_or(0)
    }

    pub fn words(&self) -> &[u32; AUX_REGS] {
        &self.0
    }
}

impl From<[u32; AUX_REGS]> for AuxRegs {
    fn from(words: [u32; AUX_REGS]) -> Self {
        Self(words)
    }
}

/// Turns the sampled `data_strobe` level into events.
///
/// An event is a falling transition: high on one sample, low on the next. A
/// level held across samples never produces an event, and neither does a
/// pulse that rises and falls between two samples, since it is never seen.
#[derive(Copy, Clone, Debug, Default)]
pub struct StrobeDetector {
    last: bool,
}

impl StrobeDetector {
    pub const fn new() -> Self {
        Self { last: false }
    }

    /// Samples the strobe level for this tick, returning true on an event.
    pub fn sample(&mut self, level: bool) -> bool {
        let event = self.last && !level;
        self.last = level;
        event
    }

    /// The level seen on the most recent sample.
    pub fn level(&self) -> bool {
        self.last
    }
}

/// What a context sees of the registers on one tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Sample {
    /// A strobe event (falling edge) was detected this tick.
    pub strobe: bool,
    pub cmd: CommandWord,
    pub aux: AuxRegs,
}

impl Sample {
    /// The same registers with no strobe event.
    pub fn quiet(self) -> Self {
        Self {
            strobe: false,
            ..self
        }
    }
}
