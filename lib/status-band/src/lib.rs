// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status encoding for the single telemetry channel.
//!
//! The instrument has exactly one scalar output for status. Whichever context
//! is active renders a `(state, status)` pair onto it, and a client that has
//! no way to ask follow-up questions must be able to recover the context, the
//! state ordinal and the status byte from the number alone.
//!
//! Each [`Context`] owns a disjoint band of [`BAND_SPAN`] values starting at
//! its base. Within a band,
//!
//! ```text
//! scalar = base + state * STATE_UNIT + status * STATUS_UNIT
//! ```
//!
//! `STATE_UNIT` and `STATUS_UNIT` share no common factor and every status
//! offset stays below one `STATE_UNIT`, so integer division recovers the state
//! and the remainder (which must be a multiple of `STATUS_UNIT`) recovers the
//! status. No base is zero, so negating a scalar is always distinguishable:
//! a negative value is the fault indicator, and its magnitude still decodes to
//! the last known record.

#![cfg_attr(not(test), no_std)]

use enum_map::{enum_map, Enum, EnumMap};
use num_derive::FromPrimitive;
use static_assertions::const_assert;

/// Width of one state step inside a band.
pub const STATE_UNIT: u32 = 1024;
/// Width of one status step inside a state.
pub const STATUS_UNIT: u32 = 3;
/// Size of the numeric band owned by each context.
pub const BAND_SPAN: u32 = 0x1_0000;
/// Number of distinct state ordinals a band can carry.
pub const STATES_PER_BAND: u32 = BAND_SPAN / STATE_UNIT;
/// Largest encodable state ordinal.
pub const MAX_STATE: u8 = (STATES_PER_BAND - 1) as u8;

const fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

const_assert!(gcd(STATE_UNIT, STATUS_UNIT) == 1);
const_assert!(STATUS_UNIT * (u8::MAX as u32) < STATE_UNIT);
const_assert!(BAND_SPAN % STATE_UNIT == 0);
const_assert!(STATES_PER_BAND <= u8::MAX as u32 + 1);

/// The contexts that can own the status channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, FromPrimitive)]
#[repr(u8)]
pub enum Context {
    /// The dispatcher itself, while no child context is active.
    Dispatcher = 0,
    Diagnostics = 1,
    Loader = 2,
    Application = 3,
}

/// Base of the band owned by each context.
pub fn bands() -> EnumMap<Context, u32> {
    enum_map! {
        Context::Dispatcher => 0x1_0000,
        Context::Diagnostics => 0x2_0000,
        Context::Loader => 0x3_0000,
        Context::Application => 0x4_0000,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// The state ordinal does not fit in a band.
    StateOutOfRange(u8),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The magnitude falls outside every band.
    OutOfBand,
    /// The in-state remainder is not a multiple of `STATUS_UNIT`.
    Misaligned,
    /// The in-state remainder decodes to a status above `u8::MAX`.
    StatusOverflow,
}

/// A `(context, state, status)` triple, validated to be encodable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    context: Context,
    state: u8,
    status: u8,
}

impl StatusRecord {
    pub fn new(
        context: Context,
        state: u8,
        status: u8,
    ) -> Result<Self, EncodeError> {
        if state > MAX_STATE {
            return Err(EncodeError::StateOutOfRange(state));
        }
        Ok(Self {
            context,
            state,
            status,
        })
    }

    /// Like [`StatusRecord::new`], but clamps an oversized state ordinal to
    /// [`MAX_STATE`]. Used for collaborators whose state space we don't own.
    pub fn saturating(context: Context, state: u8, status: u8) -> Self {
        Self {
            context,
            state: state.min(MAX_STATE),
            status,
        }
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn state(&self) -> u8 {
        self.state
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    /// Renders the record as a (positive) status scalar.
    pub fn encode(&self) -> i32 {
        let offset = u32::from(self.state) * STATE_UNIT
            + u32::from(self.status) * STATUS_UNIT;
        // The largest base plus a full band stays far below i32::MAX.
        (bands()[self.context] + offset) as i32
    }

    /// Renders the record with the fault sign.
    pub fn encode_fault(&self) -> i32 {
        -self.encode()
    }

    /// Renders the record, negated if `fault` is set.
    pub fn render(&self, fault: bool) -> i32 {
        if fault {
            self.encode_fault()
        } else {
            self.encode()
        }
    }
}

/// Encodes a triple straight to a scalar.
pub fn encode(
    context: Context,
    state: u8,
    status: u8,
) -> Result<i32, EncodeError> {
    StatusRecord::new(context, state, status).map(|r| r.encode())
}

/// The result of decoding a scalar.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub record: StatusRecord,
    /// The scalar was negative.
    pub fault: bool,
}

/// Recovers the record (and fault sign) from a scalar.
pub fn decode(scalar: i32) -> Result<Decoded, DecodeError> {
    let magnitude = scalar.unsigned_abs();

    for (context, base) in bands() {
        let Some(offset) = magnitude.checked_sub(base) else {
            continue;
        };
        if offset >= BAND_SPAN {
            continue;
        }

        let state = offset / STATE_UNIT;
        let rem = offset % STATE_UNIT;
        if rem % STATUS_UNIT != 0 {
            return Err(DecodeError::Misaligned);
        }
        let status = u8::try_from(rem / STATUS_UNIT)
            .map_err(|_| DecodeError::StatusOverflow)?;

        return Ok(Decoded {
            record: StatusRecord {
                context,
                // Bounded by STATES_PER_BAND, checked above.
                state: state as u8,
                status,
            },
            fault: scalar < 0,
        });
    }

    Err(DecodeError::OutOfBand)
}
