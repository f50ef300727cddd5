// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Seam for the application that takes over the device after handoff.

use drv_buffer_banks::BankReader;

/// What an application reports each tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PayloadStatus {
    /// Clamped to the band's largest state ordinal when rendered.
    pub state: u8,
    pub status: u8,
    /// Driven onto the instrument's data output.
    pub data: u32,
    /// Renders the status negative. The dispatcher never sees it.
    pub fault: bool,
}

pub trait Payload {
    /// Called once per tick while the application owns the device.
    fn tick(&mut self, banks: BankReader<'_>, bank_select: u8) -> PayloadStatus;

    /// Called when the application loses the device.
    fn reset(&mut self);
}

/// An application that does nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct Parked;

impl Payload for Parked {
    fn tick(&mut self, _: BankReader<'_>, _: u8) -> PayloadStatus {
        PayloadStatus::default()
    }

    fn reset(&mut self) {}
}
