// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-channel CRC engine for the bulk loader.
//!
//! Each transfer channel carries its own running 16-bit checksum, advanced one
//! 32-bit word at a time. The word is folded in as four bytes, most significant
//! first, using CRC-16/IBM-3740 (polynomial `0x1021`, MSB-first, no reflection,
//! no final XOR). Because there is no final XOR, the running value after the
//! last word *is* the checksum, and a sender can compute the expected value
//! with any stock CRC-16/IBM-3740 implementation over the big-endian byte
//! stream.
//!
//! The engine is a pure function: it holds no state, so one "instance" per
//! channel is just one running `u16` per channel.

#![cfg_attr(not(test), no_std)]

use crc::{Crc, CRC_16_IBM_3740};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Value every running checksum starts from.
pub const INITIAL: u16 = CRC_16_IBM_3740.init;

/// Generator polynomial, for documentation and cross-checking.
pub const POLY: u16 = CRC_16_IBM_3740.poly;

/// Folds `word` into the running checksum `crc`.
pub fn update(crc: u16, word: u32) -> u16 {
    let mut digest = CRC16.digest_with_initial(crc);
    digest.update(&word.to_be_bytes());
    digest.finalize()
}

/// Checksum of a whole word stream, starting from [`INITIAL`].
pub fn checksum(words: &[u32]) -> u16 {
    words.iter().fold(INITIAL, |crc, &w| update(crc, w))
}
