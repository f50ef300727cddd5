// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_buffer_banks::{BufferBanks, Geometry};
use drv_bulk_loader::{Loader, LoaderFault, LoaderState};
use drv_ctrl_regs_api::{AuxRegs, CommandWord, Sample};
use proptest::prelude::*;

const BANKS: usize = 4;

fn strobe(cmd: CommandWord, aux: [u32; 4]) -> Sample {
    Sample {
        strobe: true,
        cmd,
        aux: AuxRegs::from(aux),
    }
}

proptest! {
    // The session completes exactly when every active channel's expected
    // checksum matches what was streamed, and otherwise faults naming the
    // channels that disagree.
    #[test]
    fn complete_iff_checksums_match(
        channels in 1u8..=BANKS as u8,
        data in proptest::collection::vec(any::<[u32; 4]>(), 1..24),
        lie in proptest::collection::vec(any::<bool>(), BANKS),
    ) {
        let g = Geometry::new(BANKS, data.len()).unwrap();
        let mut banks = BufferBanks::new(g);
        let mut loader = Loader::new(g);
        let cmd = CommandWord::running().with_channels(channels);

        let mut expected = [0u32; 4];
        let mut mask = 0u8;
        for c in 0..BANKS {
            let words: Vec<u32> = data.iter().map(|w| w[c]).collect();
            let sum = word_crc::checksum(&words);
            expected[c] = if lie[c] {
                if c < usize::from(channels) {
                    mask |= 1 << c;
                }
                u32::from(sum ^ 0x8000)
            } else {
                u32::from(sum)
            };
        }

        loader.tick(&strobe(cmd, expected), &mut banks);
        for words in &data {
            prop_assert_eq!(loader.state(), LoaderState::Transfer);
            loader.tick(&strobe(cmd, *words), &mut banks);
        }
        prop_assert_eq!(loader.state(), LoaderState::Validate);
        loader.tick(&strobe(cmd, [0; 4]).quiet(), &mut banks);

        if mask == 0 {
            prop_assert!(loader.is_complete());
        } else {
            prop_assert_eq!(
                loader.fault(),
                Some(LoaderFault::ChecksumMismatch { mismatched: mask })
            );
        }

        // The data landed regardless of the verdict.
        let r = banks.reader();
        for (i, words) in data.iter().enumerate() {
            for (c, &w) in words.iter().enumerate() {
                prop_assert_eq!(r.word(c, i), Ok(w));
            }
        }
    }
}
