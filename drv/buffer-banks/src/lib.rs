// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Buffer bank manager.
//!
//! Owns a fixed number of fixed-size banks of 32-bit words, shared between the
//! loader (the only writer) and whichever context is currently selected (a
//! reader). There are no locks. Exclusivity falls out of borrowing: the only
//! way to write is through a [`BankWriter`], which holds `&mut` to the banks,
//! and a [`BankReader`] is a shared view. The manager itself does not check
//! *who* is writing; keeping writes inside the loader's Transfer phase is the
//! caller's contract.
//!
//! Two multi-tick operations run off [`BufferBanks::tick`]:
//!
//! - the zero sweep, which clears one address of every bank per tick and
//!   raises `zero_done` after exactly `capacity` ticks, and
//! - the read port, which returns a requested word one tick after the
//!   request.

use ringbuf::{ringbuf_entry, Ringbuf};

/// `bank_select` is two bits wide.
pub const MAX_BANKS: usize = 4;

/// Largest supported bank, in words.
pub const MAX_CAPACITY: usize = 1 << 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BankError {
    /// Bank count or capacity outside what the hardware can address.
    BadGeometry { banks: usize, capacity: usize },
    NoSuchBank(usize),
    /// Address past the end of a bank.
    OutOfRange(usize),
    /// A parallel write was given fewer values than there are banks.
    ShortWrite(usize),
}

/// Bank count and per-bank capacity, validated.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    banks: usize,
    capacity: usize,
}

impl Geometry {
    pub fn new(banks: usize, capacity: usize) -> Result<Self, BankError> {
        if !(1..=MAX_BANKS).contains(&banks)
            || !(1..=MAX_CAPACITY).contains(&capacity)
        {
            return Err(BankError::BadGeometry { banks, capacity });
        }
        Ok(Self { banks, capacity })
    }

    pub fn banks(&self) -> usize {
        self.banks
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    SweepStart,
    SweepRestart { at: usize },
    SweepDone,
    ReadRejected(BankError),
    WriteRejected(BankError),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Sweep {
    Idle,
    Running { next: usize },
}

pub struct BufferBanks {
    geometry: Geometry,
    banks: Vec<Box<[u32]>>,
    sweep: Sweep,
    zero_done: bool,
    pending_read: Option<u32>,
    read_data: u32,
    trace: Ringbuf<Trace, 16>,
}

impl BufferBanks {
    /// Creates the banks, all zeroed. `zero_done` stays low until a sweep has
    /// actually run.
    pub fn new(geometry: Geometry) -> Self {
        let banks = (0..geometry.banks)
            .map(|_| vec![0; geometry.capacity].into_boxed_slice())
            .collect();
        Self {
            geometry,
            banks,
            sweep: Sweep::Idle,
            zero_done: false,
            pending_read: None,
            read_data: 0,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Arms a zero sweep. It begins clearing on the next [`tick`], and a sweep
    /// already in flight starts over from address 0.
    ///
    /// [`tick`]: BufferBanks::tick
    pub fn start_zero_sweep(&mut self) {
        match self.sweep {
            Sweep::Running { next } => {
                ringbuf_entry!(self.trace, Trace::SweepRestart { at: next });
            }
            Sweep::Idle => {
                ringbuf_entry!(self.trace, Trace::SweepStart);
            }
        }
        self.sweep = Sweep::Running { next: 0 };
        self.zero_done = false;
    }

    pub fn sweeping(&self) -> bool {
        matches!(self.sweep, Sweep::Running { .. })
    }

    /// Raised once a sweep has cleared every address, and lowered again when
    /// the next sweep starts.
    pub fn zero_done(&self) -> bool {
        self.zero_done
    }

    /// Exclusive write access to every bank.
    pub fn writer(&mut self) -> BankWriter<'_> {
        BankWriter {
            banks: &mut self.banks,
            trace: &mut self.trace,
        }
    }

    /// Shared, bank-selected read access.
    pub fn reader(&self) -> BankReader<'_> {
        BankReader { banks: &self.banks }
    }

    /// Requests a word through the read port. The word is captured now and
    /// shows up on [`read_data`](BufferBanks::read_data) after the next tick.
    /// If several requests land in one tick the last one wins.
    pub fn request_read(
        &mut self,
        bank: usize,
        addr: usize,
    ) -> Result<(), BankError> {
        match self.reader().word(bank, addr) {
            Ok(word) => {
                self.pending_read = Some(word);
                Ok(())
            }
            Err(e) => {
                ringbuf_entry!(self.trace, Trace::ReadRejected(e));
                Err(e)
            }
        }
    }

    /// Output of the read port.
    pub fn read_data(&self) -> u32 {
        self.read_data
    }

    /// Advances one clock tick: publishes any pending read, then clears the
    /// next sweep address.
    pub fn tick(&mut self) {
        if let Some(word) = self.pending_read.take() {
            self.read_data = word;
        }

        if let Sweep::Running { next } = self.sweep {
            for bank in self.banks.iter_mut() {
                bank[next] = 0;
            }
            let next = next + 1;
            if next >= self.geometry.capacity {
                self.sweep = Sweep::Idle;
                self.zero_done = true;
                ringbuf_entry!(self.trace, Trace::SweepDone);
            } else {
                self.sweep = Sweep::Running { next };
            }
        }
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 16> {
        &self.trace
    }
}

/// Write handle over all banks. Only one can exist at a time.
pub struct BankWriter<'a> {
    banks: &'a mut [Box<[u32]>],
    trace: &'a mut Ringbuf<Trace, 16>,
}

impl BankWriter<'_> {
    /// Writes `values[i]` into bank `i` at `offset`, for every bank at once.
    /// Extra values beyond the bank count are ignored.
    pub fn write_all(
        &mut self,
        offset: usize,
        values: &[u32],
    ) -> Result<(), BankError> {
        let result = self.check(offset, values.len());
        if let Err(e) = result {
            ringbuf_entry!(*self.trace, Trace::WriteRejected(e));
            return result;
        }
        for (bank, &value) in self.banks.iter_mut().zip(values) {
            bank[offset] = value;
        }
        Ok(())
    }

    fn check(&self, offset: usize, given: usize) -> Result<(), BankError> {
        if given < self.banks.len() {
            return Err(BankError::ShortWrite(given));
        }
        let capacity = self.banks.first().map_or(0, |b| b.len());
        if offset >= capacity {
            return Err(BankError::OutOfRange(offset));
        }
        Ok(())
    }
}

/// Read-only view of the banks.
#[derive(Copy, Clone)]
pub struct BankReader<'a> {
    banks: &'a [Box<[u32]>],
}

impl<'a> BankReader<'a> {
    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn capacity(&self) -> usize {
        self.banks.first().map_or(0, |b| b.len())
    }

    pub fn bank(&self, bank: usize) -> Result<&'a [u32], BankError> {
        self.banks
            .get(bank)
            .map(|b| &b[..])
            .ok_or(BankError::NoSuchBank(bank))
    }

    pub fn word(&self, bank: usize, addr: usize) -> Result<u32, BankError> {
        self.bank(bank)?
            .get(addr)
            .copied()
            .ok_or(BankError::OutOfRange(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn banks(n: usize, cap: usize) -> BufferBanks {
        BufferBanks::new(Geometry::new(n, cap).unwrap())
    }

    fn fill(b: &mut BufferBanks, base: u32) {
        let cap = b.geometry().capacity();
        let mut w = b.writer();
        for off in 0..cap {
            let v = base + off as u32;
            w.write_all(off, &[v, v + 0x1000, v + 0x2000, v + 0x3000])
                .unwrap();
        }
    }

    #[test]
    fn geometry_limits() {
        assert!(Geometry::new(0, 16).is_err());
        assert!(Geometry::new(5, 16).is_err());
        assert!(Geometry::new(4, 0).is_err());
        assert!(Geometry::new(4, MAX_CAPACITY + 1).is_err());
        assert!(Geometry::new(1, MAX_CAPACITY).is_ok());
    }

    #[test]
    fn parallel_write_hits_every_bank() {
        let mut b = banks(3, 8);
        b.writer().write_all(5, &[10, 20, 30, 40]).unwrap();
        let r = b.reader();
        assert_eq!(r.word(0, 5), Ok(10));
        assert_eq!(r.word(1, 5), Ok(20));
        assert_eq!(r.word(2, 5), Ok(30));
        assert_eq!(r.word(3, 5), Err(BankError::NoSuchBank(3)));
        assert_eq!(r.word(0, 4), Ok(0));
    }

    #[test]
    fn write_rejections() {
        let mut b = banks(4, 8);
        assert_eq!(
            b.writer().write_all(8, &[1, 2, 3, 4]),
            Err(BankError::OutOfRange(8))
        );
        assert_eq!(
            b.writer().write_all(0, &[1, 2]),
            Err(BankError::ShortWrite(2))
        );
        assert!(b.reader().bank(0).unwrap().iter().all(|&w| w == 0));
        assert!(b
            .trace()
            .contains(&Trace::WriteRejected(BankError::ShortWrite(2))));
    }

    #[test]
    fn last_write_wins() {
        let mut b = banks(1, 4);
        b.writer().write_all(2, &[1]).unwrap();
        b.writer().write_all(2, &[2]).unwrap();
        assert_eq!(b.reader().word(0, 2), Ok(2));
    }

    #[test]
    fn sweep_takes_capacity_ticks() {
        const CAP: usize = 32;
        let mut b = banks(4, CAP);
        fill(&mut b, 0x100);
        b.start_zero_sweep();
        assert!(b.sweeping());
        assert!(!b.zero_done());

        for t in 1..=CAP {
            b.tick();
            assert_eq!(b.zero_done(), t == CAP, "tick {t}");
        }
        assert!(!b.sweeping());
        let r = b.reader();
        for bank in 0..4 {
            assert!(r.bank(bank).unwrap().iter().all(|&w| w == 0));
        }
        assert_eq!(b.trace().last_entry().unwrap().payload, Trace::SweepDone);
    }

    #[test]
    fn sweep_clears_in_address_order() {
        let mut b = banks(2, 4);
        fill(&mut b, 1);
        b.start_zero_sweep();
        b.tick();
        b.tick();
        assert_eq!(b.reader().bank(0).unwrap(), &[0, 0, 3, 4]);
    }

    #[test]
    fn restart_mid_sweep() {
        let mut b = banks(1, 8);
        b.start_zero_sweep();
        for _ in 0..5 {
            b.tick();
        }
        b.start_zero_sweep();
        assert!(b.trace().contains(&Trace::SweepRestart { at: 5 }));
        for _ in 0..7 {
            b.tick();
        }
        assert!(!b.zero_done());
        b.tick();
        assert!(b.zero_done());
    }

    #[test]
    fn read_port_latency() {
        let mut b = banks(2, 8);
        b.writer().write_all(3, &[0xaa, 0xbb]).unwrap();
        b.request_read(1, 3).unwrap();
        assert_eq!(b.read_data(), 0);
        // A write after the request does not affect the captured word.
        b.writer().write_all(3, &[0xcc, 0xdd]).unwrap();
        b.tick();
        assert_eq!(b.read_data(), 0xbb);
        // The output holds until the next request.
        b.tick();
        assert_eq!(b.read_data(), 0xbb);
    }

    #[test]
    fn read_port_rejects_bad_address() {
        let mut b = banks(2, 8);
        assert_eq!(b.request_read(2, 0), Err(BankError::NoSuchBank(2)));
        assert_eq!(b.request_read(0, 8), Err(BankError::OutOfRange(8)));
    }
}
