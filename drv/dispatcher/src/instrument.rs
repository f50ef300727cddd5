// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::Result;
use drv_buffer_banks::BufferBanks;
use drv_bulk_loader::{Loader, LoaderState};
use drv_ctrl_regs_api::{AuxRegs, CommandWord, Sample, StrobeDetector};
use drv_diag::{Diag, DiagState};
use ringbuf::{ringbuf_entry, Ringbuf};
use status_band::{Context, StatusRecord};

use crate::{
    ChildSignals, DeviceConfig, Dispatcher, DispatcherState, Parked, Payload,
    PayloadStatus,
};

/// Everything the instrument drives, sampled after a tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Outputs {
    /// The status scalar.
    pub status: i32,
    /// Data output of the active context; zero when it has none.
    pub data: u32,
    /// The application owns the device.
    pub app_enable: bool,
    pub zero_done: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    SweepArmed,
    PayloadEnabled,
    PayloadReset,
}

/// The whole device on a single clock.
pub struct Instrument<P: Payload = Parked> {
    config: DeviceConfig,
    strobe: StrobeDetector,
    dispatcher: Dispatcher,
    loader: Loader,
    diag: Diag,
    banks: BufferBanks,
    payload: P,
    payload_status: Option<PayloadStatus>,
    now: u64,
    trace: Ringbuf<Trace, 16>,
}

impl Instrument<Parked> {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        Self::with_payload(config, Parked)
    }
}

impl<P: Payload> Instrument<P> {
    pub fn with_payload(config: DeviceConfig, payload: P) -> Result<Self> {
        let geometry = config.geometry()?;
        Ok(Self {
            config,
            strobe: StrobeDetector::new(),
            dispatcher: Dispatcher::new(
                config.selection_policy,
                config.zero_on_ready,
            ),
            loader: Loader::new(geometry),
            diag: Diag::new(),
            banks: BufferBanks::new(geometry),
            payload,
            payload_status: None,
            now: 0,
            trace: Ringbuf::new(Trace::None),
        })
    }

    /// Runs one clock tick with the given register contents.
    ///
    /// Every component computes its next state from what was committed at
    /// the end of the previous tick. Children run only if the committed
    /// dispatcher state enables them, so a child's fault reaches the
    /// dispatcher one tick after the child takes it.
    pub fn tick(&mut self, cmd: CommandWord, aux: AuxRegs) -> Outputs {
        let sample = Sample {
            strobe: self.strobe.sample(cmd.data_strobe()),
            cmd,
            aux,
        };

        let step = self.dispatcher.plan(cmd, &self.child_signals());

        match self.dispatcher.state() {
            DispatcherState::DiagnosticsActive => {
                self.diag.tick(&sample, &mut self.banks);
            }
            _ => self.diag.reset(),
        }

        match self.dispatcher.state() {
            DispatcherState::LoaderActive => {
                self.loader.tick(&sample, &mut self.banks);
            }
            _ => self.loader.reset(),
        }

        if self.dispatcher.state() == DispatcherState::ApplicationActive {
            if self.payload_status.is_none() {
                ringbuf_entry!(self.trace, Trace::PayloadEnabled);
            }
            let status =
                self.payload.tick(self.banks.reader(), cmd.bank_select());
            self.payload_status = Some(status);
        } else if self.payload_status.take().is_some() {
            ringbuf_entry!(self.trace, Trace::PayloadReset);
            self.payload.reset();
        }

        self.banks.tick();
        if step.start_sweep() {
            ringbuf_entry!(self.trace, Trace::SweepArmed);
            self.banks.start_zero_sweep();
        }

        self.dispatcher.commit(step);
        self.now += 1;
        self.outputs()
    }

    fn child_signals(&self) -> ChildSignals {
        ChildSignals {
            diag_fault: self.diag.fault(),
            diag_record: self.diag_record(),
            loader_fault: self.loader.fault(),
            loader_complete: self.loader.is_complete(),
            loader_record: self.loader.status(),
        }
    }

    fn diag_record(&self) -> StatusRecord {
        self.diag.status(self.banks.geometry().capacity())
    }

    /// The outputs as of the last committed tick.
    pub fn outputs(&self) -> Outputs {
        let (status, data) = match self.dispatcher.state() {
            DispatcherState::Idle | DispatcherState::Ready => {
                (self.dispatcher.record(self.banks.zero_done()).encode(), 0)
            }
            DispatcherState::DiagnosticsActive => (
                self.diag_record().render(self.diag.fault().is_some()),
                self.diag.data(&self.banks),
            ),
            DispatcherState::LoaderActive => (
                self.loader.status().render(self.loader.fault().is_some()),
                0,
            ),
            DispatcherState::ApplicationActive => {
                let p = self.payload_status.unwrap_or_default();
                let record = StatusRecord::saturating(
                    Context::Application,
                    p.state,
                    p.status,
                );
                (record.render(p.fault), p.data)
            }
            DispatcherState::Fault => {
                let record = match self.dispatcher.latched() {
                    Some(latched) => latched.record,
                    None => self.dispatcher.record(self.banks.zero_done()),
                };
                (record.encode_fault(), 0)
            }
        };

        Outputs {
            status,
            data,
            app_enable: self.dispatcher.state()
                == DispatcherState::ApplicationActive,
            zero_done: self.banks.zero_done(),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn dispatcher_state(&self) -> DispatcherState {
        self.dispatcher.state()
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn loader_state(&self) -> LoaderState {
        self.loader.state()
    }

    pub fn diag(&self) -> &Diag {
        &self.diag
    }

    pub fn diag_state(&self) -> DiagState {
        self.diag.state()
    }

    pub fn banks(&self) -> &BufferBanks {
        &self.banks
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Ticks run since construction.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 16> {
        &self.trace
    }
}
