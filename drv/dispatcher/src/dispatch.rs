// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The root state machine.
//!
//! Each tick is split in two: [`Dispatcher::plan`] computes the next state
//! from the committed state, the command word, and the children's committed
//! signals, without touching anything; [`Dispatcher::commit`] then applies the
//! plan. Since `plan` only ever looks at committed values, one tick moves at
//! most one edge of the state graph.

use drv_bulk_loader::LoaderFault;
use drv_ctrl_regs_api::{CommandWord, Selection};
use drv_diag::DiagFault;
use num_derive::FromPrimitive;
use ringbuf::{ringbuf_entry, Ringbuf};
use serde::Deserialize;
use status_band::{Context, StatusRecord};

#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DispatcherState {
    Idle = 0,
    Ready = 1,
    DiagnosticsActive = 2,
    LoaderActive = 3,
    ApplicationActive = 4,
    Fault = 5,
}

/// How Ready treats a command word with more than one select bit set.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// Take the highest-priority bit and remember that it happened.
    #[default]
    Priority,
    /// Fault.
    Strict,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// The loader's end-of-transfer checksums disagreed.
    Protocol { mismatched: u8 },
    /// Conflicting select bits under [`SelectionPolicy::Strict`].
    Selection { select: u8 },
    /// Any other fault reported by the diagnostics or loader context.
    Subsystem { context: Context, code: u8 },
}

impl From<Fault> for u16 {
    fn from(f: Fault) -> Self {
        match f {
            Fault::Protocol { mismatched } => 0x1000 | u16::from(mismatched),
            Fault::Selection { select } => 0x2000 | u16::from(select),
            Fault::Subsystem { context, code } => {
                0x3000 | (context as u16) << 8 | u16::from(code)
            }
        }
    }
}

impl From<LoaderFault> for Fault {
    fn from(f: LoaderFault) -> Self {
        match f {
            LoaderFault::ChecksumMismatch { mismatched } => {
                Fault::Protocol { mismatched }
            }
            other => Fault::Subsystem {
                context: Context::Loader,
                code: u8::from(other),
            },
        }
    }
}

impl From<DiagFault> for Fault {
    fn from(f: DiagFault) -> Self {
        Fault::Subsystem {
            context: Context::Diagnostics,
            code: u8::from(f),
        }
    }
}

/// A fault along with the record that was on the status channel when it was
/// taken, kept so the Fault state can keep rendering it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LatchedFault {
    pub fault: Fault,
    pub record: StatusRecord,
}

/// The children's committed outputs, as the dispatcher sees them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChildSignals {
    pub diag_fault: Option<DiagFault>,
    pub diag_record: StatusRecord,
    pub loader_fault: Option<LoaderFault>,
    pub loader_complete: bool,
    pub loader_record: StatusRecord,
}

/// Output of [`Dispatcher::plan`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Step {
    next: DispatcherState,
    fault: Option<LatchedFault>,
    conflict: Option<u8>,
    start_sweep: bool,
    return_refused: bool,
}

impl Step {
    fn to(next: DispatcherState) -> Self {
        Self {
            next,
            fault: None,
            conflict: None,
            start_sweep: false,
            return_refused: false,
        }
    }

    pub fn next(&self) -> DispatcherState {
        self.next
    }

    pub fn fault(&self) -> Option<LatchedFault> {
        self.fault
    }

    /// True if this step arms a zero sweep of the banks.
    pub fn start_sweep(&self) -> bool {
        self.start_sweep
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Trace {
    None,
    Transition(DispatcherState, DispatcherState),
    SelectConflict(u8),
    ReturnRefused,
    Faulted(Fault),
}

pub struct Dispatcher {
    state: DispatcherState,
    policy: SelectionPolicy,
    zero_on_ready: bool,
    conflict_seen: bool,
    latched: Option<LatchedFault>,
    trace: Ringbuf<Trace, 64>,
}

impl Dispatcher {
    pub fn new(policy: SelectionPolicy, zero_on_ready: bool) -> Self {
        Self {
            state: DispatcherState::Idle,
            policy,
            zero_on_ready,
            conflict_seen: false,
            latched: None,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// The fault being held, if the dispatcher is in Fault.
    pub fn latched(&self) -> Option<LatchedFault> {
        self.latched
    }

    /// Whether a select conflict was resolved by priority since the last
    /// entry to Ready from Idle.
    pub fn conflict_seen(&self) -> bool {
        self.conflict_seen
    }

    /// Computes this tick's transition. Pure: nothing changes until the
    /// result is passed to [`Dispatcher::commit`].
    pub fn plan(&self, cmd: CommandWord, children: &ChildSignals) -> Step {
        if !cmd.run_gate() {
            return Step::to(DispatcherState::Idle);
        }

        match self.state {
            DispatcherState::Idle => Step {
                start_sweep: self.zero_on_ready,
                ..Step::to(DispatcherState::Ready)
            },
            DispatcherState::Ready => self.select(cmd),
            DispatcherState::DiagnosticsActive => {
                if let Some(f) = children.diag_fault {
                    self.fault(f.into(), children.diag_record)
                } else if cmd.return_request() {
                    Step::to(DispatcherState::Ready)
                } else {
                    Step::to(DispatcherState::DiagnosticsActive)
                }
            }
            DispatcherState::LoaderActive => {
                if let Some(f) = children.loader_fault {
                    self.fault(f.into(), children.loader_record)
                } else if !cmd.return_request() {
                    Step::to(DispatcherState::LoaderActive)
                } else if children.loader_complete {
                    Step::to(DispatcherState::Ready)
                } else {
                    Step {
                        return_refused: true,
                        ..Step::to(DispatcherState::LoaderActive)
                    }
                }
            }
            // Once the application has the device, only the RUN gate gets it
            // back, and nothing the application reports is looked at.
            DispatcherState::ApplicationActive => {
                Step::to(DispatcherState::ApplicationActive)
            }
            DispatcherState::Fault => Step::to(DispatcherState::Fault),
        }
    }

    fn select(&self, cmd: CommandWord) -> Step {
        // A return request still held from the last context must not bounce
        // straight back into one.
        if cmd.return_request() {
            return Step::to(DispatcherState::Ready);
        }

        let decision = cmd.decide();
        let select = cmd.context_select();
        if decision.conflict && self.policy == SelectionPolicy::Strict {
            let record = StatusRecord::saturating(
                Context::Dispatcher,
                DispatcherState::Fault as u8,
                select,
            );
            return self.fault(Fault::Selection { select }, record);
        }

        let next = match decision.selection {
            Selection::None => DispatcherState::Ready,
            Selection::Application => DispatcherState::ApplicationActive,
            Selection::Diagnostics => DispatcherState::DiagnosticsActive,
            Selection::Loader => DispatcherState::LoaderActive,
            // Idle re-enters Ready on the next tick while RUN holds, so a
            // held soft reset cycles through Idle rather than parking there.
            Selection::SoftReset => DispatcherState::Idle,
        };
        Step {
            conflict: decision.conflict.then_some(select),
            ..Step::to(next)
        }
    }

    fn fault(&self, fault: Fault, record: StatusRecord) -> Step {
        Step {
            fault: Some(LatchedFault { fault, record }),
            ..Step::to(DispatcherState::Fault)
        }
    }

    pub fn commit(&mut self, step: Step) {
        if let Some(select) = step.conflict {
            ringbuf_entry!(self.trace, Trace::SelectConflict(select));
            self.conflict_seen = true;
        }
        if step.return_refused {
            ringbuf_entry!(self.trace, Trace::ReturnRefused);
        }
        if let Some(latched) = step.fault {
            ringbuf_entry!(self.trace, Trace::Faulted(latched.fault));
            self.latched = Some(latched);
        }

        if step.next != self.state {
            let from = self.state;
            ringbuf_entry!(self.trace, Trace::Transition(from, step.next));
            match step.next {
                DispatcherState::Idle => self.latched = None,
                DispatcherState::Ready if from == DispatcherState::Idle => {
                    self.conflict_seen = false;
                }
                _ => (),
            }
            self.state = step.next;
        }
    }

    /// Status record for Idle and Ready. Bit 0 of the status byte reports a
    /// finished zero sweep; bit 1 reports a priority-resolved conflict.
    pub fn record(&self, zero_done: bool) -> StatusRecord {
        let status = u8::from(zero_done) | u8::from(self.conflict_seen) << 1;
        StatusRecord::saturating(Context::Dispatcher, self.state as u8, status)
    }

    pub fn trace(&self) -> &Ringbuf<Trace, 64> {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_buffer_banks::BankError;
    use drv_ctrl_regs_api::{
        SELECT_APPLICATION, SELECT_DIAGNOSTICS, SELECT_LOADER,
    };

    fn quiet() -> ChildSignals {
        ChildSignals {
            diag_fault: None,
            diag_record: StatusRecord::saturating(Context::Diagnostics, 1, 0),
            loader_fault: None,
            loader_complete: false,
            loader_record: StatusRecord::saturating(Context::Loader, 0, 0),
        }
    }

    fn run() -> CommandWord {
        CommandWord::running()
    }

    fn advance(d: &mut Dispatcher, cmd: CommandWord, c: &ChildSignals) {
        let step = d.plan(cmd, c);
        d.commit(step);
    }

    /// A dispatcher sitting in Ready.
    fn ready(policy: SelectionPolicy) -> Dispatcher {
        let mut d = Dispatcher::new(policy, true);
        advance(&mut d, run(), &quiet());
        assert_eq!(d.state(), DispatcherState::Ready);
        d
    }

    fn enter(select: Selection) -> Dispatcher {
        let mut d = ready(SelectionPolicy::Priority);
        advance(&mut d, run().with_select(select), &quiet());
        d
    }

    #[test]
    fn idle_needs_all_three_run_bits() {
        for bits in 0..8u32 {
            let d = Dispatcher::new(SelectionPolicy::Priority, false);
            let step = d.plan(CommandWord::from_raw(bits), &quiet());
            let expect = if bits == 0b111 {
                DispatcherState::Ready
            } else {
                DispatcherState::Idle
            };
            assert_eq!(step.next(), expect, "run bits {bits:03b}");
        }
    }

    #[test]
    fn entering_ready_arms_sweep() {
        let d = Dispatcher::new(SelectionPolicy::Priority, true);
        assert!(d.plan(run(), &quiet()).start_sweep());
        let d = Dispatcher::new(SelectionPolicy::Priority, false);
        assert!(!d.plan(run(), &quiet()).start_sweep());
        let d = ready(SelectionPolicy::Priority);
        assert!(!d.plan(run(), &quiet()).start_sweep());
    }

    #[test]
    fn ready_selects() {
        for (select, state) in [
            (Selection::Application, DispatcherState::ApplicationActive),
            (Selection::Diagnostics, DispatcherState::DiagnosticsActive),
            (Selection::Loader, DispatcherState::LoaderActive),
            (Selection::SoftReset, DispatcherState::Idle),
            (Selection::None, DispatcherState::Ready),
        ] {
            assert_eq!(enter(select).state(), state, "{select:?}");
        }
    }

    #[test]
    fn held_return_blocks_selection() {
        let mut d = ready(SelectionPolicy::Priority);
        let cmd = run().with_select(Selection::Loader).with_return(true);
        advance(&mut d, cmd, &quiet());
        assert_eq!(d.state(), DispatcherState::Ready);
    }

    #[test]
    fn plan_is_pure() {
        let d = ready(SelectionPolicy::Priority);
        let cmd = run().with_select(Selection::Diagnostics);
        let a = d.plan(cmd, &quiet());
        let b = d.plan(cmd, &quiet());
        assert_eq!(a, b);
        assert_eq!(d.state(), DispatcherState::Ready);
    }

    #[test]
    fn priority_conflict() {
        let mut d = ready(SelectionPolicy::Priority);
        let bits = SELECT_LOADER | SELECT_DIAGNOSTICS;
        advance(&mut d, run().with_select_bits(bits), &quiet());
        assert_eq!(d.state(), DispatcherState::LoaderActive);
        assert!(d.conflict_seen());
        assert!(d.trace().contains(&Trace::SelectConflict(bits)));
    }

    #[test]
    fn strict_conflict_faults() {
        let mut d = ready(SelectionPolicy::Strict);
        let bits = SELECT_APPLICATION | SELECT_DIAGNOSTICS;
        advance(&mut d, run().with_select_bits(bits), &quiet());
        assert_eq!(d.state(), DispatcherState::Fault);
        let latched = d.latched().unwrap();
        assert_eq!(latched.fault, Fault::Selection { select: bits });
        assert_eq!(latched.record.context(), Context::Dispatcher);
        assert_eq!(latched.record.status(), bits);
    }

    #[test]
    fn child_faults_propagate() {
        let mut d = enter(Selection::Loader);
        let mut c = quiet();
        c.loader_fault =
            Some(LoaderFault::ChecksumMismatch { mismatched: 0b10 });
        advance(&mut d, run(), &c);
        assert_eq!(d.state(), DispatcherState::Fault);
        assert_eq!(
            d.latched().map(|l| l.fault),
            Some(Fault::Protocol { mismatched: 0b10 })
        );

        let mut d = enter(Selection::Diagnostics);
        let mut c = quiet();
        c.diag_fault = Some(DiagFault::Injected);
        advance(&mut d, run(), &c);
        assert_eq!(
            d.latched().map(|l| l.fault),
            Some(Fault::Subsystem {
                context: Context::Diagnostics,
                code: 0xfa
            })
        );
        assert_eq!(d.latched().unwrap().record, c.diag_record);
    }

    #[test]
    fn loader_return_needs_complete() {
        let mut d = enter(Selection::Loader);
        advance(&mut d, run().with_return(true), &quiet());
        assert_eq!(d.state(), DispatcherState::LoaderActive);
        assert!(d.trace().contains(&Trace::ReturnRefused));

        let mut c = quiet();
        c.loader_complete = true;
        advance(&mut d, run().with_return(true), &c);
        assert_eq!(d.state(), DispatcherState::Ready);
    }

    #[test]
    fn active_context_ignores_select() {
        let mut d = enter(Selection::Diagnostics);
        let cmd = run().with_select(Selection::SoftReset);
        advance(&mut d, cmd, &quiet());
        assert_eq!(d.state(), DispatcherState::DiagnosticsActive);
        advance(&mut d, run().with_return(true), &quiet());
        assert_eq!(d.state(), DispatcherState::Ready);
    }

    #[test]
    fn application_is_one_way() {
        let mut d = enter(Selection::Application);
        let mut c = quiet();
        c.diag_fault = Some(DiagFault::Injected);
        c.loader_complete = true;
        for cmd in [
            run().with_return(true),
            run().with_select(Selection::SoftReset),
            run(),
        ] {
            advance(&mut d, cmd, &c);
            assert_eq!(d.state(), DispatcherState::ApplicationActive);
        }
        advance(&mut d, CommandWord::default(), &c);
        assert_eq!(d.state(), DispatcherState::Idle);
    }

    #[test]
    fn fault_clears_only_on_run_loss() {
        let mut d = ready(SelectionPolicy::Strict);
        let bits = SELECT_LOADER | SELECT_APPLICATION;
        advance(&mut d, run().with_select_bits(bits), &quiet());
        advance(&mut d, run().with_return(true), &quiet());
        assert_eq!(d.state(), DispatcherState::Fault);

        advance(&mut d, CommandWord::default(), &quiet());
        assert_eq!(d.state(), DispatcherState::Idle);
        assert_eq!(d.latched(), None);
    }

    #[test]
    fn ready_record_bits() {
        let mut d = ready(SelectionPolicy::Priority);
        assert_eq!(d.record(false).status(), 0);
        assert_eq!(d.record(true).status(), 0b01);

        let bits = SELECT_LOADER | SELECT_DIAGNOSTICS;
        advance(&mut d, run().with_select_bits(bits), &quiet());
        let mut c = quiet();
        c.loader_complete = true;
        advance(&mut d, run().with_return(true), &c);
        assert_eq!(d.state(), DispatcherState::Ready);
        assert_eq!(d.record(true).status(), 0b11);

        // Cycling the RUN gate forgets the conflict.
        advance(&mut d, CommandWord::default(), &quiet());
        advance(&mut d, run(), &quiet());
        assert_eq!(d.record(false).status(), 0);
    }

    #[test]
    fn fault_codes() {
        assert_eq!(u16::from(Fault::Protocol { mismatched: 0b101 }), 0x1005);
        assert_eq!(u16::from(Fault::Selection { select: 0b0110 }), 0x2006);
        let f = Fault::from(LoaderFault::BadChannelCount(0));
        assert_eq!(u16::from(f), 0x3220);
    }

    #[test]
    fn loader_refusals_are_subsystem_faults() {
        let rejected = LoaderFault::WriteRejected(BankError::OutOfRange(4));
        let f = Fault::from(rejected);
        assert_eq!(
            f,
            Fault::Subsystem {
                context: Context::Loader,
                code: 0x30
            }
        );
        assert_eq!(u16::from(f), 0x3230);

        let f = Fault::from(LoaderFault::SetupDuringSweep);
        assert_eq!(u16::from(f), 0x3240);
    }

    #[test]
    fn held_soft_reset_cycles_through_idle() {
        let mut d = ready(SelectionPolicy::Priority);
        let cmd = run().with_select(Selection::SoftReset);
        for _ in 0..3 {
            advance(&mut d, cmd, &quiet());
            assert_eq!(d.state(), DispatcherState::Idle);

            let step = d.plan(cmd, &quiet());
            assert_eq!(step.next(), DispatcherState::Ready);
            assert!(step.start_sweep());
            d.commit(step);
        }
    }
}
