// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Boot-time control plane of the instrument.
//!
//! The [`Dispatcher`] decides which context owns the device: diagnostics, the
//! bulk loader, or (irrevocably) the application. [`Instrument`] wires it to
//! the children, the buffer banks, and the status channel, and steps them all
//! together one tick at a time.

mod config;
mod dispatch;
mod instrument;
mod payload;

pub use config::DeviceConfig;
pub use dispatch::{
    ChildSignals, Dispatcher, DispatcherState, Fault, LatchedFault,
    SelectionPolicy, Step, Trace as DispatchTrace,
};
pub use instrument::{Instrument, Outputs, Trace as InstrumentTrace};
pub use payload::{Parked, Payload, PayloadStatus};
