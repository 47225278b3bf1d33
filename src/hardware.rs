// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hardware capability traits.
//!
//! A radar talks to three pluggable drivers: the transceiver (pulse
//! producer), the pedestal (position producer) and a health relay. Each
//! is a capability with `init`, `exec` and `free`: `init` receives the
//! producer handle and spawns whatever threads the hardware needs,
//! `exec` takes a one-line text command and returns a one-line reply,
//! and `free` tears the hardware down. The radar stores the boxed
//! capability and drives its lifecycle from `go_live`/`stop`.

use std::sync::Arc;

use thiserror::Error;

use crate::radar::RadarCore;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("{0}")]
    Init(String),

    #[error("command '{0}' not understood")]
    BadCommand(String),

    #[error("hardware is not connected")]
    NotConnected,
}

pub trait Transceiver: Send {
    /// Connect and start producing pulses into the radar.
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError>;

    /// Text command in, one-line reply out. The common set: `w <name>`,
    /// `g <gates>`, `f <prf>[,<sprt>]`, `z <sleep>`, `stop`,
    /// `disconnect`.
    fn exec(&mut self, command: &str) -> Result<String, HardwareError>;

    /// Stop producing and release the hardware.
    fn free(&mut self);
}

pub trait Pedestal: Send {
    /// Connect and start producing positions into the radar.
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError>;

    /// Scan commands: `ppi <el> <speed>`, `rhi <az_range>`, `stop`.
    fn exec(&mut self, command: &str) -> Result<String, HardwareError>;

    fn free(&mut self);
}

pub trait HealthRelay: Send {
    /// Connect and start producing ~1 Hz health reports into the radar.
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError>;

    fn exec(&mut self, command: &str) -> Result<String, HardwareError>;

    fn free(&mut self);
}
