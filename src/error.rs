// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all radar-related errors. This should be the *only*
//! error enum that is publicly visible.
//!
//! Data-path anomalies never surface here: degraded pulses are counted
//! and logged where they happen. Only construction, wiring, lifecycle
//! and file I/O can fail loudly.

use thiserror::Error;

use crate::compress::CompressionError;
use crate::hardware::HardwareError;
use crate::iq::IqFileError;
use crate::sweep::netcdf::{SweepReadError, SweepWriteError};
use crate::waveform::WaveformError;

#[derive(Error, Debug)]
pub enum RadarError {
    /// Wiring or allocation problems at start.
    #[error("radar failed to start: {0}")]
    Start(String),

    /// Stop called on a radar that is already down.
    #[error("the radar has already been deactivated")]
    AlreadyDeactivated,

    /// A control command that could not be routed or parsed.
    #[error("command not understood: '{0}'")]
    BadCommand(String),

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error(transparent)]
    Waveform(#[from] WaveformError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    SweepWrite(#[from] SweepWriteError),

    #[error(transparent)]
    SweepRead(#[from] SweepReadError),

    #[error(transparent)]
    IqFile(#[from] IqFileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
