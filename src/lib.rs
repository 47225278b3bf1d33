// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Real-time signal-processing backbone for polarimetric weather
//! radars.
//!
//! Raw I/Q pulses and pedestal position fixes flow through a set of
//! lock-free ring buffers and four cooperating engines — pulse
//! compressor, position tagger, moment computer and sweep assembler —
//! emerging as calibrated base moments grouped into sweeps, with raw
//! I/Q and sweep products archived to disk along the way.

pub mod clock;
pub mod compress;
pub mod config;
pub mod constants;
pub(crate) mod error;
pub mod foundation;
pub mod hardware;
pub mod health;
pub mod iq;
pub mod moments;
pub mod playback;
pub mod position;
pub mod pulse;
pub mod radar;
pub mod ray;
pub mod sim;
pub mod sweep;
pub mod tagger;
pub mod waveform;

// Re-exports.
pub use config::{Config, ConfigBuilder, ConfigRing, ConfigUpdate, WaveformCalibration};
pub use error::RadarError;
pub use foundation::{Marker, PulseStatus, RayStatus};
pub use hardware::{HealthRelay, Pedestal, Transceiver};
pub use iq::{PulseFileReader, RawDataType};
pub use moments::MomentMethod;
pub use position::Position;
pub use pulse::Pulse;
pub use radar::{Radar, RadarCore, RadarDesc};
pub use ray::{Product, Ray, RaySnapshot};
pub use sweep::{FnSink, Sweep, SweepSink};
pub use waveform::{FilterAnchor, Waveform};
