// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Slowly-varying radar parameters.
//!
//! A [Config] is a full snapshot identified by a monotonic id. Updates
//! never mutate a published snapshot: a [ConfigBuilder] consumes the
//! previous one, applies a list of tagged [ConfigUpdate]s, and the ring
//! publishes the result under the one global config mutex. Pulses and
//! rays carry the id of the snapshot that was current when they were
//! produced, so a new config takes effect at the next ray boundary and
//! in-flight references never dangle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::info;

use crate::constants::MAX_FILTER_COUNT;
use crate::foundation::Marker;
use crate::waveform::FilterAnchor;

#[derive(Debug, Clone)]
pub struct Config {
    /// Monotonic snapshot id.
    pub i: u64,
    /// PRF \[Hz\]; the second entry is non-zero in dual-PRF operation.
    pub prf: [u32; 2],
    /// Staggered-PRT ratio numerator: 2 for 2:3, 3 for 3:4, 0 when off.
    pub sprt: u32,
    /// Transmit pulse width \[s\].
    pub pulse_width: f32,
    pub gate_count: u32,
    /// Name of the active waveform; keys the compressor's filter bank.
    pub waveform: String,
    pub filter_anchors: Vec<FilterAnchor>,
    /// Per-polarization noise power \[ADU^2\].
    pub noise: [f32; 2],
    pub system_z_cal: [f32; 2],
    pub system_d_cal: f32,
    pub system_p_cal: f32,
    /// Per-filter Z calibration \[H, V\] \[dB\].
    pub z_cal: [[f32; 2]; MAX_FILTER_COUNT],
    /// Per-filter differential-reflectivity calibration \[dB\].
    pub d_cal: [f32; MAX_FILTER_COUNT],
    /// Per-filter differential-phase calibration \[rad\].
    pub p_cal: [f32; MAX_FILTER_COUNT],
    /// Gates below this SNR \[dB\] are censored.
    pub snr_threshold: f32,
    /// Gates below this signal quality index are censored.
    pub sqi_threshold: f32,
    pub sweep_elevation: f32,
    pub sweep_azimuth: f32,
    pub start_marker: Marker,
    pub vcp_definition: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            i: 0,
            prf: [1000, 0],
            sprt: 0,
            pulse_width: 1.0e-6,
            gate_count: 0,
            waveform: String::new(),
            filter_anchors: Vec::new(),
            noise: [1.0, 1.0],
            system_z_cal: [0.0, 0.0],
            system_d_cal: 0.0,
            system_p_cal: 0.0,
            z_cal: [[0.0; 2]; MAX_FILTER_COUNT],
            d_cal: [0.0; MAX_FILTER_COUNT],
            p_cal: [0.0; MAX_FILTER_COUNT],
            snr_threshold: -120.0,
            sqi_threshold: 0.0,
            sweep_elevation: 0.0,
            sweep_azimuth: 0.0,
            start_marker: Marker::empty(),
            vcp_definition: String::new(),
        }
    }
}

impl Config {
    /// Base pulse repetition time \[s\].
    pub fn prt(&self) -> f64 {
        if self.prf[0] == 0 {
            0.0
        } else {
            1.0 / self.prf[0] as f64
        }
    }
}

/// Waveform-specific calibration constants, replacing the system-wide
/// values while that waveform is active.
#[derive(Debug, Clone, Default)]
pub struct WaveformCalibration {
    pub name: String,
    pub z_cal: Vec<[f32; 2]>,
    pub d_cal: Vec<f32>,
    pub p_cal: Vec<f32>,
}

/// A tagged update against the previous snapshot.
#[derive(Debug, Clone)]
pub enum ConfigUpdate {
    Prf(u32),
    DualPrf(u32, u32),
    StaggeredPrt(u32, u32),
    PulseWidth(f32),
    GateCount(u32),
    Waveform {
        name: String,
        anchors: Vec<FilterAnchor>,
    },
    Noise(f32, f32),
    SystemZCal(f32, f32),
    SystemDCal(f32),
    SystemPCal(f32),
    ZCal(usize, [f32; 2]),
    DCal(usize, f32),
    PCal(usize, f32),
    WaveformCalibration(WaveformCalibration),
    SnrThreshold(f32),
    SqiThreshold(f32),
    SweepElevation(f32),
    SweepAzimuth(f32),
    PositionMarker(Marker),
    VcpDefinition(String),
}

/// Builds the next snapshot from the previous one plus tagged updates.
pub struct ConfigBuilder {
    next: Config,
}

impl ConfigBuilder {
    pub fn from_previous(previous: &Config) -> ConfigBuilder {
        ConfigBuilder {
            next: previous.clone(),
        }
    }

    pub fn apply(mut self, update: ConfigUpdate) -> ConfigBuilder {
        let c = &mut self.next;
        match update {
            ConfigUpdate::Prf(prf) => {
                c.prf = [prf, 0];
                c.sprt = 0;
                info!("<ParameterKeeper> PRF = {} Hz", prf);
            }
            ConfigUpdate::DualPrf(prf0, prf1) => {
                c.prf = [prf0, prf1];
                info!("<ParameterKeeper> Dual PRF = {} / {} Hz", prf0, prf1);
            }
            ConfigUpdate::StaggeredPrt(prf, sprt) => {
                c.prf = [prf, 0];
                c.sprt = sprt;
                info!("<ParameterKeeper> PRF = {} Hz ({}:{})", prf, sprt, sprt + 1);
            }
            ConfigUpdate::PulseWidth(pw) => c.pulse_width = pw,
            ConfigUpdate::GateCount(n) => {
                c.gate_count = n;
                info!("<ParameterKeeper> GateCount = {}", n);
            }
            ConfigUpdate::Waveform { name, anchors } => {
                info!(
                    "<ParameterKeeper> Waveform = '{}' ({} filters)",
                    name,
                    anchors.len()
                );
                c.waveform = name;
                c.filter_anchors = anchors;
            }
            ConfigUpdate::Noise(h, v) => {
                c.noise = [h, v];
                info!("<ParameterKeeper> Noise = {:.2} {:.2} ADU^2", h, v);
            }
            ConfigUpdate::SystemZCal(h, v) => {
                c.system_z_cal = [h, v];
                info!("<ParameterKeeper> SystemZCal = {:.2} {:.2} dB", h, v);
            }
            ConfigUpdate::SystemDCal(d) => c.system_d_cal = d,
            ConfigUpdate::SystemPCal(p) => c.system_p_cal = p,
            ConfigUpdate::ZCal(k, zcal) => {
                if k < MAX_FILTER_COUNT {
                    c.z_cal[k] = zcal;
                    info!(
                        "<ParameterKeeper> ZCal[{}] = ({:.2}, {:.2}) dB",
                        k, zcal[0], zcal[1]
                    );
                }
            }
            ConfigUpdate::DCal(k, dcal) => {
                if k < MAX_FILTER_COUNT {
                    c.d_cal[k] = dcal;
                }
            }
            ConfigUpdate::PCal(k, pcal) => {
                if k < MAX_FILTER_COUNT {
                    c.p_cal[k] = pcal;
                }
            }
            ConfigUpdate::WaveformCalibration(cal) => {
                for (k, zcal) in cal.z_cal.iter().take(MAX_FILTER_COUNT).enumerate() {
                    c.z_cal[k] = *zcal;
                }
                for (k, dcal) in cal.d_cal.iter().take(MAX_FILTER_COUNT).enumerate() {
                    c.d_cal[k] = *dcal;
                }
                for (k, pcal) in cal.p_cal.iter().take(MAX_FILTER_COUNT).enumerate() {
                    c.p_cal[k] = *pcal;
                }
                info!("<ParameterKeeper> Waveform calibration '{}'", cal.name);
            }
            ConfigUpdate::SnrThreshold(snr) => {
                c.snr_threshold = snr;
                info!("<ParameterKeeper> SNRThreshold = {:.2} dB", snr);
            }
            ConfigUpdate::SqiThreshold(sqi) => c.sqi_threshold = sqi,
            ConfigUpdate::SweepElevation(el) => c.sweep_elevation = el,
            ConfigUpdate::SweepAzimuth(az) => c.sweep_azimuth = az,
            ConfigUpdate::PositionMarker(marker) => {
                c.start_marker = marker;
                info!(
                    "<ParameterKeeper> New sweep   EL {:.2}   AZ {:.2}   {}",
                    c.sweep_elevation,
                    c.sweep_azimuth,
                    if marker.is_ppi() {
                        "PPI"
                    } else if marker.is_rhi() {
                        "RHI"
                    } else {
                        "UNK"
                    }
                );
            }
            ConfigUpdate::VcpDefinition(vcp) => c.vcp_definition = vcp,
        }
        self
    }

    pub fn build(self) -> Config {
        self.next
    }
}

/// The append-only config ring. Snapshots are handed out as [Arc]s so
/// publishing a new one never invalidates what a worker is reading.
pub struct ConfigRing {
    depth: usize,
    latest_id: AtomicU64,
    inner: Mutex<VecDeque<Arc<Config>>>,
}

impl ConfigRing {
    pub fn new(depth: usize) -> ConfigRing {
        let mut ring = VecDeque::with_capacity(depth);
        ring.push_back(Arc::new(Config::default()));
        ConfigRing {
            depth,
            latest_id: AtomicU64::new(0),
            inner: Mutex::new(ring),
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Id of the current snapshot, readable without a lock; pulse
    /// producers stamp this onto every vacant pulse.
    pub fn latest_id(&self) -> u64 {
        self.latest_id.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Arc<Config> {
        let ring = self.inner.lock().unwrap();
        Arc::clone(ring.back().expect("config ring is never empty"))
    }

    /// Look a snapshot up by its monotonic id. Returns None once the
    /// ring has wrapped past it.
    pub fn get(&self, id: u64) -> Option<Arc<Config>> {
        let ring = self.inner.lock().unwrap();
        ring.iter().rev().find(|c| c.i == id).map(Arc::clone)
    }

    /// Apply tagged updates to the latest snapshot and publish the
    /// result. Appends are serialized by the internal mutex.
    pub fn advance(&self, updates: impl IntoIterator<Item = ConfigUpdate>) -> Arc<Config> {
        let mut ring = self.inner.lock().unwrap();
        let previous = ring.back().expect("config ring is never empty");
        let mut builder = ConfigBuilder::from_previous(previous);
        for update in updates {
            builder = builder.apply(update);
        }
        let mut next = builder.build();
        next.i = previous.i + 1;
        let next = Arc::new(next);
        if ring.len() == self.depth {
            ring.pop_front();
        }
        ring.push_back(Arc::clone(&next));
        self.latest_id.store(next.i, Ordering::Release);
        next
    }
}
