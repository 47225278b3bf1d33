// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The moment engine: turns contiguous groups of ready pulses into rays
//! of base moments.
//!
//! A gathering thread walks the pulse ring in production order, computes
//! a beam-bin index for every pulse, and closes a group whenever the bin
//! changes or the group hits its pulse budget. Closed groups go to a
//! fixed pool of workers round-robin; each worker owns one [Scratch] and
//! writes into the ray slot the gatherer vended, so rays appear in the
//! ray ring in exactly the order their pulses were produced even when
//! workers finish out of order.

mod multilag;
mod pulse_pair;
pub(crate) mod scratch;

pub use scratch::Scratch;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use num_complex::Complex32;

use crate::config::{Config, ConfigRing};
use crate::constants::MAX_PULSES_PER_RAY;
use crate::foundation::{EngineState, Marker, Ring};
use crate::pulse::{Pulse, PulseHeader, PulseSlotExt, PulseStatus};
use crate::ray::{Product, Ray, RaySlotExt, RayStatus};

// Shared by the estimator submodules.
pub(crate) use decimate::{decimate_mean_c32, decimate_mean_f32};
// The playback path runs the same estimators over archived pulses.
pub(crate) use multilag::estimate as multilag_estimate;
pub(crate) use pulse_pair::estimate as pulse_pair_estimate;

/// Which estimator the workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentMethod {
    PulsePair,
    PulsePairHop,
    /// Multi-lag with 2..=5 lags.
    MultiLag(usize),
}

impl Default for MomentMethod {
    fn default() -> Self {
        MomentMethod::PulsePairHop
    }
}

/// A borrowed view of one pulse, handed to the estimators.
pub(crate) struct PulseView<'a> {
    pub header: &'a PulseHeader,
    pub h: &'a [Complex32],
    pub v: &'a [Complex32],
}

mod decimate {
    use num_complex::Complex32;

    /// Block-average `src` by `ratio` into the first `gates` of `dst`.
    pub(crate) fn decimate_mean_f32(src: &[f32], dst: &mut [f32], ratio: usize, gates: usize) {
        for g in 0..gates {
            let begin = g * ratio;
            let end = (begin + ratio).min(src.len());
            let sum: f32 = src[begin..end].iter().sum();
            dst[g] = sum / (end - begin) as f32;
        }
    }

    pub(crate) fn decimate_mean_c32(
        src: &[Complex32],
        dst: &mut [Complex32],
        ratio: usize,
        gates: usize,
    ) {
        for g in 0..gates {
            let begin = g * ratio;
            let end = (begin + ratio).min(src.len());
            let sum: Complex32 = src[begin..end].iter().sum();
            dst[g] = sum / (end - begin) as f32;
        }
    }
}

/// Fill the scratch lag accumulators from a pulse group. Lags are
/// normalized by the number of pairs so a constant series yields
/// `|R(l)| = S` at every lag.
pub(crate) fn accumulate(scratch: &mut Scratch, pulses: &[PulseView], max_lag: usize) {
    let n = pulses.len();
    let gates = pulses
        .iter()
        .map(|p| p.h.len().min(p.v.len()))
        .min()
        .unwrap_or(0)
        .min(scratch.pulse_gate_count);
    scratch.pulse_gate_count = gates;
    scratch.clear_accumulators();

    for p in pulses {
        for g in 0..gates {
            scratch.s0[0][g] += p.h[g].norm_sqr();
            scratch.s0[1][g] += p.v[g].norm_sqr();
            scratch.cross[g] += p.h[g].conj() * p.v[g];
        }
    }
    let scale = 1.0 / n as f32;
    for g in 0..gates {
        scratch.s0[0][g] *= scale;
        scratch.s0[1][g] *= scale;
        scratch.cross[g] *= scale;
    }

    for lag in 1..=max_lag.min(n - 1) {
        let pairs = (n - lag) as f32;
        for k in 0..n - lag {
            let (early, late) = (&pulses[k], &pulses[k + lag]);
            for g in 0..gates {
                scratch.lags[0][lag][g] += early.h[g].conj() * late.h[g];
                scratch.lags[1][lag][g] += early.v[g].conj() * late.v[g];
            }
        }
        for g in 0..gates {
            scratch.lags[0][lag][g] /= pairs;
            scratch.lags[1][lag][g] /= pairs;
        }
    }
}

/// Derive the product planes from the scratch primitives and stamp the
/// ray header. `first`/`last` bracket the pulse group.
pub(crate) fn populate_ray(
    scratch: &Scratch,
    first: &PulseHeader,
    last: &PulseHeader,
    marker: Marker,
    pulse_count: usize,
    config: &Config,
    ray: &mut Ray,
) {
    let gates = scratch.gate_count.min(ray.capacity());

    ray.header.marker = marker;
    ray.header.start_time_sec = first.time_sec;
    ray.header.start_time_usec = first.time_usec;
    ray.header.start_time_double = first.time_double;
    ray.header.end_time_sec = last.time_sec;
    ray.header.end_time_usec = last.time_usec;
    ray.header.end_time_double = last.time_double;
    ray.header.start_azimuth = first.azimuth_degrees;
    ray.header.end_azimuth = last.azimuth_degrees;
    ray.header.start_elevation = first.elevation_degrees;
    ray.header.end_elevation = last.elevation_degrees;
    ray.header.sweep_azimuth = config.sweep_azimuth;
    ray.header.sweep_elevation = config.sweep_elevation;
    ray.header.gate_count = gates as u32;
    ray.header.gate_size_meters = scratch.gate_size_meters;
    ray.header.config_id = last.config_id;
    ray.header.pulse_count = pulse_count as u32;

    for g in 0..gates {
        let sh_db = 10.0 * scratch.sh[g].log10();
        let sv_db = 10.0 * scratch.sv[g].log10();
        let censored =
            scratch.snr_h_db[g] < scratch.snr_threshold_db || scratch.sqi[g] < scratch.sqi_threshold;

        // The power products need no phase coherence; they survive the
        // censor along with Z and S.
        ray.product_mut(Product::S)[g] = sh_db;
        ray.product_mut(Product::Z)[g] = sh_db + scratch.range_correction[0][g];
        ray.product_mut(Product::D)[g] = sh_db - sv_db
            + scratch.range_correction[0][g]
            - scratch.range_correction[1][g]
            + scratch.dcal[g];

        if censored {
            ray.product_mut(Product::V)[g] = f32::NAN;
            ray.product_mut(Product::W)[g] = f32::NAN;
            ray.product_mut(Product::P)[g] = f32::NAN;
            ray.product_mut(Product::R)[g] = f32::NAN;
        } else {
            ray.product_mut(Product::V)[g] = scratch.velocity[g];
            ray.product_mut(Product::W)[g] = scratch.width[g];
            ray.product_mut(Product::P)[g] =
                scratch::wrap_phase(scratch.cross_ray[g].arg() + scratch.pcal[g]);
            ray.product_mut(Product::R)[g] =
                scratch.cross_ray[g].norm() / (scratch.sh[g] * scratch.sv[g]).sqrt().max(f32::MIN_POSITIVE);
        }
    }

    // KDP is the half range-derivative of the differential phase; a
    // censored neighbour censors the gate.
    let kdp_scale = 0.25 * scratch.kdp_factor;
    for g in 0..gates {
        let lo = g.saturating_sub(1);
        let hi = (g + 1).min(gates.saturating_sub(1));
        let p_lo = ray.product(Product::P)[lo];
        let p_hi = ray.product(Product::P)[hi];
        let span = (hi - lo).max(1) as f32;
        let k = if p_lo.is_finite() && p_hi.is_finite() {
            scratch::wrap_phase(p_hi - p_lo) * kdp_scale * 2.0 / span
        } else {
            f32::NAN
        };
        ray.product_mut(Product::K)[g] = k;
    }

    ray.header.product_list = Product::Z.bit()
        | Product::V.bit()
        | Product::W.bit()
        | Product::D.bit()
        | Product::P.bit()
        | Product::R.bit()
        | Product::K.bit()
        | Product::S.bit();
}

/// The PPI/RHI/volume beam-bin index of a pulse.
pub(crate) fn bin_index(scan: Marker, azimuth: f32, elevation: f32) -> i64 {
    if scan.is_ppi() {
        azimuth.floor() as i64
    } else if scan.is_rhi() {
        elevation.floor() as i64
    } else {
        360 * (elevation - 0.25).floor() as i64 + azimuth.floor() as i64
    }
}

struct Job {
    ray_count: u64,
    origin: u64,
    count: usize,
    marker: Marker,
}

#[derive(Default)]
pub struct MomentStats {
    pub almost_full: AtomicU32,
    pub suppressed_groups: AtomicU64,
    pub processed_groups: AtomicU64,
}

/// Construction parameters; everything an engine needs to know about the
/// radar, by value.
#[derive(Debug, Clone)]
pub struct MomentEngineDesc {
    pub wavelength: f32,
    pub pulse_to_ray_ratio: usize,
    pub pulse_capacity: usize,
    pub core_count: usize,
    pub method: MomentMethod,
}

pub struct MomentEngine {
    name: String,
    desc: MomentEngineDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    rays: Arc<Ring<Ray>>,
    state: EngineState,
    active: Arc<AtomicBool>,
    stats: Arc<MomentStats>,
    gatherer: Option<JoinHandle<()>>,
}

impl MomentEngine {
    pub fn new(
        desc: MomentEngineDesc,
        configs: Arc<ConfigRing>,
        pulses: Arc<Ring<Pulse>>,
        rays: Arc<Ring<Ray>>,
    ) -> MomentEngine {
        MomentEngine {
            name: "<MomentEngine>".to_string(),
            desc,
            configs,
            pulses,
            rays,
            state: EngineState::Allocated,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(MomentStats::default()),
            gatherer: None,
        }
    }

    pub fn set_method(&mut self, method: MomentMethod) {
        self.desc.method = method;
    }

    pub fn set_core_count(&mut self, count: usize) {
        if self.state == EngineState::Active {
            warn!("{} core count cannot change while active", self.name);
            return;
        }
        self.desc.core_count = count.max(1);
    }

    pub fn stats(&self) -> &MomentStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Activating;
        self.active.store(true, Ordering::Release);
        let worker_count = self.desc.core_count.max(1);
        info!("{} starting {} workers", self.name, worker_count);

        let gatherer = Gatherer {
            name: self.name.clone(),
            desc: self.desc.clone(),
            configs: Arc::clone(&self.configs),
            pulses: Arc::clone(&self.pulses),
            rays: Arc::clone(&self.rays),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };
        self.gatherer = Some(
            thread::Builder::new()
                .name("moment-gatherer".to_string())
                .spawn(move || gatherer.run())
                .expect("failed to spawn the moment gatherer"),
        );
        self.state = EngineState::Active;
    }

    pub fn stop(&mut self) -> bool {
        if self.state != EngineState::Active {
            debug!("{} already deactivated", self.name);
            return false;
        }
        self.state = EngineState::Deactivating;
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.gatherer.take() {
            let _ = handle.join();
        }
        self.state = EngineState::Allocated;
        info!("{} stopped", self.name);
        true
    }
}

impl Drop for MomentEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Gatherer {
    name: String,
    desc: MomentEngineDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    rays: Arc<Ring<Ray>>,
    active: Arc<AtomicBool>,
    stats: Arc<MomentStats>,
}

impl Gatherer {
    fn run(self) {
        let worker_count = self.desc.core_count.max(1);
        let mut senders: Vec<Sender<Job>> = Vec::with_capacity(worker_count);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);
        let pulse_capacity = self.desc.pulse_capacity;
        for c in 0..worker_count {
            let (tx, rx) = unbounded::<Job>();
            senders.push(tx);
            let worker = Worker {
                id: c,
                desc: self.desc.clone(),
                configs: Arc::clone(&self.configs),
                pulses: Arc::clone(&self.pulses),
                rays: Arc::clone(&self.rays),
                active: Arc::clone(&self.active),
                stats: Arc::clone(&self.stats),
                scratch: Scratch::with_capacity(pulse_capacity),
            };
            handles.push(
                thread::Builder::new()
                    .name(format!("moment-core-{c}"))
                    .spawn(move || worker.run(rx))
                    .expect("failed to spawn a moment core"),
            );
        }

        let mut k: u64 = 0;
        let mut origin: u64 = 0;
        let mut live_in_group: usize = 0;
        let mut marker_union = Marker::empty();
        let mut previous_bin: Option<i64> = None;
        let mut next_worker = 0usize;
        let mut warned_full = false;
        let mut config: Arc<Config> = self.configs.latest();

        debug!("{} gatherer started", self.name);
        'outer: while self.active.load(Ordering::Acquire) {
            while k >= self.pulses.head() {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }
            let slot = self.pulses.slot_at(k);
            while !slot.has_pulse_status(PulseStatus::READY) {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }

            // Reading the header is safe: READY means every upstream
            // stage has published its writes.
            let header = unsafe { &slot.get().header };
            if slot.has_pulse_status(PulseStatus::DISCARDED) {
                slot.or_pulse_status(PulseStatus::PROCESSED);
                k += 1;
                continue;
            }
            if header.config_id != config.i {
                if let Some(c) = self.configs.get(header.config_id) {
                    config = c;
                }
            }

            let bin = bin_index(
                config.start_marker.scan_type(),
                header.azimuth_degrees,
                header.elevation_degrees,
            );
            let boundary = match previous_bin {
                Some(previous) => previous != bin || live_in_group >= MAX_PULSES_PER_RAY,
                None => false,
            };

            if boundary {
                let count = (k - origin + 1) as usize;
                if self.pulses.lag(origin) > 0.9 {
                    self.stats.almost_full.fetch_add(1, Ordering::Relaxed);
                    if !warned_full {
                        warn!("{} pulse ring almost full", self.name);
                        warned_full = true;
                    }
                } else {
                    warned_full = false;
                }

                if live_in_group >= 3 {
                    let (ray_count, _) = self.rays.get_vacant();
                    let job = Job {
                        ray_count,
                        origin,
                        count,
                        marker: marker_union,
                    };
                    if senders[next_worker].send(job).is_err() {
                        error!("{} worker {} is gone", self.name, next_worker);
                        break;
                    }
                    next_worker = (next_worker + 1) % worker_count;
                } else {
                    // Fewer than three pulses: no ray.
                    self.stats.suppressed_groups.fetch_add(1, Ordering::Relaxed);
                }
                origin = k;
                live_in_group = 0;
                marker_union = Marker::empty();
            }

            previous_bin = Some(bin);
            live_in_group += 1;
            marker_union |= header.marker;
            k += 1;
        }

        drop(senders);
        for handle in handles {
            let _ = handle.join();
        }
        debug!("{} gatherer ended", self.name);
    }
}

struct Worker {
    id: usize,
    desc: MomentEngineDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    rays: Arc<Ring<Ray>>,
    active: Arc<AtomicBool>,
    stats: Arc<MomentStats>,
    scratch: Scratch,
}

impl Worker {
    fn run(mut self, jobs: Receiver<Job>) {
        debug!("moment core {} started", self.id);
        while let Ok(job) = jobs.recv() {
            self.process(job);
        }
        debug!("moment core {} ended", self.id);
    }

    fn process(&mut self, job: Job) {
        // Collect the group, skipping pulses the tagger discarded.
        let mut views: Vec<PulseView> = Vec::with_capacity(job.count);
        for count in job.origin..job.origin + job.count as u64 {
            let slot = self.pulses.slot_at(count);
            if slot.has_pulse_status(PulseStatus::DISCARDED) {
                continue;
            }
            if !slot.has_pulse_status(PulseStatus::COMPRESSED | PulseStatus::HAS_POSITION) {
                // A READY pulse without both upstream bits is a pipeline
                // bug, not an operating anomaly.
                error!(
                    "moment core {}: pulse {} reached the moment engine uncompressed or untagged",
                    self.id,
                    slot.id()
                );
                self.active.store(false, Ordering::Release);
                return;
            }
            let pulse: &Pulse = unsafe { slot.get() };
            views.push(PulseView {
                header: &pulse.header,
                h: pulse.channel(0),
                v: pulse.channel(1),
            });
        }
        if views.len() < 3 {
            // The gatherer filters these before vending a ray slot, but
            // the slot it vended must still be published or the sweep
            // gatherer stalls behind it.
            warn!("moment core {}: {} usable pulses, no moments", self.id, views.len());
            self.stats.suppressed_groups.fetch_add(1, Ordering::Relaxed);
            drop(views);
            let ray_slot = self.rays.slot_at(job.ray_count);
            {
                let ray: &mut Ray = unsafe { ray_slot.get_mut() };
                ray.header.gate_count = 0;
                ray.header.product_list = 0;
                ray.header.marker = job.marker;
                ray.header.i = ray_slot.id();
            }
            ray_slot.or_ray_status(RayStatus::PROCESSED | RayStatus::READY);
            return;
        }

        let last = views[views.len() - 1].header;
        let first = views[0].header;
        let config = self
            .configs
            .get(last.config_id)
            .unwrap_or_else(|| self.configs.latest());

        // Re-key the calibration tables when the config or geometry moved.
        if self.scratch.config_id != config.i
            || self.scratch.pulse_gate_count != last.gate_count as usize
        {
            self.scratch.prepare(
                &config,
                self.desc.wavelength,
                self.desc.pulse_to_ray_ratio,
                last.gate_count as usize,
                last.gate_size_meters,
            );
        }
        // `accumulate` trims to the shortest pulse; restore afterwards.
        let prepared_gates = self.scratch.pulse_gate_count;

        let (max_lag, estimator_lag) = match self.desc.method {
            MomentMethod::PulsePair => (1, 1),
            MomentMethod::PulsePairHop => (2, 2),
            MomentMethod::MultiLag(l) => (l.clamp(2, scratch::MAX_LAG), 0),
        };
        accumulate(&mut self.scratch, &views, max_lag.min(views.len() - 1));
        match self.desc.method {
            MomentMethod::PulsePair | MomentMethod::PulsePairHop => {
                let lag = estimator_lag.min(views.len() - 1).max(1);
                pulse_pair::estimate(&mut self.scratch, views.len(), lag);
            }
            MomentMethod::MultiLag(l) => {
                multilag::estimate(&mut self.scratch, views.len(), l);
            }
        }

        let pulse_count = views.len();
        let marker = job.marker | config.start_marker.scan_type();
        let first = *first;
        let last = *last;
        drop(views);

        let ray_slot = self.rays.slot_at(job.ray_count);
        {
            // The gatherer vended this slot to us alone.
            let ray: &mut Ray = unsafe { ray_slot.get_mut() };
            populate_ray(
                &self.scratch,
                &first,
                &last,
                marker,
                pulse_count,
                &config,
                ray,
            );
            ray.header.i = ray_slot.id();
        }
        ray_slot.or_ray_status(RayStatus::PROCESSED | RayStatus::READY);
        self.scratch.pulse_gate_count = prepared_gates;

        // The bin's own pulses are done; the shared boundary pulse still
        // belongs to the next group.
        for count in job.origin..job.origin + job.count as u64 - 1 {
            self.pulses
                .slot_at(count)
                .or_pulse_status(PulseStatus::PROCESSED);
        }
        self.stats.processed_groups.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::config::{ConfigBuilder, ConfigUpdate};
    use crate::waveform::Waveform;

    #[test]
    fn bin_index_follows_scan_geometry() {
        assert_eq!(bin_index(Marker::PPI_SCAN, 45.3, 3.0), 45);
        assert_eq!(bin_index(Marker::RHI_SCAN, 45.3, 3.2), 3);
        // Volume scans tile elevation rows of 360 azimuth bins.
        assert_eq!(bin_index(Marker::empty(), 10.5, 1.5), 360 + 10);
    }

    #[test]
    fn impulse_group_puts_all_power_in_gate_zero() {
        let wf = Waveform::impulse();
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0e-6, 1.0e-6))
            .apply(ConfigUpdate::SystemZCal(-43.0, -43.0))
            .apply(ConfigUpdate::ZCal(0, [1.25, 1.25]))
            .apply(ConfigUpdate::Waveform {
                name: wf.name.clone(),
                anchors: wf.anchors(),
            })
            .build();

        let mut scratch = Scratch::with_capacity(16);
        scratch.prepare(&config, 0.03, 1, 10, 150.0);

        let mut h = vec![Complex32::default(); 10];
        h[0] = Complex32::new(1.0, 0.0);
        let v = h.clone();
        let header = PulseHeader {
            gate_count: 10,
            azimuth_degrees: 45.3,
            gate_size_meters: 150.0,
            ..Default::default()
        };
        let views: Vec<PulseView> = (0..10)
            .map(|_| PulseView {
                header: &header,
                h: &h,
                v: &v,
            })
            .collect();

        accumulate(&mut scratch, &views, 1);
        pulse_pair::estimate(&mut scratch, views.len(), 1);

        let mut ray = Ray::with_capacity(16);
        populate_ray(&scratch, &header, &header, Marker::PPI_SCAN, 10, &config, &mut ray);

        assert_eq!(ray.header.gate_count, 10);
        let sampling = 10.0 * (150.0f32 / 150.0).log10() + 60.0;
        // Gate zero carries the calibrated signal; the range term is nil.
        assert_abs_diff_eq!(
            ray.product(Product::Z)[0],
            -43.0 + 1.25 - sampling,
            epsilon = 1e-2
        );
        // Every other gate is essentially noise.
        assert!(ray.product(Product::Z)[5] < ray.product(Product::Z)[0] - 40.0);
        // Equal channels: differential reflectivity vanishes.
        assert_abs_diff_eq!(ray.product(Product::D)[0], 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(ray.product(Product::R)[0], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn censoring_is_consistent_across_products() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0, 1.0))
            .apply(ConfigUpdate::SnrThreshold(3.0))
            .build();
        let mut scratch = Scratch::with_capacity(8);
        scratch.prepare(&config, 0.03, 1, 8, 150.0);

        // Strong signal in gate 0, nothing anywhere else.
        let mut h = vec![Complex32::default(); 8];
        h[0] = Complex32::new(30.0, 0.0);
        let v = h.clone();
        let header = PulseHeader {
            gate_count: 8,
            ..Default::default()
        };
        let views: Vec<PulseView> = (0..8)
            .map(|_| PulseView {
                header: &header,
                h: &h,
                v: &v,
            })
            .collect();
        accumulate(&mut scratch, &views, 1);
        pulse_pair::estimate(&mut scratch, views.len(), 1);

        let mut ray = Ray::with_capacity(8);
        populate_ray(&scratch, &header, &header, Marker::PPI_SCAN, 8, &config, &mut ray);

        assert!(ray.product(Product::V)[0].is_finite());
        for g in 2..8 {
            // Below threshold: the whole censored set goes missing
            // together.
            assert!(ray.product(Product::V)[g].is_nan());
            assert!(ray.product(Product::W)[g].is_nan());
            assert!(ray.product(Product::P)[g].is_nan());
            assert!(ray.product(Product::R)[g].is_nan());
            assert!(ray.product(Product::K)[g].is_nan());
            // The power products remain.
            assert!(ray.product(Product::Z)[g].is_finite());
            assert!(ray.product(Product::S)[g].is_finite());
            assert!(ray.product(Product::D)[g].is_finite());
        }
    }
}
