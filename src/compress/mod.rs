// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The pulse-compression engine.
//!
//! Raw pulses are matched-filtered in place: each worker correlates the
//! H and V channels with the conjugate replica of the transmit waveform,
//! normalized to unit filter energy, and writes the result back into the
//! same slot. Pulses are dispatched round-robin by arrival order; a
//! waveform the engine has never been given passes through untouched
//! with a one-time warning, so a mis-keyed config degrades the data, not
//! the pipeline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use thiserror::Error;

use crate::config::ConfigRing;
use crate::constants::WORKER_DUTY_CYCLE_WINDOW;
use crate::foundation::{EngineState, Ring};
use crate::pulse::{Pulse, PulseSlotExt, PulseStatus, CHANNEL_COUNT};
use crate::waveform::{Waveform, WaveformType};

/// Filters longer than this run through the FFT overlap-save path.
const FIR_LENGTH_THRESHOLD: usize = 36;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("waveform '{0}' carries a zero-length filter")]
    ZeroLengthFilter(String),
}

/// Rolling busy-over-total estimator across a fixed window.
pub(crate) struct DutyCycle {
    busy: Vec<f64>,
    full: Vec<f64>,
    index: usize,
    busy_sum: f64,
    full_sum: f64,
}

impl DutyCycle {
    pub(crate) fn new() -> DutyCycle {
        DutyCycle {
            busy: vec![0.0; WORKER_DUTY_CYCLE_WINDOW],
            full: vec![0.0; WORKER_DUTY_CYCLE_WINDOW],
            index: 0,
            busy_sum: 0.0,
            full_sum: 0.0,
        }
    }

    pub(crate) fn absorb(&mut self, busy: f64, full: f64) -> f64 {
        self.busy_sum += busy - self.busy[self.index];
        self.full_sum += full - self.full[self.index];
        self.busy[self.index] = busy;
        self.full[self.index] = full;
        self.index = (self.index + 1) % self.busy.len();
        if self.full_sum > 0.0 {
            self.busy_sum / self.full_sum
        } else {
            0.0
        }
    }
}

/// One filter group, ready to run: conjugate taps at unit energy, plus
/// the FFT machinery when the filter is long enough to warrant it.
struct PreparedGroup {
    input_origin: usize,
    output_origin: usize,
    max_data_length: usize,
    /// Conjugated, energy-normalized taps in transmit order.
    taps: Vec<Complex32>,
    fft: Option<FftFilter>,
}

struct FftFilter {
    n: usize,
    step: usize,
    /// FFT of the time-reversed conjugate taps, zero-padded to `n`.
    h: Vec<Complex32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

struct PreparedWaveform {
    kind: WaveformType,
    groups: Vec<PreparedGroup>,
}

fn prepare_waveform(
    waveform: &Waveform,
    planner: &mut FftPlanner<f32>,
) -> Result<PreparedWaveform, CompressionError> {
    let mut groups = Vec::with_capacity(waveform.groups.len());
    for group in &waveform.groups {
        let l = group.taps.len();
        if l == 0 {
            return Err(CompressionError::ZeroLengthFilter(waveform.name.clone()));
        }
        let energy: f32 = group.taps.iter().map(|t| t.norm_sqr()).sum();
        let scale = 1.0 / energy.sqrt().max(f32::MIN_POSITIVE);
        let taps: Vec<Complex32> = group.taps.iter().map(|t| t.conj() * scale).collect();

        let fft = if l > FIR_LENGTH_THRESHOLD {
            let n = (4 * l).next_power_of_two();
            let forward = planner.plan_fft_forward(n);
            let inverse = planner.plan_fft_inverse(n);
            // Time-reversed taps make the correlation a convolution.
            let mut h = vec![Complex32::default(); n];
            for (j, tap) in taps.iter().enumerate() {
                h[l - 1 - j] = *tap;
            }
            forward.process(&mut h);
            Some(FftFilter {
                n,
                step: n - l + 1,
                h,
                forward,
                inverse,
            })
        } else {
            None
        };

        groups.push(PreparedGroup {
            input_origin: group.anchor.input_origin,
            output_origin: group.anchor.output_origin,
            max_data_length: group.anchor.max_data_length,
            taps,
            fft,
        });
    }
    Ok(PreparedWaveform {
        kind: waveform.kind,
        groups,
    })
}

/// Direct correlation: `y[g] = sum_j taps[j] * x[g + j]`, gates past the
/// end read as zero.
fn correlate_fir(x: &[Complex32], taps: &[Complex32], y: &mut [Complex32]) {
    let l = taps.len();
    for (g, out) in y.iter_mut().enumerate() {
        let avail = x.len().saturating_sub(g).min(l);
        let mut acc = Complex32::default();
        for j in 0..avail {
            acc += taps[j] * x[g + j];
        }
        *out = acc;
    }
}

/// Overlap-save correlation with the prepared spectrum. Produces the
/// same output as [correlate_fir] to rounding.
fn correlate_fft(x: &[Complex32], filter: &FftFilter, l: usize, y: &mut [Complex32]) {
    let n = filter.n;
    let step = filter.step;
    let scale = 1.0 / n as f32;
    let mut block = vec![Complex32::default(); n];

    // y[g] = conv(x, reversed taps)[g + l - 1]; each block yields `step`
    // valid convolution outputs starting at its base index.
    let wanted = y.len();
    let mut produced = 0usize;
    while produced < wanted {
        let base = produced + l - 1; // first convolution index needed
        let seg_start = base as isize - (l as isize - 1);
        for (j, b) in block.iter_mut().enumerate() {
            let src = seg_start + j as isize;
            *b = if src >= 0 && (src as usize) < x.len() {
                x[src as usize]
            } else {
                Complex32::default()
            };
        }
        filter.forward.process(&mut block);
        for (b, h) in block.iter_mut().zip(filter.h.iter()) {
            *b *= h;
        }
        filter.inverse.process(&mut block);

        let take = step.min(wanted - produced);
        for j in 0..take {
            y[produced + j] = block[l - 1 + j] * scale;
        }
        produced += take;
    }
}

#[derive(Default)]
pub struct CompressionStats {
    pub almost_full: AtomicU32,
    /// Per-worker lag in permille of the ring depth.
    pub worker_lag: Vec<AtomicU32>,
    /// Per-worker duty cycle in permille.
    pub duty_cycle: Vec<AtomicU32>,
}

#[derive(Debug, Clone)]
pub struct CompressionEngineDesc {
    pub core_count: usize,
}

pub struct PulseCompressionEngine {
    name: String,
    desc: CompressionEngineDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    waveforms: Arc<Mutex<HashMap<String, Arc<Waveform>>>>,
    state: EngineState,
    active: Arc<AtomicBool>,
    stats: Arc<CompressionStats>,
    gatherer: Option<JoinHandle<()>>,
}

impl PulseCompressionEngine {
    pub fn new(
        desc: CompressionEngineDesc,
        configs: Arc<ConfigRing>,
        pulses: Arc<Ring<Pulse>>,
    ) -> PulseCompressionEngine {
        let core_count = desc.core_count.max(1);
        let mut stats = CompressionStats::default();
        stats.worker_lag = (0..core_count).map(|_| AtomicU32::new(0)).collect();
        stats.duty_cycle = (0..core_count).map(|_| AtomicU32::new(0)).collect();
        PulseCompressionEngine {
            name: "<PulseCompression>".to_string(),
            desc: CompressionEngineDesc { core_count },
            configs,
            pulses,
            waveforms: Arc::new(Mutex::new(HashMap::new())),
            state: EngineState::Allocated,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(stats),
            gatherer: None,
        }
    }

    /// Install (or replace) the filter bank for a waveform. Workers pick
    /// it up at the next pulse whose config names it.
    pub fn install_waveform(&self, waveform: Waveform) {
        let mut bank = self.waveforms.lock().unwrap();
        bank.insert(waveform.name.clone(), Arc::new(waveform));
    }

    pub fn stats(&self) -> &CompressionStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Activating;
        self.active.store(true, Ordering::Release);
        info!("{} starting {} workers", self.name, self.desc.core_count);
        let gatherer = Gatherer {
            name: self.name.clone(),
            core_count: self.desc.core_count,
            configs: Arc::clone(&self.configs),
            pulses: Arc::clone(&self.pulses),
            waveforms: Arc::clone(&self.waveforms),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };
        self.gatherer = Some(
            thread::Builder::new()
                .name("pulse-gatherer".to_string())
                .spawn(move || gatherer.run())
                .expect("failed to spawn the pulse gatherer"),
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

impl Drop for PulseCompressionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Gatherer {
    name: String,
    core_count: usize,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    waveforms: Arc<Mutex<HashMap<String, Arc<Waveform>>>>,
    active: Arc<AtomicBool>,
    stats: Arc<CompressionStats>,
}

impl Gatherer {
    fn run(self) {
        let mut senders: Vec<Sender<u64>> = Vec::with_capacity(self.core_count);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.core_count);
        for c in 0..self.core_count {
            let (tx, rx) = unbounded::<u64>();
            senders.push(tx);
            let worker = Worker {
                id: c,
                configs: Arc::clone(&self.configs),
                pulses: Arc::clone(&self.pulses),
                waveforms: Arc::clone(&self.waveforms),
                stats: Arc::clone(&self.stats),
            };
            handles.push(
                thread::Builder::new()
                    .name(format!("pulse-core-{c}"))
                    .spawn(move || worker.run(rx))
                    .expect("failed to spawn a compression core"),
            );
        }

        let mut k: u64 = 0;
        let mut warned_full = false;
        'outer: while self.active.load(Ordering::Acquire) {
            while k >= self.pulses.head() {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }
            let slot = self.pulses.slot_at(k);
            while !slot.has_pulse_status(PulseStatus::HAS_IQ_DATA) {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }

            let c = (k % self.core_count as u64) as usize;
            let lag = self.stats.worker_lag[c].load(Ordering::Relaxed);
            if lag > 900 {
                self.stats.almost_full.fetch_add(1, Ordering::Relaxed);
                if !warned_full {
                    warn!("{} worker {} lag at {} permille", self.name, c, lag);
                    warned_full = true;
                }
            } else {
                warned_full = false;
            }
            if senders[c].send(k).is_err() {
                error!("{} worker {} is gone", self.name, c);
                break;
            }
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
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    waveforms: Arc<Mutex<HashMap<String, Arc<Waveform>>>>,
    stats: Arc<CompressionStats>,
}

impl Worker {
    fn run(self, jobs: Receiver<u64>) {
        debug!("pulse core {} started", self.id);
        let mut planner = FftPlanner::new();
        let mut prepared: HashMap<String, PreparedWaveform> = HashMap::new();
        let mut warned_unknown: Option<String> = None;
        let mut duty = DutyCycle::new();
        let mut scratch: Vec<Complex32> = Vec::new();
        let mut out: Vec<Complex32> = Vec::new();
        let mut idle_mark = Instant::now();

        while let Ok(count) = jobs.recv() {
            let t1 = Instant::now();
            let slot = self.pulses.slot_at(count);
            self.stats.worker_lag[self.id].store(
                (self.pulses.lag(count) * 1000.0) as u32,
                Ordering::Relaxed,
            );

            // HAS_IQ_DATA observed by the gatherer; this worker is the
            // only stage with write access until COMPRESSED goes up.
            let pulse: &mut Pulse = unsafe { slot.get_mut() };
            let config_id = pulse.header.config_id;
            let config = self
                .configs
                .get(config_id)
                .unwrap_or_else(|| self.configs.latest());

            if !config.waveform.is_empty() {
                if !prepared.contains_key(&config.waveform) {
                    let bank = self.waveforms.lock().unwrap();
                    if let Some(waveform) = bank.get(&config.waveform) {
                        match prepare_waveform(waveform, &mut planner) {
                            Ok(p) => {
                                prepared.insert(config.waveform.clone(), p);
                            }
                            Err(e) => {
                                // A zero-length filter cannot be worked
                                // around; this core is done.
                                error!("pulse core {}: {}", self.id, e);
                                return;
                            }
                        }
                    }
                }
                match prepared.get(&config.waveform) {
                    Some(waveform) => {
                        compress_in_place(pulse, waveform, &mut scratch, &mut out);
                    }
                    None => {
                        if warned_unknown.as_deref() != Some(config.waveform.as_str()) {
                            warn!(
                                "pulse core {}: waveform '{}' unknown, passing through",
                                self.id, config.waveform
                            );
                            warned_unknown = Some(config.waveform.clone());
                        }
                    }
                }
            }

            pulse.header.down_sampled_gate_count = pulse.header.gate_count;
            slot.or_pulse_status(PulseStatus::COMPRESSED);

            let t0 = Instant::now();
            let cycle = duty.absorb(
                t0.duration_since(t1).as_secs_f64(),
                t0.duration_since(idle_mark).as_secs_f64(),
            );
            self.stats.duty_cycle[self.id].store((cycle * 1000.0) as u32, Ordering::Relaxed);
            idle_mark = t0;
        }
        debug!("pulse core {} ended", self.id);
    }
}

/// Run every applicable filter group over both channels of one pulse,
/// writing the compressed gates back in place.
fn compress_in_place(
    pulse: &mut Pulse,
    waveform: &PreparedWaveform,
    scratch: &mut Vec<Complex32>,
    out: &mut Vec<Complex32>,
) {
    let gate_count = pulse.header.gate_count as usize;
    let group_count = waveform.groups.len();
    let selected = match waveform.kind {
        // Hopping: one carrier per pulse.
        WaveformType::FrequencyHopping => {
            Some(pulse.header.waveform_group as usize % group_count)
        }
        _ => None,
    };

    for channel in 0..CHANNEL_COUNT {
        for (index, group) in waveform.groups.iter().enumerate() {
            if selected.is_some() && selected != Some(index) {
                continue;
            }
            let input_origin = group.input_origin.min(gate_count);
            let length = group.max_data_length.min(gate_count - input_origin);
            let output_origin = group.output_origin.min(gate_count);
            let out_length = length.min(gate_count - output_origin);
            if out_length == 0 {
                continue;
            }

            scratch.clear();
            scratch.extend_from_slice(&pulse.channel(channel)[input_origin..input_origin + length]);
            out.resize(out_length, Complex32::default());

            match &group.fft {
                Some(filter) => correlate_fft(scratch, filter, group.taps.len(), out),
                None => correlate_fir(scratch, &group.taps, out),
            }

            pulse.channel_mut(channel)[output_origin..output_origin + out_length]
                .copy_from_slice(out);
        }
    }
}
