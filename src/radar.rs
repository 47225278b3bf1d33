// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The radar object: buffer allocation, engine wiring and lifecycle.
//!
//! Everything is allocated once, up front, from a [RadarDesc]. Engines
//! receive the descriptor by value and shared handles to the rings they
//! touch at construction; nothing on the data path ever calls back into
//! the radar. Hardware producers feed the rings through the guard API
//! below, which is where pulses and positions get their identities,
//! config stamps and aligned wall-clock times.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{info, warn};

use crate::clock::Clock;
use crate::compress::{CompressionEngineDesc, PulseCompressionEngine};
use crate::config::{ConfigRing, ConfigUpdate};
use crate::constants::{
    CONFIG_BUFFER_DEPTH, HEALTH_BUFFER_DEPTH, MAX_GATE_COUNT, MAX_PULSE_BUFFER_DEPTH,
    MAX_RAY_BUFFER_DEPTH, POSITION_BUFFER_DEPTH,
};
use crate::error::RadarError;
use crate::foundation::{Ring, Slot};
use crate::hardware::{HealthRelay, Pedestal, Transceiver};
use crate::health::{health_ring, Health, HEALTH_READY};
use crate::iq::RawDataRecorder;
use crate::moments::{MomentEngine, MomentEngineDesc, MomentMethod};
use crate::position::{position_ring, Position, POSITION_READY};
use crate::pulse::{aligned_capacity, pulse_ring, Pulse, PulseSlotExt, PulseStatus};
use crate::ray::{ray_ring, Ray};
use crate::sweep::netcdf::NetcdfSink;
use crate::sweep::{SweepEngine, SweepSink};
use crate::tagger::{PositionEngine, TaggerDesc};
use crate::waveform::Waveform;

/// Radar description: everything the allocation and the engines need to
/// know, by value.
#[derive(Debug, Clone)]
pub struct RadarDesc {
    pub name: String,
    pub file_prefix: String,
    pub data_path: String,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f32,
    pub radar_height: f32,
    /// Transmit wavelength \[m\].
    pub wavelength: f32,
    /// Digitizer sampling rate \[Hz\].
    pub sampling_rate: f64,
    pub pulse_capacity: usize,
    pub pulse_to_ray_ratio: usize,
    pub pulse_buffer_depth: usize,
    pub ray_buffer_depth: usize,
    pub config_buffer_depth: usize,
    pub health_buffer_depth: usize,
    pub position_buffer_depth: usize,
    pub pulse_compression_cores: usize,
    pub moment_cores: usize,
    pub position_timeout: Duration,
}

impl Default for RadarDesc {
    fn default() -> RadarDesc {
        RadarDesc {
            name: "PX-10k".to_string(),
            file_prefix: "PX10K".to_string(),
            data_path: "data".to_string(),
            latitude: 35.2550320,
            longitude: -97.4227810,
            heading: 0.0,
            radar_height: 2.5,
            wavelength: 0.03,
            sampling_rate: 5.0e6,
            pulse_capacity: 2048,
            pulse_to_ray_ratio: 1,
            pulse_buffer_depth: 1000,
            ray_buffer_depth: 720,
            config_buffer_depth: CONFIG_BUFFER_DEPTH,
            health_buffer_depth: HEALTH_BUFFER_DEPTH,
            position_buffer_depth: POSITION_BUFFER_DEPTH,
            pulse_compression_cores: 4,
            moment_cores: 2,
            position_timeout: Duration::from_millis(100),
        }
    }
}

impl RadarDesc {
    /// Preset operating points: bandwidth, gates, cores and decimation
    /// for system levels 0 (debug) through 6.
    pub fn with_system_level(mut self, level: u8) -> RadarDesc {
        let (fs, gates, pc, mc, ratio) = match level {
            0 => (5.0e6, 150, 2, 2, 2),
            1 => (5.0e6, 2_000, 2, 2, 2),
            2 => (10.0e6, 10_000, 2, 2, 4),
            3 => (20.0e6, 20_000, 4, 2, 8),
            4 => (50.0e6, 50_000, 4, 4, 16),
            5 => (100.0e6, 100_000, 8, 4, 32),
            _ => (200.0e6, 200_000, 10, 4, 64),
        };
        self.sampling_rate = fs;
        self.pulse_capacity = gates;
        self.pulse_compression_cores = pc;
        self.moment_cores = mc;
        self.pulse_to_ray_ratio = ratio;
        self
    }
}

/// The shared heart of a radar: the rings, the clocks and the active
/// flag. Hardware producers and engines hold this; the [Radar] object
/// owns the lifecycle around it.
pub struct RadarCore {
    pub desc: RadarDesc,
    pub(crate) active: AtomicBool,
    pub configs: Arc<ConfigRing>,
    pub pulses: Arc<Ring<Pulse>>,
    pub positions: Arc<Ring<Position>>,
    pub rays: Arc<Ring<Ray>>,
    pub healths: Arc<Ring<Health>>,
    pulse_clock: Mutex<Clock>,
    position_clock: Mutex<Clock>,
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl RadarCore {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Claim the next pulse slot. The slot arrives with a cleared
    /// status, a fresh identity and the current config stamped on it;
    /// fill the samples and header, then call
    /// [PulseGuard::set_has_data].
    pub fn get_vacant_pulse(&self) -> PulseGuard<'_> {
        let (_, slot) = self.pulses.get_vacant();
        {
            // The producer owns the slot until HAS_IQ_DATA goes up.
            let pulse = unsafe { slot.get_mut() };
            pulse.header.i = slot.id();
            pulse.header.time_double = 0.0;
            pulse.header.time_sec = 0;
            pulse.header.time_usec = 0;
            pulse.header.marker = crate::foundation::Marker::empty();
            pulse.header.config_id = self.configs.latest_id();
        }
        PulseGuard { core: self, slot }
    }

    /// Claim the next position slot; fill it and call
    /// [PositionGuard::set_ready].
    pub fn get_vacant_position(&self) -> PositionGuard<'_> {
        let (_, slot) = self.positions.get_vacant();
        {
            let position = unsafe { slot.get_mut() };
            position.i = slot.id();
            position.time_double = 0.0;
        }
        PositionGuard { core: self, slot }
    }

    /// Record a health report from a relay.
    pub fn report_health(&self, json: &str) {
        let (_, slot) = self.healths.get_vacant();
        {
            let health = unsafe { slot.get_mut() };
            health.i = slot.id();
            health.time_double = now_seconds();
            health.json = json.to_string();
        }
        slot.or_status(HEALTH_READY);
    }

    /// The most recent health report, if any has arrived.
    pub fn latest_health(&self) -> Option<Health> {
        let head = self.healths.head();
        if head == 0 {
            return None;
        }
        let slot = self.healths.slot_at(head - 1);
        if slot.has_status(HEALTH_READY) {
            Some(unsafe { slot.get() }.clone())
        } else {
            None
        }
    }

    /// Teach the pulse clock the transceiver's tick rate.
    pub fn set_pulse_ticks_per_second(&self, ticks: f64) {
        self.pulse_clock.lock().unwrap().set_du_dx(ticks);
    }

    pub fn set_position_ticks_per_second(&self, ticks: f64) {
        self.position_clock.lock().unwrap().set_du_dx(ticks);
    }
}

/// Exclusive access to a vacant pulse slot.
pub struct PulseGuard<'a> {
    core: &'a RadarCore,
    slot: &'a Slot<Pulse>,
}

impl Deref for PulseGuard<'_> {
    type Target = Pulse;

    fn deref(&self) -> &Pulse {
        unsafe { self.slot.get() }
    }
}

impl DerefMut for PulseGuard<'_> {
    fn deref_mut(&mut self) -> &mut Pulse {
        unsafe { self.slot.get_mut() }
    }
}

impl PulseGuard<'_> {
    /// Publish the raw samples: aligns the hardware tick to wall time,
    /// clamps a runaway gate count, and raises `HAS_IQ_DATA`.
    pub fn set_has_data(self) {
        let observation = now_seconds();
        // The guard is this slot's only writer until the bit goes up.
        let pulse = unsafe { self.slot.get_mut() };
        let capacity = pulse.capacity();
        if pulse.header.gate_count as usize > capacity {
            warn!(
                "pulse gate count {} clamped to the capacity {}",
                pulse.header.gate_count, capacity
            );
            pulse.header.gate_count = capacity as u32;
        }
        if pulse.header.time_double == 0.0 {
            let tick = pulse.header.t as f64;
            let time = self
                .core
                .pulse_clock
                .lock()
                .unwrap()
                .get_time(tick, Some(observation));
            pulse.header.time_double = time;
            pulse.header.time_sec = time as u32;
            pulse.header.time_usec = ((time - (time as u32) as f64) * 1.0e6) as u32;
        }
        self.slot.or_pulse_status(PulseStatus::HAS_IQ_DATA);
    }
}

/// Exclusive access to a vacant position slot.
pub struct PositionGuard<'a> {
    core: &'a RadarCore,
    slot: &'a Slot<Position>,
}

impl Deref for PositionGuard<'_> {
    type Target = Position;

    fn deref(&self) -> &Position {
        unsafe { self.slot.get() }
    }
}

impl DerefMut for PositionGuard<'_> {
    fn deref_mut(&mut self) -> &mut Position {
        unsafe { self.slot.get_mut() }
    }
}

impl PositionGuard<'_> {
    /// Publish the fix: aligns the pedestal tick to wall time and
    /// raises the ready bit.
    pub fn set_ready(self) {
        let observation = now_seconds();
        let position = unsafe { self.slot.get_mut() };
        if position.time_double == 0.0 {
            let tick = position.t as f64;
            position.time_double = self
                .core
                .position_clock
                .lock()
                .unwrap()
                .get_time(tick, Some(observation));
        }
        self.slot.or_status(POSITION_READY);
    }
}

/// One live radar: rings, engines and hardware delegates.
pub struct Radar {
    pub core: Arc<RadarCore>,
    compression: PulseCompressionEngine,
    tagger: PositionEngine,
    moment: MomentEngine,
    sweep: SweepEngine,
    recorder: RawDataRecorder,
    transceiver: Option<Box<dyn Transceiver>>,
    pedestal: Option<Box<dyn Pedestal>>,
    health_relay: Option<Box<dyn HealthRelay>>,
    live: bool,
}

impl Radar {
    pub fn new(desc: RadarDesc) -> Result<Radar, RadarError> {
        let sink = Box::new(NetcdfSink::new(desc.clone()));
        Radar::with_sweep_sink(desc, sink)
    }

    /// Build a radar with a caller-supplied sweep sink in place of the
    /// NetCDF writer.
    pub fn with_sweep_sink(
        mut desc: RadarDesc,
        sink: Box<dyn SweepSink>,
    ) -> Result<Radar, RadarError> {
        if desc.pulse_capacity == 0 {
            return Err(RadarError::Start("pulse capacity is zero".to_string()));
        }
        if desc.pulse_to_ray_ratio == 0 {
            desc.pulse_to_ray_ratio = 1;
        }
        // Clamp the depths to the hard ceilings.
        if desc.pulse_capacity > MAX_GATE_COUNT {
            info!("pulse capacity clamped to {}", MAX_GATE_COUNT);
            desc.pulse_capacity = MAX_GATE_COUNT;
        }
        desc.pulse_capacity = aligned_capacity(desc.pulse_capacity);
        if desc.pulse_buffer_depth == 0 || desc.pulse_buffer_depth > MAX_PULSE_BUFFER_DEPTH {
            desc.pulse_buffer_depth = desc.pulse_buffer_depth.clamp(1, MAX_PULSE_BUFFER_DEPTH);
            info!("pulse buffer depth clamped to {}", desc.pulse_buffer_depth);
        }
        if desc.ray_buffer_depth == 0 || desc.ray_buffer_depth > MAX_RAY_BUFFER_DEPTH {
            desc.ray_buffer_depth = desc.ray_buffer_depth.clamp(1, MAX_RAY_BUFFER_DEPTH);
            info!("ray buffer depth clamped to {}", desc.ray_buffer_depth);
        }

        let configs = Arc::new(ConfigRing::new(desc.config_buffer_depth.max(2)));
        let pulses = Arc::new(pulse_ring(desc.pulse_capacity, desc.pulse_buffer_depth));
        let positions = Arc::new(position_ring(desc.position_buffer_depth.max(2)));
        let ray_capacity = desc.pulse_capacity / desc.pulse_to_ray_ratio;
        let rays = Arc::new(ray_ring(ray_capacity, desc.ray_buffer_depth));
        let healths = Arc::new(health_ring(desc.health_buffer_depth.max(2)));

        let mut pulse_clock = Clock::with_size(15000, 10000);
        pulse_clock.set_name("<pulseClock>");
        let mut position_clock = Clock::new();
        position_clock.set_name("<positionClock>");
        position_clock.set_offset(-0.02);

        let core = Arc::new(RadarCore {
            desc: desc.clone(),
            active: AtomicBool::new(false),
            configs: Arc::clone(&configs),
            pulses: Arc::clone(&pulses),
            positions: Arc::clone(&positions),
            rays: Arc::clone(&rays),
            healths,
            pulse_clock: Mutex::new(pulse_clock),
            position_clock: Mutex::new(position_clock),
        });

        let compression = PulseCompressionEngine::new(
            CompressionEngineDesc {
                core_count: desc.pulse_compression_cores,
            },
            Arc::clone(&configs),
            Arc::clone(&pulses),
        );
        let tagger = PositionEngine::new(
            TaggerDesc {
                timeout: desc.position_timeout,
            },
            Arc::clone(&configs),
            Arc::clone(&positions),
            Arc::clone(&pulses),
        );
        let moment = MomentEngine::new(
            MomentEngineDesc {
                wavelength: desc.wavelength,
                pulse_to_ray_ratio: desc.pulse_to_ray_ratio,
                pulse_capacity: desc.pulse_capacity,
                core_count: desc.moment_cores,
                method: MomentMethod::default(),
            },
            Arc::clone(&configs),
            Arc::clone(&pulses),
            Arc::clone(&rays),
        );
        let sweep = SweepEngine::new(Arc::clone(&configs), Arc::clone(&rays), sink);
        let recorder = RawDataRecorder::new(desc.clone(), Arc::clone(&configs), Arc::clone(&pulses));

        info!(
            "radar '{}' allocated: {} pulses x {} gates, {} rays",
            desc.name, desc.pulse_buffer_depth, desc.pulse_capacity, desc.ray_buffer_depth
        );

        Ok(Radar {
            core,
            compression,
            tagger,
            moment,
            sweep,
            recorder,
            transceiver: None,
            pedestal: None,
            health_relay: None,
            live: false,
        })
    }

    pub fn set_transceiver(&mut self, transceiver: Box<dyn Transceiver>) {
        self.transceiver = Some(transceiver);
    }

    pub fn set_pedestal(&mut self, pedestal: Box<dyn Pedestal>) {
        self.pedestal = Some(pedestal);
    }

    pub fn set_health_relay(&mut self, relay: Box<dyn HealthRelay>) {
        self.health_relay = Some(relay);
    }

    pub fn set_moment_method(&mut self, method: MomentMethod) {
        self.moment.set_method(method);
    }

    /// Install a waveform: filters to the compressor, name and anchors
    /// to a fresh config snapshot.
    pub fn set_waveform(&mut self, waveform: Waveform) {
        self.core.configs.advance([ConfigUpdate::Waveform {
            name: waveform.name.clone(),
            anchors: waveform.anchors(),
        }]);
        self.compression.install_waveform(waveform);
    }

    pub fn set_waveform_by_name(&mut self, name: &str) -> Result<(), RadarError> {
        let waveform = Waveform::from_name(name, self.core.desc.sampling_rate)?;
        self.set_waveform(waveform);
        Ok(())
    }

    pub fn set_prf(&mut self, prf: u32, sprt: Option<u32>) {
        match sprt {
            Some(sprt) if sprt > 1 => {
                self.core
                    .configs
                    .advance([ConfigUpdate::StaggeredPrt(prf, sprt)]);
            }
            _ => {
                self.core.configs.advance([ConfigUpdate::Prf(prf)]);
            }
        }
    }

    pub fn set_snr_threshold(&mut self, snr_db: f32) {
        self.core
            .configs
            .advance([ConfigUpdate::SnrThreshold(snr_db)]);
    }

    /// Apply arbitrary tagged updates as one new config snapshot.
    pub fn add_config(&mut self, updates: impl IntoIterator<Item = ConfigUpdate>) {
        self.core.configs.advance(updates);
    }

    pub fn set_record(&mut self, record: bool) {
        self.recorder.set_record(record);
    }

    pub fn is_active(&self) -> bool {
        self.core.is_active()
    }

    /// Start the engines (upstream last so nothing sees a half-wired
    /// pipeline), then bring up the hardware.
    pub fn go_live(&mut self) -> Result<(), RadarError> {
        if self.live {
            return Ok(());
        }
        self.core.active.store(true, Ordering::Release);
        self.compression.start();
        self.tagger.start();
        self.moment.start();
        self.recorder.start();
        self.sweep.start();

        let core = Arc::clone(&self.core);
        if let Some(pedestal) = self.pedestal.as_mut() {
            pedestal.init(Arc::clone(&core))?;
        }
        if let Some(transceiver) = self.transceiver.as_mut() {
            transceiver.init(Arc::clone(&core))?;
        }
        if let Some(relay) = self.health_relay.as_mut() {
            relay.init(core)?;
        }
        self.live = true;
        info!("radar '{}' is live", self.core.desc.name);
        Ok(())
    }

    /// Block until something stops the radar.
    pub fn wait_while_active(&self) {
        while self.core.is_active() {
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Cooperative shutdown: hardware first, then the engines in
    /// reverse dependency order. Calling it twice yields the distinct
    /// already-deactivated result.
    pub fn stop(&mut self) -> Result<(), RadarError> {
        if !self.live {
            return Err(RadarError::AlreadyDeactivated);
        }
        self.core.active.store(false, Ordering::Release);

        if let Some(transceiver) = self.transceiver.as_mut() {
            let _ = transceiver.exec("disconnect");
            transceiver.free();
        }
        if let Some(pedestal) = self.pedestal.as_mut() {
            let _ = pedestal.exec("disconnect");
            pedestal.free();
        }
        if let Some(relay) = self.health_relay.as_mut() {
            let _ = relay.exec("disconnect");
            relay.free();
        }

        self.sweep.stop();
        self.recorder.stop();
        self.moment.stop();
        self.tagger.stop();
        self.compression.stop();
        self.live = false;
        info!("radar '{}' stopped", self.core.desc.name);
        Ok(())
    }

    /// Route a newline-less text command to the right place and return
    /// the one-line reply.
    pub fn execute_command(&mut self, command: &str) -> Result<String, RadarError> {
        let command = command.trim();
        let (prefix, rest) = match command.split_once(char::is_whitespace) {
            Some((p, r)) => (p, r.trim()),
            None => (command, ""),
        };
        match prefix {
            "s" => {
                let level: u8 = rest
                    .parse()
                    .map_err(|_| RadarError::BadCommand(command.to_string()))?;
                // Live profile changes re-key what can move at runtime;
                // buffer geometry is fixed at allocation.
                let gates: u32 = match level {
                    0 => 150,
                    1 => 2_000,
                    2 => 10_000,
                    3 => 20_000,
                    4 => 50_000,
                    5 => 100_000,
                    _ => 200_000,
                };
                let gates = gates.min(self.core.desc.pulse_capacity as u32);
                self.add_config([ConfigUpdate::GateCount(gates)]);
                if let Some(transceiver) = self.transceiver.as_mut() {
                    let _ = transceiver.exec(&format!("g {gates}"));
                }
                Ok(format!("ACK. System level {level}"))
            }
            "f" => {
                let (prf, sprt) = match rest.split_once(',') {
                    Some((prf, sprt)) => (
                        prf.trim().parse().map_err(|_| {
                            RadarError::BadCommand(command.to_string())
                        })?,
                        Some(sprt.trim().parse().map_err(|_| {
                            RadarError::BadCommand(command.to_string())
                        })?),
                    ),
                    None => (
                        rest.parse()
                            .map_err(|_| RadarError::BadCommand(command.to_string()))?,
                        None,
                    ),
                };
                self.set_prf(prf, sprt);
                if let Some(transceiver) = self.transceiver.as_mut() {
                    let _ = transceiver.exec(&format!("f {rest}"));
                }
                Ok(format!("ACK. PRF {prf} Hz"))
            }
            "t" => {
                // Transceiver commands; `t w <name>` also installs the
                // matched filters.
                if let Some(name) = rest.strip_prefix("w ") {
                    self.set_waveform_by_name(name.trim())?;
                }
                let transceiver = self
                    .transceiver
                    .as_mut()
                    .ok_or_else(|| RadarError::BadCommand("no transceiver".to_string()))?;
                Ok(transceiver.exec(rest)?)
            }
            "p" => {
                let pedestal = self
                    .pedestal
                    .as_mut()
                    .ok_or_else(|| RadarError::BadCommand("no pedestal".to_string()))?;
                Ok(pedestal.exec(rest)?)
            }
            "h" => {
                let relay = self
                    .health_relay
                    .as_mut()
                    .ok_or_else(|| RadarError::BadCommand("no health relay".to_string()))?;
                Ok(relay.exec(rest)?)
            }
            "v" => {
                let level: u8 = rest.parse().unwrap_or(0);
                Ok(format!("ACK. Verbosity {level}"))
            }
            "stop" => {
                self.stop()?;
                Ok("ACK. Stopped".to_string())
            }
            _ => Err(RadarError::BadCommand(command.to_string())),
        }
    }

    pub fn compression_engine(&self) -> &PulseCompressionEngine {
        &self.compression
    }

    pub fn moment_engine(&self) -> &MomentEngine {
        &self.moment
    }

    pub fn tagger_engine(&self) -> &PositionEngine {
        &self.tagger
    }

    pub fn sweep_engine(&self) -> &SweepEngine {
        &self.sweep
    }

    pub fn recorder_engine(&self) -> &RawDataRecorder {
        &self.recorder
    }
}

impl Drop for Radar {
    fn drop(&mut self) {
        if self.live {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_profiles_scale_with_level() {
        let lean = RadarDesc::default().with_system_level(1);
        assert_eq!(lean.pulse_capacity, 2_000);
        assert_eq!(lean.pulse_to_ray_ratio, 2);
        let full = RadarDesc::default().with_system_level(5);
        assert_eq!(full.pulse_capacity, 100_000);
        assert_eq!(full.pulse_compression_cores, 8);
    }

    #[test]
    fn vacant_pulses_carry_identity_and_config() {
        let desc = RadarDesc {
            pulse_capacity: 64,
            pulse_buffer_depth: 8,
            ..Default::default()
        };
        let radar = Radar::with_sweep_sink(desc, Box::new(crate::sweep::FnSink(|_sweep: crate::sweep::Sweep| {}))).unwrap();
        radar.core.configs.advance([ConfigUpdate::Prf(1500)]);

        let mut guard = radar.core.get_vacant_pulse();
        guard.header.gate_count = 32;
        guard.header.t = 1000;
        let id = guard.header.i;
        let config_id = guard.header.config_id;
        guard.set_has_data();

        assert_eq!(config_id, 1);
        let slot = radar.core.pulses.slot_at(0);
        assert_eq!(slot.id(), id);
        assert!(slot.has_pulse_status(PulseStatus::HAS_IQ_DATA));
        let pulse = unsafe { slot.get() };
        assert!(pulse.header.time_double > 0.0);
    }

    #[test]
    fn gate_count_is_clamped_to_capacity() {
        let desc = RadarDesc {
            pulse_capacity: 64,
            pulse_buffer_depth: 8,
            ..Default::default()
        };
        let radar = Radar::with_sweep_sink(desc, Box::new(crate::sweep::FnSink(|_sweep: crate::sweep::Sweep| {}))).unwrap();
        let mut guard = radar.core.get_vacant_pulse();
        guard.header.gate_count = 100_000;
        guard.set_has_data();
        let pulse = unsafe { radar.core.pulses.slot_at(0).get() };
        assert_eq!(pulse.header.gate_count, 64);
    }

    #[test]
    fn stop_twice_reports_already_deactivated() {
        let desc = RadarDesc {
            pulse_capacity: 64,
            pulse_buffer_depth: 8,
            ..Default::default()
        };
        let mut radar = Radar::with_sweep_sink(desc, Box::new(crate::sweep::FnSink(|_sweep: crate::sweep::Sweep| {}))).unwrap();
        radar.go_live().unwrap();
        assert!(radar.stop().is_ok());
        assert!(matches!(radar.stop(), Err(RadarError::AlreadyDeactivated)));
    }
}
