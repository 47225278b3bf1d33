// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hardware simulators.
//!
//! Software renditions of the three delegates, good enough to soak the
//! full pipeline without a transceiver on the bench: a pulse source
//! that synthesizes an echo at a commanded PRF, a pedestal that spins
//! PPI or nods RHI and emits the sweep markers, and a one-hertz health
//! relay. The integration tests live on these.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};
use num_complex::Complex32;

use crate::foundation::Marker;
use crate::hardware::{HardwareError, HealthRelay, Pedestal, Transceiver};
use crate::radar::RadarCore;

/// Shared knobs of the transceiver simulator.
struct TransceiverKnobs {
    prf: AtomicU32,
    gate_count: AtomicU32,
    /// Seconds between intermittent naps; zero naps never.
    sleep_interval: AtomicU32,
    running: AtomicBool,
}

/// A transceiver that synthesizes pulses: a unit echo in gate zero and
/// a weak echo mid-beam, over a tiny noise floor.
pub struct TestTransceiver {
    knobs: Arc<TransceiverKnobs>,
    handle: Option<JoinHandle<()>>,
}

impl TestTransceiver {
    pub fn new(prf: u32, gate_count: u32) -> TestTransceiver {
        TestTransceiver {
            knobs: Arc::new(TransceiverKnobs {
                prf: AtomicU32::new(prf),
                gate_count: AtomicU32::new(gate_count),
                sleep_interval: AtomicU32::new(0),
                running: AtomicBool::new(false),
            }),
            handle: None,
        }
    }
}

impl Transceiver for TestTransceiver {
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError> {
        let knobs = Arc::clone(&self.knobs);
        knobs.running.store(true, Ordering::Release);
        let ticks_per_second = radar.desc.sampling_rate;
        radar.set_pulse_ticks_per_second(ticks_per_second);

        let handle = thread::Builder::new()
            .name("sim-transceiver".to_string())
            .spawn(move || {
                info!("transceiver simulator started");
                let mut tick: u64 = 0;
                let mut count: u64 = 0;
                let gate_size = (3.0e8 / (2.0 * ticks_per_second)) as f32;
                while knobs.running.load(Ordering::Acquire) && radar.is_active() {
                    let prf = knobs.prf.load(Ordering::Acquire).max(1);
                    let gates = knobs.gate_count.load(Ordering::Acquire);
                    let prt_ticks = (ticks_per_second / prf as f64) as u64;

                    let mut pulse = radar.get_vacant_pulse();
                    pulse.header.t = tick;
                    pulse.header.gate_count = gates;
                    pulse.header.gate_size_meters = gate_size;
                    pulse.header.waveform_group = (count % 2) as u16;
                    let capacity = pulse.capacity();
                    let usable = (gates as usize).min(capacity);
                    for channel in 0..2 {
                        let samples = pulse.channel_mut(channel);
                        for (g, sample) in samples.iter_mut().take(usable).enumerate() {
                            // A hard target up close, a soft one mid-beam.
                            *sample = if g == 0 {
                                Complex32::new(1.0, 0.0)
                            } else if g == usable / 2 {
                                Complex32::new(0.1, 0.0)
                            } else {
                                Complex32::new(1.0e-4, 0.0)
                            };
                        }
                    }
                    pulse.set_has_data();

                    tick = tick.wrapping_add(prt_ticks);
                    count += 1;
                    let sleep_interval = knobs.sleep_interval.load(Ordering::Acquire);
                    if sleep_interval > 0 && count % (sleep_interval as u64 * prf as u64) == 0 {
                        thread::sleep(Duration::from_secs(1));
                    }
                    thread::sleep(Duration::from_secs_f64(1.0 / prf as f64));
                }
                debug!("transceiver simulator ended");
            })
            .map_err(|e| HardwareError::Init(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<String, HardwareError> {
        let (prefix, rest) = command
            .split_once(char::is_whitespace)
            .unwrap_or((command, ""));
        match prefix {
            "w" => Ok(format!("ACK. Waveform '{}'", rest.trim())),
            "g" => {
                let gates: u32 = rest
                    .trim()
                    .parse()
                    .map_err(|_| HardwareError::BadCommand(command.to_string()))?;
                self.knobs.gate_count.store(gates, Ordering::Release);
                Ok(format!("ACK. Gate count {gates}"))
            }
            "f" => {
                let prf_text = rest.split(',').next().unwrap_or(rest).trim();
                let prf: u32 = prf_text
                    .parse()
                    .map_err(|_| HardwareError::BadCommand(command.to_string()))?;
                self.knobs.prf.store(prf, Ordering::Release);
                Ok(format!("ACK. PRF {prf} Hz"))
            }
            "z" => {
                let seconds: u32 = rest.trim().parse().unwrap_or(1);
                self.knobs.sleep_interval.store(seconds, Ordering::Release);
                Ok(format!("ACK. Sleep interval {seconds} s"))
            }
            "stop" | "disconnect" => {
                self.knobs.running.store(false, Ordering::Release);
                Ok("ACK. Transceiver stopping".to_string())
            }
            _ => Err(HardwareError::BadCommand(command.to_string())),
        }
    }

    fn free(&mut self) {
        self.knobs.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ScanMode {
    Ppi { elevation: f32, speed_dps: f32 },
    Rhi { azimuth: f32, speed_dps: f32 },
    Stopped,
}

struct PedestalKnobs {
    running: AtomicBool,
    mode: std::sync::Mutex<ScanMode>,
}

/// A pedestal that spins or nods and emits sweep markers at the scan
/// boundaries.
pub struct TestPedestal {
    knobs: Arc<PedestalKnobs>,
    /// Position fixes per second.
    pub rate: f64,
    handle: Option<JoinHandle<()>>,
}

impl TestPedestal {
    pub fn new() -> TestPedestal {
        TestPedestal {
            knobs: Arc::new(PedestalKnobs {
                running: AtomicBool::new(false),
                mode: std::sync::Mutex::new(ScanMode::Ppi {
                    elevation: 2.4,
                    speed_dps: 45.0,
                }),
            }),
            rate: 500.0,
            handle: None,
        }
    }

    pub fn with_scan(mode_elevation: f32, speed_dps: f32) -> TestPedestal {
        let pedestal = TestPedestal::new();
        *pedestal.knobs.mode.lock().unwrap() = ScanMode::Ppi {
            elevation: mode_elevation,
            speed_dps,
        };
        pedestal
    }
}

impl Default for TestPedestal {
    fn default() -> Self {
        TestPedestal::new()
    }
}

impl Pedestal for TestPedestal {
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError> {
        let knobs = Arc::clone(&self.knobs);
        knobs.running.store(true, Ordering::Release);
        let rate = self.rate;
        radar.set_position_ticks_per_second(rate);

        let handle = thread::Builder::new()
            .name("sim-pedestal".to_string())
            .spawn(move || {
                info!("pedestal simulator started");
                let mut tick: u64 = 0;
                let mut azimuth: f32 = 0.0;
                let mut elevation: f32 = 0.0;
                let mut begin_pending = true;
                while knobs.running.load(Ordering::Acquire) && radar.is_active() {
                    let mode = *knobs.mode.lock().unwrap();
                    let mut marker = Marker::empty();
                    let mut sweep_azimuth = 0.0;
                    let mut sweep_elevation = 0.0;
                    let mut velocity = 0.0;
                    match mode {
                        ScanMode::Ppi {
                            elevation: el,
                            speed_dps,
                        } => {
                            elevation = el;
                            velocity = speed_dps;
                            sweep_elevation = el;
                            marker |= Marker::PPI_SCAN;
                            let step = (speed_dps as f64 / rate) as f32;
                            let next = azimuth + step;
                            if begin_pending {
                                marker |= Marker::SWEEP_BEGIN;
                                begin_pending = false;
                            }
                            if next >= 360.0 {
                                // Crossing north: this fix ends the
                                // sweep, the next one begins another.
                                marker |= Marker::SWEEP_END;
                                begin_pending = true;
                            }
                            azimuth = next % 360.0;
                        }
                        ScanMode::Rhi {
                            azimuth: az,
                            speed_dps,
                        } => {
                            azimuth = az;
                            velocity = speed_dps;
                            sweep_azimuth = az;
                            marker |= Marker::RHI_SCAN;
                            let step = (speed_dps as f64 / rate) as f32;
                            if begin_pending {
                                marker |= Marker::SWEEP_BEGIN;
                                begin_pending = false;
                            }
                            elevation += step;
                            if elevation >= 90.0 {
                                elevation = 0.0;
                                marker |= Marker::SWEEP_END;
                                begin_pending = true;
                            }
                        }
                        ScanMode::Stopped => {}
                    }

                    let mut position = radar.get_vacant_position();
                    position.t = tick;
                    position.azimuth_degrees = azimuth;
                    position.elevation_degrees = elevation;
                    position.azimuth_velocity_dps = velocity;
                    position.sweep_azimuth_degrees = sweep_azimuth;
                    position.sweep_elevation_degrees = sweep_elevation;
                    position.marker = marker;
                    position.set_ready();

                    tick += 1;
                    thread::sleep(Duration::from_secs_f64(1.0 / rate));
                }
                debug!("pedestal simulator ended");
            })
            .map_err(|e| HardwareError::Init(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<String, HardwareError> {
        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("ppi") => {
                let elevation: f32 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| HardwareError::BadCommand(command.to_string()))?;
                let speed: f32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(45.0);
                *self.knobs.mode.lock().unwrap() = ScanMode::Ppi {
                    elevation,
                    speed_dps: speed,
                };
                Ok(format!("ACK. PPI EL {elevation:.1} at {speed:.0} dps"))
            }
            Some("rhi") => {
                let azimuth: f32 = parts
                    .next()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| HardwareError::BadCommand(command.to_string()))?;
                *self.knobs.mode.lock().unwrap() = ScanMode::Rhi {
                    azimuth,
                    speed_dps: 10.0,
                };
                Ok(format!("ACK. RHI AZ {azimuth:.1}"))
            }
            Some("stop") => {
                *self.knobs.mode.lock().unwrap() = ScanMode::Stopped;
                Ok("ACK. Pedestal holding".to_string())
            }
            Some("disconnect") => {
                self.knobs.running.store(false, Ordering::Release);
                Ok("ACK. Pedestal stopping".to_string())
            }
            _ => Err(HardwareError::BadCommand(command.to_string())),
        }
    }

    fn free(&mut self) {
        self.knobs.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A relay that reports a plausible enclosure at one hertz.
pub struct TestHealthRelay {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestHealthRelay {
    pub fn new() -> TestHealthRelay {
        TestHealthRelay {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for TestHealthRelay {
    fn default() -> Self {
        TestHealthRelay::new()
    }
}

impl HealthRelay for TestHealthRelay {
    fn init(&mut self, radar: Arc<RadarCore>) -> Result<(), HardwareError> {
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name("sim-health".to_string())
            .spawn(move || {
                let mut count = 0u64;
                while running.load(Ordering::Acquire) && radar.is_active() {
                    let json = format!(
                        concat!(
                            "{{\"Transceiver\":{{\"Value\":true,\"Enum\":0}},",
                            "\"Pedestal\":{{\"Value\":true,\"Enum\":0}},",
                            "\"PSU\":{{\"Value\":{:.1},\"Enum\":0}},",
                            "\"Count\":{}}}"
                        ),
                        11.6 + 0.1 * ((count % 5) as f64),
                        count
                    );
                    radar.report_health(&json);
                    count += 1;
                    thread::sleep(Duration::from_secs(1));
                }
            })
            .map_err(|e| HardwareError::Init(e.to_string()))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn exec(&mut self, command: &str) -> Result<String, HardwareError> {
        match command {
            "stop" | "disconnect" => {
                self.running.store(false, Ordering::Release);
                Ok("ACK. Health relay stopping".to_string())
            }
            _ => Err(HardwareError::BadCommand(command.to_string())),
        }
    }

    fn free(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
