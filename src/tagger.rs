// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The position tagger.
//!
//! Pulses and positions arrive on independent threads with independently
//! drifting hardware clocks; both streams carry wall-clock times from
//! their own aligners, so reconciliation here is a plain interpolation.
//! The tagger holds a slow cursor over the position ring, advances it
//! until two positions bracket the pulse's timestamp, interpolates
//! azimuth shortest-arc, and propagates sweep markers onto the first
//! pulse at or after the position that carried them. A pulse that waits
//! longer than the timeout for its bracket is discarded with a warning
//! so a dead pedestal cannot stall the pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{ConfigRing, ConfigUpdate};
use crate::foundation::{angle_diff, EngineState, Marker, Ring};
use crate::position::{Position, POSITION_READY};
use crate::pulse::{Pulse, PulseSlotExt, PulseStatus};

#[derive(Debug, Clone)]
pub struct TaggerDesc {
    /// How long a pulse may wait for a bracketing position.
    pub timeout: Duration,
}

impl Default for TaggerDesc {
    fn default() -> TaggerDesc {
        TaggerDesc {
            timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
pub struct TaggerStats {
    /// Pulses discarded for want of a bracketing position.
    pub dropped_pulses: AtomicU64,
    pub tagged_pulses: AtomicU64,
}

pub struct PositionEngine {
    name: String,
    desc: TaggerDesc,
    configs: Arc<ConfigRing>,
    positions: Arc<Ring<Position>>,
    pulses: Arc<Ring<Pulse>>,
    state: EngineState,
    active: Arc<AtomicBool>,
    stats: Arc<TaggerStats>,
    handle: Option<JoinHandle<()>>,
}

impl PositionEngine {
    pub fn new(
        desc: TaggerDesc,
        configs: Arc<ConfigRing>,
        positions: Arc<Ring<Position>>,
        pulses: Arc<Ring<Pulse>>,
    ) -> PositionEngine {
        PositionEngine {
            name: "<PositionTagger>".to_string(),
            desc,
            configs,
            positions,
            pulses,
            state: EngineState::Allocated,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(TaggerStats::default()),
            handle: None,
        }
    }

    pub fn stats(&self) -> &TaggerStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Activating;
        self.active.store(true, Ordering::Release);
        let runner = Runner {
            name: self.name.clone(),
            desc: self.desc.clone(),
            configs: Arc::clone(&self.configs),
            positions: Arc::clone(&self.positions),
            pulses: Arc::clone(&self.pulses),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };
        self.handle = Some(
            thread::Builder::new()
                .name("position-tagger".to_string())
                .spawn(move || runner.run())
                .expect("failed to spawn the position tagger"),
        );
        self.state = EngineState::Active;
        info!("{} started", self.name);
    }

    pub fn stop(&mut self) -> bool {
        if self.state != EngineState::Active {
            debug!("{} already deactivated", self.name);
            return false;
        }
        self.state = EngineState::Deactivating;
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.state = EngineState::Allocated;
        info!("{} stopped", self.name);
        true
    }
}

impl Drop for PositionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Runner {
    name: String,
    desc: TaggerDesc,
    configs: Arc<ConfigRing>,
    positions: Arc<Ring<Position>>,
    pulses: Arc<Ring<Pulse>>,
    active: Arc<AtomicBool>,
    stats: Arc<TaggerStats>,
}

impl Runner {
    fn position(&self, count: u64) -> Position {
        let slot = self.positions.slot_at(count);
        // Positions are plain-old-data; copy out under the READY bit.
        *unsafe { slot.get() }
    }

    fn run(self) {
        let mut k: u64 = 0; // pulse cursor
        let mut p: u64 = 0; // position cursor, the P_lo candidate
        let mut delivered: u64 = 0; // markers handed out up to here
        let mut stall_warned = false;

        'outer: while self.active.load(Ordering::Acquire) {
            while k >= self.pulses.head() {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }
            let slot = self.pulses.slot_at(k);
            while !slot.has_pulse_status(PulseStatus::COMPRESSED) {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_micros(200));
            }

            // Exclusive write access: the compressor has published, the
            // moment engine waits for READY.
            let pulse: &mut Pulse = unsafe { slot.get_mut() };
            let t = pulse.header.time_double;

            // Advance the slow cursor until p and p+1 bracket t. The
            // bracketing position's timestamp must be strictly greater.
            let deadline = Instant::now() + self.desc.timeout;
            let bracket = loop {
                let available = self.positions.head();
                // Move up while the next position is still at or before t.
                while p + 1 < available
                    && self.positions.slot_at(p + 1).has_status(POSITION_READY)
                    && self.position(p + 1).time_double <= t
                {
                    p += 1;
                }
                if p + 1 < available
                    && self.positions.slot_at(p + 1).has_status(POSITION_READY)
                    && self.position(p + 1).time_double > t
                {
                    break Some((self.position(p), self.position(p + 1)));
                }
                if Instant::now() >= deadline {
                    break None;
                }
                if !self.active.load(Ordering::Acquire) {
                    break None;
                }
                thread::sleep(Duration::from_micros(500));
            };

            let Some((lo, hi)) = bracket else {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                if !stall_warned {
                    warn!("{} no bracketing position for pulse at {:.3}", self.name, t);
                    stall_warned = true;
                }
                self.stats.dropped_pulses.fetch_add(1, Ordering::Relaxed);
                slot.or_pulse_status(PulseStatus::DISCARDED | PulseStatus::READY);
                k += 1;
                continue;
            };
            stall_warned = false;

            // Interpolate, shortest-arc in azimuth.
            let span = hi.time_double - lo.time_double;
            let alpha = if span > 0.0 {
                (((t - lo.time_double) / span) as f32).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut azimuth = lo.azimuth_degrees
                + alpha * angle_diff(hi.azimuth_degrees, lo.azimuth_degrees);
            if azimuth < 0.0 {
                azimuth += 360.0;
            } else if azimuth >= 360.0 {
                azimuth -= 360.0;
            }
            let elevation = lo.elevation_degrees
                + alpha * angle_diff(hi.elevation_degrees, lo.elevation_degrees);

            pulse.header.azimuth_degrees = azimuth;
            pulse.header.elevation_degrees = elevation;
            pulse.header.azimuth_velocity_dps = lo.azimuth_velocity_dps;
            pulse.header.elevation_velocity_dps = lo.elevation_velocity_dps;

            // Hand out the markers of every position now at or before t.
            let mut pending = Marker::empty();
            while delivered <= p {
                let position = self.position(delivered);
                pending |= position.marker;
                if position.marker.contains(Marker::SWEEP_BEGIN) {
                    // A new sweep re-keys the slowly varying parameters.
                    self.configs.advance([
                        ConfigUpdate::SweepElevation(position.sweep_elevation_degrees),
                        ConfigUpdate::SweepAzimuth(position.sweep_azimuth_degrees),
                        ConfigUpdate::PositionMarker(position.marker.scan_type()),
                    ]);
                }
                delivered += 1;
            }
            pulse.header.marker |= pending;

            slot.or_pulse_status(PulseStatus::HAS_POSITION | PulseStatus::READY);
            self.stats.tagged_pulses.fetch_add(1, Ordering::Relaxed);
            k += 1;
        }
        debug!("{} runner ended", self.name);
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::position::position_ring;
    use crate::pulse::pulse_ring;

    fn push_position(ring: &Ring<Position>, t: f64, az: f32, el: f32, marker: Marker) {
        let (_, slot) = ring.get_vacant();
        {
            let position = unsafe { slot.get_mut() };
            position.time_double = t;
            position.azimuth_degrees = az;
            position.elevation_degrees = el;
            position.marker = marker;
            position.i = slot.id();
        }
        slot.or_status(POSITION_READY);
    }

    fn push_pulse(ring: &Ring<Pulse>, t: f64) -> u64 {
        let (count, slot) = ring.get_vacant();
        {
            let pulse = unsafe { slot.get_mut() };
            pulse.header.time_double = t;
            pulse.header.gate_count = 4;
            pulse.header.marker = Marker::empty();
        }
        slot.or_pulse_status(PulseStatus::HAS_IQ_DATA | PulseStatus::COMPRESSED);
        count
    }

    fn engine_parts() -> (Arc<ConfigRing>, Arc<Ring<Position>>, Arc<Ring<Pulse>>) {
        (
            Arc::new(ConfigRing::new(8)),
            Arc::new(position_ring(64)),
            Arc::new(pulse_ring(8, 64)),
        )
    }

    #[test]
    fn interpolates_shortest_arc_and_propagates_markers() {
        let (configs, positions, pulses) = engine_parts();
        // Azimuth crossing north: 359 -> 1 degree.
        push_position(&positions, 1.0, 359.0, 3.0, Marker::PPI_SCAN | Marker::SWEEP_BEGIN);
        push_position(&positions, 2.0, 1.0, 3.0, Marker::empty());
        let k = push_pulse(&pulses, 1.5);

        let mut engine = PositionEngine::new(
            TaggerDesc::default(),
            Arc::clone(&configs),
            Arc::clone(&positions),
            Arc::clone(&pulses),
        );
        engine.start();

        let slot = pulses.slot_at(k);
        let waited = Instant::now();
        while !slot.has_pulse_status(PulseStatus::READY) {
            assert!(waited.elapsed() < Duration::from_secs(2), "tagger stalled");
            thread::sleep(Duration::from_millis(1));
        }
        engine.stop();

        let pulse = unsafe { slot.get() };
        assert_abs_diff_eq!(pulse.header.azimuth_degrees, 0.0, epsilon = 1e-3);
        assert_abs_diff_eq!(pulse.header.elevation_degrees, 3.0, epsilon = 1e-5);
        assert!(pulse.header.marker.contains(Marker::SWEEP_BEGIN));
        assert!(!slot.has_pulse_status(PulseStatus::DISCARDED));
        // The sweep begin advanced the config with the scan geometry.
        assert!(configs.latest().start_marker.is_ppi());
    }

    #[test]
    fn pulse_without_bracket_is_discarded_with_a_count() {
        let (configs, positions, pulses) = engine_parts();
        push_position(&positions, 1.0, 10.0, 2.0, Marker::empty());
        // No later position ever arrives.
        let k = push_pulse(&pulses, 5.0);

        let mut engine = PositionEngine::new(
            TaggerDesc {
                timeout: Duration::from_millis(20),
            },
            configs,
            Arc::clone(&positions),
            Arc::clone(&pulses),
        );
        engine.start();

        let slot = pulses.slot_at(k);
        let waited = Instant::now();
        while !slot.has_pulse_status(PulseStatus::READY) {
            assert!(waited.elapsed() < Duration::from_secs(2), "tagger stalled");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(slot.has_pulse_status(PulseStatus::DISCARDED));
        assert_eq!(engine.stats().dropped_pulses.load(Ordering::Relaxed), 1);

        // The pipeline resumes cleanly when positions resume.
        push_position(&positions, 6.0, 11.0, 2.0, Marker::empty());
        let k2 = push_pulse(&pulses, 5.5);
        let slot2 = pulses.slot_at(k2);
        let waited = Instant::now();
        while !slot2.has_pulse_status(PulseStatus::READY) {
            assert!(waited.elapsed() < Duration::from_secs(2), "tagger stalled");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!slot2.has_pulse_status(PulseStatus::DISCARDED));
        engine.stop();
    }
}
