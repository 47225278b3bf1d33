// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fundamental unit of level-I data.
//!
//! A pulse is a fixed-capacity record: a header followed by the H and V
//! complex sample blocks. The serialized header is padded so that the
//! sample block begins on an alignment boundary; that layout is part of
//! the raw-archive format and must not drift. In memory, the capacity is
//! rounded up to a whole number of alignment blocks so the convolution
//! kernels can run full-width.

use num_complex::Complex32;

use crate::constants::GATE_ALIGN;
use crate::foundation::{Marker, Ring};

pub use crate::foundation::PulseStatus;

/// Number of polarization channels. H is 0, V is 1.
pub const CHANNEL_COUNT: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct PulseHeader {
    /// All-time monotonic pulse id; mirrors the slot id at publish time.
    pub i: u64,
    /// Hardware tick counter from the transceiver.
    pub t: u64,
    pub time_sec: u32,
    pub time_usec: u32,
    /// Wall-clock time from the pulse-clock aligner.
    pub time_double: f64,
    /// Monotonic id of the config snapshot in force at arrival.
    pub config_id: u64,
    /// Sweep/volume marker bits copied from the bracketing position.
    pub marker: Marker,
    /// Which waveform group this pulse transmitted (frequency hopping).
    pub waveform_group: u16,
    /// PRF index for multi-PRF operation.
    pub prf_index: u16,
    pub gate_count: u32,
    /// Gate count after pulse-to-ray decimation.
    pub down_sampled_gate_count: u32,
    pub gate_size_meters: f32,
    pub azimuth_degrees: f32,
    pub elevation_degrees: f32,
    pub azimuth_velocity_dps: f32,
    pub elevation_velocity_dps: f32,
}

impl Default for PulseHeader {
    fn default() -> PulseHeader {
        PulseHeader {
            i: 0,
            t: 0,
            time_sec: 0,
            time_usec: 0,
            time_double: 0.0,
            config_id: 0,
            marker: Marker::empty(),
            waveform_group: 0,
            prf_index: 0,
            gate_count: 0,
            down_sampled_gate_count: 0,
            gate_size_meters: 0.0,
            azimuth_degrees: 0.0,
            elevation_degrees: 0.0,
            azimuth_velocity_dps: 0.0,
            elevation_velocity_dps: 0.0,
        }
    }
}

pub struct Pulse {
    pub header: PulseHeader,
    capacity: usize,
    /// H then V, `capacity` complex samples each. Raw samples land here
    /// and the compressor overwrites them in place.
    channels: [Vec<Complex32>; CHANNEL_COUNT],
}

impl Pulse {
    /// Allocate a pulse of at least `capacity` gates, rounded up to a
    /// whole number of alignment blocks.
    pub fn with_capacity(capacity: usize) -> Pulse {
        let capacity = aligned_capacity(capacity);
        Pulse {
            header: PulseHeader::default(),
            capacity,
            channels: [
                vec![Complex32::default(); capacity],
                vec![Complex32::default(); capacity],
            ],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn channel(&self, channel: usize) -> &[Complex32] {
        &self.channels[channel]
    }

    pub fn channel_mut(&mut self, channel: usize) -> &mut [Complex32] {
        &mut self.channels[channel]
    }

    /// The usable gates of one channel.
    pub fn gates(&self, channel: usize) -> &[Complex32] {
        &self.channels[channel][..self.header.gate_count as usize]
    }
}

/// Round a gate capacity up to the alignment width.
pub fn aligned_capacity(capacity: usize) -> usize {
    (capacity + GATE_ALIGN - 1) / GATE_ALIGN * GATE_ALIGN
}

/// Allocate the level-I ring: `depth` pulses of `capacity` gates.
pub fn pulse_ring(capacity: usize, depth: usize) -> Ring<Pulse> {
    Ring::new(depth, |_| Pulse::with_capacity(capacity))
}

/// Typed helpers over the raw slot status word.
pub trait PulseSlotExt {
    fn pulse_status(&self) -> PulseStatus;
    fn or_pulse_status(&self, bits: PulseStatus);
    fn has_pulse_status(&self, bits: PulseStatus) -> bool;
}

impl PulseSlotExt for crate::foundation::Slot<Pulse> {
    fn pulse_status(&self) -> PulseStatus {
        PulseStatus::from_bits_truncate(self.status_bits())
    }

    fn or_pulse_status(&self, bits: PulseStatus) {
        self.or_status(bits.bits());
    }

    fn has_pulse_status(&self, bits: PulseStatus) -> bool {
        self.has_status(bits.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_rounded_to_alignment() {
        assert_eq!(aligned_capacity(1), GATE_ALIGN);
        assert_eq!(aligned_capacity(GATE_ALIGN), GATE_ALIGN);
        assert_eq!(aligned_capacity(150), 152);
        assert_eq!(Pulse::with_capacity(150).capacity() % GATE_ALIGN, 0);
    }

    #[test]
    fn ring_recycles_slots_with_fresh_status() {
        let ring = pulse_ring(64, 3);
        let (_, slot) = ring.get_vacant();
        slot.or_pulse_status(PulseStatus::HAS_IQ_DATA);
        for _ in 0..3 {
            ring.get_vacant();
        }
        // Same physical slot, two generations on.
        let recycled = ring.slot_at(3);
        assert_eq!(recycled.pulse_status(), PulseStatus::empty());
        assert_eq!(recycled.id(), 2 * 3);
    }
}
