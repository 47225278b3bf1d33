// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

Buffer depths and the alignment width are hard limits; a radar descriptor
may ask for less, never for more. The two W2 sentinels are part of the
sweep-file interchange format and must not change.
 */

pub use std::f64::consts::PI;

/// The minimum alignment of pulse and ray sample blocks \[bytes\]. AVX-512
/// wants 64; gate capacities are rounded up to a multiple of this many
/// complex samples.
pub const SIMD_ALIGN_SIZE: usize = 64;

/// Complex samples per alignment block.
pub const GATE_ALIGN: usize = SIMD_ALIGN_SIZE / 8;

/// Hard ceiling on the pulse ring depth.
pub const MAX_PULSE_BUFFER_DEPTH: usize = 4000;

/// Hard ceiling on the ray ring depth.
pub const MAX_RAY_BUFFER_DEPTH: usize = 4000;

/// Hard ceiling on gates per pulse.
pub const MAX_GATE_COUNT: usize = 262_144;

/// Default depth of the config ring.
pub const CONFIG_BUFFER_DEPTH: usize = 25;

/// Default depth of the health ring.
pub const HEALTH_BUFFER_DEPTH: usize = 25;

/// Default depth of the position ring.
pub const POSITION_BUFFER_DEPTH: usize = 500;

/// The most filters a single waveform may carry.
pub const MAX_FILTER_COUNT: usize = 8;

/// The most pulses a single ray may integrate.
pub const MAX_PULSES_PER_RAY: usize = 2000;

/// The most rays a single sweep may gather.
pub const MAX_RAYS_PER_SWEEP: usize = 1500;

/// Full PPI/RHI sweeps are normalized to this many beams.
pub const SWEEP_BEAM_TARGET: usize = 360;

/// Depth of the sweep scratch ring; the sink writes one while the
/// gatherer accumulates the next.
pub const SWEEP_SCRATCH_DEPTH: usize = 4;

/// Window length of the per-worker duty-cycle estimator.
pub const WORKER_DUTY_CYCLE_WINDOW: usize = 1000;

/// Default clock ring depth and regression stride.
pub const CLOCK_BUFFER_DEPTH: usize = 2000;
pub const CLOCK_STRIDE: usize = 1000;

/// Observations that jump backwards by more than this many seconds are
/// ignored by the clock aligner.
pub const CLOCK_A_WHILE: f64 = 300.0;

/// WDSS-II sentinel for censored gates in sweep files.
pub const W2_MISSING_DATA: f32 = -99900.0;

/// WDSS-II sentinel for range-folded gates in sweep files.
pub const W2_RANGE_FOLDED: f32 = -99901.0;

/// Size of the serialized pulse header, padded so that the sample block
/// that follows it in the raw archive begins on an alignment boundary.
pub const PULSE_HEADER_PADDED_SIZE: usize = 128;

/// Size of the raw-archive file header (descriptor + baseline config +
/// data type tag).
pub const FILE_HEADER_SIZE: usize = 1024;

/// Magic number leading every raw pulse archive.
pub const FILE_MAGIC: u32 = 0x5241_4b31; // "RAK1"

/// Write-cache size of the raw-data recorder.
pub const RECORDER_CACHE_SIZE: usize = 32 * 1024 * 1024;
