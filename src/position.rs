// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Angular position fixes from the pedestal.

use crate::foundation::{Marker, Ring};

/// Status bit a position carries once its producer has finished with it.
pub const POSITION_READY: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct Position {
    /// All-time monotonic position id.
    pub i: u64,
    /// Hardware tick counter from the pedestal.
    pub t: u64,
    /// Wall-clock time from the position-clock aligner.
    pub time_double: f64,
    pub azimuth_degrees: f32,
    pub elevation_degrees: f32,
    pub azimuth_velocity_dps: f32,
    pub elevation_velocity_dps: f32,
    /// Commanded sweep targets, copied into the config at sweep starts.
    pub sweep_azimuth_degrees: f32,
    pub sweep_elevation_degrees: f32,
    pub marker: Marker,
}

impl Default for Position {
    fn default() -> Position {
        Position {
            i: 0,
            t: 0,
            time_double: 0.0,
            azimuth_degrees: 0.0,
            elevation_degrees: 0.0,
            azimuth_velocity_dps: 0.0,
            elevation_velocity_dps: 0.0,
            sweep_azimuth_degrees: 0.0,
            sweep_elevation_degrees: 0.0,
            marker: Marker::empty(),
        }
    }
}

/// Allocate the position ring.
pub fn position_ring(depth: usize) -> Ring<Position> {
    Ring::new(depth, |_| Position::default())
}
