// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A clock derived from a free-running hardware counter and request
//! times.
//!
//! Transceivers and pedestals stamp their samples with their own tick
//! counters, which drift against the host clock and occasionally jump.
//! The aligner maintains a running affine fit `x = a * u + b` over the
//! most recent `stride` observations: the slope is a trimmed mean of
//! per-sample differences with outlier rejection, and the intercept is
//! solved against a robust central observation so that one bad request
//! time cannot yank the fit. Each hardware source gets its own aligner;
//! the two streams are reconciled downstream by the position tagger.

use log::{debug, info, warn};

use crate::constants::{CLOCK_A_WHILE, CLOCK_BUFFER_DEPTH, CLOCK_STRIDE};

/// How far a per-sample difference may stray from the typical period
/// before it is excluded from the slope estimate.
const OUTLIER_PERIOD_MULTIPLE: f64 = 3.0;

/// Fraction trimmed from both ends of the sorted slope samples.
const TRIM_FRACTION: f64 = 0.25;

pub struct Clock {
    name: String,
    size: usize,
    stride: usize,
    offset_seconds: f64,
    auto_sync: bool,
    high_precision: bool,
    has_wisdom: bool,
    verbose: u8,

    /// Observed request times (dirty).
    x: Vec<f64>,
    /// Driving reference counts (clean).
    u: Vec<f64>,

    index: usize,
    count: u64,
    a: f64,
    b: f64,
    latest_u: f64,
    latest_x: f64,
    latest_time: f64,
    typical_period: f64,
    info_shown: bool,
}

impl Clock {
    pub fn new() -> Clock {
        Clock::with_size(CLOCK_BUFFER_DEPTH, CLOCK_STRIDE)
    }

    pub fn with_name(name: &str) -> Clock {
        let mut clock = Clock::new();
        clock.name = name.to_string();
        clock
    }

    pub fn with_size(size: usize, stride: usize) -> Clock {
        assert!(stride >= 2 && stride <= size);
        Clock {
            name: "<clock>".to_string(),
            size,
            stride,
            offset_seconds: 0.0,
            auto_sync: true,
            high_precision: false,
            has_wisdom: false,
            verbose: 0,
            x: vec![0.0; size],
            u: vec![0.0; size],
            index: 0,
            count: 0,
            a: 0.0,
            b: 0.0,
            latest_u: 0.0,
            latest_x: 0.0,
            latest_time: 0.0,
            typical_period: 0.0,
            info_shown: false,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn set_verbose(&mut self, verbose: u8) {
        self.verbose = verbose;
    }

    pub fn set_offset(&mut self, offset_seconds: f64) {
        self.offset_seconds = offset_seconds;
    }

    /// Suppress slope/intercept updates; the fit is only extrapolated.
    pub fn set_manual_sync(&mut self) {
        self.auto_sync = false;
    }

    pub fn set_high_precision(&mut self, high_precision: bool) {
        self.high_precision = high_precision;
    }

    /// Supply the known dx/du, e.g. the transceiver's advertised tick
    /// rate. The regression then only has to correct residual drift.
    pub fn set_dx_du(&mut self, dx_du: f64) {
        self.a = dx_du;
        self.has_wisdom = true;
    }

    pub fn set_du_dx(&mut self, du_dx: f64) {
        self.set_dx_du(1.0 / du_dx);
    }

    /// Number of observations absorbed since the last reset.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Discard the fit. The wisdom slope, if one was supplied, survives.
    pub fn reset(&mut self) {
        self.count = 0;
        self.index = 0;
        self.b = 0.0;
        self.typical_period = 0.0;
        if !self.has_wisdom {
            self.a = 0.0;
        }
        debug!("{} fit reset", self.name);
    }

    /// Map reference count `u` to wall-clock seconds. When `obs` carries
    /// the request time of this sample it is absorbed into the fit;
    /// without it the fit is extrapolated forward. The returned time is
    /// monotone non-decreasing across calls.
    pub fn get_time(&mut self, u: f64, obs: Option<f64>) -> f64 {
        // A backwards reference count means the counter was restarted.
        if self.count > 0 && u < self.latest_u {
            warn!(
                "{} reference count went backwards ({:.0} < {:.0}), resetting",
                self.name, u, self.latest_u
            );
            self.reset();
        }

        let mut absorbed = false;
        if let Some(x) = obs {
            if self.count > 0 && self.latest_x - x > CLOCK_A_WHILE {
                warn!(
                    "{} observation {:.3} s in the past ignored",
                    self.name,
                    self.latest_x - x
                );
            } else {
                self.x[self.index] = x;
                self.u[self.index] = u;
                self.index = (self.index + 1) % self.size;
                self.count += 1;
                self.latest_x = x;
                absorbed = true;

                if self.count == 1 {
                    // First observation anchors the intercept outright.
                    self.b = x - self.a * u;
                }
            }
        }

        if absorbed && self.auto_sync {
            if self.count >= self.stride as u64 {
                self.regress();
            } else {
                // Warm-up: follow the observations exactly.
                self.b = self.latest_x - self.a * u;
            }
        }

        self.latest_u = u;
        let predicted = self.a * u + self.b + self.offset_seconds;
        // Contract: monotone non-decreasing.
        self.latest_time = predicted.max(self.latest_time);
        self.latest_time
    }

    /// Recompute `a` and `b` over the most recent `stride` observations.
    fn regress(&mut self) {
        let n = self.stride.min(self.count as usize).min(self.size);
        // Oldest sample of the window sits n steps behind the write index.
        let base = (self.index + self.size - n) % self.size;

        let at = |k: usize| (base + k) % self.size;
        let u0 = self.u[at(0)];
        let x0 = self.x[at(0)];

        // Per-sample differences.
        let mut dx: Vec<f64> = Vec::with_capacity(n - 1);
        let mut du: Vec<f64> = Vec::with_capacity(n - 1);
        for k in 1..n {
            dx.push(self.x[at(k)] - self.x[at(k - 1)]);
            du.push(self.u[at(k)] - self.u[at(k - 1)]);
        }

        let mut sorted = dx.clone();
        sorted.sort_by(|p, q| p.partial_cmp(q).unwrap());
        self.typical_period = sorted[sorted.len() / 2];

        // Slope samples with outlier rejection.
        let limit = OUTLIER_PERIOD_MULTIPLE * self.typical_period.abs();
        let mut slopes: Vec<f64> = dx
            .iter()
            .zip(du.iter())
            .filter(|(dxk, duk)| dxk.abs() <= limit && **duk > 0.0)
            .map(|(dxk, duk)| dxk / duk)
            .collect();
        if slopes.len() < 2 {
            return;
        }
        slopes.sort_by(|p, q| p.partial_cmp(q).unwrap());
        let trim = ((slopes.len() as f64) * TRIM_FRACTION) as usize;
        let kept = &slopes[trim..slopes.len() - trim];

        // Trimmed mean. High-precision mode accumulates in double; the
        // normal mode uses single accumulation of the residuals about the
        // median, which is plenty once the window is centred.
        let mid = kept[kept.len() / 2];
        self.a = if self.high_precision {
            kept.iter().sum::<f64>() / kept.len() as f64
        } else {
            let residual: f32 = kept.iter().map(|s| (s - mid) as f32).sum();
            mid + (residual / kept.len() as f32) as f64
        };

        // Solve b so the prediction matches a robust central observation:
        // the median residual of the window about the new slope.
        let mut residuals: Vec<f64> = (0..n)
            .map(|k| (self.x[at(k)] - x0) - self.a * (self.u[at(k)] - u0))
            .collect();
        residuals.sort_by(|p, q| p.partial_cmp(q).unwrap());
        let central = residuals[residuals.len() / 2];
        self.b = x0 + central - self.a * u0;

        if !self.info_shown {
            info!(
                "{} locked: a = {:.6e} s/tick   b = {:.3}   period = {:.3e} s",
                self.name, self.a, self.b, self.typical_period
            );
            self.info_shown = true;
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Clock::new()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn tracks_a_steady_stream_within_one_period() {
        let mut clock = Clock::with_size(200, 100);
        let t0 = 1_500_000_000.0;
        let mut predicted = 0.0;
        for k in 0..150u64 {
            let u = k as f64 * 10_000.0;
            let x = t0 + k as f64 * 0.001;
            predicted = clock.get_time(u, Some(x));
        }
        // After `stride` observations the prediction tracks truth to
        // within one typical period.
        let truth = t0 + 149.0 * 0.001;
        assert!((predicted - truth).abs() < 0.001, "{predicted} vs {truth}");
        assert_abs_diff_eq!(clock.typical_period, 0.001, epsilon = 1e-9);
    }

    #[test]
    fn extrapolates_without_observations() {
        let mut clock = Clock::with_size(200, 100);
        let t0 = 1_500_000_000.0;
        for k in 0..120u64 {
            clock.get_time(k as f64, Some(t0 + k as f64 * 0.01));
        }
        let ahead = clock.get_time(200.0, None);
        assert!((ahead - (t0 + 2.0)).abs() < 0.05);
    }

    #[test]
    fn output_is_monotone_under_jittery_observations() {
        let mut clock = Clock::with_size(64, 32);
        let t0 = 1_600_000_000.0;
        let mut last = 0.0;
        for k in 0..200u64 {
            let jitter = if k % 7 == 0 { -3.0e-4 } else { 2.0e-4 };
            let x = t0 + k as f64 * 0.002 + jitter;
            let now = clock.get_time(k as f64, Some(x));
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn backwards_tick_resets_and_recovers() {
        let mut clock = Clock::with_size(64, 16);
        let t0 = 1_700_000_000.0;
        for k in 0..40u64 {
            clock.get_time(1000.0 + k as f64, Some(t0 + k as f64 * 0.001));
        }
        assert!(clock.count() >= 40);
        let before = clock.get_time(1040.0, None);

        // The counter skips backwards once; the fit is discarded.
        let after = clock.get_time(3.0, Some(t0 + 0.041));
        assert_eq!(clock.count(), 1);
        // The predicted wall clock remains monotone through the reset.
        assert!(after >= before);

        // Resynchronizes within `stride` subsequent samples.
        let mut now = 0.0;
        for k in 0..20u64 {
            now = clock.get_time(4.0 + k as f64, Some(t0 + 0.042 + k as f64 * 0.001));
        }
        let truth = t0 + 0.042 + 19.0 * 0.001;
        assert!((now - truth).abs() < 0.01, "{now} vs {truth}");
    }

    #[test]
    fn old_observation_is_ignored() {
        let mut clock = Clock::with_size(64, 16);
        let t0 = 1_500_000_000.0;
        for k in 0..20u64 {
            clock.get_time(k as f64, Some(t0 + k as f64 * 0.001));
        }
        let count = clock.count();
        // An observation from five minutes ago does not disturb the fit.
        clock.get_time(20.0, Some(t0 - 400.0));
        assert_eq!(clock.count(), count);
    }
}
