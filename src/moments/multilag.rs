// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Multi-lag moment estimator.
//!
//! Fits a Gaussian correlation model through the autocorrelation
//! magnitudes at lags 1..L: `ln |R(l)| = b0 - b2 l^2`. The lag-0 sample
//! is excluded, so receiver noise drops out of the fit; the intercept
//! recovers the noise-free signal power and the curvature recovers the
//! spectrum width. Velocity still comes from the lag-1 phase.

use num_complex::Complex32;

use super::{decimate_mean_c32, decimate_mean_f32, Scratch};

/// Turn the filled accumulators into ray-resolution primitives using
/// lags 1..=`lag_count` (2..=5).
pub(crate) fn estimate(scratch: &mut Scratch, pulse_count: usize, lag_count: usize) {
    let ratio = scratch.pulse_to_ray_ratio;
    let gates = scratch.gate_count;
    let lag_count = lag_count.clamp(2, super::scratch::MAX_LAG).min(pulse_count - 1);

    decimate_mean_f32(&scratch.s0[0], &mut scratch.sh, ratio, gates);
    decimate_mean_f32(&scratch.s0[1], &mut scratch.sv, ratio, gates);
    decimate_mean_c32(&scratch.cross, &mut scratch.cross_ray, ratio, gates);

    // Least-squares constants for the regressor x = l^2 are the same at
    // every gate.
    let xs: Vec<f32> = (1..=lag_count).map(|l| (l * l) as f32).collect();
    let x_mean = xs.iter().sum::<f32>() / lag_count as f32;
    let x_var: f32 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

    for g in 0..gates {
        let begin = g * ratio;
        let end = (begin + ratio).min(scratch.pulse_gate_count);
        let span = (end - begin) as f32;

        // Block-averaged |R(l)| for each lag, channel H.
        let mut r1 = Complex32::default();
        let mut ys = [0.0f32; super::scratch::MAX_LAG];
        for (li, y) in ys.iter_mut().take(lag_count).enumerate() {
            let lag = li + 1;
            let mut r = Complex32::default();
            for pg in begin..end {
                r += scratch.lags[0][lag][pg];
            }
            r /= span;
            if lag == 1 {
                r1 = r;
            }
            *y = r.norm().max(f32::MIN_POSITIVE).ln();
        }

        let y_mean = ys[..lag_count].iter().sum::<f32>() / lag_count as f32;
        let covariance: f32 = xs
            .iter()
            .zip(&ys[..lag_count])
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum();
        let b2 = covariance / x_var;
        let b0 = y_mean - b2 * x_mean;

        let r0_h = scratch.sh[g].max(f32::MIN_POSITIVE);
        // The fitted intercept is the noise-free signal power estimate.
        let signal_h = b0.exp().max(1.0e-10);
        let signal_v = (scratch.sv[g] - scratch.noise[1]).max(1.0e-10);
        scratch.sh[g] = signal_h;
        scratch.sv[g] = signal_v;

        scratch.sqi[g] = r1.norm().max(f32::MIN_POSITIVE) / r0_h;
        scratch.snr_h_db[g] = 10.0 * (signal_h / scratch.noise[0]).log10();
        scratch.velocity[g] = scratch.velocity_factor * r1.arg();
        scratch.width[g] = scratch.width_factor * (-b2).max(0.0).sqrt();
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use num_complex::Complex32;

    use crate::config::{Config, ConfigBuilder, ConfigUpdate};
    use crate::moments::{accumulate, PulseView};
    use crate::pulse::PulseHeader;

    use super::*;

    #[test]
    fn recovers_signal_power_and_zero_width_for_a_steady_target() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0e-6, 1.0e-6))
            .build();
        let mut scratch = Scratch::with_capacity(8);
        scratch.prepare(&config, 0.03, 1, 8, 150.0);

        let amplitude = 2.0f32;
        let h = vec![Complex32::new(amplitude, 0.0); 8];
        let v = vec![Complex32::new(amplitude, 0.0); 8];
        let header = PulseHeader {
            gate_count: 8,
            ..Default::default()
        };
        let pulses: Vec<PulseView> = (0..32).map(|_| PulseView {
            header: &header,
            h: &h,
            v: &v,
        }).collect();

        for lag_count in 2..=4usize {
            accumulate(&mut scratch, &pulses, lag_count);
            estimate(&mut scratch, pulses.len(), lag_count);
            // A constant series has |R(l)| = S at every lag.
            assert_abs_diff_eq!(scratch.sh[0], amplitude * amplitude, epsilon = 1e-3);
            assert_abs_diff_eq!(scratch.width[0], 0.0, epsilon = 1e-2);
            assert_abs_diff_eq!(scratch.velocity[0], 0.0, epsilon = 1e-4);
        }
    }
}
