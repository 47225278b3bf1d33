// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pulse-pair moment estimators.
//!
//! The plain estimator reads the lag-1 autocorrelation. The hop variant
//! is for frequency-hopping waveforms where only every other pulse
//! shares a carrier: it pairs pulses two apart and scales the velocity
//! span accordingly.

use super::decimate_mean_f32;
use super::Scratch;

/// Turn the filled accumulators into ray-resolution primitives using the
/// autocorrelation at `lag`.
pub(crate) fn estimate(scratch: &mut Scratch, pulse_count: usize, lag: usize) {
    let ratio = scratch.pulse_to_ray_ratio;
    let gates = scratch.gate_count;
    debug_assert!(pulse_count > lag);

    decimate_mean_f32(&scratch.s0[0], &mut scratch.sh, ratio, gates);
    decimate_mean_f32(&scratch.s0[1], &mut scratch.sv, ratio, gates);
    super::decimate_mean_c32(&scratch.cross, &mut scratch.cross_ray, ratio, gates);

    // The hop estimator spans twice the base PRT per pair.
    let velocity_factor = scratch.velocity_factor / lag as f32;
    let width_factor = scratch.width_factor / lag as f32;

    for g in 0..gates {
        // Block-average the lag product over the decimation span.
        let begin = g * ratio;
        let end = (begin + ratio).min(scratch.pulse_gate_count);
        let mut r = num_complex::Complex32::default();
        for pg in begin..end {
            r += scratch.lags[0][lag][pg];
        }
        r /= (end - begin) as f32;

        let r0_h = scratch.sh[g].max(f32::MIN_POSITIVE);
        let signal_h = (scratch.sh[g] - scratch.noise[0]).max(1.0e-10);
        let signal_v = (scratch.sv[g] - scratch.noise[1]).max(1.0e-10);
        scratch.sh[g] = signal_h;
        scratch.sv[g] = signal_v;

        let magnitude = r.norm().max(f32::MIN_POSITIVE);
        scratch.sqi[g] = magnitude / r0_h;
        scratch.snr_h_db[g] = 10.0 * (signal_h / scratch.noise[0]).log10();
        scratch.velocity[g] = velocity_factor * r.arg();
        // Spectrum width from the R0/R1 ratio; the log argument is
        // clamped so receiver noise cannot push it below unity.
        scratch.width[g] = width_factor * (signal_h / magnitude).max(1.0).ln().sqrt();
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

    fn view<'a>(h: &'a [Complex32], v: &'a [Complex32], header: &'a PulseHeader) -> PulseView<'a> {
        PulseView { header, h, v }
    }

    #[test]
    fn steady_target_has_zero_velocity_and_width() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0e-6, 1.0e-6))
            .build();
        let mut scratch = Scratch::with_capacity(8);
        scratch.prepare(&config, 0.03, 1, 8, 150.0);

        let h = vec![Complex32::new(1.0, 0.0); 8];
        let v = vec![Complex32::new(1.0, 0.0); 8];
        let header = PulseHeader {
            gate_count: 8,
            ..Default::default()
        };
        let pulses: Vec<PulseView> = (0..10).map(|_| view(&h, &v, &header)).collect();

        accumulate(&mut scratch, &pulses, 1);
        estimate(&mut scratch, pulses.len(), 1);

        assert_abs_diff_eq!(scratch.velocity[0], 0.0, epsilon = 1e-5);
        assert_abs_diff_eq!(scratch.width[0], 0.0, epsilon = 1e-3);
        assert!(scratch.snr_h_db[0] > 50.0);
        assert!(scratch.sqi[0] > 0.99);
    }

    #[test]
    fn doppler_shift_maps_to_velocity() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0e-6, 1.0e-6))
            .build();
        let mut scratch = Scratch::with_capacity(4);
        scratch.prepare(&config, 0.03, 1, 4, 150.0);

        // Pulse-to-pulse phase advance of 0.2 rad.
        let phi = 0.2f32;
        let n = 16;
        let header = PulseHeader {
            gate_count: 4,
            ..Default::default()
        };
        let series: Vec<(Vec<Complex32>, Vec<Complex32>)> = (0..n)
            .map(|k| {
                let s = Complex32::from_polar(1.0, phi * k as f32);
                (vec![s; 4], vec![s; 4])
            })
            .collect();
        let pulses: Vec<PulseView> = series
            .iter()
            .map(|(h, v)| view(h, v, &header))
            .collect();

        accumulate(&mut scratch, &pulses, 1);
        estimate(&mut scratch, pulses.len(), 1);

        // v = velocity_factor * arg(R1) = 0.25 lambda prf / pi * phi
        let expected = 0.25 * 0.03 * 1000.0 / std::f32::consts::PI * phi;
        assert_abs_diff_eq!(scratch.velocity[0], expected, epsilon = 1e-4);
    }

    #[test]
    fn hop_pairs_halve_the_velocity_span() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::Noise(1.0e-6, 1.0e-6))
            .build();
        let mut scratch = Scratch::with_capacity(4);
        scratch.prepare(&config, 0.03, 1, 4, 150.0);

        let phi = 0.1f32;
        let header = PulseHeader {
            gate_count: 4,
            ..Default::default()
        };
        let series: Vec<(Vec<Complex32>, Vec<Complex32>)> = (0..16)
            .map(|k| {
                let s = Complex32::from_polar(1.0, phi * k as f32);
                (vec![s; 4], vec![s; 4])
            })
            .collect();
        let pulses: Vec<PulseView> = series
            .iter()
            .map(|(h, v)| view(h, v, &header))
            .collect();

        accumulate(&mut scratch, &pulses, 2);
        estimate(&mut scratch, pulses.len(), 2);

        // Lag-2 phase is 2 phi, but the factor is halved: same velocity.
        let expected = 0.25 * 0.03 * 1000.0 / std::f32::consts::PI * phi;
        assert_abs_diff_eq!(scratch.velocity[0], expected, epsilon = 1e-4);
    }
}
