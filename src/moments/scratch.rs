// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-worker working space.
//!
//! Each moment worker owns one [Scratch]: the calibration tables keyed by
//! the active config, plus the lag accumulators the estimators fill.
//! Scratch is thread-local by construction and never shared.

use num_complex::Complex32;

use crate::config::Config;
use crate::constants::PI;
use crate::pulse::CHANNEL_COUNT;

/// The deepest lag any estimator reads.
pub const MAX_LAG: usize = 5;

/// Wrap a phase to `[-PI, PI)`.
pub fn wrap_phase(phi: f32) -> f32 {
    let pi = PI as f32;
    let mut phi = phi;
    while phi >= pi {
        phi -= 2.0 * pi;
    }
    while phi < -pi {
        phi += 2.0 * pi;
    }
    phi
}

pub struct Scratch {
    /// Config the tables below were prepared for.
    pub config_id: u64,
    /// Ray gates the tables cover.
    pub gate_count: usize,
    /// Pulse gates the accumulators cover.
    pub pulse_gate_count: usize,
    pub pulse_to_ray_ratio: usize,
    pub gate_size_meters: f32,

    // Calibration tables, one entry per ray gate.
    pub range_correction: [Vec<f32>; CHANNEL_COUNT],
    pub dcal: Vec<f32>,
    pub pcal: Vec<f32>,

    pub noise: [f32; 2],
    pub snr_threshold_db: f32,
    pub sqi_threshold: f32,
    pub velocity_factor: f32,
    pub width_factor: f32,
    pub kdp_factor: f32,

    // Lag accumulators at pulse-gate resolution.
    pub s0: [Vec<f32>; CHANNEL_COUNT],
    pub lags: [[Vec<Complex32>; MAX_LAG + 1]; CHANNEL_COUNT],
    pub cross: Vec<Complex32>,

    // Primitives at ray-gate resolution, filled by the estimators.
    pub sh: Vec<f32>,
    pub sv: Vec<f32>,
    pub snr_h_db: Vec<f32>,
    pub sqi: Vec<f32>,
    pub velocity: Vec<f32>,
    pub width: Vec<f32>,
    pub cross_ray: Vec<Complex32>,
}

fn complex_planes(capacity: usize) -> [Vec<Complex32>; MAX_LAG + 1] {
    [
        vec![Complex32::default(); capacity],
        vec![Complex32::default(); capacity],
        vec![Complex32::default(); capacity],
        vec![Complex32::default(); capacity],
        vec![Complex32::default(); capacity],
        vec![Complex32::default(); capacity],
    ]
}

impl Scratch {
    /// Allocate scratch for pulses of `pulse_capacity` gates.
    pub fn with_capacity(pulse_capacity: usize) -> Scratch {
        Scratch {
            config_id: u64::MAX,
            gate_count: 0,
            pulse_gate_count: 0,
            pulse_to_ray_ratio: 1,
            gate_size_meters: 0.0,
            range_correction: [vec![0.0; pulse_capacity], vec![0.0; pulse_capacity]],
            dcal: vec![0.0; pulse_capacity],
            pcal: vec![0.0; pulse_capacity],
            noise: [1.0, 1.0],
            snr_threshold_db: -120.0,
            sqi_threshold: 0.0,
            velocity_factor: 0.0,
            width_factor: 0.0,
            kdp_factor: 0.0,
            s0: [vec![0.0; pulse_capacity], vec![0.0; pulse_capacity]],
            lags: [complex_planes(pulse_capacity), complex_planes(pulse_capacity)],
            cross: vec![Complex32::default(); pulse_capacity],
            sh: vec![0.0; pulse_capacity],
            sv: vec![0.0; pulse_capacity],
            snr_h_db: vec![0.0; pulse_capacity],
            sqi: vec![0.0; pulse_capacity],
            velocity: vec![0.0; pulse_capacity],
            width: vec![0.0; pulse_capacity],
            cross_ray: vec![Complex32::default(); pulse_capacity],
        }
    }

    /// Populate the calibration tables for one config and beam geometry.
    /// `pulse_gate_count` and `pulse_gate_size` describe the incoming
    /// pulses; the tables are laid out at ray-gate resolution.
    pub fn prepare(
        &mut self,
        config: &Config,
        wavelength: f32,
        pulse_to_ray_ratio: usize,
        pulse_gate_count: usize,
        pulse_gate_size: f32,
    ) {
        let ratio = pulse_to_ray_ratio.max(1);
        let gate_count = pulse_gate_count / ratio;
        let gate_size = pulse_gate_size * ratio as f32;
        let prf = config.prf[0].max(1) as f32;

        self.config_id = config.i;
        self.gate_count = gate_count;
        self.pulse_gate_count = pulse_gate_count;
        self.pulse_to_ray_ratio = ratio;
        self.gate_size_meters = gate_size;
        self.noise = config.noise;
        self.snr_threshold_db = config.snr_threshold;
        self.sqi_threshold = config.sqi_threshold;

        self.velocity_factor = 0.25 * wavelength * prf / PI as f32;
        self.width_factor = wavelength * prf / (2.0 * std::f32::consts::SQRT_2 * PI as f32);
        self.kdp_factor = 1.0 / gate_size;

        let sampling_adjustment = 10.0 * (gate_size / (150.0 * ratio as f32)).log10() + 60.0;

        // One pass per filter anchor over the ray gates it owns. A config
        // with no anchors gets the whole span with neutral filter terms.
        let anchors: Vec<(usize, usize, usize)> = if config.filter_anchors.is_empty() {
            vec![(0, 0, gate_count)]
        } else {
            config
                .filter_anchors
                .iter()
                .enumerate()
                .map(|(k, anchor)| {
                    let begin = (anchor.output_origin / ratio).min(gate_count);
                    let end = ((anchor.output_origin + anchor.max_data_length) / ratio)
                        .min(gate_count);
                    (k, begin, end)
                })
                .collect()
        };

        for (filter, begin, end) in anchors {
            let sensitivity = config
                .filter_anchors
                .get(filter)
                .map(|a| a.sensitivity_gain)
                .unwrap_or(0.0);
            let filter = filter.min(crate::constants::MAX_FILTER_COUNT - 1);
            let dcal = config.system_d_cal + config.d_cal[filter];
            let pcal = wrap_phase(config.system_p_cal + config.p_cal[filter]);
            for g in begin..end {
                let range = (g as f32 * gate_size).max(1.0);
                for ch in 0..CHANNEL_COUNT {
                    self.range_correction[ch][g] = 20.0 * range.log10()
                        + config.system_z_cal[ch]
                        + config.z_cal[filter][ch]
                        - sensitivity
                        - sampling_adjustment;
                }
                self.dcal[g] = dcal;
                self.pcal[g] = pcal;
            }
        }
    }

    /// Zero the lag accumulators over the active pulse gates.
    pub fn clear_accumulators(&mut self) {
        let n = self.pulse_gate_count;
        for ch in 0..CHANNEL_COUNT {
            self.s0[ch][..n].fill(0.0);
            for lag in 0..=MAX_LAG {
                self.lags[ch][lag][..n].fill(Complex32::default());
            }
        }
        self.cross[..n].fill(Complex32::default());
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::config::{ConfigBuilder, ConfigUpdate};
    use crate::waveform::Waveform;

    #[test]
    fn factors_follow_the_radar_equation() {
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .build();
        let mut scratch = Scratch::with_capacity(64);
        scratch.prepare(&config, 0.03, 1, 64, 150.0);
        // 0.25 * lambda / prt / pi with prt = 1 ms.
        assert_abs_diff_eq!(scratch.velocity_factor, 2.387_324, epsilon = 1e-4);
        // lambda / (prt * 2 sqrt(2) pi)
        assert_abs_diff_eq!(scratch.width_factor, 3.376_389, epsilon = 1e-4);
        assert_abs_diff_eq!(scratch.kdp_factor, 1.0 / 150.0, epsilon = 1e-9);
    }

    #[test]
    fn range_correction_is_cal_only_at_gate_zero() {
        let wf = Waveform::impulse();
        let config = ConfigBuilder::from_previous(&Config::default())
            .apply(ConfigUpdate::Prf(1000))
            .apply(ConfigUpdate::SystemZCal(-43.0, -43.5))
            .apply(ConfigUpdate::ZCal(0, [1.0, 1.5]))
            .apply(ConfigUpdate::Waveform {
                name: wf.name.clone(),
                anchors: wf.anchors(),
            })
            .build();
        let mut scratch = Scratch::with_capacity(64);
        scratch.prepare(&config, 0.03, 1, 64, 150.0);
        let sampling = 10.0 * (150.0f32 / 150.0).log10() + 60.0;
        assert_abs_diff_eq!(
            scratch.range_correction[0][0],
            -43.0 + 1.0 - sampling,
            epsilon = 1e-4
        );
        // One gate out: the 20 log10(r) term appears.
        assert_abs_diff_eq!(
            scratch.range_correction[1][1],
            20.0 * 150.0f32.log10() - 43.5 + 1.5 - sampling,
            epsilon = 1e-4
        );
    }

    #[test]
    fn phase_wraps_to_half_open_interval() {
        let pi = PI as f32;
        assert_abs_diff_eq!(wrap_phase(pi), -pi);
        assert_abs_diff_eq!(wrap_phase(-pi), -pi);
        assert_abs_diff_eq!(wrap_phase(3.0 * pi), -pi, epsilon = 1e-5);
        assert_abs_diff_eq!(wrap_phase(0.5), 0.5);
    }
}
