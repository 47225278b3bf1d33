// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transmit waveforms and their matched filters.
//!
//! A waveform is one to eight groups; each group carries the filter taps
//! (the time-reversed conjugate replica is formed by the compressor) and
//! a [FilterAnchor] describing where the convolution reads and writes.
//! Frequency-hopping waveforms use one group per hop; time-frequency
//! multiplexed waveforms use groups with disjoint output gate ranges.

use num_complex::Complex32;
use thiserror::Error;

use crate::constants::{MAX_FILTER_COUNT, MAX_GATE_COUNT, PI};

#[derive(Error, Debug)]
pub enum WaveformError {
    #[error("waveform '{0}' is not recognised")]
    UnknownName(String),

    #[error("waveform would carry {0} filters; the limit is {MAX_FILTER_COUNT}")]
    TooManyFilters(usize),

    #[error("a waveform filter must have at least one tap")]
    EmptyFilter,
}

/// Where a matched filter reads, where it writes, and what it is worth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterAnchor {
    /// First gate the convolution reads.
    pub input_origin: usize,
    /// First gate the convolution writes.
    pub output_origin: usize,
    /// Number of output gates this filter owns.
    pub max_data_length: usize,
    /// Sub-carrier of this group \[radians/sample\].
    pub sub_carrier_frequency: f32,
    /// Processing gain of the filter \[dB\], removed again by the
    /// range-correction tables.
    pub sensitivity_gain: f32,
}

impl Default for FilterAnchor {
    fn default() -> FilterAnchor {
        FilterAnchor {
            input_origin: 0,
            output_origin: 0,
            max_data_length: MAX_GATE_COUNT,
            sub_carrier_frequency: 0.0,
            sensitivity_gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveformType {
    Single,
    FrequencyHopping,
    TimeFrequencyMultiplex,
}

/// One filter group: taps plus anchor.
#[derive(Debug, Clone)]
pub struct WaveformGroup {
    pub anchor: FilterAnchor,
    pub taps: Vec<Complex32>,
}

#[derive(Debug, Clone)]
pub struct Waveform {
    pub name: String,
    pub kind: WaveformType,
    pub groups: Vec<WaveformGroup>,
}

/// `10 log10` of the filter energy.
fn sensitivity_gain(taps: &[Complex32]) -> f32 {
    let energy: f32 = taps.iter().map(|t| t.norm_sqr()).sum();
    10.0 * energy.log10()
}

impl Waveform {
    fn single(name: &str, taps: Vec<Complex32>) -> Waveform {
        let anchor = FilterAnchor {
            sensitivity_gain: sensitivity_gain(&taps),
            ..Default::default()
        };
        Waveform {
            name: name.to_string(),
            kind: WaveformType::Single,
            groups: vec![WaveformGroup { anchor, taps }],
        }
    }

    /// The unit impulse: compression becomes a pass-through.
    pub fn impulse() -> Waveform {
        Waveform::single("impulse", vec![Complex32::new(1.0, 0.0)])
    }

    /// The classic 1-2-1 smoothing kernel, handy for bench checks.
    pub fn one_two_one() -> Waveform {
        Waveform::single(
            "121",
            vec![
                Complex32::new(1.0, 0.0),
                Complex32::new(2.0, 0.0),
                Complex32::new(1.0, 0.0),
            ],
        )
    }

    /// Barker code of length 3.
    pub fn barker3() -> Waveform {
        Waveform::single(
            "barker03",
            vec![
                Complex32::new(1.0, 0.0),
                Complex32::new(1.0, 0.0),
                Complex32::new(-1.0, 0.0),
            ],
        )
    }

    /// A rectangular single tone of `samples` taps at `omega`
    /// radians/sample.
    pub fn tone(name: &str, samples: usize, omega: f32) -> Result<Waveform, WaveformError> {
        if samples == 0 {
            return Err(WaveformError::EmptyFilter);
        }
        let taps = (0..samples)
            .map(|n| Complex32::from_polar(1.0, omega * n as f32))
            .collect();
        let mut waveform = Waveform::single(name, taps);
        waveform.groups[0].anchor.sub_carrier_frequency = omega;
        Ok(waveform)
    }

    /// A frequency-hopping set: `count` tones of `samples` taps spread
    /// evenly across `bandwidth` of the sampling rate `fs`. Successive
    /// pulses cycle through the groups.
    pub fn hops(
        name: &str,
        count: usize,
        samples: usize,
        fs: f64,
        bandwidth: f64,
    ) -> Result<Waveform, WaveformError> {
        if count == 0 || count > MAX_FILTER_COUNT {
            return Err(WaveformError::TooManyFilters(count));
        }
        if samples == 0 {
            return Err(WaveformError::EmptyFilter);
        }
        let groups = (0..count)
            .map(|k| {
                // Hops are laid out symmetrically about DC.
                let fraction = if count == 1 {
                    0.0
                } else {
                    k as f64 / (count - 1) as f64 - 0.5
                };
                let omega = (2.0 * PI * fraction * bandwidth / fs) as f32;
                let taps: Vec<Complex32> = (0..samples)
                    .map(|n| Complex32::from_polar(1.0, omega * n as f32))
                    .collect();
                let anchor = FilterAnchor {
                    sub_carrier_frequency: omega,
                    sensitivity_gain: sensitivity_gain(&taps),
                    ..Default::default()
                };
                WaveformGroup { anchor, taps }
            })
            .collect();
        Ok(Waveform {
            name: name.to_string(),
            kind: WaveformType::FrequencyHopping,
            groups,
        })
    }

    /// Build a waveform from its table name: `impulse`, `121`,
    /// `barker03`, `s<N>` (a tone of N microseconds), or `h<NN><MM>`
    /// (NN-MHz hops, MM hops wide).
    pub fn from_name(name: &str, fs: f64) -> Result<Waveform, WaveformError> {
        match name {
            "impulse" => Ok(Waveform::impulse()),
            "121" => Ok(Waveform::one_two_one()),
            "barker03" => Ok(Waveform::barker3()),
            _ => {
                if let Some(digits) = name.strip_prefix('s') {
                    let micros: f64 = digits
                        .parse()
                        .map_err(|_| WaveformError::UnknownName(name.to_string()))?;
                    let samples = ((micros * 1.0e-6 * fs).round() as usize).max(1);
                    return Waveform::tone(name, samples, 0.0);
                }
                if let Some(digits) = name.strip_prefix('h') {
                    if digits.len() >= 4 {
                        let mhz: f64 = digits[..2]
                            .parse()
                            .map_err(|_| WaveformError::UnknownName(name.to_string()))?;
                        let count: usize = digits[2..4]
                            .parse()
                            .map_err(|_| WaveformError::UnknownName(name.to_string()))?;
                        let samples = ((1.0e-6 * fs).round() as usize).max(1);
                        return Waveform::hops(name, count, samples, fs, mhz * 1.0e6);
                    }
                }
                Err(WaveformError::UnknownName(name.to_string()))
            }
        }
    }

    /// The anchors, ready to stamp into a config snapshot.
    pub fn anchors(&self) -> Vec<FilterAnchor> {
        self.groups.iter().map(|g| g.anchor).collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn impulse_has_unit_gain() {
        let wf = Waveform::impulse();
        assert_eq!(wf.groups.len(), 1);
        assert_abs_diff_eq!(wf.groups[0].anchor.sensitivity_gain, 0.0);
    }

    #[test]
    fn tone_gain_matches_energy() {
        let wf = Waveform::tone("s01", 10, 0.0).unwrap();
        // Ten unit taps: 10 log10(10) = 10 dB.
        assert_abs_diff_eq!(wf.groups[0].anchor.sensitivity_gain, 10.0, epsilon = 1e-5);
    }

    #[test]
    fn hops_spread_about_dc() {
        let wf = Waveform::hops("h0504", 4, 20, 20.0e6, 5.0e6).unwrap();
        assert_eq!(wf.kind, WaveformType::FrequencyHopping);
        assert_eq!(wf.groups.len(), 4);
        let omegas: Vec<f32> = wf
            .groups
            .iter()
            .map(|g| g.anchor.sub_carrier_frequency)
            .collect();
        assert_abs_diff_eq!(omegas[0], -omegas[3], epsilon = 1e-6);
        assert!(omegas.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn names_resolve() {
        assert!(Waveform::from_name("impulse", 5.0e6).is_ok());
        assert!(Waveform::from_name("barker03", 5.0e6).is_ok());
        assert!(Waveform::from_name("s01", 5.0e6).is_ok());
        assert!(Waveform::from_name("h2005", 20.0e6).is_ok());
        assert!(Waveform::from_name("nope", 5.0e6).is_err());
    }
}
