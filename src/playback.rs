// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Offline product generation from raw-pulse archives.
//!
//! The live pipeline's estimators, fed from a file instead of the
//! transceiver: read an archive back, regroup the pulses into rays with
//! the same beam-bin rule the moment engine uses, and optionally write
//! the result out as sweep product files.

use std::path::{Path, PathBuf};

use log::info;
use vec1::Vec1;

use crate::constants::MAX_PULSES_PER_RAY;
use crate::error::RadarError;
use crate::foundation::Marker;
use crate::iq::PulseFileReader;
use crate::moments::{self, MomentMethod, Scratch};
use crate::pulse::{aligned_capacity, Pulse};
use crate::ray::{Ray, RaySnapshot};
use crate::sweep::{netcdf, Sweep};

/// Read an archive and compute one ray per beam bin.
pub fn rays_from_archive(path: &Path, method: MomentMethod) -> Result<Vec<RaySnapshot>, RadarError> {
    let mut reader = PulseFileReader::open(path)?;
    let desc = reader.header.desc.clone();
    let config = reader.header.config.clone();
    let scan = config.start_marker.scan_type();
    let ratio = desc.pulse_to_ray_ratio.max(1);

    let capacity = aligned_capacity(
        desc.pulse_capacity
            .max(config.gate_count as usize)
            .max(1),
    );

    let mut pulses: Vec<Pulse> = Vec::new();
    loop {
        let mut pulse = Pulse::with_capacity(capacity);
        if !reader.next_pulse(&mut pulse)? {
            break;
        }
        pulses.push(pulse);
    }
    info!(
        "{}: {} pulses ({} trailing bytes)",
        path.display(),
        pulses.len(),
        reader.trailing_bytes
    );

    let mut scratch = Scratch::with_capacity(capacity);
    let mut rays: Vec<RaySnapshot> = Vec::new();
    let mut group: Vec<usize> = Vec::new();
    let mut previous_bin: Option<i64> = None;

    let mut close_group = |group: &[usize], scratch: &mut Scratch| {
        if group.len() < 3 {
            return;
        }
        let views: Vec<moments::PulseView> = group
            .iter()
            .map(|&k| {
                let pulse = &pulses[k];
                moments::PulseView {
                    header: &pulse.header,
                    h: pulse.channel(0),
                    v: pulse.channel(1),
                }
            })
            .collect();
        let last = views[views.len() - 1].header;
        scratch.prepare(
            &config,
            desc.wavelength,
            ratio,
            last.gate_count as usize,
            last.gate_size_meters,
        );

        let (max_lag, pair_lag) = match method {
            MomentMethod::PulsePair => (1usize, 1usize),
            MomentMethod::PulsePairHop => (2, 2),
            MomentMethod::MultiLag(l) => (l.clamp(2, 5), 0),
        };
        moments::accumulate(scratch, &views, max_lag.min(views.len() - 1));
        match method {
            MomentMethod::MultiLag(l) => moments::multilag_estimate(scratch, views.len(), l),
            _ => moments::pulse_pair_estimate(
                scratch,
                views.len(),
                pair_lag.min(views.len() - 1).max(1),
            ),
        }

        let marker = views
            .iter()
            .fold(Marker::empty(), |m, v| m | v.header.marker)
            | scan;
        let first = *views[0].header;
        let last = *last;
        drop(views);

        let mut ray = Ray::with_capacity(scratch.gate_count.max(1));
        moments::populate_ray(scratch, &first, &last, marker, group.len(), &config, &mut ray);
        ray.header.i = rays.len() as u64;
        rays.push(RaySnapshot::of(&ray));
    };

    let mut start = 0usize;
    for k in 0..pulses.len() {
        let header = &pulses[k].header;
        let bin = moments::bin_index(scan, header.azimuth_degrees, header.elevation_degrees);
        let boundary = match previous_bin {
            Some(previous) => previous != bin || (k - start) >= MAX_PULSES_PER_RAY,
            None => false,
        };
        if boundary {
            // The boundary pulse is shared: it closes this ray and
            // opens the next.
            group.clear();
            group.extend(start..=k);
            close_group(&group, &mut scratch);
            start = k;
        }
        previous_bin = Some(bin);
    }
    // The tail group has no boundary pulse to close it.
    if pulses.len() > start {
        group.clear();
        group.extend(start..pulses.len());
        close_group(&group, &mut scratch);
    }

    Ok(rays)
}

/// Read an archive, compute its rays, and bundle them as one sweep.
pub fn sweep_from_archive(path: &Path, method: MomentMethod) -> Result<Option<Sweep>, RadarError> {
    let reader = PulseFileReader::open(path)?;
    let config = reader.header.config.clone();
    drop(reader);

    let rays = rays_from_archive(path, method)?;
    Ok(Vec1::try_from_vec(rays)
        .ok()
        .map(|rays| Sweep { rays, config }))
}

/// The full offline path: archive in, sweep product files out. Returns
/// the files written.
pub fn products_from_archive(
    path: &Path,
    method: MomentMethod,
) -> Result<Vec<PathBuf>, RadarError> {
    let desc = PulseFileReader::open(path)?.header.desc.clone();
    match sweep_from_archive(path, method)? {
        Some(sweep) => Ok(netcdf::write_sweep(&desc, &sweep)?),
        None => Ok(Vec::new()),
    }
}
