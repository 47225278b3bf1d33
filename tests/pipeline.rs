// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! End-to-end pipeline scenarios: synthetic pulses and positions in,
//! rays and sweeps out.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use serial_test::serial;
use tempfile::TempDir;

use radarkit::config::Config;
use radarkit::iq::{write_file_header, write_pulse, FileHeader, RawDataType};
use radarkit::playback;
use radarkit::pulse::Pulse;
use radarkit::radar::RadarCore;
use radarkit::sim::{TestHealthRelay, TestPedestal, TestTransceiver};
use radarkit::sweep::FnSink;
use radarkit::{
    ConfigUpdate, Marker, MomentMethod, Product, Radar, RadarDesc, RadarError, Sweep, Waveform,
};

const T0: f64 = 1_600_000_000.0;

fn quiet_desc(root: &std::path::Path) -> RadarDesc {
    RadarDesc {
        data_path: root.to_string_lossy().to_string(),
        pulse_capacity: 32,
        pulse_buffer_depth: 2048,
        ray_buffer_depth: 128,
        position_buffer_depth: 4096,
        pulse_compression_cores: 2,
        moment_cores: 2,
        pulse_to_ray_ratio: 1,
        position_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

fn feed_position(core: &RadarCore, t: f64, azimuth: f32, elevation: f32, marker: Marker) {
    let mut position = core.get_vacant_position();
    position.time_double = t;
    position.azimuth_degrees = azimuth;
    position.elevation_degrees = elevation;
    position.sweep_elevation_degrees = elevation;
    position.marker = marker;
    position.set_ready();
}

/// A pulse with a hard target in gate zero and silence elsewhere.
fn feed_pulse(core: &RadarCore, t: f64) {
    let mut pulse = core.get_vacant_pulse();
    pulse.header.time_double = t;
    pulse.header.time_sec = t as u32;
    pulse.header.time_usec = ((t - (t as u32) as f64) * 1.0e6) as u32;
    pulse.header.gate_count = 32;
    pulse.header.gate_size_meters = 150.0;
    for channel in 0..2 {
        let samples = pulse.channel_mut(channel);
        samples.fill(num_complex::Complex32::default());
        samples[0] = num_complex::Complex32::new(1.0, 0.0);
    }
    pulse.set_has_data();
}

fn calibrated_radar(
    desc: RadarDesc,
) -> (Radar, mpsc::Receiver<Sweep>) {
    let (tx, rx) = mpsc::channel();
    let mut radar = Radar::with_sweep_sink(
        desc,
        Box::new(FnSink(move |sweep: Sweep| {
            let _ = tx.send(sweep);
        })),
    )
    .unwrap();
    radar.set_waveform(Waveform::impulse());
    radar.set_moment_method(MomentMethod::PulsePair);
    radar.add_config([
        ConfigUpdate::Prf(1000),
        ConfigUpdate::Noise(1.0e-6, 1.0e-6),
        ConfigUpdate::SystemZCal(-43.0, -43.0),
        ConfigUpdate::SweepElevation(2.4),
        ConfigUpdate::PositionMarker(Marker::PPI_SCAN),
    ]);
    (radar, rx)
}

#[test]
#[serial]
fn impulse_ppi_sweep_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (mut radar, sweeps) = calibrated_radar(quiet_desc(dir.path()));
    radar.go_live().unwrap();

    // The pedestal sweeps 0..50 degrees at 100 deg/s; sweep-end fires
    // at the 45-degree fix.
    let position_count = 100;
    for i in 0..position_count {
        let azimuth = 0.5 * i as f32;
        let marker = Marker::PPI_SCAN
            | if i == 0 {
                Marker::SWEEP_BEGIN
            } else if azimuth == 45.0 {
                Marker::SWEEP_END
            } else {
                Marker::empty()
            };
        feed_position(&radar.core, T0 + 0.005 * i as f64, azimuth, 2.4, marker);
    }
    // One pulse per millisecond underneath: ten per beam.
    for i in 0..470 {
        feed_pulse(&radar.core, T0 + 0.0025 + 0.001 * i as f64);
    }

    let sweep = sweeps
        .recv_timeout(Duration::from_secs(20))
        .expect("no sweep came out of the pipeline");
    radar.stop().unwrap();

    // 45 degrees of beams, give or take the edges.
    assert!(
        (43..=47).contains(&sweep.ray_count()),
        "unexpected ray count {}",
        sweep.ray_count()
    );
    let first = sweep.rays.first();
    assert!(first.header.marker.contains(Marker::SWEEP_BEGIN));

    let sampling_adjustment = 10.0 * (150.0f32 / 150.0).log10() + 60.0;
    for ray in sweep.rays.iter() {
        assert_eq!(ray.header.gate_count, 32);
        assert_abs_diff_eq!(ray.header.gate_size_meters, 150.0);
        assert!(ray.header.pulse_count >= 3);
        assert!(ray.header.start_time_double <= ray.header.end_time_double);
        // All power sits in gate zero: cal terms only.
        assert_abs_diff_eq!(
            ray.product(Product::Z)[0],
            -43.0 - sampling_adjustment,
            epsilon = 0.1
        );
        // Far gates sit on the noise floor, well below the target.
        assert!(ray.product(Product::Z)[20] < ray.product(Product::Z)[0] - 25.0);
    }

    // Beams arrive in azimuth order.
    let azimuths: Vec<f32> = sweep.rays.iter().map(|r| r.header.start_azimuth).collect();
    for pair in azimuths.windows(2) {
        assert!(pair[1] > pair[0] - 0.5, "beams out of order: {pair:?}");
    }
}

#[test]
#[serial]
fn config_change_takes_effect_at_a_ray_boundary() {
    let dir = TempDir::new().unwrap();
    let (mut radar, sweeps) = calibrated_radar(quiet_desc(dir.path()));
    radar.go_live().unwrap();

    let before = radar.core.configs.latest_id();

    // 0..12 degrees at 100 deg/s, sweep-end at ten degrees.
    for i in 0..25 {
        let azimuth = 0.5 * i as f32;
        let marker = Marker::PPI_SCAN
            | if i == 0 {
                Marker::SWEEP_BEGIN
            } else if azimuth == 10.0 {
                Marker::SWEEP_END
            } else {
                Marker::empty()
            };
        feed_position(&radar.core, T0 + 0.005 * i as f64, azimuth, 2.4, marker);
    }
    // Five beams in, the operator retunes the PRF.
    for i in 0..55 {
        feed_pulse(&radar.core, T0 + 0.0025 + 0.001 * i as f64);
    }
    radar.set_prf(2000, None);
    let after = radar.core.configs.latest_id();
    for i in 55..115 {
        feed_pulse(&radar.core, T0 + 0.0025 + 0.001 * i as f64);
    }

    let sweep = sweeps
        .recv_timeout(Duration::from_secs(20))
        .expect("no sweep came out of the pipeline");
    radar.stop().unwrap();

    // Rays bind to the config of their last pulse, so the change lands
    // exactly at a ray boundary and never splits a ray.
    let ids: Vec<u64> = sweep.rays.iter().map(|r| r.header.config_id).collect();
    assert!(ids.iter().any(|&i| i <= before));
    assert!(ids.iter().any(|&i| i >= after));
    for pair in ids.windows(2) {
        assert!(pair[1] >= pair[0], "config ids regressed: {pair:?}");
    }
    // The sweep's own config is a full snapshot with the sweep target.
    assert_abs_diff_eq!(sweep.config.sweep_elevation, 2.4);
}

fn archive_pulse(i: u64, azimuth: f32) -> Pulse {
    let mut pulse = Pulse::with_capacity(16);
    pulse.header.i = i;
    pulse.header.gate_count = 16;
    pulse.header.down_sampled_gate_count = 16;
    pulse.header.gate_size_meters = 150.0;
    pulse.header.azimuth_degrees = azimuth;
    pulse.header.elevation_degrees = 2.4;
    pulse.header.time_double = T0 + 0.001 * i as f64;
    pulse.header.time_sec = pulse.header.time_double as u32;
    pulse.channel_mut(0)[0] = num_complex::Complex32::new(1.0, 0.0);
    pulse.channel_mut(1)[0] = num_complex::Complex32::new(1.0, 0.0);
    pulse
}

fn write_archive(path: &std::path::Path, trailing_garbage: bool, data_path: &std::path::Path) {
    let mut config = Config::default();
    config.gate_count = 16;
    config.noise = [1.0e-6, 1.0e-6];
    config.start_marker = Marker::PPI_SCAN;
    config.waveform = "impulse".to_string();
    let header = FileHeader {
        desc: RadarDesc {
            pulse_capacity: 16,
            pulse_to_ray_ratio: 1,
            data_path: data_path.to_string_lossy().to_string(),
            ..Default::default()
        },
        config,
        data_type: RawDataType::AfterMatchedFilter,
    };
    let mut w = BufWriter::new(File::create(path).unwrap());
    write_file_header(&mut w, &header).unwrap();
    let mut i = 0u64;
    // Ten pulses at 45.x, ten at 46.x, four at 47.x.
    for azimuth in [45.3f32, 46.2, 47.1] {
        let n = if azimuth > 47.0 { 4 } else { 10 };
        for k in 0..n {
            write_pulse(&mut w, &archive_pulse(i, azimuth + 0.02 * k as f32)).unwrap();
            i += 1;
        }
    }
    if trailing_garbage {
        w.write_all(&[0x55; 37]).unwrap();
    }
}

#[test]
fn archived_pulses_regenerate_the_same_rays_despite_trailing_garbage() {
    let dir = TempDir::new().unwrap();
    let clean = dir.path().join("clean.rkr");
    let dirty = dir.path().join("dirty.rkr");
    write_archive(&clean, false, dir.path());
    write_archive(&dirty, true, dir.path());

    let clean_rays = playback::rays_from_archive(&clean, MomentMethod::PulsePair).unwrap();
    let dirty_rays = playback::rays_from_archive(&dirty, MomentMethod::PulsePair).unwrap();

    // Three azimuth bins, all large enough to produce rays.
    assert_eq!(clean_rays.len(), 3);
    assert_eq!(dirty_rays.len(), clean_rays.len());
    for (a, b) in clean_rays.iter().zip(dirty_rays.iter()) {
        assert_eq!(a.header.gate_count, b.header.gate_count);
        assert_eq!(a.product(Product::Z), b.product(Product::Z));
        assert_eq!(a.product(Product::V), b.product(Product::V));
    }
    assert_abs_diff_eq!(clean_rays[0].header.start_azimuth, 45.3);

    // The whole offline path: archive in, product files out.
    let written = playback::products_from_archive(&clean, MomentMethod::PulsePair).unwrap();
    assert!(!written.is_empty());
}

#[test]
#[serial]
fn simulators_drive_the_live_pipeline() {
    let dir = TempDir::new().unwrap();
    let mut desc = quiet_desc(dir.path());
    desc.pulse_capacity = 64;
    let (mut radar, _sweeps) = calibrated_radar(desc);

    radar.set_transceiver(Box::new(TestTransceiver::new(1000, 60)));
    radar.set_pedestal(Box::new(TestPedestal::with_scan(2.4, 45.0)));
    radar.set_health_relay(Box::new(TestHealthRelay::new()));
    radar.set_record(true);
    radar.go_live().unwrap();

    // Rays should start flowing within a few beam-widths of wall time.
    let deadline = Instant::now() + Duration::from_secs(15);
    while radar.core.rays.head() < 10 {
        assert!(Instant::now() < deadline, "no rays out of the live pipeline");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Health reports arrive at about a hertz.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(health) = radar.core.latest_health() {
            assert!(health.value().is_some());
            break;
        }
        assert!(Instant::now() < deadline, "no health report arrived");
        std::thread::sleep(Duration::from_millis(50));
    }

    // Text commands route to the delegates and back.
    let reply = radar.execute_command("p ppi 3.0 45").unwrap();
    assert!(reply.starts_with("ACK"));
    let reply = radar.execute_command("t w s01").unwrap();
    assert!(reply.starts_with("ACK"));
    let reply = radar.execute_command("f 1500").unwrap();
    assert!(reply.starts_with("ACK"));
    assert!(matches!(
        radar.execute_command("nonsense"),
        Err(RadarError::BadCommand(_))
    ));

    let tagged = radar
        .tagger_engine()
        .stats()
        .tagged_pulses
        .load(std::sync::atomic::Ordering::Relaxed);
    assert!(tagged > 0);

    radar.stop().unwrap();

    // The recorder archived the run; the capture reads back.
    let iq_root = dir.path().join("iq");
    let mut captures = Vec::new();
    if iq_root.is_dir() {
        for day in std::fs::read_dir(&iq_root).unwrap() {
            for file in std::fs::read_dir(day.unwrap().path()).unwrap() {
                captures.push(file.unwrap().path());
            }
        }
    }
    assert!(!captures.is_empty(), "the recorder wrote no captures");
    let mut reader = radarkit::PulseFileReader::open(&captures[0]).unwrap();
    let mut pulse = Pulse::with_capacity(64);
    let mut count = 0;
    while reader.next_pulse(&mut pulse).unwrap() {
        count += 1;
    }
    assert!(count > 0, "the capture held no pulses");
}
