// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The raw-pulse archive.
//!
//! One binary file per capture: a fixed-size file header (radar
//! description, the baseline config, and a data-type tag), then a stream
//! of records, each a padded pulse header followed by the H and V
//! complex samples of the recorded gates. The pulse header is padded to
//! a multiple of the alignment width so the sample block lands aligned;
//! that padding is part of the format. End of file is simply EOF, and
//! trailing bytes that do not amount to a whole record are reported and
//! ignored.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{TimeZone, Utc};
use log::{debug, info, warn};
use num_complex::Complex32;
use thiserror::Error;

use crate::config::{Config, ConfigRing};
use crate::constants::{
    FILE_HEADER_SIZE, FILE_MAGIC, MAX_FILTER_COUNT, PULSE_HEADER_PADDED_SIZE, RECORDER_CACHE_SIZE,
};
use crate::foundation::{EngineState, Marker, Ring};
use crate::pulse::{Pulse, PulseSlotExt, PulseStatus};
use crate::radar::RadarDesc;

#[derive(Error, Debug)]
pub enum IqFileError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("'{0}' is not a raw pulse archive (bad magic 0x{1:08x})")]
    BadMagic(PathBuf, u32),

    #[error("unsupported raw archive version {0}")]
    BadVersion(u32),

    #[error("pulse record claims {0} gates, beyond the file's capacity {1}")]
    OversizedRecord(u32, u32),
}

/// What the samples in the archive are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawDataType {
    FromTransceiver,
    AfterMatchedFilter,
}

impl RawDataType {
    fn to_u32(self) -> u32 {
        match self {
            RawDataType::FromTransceiver => 0,
            RawDataType::AfterMatchedFilter => 1,
        }
    }

    fn from_u32(value: u32) -> RawDataType {
        if value == 1 {
            RawDataType::AfterMatchedFilter
        } else {
            RawDataType::FromTransceiver
        }
    }
}

const FILE_VERSION: u32 = 1;

fn write_fixed_str<W: Write>(w: &mut W, s: &str, width: usize) -> io::Result<()> {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    w.write_all(&bytes[..n])?;
    w.write_all(&vec![0u8; width - n])?;
    Ok(())
}

fn read_fixed_str<R: Read>(r: &mut R, width: usize) -> io::Result<String> {
    let mut buffer = vec![0u8; width];
    r.read_exact(&mut buffer)?;
    let end = buffer.iter().position(|&b| b == 0).unwrap_or(width);
    Ok(String::from_utf8_lossy(&buffer[..end]).to_string())
}

/// The fixed file header: descriptor + baseline config + data type.
pub struct FileHeader {
    pub desc: RadarDesc,
    pub config: Config,
    pub data_type: RawDataType,
}

pub fn write_file_header<W: Write>(w: &mut W, header: &FileHeader) -> Result<(), IqFileError> {
    let mut buffer = Vec::with_capacity(FILE_HEADER_SIZE);
    buffer.write_u32::<LittleEndian>(FILE_MAGIC)?;
    buffer.write_u32::<LittleEndian>(FILE_VERSION)?;
    buffer.write_u32::<LittleEndian>(header.data_type.to_u32())?;
    buffer.write_u32::<LittleEndian>(0)?;

    let desc = &header.desc;
    write_fixed_str(&mut buffer, &desc.name, 64)?;
    write_fixed_str(&mut buffer, &desc.file_prefix, 32)?;
    write_fixed_str(&mut buffer, &desc.data_path, 128)?;
    buffer.write_f64::<LittleEndian>(desc.latitude)?;
    buffer.write_f64::<LittleEndian>(desc.longitude)?;
    buffer.write_f32::<LittleEndian>(desc.heading)?;
    buffer.write_f32::<LittleEndian>(desc.radar_height)?;
    buffer.write_f32::<LittleEndian>(desc.wavelength)?;
    buffer.write_f32::<LittleEndian>(0.0)?;
    buffer.write_u32::<LittleEndian>(desc.pulse_capacity as u32)?;
    buffer.write_u32::<LittleEndian>(desc.pulse_to_ray_ratio as u32)?;
    buffer.write_u32::<LittleEndian>(desc.pulse_buffer_depth as u32)?;
    buffer.write_u32::<LittleEndian>(desc.ray_buffer_depth as u32)?;

    let config = &header.config;
    buffer.write_u32::<LittleEndian>(config.prf[0])?;
    buffer.write_u32::<LittleEndian>(config.prf[1])?;
    buffer.write_u32::<LittleEndian>(config.sprt)?;
    buffer.write_u32::<LittleEndian>(config.gate_count)?;
    buffer.write_f32::<LittleEndian>(config.pulse_width)?;
    buffer.write_f32::<LittleEndian>(config.noise[0])?;
    buffer.write_f32::<LittleEndian>(config.noise[1])?;
    buffer.write_f32::<LittleEndian>(config.system_z_cal[0])?;
    buffer.write_f32::<LittleEndian>(config.system_z_cal[1])?;
    buffer.write_f32::<LittleEndian>(config.system_d_cal)?;
    buffer.write_f32::<LittleEndian>(config.system_p_cal)?;
    buffer.write_f32::<LittleEndian>(config.snr_threshold)?;
    buffer.write_f32::<LittleEndian>(config.sqi_threshold)?;
    buffer.write_f32::<LittleEndian>(config.sweep_elevation)?;
    buffer.write_f32::<LittleEndian>(config.sweep_azimuth)?;
    buffer.write_u32::<LittleEndian>(config.start_marker.bits())?;
    write_fixed_str(&mut buffer, &config.waveform, 64)?;
    for k in 0..MAX_FILTER_COUNT {
        buffer.write_f32::<LittleEndian>(config.z_cal[k][0])?;
        buffer.write_f32::<LittleEndian>(config.z_cal[k][1])?;
    }
    for k in 0..MAX_FILTER_COUNT {
        buffer.write_f32::<LittleEndian>(config.d_cal[k])?;
    }
    for k in 0..MAX_FILTER_COUNT {
        buffer.write_f32::<LittleEndian>(config.p_cal[k])?;
    }

    debug_assert!(buffer.len() <= FILE_HEADER_SIZE);
    buffer.resize(FILE_HEADER_SIZE, 0);
    w.write_all(&buffer)?;
    Ok(())
}

pub fn read_file_header<R: Read>(r: &mut R, path: &Path) -> Result<FileHeader, IqFileError> {
    let mut buffer = vec![0u8; FILE_HEADER_SIZE];
    r.read_exact(&mut buffer)?;
    let mut cursor = io::Cursor::new(buffer);

    let magic = cursor.read_u32::<LittleEndian>()?;
    if magic != FILE_MAGIC {
        return Err(IqFileError::BadMagic(path.to_path_buf(), magic));
    }
    let version = cursor.read_u32::<LittleEndian>()?;
    if version != FILE_VERSION {
        return Err(IqFileError::BadVersion(version));
    }
    let data_type = RawDataType::from_u32(cursor.read_u32::<LittleEndian>()?);
    let _reserved = cursor.read_u32::<LittleEndian>()?;

    let mut desc = RadarDesc::default();
    desc.name = read_fixed_str(&mut cursor, 64)?;
    desc.file_prefix = read_fixed_str(&mut cursor, 32)?;
    desc.data_path = read_fixed_str(&mut cursor, 128)?;
    desc.latitude = cursor.read_f64::<LittleEndian>()?;
    desc.longitude = cursor.read_f64::<LittleEndian>()?;
    desc.heading = cursor.read_f32::<LittleEndian>()?;
    desc.radar_height = cursor.read_f32::<LittleEndian>()?;
    desc.wavelength = cursor.read_f32::<LittleEndian>()?;
    let _pad = cursor.read_f32::<LittleEndian>()?;
    desc.pulse_capacity = cursor.read_u32::<LittleEndian>()? as usize;
    desc.pulse_to_ray_ratio = cursor.read_u32::<LittleEndian>()? as usize;
    desc.pulse_buffer_depth = cursor.read_u32::<LittleEndian>()? as usize;
    desc.ray_buffer_depth = cursor.read_u32::<LittleEndian>()? as usize;

    let mut config = Config::default();
    config.prf[0] = cursor.read_u32::<LittleEndian>()?;
    config.prf[1] = cursor.read_u32::<LittleEndian>()?;
    config.sprt = cursor.read_u32::<LittleEndian>()?;
    config.gate_count = cursor.read_u32::<LittleEndian>()?;
    config.pulse_width = cursor.read_f32::<LittleEndian>()?;
    config.noise[0] = cursor.read_f32::<LittleEndian>()?;
    config.noise[1] = cursor.read_f32::<LittleEndian>()?;
    config.system_z_cal[0] = cursor.read_f32::<LittleEndian>()?;
    config.system_z_cal[1] = cursor.read_f32::<LittleEndian>()?;
    config.system_d_cal = cursor.read_f32::<LittleEndian>()?;
    config.system_p_cal = cursor.read_f32::<LittleEndian>()?;
    config.snr_threshold = cursor.read_f32::<LittleEndian>()?;
    config.sqi_threshold = cursor.read_f32::<LittleEndian>()?;
    config.sweep_elevation = cursor.read_f32::<LittleEndian>()?;
    config.sweep_azimuth = cursor.read_f32::<LittleEndian>()?;
    config.start_marker = Marker::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
    config.waveform = read_fixed_str(&mut cursor, 64)?;
    for k in 0..MAX_FILTER_COUNT {
        config.z_cal[k][0] = cursor.read_f32::<LittleEndian>()?;
        config.z_cal[k][1] = cursor.read_f32::<LittleEndian>()?;
    }
    for k in 0..MAX_FILTER_COUNT {
        config.d_cal[k] = cursor.read_f32::<LittleEndian>()?;
    }
    for k in 0..MAX_FILTER_COUNT {
        config.p_cal[k] = cursor.read_f32::<LittleEndian>()?;
    }

    Ok(FileHeader {
        desc,
        config,
        data_type,
    })
}

/// Serialize one pulse record: the padded header, then H and V samples
/// of the down-sampled gates.
pub fn write_pulse<W: Write>(w: &mut W, pulse: &Pulse) -> Result<(), IqFileError> {
    let mut buffer = Vec::with_capacity(PULSE_HEADER_PADDED_SIZE);
    let h = &pulse.header;
    buffer.write_u64::<LittleEndian>(h.i)?;
    buffer.write_u64::<LittleEndian>(h.t)?;
    buffer.write_u32::<LittleEndian>(h.time_sec)?;
    buffer.write_u32::<LittleEndian>(h.time_usec)?;
    buffer.write_f64::<LittleEndian>(h.time_double)?;
    buffer.write_u64::<LittleEndian>(h.config_id)?;
    buffer.write_u32::<LittleEndian>(h.marker.bits())?;
    buffer.write_u16::<LittleEndian>(h.waveform_group)?;
    buffer.write_u16::<LittleEndian>(h.prf_index)?;
    buffer.write_u32::<LittleEndian>(h.gate_count)?;
    buffer.write_u32::<LittleEndian>(h.down_sampled_gate_count)?;
    buffer.write_f32::<LittleEndian>(h.gate_size_meters)?;
    buffer.write_f32::<LittleEndian>(h.azimuth_degrees)?;
    buffer.write_f32::<LittleEndian>(h.elevation_degrees)?;
    buffer.write_f32::<LittleEndian>(h.azimuth_velocity_dps)?;
    buffer.write_f32::<LittleEndian>(h.elevation_velocity_dps)?;
    debug_assert!(buffer.len() <= PULSE_HEADER_PADDED_SIZE);
    buffer.resize(PULSE_HEADER_PADDED_SIZE, 0);
    w.write_all(&buffer)?;

    let gates = h.down_sampled_gate_count.min(h.gate_count) as usize;
    for channel in 0..2 {
        for sample in &pulse.channel(channel)[..gates] {
            w.write_f32::<LittleEndian>(sample.re)?;
            w.write_f32::<LittleEndian>(sample.im)?;
        }
    }
    Ok(())
}

/// Streaming reader over a raw pulse archive.
pub struct PulseFileReader {
    pub header: FileHeader,
    path: PathBuf,
    reader: BufReader<File>,
    /// Bytes found past the last whole record.
    pub trailing_bytes: usize,
    done: bool,
}

impl PulseFileReader {
    pub fn open(path: &Path) -> Result<PulseFileReader, IqFileError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = read_file_header(&mut reader, path)?;
        info!(
            "{}: '{}' {} gates, waveform '{}', {}",
            path.display(),
            header.desc.name,
            header.config.gate_count,
            header.config.waveform,
            match header.data_type {
                RawDataType::FromTransceiver => "raw",
                RawDataType::AfterMatchedFilter => "compressed",
            }
        );
        Ok(PulseFileReader {
            header,
            path: path.to_path_buf(),
            reader,
            trailing_bytes: 0,
            done: false,
        })
    }

    /// Read the next record into `pulse`. Returns false at end of file;
    /// trailing bytes short of a whole record are reported and ignored.
    pub fn next_pulse(&mut self, pulse: &mut Pulse) -> Result<bool, IqFileError> {
        if self.done {
            return Ok(false);
        }
        let mut buffer = [0u8; PULSE_HEADER_PADDED_SIZE];
        let got = read_up_to(&mut self.reader, &mut buffer)?;
        if got == 0 {
            self.done = true;
            return Ok(false);
        }
        if got < PULSE_HEADER_PADDED_SIZE {
            self.trailing(got);
            return Ok(false);
        }

        let mut cursor = io::Cursor::new(&buffer[..]);
        let h = &mut pulse.header;
        h.i = cursor.read_u64::<LittleEndian>()?;
        h.t = cursor.read_u64::<LittleEndian>()?;
        h.time_sec = cursor.read_u32::<LittleEndian>()?;
        h.time_usec = cursor.read_u32::<LittleEndian>()?;
        h.time_double = cursor.read_f64::<LittleEndian>()?;
        h.config_id = cursor.read_u64::<LittleEndian>()?;
        h.marker = Marker::from_bits_truncate(cursor.read_u32::<LittleEndian>()?);
        h.waveform_group = cursor.read_u16::<LittleEndian>()?;
        h.prf_index = cursor.read_u16::<LittleEndian>()?;
        h.gate_count = cursor.read_u32::<LittleEndian>()?;
        h.down_sampled_gate_count = cursor.read_u32::<LittleEndian>()?;
        h.gate_size_meters = cursor.read_f32::<LittleEndian>()?;
        h.azimuth_degrees = cursor.read_f32::<LittleEndian>()?;
        h.elevation_degrees = cursor.read_f32::<LittleEndian>()?;
        h.azimuth_velocity_dps = cursor.read_f32::<LittleEndian>()?;
        h.elevation_velocity_dps = cursor.read_f32::<LittleEndian>()?;

        let gates = h.down_sampled_gate_count.min(h.gate_count) as usize;
        if gates > pulse.capacity() {
            return Err(IqFileError::OversizedRecord(
                gates as u32,
                pulse.capacity() as u32,
            ));
        }
        let mut samples = vec![0u8; 2 * gates * 8];
        let got = read_up_to(&mut self.reader, &mut samples)?;
        if got < samples.len() {
            self.trailing(PULSE_HEADER_PADDED_SIZE + got);
            return Ok(false);
        }
        let mut cursor = io::Cursor::new(samples);
        for channel in 0..2 {
            for g in 0..gates {
                let re = cursor.read_f32::<LittleEndian>()?;
                let im = cursor.read_f32::<LittleEndian>()?;
                pulse.channel_mut(channel)[g] = Complex32::new(re, im);
            }
        }
        Ok(true)
    }

    fn trailing(&mut self, bytes: usize) {
        self.trailing_bytes = bytes;
        self.done = true;
        warn!(
            "{}: {} trailing bytes short of a whole record, ignored",
            self.path.display(),
            bytes
        );
    }
}

fn read_up_to<R: Read>(r: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match r.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[derive(Default)]
pub struct RecorderStats {
    pub recorded_pulses: AtomicU64,
    pub files: AtomicU64,
}

/// The raw-data recorder: archives every processed pulse through a
/// large write cache, rolling files on config change.
pub struct RawDataRecorder {
    name: String,
    desc: RadarDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    record: Arc<AtomicBool>,
    state: EngineState,
    active: Arc<AtomicBool>,
    stats: Arc<RecorderStats>,
    handle: Option<JoinHandle<()>>,
}

impl RawDataRecorder {
    pub fn new(
        desc: RadarDesc,
        configs: Arc<ConfigRing>,
        pulses: Arc<Ring<Pulse>>,
    ) -> RawDataRecorder {
        RawDataRecorder {
            name: "<RawDataRecorder>".to_string(),
            desc,
            configs,
            pulses,
            record: Arc::new(AtomicBool::new(false)),
            state: EngineState::Allocated,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RecorderStats::default()),
            handle: None,
        }
    }

    /// Toggle archiving; the pulse cursor keeps draining either way.
    pub fn set_record(&self, record: bool) {
        self.record.store(record, Ordering::Release);
    }

    pub fn stats(&self) -> &RecorderStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Activating;
        self.active.store(true, Ordering::Release);
        let runner = RecorderRunner {
            name: self.name.clone(),
            desc: self.desc.clone(),
            configs: Arc::clone(&self.configs),
            pulses: Arc::clone(&self.pulses),
            record: Arc::clone(&self.record),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
        };
        self.handle = Some(
            thread::Builder::new()
                .name("pulse-recorder".to_string())
                .spawn(move || runner.run())
                .expect("failed to spawn the pulse recorder"),
        );
        self.state = EngineState::Active;
        info!("{} started", self.name);
    }

    pub fn stop(&mut self) -> bool {
        if self.state != EngineState::Active {
            debug!("{} already deactivated", self.name);
            return false;
        }
        self.state = EngineState::Deactivating;
        self.active.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.state = EngineState::Allocated;
        info!("{} stopped", self.name);
        true
    }
}

impl Drop for RawDataRecorder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RecorderRunner {
    name: String,
    desc: RadarDesc,
    configs: Arc<ConfigRing>,
    pulses: Arc<Ring<Pulse>>,
    record: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    stats: Arc<RecorderStats>,
}

impl RecorderRunner {
    fn open_file(&self, pulse_time_sec: u32, config: &Config) -> Option<BufWriter<File>> {
        let stamp = Utc.timestamp_opt(pulse_time_sec as i64, 0).single()?;
        let path = Path::new(&self.desc.data_path)
            .join("iq")
            .join(stamp.format("%Y%m%d").to_string())
            .join(format!(
                "{}-{}.rkr",
                self.desc.file_prefix,
                stamp.format("%Y%m%d-%H%M%S")
            ));
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!("{} cannot create {}: {}", self.name, parent.display(), e);
                return None;
            }
        }
        let file = match File::create(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("{} cannot create {}: {}", self.name, path.display(), e);
                return None;
            }
        };
        let mut writer = BufWriter::with_capacity(RECORDER_CACHE_SIZE, file);
        let header = FileHeader {
            desc: self.desc.clone(),
            config: config.clone(),
            data_type: RawDataType::AfterMatchedFilter,
        };
        if let Err(e) = write_file_header(&mut writer, &header) {
            warn!("{} header write failed: {}", self.name, e);
            return None;
        }
        info!("{} recording {}", self.name, path.display());
        self.stats.files.fetch_add(1, Ordering::Relaxed);
        Some(writer)
    }

    fn run(self) {
        let mut k: u64 = 0;
        let mut writer: Option<BufWriter<File>> = None;
        let mut file_config: u64 = u64::MAX;

        'outer: while self.active.load(Ordering::Acquire) {
            while k >= self.pulses.head() {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(10));
            }
            let slot = self.pulses.slot_at(k);
            while !slot.has_pulse_status(PulseStatus::PROCESSED) {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(1));
            }

            if self.record.load(Ordering::Acquire) {
                let pulse: &Pulse = unsafe { slot.get() };
                // Roll the file when the operating configuration moves.
                if pulse.header.config_id != file_config {
                    file_config = pulse.header.config_id;
                    if let Some(mut old) = writer.take() {
                        let _ = old.flush();
                    }
                    let config = self
                        .configs
                        .get(file_config)
                        .unwrap_or_else(|| self.configs.latest());
                    writer = self.open_file(pulse.header.time_sec, &config);
                }
                if let Some(w) = writer.as_mut() {
                    if let Err(e) = write_pulse(w, pulse) {
                        warn!("{} write failed: {}", self.name, e);
                        writer = None;
                    } else {
                        self.stats.recorded_pulses.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            k += 1;
        }
        if let Some(mut w) = writer.take() {
            let _ = w.flush();
        }
        debug!("{} runner ended", self.name);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn test_pulse(i: u64, gates: u32) -> Pulse {
        let mut pulse = Pulse::with_capacity(gates as usize);
        pulse.header.i = i;
        pulse.header.gate_count = gates;
        pulse.header.down_sampled_gate_count = gates;
        pulse.header.gate_size_meters = 150.0;
        pulse.header.azimuth_degrees = 42.5;
        for g in 0..gates as usize {
            pulse.channel_mut(0)[g] = Complex32::new(i as f32, g as f32);
            pulse.channel_mut(1)[g] = Complex32::new(-(i as f32), -(g as f32));
        }
        pulse
    }

    #[test]
    fn archive_round_trips_bit_exact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("capture.rkr");

        let mut config = Config::default();
        config.waveform = "s01".to_string();
        config.gate_count = 12;
        let header = FileHeader {
            desc: RadarDesc {
                name: "PX-10k".to_string(),
                ..Default::default()
            },
            config,
            data_type: RawDataType::FromTransceiver,
        };

        {
            let mut w = BufWriter::new(File::create(&path).unwrap());
            write_file_header(&mut w, &header).unwrap();
            for i in 0..5u64 {
                write_pulse(&mut w, &test_pulse(i, 12)).unwrap();
            }
        }

        let mut reader = PulseFileReader::open(&path).unwrap();
        assert_eq!(reader.header.desc.name, "PX-10k");
        assert_eq!(reader.header.config.waveform, "s01");
        assert_eq!(reader.header.data_type, RawDataType::FromTransceiver);

        let mut pulse = Pulse::with_capacity(64);
        let mut count = 0u64;
        while reader.next_pulse(&mut pulse).unwrap() {
            assert_eq!(pulse.header.i, count);
            assert_eq!(pulse.header.gate_count, 12);
            for g in 0..12 {
                assert_eq!(pulse.channel(0)[g], Complex32::new(count as f32, g as f32));
                assert_eq!(
                    pulse.channel(1)[g],
                    Complex32::new(-(count as f32), -(g as f32))
                );
            }
            count += 1;
        }
        assert_eq!(count, 5);
        assert_eq!(reader.trailing_bytes, 0);
    }

    #[test]
    fn trailing_garbage_is_reported_and_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.rkr");
        {
            let mut w = BufWriter::new(File::create(&path).unwrap());
            let header = FileHeader {
                desc: RadarDesc::default(),
                config: Config::default(),
                data_type: RawDataType::FromTransceiver,
            };
            write_file_header(&mut w, &header).unwrap();
            for i in 0..3u64 {
                write_pulse(&mut w, &test_pulse(i, 8)).unwrap();
            }
            // A torn record at the tail.
            w.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x01]).unwrap();
        }

        let mut reader = PulseFileReader::open(&path).unwrap();
        let mut pulse = Pulse::with_capacity(16);
        let mut count = 0;
        while reader.next_pulse(&mut pulse).unwrap() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(reader.trailing_bytes, 5);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-an-archive");
        std::fs::write(&path, vec![0u8; FILE_HEADER_SIZE]).unwrap();
        assert!(matches!(
            PulseFileReader::open(&path),
            Err(IqFileError::BadMagic(_, 0))
        ));
    }
}
