// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sweep product files.
//!
//! One NetCDF file per product per sweep, WDSS-II flavoured: the
//! required global attributes, the `Azimuth`/`Elevation`/`Beamwidth`/
//! `GateWidth` coordinate variables and one two-dimensional product
//! variable. Censored gates go out as the `-99900` sentinel; PhiDP and
//! KDP convert from radians to degrees on the way out.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use log::{debug, warn};
use ndarray::Array2;
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::constants::{W2_MISSING_DATA, W2_RANGE_FOLDED};
use crate::foundation::Marker;
use crate::radar::RadarDesc;
use crate::ray::Product;

use super::{Sweep, SweepSink};

#[derive(Error, Debug)]
pub enum SweepWriteError {
    #[error("unable to create '{path}': {source}")]
    Create {
        path: PathBuf,
        source: netcdf::error::Error,
    },

    #[error(transparent)]
    Netcdf(#[from] netcdf::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum SweepReadError {
    #[error(transparent)]
    Netcdf(#[from] netcdf::error::Error),

    #[error("'{0}' is missing required attribute {1}")]
    MissingAttribute(PathBuf, &'static str),

    #[error("'{0}' is missing variable {1}")]
    MissingVariable(PathBuf, &'static str),
}

/// The moment-file directory and name for one product of one sweep:
/// `<dataPath>/moment/YYYYMMDD/<prefix>-YYYYMMDD-HHMMSS-{E|A|N}...-<symbol>.nc`
pub fn sweep_filename(desc: &RadarDesc, sweep: &Sweep, product: Product) -> PathBuf {
    let first = sweep.rays.first();
    let stamp = Utc
        .timestamp_opt(first.header.start_time_sec as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
    let day = stamp.format("%Y%m%d");
    let time = stamp.format("%Y%m%d-%H%M%S");

    let geometry = if sweep.config.start_marker.is_ppi() {
        format!("E{:.1}", sweep.config.sweep_elevation)
    } else if sweep.config.start_marker.is_rhi() {
        format!("A{:.1}", sweep.config.sweep_azimuth)
    } else {
        format!("N{:03}", sweep.ray_count())
    };

    Path::new(&desc.data_path)
        .join("moment")
        .join(day.to_string())
        .join(format!(
            "{}-{}-{}-{}.nc",
            desc.file_prefix,
            time,
            geometry,
            product.symbol()
        ))
}

fn put_1d(
    file: &mut netcdf::MutableFile,
    name: &str,
    dimension: &str,
    unit: &str,
    values: &[f32],
) -> Result<(), SweepWriteError> {
    let mut var = file.add_variable::<f32>(name, &[dimension])?;
    var.put_values(values, None, None)?;
    var.add_attribute("Units", unit)?;
    Ok(())
}

/// Write every product the sweep carries; returns the paths created.
pub fn write_sweep(desc: &RadarDesc, sweep: &Sweep) -> Result<Vec<PathBuf>, SweepWriteError> {
    let first = sweep.rays.first();
    let n = sweep.ray_count();
    let gate_count = first.header.gate_count as usize;
    let config = &sweep.config;
    let product_list = first.header.product_list;

    let beam_dimension = if first.header.marker.is_ppi() {
        "Azimuth"
    } else if first.header.marker.is_rhi() {
        "Elevation"
    } else {
        "Beam"
    };

    // Coordinate data is shared by every product file.
    let azimuths: Vec<f32> = sweep.rays.iter().map(|r| r.header.start_azimuth).collect();
    let elevations: Vec<f32> = sweep.rays.iter().map(|r| r.header.start_elevation).collect();
    let beamwidths: Vec<f32> = sweep
        .rays
        .iter()
        .map(|r| crate::foundation::angle_diff(r.header.end_azimuth, r.header.start_azimuth).abs())
        .collect();
    let gate_widths: Vec<f32> = sweep
        .rays
        .iter()
        .map(|r| r.header.gate_size_meters)
        .collect();

    let nyquist = 0.25 * desc.wavelength * config.prf[0] as f32;
    let mut written = Vec::new();

    for product in Product::iter() {
        if product_list & product.bit() == 0 {
            continue;
        }
        let path = sweep_filename(desc, sweep, product);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!("creating {}", path.display());
        let mut file = netcdf::create(&path).map_err(|source| SweepWriteError::Create {
            path: path.clone(),
            source,
        })?;

        file.add_dimension(beam_dimension, n)?;
        file.add_dimension("Gate", gate_count)?;

        put_1d(&mut file, "Azimuth", beam_dimension, "Degrees", &azimuths)?;
        put_1d(&mut file, "Elevation", beam_dimension, "Degrees", &elevations)?;
        put_1d(&mut file, "Beamwidth", beam_dimension, "Degrees", &beamwidths)?;
        put_1d(&mut file, "GateWidth", beam_dimension, "Meters", &gate_widths)?;

        // The product plane, sentinel-filled and unit-converted.
        let mut plane = Array2::<f32>::zeros((n, gate_count));
        let to_degrees = product.written_in_degrees();
        for (j, ray) in sweep.rays.iter().enumerate() {
            let source = ray.product(product);
            for g in 0..gate_count {
                let value = source.get(g).copied().unwrap_or(f32::NAN);
                plane[(j, g)] = if value.is_finite() {
                    if to_degrees {
                        value.to_degrees()
                    } else {
                        value
                    }
                } else {
                    W2_MISSING_DATA
                };
            }
        }
        {
            let mut var = file.add_variable::<f32>(product.type_name(), &[beam_dimension, "Gate"])?;
            #[cfg(feature = "netcdf4-deflate")]
            var.compression(3)?;
            var.put_values(plane.as_slice().expect("plane is contiguous"), None, None)?;
            var.add_attribute("Units", product.unit())?;
        }

        // Global attributes, WDSS-II required set first.
        file.add_attribute("TypeName", product.type_name())?;
        file.add_attribute("DataType", "RadialSet")?;
        if first.header.marker.is_ppi() {
            file.add_attribute("ScanType", "PPI")?;
        } else if first.header.marker.is_rhi() {
            file.add_attribute("ScanType", "RHI")?;
        }
        file.add_attribute("Latitude", desc.latitude)?;
        file.add_attribute("Longitude", desc.longitude)?;
        file.add_attribute("Heading", desc.heading)?;
        file.add_attribute("Height", desc.radar_height)?;
        file.add_attribute("Time", first.header.start_time_sec as i64)?;
        file.add_attribute(
            "FractionalTime",
            first.header.start_time_usec as f32 * 1.0e-6,
        )?;
        if config.start_marker.is_ppi() {
            file.add_attribute("Elevation", config.sweep_elevation)?;
            file.add_attribute("Azimuth", W2_MISSING_DATA)?;
        } else if config.start_marker.is_rhi() {
            file.add_attribute("Elevation", W2_MISSING_DATA)?;
            file.add_attribute("Azimuth", config.sweep_azimuth)?;
        } else {
            file.add_attribute("Elevation", W2_MISSING_DATA)?;
            file.add_attribute("Azimuth", W2_MISSING_DATA)?;
        }
        file.add_attribute("ElevationUnits", "Degrees")?;
        file.add_attribute("AzimuthUnits", "Degrees")?;
        file.add_attribute("RangeToFirstGate", 0.0f32)?;
        file.add_attribute("RangeToFirstGateUnits", "Meters")?;
        file.add_attribute("MissingData", W2_MISSING_DATA)?;
        file.add_attribute("RangeFolded", W2_RANGE_FOLDED)?;
        file.add_attribute("Nyquist_Vel-unit", "MetersPerSecond")?;
        file.add_attribute("Nyquist_Vel-value", nyquist)?;
        file.add_attribute("Unit-unit", "dimensionless")?;
        file.add_attribute("Unit-value", product.unit())?;
        file.add_attribute("radarName-unit", "dimensionless")?;
        file.add_attribute("radarName-value", desc.name.as_str())?;
        file.add_attribute("vcp-unit", "dimensionless")?;
        file.add_attribute("vcp-value", "1")?;
        file.add_attribute("ColorMap-unit", "dimensionless")?;
        file.add_attribute("ColorMap-value", product.colormap())?;
        file.add_attribute("Waveform", config.waveform.as_str())?;
        file.add_attribute("RadarParameters", "PRF PulseWidth MaximumRange")?;
        file.add_attribute("PRF-unit", "Hertz")?;
        file.add_attribute("PRF-value", config.prf[0] as i32)?;
        file.add_attribute("PulseWidth-unit", "MicroSeconds")?;
        file.add_attribute("PulseWidth-value", config.pulse_width * 1.0e6)?;
        file.add_attribute("MaximumRange-unit", "KiloMeters")?;
        file.add_attribute(
            "MaximumRange-value",
            1.0e-3 * first.header.gate_size_meters * gate_count as f32,
        )?;
        file.add_attribute("ProcessParameters", "Noise Calib Censor")?;
        file.add_attribute("NoiseH-unit", "dB-ADU")?;
        file.add_attribute("NoiseH-value", 20.0 * config.noise[0].log10())?;
        file.add_attribute("NoiseV-unit", "dB-ADU")?;
        file.add_attribute("NoiseV-value", 20.0 * config.noise[1].log10())?;
        file.add_attribute("CalibH-unit", "dB")?;
        file.add_attribute("CalibH-value", config.z_cal[0][0])?;
        file.add_attribute("CalibV-unit", "dB")?;
        file.add_attribute("CalibV-value", config.z_cal[0][1])?;
        file.add_attribute("CalibD1-unit", "dB")?;
        file.add_attribute("CalibD1-value", config.d_cal[0])?;
        file.add_attribute("CalibP1-unit", "Degrees")?;
        file.add_attribute("CalibP1-value", config.p_cal[0])?;
        file.add_attribute("CensorThreshold-unit", "dB")?;
        file.add_attribute("CensorThreshold-value", config.snr_threshold)?;
        file.add_attribute("CreatedBy", "RadarKit")?;

        written.push(path);
    }
    Ok(written)
}

/// One product file read back for verification or offline use.
pub struct SweepFile {
    pub type_name: String,
    pub scan_type: Option<String>,
    pub azimuths: Vec<f32>,
    pub elevations: Vec<f32>,
    pub gate_widths: Vec<f32>,
    pub data: Array2<f32>,
    pub missing_data: f32,
    pub nyquist: Option<f32>,
    pub prf: Option<i32>,
    pub created_by: Option<String>,
}

fn string_attr(file: &netcdf::File, name: &str) -> Option<String> {
    file.attribute(name)
        .and_then(|a| a.value().ok())
        .and_then(|v| match v {
            netcdf::AttrValue::Str(s) => Some(s),
            netcdf::AttrValue::Uchar(u) => Some(String::from_utf8_lossy(&u).to_string()),
            _ => None,
        })
}

fn float_attr(file: &netcdf::File, name: &str) -> Option<f32> {
    file.attribute(name)
        .and_then(|a| a.value().ok())
        .and_then(|v| match v {
            netcdf::AttrValue::Float(f) => Some(f),
            netcdf::AttrValue::Double(d) => Some(d as f32),
            _ => None,
        })
}

fn int_attr(file: &netcdf::File, name: &str) -> Option<i32> {
    file.attribute(name)
        .and_then(|a| a.value().ok())
        .and_then(|v| match v {
            netcdf::AttrValue::Int(i) => Some(i),
            netcdf::AttrValue::Longlong(l) => Some(l as i32),
            _ => None,
        })
}

fn var_1d(file: &netcdf::File, path: &Path, name: &'static str) -> Result<Vec<f32>, SweepReadError> {
    let var = file
        .variable(name)
        .ok_or_else(|| SweepReadError::MissingVariable(path.to_path_buf(), name))?;
    Ok(var.get(..)?)
}

/// Read one sweep product file back.
pub fn read_sweep(path: &Path) -> Result<SweepFile, SweepReadError> {
    let file = netcdf::open(path)?;

    let type_name = string_attr(&file, "TypeName")
        .ok_or_else(|| SweepReadError::MissingAttribute(path.to_path_buf(), "TypeName"))?;
    let missing_data = float_attr(&file, "MissingData")
        .ok_or_else(|| SweepReadError::MissingAttribute(path.to_path_buf(), "MissingData"))?;

    let azimuths = var_1d(&file, path, "Azimuth")?;
    let elevations = var_1d(&file, path, "Elevation")?;
    let gate_widths = var_1d(&file, path, "GateWidth")?;

    let var = file
        .variable(&type_name)
        .ok_or(SweepReadError::MissingVariable(path.to_path_buf(), "TypeName data"))?;
    let gates = var
        .dimensions()
        .get(1)
        .map(|d| d.len())
        .unwrap_or(0);
    let flat: Vec<f32> = var.get(..)?;
    let data = Array2::from_shape_vec((azimuths.len(), gates), flat)
        .expect("product variable shape follows its dimensions");

    Ok(SweepFile {
        type_name,
        scan_type: string_attr(&file, "ScanType"),
        azimuths,
        elevations,
        gate_widths,
        data,
        missing_data,
        nyquist: float_attr(&file, "Nyquist_Vel-value"),
        prf: int_attr(&file, "PRF-value"),
        created_by: string_attr(&file, "CreatedBy"),
    })
}

/// The production sink: writes every completed sweep to disk.
pub struct NetcdfSink {
    desc: RadarDesc,
    pub do_not_write: bool,
}

impl NetcdfSink {
    pub fn new(desc: RadarDesc) -> NetcdfSink {
        NetcdfSink {
            desc,
            do_not_write: false,
        }
    }
}

impl SweepSink for NetcdfSink {
    fn handle(&mut self, sweep: Sweep) {
        if self.do_not_write {
            return;
        }
        match write_sweep(&self.desc, &sweep) {
            Ok(paths) => {
                if let Some(first) = paths.first() {
                    log::info!("created {} (+{} products)", first.display(), paths.len() - 1);
                }
            }
            Err(e) => warn!("sweep write failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use tempfile::TempDir;
    use vec1::Vec1;

    use super::*;
    use crate::config::Config;
    use crate::ray::{RayHeader, RaySnapshot, PRODUCT_COUNT};

    fn test_sweep(ray_count: usize, gate_count: usize) -> Sweep {
        let rays: Vec<RaySnapshot> = (0..ray_count)
            .map(|j| {
                let mut products = vec![vec![0.0f32; gate_count]; PRODUCT_COUNT];
                for g in 0..gate_count {
                    products[Product::Z.index()][g] = j as f32 + g as f32 * 0.25;
                }
                // One censored velocity gate per ray.
                products[Product::V.index()][0] = f32::NAN;
                RaySnapshot {
                    header: RayHeader {
                        marker: Marker::PPI_SCAN
                            | if j == 0 {
                                Marker::SWEEP_BEGIN
                            } else {
                                Marker::empty()
                            },
                        start_azimuth: j as f32,
                        end_azimuth: j as f32 + 1.0,
                        start_elevation: 2.4,
                        end_elevation: 2.4,
                        start_time_sec: 1_484_800_000 + j as u32,
                        gate_count: gate_count as u32,
                        gate_size_meters: 150.0,
                        product_list: Product::Z.bit() | Product::V.bit(),
                        ..Default::default()
                    },
                    products,
                }
            })
            .collect();
        let mut config = Config::default();
        config.start_marker = Marker::PPI_SCAN;
        config.sweep_elevation = 2.4;
        config.waveform = "s01".to_string();
        Sweep {
            rays: Vec1::try_from_vec(rays).unwrap(),
            config,
        }
    }

    fn test_desc(root: &Path) -> RadarDesc {
        RadarDesc {
            data_path: root.to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn filename_encodes_geometry_and_symbol() {
        let dir = TempDir::new().unwrap();
        let desc = test_desc(dir.path());
        let sweep = test_sweep(4, 8);
        let path = sweep_filename(&desc, &sweep, Product::Z);
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("{}-20170119-", desc.file_prefix)));
        assert!(name.ends_with("-E2.4-Z.nc"), "{name}");
        assert!(path.to_string_lossy().contains("moment/20170119"));
    }

    #[test]
    fn sweep_files_round_trip() {
        let dir = TempDir::new().unwrap();
        let desc = test_desc(dir.path());
        let sweep = test_sweep(6, 10);

        let written = write_sweep(&desc, &sweep).unwrap();
        // Z and V are present.
        assert_eq!(written.len(), 2);

        let z = read_sweep(&written[0]).unwrap();
        assert_eq!(z.type_name, "Corrected_Intensity");
        assert_eq!(z.scan_type.as_deref(), Some("PPI"));
        assert_eq!(z.created_by.as_deref(), Some("RadarKit"));
        assert_eq!(z.azimuths.len(), 6);
        assert_eq!(z.data.shape(), &[6, 10]);
        assert_abs_diff_eq!(z.missing_data, W2_MISSING_DATA);
        assert_eq!(z.prf, Some(1000));
        for (j, azimuth) in z.azimuths.iter().enumerate() {
            assert_abs_diff_eq!(*azimuth, sweep.rays[j].header.start_azimuth);
        }
        assert_abs_diff_eq!(z.data[(3, 4)], 4.0, epsilon = 1e-6);

        // Censored gates carry the sentinel in the file.
        let v = read_sweep(&written[1]).unwrap();
        assert_eq!(v.type_name, "Radial_Velocity");
        assert_abs_diff_eq!(v.data[(0, 0)], W2_MISSING_DATA);
    }
}
