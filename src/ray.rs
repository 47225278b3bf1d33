// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The fundamental unit of level-II data: base moments on one beam.
//!
//! Slot `k` of the ray ring reserves one float plane per defined product
//! at the ray gate count (pulse capacity over the pulse-to-ray ratio,
//! rounded up to the alignment width), so a worker can write whichever
//! products its estimator produces without allocating.

use strum_macros::EnumIter;

use crate::foundation::{Marker, Ring};
use crate::pulse::aligned_capacity;

pub use crate::foundation::RayStatus;

/// The base products, in the order their planes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Product {
    /// Reflectivity \[dBZ\].
    Z,
    /// Radial velocity \[m/s\].
    V,
    /// Spectrum width \[m/s\].
    W,
    /// Differential reflectivity \[dB\].
    D,
    /// Differential phase \[rad\].
    P,
    /// Copolar correlation coefficient.
    R,
    /// Specific differential phase \[rad/m\].
    K,
    /// Raw signal \[dB-ADU\].
    S,
}

pub const PRODUCT_COUNT: usize = 8;

impl Product {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn bit(self) -> u32 {
        1 << self.index()
    }

    pub fn symbol(self) -> char {
        match self {
            Product::Z => 'Z',
            Product::V => 'V',
            Product::W => 'W',
            Product::D => 'D',
            Product::P => 'P',
            Product::R => 'R',
            Product::K => 'K',
            Product::S => 'S',
        }
    }

    /// WDSS-II TypeName.
    pub fn type_name(self) -> &'static str {
        match self {
            Product::Z => "Corrected_Intensity",
            Product::V => "Radial_Velocity",
            Product::W => "Width",
            Product::D => "Differential_Reflectivity",
            Product::P => "PhiDP",
            Product::R => "RhoHV",
            Product::K => "KDP",
            Product::S => "Signal",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Product::Z => "dBZ",
            Product::V | Product::W => "MetersPerSecond",
            Product::D => "dB",
            Product::P => "Degrees",
            Product::R => "Unitless",
            Product::K => "DegreesPerMeter",
            Product::S => "dBm",
        }
    }

    pub fn colormap(self) -> &'static str {
        match self {
            Product::Z => "Reflectivity",
            Product::V => "Velocity",
            Product::W => "Width",
            Product::D => "Differential_Reflectivity",
            Product::P => "PhiDP",
            Product::R => "RhoHV",
            Product::K => "KDP",
            Product::S => "Signal",
        }
    }

    /// Products stored in radians but written to sweep files in degrees.
    pub fn written_in_degrees(self) -> bool {
        matches!(self, Product::P | Product::K)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RayHeader {
    /// All-time monotonic ray id.
    pub i: u64,
    pub marker: Marker,
    pub start_time_sec: u32,
    pub start_time_usec: u32,
    pub start_time_double: f64,
    pub end_time_sec: u32,
    pub end_time_usec: u32,
    pub end_time_double: f64,
    pub start_azimuth: f32,
    pub end_azimuth: f32,
    pub start_elevation: f32,
    pub end_elevation: f32,
    pub sweep_azimuth: f32,
    pub sweep_elevation: f32,
    pub gate_count: u32,
    pub gate_size_meters: f32,
    /// Config snapshot of the *last* pulse of the group.
    pub config_id: u64,
    /// Bitmap of the product planes this ray actually carries.
    pub product_list: u32,
    /// How many pulses went into this ray.
    pub pulse_count: u32,
}

impl Default for RayHeader {
    fn default() -> RayHeader {
        RayHeader {
            i: 0,
            marker: Marker::empty(),
            start_time_sec: 0,
            start_time_usec: 0,
            start_time_double: 0.0,
            end_time_sec: 0,
            end_time_usec: 0,
            end_time_double: 0.0,
            start_azimuth: 0.0,
            end_azimuth: 0.0,
            start_elevation: 0.0,
            end_elevation: 0.0,
            sweep_azimuth: 0.0,
            sweep_elevation: 0.0,
            gate_count: 0,
            gate_size_meters: 0.0,
            config_id: 0,
            product_list: 0,
            pulse_count: 0,
        }
    }
}

pub struct Ray {
    pub header: RayHeader,
    capacity: usize,
    products: Vec<Box<[f32]>>,
}

impl Ray {
    pub fn with_capacity(capacity: usize) -> Ray {
        let capacity = aligned_capacity(capacity);
        Ray {
            header: RayHeader::default(),
            capacity,
            products: (0..PRODUCT_COUNT)
                .map(|_| vec![0.0; capacity].into_boxed_slice())
                .collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn product(&self, product: Product) -> &[f32] {
        &self.products[product.index()][..self.header.gate_count as usize]
    }

    pub fn product_mut(&mut self, product: Product) -> &mut [f32] {
        &mut self.products[product.index()]
    }

    pub fn has_product(&self, product: Product) -> bool {
        self.header.product_list & product.bit() != 0
    }
}

/// A self-contained copy of a ray, detached from the ring so the sweep
/// scratch space can outlive slot recycling.
#[derive(Clone)]
pub struct RaySnapshot {
    pub header: RayHeader,
    pub products: Vec<Vec<f32>>,
}

impl RaySnapshot {
    pub fn of(ray: &Ray) -> RaySnapshot {
        RaySnapshot {
            header: ray.header,
            products: (0..PRODUCT_COUNT)
                .map(|k| ray.products[k][..ray.header.gate_count as usize].to_vec())
                .collect(),
        }
    }

    pub fn product(&self, product: Product) -> &[f32] {
        &self.products[product.index()]
    }
}

/// Allocate the level-II ring: `depth` rays of `capacity` gates, every
/// product plane reserved up front.
pub fn ray_ring(capacity: usize, depth: usize) -> Ring<Ray> {
    Ring::new(depth, |_| Ray::with_capacity(capacity))
}

/// Typed helpers over the raw slot status word.
pub trait RaySlotExt {
    fn ray_status(&self) -> RayStatus;
    fn or_ray_status(&self, bits: RayStatus);
    fn has_ray_status(&self, bits: RayStatus) -> bool;
}

impl RaySlotExt for crate::foundation::Slot<Ray> {
    fn ray_status(&self) -> RayStatus {
        RayStatus::from_bits_truncate(self.status_bits())
    }

    fn or_ray_status(&self, bits: RayStatus) {
        self.or_status(bits.bits());
    }

    fn has_ray_status(&self, bits: RayStatus) -> bool {
        self.has_status(bits.bits())
    }
}
