// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The sweep assembler.
//!
//! A gathering thread watches the ray ring for sweep markers and batches
//! the rays between a begin and an end into a [Sweep]. Completed sweeps
//! cross a small bounded channel to the sink thread, so the sink can
//! write the previous sweep while the next one accumulates; sweeps are
//! snapshots, detached from the ring, so slot recycling cannot touch
//! them.

pub mod netcdf;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use vec1::Vec1;

use crate::config::{Config, ConfigRing};
use crate::constants::{MAX_RAYS_PER_SWEEP, SWEEP_BEAM_TARGET, SWEEP_SCRATCH_DEPTH};
use crate::foundation::{EngineState, Marker, Ring};
use crate::ray::{Ray, RaySlotExt, RaySnapshot, RayStatus};

/// A completed sweep: 1..N rays in beam order plus a copy of the config
/// they were formed under.
pub struct Sweep {
    pub rays: Vec1<RaySnapshot>,
    pub config: Config,
}

impl Sweep {
    pub fn ray_count(&self) -> usize {
        self.rays.len()
    }

    pub fn is_ppi(&self) -> bool {
        self.rays.first().header.marker.is_ppi()
    }

    pub fn is_rhi(&self) -> bool {
        self.rays.first().header.marker.is_rhi()
    }
}

/// Where completed sweeps go. The NetCDF writer is the production sink;
/// tests plug in channels.
pub trait SweepSink: Send {
    fn handle(&mut self, sweep: Sweep);
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F: FnMut(Sweep) + Send> SweepSink for FnSink<F> {
    fn handle(&mut self, sweep: Sweep) {
        (self.0)(sweep)
    }
}

#[derive(Default)]
pub struct SweepStats {
    pub sweeps: AtomicU64,
    pub partial_sweeps: AtomicU64,
    pub inconsistent_rays: AtomicU64,
}

pub struct SweepEngine {
    name: String,
    configs: Arc<ConfigRing>,
    rays: Arc<Ring<Ray>>,
    state: EngineState,
    active: Arc<AtomicBool>,
    stats: Arc<SweepStats>,
    sink: Option<Box<dyn SweepSink>>,
    gatherer: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl SweepEngine {
    pub fn new(
        configs: Arc<ConfigRing>,
        rays: Arc<Ring<Ray>>,
        sink: Box<dyn SweepSink>,
    ) -> SweepEngine {
        SweepEngine {
            name: "<SweepEngine>".to_string(),
            configs,
            rays,
            state: EngineState::Allocated,
            active: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SweepStats::default()),
            sink: Some(sink),
            gatherer: None,
            writer: None,
        }
    }

    pub fn stats(&self) -> &SweepStats {
        &self.stats
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = EngineState::Activating;
        self.active.store(true, Ordering::Release);

        // The scratch ring: the sink drains one end while the gatherer
        // accumulates into the other.
        let (tx, rx): (Sender<Sweep>, Receiver<Sweep>) = bounded(SWEEP_SCRATCH_DEPTH);
        let mut sink = self.sink.take().expect("sweep engine started twice");
        self.writer = Some(
            thread::Builder::new()
                .name("sweep-writer".to_string())
                .spawn(move || {
                    while let Ok(sweep) = rx.recv() {
                        sink.handle(sweep);
                    }
                })
                .expect("failed to spawn the sweep writer"),
        );

        let gatherer = Gatherer {
            name: self.name.clone(),
            configs: Arc::clone(&self.configs),
            rays: Arc::clone(&self.rays),
            active: Arc::clone(&self.active),
            stats: Arc::clone(&self.stats),
            tx,
        };
        self.gatherer = Some(
            thread::Builder::new()
                .name("ray-gatherer".to_string())
                .spawn(move || gatherer.run())
                .expect("failed to spawn the ray gatherer"),
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
        if let Some(handle) = self.gatherer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.take() {
            let _ = handle.join();
        }
        self.state = EngineState::Allocated;
        info!("{} stopped", self.name);
        true
    }
}

impl Drop for SweepEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Trim a 361-beam capture to exactly 360: the extra beam is the one on
/// the wrong side of the begin marker.
fn normalize(snapshots: &mut Vec<RaySnapshot>) {
    if snapshots.len() == SWEEP_BEAM_TARGET + 1 {
        if snapshots[0].header.marker.contains(Marker::SWEEP_BEGIN) {
            snapshots.pop();
        } else if snapshots[1].header.marker.contains(Marker::SWEEP_BEGIN) {
            snapshots.remove(0);
        }
    }
}

struct Gatherer {
    name: String,
    configs: Arc<ConfigRing>,
    rays: Arc<Ring<Ray>>,
    active: Arc<AtomicBool>,
    stats: Arc<SweepStats>,
    tx: Sender<Sweep>,
}

#[derive(PartialEq)]
enum GathererState {
    Idle,
    Gathering,
}

impl Gatherer {
    fn run(self) {
        let mut k: u64 = 0; // ray cursor
        let mut start: u64 = 0; // first ray of the sweep being gathered
        let mut state = GathererState::Idle;

        'outer: while self.active.load(Ordering::Acquire) {
            while k >= self.rays.head() {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let slot = self.rays.slot_at(k);
            while !slot.has_ray_status(RayStatus::READY) {
                if !self.active.load(Ordering::Acquire) {
                    break 'outer;
                }
                thread::sleep(Duration::from_millis(1));
            }

            let marker = unsafe { slot.get() }.header.marker;
            if marker.contains(Marker::SWEEP_END) {
                self.close_sweep(start, k);
                start = k;
                state = GathererState::Idle;
            } else if marker.contains(Marker::SWEEP_BEGIN) {
                start = k;
                state = GathererState::Gathering;
            } else if state == GathererState::Idle && k == start {
                // Without an explicit begin, the sweep starts wherever
                // gathering resumed.
                state = GathererState::Gathering;
            }

            slot.or_ray_status(RayStatus::USED);
            k += 1;
        }
        debug!("{} gatherer ended", self.name);
    }

    fn close_sweep(&self, start: u64, end: u64) {
        let mut snapshots: Vec<RaySnapshot> = Vec::with_capacity((end - start + 1) as usize);
        let mut count = start;
        while count <= end && snapshots.len() < MAX_RAYS_PER_SWEEP {
            let slot = self.rays.slot_at(count);
            snapshots.push(RaySnapshot::of(unsafe { slot.get() }));
            count += 1;
        }

        normalize(&mut snapshots);

        // Consistency: rays within one sweep should agree on geometry.
        let mut mismatches = 0u32;
        let head = snapshots[0].header;
        for snapshot in &snapshots[1..] {
            if snapshot.header.gate_count != head.gate_count
                || snapshot.header.gate_size_meters != head.gate_size_meters
            {
                mismatches += 1;
                if mismatches <= 5 {
                    warn!(
                        "{} ray {} geometry differs: {} x {:.1} m vs {} x {:.1} m",
                        self.name,
                        snapshot.header.i,
                        snapshot.header.gate_count,
                        snapshot.header.gate_size_meters,
                        head.gate_count,
                        head.gate_size_meters
                    );
                }
            }
        }
        if mismatches > 5 {
            warn!(
                "{} {} rays with inconsistent geometry in one sweep",
                self.name, mismatches
            );
        }
        self.stats
            .inconsistent_rays
            .fetch_add(mismatches as u64, Ordering::Relaxed);

        // The originating config: keyed by the second ray when there is
        // one, since the first may straddle the boundary.
        let key_ray = snapshots.get(1).unwrap_or(&snapshots[0]);
        let config = self
            .configs
            .get(key_ray.header.config_id)
            .map(|c| (*c).clone())
            .unwrap_or_else(|| (*self.configs.latest()).clone());

        let n = snapshots.len();
        if n != SWEEP_BEAM_TARGET {
            self.stats.partial_sweeps.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        info!(
            "{} sweep closed: {} rays   EL {:.2}   AZ {:.2}-{:.2}",
            self.name,
            n,
            snapshots[0].header.start_elevation,
            snapshots[0].header.start_azimuth,
            snapshots[n - 1].header.end_azimuth,
        );

        let rays = Vec1::try_from_vec(snapshots).expect("a sweep holds at least one ray");
        // Blocks when all scratch spaces are written-but-undrained.
        if self.tx.send(Sweep { rays, config }).is_err() {
            warn!("{} sink is gone; sweep dropped", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ray::{Product, RayHeader};

    fn snapshot(marker: Marker, azimuth: f32) -> RaySnapshot {
        RaySnapshot {
            header: RayHeader {
                marker,
                start_azimuth: azimuth,
                gate_count: 4,
                gate_size_meters: 150.0,
                product_list: Product::Z.bit(),
                ..Default::default()
            },
            products: vec![vec![0.0; 4]; crate::ray::PRODUCT_COUNT],
        }
    }

    #[test]
    fn normalization_drops_the_extra_edge_beam() {
        // 361 beams, begin marker on the first: the last one goes.
        let mut rays: Vec<RaySnapshot> = (0..=SWEEP_BEAM_TARGET)
            .map(|k| {
                let marker = if k == 0 {
                    Marker::SWEEP_BEGIN | Marker::PPI_SCAN
                } else {
                    Marker::PPI_SCAN
                };
                snapshot(marker, k as f32 % 360.0)
            })
            .collect();
        normalize(&mut rays);
        assert_eq!(rays.len(), SWEEP_BEAM_TARGET);
        assert!(rays[0].header.marker.contains(Marker::SWEEP_BEGIN));

        // 361 beams, begin marker on the second: the first one goes.
        let mut rays: Vec<RaySnapshot> = (0..=SWEEP_BEAM_TARGET)
            .map(|k| {
                let marker = if k == 1 {
                    Marker::SWEEP_BEGIN | Marker::PPI_SCAN
                } else {
                    Marker::PPI_SCAN
                };
                snapshot(marker, k as f32 % 360.0)
            })
            .collect();
        normalize(&mut rays);
        assert_eq!(rays.len(), SWEEP_BEAM_TARGET);
        assert!(rays[0].header.marker.contains(Marker::SWEEP_BEGIN));

        // A partial sweep keeps its actual count.
        let mut rays: Vec<RaySnapshot> = (0..57).map(|k| snapshot(Marker::PPI_SCAN, k as f32)).collect();
        normalize(&mut rays);
        assert_eq!(rays.len(), 57);
    }

    #[test]
    fn gatherer_batches_between_markers() {
        let configs = Arc::new(ConfigRing::new(4));
        let rays = Arc::new(crate::ray::ray_ring(8, 32));
        let (tx, rx) = crossbeam_channel::unbounded();
        let sink = Box::new(FnSink(move |sweep: Sweep| {
            tx.send(sweep.ray_count()).unwrap();
        }));
        let mut engine = SweepEngine::new(configs, Arc::clone(&rays), sink);
        engine.start();

        // Ten rays: begin, eight plain, end.
        for k in 0..10u32 {
            let (_, slot) = rays.get_vacant();
            {
                let ray = unsafe { slot.get_mut() };
                ray.header.marker = if k == 0 {
                    Marker::SWEEP_BEGIN | Marker::PPI_SCAN
                } else if k == 9 {
                    Marker::SWEEP_END | Marker::PPI_SCAN
                } else {
                    Marker::PPI_SCAN
                };
                ray.header.gate_count = 4;
                ray.header.start_azimuth = k as f32;
            }
            slot.or_ray_status(RayStatus::PROCESSED | RayStatus::READY);
        }

        let count = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("no sweep arrived");
        assert_eq!(count, 10);
        engine.stop();
    }
}
