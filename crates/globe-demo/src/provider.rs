//! Procedural elevation tiles generated on a worker pool.
//!
//! Requests are queued on a channel and picked up by worker threads, which
//! sample the noise field over the tile footprint and complete the reply from
//! their own thread. Cancelled jobs are skipped before and after generation
//! and never answered.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{Sender, unbounded};
use dashmap::DashMap;
use globe_config::ProviderConfig;
use globe_math::{EARTH_RADIUS, TileKey, unit_to_cartesian};
use globe_terrain::{CancelToken, GridTile, TileProvider, TileReply};

use crate::heights::{HeightParams, HeightSampler};

struct TileJob {
    key: TileKey,
    token: CancelToken,
    reply: TileReply,
    cancelled: Arc<AtomicBool>,
}

/// Everything a worker needs to produce tile bytes.
struct TileRecipe {
    sampler: HeightSampler,
    rho: u8,
    max_level: u8,
    latency: Duration,
}

impl TileRecipe {
    /// Encoded tile for `key`, or `None` below the deepest served level.
    fn generate(&self, key: TileKey) -> Option<Vec<u8>> {
        if key.level > self.max_level {
            return None;
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let side = GridTile::side(self.rho);
        let n = (side - 1) as f64;
        let r = key.unit_rect();
        let mut heights = Vec::with_capacity(side * side);
        for j in 0..side {
            let yt = r.y_min + (r.y_max - r.y_min) * j as f64 / n;
            for i in 0..side {
                let xt = r.x_min + (r.x_max - r.x_min) * i as f64 / n;
                let dir = unit_to_cartesian(xt, yt, 0.0) / EARTH_RADIUS;
                heights.push(self.sampler.sample(dir) as f32);
            }
        }
        Some(GridTile::encode(self.rho, self.max_level - key.level, &heights))
    }
}

/// [`TileProvider`] backed by fBm noise and a pool of worker threads.
pub struct ProceduralTileProvider {
    job_sender: Sender<TileJob>,
    /// Cancellation flags of queued and running jobs.
    active: Arc<DashMap<CancelToken, Arc<AtomicBool>>>,
    in_flight: Arc<AtomicU64>,
    next_token: u64,
    workers: usize,
}

impl ProceduralTileProvider {
    /// Spawn the worker pool. `worker_threads == 0` picks a count from the
    /// number of CPUs.
    pub fn new(config: &ProviderConfig, rho: u8) -> std::io::Result<Self> {
        let workers = match config.worker_threads {
            0 => num_cpus::get().saturating_sub(2).max(1),
            n => n,
        };
        let recipe = Arc::new(TileRecipe {
            sampler: HeightSampler::new(HeightParams {
                seed: config.seed,
                amplitude: config.amplitude_m,
                ..Default::default()
            }),
            rho,
            max_level: config.max_level,
            latency: Duration::from_millis(config.latency_ms),
        });
        let (job_sender, job_receiver) = unbounded::<TileJob>();
        let active: Arc<DashMap<CancelToken, Arc<AtomicBool>>> = Arc::new(DashMap::new());
        let in_flight = Arc::new(AtomicU64::new(0));

        for index in 0..workers {
            let receiver = job_receiver.clone();
            let recipe = Arc::clone(&recipe);
            let active = Arc::clone(&active);
            let in_flight = Arc::clone(&in_flight);
            std::thread::Builder::new()
                .name(format!("tile-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if !job.cancelled.load(Ordering::Relaxed) {
                            let data = recipe.generate(job.key);
                            if !job.cancelled.load(Ordering::Relaxed) {
                                job.reply.complete(data);
                            } else {
                                tracing::trace!("Discarding cancelled tile {}", job.key);
                            }
                        }
                        active.remove(&job.token);
                        in_flight.fetch_sub(1, Ordering::Relaxed);
                    }
                })?;
        }
        tracing::info!("Started {workers} tile workers (rho {rho}, max level {})", config.max_level);

        Ok(Self {
            job_sender,
            active,
            in_flight,
            next_token: 1,
            workers,
        })
    }

    /// Jobs queued or running.
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }
}

impl TileProvider for ProceduralTileProvider {
    type Tile = GridTile;

    fn request_tile(&mut self, key: TileKey, reply: TileReply) -> CancelToken {
        let token = CancelToken(self.next_token);
        self.next_token += 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        self.active.insert(token, Arc::clone(&cancelled));
        self.in_flight.fetch_add(1, Ordering::Relaxed);

        let job = TileJob {
            key,
            token,
            reply,
            cancelled,
        };
        if let Err(err) = self.job_sender.send(job) {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            self.active.remove(&token);
            tracing::warn!("Tile workers are gone, failing {key}");
            err.into_inner().reply.complete(None);
        }
        token
    }

    fn cancel_request(&mut self, token: CancelToken) {
        if let Some((_, cancelled)) = self.active.remove(&token) {
            cancelled.store(true, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globe_terrain::{ElevationTile, Tree, TreeSettings, TreeStatus};
    use std::time::Instant;

    fn config(latency_ms: u64, workers: usize) -> ProviderConfig {
        ProviderConfig {
            worker_threads: workers,
            latency_ms,
            max_level: 4,
            ..ProviderConfig::default()
        }
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() {
            assert!(start.elapsed() < Duration::from_secs(10), "timed out");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_recipe_is_deterministic() {
        let recipe = |seed| TileRecipe {
            sampler: HeightSampler::new(HeightParams {
                seed,
                ..Default::default()
            }),
            rho: 2,
            max_level: 4,
            latency: Duration::ZERO,
        };
        let key = TileKey::new(2, 1, 2);
        assert_eq!(recipe(3).generate(key), recipe(3).generate(key));
        assert_ne!(recipe(3).generate(key), recipe(4).generate(key));
        assert!(recipe(3).generate(TileKey::new(5, 0, 0)).is_none());
    }

    #[test]
    fn test_tree_bootstraps_from_workers() {
        let provider = ProceduralTileProvider::new(&config(0, 2), 2).unwrap();
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        wait_until(|| {
            tree.poll();
            tree.status() != TreeStatus::NotReady
        });
        assert_eq!(tree.status(), TreeStatus::Ready);

        let root = tree.root().unwrap();
        let tile = tree.node(root).unwrap().tile().loaded().unwrap().clone();
        assert_eq!(tile.depth(), 4);
        assert!(tile.height_min() < tile.height_max(), "noise tile is flat");
        wait_until(|| tree.provider().in_flight_count() == 0);
    }

    #[test]
    fn test_cancelled_request_is_never_answered() {
        let provider = ProceduralTileProvider::new(&config(50, 1), 2).unwrap();
        let mut tree = Tree::new(provider, TreeSettings::with_rho(2));
        wait_until(|| {
            tree.poll();
            tree.status() == TreeStatus::Ready
        });

        let root = tree.root().unwrap();
        let a = tree.child(root, 0).unwrap();
        let b = tree.child(root, 1).unwrap();
        tree.request_ancestor_tile(a, 1);
        tree.request_ancestor_tile(b, 1);
        assert_eq!(tree.provider().in_flight_count(), 2);
        tree.dispose(b);

        wait_until(|| tree.provider().in_flight_count() == 0);
        tree.poll();
        assert!(tree.node(a).unwrap().tile().loaded().is_some());
        assert_eq!(tree.take_updated_tiles(), vec![TileKey::ROOT, TileKey::new(1, 0, 0)]);
    }
}
