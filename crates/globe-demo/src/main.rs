//! Headless flight over a procedural globe.
//!
//! Descends from orbit towards the Alps while driving the terrain tree the
//! way a renderer would: poll tile completions, select and mesh visible
//! nodes, measure altitude with a ray cast, then close the frame.
//!
//! Configuration is loaded from `globe.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p globe-demo -- --frames 1200 --resolution-power 6`.

mod heights;
mod provider;
mod region;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use glam::{DMat4, DVec3};
use globe_config::{CliArgs, Config};
use globe_math::{Frustum, GeoPoint, Ray};
use globe_terrain::{
    ElevationTile, EntityProducer, FrameView, ProducerId, Tree, TreeSettings, TreeStatus,
};
use tracing::info;

use crate::provider::ProceduralTileProvider;
use crate::region::RegionProducer;

const START_HEIGHT: f64 = 2.0e7;
const END_HEIGHT: f64 = 1500.0;
const FRAME_TIME: Duration = Duration::from_millis(16);
const RAY_LIMIT: f64 = 1.0e8;

/// Camera pose for frame `frame` of `frames`: a log-scale descent drifting
/// east over the Alps.
fn camera_at(frame: u32, frames: u32) -> (DVec3, DVec3) {
    let t = frame as f64 / frames.max(1) as f64;
    let height = START_HEIGHT * (END_HEIGHT / START_HEIGHT).powf(t);
    let lon = 2.0 + 10.0 * t;
    let eye = GeoPoint::from_degrees(lon, 46.0, height).to_cartesian();
    let target = GeoPoint::from_degrees(lon + 0.5, 46.0, 0.0).to_cartesian();
    (eye, target)
}

fn frustum_for(eye: DVec3, target: DVec3) -> Frustum {
    let view = DMat4::look_at_rh(eye, target, DVec3::Z);
    let near = (eye.length() - globe_math::EARTH_RADIUS).clamp(1.0, 1.0e5) * 0.1;
    let proj = DMat4::perspective_rh(60f64.to_radians(), 16.0 / 9.0, near, 4.0e7);
    Frustum::from_view_projection(&(proj * view))
}

fn main() {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .unwrap_or_else(globe_config::default_config_dir);
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    globe_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let settings = TreeSettings::from(&config);
    let provider = match ProceduralTileProvider::new(&config.provider, settings.rho) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!("Failed to start tile workers: {e}");
            return;
        }
    };
    info!(
        "Globe demo: rho {}, {} workers, {} frames",
        settings.rho,
        provider.worker_count(),
        args.frames
    );
    let mut tree = Tree::new(provider, settings);

    let alps: Arc<dyn EntityProducer> = Arc::new(RegionProducer::from_degrees(
        ProducerId(1),
        5.0,
        15.0,
        43.5,
        48.0,
    ));
    tree.put_next_producers(&[alps]);

    let mut overlay_triangles = 0usize;
    let mut loaded_tiles = 0usize;
    for frame in 0..args.frames {
        tree.poll();
        loaded_tiles += tree.take_updated_tiles().len();
        match tree.status() {
            TreeStatus::NotReady => {
                std::thread::sleep(FRAME_TIME);
                continue;
            }
            TreeStatus::Failed => {
                tracing::error!("Root tile failed, giving up");
                break;
            }
            TreeStatus::Ready => {}
        }

        let (eye, target) = camera_at(frame, args.frames);
        let view = FrameView::new(eye, &config.terrain).with_frustum(frustum_for(eye, target));
        let selected = tree.select_tiles(&view);

        let mut triangles = 0usize;
        overlay_triangles = 0;
        for tile in &selected {
            if let Some(mesh) = &tile.mesh {
                triangles += mesh.triangle_count();
            }
            for overlay in tree.get_overlay_meshes(tile.node, view.mesh_lod) {
                overlay_triangles += overlay.indices.len() / 3;
            }
        }

        let ground = tree.find_ray_distance(&Ray::new(eye, -eye), RAY_LIMIT);
        let stats = tree.stats();
        tree.end_frame();

        if frame % 60 == 0 {
            info!(
                "frame {frame}: {} tiles, {triangles} triangles, altitude {ground:.0} m, \
                 nodes {}/{} touched, meshes {}/{} touched, {} pending, {loaded_tiles} loaded",
                selected.len(),
                stats.touched_nodes,
                stats.cached_nodes,
                stats.touched_meshes,
                stats.cached_meshes,
                stats.pending_requests
            );
        }
        std::thread::sleep(FRAME_TIME);
    }

    let (xt, yt) = GeoPoint::from_degrees(12.0, 46.0, 0.0).to_unit();
    if let Some(tile) = tree.find_highest_accuracy(xt, yt) {
        info!("Finest tile under the destination: {}", tile.key());
    }
    let elevations = tree.get_existing_elevations(&[GeoPoint::from_degrees(12.0, 46.0, 0.0)]);
    info!(
        "Destination elevation {:.1} m, {overlay_triangles} overlay triangles in the last frame",
        elevations[0]
    );

    tree.cancel();
    info!("Shut down with {} cached nodes", tree.node_count());
}
