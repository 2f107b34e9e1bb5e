//! Batch demo application
//!
//! Drives a `BatchedMesh` through a few simulated frames: registers
//! procedural geometries, churns instances, compacts storage and logs the
//! resulting draw lists and uploads.
//!
//! Usage: `batch_demo [config.toml|config.ron]`

use batched_mesh::batch::{DrawIndexedIndirectArgs, RecordingUploader, UploadTarget};
use batched_mesh::foundation::{logging, math::Point3};
use batched_mesh::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FRAMES: usize = 8;
const SPAWN_RADIUS: f32 = 40.0;

#[derive(thiserror::Error, Debug)]
enum DemoError {
    #[error("config: {0}")]
    Config(#[from] batched_mesh::ConfigError),

    #[error("batch: {0}")]
    Batch(#[from] BatchError),
}

/// Uploader standing in for a GPU backend; logs and tallies traffic
#[derive(Default)]
struct LoggingUploader {
    inner: RecordingUploader,
}

impl BatchUploader for LoggingUploader {
    fn reallocate(&mut self, target: UploadTarget<'_>, byte_len: usize) {
        log::debug!("reallocate {} -> {} bytes", target, byte_len);
        self.inner.reallocate(target, byte_len);
    }

    fn write(&mut self, target: UploadTarget<'_>, byte_offset: usize, bytes: &[u8]) {
        log::trace!("write {} @ {} ({} bytes)", target, byte_offset, bytes.len());
        self.inner.write(target, byte_offset, bytes);
    }
}

fn cube() -> GeometryData {
    let mut positions = Vec::with_capacity(8);
    for i in 0..8 {
        positions.push([
            if i & 1 == 0 { -0.5 } else { 0.5 },
            if i & 2 == 0 { -0.5 } else { 0.5 },
            if i & 4 == 0 { -0.5 } else { 0.5 },
        ]);
    }
    #[rustfmt::skip]
    let indices = vec![
        0, 2, 1, 1, 2, 3, // -z
        4, 5, 6, 5, 7, 6, // +z
        0, 1, 4, 1, 5, 4, // -y
        2, 6, 3, 3, 6, 7, // +y
        0, 4, 2, 2, 4, 6, // -x
        1, 3, 5, 3, 7, 5, // +x
    ];
    GeometryData::from_positions(&positions).with_index(AttributeData::UInt32(indices))
}

fn quad() -> GeometryData {
    GeometryData::from_positions(&[[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]])
        .with_index(AttributeData::UInt32(vec![0, 1, 2, 0, 2, 3]))
}

/// Flat disc as a triangle fan with `segments` outer vertices
fn disc(segments: u32) -> GeometryData {
    let mut positions = vec![[0.0, 0.0, 0.0]];
    for i in 0..segments {
        let angle = i as f32 / segments as f32 * std::f32::consts::TAU;
        positions.push([angle.cos(), angle.sin(), 0.0]);
    }
    let indices = (0..segments).flat_map(|i| [0, i + 1, (i + 1) % segments + 1]).collect();
    GeometryData::from_positions(&positions).with_index(AttributeData::UInt32(indices))
}

struct BatchDemoApp {
    batch: BatchedMesh,
    builder: DrawDescriptorBuilder,
    uploader: LoggingUploader,
    rng: StdRng,
    geometries: Vec<GeometryId>,
    instances: Vec<InstanceId>,
}

impl BatchDemoApp {
    fn new(config: BatchConfig) -> Self {
        Self {
            batch: BatchedMesh::new(config),
            builder: DrawDescriptorBuilder::new(),
            uploader: LoggingUploader::default(),
            rng: StdRng::seed_from_u64(0x5eed),
            geometries: Vec::new(),
            instances: Vec::new(),
        }
    }

    fn setup(&mut self) -> Result<(), DemoError> {
        // Discs get slack so their detail level can change in place
        self.geometries.push(self.batch.add_geometry(&cube(), None, None)?);
        self.geometries.push(self.batch.add_geometry(&quad(), None, None)?);
        self.geometries.push(self.batch.add_geometry(&disc(16), Some(65), Some(192))?);

        let target = self.batch.max_instance_count() / 2;
        for _ in 0..target {
            self.spawn()?;
        }
        log::info!(
            "Registered {} geometries and {} instances",
            self.batch.geometry_count(),
            self.batch.instance_count()
        );
        Ok(())
    }

    fn spawn(&mut self) -> Result<(), DemoError> {
        let geometry = self.geometries[self.rng.gen_range(0..self.geometries.len())];
        let instance = self.batch.add_instance(geometry)?;

        let position = Vec3::new(
            self.rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
            self.rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
            self.rng.gen_range(-SPAWN_RADIUS..SPAWN_RADIUS),
        );
        let scale = self.rng.gen_range(0.5..2.0);
        self.batch.set_matrix_at(instance, &(Mat4::new_translation(&position) * Mat4::new_scaling(scale)))?;
        self.batch.set_color_at(instance, Vec3::new(self.rng.gen(), self.rng.gen(), self.rng.gen()))?;
        self.instances.push(instance);
        Ok(())
    }

    fn churn(&mut self, frame: usize) -> Result<(), DemoError> {
        let despawn = self.rng.gen_range(0..=self.instances.len() / 4);
        for _ in 0..despawn {
            let victim = self.instances.swap_remove(self.rng.gen_range(0..self.instances.len()));
            self.batch.delete_instance(victim)?;
        }
        while self.batch.instance_count() < self.batch.max_instance_count() * 3 / 4 {
            self.spawn()?;
        }

        if let Some(&flicker) = self.instances.first() {
            self.batch.set_visible_at(flicker, frame % 2 == 0)?;
        }

        // Swap the disc detail level within its reservation
        if let Some(&disc_id) = self.geometries.get(2) {
            self.batch.set_geometry_at(disc_id, &disc(if frame % 2 == 0 { 64 } else { 16 }))?;
        }

        // Replace the quad with a fresh registration midway, leaving a hole
        if frame == FRAMES / 2 {
            let old = self.geometries[1];
            self.batch.delete_geometry(old)?;
            self.instances.retain(|&id| self.batch.get_geometry_id_at(id).is_ok());
            self.geometries[1] = self.batch.add_geometry(&quad(), Some(8), None)?;
            log::info!("Replaced {}; {} holes pending", old, self.batch.hole_count());
        }
        Ok(())
    }

    fn render_frame(&mut self, frame: usize) {
        let angle = frame as f32 * 0.2;
        let eye = Point3::new(angle.sin() * 80.0, 10.0, angle.cos() * 80.0);
        let projection = Mat4::new_perspective(16.0 / 9.0, std::f32::consts::FRAC_PI_3, 0.1, 200.0);
        let view = Mat4::look_at_rh(&eye, &Point3::origin(), &Vec3::y());

        let forward = -eye.coords.normalize();
        let options = DrawOptions::default()
            .with_frustum(Frustum::from_matrix(&(projection * view)))
            .sorted(ViewPoint::new(eye.coords, forward), DrawOrder::FrontToBack);

        let list = self.builder.build(&mut self.batch, &options);
        let indirect: Vec<DrawIndexedIndirectArgs> =
            list.descriptors().iter().filter_map(DrawDescriptor::indexed_indirect).collect();
        log::info!(
            "Frame {}: {} draws, {} instances drawn, {} culled, {} hidden",
            frame,
            indirect.len(),
            list.total_instances(),
            list.culled_count(),
            list.hidden_count()
        );

        self.batch.flush(&mut self.uploader);
    }

    fn run(&mut self) -> Result<(), DemoError> {
        self.setup()?;
        for frame in 0..FRAMES {
            self.churn(frame)?;
            if self.batch.hole_count() > 0 {
                self.batch.optimize();
            }
            self.render_frame(frame);
        }

        let bounds = self.batch.compute_bounding_sphere();
        let stats = self.batch.stats();
        log::info!(
            "Batch bounds: center {:?}, radius {:.2}",
            bounds.center.as_slice(),
            bounds.radius
        );
        log::info!(
            "Stats: {} geometries added, {} deleted, {} instances added, {} deleted, {} optimize passes, {} growths",
            stats.geometries_added,
            stats.geometries_deleted,
            stats.instances_added,
            stats.instances_deleted,
            stats.optimize_passes,
            stats.growth_events
        );
        log::info!(
            "Uploaded {} transform bytes across {} writes, {} reallocations",
            self.uploader.inner.bytes_written(UploadTarget::Transforms),
            self.uploader.inner.writes.len(),
            self.uploader.inner.reallocations.len()
        );
        Ok(())
    }
}

fn main() -> Result<(), DemoError> {
    logging::init();
    log::info!("Starting batch demo");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading config from {}", path);
            BatchConfig::load_from_file(path)?
        }
        None => BatchConfig::default(),
    };

    let mut app = BatchDemoApp::new(config);
    match app.run() {
        Ok(()) => {
            log::info!("Batch demo completed successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Batch demo failed: {}", e);
            Err(e)
        }
    }
}
