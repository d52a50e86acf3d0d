//! Layer-by-layer spawn/settle cycle.
//!
//! The controller spawns one full grid layer, then waits until every body of
//! that wave has left the trigger volume above the container before spawning
//! the next one. Settled volume is accumulated from the exits.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rapier3d_f64::prelude::{Isometry, Vector};
use serde::Serialize;
use utoipa::ToSchema;

use crate::geometry::{AggregateShapeBuilder, ShapeGeometry, ShapeId, calculate_volume};
use crate::physics::{Material, MotionType, PhysicsBackend, PhysicsError, TriggerEventKind};
use crate::planner::{Grid, GridCursor, PackingPlan};
use crate::sequencer::SpawnSequencer;
use crate::simulation::{SimulationContext, Viewport};
use crate::types::{EPSILON_GENERAL, Point3, Real};

/// Tunables of the spawn cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerSettings {
    /// A spawn batch may only fire on frames that are a multiple of this.
    pub spawn_interval_frames: u64,
    /// Material every aggregate body gets.
    pub material: Material,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            spawn_interval_frames: 60,
            material: Material::AGGREGATE,
        }
    }
}

/// Where the controller is in its spawn/settle cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PackingState {
    /// The next layer spawns on the next gated tick.
    Filling,
    /// A wave is falling; no spawning until all of it has exited the trigger.
    WaitingForSettle,
    /// The grid is exhausted and the last wave has settled.
    Full,
}

/// A spawned aggregate tracked by the controller.
#[derive(Clone, Debug)]
pub struct PackedInstance {
    pub geometry: Arc<ShapeGeometry>,
    pub layer: usize,
    pub settled: bool,
}

/// Pose of one instance, as streamed to viewers.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct InstancePose {
    pub shape_id: ShapeId,
    pub class_id: String,
    /// Grid layer the instance was spawned into.
    pub layer: usize,
    pub translation: [f64; 3],
    /// Unit quaternion as `[i, j, k, w]`.
    pub rotation: [f64; 4],
    pub settled: bool,
}

/// Snapshot of the controller for status reporting.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct PackingStatus {
    pub state: PackingState,
    /// Number of layers spawned so far.
    pub layer: usize,
    pub cursor: GridCursor,
    pub grid: Grid,
    pub spawned: usize,
    /// Spawn attempts dropped because the hull or the body could not be built.
    pub skipped: usize,
    pub settled: usize,
    pub exit_count: usize,
    pub layer_size: usize,
    pub total_aggregates_volume: f64,
    /// Settled volume over container volume, in percent.
    pub total_volume_fraction: f64,
    pub spawning_enabled: bool,
    pub running: bool,
    pub frame: u64,
    pub viewport: Viewport,
}

/// Orchestrates spawning, trigger accounting and volume totals.
pub struct PackingController<B: PhysicsBackend> {
    settings: ControllerSettings,
    grid: Grid,
    container_volume: f64,
    sequencer: SpawnSequencer,
    builder: AggregateShapeBuilder,
    rng: StdRng,
    cursor: GridCursor,
    state: PackingState,
    spawning_enabled: bool,
    instances: HashMap<B::Body, PackedInstance>,
    spawn_order: Vec<B::Body>,
    wave_size: usize,
    exit_count: usize,
    settled: usize,
    skipped: usize,
    total_aggregates_volume: f64,
}

impl<B: PhysicsBackend> PackingController<B> {
    /// Places the container walls and the trigger volume, ready to spawn.
    ///
    /// # Parameters
    /// * `plan` - Planned classes and grid
    /// * `ctx` - Simulation context whose backend receives the static scene
    /// * `settings` - Spawn interval and body material
    /// * `rng` - Source of every random draw (order, samples, rotations)
    ///
    /// # Returns
    /// The controller, or the backend error if the scene cannot be built
    pub fn new(
        plan: &PackingPlan,
        ctx: &mut SimulationContext<B>,
        settings: ControllerSettings,
        rng: StdRng,
    ) -> Result<Self, PhysicsError> {
        let container = plan.container();
        let grid = plan.grid();
        let dims = container.dims;
        let spawn_column = grid.y as f64 * plan.max_dimension();
        let spawn_origin = Point3::new(0.0, dims.height, 0.0);

        let backend = ctx.backend_mut();
        for wall in container.walls(dims.height + spawn_column) {
            backend.create_body(&wall, wall.center(), MotionType::Static, settings.material)?;
        }
        backend.create_trigger(
            Point3::new(
                dims.width / 2.0,
                dims.height + spawn_column / 2.0,
                dims.depth / 2.0,
            ),
            Vector::new(dims.width / 2.0, spawn_column / 2.0, dims.depth / 2.0),
        )?;

        let state = if grid.is_empty() || plan.total_count() == 0 {
            log::warn!("⚠️ Nothing to spawn: grid {:?}, {} planned instances", grid, plan.total_count());
            PackingState::Full
        } else {
            PackingState::Filling
        };

        log::info!(
            "📦 Packing controller ready: grid {}x{}x{}, cell {:.3}, {} planned instances",
            grid.x,
            grid.z,
            grid.y,
            plan.max_dimension(),
            plan.total_count()
        );

        Ok(Self {
            settings: ControllerSettings {
                spawn_interval_frames: settings.spawn_interval_frames.max(1),
                ..settings
            },
            grid,
            container_volume: container.volume(),
            sequencer: SpawnSequencer::new(plan, spawn_origin),
            builder: AggregateShapeBuilder::new(),
            rng,
            cursor: GridCursor::new(0, 0, 0),
            state,
            spawning_enabled: true,
            instances: HashMap::new(),
            spawn_order: Vec::new(),
            wave_size: 0,
            exit_count: 0,
            settled: 0,
            skipped: 0,
            total_aggregates_volume: 0.0,
        })
    }

    /// Per-frame entry point.
    ///
    /// Trigger events are folded in first, in delivery order. A new layer is
    /// spawned on gated frames only, and only while filling with spawning
    /// enabled.
    pub fn tick(&mut self, ctx: &mut SimulationContext<B>) {
        self.process_trigger_events(ctx);

        if ctx.frame() % self.settings.spawn_interval_frames != 0 {
            return;
        }
        if self.state == PackingState::Filling && self.spawning_enabled {
            self.spawn_layer(ctx);
        }
    }

    /// Gates future spawns off. Physics keeps running.
    pub fn stop_adding_aggregates(&mut self) {
        if self.spawning_enabled {
            log::info!("⏸️ Spawning stopped");
        }
        self.spawning_enabled = false;
    }

    /// Gates future spawns back on.
    pub fn presume_adding_aggregates(&mut self) {
        if !self.spawning_enabled {
            log::info!("▶️ Spawning resumed");
        }
        self.spawning_enabled = true;
    }

    pub fn state(&self) -> PackingState {
        self.state
    }

    pub fn spawning_enabled(&self) -> bool {
        self.spawning_enabled
    }

    pub fn exit_count(&self) -> usize {
        self.exit_count
    }

    pub fn total_aggregates_volume(&self) -> f64 {
        self.total_aggregates_volume
    }

    pub fn total_volume_fraction(&self) -> f64 {
        if self.container_volume > EPSILON_GENERAL {
            self.total_aggregates_volume / self.container_volume * 100.0
        } else {
            0.0
        }
    }

    pub fn status(&self, ctx: &SimulationContext<B>) -> PackingStatus {
        PackingStatus {
            state: self.state(),
            layer: self.cursor.y,
            cursor: self.cursor,
            grid: self.grid,
            spawned: self.spawn_order.len(),
            skipped: self.skipped,
            settled: self.settled,
            exit_count: self.exit_count(),
            layer_size: self.grid.layer_size(),
            total_aggregates_volume: self.total_aggregates_volume(),
            total_volume_fraction: self.total_volume_fraction(),
            spawning_enabled: self.spawning_enabled(),
            running: ctx.is_running(),
            frame: ctx.frame(),
            viewport: ctx.viewport(),
        }
    }

    /// Geometry of a spawned instance.
    pub fn geometry(&self, id: ShapeId) -> Option<Arc<ShapeGeometry>> {
        self.instances
            .values()
            .find(|instance| instance.geometry.id() == id)
            .map(|instance| Arc::clone(&instance.geometry))
    }

    /// Every spawned instance with its current pose, in spawn order.
    pub fn placed(&self, ctx: &SimulationContext<B>) -> Vec<(Arc<ShapeGeometry>, Isometry<Real>)> {
        self.spawn_order
            .iter()
            .filter_map(|body| {
                let instance = self.instances.get(body)?;
                let pose = ctx.backend().body_pose(*body)?;
                Some((Arc::clone(&instance.geometry), pose))
            })
            .collect()
    }

    /// Poses of every spawned instance, in spawn order.
    pub fn poses(&self, ctx: &SimulationContext<B>) -> Vec<InstancePose> {
        self.spawn_order
            .iter()
            .filter_map(|body| {
                let instance = self.instances.get(body)?;
                let pose = ctx.backend().body_pose(*body)?;
                let t = pose.translation.vector;
                let q = pose.rotation.quaternion();
                Some(InstancePose {
                    shape_id: instance.geometry.id(),
                    class_id: instance.geometry.class_id().to_string(),
                    layer: instance.layer,
                    translation: [t.x, t.y, t.z],
                    rotation: [q.i, q.j, q.k, q.w],
                    settled: instance.settled,
                })
            })
            .collect()
    }

    fn process_trigger_events(&mut self, ctx: &mut SimulationContext<B>) {
        for event in ctx.backend_mut().drain_trigger_events() {
            match event.kind {
                TriggerEventKind::Entered => {
                    log::debug!("⬇️ Body {:?} entered the spawn zone", event.body);
                }
                TriggerEventKind::Exited => self.record_exit(ctx, event.body),
            }
        }
    }

    fn record_exit(&mut self, ctx: &mut SimulationContext<B>, body: B::Body) {
        let Some(instance) = self.instances.get_mut(&body) else {
            return;
        };
        if instance.settled {
            return;
        }
        instance.settled = true;

        let pose = ctx.backend().body_pose(body).unwrap_or_else(|| {
            log::debug!("❔ No pose for settled body {:?}, using identity", body);
            Isometry::identity()
        });
        let volume = calculate_volume(instance.geometry.as_ref(), &pose);
        let id = instance.geometry.id();

        self.total_aggregates_volume += volume;
        self.settled += 1;
        self.exit_count += 1;
        log::debug!(
            "🧱 {} settled ({:.4}), fraction {:.3}%",
            id,
            volume,
            self.total_volume_fraction()
        );

        if self.state == PackingState::WaitingForSettle && self.exit_count >= self.wave_size {
            self.complete_wave(ctx);
        }
    }

    fn complete_wave(&mut self, ctx: &mut SimulationContext<B>) {
        log::info!(
            "✅ Layer {} settled ({} bodies), packed fraction {:.3}%",
            self.cursor.y.saturating_sub(1),
            self.wave_size,
            self.total_volume_fraction()
        );
        self.exit_count = 0;
        self.wave_size = 0;

        if self.cursor.is_full(&self.grid) {
            log::info!("🏁 Container full at {:.3}%", self.total_volume_fraction());
            self.state = PackingState::Full;
            return;
        }

        self.state = PackingState::Filling;
        if self.spawning_enabled {
            self.spawn_layer(ctx);
        }
    }

    fn spawn_layer(&mut self, ctx: &mut SimulationContext<B>) {
        let layer = self.cursor.y;
        let mut spawned = 0;

        for _ in 0..self.grid.layer_size() {
            if self.cursor.is_full(&self.grid) {
                break;
            }
            let Some(class) = self.sequencer.next(&mut self.rng) else {
                break;
            };
            let built = self.builder.build(class, &mut self.rng);
            let Some(position) = self.sequencer.position(&mut self.cursor) else {
                break;
            };

            let geometry = match built {
                Ok(geometry) => Arc::new(geometry),
                Err(e) => {
                    log::warn!("⚠️ Skipping spawn in layer {}: {}", layer, e);
                    self.skipped += 1;
                    continue;
                }
            };

            match ctx.backend_mut().create_body(
                geometry.as_ref(),
                position,
                MotionType::Dynamic,
                self.settings.material,
            ) {
                Ok(body) => {
                    self.instances.insert(
                        body,
                        PackedInstance {
                            geometry,
                            layer,
                            settled: false,
                        },
                    );
                    self.spawn_order.push(body);
                    spawned += 1;
                }
                Err(e) => {
                    log::warn!("⚠️ Could not register {}: {}", geometry.id(), e);
                    self.skipped += 1;
                }
            }
        }

        self.wave_size = spawned;
        self.exit_count = 0;

        if spawned > 0 {
            log::info!("🔻 Spawned layer {} with {} aggregates", layer, spawned);
            log::debug!(
                "🎲 {} instances left in pass {}",
                self.sequencer.remaining(),
                self.sequencer.refills()
            );
            self.state = PackingState::WaitingForSettle;
        } else if self.cursor.is_full(&self.grid) {
            self.state = PackingState::Full;
        }
    }
}
