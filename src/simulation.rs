//! Simulation lifecycle and the dedicated simulation thread.
//!
//! All packing state lives on one thread. The HTTP side talks to it through
//! a command channel and observes it through a `watch` channel (status) and
//! a `broadcast` channel (frame snapshots).

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use utoipa::ToSchema;

use crate::controller::{ControllerSettings, InstancePose, PackingController, PackingStatus};
use crate::export::{self, ExportError, ExportInstance};
use crate::geometry::{GeometryPayload, ShapeId};
use crate::physics::{Material, PhysicsBackend, PhysicsError, RapierBackend};
use crate::planner::PackingPlan;

/// Capacity of the frame broadcast; slow viewers skip frames.
const FRAME_CHANNEL_CAPACITY: usize = 16;

/// Size of the client drawing surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Everything that configures a simulation run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationSettings {
    pub timestep: f64,
    pub gravity: f64,
    pub controller: ControllerSettings,
    pub snapshot_interval_frames: u64,
    pub seed: Option<u64>,
    pub autostart: bool,
}

impl SimulationSettings {
    pub const DEFAULT_TIMESTEP: f64 = 1.0 / 60.0;
    pub const DEFAULT_GRAVITY: f64 = -9.8;
    pub const DEFAULT_SPAWN_INTERVAL_FRAMES: u64 = 60;
    pub const DEFAULT_SNAPSHOT_INTERVAL_FRAMES: u64 = 2;
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            timestep: Self::DEFAULT_TIMESTEP,
            gravity: Self::DEFAULT_GRAVITY,
            controller: ControllerSettings {
                spawn_interval_frames: Self::DEFAULT_SPAWN_INTERVAL_FRAMES,
                material: Material::AGGREGATE,
            },
            snapshot_interval_frames: Self::DEFAULT_SNAPSHOT_INTERVAL_FRAMES,
            seed: None,
            autostart: true,
        }
    }
}

/// Poses of all instances at one frame.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct FrameSnapshot {
    pub frame: u64,
    pub instances: Vec<InstancePose>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("failed to start the simulation thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("the simulation thread is not running")]
    Stopped,
}

/// Messages accepted by the simulation thread.
#[derive(Debug)]
pub enum SimulationCommand {
    Resize(Viewport),
    PauseSimulation,
    ResumeSimulation,
    StopAddingAggregates,
    PresumeAddingAggregates,
    Export(oneshot::Sender<Result<String, ExportError>>),
    Geometry(ShapeId, oneshot::Sender<Option<GeometryPayload>>),
    Shutdown,
}

/// Explicit owner of the physics backend and the frame clock.
pub struct SimulationContext<B: PhysicsBackend> {
    backend: B,
    frame: u64,
    viewport: Viewport,
    running: bool,
}

impl<B: PhysicsBackend> SimulationContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            frame: 0,
            viewport: Viewport::default(),
            running: true,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Frames completed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Only the viewport changes; grid and counts are fixed for the run.
    pub fn resize(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Steps physics once and counts the frame. Returns `false` while paused.
    pub fn advance(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.backend.step();
        self.frame += 1;
        true
    }

    /// Ends the run and hands the backend back.
    pub fn dispose(self) -> B {
        self.backend
    }
}

/// The per-thread loop state: context, controller and channel ends.
pub struct SimulationLoop<B: PhysicsBackend> {
    ctx: SimulationContext<B>,
    controller: PackingController<B>,
    settings: SimulationSettings,
    status: watch::Sender<PackingStatus>,
    frames: broadcast::Sender<Arc<FrameSnapshot>>,
}

impl<B: PhysicsBackend> SimulationLoop<B> {
    /// Builds the scene on `backend` and wires the output channels.
    pub fn new(
        backend: B,
        plan: &PackingPlan,
        settings: SimulationSettings,
        frames: broadcast::Sender<Arc<FrameSnapshot>>,
    ) -> Result<(Self, watch::Receiver<PackingStatus>), PhysicsError> {
        let mut ctx = SimulationContext::new(backend);
        if !settings.autostart {
            ctx.pause();
        }
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let controller = PackingController::new(plan, &mut ctx, settings.controller, rng)?;
        let (status, status_rx) = watch::channel(controller.status(&ctx));

        Ok((
            Self {
                ctx,
                controller,
                settings,
                status,
                frames,
            },
            status_rx,
        ))
    }

    /// Applies one command. Returns `false` when the loop should end.
    pub fn handle(&mut self, command: SimulationCommand) -> bool {
        match command {
            SimulationCommand::Resize(viewport) => self.ctx.resize(viewport),
            SimulationCommand::PauseSimulation => {
                log::info!("⏸️ Simulation paused at frame {}", self.ctx.frame());
                self.ctx.pause();
            }
            SimulationCommand::ResumeSimulation => {
                log::info!("▶️ Simulation resumed at frame {}", self.ctx.frame());
                self.ctx.resume();
            }
            SimulationCommand::StopAddingAggregates => self.controller.stop_adding_aggregates(),
            SimulationCommand::PresumeAddingAggregates => {
                self.controller.presume_adding_aggregates()
            }
            SimulationCommand::Export(reply) => {
                let _ = reply.send(self.export_obj());
            }
            SimulationCommand::Geometry(id, reply) => {
                let payload = self.controller.geometry(id).map(|g| g.to_payload());
                let _ = reply.send(payload);
            }
            SimulationCommand::Shutdown => return false,
        }
        self.publish_status();
        true
    }

    /// Runs one frame: step, tick, publish.
    pub fn frame(&mut self) {
        if self.ctx.advance() {
            self.controller.tick(&mut self.ctx);
            let interval = self.settings.snapshot_interval_frames.max(1);
            if self.ctx.frame() % interval == 0 && self.frames.receiver_count() > 0 {
                let snapshot = FrameSnapshot {
                    frame: self.ctx.frame(),
                    instances: self.controller.poses(&self.ctx),
                };
                let _ = self.frames.send(Arc::new(snapshot));
            }
        }
        self.publish_status();
    }

    #[cfg(test)]
    pub fn context(&self) -> &SimulationContext<B> {
        &self.ctx
    }

    /// Drives frames at the configured timestep until shutdown or until
    /// every command sender is gone.
    pub fn run(mut self, mut commands: mpsc::UnboundedReceiver<SimulationCommand>) -> B {
        let frame_duration = Duration::from_secs_f64(self.settings.timestep);

        'frames: loop {
            let started = Instant::now();
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command) {
                            break 'frames;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'frames,
                }
            }

            self.frame();

            if let Some(remaining) = frame_duration.checked_sub(started.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        log::info!("🛑 Simulation stopped after {} frames", self.ctx.frame());
        self.ctx.dispose()
    }

    fn export_obj(&self) -> Result<String, ExportError> {
        let placed = self.controller.placed(&self.ctx);
        let instances: Vec<ExportInstance<'_>> = placed
            .iter()
            .map(|(geometry, pose)| ExportInstance {
                name: geometry.id().to_string(),
                shape: geometry.as_ref(),
                pose: *pose,
            })
            .collect();
        export::to_obj_string(&instances)
    }

    fn publish_status(&self) {
        self.status.send_replace(self.controller.status(&self.ctx));
    }
}

/// Cloneable access to a running simulation thread.
#[derive(Clone)]
pub struct SimulationHandle {
    commands: mpsc::UnboundedSender<SimulationCommand>,
    status: watch::Receiver<PackingStatus>,
    frames: broadcast::Sender<Arc<FrameSnapshot>>,
}

impl SimulationHandle {
    pub fn send(&self, command: SimulationCommand) -> Result<(), SimulationError> {
        self.commands
            .send(command)
            .map_err(|_| SimulationError::Stopped)
    }

    /// Latest published status.
    pub fn status(&self) -> PackingStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<FrameSnapshot>> {
        self.frames.subscribe()
    }

    pub async fn export_obj(&self) -> Result<String, SimulationError> {
        let (reply, response) = oneshot::channel();
        self.send(SimulationCommand::Export(reply))?;
        let obj = response.await.map_err(|_| SimulationError::Stopped)??;
        Ok(obj)
    }

    pub async fn geometry(&self, id: ShapeId) -> Result<Option<GeometryPayload>, SimulationError> {
        let (reply, response) = oneshot::channel();
        self.send(SimulationCommand::Geometry(id, reply))?;
        response.await.map_err(|_| SimulationError::Stopped)
    }
}

/// Starts the rapier-backed simulation on its own thread.
///
/// Blocks until the backend and the scene are built, so a backend failure
/// surfaces here and aborts startup.
///
/// # Parameters
/// * `plan` - The packing plan to run
/// * `settings` - Timestep, gravity, spawn cycle and output cadence
///
/// # Returns
/// A handle for the HTTP side plus the thread's join handle
pub fn spawn_simulation(
    plan: PackingPlan,
    settings: SimulationSettings,
) -> Result<(SimulationHandle, JoinHandle<()>), SimulationError> {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (frames_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let thread_frames = frames_tx.clone();

    let thread = std::thread::Builder::new()
        .name("simulation".to_string())
        .spawn(move || {
            let built = RapierBackend::new(settings.gravity, settings.timestep)
                .and_then(|backend| SimulationLoop::new(backend, &plan, settings, thread_frames));
            match built {
                Ok((simulation, status_rx)) => {
                    if ready_tx.send(Ok(status_rx)).is_ok() {
                        simulation.run(commands_rx);
                    }
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

    let status = match ready_rx.recv() {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e.into());
        }
        Err(_) => {
            let _ = thread.join();
            return Err(SimulationError::Stopped);
        }
    };

    log::info!("🚀 Simulation thread started");
    Ok((
        SimulationHandle {
            commands: commands_tx,
            status,
            frames: frames_tx,
        },
        thread,
    ))
}
