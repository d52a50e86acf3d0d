//! Rigid-body physics seam.
//!
//! The packing core only needs to create bodies, observe a trigger volume and
//! read poses back. [`PhysicsBackend`] captures exactly that; [`RapierBackend`]
//! implements it on top of rapier.

use std::fmt::Debug;
use std::hash::Hash;

use crossbeam::channel::{Receiver, unbounded};
use rapier3d_f64::prelude::{
    ActiveEvents, CCDSolver, ChannelEventCollector, ColliderBuilder, ColliderHandle, ColliderSet,
    CollisionEvent, CollisionEventFlags, ContactForceEvent, DefaultBroadPhase, ImpulseJointSet,
    IntegrationParameters, IslandManager, Isometry, MultibodyJointSet, NarrowPhase,
    PhysicsPipeline, QueryPipeline, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, Translation,
    Vector,
};

use crate::types::{Collidable, Point3, Real};

/// How the engine moves a body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionType {
    Static,
    Dynamic,
}

/// Contact material of a body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub friction: f64,
    pub restitution: f64,
}

impl Material {
    /// Material every aggregate is registered with.
    pub const AGGREGATE: Material = Material {
        friction: 10.0,
        restitution: 0.0,
    };
}

impl Default for Material {
    fn default() -> Self {
        Self::AGGREGATE
    }
}

/// Whether a body started or stopped overlapping the trigger volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEventKind {
    Entered,
    Exited,
}

/// A trigger volume event for one body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriggerEvent<B> {
    pub kind: TriggerEventKind,
    pub body: B,
}

impl<B> TriggerEvent<B> {
    pub fn entered(body: B) -> Self {
        Self {
            kind: TriggerEventKind::Entered,
            body,
        }
    }

    pub fn exited(body: B) -> Self {
        Self {
            kind: TriggerEventKind::Exited,
            body,
        }
    }
}

/// Errors raised by a physics backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("physics backend unavailable: {0}")]
    Unavailable(String),
    #[error("a trigger volume is already registered")]
    TriggerExists,
    #[error("invalid body placement: {0}")]
    InvalidPlacement(String),
}

/// Capabilities the packing controller needs from a physics engine.
pub trait PhysicsBackend {
    /// Opaque handle of a body created by this backend.
    type Body: Copy + Eq + Hash + Debug;

    /// Registers the single trigger volume whose events
    /// [`PhysicsBackend::drain_trigger_events`] reports.
    fn create_trigger(
        &mut self,
        center: Point3,
        half_extents: Vector<Real>,
    ) -> Result<(), PhysicsError>;

    /// Adds a body for `shape` centered at `position`.
    ///
    /// Static bodies never move; the container walls are registered this way.
    fn create_body(
        &mut self,
        shape: &dyn Collidable,
        position: Point3,
        motion: MotionType,
        material: Material,
    ) -> Result<Self::Body, PhysicsError>;

    /// Advances the simulation by one fixed timestep.
    fn step(&mut self);

    /// Trigger events since the last call, in delivery order.
    fn drain_trigger_events(&mut self) -> Vec<TriggerEvent<Self::Body>>;

    /// Current pose of a body.
    fn body_pose(&self, body: Self::Body) -> Option<Isometry<Real>>;
}

/// Physics backend built on rapier.
pub struct RapierBackend {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    event_collector: ChannelEventCollector,
    collision_events: Receiver<CollisionEvent>,
    // Kept alive so the collector never sends into a closed channel.
    _contact_force_events: Receiver<ContactForceEvent>,
    trigger: Option<ColliderHandle>,
}

impl RapierBackend {
    /// Creates an empty world with gravity along `y`.
    pub fn new(gravity_y: f64, timestep: f64) -> Result<Self, PhysicsError> {
        if !gravity_y.is_finite() {
            return Err(PhysicsError::Unavailable(format!(
                "gravity must be finite, got {}",
                gravity_y
            )));
        }
        if !(timestep.is_finite() && timestep > 0.0) {
            return Err(PhysicsError::Unavailable(format!(
                "timestep must be positive, got {}",
                timestep
            )));
        }

        let (collision_send, collision_recv) = unbounded();
        let (contact_force_send, contact_force_recv) = unbounded();
        let integration_parameters = IntegrationParameters {
            dt: timestep,
            ..IntegrationParameters::default()
        };

        Ok(Self {
            gravity: Vector::new(0.0, gravity_y, 0.0),
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            event_collector: ChannelEventCollector::new(collision_send, contact_force_send),
            collision_events: collision_recv,
            _contact_force_events: contact_force_recv,
            trigger: None,
        })
    }

    /// Number of rigid bodies, walls included.
    #[cfg(test)]
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn trigger_event(&self, event: CollisionEvent) -> Option<TriggerEvent<RigidBodyHandle>> {
        let trigger = self.trigger?;
        type Make = fn(RigidBodyHandle) -> TriggerEvent<RigidBodyHandle>;
        let (collider1, collider2, make): (_, _, Make) = match event {
            CollisionEvent::Started(c1, c2, _) => (c1, c2, TriggerEvent::entered),
            CollisionEvent::Stopped(_, _, flags) if flags.contains(CollisionEventFlags::REMOVED) => {
                return None;
            }
            CollisionEvent::Stopped(c1, c2, _) => (c1, c2, TriggerEvent::exited),
        };

        let other = if collider1 == trigger {
            collider2
        } else if collider2 == trigger {
            collider1
        } else {
            return None;
        };
        let body = self.colliders.get(other)?.parent()?;
        Some(make(body))
    }
}

impl PhysicsBackend for RapierBackend {
    type Body = RigidBodyHandle;

    fn create_trigger(
        &mut self,
        center: Point3,
        half_extents: Vector<Real>,
    ) -> Result<(), PhysicsError> {
        if self.trigger.is_some() {
            return Err(PhysicsError::TriggerExists);
        }
        let collider = ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            .translation(center.coords)
            .sensor(true)
            .active_events(ActiveEvents::COLLISION_EVENTS)
            .build();
        self.trigger = Some(self.colliders.insert(collider));
        Ok(())
    }

    fn create_body(
        &mut self,
        shape: &dyn Collidable,
        position: Point3,
        motion: MotionType,
        material: Material,
    ) -> Result<Self::Body, PhysicsError> {
        if !position.coords.iter().all(|v| v.is_finite()) {
            return Err(PhysicsError::InvalidPlacement(format!(
                "position {:?} is not finite",
                position
            )));
        }

        let pose = Translation::from(position.coords) * shape.initial_pose();
        let builder = match motion {
            MotionType::Static => RigidBodyBuilder::fixed(),
            MotionType::Dynamic => RigidBodyBuilder::dynamic(),
        };
        let handle = self.bodies.insert(builder.position(pose).build());
        let collider = ColliderBuilder::new(shape.collision_shape())
            .friction(material.friction)
            .restitution(material.restitution)
            .build();
        self.colliders
            .insert_with_parent(collider, handle, &mut self.bodies);
        Ok(handle)
    }

    fn step(&mut self) {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.event_collector,
        );
    }

    fn drain_trigger_events(&mut self) -> Vec<TriggerEvent<Self::Body>> {
        let events: Vec<CollisionEvent> = self.collision_events.try_iter().collect();
        events
            .into_iter()
            .filter_map(|event| self.trigger_event(event))
            .collect()
    }

    fn body_pose(&self, body: Self::Body) -> Option<Isometry<Real>> {
        self.bodies.get(body).map(|b| *b.position())
    }
}

/// In-memory backend driven by hand, for controller tests.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub struct CreatedBody {
        pub position: Point3,
        pub motion: MotionType,
        pub material: Material,
    }

    #[derive(Debug, Default)]
    pub struct FakeBackend {
        pub static_boxes: Vec<(Point3, Vector<Real>)>,
        pub trigger: Option<(Point3, Vector<Real>)>,
        pub bodies: Vec<CreatedBody>,
        pub pending_events: Vec<TriggerEvent<usize>>,
        pub steps: usize,
        /// Bodies whose pose is no longer reported.
        pub lost: Vec<usize>,
    }

    impl FakeBackend {
        /// Queues an EXITED event for every body index in `bodies`.
        pub fn exit(&mut self, bodies: impl IntoIterator<Item = usize>) {
            self.pending_events
                .extend(bodies.into_iter().map(TriggerEvent::exited));
        }
    }

    impl PhysicsBackend for FakeBackend {
        type Body = usize;

        fn create_trigger(
            &mut self,
            center: Point3,
            half_extents: Vector<Real>,
        ) -> Result<(), PhysicsError> {
            if self.trigger.is_some() {
                return Err(PhysicsError::TriggerExists);
            }
            self.trigger = Some((center, half_extents));
            Ok(())
        }

        fn create_body(
            &mut self,
            shape: &dyn Collidable,
            position: Point3,
            motion: MotionType,
            material: Material,
        ) -> Result<usize, PhysicsError> {
            // Static bodies live apart so aggregate handles stay 0, 1, 2, ...
            if motion == MotionType::Static {
                let half_extents = shape
                    .collision_shape()
                    .as_cuboid()
                    .map(|cuboid| cuboid.half_extents)
                    .unwrap_or_else(Vector::zeros);
                self.static_boxes.push((position, half_extents));
                return Ok(usize::MAX - self.static_boxes.len());
            }
            self.bodies.push(CreatedBody {
                position,
                motion,
                material,
            });
            Ok(self.bodies.len() - 1)
        }

        fn step(&mut self) {
            self.steps += 1;
        }

        fn drain_trigger_events(&mut self) -> Vec<TriggerEvent<usize>> {
            std::mem::take(&mut self.pending_events)
        }

        fn body_pose(&self, body: usize) -> Option<Isometry<Real>> {
            if self.lost.contains(&body) {
                return None;
            }
            self.bodies
                .get(body)
                .map(|b| Isometry::translation(b.position.x, b.position.y, b.position.z))
        }
    }
}
