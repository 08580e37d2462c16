// src/physics.rs

use log::info;
use rapier3d::prelude::*;

use crate::config::WorldConfig;

pub const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
pub const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

/// Owns every rapier set plus the fixed integration step.
pub struct PhysicsWorld {
    pub gravity: Vector<Real>,                          // gravity vector
    pub integration_parameters: IntegrationParameters,  // dt lives here
    pub pipeline: PhysicsPipeline,                      // physics pipeline
    pub island_manager: IslandManager,                  // manages islands of bodies
    pub broad_phase: DefaultBroadPhase,                 // broad-phase collision detection
    pub narrow_phase: NarrowPhase,                      // collision detection
    pub bodies: RigidBodySet,                           // for rigid bodies
    pub colliders: ColliderSet,                         // for collision shapes
    pub joints: ImpulseJointSet,                        // for constraints
    pub multibody_joints: MultibodyJointSet,            // for articulated bodies
    pub ccd: CCDSolver,                                 // continuous collision detection
    pub query_pipeline: QueryPipeline,                  // for raycasting
    ground: RigidBodyHandle,
    steps: u64,
}

impl PhysicsWorld {
    pub fn new(config: &WorldConfig) -> Self {
        let [gx, gy, gz] = config.gravity;

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Static ground slab; top surface sits exactly at y = 0.
        let ground_rb = RigidBodyBuilder::fixed()
            .translation(vector![0.0, -0.1, 0.0])
            .build();
        let ground = bodies.insert(ground_rb);

        let half = config.ground_half_extent;
        let ground_collider = ColliderBuilder::cuboid(half, 0.1, half)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(config.ground_friction)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground, &mut bodies);

        info!(
            "🌎 Ground inserted ({half} m half extent). Bodies = {}, Colliders = {}",
            bodies.len(),
            colliders.len()
        );

        let mut world = Self {
            gravity: vector![gx, gy, gz],
            integration_parameters: IntegrationParameters {
                dt: config.timestep,
                ..IntegrationParameters::default()
            },
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            ground,
            steps: 0,
        };
        world.refresh_queries();
        world
    }

    /// Insert a body with its colliders and compute its mass properties now,
    /// so impulses applied before the first step see the right mass and COM.
    pub fn add_body(
        &mut self,
        body: RigidBody,
        colliders: impl IntoIterator<Item = Collider>,
    ) -> RigidBodyHandle {
        let handle = self.bodies.insert(body);
        for collider in colliders {
            self.colliders
                .insert_with_parent(collider, handle, &mut self.bodies);
        }
        self.resync_mass(handle);
        self.refresh_queries();
        handle
    }

    /// Recompute mass properties (and world-space COM) from the body's
    /// current pose. Needed after teleporting a body between steps.
    pub fn resync_mass(&mut self, handle: RigidBodyHandle) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.recompute_mass_properties_from_colliders(&self.colliders);
        }
    }

    /// Place a body at `pose` with zero velocity, dragging its colliders
    /// along immediately instead of waiting for the next step to sync them.
    pub fn teleport(&mut self, handle: RigidBodyHandle, pose: Isometry<Real>) {
        let Some(body) = self.bodies.get_mut(handle) else { return };
        body.set_position(pose, true);
        body.set_linvel(Vector::zeros(), true);
        body.set_angvel(Vector::zeros(), true);

        for &collider_handle in body.colliders() {
            if let Some(collider) = self.colliders.get_mut(collider_handle) {
                let local = collider
                    .position_wrt_parent()
                    .copied()
                    .unwrap_or_else(Isometry::identity);
                collider.set_position(pose * local);
            }
        }
        self.resync_mass(handle);
    }

    pub fn ground(&self) -> RigidBodyHandle {
        self.ground
    }

    pub fn timestep(&self) -> Real {
        self.integration_parameters.dt
    }

    /// Completed fixed steps since construction.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Unit vector opposite to gravity (+Y for the default world).
    pub fn up(&self) -> Vector<Real> {
        let norm = self.gravity.norm();
        if norm > 1e-6 {
            -self.gravity / norm
        } else {
            Vector::y()
        }
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn body_mut(&mut self, handle: RigidBodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    pub fn refresh_queries(&mut self) {
        self.query_pipeline.update(&self.colliders);
    }

    /// Distance along `dir` (unit) to the first collider not owned by
    /// `exclude`, if any lies within `max_dist`.
    pub fn cast_ray(
        &self,
        origin: Point<Real>,
        dir: Vector<Real>,
        max_dist: Real,
        exclude: RigidBodyHandle,
    ) -> Option<Real> {
        let ray = Ray::new(origin, dir);
        let filter = QueryFilter::default().exclude_rigid_body(exclude);

        self.query_pipeline
            .cast_ray(&self.bodies, &self.colliders, &ray, max_dist, true, filter)
            .map(|(_collider, toi)| toi)
    }

    /// Advance the simulation by exactly one fixed timestep.
    pub fn fixed_step(&mut self) {
        let hooks = ();
        let events = ();

        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &hooks,
            &events,
        );
        self.steps += 1;
    }
}
