// ==============================================================================
// vehicle.rs — CHASSIS + FOUR WHEELS AS ONE DRIVABLE UNIT
// ------------------------------------------------------------------------------
// The controller owns the chassis handle and the four wheels (slot order is
// WheelPosition::index()). Per tick:
//
//   apply_commands()  driver intent → steer / drive / brake / engine events
//   tick()            finite check → sense → solve → apply forces → step
//                     → renormalise → finite check → record last good pose
//
// Wheel forces replace the previous tick's user forces (reset + add), so they
// are integrated per substep alongside gravity.
//
// Divergence (NaN/Inf in pose or velocity) never reaches the caller: the
// chassis is teleported back to the last good pose with zero velocity and the
// recovery is counted and logged.
// ==============================================================================

use log::{debug, info, warn};
use rapier3d::na::UnitQuaternion;
use rapier3d::prelude::*;

use crate::config::VehicleConfig;
use crate::error::DriveError;
use crate::input::{EngineEvent, VehicleCommandState};
use crate::physics::{PhysicsWorld, GROUP_CHASSIS, GROUP_GROUND};
use crate::wheel::{to_vector, Wheel, WheelForce, WheelPosition};

/// Below this speed (m/s) braking snaps the chassis to a full stop. Checked
/// against both the body velocity and the chassis displacement over the last
/// step.
const BRAKE_STOP_SPEED: Real = 1e-3;

/// Quaternion norm drift tolerated before renormalising.
const ROTATION_DRIFT: Real = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub wheels_in_contact: usize,
    pub recovered: bool,
}

pub struct VehicleController {
    chassis: RigidBodyHandle,
    config: VehicleConfig,
    wheels: [Wheel; 4],
    last_good: Isometry<Real>,
    last_step_speed: Real,   // |Δtranslation| / dt over the last tick
    ticks: u64,
    recoveries: u64,
}

impl VehicleController {
    /// Build the chassis body (box, plus optional cabin) and its four wheels.
    pub fn spawn(world: &mut PhysicsWorld, config: VehicleConfig) -> Result<Self, DriveError> {
        config.validate()?;

        let [sx, sy, sz] = config.spawn_position;
        let density = config.mass / config.collider_volume(); // ρ = m / V

        let rb = RigidBodyBuilder::dynamic()
            .translation(vector![sx, sy, sz])
            .linear_damping(config.linear_damping)
            .angular_damping(config.angular_damping)
            .can_sleep(false)
            .ccd_enabled(true)
            .build();

        let groups = InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND);
        let [hx, hy, hz] = config.chassis_half_extents;
        let mut colliders = vec![ColliderBuilder::cuboid(hx, hy, hz)
            .collision_groups(groups)
            .density(density)
            .friction(0.0)
            .restitution(0.0)
            .build()];

        if let Some(cabin) = &config.cabin {
            let [cx, cy, cz] = cabin.half_extents;
            colliders.push(
                ColliderBuilder::cuboid(cx, cy, cz)
                    .translation(to_vector(cabin.offset))
                    .collision_groups(groups)
                    .density(density)
                    .friction(0.0)
                    .restitution(0.0)
                    .build(),
            );
        }

        let chassis = world.add_body(rb, colliders);
        let last_good = *world.body(chassis).ok_or(DriveError::MissingChassis)?.position();

        let max_steer = config.max_steer;
        let mut wheels = config.wheels.map(|spec| Wheel::new(spec, max_steer));
        for wheel in &mut wheels {
            wheel.reset(&last_good);
        }

        info!(
            "🚗 Spawned vehicle at {:?} (mass = {} kg, body = {:?})",
            config.spawn_position, config.mass, chassis
        );

        Ok(Self {
            chassis,
            config,
            wheels,
            last_good,
            last_step_speed: Real::INFINITY,
            ticks: 0,
            recoveries: 0,
        })
    }

    pub fn chassis(&self) -> RigidBodyHandle {
        self.chassis
    }

    pub fn config(&self) -> &VehicleConfig {
        &self.config
    }

    pub fn wheel(&self, position: WheelPosition) -> &Wheel {
        &self.wheels[position.index()]
    }

    pub fn wheels(&self) -> &[Wheel; 4] {
        &self.wheels
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Times the chassis was reset after non-finite state.
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    pub fn last_good_pose(&self) -> &Isometry<Real> {
        &self.last_good
    }

    // -------------------------------------------------------------------------
    // Per-wheel writes
    // -------------------------------------------------------------------------

    pub fn set_wheel_force(&mut self, position: WheelPosition, force: Real) {
        self.wheels[position.index()].set_drive_force(force);
    }

    pub fn set_steering_value(&mut self, position: WheelPosition, angle: Real) {
        self.wheels[position.index()].set_steer_angle(angle);
    }

    /// Drive force on the rear pair only.
    pub fn set_throttle(&mut self, force: Real) {
        for position in WheelPosition::REAR {
            self.set_wheel_force(position, force);
        }
    }

    /// Steer angle on the front pair only.
    pub fn set_steer(&mut self, angle: Real) {
        for position in WheelPosition::FRONT {
            self.set_steering_value(position, angle);
        }
    }

    /// Zero all drive and decay chassis linear velocity by `brake_damping`.
    pub fn brake(&mut self, world: &mut PhysicsWorld) -> Result<(), DriveError> {
        for wheel in &mut self.wheels {
            wheel.clear_drive_force();
        }

        let body = world.body_mut(self.chassis).ok_or(DriveError::MissingChassis)?;
        let damped = *body.linvel() * self.config.brake_damping;
        let at_rest = damped.norm() < BRAKE_STOP_SPEED || self.last_step_speed < BRAKE_STOP_SPEED;
        let linvel = if at_rest || !damped.iter().all(|c| c.is_finite()) {
            Vector::zeros()
        } else {
            damped
        };
        body.set_linvel(linvel, true);
        Ok(())
    }

    /// One-time forward kick on engine start.
    pub fn start_engine(&mut self, world: &mut PhysicsWorld) -> Result<(), DriveError> {
        let body = world.body_mut(self.chassis).ok_or(DriveError::MissingChassis)?;
        if self.config.reset_motion_on_start {
            body.set_linvel(Vector::zeros(), true);
            body.set_angvel(Vector::zeros(), true);
        }
        let forward = body.rotation() * Vector::z();
        body.apply_impulse(forward * self.config.engine_start_impulse, true);

        info!("🔑 Engine started (impulse = {} N·s)", self.config.engine_start_impulse);
        Ok(())
    }

    /// Translate driver intent into wheel values. Call once per tick, before `tick`.
    pub fn apply_commands(
        &mut self,
        world: &mut PhysicsWorld,
        commands: &mut VehicleCommandState,
    ) -> Result<(), DriveError> {
        match commands.take_engine_event() {
            Some(EngineEvent::Started) => self.start_engine(world)?,
            Some(EngineEvent::Stopped) => info!("🛑 Engine stopped"),
            None => {}
        }

        self.set_steer(commands.steer_angle);

        if commands.brake_active {
            self.brake(world)?;
        } else if commands.engine_on {
            self.set_throttle(commands.throttle_force);
        } else {
            self.set_throttle(0.0);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Step
    // -------------------------------------------------------------------------

    pub fn tick(&mut self, world: &mut PhysicsWorld) -> Result<TickReport, DriveError> {
        let mut recovered = false;

        if !self.chassis_is_finite(world)? {
            self.recover(world, "before step");
            recovered = true;
        }

        world.refresh_queries();

        // PASS 1: sense + solve, collect forces.
        let mut forces: Vec<WheelForce> = Vec::with_capacity(4);
        let mut wheels_in_contact = 0;
        if !recovered {
            let body = world.body(self.chassis).ok_or(DriveError::MissingChassis)?;
            for wheel in &mut self.wheels {
                wheel.sense(body, world, self.chassis);
            }

            wheels_in_contact = self.wheels.iter().filter(|w| w.state().in_contact).count();
            let mass = body.mass();
            let load_share = mass / wheels_in_contact.max(1) as Real;
            let dt = world.timestep();

            for wheel in &mut self.wheels {
                if let Some(force) = wheel.solve(body, mass, load_share, dt) {
                    forces.push(force);
                }
            }
        }

        // PASS 2: apply. A recovered tick leaves the chassis force-free.
        let before = {
            let body = world.body_mut(self.chassis).ok_or(DriveError::MissingChassis)?;
            body.reset_forces(true);
            body.reset_torques(true);
            for WheelForce { contact, point, lateral, lateral_point } in forces {
                body.add_force_at_point(contact, point, true);
                body.add_force_at_point(lateral, lateral_point, true);
            }
            *body.translation()
        };

        world.fixed_step();

        let after = world.body(self.chassis).ok_or(DriveError::MissingChassis)?.translation();
        let dt = world.timestep();
        self.last_step_speed = if dt > 0.0 { (after - before).norm() / dt } else { 0.0 };

        self.renormalize_rotation(world)?;

        if self.chassis_is_finite(world)? {
            self.last_good = *world.body(self.chassis).ok_or(DriveError::MissingChassis)?.position();
        } else {
            self.recover(world, "after step");
            recovered = true;
        }

        self.ticks += 1;
        Ok(TickReport {
            tick: self.ticks,
            wheels_in_contact,
            recovered,
        })
    }

    fn chassis_is_finite(&self, world: &PhysicsWorld) -> Result<bool, DriveError> {
        let body = world.body(self.chassis).ok_or(DriveError::MissingChassis)?;
        let pose = body.position();
        let finite = pose.translation.vector.iter().all(|c| c.is_finite())
            && pose.rotation.coords.iter().all(|c| c.is_finite())
            && body.linvel().iter().all(|c| c.is_finite())
            && body.angvel().iter().all(|c| c.is_finite());
        Ok(finite)
    }

    fn recover(&mut self, world: &mut PhysicsWorld, when: &str) {
        self.recoveries += 1;
        warn!(
            "⚠️ Non-finite chassis state {when}, restoring last good pose {:?} (recovery #{})",
            self.last_good.translation.vector, self.recoveries
        );
        world.teleport(self.chassis, self.last_good);
        if let Some(body) = world.body_mut(self.chassis) {
            body.reset_forces(true);
            body.reset_torques(true);
        }
        self.last_step_speed = Real::INFINITY;
        for wheel in &mut self.wheels {
            wheel.reset(&self.last_good);
        }
    }

    fn renormalize_rotation(&self, world: &mut PhysicsWorld) -> Result<(), DriveError> {
        let body = world.body_mut(self.chassis).ok_or(DriveError::MissingChassis)?;
        let q = body.rotation().into_inner();
        let norm = q.norm();
        if norm.is_finite() && norm > 0.0 && (norm - 1.0).abs() > ROTATION_DRIFT {
            debug!("renormalising chassis rotation (|q| = {norm})");
            body.set_rotation(UnitQuaternion::new_normalize(q), true);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Readback
    // -------------------------------------------------------------------------

    pub fn chassis_pose(&self, world: &PhysicsWorld) -> Result<Isometry<Real>, DriveError> {
        world
            .body(self.chassis)
            .map(|b| *b.position())
            .ok_or(DriveError::MissingChassis)
    }

    /// World pose of each wheel hub, in `WheelPosition::index()` order.
    pub fn wheel_poses(&self, world: &PhysicsWorld) -> Result<[Isometry<Real>; 4], DriveError> {
        let chassis = self.chassis_pose(world)?;
        Ok(self.wheels.each_ref().map(|w| w.world_pose(&chassis)))
    }

    /// Horizontal speed, m/s.
    pub fn speed(&self, world: &PhysicsWorld) -> Result<Real, DriveError> {
        let body = world.body(self.chassis).ok_or(DriveError::MissingChassis)?;
        let up = world.up();
        let v = *body.linvel();
        Ok((v - up * v.dot(&up)).norm())
    }

    /// Chassis +Z axis in world space.
    pub fn forward(&self, world: &PhysicsWorld) -> Result<Vector<Real>, DriveError> {
        Ok(self.chassis_pose(world)?.rotation * Vector::z())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;

    fn setup() -> (PhysicsWorld, VehicleController) {
        let mut world = PhysicsWorld::new(&WorldConfig::default());
        let vehicle = VehicleController::spawn(&mut world, VehicleConfig::demo()).unwrap();
        (world, vehicle)
    }

    fn settle(world: &mut PhysicsWorld, vehicle: &mut VehicleController, ticks: usize) {
        for _ in 0..ticks {
            vehicle.tick(world).unwrap();
        }
    }

    fn translation(world: &PhysicsWorld, vehicle: &VehicleController) -> Vector<Real> {
        vehicle.chassis_pose(world).unwrap().translation.vector
    }

    #[test]
    fn spawn_uses_configured_mass() {
        let (world, vehicle) = setup();
        let mass = world.body(vehicle.chassis()).unwrap().mass();
        assert!((mass - 120.0).abs() < 1e-2, "mass = {mass}");

        let mut world = PhysicsWorld::new(&WorldConfig::default());
        let pickup = VehicleController::spawn(&mut world, VehicleConfig::pickup()).unwrap();
        let mass = world.body(pickup.chassis()).unwrap().mass();
        assert!((mass - 160.0).abs() < 1e-2, "mass = {mass}");
    }

    #[test]
    fn settles_on_four_wheels() {
        let (mut world, mut vehicle) = setup();
        settle(&mut world, &mut vehicle, 240);

        let report = vehicle.tick(&mut world).unwrap();
        assert_eq!(report.wheels_in_contact, 4);
        assert!(!report.recovered);

        let y = translation(&world, &vehicle).y;
        assert!(y > 1.0 && y < 2.0, "y = {y}");
        let vy = world.body(vehicle.chassis()).unwrap().linvel().y;
        assert!(vy.abs() < 1e-3, "vy = {vy}");
        for wheel in vehicle.wheels() {
            let s = wheel.state();
            assert!(s.force > 0.0 && s.force <= wheel.spec().suspension.max_force);
            assert!(s.normal_velocity.abs() < 1e-3, "damper still working: {}", s.normal_velocity);
        }

        // The springs alone carry the weight.
        let carried: Real = vehicle.wheels().iter().map(|w| w.state().force).sum();
        let weight = 120.0 * 9.82;
        assert!((carried - weight).abs() < weight * 0.01, "carried = {carried}");
    }

    #[test]
    fn zero_drive_at_rest_does_not_move() {
        let (mut world, mut vehicle) = setup();
        settle(&mut world, &mut vehicle, 240);
        let before = translation(&world, &vehicle);

        vehicle.set_throttle(0.0);
        settle(&mut world, &mut vehicle, 60);
        let after = translation(&world, &vehicle);

        let horizontal = vector![after.x - before.x, 0.0, after.z - before.z];
        assert!(horizontal.norm() < 1e-3, "drift = {horizontal:?}");
    }

    #[test]
    fn throttle_reaches_rear_wheels_only() {
        let (_world, mut vehicle) = setup();
        vehicle.set_throttle(300.0);
        assert_eq!(vehicle.wheel(WheelPosition::FrontLeft).drive_force(), 0.0);
        assert_eq!(vehicle.wheel(WheelPosition::FrontRight).drive_force(), 0.0);
        assert_eq!(vehicle.wheel(WheelPosition::RearLeft).drive_force(), 300.0);
        assert_eq!(vehicle.wheel(WheelPosition::RearRight).drive_force(), 300.0);
    }

    #[test]
    fn steer_reaches_front_wheels_only() {
        let (_world, mut vehicle) = setup();
        vehicle.set_steer(0.3);
        assert_eq!(vehicle.wheel(WheelPosition::FrontLeft).steer_angle(), 0.3);
        assert_eq!(vehicle.wheel(WheelPosition::FrontRight).steer_angle(), 0.3);
        assert_eq!(vehicle.wheel(WheelPosition::RearLeft).steer_angle(), 0.0);
        assert_eq!(vehicle.wheel(WheelPosition::RearRight).steer_angle(), 0.0);

        vehicle.set_steer(4.0);
        assert_eq!(vehicle.wheel(WheelPosition::FrontLeft).steer_angle(), 0.5);
    }

    #[test]
    fn brake_at_rest_stays_at_rest() {
        let (mut world, mut vehicle) = setup();
        world
            .body_mut(vehicle.chassis())
            .unwrap()
            .set_linvel(Vector::zeros(), true);
        for _ in 0..100 {
            vehicle.brake(&mut world).unwrap();
        }
        assert_eq!(*world.body(vehicle.chassis()).unwrap().linvel(), Vector::zeros());
    }

    #[test]
    fn holding_brake_on_a_settled_car_keeps_it_still() {
        let (mut world, mut vehicle) = setup();
        settle(&mut world, &mut vehicle, 240);
        let parked = translation(&world, &vehicle);

        for _ in 0..120 {
            vehicle.brake(&mut world).unwrap();
            assert_eq!(*world.body(vehicle.chassis()).unwrap().linvel(), Vector::zeros());
            vehicle.tick(&mut world).unwrap();
            let v = *world.body(vehicle.chassis()).unwrap().linvel();
            assert!(v.norm() < BRAKE_STOP_SPEED, "v = {v:?}");
        }
        assert!((translation(&world, &vehicle) - parked).norm() < 1e-3);
    }

    #[test]
    fn brake_decays_and_clears_drive() {
        let (mut world, mut vehicle) = setup();
        vehicle.set_throttle(300.0);
        world
            .body_mut(vehicle.chassis())
            .unwrap()
            .set_linvel(vector![0.0, 0.0, 10.0], true);

        vehicle.brake(&mut world).unwrap();
        let vz = world.body(vehicle.chassis()).unwrap().linvel().z;
        assert!((vz - 8.5).abs() < 1e-4);
        assert_eq!(vehicle.wheel(WheelPosition::RearLeft).drive_force(), 0.0);

        for _ in 0..200 {
            vehicle.brake(&mut world).unwrap();
        }
        assert_eq!(*world.body(vehicle.chassis()).unwrap().linvel(), Vector::zeros());
    }

    #[test]
    fn engine_start_discards_momentum_when_configured() {
        let (mut world, mut vehicle) = setup();
        world
            .body_mut(vehicle.chassis())
            .unwrap()
            .set_linvel(vector![3.0, -2.0, 0.0], true);

        vehicle.start_engine(&mut world).unwrap();
        let v = *world.body(vehicle.chassis()).unwrap().linvel();
        assert!(v.x.abs() < 1e-4 && v.y.abs() < 1e-4);
        assert!((v.z - 1.0).abs() < 1e-3, "v = {v:?}");
    }

    #[test]
    fn engine_start_keeps_momentum_when_disabled() {
        let mut world = PhysicsWorld::new(&WorldConfig::default());
        let config = VehicleConfig {
            reset_motion_on_start: false,
            ..VehicleConfig::demo()
        };
        let mut vehicle = VehicleController::spawn(&mut world, config).unwrap();
        world
            .body_mut(vehicle.chassis())
            .unwrap()
            .set_linvel(vector![3.0, 0.0, 0.0], true);

        vehicle.start_engine(&mut world).unwrap();
        let v = *world.body(vehicle.chassis()).unwrap().linvel();
        assert!((v.x - 3.0).abs() < 1e-4);
        assert!((v.z - 1.0).abs() < 1e-3);
    }

    #[test]
    fn engine_off_commands_produce_no_drive() {
        let (mut world, mut vehicle) = setup();
        let mut commands = VehicleCommandState::default();
        assert!(!commands.engine_on);
        commands.throttle_force = 300.0;
        vehicle.apply_commands(&mut world, &mut commands).unwrap();
        for wheel in vehicle.wheels() {
            assert_eq!(wheel.drive_force(), 0.0);
        }
    }

    #[test]
    fn non_finite_pose_is_restored() {
        let (mut world, mut vehicle) = setup();
        settle(&mut world, &mut vehicle, 30);
        let good = *vehicle.last_good_pose();

        world
            .body_mut(vehicle.chassis())
            .unwrap()
            .set_translation(vector![Real::NAN, 1.0, 0.0], true);

        let report = vehicle.tick(&mut world).unwrap();
        assert!(report.recovered);
        assert_eq!(vehicle.recoveries(), 1);

        let pose = vehicle.chassis_pose(&world).unwrap();
        assert!(pose.translation.vector.iter().all(|c| c.is_finite()));
        assert!((pose.translation.vector - good.translation.vector).norm() < 0.05);
        for wheel_pose in vehicle.wheel_poses(&world).unwrap() {
            assert!(wheel_pose.translation.vector.iter().all(|c| c.is_finite()));
        }

        let report = vehicle.tick(&mut world).unwrap();
        assert!(!report.recovered);
    }

    #[test]
    fn rotation_stays_unit_length() {
        let (mut world, mut vehicle) = setup();
        vehicle.set_throttle(300.0);
        vehicle.set_steer(0.5);
        for _ in 0..300 {
            vehicle.tick(&mut world).unwrap();
            let q = vehicle.chassis_pose(&world).unwrap().rotation.into_inner();
            assert!((q.norm() - 1.0).abs() < 1e-3);
        }
    }
}
