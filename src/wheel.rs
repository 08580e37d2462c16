// ==============================================================================
// wheel.rs — RAYCAST SUSPENSION + DRIVE / STEER / FRICTION PER WHEEL
// ------------------------------------------------------------------------------
// Each fixed step runs two passes over the four wheels:
//
// 1) sense(): cast a ray from the wheel mount along the suspension direction
//    (length = rest_length + radius) and record the SuspensionState.
// 2) solve(): turn that state into forces on the chassis: spring + damper
//    along the ground normal and drive along the steered forward axis at the
//    contact point, lateral friction against side slip at a point raised
//    toward the centre of mass (roll_influence). Drive and lateral friction
//    together never exceed friction_slip * F_n.
//
// Stiffness and damping are per kg of chassis:
//     F_n = m * (k * x - c * v_n),  c = compression / relaxation damping
// clamped to [0, max_force]. An airborne wheel contributes nothing.
//
// Notes:
// - The ground is a flat static slab, so the contact normal is world up.
// - Closing velocity comes from the change in spring length over the last
//   step while the wheel stays in contact; on first touch it falls back to
//   the chassis point velocity.
// - Results are forces, not impulses: rapier integrates user forces per
//   substep exactly like gravity, so a car at rest reads back zero velocity.
// - This file never touches rapier sets mutably; the controller applies the
//   returned forces.
// ==============================================================================

use std::fmt;

use rapier3d::na::{Unit, UnitQuaternion};
use rapier3d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::DriveError;
use crate::physics::PhysicsWorld;

/// Fraction of the side slip cancelled per step. Below 1 so the yaw coupling
/// of an off-COM force does not overshoot.
const LATERAL_RELAXATION: Real = 0.5;

/// Spin decay per step for a wheel that lost contact.
const AIRBORNE_SPIN_DECAY: Real = 0.99;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum WheelPosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelPosition {
    pub const ALL: [WheelPosition; 4] = [
        WheelPosition::FrontLeft,
        WheelPosition::FrontRight,
        WheelPosition::RearLeft,
        WheelPosition::RearRight,
    ];

    pub const FRONT: [WheelPosition; 2] = [WheelPosition::FrontLeft, WheelPosition::FrontRight];
    pub const REAR: [WheelPosition; 2] = [WheelPosition::RearLeft, WheelPosition::RearRight];

    /// Array slot in every `[_; 4]` keyed by wheel.
    pub const fn index(self) -> usize {
        match self {
            WheelPosition::FrontLeft => 0,
            WheelPosition::FrontRight => 1,
            WheelPosition::RearLeft => 2,
            WheelPosition::RearRight => 3,
        }
    }

    pub fn is_front(&self) -> bool {
        matches!(self, WheelPosition::FrontLeft | WheelPosition::FrontRight)
    }

    pub fn is_rear(&self) -> bool {
        matches!(self, WheelPosition::RearLeft | WheelPosition::RearRight)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelPosition::FrontLeft => "FL",
            WheelPosition::FrontRight => "FR",
            WheelPosition::RearLeft => "RL",
            WheelPosition::RearRight => "RR",
        }
    }
}

impl fmt::Display for WheelPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuspensionTuning {
    pub stiffness: Real,            // per kg of chassis
    pub rest_length: Real,          // m
    pub damping_compression: Real,  // per kg, while closing
    pub damping_relaxation: Real,   // per kg, while extending
    pub max_force: Real,            // N
    pub friction_slip: Real,        // lateral + drive bound, x normal force
    pub roll_influence: Real,       // 0 = side force at COM height, 1 = at ground
}

impl Default for SuspensionTuning {
    fn default() -> Self {
        Self {
            stiffness: 50.0,
            rest_length: 0.2,
            damping_compression: 4.4,
            damping_relaxation: 2.3,
            max_force: 10_000.0,
            friction_slip: 5.0,
            roll_influence: 0.1,
        }
    }
}

/// Static description of one wheel, all vectors in chassis space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WheelSpec {
    pub position: WheelPosition,
    pub mount: [Real; 3],       // suspension hard point
    pub direction: [Real; 3],   // suspension axis, points at the ground
    pub axle: [Real; 3],        // rolling axis; forward = direction x axle
    pub radius: Real,
    pub suspension: SuspensionTuning,
    pub is_steering: bool,
    pub is_drive: bool,
}

impl WheelSpec {
    /// Front wheels steer, rear wheels drive; suspension points straight down.
    pub fn new(position: WheelPosition, mount: [Real; 3], radius: Real, suspension: SuspensionTuning) -> Self {
        Self {
            position,
            mount,
            direction: [0.0, -1.0, 0.0],
            axle: [1.0, 0.0, 0.0],
            radius,
            suspension,
            is_steering: position.is_front(),
            is_drive: position.is_rear(),
        }
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        let s = &self.suspension;
        let name = self.position;
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(DriveError::invalid_config(format!("{name}: radius must be positive")));
        }
        if !(s.rest_length.is_finite() && s.rest_length > 0.0) {
            return Err(DriveError::invalid_config(format!("{name}: rest_length must be positive")));
        }
        if !(s.max_force.is_finite() && s.max_force > 0.0) {
            return Err(DriveError::invalid_config(format!("{name}: max_force must be positive")));
        }
        let non_negative = [s.stiffness, s.damping_compression, s.damping_relaxation, s.friction_slip];
        if non_negative.iter().any(|v| !(v.is_finite() && *v >= 0.0)) {
            return Err(DriveError::invalid_config(format!(
                "{name}: stiffness, damping and friction_slip must be >= 0"
            )));
        }
        if !(0.0..=1.0).contains(&s.roll_influence) {
            return Err(DriveError::invalid_config(format!("{name}: roll_influence must be in [0, 1]")));
        }
        let direction = to_vector(self.direction);
        let axle = to_vector(self.axle);
        if direction.norm() < 1e-6 || axle.norm() < 1e-6 || direction.cross(&axle).norm() < 1e-6 {
            return Err(DriveError::invalid_config(format!(
                "{name}: direction and axle must be non-zero and not parallel"
            )));
        }
        Ok(())
    }
}

/// Runtime suspension state, refreshed by `Wheel::sense` every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuspensionState {
    pub hard_point: Point<Real>,       // world mount point
    pub length: Real,                  // current spring length
    pub compression: Real,             // rest_length - length
    pub in_contact: bool,
    pub contact_point: Point<Real>,
    pub contact_normal: Vector<Real>,
    pub normal_velocity: Real,         // < 0 while closing
    pub force: Real,                   // last applied normal force, N
}

impl SuspensionState {
    fn at_rest(hard_point: Point<Real>, rest_length: Real, up: Vector<Real>) -> Self {
        Self {
            hard_point,
            length: rest_length,
            compression: 0.0,
            in_contact: false,
            contact_point: hard_point,
            contact_normal: up,
            normal_velocity: 0.0,
            force: 0.0,
        }
    }
}

/// World-space forces one wheel applies to the chassis for the next step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelForce {
    pub contact: Vector<Real>,         // normal + drive, at `point`
    pub point: Point<Real>,
    pub lateral: Vector<Real>,         // side friction, at `lateral_point`
    pub lateral_point: Point<Real>,
}

/// Spring + damper normal force, clamped to `[0, max_force]`.
///
/// `compression <= 0` (over-extension) or a non-finite input yields zero.
pub fn suspension_force(
    tuning: &SuspensionTuning,
    chassis_mass: Real,
    compression: Real,
    normal_velocity: Real,
) -> Real {
    if !(compression > 0.0) {
        return 0.0;
    }
    let damping = if normal_velocity < 0.0 {
        tuning.damping_compression
    } else {
        tuning.damping_relaxation
    };
    let force = chassis_mass * (tuning.stiffness * compression - damping * normal_velocity);
    if !force.is_finite() {
        return 0.0;
    }
    force.clamp(0.0, tuning.max_force)
}

#[derive(Debug, Clone)]
pub struct Wheel {
    spec: WheelSpec,
    max_steer: Real,
    steer_angle: Real,
    drive_force: Real,
    spin: Real,           // accumulated roll about the axle, rad
    spin_rate: Real,      // rad/s
    forward_ws: Vector<Real>,
    direction_ws: Vector<Real>,
    state: SuspensionState,
}

impl Wheel {
    pub fn new(spec: WheelSpec, max_steer: Real) -> Self {
        let mount = Point::from(to_vector(spec.mount));
        let direction = to_vector(spec.direction).normalize();
        Self {
            spec,
            max_steer,
            steer_angle: 0.0,
            drive_force: 0.0,
            spin: 0.0,
            spin_rate: 0.0,
            forward_ws: direction.cross(&to_vector(spec.axle)).normalize(),
            direction_ws: direction,
            state: SuspensionState::at_rest(mount, spec.suspension.rest_length, -direction),
        }
    }

    pub fn spec(&self) -> &WheelSpec {
        &self.spec
    }

    pub fn position(&self) -> WheelPosition {
        self.spec.position
    }

    pub fn state(&self) -> &SuspensionState {
        &self.state
    }

    pub fn steer_angle(&self) -> Real {
        self.steer_angle
    }

    pub fn drive_force(&self) -> Real {
        self.drive_force
    }

    pub fn spin(&self) -> Real {
        self.spin
    }

    /// Steered rolling direction in world space, as of the last `sense`.
    pub fn forward(&self) -> Vector<Real> {
        self.forward_ws
    }

    /// Ignored on non-steering wheels. Clamped to `±max_steer`; NaN is
    /// treated as straight ahead.
    pub fn set_steer_angle(&mut self, angle: Real) {
        if !self.spec.is_steering {
            return;
        }
        self.steer_angle = if angle.is_finite() {
            angle.clamp(-self.max_steer, self.max_steer)
        } else {
            0.0
        };
    }

    /// Ignored on non-drive wheels and for non-finite input.
    pub fn set_drive_force(&mut self, force: Real) {
        if self.spec.is_drive && force.is_finite() {
            self.drive_force = force;
        }
    }

    /// Zero drive regardless of the drive flag (brake path).
    pub fn clear_drive_force(&mut self) {
        self.drive_force = 0.0;
    }

    /// Drop contact and spring history, e.g. after the chassis was teleported.
    pub fn reset(&mut self, chassis: &Isometry<Real>) {
        let up = -(chassis.rotation * to_vector(self.spec.direction)).normalize();
        let hard_point = chassis * Point::from(to_vector(self.spec.mount));
        self.state = SuspensionState::at_rest(hard_point, self.spec.suspension.rest_length, up);
        self.spin_rate = 0.0;
    }

    fn steering_rotation(&self) -> UnitQuaternion<Real> {
        UnitQuaternion::from_axis_angle(&Unit::new_normalize(-self.direction_ws), self.steer_angle)
    }

    fn update_axes(&mut self, chassis: &Isometry<Real>) {
        let direction_cs = to_vector(self.spec.direction).normalize();
        let axle_cs = to_vector(self.spec.axle);
        self.direction_ws = chassis.rotation * direction_cs;
        let forward_ws = chassis.rotation * direction_cs.cross(&axle_cs).normalize();
        self.forward_ws = self.steering_rotation() * forward_ws;
        self.state.hard_point = chassis * Point::from(to_vector(self.spec.mount));
    }

    /// Pass 1: raycast from the mount and refresh `SuspensionState`.
    pub fn sense(&mut self, chassis: &RigidBody, world: &PhysicsWorld, exclude: RigidBodyHandle) {
        self.update_axes(chassis.position());

        let rest = self.spec.suspension.rest_length;
        let radius = self.spec.radius;
        let origin = self.state.hard_point;
        let up = world.up();
        let dt = world.timestep();
        let previous = self.state.in_contact.then_some(self.state.length);

        match world.cast_ray(origin, self.direction_ws, rest + radius, exclude) {
            Some(toi) => {
                let contact_point = origin + self.direction_ws * toi;
                let length = toi - radius;
                let normal_velocity = match previous {
                    Some(prev) if dt > 0.0 => (length - prev) / dt,
                    _ => chassis.velocity_at_point(&contact_point).dot(&up),
                };
                self.state = SuspensionState {
                    hard_point: origin,
                    length,
                    compression: rest - length,
                    in_contact: true,
                    contact_point,
                    contact_normal: up,
                    normal_velocity,
                    force: 0.0,
                };
            }
            None => {
                self.state = SuspensionState::at_rest(origin, rest, up);
            }
        }
    }

    /// Pass 2: forces on the chassis for the next step, `None` when airborne.
    ///
    /// `load_share` is the chassis mass divided by the number of wheels in
    /// contact; it converts side slip velocity into a cancelling force.
    pub fn solve(
        &mut self,
        chassis: &RigidBody,
        chassis_mass: Real,
        load_share: Real,
        dt: Real,
    ) -> Option<WheelForce> {
        if !self.state.in_contact || dt <= 0.0 {
            self.state.force = 0.0;
            self.spin_rate *= AIRBORNE_SPIN_DECAY;
            self.spin += self.spin_rate * dt;
            return None;
        }

        let force = suspension_force(
            &self.spec.suspension,
            chassis_mass,
            self.state.compression,
            self.state.normal_velocity,
        );
        self.state.force = force;

        let normal = self.state.contact_normal;
        let point = self.state.contact_point;

        // Ground-plane basis from the steered forward axis.
        let forward = {
            let v = self.forward_ws - normal * self.forward_ws.dot(&normal);
            if v.norm() > 1e-6 { v.normalize() } else { self.forward_ws }
        };
        let side = normal.cross(&forward);

        let point_vel = chassis.velocity_at_point(&point);
        let v_long = point_vel.dot(&forward);
        let v_lat = point_vel.dot(&side);

        let mut lateral = -v_lat * load_share * LATERAL_RELAXATION / dt;
        let mut drive = if self.spec.is_drive { self.drive_force } else { 0.0 };

        // Friction circle: drive + lateral bounded by friction_slip * F_n.
        let max_grip = self.spec.suspension.friction_slip * force;
        let demand = (lateral * lateral + drive * drive).sqrt();
        if demand > max_grip {
            let scale = if demand > 0.0 { max_grip / demand } else { 0.0 };
            lateral *= scale;
            drive *= scale;
        }

        self.spin_rate = v_long / self.spec.radius;
        self.spin += self.spin_rate * dt;

        // Side force acts closer to COM height so cornering does not roll the car.
        let chassis_up = chassis.rotation() * Vector::y();
        let com = *chassis.center_of_mass();
        let drop = chassis_up.dot(&(point - com));
        let lateral_point = point - chassis_up * (drop * (1.0 - self.spec.suspension.roll_influence));

        Some(WheelForce {
            contact: normal * force + forward * drive,
            point,
            lateral: side * lateral,
            lateral_point,
        })
    }

    /// World pose of the wheel hub for the render bridge.
    pub fn world_pose(&self, chassis: &Isometry<Real>) -> Isometry<Real> {
        let direction_cs = to_vector(self.spec.direction).normalize();
        let hard_point = chassis * Point::from(to_vector(self.spec.mount));
        let direction_ws = chassis.rotation * direction_cs;
        let centre = hard_point + direction_ws * self.state.length;

        let steer = UnitQuaternion::from_axis_angle(&Unit::new_normalize(-direction_ws), self.steer_angle);
        let roll = UnitQuaternion::from_axis_angle(&Unit::new_normalize(to_vector(self.spec.axle)), self.spin);

        Isometry::from_parts(centre.coords.into(), steer * chassis.rotation * roll)
    }
}

#[inline]
pub(crate) fn to_vector(v: [Real; 3]) -> Vector<Real> {
    vector![v[0], v[1], v[2]]
}
