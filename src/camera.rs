//! Smoothed chase camera, updated once per frame from the chassis pose.
//!
//! Independent of the physics rate: the blend factor is derived from the
//! frame's `dt` so the follow feels the same at any cadence.

use log::warn;
use rapier3d::na::{Point3, UnitQuaternion, Vector3};
use rapier3d::prelude::Real;
use serde::Serialize;

use crate::config::{CameraConfig, OffsetFrame};
use crate::wheel::to_vector;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CameraPose {
    pub position: [Real; 3],
    pub look_at: [Real; 3],
}

/// Per-frame lerp factor for smoothing `s` tuned at `reference_dt`.
///
/// `1 - (1 - s)^(dt / reference_dt)`: equals `s` for one reference frame,
/// compounds exactly over several, and stays in `[0, 1]`.
pub fn blend_factor(smoothing: Real, dt: Real, reference_dt: Real) -> Real {
    if smoothing >= 1.0 {
        return 1.0;
    }
    let frames = dt / reference_dt;
    (1.0 - (1.0 - smoothing).powf(frames)).clamp(0.0, 1.0)
}

pub struct ChaseCamera {
    config: CameraConfig,
    position: Point3<Real>,
    look_target: Point3<Real>,
    initialized: bool,
    fallbacks: u64,
}

impl ChaseCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            position: Point3::origin(),
            look_target: Point3::origin(),
            initialized: false,
            fallbacks: 0,
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Times a non-finite result was replaced by the fallback pose.
    pub fn fallbacks(&self) -> u64 {
        self.fallbacks
    }

    pub fn pose(&self) -> CameraPose {
        CameraPose {
            position: self.position.coords.into(),
            look_at: self.look_target.coords.into(),
        }
    }

    /// Offset rotated into world space according to `OffsetFrame`.
    fn oriented_offset(&self, rotation: &UnitQuaternion<Real>) -> Vector3<Real> {
        let offset = to_vector(self.config.offset);
        match self.config.frame {
            OffsetFrame::Local => rotation * offset,
            OffsetFrame::Yaw => {
                let forward = rotation * Vector3::z();
                let yaw = forward.x.atan2(forward.z);
                UnitQuaternion::from_axis_angle(&Vector3::y_axis(), yaw) * offset
            }
        }
    }

    pub fn update(
        &mut self,
        chassis_position: &Point3<Real>,
        chassis_rotation: &UnitQuaternion<Real>,
        dt: Real,
    ) -> CameraPose {
        let chassis_ok = chassis_position.coords.iter().all(|c| c.is_finite())
            && chassis_rotation.coords.iter().all(|c| c.is_finite());
        if !chassis_ok {
            return self.pose();
        }

        let origin = *chassis_position;
        let forward = chassis_rotation * Vector3::z();
        let target = origin + self.oriented_offset(chassis_rotation);
        let look = origin
            + forward * self.config.look_ahead
            + Vector3::y() * self.config.look_height;

        if !self.initialized {
            self.position = target;
            self.look_target = look;
            self.initialized = true;
        } else {
            let dt = if dt.is_finite() {
                dt.clamp(0.0, self.config.max_dt)
            } else {
                self.config.reference_dt
            };
            let alpha = blend_factor(self.config.smoothing, dt, self.config.reference_dt);
            self.position = self.position + (target - self.position) * alpha;
            self.look_target = self.look_target + (look - self.look_target) * alpha;
        }

        let finite = self.position.coords.iter().all(|c| c.is_finite())
            && self.look_target.coords.iter().all(|c| c.is_finite());
        if !finite {
            self.fallbacks += 1;
            warn!("📷 Non-finite camera pose, snapping to fallback (#{})", self.fallbacks);
            self.position = origin + to_vector(self.config.offset);
            self.look_target = origin;
        }

        self.pose()
    }
}
