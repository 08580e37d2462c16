// ==============================================================================
// render.rs — POSES PUBLISHED TO THE SCENE
// ------------------------------------------------------------------------------
// After each tick the session builds a VehicleSnapshot: chassis pose, one pose
// per wheel keyed by WheelPosition, and the camera. Clients receive it as
// JSON; in-process scene graphs go through VisualSync, which skips frames
// until the chassis model has finished loading.
// ==============================================================================

use log::{info, warn};
use rapier3d::prelude::{Isometry, Real};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::camera::CameraPose;
use crate::wheel::WheelPosition;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    pub position: [Real; 3],
    pub rotation: [Real; 4],   // quaternion x, y, z, w
}

impl From<&Isometry<Real>> for Pose {
    fn from(iso: &Isometry<Real>) -> Self {
        let t = iso.translation.vector;
        let q = iso.rotation;
        Self {
            position: [t.x, t.y, t.z],
            rotation: [q.i, q.j, q.k, q.w],
        }
    }
}

impl Pose {
    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(self.rotation.iter()).all(|c| c.is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WheelPose {
    pub wheel: WheelPosition,
    #[serde(flatten)]
    pub pose: Pose,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "snapshot")]
pub struct VehicleSnapshot {
    pub tick: u64,
    pub chassis: Pose,
    pub wheels: [WheelPose; 4],
    pub camera: CameraPose,
    pub engine_on: bool,
    pub speed: Real,     // m/s, horizontal
    pub steer: Real,     // rad, front wheel angle after the clamp
}

impl VehicleSnapshot {
    pub fn wheel(&self, position: WheelPosition) -> &WheelPose {
        &self.wheels[position.index()]
    }
}

/// Scene-side handle for the vehicle's visual model.
pub trait ChassisModel {
    fn set_chassis_pose(&mut self, pose: &Pose);
    fn set_wheel_pose(&mut self, wheel: WheelPosition, pose: &Pose);
}

/// A visual model that may still be loading.
pub enum ModelSlot<M> {
    Loading(oneshot::Receiver<M>),
    Ready(M),
    Failed,
}

impl<M> ModelSlot<M> {
    /// Empty slot plus the sender the loader completes it with.
    pub fn loading() -> (oneshot::Sender<M>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, ModelSlot::Loading(rx))
    }

    /// Promote `Loading` to `Ready` (or `Failed`) when the loader has finished.
    pub fn poll(&mut self) {
        let ModelSlot::Loading(rx) = self else { return };
        match rx.try_recv() {
            Ok(model) => {
                info!("🎨 Chassis model ready");
                *self = ModelSlot::Ready(model);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                warn!("🎨 Chassis model loader dropped without a model");
                *self = ModelSlot::Failed;
            }
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut M> {
        match self {
            ModelSlot::Ready(model) => Some(model),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ModelSlot::Ready(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied,
    NotReady,
    Unavailable,
}

pub struct VisualSync<M: ChassisModel> {
    slot: ModelSlot<M>,
    skipped: u64,
}

impl<M: ChassisModel> VisualSync<M> {
    pub fn new(slot: ModelSlot<M>) -> Self {
        Self { slot, skipped: 0 }
    }

    /// Frames skipped while the model was not ready.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn slot(&self) -> &ModelSlot<M> {
        &self.slot
    }

    pub fn sync(&mut self, snapshot: &VehicleSnapshot) -> SyncOutcome {
        self.slot.poll();
        match &mut self.slot {
            ModelSlot::Ready(model) => {
                model.set_chassis_pose(&snapshot.chassis);
                for wheel in &snapshot.wheels {
                    model.set_wheel_pose(wheel.wheel, &wheel.pose);
                }
                SyncOutcome::Applied
            }
            ModelSlot::Loading(_) => {
                self.skipped += 1;
                SyncOutcome::NotReady
            }
            ModelSlot::Failed => SyncOutcome::Unavailable,
        }
    }
}
