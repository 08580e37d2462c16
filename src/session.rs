//! One drivable vehicle in one world, advanced frame by frame.

use std::collections::VecDeque;

use log::{debug, trace};
use rapier3d::prelude::Point;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use crate::camera::ChaseCamera;
use crate::config::SimConfig;
use crate::error::DriveError;
use crate::input::{InputEvent, InputMapper, VehicleCommandState};
use crate::physics::PhysicsWorld;
use crate::render::{Pose, VehicleSnapshot, WheelPose};
use crate::vehicle::{TickReport, VehicleController};
use crate::wheel::WheelPosition;

pub struct Session {
    world: PhysicsWorld,
    vehicle: VehicleController,
    mapper: InputMapper,
    commands: VehicleCommandState,
    camera: ChaseCamera,
    input_rx: Option<UnboundedReceiver<InputEvent>>,
    pending: VecDeque<InputEvent>,
    max_events: usize,
    last_report: Option<TickReport>,
}

impl Session {
    pub fn new(config: SimConfig) -> Result<Self, DriveError> {
        config.validate()?;
        let mut world = PhysicsWorld::new(&config.world);
        let vehicle = VehicleController::spawn(&mut world, config.vehicle)?;

        Ok(Self {
            world,
            vehicle,
            mapper: InputMapper::new(config.input),
            commands: VehicleCommandState::default(),
            camera: ChaseCamera::new(config.camera),
            input_rx: None,
            pending: VecDeque::new(),
            max_events: config.server.max_events_per_frame,
            last_report: None,
        })
    }

    /// Session that also drains `rx` at the start of every frame.
    pub fn with_input_channel(
        config: SimConfig,
        rx: UnboundedReceiver<InputEvent>,
    ) -> Result<Self, DriveError> {
        let mut session = Self::new(config)?;
        session.input_rx = Some(rx);
        Ok(session)
    }

    pub fn push_event(&mut self, event: InputEvent) {
        self.pending.push_back(event);
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    /// Direct world access, for tests and tooling.
    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn vehicle(&self) -> &VehicleController {
        &self.vehicle
    }

    pub fn commands(&self) -> &VehicleCommandState {
        &self.commands
    }

    pub fn camera(&self) -> &ChaseCamera {
        &self.camera
    }

    pub fn last_report(&self) -> Option<TickReport> {
        self.last_report
    }

    fn drain_channel(&mut self) {
        let Some(rx) = self.input_rx.as_mut() else { return };
        loop {
            match rx.try_recv() {
                Ok(event) => self.pending.push_back(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("input channel closed");
                    self.input_rx = None;
                    break;
                }
            }
        }
    }

    /// Drain input, advance one fixed step, follow with the camera.
    ///
    /// `dt` is the wall-clock frame length and only drives the camera; the
    /// physics always advances by exactly one fixed timestep.
    pub fn frame(&mut self, dt: f32) -> Result<VehicleSnapshot, DriveError> {
        self.drain_channel();

        let take = self.pending.len().min(self.max_events);
        for event in self.pending.drain(..take) {
            trace!("input {event:?}");
            self.mapper.handle(event, &mut self.commands);
        }

        self.mapper.update(&mut self.commands);
        self.vehicle.apply_commands(&mut self.world, &mut self.commands)?;
        let report = self.vehicle.tick(&mut self.world)?;
        self.last_report = Some(report);

        let chassis = self.vehicle.chassis_pose(&self.world)?;
        let camera = self.camera.update(
            &Point::from(chassis.translation.vector),
            &chassis.rotation,
            dt,
        );

        let wheel_poses = self.vehicle.wheel_poses(&self.world)?;
        let wheels = WheelPosition::ALL.map(|wheel| WheelPose {
            wheel,
            pose: Pose::from(&wheel_poses[wheel.index()]),
        });

        Ok(VehicleSnapshot {
            tick: report.tick,
            chassis: Pose::from(&chassis),
            wheels,
            camera,
            engine_on: self.commands.engine_on,
            speed: self.vehicle.speed(&self.world)?,
            steer: self.vehicle.wheel(WheelPosition::FrontLeft).steer_angle(),
        })
    }
}
