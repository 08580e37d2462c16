// ==============================================================================
// config.rs — SIMULATION PRESETS + JSON OVERRIDES
// ------------------------------------------------------------------------------
// Every tunable lives here. `SimConfig::default()` reproduces the demo car
// (120 kg box chassis, 1 m wheels, mass-normalised suspension). A JSON file
// can override any subset of fields; missing fields keep their defaults.
// ==============================================================================

use std::f32::consts::FRAC_PI_2;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DriveError;
use crate::wheel::{SuspensionTuning, WheelPosition, WheelSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub gravity: [f32; 3],        // m/s^2
    pub timestep: f32,            // s, one fixed step
    pub ground_half_extent: f32,  // m, square ground slab
    pub ground_friction: f32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            gravity: [0.0, -9.82, 0.0],
            timestep: 1.0 / 60.0,
            ground_half_extent: 250.0,
            ground_friction: 1.0,
        }
    }
}

/// Second box stacked on the chassis box (body + cabin compound).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CabinConfig {
    pub half_extents: [f32; 3],   // m
    pub offset: [f32; 3],         // chassis local
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleConfig {
    pub mass: f32,                     // kg, whole chassis
    pub spawn_position: [f32; 3],      // world
    pub chassis_half_extents: [f32; 3],// [hx, hy, hz] meters
    pub cabin: Option<CabinConfig>,
    pub linear_damping: f32,           // drag
    pub angular_damping: f32,          // rotational drag

    pub max_steer: f32,                // radians, clamp applied at the wheel
    pub brake_damping: f32,            // linvel multiplier per braking tick, (0, 1)
    pub engine_start_impulse: f32,     // N*s along chassis forward
    pub reset_motion_on_start: bool,   // zero velocity before the start kick

    pub wheels: [WheelSpec; 4],        // slot order = WheelPosition::index()
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self::demo()
    }
}

impl VehicleConfig {
    /// Stock demo car: a single 3.5 x 1 x 8 m box on four 1 m wheels.
    pub fn demo() -> Self {
        let tuning = SuspensionTuning::default();
        Self {
            mass: 120.0,
            spawn_position: [0.0, 2.0, 0.0],
            chassis_half_extents: [1.75, 0.5, 4.0],
            cabin: None,
            linear_damping: 0.05,
            angular_damping: 0.4,
            max_steer: 0.5,
            brake_damping: 0.85,
            engine_start_impulse: 120.0,
            reset_motion_on_start: true,
            wheels: [
                WheelSpec::new(WheelPosition::FrontLeft, [2.0, -0.5, 2.5], 1.0, tuning),
                WheelSpec::new(WheelPosition::FrontRight, [-2.0, -0.5, 2.5], 1.0, tuning),
                WheelSpec::new(WheelPosition::RearLeft, [2.0, -0.5, -2.5], 1.0, tuning),
                WheelSpec::new(WheelPosition::RearRight, [-2.0, -0.5, -2.5], 1.0, tuning),
            ],
        }
    }

    /// Demo car with a cabin box on top; same wheels, heavier body.
    pub fn pickup() -> Self {
        Self {
            mass: 160.0,
            cabin: Some(CabinConfig {
                half_extents: [1.5, 0.6, 1.6],
                offset: [0.0, 1.1, -0.6],
            }),
            ..Self::demo()
        }
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        if !(self.mass.is_finite() && self.mass > 0.0) {
            return Err(DriveError::invalid_config("vehicle.mass must be positive"));
        }
        if self.chassis_half_extents.iter().any(|h| !(h.is_finite() && *h > 0.0)) {
            return Err(DriveError::invalid_config(
                "vehicle.chassis_half_extents must be positive",
            ));
        }
        if let Some(cabin) = &self.cabin {
            if cabin.half_extents.iter().any(|h| !(h.is_finite() && *h > 0.0)) {
                return Err(DriveError::invalid_config("vehicle.cabin.half_extents must be positive"));
            }
        }
        if !(self.brake_damping > 0.0 && self.brake_damping < 1.0) {
            return Err(DriveError::invalid_config("vehicle.brake_damping must be in (0, 1)"));
        }
        if !(self.max_steer >= 0.0 && self.max_steer < FRAC_PI_2) {
            return Err(DriveError::invalid_config("vehicle.max_steer must be in [0, pi/2)"));
        }
        if !self.engine_start_impulse.is_finite() {
            return Err(DriveError::invalid_config("vehicle.engine_start_impulse must be finite"));
        }
        for (slot, wheel) in self.wheels.iter().enumerate() {
            if wheel.position.index() != slot {
                return Err(DriveError::invalid_config(format!(
                    "wheel slot {slot} holds {}, expected {}",
                    wheel.position,
                    WheelPosition::ALL[slot]
                )));
            }
            wheel.validate()?;
        }
        Ok(())
    }

    /// Total collider volume, used to turn `mass` into a density.
    pub fn collider_volume(&self) -> f32 {
        let [hx, hy, hz] = self.chassis_half_extents;
        let body = 8.0 * hx * hy * hz;
        let cabin = self
            .cabin
            .map(|c| 8.0 * c.half_extents[0] * c.half_extents[1] * c.half_extents[2])
            .unwrap_or(0.0);
        body + cabin
    }
}

/// What happens to the steering angle once no steer key is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SteerRelease {
    /// Keep the last angle.
    Hold,
    /// Snap back to straight ahead.
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub forward_force: f32,     // N per drive wheel
    pub reverse_force: f32,     // N per drive wheel, applied negated
    pub steer_increment: f32,   // rad per tick while held
    pub max_steer: f32,         // rad
    pub steer_release: SteerRelease,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            forward_force: 300.0,
            reverse_force: 150.0,
            steer_increment: 0.05,
            max_steer: 0.5,
            steer_release: SteerRelease::Hold,
        }
    }
}

impl InputConfig {
    pub fn validate(&self) -> Result<(), DriveError> {
        if !(self.forward_force.is_finite() && self.reverse_force.is_finite()) {
            return Err(DriveError::invalid_config("input forces must be finite"));
        }
        if !(self.steer_increment.is_finite() && self.steer_increment > 0.0) {
            return Err(DriveError::invalid_config("input.steer_increment must be positive"));
        }
        if !(self.max_steer >= 0.0 && self.max_steer < FRAC_PI_2) {
            return Err(DriveError::invalid_config("input.max_steer must be in [0, pi/2)"));
        }
        Ok(())
    }
}

/// Frame the camera offset is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetFrame {
    /// Rotated by the full chassis orientation; the camera rolls with the car.
    Local,
    /// Rotated by chassis yaw only; pitch and roll are ignored.
    Yaw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub offset: [f32; 3],       // chassis frame, +Z forward
    pub frame: OffsetFrame,
    pub smoothing: f32,         // lerp factor per reference frame, (0, 1]
    pub look_ahead: f32,        // m along chassis forward
    pub look_height: f32,       // m along world up
    pub reference_dt: f32,      // s, frame length `smoothing` is tuned for
    pub max_dt: f32,            // s, longer frames are clamped
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            offset: [0.0, 5.0, -10.0],
            frame: OffsetFrame::Local,
            smoothing: 0.1,
            look_ahead: 2.0,
            look_height: 0.0,
            reference_dt: 1.0 / 60.0,
            max_dt: 0.25,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<(), DriveError> {
        if !(self.smoothing > 0.0 && self.smoothing <= 1.0) {
            return Err(DriveError::invalid_config("camera.smoothing must be in (0, 1]"));
        }
        if !(self.reference_dt.is_finite() && self.reference_dt > 0.0) {
            return Err(DriveError::invalid_config("camera.reference_dt must be positive"));
        }
        if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
            return Err(DriveError::invalid_config("camera.max_dt must be positive"));
        }
        if self.offset.iter().any(|c| !c.is_finite()) {
            return Err(DriveError::invalid_config("camera.offset must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_hz: f32,
    pub max_events_per_frame: usize,
}

/// Upper bound on the simulation loop rate.
pub const MAX_TICK_HZ: f32 = 1000.0;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9001".to_string(),
            tick_hz: 60.0,
            max_events_per_frame: 64,
        }
    }
}

impl ServerConfig {
    /// Wall-clock period of one loop iteration.
    pub fn tick_period(&self) -> Result<Duration, DriveError> {
        if !(self.tick_hz > 0.0 && self.tick_hz <= MAX_TICK_HZ) {
            return Err(DriveError::invalid_config(format!(
                "server.tick_hz must be in (0, {MAX_TICK_HZ}]"
            )));
        }
        Duration::try_from_secs_f32(1.0 / self.tick_hz)
            .map_err(|e| DriveError::invalid_config(format!("server.tick_hz: {e}")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub world: WorldConfig,
    pub vehicle: VehicleConfig,
    pub input: InputConfig,
    pub camera: CameraConfig,
    pub server: ServerConfig,
}

impl SimConfig {
    pub fn from_json_str(text: &str) -> Result<Self, DriveError> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DriveError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DriveError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), DriveError> {
        if !(self.world.timestep.is_finite() && self.world.timestep > 0.0) {
            return Err(DriveError::invalid_config("world.timestep must be positive"));
        }
        if self.world.gravity.iter().any(|g| !g.is_finite()) {
            return Err(DriveError::invalid_config("world.gravity must be finite"));
        }
        self.server.tick_period()?;
        if self.server.max_events_per_frame == 0 {
            return Err(DriveError::invalid_config("server.max_events_per_frame must be > 0"));
        }
        self.vehicle.validate()?;
        self.input.validate()?;
        // A commanded angle past the wheel clamp would be a dead zone on release.
        if self.input.max_steer > self.vehicle.max_steer {
            return Err(DriveError::invalid_config(format!(
                "input.max_steer ({}) exceeds vehicle.max_steer ({})",
                self.input.max_steer, self.vehicle.max_steer
            )));
        }
        self.camera.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        SimConfig::default().validate().unwrap();
        VehicleConfig::pickup().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SimConfig::from_json_str(
            r#"{ "camera": { "smoothing": 0.25, "frame": "yaw" }, "input": { "steer_release": "center" } }"#,
        )
        .unwrap();
        assert_eq!(config.camera.smoothing, 0.25);
        assert_eq!(config.camera.frame, OffsetFrame::Yaw);
        assert_eq!(config.camera.offset, [0.0, 5.0, -10.0]);
        assert_eq!(config.input.steer_release, SteerRelease::Center);
        assert_eq!(config.vehicle.mass, 120.0);
    }

    #[test]
    fn rejects_out_of_range_smoothing() {
        let err = SimConfig::from_json_str(r#"{ "camera": { "smoothing": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, DriveError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_excessive_tick_rate() {
        for hz in ["1e-40", "0", "-5", "1e9"] {
            let json = format!(r#"{{ "server": {{ "tick_hz": {hz} }} }}"#);
            let err = SimConfig::from_json_str(&json).unwrap_err();
            assert!(matches!(err, DriveError::InvalidConfig(_)), "tick_hz = {hz}");
        }
        let config = SimConfig::from_json_str(r#"{ "server": { "tick_hz": 1000 } }"#).unwrap();
        let period = config.server.tick_period().unwrap();
        assert!((period.as_secs_f64() - 1e-3).abs() < 1e-6, "period = {period:?}");
    }

    #[test]
    fn command_range_must_fit_the_wheel_clamp() {
        let err = SimConfig::from_json_str(r#"{ "input": { "max_steer": 1.5 } }"#).unwrap_err();
        assert!(err.to_string().contains("vehicle.max_steer"), "{err}");

        let config = SimConfig::from_json_str(
            r#"{ "input": { "max_steer": 1.2 }, "vehicle": { "max_steer": 1.2 } }"#,
        )
        .unwrap();
        assert_eq!(config.input.max_steer, config.vehicle.max_steer);
    }

    #[test]
    fn rejects_misordered_wheels() {
        let mut vehicle = VehicleConfig::demo();
        vehicle.wheels.swap(0, 3);
        assert!(vehicle.validate().is_err());
    }

    #[test]
    fn missing_file_reports_path() {
        let err = SimConfig::from_json_file("/nonexistent/drive.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/drive.json"));
    }
}
