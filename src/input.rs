//! Keyboard transitions → `VehicleCommandState`.
//!
//! The host delivers key-down / key-up pairs, possibly with any number of
//! auto-repeat key-downs in between. The mapper tracks which physical keys are
//! held so repeats are no-ops, and re-derives throttle, steering and brake from
//! that set once per tick in [`InputMapper::update`].

use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::{InputConfig, SteerRelease};

/// Physical keys the demo listens to. Letter and arrow keys share actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    W,
    A,
    S,
    D,
    E,
    Space,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

impl Key {
    /// Parse a DOM `KeyboardEvent.key` value. Letters are case-insensitive.
    pub fn from_dom(key: &str) -> Option<Key> {
        let key = match key {
            "ArrowUp" => Key::ArrowUp,
            "ArrowDown" => Key::ArrowDown,
            "ArrowLeft" => Key::ArrowLeft,
            "ArrowRight" => Key::ArrowRight,
            " " | "Space" | "Spacebar" => Key::Space,
            other if other.len() == 1 => match other.to_ascii_lowercase().as_str() {
                "w" => Key::W,
                "a" => Key::A,
                "s" => Key::S,
                "d" => Key::D,
                "e" => Key::E,
                _ => return None,
            },
            _ => return None,
        };
        Some(key)
    }

    pub fn action(self) -> Action {
        match self {
            Key::W | Key::ArrowUp => Action::Accelerate,
            Key::S | Key::ArrowDown => Action::Reverse,
            Key::A | Key::ArrowLeft => Action::SteerLeft,
            Key::D | Key::ArrowRight => Action::SteerRight,
            Key::Space => Action::Brake,
            Key::E => Action::ToggleEngine,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Accelerate,
    Reverse,
    SteerLeft,
    SteerRight,
    Brake,
    ToggleEngine,
}

/// One queued input transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(Key),
    KeyUp(Key),
    /// Focus lost or client gone: release every held key.
    ReleaseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Started,
    Stopped,
}

/// Per-vehicle driver intent, read once per tick by the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleCommandState {
    pub engine_on: bool,
    pub throttle_force: f32,    // N per drive wheel, 0 while the engine is off
    pub steer_angle: f32,       // rad, within ±max_steer
    pub brake_active: bool,
    engine_event: Option<EngineEvent>,
}

impl VehicleCommandState {
    /// Engine transition since the controller last looked, consumed on read.
    pub fn take_engine_event(&mut self) -> Option<EngineEvent> {
        self.engine_event.take()
    }

    pub fn pending_engine_event(&self) -> Option<EngineEvent> {
        self.engine_event
    }
}

pub struct InputMapper {
    config: InputConfig,
    held: HashSet<Key>,
    // Most recently pressed throttle direction still held.
    throttle: Option<Action>,
}

impl InputMapper {
    pub fn new(config: InputConfig) -> Self {
        Self {
            config,
            held: HashSet::new(),
            throttle: None,
        }
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn is_held(&self, action: Action) -> bool {
        self.held.iter().any(|k| k.action() == action)
    }

    pub fn handle(&mut self, event: InputEvent, state: &mut VehicleCommandState) {
        match event {
            InputEvent::KeyDown(key) => {
                if !self.held.insert(key) {
                    return; // auto-repeat
                }
                match key.action() {
                    Action::ToggleEngine => self.toggle_engine(state),
                    action @ (Action::Accelerate | Action::Reverse) => self.throttle = Some(action),
                    Action::Brake => state.brake_active = true,
                    Action::SteerLeft | Action::SteerRight => {}
                }
            }
            InputEvent::KeyUp(key) => {
                if !self.held.remove(&key) {
                    return;
                }
                let action = key.action();
                match action {
                    Action::Accelerate | Action::Reverse => {
                        if self.throttle == Some(action) && !self.is_held(action) {
                            self.throttle = [Action::Accelerate, Action::Reverse]
                                .into_iter()
                                .find(|a| self.is_held(*a));
                        }
                    }
                    Action::Brake => state.brake_active = self.is_held(Action::Brake),
                    _ => {}
                }
            }
            InputEvent::ReleaseAll => {
                self.held.clear();
                self.throttle = None;
                state.brake_active = false;
                if self.config.steer_release == SteerRelease::Center {
                    state.steer_angle = 0.0;
                }
            }
        }
        self.refresh_throttle(state);
    }

    pub fn release_all(&mut self, state: &mut VehicleCommandState) {
        self.handle(InputEvent::ReleaseAll, state);
    }

    /// Per-tick ramp of held keys. Call exactly once per simulation tick.
    pub fn update(&mut self, state: &mut VehicleCommandState) {
        let left = self.is_held(Action::SteerLeft);
        let right = self.is_held(Action::SteerRight);
        let max = self.config.max_steer;

        let mut angle = state.steer_angle;
        match (left, right) {
            (true, false) => angle += self.config.steer_increment,
            (false, true) => angle -= self.config.steer_increment,
            (false, false) if self.config.steer_release == SteerRelease::Center => angle = 0.0,
            _ => {}
        }
        state.steer_angle = if angle.is_finite() { angle.clamp(-max, max) } else { 0.0 };

        state.brake_active = self.is_held(Action::Brake);
        self.refresh_throttle(state);
    }

    fn toggle_engine(&mut self, state: &mut VehicleCommandState) {
        state.engine_on = !state.engine_on;
        let event = if state.engine_on {
            EngineEvent::Started
        } else {
            EngineEvent::Stopped
        };
        state.engine_event = Some(event);
        debug!("engine toggled: {event:?}");
    }

    fn refresh_throttle(&self, state: &mut VehicleCommandState) {
        state.throttle_force = match (state.engine_on, self.throttle) {
            (true, Some(Action::Accelerate)) => self.config.forward_force,
            (true, Some(Action::Reverse)) => -self.config.reverse_force,
            _ => 0.0,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> (InputMapper, VehicleCommandState) {
        (InputMapper::new(InputConfig::default()), VehicleCommandState::default())
    }

    fn press(m: &mut InputMapper, s: &mut VehicleCommandState, key: Key) {
        m.handle(InputEvent::KeyDown(key), s);
    }

    fn release(m: &mut InputMapper, s: &mut VehicleCommandState, key: Key) {
        m.handle(InputEvent::KeyUp(key), s);
    }

    #[test]
    fn parses_dom_keys() {
        assert_eq!(Key::from_dom("w"), Some(Key::W));
        assert_eq!(Key::from_dom("W"), Some(Key::W));
        assert_eq!(Key::from_dom("ArrowLeft"), Some(Key::ArrowLeft));
        assert_eq!(Key::from_dom(" "), Some(Key::Space));
        assert_eq!(Key::from_dom("q"), None);
        assert_eq!(Key::from_dom("Enter"), None);
    }

    #[test]
    fn throttle_needs_engine() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::W);
        m.update(&mut s);
        assert_eq!(s.throttle_force, 0.0);

        press(&mut m, &mut s, Key::E);
        assert_eq!(s.take_engine_event(), Some(EngineEvent::Started));
        assert_eq!(s.throttle_force, 300.0);

        // Engine off zeroes throttle immediately even with W still held.
        release(&mut m, &mut s, Key::E);
        press(&mut m, &mut s, Key::E);
        assert_eq!(s.throttle_force, 0.0);
        m.update(&mut s);
        assert_eq!(s.throttle_force, 0.0);
        assert_eq!(s.take_engine_event(), Some(EngineEvent::Stopped));
    }

    #[test]
    fn engine_toggle_is_edge_triggered() {
        let (mut m, mut s) = mapper();
        for _ in 0..5 {
            press(&mut m, &mut s, Key::E);
        }
        assert!(s.engine_on);
        release(&mut m, &mut s, Key::E);
        assert!(s.engine_on);
    }

    #[test]
    fn repeated_keydown_is_idempotent_and_keyup_resets() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::E);
        for _ in 0..10 {
            press(&mut m, &mut s, Key::ArrowDown);
        }
        assert_eq!(s.throttle_force, -150.0);
        release(&mut m, &mut s, Key::ArrowDown);
        assert_eq!(s.throttle_force, 0.0);
    }

    #[test]
    fn letter_and_arrow_keys_are_equivalent() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::E);
        press(&mut m, &mut s, Key::W);
        press(&mut m, &mut s, Key::ArrowUp);
        release(&mut m, &mut s, Key::W);
        // ArrowUp still holds the action.
        assert_eq!(s.throttle_force, 300.0);
        release(&mut m, &mut s, Key::ArrowUp);
        assert_eq!(s.throttle_force, 0.0);
    }

    #[test]
    fn last_pressed_throttle_wins() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::E);
        press(&mut m, &mut s, Key::W);
        press(&mut m, &mut s, Key::S);
        assert_eq!(s.throttle_force, -150.0);
        release(&mut m, &mut s, Key::S);
        assert_eq!(s.throttle_force, 300.0);
    }

    #[test]
    fn steering_ramps_and_is_bounded() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::A);
        for _ in 0..1000 {
            m.update(&mut s);
            assert!(s.steer_angle <= 0.5);
        }
        assert_eq!(s.steer_angle, 0.5);
        release(&mut m, &mut s, Key::A);

        press(&mut m, &mut s, Key::ArrowRight);
        for _ in 0..1000 {
            m.update(&mut s);
            assert!(s.steer_angle >= -0.5);
        }
        assert_eq!(s.steer_angle, -0.5);
    }

    #[test]
    fn hold_mode_keeps_angle_after_release() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::A);
        for _ in 0..4 {
            m.update(&mut s);
        }
        release(&mut m, &mut s, Key::A);
        for _ in 0..10 {
            m.update(&mut s);
        }
        assert!((s.steer_angle - 0.2).abs() < 1e-5);
    }

    #[test]
    fn center_mode_snaps_back_on_release() {
        let config = InputConfig {
            steer_release: SteerRelease::Center,
            ..InputConfig::default()
        };
        let mut m = InputMapper::new(config);
        let mut s = VehicleCommandState::default();
        press(&mut m, &mut s, Key::D);
        for _ in 0..4 {
            m.update(&mut s);
        }
        assert!((s.steer_angle + 0.2).abs() < 1e-5);
        release(&mut m, &mut s, Key::D);
        m.update(&mut s);
        assert_eq!(s.steer_angle, 0.0);
    }

    #[test]
    fn brake_follows_key_and_release_all_clears() {
        let (mut m, mut s) = mapper();
        press(&mut m, &mut s, Key::E);
        press(&mut m, &mut s, Key::W);
        press(&mut m, &mut s, Key::Space);
        m.update(&mut s);
        assert!(s.brake_active);
        release(&mut m, &mut s, Key::Space);
        assert!(!s.brake_active);
        assert_eq!(s.throttle_force, 300.0);

        press(&mut m, &mut s, Key::Space);
        m.release_all(&mut s);
        assert!(!s.brake_active);
        assert_eq!(s.throttle_force, 0.0);
        assert!(s.engine_on);
        assert!(!m.is_held(Action::Accelerate));
    }
}
