//! Per-tick input sampling.
//!
//! Device input arrives at render rate; the runtime asks for one
//! fixed-shape [`InputSample`] per simulation tick. [`InputCollector`]
//! latches button presses between the two so a short press is never lost,
//! and clears them once they have been sampled.

use std::ops::{BitOr, BitOrAssign};

use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::game_state::GameState;

/// Button bitmask carried by every [`InputSample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ButtonFlags(u32);

impl ButtonFlags {
    /// No buttons.
    pub const NONE: Self = Self(0);
    /// Move forward.
    pub const FORWARD: Self = Self(1 << 0);
    /// Move backward.
    pub const BACKWARD: Self = Self(1 << 1);
    /// Strafe left.
    pub const LEFT: Self = Self(1 << 2);
    /// Strafe right.
    pub const RIGHT: Self = Self(1 << 3);
    /// Interact with the current target.
    pub const INTERACT: Self = Self(1 << 4);
    /// Leave the current interaction.
    pub const ESCAPE: Self = Self(1 << 5);
    /// Primary pointer button.
    pub const LEFT_CLICK: Self = Self(1 << 6);
    /// Push-to-talk for voice chat.
    pub const PUSH_TO_TALK: Self = Self(1 << 7);

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// `true` if every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `true` if no bit is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ButtonFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ButtonFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// One tick of input, as handed to the remote runtime.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputSample {
    /// Normalised movement direction (x = strafe, y = forward).
    pub movement: Vec2,
    /// Camera yaw change since the previous sample, in radians.
    pub camera_yaw_delta: f32,
    /// Buttons held or pressed since the previous sample.
    pub buttons: ButtonFlags,
}

impl InputSample {
    /// Shorthand for `buttons.contains(button)`.
    pub fn pressed(&self, button: ButtonFlags) -> bool {
        self.buttons.contains(button)
    }
}

/// Render-rate accumulator producing tick-rate [`InputSample`]s.
#[derive(Debug, Clone, Default)]
pub struct InputCollector {
    movement: Vec2,
    camera_yaw: f32,
    latched: ButtonFlags,
    sensitivity: f32,
}

impl InputCollector {
    /// Collector with unit mouse sensitivity.
    pub fn new() -> Self {
        Self::with_sensitivity(1.0)
    }

    /// Collector scaling camera deltas by `sensitivity`.
    pub fn with_sensitivity(sensitivity: f32) -> Self {
        Self {
            sensitivity,
            ..Self::default()
        }
    }

    /// Latch a button until the next sample.
    pub fn press(&mut self, button: ButtonFlags) {
        self.latched |= button;
    }

    /// Current movement axis (not latched; the latest value wins).
    pub fn set_movement(&mut self, movement: Vec2) {
        self.movement = movement;
    }

    /// Accumulate camera yaw.
    pub fn add_camera_yaw(&mut self, delta: f32) {
        self.camera_yaw += delta * self.sensitivity;
    }

    /// Produces the sample for this tick.
    ///
    /// Returns `None` while input is disallowed or the participant is
    /// neither playing nor interacting; latched state is kept in that case.
    /// While interacting only [`ButtonFlags::ESCAPE`] is forwarded so the
    /// participant can leave the interaction. On success the latched
    /// buttons and camera delta are consumed.
    pub fn sample(&mut self, state: GameState, allow_input: bool) -> Option<InputSample> {
        if !allow_input {
            return None;
        }
        if state == GameState::Interact {
            let buttons = if self.latched.contains(ButtonFlags::ESCAPE) {
                ButtonFlags::ESCAPE
            } else {
                ButtonFlags::NONE
            };
            self.latched = ButtonFlags::NONE;
            self.camera_yaw = 0.0;
            return Some(InputSample {
                buttons,
                ..InputSample::default()
            });
        }
        if !state.allows_movement() {
            return None;
        }

        let movement = self.movement.normalize_or_zero();
        let mut buttons = self.latched;
        if movement.y > 0.0 {
            buttons |= ButtonFlags::FORWARD;
        }
        if movement.y < 0.0 {
            buttons |= ButtonFlags::BACKWARD;
        }
        if movement.x < 0.0 {
            buttons |= ButtonFlags::LEFT;
        }
        if movement.x > 0.0 {
            buttons |= ButtonFlags::RIGHT;
        }

        let sample = InputSample {
            movement,
            camera_yaw_delta: std::mem::take(&mut self.camera_yaw),
            buttons,
        };
        self.latched = ButtonFlags::NONE;
        Some(sample)
    }

    /// Latched buttons not yet consumed by a sample.
    pub fn pending_buttons(&self) -> ButtonFlags {
        self.latched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let flags = ButtonFlags::INTERACT | ButtonFlags::FORWARD;
        assert!(flags.contains(ButtonFlags::INTERACT));
        assert!(!flags.contains(ButtonFlags::ESCAPE));
        assert!(!flags.contains(ButtonFlags::INTERACT | ButtonFlags::ESCAPE));
        assert_eq!(flags.bits(), 0b1_0001);
        assert!(ButtonFlags::NONE.is_empty());
    }

    #[test]
    fn test_sample_derives_direction_flags() {
        let mut collector = InputCollector::new();
        collector.set_movement(Vec2::new(3.0, 4.0));
        let sample = collector.sample(GameState::Play, true).unwrap();

        assert!((sample.movement.length() - 1.0).abs() < 1e-5);
        assert!(sample.pressed(ButtonFlags::FORWARD));
        assert!(sample.pressed(ButtonFlags::RIGHT));
        assert!(!sample.pressed(ButtonFlags::LEFT));
        assert!(!sample.pressed(ButtonFlags::BACKWARD));
    }

    #[test]
    fn test_press_is_latched_until_sampled() {
        let mut collector = InputCollector::new();
        collector.press(ButtonFlags::INTERACT);

        let first = collector.sample(GameState::Play, true).unwrap();
        assert!(first.pressed(ButtonFlags::INTERACT));

        let second = collector.sample(GameState::Play, true).unwrap();
        assert!(!second.pressed(ButtonFlags::INTERACT));
    }

    #[test]
    fn test_camera_delta_consumed_once() {
        let mut collector = InputCollector::with_sensitivity(2.0);
        collector.add_camera_yaw(0.1);
        collector.add_camera_yaw(0.2);

        let sample = collector.sample(GameState::Play, true).unwrap();
        assert!((sample.camera_yaw_delta - 0.6).abs() < 1e-6);
        let next = collector.sample(GameState::Play, true).unwrap();
        assert_eq!(next.camera_yaw_delta, 0.0);
    }

    #[test]
    fn test_no_sample_outside_play() {
        let mut collector = InputCollector::new();
        collector.press(ButtonFlags::INTERACT);

        for state in [GameState::Pause, GameState::Chatting, GameState::Intro] {
            assert!(collector.sample(state, true).is_none(), "{state:?}");
        }
        assert!(collector.sample(GameState::Play, false).is_none());
        assert!(collector.pending_buttons().contains(ButtonFlags::INTERACT));
    }

    #[test]
    fn test_interacting_forwards_only_escape() {
        let mut collector = InputCollector::new();
        collector.set_movement(Vec2::new(0.0, 1.0));
        collector.add_camera_yaw(0.5);
        collector.press(ButtonFlags::ESCAPE | ButtonFlags::INTERACT);

        let sample = collector.sample(GameState::Interact, true).unwrap();
        assert_eq!(sample.buttons, ButtonFlags::ESCAPE);
        assert_eq!(sample.movement, Vec2::ZERO);
        assert_eq!(sample.camera_yaw_delta, 0.0);
        assert!(collector.pending_buttons().is_empty());
    }
}
