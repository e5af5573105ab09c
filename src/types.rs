use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// A movable section of the bed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// Head section
    Head,
    /// Feet section
    Feet,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Head => write!(f, "head"),
            Self::Feet => write!(f, "feet"),
        }
    }
}

/// Direction of a step movement along one axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDirection {
    /// Raise the section
    Up,
    /// Lower the section
    Down,
}

impl fmt::Display for MoveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Observable connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// A live link to the peripheral is held
    Connected,
    /// No link is held, or the held link no longer reports connected
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Lifecycle state of a movement task
///
/// A task is created `Running` and makes exactly one terminal transition;
/// it is removed from the session supervisor the moment it leaves `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementState {
    /// Steps are still being issued
    Running,
    /// Stopped externally before exhausting its repeats
    Cancelled,
    /// All repeats issued
    Completed,
    /// An unrecoverable link error ended the task early
    Failed,
}

impl fmt::Display for MovementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Client-side position estimate for both sections, in percent
///
/// The bed has no position feedback; this is only ever an estimate advanced
/// step by step while movements run, clamped to `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BedPosition {
    /// Head section estimate, 0 = flat
    pub head: u8,
    /// Feet section estimate, 0 = flat
    pub feet: u8,
}

impl BedPosition {
    /// Estimated percentage for one axis
    #[must_use]
    pub const fn axis(&self, axis: Axis) -> u8 {
        match axis {
            Axis::Head => self.head,
            Axis::Feet => self.feet,
        }
    }

    /// Advance the estimate for one axis by `step` percent, clamped to `[0, 100]`
    pub fn advance(&mut self, axis: Axis, direction: MoveDirection, step: u8) {
        let slot = match axis {
            Axis::Head => &mut self.head,
            Axis::Feet => &mut self.feet,
        };
        *slot = match direction {
            MoveDirection::Up => slot.saturating_add(step).min(100),
            MoveDirection::Down => slot.saturating_sub(step),
        };
    }
}

/// A named target posture as per-axis step counts
///
/// Loaded from the static table in [`crate::protocol::PRESETS`]; not created
/// or destroyed at runtime. An absent axis means "leave that axis untouched."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Preset {
    /// Display name
    pub name: &'static str,
    /// Steps to drive the head axis up, if any
    pub head_steps: Option<u32>,
    /// Steps to drive the feet axis up, if any
    pub feet_steps: Option<u32>,
}

/// Per-axis desired step counts with a fallback
///
/// Mirrors the numeric step-count surface: a value may be set per axis;
/// reads fall back to a configured default when no value was set, and are
/// never below 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSettings {
    head: Option<u32>,
    feet: Option<u32>,
    fallback: u32,
}

impl StepSettings {
    /// Create settings with the given fallback step count
    #[must_use]
    pub const fn new(fallback: u32) -> Self {
        Self {
            head: None,
            feet: None,
            fallback: if fallback == 0 { 1 } else { fallback },
        }
    }

    /// Desired step count for an axis; always >= 1
    #[must_use]
    pub const fn steps_for(&self, axis: Axis) -> u32 {
        let value = match axis {
            Axis::Head => self.head,
            Axis::Feet => self.feet,
        };
        match value {
            Some(steps) => {
                if steps >= 1 {
                    steps
                } else {
                    self.fallback
                }
            }
            None => self.fallback,
        }
    }

    /// Set the desired step count for an axis (clamped to >= 1)
    pub fn set(&mut self, axis: Axis, steps: u32) {
        let value = Some(steps.max(1));
        match axis {
            Axis::Head => self.head = value,
            Axis::Feet => self.feet = value,
        }
    }
}

/// Session tuning knobs
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Idle window after the last successful dispatch before the link is
    /// torn down
    pub idle_timeout: Duration,
    /// Delay between repeated command writes during movements
    pub move_interval: Duration,
    /// Percent the position estimate advances per movement step
    pub move_step: u8,
    /// Fallback per-axis step count when none was configured
    pub default_steps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(30),
            move_interval: Duration::from_millis(150),
            move_step: 1,
            default_steps: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_clamping() {
        let mut position = BedPosition::default();
        assert_eq!(position.head, 0);

        position.advance(Axis::Head, MoveDirection::Down, 1);
        assert_eq!(position.head, 0);

        for _ in 0..150 {
            position.advance(Axis::Head, MoveDirection::Up, 1);
        }
        assert_eq!(position.head, 100);
        assert_eq!(position.feet, 0);

        position.advance(Axis::Feet, MoveDirection::Up, 30);
        position.advance(Axis::Feet, MoveDirection::Up, 90);
        assert_eq!(position.feet, 100);
    }

    #[test]
    fn test_step_settings_fallback() {
        let mut steps = StepSettings::new(10);
        assert_eq!(steps.steps_for(Axis::Head), 10);
        assert_eq!(steps.steps_for(Axis::Feet), 10);

        steps.set(Axis::Head, 25);
        assert_eq!(steps.steps_for(Axis::Head), 25);
        assert_eq!(steps.steps_for(Axis::Feet), 10);

        // Values below the minimum are clamped, never dropped to zero.
        steps.set(Axis::Feet, 0);
        assert_eq!(steps.steps_for(Axis::Feet), 1);
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.move_interval, Duration::from_millis(150));
        assert_eq!(config.move_step, 1);
        assert_eq!(config.default_steps, 10);
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Disconnected.to_string(), "disconnected");
        assert_eq!(MovementState::Cancelled.to_string(), "cancelled");
        assert_eq!(Axis::Head.to_string(), "head");
        assert_eq!(MoveDirection::Down.to_string(), "down");
    }
}
