use bytes::Bytes;
use std::fmt;

use crate::{
    error::{BedError, Result},
    types::{Axis, MoveDirection, Preset},
};
use serde::{Deserialize, Serialize};

/// Command payload size in bytes
pub const COMMAND_LEN: usize = 5;

/// The fixed command set understood by the bed controller
///
/// Each command maps to a fixed 5-byte payload captured from the vendor
/// remote. The set is closed: command names are validated against this enum
/// when a session is driven by strings (service calls, preset tables), so an
/// unknown name fails before any wire traffic happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Toggle the under-bed light
    Light,
    /// Move both sections to the zero-gravity memory position
    ZeroGravity,
    /// Move both sections flat
    Flat,
    /// Raise the head section one step
    HeadUp,
    /// Lower the head section one step
    HeadDown,
    /// Raise the feet section one step
    FeetUp,
    /// Lower the feet section one step
    FeetDown,
}

impl Command {
    /// Every command in the set, in table order
    pub const ALL: [Self; 7] = [
        Self::Light,
        Self::ZeroGravity,
        Self::Flat,
        Self::HeadUp,
        Self::HeadDown,
        Self::FeetUp,
        Self::FeetDown,
    ];

    /// The opaque wire payload for this command
    #[must_use]
    pub fn payload(self) -> Bytes {
        Bytes::from_static(match self {
            Self::Light => &[0x6E, 0x01, 0x00, 0x3C, 0xAB],
            Self::ZeroGravity => &[0x6E, 0x01, 0x00, 0x45, 0xB4],
            Self::Flat => &[0x6E, 0x01, 0x00, 0x31, 0xA0],
            Self::HeadUp => &[0x6E, 0x01, 0x00, 0x24, 0x93],
            Self::HeadDown => &[0x6E, 0x01, 0x00, 0x25, 0x94],
            Self::FeetUp => &[0x6E, 0x01, 0x00, 0x26, 0x95],
            Self::FeetDown => &[0x6E, 0x01, 0x00, 0x27, 0x96],
        })
    }

    /// Stable command name, as used by string-driven surfaces
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::ZeroGravity => "zero_gravity",
            Self::Flat => "flat",
            Self::HeadUp => "head_up",
            Self::HeadDown => "head_down",
            Self::FeetUp => "feet_up",
            Self::FeetDown => "feet_down",
        }
    }

    /// Resolve a command name through the closed set
    ///
    /// # Errors
    ///
    /// Returns [`BedError::UnknownCommand`] if the name is not in the set.
    /// The lookup fails closed before a session gate or link is touched.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.name() == name)
            .ok_or_else(|| BedError::UnknownCommand(name.to_string()))
    }

    /// The axis and direction this command moves, if it moves one
    ///
    /// Commands like [`Command::Light`] or [`Command::Flat`] drive the whole
    /// frame (or none of it) and return `None`; the client-side position
    /// estimate is not advanced for them.
    #[must_use]
    pub const fn axis(self) -> Option<(Axis, MoveDirection)> {
        match self {
            Self::HeadUp => Some((Axis::Head, MoveDirection::Up)),
            Self::HeadDown => Some((Axis::Head, MoveDirection::Down)),
            Self::FeetUp => Some((Axis::Feet, MoveDirection::Up)),
            Self::FeetDown => Some((Axis::Feet, MoveDirection::Down)),
            Self::Light | Self::ZeroGravity | Self::Flat => None,
        }
    }

    /// The step command for an axis and direction
    #[must_use]
    pub const fn for_axis(axis: Axis, direction: MoveDirection) -> Self {
        match (axis, direction) {
            (Axis::Head, MoveDirection::Up) => Self::HeadUp,
            (Axis::Head, MoveDirection::Down) => Self::HeadDown,
            (Axis::Feet, MoveDirection::Up) => Self::FeetUp,
            (Axis::Feet, MoveDirection::Down) => Self::FeetDown,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static preset table
///
/// Presets name a target posture as per-axis step counts driven through the
/// "up" command of each axis. An absent axis is left untouched.
pub const PRESETS: [Preset; 4] = [
    Preset {
        name: "Lounge",
        head_steps: Some(30),
        feet_steps: Some(12),
    },
    Preset {
        name: "Reading",
        head_steps: Some(20),
        feet_steps: None,
    },
    Preset {
        name: "Legs Up",
        head_steps: None,
        feet_steps: Some(35),
    },
    Preset {
        name: "Contour",
        head_steps: Some(25),
        feet_steps: Some(40),
    },
];

/// Look up a preset by display name
#[must_use]
pub fn preset_by_name(name: &str) -> Option<&'static Preset> {
    PRESETS
        .iter()
        .find(|preset| preset.name.eq_ignore_ascii_case(name))
}
