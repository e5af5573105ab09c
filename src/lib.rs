#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Bedframe 🛏️
//!
//! A Rust library for controlling BLE adjustable bed frames.
//!
//! Adjustable bed controllers of this family expose a single GATT
//! characteristic and accept a small fixed set of opaque 5-byte commands,
//! captured from the vendor remote. The bed never responds: writes are
//! fire-and-forget, there is no position feedback, and "continuous" motion is
//! simulated by repeating a step command on a timer.
//!
//! The library is built around [`BedSession`], one per physical bed. A
//! session owns the wireless link, serializes every command through its
//! exclusion gate, disconnects automatically after a period of inactivity,
//! and supervises cancellable movement tasks so that a stop request always
//! leaves the bed idle and the radio quiet.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bedframe::{Axis, BedSession, BleLinkResolver, Command, MoveDirection, SessionConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Arc::new(BleLinkResolver::new().await?);
//!     let session = BedSession::new("F0:82:C0:11:22:33", resolver, SessionConfig::default());
//!
//!     // One button press
//!     session.send(Command::HeadUp).await?;
//!
//!     // Continuous motion along one axis
//!     session.move_axis(Axis::Feet, MoveDirection::Up).await;
//!
//!     // A named posture
//!     session.apply_preset("Reading").await?;
//!
//!     // Stop everything and disconnect
//!     session.stop_all().await;
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport: link traits and btleplug implementations
pub mod ble;
/// Error types and handling
pub mod error;
/// Command set, payload table, and presets
pub mod protocol;
/// Session and movement controller
pub mod session;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::{BedLink, BleBedLink, BleLinkResolver, LinkResolver};
pub use error::{BedError, Result};
pub use protocol::{preset_by_name, Command, COMMAND_LEN, PRESETS};
pub use session::{BedSession, MovementHandle, SessionRegistry};
pub use types::{
    Axis, BedPosition, ConnectionStatus, MoveDirection, MovementState, Preset, SessionConfig,
    StepSettings,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GATT service advertised by the bed controller
pub const BED_SERVICE_UUID: &str = "0000fee9-0000-1000-8000-00805f9b34fb";

/// Writable characteristic that accepts the 5-byte command payloads
///
/// All control traffic goes through this single characteristic; writes are
/// issued without response and the controller never notifies back.
pub const BED_COMMAND_CHAR_UUID: &str = "d44bc439-abfd-45a2-b575-925416129600";

/// Manufacturer of the supported controller family
pub const MANUFACTURER: &str = "Galaxy";

/// Controller model this command table was captured from
pub const MODEL: &str = "26W-N";
