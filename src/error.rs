use thiserror::Error;

/// Errors that can occur when working with a BLE adjustable bed
#[derive(Error, Debug)]
pub enum BedError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Discovery could not resolve the stored address to a peripheral
    #[error("bed peripheral not found: {0}")]
    DeviceNotFound(String),

    /// Connecting to the peripheral timed out or failed at the transport level
    #[error("failed to connect to bed: {0}")]
    ConnectionFailed(String),

    /// A command write failed at the transport level
    #[error("command write failed: {0}")]
    WriteFailed(String),

    /// Command name is not part of the fixed command set
    #[error("unknown bed command: {0}")]
    UnknownCommand(String),

    /// Preset name does not match any entry in the preset table
    #[error("unknown preset: {0}")]
    UnknownPreset(String),
}

/// Result type for bed operations
pub type Result<T> = std::result::Result<T, BedError>;

impl BedError {
    /// Check if this error indicates a connection or transport issue
    ///
    /// Connection errors leave the session disconnected; the next dispatch
    /// starts from a clean link.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::DeviceNotFound(_)
                | Self::ConnectionFailed(_)
                | Self::WriteFailed(_)
        )
    }

    /// Check if this error is a failed lookup in a closed table
    ///
    /// Lookup errors are raised before any wire traffic happens.
    #[must_use]
    pub const fn is_lookup_error(&self) -> bool {
        matches!(self, Self::UnknownCommand(_) | Self::UnknownPreset(_))
    }
}
