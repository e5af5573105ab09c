use async_trait::async_trait;
use btleplug::{
    api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{BedError, Result},
    BED_COMMAND_CHAR_UUID, BED_SERVICE_UUID,
};

/// How long a resolution scan listens for advertisements
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Duplex handle to the bed peripheral
///
/// The session core owns at most one link at a time and only talks to it
/// through this trait, so the controller logic is independent of the
/// concrete transport.
#[async_trait]
pub trait BedLink: Send + Sync {
    /// Connect within the given bound
    ///
    /// # Errors
    ///
    /// Returns [`BedError::ConnectionFailed`] on timeout or transport error.
    async fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Tear the connection down
    ///
    /// # Errors
    ///
    /// Returns [`BedError::Ble`] if the transport rejects the disconnect.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the handle currently reports a live connection
    async fn is_connected(&self) -> bool;

    /// Write one command payload, fire-and-forget
    ///
    /// The bed never acknowledges writes; there is no response to wait for.
    ///
    /// # Errors
    ///
    /// Returns [`BedError::WriteFailed`] on transport error.
    async fn write(&self, payload: &[u8]) -> Result<()>;
}

/// Resolves a stored address to a connectable peripheral handle
#[async_trait]
pub trait LinkResolver: Send + Sync {
    /// Resolve `address` to a fresh link, or `None` if nothing advertises it
    ///
    /// # Errors
    ///
    /// Returns [`BedError::Ble`] for adapter-level failures.
    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn BedLink>>>;
}

/// [`LinkResolver`] backed by the platform Bluetooth adapter
pub struct BleLinkResolver {
    manager: Manager,
    scan_window: Duration,
}

impl BleLinkResolver {
    /// Create a resolver on the first available adapter
    ///
    /// # Errors
    ///
    /// Returns [`BedError::Ble`] if the Bluetooth stack cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        Ok(Self {
            manager,
            scan_window: DEFAULT_SCAN_WINDOW,
        })
    }

    /// Override the advertisement scan window
    #[must_use]
    pub const fn with_scan_window(mut self, scan_window: Duration) -> Self {
        self.scan_window = scan_window;
        self
    }
}

#[async_trait]
impl LinkResolver for BleLinkResolver {
    async fn resolve(&self, address: &str) -> Result<Option<Box<dyn BedLink>>> {
        let adapters = self.manager.adapters().await?;
        let Some(central) = adapters.into_iter().next() else {
            warn!("No Bluetooth adapter available");
            return Ok(None);
        };

        let service_uuid = parse_uuid(BED_SERVICE_UUID)?;
        central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;
        sleep(self.scan_window).await;
        central.stop_scan().await?;

        for peripheral in central.peripherals().await? {
            if peripheral.address().to_string().eq_ignore_ascii_case(address) {
                debug!("Resolved bed peripheral {}", address);
                return Ok(Some(Box::new(BleBedLink::new(peripheral))));
            }
        }

        debug!("No peripheral advertising as {}", address);
        Ok(None)
    }
}

/// [`BedLink`] over a btleplug peripheral
pub struct BleBedLink {
    peripheral: Peripheral,
    command_char: Option<Characteristic>,
}

impl BleBedLink {
    /// Wrap a resolved peripheral
    #[must_use]
    pub const fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            command_char: None,
        }
    }
}

#[async_trait]
impl BedLink for BleBedLink {
    async fn connect(&mut self, bound: Duration) -> Result<()> {
        timeout(bound, self.peripheral.connect())
            .await
            .map_err(|_| {
                BedError::ConnectionFailed(format!("connect timed out after {bound:?}"))
            })?
            .map_err(|e| BedError::ConnectionFailed(e.to_string()))?;

        self.peripheral.discover_services().await?;

        let service_uuid = parse_uuid(BED_SERVICE_UUID)?;
        let char_uuid = parse_uuid(BED_COMMAND_CHAR_UUID)?;

        let services = self.peripheral.services();
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| {
                BedError::ConnectionFailed("bed control service not found".to_string())
            })?;

        let command_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == char_uuid)
            .ok_or_else(|| {
                BedError::ConnectionFailed("bed command characteristic not found".to_string())
            })?
            .clone();

        info!("Connected to bed peripheral {}", self.peripheral.address());
        self.command_char = Some(command_char);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.command_char = None;
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn write(&self, payload: &[u8]) -> Result<()> {
        let command_char = self
            .command_char
            .as_ref()
            .ok_or_else(|| BedError::WriteFailed("link not connected".to_string()))?;

        debug!("Writing command: {:02X?}", payload);
        self.peripheral
            .write(command_char, payload, WriteType::WithoutResponse)
            .await
            .map_err(|e| BedError::WriteFailed(e.to_string()))?;

        Ok(())
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| BedError::ConnectionFailed(format!("invalid UUID: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_parsing() {
        assert!(parse_uuid(BED_SERVICE_UUID).is_ok());
        assert!(parse_uuid(BED_COMMAND_CHAR_UUID).is_ok());
    }

    #[test]
    fn test_bad_uuid_reports_connection_failure() {
        let err = parse_uuid("not-a-uuid").unwrap_err();
        assert!(err.is_connection_error());
    }
}
