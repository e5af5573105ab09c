use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use bedframe::{BleLinkResolver, Result, SessionConfig, SessionRegistry, PRESETS};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "F0:82:C0:11:22:33".to_string());

    info!("🛏️ Bedframe Preset Cycle Example");

    let resolver = Arc::new(BleLinkResolver::new().await?);
    let registry = SessionRegistry::new(resolver, SessionConfig::default());
    let session = registry.register(&address).await;

    for preset in PRESETS {
        info!(
            "🎯 Applying preset '{}' (head: {:?}, feet: {:?})",
            preset.name, preset.head_steps, preset.feet_steps
        );

        if let Err(e) = session.apply_preset(preset.name).await {
            error!("❌ Preset failed: {}", e);
            break;
        }

        // Let the movements make progress, reporting the estimate as we go.
        for _ in 0..5 {
            sleep(Duration::from_secs(1)).await;
            info!(
                "   status: {}, estimate: {:?}, active movements: {}",
                session.connection_status().await,
                session.position().await,
                session.active_movements().await.len()
            );
        }
    }

    info!("🛑 Stopping and removing session...");
    registry.remove(&address).await;

    info!("🎉 Preset cycle example completed!");
    Ok(())
}
