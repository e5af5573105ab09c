use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

use bedframe::{Axis, BedSession, BleLinkResolver, Command, MoveDirection, Result, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "F0:82:C0:11:22:33".to_string());

    info!("🛏️ Bedframe Basic Control Example");
    info!("Target bed: {}", address);

    let resolver = match BleLinkResolver::new().await {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            error!("❌ Failed to initialize Bluetooth: {}", e);
            return Err(e);
        }
    };

    let session = BedSession::new(address, resolver, SessionConfig::default());

    // Single button-style command: raise the head one step.
    info!("⬆️ Raising head one step...");
    if let Err(e) = session.send(Command::HeadUp).await {
        error!("❌ Failed to send command: {}", e);
        return Err(e);
    }
    info!("✅ Command sent, status: {}", session.connection_status().await);

    // Continuous motion: raise the feet for a while, then stop early.
    info!("🔁 Starting continuous feet movement (30 steps)...");
    let movement = session
        .spawn_movement(Command::FeetUp, 30, session.config().move_interval)
        .await;

    sleep(Duration::from_secs(2)).await;
    info!(
        "⏸ Stopping after {} steps (estimate: {:?})",
        movement.steps_issued(),
        session.position().await
    );
    session.stop_all().await;
    info!("✅ Stopped, status: {}", session.connection_status().await);

    // Step-count driven movement, as a numeric surface would issue it.
    session.set_desired_steps(Axis::Head, 5).await;
    let head = session.move_axis(Axis::Head, MoveDirection::Up).await;
    sleep(Duration::from_secs(2)).await;
    info!(
        "📊 Head movement {} after {}/{} steps",
        head.state().await,
        head.steps_issued(),
        head.total_repeats()
    );

    // Leave the bed flat and the radio quiet.
    info!("🛏️ Returning to flat...");
    session.send(Command::Flat).await?;
    session.stop_all().await;

    info!("🎉 Basic control example completed!");
    Ok(())
}
