use tracing::info;

use logtap_agent::runtime::{boot, follow, stop};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    boot::init_logging();
    let (manager, config) = boot::boot().await?;

    let (exit, _) = follow::follow(
        manager.clone(),
        config.filter.clone(),
        config.fanout.queue_capacity,
        std::io::stdout(),
        stop::shutdown_signal(),
    )
    .await?;
    info!(?exit, "Subscription ended");

    manager.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
