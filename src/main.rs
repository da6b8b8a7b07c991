use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::time::MissedTickBehavior;

use palmvote_backend::{
    config::Config,
    error::Error,
    voting::{BallotCaster, FileReceiptRenderer, ReceiptRetries},
};

async fn run() -> Result<(), Error> {
    info!("Loading configuration...");
    let config = Config::load()?;
    let store = Arc::new(config.db()?.connect().await?);
    let renderer = Arc::new(FileReceiptRenderer::new(config.receipt_dir()));
    let caster = Arc::new(BallotCaster::new(store, renderer));
    info!("...configured, receipts go to {}", config.receipt_dir().display());

    // Pick up receipts left outstanding by earlier runs, then keep sweeping
    // for ones that fail while we are up.
    let retries = ReceiptRetries::new(
        caster,
        config.receipt_retry_interval(),
        config.receipt_max_attempts(),
    );
    let mut sweep = tokio::time::interval(
        config
            .receipt_retry_interval()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(300)),
    );
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sweep.tick() => match retries.schedule_pending().await {
                Ok(0) => debug!("No outstanding receipts"),
                Ok(n) => info!("Scheduled {n} receipt retries"),
                Err(e) => error!("Failed to scan for outstanding receipts: {e}"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    warn!("Shutdown requested, stopping gracefully...");
    retries.cancel_all().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Set up logging.
    log4rs::init_file("log4rs.yaml", Default::default()).expect("Failed to initialise logging");
    info!("Initialised logging");

    if let Err(err) = run().await {
        error!("{err}");
        error!("Critical failure, shutting down");
        std::process::exit(1)
    }
}
