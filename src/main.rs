//! C10 — process bootstrap: parse configuration, initialize logging, build
//! the store connection pool, then run the listener to completion.
//!
//! Grounded on the teacher's `main.rs` startup sequence (logging init →
//! load persisted state → bind and serve), stripped of everything that was
//! specific to the race-tracking domain (Socket.IO, auth, audit chain,
//! auto-director) per DESIGN.md.

mod codec;
mod config;
mod error;
mod listener;
mod logging;
mod session;
mod store;
mod units;

use config::Config;
use store::StateStore;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse_args();

    logging::init(&config.log_file, config.verbose);
    info!(
        bind_addr = %config.bind_addr,
        verbose = config.verbose,
        "deezle fleet server starting"
    );

    let store = StateStore::connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("error connecting to state store: {e}"))?;

    listener::run(&config.bind_addr, store).await
}
