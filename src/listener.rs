//! C5 — TCP listener. Binds the device-facing port, accepts indefinitely,
//! and spawns one independent session task per connection.
//!
//! Grounded on the teacher's `main.rs` bind/serve pattern, generalized from
//! an Axum HTTP server to a raw `TcpListener` accept loop, since this
//! spec's transport has no HTTP framing at all.

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::session;
use crate::store::StateStore;

/// Binds `bind_addr` and accepts connections until a bind failure (fatal —
/// spec.md §7: "Listener bind failure: fatal; process aborts with a
/// message.") or forever otherwise. Accept errors on an already-bound
/// listener are also treated as fatal per spec.md §4.6.
pub async fn run(bind_addr: &str, store: StateStore) -> anyhow::Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("error creating tcp server on {bind_addr}: {e}"))?;
    info!(%bind_addr, "listening for scooter connections");

    loop {
        let (stream, peer) = listener.accept().await.map_err(|e| {
            error!(error = %e, "error accepting connection");
            anyhow::anyhow!("error binding client: {e}")
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            error!(%peer, error = %e, "failed to set TCP_NODELAY, continuing anyway");
        }

        let store = store.clone();
        tokio::spawn(async move {
            info!(%peer, "accepted scooter connection");
            session::run(stream, peer, store).await;
            info!(%peer, "session ended");
        });
    }
}
