//! Process module - launches chain nodes and keeps the group alive together
//!
//! Every chain runs in its own task. The first unexpected failure, or an
//! external interrupt, stops the whole group through one shutdown path.

pub mod supervisor;

pub use supervisor::{ProcessSupervisor, ShutdownHandle};

use tokio::sync::watch;

/// Resolves once shutdown has been requested, or the supervisor is gone
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        let stop = *shutdown.borrow_and_update();
        if stop {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
