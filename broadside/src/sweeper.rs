//! Periodic expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::lobby::Lobby;

/// Run [`Lobby::sweep`] every `interval` until `shutdown` flips to true or
/// its sender is dropped.
pub fn spawn_sweeper(lobby: Arc<Lobby>, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    lobby.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::standard_factory;
    use crate::config::ServerConfig;
    use crate::presence::USERS;
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_sweeper_purges_and_stops() {
        let storage = Arc::new(Storage::new());
        storage
            .create(USERS, "ghost", &serde_json::json!({"username": "ghost"}), Some(Duration::ZERO))
            .unwrap();
        let lobby = Arc::new(Lobby::with_parts(ServerConfig::default(), storage.clone(), standard_factory()).unwrap());

        let (tx, rx) = watch::channel(false);
        let handle = spawn_sweeper(lobby, Duration::from_millis(10), rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(storage.sweep_expired().unwrap().is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
