//! Detects the swarm-wide termination condition.

use crate::swarm::SwarmContext;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// How often completion is sampled.
const SAMPLE_PERIOD: Duration = Duration::from_secs(2);
/// Pause between observing universal disinterest and pulling the plug,
/// giving in-flight teardown traffic time to drain.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(4);

/// Periodically samples the piece store and the registry, emits the
/// completion event, and triggers orderly shutdown once the whole swarm
/// is done.
///
/// Shutdown is declared when this peer holds the complete file and every
/// known connection reports the remote as not interested (everyone else
/// has completed too, so no one has anything to gain). The disinterest
/// condition must hold on two consecutive samples, and at least one
/// connection must ever have registered, so a seeder does not exit before
/// its first leecher arrives.
pub struct CompletionWatcher {
    ctx: Arc<SwarmContext>,
    initially_seeded: bool,
}

impl CompletionWatcher {
    pub fn spawn(ctx: Arc<SwarmContext>, initially_seeded: bool) {
        let watcher = Self {
            ctx,
            initially_seeded,
        };
        let tracker = watcher.ctx.tracker.clone();
        tracker.spawn(watcher.run());
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);

        // Wait until we hold the whole file.
        loop {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if self.ctx.store.is_complete() {
                if !self.initially_seeded {
                    self.ctx.log.download_complete();
                }
                break;
            }
        }

        // Wait until no connection is interested anymore, twice in a row.
        let mut quiet_samples = 0u32;
        while quiet_samples < 2 {
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let all_disinterested = self.ctx.registry.ever_registered()
                && self
                    .ctx
                    .registry
                    .snapshot()
                    .iter()
                    .all(|h| !h.they_interested());
            quiet_samples = if all_disinterested {
                quiet_samples + 1
            } else {
                0
            };
        }

        tokio::select! {
            _ = self.ctx.shutdown.cancelled() => return,
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {}
        }

        info!("swarm finished, shutting down");
        self.ctx.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::EventLog;
    use crate::peer::PeerHandle;
    use crate::registry::ConnectionRegistry;
    use crate::storage::PieceStore;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    fn test_ctx(dir: &TempDir, seed: bool) -> Arc<SwarmContext> {
        if seed {
            std::fs::write(dir.path().join("swarm.dat"), [0u8; 4]).unwrap();
        }
        let store = PieceStore::new(dir.path().join("swarm.dat"), 4, 2, seed).unwrap();
        let log = EventLog::open(1, &dir.path().join("log_peer_1.log")).unwrap();
        Arc::new(SwarmContext {
            self_id: 1,
            store,
            registry: ConnectionRegistry::new(),
            log,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    // The watcher only reads flags, so the outbound receiver can drop.
    fn register_peer(ctx: &SwarmContext, peer_id: i32, interested: bool) -> Arc<PeerHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = Arc::new(PeerHandle::new(peer_id, tx));
        handle.set_they_interested(interested);
        ctx.registry.register(handle.clone());
        handle
    }

    #[tokio::test(start_paused = true)]
    async fn seeder_shuts_down_once_no_one_is_interested() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, true);
        register_peer(&ctx, 2, false);

        CompletionWatcher::spawn(ctx.clone(), true);

        tokio::time::timeout(Duration::from_secs(60), ctx.shutdown.cancelled())
            .await
            .expect("watcher never triggered shutdown");

        // A seeder never logs the completion event.
        let text = std::fs::read_to_string(dir.path().join("log_peer_1.log")).unwrap();
        assert!(!text.contains("complete file"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_interested_peers() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, true);
        let peer = register_peer(&ctx, 2, true);

        CompletionWatcher::spawn(ctx.clone(), true);

        let early = tokio::time::timeout(Duration::from_secs(60), ctx.shutdown.cancelled()).await;
        assert!(early.is_err(), "shut down while a peer was interested");

        peer.set_they_interested(false);
        tokio::time::timeout(Duration::from_secs(60), ctx.shutdown.cancelled())
            .await
            .expect("watcher never triggered shutdown");
    }

    #[tokio::test(start_paused = true)]
    async fn leecher_completion_is_logged() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        ctx.store.write_piece(0, &[1, 2]).await.unwrap();
        ctx.store.write_piece(1, &[3, 4]).await.unwrap();
        register_peer(&ctx, 2, false);

        CompletionWatcher::spawn(ctx.clone(), false);

        tokio::time::timeout(Duration::from_secs(60), ctx.shutdown.cancelled())
            .await
            .expect("watcher never triggered shutdown");

        let text = std::fs::read_to_string(dir.path().join("log_peer_1.log")).unwrap();
        assert!(text.contains("Peer 1 has downloaded the complete file."));
    }

    #[tokio::test(start_paused = true)]
    async fn no_shutdown_before_the_first_connection() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, true);

        CompletionWatcher::spawn(ctx.clone(), true);

        let early = tokio::time::timeout(Duration::from_secs(120), ctx.shutdown.cancelled()).await;
        assert!(early.is_err(), "seeder shut down with no peers ever seen");
    }

    #[tokio::test(start_paused = true)]
    async fn incomplete_leecher_keeps_running() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        register_peer(&ctx, 2, false);

        CompletionWatcher::spawn(ctx.clone(), false);

        let early = tokio::time::timeout(Duration::from_secs(120), ctx.shutdown.cancelled()).await;
        assert!(early.is_err(), "leecher shut down without the full file");
    }
}
