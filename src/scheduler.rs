//! The tit-for-tat choking scheduler.
//!
//! Two periodic tasks cooperate: preferred-neighbor reselection rewards
//! the interested peers that delivered the most bytes since the previous
//! tick, and the optimistic unchoke gives one random choked-interested
//! peer a chance to prove itself. Neither holds any global lock across
//! handler operations; redundant choke/unchoke transitions put nothing on
//! the wire.

use crate::peer::PeerHandle;
use crate::swarm::SwarmContext;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng as _;
use std::sync::Arc;
use std::time::Duration;

pub struct ChokingScheduler {
    ctx: Arc<SwarmContext>,
    /// `k`, the size of the preferred set.
    preferred_count: usize,
    unchoking_interval: Duration,
    optimistic_interval: Duration,
    /// The current optimistic neighbor; exempt from the choke sweep.
    optimistic: Mutex<Option<i32>>,
}

impl ChokingScheduler {
    pub fn new(
        ctx: Arc<SwarmContext>,
        preferred_count: usize,
        unchoking_interval: Duration,
        optimistic_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            preferred_count,
            unchoking_interval,
            optimistic_interval,
            optimistic: Mutex::new(None),
        })
    }

    /// Spawns both timer tasks. Each fires immediately, then at its
    /// configured period, until shutdown.
    pub fn spawn(self: Arc<Self>) {
        let tracker = self.ctx.tracker.clone();

        let scheduler = self.clone();
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.unchoking_interval);
            loop {
                tokio::select! {
                    _ = scheduler.ctx.shutdown.cancelled() => break,
                    _ = ticker.tick() => scheduler.preferred_tick(),
                }
            }
        });

        let scheduler = self;
        tracker.spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.optimistic_interval);
            loop {
                tokio::select! {
                    _ = scheduler.ctx.shutdown.cancelled() => break,
                    _ = ticker.tick() => scheduler.optimistic_tick(),
                }
            }
        });
    }

    /// One preferred-neighbor reselection round.
    ///
    /// With the complete file, winners are drawn uniformly from the
    /// interested set; otherwise they are the top `k` by bytes delivered
    /// since the last round, ties broken uniformly at random. Everyone
    /// else is choked, except the current optimistic neighbor.
    pub(crate) fn preferred_tick(&self) {
        let handles = self.ctx.registry.snapshot();
        let mut interested: Vec<Arc<PeerHandle>> = handles
            .iter()
            .filter(|h| h.they_interested())
            .cloned()
            .collect();

        let mut rng = rand::rng();
        if self.ctx.store.is_complete() {
            interested.shuffle(&mut rng);
        } else {
            let mut sampled: Vec<(u64, Arc<PeerHandle>)> = interested
                .drain(..)
                .map(|h| (h.take_downloaded(), h))
                .collect();
            // Shuffle first so the stable sort breaks ties randomly.
            sampled.shuffle(&mut rng);
            sampled.sort_by(|a, b| b.0.cmp(&a.0));
            interested = sampled.into_iter().map(|(_, h)| h).collect();
        }

        let winners: Vec<i32> = interested
            .iter()
            .take(self.preferred_count)
            .map(|h| h.peer_id())
            .collect();
        let optimistic = *self.optimistic.lock();

        for handle in &handles {
            if winners.contains(&handle.peer_id()) {
                handle.unchoke();
            } else if optimistic != Some(handle.peer_id()) {
                handle.choke();
            }
        }

        self.ctx.log.preferred_neighbors(&winners);
    }

    /// One optimistic reselection round.
    ///
    /// Chooses uniformly among currently choked interested peers; when
    /// there is none, the previous optimistic neighbor stands.
    pub(crate) fn optimistic_tick(&self) {
        let candidates: Vec<Arc<PeerHandle>> = self
            .ctx
            .registry
            .snapshot()
            .into_iter()
            .filter(|h| h.they_interested() && h.am_choking())
            .collect();

        if candidates.is_empty() {
            return;
        }

        let pick = &candidates[rand::rng().random_range(0..candidates.len())];
        *self.optimistic.lock() = Some(pick.peer_id());
        pick.unchoke();
        self.ctx.log.optimistic_unchoke(pick.peer_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::EventLog;
    use crate::peer::Message;
    use crate::registry::ConnectionRegistry;
    use crate::storage::PieceStore;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tokio_util::task::TaskTracker;

    fn test_ctx(dir: &TempDir, seed: bool) -> Arc<SwarmContext> {
        if seed {
            std::fs::write(dir.path().join("swarm.dat"), [0u8; 8]).unwrap();
        }
        let store = PieceStore::new(dir.path().join("swarm.dat"), 8, 4, seed).unwrap();
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

    fn peer(
        ctx: &SwarmContext,
        peer_id: i32,
        interested: bool,
    ) -> (Arc<PeerHandle>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Arc::new(PeerHandle::new(peer_id, tx));
        handle.set_they_interested(interested);
        ctx.registry.register(handle.clone());
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[test]
    fn preferred_tick_rewards_top_downloaders() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            2,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let (a, mut rx_a) = peer(&ctx, 101, true);
        let (b, mut rx_b) = peer(&ctx, 102, true);
        let (c, mut rx_c) = peer(&ctx, 103, true);
        a.add_downloaded(300);
        b.add_downloaded(200);
        c.add_downloaded(100);

        scheduler.preferred_tick();

        assert_eq!(drain(&mut rx_a), vec![Message::Unchoke]);
        assert_eq!(drain(&mut rx_b), vec![Message::Unchoke]);
        // Already choked, so the sweep sends nothing.
        assert!(drain(&mut rx_c).is_empty());
        assert!(!a.am_choking());
        assert!(c.am_choking());

        // Counters were sampled and reset.
        assert_eq!(a.take_downloaded(), 0);

        // Next round, c outperforms b and they trade places.
        c.add_downloaded(500);
        a.add_downloaded(400);
        scheduler.preferred_tick();
        assert_eq!(drain(&mut rx_c), vec![Message::Unchoke]);
        assert_eq!(drain(&mut rx_b), vec![Message::Choke]);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn seeder_picks_winners_at_random_but_unchokes_all_k() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, true);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            5,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let (a, mut rx_a) = peer(&ctx, 101, true);
        let (b, mut rx_b) = peer(&ctx, 102, true);
        let (_c, mut rx_c) = peer(&ctx, 103, false);

        scheduler.preferred_tick();

        // Fewer interested peers than k: every interested peer wins.
        assert_eq!(drain(&mut rx_a), vec![Message::Unchoke]);
        assert_eq!(drain(&mut rx_b), vec![Message::Unchoke]);
        assert!(drain(&mut rx_c).is_empty());
        assert!(!a.am_choking());
        assert!(!b.am_choking());
    }

    #[test]
    fn choke_sweep_spares_the_optimistic_neighbor() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            1,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let (a, mut rx_a) = peer(&ctx, 101, true);
        let (b, mut rx_b) = peer(&ctx, 102, true);
        a.add_downloaded(10);
        b.unchoke();
        drain(&mut rx_b);
        *scheduler.optimistic.lock() = Some(102);

        scheduler.preferred_tick();

        assert_eq!(drain(&mut rx_a), vec![Message::Unchoke]);
        // b lost the reselection but is the optimistic neighbor.
        assert!(drain(&mut rx_b).is_empty());
        assert!(!b.am_choking());
    }

    #[test]
    fn empty_selection_still_logs() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            2,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let (_a, mut rx_a) = peer(&ctx, 101, false);
        scheduler.preferred_tick();
        assert!(drain(&mut rx_a).is_empty());

        let text = std::fs::read_to_string(dir.path().join("log_peer_1.log")).unwrap();
        assert!(text.contains("has the preferred neighbors ."));
    }

    #[test]
    fn optimistic_tick_picks_a_choked_interested_peer() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            2,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let (a, mut rx_a) = peer(&ctx, 101, true);
        let (b, mut rx_b) = peer(&ctx, 102, true);
        let (_c, mut rx_c) = peer(&ctx, 103, false);
        b.unchoke();
        drain(&mut rx_b);

        // a is the only choked interested candidate.
        scheduler.optimistic_tick();

        assert_eq!(*scheduler.optimistic.lock(), Some(101));
        assert_eq!(drain(&mut rx_a), vec![Message::Unchoke]);
        assert!(drain(&mut rx_b).is_empty());
        assert!(drain(&mut rx_c).is_empty());
        assert!(!a.am_choking());
    }

    #[test]
    fn optimistic_tick_without_candidates_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            2,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );
        *scheduler.optimistic.lock() = Some(7);

        let (_a, mut rx_a) = peer(&ctx, 101, false);
        scheduler.optimistic_tick();

        assert_eq!(*scheduler.optimistic.lock(), Some(7));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn optimistic_choice_spans_all_candidates() {
        let dir = TempDir::new().unwrap();
        let ctx = test_ctx(&dir, false);
        let scheduler = ChokingScheduler::new(
            ctx.clone(),
            2,
            Duration::from_secs(5),
            Duration::from_secs(15),
        );

        let peers: Vec<_> = [101, 102, 103]
            .into_iter()
            .map(|id| peer(&ctx, id, true))
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..60 {
            scheduler.optimistic_tick();
            seen.insert(scheduler.optimistic.lock().unwrap());
            // Re-choke so every round has all three candidates again.
            for (handle, _rx) in &peers {
                handle.choke();
            }
        }

        assert_eq!(seen, HashSet::from([101, 102, 103]));
    }
}
