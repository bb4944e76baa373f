// Copyright 2026 The Parley Project
// SPDX-License-Identifier: Apache-2.0

// Session reaper.
//
// Periodic sweep that evicts sessions inactive beyond the configured
// threshold. Runs independently of in-flight turns: the store's sweep takes
// each session's lock with `try_lock`, so a session mid-turn is skipped and
// survives until a later sweep.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::SessionConfig;
use crate::session::SessionStore;

/// Spawn the background sweep task. The task runs until aborted (it dies
/// with the process; sessions are volatile anyway).
pub fn spawn(store: Arc<SessionStore>, config: SessionConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let evicted = store.sweep(config.max_inactive);
            if evicted > 0 {
                tracing::info!(evicted, active = store.len(), "session sweep");
            } else {
                tracing::debug!(active = store.len(), "session sweep found nothing to evict");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    #[tokio::test]
    async fn reaper_evicts_inactive_sessions() {
        let store = Arc::new(SessionStore::new("sys"));
        {
            let handle = store.get_or_create("stale");
            handle.lock().await.last_active = Utc::now() - chrono::Duration::seconds(3600);
        }
        store.get_or_create("fresh");

        let reaper = spawn(
            store.clone(),
            SessionConfig {
                max_inactive: Duration::from_secs(60),
                sweep_interval: Duration::from_millis(10),
            },
        );

        // A couple of sweep intervals is plenty.
        tokio::time::sleep(Duration::from_millis(50)).await;
        reaper.abort();

        assert_eq!(store.len(), 1);
        let survivor = store.get_or_create("fresh");
        assert_eq!(survivor.lock().await.messages.len(), 1);
    }

    #[tokio::test]
    async fn reaper_never_removes_a_session_mid_turn() {
        let store = Arc::new(SessionStore::new("sys"));
        let handle = store.get_or_create("busy");
        let mut session = handle.lock().await;
        session.last_active = Utc::now() - chrono::Duration::seconds(3600);

        let reaper = spawn(
            store.clone(),
            SessionConfig {
                max_inactive: Duration::from_secs(60),
                sweep_interval: Duration::from_millis(10),
            },
        );

        // Several sweeps run while the turn holds the lock.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.len(), 1);

        // Turn finishes and touches the session; it stays alive.
        session.touch();
        drop(session);
        tokio::time::sleep(Duration::from_millis(30)).await;
        reaper.abort();
        assert_eq!(store.len(), 1);
    }
}
