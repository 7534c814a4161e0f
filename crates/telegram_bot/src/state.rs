use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, OwnedMutexGuard, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

/// Where a user is in the date-range flow.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum Step {
    #[default]
    Idle,
    AwaitingStart,
    AwaitingEnd,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct UserSession {
    pub step: Step,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Exclusive access to one user's session. Released on drop.
pub(crate) type SessionHandle = OwnedMutexGuard<UserSession>;

struct Slot {
    session: Arc<Mutex<UserSession>>,
    last_seen: Instant,
}

/// Per-user flow sessions.
///
/// The map lock is only held to find or insert a user's slot; the session
/// itself has its own lock, so different users never wait on each other.
#[derive(Clone, Default)]
pub(crate) struct SessionStore {
    inner: Arc<Mutex<HashMap<u64, Slot>>>,
}

impl SessionStore {
    pub(crate) async fn get_or_create(&self, user_id: u64) -> SessionHandle {
        let session = {
            let mut guard = self.inner.lock().await;
            let slot = guard.entry(user_id).or_insert_with(|| Slot {
                session: Arc::default(),
                last_seen: Instant::now(),
            });
            slot.last_seen = Instant::now();
            Arc::clone(&slot.session)
        };
        session.lock_owned().await
    }

    /// Drops sessions untouched for at least `ttl`. Sessions currently held
    /// by a handler are kept. Returns how many were removed.
    pub(crate) async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|_, slot| {
            slot.last_seen.elapsed() < ttl || Arc::strong_count(&slot.session) > 1
        });
        before - guard.len()
    }

    pub(crate) async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub(crate) fn spawn_sweeper(
        &self,
        ttl: Duration,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.evict_idle(ttl).await;
                        if evicted > 0 {
                            tracing::debug!(
                                "evicted {evicted} idle sessions, {} left",
                                store.len().await
                            );
                        }
                    }
                    _ = crate::wait_for_shutdown(&mut shutdown) => break,
                }
            }
            tracing::debug!("session sweeper stopped");
        })
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self, user_id: u64) -> Option<UserSession> {
        let session = {
            let guard = self.inner.lock().await;
            Arc::clone(&guard.get(&user_id)?.session)
        };
        let snapshot = session.lock().await.clone();
        Some(snapshot)
    }
}
