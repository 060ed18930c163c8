//! Id-keyed sessions that close themselves once nobody is watching.
//!
//! Every open session counts its event-stream subscribers. When the last
//! `SubscriberGuard` drops (the client closed the view without an explicit
//! DELETE) an idle timer starts; a session that is still unwatched when the
//! timer fires is removed and closed. A subscriber arriving in the meantime
//! keeps it open, so a reloading view can reattach.
//!
//! Used by: log and blame routes

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::error::{AppError, Result};

pub trait Session: Send + Sync + 'static {
    /// Stop the session's background work.
    fn close(&self);
}

struct Entry<S> {
    session: Arc<S>,
    subscribers: usize,
    /// Bumped on every subscriber change; an idle timer only acts on its own epoch.
    epoch: u64,
}

struct Inner<S> {
    kind: &'static str,
    not_found: fn(u64) -> AppError,
    idle_timeout: Duration,
    next_id: AtomicU64,
    sessions: Mutex<HashMap<u64, Entry<S>>>,
}

pub struct SessionRegistry<S: Session> {
    inner: Arc<Inner<S>>,
}

impl<S: Session> Clone for SessionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Session> SessionRegistry<S> {
    pub fn new(kind: &'static str, idle_timeout: Duration, not_found: fn(u64) -> AppError) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                not_found,
                idle_timeout,
                next_id: AtomicU64::new(0),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn insert(&self, session: S) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let open = {
            let mut sessions = self.inner.lock_sessions();
            sessions.insert(
                id,
                Entry {
                    session: Arc::new(session),
                    subscribers: 0,
                    epoch: 0,
                },
            );
            sessions.len()
        };
        tracing::info!("Opened {} {} ({} open)", self.inner.kind, id, open);

        // A session nobody ever subscribes to is reaped like an abandoned one.
        self.inner.schedule_idle_close(id, 0);
        id
    }

    pub fn get(&self, id: u64) -> Result<Arc<S>> {
        self.inner
            .lock_sessions()
            .get(&id)
            .map(|entry| entry.session.clone())
            .ok_or((self.inner.not_found)(id))
    }

    /// The session plus a guard that keeps it open until dropped.
    pub fn subscribe(&self, id: u64) -> Result<(Arc<S>, SubscriberGuard<S>)> {
        let mut sessions = self.inner.lock_sessions();
        let entry = sessions.get_mut(&id).ok_or((self.inner.not_found)(id))?;
        entry.subscribers += 1;
        entry.epoch += 1;

        let guard = SubscriberGuard {
            inner: self.inner.clone(),
            id,
        };
        Ok((entry.session.clone(), guard))
    }

    pub fn close(&self, id: u64) -> Result<()> {
        let entry = self
            .inner
            .lock_sessions()
            .remove(&id)
            .ok_or((self.inner.not_found)(id))?;
        entry.session.close();
        tracing::info!("Closed {} {}", self.inner.kind, id);
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock_sessions().len()
    }
}

impl<S: Session> Inner<S> {
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<u64, Entry<S>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_idle_close(self: &Arc<Self>, id: u64, epoch: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime to reap idle {} {}", self.kind, id);
            return;
        };
        let inner: Weak<Self> = Arc::downgrade(self);
        let idle_timeout = self.idle_timeout;

        handle.spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(inner) = inner.upgrade() {
                inner.close_if_idle(id, epoch);
            }
        });
    }

    fn close_if_idle(&self, id: u64, epoch: u64) {
        let entry = {
            let mut sessions = self.lock_sessions();
            match sessions.get(&id) {
                Some(entry) if entry.subscribers == 0 && entry.epoch == epoch => sessions.remove(&id),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            entry.session.close();
            tracing::info!("Closed idle {} {}", self.kind, id);
        }
    }
}

/// Held by each live event stream of a session.
pub struct SubscriberGuard<S: Session> {
    inner: Arc<Inner<S>>,
    id: u64,
}

impl<S: Session> Drop for SubscriberGuard<S> {
    fn drop(&mut self) {
        let idle_epoch = {
            let mut sessions = self.inner.lock_sessions();
            let Some(entry) = sessions.get_mut(&self.id) else {
                return;
            };
            entry.subscribers = entry.subscribers.saturating_sub(1);
            entry.epoch += 1;
            (entry.subscribers == 0).then_some(entry.epoch)
        };

        if let Some(epoch) = idle_epoch {
            tracing::debug!("Last subscriber of {} {} left", self.inner.kind, self.id);
            self.inner.schedule_idle_close(self.id, epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    const IDLE: Duration = Duration::from_secs(30);

    #[derive(Default)]
    struct Tracked {
        closed: Arc<AtomicBool>,
    }

    impl Session for Tracked {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn registry() -> SessionRegistry<Tracked> {
        SessionRegistry::new("test session", IDLE, AppError::SessionNotFound)
    }

    fn tracked() -> (Tracked, Arc<AtomicBool>) {
        let session = Tracked::default();
        let closed = session.closed.clone();
        (session, closed)
    }

    #[tokio::test]
    async fn test_registry_lifecycle() {
        let registry = registry();
        let (session, closed) = tracked();

        let first = registry.insert(session);
        let second = registry.insert(Tracked::default());
        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
        assert!(registry.get(first).is_ok());

        registry.close(first).unwrap();
        assert!(closed.load(Ordering::SeqCst));
        assert!(matches!(registry.get(first), Err(AppError::SessionNotFound(id)) if id == first));
        assert!(matches!(registry.close(first), Err(AppError::SessionNotFound(_))));
        assert!(matches!(registry.subscribe(first), Err(AppError::SessionNotFound(_))));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_subscriber_leaving_closes_session() {
        let registry = registry();
        let (session, closed) = tracked();
        let id = registry.insert(session);

        let (_, first) = registry.subscribe(id).unwrap();
        let (_, second) = registry.subscribe(id).unwrap();
        drop(first);
        tokio::time::sleep(IDLE * 2).await;
        assert!(registry.get(id).is_ok());

        drop(second);
        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        assert!(matches!(registry.get(id), Err(AppError::SessionNotFound(_))));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reattaching_within_idle_timeout_keeps_session() {
        let registry = registry();
        let (session, closed) = tracked();
        let id = registry.insert(session);

        let (_, guard) = registry.subscribe(id).unwrap();
        drop(guard);
        tokio::time::sleep(IDLE / 2).await;

        let (_, _reattached) = registry.subscribe(id).unwrap();
        tokio::time::sleep(IDLE * 2).await;
        assert!(registry.get(id).is_ok());
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_subscribed_session_is_reaped() {
        let registry = registry();
        let id = registry.insert(Tracked::default());

        tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
        assert_eq!(registry.len(), 0);
        assert!(registry.get(id).is_err());
    }
}
