//! Concurrent session registry with idle eviction.
//!
//! Process-global mapping from session id to live session record. A session
//! id present in the registry implies its recognizer is not yet closed; the
//! upstream connection is closed (via cancellation) before the entry is
//! removed.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::error::{LingoError, LingoResult};
use crate::protocol_constants::MAX_CONCURRENT_SESSIONS;
use crate::session::StreamingSession;
use crate::utils::now_millis;

/// Thread-safe registry of active streaming sessions.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<StreamingSession>>,
    /// Concurrency cap; insertion fails once reached.
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry with the default concurrency cap.
    pub fn new() -> Self {
        Self::with_limit(MAX_CONCURRENT_SESSIONS)
    }

    /// Creates an empty registry capped at `max_sessions` live sessions.
    pub fn with_limit(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Inserts a session. Fails if the id is already present or the
    /// concurrency cap is reached.
    pub fn insert(&self, session: Arc<StreamingSession>) -> LingoResult<()> {
        if self.sessions.len() >= self.max_sessions {
            return Err(LingoError::SessionLimitReached(self.max_sessions));
        }
        match self.sessions.entry(session.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(LingoError::SessionExists(session.id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                log::info!(
                    "[Registry] Session registered: {} (total: {})",
                    session.id,
                    self.sessions.len() + 1
                );
                entry.insert(session);
                Ok(())
            }
        }
    }

    /// Looks up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<StreamingSession>> {
        self.sessions.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Removes a session by id, returning it if it existed.
    pub fn remove(&self, id: &str) -> Option<Arc<StreamingSession>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if removed.is_some() {
            log::info!(
                "[Registry] Session removed: {} (remaining: {})",
                id,
                self.sessions.len()
            );
        }
        removed
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// The configured concurrency cap.
    #[must_use]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ids of all live sessions.
    #[must_use]
    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    /// Evicts sessions idle longer than `max_idle`, returning their ids.
    ///
    /// Eviction is best-effort and never blocks on a slow teardown: the
    /// session context is cancelled synchronously (which closes the upstream
    /// connection through the recognizer's teardown path) and the full close
    /// runs on a detached task.
    pub fn sweep(&self, max_idle: Duration) -> Vec<String> {
        let now = now_millis();
        let max_idle_millis = max_idle.as_millis() as u64;

        let expired: Vec<Arc<StreamingSession>> = self
            .sessions
            .iter()
            .filter(|r| r.value().idle_millis(now) > max_idle_millis)
            .map(|r| Arc::clone(r.value()))
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for session in expired {
            session.cancel.cancel();
            let recognizer = Arc::clone(&session.recognizer);
            tokio::spawn(async move { recognizer.close().await });
            if self.sessions.remove(&session.id).is_some() {
                log::info!(
                    "[Registry] Idle session evicted: {} (idle {}ms)",
                    session.id,
                    session.idle_millis(now)
                );
                evicted.push(session.id.clone());
            }
        }
        evicted
    }

    /// Cancels and closes every session. Used during graceful shutdown.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<StreamingSession>> = self
            .sessions
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        let count = sessions.len();
        for session in sessions {
            session.recognizer.stop();
            session.cancel.cancel();
            session.recognizer.close().await;
            self.sessions.remove(&session.id);
        }
        if count > 0 {
            log::info!("[Registry] Closed {} session(s) on shutdown", count);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs the periodic idle-eviction sweep until the token is cancelled.
pub async fn run_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_idle: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = registry.sweep(max_idle);
                if !evicted.is_empty() {
                    log::info!("[Registry] Sweep evicted {} session(s)", evicted.len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ingress_channel;
    use crate::recognizer::TranslationRecognizer;
    use crate::upstream::codec::SpeechConfig;
    use crate::upstream::connection::{UpstreamCredentials, UpstreamSettings};
    use tokio_util::sync::CancellationToken;

    fn make_session(id: &str) -> Arc<StreamingSession> {
        let (_writer, reader) = ingress_channel(4);
        let cancel = CancellationToken::new();
        let recognizer = TranslationRecognizer::new(
            id.to_string(),
            SpeechConfig {
                source_language: "ja-JP".into(),
                target_languages: vec!["en".into()],
            },
            UpstreamSettings {
                region: "japaneast".into(),
                endpoint: None,
                credentials: UpstreamCredentials {
                    subscription_key: "key".into(),
                    bearer_token: None,
                },
            },
            reader,
            cancel.clone(),
        );
        StreamingSession::new(
            id.to_string(),
            "ja-JP".into(),
            "en".into(),
            "wav".into(),
            recognizer,
            cancel,
        )
    }

    #[tokio::test]
    async fn insert_get_remove_round_trip() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a")).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());

        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_insert_fails() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a")).unwrap();

        let err = registry.insert(make_session("a")).unwrap_err();
        assert!(matches!(err, LingoError::SessionExists(_)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn remove_unknown_returns_none() {
        let registry = SessionRegistry::new();
        assert!(registry.remove("ghost").is_none());
    }

    #[tokio::test]
    async fn insert_fails_at_the_concurrency_cap() {
        let registry = SessionRegistry::with_limit(2);
        registry.insert(make_session("a")).unwrap();
        registry.insert(make_session("b")).unwrap();

        let err = registry.insert(make_session("c")).unwrap_err();
        assert!(matches!(err, LingoError::SessionLimitReached(2)));

        // Removing one frees a slot.
        registry.remove("a");
        registry.insert(make_session("c")).unwrap();
    }

    #[tokio::test]
    async fn sweep_evicts_only_idle_sessions() {
        let registry = SessionRegistry::new();
        let idle = make_session("idle");
        let active = make_session("active");
        registry.insert(Arc::clone(&idle)).unwrap();
        registry.insert(Arc::clone(&active)).unwrap();

        // Only the active session records fresh activity; an eviction window
        // of zero then expires the idle one on the next sweep.
        tokio::time::sleep(Duration::from_millis(20)).await;
        active.touch();

        let evicted = registry.sweep(Duration::from_millis(10));
        assert_eq!(evicted, vec!["idle".to_string()]);
        assert!(registry.get("idle").is_none());
        assert!(registry.get("active").is_some());
        assert!(idle.cancel.is_cancelled());
        assert!(!active.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn sweep_with_no_expired_sessions_is_a_noop() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a")).unwrap();

        let evicted = registry.sweep(Duration::from_secs(300));
        assert!(evicted.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn close_all_empties_the_registry() {
        let registry = SessionRegistry::new();
        registry.insert(make_session("a")).unwrap();
        registry.insert(make_session("b")).unwrap();

        registry.close_all().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sweeper_task_exits_on_shutdown() {
        let registry = Arc::new(SessionRegistry::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sweeper(
            Arc::clone(&registry),
            Duration::from_millis(5),
            Duration::from_secs(300),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.cancel();
        task.await.unwrap();
    }
}
