use crate::error::FetchError;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// Configuration for request deduplication
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Whether concurrent GET requests for one URL share a single network call
    pub enabled: bool,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Outcome of a network call that any number of callers can await
pub type SharedResult = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

type PendingMap = DashMap<String, InFlightEntry>;

struct InFlightEntry {
    id: u64,
    result: SharedResult,
    call_token: CancellationToken,
    observers: Arc<AtomicUsize>,
    started_at: DateTime<Utc>,
}

impl InFlightEntry {
    /// An entry whose last observer left is being torn down
    fn is_live(&self) -> bool {
        self.observers.load(Ordering::Acquire) > 0
    }

    fn attach(&self, url: &str, role: Role, pending: &Arc<PendingMap>) -> PendingResult {
        self.observers.fetch_add(1, Ordering::AcqRel);
        PendingResult {
            url: url.to_string(),
            id: self.id,
            role,
            result: self.result.clone(),
            _guard: ObserverGuard {
                url: url.to_string(),
                id: self.id,
                observers: self.observers.clone(),
                call_token: self.call_token.clone(),
                pending: Arc::downgrade(pending),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registered the network call
    Originator,
    /// Joined a call someone else registered
    Attached,
}

/// One caller's interest in an in-flight request.
///
/// Dropping it detaches the caller. When the last caller detaches before the
/// call settles, the registry entry is removed and the call is cancelled.
pub struct PendingResult {
    url: String,
    id: u64,
    role: Role,
    result: SharedResult,
    _guard: ObserverGuard,
}

impl PendingResult {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_originator(&self) -> bool {
        self.role == Role::Originator
    }

    /// Wait for the settled outcome of the underlying call
    pub async fn outcome(&self) -> Result<Value, FetchError> {
        self.result.clone().await
    }
}

struct ObserverGuard {
    url: String,
    id: u64,
    observers: Arc<AtomicUsize>,
    call_token: CancellationToken,
    pending: Weak<PendingMap>,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if self.observers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        if let Some(pending) = self.pending.upgrade() {
            if pending
                .remove_if(&self.url, |_, entry| entry.id == self.id)
                .is_some()
            {
                log::debug!("Last observer left in-flight request for url: {}", self.url);
            }
        }
        self.call_token.cancel();
    }
}

/// Registry of in-flight GET requests keyed by URL.
///
/// When multiple identical requests come in, only the first one reaches the
/// network and every other caller attaches to its outcome.
pub struct InFlightRegistry {
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    pub config: DeduplicationConfig,
}

impl InFlightRegistry {
    pub fn new(config: DeduplicationConfig) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn has(&self, url: &str) -> bool {
        self.pending
            .get(url)
            .map(|entry| entry.is_live())
            .unwrap_or(false)
    }

    /// Attach to the pending request for `url`, if any
    pub fn get(&self, url: &str) -> Option<PendingResult> {
        let entry = self.pending.get(url)?;
        if !entry.is_live() {
            return None;
        }
        log::debug!("Request already pending for url: {}", url);
        Some(entry.attach(url, Role::Attached, &self.pending))
    }

    /// Register a call for `url`, replacing any previous entry.
    ///
    /// The returned handle is the originator's. Cancelling `call_token` must
    /// abort the call behind `result`.
    pub fn register(
        &self,
        url: impl Into<String>,
        result: SharedResult,
        call_token: CancellationToken,
    ) -> PendingResult {
        let url = url.into();
        let entry = self.new_entry(self.next_id(), result, call_token);
        let handle = entry.attach(&url, Role::Originator, &self.pending);
        self.pending.insert(url, entry);
        handle
    }

    /// Attach to the pending request for `url` or register a new one, atomically.
    ///
    /// `start` receives the id of the new registration and must build the call
    /// without awaiting anything.
    pub fn attach_or_register<F>(&self, url: &str, start: F) -> PendingResult
    where
        F: FnOnce(u64) -> (SharedResult, CancellationToken),
    {
        match self.pending.entry(url.to_string()) {
            Entry::Occupied(occupied) if occupied.get().is_live() => {
                log::debug!("Request already pending for url: {}", url);
                occupied.get().attach(url, Role::Attached, &self.pending)
            }
            vacant_or_dead => {
                log::debug!("Executing new request for url: {}", url);
                let id = self.next_id();
                let (result, call_token) = start(id);
                let entry = self.new_entry(id, result, call_token);
                let handle = entry.attach(url, Role::Originator, &self.pending);
                match vacant_or_dead {
                    Entry::Occupied(mut occupied) => {
                        occupied.insert(entry);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(entry);
                    }
                }
                handle
            }
        }
    }

    fn new_entry(
        &self,
        id: u64,
        result: SharedResult,
        call_token: CancellationToken,
    ) -> InFlightEntry {
        InFlightEntry {
            id,
            result,
            call_token,
            observers: Arc::new(AtomicUsize::new(0)),
            started_at: Utc::now(),
        }
    }

    /// Remove the entry for `url` only if it is still registration `id`
    pub fn release(&self, url: &str, id: u64) -> bool {
        match self.pending.remove_if(url, |_, entry| entry.id == id) {
            Some((_, entry)) => {
                log::debug!(
                    "Released in-flight request for url: {} after {}ms",
                    url,
                    (Utc::now() - entry.started_at).num_milliseconds()
                );
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `url` whoever registered it.
    ///
    /// Callers already attached still receive the call's outcome.
    pub fn clear(&self, url: &str) -> bool {
        self.pending.remove(url).is_some()
    }

    /// Clear all pending requests
    pub fn clear_all(&self) {
        self.pending.clear();
        log::info!("In-flight registry cleared");
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get statistics about pending requests
    pub fn stats(&self) -> InFlightStats {
        let pending_requests = self.pending.len();
        let total_observers = self
            .pending
            .iter()
            .map(|entry| entry.value().observers.load(Ordering::Acquire))
            .sum();

        InFlightStats {
            pending_requests,
            total_observers,
        }
    }
}

/// Statistics for in-flight requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightStats {
    pub pending_requests: usize,
    pub total_observers: usize,
}

/// Thread-safe wrapper for the registry
pub type SharedInFlightRegistry = Arc<InFlightRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use serde_json::json;
    use tokio::sync::oneshot;

    fn gated_call() -> (SharedResult, oneshot::Sender<Result<Value, FetchError>>) {
        let (tx, rx) = oneshot::channel();
        let result = async move { rx.await.unwrap_or(Err(FetchError::Cancelled)) }
            .boxed()
            .shared();
        (result, tx)
    }

    #[tokio::test]
    async fn test_attached_callers_share_outcome() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());
        let (result, tx) = gated_call();

        let originator = registry.register("/profile", result, CancellationToken::new());
        assert!(registry.has("/profile"));

        let attached = registry.get("/profile").unwrap();
        assert_eq!(attached.role(), Role::Attached);
        assert_eq!(attached.id(), originator.id());
        assert_eq!(registry.stats().total_observers, 2);

        tx.send(Ok(json!({"name": "ada"}))).unwrap();
        assert_eq!(originator.outcome().await, Ok(json!({"name": "ada"})));
        assert_eq!(attached.outcome().await, Ok(json!({"name": "ada"})));
    }

    #[tokio::test]
    async fn test_outcome_survives_registry_removal() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());
        let (result, tx) = gated_call();

        let originator = registry.register("/a", result, CancellationToken::new());
        let attached = registry.get("/a").unwrap();
        assert!(registry.clear("/a"));
        assert!(!registry.has("/a"));

        tx.send(Err(FetchError::HttpStatus { status: 500 })).unwrap();
        assert_eq!(
            attached.outcome().await,
            Err(FetchError::HttpStatus { status: 500 })
        );
        drop(originator);
    }

    #[test]
    fn test_attach_or_register_is_single_originator() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());
        let mut starts = 0;

        let first = registry.attach_or_register("/a", |_| {
            starts += 1;
            (gated_call().0, CancellationToken::new())
        });
        let second = registry.attach_or_register("/a", |_| {
            starts += 1;
            (gated_call().0, CancellationToken::new())
        });

        assert_eq!(starts, 1);
        assert!(first.is_originator());
        assert!(!second.is_originator());
    }

    #[test]
    fn test_last_observer_leaving_cancels_call() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());
        let token = CancellationToken::new();

        let originator = registry.register("/a", gated_call().0, token.clone());
        let attached = registry.get("/a").unwrap();

        drop(originator);
        assert!(registry.has("/a"));
        assert!(!token.is_cancelled());

        drop(attached);
        assert!(!registry.has("/a"));
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_release_only_removes_own_registration() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());

        let old = registry.register("/a", gated_call().0, CancellationToken::new());
        let old_id = old.id();
        assert!(registry.clear("/a"));

        let new = registry.register("/a", gated_call().0, CancellationToken::new());
        assert!(!registry.release("/a", old_id));
        assert!(registry.has("/a"));

        // The stale handle leaving must not remove the newer registration
        drop(old);
        assert!(registry.has("/a"));

        assert!(registry.release("/a", new.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_different_urls_not_deduplicated() {
        let registry = InFlightRegistry::new(DeduplicationConfig::default());

        let a = registry.attach_or_register("/a", |_| (gated_call().0, CancellationToken::new()));
        let b = registry.attach_or_register("/b", |_| (gated_call().0, CancellationToken::new()));

        assert!(a.is_originator());
        assert!(b.is_originator());
        assert_eq!(
            registry.stats(),
            InFlightStats {
                pending_requests: 2,
                total_observers: 2
            }
        );

        registry.clear_all();
        assert!(registry.is_empty());
    }
}
