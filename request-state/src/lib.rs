//! Client-side request state: loading/error/data tracking for a URL, with an
//! in-memory GET cache, deduplication of concurrent GETs, debounced firing and
//! cancellation tied to the consumer's lifetime.
//!
//! ```rust,no_run
//! use request_state::{FetchClient, RequestOptions};
//!
//! # async fn run() {
//! let client = FetchClient::new();
//! let mut profile = client.use_fetch("https://api.example.com/profile", &RequestOptions::new());
//! let mut updates = profile.subscribe();
//! let _ = updates.wait_for(|state| !state.is_loading).await;
//! println!("{:?}", profile.state().data);
//! profile.close();
//! # }
//! ```

pub mod binding;
pub mod cache;
pub mod coordinator;
pub mod descriptor;
mod error;
pub mod inflight;
pub mod scheduler;
pub mod state;
pub mod transport;


use cache::{CacheConfig, ResponseCache, SharedResponseCache};
use inflight::{DeduplicationConfig, InFlightRegistry, SharedInFlightRegistry};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::sync::Arc;

pub use binding::FetchBinding;
pub use cache::CacheStats;
pub use coordinator::{RequestCoordinator, RequestOutcome};
pub use descriptor::{InvalidOptionError, Method, RequestDescriptor, RequestOptions};
pub use error::FetchError;
pub use inflight::InFlightStats;
pub use state::{RequestState, StateReceiver};
pub use transport::{SurfTransport, Transport, TransportRequest, TransportResponse};

/// Configuration for a [`FetchClient`]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub cache: CacheConfig,
    pub deduplication: DeduplicationConfig,
}

lazy_static! {
    static ref SHARED_CLIENT: FetchClient = FetchClient::new();
}

/// Entry point owning one response cache and one in-flight registry.
///
/// Clones share the same cache and registry.
#[derive(Clone)]
pub struct FetchClient {
    coordinator: Arc<RequestCoordinator>,
}

impl Default for FetchClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FetchClient {
    /// Create a client over surf with the default configuration
    pub fn new() -> Self {
        Self::with_transport(Arc::new(SurfTransport::new()))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(FetchConfig::default(), transport)
    }

    pub fn with_config(config: FetchConfig, transport: Arc<dyn Transport>) -> Self {
        let cache: SharedResponseCache = Arc::new(ResponseCache::new(config.cache));
        let registry: SharedInFlightRegistry =
            Arc::new(InFlightRegistry::new(config.deduplication));
        log::info!(
            "Initialized FetchClient (max cached responses: {})",
            cache.config.max_entries
        );

        Self {
            coordinator: Arc::new(RequestCoordinator::new(cache, registry, transport)),
        }
    }

    /// Process-wide client over surf, created on first use
    pub fn shared() -> &'static FetchClient {
        &SHARED_CLIENT
    }

    pub fn coordinator(&self) -> &Arc<RequestCoordinator> {
        &self.coordinator
    }

    /// Bind a request for `url` to the caller and fire it
    pub fn use_fetch(&self, url: impl Into<String>, options: &RequestOptions) -> FetchBinding {
        FetchBinding::open(self.coordinator.clone(), url, options)
    }

    /// Empty the response cache and the in-flight registry
    pub fn clear_cache(&self) {
        self.coordinator.cache().clear();
        self.coordinator.registry().clear_all();
    }

    /// Forget the cached response and any in-flight registration for `url`
    pub fn invalidate_url(&self, url: &str) {
        let cached = self.coordinator.cache().delete(url);
        let pending = self.coordinator.registry().clear(url);
        log::debug!(
            "Invalidated url: {} (cached: {}, in flight: {})",
            url,
            cached,
            pending
        );
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.cache().stats()
    }

    pub fn in_flight_stats(&self) -> InFlightStats {
        self.coordinator.registry().stats()
    }
}
