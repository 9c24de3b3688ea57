//! Orchestration of one logical request: cache check, deduplication,
//! network call, cache write and state notification.

use crate::cache::SharedResponseCache;
use crate::descriptor::RequestDescriptor;
use crate::error::FetchError;
use crate::inflight::{PendingResult, SharedInFlightRegistry};
use crate::state::{StateSender, StateTransitions};
use crate::transport::{Transport, TransportRequest};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Registration a caller created in the in-flight registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub url: String,
    pub id: u64,
}

/// Result of the synchronous part of [`RequestCoordinator::execute`]
pub enum Dispatch {
    /// Served from the cache, state is already final
    Cached(Value),
    /// Waiting on a network call
    Pending(PendingRequest),
}

enum Call {
    /// GET shared through the in-flight registry
    Shared(PendingResult),
    /// Uncached and unshared
    Direct(BoxFuture<'static, Result<Value, FetchError>>),
}

/// A dispatched request whose outcome has not been observed yet
pub struct PendingRequest {
    call: Call,
}

/// How a request ended for one caller
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Cached(Value),
    Completed(Result<Value, FetchError>),
    /// The caller lost interest before the call settled
    Cancelled,
}

impl PendingRequest {
    /// The registry entry this caller created, if it originated a shared call
    pub fn origin(&self) -> Option<Origin> {
        match &self.call {
            Call::Shared(pending) if pending.is_originator() => Some(Origin {
                url: pending.url().to_string(),
                id: pending.id(),
            }),
            _ => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.call, Call::Shared(_))
    }

    /// Await the outcome and commit it to `state`.
    ///
    /// Once `token` is cancelled nothing more is emitted. A cancellation
    /// failure from the call itself is swallowed.
    pub async fn settle(self, state: &StateSender, token: &CancellationToken) -> RequestOutcome {
        let outcome = match self.call {
            Call::Shared(pending) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    outcome = pending.outcome() => Some(outcome),
                }
            }
            Call::Direct(call) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    outcome = call => Some(outcome),
                }
            }
        };

        let Some(outcome) = outcome else {
            log::debug!("Request cancelled before it settled");
            return RequestOutcome::Cancelled;
        };

        match &outcome {
            Ok(data) => state.succeed(data.clone()),
            Err(e) if e.is_cancelled() => log::debug!("Suppressing cancelled request"),
            Err(e) => {
                log::warn!("Request failed: {}", e);
                state.fail(e.to_string());
            }
        }
        state.finish_loading();

        RequestOutcome::Completed(outcome)
    }
}

/// Decode a response body; an empty body is `null`
pub fn decode_body(body: &str) -> Result<Value, FetchError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(body)?)
}

pub struct RequestCoordinator {
    cache: SharedResponseCache,
    registry: SharedInFlightRegistry,
    transport: Arc<dyn Transport>,
}

impl RequestCoordinator {
    pub fn new(
        cache: SharedResponseCache,
        registry: SharedInFlightRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            cache,
            registry,
            transport,
        }
    }

    pub fn cache(&self) -> &SharedResponseCache {
        &self.cache
    }

    pub fn registry(&self) -> &SharedInFlightRegistry {
        &self.registry
    }

    /// Run a request to completion for one caller
    pub async fn execute(
        &self,
        descriptor: &RequestDescriptor,
        state: &StateSender,
        token: &CancellationToken,
    ) -> RequestOutcome {
        match self.dispatch(descriptor, state, token) {
            Dispatch::Cached(data) => RequestOutcome::Cached(data),
            Dispatch::Pending(pending) => pending.settle(state, token).await,
        }
    }

    /// The synchronous steps of a request.
    ///
    /// Cache lookup and in-flight registration happen here, before anything
    /// is awaited, so two callers can never both originate a GET for one URL.
    pub fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        state: &StateSender,
        token: &CancellationToken,
    ) -> Dispatch {
        let url = descriptor.url();

        if !descriptor.is_cacheable() {
            state.begin_loading();
            return self.direct(descriptor, token);
        }

        if let Some(data) = self.cache.get(url) {
            log::info!("Returning cached response for url: {}", url);
            state.send_modify(|state| {
                state.data = Some(data.clone());
                state.error = None;
                state.is_loading = false;
            });
            return Dispatch::Cached(data);
        }

        if !self.registry.config.enabled {
            state.begin_loading();
            return self.direct(descriptor, token);
        }

        let pending = self.registry.attach_or_register(url, |id| {
            // Owned by the call, not by any one caller
            let call_token = CancellationToken::new();
            let call = self.network_call(descriptor, Some(id), call_token.clone());
            (call.shared(), call_token)
        });

        if pending.is_originator() {
            state.begin_loading();
        } else {
            state.join_loading();
        }

        Dispatch::Pending(PendingRequest {
            call: Call::Shared(pending),
        })
    }

    fn direct(&self, descriptor: &RequestDescriptor, token: &CancellationToken) -> Dispatch {
        Dispatch::Pending(PendingRequest {
            call: Call::Direct(self.network_call(descriptor, None, token.child_token())),
        })
    }

    fn network_call(
        &self,
        descriptor: &RequestDescriptor,
        registration: Option<u64>,
        call_token: CancellationToken,
    ) -> BoxFuture<'static, Result<Value, FetchError>> {
        let transport = self.transport.clone();
        let cache = self.cache.clone();
        let registry = Arc::downgrade(&self.registry);
        let request = TransportRequest::from(descriptor);
        let cacheable = descriptor.is_cacheable();
        let url = descriptor.url().clone();

        async move {
            log::debug!("Sending {} {}", request.method, url);
            let result = match transport.send(request, call_token).await {
                Ok(response) if response.is_success() => decode_body(&response.body),
                Ok(response) => Err(FetchError::HttpStatus {
                    status: response.status,
                }),
                Err(e) => Err(e),
            };

            if let Ok(data) = &result {
                if cacheable && !data.is_null() {
                    cache.set(url.clone(), data.clone());
                }
            }

            if let (Some(id), Some(registry)) = (registration, registry.upgrade()) {
                registry.release(&url, id);
            }

            result
        }
        .boxed()
    }
}
