//! Ties requests to a consumer's lifetime and to the identity of its inputs.

use crate::coordinator::{Dispatch, Origin, RequestCoordinator};
use crate::descriptor::{InvalidOptionError, RequestDescriptor, RequestOptions};
use crate::error::FetchError;
use crate::inflight::InFlightRegistry;
use crate::scheduler::ScheduledTask;
use crate::state::{RequestState, StateReceiver, StateSender};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type OriginSlot = Arc<Mutex<Option<Origin>>>;

/// The request currently running on behalf of a binding
struct Run {
    task: ScheduledTask,
    origin: OriginSlot,
}

fn take_origin(slot: &OriginSlot) -> Option<Origin> {
    slot.lock().unwrap_or_else(|e| e.into_inner()).take()
}

fn store_origin(slot: &OriginSlot, origin: Option<Origin>) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = origin;
}

/// Remove the registration a cancelled run originated, if it still holds one.
///
/// Only the originator's registration is removed; other waiters keep their
/// own interest in the shared call.
fn release_origin(registry: &InFlightRegistry, slot: &OriginSlot) {
    if let Some(origin) = take_origin(slot) {
        if registry.release(&origin.url, origin.id) {
            log::debug!("Cancelled originator released url: {}", origin.url);
        }
    }
}

/// Publish a run's registration so teardown can release it.
///
/// A teardown racing the dispatch cancels the token before taking the slot,
/// so checking the token after storing leaves exactly one side releasing.
/// Returns whether the run is still live.
fn publish_origin(
    registry: &InFlightRegistry,
    slot: &OriginSlot,
    origin: Option<Origin>,
    token: &CancellationToken,
) -> bool {
    store_origin(slot, origin);
    if token.is_cancelled() {
        release_origin(registry, slot);
        return false;
    }
    true
}

/// One consumer's view of a request.
///
/// Opening a binding fires the request. The request fires again whenever the
/// inputs change or [`refetch`](Self::refetch) is called. Closing or dropping
/// the binding cancels whatever it still has running.
///
/// Must be used from within a tokio runtime.
pub struct FetchBinding {
    coordinator: Arc<RequestCoordinator>,
    descriptor: Result<RequestDescriptor, InvalidOptionError>,
    state: Arc<StateSender>,
    run: Option<Run>,
    closed: bool,
}

impl FetchBinding {
    pub fn open(
        coordinator: Arc<RequestCoordinator>,
        url: impl Into<String>,
        options: &RequestOptions,
    ) -> Self {
        let (state, _) = watch::channel(RequestState::default());
        let mut binding = Self {
            coordinator,
            descriptor: RequestDescriptor::from_options(url, options),
            state: Arc::new(state),
            run: None,
            closed: false,
        };
        binding.trigger();
        binding
    }

    pub fn state(&self) -> RequestState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> StateReceiver {
        self.state.subscribe()
    }

    pub fn descriptor(&self) -> Option<&RequestDescriptor> {
        self.descriptor.as_ref().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Switch to new inputs, re-firing only if their identity changed.
    ///
    /// Returns whether a new request was started.
    pub fn update(&mut self, url: impl Into<String>, options: &RequestOptions) -> bool {
        if self.closed {
            return false;
        }

        let descriptor = RequestDescriptor::from_options(url, options);
        let unchanged = match (&self.descriptor, &descriptor) {
            (Ok(current), Ok(next)) => current.identity_key() == next.identity_key(),
            (Err(current), Err(next)) => current == next,
            _ => false,
        };
        if unchanged {
            return false;
        }

        self.teardown();
        self.descriptor = descriptor;
        self.trigger();
        true
    }

    /// Fire the current request again, superseding any run still in progress.
    ///
    /// The cache is still consulted; invalidate the URL first to force a
    /// network call.
    pub fn refetch(&mut self) {
        if self.closed {
            return;
        }
        self.teardown();
        self.trigger();
    }

    /// Cancel everything this binding has running. Idempotent.
    pub fn close(&mut self) {
        if !self.closed {
            self.teardown();
            self.closed = true;
        }
    }

    /// Wait for the current run, including any debounce delay, to finish
    pub async fn settled(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.task.join().await;
        }
    }

    fn teardown(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        run.task.cancel();
        release_origin(self.coordinator.registry(), &run.origin);

        // A superseding run raises the flag again when it dispatches
        self.state
            .send_if_modified(|state| std::mem::replace(&mut state.is_loading, false));
    }

    fn trigger(&mut self) {
        let descriptor = match &self.descriptor {
            Ok(descriptor) => descriptor.clone(),
            Err(e) => {
                let message = FetchError::from(e.clone()).to_string();
                log::warn!("Not sending request: {}", message);
                self.state.send_modify(|state| {
                    state.error = Some(message);
                    state.is_loading = false;
                });
                return;
            }
        };
        if descriptor.url().is_empty() {
            return;
        }

        let token = CancellationToken::new();
        let origin: OriginSlot = Arc::new(Mutex::new(None));
        let coordinator = self.coordinator.clone();
        let state = self.state.clone();
        let delay = *descriptor.debounce();

        let task = if delay.is_zero() {
            // Dispatch now so cache hits and registrations are visible immediately
            let pending = match coordinator.dispatch(&descriptor, &state, &token) {
                Dispatch::Cached(_) => return,
                Dispatch::Pending(pending) => pending,
            };
            store_origin(&origin, pending.origin());

            ScheduledTask::spawn(token.clone(), {
                let origin = origin.clone();
                async move {
                    pending.settle(&state, &token).await;
                    take_origin(&origin);
                }
            })
        } else {
            log::debug!("Debouncing {} by {:?}", descriptor.url(), delay);
            ScheduledTask::spawn_after(delay, token.clone(), {
                let origin = origin.clone();
                async move {
                    if let Dispatch::Pending(pending) =
                        coordinator.dispatch(&descriptor, &state, &token)
                    {
                        if !publish_origin(coordinator.registry(), &origin, pending.origin(), &token) {
                            return;
                        }
                        pending.settle(&state, &token).await;
                        take_origin(&origin);
                    }
                }
            })
        };

        self.run = Some(Run { task, origin });
    }
}

impl Drop for FetchBinding {
    fn drop(&mut self) {
        self.close();
    }
}
