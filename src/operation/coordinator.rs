//! # Operation Coordinator
//!
//! Turns a native call plus a later completion signal into the
//! call-returns-status, result-arrives-as-event idiom, with single-flight
//! semantics per (owner, operation name).
//!
//! ```text
//!  start(op) ──▶ precondition ──▶ slot.advance() = g ──▶ native_invoke(handle g)
//!     │              │ no listener                             │
//!     │              ▼                                         ▼ later, any thread
//!     │      PreconditionFailed                       handle.complete(outcome)
//!     ▼                                                        │
//!  Accepted / StartFailed                      g current? ──no──▶ discard
//!                                                  │ yes
//!                                                  ▼
//!                                      dispatcher.dispatch(completion event)
//! ```
//!
//! Completion events for one owner arrive in the order their native replies
//! do, not the order operations were started.
//!
//! Superseding only suppresses the stale reply. The native work of the
//! superseded generation keeps running; native code may poll
//! [`CompletionHandle::is_current`] to stop early.

use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
    time::Duration,
};

use futures::FutureExt;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, error, instrument, warn};

use crate::{
    capability::types::CapabilityCore,
    config::PlatformConfig,
    event_bus::{Event, Value},
    event_registry::EventType,
};

use super::{
    bridge::NativeBridge,
    slot::{Generation, Settle},
};

/// Synchronous answer to a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum StartStatus {
    /// The native layer took the call; the result will arrive as an event.
    Accepted,
    /// The native layer refused to begin.
    StartFailed,
    /// No listener is registered for the completion event.
    PreconditionFailed,
}

impl StartStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StartStatus::Accepted)
    }
}

/// Synchronous accept/reject signal from a native thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeAck {
    Accepted,
    Rejected,
}

/// Final result of a native operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(HashMap<String, Value>),
    Failure(OperationFailure),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success(HashMap::new())
    }

    pub fn success_with(key: &str, value: Value) -> Self {
        let mut parameters = HashMap::new();
        parameters.insert(key.to_string(), value);
        Outcome::Success(parameters)
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self {
        Outcome::Failure(OperationFailure::new(code, message))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("operation failed ({code}): {message}")]
pub struct OperationFailure {
    pub code: i64,
    pub message: String,
}

impl OperationFailure {
    /// No reply within the configured operation timeout.
    pub const TIMEOUT: i64 = -1;
    /// The success payload did not match the declared event parameters.
    pub const INVALID_PAYLOAD: i64 = -2;
    /// The native bridge panicked while running the call.
    pub const BRIDGE_PANICKED: i64 = -3;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self::new(
            Self::TIMEOUT,
            format!("no reply within {}ms", limit.as_millis()),
        )
    }
}

/// Completion token for one generation of one operation.
///
/// Holds only a weak reference to its owner: if the capability is dropped
/// before the reply arrives, completing is a no-op.
#[derive(Debug)]
pub struct CompletionHandle {
    owner: Weak<CapabilityCore>,
    operation: String,
    generation: Generation,
}

impl CompletionHandle {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// False once a newer invocation superseded this one, it was settled,
    /// or the owner is gone.
    pub fn is_current(&self) -> bool {
        self.owner.upgrade().is_some_and(|owner| {
            owner
                .operations()
                .is_current(&self.operation, self.generation)
        })
    }

    /// Delivers the outcome. Returns true if a completion event reached at
    /// least one listener.
    pub fn complete(self, outcome: Outcome) -> bool {
        match self.owner.upgrade() {
            Some(owner) => {
                OperationCoordinator::complete(&owner, &self.operation, self.generation, outcome)
            }
            None => {
                debug!(operation = %self.operation, "owner dropped before completion");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationCoordinator {
    operation_timeout: Option<Duration>,
}

impl OperationCoordinator {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn with_timeout(operation_timeout: Option<Duration>) -> Self {
        Self { operation_timeout }
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// An operation may only start while someone listens for its completion.
    /// An empty completion type never has a listener.
    pub fn check_precondition(owner: &CapabilityCore, completion_type: &EventType) -> bool {
        !completion_type.is_empty() && owner.dispatcher().has_listener(completion_type)
    }

    /// Starts `operation` on `owner`, superseding any pending invocation.
    ///
    /// `native_invoke` receives the completion handle of the new generation
    /// and must answer synchronously whether the native layer accepted the
    /// call. It may complete the handle before returning; the completion event
    /// is then dispatched before `start` returns.
    ///
    /// On `StartFailed` the slot stays pending at the new generation, so a
    /// late reply to any older generation is still discarded.
    pub fn start<F>(
        &self,
        owner: &Arc<CapabilityCore>,
        operation: &str,
        completion_type: impl Into<EventType>,
        native_invoke: F,
    ) -> StartStatus
    where
        F: FnOnce(CompletionHandle) -> NativeAck,
    {
        let completion_type = completion_type.into();
        if !Self::check_precondition(owner, &completion_type) {
            debug!(
                capability = %owner.id(),
                operation,
                %completion_type,
                "start refused: no completion listener"
            );
            return StartStatus::PreconditionFailed;
        }

        let generation = owner.operations().advance(operation, &completion_type);
        let handle = CompletionHandle {
            owner: Arc::downgrade(owner),
            operation: operation.to_string(),
            generation,
        };

        match native_invoke(handle) {
            NativeAck::Accepted => {
                debug!(capability = %owner.id(), operation, %generation, "operation accepted");
                StartStatus::Accepted
            }
            NativeAck::Rejected => {
                warn!(capability = %owner.id(), operation, %generation, "native layer rejected start");
                StartStatus::StartFailed
            }
        }
    }

    /// Starts `operation` through an async [`NativeBridge`] on the current
    /// tokio runtime.
    ///
    /// Fails to start when called outside a runtime or when the bridge reports
    /// itself unavailable. With an operation timeout configured, a call that
    /// outlives it completes with [`OperationFailure::TIMEOUT`].
    pub fn start_native(
        &self,
        owner: &Arc<CapabilityCore>,
        operation: &str,
        completion_type: impl Into<EventType>,
        bridge: Arc<dyn NativeBridge>,
        args: HashMap<String, Value>,
    ) -> StartStatus {
        let timeout = self.operation_timeout;
        self.start(owner, operation, completion_type, move |handle| {
            let Ok(runtime) = Handle::try_current() else {
                warn!(operation = handle.operation(), "no async runtime for native call");
                return NativeAck::Rejected;
            };
            if !bridge.is_available() {
                return NativeAck::Rejected;
            }
            runtime.spawn(run_native_call(handle, bridge, args, timeout));
            NativeAck::Accepted
        })
    }

    /// Settles `generation` of `operation` and dispatches its completion event.
    ///
    /// Stale generations and repeated completions of the same generation are
    /// discarded without notifying anyone. Returns true if the completion
    /// event reached at least one listener.
    #[instrument(level = "debug", skip(owner, outcome), fields(capability = %owner.id()))]
    pub fn complete(
        owner: &CapabilityCore,
        operation: &str,
        generation: Generation,
        outcome: Outcome,
    ) -> bool {
        let completion_type = match owner.operations().settle(operation, generation) {
            Settle::Settled { completion_type } => completion_type,
            Settle::Superseded { current } => {
                debug!(%current, "discarding superseded reply");
                return false;
            }
            Settle::AlreadySettled => {
                debug!("ignoring repeated completion");
                return false;
            }
            Settle::Unknown => {
                warn!("completion for an operation that was never started");
                return false;
            }
        };

        let outcome = match outcome {
            Outcome::Success(parameters) => {
                match owner
                    .events()
                    .validate_parameters(&completion_type, &parameters)
                {
                    Ok(()) => Outcome::Success(parameters),
                    Err(e) => {
                        warn!(%completion_type, "invalid completion payload: {}", e);
                        Outcome::Failure(OperationFailure::new(
                            OperationFailure::INVALID_PAYLOAD,
                            e.to_string(),
                        ))
                    }
                }
            }
            failure => failure,
        };

        let builder = Event::completion_builder()
            .event_type(&completion_type)
            .origin(owner.origin())
            .operation(operation)
            .generation(generation.value());
        let built = match outcome {
            Outcome::Success(parameters) => builder.success().parameters(parameters).build(),
            Outcome::Failure(failure) => builder
                .failure()
                .error_code(failure.code)
                .error(&failure.message)
                .build(),
        };

        match built {
            Ok(event) => owner.dispatcher().dispatch(&event),
            Err(e) => {
                error!("failed to build completion event: {}", e);
                false
            }
        }
    }
}

async fn run_native_call(
    handle: CompletionHandle,
    bridge: Arc<dyn NativeBridge>,
    args: HashMap<String, Value>,
    timeout: Option<Duration>,
) {
    let operation = handle.operation().to_string();
    let call = AssertUnwindSafe(bridge.call(&operation, args)).catch_unwind();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Ok(Outcome::Failure(OperationFailure::timeout(limit))),
        },
        None => call.await,
    };
    let outcome = result.unwrap_or_else(|_| {
        error!(operation = %operation, "native bridge panicked");
        Outcome::failure(OperationFailure::BRIDGE_PANICKED, "native bridge panicked")
    });
    handle.complete(outcome);
}
