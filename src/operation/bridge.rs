use std::collections::HashMap;

use async_trait::async_trait;

use crate::event_bus::Value;

use super::coordinator::Outcome;

/// Async entry point into the native/platform layer.
///
/// `call` runs on a tokio task spawned by
/// [`OperationCoordinator::start_native`](super::coordinator::OperationCoordinator::start_native);
/// its result becomes the completion event of the generation that started it,
/// unless a newer generation has superseded it by then.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NativeBridge: Send + Sync {
    /// Checked synchronously before a call is issued. An unavailable bridge
    /// makes the start fail with `StartFailed`.
    fn is_available(&self) -> bool {
        true
    }

    async fn call(&self, operation: &str, args: HashMap<String, Value>) -> Outcome;
}
