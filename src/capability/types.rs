use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::PlatformConfig,
    coordinator::OperationCoordinator,
    dispatcher::{Dispatcher, Listener, ListenerScope},
    event_bus::{ErrorReceiver, Event, EventError, EventReceiver, EventResult, OriginId},
    event_registry::{EventInfo, EventRegistry, EventType},
    slot::{OperationSlot, OperationTable},
};

/// Identifier of a capability class, e.g. `"account"` or `"storage"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityId(String);

impl CapabilityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CapabilityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<&CapabilityId> for CapabilityId {
    fn from(id: &CapabilityId) -> Self {
        id.clone()
    }
}

impl std::fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State every capability object embeds: its dispatcher, its operation slots
/// and the catalogue of events it emits.
///
/// The slot table is only reachable through the coordinator; outside the
/// crate it can be inspected but not changed.
#[derive(Debug)]
pub struct CapabilityCore {
    id: CapabilityId,
    dispatcher: Dispatcher,
    operations: OperationTable,
    events: EventRegistry,
}

impl CapabilityCore {
    pub fn new(id: impl Into<CapabilityId>, tap_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            dispatcher: Dispatcher::new(OriginId::new(), tap_capacity),
            operations: OperationTable::new(),
            events: EventRegistry::new(),
        })
    }

    pub fn id(&self) -> &CapabilityId {
        &self.id
    }

    pub fn origin(&self) -> OriginId {
        self.dispatcher.origin()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    pub fn declare_event(&self, event_info: EventInfo) -> EventResult<()> {
        self.events.register_event(event_info)
    }

    pub fn operation_slot(&self, operation: &str) -> Option<OperationSlot> {
        self.operations.slot(operation)
    }

    pub fn is_pending(&self, operation: &str) -> bool {
        self.operations
            .pending_operations()
            .iter()
            .any(|pending| pending == operation)
    }

    pub(crate) fn operations(&self) -> &OperationTable {
        &self.operations
    }
}

/// A capability object: owns a [`CapabilityCore`] and exposes the listener
/// surface shared by every capability class.
pub trait Capability: Send + Sync + 'static {
    fn core(&self) -> &Arc<CapabilityCore>;

    fn capability_id(&self) -> &CapabilityId {
        self.core().id()
    }

    fn register(&self, event_type: &str, listener: &Listener, scope: Option<ListenerScope>) {
        self.core().dispatcher().register(event_type, listener, scope)
    }

    fn unregister(&self, event_type: &str, listener: &Listener, scope: Option<ListenerScope>) {
        self.core()
            .dispatcher()
            .unregister(event_type, listener, scope)
    }

    fn unregister_all(&self) {
        self.core().dispatcher().unregister_all()
    }

    fn has_listener(&self, event_type: &str) -> bool {
        self.core()
            .dispatcher()
            .has_listener(&EventType::from(event_type))
    }

    fn dispatch(&self, event: &Event) -> bool {
        self.core().dispatcher().dispatch(event)
    }

    fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        self.core().dispatcher().subscribe()
    }
}

/// What a capability factory gets to build its instance.
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    config: Arc<PlatformConfig>,
    coordinator: Arc<OperationCoordinator>,
}

impl CapabilityContext {
    pub fn new(config: Arc<PlatformConfig>, coordinator: Arc<OperationCoordinator>) -> Self {
        Self {
            config,
            coordinator,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn coordinator(&self) -> Arc<OperationCoordinator> {
        self.coordinator.clone()
    }

    pub fn new_core(&self, id: impl Into<CapabilityId>) -> Arc<CapabilityCore> {
        CapabilityCore::new(id, self.config.event_buffer_size)
    }
}

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability not found: {0}")]
    NotFound(CapabilityId),
    #[error("Capability already registered: {0}")]
    AlreadyRegistered(CapabilityId),
    #[error("Capability not supported on this platform: {0}")]
    Unsupported(CapabilityId),
    #[error("Capability {0} is not of the requested type")]
    TypeMismatch(CapabilityId),
    #[error("Invalid argument for {operation}: {message}")]
    InvalidArgument { operation: String, message: String },
    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

impl CapabilityError {
    pub fn invalid_argument(operation: &str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;
