use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::Arc,
};

use super::event_bus::{keys, EventError, EventResult, Value};

/// Event type tag.
///
/// Tags compare and hash case-insensitively (`"LoginComplete"` and
/// `"logincomplete"` name the same event) while keeping the spelling they
/// were created with for display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A tag with no characters is malformed and never dispatched.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl PartialEq for EventType {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for EventType {}

impl Hash for EventType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl From<&str> for EventType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl From<&EventType> for EventType {
    fn from(event_type: &EventType) -> Self {
        event_type.clone()
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tags emitted by the core itself.
pub mod builtin {
    pub const CAPABILITY_CONSTRUCTED: &str = "CapabilityConstructed";
    pub const CAPABILITY_SHUTDOWN: &str = "CapabilityShutdown";
}

/// Declared shape of one event type's payload.
#[derive(Clone, Debug)]
pub struct EventInfo {
    pub event_type: EventType,
    pub parameters: HashMap<String, ParameterType>,
}

impl EventInfo {
    pub fn new(event_type: impl Into<EventType>) -> Self {
        Self {
            event_type: event_type.into(),
            parameters: HashMap::new(),
        }
    }

    pub fn parameter(mut self, name: &str, parameter_type: ParameterType) -> Self {
        self.parameters.insert(name.to_string(), parameter_type);
        self
    }
}

#[derive(Clone, Debug, PartialEq, strum::Display)]
pub enum ParameterType {
    String,
    Int,
    Float,
    Boolean,
    Duration,
    Any,
    List(Box<ParameterType>),
    Map(Box<ParameterType>),
}

impl ParameterType {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (ParameterType::Any, _) => true,
            (ParameterType::String, Value::String(_)) => true,
            (ParameterType::Int, Value::Integer(_)) => true,
            (ParameterType::Float, Value::Float(_) | Value::Integer(_)) => true,
            (ParameterType::Boolean, Value::Boolean(_)) => true,
            (ParameterType::Duration, Value::Duration(_)) => true,
            (ParameterType::List(inner), Value::List(items)) => {
                items.iter().all(|item| inner.accepts(item))
            }
            (ParameterType::Map(inner), Value::Map(entries)) => {
                entries.values().all(|item| inner.accepts(item))
            }
            _ => false,
        }
    }
}

/// Catalogue of the event types a capability emits.
#[derive(Debug, Default, Clone)]
pub struct EventRegistry {
    events: Arc<DashMap<EventType, EventInfo>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_event(&self, event_info: EventInfo) -> EventResult<()> {
        if event_info.event_type.is_empty() {
            return Err(EventError::MalformedType);
        }
        match self.events.entry(event_info.event_type.clone()) {
            Entry::Occupied(_) => Err(EventError::AlreadyRegistered {
                event_type: event_info.event_type.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(event_info);
                Ok(())
            }
        }
    }

    pub fn get_event_info(&self, event_type: &EventType) -> Option<EventInfo> {
        self.events.get(event_type).map(|info| info.clone())
    }

    pub fn contains_event(&self, event_type: &EventType) -> bool {
        self.events.contains_key(event_type)
    }

    /// Checks a success payload against the declared parameters.
    ///
    /// Every declared parameter must be present with an accepted type.
    /// Completion bookkeeping keys and undeclared extras are not checked.
    /// Undeclared event types pass unchecked.
    pub fn validate_parameters(
        &self,
        event_type: &EventType,
        parameters: &HashMap<String, Value>,
    ) -> EventResult<()> {
        let Some(event_info) = self.get_event_info(event_type) else {
            return Ok(());
        };

        for (name, expected) in event_info.parameters.iter() {
            if keys::is_reserved(name) {
                continue;
            }
            let got = parameters
                .get(name)
                .ok_or_else(|| EventError::ParameterMissing {
                    event_type: event_type.to_string(),
                    parameter: name.clone(),
                })?;
            if !expected.accepts(got) {
                return Err(EventError::TypeMismatch {
                    event_type: event_type.to_string(),
                    expected: expected.to_string(),
                    got: got.type_name().to_string(),
                });
            }
        }

        Ok(())
    }
}
