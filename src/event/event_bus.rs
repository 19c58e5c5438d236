//! # Events and the Event Tap
//!
//! [`Event`] is the immutable notification value every capability emits. Its
//! payload is a flat parameter map; completion events produced by the
//! operation coordinator additionally carry the bookkeeping keys listed in
//! [`keys`].
//!
//! [`EventBus`] is a broadcast tap owned by each dispatcher. Listeners
//! registered on the dispatcher are the primary delivery path; the tap lets
//! async code observe dispatched events and listener failures without
//! registering a callback.

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::timestamp::Timestamp;

use super::event_registry::EventType;

/// Non-owning handle naming the capability object that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(Uuid);

impl OriginId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OriginId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OriginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parameter keys written by the operation coordinator on completion events.
pub mod keys {
    pub const OPERATION: &str = "operation";
    pub const GENERATION: &str = "generation";
    pub const SUCCESS: &str = "success";
    pub const ERROR_CODE: &str = "error_code";
    pub const ERROR: &str = "error";

    pub fn is_reserved(key: &str) -> bool {
        matches!(
            key,
            OPERATION | GENERATION | SUCCESS | ERROR_CODE | ERROR
        )
    }
}

/// # Event
///
/// An immutable notification: type tag, origin, creation time and payload.
/// Fields are read through accessors; cloning yields an identical event.
///
/// ```rust
/// # use capkit::event_bus::{Event, OriginId, Value};
/// let origin = OriginId::new();
/// let event = Event::new("PresenceChanged", origin)
///     .with_parameter("online", Value::Boolean(true));
/// assert_eq!(event.origin(), origin);
/// assert_eq!(event.get("online"), Some(&Value::Boolean(true)));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: EventType,
    origin: OriginId,
    timestamp: Timestamp,
    parameters: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<EventType>, origin: OriginId) -> Self {
        Self {
            event_type: event_type.into(),
            origin,
            timestamp: Timestamp::now(),
            parameters: HashMap::new(),
        }
    }

    /// Builder-style payload setter, only usable before the event is shared.
    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn completion_builder() -> CompletionBuilder {
        CompletionBuilder::new()
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn parameters(&self) -> &HashMap<String, Value> {
        &self.parameters
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn is_completion(&self) -> bool {
        self.parameters.contains_key(keys::SUCCESS)
    }

    /// `None` for events that are not operation completions.
    pub fn is_success(&self) -> Option<bool> {
        match self.parameters.get(keys::SUCCESS) {
            Some(Value::Boolean(success)) => Some(*success),
            _ => None,
        }
    }

    pub fn operation(&self) -> Option<&str> {
        match self.parameters.get(keys::OPERATION) {
            Some(Value::String(operation)) => Some(operation),
            _ => None,
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self.parameters.get(keys::GENERATION) {
            Some(Value::Integer(generation)) => u64::try_from(*generation).ok(),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<i64> {
        match self.parameters.get(keys::ERROR_CODE) {
            Some(Value::Integer(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self.parameters.get(keys::ERROR) {
            Some(Value::String(message)) => Some(message),
            _ => None,
        }
    }
}

/// Builds the success or failure event that closes one operation generation.
#[derive(Default)]
pub struct CompletionBuilder {
    is_success: Option<bool>,
    event_type: Option<EventType>,
    origin: Option<OriginId>,
    operation: Option<String>,
    generation: Option<u64>,
    error_code: Option<i64>,
    error: Option<String>,
    parameters: HashMap<String, Value>,
}

impl CompletionBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn success(mut self) -> Self {
        self.is_success = Some(true);
        self
    }

    pub fn failure(mut self) -> Self {
        self.is_success = Some(false);
        self
    }

    pub fn event_type(mut self, event_type: &EventType) -> Self {
        self.event_type = Some(event_type.clone());
        self
    }

    pub fn origin(mut self, origin: OriginId) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    pub fn error_code(mut self, code: i64) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn parameters(mut self, parameters: HashMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn build(self) -> EventResult<Event> {
        let is_success = self.is_success.ok_or(EventError::CompletionBuilderFailed(
            "success or failure is required".to_string(),
        ))?;
        let event_type = self
            .event_type
            .filter(|event_type| !event_type.is_empty())
            .ok_or(EventError::CompletionBuilderFailed(
                "event_type is required".to_string(),
            ))?;
        let origin = self.origin.ok_or(EventError::CompletionBuilderFailed(
            "origin is required".to_string(),
        ))?;
        let operation = self.operation.ok_or(EventError::CompletionBuilderFailed(
            "operation is required".to_string(),
        ))?;
        let generation = self.generation.ok_or(EventError::CompletionBuilderFailed(
            "generation is required".to_string(),
        ))?;

        let mut parameters = self.parameters;
        parameters.insert(keys::OPERATION.to_string(), Value::String(operation));
        parameters.insert(
            keys::GENERATION.to_string(),
            Value::Integer(i64::try_from(generation).unwrap_or(i64::MAX)),
        );
        parameters.insert(keys::SUCCESS.to_string(), Value::Boolean(is_success));

        if !is_success {
            let code = self.error_code.ok_or(EventError::CompletionBuilderFailed(
                "error_code is required for failures".to_string(),
            ))?;
            parameters.insert(keys::ERROR_CODE.to_string(), Value::Integer(code));
            if let Some(error) = self.error {
                parameters.insert(keys::ERROR.to_string(), Value::String(error));
            }
        }

        Ok(Event {
            event_type,
            origin,
            timestamp: Timestamp::now(),
            parameters,
        })
    }
}

/// Report of a listener that failed during a dispatch pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
    pub error_type: String,
    pub message: String,
    pub severity: ErrorSeverity,
    pub origin: OriginId,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Default, strum::Display)]
pub enum ErrorSeverity {
    #[default]
    Warning, // listener returned an error
    Error, // listener panicked
}

// 値の型
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    Duration(Duration),
    Map(HashMap<String, Value>),
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Boolean(_) => "Boolean",
            Value::List(_) => "List",
            Value::Duration(_) => "Duration",
            Value::Map(_) => "Map",
            Value::Null => "Null",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl<T: Into<String>> From<T> for Value
where
    T: AsRef<str>,
{
    fn from(value: T) -> Self {
        Value::String(value.into())
    }
}

/// # EventBus
///
/// Broadcast tap for dispatched events and listener failures.
///
/// Two internal receivers keep both channels open, so publishing never fails
/// for lack of subscribers; a subscriber that falls more than `capacity`
/// events behind observes [`EventError::Lagged`].
pub struct EventBus {
    event_sender: broadcast::Sender<Event>,
    error_sender: broadcast::Sender<ErrorEvent>,
    _internal_receiver: broadcast::Receiver<Event>,
    _internal_error_receiver: broadcast::Receiver<ErrorEvent>,
}

impl EventBus {
    /// Creates a tap buffering up to `capacity` events per channel.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero, as `tokio::sync::broadcast` does.
    pub fn new(capacity: usize) -> Self {
        let (event_sender, event_receiver) = broadcast::channel(capacity);
        let (error_sender, error_receiver) = broadcast::channel(capacity);
        Self {
            event_sender,
            error_sender,
            _internal_receiver: event_receiver,
            _internal_error_receiver: error_receiver,
        }
    }

    pub fn subscribe(&self) -> (EventReceiver, ErrorReceiver) {
        let event_rx = self.event_sender.subscribe();
        let error_rx = self.error_sender.subscribe();
        (EventReceiver::new(event_rx), ErrorReceiver::new(error_rx))
    }

    pub fn publish(&self, event: Event) -> EventResult<()> {
        debug_event("Tap", &event);
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn publish_error(&self, error: ErrorEvent) -> EventResult<()> {
        self.error_sender
            .send(error)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }

    pub fn subscribers_size(&self) -> usize {
        // internal receiver excluded
        self.event_sender.receiver_count().saturating_sub(1)
    }
}

pub fn debug_event(prefix: &str, event: &Event) {
    if event.is_completion() {
        debug!("{} Event: {:?}", prefix, event);
    } else {
        trace!("{} Event: {:?}", prefix, event);
    }
}

pub struct EventReceiver {
    pub receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    pub fn new(receiver: broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Receives the next event. On lag the receiver skips to the newest
    /// events and the skipped count is returned as an error.
    pub async fn recv(&mut self) -> EventResult<Event> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }

    /// Waits for the next event of `event_type`, skipping everything else.
    pub async fn recv_type(&mut self, event_type: &EventType) -> EventResult<Event> {
        loop {
            let event = self.recv().await?;
            if event.event_type() == event_type {
                return Ok(event);
            }
        }
    }
}

pub struct ErrorReceiver {
    pub receiver: broadcast::Receiver<ErrorEvent>,
}

impl ErrorReceiver {
    fn new(receiver: broadcast::Receiver<ErrorEvent>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> EventResult<ErrorEvent> {
        self.receiver
            .recv()
            .await
            .map_err(|e| EventError::ReceiveFailed {
                message: e.to_string(),
            })
    }
}

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event type is missing or empty")]
    MalformedType,

    #[error("Event parameter missing: {event_type}.{parameter}")]
    ParameterMissing {
        event_type: String,
        parameter: String,
    },

    #[error("Event parameter type mismatch: {event_type}, expected {expected}, got {got}")]
    TypeMismatch {
        event_type: String,
        expected: String,
        got: String,
    },

    #[error("Event Send failed: {message}")]
    SendFailed { message: String },

    #[error("Event Receive failed: {message}")]
    ReceiveFailed { message: String },

    #[error("Event lagged: {count}")]
    Lagged { count: u64 },

    #[error("Event already registered: {event_type}")]
    AlreadyRegistered { event_type: String },

    #[error("completion builder failed: {0}")]
    CompletionBuilderFailed(String),
}

pub type EventResult<T> = Result<T, EventError>;
