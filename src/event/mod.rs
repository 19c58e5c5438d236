//! # Event Notification
//!
//! Every capability object embeds one [`dispatcher::Dispatcher`]. Application
//! code registers [`dispatcher::Listener`]s on it; the capability (usually via
//! the operation coordinator) builds [`event_bus::Event`]s and dispatches them
//! synchronously to the listeners registered for the event's type.
//!
//! ```text
//! ┌──────────────┐ register  ┌────────────┐ dispatch ┌──────────┐
//! │ Application  │──────────▶│ Dispatcher │─────────▶│ Listener │
//! └──────────────┘           └─────┬──────┘          └──────────┘
//!                                  │ tap (broadcast)
//!                            ┌─────▼──────┐
//!                            │  EventBus  │──▶ EventReceiver / ErrorReceiver
//!                            └────────────┘
//! ```
//!
//! - [`event_registry`]: case-insensitive [`event_registry::EventType`] tags
//!   and the per-capability catalogue of declared payloads.
//! - [`event_bus`]: the immutable [`event_bus::Event`] value, completion
//!   payload helpers, and the broadcast tap.
//! - [`dispatcher`]: listener registration and delivery.
//!
//! ## Example
//!
//! ```rust
//! use capkit::dispatcher::{Dispatcher, Listener};
//! use capkit::event_bus::{Event, OriginId};
//!
//! let dispatcher = Dispatcher::new(OriginId::new(), 16);
//! let listener = Listener::infallible(|event| {
//!     println!("got {}", event.event_type());
//! });
//! dispatcher.register("PresenceChanged", &listener, None);
//!
//! let event = Event::new("PresenceChanged", dispatcher.origin());
//! assert!(dispatcher.dispatch(&event));
//! ```

pub mod dispatcher;
pub mod event_bus;
pub mod event_registry;
