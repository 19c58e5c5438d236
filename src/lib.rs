//! # capkit: capability event core
//!
//! Platform capabilities (accounts, storage, sensors, ...) expose their
//! asynchronous results as events. This crate is the shared core they build
//! on.
//!
//! ## Layers
//!
//! - Event notification ([`event`]): immutable events, per-capability
//!   dispatchers with listener registration, and a broadcast tap for
//!   observers.
//! - Operations ([`operation`]): start an operation, get a status back at
//!   once, receive the result later as a completion event. Restarting an
//!   operation supersedes the pending one.
//! - Capabilities ([`capability`]): the [`capability::types::Capability`]
//!   trait and the registry that holds exactly one instance per capability
//!   class.
//! - Platform context ([`system`]): config, coordinator and registry wired
//!   together, with the reference capabilities in [`capabilities`].
//!
//! ```text
//! Application ──start──▶ Capability ──▶ OperationCoordinator ──▶ NativeBridge
//!      ▲                                        │                     │
//!      └──────── Listener ◀── Dispatcher ◀──────┴── completion ◀──────┘
//! ```

pub mod capabilities;
pub mod capability;
pub mod config;
pub mod error;
pub mod event;
pub mod operation;
pub mod system;
pub mod timestamp;

// Re-exports
pub use capability::*;
pub use error::*;
pub use event::*;
pub use operation::*;
