//! Reference capabilities built on the event core.
//!
//! Both call into native code through a [`NativeBridge`](crate::bridge::NativeBridge)
//! and report results as completion events on their own dispatcher.

pub mod account;
pub mod storage;

pub use account::AccountCapability;
pub use storage::StorageCapability;
