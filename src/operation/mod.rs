//! # Operations
//!
//! Asynchronous capability operations follow one idiom: the start call
//! returns a [`coordinator::StartStatus`] at once, and the result arrives
//! later as a completion event on the owner's dispatcher.
//!
//! - [`slot`]: per-operation generation counters. Starting again supersedes
//!   the pending invocation; its late reply is dropped.
//! - [`coordinator`]: precondition check, start, and completion hand-off.
//! - [`bridge`]: the async seam towards native code.

pub mod bridge;
pub mod coordinator;
pub mod slot;
