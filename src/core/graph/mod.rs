//! Graph module for deadlock detection
//!
//! The lock order graph records which locks were acquired while which other
//! locks were held, and reports the cycles that ordering creates.

pub(crate) mod lock_order_graph;

pub use lock_order_graph::{EdgeOutcome, LockOrderGraph};
