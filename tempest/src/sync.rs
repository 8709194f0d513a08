//! Synchronization primitives for in-process communication.
//!
//! The streaming pipeline shares exactly two mutable objects between the
//! scavenger threads and the foreground: the alignment buffer and the async
//! message FIFO. The FIFO lives here; both are bounded with drop-oldest
//! semantics, preferring recency to completeness.

pub mod bounded;

pub use bounded::BoundedFifo;
