//! Communication primitives used by the registry and the services:
//! heap-backed frame rings and the reusable one-shot completion that backs
//! the synchronous request/reply path.

pub mod fifo;
pub mod rosc;
