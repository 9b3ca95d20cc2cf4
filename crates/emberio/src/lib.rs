//! `emberio`: pooled-buffer socket plumbing for the gateway.
//!
//! This crate is the transport floor: a fixed-size receive-buffer pool, the
//! coalesced-frame splitter, and the per-connection driver (receive loop,
//! ordered writer task, idempotent teardown). Nothing here looks inside a
//! frame body; protocol meaning lives upstream in `emberproto`.

pub mod conn;
pub mod frame;
pub mod pool;
