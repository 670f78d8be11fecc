// Emberline - multi-brand dating platform backend
//
// This crate implements the asynchronous interaction-event pipeline:
// ingest of swipe actions, durable append-only recording, mutual-match
// detection, and correlated aggregation queries answered over the bus.
//
// The HTTP surface, photo pipeline and brand-extension storage are
// separate services; this crate only consumes a profile lookup from them.

pub mod config;
pub mod domains;
pub mod kernel;

pub use config::*;
