//! Topic-based message bus abstraction for the Emberline pipeline.
//!
//! # Delivery contract
//!
//! Every backend implementing [`Publisher`] / [`Subscriber`] must provide:
//!
//! - **Durable publish**: `publish` returns only after the backend has
//!   acknowledged the append. A successful return means the message will
//!   eventually be delivered at least once.
//! - **Consumer groups**: each partition of a topic is owned by exactly one
//!   consumer of a group at a time. Ordering is guaranteed *within* a
//!   routing key, never across keys.
//! - **Manual commit**: a delivery is only marked consumed after
//!   [`Delivery::ack`]. A delivery dropped without ack is redelivered,
//!   giving at-least-once (not exactly-once) semantics. Handlers must
//!   tolerate reprocessing.
//!
//! # Backends
//!
//! - [`MemoryBus`]: in-process backend with hashed partitions. The
//!   reference implementation of the contract and the test vehicle.
//! - [`JetStreamBus`]: production backend over NATS JetStream.

pub mod envelope;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod traits;

pub use envelope::{Envelope, MessageType};
pub use error::BusError;
pub use jetstream::JetStreamBus;
pub use memory::{MemoryBus, MemorySubscription};
pub use traits::{Acker, Delivery, Publisher, Subscriber};
