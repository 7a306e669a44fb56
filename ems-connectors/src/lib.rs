//! External collaborator ports for the EMS core.
//!
//! The pipeline talks to a message bus, a key-value store, and an
//! append-only document store. Each is expressed as a trait plus a
//! reference in-process implementation; a Kafka-backed bus producer is
//! available behind the `kafka` feature.

pub mod bus;
pub mod clock;
pub mod document;
pub mod error;
pub mod kv;

#[cfg(feature = "kafka")]
pub mod kafka;

pub use bus::{BusMessage, BusProducer, InMemoryBus};
pub use clock::{Clock, ManualClock, SysClock};
pub use document::{DocumentStore, MemoryDocumentStore, SledDocumentStore};
pub use error::{ConnectorError, ConnectorResult};
pub use kv::{KvStore, MemoryKvStore};
