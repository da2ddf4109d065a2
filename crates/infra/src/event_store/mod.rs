//! Append-only event store boundary.
//!
//! Fee structures and invoices are persisted as tenant-scoped event streams.
//! The store makes no storage assumptions: the in-memory implementation serves
//! tests and dev, `PostgresEventStore` (feature `postgres`) serves production.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
