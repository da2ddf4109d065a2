//! Infrastructure layer: event store, dispatcher, projections and the billing
//! engine services built on them.

pub mod command_dispatcher;
pub mod config;
pub mod directory;
pub mod engine;
pub mod event_store;
pub mod locks;
pub mod numbering;
pub mod projections;
pub mod read_model;
pub mod services;

pub use config::BillingConfig;
pub use engine::{BillingContext, BillingEngine, BillingError, BillingResult, InMemoryBillingEngine};
