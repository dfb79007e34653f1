//! Request/Machine aggregates: state machines, invariants, domain events,
//! and the repository port contract (spec §4.3).
//!
//! This crate knows nothing about providers, handlers, or wire formats —
//! it is the stable core every other crate builds on.

#![forbid(unsafe_code)]

pub mod error;
pub mod events;
pub mod machine;
pub mod repository;
pub mod request;

pub use error::{BrokerError, BrokerResult};
pub use events::{DomainEvent, EventPublisher, NullPublisher};
pub use repository::{MachineRepository, PageRequest, RequestFilter, RequestRepository};
