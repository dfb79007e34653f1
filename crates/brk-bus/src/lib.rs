//! Generic CQRS command/query/event bus with handler discovery and query
//! caching. See [`Bus`] for the entry point.

#![forbid(unsafe_code)]

pub mod bus;
pub mod envelope;
pub mod message;

pub use bus::Bus;
pub use envelope::Envelope;
pub use message::{Command, CommandHandler, Event, EventHandler, Query, QueryHandler};
