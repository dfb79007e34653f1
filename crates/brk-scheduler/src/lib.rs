//! Output adapters translating internal domain shape to a caller's
//! expected wire shape, with no change in semantics (spec §4.5).

#![forbid(unsafe_code)]

pub mod field_map;
pub mod strategy;

pub use field_map::FieldMap;
pub use strategy::SchedulerStrategy;
