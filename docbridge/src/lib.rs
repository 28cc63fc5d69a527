//! docbridge - document database operations on a local event bus
//!
//! Registers insert, upsert, remove, find and get processors backed by a
//! [`docstore::DocStore`] and serves them over a Unix Domain Socket.

pub mod bus;
pub mod cli;
pub mod config;
pub mod convert;
pub mod handlers;

pub use bus::{BusClient, Event, Processor, ProcessorRegistry};
pub use config::Config;
pub use handlers::register_db_processors;
