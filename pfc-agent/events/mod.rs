//! Event catalog and the configuration compiler

pub mod catalog;
pub mod parser;

pub use catalog::{Event, EventCatalog, Umask, HASWELL_EVENTS};
pub use parser::{parse_config, parse_config_with};
