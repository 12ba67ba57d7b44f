// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod backend;
pub mod common;
pub mod config;
pub mod counters;
pub mod error;
pub mod events;
pub mod sampling;
pub mod session;

pub use config::SessionConfig;
pub use error::{error_string, ErrorCode, PfcError, Result};
pub use events::{parse_config, EventCatalog};
pub use sampling::{SampleBuffer, SampleMasks};
pub use session::Pfc;
