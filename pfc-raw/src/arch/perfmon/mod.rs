//! Intel architectural performance monitoring (ArchPerfMon v3/v4)
//!
//! ## Units
//!
//! - **Core** - fixed-function and general-purpose counters with their
//!   control, status and capability registers
//! - **Misc** - thermal, power and platform registers used for diagnostics
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B

pub mod core;
pub mod misc;
