//! # pfc-raw
//!
//! Hardware register definitions for Intel architectural performance
//! monitoring counters.
//!
//! This crate provides type-safe layouts for the counter control registers,
//! bit-vector helpers used to blend reserved bits, the catalog of diagnostic
//! MSRs, and positional access to `/dev/cpu/*/msr`.
//!
//! ## Usage
//!
//! ```ignore
//! use pfc_raw::arch::perfmon::core::{msr, PerfEvtSel};
//! use pfc_raw::{MsrDevice, RegisterLayout};
//!
//! let sel = PerfEvtSel {
//!     event_select: 0x0E,
//!     umask: 0x01,
//!     usr: true,
//!     enable: true,
//!     ..Default::default()
//! };
//!
//! let dev = MsrDevice::open(0)?;
//! dev.write(msr::IA32_PERFEVTSEL0, sel.to_msr_value())?;
//! ```

pub mod arch;
pub mod msr;
pub mod register;

// Re-export for convenience
pub use arch::perfmon;
pub use msr::{MsrDevice, MsrError, Result};
pub use register::RegisterLayout;
