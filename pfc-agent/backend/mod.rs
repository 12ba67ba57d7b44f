//! Counter backends
//!
//! Everything above this module talks to the performance-monitoring unit
//! through two seams: [`RegisterAccess`] for MSR reads and writes (used only
//! by the register broker and the diagnostic file) and [`Sample`] for the
//! START/END fast-read sequences.

#[cfg(target_arch = "x86_64")]
pub mod hardware;
pub mod simulated;

#[cfg(target_arch = "x86_64")]
pub use hardware::HardwarePmu;
pub use simulated::{SimulatedPmu, SimulatedPmuBuilder};

use crate::error::Result;
use crate::sampling::SampleBuffer;

/// Raw access to the model-specific registers of one core
pub trait RegisterAccess {
    fn read_msr(&self, msr: u32) -> Result<u64>;

    fn write_msr(&self, msr: u32, value: u64) -> Result<()>;

    /// Whether user-space RDPMC is unconditionally enabled
    fn fast_read_enabled(&self) -> Result<bool>;
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    fn read_msr(&self, msr: u32) -> Result<u64> {
        (**self).read_msr(msr)
    }

    fn write_msr(&self, msr: u32, value: u64) -> Result<()> {
        (**self).write_msr(msr, value)
    }

    fn fast_read_enabled(&self) -> Result<bool> {
        (**self).fast_read_enabled()
    }
}

/// The START/END sampling sequences
///
/// `start` subtracts the current value of every sample slot from the buffer,
/// `end` adds it. A START/END pair around a region therefore leaves the
/// per-slot delta in the buffer, and repeated pairs accumulate.
pub trait Sample {
    fn start(&self, buf: &mut SampleBuffer);

    fn end(&self, buf: &mut SampleBuffer);
}

impl<T: Sample + ?Sized> Sample for &T {
    fn start(&self, buf: &mut SampleBuffer) {
        (**self).start(buf)
    }

    fn end(&self, buf: &mut SampleBuffer) {
        (**self).end(buf)
    }
}
