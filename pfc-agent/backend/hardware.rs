//! The real performance-monitoring unit of one core
//!
//! Register access goes through the `msr` driver's device file; counter reads
//! use RDPMC directly from user space.

use std::fs;
use std::path::{Path, PathBuf};

use pfc_raw::MsrDevice;

use crate::backend::{RegisterAccess, Sample};
use crate::config::SessionConfig;
use crate::error::{PfcError, Result};
use crate::sampling::SampleBuffer;

/// Content of the rdpmc control file meaning "always allowed"
const RDPMC_ALWAYS_ENABLED: &str = "2";

pmc_sequence! {
    /// Subtract the current value of every sample slot
    fn pmc_start => "sub"
}

pmc_sequence! {
    /// Add the current value of every sample slot
    fn pmc_end => "add"
}

pub struct HardwarePmu {
    msr: MsrDevice,
    rdpmc_control: PathBuf,
}

impl HardwarePmu {
    /// Open the MSR device of `config.core`
    ///
    /// Fails with [`PfcError::ServiceUnavailable`] when the `msr` driver is
    /// not loaded or the caller lacks the privilege to open it.
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let msr = MsrDevice::open_path(config.core as u32, &config.msr_device)?;
        tracing::info!(
            "Opened {} for core {}",
            config.msr_device.display(),
            config.core
        );

        Ok(Self {
            msr,
            rdpmc_control: config.rdpmc_control.clone(),
        })
    }

    pub fn cpu(&self) -> u32 {
        self.msr.cpu()
    }

    pub fn rdpmc_control(&self) -> &Path {
        &self.rdpmc_control
    }
}

impl RegisterAccess for HardwarePmu {
    fn read_msr(&self, msr: u32) -> Result<u64> {
        let value = self.msr.read(msr)?;
        tracing::trace!("MSR read: CPU {} MSR 0x{:08x} = 0x{:016x}", self.cpu(), msr, value);
        Ok(value)
    }

    fn write_msr(&self, msr: u32, value: u64) -> Result<()> {
        self.msr.write(msr, value)?;
        tracing::trace!("MSR write: CPU {} MSR 0x{:08x} = 0x{:016x}", self.cpu(), msr, value);
        Ok(())
    }

    fn fast_read_enabled(&self) -> Result<bool> {
        let content = fs::read_to_string(&self.rdpmc_control).map_err(|e| {
            PfcError::FastReadPathDisabled(format!("{}: {e}", self.rdpmc_control.display()))
        })?;
        Ok(content.trim() == RDPMC_ALWAYS_ENABLED)
    }
}

impl Sample for HardwarePmu {
    #[inline(always)]
    fn start(&self, buf: &mut SampleBuffer) {
        pmc_start(buf);
    }

    #[inline(always)]
    fn end(&self, buf: &mut SampleBuffer) {
        pmc_end(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_without_driver() {
        let config = SessionConfig {
            msr_device: PathBuf::from("/nonexistent/cpu/0/msr"),
            ..SessionConfig::for_core(0)
        };
        let err = HardwarePmu::open(&config).err().unwrap();
        assert_eq!(err.raw_code(), -1);
    }
}
