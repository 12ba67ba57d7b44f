//! Deterministic in-memory PMU
//!
//! Behaves like one core of an ArchPerfMon v3/v4 processor closely enough for
//! the broker, the register files, sampling and bias calibration to be tested
//! without hardware: it answers CPUID from its configuration, faults on
//! reserved PERFEVTSEL bits and on writes to the read-only status register,
//! aliases the full-width counter window onto the legacy one, and keeps
//! counter values within their implemented width.

use std::collections::{HashMap, HashSet};
use std::io;

use parking_lot::Mutex;
use pfc_raw::perfmon::core::{msr, FixedCtrField, GlobalCtrl, PerfEvtSel, RDPMC_FIXED_SELECTOR};
use pfc_raw::register::ones;
use pfc_raw::MsrError;

use crate::backend::{RegisterAccess, Sample};
use crate::common::capability::FeatureFlags;
use crate::common::cpuid::{CpuidResult, CpuidSource};
use crate::error::{PfcError, Result};
use crate::sampling::SampleBuffer;

/// Configuration of a [`SimulatedPmu`]
///
/// Defaults describe a Haswell-class core: PerfMon v3, three 48-bit fixed
/// counters, four 48-bit general-purpose counters with full-width writes,
/// and RDPMC enabled.
#[derive(Debug, Clone)]
pub struct SimulatedPmuBuilder {
    cpu: u32,
    version: u8,
    fixed: u32,
    fixed_width: u32,
    general: u32,
    general_width: u32,
    full_width_writes: bool,
    fast_read: bool,
    read_cost: u64,
    features: FeatureFlags,
}

impl Default for SimulatedPmuBuilder {
    fn default() -> Self {
        Self {
            cpu: 0,
            version: 3,
            fixed: 3,
            fixed_width: 48,
            general: 4,
            general_width: 48,
            full_width_writes: true,
            fast_read: true,
            read_cost: 0,
            features: FeatureFlags {
                pdcm: true,
                acpi: true,
                package_thermal: true,
                hdc: false,
                energy_perf_bias: true,
            },
        }
    }
}

impl SimulatedPmuBuilder {
    pub fn cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// Raw PerfMon version reported in CPUID.0AH:EAX[7:0]
    pub fn version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn fixed_counters(mut self, count: u32, width: u32) -> Self {
        self.fixed = count;
        self.fixed_width = width;
        self
    }

    pub fn general_counters(mut self, count: u32, width: u32) -> Self {
        self.general = count;
        self.general_width = width;
        self
    }

    pub fn full_width_writes(mut self, enabled: bool) -> Self {
        self.full_width_writes = enabled;
        self
    }

    pub fn fast_read(mut self, enabled: bool) -> Self {
        self.fast_read = enabled;
        self
    }

    /// Events every enabled counter observes per RDPMC
    pub fn read_cost(mut self, events: u64) -> Self {
        self.read_cost = events;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn build(self) -> SimulatedPmu {
        let mut msrs = HashMap::new();
        let capabilities = if self.full_width_writes { 1u64 << 13 } else { 0 };
        msrs.insert(msr::IA32_PERF_CAPABILITIES, capabilities);

        SimulatedPmu {
            config: self,
            state: Mutex::new(SimState {
                msrs,
                failing_writes: HashSet::new(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    msrs: HashMap<u32, u64>,
    failing_writes: HashSet<u32>,
}

impl SimState {
    fn get(&self, addr: u32) -> u64 {
        self.msrs.get(&addr).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct SimulatedPmu {
    config: SimulatedPmuBuilder,
    state: Mutex<SimState>,
}

impl Default for SimulatedPmu {
    fn default() -> Self {
        SimulatedPmuBuilder::default().build()
    }
}

impl SimulatedPmu {
    pub fn builder() -> SimulatedPmuBuilder {
        SimulatedPmuBuilder::default()
    }

    /// Count `events` on every enabled counter
    pub fn advance(&self, events: u64) {
        let mut state = self.state.lock();
        self.tick(&mut state, events);
    }

    /// Answer an RDPMC for `selector`, charging the read cost first
    pub fn rdpmc(&self, selector: u32) -> u64 {
        let mut state = self.state.lock();
        self.tick(&mut state, self.config.read_cost);

        let index = selector & !RDPMC_FIXED_SELECTOR;
        if selector & RDPMC_FIXED_SELECTOR != 0 {
            if index < self.config.fixed {
                return state.get(msr::IA32_FIXED_CTR0 + index);
            }
        } else if index < self.config.general {
            return state.get(msr::IA32_PMC0 + index);
        }
        0
    }

    /// Raw register contents, bypassing every check
    pub fn peek(&self, addr: u32) -> u64 {
        self.state.lock().get(self.alias(addr))
    }

    /// Store a raw register value, bypassing every check
    pub fn poke(&self, addr: u32, value: u64) {
        let addr = self.alias(addr);
        self.state.lock().msrs.insert(addr, value);
    }

    /// Make every later write to `addr` fail with EIO
    pub fn fail_writes_to(&self, addr: u32) {
        self.state.lock().failing_writes.insert(addr);
    }

    fn fixed_mask(&self) -> u64 {
        ones(self.config.fixed_width, 0)
    }

    fn general_mask(&self) -> u64 {
        ones(self.config.general_width, 0)
    }

    fn general_index(&self, addr: u32, base: u32) -> Option<u32> {
        addr.checked_sub(base).filter(|i| *i < self.config.general)
    }

    fn alias(&self, addr: u32) -> u32 {
        match self.general_index(addr, msr::IA32_A_PMC0) {
            Some(i) => msr::IA32_PMC0 + i,
            None => addr,
        }
    }

    fn tick(&self, state: &mut SimState, events: u64) {
        if events == 0 {
            return;
        }

        let global = state.get(msr::IA32_PERF_GLOBAL_CTRL);
        let fixed_ctrl = state.get(msr::IA32_FIXED_CTR_CTRL);

        for i in 0..self.config.fixed as usize {
            let on = global & (1 << GlobalCtrl::fixed_bit(i)) != 0
                && FixedCtrField::is_enabled(FixedCtrField::extract(fixed_ctrl, i));
            if on {
                let addr = msr::IA32_FIXED_CTR0 + i as u32;
                let value = state.get(addr).wrapping_add(events) & self.fixed_mask();
                state.msrs.insert(addr, value);
            }
        }

        for i in 0..self.config.general as usize {
            let evtsel = state.get(msr::IA32_PERFEVTSEL0 + i as u32);
            let on = global & (1 << GlobalCtrl::general_bit(i)) != 0 && PerfEvtSel::is_enabled(evtsel);
            if on {
                let addr = msr::IA32_PMC0 + i as u32;
                let value = state.get(addr).wrapping_add(events) & self.general_mask();
                state.msrs.insert(addr, value);
            }
        }
    }

    fn fault(&self, msr: u32) -> PfcError {
        PfcError::WriteFailed(MsrError::WriteFailed {
            cpu: self.config.cpu,
            msr,
            source: io::Error::from_raw_os_error(libc::EIO),
        })
    }
}

impl RegisterAccess for SimulatedPmu {
    fn read_msr(&self, addr: u32) -> Result<u64> {
        Ok(self.peek(addr))
    }

    fn write_msr(&self, addr: u32, value: u64) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_writes.contains(&addr) {
            return Err(self.fault(addr));
        }

        if let Some(i) = self.general_index(addr, msr::IA32_A_PMC0) {
            if !self.config.full_width_writes {
                return Err(self.fault(addr));
            }
            state.msrs.insert(msr::IA32_PMC0 + i, value & self.general_mask());
            return Ok(());
        }

        if let Some(i) = self.general_index(addr, msr::IA32_PMC0) {
            // Legacy window: bit 31 is sign-extended into the upper bits.
            let extended = value as u32 as i32 as i64 as u64;
            state.msrs.insert(msr::IA32_PMC0 + i, extended & self.general_mask());
            return Ok(());
        }

        if self.general_index(addr, msr::IA32_PERFEVTSEL0).is_some() && value & PerfEvtSel::RESERVED != 0 {
            return Err(self.fault(addr));
        }

        let fixed_index = addr
            .checked_sub(msr::IA32_FIXED_CTR0)
            .filter(|i| *i < self.config.fixed);
        let stored = match addr {
            msr::IA32_PERF_GLOBAL_STATUS | msr::IA32_PERF_CAPABILITIES => {
                return Err(self.fault(addr));
            }
            msr::IA32_PERF_GLOBAL_OVF_CTRL => {
                let status = state.get(msr::IA32_PERF_GLOBAL_STATUS) & !value;
                state.msrs.insert(msr::IA32_PERF_GLOBAL_STATUS, status);
                value
            }
            _ if fixed_index.is_some() => value & self.fixed_mask(),
            _ => value,
        };
        state.msrs.insert(addr, stored);
        Ok(())
    }

    fn fast_read_enabled(&self) -> Result<bool> {
        Ok(self.config.fast_read)
    }
}

impl CpuidSource for SimulatedPmu {
    fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuidResult {
        let c = &self.config;
        let f = &c.features;
        match leaf {
            0x01 => CpuidResult {
                ecx: (f.pdcm as u32) << 15,
                edx: (f.acpi as u32) << 22,
                ..Default::default()
            },
            0x06 => CpuidResult {
                eax: ((f.package_thermal as u32) << 6) | ((f.hdc as u32) << 13),
                ecx: (f.energy_perf_bias as u32) << 3,
                ..Default::default()
            },
            0x0A => CpuidResult {
                eax: c.version as u32 | (c.general << 8) | (c.general_width << 16),
                edx: c.fixed | (c.fixed_width << 5),
                ..Default::default()
            },
            _ => CpuidResult::default(),
        }
    }
}

impl Sample for SimulatedPmu {
    fn start(&self, buf: &mut SampleBuffer) {
        sample_sequence!(self, buf, wrapping_sub);
    }

    fn end(&self, buf: &mut SampleBuffer) {
        sample_sequence!(self, buf, wrapping_add);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::capability::{Capability, PerfmonVersion};

    #[test]
    fn test_cpuid_matches_configuration() {
        let pmu = SimulatedPmu::builder()
            .version(4)
            .fixed_counters(4, 48)
            .general_counters(8, 48)
            .build();
        let cap = Capability::detect(&pmu, &pmu).unwrap();
        assert_eq!(cap.version, PerfmonVersion::V4);
        assert_eq!((cap.fixed, cap.general), (4, 8));
        assert!(cap.full_width_writes);
    }

    #[test]
    fn test_full_width_alias_and_truncation() {
        let pmu = SimulatedPmu::builder().general_counters(4, 40).build();
        pmu.write_msr(msr::IA32_A_PMC0 + 1, u64::MAX).unwrap();
        assert_eq!(pmu.read_msr(msr::IA32_PMC0 + 1).unwrap(), ones(40, 0));
        assert_eq!(pmu.read_msr(msr::IA32_A_PMC0 + 1).unwrap(), ones(40, 0));

        pmu.write_msr(msr::IA32_PMC0, 0x8000_0000).unwrap();
        assert_eq!(pmu.peek(msr::IA32_PMC0), ones(40, 0) & !ones(31, 0));
    }

    #[test]
    fn test_faults() {
        let pmu = SimulatedPmu::builder().full_width_writes(false).build();
        assert!(pmu.write_msr(msr::IA32_A_PMC0, 1).is_err());
        assert!(pmu.write_msr(msr::IA32_PERFEVTSEL0, 1 << 32).is_err());
        assert!(pmu.write_msr(msr::IA32_PERF_GLOBAL_STATUS, 0).is_err());

        pmu.fail_writes_to(msr::IA32_FIXED_CTR_CTRL);
        let err = pmu.write_msr(msr::IA32_FIXED_CTR_CTRL, 0x222).unwrap_err();
        assert!(matches!(err, PfcError::WriteFailed(_)));
    }

    #[test]
    fn test_only_enabled_counters_advance() {
        let pmu = SimulatedPmu::default();
        pmu.write_msr(msr::IA32_FIXED_CTR_CTRL, 0x020).unwrap();
        pmu.write_msr(msr::IA32_PERFEVTSEL0 + 2, PerfEvtSel::ENABLE | 0xC0).unwrap();
        pmu.write_msr(msr::IA32_PERF_GLOBAL_CTRL, GlobalCtrl::counters(3, 4)).unwrap();

        pmu.advance(5);
        assert_eq!(pmu.rdpmc(RDPMC_FIXED_SELECTOR), 0);
        assert_eq!(pmu.rdpmc(RDPMC_FIXED_SELECTOR | 1), 5);
        assert_eq!(pmu.rdpmc(2), 5);
        assert_eq!(pmu.rdpmc(3), 0);
        assert_eq!(pmu.rdpmc(9), 0);
    }

    #[test]
    fn test_overflow_control_clears_status() {
        let pmu = SimulatedPmu::default();
        pmu.poke(msr::IA32_PERF_GLOBAL_STATUS, 0x7_0000_000F);
        pmu.write_msr(msr::IA32_PERF_GLOBAL_OVF_CTRL, 0x1_0000_0003).unwrap();
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_STATUS), 0x6_0000_000C);
    }
}
