//! Register broker
//!
//! The only component that writes counter MSRs. Every write is filtered
//! through a per-address reserved-bit mask: reserved bits keep their current
//! hardware value, writes to read-only or unknown registers are dropped.
//! Configuration writes additionally pass through the versioned
//! [`ConfigPolicy`](crate::counters::policy::ConfigPolicy).

use pfc_raw::perfmon::core::{msr, FixedCtrField, GlobalCtrl, PerfEvtSel, FIXED_CTRL_FIELD_BITS};
use pfc_raw::register::{bits, blend, clear, field, ones};

use crate::backend::RegisterAccess;
use crate::common::capability::{Capability, Counter, CounterDescriptor};
use crate::error::Result;

fn in_window(addr: u32, base: u32, count: usize) -> bool {
    addr >= base && ((addr - base) as usize) < count
}

pub struct RegisterBroker<'a, A: RegisterAccess + ?Sized> {
    access: &'a A,
    capability: &'a Capability,
}

impl<'a, A: RegisterAccess + ?Sized> RegisterBroker<'a, A> {
    pub fn new(access: &'a A, capability: &'a Capability) -> Self {
        Self { access, capability }
    }

    pub fn capability(&self) -> &Capability {
        self.capability
    }

    /// Reserved bits of a known register, `None` when writes must be dropped
    pub fn reserved_mask(&self, addr: u32) -> Option<u64> {
        let cap = self.capability;
        let counters = GlobalCtrl::counters(cap.fixed, cap.general);

        if in_window(addr, msr::IA32_A_PMC0, cap.general) || in_window(addr, msr::IA32_PMC0, cap.general) {
            Some(!cap.general_mask)
        } else if addr == msr::IA32_PERF_GLOBAL_CTRL {
            Some(!counters)
        } else if addr == msr::IA32_PERF_GLOBAL_STATUS {
            None
        } else if addr == msr::IA32_PERF_GLOBAL_OVF_CTRL {
            Some(!(GlobalCtrl::OVF_STATUS_BITS | counters))
        } else if addr == msr::IA32_FIXED_CTR_CTRL {
            Some(!ones(FIXED_CTRL_FIELD_BITS * cap.fixed as u32, 0))
        } else if in_window(addr, msr::IA32_FIXED_CTR0, cap.fixed) {
            Some(!cap.fixed_mask)
        } else if in_window(addr, msr::IA32_PERFEVTSEL0, cap.general) {
            Some(PerfEvtSel::RESERVED)
        } else {
            None
        }
    }

    pub fn read(&self, addr: u32) -> Result<u64> {
        self.access.read_msr(addr)
    }

    /// Write `value` to a known register, preserving its reserved bits
    pub fn write_masked(&self, addr: u32, value: u64) -> Result<()> {
        let Some(reserved) = self.reserved_mask(addr) else {
            tracing::warn!("Dropped write of 0x{:x} to MSR 0x{:x}", value, addr);
            return Ok(());
        };

        let old = self.access.read_msr(addr)?;
        let blended = blend(reserved, old, value);
        tracing::debug!(
            "MSR 0x{:03x} <- 0x{:016x} (requested 0x{:016x}, reserved 0x{:016x})",
            addr,
            blended,
            value,
            reserved
        );
        self.access.write_msr(addr, blended)
    }

    /// Register locations of `counter`, `None` for a counter this core lacks
    fn describe(&self, counter: Counter) -> Option<CounterDescriptor> {
        let descriptor = self.capability.descriptor(counter);
        if descriptor.is_none() {
            tracing::warn!("Dropped access to nonexistent counter {:?}", counter);
        }
        descriptor
    }

    /// Set or clear a counter's bit in IA32_PERF_GLOBAL_CTRL
    pub fn write_enable(&self, counter: Counter, enabled: bool) -> Result<()> {
        let Some(d) = self.describe(counter) else {
            return Ok(());
        };
        let ctrl = self.read(msr::IA32_PERF_GLOBAL_CTRL)?;
        let ctrl = clear(ctrl, 1, d.enable_bit) | bits(enabled as u64, 1, d.enable_bit);
        self.write_masked(msr::IA32_PERF_GLOBAL_CTRL, ctrl)
    }

    /// Program a counter and re-enable it if the stored result asks to count
    ///
    /// The counter is disabled first. After the policy-filtered value is
    /// written it is read back, and the global enable bit follows the
    /// readback: the enable bit for general-purpose counters, a non-zero
    /// enable mode for fixed-function counters.
    pub fn write_config(&self, counter: Counter, config: u64) -> Result<()> {
        let Some(d) = self.describe(counter) else {
            return Ok(());
        };
        let policy = self.capability.policy();
        self.write_enable(counter, false)?;

        let value = match counter {
            Counter::Fixed(_) => {
                let field = policy.sanitize_fixed(config & FixedCtrField::MASK);
                let ctrl = self.read(d.config_msr)?;
                clear(ctrl, d.config_bits, d.config_shift) | bits(field, d.config_bits, d.config_shift)
            }
            Counter::General(i) => policy.sanitize_general(i, config),
        };
        self.write_masked(d.config_msr, value)?;

        let stored = self.read_config(counter)?;
        let enabled = match counter {
            Counter::Fixed(_) => FixedCtrField::is_enabled(stored),
            Counter::General(_) => PerfEvtSel::is_enabled(stored),
        };
        if enabled {
            self.write_enable(counter, true)?;
        }
        tracing::debug!("{:?} configured 0x{:x} (enabled: {})", counter, stored, enabled);
        Ok(())
    }

    /// The 4-bit control field of a fixed counter, or a general counter's PERFEVTSEL
    ///
    /// Reads as zero for a counter this core lacks.
    pub fn read_config(&self, counter: Counter) -> Result<u64> {
        let Some(d) = self.describe(counter) else {
            return Ok(0);
        };
        Ok(field(self.read(d.config_msr)?, d.config_bits, d.config_shift))
    }

    pub fn write_value(&self, counter: Counter, value: u64) -> Result<()> {
        match self.describe(counter) {
            Some(d) => self.write_masked(d.value_write_msr, value),
            None => Ok(()),
        }
    }

    /// Reads as zero for a counter this core lacks
    pub fn read_value(&self, counter: Counter) -> Result<u64> {
        match self.describe(counter) {
            Some(d) => self.read(d.value_msr),
            None => Ok(0),
        }
    }

    /// Disable and zero every counter, then clear all overflow status
    pub fn reset(&self) -> Result<()> {
        let cap = self.capability;
        self.write_masked(msr::IA32_PERF_GLOBAL_CTRL, 0)?;
        self.write_masked(msr::IA32_FIXED_CTR_CTRL, 0)?;
        for i in 0..cap.fixed {
            self.write_masked(msr::IA32_FIXED_CTR0 + i as u32, 0)?;
        }
        for i in 0..cap.general {
            self.write_masked(msr::IA32_PERFEVTSEL0 + i as u32, 0)?;
            self.write_masked(msr::IA32_PMC0 + i as u32, 0)?;
        }
        self.write_masked(msr::IA32_PERF_GLOBAL_OVF_CTRL, u64::MAX)?;
        tracing::info!("Reset {} fixed and {} general-purpose counters", cap.fixed, cap.general);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedPmu;

    fn detect(pmu: &SimulatedPmu) -> Capability {
        Capability::detect(pmu, pmu).unwrap()
    }

    #[test]
    fn test_reserved_masks() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        assert_eq!(broker.reserved_mask(msr::IA32_PMC0 + 3), Some(0xFFFF_0000_0000_0000));
        assert_eq!(broker.reserved_mask(msr::IA32_A_PMC0), Some(0xFFFF_0000_0000_0000));
        assert_eq!(broker.reserved_mask(msr::IA32_PMC0 + 4), None);
        assert_eq!(broker.reserved_mask(msr::IA32_PERF_GLOBAL_CTRL), Some(!0x0000_0007_0000_000F));
        assert_eq!(broker.reserved_mask(msr::IA32_PERF_GLOBAL_STATUS), None);
        assert_eq!(
            broker.reserved_mask(msr::IA32_PERF_GLOBAL_OVF_CTRL),
            Some(!0xE000_0007_0000_000F)
        );
        assert_eq!(broker.reserved_mask(msr::IA32_FIXED_CTR_CTRL), Some(!0xFFF));
        assert_eq!(broker.reserved_mask(msr::IA32_FIXED_CTR0 + 2), Some(0xFFFF_0000_0000_0000));
        assert_eq!(broker.reserved_mask(msr::IA32_FIXED_CTR0 + 3), None);
        assert_eq!(broker.reserved_mask(msr::IA32_PERFEVTSEL0), Some(0xFFFF_FFFF_0000_0000));
        assert_eq!(broker.reserved_mask(0x1A0), None);
    }

    #[test]
    fn test_reserved_bits_keep_hardware_value() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        pmu.poke(msr::IA32_PERF_GLOBAL_CTRL, 0x8000_0000_0000_0000);
        broker.write_masked(msr::IA32_PERF_GLOBAL_CTRL, u64::MAX).unwrap();
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0x8000_0007_0000_000F);

        pmu.poke(msr::IA32_FIXED_CTR_CTRL, 0xA000);
        broker.write_masked(msr::IA32_FIXED_CTR_CTRL, 0xFFFF_FFFF).unwrap();
        assert_eq!(pmu.peek(msr::IA32_FIXED_CTR_CTRL), 0xAFFF);
    }

    #[test]
    fn test_unknown_and_read_only_writes_dropped() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        pmu.poke(msr::IA32_PERF_GLOBAL_STATUS, 0x5);
        broker.write_masked(msr::IA32_PERF_GLOBAL_STATUS, 0).unwrap();
        broker.write_masked(0x1A0, 0x1234).unwrap();
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_STATUS), 0x5);
        assert_eq!(pmu.peek(0x1A0), 0);
    }

    #[test]
    fn test_general_config_auto_enable() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        broker.write_config(Counter::General(1), 0x0041_010E).unwrap();
        assert_eq!(broker.read_config(Counter::General(1)).unwrap(), 0x0041_010E);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0x2);

        // Without the enable bit the counter stays off.
        broker.write_config(Counter::General(1), 0x0001_010E).unwrap();
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0x0);
    }

    #[test]
    fn test_fixed_config_strict_and_relaxed() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        broker.write_config(Counter::Fixed(1), 0x7).unwrap();
        assert_eq!(broker.read_config(Counter::Fixed(1)).unwrap(), 0x2);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 1 << 33);

        // OS-only is forbidden on v3, so the counter ends up disabled.
        broker.write_config(Counter::Fixed(1), 0x1).unwrap();
        assert_eq!(broker.read_config(Counter::Fixed(1)).unwrap(), 0x0);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0);

        let pmu = SimulatedPmu::builder().version(4).build();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);
        broker.write_config(Counter::Fixed(2), 0xF).unwrap();
        assert_eq!(pmu.peek(msr::IA32_FIXED_CTR_CTRL), 0x700);
        broker.write_config(Counter::Fixed(0), 0x1).unwrap();
        assert_eq!(pmu.peek(msr::IA32_FIXED_CTR_CTRL), 0x701);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0x5 << 32);
    }

    #[test]
    fn test_quirk_disables_counter() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        broker.write_config(Counter::General(0), 0x0041_0148).unwrap();
        assert_eq!(broker.read_config(Counter::General(0)).unwrap(), 0);
        broker.write_config(Counter::General(2), 0x0041_0148).unwrap();
        assert_eq!(broker.read_config(Counter::General(2)).unwrap(), 0x0041_0148);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0x4);
    }

    #[test]
    fn test_values_and_reset() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        broker.write_value(Counter::General(3), u64::MAX).unwrap();
        assert_eq!(broker.read_value(Counter::General(3)).unwrap(), 0x0000_FFFF_FFFF_FFFF);
        broker.write_value(Counter::Fixed(0), 42).unwrap();
        assert_eq!(broker.read_value(Counter::Fixed(0)).unwrap(), 42);
        broker.write_config(Counter::General(0), 0x0041_003C).unwrap();

        broker.reset().unwrap();
        assert_eq!(broker.read_value(Counter::General(3)).unwrap(), 0);
        assert_eq!(broker.read_value(Counter::Fixed(0)).unwrap(), 0);
        assert_eq!(broker.read_config(Counter::General(0)).unwrap(), 0);
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0);
    }

    #[test]
    fn test_addresses_follow_descriptors() {
        let pmu = SimulatedPmu::builder().version(4).full_width_writes(false).build();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        for (counter, config) in [(Counter::Fixed(2), 0x3), (Counter::General(3), 0x0041_003C)] {
            let d = cap.descriptor(counter).unwrap();
            broker.write_config(counter, config).unwrap();
            broker.write_value(counter, 0x1234).unwrap();
            assert_eq!(pmu.peek(d.value_msr), 0x1234);
            assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL) >> d.enable_bit & 1, 1);
            assert_eq!(
                broker.read_config(counter).unwrap(),
                field(pmu.peek(d.config_msr), d.config_bits, d.config_shift)
            );
        }
        // Without full-width writes values go through the legacy window.
        assert_eq!(cap.descriptor(Counter::General(3)).unwrap().value_write_msr, msr::IA32_PMC0 + 3);
    }

    #[test]
    fn test_nonexistent_counters_dropped() {
        let pmu = SimulatedPmu::default();
        let cap = detect(&pmu);
        let broker = RegisterBroker::new(&pmu, &cap);

        for counter in [Counter::Fixed(usize::MAX), Counter::General(4), Counter::General(usize::MAX)] {
            broker.write_config(counter, 0x0041_010E).unwrap();
            broker.write_value(counter, 7).unwrap();
            broker.write_enable(counter, true).unwrap();
            assert_eq!(broker.read_config(counter).unwrap(), 0);
            assert_eq!(broker.read_value(counter).unwrap(), 0);
        }
        assert_eq!(pmu.peek(msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(pmu.peek(msr::IA32_PMC0 + 4), 0);
    }
}
