// Performance-monitoring capability detection and counter layout

use std::ops::Range;

use once_cell::sync::Lazy;
use pfc_raw::perfmon::core::{msr, GlobalCtrl, FixedCtrField, PerfCapabilities, MAX_PMC};
use pfc_raw::register::{field, ones};
use pfc_raw::RegisterLayout;

use crate::backend::RegisterAccess;
use crate::common::cpuid::{CpuidResult, CpuidSource, NativeCpuid};
use crate::counters::policy::ConfigPolicy;
use crate::error::{PfcError, Result};

/// Supported ArchPerfMon generations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PerfmonVersion {
    V3,
    V4,
}

impl PerfmonVersion {
    pub fn from_raw(version: u8) -> Option<Self> {
        match version {
            3 => Some(PerfmonVersion::V3),
            4 => Some(PerfmonVersion::V4),
            _ => None,
        }
    }

    pub fn number(&self) -> u8 {
        match self {
            PerfmonVersion::V3 => 3,
            PerfmonVersion::V4 => 4,
        }
    }
}

/// CPUID feature bits gating the diagnostic register file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// CPUID.01H:ECX[15]
    pub pdcm: bool,
    /// CPUID.01H:EDX[22]
    pub acpi: bool,
    /// CPUID.06H:EAX[6]
    pub package_thermal: bool,
    /// CPUID.06H:EAX[13]
    pub hdc: bool,
    /// CPUID.06H:ECX[3]
    pub energy_perf_bias: bool,
}

/// CPUID leaves of the processor this process runs on
pub static HOST_LEAVES: Lazy<CpuidLeaves> = Lazy::new(|| CpuidLeaves::query(&NativeCpuid));

/// Snapshot of the CPUID leaves detection depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuidLeaves {
    pub leaf01: CpuidResult,
    pub leaf06: CpuidResult,
    pub leaf0a: CpuidResult,
}

impl CpuidLeaves {
    pub fn query<C: CpuidSource + ?Sized>(cpuid: &C) -> Self {
        Self {
            leaf01: cpuid.cpuid(0x01, 0),
            leaf06: cpuid.cpuid(0x06, 0),
            leaf0a: cpuid.cpuid(0x0A, 0),
        }
    }

    pub fn features(&self) -> FeatureFlags {
        FeatureFlags {
            pdcm: bit(self.leaf01.ecx, 15),
            acpi: bit(self.leaf01.edx, 22),
            package_thermal: bit(self.leaf06.eax, 6),
            hdc: bit(self.leaf06.eax, 13),
            energy_perf_bias: bit(self.leaf06.ecx, 3),
        }
    }

    /// PerfMon version from CPUID.0AH:EAX[7:0], if PDCM is present and the
    /// version is supported
    pub fn perfmon_version(&self) -> Result<PerfmonVersion> {
        if !self.features().pdcm {
            return Err(PfcError::UnsupportedArchitecture(
                "processor does not have Perfmon and Debug Capability".to_string(),
            ));
        }
        let raw_version = field(self.leaf0a.eax as u64, 8, 0) as u8;
        PerfmonVersion::from_raw(raw_version).ok_or_else(|| {
            PfcError::UnsupportedArchitecture(format!(
                "performance monitoring architecture version {raw_version}, only 3 or 4 supported"
            ))
        })
    }
}

fn bit(reg: u32, n: u32) -> bool {
    (reg >> n) & 1 == 1
}

/// A counter in one of the two hardware families, by local index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Fixed(usize),
    General(usize),
}

/// Where a counter's enable bit, configuration and value live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDescriptor {
    pub counter: Counter,
    /// Bit position in IA32_PERF_GLOBAL_CTRL
    pub enable_bit: u32,
    /// Configuration register (shared IA32_FIXED_CTR_CTRL for fixed counters)
    pub config_msr: u32,
    /// Offset of this counter's field inside `config_msr`
    pub config_shift: u32,
    /// Width of this counter's field inside `config_msr`
    pub config_bits: u32,
    /// Register read for the counter value
    pub value_msr: u32,
    /// Register written for the counter value
    pub value_write_msr: u32,
    /// Ones over the counter's implemented width
    pub value_mask: u64,
}

/// Immutable description of the core's counters
///
/// Produced once by [`Capability::detect`] and passed by reference to every
/// component that needs counter counts, widths or the configuration policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capability {
    pub version: PerfmonVersion,
    pub fixed: usize,
    pub general: usize,
    pub fixed_width: u32,
    pub general_width: u32,
    pub full_width_writes: bool,
    pub fixed_mask: u64,
    pub general_mask: u64,
    pub features: FeatureFlags,
}

impl Capability {
    /// Query CPUID (and IA32_PERF_CAPABILITIES through `access`) once
    pub fn detect<C, A>(cpuid: &C, access: &A) -> Result<Self>
    where
        C: CpuidSource + ?Sized,
        A: RegisterAccess + ?Sized,
    {
        let leaves = CpuidLeaves::query(cpuid);
        // Reject unsupported hardware before touching any register.
        leaves.perfmon_version()?;
        let perf_capabilities = access.read_msr(msr::IA32_PERF_CAPABILITIES)?;
        Self::from_leaves(&leaves, perf_capabilities)
    }

    /// Decode a CPUID snapshot plus the raw IA32_PERF_CAPABILITIES value
    pub fn from_leaves(leaves: &CpuidLeaves, perf_capabilities: u64) -> Result<Self> {
        let features = leaves.features();
        let version = leaves.perfmon_version()?;

        // #GP EAX[15:8], GP width EAX[23:16], #FF EDX[4:0], FF width EDX[12:5].
        let eax = leaves.leaf0a.eax as u64;
        let edx = leaves.leaf0a.edx as u64;
        let mut general = field(eax, 8, 8) as usize;
        let general_width = field(eax, 8, 16) as u32;
        let mut fixed = field(edx, 5, 0) as usize;
        let fixed_width = field(edx, 8, 5) as u32;

        let full_width_writes = PerfCapabilities::from_msr_value(perf_capabilities).full_width_write;
        let general_mask = if full_width_writes {
            ones(general_width, 0)
        } else {
            ones(32, 0)
        };
        let fixed_mask = ones(fixed_width, 0);

        if fixed + general > MAX_PMC {
            let (f, g) = clamp_counts(fixed, general);
            tracing::warn!(
                "More than {} PMCs found ({} fixed, {} general)! Clamping to {} fixed, {} general.",
                MAX_PMC,
                fixed,
                general,
                f,
                g
            );
            fixed = f;
            general = g;
        }

        tracing::info!("PM Arch Version:      {}", version.number());
        tracing::info!("Fixed-function  PMCs: {}\tMask {:016x}", fixed, fixed_mask);
        tracing::info!("General-purpose PMCs: {}\tMask {:016x}", general, general_mask);
        tracing::debug!("Full-width writes: {}", full_width_writes);

        Ok(Self {
            version,
            fixed,
            general,
            fixed_width,
            general_width,
            full_width_writes,
            fixed_mask,
            general_mask,
            features,
        })
    }

    /// Total number of registers in the unified register file
    pub fn total(&self) -> usize {
        self.fixed + self.general
    }

    /// Unified indices of the fixed-function segment
    pub fn fixed_range(&self) -> Range<usize> {
        0..self.fixed
    }

    /// Unified indices of the general-purpose segment
    pub fn general_range(&self) -> Range<usize> {
        self.fixed..self.fixed + self.general
    }

    /// Versioned configuration policy for this hardware generation
    pub fn policy(&self) -> &'static ConfigPolicy {
        ConfigPolicy::for_version(self.version)
    }

    /// Translate a unified index into a counter
    pub fn counter(&self, index: usize) -> Option<Counter> {
        if self.fixed_range().contains(&index) {
            Some(Counter::Fixed(index))
        } else if self.general_range().contains(&index) {
            Some(Counter::General(index - self.fixed))
        } else {
            None
        }
    }

    /// Translate a counter into its unified index
    pub fn index_of(&self, counter: Counter) -> Option<usize> {
        match counter {
            Counter::Fixed(i) if i < self.fixed => Some(i),
            Counter::General(i) if i < self.general => Some(self.fixed + i),
            _ => None,
        }
    }

    /// Value width mask of a counter
    pub fn value_mask(&self, counter: Counter) -> u64 {
        match counter {
            Counter::Fixed(_) => self.fixed_mask,
            Counter::General(_) => self.general_mask,
        }
    }

    /// Register locations of an existing counter
    pub fn descriptor(&self, counter: Counter) -> Option<CounterDescriptor> {
        self.index_of(counter)?;
        let descriptor = match counter {
            Counter::Fixed(i) => CounterDescriptor {
                counter,
                enable_bit: GlobalCtrl::fixed_bit(i),
                config_msr: msr::IA32_FIXED_CTR_CTRL,
                config_shift: FixedCtrField::shift(i),
                config_bits: pfc_raw::perfmon::core::FIXED_CTRL_FIELD_BITS,
                value_msr: msr::IA32_FIXED_CTR0 + i as u32,
                value_write_msr: msr::IA32_FIXED_CTR0 + i as u32,
                value_mask: self.fixed_mask,
            },
            Counter::General(i) => CounterDescriptor {
                counter,
                enable_bit: GlobalCtrl::general_bit(i),
                config_msr: msr::IA32_PERFEVTSEL0 + i as u32,
                config_shift: 0,
                config_bits: 64,
                value_msr: msr::IA32_PMC0 + i as u32,
                value_write_msr: if self.full_width_writes {
                    msr::IA32_A_PMC0 + i as u32
                } else {
                    msr::IA32_PMC0 + i as u32
                },
                value_mask: self.general_mask,
            },
        };
        Some(descriptor)
    }
}

/// Fit `fixed + general` under the register-file ceiling.
///
/// Excess is removed from the general-purpose counters first; fixed counters
/// are only reduced when they alone exceed the ceiling.
pub fn clamp_counts(fixed: usize, general: usize) -> (usize, usize) {
    let fixed = fixed.min(MAX_PMC);
    let general = general.min(MAX_PMC - fixed);
    (fixed, general)
}
