//! Miscellaneous MSRs exposed for read-only diagnostics
//!
//! These are not part of the counter register file. Each entry names the
//! CPUID feature that must be present before the register may be read.

/// Diagnostic MSR addresses, sorted by offset
pub mod msr {
    pub const MSR_PLATFORM_INFO: u32 = 0x0CE;
    pub const IA32_PERF_STATUS: u32 = 0x198;
    pub const IA32_CLOCK_MODULATION: u32 = 0x19A;
    pub const IA32_THERM_STATUS: u32 = 0x19C;
    pub const IA32_MISC_ENABLE: u32 = 0x1A0;
    pub const MSR_TEMPERATURE_TARGET: u32 = 0x1A2;
    pub const IA32_ENERGY_PERF_BIAS: u32 = 0x1B0;
    pub const IA32_PACKAGE_THERM_STATUS: u32 = 0x1B1;
    pub const IA32_PACKAGE_THERM_INTERRUPT: u32 = 0x1B2;
    pub use crate::arch::perfmon::core::msr::IA32_PERF_CAPABILITIES;
    pub const MSR_CORE_PERF_LIMIT_REASONS: u32 = 0x690;
    pub const IA32_PKG_HDC_CTL: u32 = 0xDB0;
    pub const IA32_PM_CTL1: u32 = 0xDB1;
    pub const IA32_THREAD_STALL: u32 = 0xDB2;
}

/// CPUID feature a diagnostic register depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Requirement {
    /// Architecturally present on every supported processor
    Always,
    /// CPUID.01H:EDX[22], thermal monitor and clock control
    Acpi,
    /// CPUID.01H:ECX[15], perfmon and debug capability
    Pdcm,
    /// CPUID.06H:EAX[6], package thermal management
    PackageThermal,
    /// CPUID.06H:EAX[13], hardware duty cycling
    Hdc,
    /// CPUID.06H:ECX[3], energy/performance bias hint
    EnergyPerfBias,
}

/// A diagnostic register and its enabling feature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticMsr {
    pub address: u32,
    pub name: &'static str,
    pub requires: Requirement,
}

/// Registers readable through the diagnostic file
pub const DIAGNOSTIC_MSRS: &[DiagnosticMsr] = &[
    DiagnosticMsr {
        address: msr::MSR_PLATFORM_INFO,
        name: "MSR_PLATFORM_INFO",
        requires: Requirement::Always,
    },
    DiagnosticMsr {
        address: msr::IA32_PERF_STATUS,
        name: "IA32_PERF_STATUS",
        requires: Requirement::Always,
    },
    DiagnosticMsr {
        address: msr::IA32_CLOCK_MODULATION,
        name: "IA32_CLOCK_MODULATION",
        requires: Requirement::Acpi,
    },
    DiagnosticMsr {
        address: msr::IA32_THERM_STATUS,
        name: "IA32_THERM_STATUS",
        requires: Requirement::Acpi,
    },
    DiagnosticMsr {
        address: msr::IA32_MISC_ENABLE,
        name: "IA32_MISC_ENABLE",
        requires: Requirement::Always,
    },
    DiagnosticMsr {
        address: msr::MSR_TEMPERATURE_TARGET,
        name: "MSR_TEMPERATURE_TARGET",
        requires: Requirement::Always,
    },
    DiagnosticMsr {
        address: msr::IA32_ENERGY_PERF_BIAS,
        name: "IA32_ENERGY_PERF_BIAS",
        requires: Requirement::EnergyPerfBias,
    },
    DiagnosticMsr {
        address: msr::IA32_PACKAGE_THERM_STATUS,
        name: "IA32_PACKAGE_THERM_STATUS",
        requires: Requirement::PackageThermal,
    },
    DiagnosticMsr {
        address: msr::IA32_PACKAGE_THERM_INTERRUPT,
        name: "IA32_PACKAGE_THERM_INTERRUPT",
        requires: Requirement::PackageThermal,
    },
    DiagnosticMsr {
        address: msr::IA32_PERF_CAPABILITIES,
        name: "IA32_PERF_CAPABILITIES",
        requires: Requirement::Pdcm,
    },
    DiagnosticMsr {
        address: msr::MSR_CORE_PERF_LIMIT_REASONS,
        name: "MSR_CORE_PERF_LIMIT_REASONS",
        requires: Requirement::Always,
    },
    DiagnosticMsr {
        address: msr::IA32_PKG_HDC_CTL,
        name: "IA32_PKG_HDC_CTL",
        requires: Requirement::Hdc,
    },
    DiagnosticMsr {
        address: msr::IA32_PM_CTL1,
        name: "IA32_PM_CTL1",
        requires: Requirement::Hdc,
    },
    DiagnosticMsr {
        address: msr::IA32_THREAD_STALL,
        name: "IA32_THREAD_STALL",
        requires: Requirement::Hdc,
    },
];

/// Look up a diagnostic register by address
pub fn lookup(address: u32) -> Option<&'static DiagnosticMsr> {
    DIAGNOSTIC_MSRS.iter().find(|m| m.address == address)
}
