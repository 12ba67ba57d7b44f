// Read-only diagnostic MSR file

use pfc_raw::perfmon::misc::{self, DiagnosticMsr, Requirement};

use crate::backend::RegisterAccess;
use crate::common::capability::FeatureFlags;
use crate::error::{PfcError, Result};

/// Whether the processor implements the feature a register depends on
pub fn requirement_met(requirement: Requirement, features: &FeatureFlags) -> bool {
    match requirement {
        Requirement::Always => true,
        Requirement::Acpi => features.acpi,
        Requirement::Pdcm => features.pdcm,
        Requirement::PackageThermal => features.package_thermal,
        Requirement::Hdc => features.hdc,
        Requirement::EnergyPerfBias => features.energy_perf_bias,
    }
}

/// The allow-list entry for `address`, if this processor may read it
pub fn allowed(address: u32, features: &FeatureFlags) -> Option<&'static DiagnosticMsr> {
    misc::lookup(address).filter(|m| requirement_met(m.requires, features))
}

/// Every diagnostic register this processor may read
pub fn available(features: &FeatureFlags) -> impl Iterator<Item = &'static DiagnosticMsr> + '_ {
    misc::DIAGNOSTIC_MSRS
        .iter()
        .filter(move |m| requirement_met(m.requires, features))
}

/// Read one allow-listed register by raw address
pub fn read<A>(access: &A, features: &FeatureFlags, address: u32) -> Result<u64>
where
    A: RegisterAccess + ?Sized,
{
    let entry = allowed(address, features).ok_or(PfcError::MsrNotAllowed(address))?;
    let value = access.read_msr(address)?;
    tracing::debug!("{} (0x{:x}) = 0x{:016x}", entry.name, address, value);
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedPmu;
    use crate::error::ErrorCode;
    use pfc_raw::perfmon::misc::msr;

    fn features() -> FeatureFlags {
        FeatureFlags {
            pdcm: true,
            acpi: true,
            package_thermal: false,
            hdc: false,
            energy_perf_bias: true,
        }
    }

    #[test]
    fn test_allow_list() {
        let f = features();
        assert!(allowed(msr::MSR_PLATFORM_INFO, &f).is_some());
        assert!(allowed(msr::IA32_THERM_STATUS, &f).is_some());
        assert!(allowed(msr::IA32_ENERGY_PERF_BIAS, &f).is_some());
        assert!(allowed(msr::IA32_PACKAGE_THERM_STATUS, &f).is_none());
        assert!(allowed(msr::IA32_PKG_HDC_CTL, &f).is_none());
        assert!(allowed(0x38F, &f).is_none());
        assert_eq!(available(&f).count(), 9);
    }

    #[test]
    fn test_read() {
        let pmu = SimulatedPmu::default();
        pmu.poke(msr::MSR_PLATFORM_INFO, 0x2000);
        assert_eq!(read(&pmu, &features(), msr::MSR_PLATFORM_INFO).unwrap(), 0x2000);

        let err = read(&pmu, &features(), 0x309).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MsrNotAllowed);
    }
}
