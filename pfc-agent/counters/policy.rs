// Versioned configuration policy: forbidden bits and counter routing

use pfc_raw::perfmon::core::{FixedCtrField, PerfEvtSel};

use crate::common::capability::PerfmonVersion;

/// An event that only counts correctly on one general-purpose counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingQuirk {
    pub event: u8,
    /// Unit masks the quirk applies to; empty means every unit mask
    pub umasks: &'static [u8],
    /// The only general-purpose counter allowed to host the event
    pub counter: usize,
    pub name: &'static str,
}

impl RoutingQuirk {
    pub fn matches(&self, config: u64) -> bool {
        PerfEvtSel::event_of(config) == self.event
            && (self.umasks.is_empty() || self.umasks.contains(&PerfEvtSel::umask_of(config)))
    }
}

pub const ROUTING_QUIRKS: &[RoutingQuirk] = &[
    RoutingQuirk {
        event: 0x48,
        umasks: &[],
        counter: 2,
        name: "l1d_pend_miss",
    },
    RoutingQuirk {
        event: 0xA3,
        umasks: &[0x08, 0x0C],
        counter: 2,
        name: "cycle_activity.l1d_pending",
    },
    RoutingQuirk {
        event: 0xC0,
        umasks: &[0x01],
        counter: 1,
        name: "inst_retired.prec_dist",
    },
];

/// What a counter configuration may contain on one hardware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigPolicy {
    pub version: PerfmonVersion,
    /// PERFEVTSEL bits cleared before every write
    pub general_forbidden: u64,
    /// Bits of a fixed-function control field that survive a write
    pub fixed_allowed: u64,
    pub quirks: &'static [RoutingQuirk],
}

/// ArchPerfMon v3: user-mode counting only, no interrupts, no pin control
pub static STRICT: ConfigPolicy = ConfigPolicy {
    version: PerfmonVersion::V3,
    general_forbidden: PerfEvtSel::OS | PerfEvtSel::PC | PerfEvtSel::INT | PerfEvtSel::ANY,
    fixed_allowed: FixedCtrField::USR,
    quirks: ROUTING_QUIRKS,
};

/// ArchPerfMon v4: ring filtering and any-thread permitted, still no interrupts
pub static RELAXED: ConfigPolicy = ConfigPolicy {
    version: PerfmonVersion::V4,
    general_forbidden: PerfEvtSel::PC | PerfEvtSel::INT,
    fixed_allowed: FixedCtrField::MASK & !FixedCtrField::PMI,
    quirks: ROUTING_QUIRKS,
};

impl ConfigPolicy {
    pub fn for_version(version: PerfmonVersion) -> &'static ConfigPolicy {
        match version {
            PerfmonVersion::V3 => &STRICT,
            PerfmonVersion::V4 => &RELAXED,
        }
    }

    /// The routing quirk a configuration falls under, if any
    pub fn quirk_for(&self, config: u64) -> Option<&'static RoutingQuirk> {
        self.quirks.iter().find(|q| q.matches(config))
    }

    /// Configuration actually written to PERFEVTSEL of counter `index`
    pub fn sanitize_general(&self, index: usize, config: u64) -> u64 {
        let config = config & !self.general_forbidden;
        match self.quirk_for(config) {
            Some(quirk) if quirk.counter != index => {
                tracing::warn!(
                    "{} only counts on general-purpose counter {}, disabling counter {}",
                    quirk.name,
                    quirk.counter,
                    index
                );
                0
            }
            _ => config,
        }
    }

    /// Fixed-function control field actually written for one counter
    pub fn sanitize_fixed(&self, field: u64) -> u64 {
        field & self.fixed_allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_forbidden_bits() {
        assert_eq!(STRICT.general_forbidden, 0x003A_0000);
        // uops_issued.any:auk
        assert_eq!(STRICT.sanitize_general(0, 0x0063_010E), 0x0041_010E);
        assert_eq!(STRICT.sanitize_fixed(0xF), 0x2);
        assert_eq!(STRICT.sanitize_fixed(0x1), 0x0);
    }

    #[test]
    fn test_relaxed_forbidden_bits() {
        assert_eq!(RELAXED.sanitize_general(0, 0x0063_010E), 0x0063_010E);
        assert_eq!(RELAXED.sanitize_general(0, 0x0058_010E), 0x0040_010E);
        assert_eq!(RELAXED.sanitize_fixed(0xF), 0x7);
        assert_eq!(RELAXED.sanitize_fixed(0x7), 0x7);
    }

    #[test]
    fn test_routing_quirks() {
        for policy in [&STRICT, &RELAXED] {
            // l1d_pend_miss.pending
            assert_eq!(policy.sanitize_general(2, 0x0041_0148), 0x0041_0148);
            assert_eq!(policy.sanitize_general(0, 0x0041_0148), 0);
            assert_eq!(policy.sanitize_general(3, 0x0041_0048), 0);

            // cycle_activity.cycles_l1d_pending / stalls_l1d_pending
            assert_eq!(policy.sanitize_general(1, 0x0041_08A3), 0);
            assert_eq!(policy.sanitize_general(1, 0x0041_0CA3), 0);
            assert_eq!(policy.sanitize_general(1, 0x0041_01A3), 0x0041_01A3);

            // inst_retired.prec_dist vs inst_retired.any_p
            assert_eq!(policy.sanitize_general(1, 0x0041_01C0), 0x0041_01C0);
            assert_eq!(policy.sanitize_general(0, 0x0041_01C0), 0);
            assert_eq!(policy.sanitize_general(0, 0x0041_00C0), 0x0041_00C0);
        }
    }

    #[test]
    fn test_policy_by_version() {
        assert_eq!(ConfigPolicy::for_version(PerfmonVersion::V3), &STRICT);
        assert_eq!(ConfigPolicy::for_version(PerfmonVersion::V4).version, PerfmonVersion::V4);
    }
}
