//! Core PMU register definitions for architectural performance monitoring
//!
//! Covers the fixed-function counters (IA32_FIXED_CTRx), the general-purpose
//! counters (IA32_PMCx / IA32_A_PMCx) and the control registers shared between
//! them, as defined for ArchPerfMon versions 3 and 4.
//!
//! ## References
//!
//! - Intel® 64 and IA-32 Architectures Software Developer's Manual, Volume 3B
//! - Chapter 18: Performance Monitoring

use crate::register::{bits, field, ones, RegisterLayout};

/// Hard ceiling on fixed-function plus general-purpose counters
pub const MAX_PMC: usize = 25;

/// Width of one fixed-function control field in IA32_FIXED_CTR_CTRL
pub const FIXED_CTRL_FIELD_BITS: u32 = 4;

/// First fixed-function enable bit in IA32_PERF_GLOBAL_CTRL
pub const GLOBAL_CTRL_FIXED_SHIFT: u32 = 32;

/// Selector bit used by RDPMC to address the fixed-function counters
pub const RDPMC_FIXED_SELECTOR: u32 = 1 << 30;

/// MSR addresses for Core PMU
pub mod msr {
    /// Performance Counter registers, legacy 32-bit write alias (IA32_PMCx)
    pub const IA32_PMC0: u32 = 0xC1;

    /// Performance Event Select registers (IA32_PERFEVTSELx)
    pub const IA32_PERFEVTSEL0: u32 = 0x186;

    /// Fixed-function Performance Counters
    pub const IA32_FIXED_CTR0: u32 = 0x309; // Instructions Retired

    /// Performance Capabilities Enumeration
    pub const IA32_PERF_CAPABILITIES: u32 = 0x345;

    /// Fixed-function Performance Counter Control
    pub const IA32_FIXED_CTR_CTRL: u32 = 0x38D;

    /// Performance Counter Global Status (read-only)
    pub const IA32_PERF_GLOBAL_STATUS: u32 = 0x38E;

    /// Performance Counter Global Control
    pub const IA32_PERF_GLOBAL_CTRL: u32 = 0x38F;

    /// Performance Counter Global Overflow Control
    pub const IA32_PERF_GLOBAL_OVF_CTRL: u32 = 0x390;

    /// Full-width write alias of the general-purpose counters (IA32_A_PMCx)
    pub const IA32_A_PMC0: u32 = 0x4C1;
}

/// Core Performance Event Select Register layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                    |
/// |--------|-------------|--------------------------------|
/// | 0-7    | event_select| Event select                   |
/// | 8-15   | umask       | Unit mask                      |
/// | 16     | usr         | User mode                      |
/// | 17     | os          | OS mode                        |
/// | 18     | edge        | Edge detect                    |
/// | 19     | pc          | Pin control                    |
/// | 20     | int         | APIC interrupt enable          |
/// | 21     | any_thread  | Any thread                     |
/// | 22     | enable      | Enable counter                 |
/// | 23     | invert      | Invert counter mask            |
/// | 24-31  | cmask       | Counter mask                   |
///
/// Bits 32-63 are reserved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfEvtSel {
    pub event_select: u8,
    pub umask: u8,
    pub usr: bool,
    pub os: bool,
    pub edge: bool,
    pub pc: bool,
    pub int: bool,
    pub any_thread: bool,
    pub enable: bool,
    pub invert: bool,
    pub cmask: u8,
}

impl PerfEvtSel {
    pub const EVENT_SHIFT: u32 = 0;
    pub const UMASK_SHIFT: u32 = 8;
    pub const USR_SHIFT: u32 = 16;
    pub const OS_SHIFT: u32 = 17;
    pub const EDGE_SHIFT: u32 = 18;
    pub const PC_SHIFT: u32 = 19;
    pub const INT_SHIFT: u32 = 20;
    pub const ANY_SHIFT: u32 = 21;
    pub const ENABLE_SHIFT: u32 = 22;
    pub const INVERT_SHIFT: u32 = 23;
    pub const CMASK_SHIFT: u32 = 24;

    pub const USR: u64 = 1 << Self::USR_SHIFT;
    pub const OS: u64 = 1 << Self::OS_SHIFT;
    pub const EDGE: u64 = 1 << Self::EDGE_SHIFT;
    pub const PC: u64 = 1 << Self::PC_SHIFT;
    pub const INT: u64 = 1 << Self::INT_SHIFT;
    pub const ANY: u64 = 1 << Self::ANY_SHIFT;
    pub const ENABLE: u64 = 1 << Self::ENABLE_SHIFT;
    pub const INVERT: u64 = 1 << Self::INVERT_SHIFT;

    /// Bits the hardware defines; everything above is reserved
    pub const DEFINED: u64 = ones(32, 0);

    /// Reserved bits that must be preserved across writes
    pub const RESERVED: u64 = !Self::DEFINED;

    /// Event select field of a raw value
    pub const fn event_of(value: u64) -> u8 {
        field(value, 8, Self::EVENT_SHIFT) as u8
    }

    /// Unit mask field of a raw value
    pub const fn umask_of(value: u64) -> u8 {
        field(value, 8, Self::UMASK_SHIFT) as u8
    }

    /// Whether a raw value has its enable bit set
    pub const fn is_enabled(value: u64) -> bool {
        value & Self::ENABLE != 0
    }
}

impl RegisterLayout for PerfEvtSel {
    fn to_msr_value(&self) -> u64 {
        bits(self.event_select as u64, 8, Self::EVENT_SHIFT)
            | bits(self.umask as u64, 8, Self::UMASK_SHIFT)
            | bits(self.usr as u64, 1, Self::USR_SHIFT)
            | bits(self.os as u64, 1, Self::OS_SHIFT)
            | bits(self.edge as u64, 1, Self::EDGE_SHIFT)
            | bits(self.pc as u64, 1, Self::PC_SHIFT)
            | bits(self.int as u64, 1, Self::INT_SHIFT)
            | bits(self.any_thread as u64, 1, Self::ANY_SHIFT)
            | bits(self.enable as u64, 1, Self::ENABLE_SHIFT)
            | bits(self.invert as u64, 1, Self::INVERT_SHIFT)
            | bits(self.cmask as u64, 8, Self::CMASK_SHIFT)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            event_select: Self::event_of(value),
            umask: Self::umask_of(value),
            usr: value & Self::USR != 0,
            os: value & Self::OS != 0,
            edge: value & Self::EDGE != 0,
            pc: value & Self::PC != 0,
            int: value & Self::INT != 0,
            any_thread: value & Self::ANY != 0,
            enable: value & Self::ENABLE != 0,
            invert: value & Self::INVERT != 0,
            cmask: field(value, 8, Self::CMASK_SHIFT) as u8,
        }
    }
}

/// One 4-bit control field of IA32_FIXED_CTR_CTRL
///
/// Counter `i` owns bits `[4i, 4i+4)`:
///
/// | Bit | Field      | Description                                |
/// |-----|------------|--------------------------------------------|
/// | 0   | os         | Count in ring 0                            |
/// | 1   | usr        | Count in rings 1-3                         |
/// | 2   | any_thread | Count for all threads of the core          |
/// | 3   | pmi        | Interrupt on overflow                      |
///
/// Bits 0-1 together form the enable mode (0 disabled, 1 OS, 2 user, 3 all).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedCtrField {
    pub os: bool,
    pub usr: bool,
    pub any_thread: bool,
    pub pmi: bool,
}

impl FixedCtrField {
    pub const OS: u64 = 1 << 0;
    pub const USR: u64 = 1 << 1;
    pub const ANY: u64 = 1 << 2;
    pub const PMI: u64 = 1 << 3;

    /// Enable-mode sub-field; counting happens when any of these is set
    pub const ENABLE_MODE: u64 = Self::OS | Self::USR;

    /// All bits of one field
    pub const MASK: u64 = ones(FIXED_CTRL_FIELD_BITS, 0);

    /// Bit offset of counter `index`'s field
    ///
    /// Indices past the register saturate to 64, which every bit-vector
    /// helper treats as an empty field.
    pub const fn shift(index: usize) -> u32 {
        if index >= (64 / FIXED_CTRL_FIELD_BITS) as usize {
            64
        } else {
            FIXED_CTRL_FIELD_BITS * index as u32
        }
    }

    /// Extract counter `index`'s field from a raw IA32_FIXED_CTR_CTRL value
    pub const fn extract(ctrl: u64, index: usize) -> u64 {
        field(ctrl, FIXED_CTRL_FIELD_BITS, Self::shift(index))
    }

    /// Whether a raw 4-bit field selects any enable mode
    pub const fn is_enabled(value: u64) -> bool {
        value & Self::ENABLE_MODE != 0
    }
}

impl RegisterLayout for FixedCtrField {
    fn to_msr_value(&self) -> u64 {
        (if self.os { Self::OS } else { 0 })
            | (if self.usr { Self::USR } else { 0 })
            | (if self.any_thread { Self::ANY } else { 0 })
            | (if self.pmi { Self::PMI } else { 0 })
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            os: value & Self::OS != 0,
            usr: value & Self::USR != 0,
            any_thread: value & Self::ANY != 0,
            pmi: value & Self::PMI != 0,
        }
    }
}

/// IA32_PERF_GLOBAL_CTRL / STATUS / OVF_CTRL bit positions
///
/// General-purpose counter `i` uses bit `i`, fixed counter `i` uses bit
/// `32 + i`. The overflow control register additionally owns bits 61-63.
pub struct GlobalCtrl;

impl GlobalCtrl {
    /// Enable bit position of general-purpose counter `index`
    pub const fn general_bit(index: usize) -> u32 {
        Self::saturate(index)
    }

    /// Enable bit position of fixed-function counter `index`
    pub const fn fixed_bit(index: usize) -> u32 {
        GLOBAL_CTRL_FIXED_SHIFT + Self::saturate(index)
    }

    // Positions past bit 63 select nothing.
    const fn saturate(index: usize) -> u32 {
        if index >= 64 {
            64
        } else {
            index as u32
        }
    }

    /// Bits of the global registers that belong to existing counters
    pub const fn counters(fixed: usize, general: usize) -> u64 {
        ones(fixed as u32, GLOBAL_CTRL_FIXED_SHIFT) | ones(general as u32, 0)
    }

    /// ClrCondChgd, ClrOvfDSBuffer and ClrOvfUncore in IA32_PERF_GLOBAL_OVF_CTRL
    pub const OVF_STATUS_BITS: u64 = ones(3, 61);
}

/// IA32_PERF_CAPABILITIES layout (fields of interest)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PerfCapabilities {
    /// LBR format (bits 0-5)
    pub lbr_format: u8,
    /// PEBS record format (bits 8-11)
    pub pebs_record_format: u8,
    /// SMM freeze support (bit 12)
    pub smm_freeze: bool,
    /// Full-width writes to IA32_A_PMCx (bit 13)
    pub full_width_write: bool,
}

impl PerfCapabilities {
    pub const FULL_WIDTH_WRITE_SHIFT: u32 = 13;
}

impl RegisterLayout for PerfCapabilities {
    fn to_msr_value(&self) -> u64 {
        bits(self.lbr_format as u64, 6, 0)
            | bits(self.pebs_record_format as u64, 4, 8)
            | bits(self.smm_freeze as u64, 1, 12)
            | bits(self.full_width_write as u64, 1, Self::FULL_WIDTH_WRITE_SHIFT)
    }

    fn from_msr_value(value: u64) -> Self {
        Self {
            lbr_format: field(value, 6, 0) as u8,
            pebs_record_format: field(value, 4, 8) as u8,
            smm_freeze: field(value, 1, 12) != 0,
            full_width_write: field(value, 1, Self::FULL_WIDTH_WRITE_SHIFT) != 0,
        }
    }
}

/// RDPMC selector for fixed-function counter `index`
pub const fn rdpmc_fixed(index: u32) -> u32 {
    RDPMC_FIXED_SELECTOR | index
}

/// RDPMC selector for general-purpose counter `index`
pub const fn rdpmc_general(index: u32) -> u32 {
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_evtsel_round_trip() {
        let evtsel = PerfEvtSel {
            event_select: 0x5C,
            umask: 0x01,
            usr: true,
            os: true,
            edge: true,
            enable: true,
            cmask: 1,
            ..Default::default()
        };

        let value = evtsel.to_msr_value();
        assert_eq!(value, 0x0147_015C);
        assert_eq!(PerfEvtSel::from_msr_value(value), evtsel);
    }

    #[test]
    fn test_perf_evtsel_ignores_reserved_half() {
        let decoded = PerfEvtSel::from_msr_value(0xFFFF_FFFF_0040_0000);
        assert!(decoded.enable);
        assert_eq!(decoded.to_msr_value(), PerfEvtSel::ENABLE);
        assert_eq!(PerfEvtSel::RESERVED, 0xFFFF_FFFF_0000_0000);
    }

    #[test]
    fn test_fixed_field_positions() {
        let ctrl = 0x0000_0000_0000_0B20;
        assert_eq!(FixedCtrField::extract(ctrl, 0), 0x0);
        assert_eq!(FixedCtrField::extract(ctrl, 1), 0x2);
        assert_eq!(FixedCtrField::extract(ctrl, 2), 0xB);

        let decoded = FixedCtrField::from_msr_value(0xB);
        assert!(decoded.os && decoded.usr && decoded.pmi && !decoded.any_thread);
        assert!(FixedCtrField::is_enabled(0x1));
        assert!(!FixedCtrField::is_enabled(0x4));

        assert_eq!(FixedCtrField::shift(15), 60);
        assert_eq!(FixedCtrField::shift(16), 64);
        assert_eq!(FixedCtrField::extract(u64::MAX, usize::MAX), 0);
    }

    #[test]
    fn test_global_ctrl_bits() {
        assert_eq!(GlobalCtrl::fixed_bit(2), 34);
        assert_eq!(GlobalCtrl::general_bit(3), 3);
        assert_eq!(GlobalCtrl::counters(3, 4), 0x0000_0007_0000_000F);
        assert_eq!(GlobalCtrl::general_bit(usize::MAX), 64);
        assert_eq!(GlobalCtrl::fixed_bit(usize::MAX), 96);
    }

    #[test]
    fn test_perf_capabilities_full_width() {
        let caps = PerfCapabilities::from_msr_value(0x3304);
        assert!(caps.full_width_write);
        assert!(caps.smm_freeze);
        assert_eq!(caps.pebs_record_format, 3);
        assert_eq!(caps.lbr_format, 4);
    }

    #[test]
    fn test_rdpmc_selectors() {
        assert_eq!(rdpmc_fixed(2), 0x4000_0002);
        assert_eq!(rdpmc_general(3), 3);
    }
}
