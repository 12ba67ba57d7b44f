//! Architecture-specific register definitions
//!
//! Counter programming follows the architectural performance monitoring
//! interface enumerated by CPUID leaf 0x0A, so a single definition set covers
//! every processor reporting ArchPerfMon version 3 or 4.

pub mod perfmon;
