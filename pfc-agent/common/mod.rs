pub mod affinity;
pub mod capability;
pub mod cpuid;

pub use affinity::{pin_thread, AffinityGuard};
pub use capability::{Capability, Counter, CounterDescriptor, PerfmonVersion};
pub use cpuid::{CpuidResult, CpuidSource, NativeCpuid};
