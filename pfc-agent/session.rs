//! Measurement session
//!
//! [`Pfc`] owns one backend, the capability detected on it and the sample
//! masks. Opening a session performs the handshake in a fixed order:
//!
//! 1. open the register service (MSR device), `ServiceUnavailable`
//! 2. check user-space RDPMC, `FastReadPathDisabled`
//! 3. detect the counter layout, `UnsupportedArchitecture`
//! 4. optionally reset every counter
//! 5. read the width masks of the seven sample slots, `MaskReadIncomplete`

use crate::backend::{RegisterAccess, Sample};
use crate::common::capability::{Capability, Counter};
use crate::common::cpuid::CpuidSource;
use crate::counters::broker::RegisterBroker;
use crate::counters::diag;
use crate::counters::dispatch::{RegisterFile, WORD_BYTES};
use crate::error::{PfcError, Result};
use crate::sampling::{self, SampleBuffer, SampleMasks, FIXED_SLOTS, GENERAL_SLOTS, SAMPLE_SLOTS};

pub struct Pfc<A: RegisterAccess> {
    backend: A,
    capability: Capability,
    masks: SampleMasks,
}

#[cfg(target_arch = "x86_64")]
impl Pfc<crate::backend::HardwarePmu> {
    /// Open a session on the real PMU of `config.core`
    ///
    /// The calling thread should already be pinned to that core; see
    /// [`pin_thread`](crate::common::affinity::pin_thread).
    pub fn init(config: &crate::config::SessionConfig) -> Result<Self> {
        let backend = crate::backend::HardwarePmu::open(config)?;
        Self::with_cpuid(backend, &crate::common::cpuid::NativeCpuid, config.reset_on_init)
    }
}

impl<A: RegisterAccess> Pfc<A> {
    /// Open a session on a backend that also answers CPUID, resetting counters
    pub fn open(backend: A) -> Result<Self>
    where
        A: CpuidSource,
    {
        Self::check_fast_read(&backend)?;
        let capability = Capability::detect(&backend, &backend)?;
        Self::finish(backend, capability, true)
    }

    /// Open a session with an explicit CPUID source
    pub fn with_cpuid<C>(backend: A, cpuid: &C, reset: bool) -> Result<Self>
    where
        C: CpuidSource + ?Sized,
    {
        Self::check_fast_read(&backend)?;
        let capability = Capability::detect(cpuid, &backend)?;
        Self::finish(backend, capability, reset)
    }

    fn check_fast_read(backend: &A) -> Result<()> {
        if backend.fast_read_enabled()? {
            Ok(())
        } else {
            Err(PfcError::FastReadPathDisabled(
                "user-space RDPMC is not unconditionally enabled".to_string(),
            ))
        }
    }

    fn finish(backend: A, capability: Capability, reset: bool) -> Result<Self> {
        let mut pfc = Self {
            backend,
            capability,
            masks: [0; SAMPLE_SLOTS],
        };
        if reset {
            pfc.reset()?;
        }
        pfc.masks = pfc.load_masks()?;
        tracing::debug!("Sample masks: {:x?}", pfc.masks);
        Ok(pfc)
    }

    /// Width masks of the seven sample slots
    ///
    /// Slots map to fixed counters 0-2 and general-purpose counters 0-3
    /// regardless of how many counters precede them in the register file.
    fn load_masks(&self) -> Result<SampleMasks> {
        let broker = self.broker();
        let mut bytes = [0u8; SAMPLE_SLOTS * WORD_BYTES];
        let (fixed, general) = bytes.split_at_mut(FIXED_SLOTS * WORD_BYTES);

        let general_offset = (self.capability.fixed * WORD_BYTES) as i64;
        let got = RegisterFile::Masks.read(&broker, 0, fixed)?
            + RegisterFile::Masks.read(&broker, general_offset, &mut general[..GENERAL_SLOTS * WORD_BYTES])?;
        if got != bytes.len() {
            return Err(PfcError::MaskReadIncomplete {
                got,
                expected: bytes.len(),
            });
        }

        let mut masks = [0u64; SAMPLE_SLOTS];
        for (mask, word) in masks.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
            let mut raw = [0u8; WORD_BYTES];
            raw.copy_from_slice(word);
            *mask = u64::from_ne_bytes(raw);
        }
        Ok(masks)
    }

    pub fn backend(&self) -> &A {
        &self.backend
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn broker(&self) -> RegisterBroker<'_, A> {
        RegisterBroker::new(&self.backend, &self.capability)
    }

    /// Read a register file at a byte offset; returns bytes serviced
    pub fn read_file(&self, file: RegisterFile, offset: i64, buf: &mut [u8]) -> Result<usize> {
        file.read(&self.broker(), offset, buf)
    }

    /// Write a register file at a byte offset; returns bytes serviced
    pub fn write_file(&self, file: RegisterFile, offset: i64, buf: &[u8]) -> Result<usize> {
        file.write(&self.broker(), offset, buf)
    }

    /// Program counters `k..k + cfgs.len()` of the unified register file
    pub fn write_configs(&self, k: usize, cfgs: &[u64]) -> Result<()> {
        let bytes: Vec<u8> = cfgs.iter().flat_map(|c| c.to_ne_bytes()).collect();
        self.write_all(RegisterFile::Config, k, &bytes)
    }

    /// Read configurations starting at counter `k`; returns words read
    pub fn read_configs(&self, k: usize, cfgs: &mut [u64]) -> Result<usize> {
        let mut bytes = vec![0u8; cfgs.len() * WORD_BYTES];
        let read = self.read_file(RegisterFile::Config, offset_of(k), &mut bytes)?;
        Ok(unpack(&bytes[..read], cfgs, |w| w))
    }

    /// Set counter values starting at counter `k`
    pub fn write_counts(&self, k: usize, counts: &[i64]) -> Result<()> {
        let bytes: Vec<u8> = counts.iter().flat_map(|c| c.to_ne_bytes()).collect();
        self.write_all(RegisterFile::Counts, k, &bytes)
    }

    /// Read counter values starting at counter `k`; returns words read
    pub fn read_counts(&self, k: usize, counts: &mut [i64]) -> Result<usize> {
        let mut bytes = vec![0u8; counts.len() * WORD_BYTES];
        let read = self.read_file(RegisterFile::Counts, offset_of(k), &mut bytes)?;
        Ok(unpack(&bytes[..read], counts, |w| w as i64))
    }

    /// Width masks of the sample slots, as read during the handshake
    pub fn read_masks(&self) -> &SampleMasks {
        &self.masks
    }

    /// Read an allow-listed diagnostic MSR
    pub fn read_msr(&self, address: u32) -> Result<u64> {
        diag::read(&self.backend, &self.capability.features, address)
    }

    /// Put every counter back into its disabled, zeroed state
    pub fn reset(&self) -> Result<()> {
        self.broker().reset()
    }

    /// Value of one counter, by family and local index
    pub fn read_counter(&self, counter: Counter) -> Result<u64> {
        self.broker().read_value(counter)
    }

    /// Subtract the cost of `mul` START/END pairs from `buf`
    pub fn remove_bias(&self, buf: &mut SampleBuffer, mul: i64)
    where
        A: Sample,
    {
        sampling::remove_bias(&self.backend, &self.masks, buf, mul);
    }

    fn write_all(&self, file: RegisterFile, k: usize, bytes: &[u8]) -> Result<()> {
        let written = self.write_file(file, offset_of(k), bytes)?;
        if written < bytes.len() {
            return Err(PfcError::PartialWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }
}

fn offset_of(k: usize) -> i64 {
    (k * WORD_BYTES) as i64
}

fn unpack<T>(bytes: &[u8], out: &mut [T], convert: impl Fn(u64) -> T) -> usize {
    let mut n = 0;
    for (slot, word) in out.iter_mut().zip(bytes.chunks_exact(WORD_BYTES)) {
        let mut raw = [0u8; WORD_BYTES];
        raw.copy_from_slice(word);
        *slot = convert(u64::from_ne_bytes(raw));
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedPmu;
    use crate::error::ErrorCode;
    use crate::events::parse_config;
    use pfc_raw::perfmon::core::msr;

    #[test]
    fn test_handshake_failures() {
        let err = Pfc::open(SimulatedPmu::builder().fast_read(false).build())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::FastReadPathDisabled);

        let err = Pfc::open(SimulatedPmu::builder().version(2).build()).err().unwrap();
        assert_eq!(err.code(), ErrorCode::UnsupportedArchitecture);

        let err = Pfc::open(SimulatedPmu::builder().general_counters(2, 48).build())
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::MaskReadIncomplete);
    }

    #[test]
    fn test_masks_follow_sample_slots() {
        let pmu = SimulatedPmu::builder()
            .version(4)
            .fixed_counters(4, 48)
            .general_counters(8, 40)
            .build();
        let pfc = Pfc::open(pmu).unwrap();
        let fixed = 0xFFFF_FFFF_FFFF;
        let general = 0xFF_FFFF_FFFF;
        assert_eq!(
            pfc.read_masks(),
            &[fixed, fixed, fixed, general, general, general, general]
        );
    }

    #[test]
    fn test_open_resets_counters() {
        let pmu = SimulatedPmu::default();
        pmu.poke(msr::IA32_PERF_GLOBAL_CTRL, 0xF);
        pmu.poke(msr::IA32_PMC0, 1234);
        let pfc = Pfc::open(pmu).unwrap();
        assert_eq!(pfc.backend().peek(msr::IA32_PERF_GLOBAL_CTRL), 0);
        assert_eq!(pfc.read_counter(Counter::General(0)).unwrap(), 0);
    }

    #[test]
    fn test_configs_and_counts() {
        let pfc = Pfc::open(SimulatedPmu::default()).unwrap();
        let cfgs = [
            2,
            2,
            2,
            parse_config("uops_issued.any"),
            parse_config("cpu_clk_unhalted.core_clk"),
        ];
        pfc.write_configs(0, &cfgs).unwrap();

        let mut back = [0u64; 7];
        assert_eq!(pfc.read_configs(0, &mut back).unwrap(), 7);
        assert_eq!(&back[..5], &cfgs);

        pfc.write_counts(3, &[10, 20]).unwrap();
        let mut counts = [0i64; 2];
        assert_eq!(pfc.read_counts(3, &mut counts).unwrap(), 2);
        assert_eq!(counts, [10, 20]);

        let mut tail = [0i64; 4];
        assert_eq!(pfc.read_counts(5, &mut tail).unwrap(), 2);
    }

    #[test]
    fn test_repeated_config_write_is_idempotent() {
        let pfc = Pfc::open(SimulatedPmu::default()).unwrap();
        let snapshot = |pfc: &Pfc<SimulatedPmu>| {
            [
                msr::IA32_PERF_GLOBAL_CTRL,
                msr::IA32_FIXED_CTR_CTRL,
                msr::IA32_PERFEVTSEL0,
                msr::IA32_PERFEVTSEL0 + 1,
            ]
            .map(|addr| pfc.backend().peek(addr))
        };

        let cfgs = [2, 0, 2, 0x0043_010E, 0x0041_003C];
        pfc.write_configs(0, &cfgs).unwrap();
        let once = snapshot(&pfc);
        pfc.write_configs(0, &cfgs).unwrap();
        assert_eq!(snapshot(&pfc), once);
        // OS mode is stripped on this generation.
        assert_eq!(once[2], 0x0041_010E);
    }

    #[test]
    fn test_write_errors() {
        let pfc = Pfc::open(SimulatedPmu::default()).unwrap();
        let err = pfc.write_configs(6, &[0, 0]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::PartialWrite);

        pfc.backend().fail_writes_to(msr::IA32_PERFEVTSEL0 + 1);
        let err = pfc.write_configs(4, &[0x0041_003C]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WriteFailed);
    }

    #[test]
    fn test_start_end_delta() {
        let pfc = Pfc::open(SimulatedPmu::default()).unwrap();
        pfc.write_configs(0, &[2, 2, 2, parse_config("uops_issued.any")]).unwrap();

        let mut buf = sampling::new_buffer();
        pfc.backend().start(&mut buf);
        pfc.backend().advance(1000);
        pfc.backend().end(&mut buf);
        assert_eq!(buf, [1000, 1000, 1000, 1000, 0, 0, 0]);
    }

    #[test]
    fn test_diagnostic_reads() {
        let pfc = Pfc::open(SimulatedPmu::default()).unwrap();
        assert_eq!(pfc.read_msr(msr::IA32_PERF_CAPABILITIES).unwrap(), 1 << 13);
        assert_eq!(pfc.read_msr(msr::IA32_PMC0).unwrap_err().code(), ErrorCode::MsrNotAllowed);
    }
}
