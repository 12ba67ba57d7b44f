//! Range clamp and dispatch over the unified register files
//!
//! A register file is a flat array of 64-bit words: the fixed-function
//! counters occupy indices `[0, ff)` and the general-purpose counters
//! `[ff, ff + gp)`. Callers address it with byte offsets and lengths, which
//! must be multiples of eight. A request is clamped against each segment in
//! turn and the overlapping counters are serviced in ascending index order;
//! anything outside both segments is silently ignored.

use std::ops::Range;

use crate::backend::RegisterAccess;
use crate::common::capability::{Capability, Counter};
use crate::counters::broker::RegisterBroker;
use crate::error::{PfcError, Result};

/// Size of one register-file word in bytes
pub const WORD_BYTES: usize = 8;

const ALIGN_MASK: i64 = WORD_BYTES as i64 - 1;

/// Overlap of `[offset, offset + len)` with `[start, end)`, in register units
pub fn clamp_range(offset: i64, len: i64, start: usize, end: usize) -> Option<Range<usize>> {
    let (start, end) = (start as i64, end as i64);
    if len <= 0 || offset.saturating_add(len) <= start || offset >= end {
        return None;
    }
    let lo = offset.max(start);
    let hi = offset.saturating_add(len).min(end);
    Some(lo as usize..hi as usize)
}

/// Counters touched by a byte range, in the order their words are transferred
pub fn plan(cap: &Capability, offset: i64, length: i64) -> Result<Vec<Counter>> {
    if offset < 0 || length < 0 || (offset | length) & ALIGN_MASK != 0 {
        return Err(PfcError::Misaligned { offset, length });
    }

    let (offset, len) = (offset >> 3, length >> 3);
    let mut counters = Vec::new();

    let fixed = cap.fixed_range();
    if let Some(r) = clamp_range(offset, len, fixed.start, fixed.end) {
        counters.extend(r.map(|i| Counter::Fixed(i - fixed.start)));
    }

    let general = cap.general_range();
    if let Some(r) = clamp_range(offset, len, general.start, general.end) {
        counters.extend(r.map(|i| Counter::General(i - general.start)));
    }

    Ok(counters)
}

/// The three register files a session exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFile {
    /// Fixed control fields and PERFEVTSEL values
    Config,
    /// Counter width masks
    Masks,
    /// Counter values
    Counts,
}

impl RegisterFile {
    pub fn name(&self) -> &'static str {
        match self {
            RegisterFile::Config => "config",
            RegisterFile::Masks => "masks",
            RegisterFile::Counts => "counts",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, RegisterFile::Masks)
    }

    /// Fill `buf` from the words at byte `offset`
    ///
    /// Returns the number of bytes serviced, zero when nothing overlaps.
    pub fn read<A>(&self, broker: &RegisterBroker<'_, A>, offset: i64, buf: &mut [u8]) -> Result<usize>
    where
        A: RegisterAccess + ?Sized,
    {
        let cap = broker.capability();
        let counters = plan(cap, offset, buf.len() as i64)?;

        for (counter, word) in counters.iter().zip(buf.chunks_exact_mut(WORD_BYTES)) {
            let value = match self {
                RegisterFile::Config => broker.read_config(*counter)?,
                RegisterFile::Masks => cap.value_mask(*counter),
                RegisterFile::Counts => broker.read_value(*counter)?,
            };
            word.copy_from_slice(&value.to_ne_bytes());
        }

        Ok(counters.len() * WORD_BYTES)
    }

    /// Store the words of `buf` starting at byte `offset`
    ///
    /// Returns the number of bytes serviced, zero when nothing overlaps.
    pub fn write<A>(&self, broker: &RegisterBroker<'_, A>, offset: i64, buf: &[u8]) -> Result<usize>
    where
        A: RegisterAccess + ?Sized,
    {
        if !self.is_writable() {
            return Err(PfcError::ReadOnly(self.name()));
        }

        let counters = plan(broker.capability(), offset, buf.len() as i64)?;

        for (counter, word) in counters.iter().zip(buf.chunks_exact(WORD_BYTES)) {
            let mut bytes = [0u8; WORD_BYTES];
            bytes.copy_from_slice(word);
            let value = u64::from_ne_bytes(bytes);
            match self {
                RegisterFile::Config => broker.write_config(*counter, value)?,
                RegisterFile::Counts => broker.write_value(*counter, value)?,
                RegisterFile::Masks => return Err(PfcError::ReadOnly(self.name())),
            }
        }

        Ok(counters.len() * WORD_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedPmu;
    use crate::error::ErrorCode;

    fn words(values: &[u64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    fn unwords(bytes: &[u8]) -> Vec<u64> {
        bytes
            .chunks_exact(8)
            .map(|c| u64::from_ne_bytes(c.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_clamp_range() {
        assert_eq!(clamp_range(0, 7, 0, 3), Some(0..3));
        assert_eq!(clamp_range(0, 7, 3, 7), Some(3..7));
        assert_eq!(clamp_range(2, 2, 0, 3), Some(2..3));
        assert_eq!(clamp_range(2, 2, 3, 7), Some(3..4));
        assert_eq!(clamp_range(3, 4, 0, 3), None);
        assert_eq!(clamp_range(7, 1, 3, 7), None);
        assert_eq!(clamp_range(0, 0, 0, 3), None);
        assert_eq!(clamp_range(1, -1, 0, 3), None);
    }

    #[test]
    fn test_plan_covers_exactly_the_overlap() {
        let pmu = SimulatedPmu::default();
        let cap = Capability::detect(&pmu, &pmu).unwrap();
        let total = cap.total() as i64;

        for start in 0..=total + 2 {
            for len in 0..=total + 2 {
                let counters = plan(&cap, start * 8, len * 8).unwrap();
                let expected: Vec<usize> = (start..start + len)
                    .filter(|i| *i < total)
                    .map(|i| i as usize)
                    .collect();
                let got: Vec<usize> = counters
                    .iter()
                    .map(|c| cap.index_of(*c).unwrap())
                    .collect();
                assert_eq!(got, expected, "start {start} len {len}");
            }
        }
    }

    #[test]
    fn test_misaligned_requests() {
        let pmu = SimulatedPmu::default();
        let cap = Capability::detect(&pmu, &pmu).unwrap();

        for (offset, length) in [(4, 8), (8, 12), (-8, 8), (0, -8)] {
            let err = plan(&cap, offset, length).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Misaligned);
        }
    }

    #[test]
    fn test_config_file_round_trip() {
        let pmu = SimulatedPmu::builder().version(4).build();
        let cap = Capability::detect(&pmu, &pmu).unwrap();
        let broker = RegisterBroker::new(&pmu, &cap);

        let written = RegisterFile::Config
            .write(&broker, 0, &words(&[3, 3, 7, 0x0041_010E]))
            .unwrap();
        assert_eq!(written, 32);

        let mut buf = vec![0u8; 7 * 8];
        let read = RegisterFile::Config.read(&broker, 0, &mut buf).unwrap();
        assert_eq!(read, 56);
        assert_eq!(unwords(&buf), vec![3, 3, 7, 0x0041_010E, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let pmu = SimulatedPmu::default();
        let cap = Capability::detect(&pmu, &pmu).unwrap();
        let broker = RegisterBroker::new(&pmu, &cap);

        let mut buf = vec![0u8; 16];
        assert_eq!(RegisterFile::Counts.read(&broker, 56, &mut buf).unwrap(), 0);
        assert_eq!(RegisterFile::Counts.write(&broker, 48, &words(&[5, 6])).unwrap(), 8);
        assert_eq!(broker.read_value(Counter::General(3)).unwrap(), 5);
    }

    #[test]
    fn test_masks_file() {
        let pmu = SimulatedPmu::builder()
            .full_width_writes(false)
            .fixed_counters(3, 40)
            .build();
        let cap = Capability::detect(&pmu, &pmu).unwrap();
        let broker = RegisterBroker::new(&pmu, &cap);

        let mut buf = vec![0u8; 16];
        RegisterFile::Masks.read(&broker, 16, &mut buf).unwrap();
        assert_eq!(unwords(&buf), vec![0xFF_FFFF_FFFF, 0xFFFF_FFFF]);

        let err = RegisterFile::Masks.write(&broker, 0, &buf).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReadOnly);
    }
}
