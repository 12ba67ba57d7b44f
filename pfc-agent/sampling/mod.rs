//! Sample buffers and bias calibration
//!
//! A sample buffer has one signed 64-bit slot per sampled counter: the three
//! fixed-function counters first, then the first four general-purpose
//! counters. On cores with exactly three fixed counters the slot order matches
//! the unified register-file order.

pub mod bias;

pub use bias::{remove_bias, BIAS_WARMUP_ITERATIONS};

use pfc_raw::perfmon::core::{rdpmc_fixed, rdpmc_general};

/// Fixed-function counters covered by a sample
pub const FIXED_SLOTS: usize = 3;

/// General-purpose counters covered by a sample
pub const GENERAL_SLOTS: usize = 4;

/// Total slots in a [`SampleBuffer`]
pub const SAMPLE_SLOTS: usize = FIXED_SLOTS + GENERAL_SLOTS;

/// Per-slot accumulated counter deltas
pub type SampleBuffer = [i64; SAMPLE_SLOTS];

/// Per-slot width masks, as read from the masks register file
pub type SampleMasks = [u64; SAMPLE_SLOTS];

/// RDPMC selector of every slot, in slot order
pub const SLOT_SELECTORS: [u32; SAMPLE_SLOTS] = [
    rdpmc_fixed(0),
    rdpmc_fixed(1),
    rdpmc_fixed(2),
    rdpmc_general(0),
    rdpmc_general(1),
    rdpmc_general(2),
    rdpmc_general(3),
];

/// A zeroed sample buffer
pub const fn new_buffer() -> SampleBuffer {
    [0; SAMPLE_SLOTS]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_selectors() {
        assert_eq!(SLOT_SELECTORS[0], 0x4000_0000);
        assert_eq!(SLOT_SELECTORS[2], 0x4000_0002);
        assert_eq!(SLOT_SELECTORS[3], 0);
        assert_eq!(SLOT_SELECTORS[6], 3);
        assert_eq!(new_buffer(), [0i64; 7]);
    }
}
