use crate::backend::Sample;
use crate::sampling::{new_buffer, SampleBuffer, SampleMasks, SAMPLE_SLOTS};

/// Warm-up passes before the measured bias is kept
pub const BIAS_WARMUP_ITERATIONS: usize = 10;

/// Subtract the intrinsic cost of `mul` START/END pairs from `buf`
///
/// Each pass runs END then START on a zeroed scratch buffer, the reverse of a
/// measurement, so the scratch ends up holding the negated cost of one pair.
/// Only the last pass is kept; the earlier ones settle caches and branch
/// predictors. Every slot is finally reduced modulo its counter width.
pub fn remove_bias<S>(sampler: &S, masks: &SampleMasks, buf: &mut SampleBuffer, mul: i64)
where
    S: Sample + ?Sized,
{
    let mut warmup = new_buffer();
    for _ in 0..BIAS_WARMUP_ITERATIONS {
        warmup.fill(0);
        sampler.end(&mut warmup);
        sampler.start(&mut warmup);
    }

    for slot in 0..SAMPLE_SLOTS {
        let adjusted = buf[slot].wrapping_add(warmup[slot].wrapping_mul(mul));
        buf[slot] = (adjusted as u64 & masks[slot]) as i64;
    }

    tracing::trace!("Removed sampling bias {:?} x{}", warmup, mul);
}
