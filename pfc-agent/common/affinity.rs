use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{PfcError, Result};

/// Pins the calling thread to one core and restores the previous mask on drop
pub struct AffinityGuard {
    old_affinity: CpuSet,
    cpu: usize,
}

impl AffinityGuard {
    pub fn new(cpu: usize) -> Result<Self> {
        let old_affinity = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| PfcError::AffinityError(format!("Failed to get affinity: {e}")))?;

        set_single_cpu(cpu)?;
        tracing::debug!("Pinned thread to CPU {cpu}");

        Ok(Self { old_affinity, cpu })
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        if let Err(e) = sched_setaffinity(Pid::from_raw(0), &self.old_affinity) {
            tracing::warn!("Failed to restore affinity after CPU {}: {e}", self.cpu);
        }
    }
}

/// Pin the calling thread to `cpu` for the rest of its life
///
/// Counter reads through RDPMC observe whichever core the thread runs on, so
/// measurement threads must stay on the core the session programmed.
pub fn pin_thread(cpu: usize) -> Result<()> {
    set_single_cpu(cpu)?;
    tracing::info!("Thread pinned to CPU {cpu}");
    Ok(())
}

fn set_single_cpu(cpu: usize) -> Result<()> {
    let mut new_affinity = CpuSet::new();
    new_affinity
        .set(cpu)
        .map_err(|source| PfcError::CpuPinFailed { cpu, source })?;

    sched_setaffinity(Pid::from_raw(0), &new_affinity).map_err(|e| {
        PfcError::AffinityError(format!("Failed to set affinity to CPU {cpu}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_out_of_range_cpu_rejected() {
        let err = pin_thread(CpuSet::count() + 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CpuPinFailed);
    }

    #[test]
    fn test_guard_restores_affinity() {
        let before = sched_getaffinity(Pid::from_raw(0)).unwrap();
        let Some(cpu) = (0..CpuSet::count()).find(|&c| before.is_set(c).unwrap_or(false)) else {
            return;
        };

        {
            let guard = AffinityGuard::new(cpu).unwrap();
            assert_eq!(guard.cpu(), cpu);
            let pinned = sched_getaffinity(Pid::from_raw(0)).unwrap();
            assert!(pinned.is_set(cpu).unwrap());
        }

        let after = sched_getaffinity(Pid::from_raw(0)).unwrap();
        assert_eq!(before, after);
    }
}
