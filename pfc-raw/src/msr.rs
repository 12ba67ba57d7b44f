//! MSR (Model-Specific Register) read/write primitives
//!
//! This module provides low-level MSR access through `/dev/cpu/*/msr`. The
//! device file is addressed positionally: the file offset is the MSR address
//! and every transfer is exactly eight bytes.
//!
//! Policy (reserved bits, forbidden bits, unknown registers) lives above this
//! layer, in the register broker of `pfc-agent`.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, MsrError>;

/// Errors that can occur during MSR operations
#[derive(Debug, thiserror::Error)]
pub enum MsrError {
    #[error("Failed to open MSR device {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read MSR 0x{msr:X} on CPU {cpu}: {source}")]
    ReadFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Short read of MSR 0x{msr:X} on CPU {cpu}: {read} of 8 bytes")]
    ShortRead { cpu: u32, msr: u32, read: usize },

    #[error("Failed to write MSR 0x{msr:X} on CPU {cpu}: {source}")]
    WriteFailed {
        cpu: u32,
        msr: u32,
        source: std::io::Error,
    },

    #[error("Partial write of MSR 0x{msr:X} on CPU {cpu}: {written} of 8 bytes")]
    PartialWrite { cpu: u32, msr: u32, written: usize },
}

/// Default device path for a CPU
pub fn device_path(cpu: u32) -> PathBuf {
    PathBuf::from(format!("/dev/cpu/{cpu}/msr"))
}

/// An open MSR device for one logical CPU
///
/// # Example
///
/// ```ignore
/// use pfc_raw::MsrDevice;
///
/// let dev = MsrDevice::open(0)?;
/// let value = dev.read(0x38F)?;
/// println!("IA32_PERF_GLOBAL_CTRL = 0x{:016X}", value);
/// ```
#[derive(Debug)]
pub struct MsrDevice {
    file: File,
    cpu: u32,
}

impl MsrDevice {
    /// Open `/dev/cpu/<cpu>/msr` for reading and writing
    ///
    /// # Errors
    ///
    /// Fails if the `msr` kernel module is not loaded or the caller lacks
    /// `CAP_SYS_RAWIO`.
    pub fn open(cpu: u32) -> Result<Self> {
        Self::open_path(cpu, device_path(cpu))
    }

    /// Open an MSR device at an explicit path
    pub fn open_path(cpu: u32, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC) // Ensure synchronous writes
            .open(path)
            .map_err(|e| MsrError::OpenFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(Self { file, cpu })
    }

    /// CPU this device addresses
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// Read a 64-bit value from an MSR
    ///
    /// # Errors
    ///
    /// Returns an error if the MSR address is invalid or not readable on
    /// this processor (the kernel reports `EIO`).
    pub fn read(&self, msr: u32) -> Result<u64> {
        let mut buffer = [0u8; 8];
        let read = self
            .file
            .read_at(&mut buffer, msr as u64)
            .map_err(|e| MsrError::ReadFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;

        if read != buffer.len() {
            return Err(MsrError::ShortRead {
                cpu: self.cpu,
                msr,
                read,
            });
        }

        Ok(u64::from_le_bytes(buffer))
    }

    /// Write a 64-bit value to an MSR
    ///
    /// # Safety
    ///
    /// Writing incorrect values to MSRs can cause system instability or crashes.
    /// Callers are expected to preserve reserved bits; this function writes the
    /// value verbatim.
    pub fn write(&self, msr: u32, value: u64) -> Result<()> {
        let written = self
            .file
            .write_at(&value.to_le_bytes(), msr as u64)
            .map_err(|e| MsrError::WriteFailed {
                cpu: self.cpu,
                msr,
                source: e,
            })?;

        if written != 8 {
            return Err(MsrError::PartialWrite {
                cpu: self.cpu,
                msr,
                written,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_error_display() {
        let err = MsrError::OpenFailed {
            path: device_path(0),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open MSR device"));
        assert!(err.to_string().contains("/dev/cpu/0/msr"));
    }

    #[test]
    fn test_partial_write_display() {
        let err = MsrError::PartialWrite {
            cpu: 3,
            msr: 0x38F,
            written: 4,
        };
        assert_eq!(
            err.to_string(),
            "Partial write of MSR 0x38F on CPU 3: 4 of 8 bytes"
        );
    }

    #[test]
    fn test_open_missing_device() {
        let result = MsrDevice::open_path(0, "/nonexistent/cpu/0/msr");
        assert!(matches!(result, Err(MsrError::OpenFailed { .. })));
    }
}
