use std::io;
use thiserror::Error;

use pfc_raw::MsrError;

/// Numeric codes crossing the library boundary
///
/// Each code maps to exactly one fixed message; that mapping is the whole
/// contract. Zero is success, every failure is a small negative integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    ServiceUnavailable = -1,
    WriteFailed = -2,
    PartialWrite = -3,
    CpuPinFailed = -4,
    FastReadPathDisabled = -5,
    AffinityFailed = -6,
    MaskReadIncomplete = -7,
    Misaligned = -8,
    MsrNotAllowed = -9,
    UnsupportedArchitecture = -10,
    ReadOnly = -11,
    ReadFailed = -12,
}

impl ErrorCode {
    const ALL: [ErrorCode; 13] = [
        ErrorCode::Ok,
        ErrorCode::ServiceUnavailable,
        ErrorCode::WriteFailed,
        ErrorCode::PartialWrite,
        ErrorCode::CpuPinFailed,
        ErrorCode::FastReadPathDisabled,
        ErrorCode::AffinityFailed,
        ErrorCode::MaskReadIncomplete,
        ErrorCode::Misaligned,
        ErrorCode::MsrNotAllowed,
        ErrorCode::UnsupportedArchitecture,
        ErrorCode::ReadOnly,
        ErrorCode::ReadFailed,
    ];

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_i32() == code)
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::Ok => "Success",
            ErrorCode::ServiceUnavailable => {
                "Error opening the MSR device. Is the msr kernel module loaded?"
            }
            ErrorCode::WriteFailed => "Error writing to the counter registers (write failed).",
            ErrorCode::PartialWrite => {
                "Write to the counter registers wrote fewer bytes than expected."
            }
            ErrorCode::CpuPinFailed => "Pinning benchmark to single CPU failed.",
            ErrorCode::FastReadPathDisabled => {
                "CR4.PCE not set. Try echo 2 > /sys/bus/event_source/devices/cpu/rdpmc."
            }
            ErrorCode::AffinityFailed => {
                "Setting CPU affinity failed (perhaps affinity is set externally excluding the CPU?)"
            }
            ErrorCode::MaskReadIncomplete => {
                "Didn't read the expected number of mask bytes from the register file"
            }
            ErrorCode::Misaligned => "Register file access is not 8-byte aligned.",
            ErrorCode::MsrNotAllowed => "MSR is not on the diagnostic allow-list for this CPU.",
            ErrorCode::UnsupportedArchitecture => {
                "Unsupported performance monitoring architecture version, only 3 or 4 supported."
            }
            ErrorCode::ReadOnly => "Register file is read-only.",
            ErrorCode::ReadFailed => "Error reading from the counter registers (read failed).",
        }
    }
}

/// Human-readable string for a raw error code
pub fn error_string(code: i32) -> &'static str {
    ErrorCode::from_i32(code)
        .map(ErrorCode::message)
        .unwrap_or("Unknown Error")
}

#[derive(Error, Debug)]
pub enum PfcError {
    #[error("Counter service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Fast counter read path disabled: {0}")]
    FastReadPathDisabled(String),

    #[error("Mask read incomplete: got {got} of {expected} bytes")]
    MaskReadIncomplete { got: usize, expected: usize },

    #[error("MSR write failed: {0}")]
    WriteFailed(#[source] MsrError),

    #[error("Partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    #[error("MSR read failed: {0}")]
    ReadFailed(#[source] MsrError),

    #[error("Pinning thread to CPU {cpu} failed: {source}")]
    CpuPinFailed { cpu: usize, source: nix::Error },

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    #[error("Misaligned register file access: offset {offset}, length {length}")]
    Misaligned { offset: i64, length: i64 },

    #[error("MSR 0x{0:X} is not readable through the diagnostic file")]
    MsrNotAllowed(u32),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Register file {0} is read-only")]
    ReadOnly(&'static str),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl PfcError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PfcError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            PfcError::FastReadPathDisabled(_) => ErrorCode::FastReadPathDisabled,
            PfcError::MaskReadIncomplete { .. } => ErrorCode::MaskReadIncomplete,
            PfcError::WriteFailed(_) => ErrorCode::WriteFailed,
            PfcError::PartialWrite { .. } => ErrorCode::PartialWrite,
            PfcError::ReadFailed(_) => ErrorCode::ReadFailed,
            PfcError::CpuPinFailed { .. } => ErrorCode::CpuPinFailed,
            PfcError::AffinityError(_) => ErrorCode::AffinityFailed,
            PfcError::Misaligned { .. } => ErrorCode::Misaligned,
            PfcError::MsrNotAllowed(_) => ErrorCode::MsrNotAllowed,
            PfcError::UnsupportedArchitecture(_) => ErrorCode::UnsupportedArchitecture,
            PfcError::ReadOnly(_) => ErrorCode::ReadOnly,
            PfcError::IoError(_) => ErrorCode::ServiceUnavailable,
        }
    }

    /// Negative integer form of [`PfcError::code`]
    pub fn raw_code(&self) -> i32 {
        self.code().as_i32()
    }
}

impl From<MsrError> for PfcError {
    fn from(e: MsrError) -> Self {
        match e {
            MsrError::OpenFailed { .. } => PfcError::ServiceUnavailable(e.to_string()),
            MsrError::PartialWrite { written, .. } => PfcError::PartialWrite {
                written,
                expected: 8,
            },
            MsrError::WriteFailed { .. } => PfcError::WriteFailed(e),
            MsrError::ReadFailed { .. } | MsrError::ShortRead { .. } => PfcError::ReadFailed(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, PfcError>;
