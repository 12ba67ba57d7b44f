//! Generic register abstractions for type-safe MSR programming

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// This trait provides type-safe conversion between structured register
/// layouts and the raw 64-bit values that are written to/read from MSRs.
///
/// # Example
///
/// ```ignore
/// use pfc_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_msr_value(&self) -> u64 {
///         (if self.enable { 1 } else { 0 })
///             | ((self.threshold as u64) << 8)
///     }
///
///     fn from_msr_value(value: u64) -> Self {
///         Self {
///             enable: (value & 1) != 0,
///             threshold: ((value >> 8) & 0xFF) as u8,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw MSR value
    fn to_msr_value(&self) -> u64;

    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;
}

/// Ones vector: the `n` bits starting at bit `k` are set, all others clear.
///
/// `n >= 64` saturates to a full word before shifting.
pub const fn ones(n: u32, k: u32) -> u64 {
    let v = if n >= 64 { u64::MAX } else { (1u64 << n) - 1 };
    if k >= 64 {
        0
    } else {
        v << k
    }
}

/// Zeros vector: the `n` bits starting at bit `k` are clear, all others set.
pub const fn zeros(n: u32, k: u32) -> u64 {
    !ones(n, k)
}

/// Bit vector: the low `n` bits of `v` placed at bit `k`.
pub const fn bits(v: u64, n: u32, k: u32) -> u64 {
    let v = v & ones(n, 0);
    if k >= 64 {
        0
    } else {
        v << k
    }
}

/// Clear vector: `v` with the `n` bits starting at bit `k` cleared.
pub const fn clear(v: u64, n: u32, k: u32) -> u64 {
    v & zeros(n, k)
}

/// Extract the `n`-bit field starting at bit `k` of `v`.
pub const fn field(v: u64, n: u32, k: u32) -> u64 {
    if k >= 64 {
        0
    } else {
        (v >> k) & ones(n, 0)
    }
}

/// Blend a new register value with the reserved bits of the old one.
///
/// Bits set in `reserved` are taken from `old`, every other bit from `new`.
pub const fn blend(reserved: u64, old: u64, new: u64) -> u64 {
    (!reserved & new) | (reserved & old)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ones_and_zeros() {
        assert_eq!(ones(0, 0), 0);
        assert_eq!(ones(8, 0), 0xFF);
        assert_eq!(ones(4, 8), 0xF00);
        assert_eq!(ones(64, 0), u64::MAX);
        assert_eq!(ones(70, 0), u64::MAX);
        assert_eq!(ones(3, 61), 0xE000_0000_0000_0000);
        assert_eq!(zeros(4, 4), !0xF0);
    }

    #[test]
    fn test_bits_truncates_value() {
        assert_eq!(bits(0x1F, 4, 4), 0xF0);
        assert_eq!(bits(0x2, 4, 8), 0x200);
    }

    #[test]
    fn test_clear_and_field() {
        assert_eq!(clear(0xFFF, 4, 4), 0xF0F);
        assert_eq!(field(0xABC, 4, 4), 0xB);
        assert_eq!(field(0xABC, 4, 64), 0);
    }

    #[test]
    fn test_blend_preserves_reserved_bits() {
        let reserved = 0xFFFF_FFFF_0000_0000;
        let old = 0x1234_5678_0000_0000;
        let new = 0xDEAD_BEEF_0043_003C;
        assert_eq!(blend(reserved, old, new), 0x1234_5678_0043_003C);
    }
}
