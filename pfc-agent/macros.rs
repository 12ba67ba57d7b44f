//! Declarative macros to reduce boilerplate across the pfc codebase

/// Define a static event catalog with its unit masks
///
/// # Example
/// ```
/// use pfc::event_catalog;
/// use pfc::events::catalog::{Event, Umask};
///
/// event_catalog! {
///     pub static DEMO_EVENTS = [
///         0x0E "uops_issued" {
///             0x01 => "any",
///             0x10 => "flags_merge",
///         },
///         0x3C "cpu_clk_unhalted" {
///             0x00 => "core_clk",
///         },
///     ];
/// }
///
/// assert_eq!(DEMO_EVENTS.len(), 2);
/// assert_eq!(DEMO_EVENTS[0].umasks[1].name, "flags_merge");
/// ```
///
/// Expands to a `&'static [Event]` whose entries keep declaration order;
/// name lookups walk the slice front to back, so order decides which of two
/// duplicate unit-mask names wins.
#[macro_export]
macro_rules! event_catalog {
    (
        $(#[$meta:meta])*
        $vis:vis static $name:ident = [
            $(
                $code:literal $event:literal {
                    $($value:literal => $umask:literal),* $(,)?
                }
            ),* $(,)?
        ];
    ) => {
        $(#[$meta])*
        $vis static $name: &[$crate::events::catalog::Event] = &[
            $(
                $crate::events::catalog::Event {
                    code: $code,
                    name: $event,
                    umasks: &[
                        $($crate::events::catalog::Umask {
                            value: $value,
                            name: $umask,
                        },)*
                    ],
                },
            )*
        ];
    };
}

/// One RDPMC sample step: read `$selector` and apply `$op` to the buffer
/// slot at byte offset `$offset` (operand `{buf}`).
#[cfg(target_arch = "x86_64")]
macro_rules! rdpmc_slot {
    ($op:literal, $selector:literal, $offset:literal) => {
        concat!(
            "mov ecx, ", $selector, "\n",
            "rdpmc\n",
            "shl rdx, 32\n",
            "or rdx, rax\n",
            $op, " qword ptr [{buf} + ", $offset, "], rdx\n",
        )
    };
}

/// Generate a fenced RDPMC sequence over the seven sample slots
///
/// Slots 0-2 read the fixed-function counters, slots 3-6 the first four
/// general-purpose counters. `$op` is `"sub"` for START and `"add"` for END;
/// nothing else differs between the two expansions.
///
/// # Example
/// ```ignore
/// pmc_sequence! {
///     /// Subtract the current counter values
///     pub(crate) fn pmc_start => "sub"
/// }
/// ```
#[cfg(target_arch = "x86_64")]
macro_rules! pmc_sequence {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident => $op:literal
    ) => {
        $(#[$meta])*
        #[inline(always)]
        $vis fn $name(buf: &mut $crate::sampling::SampleBuffer) {
            // SAFETY: `buf` is exclusively borrowed and holds seven i64
            // slots, the highest offset written is 48. RDPMC faults unless
            // user-space reads are enabled, which the session checks before
            // handing out a sampler.
            unsafe {
                std::arch::asm!(
                    "lfence",
                    rdpmc_slot!($op, "0x40000000", "0"),
                    rdpmc_slot!($op, "0x40000001", "8"),
                    rdpmc_slot!($op, "0x40000002", "16"),
                    rdpmc_slot!($op, "0", "24"),
                    rdpmc_slot!($op, "1", "32"),
                    rdpmc_slot!($op, "2", "40"),
                    rdpmc_slot!($op, "3", "48"),
                    "lfence",
                    buf = in(reg) buf.as_mut_ptr(),
                    out("rax") _,
                    out("rcx") _,
                    out("rdx") _,
                    options(nostack),
                );
            }
        }
    };
}

/// Apply one sampling sequence to a software counter source
///
/// Mirrors `pmc_sequence!` for backends that answer RDPMC in software:
/// every slot is read in the same order and combined with `$op`.
///
/// # Example
/// ```ignore
/// sample_sequence!(self, buf, wrapping_sub);
/// ```
macro_rules! sample_sequence {
    ($source:expr, $buf:expr, $op:ident) => {
        for (slot, selector) in $crate::sampling::SLOT_SELECTORS.iter().enumerate() {
            let value = $source.rdpmc(*selector) as i64;
            $buf[slot] = $buf[slot].$op(value);
        }
    };
}
