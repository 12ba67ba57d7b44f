//! Configuration compiler
//!
//! Turns a human-readable event string into a PERFEVTSEL value:
//!
//! ```text
//! [*]event.umask[>=cmask|<cmask][:mode]
//! ```
//!
//! - `*` requests edge detection.
//! - `event` is a catalog name (any case) or an integer up to 0xFF whose code
//!   is present in the catalog.
//! - `umask` is a unit-mask name of that event (any case) or an integer up to
//!   0xFF.
//! - `>=N` counts cycles with at least N events, `<N` cycles with fewer
//!   (inverted counter mask).
//! - `mode` is any combination of `a` (any thread), `u` (user), `k` (kernel).
//!   Without a mode suffix the event counts in user mode only.
//!
//! Integers follow C `strtoull` base-0 rules (`0x` hex, leading `0` octal).
//! Malformed input compiles to `0`, which leaves the counter disabled; the
//! compiler never fails.

use pfc_raw::perfmon::core::PerfEvtSel;
use pfc_raw::RegisterLayout;

use crate::events::catalog::{EventCatalog, Umask};

/// Compile `s` against the built-in catalog
pub fn parse_config(s: &str) -> u64 {
    parse_config_with(&EventCatalog::haswell(), s)
}

/// Compile `s` against an explicit catalog
pub fn parse_config_with(catalog: &EventCatalog, s: &str) -> u64 {
    let s = s.as_bytes();
    if s.is_empty() {
        return 0;
    }

    let mut pos = 0;
    let edge = s[0] == b'*';
    if edge {
        pos += 1;
    }

    // Event: by name, else by number.
    let rest = &s[pos..];
    let named = catalog
        .iter()
        .find(|e| starts_with_ignore_case(rest, e.name) && rest.get(e.name.len()) == Some(&b'.'));
    let (event_select, umasks): (u8, &[Umask]) = match named {
        Some(event) => {
            pos += event.name.len() + 1;
            (event.code, event.umasks)
        }
        None => {
            let (value, used) = strtoull(rest);
            pos += used;
            if s.get(pos) != Some(&b'.') || value > 0xFF {
                return 0;
            }
            pos += 1;
            match catalog.by_code(value as u8) {
                Some(event) => (event.code, event.umasks),
                None => return 0,
            }
        }
    };

    // Unit mask: by name, else by number.
    let rest = &s[pos..];
    let named = umasks
        .iter()
        .find(|u| starts_with_ignore_case(rest, u.name) && ends_umask(&rest[u.name.len()..]));
    let umask = match named {
        Some(u) => {
            pos += u.name.len();
            u.value
        }
        None => {
            let (value, used) = strtoull(rest);
            pos += used;
            if value > 0xFF || !ends_umask(&s[pos..]) {
                return 0;
            }
            value as u8
        }
    };

    // Counter mask and comparison.
    let rest = &s[pos..];
    let mut invert = false;
    let mut cmask = 0;
    if rest.starts_with(b">=") && rest.get(2).is_some_and(u8::is_ascii_digit) {
        let (value, used) = strtoull(&rest[2..]);
        cmask = value as u8;
        pos += 2 + used;
    } else if rest.starts_with(b"<") && rest.get(1).is_some_and(u8::is_ascii_digit) {
        let (value, used) = strtoull(&rest[1..]);
        invert = true;
        cmask = value as u8;
        pos += 1 + used;
    }

    // Mode.
    let (mut usr, mut os, mut any_thread) = (true, false, false);
    if s.get(pos) == Some(&b':') {
        (usr, os, any_thread) = (false, false, false);
        for c in &s[pos + 1..] {
            match c.to_ascii_lowercase() {
                b'a' => any_thread = true,
                b'u' => usr = true,
                b'k' => os = true,
                _ => break,
            }
        }
    }

    PerfEvtSel {
        event_select,
        umask,
        usr,
        os,
        edge,
        any_thread,
        enable: true,
        invert,
        cmask,
        ..Default::default()
    }
    .to_msr_value()
}

fn starts_with_ignore_case(s: &[u8], prefix: &str) -> bool {
    s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// A unit mask ends at end of input, `:`, `<` or `>=`
fn ends_umask(rest: &[u8]) -> bool {
    match rest.first() {
        None | Some(b':') | Some(b'<') => true,
        Some(b'>') => rest.get(1) == Some(&b'='),
        _ => false,
    }
}

/// C `strtoull(s, &end, 0)`: returns the value and the bytes consumed
///
/// Leading whitespace and one sign are accepted, a negative value wraps, and
/// overflow saturates to `u64::MAX`. Nothing is consumed when no digits
/// follow.
pub fn strtoull(s: &[u8]) -> (u64, usize) {
    let mut pos = 0;
    while s.get(pos).is_some_and(|c| c.is_ascii_whitespace() || *c == 0x0B) {
        pos += 1;
    }

    let negative = match s.get(pos) {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };

    let is_hex_prefix = s.get(pos) == Some(&b'0')
        && matches!(s.get(pos + 1), Some(b'x') | Some(b'X'))
        && s.get(pos + 2).is_some_and(u8::is_ascii_hexdigit);
    let radix = if is_hex_prefix {
        pos += 2;
        16
    } else if s.get(pos) == Some(&b'0') {
        8
    } else {
        10
    };

    let digits_start = pos;
    let mut value: u64 = 0;
    let mut overflow = false;
    while let Some(digit) = s.get(pos).and_then(|c| (*c as char).to_digit(radix)) {
        match value
            .checked_mul(radix as u64)
            .and_then(|v| v.checked_add(digit as u64))
        {
            Some(v) => value = v,
            None => overflow = true,
        }
        pos += 1;
    }

    if pos == digits_start {
        return (0, 0);
    }
    if overflow {
        return (u64::MAX, pos);
    }
    (if negative { value.wrapping_neg() } else { value }, pos)
}
