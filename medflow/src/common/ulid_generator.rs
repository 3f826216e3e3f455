//! Monotonic ULID generator
//!
//! Workflow ids must be unique for the lifetime of their TTL window and
//! should sort by creation time, so every id is drawn from one process-wide
//! monotonic generator instead of `Ulid::new()`.

use std::sync::{Mutex, OnceLock};
use ulid::{Generator, Ulid};

static ULID_GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

fn get_generator() -> &'static Mutex<Generator> {
    ULID_GENERATOR.get_or_init(|| Mutex::new(Generator::new()))
}

/// Generate a monotonic ULID
///
/// Each call returns a ULID strictly greater than the previous one. If the
/// random component overflows within a single millisecond, a fresh
/// non-monotonic ULID is returned rather than failing.
pub fn generate_monotonic_ulid() -> Ulid {
    let mut generator = get_generator()
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

/// Generate a monotonic ULID as a string (26 characters, base32)
pub fn generate_monotonic_ulid_string() -> String {
    generate_monotonic_ulid().to_string()
}
