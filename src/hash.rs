//! Stable fingerprints for procedures and call traces
//!
//! Proc and trace identifiers are Rabin–Karp rolling hashes with a fixed
//! multiplier and modulus. The constants are part of the persistence
//! contract: the same fully-qualified name must map to the same
//! `proc_id` in every process that ever writes to a store, or the
//! per-pid database files could not be merged post-hoc.

/// Rolling-hash multiplier (the Mersenne prime 2^19 - 1).
pub const FINGERPRINT_MULTIPLIER: i64 = 524_287;

/// Rolling-hash modulus (the Mersenne prime 2^31 - 1).
pub const FINGERPRINT_MODULUS: i64 = 2_147_483_647;

/// Sentinel proc id for "top-level / no caller".
///
/// No `proc_ids` row ever exists for it; the reporting views render it
/// as an empty caller name.
pub const NO_CALLER: i64 = 0;

/// Fingerprint a byte sequence.
///
/// Folds `h <- (h * a + byte) mod p` over the input, starting from 0.
/// Deterministic across runs, processes and machines.
pub fn fingerprint_bytes(bytes: &[u8]) -> i64 {
    let mut h: i64 = 0;
    for &b in bytes {
        h = (h * FINGERPRINT_MULTIPLIER + i64::from(b)) % FINGERPRINT_MODULUS;
    }
    h
}

/// Fingerprint a sequence of integers with the same fold as
/// [`fingerprint_bytes`].
///
/// Negative inputs are reduced into the modulus range first so the fold
/// never leaves `[0, p)`.
pub fn fingerprint_ints(values: &[i64]) -> i64 {
    let mut h: i64 = 0;
    for &v in values {
        let v = v.rem_euclid(FINGERPRINT_MODULUS);
        h = (h * FINGERPRINT_MULTIPLIER + v) % FINGERPRINT_MODULUS;
    }
    h
}

/// Stable id for a fully-qualified procedure name.
pub fn proc_id(proc_name: &str) -> i64 {
    fingerprint_bytes(proc_name.as_bytes())
}

/// Per-call trace id.
///
/// Disambiguates concurrent or recursive invocations on the same
/// (caller, callee) edge: the enter and leave events of one call carry
/// the same `(thread, depth, caller, line, callee)` tuple while a
/// recursive re-entry differs in depth and an overlapping call on
/// another thread differs in thread id.
pub fn trace_id(thread_id: i64, stack_depth: i64, caller_id: i64, source_line: i64, callee_id: i64) -> i64 {
    fingerprint_ints(&[thread_id, stack_depth, caller_id, source_line, callee_id])
}
