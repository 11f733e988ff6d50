//! Ambient tracing/logging setup, carried forward from the teacher
//! workspace regardless of spec.md's non-goals on metrics/CLI (SPEC_FULL.md
//! §1.2): every component still logs through `tracing`.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;
