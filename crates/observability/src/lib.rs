//! Process-wide logging setup shared by the binaries.

/// Initialize structured JSON logging (default level `info`, overridable via `RUST_LOG`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

pub mod tracing;
