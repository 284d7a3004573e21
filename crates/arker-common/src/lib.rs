pub mod config;
pub mod error;
pub mod log_sink;
pub mod short_id;
pub mod types;

pub use config::Config;
pub use error::ArkerError;
pub use log_sink::LogSink;
pub use types::*;

/// Deterministic content hash for change detection (FNV-1a). Stable across
/// process restarts, unlike `DefaultHasher`.
pub fn content_hash(content: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in content {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Storage key for an archive item: `"<short_id>/<type><ext>.zst"`.
pub fn storage_key(short_id: &str, kind: ArchiveKind, ext: &str) -> String {
    format!("{short_id}/{kind}{ext}.zst")
}
