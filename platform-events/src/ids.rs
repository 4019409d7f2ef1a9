//! Prefixed identifier generation.
//!
//! Ids look like `{prefix}_{hex}` where the hex part is a truncated SHA-256
//! over the kind, a nanosecond timestamp, a process-wide counter and any
//! caller supplied data. They satisfy the `[A-Za-z0-9_-]+` identifier rule
//! used by envelope validation.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Kinds of generated identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    User,
    Guest,
    Session,
    Device,
    Campaign,
    Correlation,
}

impl IdKind {
    /// Prefix placed before the hash.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::User => "user",
            IdKind::Guest => "guest",
            IdKind::Session => "session",
            IdKind::Device => "device",
            IdKind::Campaign => "campaign",
            IdKind::Correlation => "corr",
        }
    }

    /// Number of hex characters after the prefix.
    pub fn hash_len(&self) -> usize {
        match self {
            IdKind::Campaign | IdKind::Correlation => 24,
            _ => 32,
        }
    }
}

/// Generate an identifier of the given kind.
pub fn generate_id(kind: IdKind, additional: &[&str]) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}_{}_{:?}", kind.prefix(), nanos, seq, kind));
    for data in additional {
        hasher.update(b"_");
        hasher.update(data.as_bytes());
    }
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex.truncate(kind.hash_len());

    format!("{}_{}", kind.prefix(), hex)
}

/// New correlation id for a causally linked chain of envelopes.
pub fn correlation_id() -> String {
    generate_id(IdKind::Correlation, &[])
}

/// New session id.
pub fn session_id() -> String {
    generate_id(IdKind::Session, &[])
}

/// New device id.
pub fn device_id() -> String {
    generate_id(IdKind::Device, &[])
}
