//! Volume name normalization
//!
//! Orchestrator-supplied names become volume ids: lower-cased and, when too
//! long, truncated with a checksum suffix so that distinct long names keep
//! distinct ids. The mapping is deterministic, which is what makes retried
//! `CreateVolume` calls land on the same id.

use sha2::{Digest, Sha512};
use tracing::warn;

/// Maximum volume id length (Kubernetes name limitation)
pub const NAME_MAXIMUM_LENGTH: usize = 40;

/// Hex characters of the checksum kept in a truncated name
const CHECKSUM_SUFFIX_LEN: usize = 8;

/// Convert `name` to a lowercase volume id of at most `max_length` bytes.
///
/// Over-length names keep their lowercase prefix and replace the tail with
/// `-` followed by the first 8 hex characters of the SHA-512 of the
/// *original* name. Dashes left dangling at the end of the prefix are
/// trimmed before the suffix is appended.
///
/// Never fails; an empty name yields an empty id and callers reject that.
pub fn auto_correct_name(name: &str, max_length: usize) -> String {
    let mut corrected = name.to_lowercase();

    if corrected.len() > max_length {
        warn!(
            "Name {} is too long, auto-correct to fit {} characters",
            name, max_length
        );
        let checksum = string_checksum(name);
        let suffix = format!("-{}", &checksum[..CHECKSUM_SUFFIX_LEN]);

        corrected = if max_length < suffix.len() {
            checksum[..max_length].to_string()
        } else {
            let prefix = truncate_at_char_boundary(&corrected, max_length - suffix.len());
            format!("{}{suffix}", prefix.trim_end_matches('-'))
        };
    }

    if corrected != name {
        warn!("Name auto-corrected from {} to {}", name, corrected);
    }

    corrected
}

/// SHA-512 of a string, lowercase hex
pub fn string_checksum(data: &str) -> String {
    checksum_sha512(data.as_bytes())
}

/// SHA-512 of a byte slice, lowercase hex
pub fn checksum_sha512(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
