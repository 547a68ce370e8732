//! Scenario-scoped bucket names
//!
//! Every scenario gets its own bucket so concurrent scenarios never share
//! server-side state. Names combine a millisecond timestamp, a process-wide
//! counter and a random suffix, which keeps them unique across repeated runs,
//! parallel test binaries and concurrent scenarios within one process.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique bucket names within this process
static BUCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

const MAX_BUCKET_NAME_LEN: usize = 63;
const RANDOM_SUFFIX_LEN: usize = 8;

/// A bucket owned by exactly one scenario run.
///
/// Never deleted explicitly; the ephemeral server's teardown reclaims it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketHandle {
    name: String,
}

impl BucketHandle {
    /// Generate a fresh, valid, unique bucket name starting with `prefix`.
    pub fn generate(prefix: &str) -> Self {
        let counter = BUCKET_COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let suffix = random_suffix();

        let tail = format!("-{}-{}-{}", timestamp, counter, suffix);
        let prefix = sanitize_prefix(prefix, MAX_BUCKET_NAME_LEN - tail.len());
        Self {
            name: format!("{}{}", prefix, tail),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for BucketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Lowercase the prefix, map anything outside `[a-z0-9-]` to `-`, and make sure
/// it starts with a letter or digit. Falls back to `"b"` when nothing usable
/// remains.
fn sanitize_prefix(prefix: &str, max_len: usize) -> String {
    let mut cleaned: String = prefix
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();
    cleaned = cleaned.trim_matches('-').to_string();
    cleaned.truncate(max_len);
    let cleaned = cleaned.trim_end_matches('-').to_string();
    if cleaned.is_empty() {
        "b".to_string()
    } else {
        cleaned
    }
}

/// Check the subset of S3 bucket naming rules that generated names must obey:
/// 3-63 characters of lowercase letters, digits and hyphens, starting and
/// ending with a letter or digit.
pub fn is_valid_bucket_name(name: &str) -> bool {
    let len = name.len();
    if !(3..=MAX_BUCKET_NAME_LEN).contains(&len) {
        return false;
    }
    let bytes = name.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[len - 1]) {
        return false;
    }
    bytes
        .iter()
        .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
