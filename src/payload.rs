//! Payload construction and comparison helpers

use crate::types::PayloadSpec;
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

/// The fixed text body of the small, checksum-disabled scenario.
pub const SMALL_TEXT_PAYLOAD: &str = "This is a test file uploaded without checksum validation.";

/// Materialize a payload.
///
/// Random payloads are deterministic for a given seed so a failing run can be
/// replayed with `--seed`.
pub fn build(payload: &PayloadSpec) -> Bytes {
    match payload {
        PayloadSpec::Text(text) => Bytes::from(text.clone()),
        PayloadSpec::Random { size, seed } => {
            let mut rng = rand::rngs::StdRng::seed_from_u64(*seed);
            let mut data = vec![0u8; *size as usize];
            rng.fill(&mut data[..]);
            Bytes::from(data)
        }
    }
}

/// Draw a fresh seed for a run that did not pin one.
pub fn fresh_seed() -> u64 {
    rand::thread_rng().gen()
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Offset of the first byte where `expected` and `actual` differ, including the
/// case where one is a prefix of the other. `None` when they are identical.
pub fn first_difference(expected: &[u8], actual: &[u8]) -> Option<usize> {
    if let Some(idx) = expected.iter().zip(actual).position(|(a, b)| a != b) {
        return Some(idx);
    }
    if expected.len() != actual.len() {
        return Some(expected.len().min(actual.len()));
    }
    None
}
