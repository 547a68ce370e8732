//! S3 Checksum Compliance - checksum-negotiation harness for S3-compatible servers
//!
//! Starts an ephemeral storage server, uploads small (single-part) and large
//! (multipart) payloads with client checksums disabled and at their defaults,
//! and verifies each outcome: exact round-trip where success is expected, a
//! service-level rejection where a known server defect is being tracked.

pub mod bucket;
pub mod client;
pub mod config;
pub mod error;
pub mod fixture;
pub mod payload;
pub mod scenario;
pub mod suite;
pub mod types;
pub mod verifier;

pub use error::HarnessError;
