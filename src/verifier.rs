//! Outcome verification
//!
//! Judges a [`ScenarioRun`] against its expected outcome. Every failure names
//! its class (service rejection, silent corruption, connectivity, ...), so a
//! report never conflates a server verdict with a harness problem.
//!
//! Known-issue expectations are regression tripwires. They pass while the
//! tracked server defect reproduces and fail with
//! [`VerificationFailure::KnownIssueResolved`] once it is fixed, at which point
//! the scenario must be flipped to [`ExpectedOutcome::ContentMatch`].

use crate::payload::{first_difference, sha256_hex};
use crate::types::{ExpectedOutcome, KnownIssue, ScenarioRun, UploadFailure, UploadOutcome};
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};

/// A passing judgement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Expected success observed (content matched when read back)
    Passed,
    /// The tracked defect reproduced: the server rejected the upload
    KnownIssueConfirmed {
        issue: KnownIssue,
        status: u16,
        code: Option<String>,
    },
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::KnownIssueConfirmed {
                issue,
                status,
                code,
            } => write!(
                f,
                "broke as expected {} (HTTP {} {})",
                issue,
                status,
                code.as_deref().unwrap_or("<no code>")
            ),
        }
    }
}

/// A failing judgement, one variant per error class
#[derive(Debug, Clone, Error)]
pub enum VerificationFailure {
    #[error("upload rejected by server: {0}")]
    UploadRejected(UploadFailure),

    #[error(
        "silent corruption: uploaded {expected_len} bytes, read back {actual_len} bytes, \
         first difference at offset {offset}, sha256 {expected_sha256} != {actual_sha256}"
    )]
    ContentMismatch {
        expected_len: usize,
        actual_len: usize,
        offset: usize,
        expected_sha256: String,
        actual_sha256: String,
    },

    #[error("connectivity failure (harness problem, not a server verdict): {0}")]
    Connectivity(UploadFailure),

    #[error("upload succeeded but read-back failed: {0}")]
    ReadBackFailed(UploadFailure),

    #[error(
        "{issue} no longer reproduces: the upload succeeded. \
         The defect looks fixed; flip this scenario to expect success with content match"
    )]
    KnownIssueResolved { issue: KnownIssue },

    #[error("{issue}: upload was rejected ({failure}) but an object exists at {key}")]
    ObjectCreatedDespiteFailure {
        issue: KnownIssue,
        failure: UploadFailure,
        key: String,
    },
}

/// Judge one scenario run.
pub fn verify(run: &ScenarioRun) -> Result<Verdict, VerificationFailure> {
    let verdict = match &run.scenario.expected {
        ExpectedOutcome::ContentMatch => verify_content_match(run),
        ExpectedOutcome::KnownIssue(issue) => verify_known_issue(run, issue),
    };

    match &verdict {
        Ok(Verdict::Passed) => info!("{}: passed ({})", run.scenario.name, run.path),
        Ok(v @ Verdict::KnownIssueConfirmed { .. }) => {
            warn!("{}: {}", run.scenario.name, v)
        }
        Err(e) => warn!("{}: FAILED: {}", run.scenario.name, e),
    }
    verdict
}

fn verify_content_match(run: &ScenarioRun) -> Result<Verdict, VerificationFailure> {
    match &run.outcome {
        UploadOutcome::Succeeded { retrieved, .. } => {
            check_content(&run.payload, retrieved.as_ref())?;
            Ok(Verdict::Passed)
        }
        UploadOutcome::Failed { failure, .. } => Err(reject(failure)),
        UploadOutcome::ReadBackFailed(failure) => Err(read_back_failure(failure)),
    }
}

fn verify_known_issue(run: &ScenarioRun, issue: &KnownIssue) -> Result<Verdict, VerificationFailure> {
    match &run.outcome {
        UploadOutcome::Succeeded { retrieved, .. } => {
            // Corruption outranks the tripwire.
            check_content(&run.payload, retrieved.as_ref())?;
            Err(VerificationFailure::KnownIssueResolved {
                issue: issue.clone(),
            })
        }
        UploadOutcome::Failed { failure, .. } if !failure.is_service() => {
            Err(VerificationFailure::Connectivity(failure.clone()))
        }
        UploadOutcome::Failed {
            failure,
            object_present: Some(true),
        } => Err(VerificationFailure::ObjectCreatedDespiteFailure {
            issue: issue.clone(),
            failure: failure.clone(),
            key: format!("{}/{}", run.bucket, run.key),
        }),
        UploadOutcome::Failed { failure, .. } => {
            info!(
                "{} rejected with code {:?}; the exact code is logged, not matched",
                failure.operation,
                failure.code()
            );
            Ok(Verdict::KnownIssueConfirmed {
                issue: issue.clone(),
                status: failure.status().unwrap_or_default(),
                code: failure.code().map(str::to_string),
            })
        }
        UploadOutcome::ReadBackFailed(failure) => Err(read_back_failure(failure)),
    }
}

/// Compare read-back bytes with the payload. A skipped read-back passes.
fn check_content(expected: &Bytes, retrieved: Option<&Bytes>) -> Result<(), VerificationFailure> {
    let Some(actual) = retrieved else {
        return Ok(());
    };
    match first_difference(expected, actual) {
        None => Ok(()),
        Some(offset) => Err(VerificationFailure::ContentMismatch {
            expected_len: expected.len(),
            actual_len: actual.len(),
            offset,
            expected_sha256: sha256_hex(expected),
            actual_sha256: sha256_hex(actual),
        }),
    }
}

fn reject(failure: &UploadFailure) -> VerificationFailure {
    if failure.is_service() {
        VerificationFailure::UploadRejected(failure.clone())
    } else {
        VerificationFailure::Connectivity(failure.clone())
    }
}

fn read_back_failure(failure: &UploadFailure) -> VerificationFailure {
    if failure.is_service() {
        VerificationFailure::ReadBackFailed(failure.clone())
    } else {
        VerificationFailure::Connectivity(failure.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChecksumMode, FailureKind, PayloadSpec, UploadPath, UploadScenario};
    use proptest::prelude::*;
    use std::time::Duration;

    const ISSUE: KnownIssue = KnownIssue {
        id: "multipart-checksum",
        summary: "server rejects per-part checksums",
    };

    fn run_with(expected: ExpectedOutcome, payload: &[u8], outcome: UploadOutcome) -> ScenarioRun {
        ScenarioRun {
            scenario: UploadScenario::new(
                "t",
                PayloadSpec::Random {
                    size: payload.len() as u64,
                    seed: 0,
                },
                ChecksumMode::Default,
                expected,
            ),
            bucket: "bucket".into(),
            key: "t.bin".into(),
            path: UploadPath::SinglePart,
            payload: Bytes::copy_from_slice(payload),
            outcome,
            elapsed: Duration::from_millis(1),
        }
    }

    fn service_failure(status: u16, code: &str) -> UploadFailure {
        UploadFailure {
            operation: "UploadPart(1)".into(),
            kind: FailureKind::Service {
                status,
                code: Some(code.into()),
                message: None,
            },
            detail: String::new(),
        }
    }

    fn transport_failure() -> UploadFailure {
        UploadFailure {
            operation: "PutObject".into(),
            kind: FailureKind::Transport,
            detail: "connection refused".into(),
        }
    }

    fn succeeded(bytes: &[u8]) -> UploadOutcome {
        UploadOutcome::Succeeded {
            retrieved: Some(Bytes::copy_from_slice(bytes)),
            read_status: Some(200),
        }
    }

    #[test]
    fn test_exact_roundtrip_passes() {
        let run = run_with(ExpectedOutcome::ContentMatch, b"hello", succeeded(b"hello"));
        assert_eq!(verify(&run).unwrap(), Verdict::Passed);
    }

    #[test]
    fn test_empty_roundtrip_passes() {
        let run = run_with(ExpectedOutcome::ContentMatch, b"", succeeded(b""));
        assert_eq!(verify(&run).unwrap(), Verdict::Passed);
    }

    #[test]
    fn test_truncated_readback_is_corruption() {
        let run = run_with(ExpectedOutcome::ContentMatch, b"hello", succeeded(b"hell"));
        match verify(&run).unwrap_err() {
            VerificationFailure::ContentMismatch {
                expected_len,
                actual_len,
                offset,
                ..
            } => {
                assert_eq!((expected_len, actual_len, offset), (5, 4, 4));
            }
            other => panic!("expected ContentMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_skipped_readback_passes_on_upload_success() {
        let outcome = UploadOutcome::Succeeded {
            retrieved: None,
            read_status: None,
        };
        let run = run_with(ExpectedOutcome::ContentMatch, b"x", outcome);
        assert!(verify(&run).is_ok());
    }

    #[test]
    fn test_unexpected_service_error_is_upload_rejected() {
        let outcome = UploadOutcome::Failed {
            failure: service_failure(400, "BadDigest"),
            object_present: Some(false),
        };
        let run = run_with(ExpectedOutcome::ContentMatch, b"x", outcome);
        assert!(matches!(
            verify(&run),
            Err(VerificationFailure::UploadRejected(_))
        ));
    }

    #[test]
    fn test_transport_error_is_never_a_service_verdict() {
        for expected in [ExpectedOutcome::ContentMatch, ExpectedOutcome::KnownIssue(ISSUE)] {
            let outcome = UploadOutcome::Failed {
                failure: transport_failure(),
                object_present: None,
            };
            let run = run_with(expected, b"x", outcome);
            assert!(matches!(
                verify(&run),
                Err(VerificationFailure::Connectivity(_))
            ));
        }
    }

    #[test]
    fn test_known_issue_confirmed_on_service_error() {
        let outcome = UploadOutcome::Failed {
            failure: service_failure(400, "XAmzContentChecksumMismatch"),
            object_present: Some(false),
        };
        let run = run_with(ExpectedOutcome::KnownIssue(ISSUE), b"x", outcome);
        let verdict = verify(&run).unwrap();
        assert_eq!(
            verdict,
            Verdict::KnownIssueConfirmed {
                issue: ISSUE,
                status: 400,
                code: Some("XAmzContentChecksumMismatch".into()),
            }
        );
        assert!(verdict.to_string().contains("[known-issue multipart-checksum]"));
    }

    #[test]
    fn test_known_issue_any_code_accepted() {
        let outcome = UploadOutcome::Failed {
            failure: service_failure(501, "NotImplemented"),
            object_present: None,
        };
        let run = run_with(ExpectedOutcome::KnownIssue(ISSUE), b"x", outcome);
        assert!(verify(&run).is_ok());
    }

    #[test]
    fn test_known_issue_tripwire_fires_when_fixed() {
        let run = run_with(ExpectedOutcome::KnownIssue(ISSUE), b"x", succeeded(b"x"));
        let err = verify(&run).unwrap_err();
        assert!(matches!(err, VerificationFailure::KnownIssueResolved { .. }));
        assert!(err.to_string().contains("flip this scenario"));
    }

    #[test]
    fn test_known_issue_with_corruption_reports_corruption() {
        let run = run_with(ExpectedOutcome::KnownIssue(ISSUE), b"xy", succeeded(b"xz"));
        assert!(matches!(
            verify(&run),
            Err(VerificationFailure::ContentMismatch { offset: 1, .. })
        ));
    }

    #[test]
    fn test_known_issue_leaving_object_behind_fails() {
        let outcome = UploadOutcome::Failed {
            failure: service_failure(400, "InvalidRequest"),
            object_present: Some(true),
        };
        let run = run_with(ExpectedOutcome::KnownIssue(ISSUE), b"x", outcome);
        assert!(matches!(
            verify(&run),
            Err(VerificationFailure::ObjectCreatedDespiteFailure { .. })
        ));
    }

    #[test]
    fn test_readback_failure_classes() {
        let run = run_with(
            ExpectedOutcome::ContentMatch,
            b"x",
            UploadOutcome::ReadBackFailed(service_failure(404, "NoSuchKey")),
        );
        assert!(matches!(
            verify(&run),
            Err(VerificationFailure::ReadBackFailed(_))
        ));

        let run = run_with(
            ExpectedOutcome::ContentMatch,
            b"x",
            UploadOutcome::ReadBackFailed(transport_failure()),
        );
        assert!(matches!(
            verify(&run),
            Err(VerificationFailure::Connectivity(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_identical_bytes_always_pass(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let run = run_with(ExpectedOutcome::ContentMatch, &data, succeeded(&data));
            prop_assert_eq!(verify(&run).unwrap(), Verdict::Passed);
        }

        #[test]
        fn prop_single_flipped_byte_is_located(
            data in proptest::collection::vec(any::<u8>(), 1..2048),
            idx in any::<proptest::sample::Index>(),
        ) {
            let pos = idx.index(data.len());
            let mut corrupted = data.clone();
            corrupted[pos] ^= 0xFF;
            let run = run_with(ExpectedOutcome::ContentMatch, &data, succeeded(&corrupted));
            match verify(&run) {
                Err(VerificationFailure::ContentMismatch { offset, .. }) => prop_assert_eq!(offset, pos),
                other => prop_assert!(false, "unexpected verdict: {:?}", other),
            }
        }
    }
}
