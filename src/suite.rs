//! Built-in scenario catalogue and suite driver

use crate::config::SuiteConfig;
use crate::error::HarnessError;
use crate::payload::SMALL_TEXT_PAYLOAD;
use crate::scenario::ScenarioRunner;
use crate::types::{ChecksumMode, ExpectedOutcome, KnownIssue, PayloadSpec, UploadPath, UploadScenario};
use crate::verifier::{verify, VerificationFailure, Verdict};
use futures::{StreamExt, TryStreamExt};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

/// The server rejects multipart uploads that carry the client's default
/// per-part checksums.
pub const MULTIPART_CHECKSUM_ISSUE: KnownIssue = KnownIssue {
    id: "multipart-default-checksum",
    summary: "multipart upload with default per-part checksums is rejected",
};

pub const SMALL_DISABLED: &str = "small-text-checksum-disabled";
pub const SMALL_DEFAULT: &str = "small-text-checksum-default";
pub const LARGE_DISABLED: &str = "large-binary-checksum-disabled";
pub const LARGE_DEFAULT: &str = "large-binary-checksum-default";
pub const EMPTY_DISABLED: &str = "empty-checksum-disabled";

/// Every built-in scenario, in report order.
///
/// `seed` feeds the random payloads; the same seed reproduces the same bytes.
pub fn builtin_scenarios(config: &SuiteConfig, seed: u64) -> Vec<UploadScenario> {
    let large = PayloadSpec::Random {
        size: config.large_payload_size,
        seed,
    };
    vec![
        UploadScenario::new(
            SMALL_DISABLED,
            PayloadSpec::Text(SMALL_TEXT_PAYLOAD.to_string()),
            ChecksumMode::Disabled,
            ExpectedOutcome::ContentMatch,
        ),
        UploadScenario::new(
            SMALL_DEFAULT,
            PayloadSpec::Text(SMALL_TEXT_PAYLOAD.to_string()),
            ChecksumMode::Default,
            ExpectedOutcome::ContentMatch,
        ),
        UploadScenario::new(
            LARGE_DISABLED,
            large.clone(),
            ChecksumMode::Disabled,
            ExpectedOutcome::ContentMatch,
        ),
        UploadScenario::new(
            LARGE_DEFAULT,
            large,
            ChecksumMode::Default,
            ExpectedOutcome::KnownIssue(MULTIPART_CHECKSUM_ISSUE),
        ),
        UploadScenario::new(
            EMPTY_DISABLED,
            PayloadSpec::Text(String::new()),
            ChecksumMode::Disabled,
            ExpectedOutcome::ContentMatch,
        ),
    ]
    .into_iter()
    .map(|s| s.with_read_back(config.read_back))
    .collect()
}

/// Keep only the scenarios named in `only`; an empty filter keeps everything.
pub fn select(scenarios: Vec<UploadScenario>, only: &[String]) -> Vec<UploadScenario> {
    if only.is_empty() {
        return scenarios;
    }
    scenarios
        .into_iter()
        .filter(|s| only.iter().any(|name| name == &s.name))
        .collect()
}

/// Judgement of one scenario
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub mode: ChecksumMode,
    pub path: UploadPath,
    pub bucket: String,
    pub elapsed: Duration,
    pub result: Result<Verdict, VerificationFailure>,
}

/// Judgements of a whole suite, in catalogue order
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub entries: Vec<ScenarioReport>,
}

impl SuiteReport {
    /// True when every scenario passed or confirmed its known issue.
    pub fn all_ok(&self) -> bool {
        self.entries.iter().all(|e| e.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.entries.iter().filter(|e| e.result.is_err())
    }

    pub fn known_issues(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.entries
            .iter()
            .filter(|e| matches!(e.result, Ok(Verdict::KnownIssueConfirmed { .. })))
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioReport> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Human-readable report, one line per scenario plus a summary line.
    ///
    /// `KNOWN` lines are tripwires: they turn into `FAIL` once the server
    /// defect is fixed.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let tag = match &e.result {
                Ok(Verdict::Passed) => "PASS ",
                Ok(Verdict::KnownIssueConfirmed { .. }) => "KNOWN",
                Err(_) => "FAIL ",
            };
            let _ = write!(
                out,
                "{} {} [{}, {}, {:?}]",
                tag, e.name, e.path, e.mode, e.elapsed
            );
            match &e.result {
                Ok(Verdict::Passed) => {}
                Ok(v) => {
                    let _ = write!(out, ": {}", v);
                }
                Err(err) => {
                    let _ = write!(out, ": {}", err);
                }
            }
            out.push('\n');
        }
        let failed = self.failures().count();
        let known = self.known_issues().count();
        let _ = writeln!(
            out,
            "{} scenarios: {} passed, {} known issues, {} failed",
            self.entries.len(),
            self.entries.len() - failed - known,
            known,
            failed
        );
        out
    }
}

/// Run `scenarios` with at most `concurrency` in flight and judge each one.
///
/// Scenario failures are collected into the report. A setup error or
/// cancellation aborts the suite and drops every scenario still in flight.
pub async fn run_suite(
    runner: &ScenarioRunner,
    scenarios: Vec<UploadScenario>,
    concurrency: usize,
) -> Result<SuiteReport, HarnessError> {
    info!(
        "Running {} scenarios (concurrency {})",
        scenarios.len(),
        concurrency
    );

    let mut entries: Vec<(usize, ScenarioReport)> =
        futures::stream::iter(scenarios.into_iter().enumerate())
            .map(|(idx, scenario)| async move {
                let run = runner.run(&scenario).await?;
                let result = verify(&run);
                Ok::<_, HarnessError>((
                    idx,
                    ScenarioReport {
                        name: scenario.name,
                        mode: scenario.checksum_mode,
                        path: run.path,
                        bucket: run.bucket,
                        elapsed: run.elapsed,
                        result,
                    },
                ))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;

    entries.sort_by_key(|(idx, _)| *idx);
    Ok(SuiteReport {
        entries: entries.into_iter().map(|(_, e)| e).collect(),
    })
}
