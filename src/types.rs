//! Core value types: scenarios, upload paths, and captured outcomes

use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Whether the client computes and validates checksums for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumMode {
    /// Client told to skip checksum calculation and validation
    Disabled,
    /// Client left at its default checksum behavior
    Default,
}

impl fmt::Display for ChecksumMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumMode::Disabled => f.write_str("checksum-disabled"),
            ChecksumMode::Default => f.write_str("checksum-default"),
        }
    }
}

/// What goes into the uploaded object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadSpec {
    /// Fixed UTF-8 text, uploaded as `text/plain`
    Text(String),
    /// `size` random bytes drawn from a generator seeded with `seed`
    Random { size: u64, seed: u64 },
}

impl PayloadSpec {
    /// Payload length in bytes
    pub fn len(&self) -> u64 {
        match self {
            PayloadSpec::Text(text) => text.len() as u64,
            PayloadSpec::Random { size, .. } => *size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PayloadSpec::Text(_) => "text/plain",
            PayloadSpec::Random { .. } => "application/octet-stream",
        }
    }
}

/// A tracked server defect the harness expects to observe.
///
/// Asserting a known issue is a regression tripwire: once the server is fixed
/// the assertion fails, and the scenario has to be flipped to
/// [`ExpectedOutcome::ContentMatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownIssue {
    /// Short stable identifier used in reports
    pub id: &'static str,
    /// What the defect is, in one line
    pub summary: &'static str,
}

impl fmt::Display for KnownIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[known-issue {}] {}", self.id, self.summary)
    }
}

/// What a scenario is expected to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedOutcome {
    /// Upload succeeds and the read-back bytes equal the payload
    ContentMatch,
    /// Upload is rejected with a service-level error caused by a known defect
    KnownIssue(KnownIssue),
}

/// Configuration of a single test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadScenario {
    /// Name used in logs, reports and `--only` filters
    pub name: String,
    pub payload: PayloadSpec,
    pub checksum_mode: ChecksumMode,
    pub expected: ExpectedOutcome,
    /// Read the object back after a successful upload
    pub read_back: bool,
}

impl UploadScenario {
    pub fn new(
        name: impl Into<String>,
        payload: PayloadSpec,
        checksum_mode: ChecksumMode,
        expected: ExpectedOutcome,
    ) -> Self {
        Self {
            name: name.into(),
            payload,
            checksum_mode,
            expected,
            read_back: true,
        }
    }

    pub fn with_read_back(mut self, read_back: bool) -> Self {
        self.read_back = read_back;
        self
    }

    /// Object key the scenario writes to inside its bucket
    pub fn object_key(&self) -> String {
        match self.payload {
            PayloadSpec::Text(_) => format!("{}.txt", self.name),
            PayloadSpec::Random { .. } => format!("{}.bin", self.name),
        }
    }
}

/// Which client code path an upload takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    SinglePart,
    Multipart { part_count: u32 },
}

impl UploadPath {
    /// Choose the upload path the way the client SDK's transfer layer would:
    /// payloads at or above `threshold` are split into `part_size` parts.
    pub fn select(payload_len: u64, threshold: u64, part_size: u64) -> Self {
        if payload_len < threshold || part_size == 0 {
            return UploadPath::SinglePart;
        }
        let parts = payload_len.div_ceil(part_size).max(1);
        UploadPath::Multipart {
            part_count: u32::try_from(parts).unwrap_or(u32::MAX),
        }
    }
}

impl fmt::Display for UploadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPath::SinglePart => f.write_str("single-part"),
            UploadPath::Multipart { part_count } => write!(f, "multipart ({} parts)", part_count),
        }
    }
}

/// Class of a failed S3 call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The server answered with an S3 error
    Service {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// No usable response: DNS, connect, timeout, or request construction
    Transport,
}

/// A captured S3 call failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    /// The operation that failed, e.g. `PutObject` or `UploadPart(2)`
    pub operation: String,
    pub kind: FailureKind,
    /// Full error text from the SDK
    pub detail: String,
}

impl UploadFailure {
    pub fn is_service(&self) -> bool {
        matches!(self.kind, FailureKind::Service { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            FailureKind::Service { status, .. } => Some(*status),
            FailureKind::Transport => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match &self.kind {
            FailureKind::Service { code, .. } => code.as_deref(),
            FailureKind::Transport => None,
        }
    }
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Service {
                status,
                code,
                message,
            } => write!(
                f,
                "{} rejected by server: HTTP {} {} {}",
                self.operation,
                status,
                code.as_deref().unwrap_or("<no code>"),
                message.as_deref().unwrap_or("")
            ),
            FailureKind::Transport => {
                write!(f, "{} transport failure: {}", self.operation, self.detail)
            }
        }
    }
}

/// Result of executing a scenario, consumed only by the verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Upload completed; `retrieved` holds the read-back bytes when read-back ran
    Succeeded {
        retrieved: Option<Bytes>,
        read_status: Option<u16>,
    },
    /// Upload raised an error; `object_present` records whether anything was
    /// left at the key afterwards (`None` when that could not be determined)
    Failed {
        failure: UploadFailure,
        object_present: Option<bool>,
    },
    /// Upload completed but fetching the object back failed
    ReadBackFailed(UploadFailure),
}

/// Everything the verifier needs to judge one scenario
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: UploadScenario,
    pub bucket: String,
    pub key: String,
    pub path: UploadPath,
    /// The bytes that were uploaded
    pub payload: Bytes,
    pub outcome: UploadOutcome,
    pub elapsed: Duration,
}
