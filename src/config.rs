//! Configuration for the checksum compliance harness
//!
//! Everything the harness treats as a collaborator-defined constant lives here:
//! the server image and its credentials, the client SDK's checksum algorithm and
//! multipart threshold, and the scenario payload sizes.

use aws_sdk_s3::types::ChecksumAlgorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One mebibyte.
pub const MIB: u64 = 1024 * 1024;

/// Smallest part S3 accepts for any part but the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Storage server container settings
    #[serde(default)]
    pub server: ServerConfig,

    /// S3 client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Scenario suite settings
    #[serde(default)]
    pub suite: SuiteConfig,
}

/// Storage server container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Container image name. No default: the server under test is always
    /// named by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Container image tag
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Port the server binds inside the container (passed as `ADDRESS=0.0.0.0:<port>`)
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Access key handed to the server as `ACCESS_KEY`
    #[serde(default = "default_access_key")]
    pub access_key: String,

    /// Secret key handed to the server as `SECRET_KEY`
    #[serde(default = "default_secret_key")]
    pub secret_key: String,

    /// Upper bound on the 403 readiness wait
    #[serde(default = "default_readiness_timeout", with = "humantime_duration")]
    pub readiness_timeout: Duration,

    /// Delay between readiness probes
    #[serde(default = "default_probe_interval", with = "humantime_duration")]
    pub probe_interval: Duration,
}

/// S3 client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Signing region; S3-compatible servers generally accept any value
    #[serde(default = "default_region")]
    pub region: String,

    /// Payloads at or above this size go through multipart upload
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Size of each multipart part (the last part may be smaller)
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Algorithm the client uses when checksums are left at their default
    #[serde(default)]
    pub checksum_algorithm: ChecksumAlgorithmName,

    /// Whole-operation timeout, retries included
    #[serde(default = "default_operation_timeout", with = "humantime_duration")]
    pub operation_timeout: Duration,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_duration")]
    pub connect_timeout: Duration,
}

/// Scenario suite settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Scenarios in flight at once (1 = sequential)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Size of the random payload used for multipart scenarios
    #[serde(default = "default_large_payload_size")]
    pub large_payload_size: u64,

    /// Read the object back and compare bytes after a successful upload
    #[serde(default = "default_read_back")]
    pub read_back: bool,

    /// Prefix for generated bucket names
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,

    /// Fixed seed for random payloads; a fresh seed is drawn per run when unset
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Checksum algorithms the S3 client can compute on upload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithmName {
    #[default]
    Crc32,
    Crc32c,
    Crc64nvme,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithmName {
    pub fn to_sdk(self) -> ChecksumAlgorithm {
        match self {
            ChecksumAlgorithmName::Crc32 => ChecksumAlgorithm::Crc32,
            ChecksumAlgorithmName::Crc32c => ChecksumAlgorithm::Crc32C,
            ChecksumAlgorithmName::Crc64nvme => ChecksumAlgorithm::Crc64Nvme,
            ChecksumAlgorithmName::Sha1 => ChecksumAlgorithm::Sha1,
            ChecksumAlgorithmName::Sha256 => ChecksumAlgorithm::Sha256,
        }
    }
}

impl std::str::FromStr for ChecksumAlgorithmName {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "crc32" => Ok(Self::Crc32),
            "crc32c" => Ok(Self::Crc32c),
            "crc64nvme" => Ok(Self::Crc64nvme),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            other => Err(ConfigError::Invalid(format!(
                "unknown checksum algorithm: {}",
                other
            ))),
        }
    }
}

// Default value functions for serde
fn default_tag() -> String {
    "latest".to_string()
}

fn default_internal_port() -> u16 {
    9000
}

fn default_access_key() -> String {
    "harnessaccesskey".to_string()
}

fn default_secret_key() -> String {
    "harnesssecretkey".to_string()
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_probe_interval() -> Duration {
    Duration::from_millis(250)
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> u64 {
    16 * MIB
}

fn default_part_size() -> u64 {
    8 * MIB
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_concurrency() -> usize {
    1
}

fn default_large_payload_size() -> u64 {
    20 * MIB
}

fn default_read_back() -> bool {
    true
}

fn default_bucket_prefix() -> String {
    "checksum-it".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            image: None,
            tag: default_tag(),
            internal_port: default_internal_port(),
            access_key: default_access_key(),
            secret_key: default_secret_key(),
            readiness_timeout: default_readiness_timeout(),
            probe_interval: default_probe_interval(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            multipart_threshold: default_multipart_threshold(),
            part_size: default_part_size(),
            checksum_algorithm: ChecksumAlgorithmName::default(),
            operation_timeout: default_operation_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            large_payload_size: default_large_payload_size(),
            read_back: default_read_back(),
            bucket_prefix: default_bucket_prefix(),
            seed: None,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: HarnessConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(image) = std::env::var("CHECKSUM_HARNESS_IMAGE") {
            config.server.image = Some(image);
        }
        if let Ok(tag) = std::env::var("CHECKSUM_HARNESS_TAG") {
            config.server.tag = tag;
        }
        if let Ok(port) = std::env::var("CHECKSUM_HARNESS_PORT") {
            config.server.internal_port = parse_env("CHECKSUM_HARNESS_PORT", &port)?;
        }
        if let Ok(key) = std::env::var("CHECKSUM_HARNESS_ACCESS_KEY") {
            config.server.access_key = key;
        }
        if let Ok(secret) = std::env::var("CHECKSUM_HARNESS_SECRET_KEY") {
            config.server.secret_key = secret;
        }
        if let Ok(timeout) = std::env::var("CHECKSUM_HARNESS_READY_TIMEOUT") {
            config.server.readiness_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| ConfigError::Parse(format!("CHECKSUM_HARNESS_READY_TIMEOUT: {}", e)))?;
        }
        if let Ok(threshold) = std::env::var("CHECKSUM_HARNESS_MULTIPART_THRESHOLD") {
            config.client.multipart_threshold =
                parse_env("CHECKSUM_HARNESS_MULTIPART_THRESHOLD", &threshold)?;
        }
        if let Ok(part_size) = std::env::var("CHECKSUM_HARNESS_PART_SIZE") {
            config.client.part_size = parse_env("CHECKSUM_HARNESS_PART_SIZE", &part_size)?;
        }
        if let Ok(algorithm) = std::env::var("CHECKSUM_HARNESS_CHECKSUM_ALGORITHM") {
            config.client.checksum_algorithm = algorithm.parse()?;
        }
        if let Ok(concurrency) = std::env::var("CHECKSUM_HARNESS_CONCURRENCY") {
            config.suite.concurrency = parse_env("CHECKSUM_HARNESS_CONCURRENCY", &concurrency)?;
        }
        if let Ok(seed) = std::env::var("CHECKSUM_HARNESS_SEED") {
            config.suite.seed = Some(parse_env("CHECKSUM_HARNESS_SEED", &seed)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file if one is found, otherwise from environment
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("CHECKSUM_HARNESS_CONFIG") {
            return Self::from_file(&path);
        }

        let local = "s3_checksum_compliance.toml";
        if std::path::Path::new(local).exists() {
            return Self::from_file(local);
        }

        Self::from_env()
    }

    /// Reject settings that would make scenario outcomes meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.access_key.is_empty() || self.server.secret_key.is_empty() {
            return Err(ConfigError::Invalid(
                "server access_key and secret_key must both be set".to_string(),
            ));
        }
        if self.server.probe_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "probe_interval must be greater than zero".to_string(),
            ));
        }
        if self.client.part_size < MIN_PART_SIZE {
            return Err(ConfigError::Invalid(format!(
                "part_size {} is below the S3 minimum of {} bytes",
                self.client.part_size, MIN_PART_SIZE
            )));
        }
        if self.client.multipart_threshold == 0 {
            return Err(ConfigError::Invalid(
                "multipart_threshold must be greater than zero".to_string(),
            ));
        }
        if self.suite.large_payload_size < self.client.multipart_threshold {
            return Err(ConfigError::Invalid(format!(
                "large_payload_size {} is below multipart_threshold {}; the large scenarios would not exercise multipart upload",
                self.suite.large_payload_size, self.client.multipart_threshold
            )));
        }
        if self.suite.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "suite concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl ServerConfig {
    /// The configured image name, or `Invalid` when none was given.
    pub fn require_image(&self) -> Result<&str, ConfigError> {
        self.image.as_deref().ok_or_else(|| {
            ConfigError::Invalid(
                "no server image configured: pass --image, set CHECKSUM_HARNESS_IMAGE, \
                 or set `image` under [server] in the config file"
                    .to_string(),
            )
        })
    }

    /// Full image reference, e.g. `example/s3-server:latest`
    pub fn image_ref(&self) -> Result<String, ConfigError> {
        Ok(format!("{}:{}", self.require_image()?, self.tag))
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::Parse(format!("{}={}: {}", name, value, e)))
}

/// Serde adapter for `"60s"` / `"250ms"` style durations.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
