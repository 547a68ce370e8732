//! S3 client construction for the server under test

use crate::config::ClientConfig;
use crate::types::ChecksumMode;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::Client;

/// Where and as whom to reach a running storage server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
}

impl ConnectionInfo {
    /// Plaintext endpoint URL; the fixture never terminates TLS.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Build an S3 client bound to `conn`.
///
/// Path-style addressing, static credentials, no retries: a checksum rejection
/// has to surface on the first attempt rather than be retried away. Pure
/// function of its inputs, so calling it per scenario or sharing one client is
/// equivalent.
pub fn create_client(conn: &ConnectionInfo, settings: &ClientConfig) -> Client {
    let credentials = Credentials::new(
        &conn.access_key,
        &conn.secret_key,
        None,
        None,
        "s3_checksum_compliance",
    );

    let timeouts = TimeoutConfig::builder()
        .operation_timeout(settings.operation_timeout)
        .connect_timeout(settings.connect_timeout)
        .build();

    let config = aws_sdk_s3::Config::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .endpoint_url(conn.endpoint())
        .credentials_provider(credentials)
        .force_path_style(true)
        .retry_config(RetryConfig::disabled())
        .timeout_config(timeouts)
        .build();

    Client::from_conf(config)
}

/// Per-request config override for a checksum mode.
///
/// `Disabled` turns request checksum calculation and response checksum
/// validation down to "only when the operation requires it", which for
/// PutObject/UploadPart/GetObject means never. `Default` leaves the client
/// untouched.
pub fn checksum_override(mode: ChecksumMode) -> Option<aws_sdk_s3::config::Builder> {
    match mode {
        ChecksumMode::Disabled => Some(
            aws_sdk_s3::config::Builder::new()
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .response_checksum_validation(ResponseChecksumValidation::WhenRequired),
        ),
        ChecksumMode::Default => None,
    }
}
