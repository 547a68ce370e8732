//! Shared test infrastructure for integration tests
//!
//! Provides the in-process fake S3 server, runner construction helpers, and
//! Docker/image availability gating for the real-container tests.

#![allow(dead_code)]

pub mod fake_s3;

use s3_checksum_compliance::client::{create_client, ConnectionInfo};
use s3_checksum_compliance::config::{ClientConfig, ServerConfig, MIB};
use s3_checksum_compliance::scenario::ScenarioRunner;
use std::process::Command;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Client settings scaled down for the fake server: 6 MiB threshold, 5 MiB parts.
pub fn small_client_config() -> ClientConfig {
    ClientConfig {
        multipart_threshold: 6 * MIB,
        part_size: 5 * MIB,
        operation_timeout: Duration::from_secs(30),
        ..ClientConfig::default()
    }
}

/// Server settings with a short readiness budget for in-process servers.
pub fn fast_server_config() -> ServerConfig {
    ServerConfig {
        readiness_timeout: Duration::from_secs(5),
        probe_interval: Duration::from_millis(20),
        ..ServerConfig::default()
    }
}

/// Build a runner for `conn` with its own cancellation token.
pub fn runner_for(conn: &ConnectionInfo, settings: &ClientConfig) -> (ScenarioRunner, CancellationToken) {
    let cancel = CancellationToken::new();
    let client = create_client(conn, settings);
    let runner = ScenarioRunner::new(client, settings.clone(), "itest", cancel.clone());
    (runner, cancel)
}

/// Check if Docker is available by running `docker version`
pub fn docker_available() -> bool {
    Command::new("docker")
        .arg("version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// The real-server tests need both Docker and an explicitly named image.
pub fn server_image_configured() -> bool {
    std::env::var("CHECKSUM_HARNESS_IMAGE").is_ok()
        || std::env::var("CHECKSUM_HARNESS_CONFIG").is_ok()
}

/// Macro to skip a test unless a real storage server container can be started.
/// Use at the start of any test that requires the ephemeral container.
#[macro_export]
macro_rules! skip_unless_server {
    () => {
        if !common::docker_available() {
            eprintln!("Docker not available, skipping test");
            return;
        }
        if !common::server_image_configured() {
            eprintln!("CHECKSUM_HARNESS_IMAGE not set, skipping test");
            return;
        }
    };
}
