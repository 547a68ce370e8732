//! S3 Checksum Compliance - run the built-in scenario suite against an ephemeral server

use clap::Parser;
use s3_checksum_compliance::client::create_client;
use s3_checksum_compliance::config::{ChecksumAlgorithmName, HarnessConfig};
use s3_checksum_compliance::fixture::ServerFixture;
use s3_checksum_compliance::payload;
use s3_checksum_compliance::scenario::ScenarioRunner;
use s3_checksum_compliance::suite::{builtin_scenarios, run_suite, select, SuiteReport};
use s3_checksum_compliance::HarnessError;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// S3 Checksum Compliance - checksum-negotiation harness for S3-compatible servers
#[derive(Parser, Debug)]
#[command(name = "s3_checksum_compliance")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Server image name (overrides config). There is no default image: one of
    /// --image, CHECKSUM_HARNESS_IMAGE or `image` under [server] in the config
    /// file is required unless --endpoint is given
    #[arg(long, value_name = "IMAGE")]
    image: Option<String>,

    /// Server image tag (overrides config)
    #[arg(long, value_name = "TAG")]
    tag: Option<String>,

    /// Use an already running server at HOST:PORT instead of starting a container
    #[arg(long, value_name = "HOST:PORT")]
    endpoint: Option<String>,

    /// Scenarios in flight at once (overrides config)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Checksum algorithm used in default mode (overrides config)
    #[arg(long, value_name = "ALGORITHM")]
    checksum_algorithm: Option<ChecksumAlgorithmName>,

    /// Seed for random payloads, to replay a previous run
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Run only the named scenario (repeatable)
    #[arg(long, value_name = "NAME")]
    only: Vec<String>,

    /// List the built-in scenarios and exit
    #[arg(long)]
    list: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "s3_checksum_compliance=debug,testcontainers=info"
    } else {
        "s3_checksum_compliance=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(report) if report.all_ok() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            error!("Setup failed, aborting session: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<SuiteReport, HarnessError> {
    let mut config = match cli.config {
        Some(ref path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::load()?,
    };

    // CLI overrides
    if let Some(image) = cli.image {
        config.server.image = Some(image);
    }
    if let Some(tag) = cli.tag {
        config.server.tag = tag;
    }
    if let Some(concurrency) = cli.concurrency {
        config.suite.concurrency = concurrency;
    }
    if let Some(algorithm) = cli.checksum_algorithm {
        config.client.checksum_algorithm = algorithm;
    }
    if cli.seed.is_some() {
        config.suite.seed = cli.seed;
    }
    config.validate()?;

    let seed = config.suite.seed.unwrap_or_else(payload::fresh_seed);
    let scenarios = select(builtin_scenarios(&config.suite, seed), &cli.only);

    if cli.list {
        for s in &scenarios {
            println!(
                "{:<34} {:>10} bytes  {}  {:?}",
                s.name,
                s.payload.len(),
                s.checksum_mode,
                s.expected
            );
        }
        return Ok(SuiteReport::default());
    }

    let run_id = uuid::Uuid::new_v4();
    info!("Run {} (payload seed {})", run_id, seed);
    info!(
        "  Multipart threshold: {} bytes, part size: {} bytes",
        config.client.multipart_threshold, config.client.part_size
    );
    info!(
        "  Default-mode checksum algorithm: {:?}",
        config.client.checksum_algorithm
    );

    let endpoint = cli.endpoint.as_deref().map(parse_endpoint).transpose()?;
    if endpoint.is_none() {
        config.server.require_image()?;
    }

    // Installed before startup so Ctrl+C during a slow image pull still
    // removes the container.
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

    let fixture = ServerFixture::new(config.server.clone());
    let acquired = match endpoint {
        Some((ref host, port)) => fixture.attach_cancellable(host, port, &cancel).await,
        None => fixture.acquire_cancellable(&cancel).await,
    };
    let instance = match acquired {
        Ok(instance) => instance,
        Err(e) => {
            watcher.abort();
            return Err(e);
        }
    };

    let result = match instance.connection() {
        Ok(conn) => {
            let client = create_client(conn, &config.client);
            let runner = ScenarioRunner::new(
                client,
                config.client.clone(),
                config.suite.bucket_prefix.clone(),
                cancel.clone(),
            );
            run_suite(&runner, scenarios, config.suite.concurrency).await
        }
        Err(e) => Err(e),
    };

    watcher.abort();
    if let Err(e) = instance.release().await {
        warn!("Release failed: {}", e);
    }

    let report = result?;
    print!("{}", report.render());
    Ok(report)
}

fn parse_endpoint(endpoint: &str) -> Result<(String, u16), HarnessError> {
    let trimmed = endpoint
        .trim_start_matches("http://")
        .trim_end_matches('/');
    let invalid = || {
        HarnessError::Config(s3_checksum_compliance::config::ConfigError::Invalid(format!(
            "endpoint must be HOST:PORT, got {}",
            endpoint
        )))
    };
    let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

/// Cancel in-flight scenarios on SIGINT/SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, cancelling in-flight scenarios...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, cancelling in-flight scenarios...");
        }
    }
    cancel.cancel();
}
