//! Ephemeral storage server lifecycle
//!
//! One container per session: start it with fixed credentials, wait for the
//! 403 readiness signal, hand out its connection data, and remove it on every
//! exit path.

use crate::client::ConnectionInfo;
use crate::config::ServerConfig;
use crate::error::HarnessError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Upper bound on a single readiness request
const MAX_PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of a [`ServerInstance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Starting,
    Ready,
    Stopped,
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReadinessState::Starting => "starting",
            ReadinessState::Ready => "ready",
            ReadinessState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A running storage server.
///
/// `release` consumes the instance, so releasing twice does not compile. An
/// instance dropped without `release` still has its container removed by
/// testcontainers' drop handler.
pub struct ServerInstance {
    container: Option<ContainerAsync<GenericImage>>,
    connection: ConnectionInfo,
    state: ReadinessState,
    label: String,
}

impl ServerInstance {
    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn host(&self) -> &str {
        &self.connection.host
    }

    pub fn port(&self) -> u16 {
        self.connection.port
    }

    /// Docker container id, `None` for an attached external server.
    pub fn container_id(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.id())
    }

    /// Connection data for the client factory. Refuses to hand it out before
    /// the readiness probe has passed.
    pub fn connection(&self) -> Result<&ConnectionInfo, HarnessError> {
        if self.state != ReadinessState::Ready {
            return Err(HarnessError::NotReady(self.state.to_string()));
        }
        Ok(&self.connection)
    }

    /// Stop and remove the server.
    #[instrument(skip(self), fields(server = %self.label))]
    pub async fn release(mut self) -> Result<(), HarnessError> {
        self.state = ReadinessState::Stopped;
        let Some(container) = self.container.take() else {
            debug!("Detached from external server");
            return Ok(());
        };
        let id = container.id().to_string();
        container.rm().await.map_err(|e| HarnessError::ContainerStop {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        info!("Removed storage server container {}", id);
        Ok(())
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        if let Some(container) = &self.container {
            warn!(
                "Storage server container {} dropped without release; relying on drop cleanup",
                container.id()
            );
        }
    }
}

/// Starts storage servers described by a [`ServerConfig`]
#[derive(Debug, Clone)]
pub struct ServerFixture {
    config: ServerConfig,
}

impl ServerFixture {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start a fresh container and wait until it answers 403 on `/`.
    ///
    /// Any failure here is fatal for the session. The container is removed
    /// before a readiness error is returned.
    pub async fn acquire(&self) -> Result<ServerInstance, HarnessError> {
        self.acquire_cancellable(&CancellationToken::new()).await
    }

    /// [`acquire`](Self::acquire), giving up when `cancel` fires.
    ///
    /// The container start itself runs to completion so its handle is never
    /// lost; the container is then removed and `Cancelled` returned. The
    /// readiness wait is abandoned as soon as the token fires.
    #[instrument(skip(self, cancel), fields(image = ?self.config.image, tag = %self.config.tag))]
    pub async fn acquire_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ServerInstance, HarnessError> {
        let cfg = &self.config;
        let image_ref = cfg.image_ref()?;
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled("ContainerStart"));
        }
        let start_err = |e: testcontainers::TestcontainersError| HarnessError::ContainerStart {
            image: image_ref.clone(),
            reason: e.to_string(),
        };

        info!("Starting storage server {}", image_ref);
        let container = GenericImage::new(cfg.require_image()?, cfg.tag.as_str())
            .with_exposed_port(cfg.internal_port.tcp())
            .with_env_var("ADDRESS", format!("0.0.0.0:{}", cfg.internal_port))
            .with_env_var("ACCESS_KEY", cfg.access_key.clone())
            .with_env_var("SECRET_KEY", cfg.secret_key.clone())
            .start()
            .await
            .map_err(start_err)?;

        let mut instance = ServerInstance {
            connection: ConnectionInfo {
                host: String::new(),
                port: 0,
                access_key: cfg.access_key.clone(),
                secret_key: cfg.secret_key.clone(),
            },
            container: None,
            state: ReadinessState::Starting,
            label: image_ref.clone(),
        };

        let mapped = async {
            let host = container.get_host().await.map_err(start_err)?.to_string();
            let port = container
                .get_host_port_ipv4(cfg.internal_port.tcp())
                .await
                .map_err(start_err)?;
            Ok::<_, HarnessError>((host, port))
        }
        .await;
        debug!("Container {} started", container.id());
        instance.container = Some(container);

        let result = match mapped {
            Ok((host, port)) => {
                debug!("Mapped {} -> {}:{}", cfg.internal_port, host, port);
                instance.connection.host = host;
                instance.connection.port = port;
                if cancel.is_cancelled() {
                    Err(HarnessError::Cancelled("ContainerStart"))
                } else {
                    self.wait_ready(&instance, cancel).await
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                instance.state = ReadinessState::Ready;
                Ok(instance)
            }
            Err(e) => {
                if let Err(cleanup) = instance.release().await {
                    warn!("Cleanup after failed startup also failed: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    /// Use a server that is already running at `host:port` instead of starting
    /// a container. The readiness probe still has to pass.
    pub async fn attach(&self, host: &str, port: u16) -> Result<ServerInstance, HarnessError> {
        self.attach_cancellable(host, port, &CancellationToken::new())
            .await
    }

    /// [`attach`](Self::attach), giving up the readiness wait when `cancel` fires.
    #[instrument(skip(self, cancel))]
    pub async fn attach_cancellable(
        &self,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<ServerInstance, HarnessError> {
        let mut instance = ServerInstance {
            container: None,
            connection: ConnectionInfo {
                host: host.to_string(),
                port,
                access_key: self.config.access_key.clone(),
                secret_key: self.config.secret_key.clone(),
            },
            state: ReadinessState::Starting,
            label: format!("{}:{}", host, port),
        };
        self.wait_ready(&instance, cancel).await?;
        instance.state = ReadinessState::Ready;
        Ok(instance)
    }

    async fn wait_ready(
        &self,
        instance: &ServerInstance,
        cancel: &CancellationToken,
    ) -> Result<(), HarnessError> {
        let url = format!("{}/", instance.connection.endpoint());
        let probe = probe_readiness(
            &url,
            self.config.readiness_timeout,
            self.config.probe_interval,
        );
        let attempts = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(HarnessError::Cancelled("Readiness")),
            attempts = probe => attempts?,
        };
        info!("Storage server ready at {} after {} probes", url, attempts);
        Ok(())
    }
}

/// Scoped acquisition: start a server, run `body` with its connection data,
/// and release the server on every exit path, panics included.
pub async fn with_server<F, Fut, T>(config: &ServerConfig, body: F) -> Result<T, HarnessError>
where
    F: FnOnce(ConnectionInfo) -> Fut,
    Fut: Future<Output = T>,
{
    let instance = ServerFixture::new(config.clone()).acquire().await?;
    let conn = instance.connection()?.clone();

    let result = AssertUnwindSafe(body(conn)).catch_unwind().await;
    let released = instance.release().await;

    match result {
        Ok(value) => {
            released?;
            Ok(value)
        }
        Err(panic) => {
            if let Err(e) = released {
                warn!("Release after panic failed: {}", e);
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// Poll `url` with unauthenticated GETs until one returns 403 Forbidden.
///
/// A 403 means the server is listening and enforcing auth; any other status or
/// a connection error means it is not ready yet. Returns the number of probes
/// sent, or `ReadinessTimeout` once `timeout` has elapsed.
pub async fn probe_readiness(
    url: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<u32, HarnessError> {
    let http = reqwest::Client::new();
    let started = Instant::now();
    let deadline = started + timeout;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());
        let request_timeout = remaining
            .min(MAX_PROBE_REQUEST_TIMEOUT)
            .max(Duration::from_millis(50));

        let last_observation = match http.get(url).timeout(request_timeout).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::FORBIDDEN => return Ok(attempts),
            Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
            Err(e) => format!("request error: {}", e),
        };
        debug!("Readiness probe {} not ready: {}", attempts, last_observation);

        if Instant::now() + interval >= deadline {
            return Err(HarnessError::ReadinessTimeout {
                waited: started.elapsed(),
                attempts,
                last_observation,
            });
        }
        sleep(interval).await;
    }
}
