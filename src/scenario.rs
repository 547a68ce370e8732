//! Scenario execution: bucket, payload, upload, capture
//!
//! The runner never judges anything. Upload errors and read-back results are
//! captured as [`UploadOutcome`] data for the verifier. Only setup failures and
//! cancellation come back as `Err`.

use crate::bucket::BucketHandle;
use crate::client::checksum_override;
use crate::config::ClientConfig;
use crate::error::HarnessError;
use crate::payload;
use crate::types::{
    ChecksumMode, FailureKind, ScenarioRun, UploadFailure, UploadOutcome, UploadPath,
    UploadScenario,
};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Send a fluent request, applying the checksum-mode config override when
/// there is one. Both branches resolve to the same `Result` type.
macro_rules! send_with_override {
    ($request:expr, $override:expr) => {{
        let request = $request;
        let config_override = $override;
        async move {
            match config_override {
                Some(cfg) => request.customize().config_override(cfg).send().await,
                None => request.send().await,
            }
        }
    }};
}

/// Runs [`UploadScenario`]s against one server through one client
#[derive(Clone)]
pub struct ScenarioRunner {
    client: Client,
    settings: ClientConfig,
    bucket_prefix: String,
    cancel: CancellationToken,
}

impl ScenarioRunner {
    pub fn new(
        client: Client,
        settings: ClientConfig,
        bucket_prefix: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            settings,
            bucket_prefix: bucket_prefix.into(),
            cancel,
        }
    }

    /// Execute one scenario end to end: bucket create → upload → read-back.
    #[instrument(skip_all, fields(scenario = %scenario.name, mode = %scenario.checksum_mode))]
    pub async fn run(&self, scenario: &UploadScenario) -> Result<ScenarioRun, HarnessError> {
        let started = Instant::now();

        let bucket = BucketHandle::generate(&self.bucket_prefix);
        self.create_bucket(&bucket).await?;

        let body = payload::build(&scenario.payload);
        let key = scenario.object_key();
        let path = UploadPath::select(
            body.len() as u64,
            self.settings.multipart_threshold,
            self.settings.part_size,
        );
        info!(
            "Uploading {} bytes to {}/{} via {}",
            body.len(),
            bucket,
            key,
            path
        );

        let uploaded = match path {
            UploadPath::SinglePart => {
                self.put_single(bucket.name(), &key, &body, scenario)
                    .await?
            }
            UploadPath::Multipart { .. } => {
                self.put_multipart(bucket.name(), &key, &body, scenario)
                    .await?
            }
        };

        let outcome = match uploaded {
            Ok(()) if scenario.read_back => {
                match self
                    .read_back(bucket.name(), &key, scenario.checksum_mode)
                    .await?
                {
                    Ok(retrieved) => UploadOutcome::Succeeded {
                        retrieved: Some(retrieved),
                        // GetObject without a Range only succeeds with 200
                        read_status: Some(200),
                    },
                    Err(failure) => UploadOutcome::ReadBackFailed(failure),
                }
            }
            Ok(()) => UploadOutcome::Succeeded {
                retrieved: None,
                read_status: None,
            },
            Err(failure) => {
                info!("Upload failed: {}", failure);
                let object_present = self.object_present(bucket.name(), &key).await?;
                UploadOutcome::Failed {
                    failure,
                    object_present,
                }
            }
        };

        Ok(ScenarioRun {
            scenario: scenario.clone(),
            bucket: bucket.name().to_string(),
            key,
            path,
            payload: body,
            outcome,
            elapsed: started.elapsed(),
        })
    }

    /// Race `fut` against the cancellation token; dropping `fut` aborts any
    /// request it has in flight.
    async fn cancellable<F: Future>(
        &self,
        stage: &'static str,
        fut: F,
    ) -> Result<F::Output, HarnessError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HarnessError::Cancelled(stage)),
            out = fut => Ok(out),
        }
    }

    async fn create_bucket(&self, bucket: &BucketHandle) -> Result<(), HarnessError> {
        self.cancellable("CreateBucket", self.client.create_bucket().bucket(bucket.name()).send())
            .await?
            .map_err(|e| HarnessError::BucketCreation {
                bucket: bucket.name().to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
        debug!("Created bucket {}", bucket);
        Ok(())
    }

    /// The algorithm sent with uploads in `Default` mode. `Disabled` sends none.
    fn algorithm_for(&self, mode: ChecksumMode) -> Option<ChecksumAlgorithm> {
        match mode {
            ChecksumMode::Default => Some(self.settings.checksum_algorithm.to_sdk()),
            ChecksumMode::Disabled => None,
        }
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        body: &Bytes,
        scenario: &UploadScenario,
    ) -> Result<Result<(), UploadFailure>, HarnessError> {
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(scenario.payload.content_type())
            .set_checksum_algorithm(self.algorithm_for(scenario.checksum_mode))
            .body(ByteStream::from(body.clone()));

        let result = self
            .cancellable(
                "PutObject",
                send_with_override!(request, checksum_override(scenario.checksum_mode)),
            )
            .await?;

        Ok(result
            .map(|out| {
                debug!("PutObject ok, etag {:?}", out.e_tag());
            })
            .map_err(|e| classify_sdk_error("PutObject", &e)))
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        body: &Bytes,
        scenario: &UploadScenario,
    ) -> Result<Result<(), UploadFailure>, HarnessError> {
        let mode = scenario.checksum_mode;
        let algorithm = self.algorithm_for(mode);

        let create = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(scenario.payload.content_type())
            .set_checksum_algorithm(algorithm.clone());
        let created = match self
            .cancellable(
                "CreateMultipartUpload",
                send_with_override!(create, checksum_override(mode)),
            )
            .await?
        {
            Ok(out) => out,
            Err(e) => return Ok(Err(classify_sdk_error("CreateMultipartUpload", &e))),
        };

        let Some(upload_id) = created.upload_id().map(str::to_string) else {
            return Ok(Err(UploadFailure {
                operation: "CreateMultipartUpload".to_string(),
                kind: FailureKind::Service {
                    status: 200,
                    code: None,
                    message: Some("response carried no UploadId".to_string()),
                },
                detail: format!("{:?}", created),
            }));
        };
        debug!("Started multipart upload {}", upload_id);

        match self
            .upload_parts(bucket, key, &upload_id, body, mode, algorithm)
            .await?
        {
            Ok(parts) => {
                let complete = self
                    .client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    );
                let result = self
                    .cancellable(
                        "CompleteMultipartUpload",
                        send_with_override!(complete, checksum_override(mode)),
                    )
                    .await?;
                match result {
                    Ok(_) => Ok(Ok(())),
                    Err(e) => {
                        let failure = classify_sdk_error("CompleteMultipartUpload", &e);
                        self.abort_multipart(bucket, key, &upload_id).await;
                        Ok(Err(failure))
                    }
                }
            }
            Err(failure) => {
                self.abort_multipart(bucket, key, &upload_id).await;
                Ok(Err(failure))
            }
        }
    }

    /// Upload `body` in `part_size` slices, numbered from 1, sequentially.
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        body: &Bytes,
        mode: ChecksumMode,
        algorithm: Option<ChecksumAlgorithm>,
    ) -> Result<Result<Vec<CompletedPart>, UploadFailure>, HarnessError> {
        let part_size = self.settings.part_size as usize;
        let mut parts = Vec::new();
        let mut offset = 0usize;
        let mut part_number = 1i32;

        while offset < body.len() {
            let end = (offset + part_size).min(body.len());
            let chunk = body.slice(offset..end);
            let chunk_len = chunk.len();

            let request = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .set_checksum_algorithm(algorithm.clone())
                .body(ByteStream::from(chunk));

            let out = match self
                .cancellable(
                    "UploadPart",
                    send_with_override!(request, checksum_override(mode)),
                )
                .await?
            {
                Ok(out) => out,
                Err(e) => {
                    return Ok(Err(classify_sdk_error(
                        format!("UploadPart({})", part_number),
                        &e,
                    )))
                }
            };
            debug!("Uploaded part {} ({} bytes)", part_number, chunk_len);

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(out.e_tag().map(str::to_string))
                    .set_checksum_crc32(out.checksum_crc32().map(str::to_string))
                    .set_checksum_crc32_c(out.checksum_crc32_c().map(str::to_string))
                    .set_checksum_crc64_nvme(out.checksum_crc64_nvme().map(str::to_string))
                    .set_checksum_sha1(out.checksum_sha1().map(str::to_string))
                    .set_checksum_sha256(out.checksum_sha256().map(str::to_string))
                    .build(),
            );

            offset = end;
            part_number += 1;
        }

        Ok(Ok(parts))
    }

    /// Best effort; a failed abort is logged and otherwise ignored.
    async fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str) {
        let abort = self
            .client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send();
        match self.cancellable("AbortMultipartUpload", abort).await {
            Ok(Ok(_)) => debug!("Aborted multipart upload {}", upload_id),
            Ok(Err(e)) => warn!(
                "Abort of multipart upload {} failed: {}",
                upload_id,
                DisplayErrorContext(&e)
            ),
            Err(_) => warn!("Abort of multipart upload {} cancelled", upload_id),
        }
    }

    async fn read_back(
        &self,
        bucket: &str,
        key: &str,
        mode: ChecksumMode,
    ) -> Result<Result<Bytes, UploadFailure>, HarnessError> {
        let request = self.client.get_object().bucket(bucket).key(key);
        let out = match self
            .cancellable("GetObject", send_with_override!(request, checksum_override(mode)))
            .await?
        {
            Ok(out) => out,
            Err(e) => return Ok(Err(classify_sdk_error("GetObject", &e))),
        };

        let collected = self.cancellable("GetObject", out.body.collect()).await?;
        Ok(collected
            .map(|data| data.into_bytes())
            .map_err(|e| UploadFailure {
                operation: "GetObject".to_string(),
                kind: FailureKind::Transport,
                detail: format!("failed to read response body: {}", e),
            }))
    }

    /// Whether anything exists at `key` after a failed upload. `None` when
    /// HeadObject itself gives no clear answer.
    async fn object_present(&self, bucket: &str, key: &str) -> Result<Option<bool>, HarnessError> {
        let result = self
            .cancellable(
                "HeadObject",
                self.client.head_object().bucket(bucket).key(key).send(),
            )
            .await?;
        Ok(match result {
            Ok(_) => Some(true),
            Err(SdkError::ServiceError(ctx)) if ctx.raw().status().as_u16() == 404 => Some(false),
            Err(e) => {
                warn!(
                    "Could not determine whether {}/{} exists: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                );
                None
            }
        })
    }
}

/// Classify an SDK error by variant.
///
/// A modeled service error carries status, code and message. An unparseable
/// response with an error status is still the server talking, so it counts as
/// a service error without a code. Everything else never got a usable answer
/// from the server and is a transport failure.
pub fn classify_sdk_error<E>(
    operation: impl Into<String>,
    err: &SdkError<E, HttpResponse>,
) -> UploadFailure
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let kind = match err {
        SdkError::ServiceError(ctx) => FailureKind::Service {
            status: ctx.raw().status().as_u16(),
            code: ctx.err().code().map(str::to_string),
            message: ctx.err().message().map(str::to_string),
        },
        SdkError::ResponseError(ctx) if ctx.raw().status().as_u16() >= 400 => {
            FailureKind::Service {
                status: ctx.raw().status().as_u16(),
                code: None,
                message: None,
            }
        }
        _ => FailureKind::Transport,
    };

    UploadFailure {
        operation: operation.into(),
        kind,
        detail: DisplayErrorContext(err).to_string(),
    }
}
