//! In-process S3 stand-in with the checksum defect under test
//!
//! Answers 503 on `/` for the first `starting_probes` requests, then 403 like a
//! real server enforcing auth. Implements just enough of the S3 REST API for
//! the harness: bucket create, PutObject, multipart upload, GetObject,
//! HeadObject. Authentication is not checked.
//!
//! The defect: an UploadPart request carrying any checksum header is rejected
//! with `400 XAmzContentChecksumMismatch`, the way a server that does not
//! implement per-part checksum negotiation fails.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, put};
use axum::Router;
use s3_checksum_compliance::client::ConnectionInfo;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Inner {
    root_probes: u32,
    /// Non-probe requests that arrived while the server still reported 503
    early_requests: u32,
    buckets: HashSet<String>,
    objects: HashMap<(String, String), Bytes>,
    uploads: HashMap<String, BTreeMap<i32, Bytes>>,
    next_upload: u64,
    rejected_parts: u32,
    parts_received: u32,
}

#[derive(Clone)]
pub struct FakeS3 {
    addr: SocketAddr,
    starting_probes: u32,
    /// Delay before each UploadPart is answered, to hold a request in flight
    part_delay: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl FakeS3 {
    /// Start on an ephemeral loopback port.
    pub async fn start(starting_probes: u32) -> Self {
        Self::start_with_part_delay(starting_probes, Duration::ZERO).await
    }

    /// Like [`start`](Self::start), but every UploadPart waits `part_delay`
    /// before it is answered.
    pub async fn start_with_part_delay(starting_probes: u32, part_delay: Duration) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fake = FakeS3 {
            addr,
            starting_probes,
            part_delay,
            inner: Arc::new(Mutex::new(Inner::default())),
        };

        let app = Router::new()
            .route("/", get(root))
            .route("/:bucket", put(create_bucket))
            .route("/:bucket/", put(create_bucket))
            .route("/:bucket/*key", any(object))
            // Parts are at least 5 MiB; axum's default limit is 2 MB
            .layer(DefaultBodyLimit::max(64 * 1024 * 1024))
            .with_state(fake.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        fake
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connection(&self) -> ConnectionInfo {
        ConnectionInfo {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            access_key: "fake".to_string(),
            secret_key: "fake".to_string(),
        }
    }

    pub fn root_probes(&self) -> u32 {
        self.inner.lock().unwrap().root_probes
    }

    pub fn early_requests(&self) -> u32 {
        self.inner.lock().unwrap().early_requests
    }

    pub fn rejected_parts(&self) -> u32 {
        self.inner.lock().unwrap().rejected_parts
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().buckets.iter().cloned().collect()
    }

    pub fn open_uploads(&self) -> usize {
        self.inner.lock().unwrap().uploads.len()
    }

    /// UploadPart requests that have arrived, answered or not
    pub fn parts_received(&self) -> u32 {
        self.inner.lock().unwrap().parts_received
    }

    /// Count a non-probe request, noting whether it arrived before readiness.
    fn note_request(&self, inner: &mut Inner) {
        if inner.root_probes <= self.starting_probes {
            inner.early_requests += 1;
        }
    }
}

async fn root(State(fake): State<FakeS3>) -> StatusCode {
    let mut inner = fake.inner.lock().unwrap();
    inner.root_probes += 1;
    if inner.root_probes > fake.starting_probes {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn create_bucket(State(fake): State<FakeS3>, Path(bucket): Path<String>) -> Response {
    let mut inner = fake.inner.lock().unwrap();
    fake.note_request(&mut inner);
    if !inner.buckets.insert(bucket) {
        return s3_error(StatusCode::CONFLICT, "BucketAlreadyOwnedByYou", "bucket exists");
    }
    StatusCode::OK.into_response()
}

async fn object(
    State(fake): State<FakeS3>,
    method: Method,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if method == Method::PUT && query.contains_key("partNumber") {
        fake.inner.lock().unwrap().parts_received += 1;
        if !fake.part_delay.is_zero() {
            tokio::time::sleep(fake.part_delay).await;
        }
    }

    let mut inner = fake.inner.lock().unwrap();
    fake.note_request(&mut inner);

    if !inner.buckets.contains(&bucket) {
        return s3_error(StatusCode::NOT_FOUND, "NoSuchBucket", "no such bucket");
    }
    let object_id = (bucket.clone(), key.clone());

    match method {
        Method::POST if query.contains_key("uploads") => {
            inner.next_upload += 1;
            let upload_id = format!("upload-{}", inner.next_upload);
            inner.uploads.insert(upload_id.clone(), BTreeMap::new());
            xml(format!(
                "<InitiateMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId></InitiateMultipartUploadResult>",
                bucket, key, upload_id
            ))
        }
        Method::PUT if query.contains_key("partNumber") => {
            let Some(upload_id) = query.get("uploadId") else {
                return s3_error(StatusCode::BAD_REQUEST, "InvalidRequest", "missing uploadId");
            };
            if carries_checksum(&headers) {
                inner.rejected_parts += 1;
                return s3_error(
                    StatusCode::BAD_REQUEST,
                    "XAmzContentChecksumMismatch",
                    "The provided 'x-amz-checksum' header does not match what was computed.",
                );
            }
            let part_number: i32 = query
                .get("partNumber")
                .and_then(|p| p.parse().ok())
                .unwrap_or_default();
            let Some(parts) = inner.uploads.get_mut(upload_id) else {
                return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload", "no such upload");
            };
            parts.insert(part_number, body);
            let etag = format!("\"part-{}\"", part_number);
            (StatusCode::OK, [(header::ETAG, etag)]).into_response()
        }
        Method::POST if query.contains_key("uploadId") => {
            let upload_id = &query["uploadId"];
            let Some(parts) = inner.uploads.remove(upload_id) else {
                return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload", "no such upload");
            };
            let mut assembled = Vec::new();
            for part in parts.values() {
                assembled.extend_from_slice(part);
            }
            inner.objects.insert(object_id, Bytes::from(assembled));
            xml(format!(
                "<CompleteMultipartUploadResult><Bucket>{}</Bucket><Key>{}</Key><ETag>\"complete\"</ETag></CompleteMultipartUploadResult>",
                bucket, key
            ))
        }
        Method::DELETE if query.contains_key("uploadId") => {
            inner.uploads.remove(&query["uploadId"]);
            StatusCode::NO_CONTENT.into_response()
        }
        Method::PUT => {
            inner.objects.insert(object_id, body);
            (StatusCode::OK, [(header::ETAG, "\"single\"")]).into_response()
        }
        Method::GET => match inner.objects.get(&object_id) {
            Some(data) => (StatusCode::OK, data.clone()).into_response(),
            None => s3_error(StatusCode::NOT_FOUND, "NoSuchKey", "no such key"),
        },
        Method::HEAD => match inner.objects.get(&object_id) {
            Some(data) => (
                StatusCode::OK,
                [(header::CONTENT_LENGTH, data.len().to_string())],
            )
                .into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        _ => s3_error(StatusCode::NOT_IMPLEMENTED, "NotImplemented", "unsupported"),
    }
}

fn carries_checksum(headers: &HeaderMap) -> bool {
    headers.keys().any(|name| {
        let name = name.as_str();
        name.starts_with("x-amz-checksum-")
            || name == "x-amz-sdk-checksum-algorithm"
            || name == "x-amz-trailer"
    })
}

fn xml(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/xml")],
        format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}", body),
    )
        .into_response()
}

fn s3_error(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/xml")],
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>{}</Code><Message>{}</Message></Error>",
            code, message
        ),
    )
        .into_response()
}
