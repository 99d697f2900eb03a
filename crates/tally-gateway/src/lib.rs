#![warn(missing_docs)]
//! # tally-gateway
//!
//! ## Purpose
//! Thin request layer wrapping the five remote counter operations.
//!
//! ## Responsibilities
//! - Validate the configured backend base address.
//! - Build request envelopes and execute them through an injectable
//!   transport abstraction.
//! - Decode response contracts into [`Snapshot`] values.
//! - Surface failures uniformly as tagged [`GatewayError`] results.
//!
//! ## Data flow
//! Session machine commands -> [`GatewayClient`] builds a
//! [`BackendRequest`] -> [`GatewayTransport`] executes it -> response bytes
//! are decoded and returned to the caller. The client never mutates session
//! state itself.
//!
//! ## Ownership and lifetimes
//! Responses are decoded into owned values to avoid borrowing from transient
//! network buffers. The transport is shared behind `Arc<dyn GatewayTransport>`.
//!
//! ## Error model
//! Transport failures map to [`GatewayError::NetworkUnreachable`], non-2xx
//! responses to [`GatewayError::BackendRejected`], and contract mismatches to
//! [`GatewayError::InvalidResponseShape`]. No operation panics; network
//! failure is never reported as a successful empty response.
//!
//! ## Security and privacy notes
//! This crate logs request paths and status codes only, never file bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use tally_core::{FileHandle, ServerStatus, Snapshot};
use thiserror::Error;
use url::Url;

/// Health probe path.
pub const HEALTH_PATH: &str = "/";
/// Webcam session start path.
pub const WEBCAM_START_PATH: &str = "/webcam_start";
/// Webcam session stop path.
pub const WEBCAM_STOP_PATH: &str = "/webcam_stop";
/// Live count/summary poll path.
pub const CURRENT_DATA_PATH: &str = "/current_data";
/// Video upload path.
pub const UPLOAD_VIDEO_PATH: &str = "/upload_video";
/// Live image stream path, consumed directly by the presentation layer.
pub const WEBCAM_FEED_PATH: &str = "/webcam_feed";
/// Multipart form field carrying the uploaded video.
pub const UPLOAD_FIELD_NAME: &str = "file";

/// HTTP method of a backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Plain GET request with empty body.
    Get,
    /// POST request carrying a multipart form body.
    Post,
}

/// One file attached to a multipart POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartFile {
    /// Form field name.
    pub field: String,
    /// Original file name forwarded to the server.
    pub file_name: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Request envelope handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute request URL.
    pub url: String,
    /// Attached multipart file for POST requests.
    pub file: Option<MultipartFile>,
}

/// Raw response surfaced by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

impl TransportResponse {
    /// Returns `true` for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Abstract transport used by the gateway client.
///
/// Implementations return a [`TransportResponse`] for every response the
/// server produced, including non-2xx ones; only failures that occurred
/// before any response arrived map to [`GatewayError::NetworkUnreachable`].
pub trait GatewayTransport: Send + Sync {
    /// Executes one request against the backend.
    fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct CurrentDataResponse {
    count: u64,
    summary: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct StopResponse {
    final_count: u64,
    final_summary: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    total_count: Option<u64>,
    #[serde(default)]
    summary: Option<BTreeMap<String, u64>>,
    #[serde(default)]
    error: Option<String>,
}

/// Gateway client for a configured backend base address.
#[derive(Clone)]
pub struct GatewayClient {
    base: Url,
    transport: Arc<dyn GatewayTransport>,
}

impl GatewayClient {
    /// Creates a validated gateway client.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidEndpoint`] when the base address is not
    /// an absolute `http`/`https` URL.
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn GatewayTransport>,
    ) -> Result<Self, GatewayError> {
        let base = validate_base_url(&base_url.into())?;
        Ok(Self { base, transport })
    }

    /// Returns the configured base address.
    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    /// Returns the absolute live feed URL for the presentation layer.
    pub fn webcam_feed_url(&self) -> String {
        join_endpoint(&self.base, WEBCAM_FEED_PATH)
    }

    /// Probes backend reachability.
    ///
    /// Never errors to the caller: any transport failure or non-2xx response
    /// maps to [`ServerStatus::Offline`].
    pub fn check_health(&self) -> ServerStatus {
        match self.get(HEALTH_PATH) {
            Ok(_) => ServerStatus::Online,
            Err(error) => {
                log::debug!("health probe failed: {error}");
                ServerStatus::Offline
            }
        }
    }

    /// Starts a webcam session on the backend.
    ///
    /// Callers must not invoke this while a session is already active; the
    /// session machine enforces that guard.
    ///
    /// # Errors
    /// Returns [`GatewayError`] on transport failure or rejection.
    pub fn start_webcam(&self) -> Result<(), GatewayError> {
        self.get(WEBCAM_START_PATH).map(|_| ())
    }

    /// Stops the webcam session and returns the authoritative final snapshot.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidResponseShape`] when the response does
    /// not carry `final_count`/`final_summary`.
    pub fn stop_webcam(&self) -> Result<Snapshot, GatewayError> {
        let response = self.get(WEBCAM_STOP_PATH)?;
        let parsed: StopResponse = decode_body(&response.body)?;
        snapshot_from_parts(parsed.final_count, parsed.final_summary)
    }

    /// Fetches the current live count/summary snapshot.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidResponseShape`] when the response does
    /// not carry `count`/`summary`.
    pub fn fetch_current_data(&self) -> Result<Snapshot, GatewayError> {
        let response = self.get(CURRENT_DATA_PATH)?;
        let parsed: CurrentDataResponse = decode_body(&response.body)?;
        snapshot_from_parts(parsed.count, parsed.summary)
    }

    /// Uploads one video file for single-shot analysis.
    ///
    /// This is the only operation whose latency is proportional to input
    /// size; it transmits the full file contents as a multipart form field.
    ///
    /// # Errors
    /// Returns [`GatewayError::BackendRejected`] when the server reports
    /// `success: false`, carrying the server-provided error string.
    pub fn upload_video(&self, file: &FileHandle) -> Result<Snapshot, GatewayError> {
        let request = BackendRequest {
            method: HttpMethod::Post,
            url: join_endpoint(&self.base, UPLOAD_VIDEO_PATH),
            file: Some(MultipartFile {
                field: UPLOAD_FIELD_NAME.to_string(),
                file_name: file.file_name.clone(),
                bytes: file.bytes.clone(),
            }),
        };

        let response = self.execute(request)?;
        let parsed: UploadResponse = decode_body(&response.body)?;

        if !parsed.success {
            return Err(GatewayError::BackendRejected {
                status: response.status,
                message: parsed
                    .error
                    .unwrap_or_else(|| "processing failed".to_string()),
            });
        }

        match (parsed.total_count, parsed.summary) {
            (Some(count), Some(summary)) => snapshot_from_parts(count, summary),
            _ => Err(GatewayError::InvalidResponseShape(
                "successful upload response is missing total_count or summary".to_string(),
            )),
        }
    }

    fn get(&self, path: &str) -> Result<TransportResponse, GatewayError> {
        self.execute(BackendRequest {
            method: HttpMethod::Get,
            url: join_endpoint(&self.base, path),
            file: None,
        })
    }

    fn execute(&self, request: BackendRequest) -> Result<TransportResponse, GatewayError> {
        let response = self.transport.execute(&request)?;
        if !response.is_success() {
            return Err(GatewayError::BackendRejected {
                status: response.status,
                message: String::from_utf8_lossy(&response.body)
                    .chars()
                    .take(200)
                    .collect(),
            });
        }

        Ok(response)
    }
}

fn validate_base_url(base_url: &str) -> Result<Url, GatewayError> {
    let parsed = Url::parse(base_url)
        .map_err(|error| GatewayError::InvalidEndpoint(format!("invalid base url: {error}")))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(GatewayError::InvalidEndpoint(
            "base url must use http or https".to_string(),
        ));
    }

    Ok(parsed)
}

fn join_endpoint(base: &Url, path: &str) -> String {
    let trimmed = base.as_str().trim_end_matches('/');
    if path == "/" {
        return format!("{trimmed}/");
    }

    format!("{trimmed}{path}")
}

fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|error| GatewayError::InvalidResponseShape(error.to_string()))
}

fn snapshot_from_parts(
    count: u64,
    summary: BTreeMap<String, u64>,
) -> Result<Snapshot, GatewayError> {
    Snapshot::new(count, summary)
        .map_err(|error| GatewayError::InvalidResponseShape(error.to_string()))
}

/// Coarse failure class used for operator guidance and logging levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient failure; the same request may succeed later.
    Retriable,
    /// Permanent failure; retrying the identical request will not help.
    Permanent,
}

/// Classifies a gateway error as transient or permanent.
///
/// Network-level failures and 5xx rejections are retriable; 4xx rejections,
/// contract mismatches, and endpoint misconfiguration are permanent.
pub fn classify_gateway_error(error: &GatewayError) -> FailureClass {
    match error {
        GatewayError::NetworkUnreachable(_) => FailureClass::Retriable,
        GatewayError::BackendRejected { status, .. } if *status >= 500 => FailureClass::Retriable,
        _ => FailureClass::Permanent,
    }
}

/// Errors produced by the gateway client.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport failed before any response arrived.
    #[error("backend unreachable: {0}")]
    NetworkUnreachable(String),
    /// Backend answered with non-2xx or an explicit failure payload.
    #[error("backend rejected request (status {status}): {message}")]
    BackendRejected {
        /// HTTP status code of the rejecting response.
        status: u16,
        /// Server-provided failure detail.
        message: String,
    },
    /// Response did not match the expected contract fields.
    #[error("invalid response shape: {0}")]
    InvalidResponseShape(String),
    /// Configured base address violates endpoint policy.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
