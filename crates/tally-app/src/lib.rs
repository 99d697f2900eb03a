#![warn(missing_docs)]
//! # tally-app
//!
//! ## Purpose
//! Orchestrates the session machine, poll scheduler, health monitor, and
//! gateway client for `tally`.
//!
//! ## Responsibilities
//! - Route operator intents and settled remote results through the machine.
//! - Execute machine commands against the gateway and feed outcomes back.
//! - Drive due health probes and live-data polls from a caller-provided
//!   clock.
//! - Project runtime state into the display-safe status view.
//! - Provide the real HTTP transport used by the binary.
//!
//! ## Data flow
//! Operator intent -> [`SessionRuntime::dispatch`] -> machine commands ->
//! gateway requests -> settled events -> machine -> [`StatusView`]
//! projection for presentation.
//!
//! ## Ownership and lifetimes
//! The runtime owns the machine, scheduler, and monitor outright; the
//! gateway transport is shared behind `Arc<dyn GatewayTransport>`.
//!
//! ## Error model
//! Invalid operator intents surface as [`AppError::Session`]; remote
//! failures never escape the runtime — the machine reverts state and records
//! an operator notice instead.

use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tally_core::{CoreError, FileHandle, Mode, ServerStatus};
use tally_gateway::{
    BackendRequest, FailureClass, GatewayClient, GatewayError, GatewayTransport, HttpMethod,
    MultipartFile, TransportResponse, classify_gateway_error,
};
use tally_session::{
    Command, HealthMonitor, PollScheduler, SessionConfig, SessionError, SessionEvent,
    SessionMachine, SessionState,
};
use tally_ui::{StatusView, server_status_text, summary_lines};
use thiserror::Error;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("TALLY_VERSION");

/// Default backend base address, matching the reference deployment.
pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:5000";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Returns the current Unix time in milliseconds.
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Runtime configuration.
///
/// The backend base address is the sole required value; everything else has
/// reference defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Backend base address.
    pub base_url: String,
    /// Live-data poll cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// Health probe cadence in milliseconds.
    pub health_interval_ms: u64,
    /// Optional consecutive-poll-failure threshold; `None` keeps polling
    /// indefinitely.
    pub max_consecutive_poll_failures: Option<u32>,
}

impl RuntimeConfig {
    /// Creates a configuration with reference defaults for the given base
    /// address.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            poll_interval_ms: tally_session::DEFAULT_POLL_INTERVAL_MS,
            health_interval_ms: tally_session::DEFAULT_HEALTH_INTERVAL_MS,
            max_consecutive_poll_failures: None,
        }
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval_ms: self.poll_interval_ms,
            max_consecutive_poll_failures: self.max_consecutive_poll_failures,
        }
    }
}

/// Single-consumer runtime wiring machine, scheduler, monitor, and gateway.
pub struct SessionRuntime {
    machine: SessionMachine,
    scheduler: PollScheduler,
    monitor: HealthMonitor,
    gateway: GatewayClient,
}

impl SessionRuntime {
    /// Creates a runtime from configuration and a transport.
    ///
    /// # Errors
    /// Returns [`AppError::Gateway`] for an invalid base address and
    /// [`AppError::Session`] for an invalid poll interval.
    pub fn new(
        config: &RuntimeConfig,
        transport: Arc<dyn GatewayTransport>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            machine: SessionMachine::new(config.session_config()),
            scheduler: PollScheduler::new(config.poll_interval_ms)?,
            monitor: HealthMonitor::new(config.health_interval_ms),
            gateway: GatewayClient::new(config.base_url.clone(), transport)?,
        })
    }

    /// Returns a read-only view of the session machine.
    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    /// Returns the last observed backend status.
    pub fn server_status(&self) -> ServerStatus {
        self.monitor.status()
    }

    /// Returns `true` while the poll scheduler holds an active handle.
    pub fn is_polling(&self) -> bool {
        self.scheduler.is_polling()
    }

    /// Removes and returns the pending operator notice.
    pub fn take_notice(&mut self) -> Option<String> {
        self.machine.take_notice()
    }

    /// Selects an operating mode.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when a session is in progress.
    pub fn select_mode(&mut self, mode: Mode, now_ms: u64) -> Result<(), AppError> {
        self.dispatch(SessionEvent::ModeSelected(mode), now_ms)
    }

    /// Stages a video file for upload.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] outside video mode.
    pub fn select_file(&mut self, file: FileHandle, now_ms: u64) -> Result<(), AppError> {
        self.dispatch(SessionEvent::FileSelected(file), now_ms)
    }

    /// Starts the webcam session.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when not in webcam mode or when a
    /// session is already starting or active.
    pub fn start_webcam(&mut self, now_ms: u64) -> Result<(), AppError> {
        self.dispatch(SessionEvent::StartRequested, now_ms)
    }

    /// Stops the webcam session.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when no session is active.
    pub fn stop_webcam(&mut self, now_ms: u64) -> Result<(), AppError> {
        self.dispatch(SessionEvent::StopRequested, now_ms)
    }

    /// Uploads the staged video file.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when no file is staged; the backend is
    /// not contacted in that case.
    pub fn upload_video(&mut self, now_ms: u64) -> Result<(), AppError> {
        self.dispatch(SessionEvent::UploadRequested, now_ms)
    }

    /// Drives due health probes and live-data polls.
    ///
    /// Safe to call as often as the caller likes; cadence is owned by the
    /// scheduler and monitor.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] only for internal dispatch failures,
    /// which settled events do not produce.
    pub fn tick(&mut self, now_ms: u64) -> Result<(), AppError> {
        if self.monitor.probe_due(now_ms) {
            let status = self.gateway.check_health();
            self.monitor.record_probe(status, now_ms);
        }

        if let Some(generation) = self.scheduler.due_poll(now_ms) {
            let outcome = self.gateway.fetch_current_data();
            self.scheduler.poll_settled();
            self.dispatch(
                SessionEvent::PollSettled {
                    generation,
                    outcome,
                },
                now_ms,
            )?;
        }

        Ok(())
    }

    /// Routes one event through the machine and executes its commands.
    ///
    /// # Errors
    /// Returns [`AppError::Session`] when the machine rejects an intent.
    pub fn dispatch(&mut self, event: SessionEvent, now_ms: u64) -> Result<(), AppError> {
        let commands = self.machine.handle(event)?;
        for command in commands {
            self.run_command(command, now_ms)?;
        }

        Ok(())
    }

    fn run_command(&mut self, command: Command, now_ms: u64) -> Result<(), AppError> {
        match command {
            Command::StartWebcam { generation } => {
                let outcome = self.gateway.start_webcam();
                self.log_outcome("webcam start", outcome.as_ref().err());
                self.dispatch(
                    SessionEvent::StartSettled {
                        generation,
                        outcome,
                    },
                    now_ms,
                )
            }
            Command::StopWebcam { generation } => {
                let outcome = self.gateway.stop_webcam();
                self.log_outcome("webcam stop", outcome.as_ref().err());
                self.dispatch(
                    SessionEvent::StopSettled {
                        generation,
                        outcome,
                    },
                    now_ms,
                )
            }
            Command::UploadVideo { generation, file } => {
                let outcome = self.gateway.upload_video(&file);
                self.log_outcome("video upload", outcome.as_ref().err());
                self.dispatch(
                    SessionEvent::UploadSettled {
                        generation,
                        outcome,
                    },
                    now_ms,
                )
            }
            Command::BeginPolling { generation } => {
                self.scheduler.begin(generation, now_ms);
                Ok(())
            }
            Command::EndPolling => {
                self.scheduler.end();
                Ok(())
            }
        }
    }

    fn log_outcome(&self, operation: &str, error: Option<&GatewayError>) {
        if let Some(error) = error {
            match classify_gateway_error(error) {
                FailureClass::Retriable => log::warn!("{operation} failed (transient): {error}"),
                FailureClass::Permanent => log::error!("{operation} failed: {error}"),
            }
        }
    }
}

/// Projects the runtime into a flat status view for presentation.
pub fn project_runtime_status(runtime: &SessionRuntime) -> StatusView {
    let machine = runtime.machine();
    let session = machine.session();
    let state = machine.state();

    StatusView {
        version: APP_VERSION.to_string(),
        server: server_status_text(runtime.server_status()),
        mode: match session.mode {
            Some(Mode::Webcam) => "webcam".to_string(),
            Some(Mode::Video) => "video".to_string(),
            None => "-".to_string(),
        },
        phase: format!("{state:?}"),
        busy: matches!(
            state,
            SessionState::Starting | SessionState::Stopping | SessionState::Uploading
        ),
        feed_url: (state == SessionState::Active).then(|| runtime.gateway.webcam_feed_url()),
        count: session.snapshot.count,
        summary: summary_lines(&session.snapshot),
        notice: machine.notice().map(str::to_string),
    }
}

/// Reads a video file from disk into an upload handle.
///
/// # Errors
/// Returns [`AppError::Io`] when the file cannot be read and
/// [`AppError::Core`] when the file name is blank.
pub fn read_video_file(path: &Path) -> Result<FileHandle, AppError> {
    let bytes = fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    FileHandle::new(file_name, bytes).map_err(AppError::Core)
}

static BOUNDARY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Generates a process-unique multipart boundary.
pub fn multipart_boundary() -> String {
    let sequence = BOUNDARY_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("tally-boundary-{:012x}-{sequence}", unix_now_ms())
}

/// Encodes one file as a `multipart/form-data` body with the given boundary.
pub fn encode_multipart(boundary: &str, file: &MultipartFile) -> Vec<u8> {
    let mut body = Vec::with_capacity(file.bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            file.field, file.file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(&file.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Real HTTP transport backed by `ureq`.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    /// Creates a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(timeout)
                .timeout_read(timeout)
                .build(),
        }
    }
}

impl GatewayTransport for UreqTransport {
    fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, GatewayError> {
        let result = match (request.method, request.file.as_ref()) {
            (HttpMethod::Get, _) => self.agent.get(&request.url).call(),
            (HttpMethod::Post, Some(file)) => {
                let boundary = multipart_boundary();
                let body = encode_multipart(&boundary, file);
                self.agent
                    .post(&request.url)
                    .set(
                        "Content-Type",
                        &format!("multipart/form-data; boundary={boundary}"),
                    )
                    .send_bytes(&body)
            }
            (HttpMethod::Post, None) => self.agent.post(&request.url).call(),
        };

        match result {
            Ok(response) => read_response(response),
            Err(ureq::Error::Status(_, response)) => read_response(response),
            Err(ureq::Error::Transport(transport)) => {
                Err(GatewayError::NetworkUnreachable(transport.to_string()))
            }
        }
    }
}

fn read_response(response: ureq::Response) -> Result<TransportResponse, GatewayError> {
    let status = response.status();
    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|error| {
            GatewayError::NetworkUnreachable(format!("response body read failed: {error}"))
        })?;

    Ok(TransportResponse { status, body })
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Session machine rejected an intent or configuration value.
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    /// Gateway configuration error.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    /// Core model validation error.
    #[error("core error: {0}")]
    Core(CoreError),
    /// Local file I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
