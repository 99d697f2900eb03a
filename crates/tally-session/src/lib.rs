#![warn(missing_docs)]
//! # tally-session
//!
//! ## Purpose
//! Implements the session state machine, the poll loop scheduler, and the
//! backend health monitor for `tally`.
//!
//! ## Responsibilities
//! - Model safe session transitions for the webcam and video paths.
//! - Tag every remote request with the session generation at issue time and
//!   discard results whose generation no longer matches.
//! - Schedule live-data polls on a fixed no-drift cadence with at most one
//!   poll in flight.
//! - Track backend reachability independently of session state.
//!
//! ## Data flow
//! Operator intents and settled remote results enter
//! [`SessionMachine::handle`] as [`SessionEvent`] values -> the machine
//! mutates the owned [`Session`] aggregate and emits [`Command`] values ->
//! the runtime executes commands through the gateway and feeds completion
//! events back in.
//!
//! ## Ownership and lifetimes
//! The machine owns the Session aggregate outright; no other component may
//! mutate it. Commands carry owned payloads so execution never borrows
//! machine state.
//!
//! ## Error model
//! Invalid operator intents return [`SessionError`]. Settled remote results
//! never error: failures revert state and surface an operator notice, and
//! stale results are discarded silently.
//!
//! ## Example
//! ```rust
//! use tally_core::Mode;
//! use tally_session::{SessionEvent, SessionMachine, SessionState};
//!
//! let mut machine = SessionMachine::new(Default::default());
//! machine.handle(SessionEvent::ModeSelected(Mode::Webcam)).unwrap();
//! assert_eq!(machine.state(), SessionState::Selecting(Mode::Webcam));
//! ```

use tally_core::{FileHandle, Lifecycle, Mode, ServerStatus, Session, Snapshot};
use tally_gateway::GatewayError;
use thiserror::Error;

/// Default live-data poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default health probe interval in milliseconds.
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 15_000;

/// Tunable session behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed live-data poll cadence.
    pub poll_interval_ms: u64,
    /// Consecutive poll failures after which the session is aborted via the
    /// stop path. `None` keeps polling indefinitely, matching the reference
    /// behavior.
    pub max_consecutive_poll_failures: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_consecutive_poll_failures: None,
        }
    }
}

/// Externally visible machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No mode selected.
    Idle,
    /// Mode picked, nothing started yet.
    Selecting(Mode),
    /// Webcam start request in flight.
    Starting,
    /// Webcam session live, polling.
    Active,
    /// Webcam stop request in flight.
    Stopping,
    /// Video upload in flight.
    Uploading,
}

impl SessionState {
    fn lifecycle(self) -> Lifecycle {
        match self {
            SessionState::Idle | SessionState::Selecting(_) => Lifecycle::Inactive,
            SessionState::Starting | SessionState::Uploading => Lifecycle::Starting,
            SessionState::Active => Lifecycle::Active,
            SessionState::Stopping => Lifecycle::Stopping,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Selecting(Mode::Webcam) => "selecting webcam mode",
            SessionState::Selecting(Mode::Video) => "selecting video mode",
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Uploading => "uploading",
        }
    }
}

/// Events consumed by the session machine.
///
/// Settled variants carry the generation stamped on the request at issue
/// time; the machine applies them only while that generation is current.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Operator picked an operating mode.
    ModeSelected(Mode),
    /// Operator staged a video file for upload.
    FileSelected(FileHandle),
    /// Operator asked to start the webcam session.
    StartRequested,
    /// The webcam start request completed.
    StartSettled {
        /// Generation stamped at issue time.
        generation: u64,
        /// Remote outcome.
        outcome: Result<(), GatewayError>,
    },
    /// Operator asked to stop the webcam session.
    StopRequested,
    /// The webcam stop request completed.
    StopSettled {
        /// Generation stamped at issue time.
        generation: u64,
        /// Remote outcome carrying the authoritative final snapshot.
        outcome: Result<Snapshot, GatewayError>,
    },
    /// A live-data poll completed.
    PollSettled {
        /// Generation stamped at issue time.
        generation: u64,
        /// Remote outcome carrying the polled snapshot.
        outcome: Result<Snapshot, GatewayError>,
    },
    /// Operator asked to upload the staged video.
    UploadRequested,
    /// The video upload completed.
    UploadSettled {
        /// Generation stamped at issue time.
        generation: u64,
        /// Remote outcome carrying the analysis result snapshot.
        outcome: Result<Snapshot, GatewayError>,
    },
}

/// Remote effects requested by the machine, executed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Issue the webcam start request.
    StartWebcam {
        /// Generation to stamp on the request.
        generation: u64,
    },
    /// Issue the webcam stop request.
    StopWebcam {
        /// Generation to stamp on the request.
        generation: u64,
    },
    /// Issue the video upload request.
    UploadVideo {
        /// Generation to stamp on the request.
        generation: u64,
        /// Staged file to transmit.
        file: FileHandle,
    },
    /// Hand the poll scheduler a fresh polling handle.
    BeginPolling {
        /// Generation every issued poll must carry.
        generation: u64,
    },
    /// Destroy the polling handle synchronously.
    EndPolling,
}

/// Session state machine: single writer of the [`Session`] aggregate.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: Session,
    state: SessionState,
    generation: u64,
    consecutive_poll_failures: u32,
    notice: Option<String>,
    config: SessionConfig,
}

impl SessionMachine {
    /// Creates the machine in the initial idle state.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session: Session::new(),
            state: SessionState::Idle,
            generation: 0,
            consecutive_poll_failures: 0,
            notice: None,
            config,
        }
    }

    /// Returns the current machine state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns a read-only view of the session aggregate.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the current session generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the pending operator notice, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Removes and returns the pending operator notice.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Processes one event and returns the commands it produced.
    ///
    /// This is the single mutation entry point for the session aggregate;
    /// events are applied strictly in the order they are handed in.
    ///
    /// # Errors
    /// Returns [`SessionError`] for invalid operator intents. Settled remote
    /// results never error; stale ones are discarded.
    pub fn handle(&mut self, event: SessionEvent) -> Result<Vec<Command>, SessionError> {
        match event {
            SessionEvent::ModeSelected(mode) => self.on_mode_selected(mode),
            SessionEvent::FileSelected(file) => self.on_file_selected(file),
            SessionEvent::StartRequested => self.on_start_requested(),
            SessionEvent::StartSettled {
                generation,
                outcome,
            } => Ok(self.on_start_settled(generation, outcome)),
            SessionEvent::StopRequested => self.on_stop_requested(),
            SessionEvent::StopSettled {
                generation,
                outcome,
            } => Ok(self.on_stop_settled(generation, outcome)),
            SessionEvent::PollSettled {
                generation,
                outcome,
            } => Ok(self.on_poll_settled(generation, outcome)),
            SessionEvent::UploadRequested => self.on_upload_requested(),
            SessionEvent::UploadSettled {
                generation,
                outcome,
            } => Ok(self.on_upload_settled(generation, outcome)),
        }
    }

    fn on_mode_selected(&mut self, mode: Mode) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Idle | SessionState::Selecting(_) => {
                if mode != Mode::Video {
                    self.session.pending_file = None;
                }
                self.session.mode = Some(mode);
                self.set_state(SessionState::Selecting(mode));
                Ok(Vec::new())
            }
            state => Err(SessionError::InvalidTransition {
                action: "select a mode",
                state: state.describe(),
            }),
        }
    }

    fn on_file_selected(&mut self, file: FileHandle) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Selecting(Mode::Video) => {
                self.session.pending_file = Some(file);
                Ok(Vec::new())
            }
            state => Err(SessionError::InvalidTransition {
                action: "select a file",
                state: state.describe(),
            }),
        }
    }

    fn on_start_requested(&mut self) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Selecting(Mode::Webcam) => {
                let generation = self.bump_generation();
                self.set_state(SessionState::Starting);
                Ok(vec![Command::StartWebcam { generation }])
            }
            // Idempotent guard: a duplicate start must never issue a second
            // concurrent request.
            SessionState::Starting | SessionState::Active => Err(SessionError::AlreadyRunning),
            state => Err(SessionError::InvalidTransition {
                action: "start the webcam",
                state: state.describe(),
            }),
        }
    }

    fn on_start_settled(&mut self, generation: u64, outcome: Result<(), GatewayError>) -> Vec<Command> {
        if self.state != SessionState::Starting || generation != self.generation {
            self.log_discard("start", generation);
            return Vec::new();
        }

        match outcome {
            Ok(()) => {
                self.consecutive_poll_failures = 0;
                self.set_state(SessionState::Active);
                vec![Command::BeginPolling {
                    generation: self.generation,
                }]
            }
            Err(error) => {
                self.notice = Some(format!("webcam start failed: {error}"));
                self.set_state(SessionState::Selecting(Mode::Webcam));
                Vec::new()
            }
        }
    }

    fn on_stop_requested(&mut self) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Active => {
                // Bumping the generation here is what invalidates every poll
                // already in flight; EndPolling must precede the stop request
                // so no further poll can be issued.
                let generation = self.bump_generation();
                self.set_state(SessionState::Stopping);
                Ok(vec![
                    Command::EndPolling,
                    Command::StopWebcam { generation },
                ])
            }
            state => Err(SessionError::InvalidTransition {
                action: "stop the webcam",
                state: state.describe(),
            }),
        }
    }

    fn on_stop_settled(
        &mut self,
        generation: u64,
        outcome: Result<Snapshot, GatewayError>,
    ) -> Vec<Command> {
        if self.state != SessionState::Stopping || generation != self.generation {
            self.log_discard("stop", generation);
            return Vec::new();
        }

        match outcome {
            Ok(snapshot) => {
                // The final snapshot always wins over any in-flight poll.
                self.session.snapshot = snapshot;
                self.notice = Some("webcam session ended".to_string());
                self.session.reset();
                self.set_state(SessionState::Idle);
                Vec::new()
            }
            Err(error) => {
                // The backend did not confirm the stop, so the session is
                // still live; resume polling under the current generation.
                self.notice = Some(format!("webcam stop failed: {error}"));
                self.set_state(SessionState::Active);
                vec![Command::BeginPolling {
                    generation: self.generation,
                }]
            }
        }
    }

    fn on_poll_settled(
        &mut self,
        generation: u64,
        outcome: Result<Snapshot, GatewayError>,
    ) -> Vec<Command> {
        if self.state != SessionState::Active || generation != self.generation {
            self.log_discard("poll", generation);
            return Vec::new();
        }

        match outcome {
            Ok(snapshot) => {
                self.session.snapshot = snapshot;
                self.consecutive_poll_failures = 0;
                Vec::new()
            }
            Err(error) => {
                self.consecutive_poll_failures = self.consecutive_poll_failures.saturating_add(1);
                self.notice = Some(format!("live count fetch failed: {error}"));
                log::warn!(
                    "poll failed ({} consecutive): {error}",
                    self.consecutive_poll_failures
                );

                if let Some(threshold) = self.config.max_consecutive_poll_failures
                    && self.consecutive_poll_failures >= threshold
                {
                    let generation = self.bump_generation();
                    self.set_state(SessionState::Stopping);
                    self.notice = Some(format!(
                        "live polling failed {threshold} times in a row; stopping session"
                    ));
                    return vec![
                        Command::EndPolling,
                        Command::StopWebcam { generation },
                    ];
                }

                Vec::new()
            }
        }
    }

    fn on_upload_requested(&mut self) -> Result<Vec<Command>, SessionError> {
        match self.state {
            SessionState::Selecting(Mode::Video) => {
                // Rejected before any backend contact when no file is staged.
                let file = self
                    .session
                    .pending_file
                    .clone()
                    .ok_or(SessionError::NoFileSelected)?;
                let generation = self.bump_generation();
                self.set_state(SessionState::Uploading);
                Ok(vec![Command::UploadVideo { generation, file }])
            }
            state => Err(SessionError::InvalidTransition {
                action: "upload a video",
                state: state.describe(),
            }),
        }
    }

    fn on_upload_settled(
        &mut self,
        generation: u64,
        outcome: Result<Snapshot, GatewayError>,
    ) -> Vec<Command> {
        if self.state != SessionState::Uploading || generation != self.generation {
            self.log_discard("upload", generation);
            return Vec::new();
        }

        match outcome {
            Ok(snapshot) => {
                self.session.snapshot = snapshot;
                self.notice = Some("video processed".to_string());
                self.session.reset();
                self.set_state(SessionState::Idle);
                Vec::new()
            }
            Err(error) => {
                // The staged file is retained so the operator can retry.
                self.notice = Some(format!("video processing failed: {error}"));
                self.set_state(SessionState::Selecting(Mode::Video));
                Vec::new()
            }
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn set_state(&mut self, state: SessionState) {
        log::debug!("session {} -> {}", self.state.describe(), state.describe());
        self.state = state;
        self.session.lifecycle = state.lifecycle();
    }

    fn log_discard(&self, kind: &str, generation: u64) {
        log::debug!(
            "discarding stale {kind} result (stamped generation {generation}, current {}, state {})",
            self.generation,
            self.state.describe()
        );
    }
}

/// Ownership token for one active polling timer.
///
/// Exists only while the session is active in webcam mode; destroyed
/// synchronously on any exit from that state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollHandle {
    generation: u64,
    next_due_ms: u64,
    in_flight: bool,
}

/// Fixed-cadence poll scheduler with an at-most-one-in-flight guard.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    interval_ms: u64,
    handle: Option<PollHandle>,
}

impl PollScheduler {
    /// Creates a scheduler with the given poll interval.
    ///
    /// # Errors
    /// Returns [`SessionError::InvalidPollInterval`] when the interval is 0.
    pub fn new(interval_ms: u64) -> Result<Self, SessionError> {
        if interval_ms == 0 {
            return Err(SessionError::InvalidPollInterval);
        }

        Ok(Self {
            interval_ms,
            handle: None,
        })
    }

    /// Hands the scheduler a fresh polling handle.
    ///
    /// Invoked exactly once per transition into the active state; the first
    /// poll falls due one interval after `now_ms`.
    pub fn begin(&mut self, generation: u64, now_ms: u64) {
        self.handle = Some(PollHandle {
            generation,
            next_due_ms: now_ms.saturating_add(self.interval_ms),
            in_flight: false,
        });
    }

    /// Destroys the polling handle synchronously.
    ///
    /// After this returns, no further poll can be issued from the old handle.
    pub fn end(&mut self) {
        self.handle = None;
    }

    /// Returns `true` while a polling handle exists.
    pub fn is_polling(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns the generation to stamp on a poll when one is due.
    ///
    /// While a poll is in flight, due ticks are skipped rather than queued,
    /// so a slow backend never accumulates a request backlog. Missed due
    /// times are advanced past `now_ms` on the fixed cadence, so the
    /// schedule does not drift.
    pub fn due_poll(&mut self, now_ms: u64) -> Option<u64> {
        let interval = self.interval_ms;
        let handle = self.handle.as_mut()?;
        if now_ms < handle.next_due_ms {
            return None;
        }

        while handle.next_due_ms <= now_ms {
            handle.next_due_ms = handle.next_due_ms.saturating_add(interval);
        }

        if handle.in_flight {
            return None;
        }

        handle.in_flight = true;
        Some(handle.generation)
    }

    /// Records that the in-flight poll settled (successfully or not).
    pub fn poll_settled(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.in_flight = false;
        }
    }
}

/// Independent backend reachability monitor.
///
/// Purely cosmetic: probe outcomes set [`ServerStatus`] and nothing else;
/// session state is never affected.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    interval_ms: u64,
    status: ServerStatus,
    next_probe_ms: Option<u64>,
}

impl HealthMonitor {
    /// Creates a monitor that probes immediately, then on the given cadence.
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            status: ServerStatus::Unknown,
            next_probe_ms: None,
        }
    }

    /// Returns the last observed backend status.
    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Returns `true` when a probe should be issued at `now_ms`.
    pub fn probe_due(&self, now_ms: u64) -> bool {
        match self.next_probe_ms {
            None => true,
            Some(next) => now_ms >= next,
        }
    }

    /// Records one probe outcome.
    pub fn record_probe(&mut self, status: ServerStatus, now_ms: u64) {
        self.status = status;
        self.next_probe_ms = Some(now_ms.saturating_add(self.interval_ms));
    }
}

/// Errors produced by invalid operator intents or configuration.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The intent is not legal in the current state.
    #[error("cannot {action} while the session is {state}")]
    InvalidTransition {
        /// Operator intent that was rejected.
        action: &'static str,
        /// Human-readable current state.
        state: &'static str,
    },
    /// A webcam session is already starting or active.
    #[error("a webcam session is already starting or active")]
    AlreadyRunning,
    /// Upload was requested with no staged file.
    #[error("no video file selected")]
    NoFileSelected,
    /// Poll interval must be strictly positive.
    #[error("poll interval must be greater than zero")]
    InvalidPollInterval,
}
