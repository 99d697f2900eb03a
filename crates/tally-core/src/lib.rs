#![warn(missing_docs)]
//! # tally-core
//!
//! ## Purpose
//! Defines the pure data model used across the `tally` workspace.
//!
//! ## Responsibilities
//! - Represent the single client-owned session aggregate.
//! - Represent atomic count/summary snapshots replaced as a unit.
//! - Represent opaque video file handles staged for upload.
//! - Represent backend reachability status for the health monitor.
//!
//! ## Data flow
//! The session state machine mutates one [`Session`] per client instance.
//! Gateway responses are decoded into [`Snapshot`] values and installed
//! whole; presentation reads the aggregate, never mutates it.
//!
//! ## Ownership and lifetimes
//! Snapshots and file handles own their backing data (`String`, `Vec<u8>`,
//! `BTreeMap`) to avoid hidden aliasing between the machine, the gateway, and
//! the presentation layer.
//!
//! ## Error model
//! Validation failures (blank class names, blank file names) return
//! [`CoreError`] variants with caller-actionable categorization.
//!
//! ## Security and privacy notes
//! This crate never logs file bytes. File handles are treated as opaque
//! payloads and are never inspected beyond their declared name.
//!
//! ## Example
//! ```rust
//! use tally_core::{Lifecycle, Session};
//!
//! let session = Session::new();
//! assert!(session.mode.is_none());
//! assert_eq!(session.lifecycle, Lifecycle::Inactive);
//! assert_eq!(session.snapshot.count, 0);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operating mode selected by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Live webcam counting with periodic polling.
    Webcam,
    /// Single-shot uploaded-video analysis.
    Video,
}

/// Lifecycle stage of the session aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// No remote operation is running.
    Inactive,
    /// A start or upload request is in flight.
    Starting,
    /// A webcam session is live and being polled.
    Active,
    /// A stop request is in flight.
    Stopping,
}

/// Backend reachability as observed by the health monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    /// Last probe received a 2xx response.
    Online,
    /// Last probe failed or was rejected.
    Offline,
    /// No probe has completed yet.
    Unknown,
}

/// Atomic count/summary pair produced by a single backend response.
///
/// # Invariants
/// The count and summary are always replaced together; callers never update
/// one field from one response and the other from another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Total detected object count.
    pub count: u64,
    /// Per-class quantity, keyed by detected class name.
    pub summary: BTreeMap<String, u64>,
}

impl Snapshot {
    /// Constructs a validated snapshot.
    ///
    /// # Errors
    /// Returns [`CoreError::BlankClassName`] when any summary key is blank.
    pub fn new(count: u64, summary: BTreeMap<String, u64>) -> Result<Self, CoreError> {
        if summary.keys().any(|name| name.trim().is_empty()) {
            return Err(CoreError::BlankClassName);
        }

        Ok(Self { count, summary })
    }

    /// Returns the zero snapshot used at session creation and reset.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Opaque handle for a video file staged for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Original file name forwarded to the backend form field.
    pub file_name: String,
    /// Full file contents transmitted by the upload operation.
    pub bytes: Vec<u8>,
}

impl FileHandle {
    /// Constructs a validated file handle.
    ///
    /// # Errors
    /// Returns [`CoreError::BlankFileName`] when the name is blank.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, CoreError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(CoreError::BlankFileName);
        }

        Ok(Self { file_name, bytes })
    }

    /// Returns the staged file size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when the staged file has no content.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The single client-owned session aggregate.
///
/// # Invariants
/// - `lifecycle == Active` implies `mode` is set.
/// - `pending_file` is set only while `mode == Some(Mode::Video)`.
///
/// Both invariants are maintained by the session state machine, the only
/// writer of this aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Selected operating mode; `None` until the operator picks one.
    pub mode: Option<Mode>,
    /// Current lifecycle stage.
    pub lifecycle: Lifecycle,
    /// Latest applied count/summary snapshot.
    pub snapshot: Snapshot,
    /// Video file staged for upload, if any.
    pub pending_file: Option<FileHandle>,
}

impl Session {
    /// Creates the initial idle session.
    pub fn new() -> Self {
        Self {
            mode: None,
            lifecycle: Lifecycle::Inactive,
            snapshot: Snapshot::empty(),
            pending_file: None,
        }
    }

    /// Resets the aggregate to idle while keeping the last applied snapshot.
    ///
    /// The snapshot survives reset so a finished session's final result stays
    /// visible until the next session overwrites it.
    pub fn reset(&mut self) {
        self.mode = None;
        self.lifecycle = Lifecycle::Inactive;
        self.pending_file = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Error type for core domain validation failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Summary class names must be non-blank.
    #[error("summary class name is blank")]
    BlankClassName,
    /// Staged file names must be non-blank.
    #[error("file name is blank")]
    BlankFileName,
}
