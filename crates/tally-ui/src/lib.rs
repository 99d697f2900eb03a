#![warn(missing_docs)]
//! # tally-ui
//!
//! ## Purpose
//! Defines the display-safe status view model for `tally`.
//!
//! ## Responsibilities
//! - Represent a flat, render-ready snapshot of runtime state.
//! - Format server status and per-class summary lines for display.
//!
//! ## Data flow
//! The app runtime projects machine + monitor state into [`StatusView`];
//! presentation renders the view and never mutates runtime state.
//!
//! ## Ownership and lifetimes
//! The view owns all of its strings so rendering never borrows from the
//! runtime across event processing.
//!
//! ## Error model
//! This crate is purely presentational and produces no errors.

use tally_core::{ServerStatus, Snapshot};

/// Flat, render-ready status snapshot.
///
/// Presentation is a pure function of this view: it reads every field and
/// issues intents back into the runtime, nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    /// App version string sourced from root `VERSION`.
    pub version: String,
    /// Server status text for the header line.
    pub server: &'static str,
    /// Selected mode label, `-` when none.
    pub mode: String,
    /// Session phase label.
    pub phase: String,
    /// `true` while a remote operation is in flight (start/stop/upload).
    pub busy: bool,
    /// Live feed URL, present only while a webcam session is active.
    pub feed_url: Option<String>,
    /// Total detected object count.
    pub count: u64,
    /// Sorted `name: quantity` summary lines.
    pub summary: Vec<String>,
    /// Pending operator notice, if any.
    pub notice: Option<String>,
}

/// Returns display text for a server status.
pub fn server_status_text(status: ServerStatus) -> &'static str {
    match status {
        ServerStatus::Online => "Online",
        ServerStatus::Offline => "Offline",
        ServerStatus::Unknown => "Checking...",
    }
}

/// Formats a snapshot's summary as sorted `name: quantity` lines.
pub fn summary_lines(snapshot: &Snapshot) -> Vec<String> {
    snapshot
        .summary
        .iter()
        .map(|(name, quantity)| format!("{name}: {quantity}"))
        .collect()
}
