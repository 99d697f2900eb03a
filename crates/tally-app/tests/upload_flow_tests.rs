//! Integration tests for the single-shot video upload path.

mod common;

use tally_core::{FileHandle, Mode};
use tally_session::SessionState;

#[test]
fn upload_flow_tests_successful_upload_applies_result_and_returns_idle() {
    let transport = common::ScriptedTransport::new();
    transport.push_ok(200, "ok"); // startup health probe
    transport.push_ok(
        200,
        r#"{"success":true,"total_count":12,"summary":{"person":8,"bicycle":4}}"#,
    );

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    runtime
        .select_mode(Mode::Video, 0)
        .expect("mode selection should work");
    runtime
        .select_file(
            FileHandle::new("clip.mp4", vec![0, 1, 2]).expect("file should build"),
            0,
        )
        .expect("file selection should work");
    runtime.upload_video(0).expect("upload should be accepted");

    let session = runtime.machine().session();
    assert_eq!(runtime.machine().state(), SessionState::Idle);
    assert_eq!(session.snapshot.count, 12);
    assert_eq!(session.snapshot.summary.get("person"), Some(&8));
    assert!(session.pending_file.is_none());
    assert_eq!(
        transport.requests().last().map(String::as_str),
        Some("http://127.0.0.1:5000/upload_video")
    );
}

#[test]
fn upload_flow_tests_rejected_upload_retains_file_and_snapshot() {
    let transport = common::ScriptedTransport::new();
    transport.push_ok(200, "ok"); // startup health probe
    transport.push_ok(200, r#"{"success":false,"error":"bad codec"}"#);

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    runtime
        .select_mode(Mode::Video, 0)
        .expect("mode selection should work");
    runtime
        .select_file(
            FileHandle::new("clip.mp4", vec![9, 9]).expect("file should build"),
            0,
        )
        .expect("file selection should work");
    runtime.upload_video(0).expect("upload should be accepted");

    let session = runtime.machine().session();
    assert_eq!(
        runtime.machine().state(),
        SessionState::Selecting(Mode::Video)
    );
    assert_eq!(session.snapshot.count, 0);
    assert!(session.pending_file.is_some());
    assert!(
        runtime
            .take_notice()
            .expect("rejection should surface a notice")
            .contains("bad codec")
    );
}

#[test]
fn upload_flow_tests_upload_without_file_never_contacts_backend() {
    let transport = common::ScriptedTransport::new();
    transport.push_ok(200, "ok"); // startup health probe

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    runtime
        .select_mode(Mode::Video, 0)
        .expect("mode selection should work");

    assert!(runtime.upload_video(0).is_err());
    // Only the health probe reached the transport.
    assert_eq!(transport.requests().len(), 1);
}

#[test]
fn upload_flow_tests_malformed_success_payload_is_invalid_shape() {
    let transport = common::ScriptedTransport::new();
    transport.push_ok(200, "ok"); // startup health probe
    transport.push_ok(200, r#"{"success":true}"#); // missing total_count/summary

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    runtime
        .select_mode(Mode::Video, 0)
        .expect("mode selection should work");
    runtime
        .select_file(
            FileHandle::new("clip.mp4", vec![1]).expect("file should build"),
            0,
        )
        .expect("file selection should work");
    runtime.upload_video(0).expect("upload should be accepted");

    assert_eq!(
        runtime.machine().state(),
        SessionState::Selecting(Mode::Video)
    );
    assert!(
        runtime
            .take_notice()
            .expect("shape mismatch should surface a notice")
            .contains("invalid response shape")
    );
}
