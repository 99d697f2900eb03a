//! Integration tests for health monitoring independence.

mod common;

use tally_core::{Mode, ServerStatus};
use tally_session::SessionState;

#[test]
fn health_monitor_tests_offline_probe_never_touches_session_state() {
    let transport = common::ScriptedTransport::new();
    transport.push_unreachable("connection refused"); // startup health probe
    transport.push_ok(200, ""); // webcam_start

    let mut runtime = common::runtime_with(transport.clone());
    assert_eq!(runtime.server_status(), ServerStatus::Unknown);

    runtime.tick(0).expect("tick should work");
    assert_eq!(runtime.server_status(), ServerStatus::Offline);

    // The session still starts fine; health is purely cosmetic.
    runtime
        .select_mode(Mode::Webcam, 0)
        .expect("mode selection should work");
    runtime.start_webcam(0).expect("start should work");
    assert_eq!(runtime.machine().state(), SessionState::Active);
}

#[test]
fn health_monitor_tests_reprobes_on_cadence_only() {
    let transport = common::ScriptedTransport::new();
    transport.push_unreachable("connection refused");
    transport.push_ok(200, "ok");

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    assert_eq!(runtime.server_status(), ServerStatus::Offline);

    // Within the cadence window: no new probe, status unchanged.
    runtime.tick(10_000).expect("tick should work");
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(runtime.server_status(), ServerStatus::Offline);

    runtime.tick(15_000).expect("tick should work");
    assert_eq!(transport.requests().len(), 2);
    assert_eq!(runtime.server_status(), ServerStatus::Online);
}

#[test]
fn health_monitor_tests_non_2xx_probe_reads_offline() {
    let transport = common::ScriptedTransport::new();
    transport.push_ok(503, "maintenance");

    let mut runtime = common::runtime_with(transport.clone());
    runtime.tick(0).expect("tick should work");
    assert_eq!(runtime.server_status(), ServerStatus::Offline);
}
