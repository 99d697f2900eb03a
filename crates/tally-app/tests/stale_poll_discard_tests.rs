//! Integration tests for the generation-tagged stale result discard rule.

mod common;

use tally_core::Mode;
use tally_gateway::GatewayError;
use tally_session::{SessionConfig, SessionEvent, SessionMachine, SessionState};

fn active_machine() -> (SessionMachine, u64) {
    let mut machine = SessionMachine::new(SessionConfig::default());
    machine
        .handle(SessionEvent::ModeSelected(Mode::Webcam))
        .expect("selection should be accepted");
    machine
        .handle(SessionEvent::StartRequested)
        .expect("start should be accepted");
    let generation = machine.generation();
    machine
        .handle(SessionEvent::StartSettled {
            generation,
            outcome: Ok(()),
        })
        .expect("settled events never error");
    (machine, generation)
}

#[test]
fn stale_poll_discard_tests_poll_arriving_after_stop_request_is_discarded() {
    let (mut machine, poll_generation) = active_machine();

    machine
        .handle(SessionEvent::PollSettled {
            generation: poll_generation,
            outcome: Ok(common::snapshot(5, &[("dog", 5)])),
        })
        .expect("settled events never error");
    assert_eq!(machine.session().snapshot.count, 5);

    machine
        .handle(SessionEvent::StopRequested)
        .expect("stop should be accepted");

    // A poll issued before the stop intent completes afterwards; it must not
    // touch the snapshot.
    machine
        .handle(SessionEvent::PollSettled {
            generation: poll_generation,
            outcome: Ok(common::snapshot(6, &[("dog", 6)])),
        })
        .expect("settled events never error");

    assert_eq!(machine.session().snapshot.count, 5);
    assert_eq!(machine.state(), SessionState::Stopping);
}

#[test]
fn stale_poll_discard_tests_final_stop_snapshot_wins_for_both_interleavings() {
    // Interleaving 1: stale poll lands between the stop intent and the stop
    // completion.
    let (mut machine, poll_generation) = active_machine();
    machine
        .handle(SessionEvent::PollSettled {
            generation: poll_generation,
            outcome: Ok(common::snapshot(5, &[("dog", 5)])),
        })
        .expect("settled events never error");
    machine
        .handle(SessionEvent::StopRequested)
        .expect("stop should be accepted");
    let stop_generation = machine.generation();
    machine
        .handle(SessionEvent::PollSettled {
            generation: poll_generation,
            outcome: Ok(common::snapshot(5, &[("dog", 5)])),
        })
        .expect("settled events never error");
    machine
        .handle(SessionEvent::StopSettled {
            generation: stop_generation,
            outcome: Ok(common::snapshot(7, &[("dog", 7)])),
        })
        .expect("settled events never error");
    assert_eq!(machine.session().snapshot.count, 7);
    assert_eq!(machine.session().snapshot.summary.get("dog"), Some(&7));

    // Interleaving 2: stale poll lands after the stop completion.
    let (mut machine, poll_generation) = active_machine();
    machine
        .handle(SessionEvent::StopRequested)
        .expect("stop should be accepted");
    let stop_generation = machine.generation();
    machine
        .handle(SessionEvent::StopSettled {
            generation: stop_generation,
            outcome: Ok(common::snapshot(7, &[("dog", 7)])),
        })
        .expect("settled events never error");
    machine
        .handle(SessionEvent::PollSettled {
            generation: poll_generation,
            outcome: Ok(common::snapshot(5, &[("dog", 5)])),
        })
        .expect("settled events never error");

    assert_eq!(machine.state(), SessionState::Idle);
    assert_eq!(machine.session().snapshot.count, 7);
}

#[test]
fn stale_poll_discard_tests_stale_start_and_upload_results_are_discarded() {
    // A start result stamped with an old generation must not re-activate a
    // session that has since been torn down.
    let (mut machine, first_generation) = active_machine();
    machine
        .handle(SessionEvent::StopRequested)
        .expect("stop should be accepted");
    let stop_generation = machine.generation();
    machine
        .handle(SessionEvent::StopSettled {
            generation: stop_generation,
            outcome: Ok(common::snapshot(1, &[])),
        })
        .expect("settled events never error");

    let commands = machine
        .handle(SessionEvent::StartSettled {
            generation: first_generation,
            outcome: Ok(()),
        })
        .expect("settled events never error");
    assert!(commands.is_empty());
    assert_eq!(machine.state(), SessionState::Idle);

    let commands = machine
        .handle(SessionEvent::UploadSettled {
            generation: first_generation,
            outcome: Err(GatewayError::NetworkUnreachable("late".to_string())),
        })
        .expect("settled events never error");
    assert!(commands.is_empty());
    assert_eq!(machine.state(), SessionState::Idle);
}

#[test]
fn stale_poll_discard_tests_poll_failures_keep_session_alive_by_default() {
    let (mut machine, generation) = active_machine();

    for _ in 0..100 {
        let commands = machine
            .handle(SessionEvent::PollSettled {
                generation,
                outcome: Err(GatewayError::NetworkUnreachable("blip".to_string())),
            })
            .expect("settled events never error");
        assert!(commands.is_empty());
    }

    assert_eq!(machine.state(), SessionState::Active);
}

#[test]
fn stale_poll_discard_tests_failure_threshold_aborts_via_stop_path() {
    let mut machine = SessionMachine::new(SessionConfig {
        max_consecutive_poll_failures: Some(3),
        ..SessionConfig::default()
    });
    machine
        .handle(SessionEvent::ModeSelected(Mode::Webcam))
        .expect("selection should be accepted");
    machine
        .handle(SessionEvent::StartRequested)
        .expect("start should be accepted");
    let generation = machine.generation();
    machine
        .handle(SessionEvent::StartSettled {
            generation,
            outcome: Ok(()),
        })
        .expect("settled events never error");

    for attempt in 1..=3 {
        let commands = machine
            .handle(SessionEvent::PollSettled {
                generation,
                outcome: Err(GatewayError::NetworkUnreachable("down".to_string())),
            })
            .expect("settled events never error");
        if attempt < 3 {
            assert!(commands.is_empty());
            assert_eq!(machine.state(), SessionState::Active);
        } else {
            assert_eq!(commands.len(), 2);
            assert_eq!(machine.state(), SessionState::Stopping);
        }
    }

    // A success from the aborted generation is stale and discarded.
    let commands = machine
        .handle(SessionEvent::PollSettled {
            generation,
            outcome: Ok(common::snapshot(9, &[])),
        })
        .expect("settled events never error");
    assert!(commands.is_empty());
    assert_eq!(machine.session().snapshot.count, 0);
}
