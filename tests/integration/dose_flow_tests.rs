//! Integration tests for the write → queue → controller → coils pipeline.
//!
//! Each test owns its own `CommandQueue` so tests can run in parallel
//! without sharing the firmware's static queue.

use crate::mock_hw::{CoilCall, MockCoils, RecordingSink};

use microdoser::adapters::ble::BleCommandChannel;
use microdoser::app::command::CommandKind;
use microdoser::app::controller::{ActuationController, PHASE_COUNT};
use microdoser::app::events::AppEvent;
use microdoser::app::queue::CommandQueue;
use microdoser::config::DoserConfig;
use microdoser::error::CommandError;

fn channel(queue: &CommandQueue) -> BleCommandChannel<'_> {
    let mut name = heapless::String::new();
    name.push_str("MicroDoser").ok();
    BleCommandChannel::new(name, queue)
}

fn controller(queue: &CommandQueue, coils: MockCoils) -> ActuationController<'_, MockCoils> {
    ActuationController::new(coils, queue, &DoserConfig::default())
}

/// Tick until Idle; returns the number of ticks that drove a step.
fn run_to_idle(ctl: &mut ActuationController<'_, MockCoils>, sink: &mut RecordingSink) -> u32 {
    let mut ticks = 0;
    while ctl.tick(sink) {
        ticks += 1;
    }
    ticks
}

#[test]
fn push_0_1_runs_exactly_205_steps() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    assert_eq!(ch.on_command_write(b"PUSH:0.1"), Ok(CommandKind::Push));
    assert!(ctl.poll(&mut sink));
    assert_eq!(ctl.state().steps_remaining(), 205);
    assert!(ctl.state().busy());

    for _ in 0..204 {
        assert!(ctl.tick(&mut sink));
    }
    assert!(ctl.is_busy(), "still one step to go");
    assert!(ctl.tick(&mut sink));
    assert!(!ctl.is_busy());
    assert_eq!(ctl.state().steps_remaining(), 0);
    assert_eq!(ctl.coils().patterns().len(), 205);
    assert_eq!(
        sink.last(),
        Some(&AppEvent::MoveCompleted {
            kind: CommandKind::Push,
            steps: 205
        })
    );
}

#[test]
fn flush_is_fixed_count_every_time() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    for _ in 0..2 {
        ch.on_command_write(b"FLUSH").unwrap();
        assert!(ctl.poll(&mut sink));
        assert_eq!(ctl.state().steps_remaining(), 4096);
        assert_eq!(run_to_idle(&mut ctl, &mut sink), 4096);
    }
    assert_eq!(ctl.telemetry().flushes_completed, 2);
    assert_eq!(ctl.telemetry().steps_delivered, 8192);
}

#[test]
fn writes_while_busy_are_rejected_without_touching_motor() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    ch.on_command_write(b"PUSH:0.05").unwrap();
    ctl.poll(&mut sink);
    for _ in 0..10 {
        ctl.tick(&mut sink);
    }
    let before = ctl.state();

    assert_eq!(ch.on_command_write(b"FLUSH"), Err(CommandError::Busy));
    let once = ctl.state();
    assert_eq!(ch.on_command_write(b"FLUSH"), Err(CommandError::Busy));
    assert_eq!(ch.last_status().as_str(), "REJ:BUSY");

    assert_eq!(before, once);
    assert_eq!(once, ctl.state());
    assert!(!q.has_pending());
    assert!(!ctl.poll(&mut sink), "no new move while stepping");

    run_to_idle(&mut ctl, &mut sink);
    assert_eq!(ch.on_command_write(b"FLUSH"), Ok(CommandKind::Flush));
}

#[test]
fn malformed_writes_never_reach_the_controller() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    for payload in [&b"PUSH:abc"[..], b"push:5", b"", b"FOO"] {
        assert_eq!(ch.on_command_write(payload), Err(CommandError::Malformed));
        assert!(!q.has_pending());
        assert!(!ctl.poll(&mut sink));
    }
    assert_eq!(ctl.state().steps_remaining(), 0);
    assert!(!ctl.is_busy());
    assert!(ctl.coils().calls.is_empty());
    assert!(sink.events.is_empty());
}

#[test]
fn out_of_range_rejected_before_any_coil_output() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = (RecordingSink::new(), &mut ch);

    // The channel only checks syntax; the step bound is the controller's.
    assert_eq!(sink.1.on_command_write(b"PUSH:100"), Ok(CommandKind::Push));
    assert!(!ctl.poll(&mut sink));
    assert!(ctl.coils().patterns().is_empty());
    assert_eq!(sink.1.last_status().as_str(), "REJ:RANGE");
    assert_eq!(
        sink.0.last(),
        Some(&AppEvent::CommandRejected {
            kind: CommandKind::Push,
            reason: CommandError::OutOfRange
        })
    );

    // Idle again: the next write is accepted.
    assert_eq!(sink.1.on_command_write(b"PUSH:0"), Ok(CommandKind::Push));
    assert!(!ctl.poll(&mut sink), "zero steps is out of range too");
    assert_eq!(sink.1.on_command_write(b"PUSH:0.001"), Ok(CommandKind::Push));
    assert!(ctl.poll(&mut sink));
}

#[test]
fn status_follows_the_move() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());

    ch.on_command_write(b"PUSH:0.01").unwrap();
    assert_eq!(ch.last_status().as_str(), "ACK:PUSH");

    ctl.poll(&mut ch);
    assert_eq!(ch.last_status().as_str(), "RUN:20");

    while ctl.tick(&mut ch) {}
    assert_eq!(ch.last_status().as_str(), "DONE:20");
}

#[test]
fn phase_advances_by_one_each_tick() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    ch.on_command_write(b"PUSH:0.02").unwrap();
    ctl.poll(&mut sink);
    let mut phase = ctl.state().phase();
    while ctl.tick(&mut sink) {
        let next = ctl.state().phase();
        assert_eq!(next, (phase + 1) % PHASE_COUNT);
        phase = next;
    }
}

#[test]
fn coils_released_at_end_of_move() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    ctl.start(&mut sink);
    ch.on_command_write(b"PUSH:0.002").unwrap();
    ctl.poll(&mut sink);
    run_to_idle(&mut ctl, &mut sink);

    assert_eq!(ctl.coils().calls.first(), Some(&CoilCall::Release));
    assert_eq!(ctl.coils().calls.last(), Some(&CoilCall::Release));
    assert!(!ctl.coils().energized());
}

#[test]
fn coil_fault_aborts_and_recovers() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::failing_after(5));
    let mut sink = RecordingSink::new();

    ch.on_command_write(b"PUSH:0.01").unwrap();
    ctl.poll(&mut sink);
    assert_eq!(run_to_idle(&mut ctl, &mut sink), 5);
    assert!(!ctl.is_busy());
    assert_eq!(
        sink.last(),
        Some(&AppEvent::MoveAborted {
            kind: CommandKind::Push,
            remaining: 15
        })
    );
    assert_eq!(ctl.coils().calls.last(), Some(&CoilCall::Release));

    // Gate is open again.
    assert_eq!(ch.on_command_write(b"FLUSH"), Ok(CommandKind::Flush));
}

#[test]
fn abort_mid_move_returns_to_idle() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = controller(&q, MockCoils::new());
    let mut sink = RecordingSink::new();

    ch.on_command_write(b"FLUSH").unwrap();
    ctl.poll(&mut sink);
    for _ in 0..100 {
        ctl.tick(&mut sink);
    }
    assert!(ctl.abort(&mut sink));
    assert_eq!(ctl.state().steps_remaining(), 0);
    assert!(!ctl.tick(&mut sink));
    assert_eq!(ctl.telemetry().moves_aborted, 1);
    assert_eq!(ch.on_command_write(b"PUSH:1"), Ok(CommandKind::Push));
}
