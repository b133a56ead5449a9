//! Integration tests for the link lifecycle of the command channel.

use crate::mock_hw::{MockCoils, RecordingSink};

use microdoser::adapters::ble::{BleCommandChannel, ConnectionState};
use microdoser::app::command::CommandKind;
use microdoser::app::controller::ActuationController;
use microdoser::app::queue::CommandQueue;
use microdoser::config::DoserConfig;
use microdoser::events::{self, Event, push_event};

fn channel(queue: &CommandQueue) -> BleCommandChannel<'_> {
    let mut name = heapless::String::new();
    name.push_str("MicroDoser").ok();
    BleCommandChannel::new(name, queue)
}

#[test]
fn starts_idle_then_advertises() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    assert_eq!(ch.state(), ConnectionState::Idle);
    ch.start().unwrap();
    assert_eq!(ch.state(), ConnectionState::Advertising);
    ch.start().unwrap();
    assert_eq!(ch.state(), ConnectionState::Advertising);
}

#[test]
fn reconnect_resumes_acceptance() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = ActuationController::new(MockCoils::new(), &q, &DoserConfig::default());
    let mut sink = RecordingSink::new();

    ch.start().unwrap();
    ch.on_link_established();
    ch.on_command_write(b"PUSH:0.001").unwrap();
    ctl.poll(&mut sink);
    while ctl.tick(&mut sink) {}

    ch.on_link_lost().unwrap();
    assert_eq!(ch.state(), ConnectionState::Advertising);

    ch.on_link_established();
    assert_eq!(ch.state(), ConnectionState::Connected);
    assert_eq!(ch.on_command_write(b"FLUSH"), Ok(CommandKind::Flush));
    assert!(ctl.poll(&mut sink));
}

#[test]
fn link_loss_mid_move_does_not_stop_the_motor() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    let mut ctl = ActuationController::new(MockCoils::new(), &q, &DoserConfig::default());
    let mut sink = RecordingSink::new();

    ch.start().unwrap();
    ch.on_link_established();
    ch.on_command_write(b"PUSH:0.01").unwrap();
    ctl.poll(&mut sink);
    ctl.tick(&mut sink);

    ch.on_link_lost().unwrap();
    assert!(ctl.is_busy());
    let mut ticks = 1;
    while ctl.tick(&mut sink) {
        ticks += 1;
    }
    assert_eq!(ticks, 20);
}

#[test]
fn link_events_drive_state_through_the_event_queue() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    ch.start().unwrap();

    assert!(push_event(Event::LinkEstablished));
    assert!(push_event(Event::LinkLost));
    assert!(push_event(Event::LinkEstablished));

    let mut seen = 0;
    events::drain_events(|event| {
        seen += 1;
        match event {
            Event::LinkEstablished => ch.on_link_established(),
            Event::LinkLost => ch.on_link_lost().unwrap(),
            Event::CommandQueued => {}
        }
    });
    assert_eq!(seen, 3);
    assert_eq!(ch.state(), ConnectionState::Connected);
    assert!(events::queue_is_empty());
}

#[test]
fn dropped_link_lost_is_reconciled_from_link_flag() {
    let q = CommandQueue::new();
    let mut ch = channel(&q);
    ch.start().unwrap();
    ch.on_link_established();

    // The LinkLost event never arrives; only the latched flag says so.
    ch.maintain(false).unwrap();
    assert_eq!(ch.state(), ConnectionState::Advertising);

    ch.maintain(true).unwrap();
    assert_eq!(ch.state(), ConnectionState::Connected);
    assert_eq!(ch.on_command_write(b"FLUSH"), Ok(CommandKind::Flush));
}
