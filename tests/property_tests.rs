//! Property and fuzz-style tests for the command path and the step engine.
//!
//! Runs on host (x86_64) only — proptest is not available for ESP32 targets.
//! On ESP32, these tests are compiled out.

#![cfg(not(target_os = "espidf"))]

use microdoser::adapters::ble::ingest;
use microdoser::app::command::{Command, CommandKind, MAX_PAYLOAD_LEN};
use microdoser::app::controller::{ActuationController, MotorState, PHASE_COUNT, PHASE_TABLE};
use microdoser::app::events::AppEvent;
use microdoser::app::ports::{CoilPattern, CoilPort, EventSink};
use microdoser::app::queue::CommandQueue;
use microdoser::config::DoserConfig;
use microdoser::error::{ActuatorError, CommandError};
use proptest::prelude::*;

#[derive(Default)]
struct CountingCoils {
    energized: u32,
    last: Option<CoilPattern>,
}

impl CoilPort for CountingCoils {
    fn energize(&mut self, pattern: CoilPattern) -> Result<(), ActuatorError> {
        self.energized += 1;
        self.last = Some(pattern);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }
}

struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &AppEvent) {}
}

fn controller(q: &CommandQueue) -> ActuationController<'_, CountingCoils> {
    ActuationController::new(CountingCoils::default(), q, &DoserConfig::default())
}

// ── Conversion and completion ────────────────────────────────

proptest! {
    /// Any dose that maps into 1..=max steps runs for exactly that many
    /// ticks and then returns to Idle.
    #[test]
    fn push_runs_exactly_rounded_steps(milli in 1u32..=4000) {
        let magnitude = milli as f32 / 1000.0;
        let expected = (magnitude * 2048.0).round() as u32;

        let q = CommandQueue::new();
        let mut ctl = controller(&q);
        q.try_enqueue(Command::push(magnitude)).unwrap();
        prop_assert!(ctl.poll(&mut NullSink));
        prop_assert_eq!(ctl.state().steps_remaining(), expected);

        let mut ticks = 0u32;
        while ctl.tick(&mut NullSink) {
            ticks += 1;
            prop_assert_eq!(ctl.state().busy(), ticks < expected);
        }
        prop_assert_eq!(ticks, expected);
        prop_assert_eq!(ctl.state().steps_remaining(), 0);
        prop_assert_eq!(ctl.coils().energized, expected);
    }

    /// MotorState invariants hold after every tick.
    #[test]
    fn motor_state_invariants(milli in 1u32..=500, extra_ticks in 0u32..50) {
        let q = CommandQueue::new();
        let mut ctl = controller(&q);
        q.try_enqueue(Command::push(milli as f32 / 1000.0)).unwrap();
        ctl.poll(&mut NullSink);

        let mut prev = ctl.state();
        loop {
            let stepped = ctl.tick(&mut NullSink);
            let now = ctl.state();
            prop_assert!(now.steps_remaining() == 0 || now.busy());
            prop_assert!(now.busy() || now.steps_remaining() == 0);
            if stepped {
                prop_assert_eq!(now.phase(), (prev.phase() + 1) % PHASE_COUNT);
                prop_assert_eq!(
                    ctl.coils().last,
                    Some(PHASE_TABLE[now.phase() as usize])
                );
            } else {
                break;
            }
            prev = now;
        }

        // Ticks while Idle never move the motor.
        let idle = ctl.state();
        for _ in 0..extra_ticks {
            prop_assert!(!ctl.tick(&mut NullSink));
        }
        prop_assert_eq!(idle, ctl.state());
    }

    /// Any number of writes during a move is rejected and leaves the
    /// motor exactly where it was.
    #[test]
    fn busy_rejection_is_idempotent(
        writes in proptest::collection::vec(prop_oneof![
            Just(b"FLUSH".to_vec()),
            Just(b"PUSH:1".to_vec()),
            Just(b"PUSH:0.25".to_vec()),
        ], 1..8),
        progress in 0u32..100,
    ) {
        let q = CommandQueue::new();
        let mut ctl = controller(&q);
        q.try_enqueue(Command::flush()).unwrap();
        ctl.poll(&mut NullSink);
        for _ in 0..progress {
            ctl.tick(&mut NullSink);
        }

        let before: MotorState = ctl.state();
        for w in &writes {
            prop_assert_eq!(ingest(&q, w), Err(CommandError::Busy));
        }
        prop_assert_eq!(before, ctl.state());
        prop_assert!(!q.has_pending());
    }

    /// FLUSH maps to the configured count regardless of history.
    #[test]
    fn flush_is_magnitude_independent(prior_milli in 1u32..=1000) {
        let q = CommandQueue::new();
        let mut ctl = controller(&q);
        q.try_enqueue(Command::push(prior_milli as f32 / 1000.0)).unwrap();
        ctl.poll(&mut NullSink);
        while ctl.tick(&mut NullSink) {}

        prop_assert_eq!(ingest(&q, b"FLUSH"), Ok(CommandKind::Flush));
        ctl.poll(&mut NullSink);
        prop_assert_eq!(ctl.state().steps_remaining(), DoserConfig::default().flush_steps);
    }
}

// ── Parser robustness ────────────────────────────────────────

proptest! {
    /// Arbitrary bytes never panic; anything not executable is never
    /// enqueued.
    #[test]
    fn arbitrary_payloads_never_enqueue_garbage(
        payload in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let cmd = Command::parse(&payload);
        prop_assert!(cmd.raw().len() <= MAX_PAYLOAD_LEN);

        let q = CommandQueue::new();
        match ingest(&q, &payload) {
            Ok(kind) => {
                prop_assert_eq!(kind, cmd.kind());
                prop_assert!(q.has_pending());
            }
            Err(e) => {
                prop_assert_eq!(e, CommandError::Malformed);
                prop_assert_eq!(cmd.kind(), CommandKind::Unknown);
                prop_assert!(!q.has_pending());
            }
        }
    }

    /// Well-formed decimals always parse as PUSH with the written value.
    #[test]
    fn decimal_push_round_trips(int in 0u32..10_000, frac in 0u32..1000) {
        let text = format!("PUSH:{int}.{frac:03}");
        let cmd = Command::parse(text.as_bytes());
        prop_assert_eq!(cmd.kind(), CommandKind::Push);
        let expected = int as f32 + frac as f32 / 1000.0;
        prop_assert!((cmd.magnitude() - expected).abs() <= expected * 1e-6 + 1e-6);
    }

    /// A non-numeric suffix is never a PUSH.
    #[test]
    fn alphabetic_suffix_is_unknown(suffix in "[a-zA-Z]{1,20}") {
        let text = format!("PUSH:{suffix}");
        prop_assert_eq!(Command::parse(text.as_bytes()).kind(), CommandKind::Unknown);
    }
}
