//! Fuzz target: interleaved writes, ticks and aborts
//!
//! Each input byte is one operation against a channel + controller pair.
//! After every operation the motor-state invariants must hold.
//!
//! cargo fuzz run fuzz_dose_sequence

#![no_main]

use libfuzzer_sys::fuzz_target;
use microdoser::adapters::ble::ingest;
use microdoser::app::controller::{ActuationController, PHASE_COUNT};
use microdoser::app::events::AppEvent;
use microdoser::app::ports::{CoilPattern, CoilPort, EventSink};
use microdoser::app::queue::CommandQueue;
use microdoser::config::DoserConfig;
use microdoser::error::ActuatorError;

struct Coils(u32);

impl CoilPort for Coils {
    fn energize(&mut self, _pattern: CoilPattern) -> Result<(), ActuatorError> {
        self.0 = self.0.wrapping_add(1);
        // Sporadic driver faults exercise the abort path.
        if self.0 % 997 == 0 {
            return Err(ActuatorError::GpioWriteFailed);
        }
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

const PAYLOADS: [&[u8]; 6] = [b"FLUSH", b"PUSH:0.1", b"PUSH:4.5", b"PUSH:-1", b"PUSH:0", b"FOO"];

fuzz_target!(|ops: &[u8]| {
    let queue = CommandQueue::new();
    let config = DoserConfig {
        flush_steps: 64,
        ..DoserConfig::default()
    };
    let mut ctl = ActuationController::new(Coils(0), &queue, &config);

    for &op in ops {
        let before = ctl.state();
        match op % 8 {
            0..=5 => {
                let _ = ingest(&queue, PAYLOADS[(op % 6) as usize]);
                assert_eq!(before, ctl.state(), "a write moved the motor");
            }
            6 => {
                ctl.poll(&mut NullSink);
            }
            _ => {
                if op & 0x80 != 0 {
                    ctl.abort(&mut NullSink);
                } else {
                    for _ in 0..(op >> 3) {
                        if ctl.tick(&mut NullSink) {
                            let s = ctl.state();
                            assert!(s.phase() < PHASE_COUNT);
                        }
                    }
                }
            }
        }
        let s = ctl.state();
        assert!(s.steps_remaining() == 0 || s.busy());
        assert!(s.busy() || s.steps_remaining() == 0);
        assert_eq!(s.busy(), queue.is_busy());
    }
});
