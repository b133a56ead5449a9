//! Mock hardware for integration tests.
//!
//! Records every coil call and every emitted event so tests can assert on
//! the full history without touching real GPIO.

use microdoser::app::events::AppEvent;
use microdoser::app::ports::{CoilPattern, CoilPort, EventSink};
use microdoser::error::ActuatorError;

// ── Coil call record ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoilCall {
    Energize(CoilPattern),
    Release,
}

// ── MockCoils ─────────────────────────────────────────────────

#[derive(Default)]
pub struct MockCoils {
    pub calls: Vec<CoilCall>,
    /// Fail every `energize` after this many successful ones.
    pub fail_after: Option<usize>,
}

#[allow(dead_code)]
impl MockCoils {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(n: usize) -> Self {
        Self {
            calls: Vec::new(),
            fail_after: Some(n),
        }
    }

    pub fn patterns(&self) -> Vec<CoilPattern> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                CoilCall::Energize(p) => Some(*p),
                CoilCall::Release => None,
            })
            .collect()
    }

    pub fn energized(&self) -> bool {
        matches!(self.calls.last(), Some(CoilCall::Energize(p)) if p.iter().any(|&on| on))
    }
}

impl CoilPort for MockCoils {
    fn energize(&mut self, pattern: CoilPattern) -> Result<(), ActuatorError> {
        if self.fail_after.is_some_and(|n| self.patterns().len() >= n) {
            return Err(ActuatorError::GpioWriteFailed);
        }
        self.calls.push(CoilCall::Energize(pattern));
        Ok(())
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        self.calls.push(CoilCall::Release);
        Ok(())
    }
}

// ── RecordingSink ─────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&AppEvent> {
        self.events.last()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
