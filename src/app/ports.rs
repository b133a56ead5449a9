//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ActuationController (domain)
//! ```
//!
//! The coil driver and the event sinks implement these traits.  The
//! controller consumes them via generics, so the domain core never touches
//! GPIO or the radio directly.

use crate::error::ActuatorError;

use super::events::AppEvent;

// ───────────────────────────────────────────────────────────────
// Coil port (driven adapter: domain → stepper driver)
// ───────────────────────────────────────────────────────────────

/// Energization levels for coils A–D, in phase-table order.
pub type CoilPattern = [bool; 4];

/// Write-side port for the four stepper phase outputs.
pub trait CoilPort {
    /// Drive all four outputs to `pattern`.
    fn energize(&mut self, pattern: CoilPattern) -> Result<(), ActuatorError>;

    /// Drive all four outputs low.
    fn release(&mut self) -> Result<(), ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / status)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`]s through this port.  Adapters
/// decide where they go (serial log, BLE status characteristic).
pub trait EventSink {
    fn emit(&mut self, event: &AppEvent);
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn emit(&mut self, event: &AppEvent) {
        (**self).emit(event);
    }
}

/// Fan an event out to two sinks, in order.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&mut self, event: &AppEvent) {
        self.0.emit(event);
        self.1.emit(event);
    }
}
