//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u32,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events written so far.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        self.emitted = self.emitted.wrapping_add(1);
        match event {
            AppEvent::Telemetry(t) => {
                info!(
                    "TELEM | doses={} flushes={} aborted={} rejected={} | steps={} | busy={}",
                    t.doses_completed,
                    t.flushes_completed,
                    t.moves_aborted,
                    t.commands_rejected,
                    t.steps_delivered,
                    t.busy,
                );
            }
            AppEvent::MoveStarted { kind, steps } => {
                info!("MOVE | {} start, {} steps", kind, steps);
            }
            AppEvent::MoveCompleted { kind, steps } => {
                info!("MOVE | {} done, {} steps", kind, steps);
            }
            AppEvent::MoveAborted { kind, remaining } => {
                warn!("MOVE | {} aborted, {} steps remaining", kind, remaining);
            }
            AppEvent::CommandRejected { kind, reason } => {
                warn!("REJECT | {} | {}", kind, reason);
            }
            AppEvent::Started {
                steps_per_revolution,
                step_interval_ms,
            } => {
                info!(
                    "START | steps_per_rev={} step_interval={}ms",
                    steps_per_revolution, step_interval_ms
                );
            }
        }
    }
}
