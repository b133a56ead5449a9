//! Actuation controller — exclusive owner of the stepper mechanism.
//!
//! ```text
//!            begin_next() ok, steps valid
//!   ┌──────┐ ─────────────────────────────▶ ┌──────────┐
//!   │ Idle │                                │ Stepping │ ── tick(): phase+1, steps-1
//!   └──────┘ ◀───────────────────────────── └──────────┘
//!      ▲      steps_remaining == 0 | abort()
//!      │
//!      └── invalid steps: reject, stay Idle
//! ```
//!
//! The controller never reads the radio and never sleeps; the main loop
//! calls [`poll`](ActuationController::poll) and
//! [`tick`](ActuationController::tick) and waits
//! [`step_interval_ms`](ActuationController::step_interval_ms) between
//! ticks.  The cadence comes from configuration only.

use log::{error, info, warn};

use crate::config::DoserConfig;
use crate::error::CommandError;

use super::command::{Command, CommandKind};
use super::events::{AppEvent, TelemetryData};
use super::ports::{CoilPattern, CoilPort, EventSink};
use super::queue::CommandQueue;

/// Number of distinct coil-energization phases.
pub const PHASE_COUNT: u8 = 4;

/// Full-step, two-phase-on drive sequence (A+B, B+C, C+D, D+A).
pub const PHASE_TABLE: [CoilPattern; PHASE_COUNT as usize] = [
    [true, true, false, false],
    [false, true, true, false],
    [false, false, true, true],
    [true, false, false, true],
];

/// Mechanism state.
///
/// Invariant: `steps_remaining > 0 ⇒ busy` and `!busy ⇒ steps_remaining == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorState {
    phase: u8,
    steps_remaining: u32,
    busy: bool,
}

impl MotorState {
    /// Current phase index, `0..PHASE_COUNT`.
    pub fn phase(&self) -> u8 {
        self.phase
    }

    pub fn steps_remaining(&self) -> u32 {
        self.steps_remaining
    }

    pub fn busy(&self) -> bool {
        self.busy
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveMove {
    kind: CommandKind,
    total: u32,
}

pub struct ActuationController<'q, C: CoilPort> {
    coils: C,
    queue: &'q CommandQueue,
    motor: MotorState,
    active: Option<ActiveMove>,
    steps_per_revolution: u32,
    flush_steps: u32,
    max_steps_per_command: u32,
    step_interval_ms: u32,
    release_coils_when_idle: bool,
    telemetry: TelemetryData,
}

impl<'q, C: CoilPort> ActuationController<'q, C> {
    /// Take ownership of the coil outputs and the consumer end of `queue`.
    pub fn new(coils: C, queue: &'q CommandQueue, config: &DoserConfig) -> Self {
        Self {
            coils,
            queue,
            motor: MotorState::default(),
            active: None,
            steps_per_revolution: config.steps_per_revolution,
            flush_steps: config.flush_steps,
            max_steps_per_command: config.max_steps_per_command,
            step_interval_ms: config.step_interval_ms,
            release_coils_when_idle: config.release_coils_when_idle,
            telemetry: TelemetryData::default(),
        }
    }

    /// Put the outputs in a known (released) state and announce readiness.
    pub fn start(&mut self, sink: &mut impl EventSink) {
        if let Err(e) = self.coils.release() {
            warn!("Coil release at startup failed: {}", e);
        }
        sink.emit(&AppEvent::Started {
            steps_per_revolution: self.steps_per_revolution,
            step_interval_ms: self.step_interval_ms,
        });
        info!(
            "Actuation controller ready ({} steps/rev, {} ms/step)",
            self.steps_per_revolution, self.step_interval_ms
        );
    }

    // ── Conversion ────────────────────────────────────────────

    /// Step count for `cmd`, or the reason it must not run.
    pub fn steps_for(&self, cmd: &Command) -> Result<u32, CommandError> {
        let steps = match cmd.kind() {
            CommandKind::Unknown => return Err(CommandError::Malformed),
            CommandKind::Flush => self.flush_steps,
            CommandKind::Push => {
                let exact = (cmd.magnitude() * self.steps_per_revolution as f32).round();
                // Written so that NaN also lands in the reject branch.
                if !(exact >= 1.0 && exact <= self.max_steps_per_command as f32) {
                    return Err(CommandError::OutOfRange);
                }
                exact as u32
            }
        };
        if steps == 0 || steps > self.max_steps_per_command {
            return Err(CommandError::OutOfRange);
        }
        Ok(steps)
    }

    // ── Scheduling ────────────────────────────────────────────

    /// Idle only: dequeue the next command and start its move.
    ///
    /// Returns `true` if a move started.  An invalid command is reported
    /// through `sink` and discarded; the controller stays Idle.
    pub fn poll(&mut self, sink: &mut impl EventSink) -> bool {
        if self.motor.busy {
            return false;
        }
        let Some(cmd) = self.queue.begin_next() else {
            return false;
        };

        match self.steps_for(&cmd) {
            Ok(steps) => {
                self.motor.steps_remaining = steps;
                self.motor.busy = true;
                self.active = Some(ActiveMove {
                    kind: cmd.kind(),
                    total: steps,
                });
                info!("Move start: '{}' -> {} steps", cmd.raw(), steps);
                sink.emit(&AppEvent::MoveStarted {
                    kind: cmd.kind(),
                    steps,
                });
                true
            }
            Err(reason) => {
                warn!("Command '{}' rejected: {}", cmd.raw(), reason);
                self.telemetry.commands_rejected = self.telemetry.commands_rejected.saturating_add(1);
                self.queue.finish();
                sink.emit(&AppEvent::CommandRejected {
                    kind: cmd.kind(),
                    reason,
                });
                false
            }
        }
    }

    /// One cadence tick.  While Stepping, advances the phase by exactly one,
    /// drives its pattern and consumes one step.  No-op while Idle.
    ///
    /// Returns `true` if a step was driven.
    pub fn tick(&mut self, sink: &mut impl EventSink) -> bool {
        if !self.motor.busy {
            return false;
        }

        let next = (self.motor.phase + 1) % PHASE_COUNT;
        if let Err(e) = self.coils.energize(PHASE_TABLE[next as usize]) {
            error!("Coil drive failed at phase {}: {}, aborting move", next, e);
            self.abort(sink);
            return false;
        }

        self.motor.phase = next;
        self.motor.steps_remaining -= 1;
        self.telemetry.steps_delivered += 1;

        if self.motor.steps_remaining == 0 {
            self.complete(sink);
        }
        true
    }

    /// Stop path: clear the remaining steps and return to Idle.
    ///
    /// Returns `false` if there was nothing to abort.
    pub fn abort(&mut self, sink: &mut impl EventSink) -> bool {
        if !self.motor.busy {
            return false;
        }
        let remaining = self.motor.steps_remaining;
        let kind = self.active.take().map_or(CommandKind::Unknown, |m| m.kind);

        self.motor.steps_remaining = 0;
        self.motor.busy = false;
        if let Err(e) = self.coils.release() {
            warn!("Coil release after abort failed: {}", e);
        }
        self.telemetry.moves_aborted = self.telemetry.moves_aborted.saturating_add(1);
        self.queue.finish();

        warn!("Move aborted with {} steps remaining", remaining);
        sink.emit(&AppEvent::MoveAborted { kind, remaining });
        true
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn state(&self) -> MotorState {
        self.motor
    }

    pub fn is_busy(&self) -> bool {
        self.motor.busy
    }

    /// Controller-owned inter-step delay.
    pub fn step_interval_ms(&self) -> u32 {
        self.step_interval_ms
    }

    pub fn telemetry(&self) -> TelemetryData {
        TelemetryData {
            busy: self.motor.busy,
            ..self.telemetry
        }
    }

    pub fn coils(&self) -> &C {
        &self.coils
    }

    // ── Internal ──────────────────────────────────────────────

    fn complete(&mut self, sink: &mut impl EventSink) {
        self.motor.busy = false;
        let (kind, steps) = self
            .active
            .take()
            .map_or((CommandKind::Unknown, 0), |m| (m.kind, m.total));

        match kind {
            CommandKind::Push => {
                self.telemetry.doses_completed = self.telemetry.doses_completed.saturating_add(1);
            }
            CommandKind::Flush => {
                self.telemetry.flushes_completed =
                    self.telemetry.flushes_completed.saturating_add(1);
            }
            CommandKind::Unknown => {}
        }

        if self.release_coils_when_idle {
            if let Err(e) = self.coils.release() {
                warn!("Coil release after move failed: {}", e);
            }
        }
        self.queue.finish();

        info!("Move complete: {} {} steps", kind, steps);
        sink.emit(&AppEvent::MoveCompleted { kind, steps });
    }
}
