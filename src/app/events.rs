//! Outbound application events and the one-line status protocol.
//!
//! The [`ActuationController`](super::controller::ActuationController)
//! emits [`AppEvent`]s through the [`EventSink`](super::ports::EventSink)
//! port.  Adapters decide what to do with them: the log sink prints them,
//! the BLE channel turns the ones with a [`Status`] into notifications.

use core::fmt;

use super::command::CommandKind;
use crate::error::CommandError;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// The controller is up (carries the calibration in force).
    Started { steps_per_revolution: u32, step_interval_ms: u32 },

    /// A command was dequeued and validated; stepping begins.
    MoveStarted { kind: CommandKind, steps: u32 },

    /// The last step of a move was driven.
    MoveCompleted { kind: CommandKind, steps: u32 },

    /// A move ended early through the abort path.
    MoveAborted { kind: CommandKind, remaining: u32 },

    /// A dequeued command failed validation and was discarded.
    CommandRejected { kind: CommandKind, reason: CommandError },

    /// Periodic delivery counters.
    Telemetry(TelemetryData),
}

impl AppEvent {
    /// Status line to push to the remote for this event, if any.
    pub fn status(&self) -> Option<Status> {
        match *self {
            Self::MoveStarted { steps, .. } => Some(Status::Running(steps)),
            Self::MoveCompleted { steps, .. } => Some(Status::Done(steps)),
            Self::MoveAborted { remaining, .. } => Some(Status::Aborted(remaining)),
            Self::CommandRejected { reason, .. } => Some(Status::Rejected(reason)),
            Self::Started { .. } | Self::Telemetry(_) => None,
        }
    }
}

/// Delivery counters since boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryData {
    pub doses_completed: u32,
    pub flushes_completed: u32,
    pub moves_aborted: u32,
    pub commands_rejected: u32,
    pub steps_delivered: u64,
    pub busy: bool,
}

/// Status reported on the status characteristic.
///
/// Rendered as short ASCII so the remote log can show it verbatim:
/// `ACK:PUSH`, `REJ:BUSY`, `RUN:205`, `DONE:205`, `ABORT:12`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Accepted(CommandKind),
    Rejected(CommandError),
    Running(u32),
    Done(u32),
    Aborted(u32),
}

/// Longest rendered status line.
pub const MAX_STATUS_LEN: usize = 20;

impl Status {
    pub fn to_line(self) -> heapless::String<MAX_STATUS_LEN> {
        let mut line = heapless::String::new();
        // "ABORT:" + u32::MAX is 16 bytes.
        let _ = fmt::Write::write_fmt(&mut line, format_args!("{self}"));
        line
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted(kind) => write!(f, "ACK:{kind}"),
            Self::Rejected(reason) => write!(f, "REJ:{}", reason.tag()),
            Self::Running(steps) => write!(f, "RUN:{steps}"),
            Self::Done(steps) => write!(f, "DONE:{steps}"),
            Self::Aborted(remaining) => write!(f, "ABORT:{remaining}"),
        }
    }
}
