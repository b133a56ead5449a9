//! Unified error types for the MicroDoser firmware.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! top-level loop's error handling uniform.  All variants are `Copy` so they
//! can be carried inside events and status reports without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A command was refused by the channel or the controller.
    Command(CommandError),
    /// A coil output could not be driven.
    Actuator(ActuatorError),
    /// The radio stack failed.
    Comms(CommsError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Comms(e) => write!(f, "comms: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Command rejections
// ---------------------------------------------------------------------------

/// Why a command was not executed.  None of these are fatal: the
/// controller stays (or returns to) Idle and the next write is processed
/// normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// Payload is not `PUSH:<decimal>` or `FLUSH`.
    Malformed,
    /// Step count is zero, negative, or above the per-command bound.
    OutOfRange,
    /// A command is already pending or a move is in progress.
    Busy,
}

impl CommandError {
    /// Short upper-case tag used on the status characteristic.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Malformed => "MALFORMED",
            Self::OutOfRange => "RANGE",
            Self::Busy => "BUSY",
        }
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed command"),
            Self::OutOfRange => write!(f, "step count out of range"),
            Self::Busy => write!(f, "actuator busy"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// Setting a coil GPIO level failed.
    GpioWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GpioWriteFailed => write!(f, "GPIO write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Communications errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsError {
    /// A Bluedroid / controller bring-up call returned a non-OK code.
    BleInitFailed(i32),
    /// Advertising could not be (re)started.
    AdvertiseFailed(i32),
}

impl fmt::Display for CommsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BleInitFailed(rc) => write!(f, "BLE init failed (rc={rc})"),
            Self::AdvertiseFailed(rc) => write!(f, "BLE advertising failed (rc={rc})"),
        }
    }
}

impl From<CommsError> for Error {
    fn from(e: CommsError) -> Self {
        Self::Comms(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
