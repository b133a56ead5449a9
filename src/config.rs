//! System configuration parameters
//!
//! All tunable parameters for the MicroDoser.  The step cadence lives here
//! and is read only by the actuation controller; nothing arriving over the
//! radio can change it.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest advertised name that still fits the 31-byte advertisement
/// alongside the flags field.
pub const MAX_DEVICE_NAME_LEN: usize = 24;

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoserConfig {
    // --- Radio ---
    /// Human-readable name broadcast alongside the service UUID
    pub device_name: heapless::String<MAX_DEVICE_NAME_LEN>,

    // --- Mechanism calibration ---
    /// Full-step count for one output-shaft revolution (28BYJ-48: 2048)
    pub steps_per_revolution: u32,
    /// Fixed step count for a FLUSH (full purge)
    pub flush_steps: u32,
    /// Upper bound on steps executed for a single command
    pub max_steps_per_command: u32,

    // --- Timing ---
    /// Delay between successive phase advances (milliseconds)
    pub step_interval_ms: u32,
    /// Main loop sleep while idle (milliseconds)
    pub idle_poll_ms: u32,
    /// Telemetry report interval (seconds)
    pub telemetry_interval_secs: u32,

    // --- Coils ---
    /// De-energize all phases once a move completes
    pub release_coils_when_idle: bool,
}

impl Default for DoserConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        // Fits: well under MAX_DEVICE_NAME_LEN.
        let _ = device_name.push_str("MicroDoser");

        Self {
            device_name,

            // Mechanism
            steps_per_revolution: 2048,
            flush_steps: 2 * 2048,
            max_steps_per_command: 4 * 2048,

            // Timing
            step_interval_ms: 3,        // ~333 steps/s, inside 28BYJ-48 pull-out torque
            idle_poll_ms: 10,
            telemetry_interval_secs: 60,

            // Coils
            release_coils_when_idle: true,
        }
    }
}

impl DoserConfig {
    /// Reject parameter combinations that would break controller invariants.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(Error::Config("device_name must not be empty"));
        }
        if self.steps_per_revolution == 0 {
            return Err(Error::Config("steps_per_revolution must be > 0"));
        }
        if self.max_steps_per_command == 0 {
            return Err(Error::Config("max_steps_per_command must be > 0"));
        }
        if self.flush_steps == 0 || self.flush_steps > self.max_steps_per_command {
            return Err(Error::Config("flush_steps must be in 1..=max_steps_per_command"));
        }
        if self.step_interval_ms == 0 {
            return Err(Error::Config("step_interval_ms must be > 0"));
        }
        if self.idle_poll_ms == 0 {
            return Err(Error::Config("idle_poll_ms must be > 0"));
        }
        if self.telemetry_interval_secs == 0 {
            return Err(Error::Config("telemetry_interval_secs must be > 0"));
        }
        Ok(())
    }

    /// Largest dose (in units) that still fits the per-command bound.
    pub fn max_dose_units(&self) -> f32 {
        self.max_steps_per_command as f32 / self.steps_per_revolution as f32
    }
}
