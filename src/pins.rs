//! GPIO pin assignments for the MicroDoser board.
//!
//! Single source of truth — `main` claims these pins from the HAL and hands
//! them to the coil driver in phase order.

// ---------------------------------------------------------------------------
// Stepper driver (ULN2003 Darlington array → 28BYJ-48 unipolar stepper)
// ---------------------------------------------------------------------------

/// ULN2003 IN1 — coil A (blue).
pub const COIL_A_GPIO: i32 = 4;
/// ULN2003 IN2 — coil B (pink).
pub const COIL_B_GPIO: i32 = 5;
/// ULN2003 IN3 — coil C (yellow).
pub const COIL_C_GPIO: i32 = 6;
/// ULN2003 IN4 — coil D (orange).
pub const COIL_D_GPIO: i32 = 7;

/// Coil outputs in the order the phase table indexes them.
pub const COIL_GPIOS: [i32; 4] = [COIL_A_GPIO, COIL_B_GPIO, COIL_C_GPIO, COIL_D_GPIO];
