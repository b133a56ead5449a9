//! Four-phase unipolar stepper driver (ULN2003 + 28BYJ-48).
//!
//! A dumb actuator: it drives whatever pattern the controller hands it and
//! remembers the last one written.  Phase sequencing and step counting live
//! in [`ActuationController`](crate::app::controller::ActuationController).
//!
//! ## Dual-target design
//!
//! Generic over [`embedded_hal::digital::OutputPin`].  On ESP-IDF the pins
//! are `esp_idf_hal` `PinDriver`s; on host they are whatever the test
//! supplies.

use embedded_hal::digital::{OutputPin, PinState};
use log::debug;

use crate::app::ports::{CoilPattern, CoilPort};
use crate::error::ActuatorError;

const RELEASED: CoilPattern = [false; 4];

pub struct CoilDriver<P: OutputPin> {
    pins: [P; 4],
    last: CoilPattern,
}

impl<P: OutputPin> CoilDriver<P> {
    /// `pins` in coil order A, B, C, D.
    pub fn new(pins: [P; 4]) -> Self {
        Self {
            pins,
            last: RELEASED,
        }
    }

    /// Last pattern successfully written to all four outputs.
    pub fn pattern(&self) -> CoilPattern {
        self.last
    }

    pub fn is_energized(&self) -> bool {
        self.last.iter().any(|&on| on)
    }

    pub fn pins(&self) -> &[P; 4] {
        &self.pins
    }

    fn write(&mut self, pattern: CoilPattern) -> Result<(), ActuatorError> {
        for (pin, &on) in self.pins.iter_mut().zip(pattern.iter()) {
            pin.set_state(PinState::from(on))
                .map_err(|_| ActuatorError::GpioWriteFailed)?;
        }
        self.last = pattern;
        Ok(())
    }
}

impl<P: OutputPin> CoilPort for CoilDriver<P> {
    fn energize(&mut self, pattern: CoilPattern) -> Result<(), ActuatorError> {
        self.write(pattern)
    }

    fn release(&mut self) -> Result<(), ActuatorError> {
        if self.last != RELEASED {
            debug!("stepper: coils released");
        }
        self.write(RELEASED)
    }
}
