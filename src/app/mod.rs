//! Application core — pure domain logic, zero I/O.
//!
//! Command parsing, the capacity-1 hand-off queue and the actuation state
//! machine.  Hardware and the radio are reached only through the **port
//! traits** in [`ports`], so everything here runs unchanged in host tests.

pub mod command;
pub mod controller;
pub mod events;
pub mod ports;
pub mod queue;
