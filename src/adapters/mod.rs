//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements | Connects to                     |
//! |------------|------------|---------------------------------|
//! | `ble`      | EventSink  | Bluedroid GATT server           |
//! |            | producer   | [`CommandQueue`](crate::app::queue::CommandQueue) |
//! | `log_sink` | EventSink  | Serial log output               |
//!
//! The coil outputs are driven by [`crate::drivers::stepper`].

pub mod ble;
pub mod log_sink;
