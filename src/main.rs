//! MicroDoser Firmware — Main Entry Point
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  BleCommandChannel         LogEventSink        CoilDriver      │
//! │  (producer + EventSink)    (EventSink)         (CoilPort)      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │        ActuationController (pure logic)                │    │
//! │  │  CommandQueue · MotorState · phase table               │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Bluedroid callbacks enqueue commands and push link events; this loop
//! drains events, starts moves and paces the step cadence.
#![deny(unused_must_use)]

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, info, warn};

use microdoser::adapters::ble::{self, BleCommandChannel, COMMAND_QUEUE};
use microdoser::adapters::log_sink::LogEventSink;
use microdoser::app::controller::ActuationController;
use microdoser::app::events::AppEvent;
use microdoser::app::ports::EventSink;
use microdoser::config::DoserConfig;
use microdoser::drivers::stepper::CoilDriver;
use microdoser::events::{self, Event};
use microdoser::error::Error;
use microdoser::pins;

#[cfg(target_os = "espidf")]
fn delay_ms(ms: u32) {
    esp_idf_hal::delay::FreeRtos::delay_ms(ms);
}

#[cfg(not(target_os = "espidf"))]
fn delay_ms(ms: u32) {
    std::thread::sleep(Duration::from_millis(ms.into()));
}

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  MicroDoser v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = DoserConfig::default();
    config.validate()?;
    info!(
        "Config: {} steps/rev, flush={} steps, max={} steps ({:.2} units), {} ms/step",
        config.steps_per_revolution,
        config.flush_steps,
        config.max_steps_per_command,
        config.max_dose_units(),
        config.step_interval_ms
    );

    // ── 3. Coil outputs ───────────────────────────────────────
    let coil_pin = |gpio: i32| {
        // SAFETY: each coil GPIO is claimed exactly once, here, and nothing
        // else in the firmware touches these pins.
        esp_idf_hal::gpio::PinDriver::output(unsafe { esp_idf_hal::gpio::AnyOutputPin::new(gpio as _) })
    };
    let coils = CoilDriver::new([
        coil_pin(pins::COIL_A_GPIO)?,
        coil_pin(pins::COIL_B_GPIO)?,
        coil_pin(pins::COIL_C_GPIO)?,
        coil_pin(pins::COIL_D_GPIO)?,
    ]);

    // ── 4. Controller + channel ───────────────────────────────
    let mut log_sink = LogEventSink::new();
    let mut controller = ActuationController::new(coils, &COMMAND_QUEUE, &config);
    controller.start(&mut log_sink);

    let mut channel = BleCommandChannel::new(config.device_name.clone(), &COMMAND_QUEUE);
    channel.start().map_err(Error::from)?;

    info!("System ready. Entering event loop.");

    // ── 5. Event loop ─────────────────────────────────────────
    let telemetry_every = Duration::from_secs(config.telemetry_interval_secs.into());
    let mut last_telemetry = Instant::now();

    loop {
        if last_telemetry.elapsed() >= telemetry_every {
            log_sink.emit(&AppEvent::Telemetry(controller.telemetry()));
            last_telemetry = Instant::now();
        }

        events::drain_events(|event| match event {
            Event::LinkEstablished => channel.on_link_established(),
            Event::LinkLost => {
                if let Err(e) = channel.on_link_lost() {
                    warn!("Re-advertising failed: {}", e);
                }
            }
            Event::CommandQueued => debug!("Command queued"),
        });

        // Catches dropped link events and failed advertise starts.
        if !controller.is_busy() {
            if let Err(e) = channel.maintain(ble::link_up()) {
                warn!("BLE maintenance failed: {}", e);
            }
        }

        let mut sinks = (&mut log_sink, &mut channel);
        controller.poll(&mut sinks);

        if controller.is_busy() {
            controller.tick(&mut sinks);
            delay_ms(controller.step_interval_ms());
        } else {
            delay_ms(config.idle_poll_ms);
        }
    }
}
