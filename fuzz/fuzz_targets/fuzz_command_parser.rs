//! Fuzz target: `Command::parse` + `ingest`
//!
//! Drives arbitrary write payloads through the command channel's ingestion
//! path and asserts that it never panics, never enqueues an unknown
//! command, and never accepts a second write while one is pending.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use microdoser::adapters::ble::ingest;
use microdoser::app::command::{Command, CommandKind, MAX_PAYLOAD_LEN};
use microdoser::app::queue::CommandQueue;
use microdoser::error::CommandError;

fuzz_target!(|data: &[u8]| {
    let cmd = Command::parse(data);
    assert!(cmd.raw().len() <= MAX_PAYLOAD_LEN, "raw copy exceeds payload bound");
    if cmd.kind() == CommandKind::Push {
        assert!(cmd.magnitude().is_finite(), "PUSH with non-finite magnitude");
    }

    let queue = CommandQueue::new();
    match ingest(&queue, data) {
        Ok(kind) => {
            assert_eq!(kind, cmd.kind());
            assert!(queue.has_pending());
            // Capacity 1: the same write again must bounce.
            assert_eq!(ingest(&queue, data), Err(CommandError::Busy));
        }
        Err(e) => {
            assert_eq!(e, CommandError::Malformed);
            assert!(!queue.has_pending());
        }
    }
});
