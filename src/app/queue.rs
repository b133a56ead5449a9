//! Capacity-1 command hand-off between the radio callback and the
//! actuation loop.
//!
//! ```text
//! ┌──────────────┐ try_enqueue ┌──────────────┐ begin_next ┌──────────────┐
//! │ GATT write   │────────────▶│ CommandQueue │───────────▶│  Actuation   │
//! │ (BT task)    │◀── Busy ────│ slot + busy  │◀── finish ─│  loop        │
//! └──────────────┘             └──────────────┘            └──────────────┘
//! ```
//!
//! The slot and the busy gate sit behind one critical-section mutex so that
//! "take the pending command" and "mark the mechanism busy" happen as a
//! single step.  A write can therefore never slip in between a dequeue and
//! the start of the move it belongs to.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use super::command::Command;
use crate::error::CommandError;

struct Slot {
    pending: Option<Command>,
    busy: bool,
}

pub struct CommandQueue {
    slot: Mutex<CriticalSectionRawMutex, RefCell<Slot>>,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(RefCell::new(Slot {
                pending: None,
                busy: false,
            })),
        }
    }

    /// Producer side.  Rejects with [`CommandError::Busy`] when a command
    /// is already waiting or a move is running; the pending command is
    /// never overwritten.
    pub fn try_enqueue(&self, cmd: Command) -> Result<(), CommandError> {
        self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.busy || slot.pending.is_some() {
                return Err(CommandError::Busy);
            }
            slot.pending = Some(cmd);
            Ok(())
        })
    }

    /// Consumer side.  Takes the pending command and closes the busy gate
    /// in the same critical section.  Returns `None` while a previous move
    /// has not been [`finish`](Self::finish)ed.
    pub fn begin_next(&self) -> Option<Command> {
        self.slot.lock(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.busy {
                return None;
            }
            let cmd = slot.pending.take()?;
            slot.busy = true;
            Some(cmd)
        })
    }

    /// Consumer side.  Re-opens the gate once the controller is Idle again.
    pub fn finish(&self) {
        self.slot.lock(|cell| cell.borrow_mut().busy = false);
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock(|cell| cell.borrow().busy)
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock(|cell| cell.borrow().pending.is_some())
    }

    /// `true` if [`try_enqueue`](Self::try_enqueue) would succeed now.
    ///
    /// With a single producer the answer cannot flip to `false` before that
    /// producer enqueues: the consumer only ever frees the slot.
    pub fn can_accept(&self) -> bool {
        self.slot.lock(|cell| {
            let slot = cell.borrow();
            !slot.busy && slot.pending.is_none()
        })
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
