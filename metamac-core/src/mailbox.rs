//! The command mailbox between the UDP receiver and the processor.
//!
//! The receiver thread never touches the protocol suite directly: it posts
//! a command here and the processor applies it at the top of its next
//! iteration. A single slot suffices; a newer command supersedes an
//! unconsumed older one.

use std::sync::Arc;

use parking_lot::Mutex;

/// An externally requested change to protocol selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clear any override and resume weight-driven selection.
    Learn,
    /// Pin the given protocol index and suspend selection.
    Pin(usize),
}

/// Single-slot, latest-wins mailbox. Cheap to clone; clones share the slot.
#[derive(Clone, Default)]
pub struct CommandMailbox(Arc<Mutex<Option<Command>>>);

impl CommandMailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a command, replacing any not-yet-consumed one.
    pub fn post(&self, command: Command) {
        *self.0.lock() = Some(command);
    }

    /// Take the pending command, if any.
    pub fn take(&self) -> Option<Command> {
        self.0.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_empties_the_slot() {
        let mailbox = CommandMailbox::new();
        assert_eq!(mailbox.take(), None);

        mailbox.post(Command::Pin(2));
        assert_eq!(mailbox.take(), Some(Command::Pin(2)));
        assert_eq!(mailbox.take(), None);
    }

    #[test]
    fn latest_post_wins() {
        let mailbox = CommandMailbox::new();
        mailbox.post(Command::Pin(1));
        mailbox.post(Command::Learn);
        assert_eq!(mailbox.take(), Some(Command::Learn));
    }

    #[test]
    fn clones_share_the_slot() {
        let mailbox = CommandMailbox::new();
        let other = mailbox.clone();
        other.post(Command::Pin(0));
        assert_eq!(mailbox.take(), Some(Command::Pin(0)));
    }
}
