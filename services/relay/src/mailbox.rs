use std::collections::VecDeque;
use veil::crypto::SecretBytes;

/// A message held for a recipient that could not take delivery live. The
/// ciphertext is scrubbed when the entry is dropped, whichever path releases
/// it.
#[derive(Debug)]
pub struct StoredMessage {
    pub message_id: u32,
    pub sender: String,
    pub timestamp: u32,
    pub ciphertext: SecretBytes,
}

/// Bounded FIFO of undelivered messages, owned by a registered user for the
/// lifetime of the process.
pub struct Mailbox {
    entries: VecDeque<StoredMessage>,
    capacity: usize,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Mailbox {
        Mailbox {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a message, handing it back when the mailbox is full.
    pub fn push(&mut self, message: StoredMessage) -> Result<(), StoredMessage> {
        if self.entries.len() >= self.capacity {
            return Err(message);
        }
        self.entries.push_back(message);
        Ok(())
    }

    /// The oldest undelivered message, if any.
    pub fn front(&self) -> Option<&StoredMessage> {
        self.entries.front()
    }

    /// Removes the oldest undelivered message.
    pub fn pop(&mut self) -> Option<StoredMessage> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
