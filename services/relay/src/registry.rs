use crate::mailbox::Mailbox;
use hashbrown::HashMap;
use parking_lot::Mutex;
use parley::shared::{self, Status};
use parley::PUBLIC_KEY_LEN;
use std::sync::Arc;
use veil::time::timestamp_secs;

/// Why a registration was refused.
#[derive(Debug, Eq, PartialEq)]
pub enum AddError {
    /// Name violates the length or character rules.
    Invalid,
    /// Name is already taken; the existing key is never overwritten.
    Exists,
    /// The user table is at capacity.
    Full,
}

struct UserRecord {
    public_key: [u8; PUBLIC_KEY_LEN],
    status: Status,
    last_seen: u64,
    mailbox: Arc<Mutex<Mailbox>>,
}

/// Username-keyed table of registered users. Append-only within a process
/// run; public keys are immutable once registered.
pub struct Registry {
    users: Mutex<HashMap<String, UserRecord>>,
    capacity: usize,
    mailbox_depth: usize,
}

impl Registry {
    pub fn new(capacity: usize, mailbox_depth: usize) -> Registry {
        Registry {
            users: Mutex::new(HashMap::new()),
            capacity,
            mailbox_depth,
        }
    }

    /// Validates and inserts a new user. Uniqueness and insertion happen
    /// under one lock acquisition.
    pub fn add(&self, username: &str, public_key: [u8; PUBLIC_KEY_LEN]) -> Result<(), AddError> {
        if !shared::valid_username(username) {
            return Err(AddError::Invalid);
        }

        let mut users = self.users.lock();

        if users.contains_key(username) {
            return Err(AddError::Exists);
        }
        if users.len() >= self.capacity {
            return Err(AddError::Full);
        }

        users.insert(
            username.to_string(),
            UserRecord {
                public_key,
                status: Status::Offline,
                last_seen: timestamp_secs(),
                mailbox: Arc::new(Mutex::new(Mailbox::new(self.mailbox_depth))),
            },
        );

        Ok(())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.lock().contains_key(username)
    }

    pub fn public_key(&self, username: &str) -> Option<[u8; PUBLIC_KEY_LEN]> {
        self.users.lock().get(username).map(|user| user.public_key)
    }

    /// Updates presence and refreshes the last-seen timestamp. Unknown names
    /// are ignored.
    pub fn set_status(&self, username: &str, status: Status) {
        if let Some(user) = self.users.lock().get_mut(username) {
            user.status = status;
            user.last_seen = timestamp_secs();
        }
    }

    pub fn status(&self, username: &str) -> Option<Status> {
        self.users.lock().get(username).map(|user| user.status)
    }

    /// The user's offline mailbox, shared with whichever thread enqueues or
    /// drains it.
    pub fn mailbox(&self, username: &str) -> Option<Arc<Mutex<Mailbox>>> {
        self.users
            .lock()
            .get(username)
            .map(|user| user.mailbox.clone())
    }

    /// Name and presence of every registered user, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Status)> {
        let users = self.users.lock();
        let mut listing: Vec<_> = users
            .iter()
            .map(|(name, user)| (name.clone(), user.status))
            .collect();
        listing.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        listing
    }

    pub fn len(&self) -> usize {
        self.users.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.lock().is_empty()
    }
}
