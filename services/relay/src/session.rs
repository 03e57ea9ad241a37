use parking_lot::Mutex;
use parley::shared::Status;
use std::net::{SocketAddr, TcpStream};
use veil::crypto::{self, CHALLENGE_SIZE};
use veil::time::timestamp_secs;

/// Fixed-window request throttle. The window resets when it has fully
/// elapsed; requests beyond the per-window budget are refused.
pub struct RateWindow {
    window_start: u64,
    count: u32,
    window_secs: u64,
    max_requests: u32,
}

impl RateWindow {
    pub fn new(window_secs: u64, max_requests: u32) -> RateWindow {
        RateWindow {
            window_start: timestamp_secs(),
            count: 0,
            window_secs,
            max_requests,
        }
    }

    /// Admits or refuses one request arriving at `now`. Admitted requests
    /// count against the current window.
    pub fn admit(&mut self, now: u64) -> bool {
        if now.saturating_sub(self.window_start) >= self.window_secs {
            self.window_start = now;
            self.count = 0;
        }

        if self.count >= self.max_requests {
            return false;
        }

        self.count += 1;
        true
    }
}

/// Mutable per-connection state, guarded by the session lock.
pub struct SessionState {
    /// Bound username; empty until authentication succeeds.
    pub username: String,
    pub authenticated: bool,
    pub connected: bool,
    pub status: Status,
    pub rate: RateWindow,
}

/// One client connection. The writer half is shared with whichever thread
/// delivers messages or presence updates to this peer; the reader half stays
/// with the dispatcher thread.
pub struct Session {
    pub slot: usize,
    pub peer: SocketAddr,
    /// Random bytes the client must sign to authenticate. Generated at
    /// accept, never rotated, scrubbed when the session is dropped.
    pub challenge: [u8; CHALLENGE_SIZE],
    pub connected_at: u64,
    pub writer: Mutex<TcpStream>,
    pub state: Mutex<SessionState>,
}

impl Session {
    pub fn new(slot: usize, peer: SocketAddr, writer: TcpStream, rate: RateWindow) -> Session {
        let mut challenge = [0u8; CHALLENGE_SIZE];
        crypto::random_bytes(&mut challenge);

        Session {
            slot,
            peer,
            challenge,
            connected_at: timestamp_secs(),
            writer: Mutex::new(writer),
            state: Mutex::new(SessionState {
                username: String::new(),
                authenticated: false,
                connected: true,
                status: Status::Online,
                rate,
            }),
        }
    }

    /// The bound username, present only while the session is authenticated.
    pub fn authenticated_user(&self) -> Option<String> {
        let state = self.state.lock();
        if state.authenticated {
            Some(state.username.clone())
        } else {
            None
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        crypto::memzero(&mut self.challenge);
    }
}
