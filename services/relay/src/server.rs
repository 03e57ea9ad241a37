use crate::config::Config;
use crate::dispatch;
use crate::registry::Registry;
use crate::session::{RateWindow, Session};
use parking_lot::Mutex;
use parley::frame::Response;
use parley::shared::{ErrorCode, Status, WireResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veil::logging::{self, Logger};

/// Shared server state handed to every dispatcher thread.
pub struct Relay {
    pub config: Config,
    pub registry: Registry,
    sessions: Mutex<Vec<Option<Arc<Session>>>>,
    next_message_id: AtomicU32,
    running: AtomicBool,
    local_addr: SocketAddr,
    pub log: Logger,
}

impl Relay {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Initiates shutdown: flips the running flag and pokes the listener so
    /// the accept loop observes the flag without waiting for a real client.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = TcpStream::connect_timeout(&self.wake_addr(), Duration::from_millis(250));
        }
    }

    fn wake_addr(&self) -> SocketAddr {
        let ip = if self.local_addr.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.local_addr.ip()
        };
        SocketAddr::new(ip, self.local_addr.port())
    }

    /// Allocates the next server-wide message id. Ids are never reused
    /// within a run.
    pub fn allocate_message_id(&self) -> u32 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The live, authenticated session bound to the username, if any.
    pub fn find_session(&self, username: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.lock();

        for session in sessions.iter().flatten() {
            let state = session.state.lock();
            if state.connected && state.authenticated && state.username == username {
                return Some(session.clone());
            }
        }

        None
    }

    /// Writes one response to the session, serialized against concurrent
    /// writers targeting the same peer.
    pub fn send(&self, session: &Session, response: &Response) -> WireResult<()> {
        let mut writer = session.writer.lock();
        response.write_to(&mut *writer)
    }

    /// Pushes a presence change to every other connected, authenticated
    /// session. Per-recipient failures are logged and skipped; they never
    /// fail the originating operation.
    pub fn broadcast_status(&self, username: &str, status: Status) {
        let update = Response::StatusUpdate {
            username: username.to_string(),
            status,
        };

        let targets: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .flatten()
                .filter(|session| {
                    let state = session.state.lock();
                    state.connected && state.authenticated && state.username != username
                })
                .cloned()
                .collect()
        };

        for target in targets {
            if let Err(err) = self.send(&target, &update) {
                logging::debug!(self.log, "status broadcast skipped recipient";
                                "peer" => target.peer.to_string(),
                                "error" => format!("{:?}", err));
            }
        }

        logging::debug!(self.log, "status update broadcast";
                        "user" => username,
                        "status" => u8::from(status));
    }

    /// Binds an accepted connection to a free slot and builds its session.
    /// Returns the session plus the reader half for the dispatcher thread.
    fn attach(&self, stream: TcpStream, peer: SocketAddr) -> Option<(Arc<Session>, TcpStream)> {
        let timeout = Duration::from_secs(self.config.write_timeout_secs);
        if stream.set_write_timeout(Some(timeout)).is_err() {
            return None;
        }

        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(_) => return None,
        };

        let mut sessions = self.sessions.lock();
        let slot = sessions.iter().position(|slot| slot.is_none())?;

        let rate = RateWindow::new(self.config.rate_window_secs, self.config.rate_max_requests);
        let session = Arc::new(Session::new(slot, peer, stream, rate));
        sessions[slot] = Some(session.clone());

        Some((session, reader))
    }

    /// Frees the slot once its dispatcher has finished.
    pub fn release_slot(&self, slot: usize) {
        self.sessions.lock()[slot] = None;
    }

    /// Notifies every connected client and shuts their sockets down, waking
    /// the dispatcher threads with EOF.
    fn close_sessions(&self) {
        let targets: Vec<Arc<Session>> = {
            let sessions = self.sessions.lock();
            sessions.iter().flatten().cloned().collect()
        };

        let notice = Response::Error {
            code: ErrorCode::ConnectionTerminated,
            message: "server shutting down".to_string(),
        };

        for session in targets {
            let mut writer = session.writer.lock();
            let _ = notice.write_to(&mut *writer);
            let _ = writer.shutdown(Shutdown::Both);
        }
    }
}

/// Owns the listening socket. `run` consumes the server and blocks until
/// shutdown is initiated through a `Relay` handle.
pub struct Server {
    listener: TcpListener,
    relay: Arc<Relay>,
}

impl Server {
    /// Creates the listener (address reuse on, explicit backlog) and the
    /// shared relay state.
    pub fn bind(config: Config, log: &Logger) -> io::Result<Server> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid listen address"))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;

        let listener: TcpListener = socket.into();
        let local_addr = listener.local_addr()?;

        let relay = Arc::new(Relay {
            registry: Registry::new(config.max_clients, config.mailbox_depth),
            sessions: Mutex::new(vec![None; config.max_clients]),
            next_message_id: AtomicU32::new(1),
            running: AtomicBool::new(true),
            local_addr,
            log: log.new(logging::o!()),
            config,
        });

        Ok(Server { listener, relay })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.relay.local_addr
    }

    /// Shared handle used to stop the server and to inspect its state.
    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// Accepts connections until shutdown, then drains every session and
    /// joins the dispatcher threads.
    pub fn run(self) {
        let relay = self.relay;

        logging::info!(relay.log, "server listening";
                       "addr" => relay.local_addr.to_string(),
                       "max_clients" => relay.config.max_clients);

        let mut handles: Vec<thread::JoinHandle<()>> = Vec::new();

        while relay.is_running() {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    if relay.is_running() {
                        logging::error!(relay.log, "accept failed"; "error" => err.to_string());
                    }
                    continue;
                }
            };

            if !relay.is_running() {
                break;
            }

            handles.retain(|handle| !handle.is_finished());

            match relay.attach(stream, peer) {
                Some((session, reader)) => {
                    logging::info!(relay.log, "client connected";
                                   "peer" => peer.to_string(),
                                   "slot" => session.slot);

                    let relay_ref = relay.clone();
                    let session_ref = session.clone();
                    let spawned = thread::Builder::new()
                        .name(format!("client-{}", session.slot))
                        .spawn(move || dispatch::run(relay_ref, session_ref, reader));

                    match spawned {
                        Ok(handle) => handles.push(handle),
                        Err(err) => {
                            logging::error!(relay.log, "dispatcher spawn failed";
                                            "error" => err.to_string());
                            let _ = session.writer.lock().shutdown(Shutdown::Both);
                            relay.release_slot(session.slot);
                        }
                    }
                }
                None => {
                    logging::error!(relay.log, "connection table full, rejecting client";
                                    "peer" => peer.to_string());
                }
            }
        }

        logging::info!(relay.log, "server shutting down");

        drop(self.listener);
        relay.close_sessions();

        for handle in handles {
            let _ = handle.join();
        }

        logging::info!(relay.log, "server stopped");
    }
}
