//! Per-connection dispatcher: reads frames in order, applies the rate limit
//! and the authentication gate, and routes requests to their handlers.

use crate::handlers;
use crate::server::Relay;
use crate::session::Session;
use parley::frame::{Request, Response};
use parley::shared::{ErrorCode, Status, WireError};
use parley::wire;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use veil::logging::{self, Logger};
use veil::time::timestamp_secs;

pub fn run(relay: Arc<Relay>, session: Arc<Session>, mut reader: TcpStream) {
    let log = relay.log.new(logging::o!(
        "peer" => session.peer.to_string(),
        "slot" => session.slot
    ));

    // The peer needs the session challenge before it can sign a login.
    let greeting = Response::Challenge {
        challenge: session.challenge,
    };
    match relay.send(&session, &greeting) {
        Ok(()) => read_loop(&relay, &session, &mut reader, &log),
        Err(err) => {
            logging::error!(log, "challenge delivery failed"; "error" => format!("{:?}", err));
        }
    }

    teardown(&relay, &session, &log);
}

fn read_loop(relay: &Arc<Relay>, session: &Arc<Session>, reader: &mut TcpStream, log: &Logger) {
    while session.state.lock().connected && relay.is_running() {
        let frame = match wire::read_frame(reader) {
            Ok(frame) => frame,
            Err(WireError::Closed) => {
                logging::info!(log, "client disconnected");
                return;
            }
            Err(err) => {
                logging::error!(log, "receive failed"; "error" => format!("{:?}", err));
                return;
            }
        };

        if !session.state.lock().rate.admit(timestamp_secs()) {
            logging::error!(log, "rate limit exceeded, closing session");
            let refusal = Response::Error {
                code: ErrorCode::RateLimit,
                message: "rate limit exceeded".to_string(),
            };
            let _ = relay.send(session, &refusal);
            return;
        }

        let request = match Request::parse(&frame) {
            Ok(request) => request,
            Err(WireError::UnknownType(kind)) => {
                logging::error!(log, "unknown message type"; "type" => format!("{:#04x}", kind));
                let rejection = Response::Error {
                    code: ErrorCode::InvalidFormat,
                    message: "unknown message type".to_string(),
                };
                let _ = relay.send(session, &rejection);
                continue;
            }
            Err(WireError::Malformed(what)) => {
                logging::error!(log, "malformed payload"; "detail" => what);
                let rejection = Response::Error {
                    code: ErrorCode::InvalidFormat,
                    message: what.to_string(),
                };
                let _ = relay.send(session, &rejection);
                continue;
            }
            Err(err) => {
                logging::error!(log, "unreadable frame"; "error" => format!("{:?}", err));
                return;
            }
        };

        if requires_auth(&request) && !session.state.lock().authenticated {
            let rejection = Response::Error {
                code: ErrorCode::AuthFailed,
                message: "not authenticated".to_string(),
            };
            let _ = relay.send(session, &rejection);
            continue;
        }

        // A handler failure (usually a response write) does not end the
        // session; the next read surfaces a dead peer.
        if let Err(err) = handlers::handle(relay, session, request, log) {
            logging::error!(log, "handler failed"; "error" => format!("{:?}", err));
        }
    }
}

/// Everything except REGISTER, LOGIN and LOGOUT is gated on authentication.
fn requires_auth(request: &Request) -> bool {
    match request {
        Request::Register { .. } | Request::Login { .. } | Request::Logout => false,
        _ => true,
    }
}

fn teardown(relay: &Arc<Relay>, session: &Arc<Session>, log: &Logger) {
    let username = {
        let mut state = session.state.lock();
        state.connected = false;
        let was_authenticated = state.authenticated;
        state.authenticated = false;
        let username = std::mem::take(&mut state.username);
        if was_authenticated && !username.is_empty() {
            Some(username)
        } else {
            None
        }
    };

    if let Some(username) = username {
        if relay.registry.contains(&username) {
            relay.registry.set_status(&username, Status::Offline);
            relay.broadcast_status(&username, Status::Offline);
            logging::info!(log, "user went offline"; "user" => username.as_str());
        }
    }

    {
        let writer = session.writer.lock();
        let _ = writer.shutdown(Shutdown::Both);
    }

    relay.release_slot(session.slot);
    logging::info!(log, "client handler terminated");
}
