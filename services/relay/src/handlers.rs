//! Request handlers. Each handler owns the full exchange for one request
//! type: validation, state changes, the response, and any fan-out.

use crate::mailbox::StoredMessage;
use crate::registry::AddError;
use crate::server::Relay;
use crate::session::Session;
use parley::frame::{Request, Response};
use parley::shared::{Disposition, ErrorCode, Status, WireResult};
use parley::{PUBLIC_KEY_LEN, SIGNATURE_LEN};
use std::sync::Arc;
use veil::crypto::{self, SecretBytes};
use veil::logging::{self, Logger};
use veil::time::wire_timestamp;

pub fn handle(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    request: Request,
    log: &Logger,
) -> WireResult<()> {
    match request {
        Request::Register { username, public_key } => {
            register(relay, session, &username, public_key, log)
        }
        Request::Login { username, signature } => {
            login(relay, session, &username, &signature, log)
        }
        Request::GetPublicKey { username } => public_key(relay, session, &username, log),
        Request::Send { recipient, ciphertext } => {
            send_message(relay, session, &recipient, ciphertext, log)
        }
        Request::GetMessages => drain_mailbox(relay, session, log),
        Request::SetStatus(status) => set_status(relay, session, status, log),
        Request::ListUsers => list_users(relay, session, log),
        Request::Logout => logout(session, log),
    }
}

fn register(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    username: &str,
    public_key: [u8; PUBLIC_KEY_LEN],
    log: &Logger,
) -> WireResult<()> {
    let response = match relay.registry.add(username, public_key) {
        Ok(()) => {
            logging::info!(log, "user registered"; "user" => username);
            Response::Register { error: None }
        }
        Err(AddError::Invalid) => {
            logging::info!(log, "registration rejected"; "user" => username, "reason" => "invalid name");
            let rejection = Response::Error {
                code: ErrorCode::InvalidUsername,
                message: "invalid username format".to_string(),
            };
            return relay.send(session, &rejection);
        }
        Err(AddError::Exists) => {
            logging::info!(log, "registration rejected"; "user" => username, "reason" => "name taken");
            Response::Register {
                error: Some(ErrorCode::UserExists),
            }
        }
        Err(AddError::Full) => {
            logging::error!(log, "registration rejected"; "user" => username, "reason" => "user table full");
            Response::Register {
                error: Some(ErrorCode::ServerError),
            }
        }
    };

    relay.send(session, &response)
}

fn login(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    username: &str,
    signature: &[u8; SIGNATURE_LEN],
    log: &Logger,
) -> WireResult<()> {
    let verified = relay
        .registry
        .public_key(username)
        .map(|key| crypto::verify_detached(signature, &session.challenge, &key))
        .unwrap_or(false);

    if !verified {
        logging::info!(log, "login failed"; "user" => username);
        return relay.send(session, &Response::Login { challenge: None });
    }

    {
        let mut state = session.state.lock();
        state.authenticated = true;
        state.username = username.to_string();
        state.status = Status::Online;
    }
    relay.registry.set_status(username, Status::Online);

    logging::info!(log, "user logged in"; "user" => username);

    let confirmation = Response::Login {
        challenge: Some(session.challenge),
    };
    relay.send(session, &confirmation)?;

    relay.broadcast_status(username, Status::Online);
    drain_mailbox(relay, session, log)
}

fn public_key(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    username: &str,
    log: &Logger,
) -> WireResult<()> {
    let key = relay.registry.public_key(username);

    if key.is_none() {
        logging::debug!(log, "public key lookup missed"; "user" => username);
    }

    relay.send(session, &Response::PublicKey { key })
}

fn send_message(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    recipient: &str,
    ciphertext: SecretBytes,
    log: &Logger,
) -> WireResult<()> {
    let sender = match session.authenticated_user() {
        Some(sender) => sender,
        None => {
            let rejection = Response::Error {
                code: ErrorCode::AuthFailed,
                message: "not authenticated".to_string(),
            };
            return relay.send(session, &rejection);
        }
    };

    if !relay.registry.contains(recipient) {
        let rejection = Response::Error {
            code: ErrorCode::UserNotFound,
            message: "recipient not found".to_string(),
        };
        return relay.send(session, &rejection);
    }

    let message_id = relay.allocate_message_id();
    let timestamp = wire_timestamp();

    let disposition = match relay.find_session(recipient) {
        Some(target) => {
            let incoming = Response::Incoming {
                message_id,
                sender: sender.clone(),
                timestamp,
                ciphertext: ciphertext.clone(),
            };

            match relay.send(&target, &incoming) {
                Ok(()) => {
                    logging::info!(log, "message delivered";
                                   "id" => message_id,
                                   "from" => sender.as_str(),
                                   "to" => recipient);
                    Disposition::Delivered
                }
                Err(err) => {
                    logging::error!(log, "live delivery failed, queueing";
                                    "id" => message_id,
                                    "to" => recipient,
                                    "error" => format!("{:?}", err));
                    enqueue(
                        relay,
                        recipient,
                        StoredMessage {
                            message_id,
                            sender,
                            timestamp,
                            ciphertext,
                        },
                        log,
                    )
                }
            }
        }
        None => enqueue(
            relay,
            recipient,
            StoredMessage {
                message_id,
                sender,
                timestamp,
                ciphertext,
            },
            log,
        ),
    };

    relay.send(
        session,
        &Response::Ack {
            message_id,
            disposition,
        },
    )
}

fn enqueue(
    relay: &Arc<Relay>,
    recipient: &str,
    message: StoredMessage,
    log: &Logger,
) -> Disposition {
    let mailbox = match relay.registry.mailbox(recipient) {
        Some(mailbox) => mailbox,
        None => return Disposition::Failed,
    };

    let mut mailbox = mailbox.lock();
    match mailbox.push(message) {
        Ok(()) => {
            logging::info!(log, "message queued"; "to" => recipient, "depth" => mailbox.len());
            Disposition::Queued
        }
        Err(dropped) => {
            logging::error!(log, "mailbox full, message dropped";
                            "to" => recipient,
                            "id" => dropped.message_id);
            Disposition::Failed
        }
    }
}

/// Delivers the caller's queued messages in arrival order, stopping at the
/// first transmit failure and leaving the remainder in place. The writer
/// lock is held for the whole pass so live deliveries cannot interleave.
fn drain_mailbox(relay: &Arc<Relay>, session: &Arc<Session>, log: &Logger) -> WireResult<()> {
    let username = match session.authenticated_user() {
        Some(username) => username,
        None => return Ok(()),
    };

    let mailbox = match relay.registry.mailbox(&username) {
        Some(mailbox) => mailbox,
        None => return Ok(()),
    };

    let mut writer = session.writer.lock();
    let mut mailbox = mailbox.lock();
    let mut delivered = 0u32;

    while let Some(message) = mailbox.front() {
        let incoming = Response::Incoming {
            message_id: message.message_id,
            sender: message.sender.clone(),
            timestamp: message.timestamp,
            ciphertext: message.ciphertext.clone(),
        };

        match incoming.write_to(&mut *writer) {
            Ok(()) => {
                mailbox.pop();
                delivered += 1;
            }
            Err(err) => {
                logging::error!(log, "queued delivery failed";
                                "user" => username.as_str(),
                                "remaining" => mailbox.len(),
                                "error" => format!("{:?}", err));
                break;
            }
        }
    }

    if delivered > 0 {
        logging::info!(log, "delivered queued messages";
                       "user" => username.as_str(),
                       "count" => delivered);
    }

    Ok(())
}

fn set_status(
    relay: &Arc<Relay>,
    session: &Arc<Session>,
    status: Status,
    log: &Logger,
) -> WireResult<()> {
    let username = match session.authenticated_user() {
        Some(username) => username,
        None => return Ok(()),
    };

    if relay.registry.contains(&username) {
        relay.registry.set_status(&username, status);
        session.state.lock().status = status;
        relay.broadcast_status(&username, status);

        logging::info!(log, "status changed";
                       "user" => username.as_str(),
                       "status" => u8::from(status));
    }

    Ok(())
}

fn list_users(relay: &Arc<Relay>, session: &Arc<Session>, log: &Logger) -> WireResult<()> {
    let users = relay.registry.snapshot();

    logging::debug!(log, "user list requested"; "count" => users.len());

    relay.send(session, &Response::UserList { users })
}

fn logout(session: &Arc<Session>, log: &Logger) -> WireResult<()> {
    logging::info!(log, "logout requested");
    session.state.lock().connected = false;
    Ok(())
}
