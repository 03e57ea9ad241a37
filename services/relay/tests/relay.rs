use parley::frame::{Request, Response};
use parley::shared::{Disposition, ErrorCode, Status};
use relay::config::Config;
use relay::server::{Relay, Server};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use veil::crypto;
use veil::logging::{o, Discard, Logger};

struct TestServer {
    relay: Arc<Relay>,
    addr: SocketAddr,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    fn start(config: Config) -> TestServer {
        let log = Logger::root(Discard, o!());
        let server = Server::bind(config, &log).expect("bind failed");
        let addr = server.local_addr();
        let relay = server.relay();
        let handle = thread::spawn(move || server.run());

        TestServer {
            relay,
            addr,
            handle: Some(handle),
        }
    }

    fn config() -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            ..Config::default()
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.relay.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Client {
    stream: TcpStream,
    challenge: [u8; 32],
}

impl Client {
    fn connect(addr: SocketAddr) -> Client {
        let stream = TcpStream::connect(addr).expect("connect failed");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();

        let mut client = Client {
            stream,
            challenge: [0; 32],
        };

        match client.recv() {
            Response::Challenge { challenge } => client.challenge = challenge,
            other => panic!("expected challenge greeting, got {:?}", other),
        }

        client
    }

    fn send(&mut self, request: &Request) {
        request.write_to(&mut self.stream).expect("send failed");
    }

    fn recv(&mut self) -> Response {
        Response::read_from(&mut self.stream).expect("receive failed")
    }

    /// Next response that is not a presence update. Logins elsewhere push
    /// STATUS_UPDATE frames into this stream at arbitrary points.
    fn recv_skipping_status(&mut self) -> Response {
        loop {
            match self.recv() {
                Response::StatusUpdate { .. } => continue,
                other => return other,
            }
        }
    }

    fn register(&mut self, username: &str, public_key: [u8; 32]) -> Response {
        self.send(&Request::Register {
            username: username.to_string(),
            public_key,
        });
        self.recv_skipping_status()
    }

    fn login(&mut self, username: &str, secret_key: &[u8; 64]) -> Response {
        let signature = crypto::sign_detached(&self.challenge, secret_key);
        self.send(&Request::Login {
            username: username.to_string(),
            signature,
        });
        self.recv_skipping_status()
    }
}

fn register_offline_user(addr: SocketAddr, username: &str) -> ([u8; 32], [u8; 64]) {
    let (public_key, secret_key) = crypto::sign_keypair();
    let mut client = Client::connect(addr);
    assert_eq!(
        client.register(username, public_key),
        Response::Register { error: None }
    );
    (public_key, secret_key)
}

fn online_user(addr: SocketAddr, username: &str) -> Client {
    let (public_key, secret_key) = crypto::sign_keypair();
    let mut client = Client::connect(addr);
    assert_eq!(
        client.register(username, public_key),
        Response::Register { error: None }
    );
    assert!(matches!(
        client.login(username, &secret_key),
        Response::Login { challenge: Some(_) }
    ));
    client
}

#[test]
fn test_register_and_fetch_public_key() {
    let server = TestServer::start(TestServer::config());

    let (alice_key, _) = crypto::sign_keypair();
    let mut alice = Client::connect(server.addr);
    assert_eq!(
        alice.register("alice", alice_key),
        Response::Register { error: None }
    );

    let mut bob = online_user(server.addr, "bob");
    bob.send(&Request::GetPublicKey {
        username: "alice".to_string(),
    });

    assert_eq!(
        bob.recv_skipping_status(),
        Response::PublicKey { key: Some(alice_key) }
    );
}

#[test]
fn test_duplicate_registration_keeps_original_key() {
    let server = TestServer::start(TestServer::config());

    let (first_key, _) = crypto::sign_keypair();
    let (second_key, _) = crypto::sign_keypair();

    let mut first = Client::connect(server.addr);
    assert_eq!(
        first.register("alice", first_key),
        Response::Register { error: None }
    );

    let mut second = Client::connect(server.addr);
    assert_eq!(
        second.register("alice", second_key),
        Response::Register {
            error: Some(ErrorCode::UserExists)
        }
    );

    assert_eq!(server.relay.registry.public_key("alice"), Some(first_key));
}

#[test]
fn test_invalid_username_rejected() {
    let server = TestServer::start(TestServer::config());

    let (public_key, _) = crypto::sign_keypair();
    let mut client = Client::connect(server.addr);

    let response = client.register("not a name", public_key);

    assert!(matches!(
        response,
        Response::Error {
            code: ErrorCode::InvalidUsername,
            ..
        }
    ));
}

#[test]
fn test_login_rejects_bad_signature_but_keeps_session() {
    let server = TestServer::start(TestServer::config());

    let (public_key, secret_key) = crypto::sign_keypair();
    let mut client = Client::connect(server.addr);
    assert_eq!(
        client.register("alice", public_key),
        Response::Register { error: None }
    );

    // Signature over the wrong bytes must be refused.
    let bad_signature = crypto::sign_detached(&[0u8; 32], &secret_key);
    client.send(&Request::Login {
        username: "alice".to_string(),
        signature: bad_signature,
    });
    assert_eq!(
        client.recv_skipping_status(),
        Response::Login { challenge: None }
    );

    // The session stays open; a correct login on the same connection works
    // and echoes the challenge delivered at connect time.
    let challenge = client.challenge;
    assert_eq!(
        client.login("alice", &secret_key),
        Response::Login {
            challenge: Some(challenge)
        }
    );
}

#[test]
fn test_login_unknown_user_fails() {
    let server = TestServer::start(TestServer::config());

    let (_, secret_key) = crypto::sign_keypair();
    let mut client = Client::connect(server.addr);

    assert_eq!(
        client.login("nobody", &secret_key),
        Response::Login { challenge: None }
    );
}

#[test]
fn test_auth_gate_before_login() {
    let server = TestServer::start(TestServer::config());

    let mut client = Client::connect(server.addr);
    client.send(&Request::ListUsers);

    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::AuthFailed,
            ..
        }
    ));
}

#[test]
fn test_live_delivery() {
    let server = TestServer::start(TestServer::config());

    let mut alice = online_user(server.addr, "alice");
    let mut bob = online_user(server.addr, "bob");

    let ciphertext = vec![0xC0, 0xFF, 0xEE, 0x00, 0x42];
    alice.send(&Request::Send {
        recipient: "bob".to_string(),
        ciphertext: ciphertext.clone().into(),
    });

    let ack = alice.recv_skipping_status();
    let message_id = match ack {
        Response::Ack {
            message_id,
            disposition: Disposition::Delivered,
        } => message_id,
        other => panic!("expected live-delivery ack, got {:?}", other),
    };

    match bob.recv_skipping_status() {
        Response::Incoming {
            message_id: incoming_id,
            sender,
            ciphertext: incoming_ciphertext,
            ..
        } => {
            assert_eq!(incoming_id, message_id);
            assert_eq!(sender, "alice");
            assert_eq!(&incoming_ciphertext[..], &ciphertext[..]);
        }
        other => panic!("expected incoming message, got {:?}", other),
    }
}

#[test]
fn test_offline_queue_drained_on_login() {
    let server = TestServer::start(TestServer::config());

    let (_, bob_secret) = register_offline_user(server.addr, "bob");
    let mut alice = online_user(server.addr, "alice");

    let first = vec![1u8; 16];
    let second = vec![2u8; 16];

    let mut queued_ids = Vec::new();
    for ciphertext in [&first, &second].iter() {
        alice.send(&Request::Send {
            recipient: "bob".to_string(),
            ciphertext: ciphertext.to_vec().into(),
        });
        match alice.recv_skipping_status() {
            Response::Ack {
                message_id,
                disposition: Disposition::Queued,
            } => queued_ids.push(message_id),
            other => panic!("expected queued ack, got {:?}", other),
        }
    }
    assert!(queued_ids[0] < queued_ids[1]);

    // Bob's login drains the mailbox in enqueue order, with the ids the
    // sender saw in the acknowledgements.
    let mut bob = Client::connect(server.addr);
    assert!(matches!(
        bob.login("bob", &bob_secret),
        Response::Login { challenge: Some(_) }
    ));

    for (expected_id, expected_ciphertext) in queued_ids.iter().zip([&first, &second].iter()) {
        match bob.recv_skipping_status() {
            Response::Incoming {
                message_id,
                sender,
                ciphertext,
                ..
            } => {
                assert_eq!(message_id, *expected_id);
                assert_eq!(sender, "alice");
                assert_eq!(&ciphertext[..], &expected_ciphertext[..]);
            }
            other => panic!("expected queued message, got {:?}", other),
        }
    }
}

#[test]
fn test_get_messages_on_empty_mailbox_sends_nothing() {
    let server = TestServer::start(TestServer::config());

    let mut alice = online_user(server.addr, "alice");
    alice.send(&Request::GetMessages);

    // The next frame must be the answer to the follow-up request, proving
    // the empty drain produced no output and left the session healthy.
    alice.send(&Request::ListUsers);
    match alice.recv_skipping_status() {
        Response::UserList { users } => {
            assert_eq!(users, vec![("alice".to_string(), Status::Online)]);
        }
        other => panic!("expected user list, got {:?}", other),
    }
}

#[test]
fn test_send_to_unknown_recipient() {
    let server = TestServer::start(TestServer::config());

    let mut alice = online_user(server.addr, "alice");
    alice.send(&Request::Send {
        recipient: "ghost".to_string(),
        ciphertext: vec![1, 2, 3].into(),
    });

    assert!(matches!(
        alice.recv_skipping_status(),
        Response::Error {
            code: ErrorCode::UserNotFound,
            ..
        }
    ));
}

#[test]
fn test_mailbox_overflow_reports_failure() {
    let mut config = TestServer::config();
    config.mailbox_depth = 2;
    let server = TestServer::start(config);

    register_offline_user(server.addr, "bob");
    let mut alice = online_user(server.addr, "alice");

    let mut dispositions = Vec::new();
    for _ in 0..3 {
        alice.send(&Request::Send {
            recipient: "bob".to_string(),
            ciphertext: vec![9u8; 8].into(),
        });
        match alice.recv_skipping_status() {
            Response::Ack { disposition, .. } => dispositions.push(disposition),
            other => panic!("expected ack, got {:?}", other),
        }
    }

    assert_eq!(
        dispositions,
        vec![
            Disposition::Queued,
            Disposition::Queued,
            Disposition::Failed
        ]
    );
}

#[test]
fn test_presence_broadcast_on_login_and_logout() {
    let server = TestServer::start(TestServer::config());

    let mut carol = online_user(server.addr, "carol");
    let mut dave = online_user(server.addr, "dave");

    assert_eq!(
        carol.recv(),
        Response::StatusUpdate {
            username: "dave".to_string(),
            status: Status::Online,
        }
    );

    dave.send(&Request::Logout);

    assert_eq!(
        carol.recv(),
        Response::StatusUpdate {
            username: "dave".to_string(),
            status: Status::Offline,
        }
    );
}

#[test]
fn test_set_status_broadcast_and_listing() {
    let server = TestServer::start(TestServer::config());

    let mut carol = online_user(server.addr, "carol");
    let mut dave = online_user(server.addr, "dave");

    // Flush dave's login notification before changing status.
    assert_eq!(
        carol.recv(),
        Response::StatusUpdate {
            username: "dave".to_string(),
            status: Status::Online,
        }
    );

    dave.send(&Request::SetStatus(Status::Away));

    assert_eq!(
        carol.recv(),
        Response::StatusUpdate {
            username: "dave".to_string(),
            status: Status::Away,
        }
    );

    carol.send(&Request::ListUsers);
    match carol.recv() {
        Response::UserList { users } => {
            assert_eq!(
                users,
                vec![
                    ("carol".to_string(), Status::Online),
                    ("dave".to_string(), Status::Away),
                ]
            );
        }
        other => panic!("expected user list, got {:?}", other),
    }
}

#[test]
fn test_register_allowed_on_authenticated_session() {
    let server = TestServer::start(TestServer::config());

    let mut alice = online_user(server.addr, "alice");
    let (other_key, _) = crypto::sign_keypair();

    assert_eq!(
        alice.register("alice_backup", other_key),
        Response::Register { error: None }
    );

    // The session binding is untouched by the second registration.
    alice.send(&Request::ListUsers);
    assert!(matches!(
        alice.recv_skipping_status(),
        Response::UserList { .. }
    ));
}

#[test]
fn test_rate_limit_closes_session() {
    let mut config = TestServer::config();
    config.rate_max_requests = 3;
    let server = TestServer::start(config);

    let mut client = Client::connect(server.addr);

    for _ in 0..3 {
        client.send(&Request::ListUsers);
        assert!(matches!(
            client.recv(),
            Response::Error {
                code: ErrorCode::AuthFailed,
                ..
            }
        ));
    }

    // The frame beyond the budget draws the rate-limit error and the server
    // closes the connection.
    client.send(&Request::ListUsers);
    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::RateLimit,
            ..
        }
    ));

    assert!(Response::read_from(&mut client.stream).is_err());
}

#[test]
fn test_malformed_payload_keeps_session_open() {
    let server = TestServer::start(TestServer::config());

    let mut client = Client::connect(server.addr);

    // SEND_MESSAGE with a zero-length recipient name.
    parley::wire::write_frame(&mut client.stream, 0x04, &[0u8]).unwrap();
    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::InvalidFormat,
            ..
        }
    ));

    // Unknown frame type.
    parley::wire::write_frame(&mut client.stream, 0x7F, &[]).unwrap();
    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::InvalidFormat,
            ..
        }
    ));

    // The connection is still serviceable.
    client.send(&Request::ListUsers);
    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::AuthFailed,
            ..
        }
    ));
}

#[test]
fn test_oversized_frame_closes_session() {
    let server = TestServer::start(TestServer::config());

    let mut client = Client::connect(server.addr);

    // Header declaring 2049 payload bytes, one past the accepted maximum.
    client.stream.write_all(&[0x00, 0x00, 0x08, 0x01, 0x04]).unwrap();

    assert!(Response::read_from(&mut client.stream).is_err());
}

#[test]
fn test_shutdown_notifies_connected_clients() {
    let server = TestServer::start(TestServer::config());

    let mut client = Client::connect(server.addr);
    server.relay.stop();

    assert!(matches!(
        client.recv(),
        Response::Error {
            code: ErrorCode::ConnectionTerminated,
            ..
        }
    ));
    assert!(Response::read_from(&mut client.stream).is_err());
}

#[test]
fn test_message_ids_are_monotone_across_senders() {
    let server = TestServer::start(TestServer::config());

    register_offline_user(server.addr, "sink");
    let mut alice = online_user(server.addr, "alice");
    let mut bob = online_user(server.addr, "bob");

    let mut ids = Vec::new();
    for client in [&mut alice, &mut bob].iter_mut() {
        for _ in 0..2 {
            client.send(&Request::Send {
                recipient: "sink".to_string(),
                ciphertext: vec![5u8; 4].into(),
            });
            match client.recv_skipping_status() {
                Response::Ack { message_id, .. } => ids.push(message_id),
                other => panic!("expected ack, got {:?}", other),
            }
        }
    }

    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), ids.len());
}
