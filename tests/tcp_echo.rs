use duplexnet::{close, get_address, get_client, open, read, write, INVALID_ID, TYPE_CLIENT, TYPE_SERVER, TYPE_TCP};
use rand::Rng;
use std::thread;
use std::time::{Duration, Instant};

fn dynamic_port() -> u16 {
    rand::thread_rng().gen_range(duplexnet::PORT_MIN..60000)
}

fn wait_for<T>(mut poll: impl FnMut() -> Option<T>, timeout: Duration) -> Option<T> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(v) = poll() {
            return Some(v);
        }
        thread::sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn tcp_client_server_echo_round_trip() {
    let port = dynamic_port();
    let server_id = open(TYPE_TCP | TYPE_SERVER, None, port);
    assert_ne!(server_id, INVALID_ID);

    let client_id = open(TYPE_TCP | TYPE_CLIENT, Some("127.0.0.1"), port);
    assert_ne!(client_id, INVALID_ID);

    let accepted_id = wait_for(|| {
        let id = get_client(server_id);
        (id != INVALID_ID).then_some(id)
    }, Duration::from_secs(2))
    .expect("server should accept the client");

    assert!(write(client_id, b"hello"));

    let echoed = wait_for(|| read(accepted_id), Duration::from_secs(2))
        .expect("server side should receive the client's message");
    assert_eq!(echoed, b"hello");

    assert!(write(accepted_id, b"world"));
    let reply = wait_for(|| read(client_id), Duration::from_secs(2))
        .expect("client should receive the server's reply");
    assert_eq!(reply, b"world");

    assert!(get_address(client_id).is_some());

    close(client_id);
    close(accepted_id);
    close(server_id);
}

#[test]
fn write_then_read_preserves_message_order() {
    let port = dynamic_port();
    let server_id = open(TYPE_TCP | TYPE_SERVER, None, port);
    let client_id = open(TYPE_TCP | TYPE_CLIENT, Some("127.0.0.1"), port);

    let accepted_id = wait_for(|| {
        let id = get_client(server_id);
        (id != INVALID_ID).then_some(id)
    }, Duration::from_secs(2))
    .expect("server should accept the client");

    for msg in [&b"one"[..], &b"two"[..], &b"three"[..]] {
        assert!(write(client_id, msg));
        // Give the writer worker a moment so messages arrive in order.
        thread::sleep(Duration::from_millis(50));
    }

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(2);
    while received.len() < 3 && Instant::now() < deadline {
        if let Some(msg) = read(accepted_id) {
            received.push(msg);
        } else {
            thread::sleep(Duration::from_millis(20));
        }
    }

    assert_eq!(received, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);

    close(client_id);
    close(accepted_id);
    close(server_id);
}
