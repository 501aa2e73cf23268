use duplexnet::{
    close, get_client, get_clients_number, open, read, write, INVALID_ID, TYPE_CLIENT,
    TYPE_SERVER, TYPE_UDP,
};
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
fn udp_server_registers_a_pseudo_client_per_peer() {
    let port = dynamic_port();
    let server_id = open(TYPE_UDP | TYPE_SERVER, None, port);
    assert_ne!(server_id, INVALID_ID);

    let client_id = open(TYPE_UDP | TYPE_CLIENT, Some("127.0.0.1"), port);
    assert_ne!(client_id, INVALID_ID);

    assert!(write(client_id, b"ping"));

    let pseudo_id = wait_for(
        || {
            let id = get_client(server_id);
            (id != INVALID_ID).then_some(id)
        },
        Duration::from_secs(2),
    )
    .expect("server should see a new peer");

    let payload = wait_for(|| read(pseudo_id), Duration::from_secs(2))
        .expect("pseudo-client should receive the datagram");
    assert_eq!(payload, b"ping");
    assert_eq!(get_clients_number(server_id), 1);

    close(client_id);
    close(pseudo_id);
    close(server_id);
}

#[test]
fn closing_udp_server_before_its_pseudo_client_still_frees_the_port() {
    let port = dynamic_port();
    let server_id = open(TYPE_UDP | TYPE_SERVER, None, port);
    let client_id = open(TYPE_UDP | TYPE_CLIENT, Some("127.0.0.1"), port);
    assert_ne!(server_id, INVALID_ID);
    assert_ne!(client_id, INVALID_ID);

    assert!(write(client_id, b"ping"));

    let pseudo_id = wait_for(
        || {
            let id = get_client(server_id);
            (id != INVALID_ID).then_some(id)
        },
        Duration::from_secs(2),
    )
    .expect("server should see a new peer");

    close(client_id);
    // Closing the server first is a discouraged but legal ordering: its
    // descriptor must still come out of the poll set once the last
    // pseudo-client leaves, rather than staying registered forever.
    close(server_id);
    close(pseudo_id);

    let reopened = wait_for(
        || {
            let id = open(TYPE_UDP | TYPE_SERVER, None, port);
            (id != INVALID_ID).then_some(id)
        },
        Duration::from_secs(2),
    )
    .expect("the port should be free once the last pseudo-client closed");

    close(reopened);
}

#[test]
fn udp_pseudo_client_reply_reaches_the_originating_client() {
    let port = dynamic_port();
    let server_id = open(TYPE_UDP | TYPE_SERVER, None, port);
    let client_id = open(TYPE_UDP | TYPE_CLIENT, Some("127.0.0.1"), port);
    assert_ne!(server_id, INVALID_ID);
    assert_ne!(client_id, INVALID_ID);

    assert!(write(client_id, b"ping"));

    let pseudo_id = wait_for(
        || {
            let id = get_client(server_id);
            (id != INVALID_ID).then_some(id)
        },
        Duration::from_secs(2),
    )
    .expect("server should see a new peer");

    wait_for(|| read(pseudo_id), Duration::from_secs(2)).expect("server should see the ping");

    assert!(write(pseudo_id, b"pong"));

    let reply = wait_for(|| read(client_id), Duration::from_secs(2))
        .expect("the originating client should receive the reply");
    assert_eq!(reply, b"pong");

    close(client_id);
    close(pseudo_id);
    close(server_id);
}
