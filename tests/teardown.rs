use duplexnet::{close, get_actives_number, open, INVALID_ID, TYPE_CLIENT, TYPE_SERVER, TYPE_TCP};
use rand::Rng;
use std::thread;
use std::time::Duration;

fn dynamic_port() -> u16 {
    rand::thread_rng().gen_range(duplexnet::PORT_MIN..60000)
}

#[test]
fn closing_the_last_connection_does_not_prevent_reopening() {
    let port = dynamic_port();

    let server_id = open(TYPE_TCP | TYPE_SERVER, None, port);
    assert_ne!(server_id, INVALID_ID);
    assert!(get_actives_number() >= 1);

    close(server_id);

    // Give the workers a moment to notice the empty registry and stop.
    thread::sleep(Duration::from_millis(100));

    // Reopening after a full teardown must restart the engine cleanly.
    let port2 = dynamic_port();
    let server_id2 = open(TYPE_TCP | TYPE_SERVER, None, port2);
    assert_ne!(server_id2, INVALID_ID);
    assert!(get_actives_number() >= 1);

    close(server_id2);
}

#[test]
fn close_on_unknown_id_is_a_harmless_no_op() {
    close(999_999_999);
}
