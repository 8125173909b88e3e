//! Integration tests for LISTEN/NOTIFY delivery.
//!
//! ## Test Matrix
//!
//! - `test_listen_notify_end_to_end` - a `NOTIFY` sent from one connection is
//!   delivered to a `Listener` installed on a second, listening connection
//!   the next time that connection is driven

use std::env;
use std::sync::{Arc, Mutex};

use pgcore::listen::Listener;
use pgcore::sync::Conn;

fn get_conn() -> Conn {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Conn::new(db_url.as_str()).expect("Failed to connect")
}

#[test]
fn test_listen_notify_end_to_end() {
    let mut listener_conn = get_conn();
    let mut notifier_conn = get_conn();

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    let mut listener = Listener::new();
    listener.on("pgcore_test_chan", move |n| {
        received_clone.lock().unwrap().push(n.payload);
    });
    listener_conn.set_async_message_handler(listener);

    listener_conn.exec_drop("LISTEN pgcore_test_chan", ()).unwrap();
    notifier_conn
        .exec_drop("NOTIFY pgcore_test_chan, 'hello'", ())
        .unwrap();

    // Notifications arrive out-of-band between protocol messages; driving
    // the listening connection through another round trip gives it a chance
    // to read the buffered NotificationResponse.
    listener_conn.exec_drop("SELECT 1", ()).unwrap();

    assert_eq!(*received.lock().unwrap(), vec!["hello".to_string()]);
}
