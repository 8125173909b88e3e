//! Integration tests for out-of-band query cancellation.
//!
//! ## Test Matrix
//!
//! - `test_cancel_query_interrupts_pg_sleep` - a `cancel_query_blocking` call
//!   from a second thread interrupts a `pg_sleep` running on the first
//!   connection, surfacing a server-side cancellation error

use std::env;
use std::thread;
use std::time::Duration;

use pgcore::cancel::cancel_query_blocking;
use pgcore::sync::Conn;
use pgcore::{Error, Opts};

fn opts() -> Opts {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Opts::try_from(db_url.as_str()).expect("invalid DATABASE_URL")
}

#[test]
fn test_cancel_query_interrupts_pg_sleep() {
    let opts = opts();
    let mut conn = Conn::new(opts.clone()).expect("Failed to connect");
    let backend_key = conn
        .backend_key()
        .cloned()
        .expect("connection should report a backend key after startup");

    let host = opts.host.clone();
    let port = opts.port;

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel_query_blocking(&host, port, &backend_key).expect("cancel request failed to send");
    });

    let result = conn.exec_drop("SELECT pg_sleep(5)", ());
    canceller.join().unwrap();

    assert!(result.is_err());
    assert!(matches!(result, Err(Error::Server(_))));
}
