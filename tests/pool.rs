//! Integration tests for the synchronous connection pool.
//!
//! ## Test Matrix
//!
//! - `test_pool_basic_acquire_release` - Checkout/check-in round trip
//! - `test_pool_reuses_checked_in_connection` - Idle connection gets reused
//! - `test_pool_acquire_timeout` - `acquire_timeout` fires when the pool is saturated
//! - `test_pool_max_idle_time_expires_connection` - Idle connections older than
//!   `max_idle_time` are discarded rather than handed out
//! - `test_pool_warm_populates_idle_queue` - `warm()` eagerly opens `min_size` connections
//! - `test_pool_close_rejects_new_gets` - `close()` fails subsequent `get()` calls

use std::env;
use std::sync::Arc;
use std::time::Duration;

use pgcore::sync::{Pool, PoolConfig};
use pgcore::{Error, Opts, PoolError};

fn db_url() -> String {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    db_url
}

fn opts() -> Opts {
    Opts::try_from(db_url().as_str()).expect("invalid DATABASE_URL")
}

#[test]
fn test_pool_basic_acquire_release() {
    let pool = Arc::new(Pool::new(opts(), PoolConfig::default()));
    {
        let mut conn = pool.get().unwrap();
        let rows: Vec<(i32,)> = conn.exec_collect("SELECT 1", ()).unwrap();
        assert_eq!(rows, vec![(1,)]);
    }
    // Dropping the guard above checks the connection back in; a second
    // acquire should succeed without opening a new physical connection.
    let _conn = pool.get().unwrap();
}

#[test]
fn test_pool_reuses_checked_in_connection() {
    let config = PoolConfig {
        max_size: 1,
        ..PoolConfig::default()
    };
    let pool = Arc::new(Pool::new(opts(), config));

    let first_backend_pid = {
        let conn = pool.get().unwrap();
        conn.backend_key().map(|k| k.process_id())
    };
    let second_backend_pid = {
        let conn = pool.get().unwrap();
        conn.backend_key().map(|k| k.process_id())
    };

    assert_eq!(first_backend_pid, second_backend_pid);
}

#[test]
fn test_pool_acquire_timeout() {
    let config = PoolConfig {
        max_size: 1,
        acquire_timeout: Some(Duration::from_millis(100)),
        ..PoolConfig::default()
    };
    let pool = Arc::new(Pool::new(opts(), config));

    let _held = pool.get().unwrap();
    let result = pool.get();
    assert!(matches!(
        result,
        Err(Error::Pool(PoolError::AcquireTimeout))
    ));
}

#[test]
fn test_pool_max_idle_time_expires_connection() {
    let config = PoolConfig {
        max_size: 2,
        max_idle_time: Some(Duration::from_millis(50)),
        ..PoolConfig::default()
    };
    let pool = Arc::new(Pool::new(opts(), config));

    let first_pid = {
        let conn = pool.get().unwrap();
        conn.backend_key().map(|k| k.process_id())
    };

    std::thread::sleep(Duration::from_millis(150));

    let second_pid = {
        let conn = pool.get().unwrap();
        conn.backend_key().map(|k| k.process_id())
    };

    // The idle connection aged out, so the pool opened a fresh one instead
    // of reusing the expired one.
    assert_ne!(first_pid, second_pid);
}

#[test]
fn test_pool_warm_populates_idle_queue() {
    let config = PoolConfig {
        min_size: 2,
        max_size: 4,
        ..PoolConfig::default()
    };
    let pool = Arc::new(Pool::new(opts(), config));
    pool.warm().unwrap();

    let conn = pool.get().unwrap();
    let rows: Vec<(i32,)> = conn.exec_collect("SELECT 1", ()).unwrap();
    assert_eq!(rows, vec![(1,)]);
}

#[test]
fn test_pool_close_rejects_new_gets() {
    let pool = Arc::new(Pool::new(opts(), PoolConfig::default()));
    let conn = pool.get().unwrap();
    drop(conn);

    pool.close();
    let result = pool.get();
    assert!(matches!(
        result,
        Err(Error::Pool(PoolError::Closed))
    ));
}
