//! Synchronous connection pool.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, PoolError, Result};
use crate::opts::Opts;

use super::Conn;

/// Runs once against every freshly opened physical connection, before it is
/// handed out for the first time. Not run again when the connection is
/// reused from the idle queue.
pub type InitHook = Arc<dyn Fn(&mut Conn) -> Result<()> + Send + Sync>;

/// Pool-specific tuning, replacing `Opts::pool_max_idle_conn`/
/// `pool_max_concurrency` for callers that construct a [`Pool`] directly.
#[derive(Clone)]
pub struct PoolConfig {
    /// Idle connections kept warm via [`Pool::warm`]; does not reserve
    /// concurrency permits.
    pub min_size: usize,
    /// Maximum number of connections concurrently checked out, and the
    /// capacity of the idle queue.
    pub max_size: usize,
    /// Discard an idle connection that's sat unused longer than this.
    pub max_idle_time: Option<Duration>,
    /// Discard a connection once this long has passed since it was opened,
    /// regardless of idle time.
    pub max_lifetime: Option<Duration>,
    /// Fail `get()` with `PoolError::AcquireTimeout` if no connection
    /// becomes available within this long.
    pub acquire_timeout: Option<Duration>,
    /// Run once per freshly opened physical connection.
    pub init_hook: Option<InitHook>,
    /// Probe a reused idle connection with `ping()` before handing it out.
    pub health_check: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            max_idle_time: None,
            max_lifetime: None,
            acquire_timeout: None,
            init_hook: None,
            health_check: true,
        }
    }
}

impl std::fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConfig")
            .field("min_size", &self.min_size)
            .field("max_size", &self.max_size)
            .field("max_idle_time", &self.max_idle_time)
            .field("max_lifetime", &self.max_lifetime)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("init_hook", &self.init_hook.is_some())
            .field("health_check", &self.health_check)
            .finish()
    }
}

/// Counting semaphore with a timed acquire, since `std_semaphore` (the
/// teacher's original collaborator here) has no `try_acquire`/timeout
/// variant and `acquire_timeout` needs one. Built directly on
/// `Mutex`/`Condvar` rather than pulling in a second semaphore crate.
struct Limiter {
    state: Mutex<usize>,
    available: Condvar,
}

impl Limiter {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    fn acquire(&self, timeout: Option<Duration>) -> bool {
        let mut count = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let deadline = timeout.map(|d| Instant::now() + d);
        while *count == 0 {
            match deadline {
                None => {
                    count = self
                        .available
                        .wait(count)
                        .unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    let (guard, result) = self
                        .available
                        .wait_timeout(count, remaining)
                        .unwrap_or_else(|e| e.into_inner());
                    count = guard;
                    if result.timed_out() && *count == 0 {
                        return false;
                    }
                }
            }
        }
        *count -= 1;
        true
    }

    fn release(&self) {
        let mut count = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *count += 1;
        self.available.notify_one();
    }
}

struct IdleConn {
    conn: Conn,
    created_at: Instant,
    idle_since: Instant,
}

pub struct Pool {
    opts: Opts,
    config: PoolConfig,
    conns: ArrayQueue<IdleConn>,
    limiter: Arc<Limiter>,
    closed: AtomicBool,
}

impl Pool {
    pub fn new(opts: Opts, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            conns: ArrayQueue::new(max_size),
            limiter: Arc::new(Limiter::new(max_size)),
            opts,
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Construct with `PoolConfig` derived from `opts`' legacy
    /// `pool_max_idle_conn`/`pool_max_concurrency`/
    /// `max_inactive_connection_lifetime` fields.
    pub fn with_opts_defaults(opts: Opts) -> Self {
        let config = PoolConfig {
            max_size: opts.pool_max_concurrency.unwrap_or(opts.pool_max_idle_conn.max(1)),
            max_idle_time: opts.max_inactive_connection_lifetime,
            ..PoolConfig::default()
        };
        Self::new(opts, config)
    }

    /// Eagerly open connections up to `min_size` and push them onto the idle
    /// queue. Call once after construction; `min_size` is not otherwise
    /// enforced as a floor once connections start getting checked out and
    /// expiring.
    pub fn warm(self: &Arc<Self>) -> Result<()> {
        for _ in 0..self.config.min_size {
            let conn = self.open_conn()?;
            let now = Instant::now();
            if self
                .conns
                .push(IdleConn {
                    conn,
                    created_at: now,
                    idle_since: now,
                })
                .is_err()
            {
                break;
            }
        }
        Ok(())
    }

    /// Stop handing out connections. Already-checked-out connections are
    /// still returned to `check_in` normally, but `get()` fails immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn open_conn(&self) -> Result<Conn> {
        let mut conn = Conn::new(self.opts.clone())?;
        if let Some(hook) = &self.config.init_hook {
            hook(&mut conn)?;
        }
        Ok(conn)
    }

    pub fn get(self: &Arc<Self>) -> Result<PooledConn> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Pool(PoolError::Closed));
        }

        if !self.limiter.acquire(self.config.acquire_timeout) {
            return Err(Error::Pool(PoolError::AcquireTimeout));
        }

        let now = Instant::now();
        let (conn, created_at) = loop {
            match self.conns.pop() {
                Some(idle) => {
                    let expired = self
                        .config
                        .max_idle_time
                        .is_some_and(|d| now.duration_since(idle.idle_since) >= d)
                        || self
                            .config
                            .max_lifetime
                            .is_some_and(|d| now.duration_since(idle.created_at) >= d);
                    if expired {
                        continue;
                    }
                    let mut conn = idle.conn;
                    if self.config.health_check && conn.ping().is_err() {
                        continue;
                    }
                    break (conn, idle.created_at);
                }
                None => match self.open_conn() {
                    Ok(conn) => break (conn, now),
                    Err(e) => {
                        self.limiter.release();
                        return Err(e);
                    }
                },
            }
        };

        Ok(PooledConn {
            conn: ManuallyDrop::new(conn),
            pool: Arc::clone(self),
            created_at,
        })
    }

    fn check_in(&self, mut conn: Conn, created_at: Instant) {
        if self.closed.load(Ordering::SeqCst) || conn.is_broken() {
            return;
        }
        if conn.in_transaction() && conn.query_drop("ROLLBACK").is_err() {
            return;
        }
        if conn.query_drop("DISCARD ALL").is_err() {
            return;
        }
        let now = Instant::now();
        let _ = self.conns.push(IdleConn {
            conn,
            created_at,
            idle_since: now,
        });
    }
}

pub struct PooledConn {
    pool: Arc<Pool>,
    conn: ManuallyDrop<Conn>,
    created_at: Instant,
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: conn is never accessed after this
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn, self.created_at);
        self.pool.limiter.release();
    }
}
