//! Asynchronous connection pool.

use std::future::Future;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use tokio::sync::Semaphore;

use crate::error::{Error, PoolError, Result};
use crate::opts::Opts;

use super::Conn;

/// Runs once against every freshly opened physical connection, before it is
/// handed out for the first time. Not run again when the connection is
/// reused from the idle queue.
pub type InitHook =
    Arc<dyn for<'c> Fn(&'c mut Conn) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'c>> + Send + Sync>;

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

struct IdleConn {
    conn: Conn,
    created_at: Instant,
    idle_since: Instant,
}

pub struct Pool {
    opts: Opts,
    config: PoolConfig,
    conns: ArrayQueue<IdleConn>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

impl Pool {
    pub fn new(opts: Opts, config: PoolConfig) -> Self {
        let max_size = config.max_size.max(1);
        Self {
            conns: ArrayQueue::new(max_size),
            semaphore: Arc::new(Semaphore::new(max_size)),
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
    pub async fn warm(self: &Arc<Self>) -> Result<()> {
        for _ in 0..self.config.min_size {
            let conn = self.open_conn().await?;
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

    async fn open_conn(&self) -> Result<Conn> {
        let mut conn = Conn::new(self.opts.clone()).await?;
        if let Some(hook) = &self.config.init_hook {
            hook(&mut conn).await?;
        }
        Ok(conn)
    }

    pub async fn get(self: &Arc<Self>) -> Result<PooledConn> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Pool(PoolError::Closed));
        }

        let permit_fut = Arc::clone(&self.semaphore).acquire_owned();
        let permit = match self.config.acquire_timeout {
            Some(d) => tokio::time::timeout(d, permit_fut)
                .await
                .map_err(|_| Error::Pool(PoolError::AcquireTimeout))?
                .expect("semaphore is never closed"),
            None => permit_fut.await.expect("semaphore is never closed"),
        };

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
                    if self.config.health_check && conn.ping().await.is_err() {
                        continue;
                    }
                    break (conn, idle.created_at);
                }
                None => break (self.open_conn().await?, now),
            }
        };

        Ok(PooledConn {
            conn: ManuallyDrop::new(conn),
            pool: Arc::clone(self),
            created_at,
            _permit: Some(permit),
        })
    }

    async fn check_in(&self, mut conn: Conn, created_at: Instant) {
        if self.closed.load(Ordering::SeqCst) || conn.is_broken() {
            return;
        }
        if conn.in_transaction() && conn.query_drop("ROLLBACK").await.is_err() {
            return;
        }
        if conn.query_drop("DISCARD ALL").await.is_err() {
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
    _permit: Option<tokio::sync::OwnedSemaphorePermit>,
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
        let pool = Arc::clone(&self.pool);
        let created_at = self.created_at;
        tokio::spawn(async move {
            pool.check_in(conn, created_at).await;
        });
    }
}
