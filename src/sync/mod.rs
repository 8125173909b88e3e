//! Synchronous PostgreSQL client.

mod conn;
mod named_portal;
mod pipeline;
mod pool;
mod statement_cache;
mod stream;
mod transaction;
mod unnamed_portal;

pub use conn::Conn;
pub use named_portal::{Cursor, NamedPortal};
pub use pipeline::{Pipeline, Ticket};
pub use pool::{Pool, PoolConfig, PooledConn};
pub use transaction::Transaction;
pub use unnamed_portal::UnnamedPortal;
