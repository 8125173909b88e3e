//! A high-performance PostgreSQL client library.
//!
//! # Features
//!
//! - **Zero-copy parsing**: Message payloads are parsed directly from the read buffer
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Sync and async APIs**: Choose between synchronous and tokio-based async
//! - **Full protocol support**: Simple query, extended query, COPY, pipelining
//!
//! # Example
//!
//! ```no_run
//! use pgcore::sync::Conn;
//! use pgcore::Opts;
//!
//! fn main() -> pgcore::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!
//!     let rows: Vec<(i32,)> = conn.query_collect("SELECT 1 AS num")?;
//!     println!("Rows: {:?}", rows);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

// private
mod buffer_pool;
mod buffer_set;
mod error;
mod opts;
mod statement;

// pub
pub mod cancel;
pub mod conversion;
pub mod copy;
pub mod handler;
pub mod listen;
pub mod protocol;
pub mod record;
pub mod registry;
pub mod state;
pub mod transaction_options;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

pub use buffer_pool::BufferPool;
pub use buffer_set::BufferSet;
pub use error::{Error, PoolError, Result, ServerError};
pub use handler::AsyncMessageHandler;
pub use opts::{Opts, SslMode};
pub use record::{ColumnIndex, Record};
pub use registry::Value;
pub use state::action::AsyncMessage;
pub use state::extended::PreparedStatement;
pub use statement::IntoStatement;
pub use transaction_options::{IsolationLevel, TransactionOptions};
