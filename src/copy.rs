//! `COPY FROM`/`COPY TO` streaming glue over [`crate::protocol::frontend::copy`]
//! and [`crate::protocol::backend::copy`], driven by
//! [`crate::state::copy::CopyStateMachine`].
//!
//! `tokio::Conn::copy_from_query`/`copy_to_table` and their `sync` counterparts
//! build on the handler types here; this module stays transport-agnostic.

use crate::error::{Error, Result};

pub use crate::state::copy::{CopyDirection, CopyOutHandler, CopyStateMachine, NullCopyOutHandler};

/// Default size, in bytes, of chunks read from a caller-supplied source during
/// `COPY ... FROM STDIN` before each is framed as a `CopyData` message.
pub const DEFAULT_COPY_CHUNK_SIZE: usize = 64 * 1024;

/// A [`CopyOutHandler`] that buffers every `CopyData` chunk into a `Vec<u8>`.
///
/// Useful when the caller wants the whole COPY OUT result in memory rather
/// than streaming it to a sink.
#[derive(Debug, Default)]
pub struct CopyOutCollector {
    /// Bytes received so far.
    pub data: Vec<u8>,
}

impl CopyOutCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CopyOutHandler for CopyOutCollector {
    fn chunk(&mut self, data: &[u8]) -> Result<()> {
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Adapts a [`std::io::Write`] sink into a [`CopyOutHandler`], for
/// `sync::Conn::copy_from_query`.
pub struct WriteCopyOutHandler<'a, W: std::io::Write> {
    sink: &'a mut W,
    bytes_written: u64,
}

impl<'a, W: std::io::Write> WriteCopyOutHandler<'a, W> {
    /// Wrap `sink`, streaming every `CopyData` chunk into it as it arrives.
    pub fn new(sink: &'a mut W) -> Self {
        Self {
            sink,
            bytes_written: 0,
        }
    }

    /// Total bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<W: std::io::Write> CopyOutHandler for WriteCopyOutHandler<'_, W> {
    fn chunk(&mut self, data: &[u8]) -> Result<()> {
        self.sink.write_all(data).map_err(Error::Io)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }
}
