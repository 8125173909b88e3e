//! Out-of-band query cancellation.
//!
//! PostgreSQL cancels an in-flight query by opening a *second* connection and
//! sending a `CancelRequest` carrying the backend PID and secret key captured
//! during startup on the original connection — never by writing to the
//! original socket. See `protocol::frontend::startup::write_cancel_request`.

use crate::error::Result;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_cancel_request;

/// Send a `CancelRequest` for `backend_key` to `host:port` over a throwaway
/// TCP connection.
///
/// This is fire-and-forget from the protocol's point of view: the server
/// closes the cancel connection immediately after reading the request and
/// never sends a reply, successful or otherwise. A cancellation may arrive
/// too late to affect anything, or may cancel a *different* statement if the
/// original query already finished and a new one started — callers should
/// treat cancellation as a best-effort nudge, not a guarantee.
#[cfg(feature = "tokio")]
pub async fn cancel_query(host: &str, port: u16, backend_key: &BackendKeyData) -> Result<()> {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    let mut buf = Vec::new();
    write_cancel_request(&mut buf, backend_key.process_id(), backend_key.secret());

    let mut stream = TcpStream::connect((host, port)).await?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    // The server closes the connection without replying; dropping `stream` here
    // after the flush is the correct client-side half-close.
    Ok(())
}

/// Blocking counterpart of [`cancel_query`] for the `sync` transport.
#[cfg(feature = "sync")]
pub fn cancel_query_blocking(host: &str, port: u16, backend_key: &BackendKeyData) -> Result<()> {
    use std::io::Write;
    use std::net::TcpStream;

    let mut buf = Vec::new();
    write_cancel_request(&mut buf, backend_key.process_id(), backend_key.secret());

    let mut stream = TcpStream::connect((host, port))?;
    stream.write_all(&buf)?;
    stream.flush()?;
    Ok(())
}
