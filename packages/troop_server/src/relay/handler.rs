//! Per-connection session.
//!
//! A session starts UNAUTHENTICATED and reads exactly one frame: the password
//! digest. The handshake reply is the client id, or [`AUTH_FAILED`] before
//! the connection is closed. Once ACTIVE, joins and full-state pushes are
//! handled inline and everything else goes to the broadcast queue. Any read
//! failure, orderly close or framing error ends the session, and so does
//! eviction by the hub.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::transport::{FrameCodec, MessageReader};

use super::hub::SessionHub;
use super::protocol::{AUTH_FAILED, Message};

/// Bytes requested per socket read.
const READ_CHUNK: usize = 2048;

type FrameSink = FramedWrite<OwnedWriteHalf, FrameCodec>;

/// Drive one accepted connection to completion and clean up after it.
pub async fn handle_connection(stream: TcpStream, address: SocketAddr, hub: Arc<SessionHub>) {
    hub.metrics().connection_opened();

    match run_session(stream, address, &hub).await {
        Ok(()) => debug!("Session {} ended", address),
        Err(e @ RelayError::AuthenticationFailed { .. }) => {
            info!("Failed login from {}: {}", address.ip(), e)
        }
        Err(RelayError::ShuttingDown) => debug!("Session {} ended by shutdown", address),
        Err(e) if e.is_disconnect() => debug!("Session {} lost: {}", address, e),
        Err(e @ RelayError::Framing(_)) => {
            hub.metrics().framing_error();
            warn!("Dropping {}: {}", address, e);
        }
        Err(e) => warn!("Session {} failed: {}", address, e),
    }

    hub.leave(address).await;
    hub.metrics().connection_closed();
}

/// Read one chunk and queue whatever frames it completes. Returns false on
/// orderly close or once the session is closed.
async fn fill(
    stream: &mut OwnedReadHalf,
    reader: &mut MessageReader,
    chunk: &mut [u8],
    backlog: &mut VecDeque<Message>,
    closed: &CancellationToken,
) -> Result<bool, RelayError> {
    let read = tokio::select! {
        _ = closed.cancelled() => return Ok(false),
        read = stream.read(chunk) => read?,
    };
    if read == 0 {
        return Ok(false);
    }
    backlog.extend(reader.feed(&chunk[..read])?);
    Ok(true)
}

async fn run_session(
    stream: TcpStream,
    address: SocketAddr,
    hub: &Arc<SessionHub>,
) -> Result<(), RelayError> {
    let (mut read_half, write_half) = stream.into_split();
    let mut sink = FramedWrite::new(write_half, FrameCodec::new(hub.max_frame_bytes()));
    let mut reader = MessageReader::new(hub.max_frame_bytes());
    let mut chunk = vec![0u8; READ_CHUNK];
    // Frames decoded but not yet handled. Anything pipelined behind the
    // password waits here until the handshake completes.
    let mut backlog = VecDeque::new();
    // Cancelled when the hub stops or evicts this client.
    let closed = hub.shutdown_token().child_token();

    let first = loop {
        if let Some(message) = backlog.pop_front() {
            break message;
        }
        if !fill(&mut read_half, &mut reader, &mut chunk, &mut backlog, &closed).await? {
            return Ok(());
        }
    };

    let (outbox, inbox) = mpsc::channel(hub.outbox_capacity());
    let authenticated = match first {
        Message::Password(credentials) => {
            hub.authenticate(address, &credentials.password, outbox, closed.clone())
                .await
        }
        other => {
            debug!("Expected password from {}, got {}", address, other.kind());
            hub.metrics().auth_failed();
            Err(RelayError::AuthenticationFailed { peer: address })
        }
    };
    let id = match authenticated {
        Ok(id) => id,
        Err(e) => {
            if let Err(send_err) = sink.send(AUTH_FAILED).await {
                debug!("Could not deliver rejection to {}: {}", address, send_err);
            }
            return Err(e);
        }
    };
    // Anything queued for this client so far waits behind the id reply.
    sink.send(id).await?;
    tokio::spawn(run_writer(sink, inbox, closed.clone(), address));

    loop {
        while let Some(message) = backlog.pop_front() {
            handle_message(hub, address, message).await?;
        }
        if !fill(&mut read_half, &mut reader, &mut chunk, &mut backlog, &closed).await? {
            if closed.is_cancelled() && hub.is_running() {
                info!("Closed connection to evicted client {} @ {}", id, address);
            }
            return Ok(());
        }
    }
}

async fn handle_message(
    hub: &SessionHub,
    address: SocketAddr,
    message: Message,
) -> Result<(), RelayError> {
    match message {
        Message::Password(_) => debug!("Ignoring repeated password from {}", address),
        Message::Join(peer) => {
            hub.join(address, peer).await?;
        }
        Message::FullState(state) => {
            hub.forward_full_state(address, state).await;
        }
        message @ (Message::FullStateRequest(_)
        | Message::Departed(_)
        | Message::Notice(_)
        | Message::Edit(_)) => hub.enqueue(address, message)?,
    }
    Ok(())
}

/// Write everything queued for this client to the socket. Ends when every
/// outbox handle is gone or a write fails; either way the receiver is
/// dropped, so later sends to this client fail. A write still blocked on the
/// socket when the session is closed is abandoned.
async fn run_writer(
    mut sink: FrameSink,
    mut inbox: mpsc::Receiver<Message>,
    closed: CancellationToken,
    address: SocketAddr,
) {
    while let Some(message) = inbox.recv().await {
        let written = tokio::select! {
            biased;
            written = sink.send(message) => written,
            _ = closed.cancelled() => {
                debug!("Abandoning write to closed session {}", address);
                break;
            }
        };
        if let Err(e) = written {
            debug!("Write to {} failed: {}", address, e);
            break;
        }
    }
    debug!("Writer for {} finished", address);
}
