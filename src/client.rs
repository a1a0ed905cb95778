//! Per-connection client lifecycle
//!
//! A connection moves through the three-line handshake (`auth`, `uid`,
//! `join`), then splits into three tasks:
//!
//! - **reader**: socket lines into the client's incoming channel, with the
//!   blacklist consulted on every line
//! - **forwarder**: incoming channel into the room's incoming channel
//! - **drainer**: the room's ring buffer onto the socket, through a private
//!   [`Consumer`] so a slow socket lags and loses instead of ever blocking
//!   the room
//!
//! The first task to fail cancels the shared token; the others observe it
//! and exit, making teardown idempotent under concurrent triggering.

use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{ debug, warn };

use crate::codec::{ LineReader, LineWriter };
use crate::constants::{ DRAIN_IDLE_WAIT, INGRESS_CHANNEL_CAPACITY };
use crate::error::{ ChatError, Result };
use crate::filter::Blacklist;
use crate::message::Message;
use crate::ring::Consumer;
use crate::room::RoomHandle;

/// Identity established by a completed handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// User id from the `uid` line
    pub uid: String,
    /// Room name from the `join` line
    pub room: String,
}

/// Drive the three-line handshake on a fresh connection.
///
/// Expected, in order: `auth <password>` matching the configured secret,
/// `uid <userid>` non-empty, `join <roomname>` non-empty. Any deviation is
/// an error and the caller closes the connection.
pub async fn handshake<R: AsyncRead + Unpin>(
    reader: &mut LineReader<R>,
    password: &str
) -> Result<Handshake> {
    let line = expect_line(reader).await?;
    match line.strip_prefix("auth ") {
        Some(secret) if secret == password => {}
        _ => return Err(ChatError::handshake("auth rejected")),
    }

    let line = expect_line(reader).await?;
    let uid = match line.strip_prefix("uid ") {
        Some(uid) if !uid.is_empty() => uid.to_string(),
        _ => return Err(ChatError::handshake("missing user id")),
    };

    let line = expect_line(reader).await?;
    let room = match line.strip_prefix("join ") {
        Some(room) if !room.is_empty() => room.to_string(),
        _ => return Err(ChatError::handshake("missing room name")),
    };

    Ok(Handshake { uid, room })
}

async fn expect_line<R: AsyncRead + Unpin>(reader: &mut LineReader<R>) -> Result<String> {
    reader.read_line().await?
        .ok_or_else(|| ChatError::handshake("connection closed during handshake"))
}

/// Run a joined client until it disconnects or its room goes away.
///
/// Spawns the reader, forwarder and drainer tasks and joins all three; the
/// caller owns registering and removing the client with its room.
pub async fn run<R, W>(
    reader: LineReader<R>,
    writer: LineWriter<W>,
    identity: Handshake,
    room: RoomHandle,
    blacklist: Arc<Blacklist>
)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static
{
    let quit = CancellationToken::new();
    let (incoming_tx, incoming_rx) = mpsc::channel(INGRESS_CHANNEL_CAPACITY);

    let read_task = tokio::spawn(
        read_loop(reader, incoming_tx, blacklist, identity.clone(), quit.clone())
    );
    let forward_task = tokio::spawn(
        forward_loop(incoming_rx, room.incoming.clone(), quit.clone())
    );
    let drain_task = tokio::spawn(
        drain_loop(
            writer,
            Consumer::attach(Arc::clone(&room.ring)),
            identity.uid.clone(),
            quit.clone(),
            room.cancel.clone()
        )
    );

    let results = tokio::join!(read_task, forward_task, drain_task);
    for join in [results.0, results.1, results.2] {
        // A panicked task is contained by the runtime; channel closure and
        // the token still wind the siblings down.
        if let Err(err) = join {
            warn!(uid = %identity.uid, %err, "client task aborted");
        }
    }
    debug!(uid = %identity.uid, room = %identity.room, "client tasks joined");
}

/// Socket lines -> incoming channel, filtered through the blacklist.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: LineReader<R>,
    incoming: mpsc::Sender<Message>,
    blacklist: Arc<Blacklist>,
    identity: Handshake,
    quit: CancellationToken
) {
    loop {
        tokio::select! {
            _ = quit.cancelled() => break,
            line = reader.read_line() => {
                match line {
                    Ok(Some(line)) => {
                        if blacklist.is_blocked(&identity.uid, &identity.room) {
                            debug!(uid = %identity.uid, room = %identity.room, "blocked line dropped");
                            continue;
                        }
                        let msg = Message::new(line, identity.room.clone());
                        if incoming.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!(uid = %identity.uid, "remote closed");
                        break;
                    }
                    Err(err) => {
                        warn!(uid = %identity.uid, %err, "read failed");
                        break;
                    }
                }
            }
        }
    }
    quit.cancel();
}

/// Incoming channel -> room incoming channel.
async fn forward_loop(
    mut incoming: mpsc::Receiver<Message>,
    room_incoming: mpsc::Sender<Message>,
    quit: CancellationToken
) {
    loop {
        tokio::select! {
            _ = quit.cancelled() => break,
            msg = incoming.recv() => {
                let Some(msg) = msg else { break };
                // A refused send means the room's publisher is gone
                if room_incoming.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }
    quit.cancel();
}

/// Ring buffer -> socket, at the client's own pace.
async fn drain_loop<W: AsyncWrite + Unpin>(
    mut writer: LineWriter<W>,
    consumer: Consumer,
    uid: String,
    quit: CancellationToken,
    room_cancel: CancellationToken
) {
    let mut closed = false;
    while !closed {
        if quit.is_cancelled() || room_cancel.is_cancelled() {
            break;
        }

        if consumer.is_empty() {
            tokio::select! {
                _ = quit.cancelled() => break,
                _ = room_cancel.cancelled() => break,
                _ = tokio::time::sleep(DRAIN_IDLE_WAIT) => {}
            }
            continue;
        }

        // Attempt every item in the batch and always flush once; the close
        // decision waits for the next outer iteration. The consumer cursor
        // already moved past the whole batch, so there is nothing to retry.
        let mut continue_draining = true;
        for item in consumer.batch_get() {
            continue_draining = write_continues(&mut writer, &item, &uid).await;
        }
        if !flush_continues(&mut writer, &uid).await {
            continue_draining = false;
        }
        if !continue_draining {
            closed = true;
        }
    }
    quit.cancel();
}

/// Write one payload line; the return value means "continue draining".
///
/// Transient socket errors count as success; the line is lost but the
/// drain goes on. Permanent errors stop the drainer; the client is then
/// torn down by the shared token.
async fn write_continues<W: AsyncWrite + Unpin>(
    writer: &mut LineWriter<W>,
    line: &str,
    uid: &str
) -> bool {
    match writer.write_line(line).await {
        Ok(()) => true,
        Err(err) if is_transient(&err) => true,
        Err(err) => {
            debug!(uid, %err, "write failed, ending drain");
            false
        }
    }
}

async fn flush_continues<W: AsyncWrite + Unpin>(writer: &mut LineWriter<W>, uid: &str) -> bool {
    match writer.flush().await {
        Ok(()) => true,
        Err(err) if is_transient(&err) => true,
        Err(err) => {
            debug!(uid, %err, "flush failed, ending drain");
            false
        }
    }
}

fn is_transient(err: &ChatError) -> bool {
    matches!(
        err,
        ChatError::Io(io) if matches!(
            io.kind(),
            ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
        )
    )
}
