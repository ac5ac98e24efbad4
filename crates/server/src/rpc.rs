//! TCP server for the fileset request/response channel and the
//! bidirectional report/notification stream
//!
//! A connection either issues `FileSetRequest`s and reads responses, or
//! sends one `Subscribe` and becomes a live stream: the client sends
//! periodic reports, the server pushes notifications queued by the
//! registry. A stream is always unregistered when its read loop exits.

use std::net::SocketAddr;
use std::sync::Arc;

use color_eyre::Result;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skiff_core::protocol::{FileSetResponse, Subscribe};
use skiff_core::{Message, ProtocolReader, ProtocolWriter};

use crate::files::FileSetService;
use crate::notify::NotifyRegistry;

/// Capacity of each stream's notification queue; the registry drops
/// events for a stream that falls this far behind.
const STREAM_QUEUE: usize = 16;

/// Accept connections forever.
///
/// # Errors
/// Returns an error only if accepting fails; per-connection failures
/// are logged and dropped.
pub async fn serve(
    listener: TcpListener,
    files: Arc<FileSetService>,
    registry: Arc<NotifyRegistry>,
) -> Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let files = files.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, addr, &files, &registry).await {
                warn!(%addr, %err, "connection failed");
            }
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    addr: SocketAddr,
    files: &FileSetService,
    registry: &NotifyRegistry,
) -> Result<()> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = ProtocolReader::new(BufReader::new(read_half));
    let mut writer = ProtocolWriter::new(write_half);

    loop {
        let message = match reader.read_message().await {
            Ok(message) => message,
            Err(err) => {
                debug!(%addr, %err, "connection closed");
                return Ok(());
            }
        };

        match message {
            Message::FileSetRequest(request) => {
                let sets = files.sets(&request.groups);
                let mut summary: Vec<String> = sets
                    .iter()
                    .map(|(group, vs)| format!("{group}:{}", vs.version))
                    .collect();
                summary.sort();
                info!(%addr, sets = summary.join(", "), "fileset request");
                writer
                    .send(&Message::FileSetResponse(FileSetResponse { sets }))
                    .await?;
            }
            Message::Subscribe(subscribe) => {
                return stream_session(reader, writer, subscribe, addr, registry).await;
            }
            other => {
                debug!(%addr, ?other, "unexpected message");
                writer
                    .send(&Message::Error("unexpected message".to_string()))
                    .await?;
            }
        }
    }
}

/// Run a subscribed stream until the client disconnects.
async fn stream_session<R, W>(
    mut reader: ProtocolReader<R>,
    mut writer: ProtocolWriter<W>,
    subscribe: Subscribe,
    addr: SocketAddr,
    registry: &NotifyRegistry,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let groups = subscribe.groups;
    let (tx, mut rx) = mpsc::channel(STREAM_QUEUE);
    let id = registry.next_stream_id();
    registry.register(id, &tx, &groups);
    info!(%addr, stream = id, groups = groups.join(", "), "stream registered");

    // Writer task owns the write half; queued notifications flow out
    // until the queue closes or a send fails.
    let write_task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            if writer
                .send(&Message::Notification(notification))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        match reader.read_message().await {
            Ok(Message::Report(report)) => {
                info!(
                    %addr,
                    serial = report.serial,
                    hardware_addr = report.hardware_addr,
                    location = report.location,
                    versions = ?report.versions,
                    "report"
                );
            }
            Ok(other) => debug!(%addr, ?other, "unexpected stream message"),
            Err(err) => {
                debug!(%addr, stream = id, %err, "stream closed");
                break;
            }
        }
    }

    registry.unregister(id, &groups);
    write_task.abort();
    info!(%addr, stream = id, "stream unregistered");
    Ok(())
}
