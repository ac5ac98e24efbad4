//! Live event stream to the server
//!
//! A long-lived TCP connection: one `Subscribe` up front, periodic
//! status reports upstream, version change notifications downstream.
//! Each notification just nudges the poll loop to check immediately.
//! Lost connections are retried forever with a jittered delay.

use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use skiff_core::protocol::{Report, Subscribe};
use skiff_core::{Message, ProtocolReader, ProtocolWriter};

use crate::config::Config;
use crate::interval::jittered;
use crate::sync::FileSync;

const RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Keep an event stream alive forever, reconnecting after failures.
pub async fn run_event_stream(
    config: &Config,
    sync: &Arc<FileSync>,
    scan_tx: mpsc::Sender<()>,
) -> Result<()> {
    loop {
        match stream_session(config, sync, &scan_tx).await {
            Ok(()) => debug!("event stream closed"),
            Err(err) => warn!(%err, "event stream failed"),
        }
        tokio::time::sleep(jittered(RECONNECT_DELAY)).await;
    }
}

/// One connection's lifetime: subscribe, report, receive.
async fn stream_session(
    config: &Config,
    sync: &Arc<FileSync>,
    scan_tx: &mpsc::Sender<()>,
) -> Result<()> {
    let socket = TcpStream::connect(&config.rpc_server)
        .await
        .wrap_err_with(|| format!("connecting to {}", config.rpc_server))?;
    let (read_half, write_half) = socket.into_split();
    let mut reader = ProtocolReader::new(read_half);
    let mut writer = ProtocolWriter::new(write_half);

    writer
        .send(&Message::Subscribe(Subscribe {
            groups: config.groups.clone(),
        }))
        .await?;
    info!(server = config.rpc_server, "subscribed");

    // Report task owns the write half for the rest of the session.
    let report_task = tokio::spawn({
        let sync = sync.clone();
        let serial = config.serial.clone();
        let hardware_addr = config.hardware_addr.clone();
        let location = config.location.clone();
        let interval = Duration::from_secs(config.report_interval_secs);
        async move {
            loop {
                let report = Report {
                    serial: serial.clone(),
                    hardware_addr: hardware_addr.clone(),
                    location: location.clone(),
                    versions: sync.versions(),
                };
                if writer.send(&Message::Report(report)).await.is_err() {
                    break;
                }
                tokio::time::sleep(jittered(interval)).await;
            }
        }
    });

    let result = loop {
        match reader.read_message().await {
            Ok(Message::Notification(notification)) => {
                info!(
                    group = notification.group,
                    version = notification.version,
                    "version changed"
                );
                if scan_tx.send(()).await.is_err() {
                    break Ok(());
                }
            }
            Ok(other) => debug!(?other, "unexpected stream message"),
            Err(err) => break Err(err),
        }
    };

    report_task.abort();
    result
}
