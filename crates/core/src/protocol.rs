//! Framed wire protocol shared by server and client
//!
//! Frame format (integers big-endian):
//!
//! ```text
//! +--------+--------+------------------+
//! | type   | length | JSON payload     |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Message types:
//! - 0x01: FileSetRequest (groups), the request/response channel
//! - 0x02: FileSetResponse (group → versioned set)
//! - 0x03: Subscribe (groups), stream metadata sent once at connect
//! - 0x04: Report (client → server status)
//! - 0x05: Notification (server → client version change)
//! - 0x06: Error (message)

use std::collections::HashMap;

use color_eyre::Result;
use color_eyre::eyre::{bail, eyre};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::set::VersionedSet;

/// Message type identifiers
pub mod msg {
    pub const FILESET_REQ: u8 = 0x01;
    pub const FILESET_RESP: u8 = 0x02;
    pub const SUBSCRIBE: u8 = 0x03;
    pub const REPORT: u8 = 0x04;
    pub const NOTIFICATION: u8 = 0x05;
    pub const ERROR: u8 = 0x06;
}

/// Upper bound on a frame payload; a peer claiming more is broken.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Request the current versioned sets for the named groups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSetRequest {
    pub groups: Vec<String>,
}

/// Response: requested groups that exist, with their sets and versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSetResponse {
    pub sets: HashMap<String, VersionedSet>,
}

/// Stream metadata: which groups this stream wants notifications for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribe {
    pub groups: Vec<String>,
}

/// Periodic client status report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub serial: String,
    pub hardware_addr: String,
    pub location: String,
    /// group → last fully synced version
    pub versions: HashMap<String, u64>,
}

/// Server push: a group's version changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub group: String,
    pub version: u64,
}

/// Any protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    FileSetRequest(FileSetRequest),
    FileSetResponse(FileSetResponse),
    Subscribe(Subscribe),
    Report(Report),
    Notification(Notification),
    Error(String),
}

/// Protocol writer for sending messages
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    async fn write_frame(&mut self, msg_type: u8, payload: &[u8]) -> Result<()> {
        self.inner.write_all(&[msg_type]).await?;
        self.inner
            .write_all(&u32::try_from(payload.len())?.to_be_bytes())
            .await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send any message
    ///
    /// # Errors
    /// Returns an error if serialization or the underlying write fails.
    pub async fn send(&mut self, message: &Message) -> Result<()> {
        let (msg_type, payload) = match message {
            Message::FileSetRequest(m) => (msg::FILESET_REQ, serde_json::to_vec(m)?),
            Message::FileSetResponse(m) => (msg::FILESET_RESP, serde_json::to_vec(m)?),
            Message::Subscribe(m) => (msg::SUBSCRIBE, serde_json::to_vec(m)?),
            Message::Report(m) => (msg::REPORT, serde_json::to_vec(m)?),
            Message::Notification(m) => (msg::NOTIFICATION, serde_json::to_vec(m)?),
            Message::Error(m) => (msg::ERROR, serde_json::to_vec(m)?),
        };
        self.write_frame(msg_type, &payload).await
    }
}

/// Protocol reader for receiving messages
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read the next message.
    ///
    /// # Errors
    /// Returns an error on EOF, a malformed frame, or an unknown
    /// message type.
    pub async fn read_message(&mut self) -> Result<Message> {
        let mut type_buf = [0u8; 1];
        self.inner.read_exact(&mut type_buf).await?;
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            bail!("frame of {len} bytes exceeds maximum");
        }

        let mut payload = vec![0u8; len as usize];
        self.inner.read_exact(&mut payload).await?;

        match type_buf[0] {
            msg::FILESET_REQ => Ok(Message::FileSetRequest(serde_json::from_slice(&payload)?)),
            msg::FILESET_RESP => Ok(Message::FileSetResponse(serde_json::from_slice(&payload)?)),
            msg::SUBSCRIBE => Ok(Message::Subscribe(serde_json::from_slice(&payload)?)),
            msg::REPORT => Ok(Message::Report(serde_json::from_slice(&payload)?)),
            msg::NOTIFICATION => Ok(Message::Notification(serde_json::from_slice(&payload)?)),
            msg::ERROR => Ok(Message::Error(serde_json::from_slice(&payload)?)),
            other => Err(eyre!("unknown message type: {other:#04x}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::set::FileSet;
    use std::path::PathBuf;

    async fn roundtrip(message: Message) {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let mut writer = ProtocolWriter::new(client);
        let mut reader = ProtocolReader::new(server);

        writer.send(&message).await.unwrap();
        let received = reader.read_message().await.unwrap();
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn test_fileset_request_roundtrip() {
        roundtrip(Message::FileSetRequest(FileSetRequest {
            groups: vec!["all".into(), "lab".into()],
        }))
        .await;
    }

    #[tokio::test]
    async fn test_fileset_response_roundtrip() {
        let mut set = FileSet::new();
        set.insert(ContentHash::from_raw(42), PathBuf::from("/dst/x"));
        let mut sets = HashMap::new();
        sets.insert("all".to_string(), VersionedSet::from_set(set));
        roundtrip(Message::FileSetResponse(FileSetResponse { sets })).await;
    }

    #[tokio::test]
    async fn test_stream_messages_roundtrip() {
        roundtrip(Message::Subscribe(Subscribe {
            groups: vec!["all".into()],
        }))
        .await;
        roundtrip(Message::Report(Report {
            serial: "12345".into(),
            hardware_addr: "aa:bb:cc:dd:ee:ff".into(),
            location: "lab-3".into(),
            versions: HashMap::from([("all".to_string(), 7u64)]),
        }))
        .await;
        roundtrip(Message::Notification(Notification {
            group: "all".into(),
            version: 9,
        }))
        .await;
        roundtrip(Message::Error("boom".into())).await;
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = ProtocolReader::new(server);

        let mut client = client;
        let mut header = vec![msg::REPORT];
        header.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
        tokio::io::AsyncWriteExt::write_all(&mut client, &header)
            .await
            .unwrap();

        assert!(reader.read_message().await.is_err());
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let mut reader = ProtocolReader::new(server);
        assert!(reader.read_message().await.is_err());
    }
}
