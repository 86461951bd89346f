//! Rendering inbound streamed updates into external records.
//!
//! A [`Record`] is one self-describing unit: the rendered notification tree,
//! its timestamp, and whether it was an update, a delete, or a stream
//! synchronization marker. Records leave the process through an [`Egress`]
//! (append to a local JSON-lines log, or one datagram/write per record over
//! UDP/TCP) driven by a background task, so a response handler only ever does
//! a non-blocking channel send. There is no partial-record buffering: each
//! emit is one complete line or datagram.

use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;

/// What an inbound streamed message meant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Update,
    Delete,
    Sync,
}

/// One rendered notification, independent and self-describing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub notification: serde_json::Value,
    pub timestamp: i64,
    pub update_type: UpdateType,
}

/// Where rendered records leave the process.
pub enum Egress {
    /// Append one JSON line per record to a local file.
    Log(File),
    /// One datagram per record.
    Udp { socket: UdpSocket, target: SocketAddr },
    /// One write per record, newline-delimited.
    Tcp(TcpStream),
}

impl Egress {
    pub async fn log(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::Log(file))
    }

    pub async fn udp(target: SocketAddr) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self::Udp { socket, target })
    }

    pub async fn tcp(target: SocketAddr) -> io::Result<Self> {
        Ok(Self::Tcp(TcpStream::connect(target).await?))
    }

    async fn emit(&mut self, record: &Record) -> io::Result<()> {
        let mut line = serde_json::to_string(record).map_err(io::Error::other)?;
        line.push('\n');
        match self {
            Self::Log(file) => {
                file.write_all(line.as_bytes()).await?;
                file.flush().await
            }
            Self::Udp { socket, target } => {
                socket.send_to(line.as_bytes(), *target).await?;
                Ok(())
            }
            Self::Tcp(stream) => {
                stream.write_all(line.as_bytes()).await?;
                stream.flush().await
            }
        }
    }
}

/// Background consumer turning forwarded records into egress writes.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<Record>,
}

impl NotificationSink {
    /// Spawns the egress task and returns the sink handle feeding it.
    pub fn spawn(mut egress: Egress) -> Self {
        let (tx, mut rx) = mpsc::channel::<Record>(256);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = egress.emit(&record).await {
                    tracing::warn!("notification egress failed: {e}");
                }
            }
        });
        Self { tx }
    }

    /// Hands one record to the egress task without blocking. A full or
    /// closed sink drops the record and logs it; telemetry is lossy before
    /// it is back-pressuring the receive loop.
    pub fn forward(&self, record: Record) {
        if let Err(e) = self.tx.try_send(record) {
            tracing::warn!("dropping notification: {e}");
        }
    }

    /// Builds a response handler forwarding every inbound message through
    /// `render` into this sink.
    pub fn handler<Resp, F>(&self, render: F) -> crate::ResponseHandler<Resp>
    where
        Resp: Send + 'static,
        F: Fn(&Resp) -> Record + Send + 'static,
    {
        let tx = self.tx.clone();
        Box::new(move |resp| {
            if let Err(e) = tx.try_send(render(&resp)) {
                tracing::warn!("dropping notification: {e}");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn record(n: u64) -> Record {
        Record {
            notification: json!({ "seq": n }),
            timestamp: 1_700_000_000 + n as i64,
            update_type: UpdateType::Update,
        }
    }

    #[test]
    fn records_serialize_flat_and_lowercase() {
        let line = serde_json::to_string(&Record {
            notification: json!({ "port": { "id": "1" } }),
            timestamp: 42,
            update_type: UpdateType::Sync,
        })
        .expect("record serializes");
        assert_eq!(
            line,
            r#"{"notification":{"port":{"id":"1"}},"timestamp":42,"update_type":"sync"}"#
        );
    }

    #[tokio::test]
    async fn log_egress_appends_one_line_per_record() {
        let path = std::env::temp_dir().join(format!("grpcsh-sink-{}.log", std::process::id()));
        let _ = tokio::fs::remove_file(&path).await;

        let sink = NotificationSink::spawn(Egress::log(&path).await.expect("open log"));
        sink.forward(record(1));
        sink.forward(record(2));

        // The egress task is asynchronous; poll until both lines landed.
        let mut contents = String::new();
        for _ in 0..100 {
            contents = tokio::fs::read_to_string(&path).await.unwrap_or_default();
            if contents.lines().count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(r#""seq":1"#));
        assert!(lines[1].contains(r#""seq":2"#));
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn tcp_egress_sends_self_contained_records() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");

        let accept = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.expect("accept");
            let mut buf = String::new();
            conn.read_to_string(&mut buf).await.expect("read");
            buf
        });

        {
            let sink = NotificationSink::spawn(Egress::tcp(addr).await.expect("connect"));
            sink.forward(record(7));
            // Dropping the sink closes the channel and ends the egress task,
            // closing the connection once the record is flushed.
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let buf = tokio::time::timeout(Duration::from_secs(2), accept)
            .await
            .expect("reader finishes")
            .expect("no panic");
        assert!(buf.contains(r#""seq":7"#));
        assert!(buf.ends_with('\n'));
    }
}
