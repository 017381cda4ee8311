//! C1: owns the single TCP connection to the Prodigy server and applies LF line
//! framing. One pending reply line is buffered at a time; there is no pipelining.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, instrument};

use crate::error::ProdigyError;

/// A connected Prodigy transport. `established`/`in_use` mirror the data model's
/// connection attributes; the broker consults `established` before issuing requests.
pub struct Transport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    host: String,
    port: u16,
    request_timeout: std::time::Duration,
    established: bool,
}

impl Transport {
    #[instrument(skip(connect_timeout, request_timeout))]
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: std::time::Duration,
        request_timeout: std::time::Duration,
    ) -> Result<Self, ProdigyError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProdigyError::ConnectionUnavailable {
                host: host.to_string(),
                port,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })?
            .map_err(|source| ProdigyError::ConnectionUnavailable {
                host: host.to_string(),
                port,
                source,
            })?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();
        debug!(%addr, "connected to Prodigy server");
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            host: host.to_string(),
            port,
            request_timeout,
            established: true,
        })
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Write one line (the caller supplies the rendered request without the LF)
    /// then read exactly one reply line, both under the configured timeout.
    #[instrument(skip(self, line), fields(host = %self.host, port = self.port))]
    pub async fn exchange_line(&mut self, line: &str) -> Result<String, ProdigyError> {
        let write_fut = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
            self.writer.flush().await
        };
        if timeout(self.request_timeout, write_fut).await.is_err() {
            self.established = false;
            return Err(ProdigyError::TransportTimeout(self.request_timeout));
        }

        let mut reply = String::new();
        let read_result = timeout(
            self.request_timeout,
            self.reader.read_line(&mut reply),
        )
        .await;

        match read_result {
            Err(_) => {
                self.established = false;
                Err(ProdigyError::TransportTimeout(self.request_timeout))
            }
            Ok(Err(source)) => {
                self.established = false;
                Err(ProdigyError::Io(source))
            }
            Ok(Ok(0)) => {
                self.established = false;
                Err(ProdigyError::TransportLost)
            }
            Ok(Ok(_)) => Ok(reply),
        }
    }
}
