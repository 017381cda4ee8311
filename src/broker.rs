//! C3: the Request Broker. Allocates request IDs, serializes every request/reply
//! exchange behind a single mutex (the server accepts exactly one in-flight request
//! per connection), and classifies replies into a typed outcome or error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::error::ProdigyError;
use crate::protocol::{parse_reply, Reply, ReplyStatus, Request, RequestId, Transport, Value};

/// A live outcome map from a successful exchange.
pub type Outcome = BTreeMap<String, Value>;

/// Hardware-agnostic request/reply primitive. A single `exchange` call covers the
/// whole write-then-read-then-correlate sequence; higher components (C4-C7) build
/// on top of it rather than touching the transport directly.
#[async_trait::async_trait]
pub trait ProdigyEndpoint: Send + Sync {
    async fn exchange(&self, command: &str, args: Vec<(String, Value)>) -> Result<Outcome, ProdigyError>;
}

/// Owns the connection mutex and the monotonic request-id counter.
pub struct Broker {
    transport: Mutex<Option<Transport>>,
    next_id: AtomicU16,
}

impl Broker {
    pub fn new(transport: Transport) -> Arc<Self> {
        Arc::new(Self {
            transport: Mutex::new(Some(transport)),
            next_id: AtomicU16::new(0),
        })
    }

    pub async fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .await
            .as_ref()
            .map(Transport::is_established)
            .unwrap_or(false)
    }

    async fn replace_transport(&self, transport: Transport) {
        *self.transport.lock().await = Some(transport);
    }

    /// Mark the connection broken. Callers that detect a transport failure use this
    /// to force an explicit reconnect instead of silently retrying.
    pub async fn invalidate(&self) {
        *self.transport.lock().await = None;
    }

    pub async fn reconnect(
        &self,
        host: &str,
        port: u16,
        connect_timeout: std::time::Duration,
        request_timeout: std::time::Duration,
    ) -> Result<(), ProdigyError> {
        let transport = Transport::connect(host, port, connect_timeout, request_timeout).await?;
        self.replace_transport(transport).await;
        Ok(())
    }

    fn allocate_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait::async_trait]
impl ProdigyEndpoint for Broker {
    #[instrument(skip(self, args), fields(command = %command))]
    async fn exchange(&self, command: &str, args: Vec<(String, Value)>) -> Result<Outcome, ProdigyError> {
        let id = self.allocate_id();
        let request = Request {
            id,
            command: command.to_string(),
            args,
        };
        let line = request.render();

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ProdigyError::TransportLost)?;

        let raw_reply = match transport.exchange_line(&line).await {
            Ok(raw) => raw,
            Err(err) => {
                drop(guard);
                self.invalidate().await;
                return Err(err);
            }
        };
        drop(guard);

        let reply: Reply = parse_reply(&raw_reply)?;
        if reply.id != id {
            warn!(expected = %id, got = %reply.id, "discarding stale reply");
            return Err(ProdigyError::ProtocolMismatchedId {
                expected: id.to_string(),
                got: reply.id.to_string(),
            });
        }

        match reply.status {
            ReplyStatus::Ok(map) => Ok(map),
            ReplyStatus::Error { code, message } => {
                Err(ProdigyError::ProtocolServerError { code, message })
            }
        }
    }
}

/// Issue `Connect` (§6) and parse the handshake reply: `ServerName` plus
/// `ProtocolVersion:<major>.<minor>`. Only major version 1 is supported; a newer
/// or older major version is refused rather than risked against an incompatible
/// command set.
pub async fn connect(endpoint: &dyn ProdigyEndpoint) -> Result<(String, (u32, u32)), ProdigyError> {
    let outcome = endpoint.exchange("Connect", vec![]).await?;
    let server_name = outcome
        .get("ServerName")
        .map(Value::as_str)
        .unwrap_or_default();
    let version_raw = outcome
        .get("ProtocolVersion")
        .map(Value::as_str)
        .unwrap_or_default();
    let (major, minor) = parse_protocol_version(&version_raw)?;
    if major != 1 {
        return Err(ProdigyError::ProtocolVersionMismatch { major, minor });
    }
    Ok((server_name, (major, minor)))
}

/// Issue `Disconnect` (§6), releasing the session cleanly.
pub async fn disconnect(endpoint: &dyn ProdigyEndpoint) -> Result<(), ProdigyError> {
    endpoint.exchange("Disconnect", vec![]).await.map(|_| ())
}

fn parse_protocol_version(raw: &str) -> Result<(u32, u32), ProdigyError> {
    let (major_str, minor_str) = raw
        .split_once('.')
        .ok_or_else(|| ProdigyError::ProtocolFraming(format!("malformed ProtocolVersion {raw:?}")))?;
    let major = major_str
        .parse()
        .map_err(|_| ProdigyError::ProtocolFraming(format!("malformed ProtocolVersion {raw:?}")))?;
    let minor = minor_str
        .parse()
        .map_err(|_| ProdigyError::ProtocolFraming(format!("malformed ProtocolVersion {raw:?}")))?;
    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock_server::MockProdigyServer;

    #[tokio::test]
    async fn test_exchange_roundtrip() {
        let server = MockProdigyServer::start(vec![("Ping".to_string(), "OK".to_string())]).await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        let outcome = broker.exchange("Ping", vec![]).await.unwrap();
        assert!(outcome.is_empty());
    }

    #[tokio::test]
    async fn test_exchange_surfaces_server_error() {
        let server = MockProdigyServer::start(vec![(
            "Bogus".to_string(),
            "Error: 101 \"unknown command\"".to_string(),
        )])
        .await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        let err = broker.exchange("Bogus", vec![]).await.unwrap_err();
        match err {
            ProdigyError::ProtocolServerError { code, message } => {
                assert_eq!(code, 101);
                assert_eq!(message, "unknown command");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_parses_server_name_and_version() {
        let server = MockProdigyServer::start(vec![(
            "Connect".to_string(),
            "OK: ServerName:\"Prodigy\" ProtocolVersion:1.22".to_string(),
        )])
        .await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        let (server_name, version) = connect(broker.as_ref()).await.unwrap();
        assert_eq!(server_name, "Prodigy");
        assert_eq!(version, (1, 22));
    }

    #[tokio::test]
    async fn test_connect_rejects_unsupported_major_version() {
        let server = MockProdigyServer::start(vec![(
            "Connect".to_string(),
            "OK: ServerName:\"Prodigy\" ProtocolVersion:2.0".to_string(),
        )])
        .await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        let err = connect(broker.as_ref()).await.unwrap_err();
        assert!(matches!(
            err,
            ProdigyError::ProtocolVersionMismatch { major: 2, minor: 0 }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_roundtrip() {
        let server = MockProdigyServer::start(vec![("Disconnect".to_string(), "OK".to_string())]).await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        disconnect(broker.as_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ids_increment_sequentially() {
        let server = MockProdigyServer::start(vec![
            ("Ping".to_string(), "OK".to_string()),
            ("Ping".to_string(), "OK".to_string()),
        ])
        .await;
        let transport = Transport::connect(
            "127.0.0.1",
            server.port(),
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )
        .await
        .unwrap();
        let broker = Broker::new(transport);
        broker.exchange("Ping", vec![]).await.unwrap();
        broker.exchange("Ping", vec![]).await.unwrap();
        assert_eq!(broker.next_id.load(Ordering::SeqCst), 2);
    }
}
