//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use ldapd::auth::{AuthError, Authenticator, Principal};
use ldapd::config::ListenerConfig;
use ldapd::net::{load_acceptor, Listener};
use ldapd::proto::{
    BindCredentials, Codec, CodecError, MessageId, OperationKind, OperationRequest, ProtocolOp,
    Request, Response, ResultCode, STARTTLS_OID,
};
use ldapd::server::{DirectoryServer, OperationHandler};
use ldapd::Shutdown;

pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=com";
pub const ADMIN_PASSWORD: &str = "secret";

/// Length-prefixed JSON framing, standing in for the production codec.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, src: &mut BytesMut) -> Result<Option<Request>, CodecError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if src.len() < 4 + len {
            return Ok(None);
        }
        src.advance(4);
        let frame = src.split_to(len);
        serde_json::from_slice(&frame)
            .map(Some)
            .map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn encode(&self, response: &Response, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body =
            serde_json::to_vec(response).map_err(|e| CodecError::Malformed(e.to_string()))?;
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

/// Handler that answers every operation immediately.
pub struct EchoHandler;

#[async_trait]
impl OperationHandler for EchoHandler {
    async fn handle(&self, request: Request, _cancel: CancellationToken) -> Option<Response> {
        Some(Response::result(request.message_id, ResultCode::Success, ""))
    }
}

/// Handler that parks until its operation is cancelled.
pub struct ParkedHandler;

#[async_trait]
impl OperationHandler for ParkedHandler {
    async fn handle(&self, _request: Request, cancel: CancellationToken) -> Option<Response> {
        cancel.cancelled().await;
        None
    }
}

/// Verifies one fixed credential pair; empty credentials bind anonymously.
pub struct StaticAuthenticator {
    pub name: String,
    pub password: String,
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self {
            name: ADMIN_DN.to_string(),
            password: ADMIN_PASSWORD.to_string(),
        }
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn verify(&self, credentials: &BindCredentials) -> Result<Principal, AuthError> {
        if credentials.name.is_empty() && credentials.password.is_empty() {
            return Ok(Principal::anonymous());
        }
        if credentials.name == self.name && credentials.password == self.password {
            Ok(Principal::authenticated(self.name.clone()))
        } else {
            Err(AuthError::InvalidCredentials {
                name: credentials.name.clone(),
            })
        }
    }
}

/// A server running on an ephemeral port for one test.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Arc<Shutdown>,
}

/// Start a server without TLS material.
pub async fn start_server(handler: Arc<dyn OperationHandler>) -> TestServer {
    start_server_inner(handler, false).await
}

/// Start a server with the fixture certificate, enabling STARTTLS.
pub async fn start_tls_server(handler: Arc<dyn OperationHandler>) -> TestServer {
    start_server_inner(handler, true).await
}

async fn start_server_inner(handler: Arc<dyn OperationHandler>, tls: bool) -> TestServer {
    let config = ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        max_connections: 16,
    };
    let listener = Listener::bind(&config).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut server = DirectoryServer::new(
        Arc::new(JsonCodec),
        Arc::new(StaticAuthenticator::default()),
        handler,
    );
    if tls {
        let acceptor = load_acceptor(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/server.crt").as_path(),
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/server.key").as_path(),
        )
        .unwrap();
        server = server.with_tls(acceptor);
    }

    let shutdown = Arc::new(Shutdown::new());
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });

    TestServer { addr, shutdown }
}

/// Build a TLS client connector that trusts the fixture certificate.
pub fn fixture_connector() -> tokio_rustls::TlsConnector {
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    let cert_file = std::fs::File::open(
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/server.crt"),
    )
    .unwrap();
    let mut reader = std::io::BufReader::new(cert_file);
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    tokio_rustls::TlsConnector::from(Arc::new(config))
}

/// Frame and send one request.
pub async fn send_request<S: tokio::io::AsyncWrite + Unpin>(stream: &mut S, request: &Request) {
    let body = serde_json::to_vec(request).unwrap();
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await.unwrap();
}

/// Read one framed response.
pub async fn read_response<S: tokio::io::AsyncRead + Unpin>(stream: &mut S) -> Response {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Connect a plain TCP client.
pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

pub fn search(id: u32) -> Request {
    Request {
        message_id: MessageId(id),
        op: ProtocolOp::Operation(OperationRequest {
            kind: OperationKind::Search,
            payload: Vec::new(),
        }),
    }
}

pub fn bind(id: u32, name: &str, password: &str) -> Request {
    Request {
        message_id: MessageId(id),
        op: ProtocolOp::Bind(BindCredentials {
            name: name.to_string(),
            password: password.to_string(),
        }),
    }
}

pub fn abandon(id: u32, target: u32) -> Request {
    Request {
        message_id: MessageId(id),
        op: ProtocolOp::Abandon {
            target: MessageId(target),
        },
    }
}

pub fn unbind(id: u32) -> Request {
    Request {
        message_id: MessageId(id),
        op: ProtocolOp::Unbind,
    }
}

pub fn starttls(id: u32) -> Request {
    Request {
        message_id: MessageId(id),
        op: ProtocolOp::Extended {
            oid: STARTTLS_OID.to_string(),
            value: None,
        },
    }
}
