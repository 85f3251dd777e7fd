//! Per-connection frame loop and operation dispatch.
//!
//! # Responsibilities
//! - Read frames under the connection's read discipline
//! - Decode requests and route them by operation kind
//! - Run the bind and STARTTLS sequences in place
//! - Spawn handler tasks for ordinary operations
//!
//! # Design Decisions
//! - Administrative operations (bind, STARTTLS) run inside the driver
//!   task: both must complete before the next frame is read
//! - Handler tasks remove their own slot on completion and write their
//!   response through the shared write region
//! - A codec error is unrecoverable; the connection is torn down rather
//!   than resynchronized

use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio_rustls::TlsAcceptor;

use crate::auth::{AuthError, Authenticator};
use crate::conn::{Connection, ConnectionError, StartTlsError};
use crate::observability::metrics;
use crate::proto::{
    BindCredentials, Codec, CodecError, MessageId, ProtocolOp, Request, Response, ResultCode,
    STARTTLS_OID,
};
use crate::server::OperationHandler;

/// Errors that terminate a connection's driver loop.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The connection failed or was cancelled.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The codec could not make sense of the inbound bytes.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Drives one connection: reads, decodes, dispatches, tears down.
pub struct ConnectionDriver<C> {
    conn: Arc<Connection>,
    codec: Arc<C>,
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn OperationHandler>,
    tls: Option<TlsAcceptor>,
    buf: BytesMut,
}

impl<C: Codec + 'static> ConnectionDriver<C> {
    /// Build a driver for one accepted connection.
    pub fn new(
        conn: Arc<Connection>,
        codec: Arc<C>,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn OperationHandler>,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            conn,
            codec,
            authenticator,
            handler,
            tls,
            buf: BytesMut::new(),
        }
    }

    /// Run the connection to completion and release its resources.
    pub async fn run(mut self) {
        match self.drive().await {
            Ok(()) => {
                tracing::debug!(connection_id = %self.conn.id(), "connection finished");
            }
            Err(DriverError::Connection(e)) if e.is_cancelled() => {
                tracing::debug!(connection_id = %self.conn.id(), "connection cancelled");
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.conn.id(), error = %e, "connection failed");
            }
        }
        self.conn.close();
        self.conn.dispose().await;
    }

    async fn drive(&mut self) -> Result<(), DriverError> {
        loop {
            let read = self.conn.read_frame(&mut self.buf).await?;
            if read == 0 {
                tracing::debug!(connection_id = %self.conn.id(), "peer closed transport");
                return Ok(());
            }

            loop {
                let request = match self.codec.decode(&mut self.buf) {
                    Ok(Some(request)) => request,
                    Ok(None) => break,
                    Err(e) => {
                        // Best effort: tell the peer why before tearing down.
                        let notice = Response::disconnection_notice(
                            ResultCode::ProtocolError,
                            "malformed frame",
                        );
                        let _ = self.send(&notice).await;
                        return Err(e.into());
                    }
                };
                if !self.dispatch(request).await? {
                    return Ok(());
                }
            }

            self.conn.resume_reading();
        }
    }

    /// Route one request. Returns `false` when the connection should end.
    async fn dispatch(&self, request: Request) -> Result<bool, DriverError> {
        let id = request.message_id;
        match request.op {
            ProtocolOp::Unbind => {
                tracing::debug!(connection_id = %self.conn.id(), "unbind received");
                self.conn.close();
                Ok(false)
            }
            ProtocolOp::Abandon { target } => {
                // No response owed, whether or not the target was pending.
                if self.conn.abandon(target) {
                    metrics::record_abandoned();
                }
                Ok(true)
            }
            ProtocolOp::Bind(credentials) => {
                self.handle_bind(id, credentials).await?;
                Ok(true)
            }
            ProtocolOp::Extended { ref oid, .. } if oid == STARTTLS_OID => {
                self.handle_starttls(id).await?;
                Ok(true)
            }
            ProtocolOp::Extended { ref oid, .. } => {
                tracing::debug!(connection_id = %self.conn.id(), oid = %oid, "unsupported extended operation");
                self.send(&Response::result(
                    id,
                    ResultCode::ProtocolError,
                    "unsupported extended operation",
                ))
                .await?;
                Ok(true)
            }
            ProtocolOp::Operation(_) => {
                self.handle_operation(request).await?;
                Ok(true)
            }
        }
    }

    async fn handle_bind(
        &self,
        id: MessageId,
        credentials: BindCredentials,
    ) -> Result<(), DriverError> {
        let Some(_token) = self.conn.try_admit(id).await? else {
            return self.reject_duplicate(id).await;
        };

        let outcome = self.run_bind(id, &credentials).await;
        self.conn.remove(id);
        let response = outcome?;
        self.send(&response).await
    }

    async fn run_bind(
        &self,
        id: MessageId,
        credentials: &BindCredentials,
    ) -> Result<Response, DriverError> {
        let guard = self.conn.begin_bind(id).await?;

        match self.authenticator.verify(credentials).await {
            Ok(principal) => {
                metrics::record_bind("success");
                guard.commit(principal);
                Ok(Response::result(id, ResultCode::Success, ""))
            }
            Err(AuthError::InvalidCredentials { name }) => {
                metrics::record_bind("invalid_credentials");
                tracing::info!(
                    connection_id = %self.conn.id(),
                    name = %name,
                    "bind rejected"
                );
                drop(guard);
                Ok(Response::result(
                    id,
                    ResultCode::InvalidCredentials,
                    "invalid credentials",
                ))
            }
            Err(AuthError::Unavailable(reason)) => {
                metrics::record_bind("unavailable");
                tracing::warn!(
                    connection_id = %self.conn.id(),
                    reason = %reason,
                    "identity service unavailable"
                );
                drop(guard);
                Ok(Response::result(
                    id,
                    ResultCode::Unavailable,
                    "identity service unavailable",
                ))
            }
        }
    }

    async fn handle_starttls(&self, id: MessageId) -> Result<(), DriverError> {
        let Some(acceptor) = self.tls.clone() else {
            self.send(&Response::extended(
                id,
                ResultCode::Unavailable,
                STARTTLS_OID,
                "TLS is not configured",
            ))
            .await?;
            return Ok(());
        };

        let Some(_token) = self.conn.try_admit(id).await? else {
            return self.reject_duplicate(id).await;
        };

        let outcome = self.run_starttls(id, &acceptor).await;
        self.conn.remove(id);
        outcome
    }

    async fn run_starttls(&self, id: MessageId, acceptor: &TlsAcceptor) -> Result<(), DriverError> {
        let upgrade = match self.conn.begin_tls_upgrade(id).await {
            Ok(upgrade) => upgrade,
            Err(err @ (StartTlsError::AlreadySecured | StartTlsError::OperationsPending)) => {
                metrics::record_tls_upgrade("rejected");
                tracing::debug!(connection_id = %self.conn.id(), reason = %err, "STARTTLS rejected");
                return self
                    .send(&Response::extended(
                        id,
                        ResultCode::OperationsError,
                        STARTTLS_OID,
                        err.to_string(),
                    ))
                    .await;
            }
            Err(StartTlsError::Connection(e)) => return Err(e.into()),
        };

        // The acceptance must reach the client in plaintext, before the
        // handshake consumes the stream.
        self.send(&Response::extended(id, ResultCode::Success, STARTTLS_OID, ""))
            .await?;

        match upgrade.perform(acceptor).await {
            Ok(()) => {
                metrics::record_tls_upgrade("secured");
                Ok(())
            }
            Err(e) => {
                metrics::record_tls_upgrade("failed");
                // Transport state is indeterminate; tear the connection down.
                Err(e.into())
            }
        }
    }

    async fn handle_operation(&self, request: Request) -> Result<(), DriverError> {
        let id = request.message_id;
        let Some(token) = self.conn.try_admit(id).await? else {
            return self.reject_duplicate(id).await;
        };

        if let ProtocolOp::Operation(ref op) = request.op {
            metrics::record_operation(op.kind.as_str());
        }

        let conn = Arc::clone(&self.conn);
        let codec = Arc::clone(&self.codec);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            let response = handler.handle(request, token.clone()).await;
            if let Some(response) = response {
                if !token.is_cancelled() {
                    if let Err(e) = send_response(&conn, codec.as_ref(), &response).await {
                        tracing::debug!(
                            connection_id = %conn.id(),
                            message_id = %id,
                            error = %e,
                            "failed to write response"
                        );
                    }
                }
            }
            conn.remove(id);
        });
        Ok(())
    }

    async fn reject_duplicate(&self, id: MessageId) -> Result<(), DriverError> {
        tracing::warn!(
            connection_id = %self.conn.id(),
            message_id = %id,
            "duplicate message id rejected"
        );
        self.send(&Response::result(
            id,
            ResultCode::ProtocolError,
            "duplicate message id",
        ))
        .await
    }

    async fn send(&self, response: &Response) -> Result<(), DriverError> {
        send_response(&self.conn, self.codec.as_ref(), response).await
    }
}

/// Encode one response and write it under the connection's write region.
async fn send_response<C: Codec + ?Sized>(
    conn: &Connection,
    codec: &C,
    response: &Response,
) -> Result<(), DriverError> {
    let mut frame = BytesMut::new();
    codec.encode(response, &mut frame)?;
    conn.write_frame(&frame).await?;
    Ok(())
}
