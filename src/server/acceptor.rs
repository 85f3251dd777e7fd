//! Accept loop wiring listeners to connection drivers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::auth::Authenticator;
use crate::conn::Connection;
use crate::net::{Listener, ListenerError};
use crate::observability::metrics;
use crate::proto::Codec;
use crate::server::{ConnectionDriver, OperationHandler};

/// The directory server: accepts connections and runs one driver task
/// per session until shutdown is signalled.
pub struct DirectoryServer<C> {
    codec: Arc<C>,
    authenticator: Arc<dyn Authenticator>,
    handler: Arc<dyn OperationHandler>,
    tls: Option<TlsAcceptor>,
}

impl<C: Codec + 'static> DirectoryServer<C> {
    /// Assemble a server from its collaborator seams.
    pub fn new(
        codec: Arc<C>,
        authenticator: Arc<dyn Authenticator>,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            codec,
            authenticator,
            handler,
            tls: None,
        }
    }

    /// Enable STARTTLS upgrades with the given acceptor.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Accept and serve connections until the shutdown signal fires.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            starttls = self.tls.is_some(),
            "directory server starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => {
                    let (stream, peer_addr, permit) = accepted?;
                    let conn = Arc::new(Connection::new(stream));
                    tracing::debug!(
                        connection_id = %conn.id(),
                        peer_addr = %peer_addr,
                        "session started"
                    );
                    metrics::record_connection_opened();

                    let driver = ConnectionDriver::new(
                        Arc::clone(&conn),
                        Arc::clone(&self.codec),
                        Arc::clone(&self.authenticator),
                        Arc::clone(&self.handler),
                        self.tls.clone(),
                    );
                    tokio::spawn(async move {
                        driver.run().await;
                        metrics::record_connection_closed();
                        drop(permit);
                    });
                }
            }
        }

        tracing::info!("directory server stopped accepting");
        Ok(())
    }
}
