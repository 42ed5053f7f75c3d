//! QUIC request surface exposed to the workload orchestrator.
//!
//! Accepts connections, decodes one [`CsiMessage`] request per bi-stream,
//! dispatches it to the [`ControllerService`], and answers with the
//! corresponding response variant.  Errors travel as
//! [`CsiMessage::Error`] carrying the status code mapping of
//! [`crate::error::Code`].

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::CONFIG;
use crate::controller::ControllerService;
use crate::error::ControllerError;
use crate::message::CsiMessage;

/// A controller server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to a [`ControllerService`].
pub struct CsiServer {
    endpoint: quinn::Endpoint,
    controller: Arc<ControllerService>,
}

impl CsiServer {
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        controller: Arc<ControllerService>,
    ) -> Result<Self, ControllerError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| ControllerError::Transport(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint =
            quinn::Endpoint::server(server_config, addr).map_err(ControllerError::transport)?;
        info!(%addr, "controller QUIC server listening");
        Ok(Self {
            endpoint,
            controller,
        })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection gets a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), ControllerError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let controller = Arc::clone(&self.controller);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "connection accepted");
                        if let Err(e) = Self::handle_connection(conn, controller).await {
                            warn!(%remote, error = %e, "connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "incoming connection failed");
                    }
                }
            });
        }
        Ok(())
    }

    /// Handle all bi-streams on a single connection.
    async fn handle_connection(
        conn: quinn::Connection,
        controller: Arc<ControllerService>,
    ) -> Result<(), ControllerError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(quinn::ConnectionError::ApplicationClosed(_)) => return Ok(()),
                Err(e) => return Err(ControllerError::transport(e)),
            };

            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &controller).await {
                    error!(error = %e, "stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request, dispatch, write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        controller: &ControllerService,
    ) -> Result<(), ControllerError> {
        let buf = recv
            .read_to_end(16 * 1024 * 1024)
            .await
            .map_err(ControllerError::transport)?;

        let response = match serde_json::from_slice::<CsiMessage>(&buf) {
            Ok(request) => {
                debug!(%request, "request received");
                Self::dispatch(controller, request).await
            }
            Err(e) => CsiMessage::Error(ControllerError::InvalidArgument(format!(
                "malformed request: {e}"
            ))),
        };

        let payload = serde_json::to_vec(&response).map_err(ControllerError::internal)?;
        send.write_all(&payload)
            .await
            .map_err(ControllerError::transport)?;
        send.finish().map_err(ControllerError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the controller call and wrap the
    /// result in a response [`CsiMessage`].
    async fn dispatch(controller: &ControllerService, request: CsiMessage) -> CsiMessage {
        match request {
            CsiMessage::CreateVolume(req) => {
                let deadline = Instant::now() + CONFIG.create_wait_timeout;
                match controller.create_volume(req, deadline).await {
                    Ok(volume) => CsiMessage::VolumeCreated(volume),
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::DeleteVolume { volume_id } => {
                match controller.delete_volume(&volume_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::PublishVolume { volume_id, node_id } => {
                match controller.publish_volume(&volume_id, &node_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::UnpublishVolume { volume_id, node_id } => {
                match controller.unpublish_volume(&volume_id, &node_id).await {
                    Ok(()) => CsiMessage::Ok,
                    Err(e) => CsiMessage::Error(e),
                }
            }
            CsiMessage::GetCapabilities => {
                CsiMessage::Capabilities(ControllerService::capabilities())
            }

            CsiMessage::ValidateVolumeCapabilities { .. } => {
                unimplemented_response("ValidateVolumeCapabilities")
            }
            CsiMessage::ListVolumes => unimplemented_response("ListVolumes"),
            CsiMessage::GetCapacity => unimplemented_response("GetCapacity"),
            CsiMessage::CreateSnapshot { .. } => unimplemented_response("CreateSnapshot"),
            CsiMessage::DeleteSnapshot { .. } => unimplemented_response("DeleteSnapshot"),
            CsiMessage::ListSnapshots => unimplemented_response("ListSnapshots"),
            CsiMessage::ExpandVolume { .. } => unimplemented_response("ExpandVolume"),

            // Response variants should never arrive as requests.
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(ControllerError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }

    /// Return a reference to the underlying QUIC endpoint, useful for
    /// obtaining the local address or shutting down.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

fn unimplemented_response(surface: &str) -> CsiMessage {
    CsiMessage::Error(ControllerError::Unimplemented(surface.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Code;
    use crate::registry::AgentRegistry;
    use crate::store::{MemoryStore, StoreGateway};
    use std::collections::HashMap;

    fn controller() -> Arc<ControllerService> {
        let gateway = StoreGateway::new(Arc::new(MemoryStore::new()), "test-ns");
        Arc::new(ControllerService::new(
            gateway,
            AgentRegistry::from_clients(HashMap::new()),
        ))
    }

    #[tokio::test]
    async fn capabilities_are_fixed() {
        let ctl = controller();
        match CsiServer::dispatch(&ctl, CsiMessage::GetCapabilities).await {
            CsiMessage::Capabilities(caps) => assert_eq!(caps.len(), 2),
            other => panic!("unexpected response: {other}"),
        }
    }

    #[tokio::test]
    async fn publish_and_unpublish_return_empty_success() {
        let ctl = controller();
        let publish = CsiMessage::PublishVolume {
            volume_id: "v1".into(),
            node_id: "node-1".into(),
        };
        assert!(matches!(
            CsiServer::dispatch(&ctl, publish).await,
            CsiMessage::Ok
        ));

        let unpublish = CsiMessage::UnpublishVolume {
            volume_id: "v1".into(),
            node_id: "node-1".into(),
        };
        assert!(matches!(
            CsiServer::dispatch(&ctl, unpublish).await,
            CsiMessage::Ok
        ));
    }

    #[tokio::test]
    async fn out_of_scope_surfaces_answer_unimplemented() {
        let ctl = controller();
        let surfaces = [
            CsiMessage::ValidateVolumeCapabilities {
                volume_id: "v1".into(),
                capabilities: Vec::new(),
            },
            CsiMessage::ListVolumes,
            CsiMessage::GetCapacity,
            CsiMessage::CreateSnapshot {
                name: "s1".into(),
                source_volume_id: "v1".into(),
            },
            CsiMessage::DeleteSnapshot {
                snapshot_id: "s1".into(),
            },
            CsiMessage::ListSnapshots,
            CsiMessage::ExpandVolume {
                volume_id: "v1".into(),
                required_bytes: 1024,
            },
        ];

        for request in surfaces {
            match CsiServer::dispatch(&ctl, request).await {
                CsiMessage::Error(e) => assert_eq!(e.code(), Code::Unimplemented),
                other => panic!("unexpected response: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn response_variant_as_request_is_rejected() {
        let ctl = controller();
        match CsiServer::dispatch(&ctl, CsiMessage::Ok).await {
            CsiMessage::Error(e) => assert_eq!(e.code(), Code::InvalidArgument),
            other => panic!("unexpected response: {other}"),
        }
    }
}
