//! Provisioning operations against the panel.
//!
//! Every operation runs under [`ProvisioningGateway::with_session`]: if the
//! panel rejects the session, the session is invalidated and the operation
//! is attempted exactly once more with a fresh login. Nothing else is
//! retried, so an ambiguous failure never provisions twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use super::{
    ClientDirectory, ClientInfo, PanelClient, PanelError, PanelSessionManager, PanelTransport,
    SessionToken,
};

pub struct ProvisioningGateway {
    transport: Arc<dyn PanelTransport>,
    sessions: Arc<PanelSessionManager>,
    directory: ClientDirectory,
}

impl ProvisioningGateway {
    pub fn new(transport: Arc<dyn PanelTransport>, sessions: Arc<PanelSessionManager>) -> Self {
        Self {
            directory: ClientDirectory::new(transport.clone()),
            transport,
            sessions,
        }
    }

    async fn with_session<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, PanelError>
    where
        F: Fn(SessionToken) -> Fut,
        Fut: Future<Output = Result<T, PanelError>>,
    {
        let session = self.sessions.get_session().await?;
        match op(session.clone()).await {
            Err(PanelError::Unauthorized) => {
                warn!(operation, "Panel rejected session, refreshing and retrying once");
                self.sessions.invalidate(&session).await;
                let fresh = self.sessions.get_session().await?;
                match op(fresh).await {
                    Err(PanelError::Unauthorized) => Err(PanelError::Unavailable(format!(
                        "{operation}: session rejected again after refresh"
                    ))),
                    other => other,
                }
            }
            other => other,
        }
    }

    pub async fn find_client(&self, username: &str) -> Result<Option<ClientInfo>, PanelError> {
        self.with_session("find_client", |session| async move {
            self.directory.find(&session, username).await
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<HashMap<String, ClientInfo>, PanelError> {
        self.with_session("snapshot", |session| async move {
            self.directory.snapshot(&session).await
        })
        .await
    }

    /// Create a client. A name collision surfaces as [`PanelError::DuplicateUsername`].
    pub async fn create_client(&self, inbound_id: i64, client: &PanelClient) -> Result<(), PanelError> {
        self.with_session("create_client", |session| {
            self.transport.add_client(session, inbound_id, client)
        })
        .await?;
        info!(inbound_id, username = %client.email, "Created panel client");
        Ok(())
    }

    /// Replace quota/expiry/enabled/flow of the client with `client.id`.
    pub async fn update_client(&self, inbound_id: i64, client: &PanelClient) -> Result<(), PanelError> {
        self.with_session("update_client", |session| {
            self.transport.update_client(session, inbound_id, client)
        })
        .await?;
        info!(inbound_id, username = %client.email, "Updated panel client");
        Ok(())
    }

    /// Delete a client. Not-found is returned as [`PanelError::NotFound`];
    /// callers that only want the client gone treat that as success.
    pub async fn delete_client(&self, inbound_id: i64, client_id: &str) -> Result<(), PanelError> {
        self.with_session("delete_client", |session| {
            self.transport.delete_client(session, inbound_id, client_id)
        })
        .await?;
        info!(inbound_id, client_id, "Deleted panel client");
        Ok(())
    }

    pub async fn reset_traffic(&self, inbound_id: i64, username: &str) -> Result<(), PanelError> {
        self.with_session("reset_traffic", |session| {
            self.transport.reset_client_traffic(session, inbound_id, username)
        })
        .await?;
        info!(inbound_id, username, "Reset client traffic");
        Ok(())
    }
}
