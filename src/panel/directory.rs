//! Client lookup across every panel collection.
//!
//! The directory never retries: a rejected session comes back as
//! [`PanelError::Unauthorized`] so the gateway can refresh and try again.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ClientInfo, PanelError, PanelTransport, SessionToken};

pub struct ClientDirectory {
    transport: Arc<dyn PanelTransport>,
}

impl ClientDirectory {
    pub fn new(transport: Arc<dyn PanelTransport>) -> Self {
        Self { transport }
    }

    /// Find a client by username (case-insensitive), stopping at the first hit.
    ///
    /// Usage counters come from a second, best-effort call; if it fails the
    /// client is still returned with `usage: None`.
    pub async fn find(
        &self,
        session: &SessionToken,
        username: &str,
    ) -> Result<Option<ClientInfo>, PanelError> {
        let inbounds = self.transport.list_inbounds(session.clone()).await?;

        let hit = inbounds.into_iter().find_map(|inbound| {
            let inbound_id = inbound.id;
            inbound
                .clients
                .into_iter()
                .find(|c| c.email.eq_ignore_ascii_case(username))
                .map(|client| (client, inbound_id))
        });

        let Some((client, inbound_id)) = hit else {
            debug!(username, "Client not present on panel");
            return Ok(None);
        };

        let usage = match self.transport.client_traffic(session.clone(), &client.email).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(username = %client.email, "Traffic lookup failed, continuing without usage: {}", e);
                None
            }
        };

        Ok(Some(ClientInfo {
            client,
            inbound_id,
            usage,
        }))
    }

    /// Every client on the panel keyed by lowercased username.
    ///
    /// Duplicate usernames across collections are not rejected; the last one
    /// listed wins.
    pub async fn snapshot(
        &self,
        session: &SessionToken,
    ) -> Result<HashMap<String, ClientInfo>, PanelError> {
        let inbounds = self.transport.list_inbounds(session.clone()).await?;

        let mut clients = HashMap::new();
        for inbound in inbounds {
            for client in inbound.clients {
                let key = client.email.to_lowercase();
                let usage = inbound.stats.get(&key).copied();
                if clients.contains_key(&key) {
                    warn!(username = %client.email, inbound_id = inbound.id, "Username present in more than one collection");
                }
                clients.insert(
                    key,
                    ClientInfo {
                        client,
                        inbound_id: inbound.id,
                        usage,
                    },
                );
            }
        }
        Ok(clients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{InMemoryPanel, PanelClient};

    fn client(id: &str, email: &str) -> PanelClient {
        PanelClient {
            id: id.to_string(),
            email: email.to_string(),
            total_bytes: 0,
            expiry_time: 0,
            enable: true,
            flow: String::new(),
            sub_id: String::new(),
            extra: Default::default(),
        }
    }

    async fn setup() -> (Arc<InMemoryPanel>, ClientDirectory, SessionToken) {
        let panel = Arc::new(InMemoryPanel::new());
        panel.add_inbound(1, "de");
        panel.add_inbound(2, "nl");
        panel.insert_client(1, client("u-1", "alice"));
        panel.insert_client(2, client("u-2", "Bob"));
        let session = panel.login(&panel.credentials()).await.unwrap();
        let directory = ClientDirectory::new(panel.clone());
        (panel, directory, session)
    }

    #[tokio::test]
    async fn find_is_case_insensitive_and_reports_collection() {
        let (panel, directory, session) = setup().await;
        panel.set_usage("bob", 10, 20);

        let info = directory.find(&session, "BOB").await.unwrap().unwrap();
        assert_eq!(info.client.id, "u-2");
        assert_eq!(info.inbound_id, 2);
        assert_eq!(info.usage, Some(crate::panel::ClientUsage { up: 10, down: 20 }));

        assert!(directory.find(&session, "carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_tolerates_traffic_failure() {
        let (panel, directory, session) = setup().await;
        panel.set_traffic_unavailable(true);

        let info = directory.find(&session, "alice").await.unwrap().unwrap();
        assert_eq!(info.client.id, "u-1");
        assert!(info.usage.is_none());
    }

    #[tokio::test]
    async fn expired_session_is_reported_not_retried() {
        let (panel, directory, session) = setup().await;
        panel.expire_sessions();

        let err = directory.find(&session, "alice").await.unwrap_err();
        assert!(matches!(err, PanelError::Unauthorized));
        assert_eq!(panel.login_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_merges_collections_last_write_wins() {
        let (panel, directory, session) = setup().await;
        panel.insert_client(2, client("u-3", "ALICE"));
        panel.set_usage("alice", 1, 2);

        let snapshot = directory.snapshot(&session).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        let alice = &snapshot["alice"];
        assert_eq!(alice.client.id, "u-3");
        assert_eq!(alice.inbound_id, 2);
        assert_eq!(alice.usage.map(|u| u.down), Some(2));
        assert!(snapshot["bob"].usage.is_none());
    }
}
