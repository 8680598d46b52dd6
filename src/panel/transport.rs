//! The panel API as the rest of the crate sees it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::PanelError;

/// Login credentials for the panel.
#[derive(Clone)]
pub struct PanelCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PanelCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanelCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Opaque session handle returned by a successful login.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(..)")
    }
}

/// One client record as stored on the panel. Also used as the create/update payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelClient {
    pub id: String,
    pub email: String,
    /// Quota in bytes, 0 for unlimited.
    pub total_bytes: i64,
    /// Expiry in epoch milliseconds, 0 for never.
    pub expiry_time: i64,
    pub enable: bool,
    pub flow: String,
    pub sub_id: String,
    /// Panel-side fields this crate does not manage (`limitIp`, `tgId`,
    /// `comment`, ...). Sent back untouched on update.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Accumulated traffic for one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ClientUsage {
    pub up: i64,
    pub down: i64,
}

/// A panel collection with its embedded clients.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub id: i64,
    pub remark: String,
    pub clients: Vec<PanelClient>,
    /// Usage counters embedded in the listing, keyed by lowercased email.
    pub stats: std::collections::HashMap<String, ClientUsage>,
}

/// A resolved client: the record, its owning collection and, when the
/// traffic lookup succeeded, its usage. `usage: None` means "unknown", not zero.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client: PanelClient,
    pub inbound_id: i64,
    pub usage: Option<ClientUsage>,
}

/// Raw panel operations. Implementations do no retries and no session
/// management; a rejected session is reported as [`PanelError::Unauthorized`].
#[async_trait]
pub trait PanelTransport: Send + Sync {
    async fn login(&self, credentials: &PanelCredentials) -> Result<SessionToken, PanelError>;

    async fn list_inbounds(&self, session: SessionToken) -> Result<Vec<Inbound>, PanelError>;

    async fn client_traffic(
        &self,
        session: SessionToken,
        email: &str,
    ) -> Result<Option<ClientUsage>, PanelError>;

    async fn add_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError>;

    async fn update_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError>;

    async fn delete_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client_id: &str,
    ) -> Result<(), PanelError>;

    async fn reset_client_traffic(
        &self,
        session: SessionToken,
        inbound_id: i64,
        email: &str,
    ) -> Result<(), PanelError>;
}
