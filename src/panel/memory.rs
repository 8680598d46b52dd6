//! In-process panel.
//!
//! Behaves like the real panel for everything this crate relies on: session
//! checks, duplicate-email rejection, not-found on delete, usage counters.
//! Used for `PANEL_DRY_RUN` and throughout the tests, which also use the
//! knobs for forcing session expiry and outages.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{
    ClientUsage, Inbound, PanelClient, PanelCredentials, PanelError, PanelTransport, SessionToken,
};

#[derive(Default)]
struct MemInbound {
    remark: String,
    clients: Vec<PanelClient>,
}

#[derive(Default)]
struct PanelState {
    inbounds: BTreeMap<i64, MemInbound>,
    usage: HashMap<String, ClientUsage>,
    sessions: HashSet<String>,
    next_session: u64,
    logins: usize,
    creates: usize,
    reject_logins: bool,
    offline: bool,
    traffic_offline: bool,
}

pub struct InMemoryPanel {
    credentials: PanelCredentials,
    state: Mutex<PanelState>,
}

impl Default for InMemoryPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPanel {
    pub fn new() -> Self {
        Self::with_credentials(PanelCredentials {
            username: "admin".to_string(),
            password: "admin".to_string(),
        })
    }

    pub fn with_credentials(credentials: PanelCredentials) -> Self {
        Self {
            credentials,
            state: Mutex::new(PanelState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, PanelState> {
        self.state.lock().expect("panel state lock poisoned")
    }

    /// Credentials this panel accepts.
    pub fn credentials(&self) -> PanelCredentials {
        self.credentials.clone()
    }

    pub fn add_inbound(&self, id: i64, remark: &str) {
        self.state().inbounds.entry(id).or_default().remark = remark.to_string();
    }

    /// Seed a client directly, bypassing duplicate checks.
    pub fn insert_client(&self, inbound_id: i64, client: PanelClient) {
        self.state()
            .inbounds
            .entry(inbound_id)
            .or_default()
            .clients
            .push(client);
    }

    pub fn set_usage(&self, email: &str, up: i64, down: i64) {
        self.state()
            .usage
            .insert(email.to_lowercase(), ClientUsage { up, down });
    }

    /// Invalidate every issued session, as the real panel does on its own schedule.
    pub fn expire_sessions(&self) {
        self.state().sessions.clear();
    }

    pub fn set_reject_logins(&self, reject: bool) {
        self.state().reject_logins = reject;
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_traffic_unavailable(&self, unavailable: bool) {
        self.state().traffic_offline = unavailable;
    }

    pub fn login_count(&self) -> usize {
        self.state().logins
    }

    pub fn create_count(&self) -> usize {
        self.state().creates
    }

    /// Locate a client by email, case-insensitively.
    pub fn client(&self, email: &str) -> Option<(i64, PanelClient)> {
        let state = self.state();
        state.inbounds.iter().find_map(|(id, inbound)| {
            inbound
                .clients
                .iter()
                .find(|c| c.email.eq_ignore_ascii_case(email))
                .map(|c| (*id, c.clone()))
        })
    }

    pub fn usage(&self, email: &str) -> Option<ClientUsage> {
        self.state().usage.get(&email.to_lowercase()).copied()
    }

    fn authorize(state: &PanelState, session: &SessionToken) -> Result<(), PanelError> {
        if state.offline {
            return Err(PanelError::Unavailable("panel unreachable".to_string()));
        }
        if !state.sessions.contains(session.as_str()) {
            return Err(PanelError::Unauthorized);
        }
        Ok(())
    }
}

#[async_trait]
impl PanelTransport for InMemoryPanel {
    async fn login(&self, credentials: &PanelCredentials) -> Result<SessionToken, PanelError> {
        let mut state = self.state();
        if state.offline {
            return Err(PanelError::Unavailable("panel unreachable".to_string()));
        }
        state.logins += 1;
        if state.reject_logins
            || credentials.username != self.credentials.username
            || credentials.password != self.credentials.password
        {
            return Err(PanelError::Authentication(
                "wrong username or password".to_string(),
            ));
        }
        state.next_session += 1;
        let token = format!("session={}", state.next_session);
        state.sessions.insert(token.clone());
        Ok(SessionToken::new(token))
    }

    async fn list_inbounds(&self, session: SessionToken) -> Result<Vec<Inbound>, PanelError> {
        let state = self.state();
        Self::authorize(&state, &session)?;
        Ok(state
            .inbounds
            .iter()
            .map(|(id, inbound)| Inbound {
                id: *id,
                remark: inbound.remark.clone(),
                clients: inbound.clients.clone(),
                stats: inbound
                    .clients
                    .iter()
                    .filter_map(|c| {
                        let key = c.email.to_lowercase();
                        state.usage.get(&key).map(|usage| (key, *usage))
                    })
                    .collect(),
            })
            .collect())
    }

    async fn client_traffic(
        &self,
        session: SessionToken,
        email: &str,
    ) -> Result<Option<ClientUsage>, PanelError> {
        let state = self.state();
        Self::authorize(&state, &session)?;
        if state.traffic_offline {
            return Err(PanelError::Unavailable("traffic endpoint failed".to_string()));
        }
        let exists = state
            .inbounds
            .values()
            .flat_map(|inbound| inbound.clients.iter())
            .any(|c| c.email.eq_ignore_ascii_case(email));
        if !exists {
            return Ok(None);
        }
        Ok(Some(
            state.usage.get(&email.to_lowercase()).copied().unwrap_or_default(),
        ))
    }

    async fn add_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError> {
        let mut state = self.state();
        Self::authorize(&state, &session)?;
        let taken = state
            .inbounds
            .values()
            .flat_map(|inbound| inbound.clients.iter())
            .any(|c| c.email.eq_ignore_ascii_case(&client.email));
        if taken {
            return Err(PanelError::DuplicateUsername(client.email.clone()));
        }
        debug!(inbound_id, email = %client.email, "In-memory panel: client added");
        state.creates += 1;
        state
            .inbounds
            .entry(inbound_id)
            .or_default()
            .clients
            .push(client.clone());
        Ok(())
    }

    async fn update_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError> {
        let mut state = self.state();
        Self::authorize(&state, &session)?;
        let slot = state
            .inbounds
            .get_mut(&inbound_id)
            .and_then(|inbound| inbound.clients.iter_mut().find(|c| c.id == client.id))
            .ok_or_else(|| PanelError::NotFound(format!("client {}", client.id)))?;
        *slot = client.clone();
        Ok(())
    }

    async fn delete_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client_id: &str,
    ) -> Result<(), PanelError> {
        let mut state = self.state();
        Self::authorize(&state, &session)?;
        let inbound = state
            .inbounds
            .get_mut(&inbound_id)
            .ok_or_else(|| PanelError::NotFound(format!("inbound {inbound_id}")))?;
        let before = inbound.clients.len();
        inbound.clients.retain(|c| c.id != client_id);
        if inbound.clients.len() == before {
            return Err(PanelError::NotFound(format!("client {client_id}")));
        }
        Ok(())
    }

    async fn reset_client_traffic(
        &self,
        session: SessionToken,
        inbound_id: i64,
        email: &str,
    ) -> Result<(), PanelError> {
        let mut state = self.state();
        Self::authorize(&state, &session)?;
        let exists = state
            .inbounds
            .get(&inbound_id)
            .is_some_and(|inbound| inbound.clients.iter().any(|c| c.email.eq_ignore_ascii_case(email)));
        if !exists {
            return Err(PanelError::NotFound(format!("client {email}")));
        }
        state.usage.insert(email.to_lowercase(), ClientUsage::default());
        Ok(())
    }
}
