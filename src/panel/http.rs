//! reqwest implementation of [`PanelTransport`].
//!
//! The panel authenticates with a session cookie set by `POST /login`; the
//! cookie pairs are kept verbatim as the [`SessionToken`] and replayed in the
//! `Cookie` header. Redirects are disabled so that an expired session, which
//! the panel answers with a redirect to its login page, is visible as such.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::link::encode_component;

use super::{
    ClientUsage, Inbound, PanelClient, PanelCredentials, PanelError, PanelTransport, SessionToken,
};

/// Response envelope used by every panel endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    msg: String,
    obj: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInbound {
    id: i64,
    #[serde(default)]
    remark: String,
    /// JSON document encoded as a string.
    #[serde(default)]
    settings: String,
    #[serde(default)]
    client_stats: Option<Vec<RawTraffic>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    #[serde(default)]
    clients: Vec<WireClient>,
}

#[derive(Debug, Deserialize)]
struct RawTraffic {
    #[serde(default)]
    email: String,
    #[serde(default)]
    up: i64,
    #[serde(default)]
    down: i64,
}

/// Client as it appears inside an inbound's `settings`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireClient {
    /// Trojan inbounds key clients by password instead of id.
    #[serde(default, alias = "password")]
    id: String,
    #[serde(default)]
    email: String,
    #[serde(default, rename = "totalGB")]
    total_gb: i64,
    #[serde(default)]
    expiry_time: i64,
    #[serde(default = "default_enable")]
    enable: bool,
    #[serde(default)]
    flow: String,
    #[serde(default)]
    sub_id: String,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

fn default_enable() -> bool {
    true
}

impl From<WireClient> for PanelClient {
    fn from(wire: WireClient) -> Self {
        Self {
            id: wire.id,
            email: wire.email,
            total_bytes: wire.total_gb,
            expiry_time: wire.expiry_time,
            enable: wire.enable,
            flow: wire.flow,
            sub_id: wire.sub_id,
            extra: wire.extra,
        }
    }
}

impl From<&PanelClient> for WireClient {
    fn from(client: &PanelClient) -> Self {
        Self {
            id: client.id.clone(),
            email: client.email.clone(),
            // The panel's field is named in GB but carries bytes.
            total_gb: client.total_bytes,
            expiry_time: client.expiry_time,
            enable: client.enable,
            flow: client.flow.clone(),
            sub_id: client.sub_id.clone(),
            extra: client.extra.clone(),
        }
    }
}

pub struct HttpPanelTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPanelTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, PanelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| PanelError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        session: &SessionToken,
        path: &str,
    ) -> Result<Envelope<T>, PanelError> {
        let response = self
            .client
            .get(self.url(path))
            .header(COOKIE, session.as_str())
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        session: &SessionToken,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Envelope<T>, PanelError> {
        let mut request = self.client.post(self.url(path)).header(COOKIE, session.as_str());
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(transport_error)?;
        decode(response).await
    }

    fn client_body(inbound_id: i64, client: &PanelClient) -> Result<serde_json::Value, PanelError> {
        let settings = serde_json::to_string(&json!({ "clients": [WireClient::from(client)] }))
            .map_err(|e| PanelError::Rejected(format!("failed to encode client settings: {e}")))?;
        Ok(json!({ "id": inbound_id, "settings": settings }))
    }
}

fn transport_error(err: reqwest::Error) -> PanelError {
    if err.is_timeout() {
        PanelError::Unavailable(format!("panel request timed out: {err}"))
    } else {
        PanelError::Unavailable(format!("panel request failed: {err}"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<Envelope<T>, PanelError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status.is_redirection()
    {
        return Err(PanelError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PanelError::Unavailable(format!("panel returned {status}: {body}")));
    }
    response
        .json::<Envelope<T>>()
        .await
        .map_err(|e| PanelError::Unavailable(format!("malformed panel response: {e}")))
}

/// Map a `success: false` envelope onto the error taxonomy.
fn refusal(msg: &str, subject: &str) -> PanelError {
    let lower = msg.to_lowercase();
    if lower.contains("duplicate") {
        PanelError::DuplicateUsername(subject.to_string())
    } else if lower.contains("not found") || lower.contains("no client") {
        PanelError::NotFound(format!("client {subject}"))
    } else {
        PanelError::Rejected(format!("panel refused operation on {subject}: {msg}"))
    }
}

fn into_inbound(raw: RawInbound) -> Inbound {
    let settings: RawSettings = if raw.settings.trim().is_empty() {
        RawSettings::default()
    } else {
        serde_json::from_str(&raw.settings).unwrap_or_else(|e| {
            warn!(inbound_id = raw.id, "Unparseable inbound settings, treating as empty: {}", e);
            RawSettings::default()
        })
    };
    let stats: HashMap<String, ClientUsage> = raw
        .client_stats
        .unwrap_or_default()
        .into_iter()
        .map(|t| (t.email.to_lowercase(), ClientUsage { up: t.up, down: t.down }))
        .collect();
    Inbound {
        id: raw.id,
        remark: raw.remark,
        clients: settings.clients.into_iter().map(PanelClient::from).collect(),
        stats,
    }
}

#[async_trait]
impl PanelTransport for HttpPanelTransport {
    async fn login(&self, credentials: &PanelCredentials) -> Result<SessionToken, PanelError> {
        let response = self
            .client
            .post(self.url("/login"))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PanelError::Authentication(format!("panel unreachable: {e}")))?;

        let cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .filter(|pair| !pair.is_empty())
            .collect();

        let status = response.status();
        if !status.is_success() {
            return Err(PanelError::Authentication(format!("login returned {status}")));
        }
        let envelope: Envelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PanelError::Authentication(format!("malformed login response: {e}")))?;
        if !envelope.success {
            return Err(PanelError::Authentication(envelope.msg));
        }
        if cookies.is_empty() {
            return Err(PanelError::Authentication(
                "login succeeded but no session cookie was set".to_string(),
            ));
        }
        Ok(SessionToken::new(cookies.join("; ")))
    }

    async fn list_inbounds(&self, session: SessionToken) -> Result<Vec<Inbound>, PanelError> {
        let envelope: Envelope<Vec<RawInbound>> =
            self.get(&session, "/panel/api/inbounds/list").await?;
        if !envelope.success {
            return Err(PanelError::Unavailable(format!(
                "inbound listing failed: {}",
                envelope.msg
            )));
        }
        let inbounds: Vec<Inbound> = envelope
            .obj
            .unwrap_or_default()
            .into_iter()
            .map(into_inbound)
            .collect();
        debug!(count = inbounds.len(), "Fetched panel inbounds");
        Ok(inbounds)
    }

    async fn client_traffic(
        &self,
        session: SessionToken,
        email: &str,
    ) -> Result<Option<ClientUsage>, PanelError> {
        let path = format!(
            "/panel/api/inbounds/getClientTraffics/{}",
            encode_component(email)
        );
        let envelope: Envelope<RawTraffic> = self.get(&session, &path).await?;
        if !envelope.success {
            return Err(refusal(&envelope.msg, email));
        }
        Ok(envelope.obj.map(|t| ClientUsage { up: t.up, down: t.down }))
    }

    async fn add_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError> {
        let body = Self::client_body(inbound_id, client)?;
        let envelope: Envelope<serde_json::Value> = self
            .post(&session, "/panel/api/inbounds/addClient", Some(body))
            .await?;
        if !envelope.success {
            return Err(refusal(&envelope.msg, &client.email));
        }
        Ok(())
    }

    async fn update_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client: &PanelClient,
    ) -> Result<(), PanelError> {
        let body = Self::client_body(inbound_id, client)?;
        let path = format!(
            "/panel/api/inbounds/updateClient/{}",
            encode_component(&client.id)
        );
        let envelope: Envelope<serde_json::Value> = self.post(&session, &path, Some(body)).await?;
        if !envelope.success {
            return Err(refusal(&envelope.msg, &client.email));
        }
        Ok(())
    }

    async fn delete_client(
        &self,
        session: SessionToken,
        inbound_id: i64,
        client_id: &str,
    ) -> Result<(), PanelError> {
        let path = format!(
            "/panel/api/inbounds/{inbound_id}/delClient/{}",
            encode_component(client_id)
        );
        let envelope: Envelope<serde_json::Value> = self.post(&session, &path, None).await?;
        if !envelope.success {
            return Err(refusal(&envelope.msg, client_id));
        }
        Ok(())
    }

    async fn reset_client_traffic(
        &self,
        session: SessionToken,
        inbound_id: i64,
        email: &str,
    ) -> Result<(), PanelError> {
        let path = format!(
            "/panel/api/inbounds/{inbound_id}/resetClientTraffic/{}",
            encode_component(email)
        );
        let envelope: Envelope<serde_json::Value> = self.post(&session, &path, None).await?;
        if !envelope.success {
            return Err(refusal(&envelope.msg, email));
        }
        Ok(())
    }
}
