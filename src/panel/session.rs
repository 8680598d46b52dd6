//! Process-wide panel session with a soft TTL.
//!
//! The panel expires sessions silently, so the cached token is only trusted
//! for `ttl`; after that, or after a caller reports it as rejected, the next
//! `get_session` logs in again. Login runs while the cache lock is held, so
//! concurrent callers share one login instead of racing their own.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{PanelCredentials, PanelError, PanelTransport, SessionToken};

struct CachedSession {
    token: SessionToken,
    obtained_at: Instant,
}

pub struct PanelSessionManager {
    transport: Arc<dyn PanelTransport>,
    credentials: PanelCredentials,
    ttl: Duration,
    cached: Mutex<Option<CachedSession>>,
}

impl PanelSessionManager {
    pub fn new(
        transport: Arc<dyn PanelTransport>,
        credentials: PanelCredentials,
        ttl: Duration,
    ) -> Self {
        Self {
            transport,
            credentials,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached session, logging in first if it is missing or stale.
    ///
    /// Every login failure surfaces as [`PanelError::Authentication`] and
    /// leaves the cache empty.
    pub async fn get_session(&self) -> Result<SessionToken, PanelError> {
        let mut cached = self.cached.lock().await;

        if let Some(session) = cached.as_ref() {
            if session.obtained_at.elapsed() < self.ttl {
                return Ok(session.token.clone());
            }
            debug!("Panel session past its TTL, logging in again");
        }

        // Never hand out the old token again, whatever the login result.
        *cached = None;

        let token = match self.transport.login(&self.credentials).await {
            Ok(token) => token,
            Err(PanelError::Authentication(msg)) => {
                warn!(username = %self.credentials.username, "Panel login rejected: {}", msg);
                return Err(PanelError::Authentication(msg));
            }
            Err(other) => {
                warn!(username = %self.credentials.username, "Panel login failed: {}", other);
                return Err(PanelError::Authentication(format!("login failed: {other}")));
            }
        };

        info!(username = %self.credentials.username, "Logged in to panel");
        *cached = Some(CachedSession {
            token: token.clone(),
            obtained_at: Instant::now(),
        });
        Ok(token)
    }

    /// Drop `stale` from the cache. A no-op if another caller already
    /// replaced it, so simultaneous rejections cause a single re-login.
    pub async fn invalidate(&self, stale: &SessionToken) {
        let mut cached = self.cached.lock().await;
        if cached.as_ref().is_some_and(|session| &session.token == stale) {
            debug!("Invalidating rejected panel session");
            *cached = None;
        }
    }
}
