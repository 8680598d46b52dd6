//! Everything that talks to the proxy panel.
//!
//! - `transport`: the raw API as a trait, plus wire-independent types
//! - `http`: the reqwest implementation of the transport
//! - `memory`: an in-process panel for dry runs and tests
//! - `session`: the shared, self-refreshing login session
//! - `directory`: client lookup across all collections
//! - `gateway`: provisioning operations with retry-after-refresh

pub mod directory;
pub mod gateway;
pub mod http;
pub mod memory;
pub mod session;
pub mod transport;

use thiserror::Error;

pub use directory::ClientDirectory;
pub use gateway::ProvisioningGateway;
pub use http::HttpPanelTransport;
pub use memory::InMemoryPanel;
pub use session::PanelSessionManager;
pub use transport::{
    ClientInfo, ClientUsage, Inbound, PanelClient, PanelCredentials, PanelTransport, SessionToken,
};

#[derive(Debug, Clone, Error)]
pub enum PanelError {
    /// Login rejected, or the login endpoint could not be reached.
    #[error("{0}")]
    Authentication(String),

    /// The panel did not accept the session. Triggers one refresh-and-retry.
    #[error("session rejected")]
    Unauthorized,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    NotFound(String),

    #[error("duplicate username '{0}'")]
    DuplicateUsername(String),

    /// The panel answered but refused the operation for another reason.
    #[error("{0}")]
    Rejected(String),
}
