//! # VPN Order Fulfillment Service
//!
//! Approves, rejects and renews VPN orders by provisioning clients on a
//! proxy panel.
//!
//! ## Architecture
//!
//! - Axum handles the admin HTTP surface
//! - SQLx stores orders, provisioning configuration and account plan lists
//! - A shared, self-refreshing session talks to the panel over reqwest
//! - Two interval tasks run the auto-approval and renewal sweeps

use std::sync::Arc;

use tracing::{info, warn};

use vpn_fulfillment::config::AppConfig;
use vpn_fulfillment::fulfillment::OrderFulfillmentService;
use vpn_fulfillment::notify::{LogNotifier, Notifier, WebhookNotifier};
use vpn_fulfillment::panel::{
    HttpPanelTransport, InMemoryPanel, PanelCredentials, PanelSessionManager, PanelTransport,
    ProvisioningGateway,
};
use vpn_fulfillment::store::PgStore;
use vpn_fulfillment::{create_app, db, scheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vpn_fulfillment=debug,tower_http=info".into()),
        )
        .init();

    info!("Starting VPN fulfillment service");

    let config = AppConfig::from_env()?;

    let pool = db::connect(&config.database_url).await?;
    let store = Arc::new(PgStore::new(pool));

    let (transport, credentials): (Arc<dyn PanelTransport>, PanelCredentials) =
        if config.panel.dry_run {
            warn!("PANEL_DRY_RUN is set: provisioning against an in-process panel");
            let panel = InMemoryPanel::new();
            let credentials = panel.credentials();
            (Arc::new(panel), credentials)
        } else {
            let transport = HttpPanelTransport::new(&config.panel.base_url, config.panel.timeout)?;
            info!(base_url = %config.panel.base_url, "Using panel");
            (Arc::new(transport), config.panel.credentials.clone())
        };
    let sessions = Arc::new(PanelSessionManager::new(
        transport.clone(),
        credentials,
        config.panel.session_ttl,
    ));
    let gateway = Arc::new(ProvisioningGateway::new(transport, sessions));

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!("Sending notifications to webhook");
            Arc::new(WebhookNotifier::new(url.clone(), config.panel.timeout)?)
        }
        None => Arc::new(LogNotifier),
    };

    let service = Arc::new(OrderFulfillmentService::new(
        store,
        gateway,
        notifier,
        config.fulfillment_policy()?,
    ));

    let _sweeps = scheduler::spawn_sweeps(service.clone(), config.sweep_interval);

    let app = create_app(service);

    // Bind and serve
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
