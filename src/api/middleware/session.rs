use std::sync::Arc;

use ring::rand::SystemRandom;
use sqlx::PgPool;
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore};
use tower_sessions_sqlx_store::PostgresStore;

use crate::config::Config;
use crate::services::geolocation::LocationResolver;
use crate::store::VoucherStore;

/// Session keys written by the authentication service
pub const SESSION_KEY_SPONSOR_ID: &str = "sponsor_id";
pub const SESSION_KEY_MERCHANT_ID: &str = "merchant_id";
pub const SESSION_KEY_BENEFICIARY_ID: &str = "beneficiary_id";

/// Creates the Postgres-backed session layer, migrating its table first
pub async fn create_session_layer(
    pool: PgPool,
    secure: bool,
) -> Result<SessionManagerLayer<PostgresStore>, sqlx::Error> {
    let session_store = PostgresStore::new(pool);
    session_store.migrate().await?;

    Ok(session_layer(session_store, secure))
}

pub fn session_layer<S: SessionStore>(store: S, secure: bool) -> SessionManagerLayer<S> {
    SessionManagerLayer::new(store)
        .with_secure(secure)
        .with_same_site(tower_sessions::cookie::SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(24)))
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VoucherStore>,
    pub locator: Arc<dyn LocationResolver>,
    pub rng: SystemRandom,
    pub config: Config,
}

impl AppState {
    pub fn new(
        store: Arc<dyn VoucherStore>,
        locator: Arc<dyn LocationResolver>,
        config: Config,
    ) -> Self {
        Self {
            store,
            locator,
            rng: SystemRandom::new(),
            config,
        }
    }
}
