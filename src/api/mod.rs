// API module - HTTP endpoints

pub mod health;
pub mod middleware;
pub mod reports;
pub mod vouchers;

use axum::Router;

use middleware::session::AppState;

/// All API routes, without session or tracing layers
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(vouchers::router())
        .merge(reports::router())
}
