/// API routes and handlers
pub mod activation_codes;
pub mod entitlements;
pub mod quota;
pub mod resources;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(activation_codes::routes())
        .merge(entitlements::routes())
        .merge(quota::routes())
        .merge(resources::routes())
        .merge(users::routes())
}
