use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth::require_bearer_token;
use crate::handlers;
use crate::request_id::assign_request_id;
use crate::state::AppState;

pub fn build_app(state: AppState) -> Router {
    let api = Router::new()
        // Health
        .route("/readyz", get(handlers::readyz))
        .route("/tofuVersion", get(handlers::tofu_version))
        // Terrarium records
        .route("/tr", post(handlers::issue_terrarium).get(handlers::list_terrariums))
        .route(
            "/tr/:tr_id",
            get(handlers::get_terrarium).delete(handlers::erase_terrarium),
        )
        .route("/tr/:tr_id/enrichments", put(handlers::set_enrichments))
        .route("/tr/:tr_id/tfvars", put(handlers::put_tfvars))
        .route("/tr/:tr_id/env", axum::routing::delete(handlers::empty_out_env))
        // Actions
        .route("/tr/:tr_id/actions/init", post(handlers::init))
        .route("/tr/:tr_id/actions/plan", post(handlers::plan))
        .route("/tr/:tr_id/actions/apply", post(handlers::apply))
        .route("/tr/:tr_id/actions/destroy", post(handlers::destroy))
        .route("/tr/:tr_id/actions/refresh", post(handlers::refresh))
        .route("/tr/:tr_id/actions/detach", post(handlers::detach_resource))
        .route("/tr/:tr_id/actions/output", get(handlers::output))
        .route("/tr/:tr_id/actions/show", get(handlers::show))
        // Aggregated outputs and request status
        .route("/tr/:tr_id/resource-info", get(handlers::resource_info))
        .route("/tr/:tr_id/request/:request_id", get(handlers::request_status));

    Router::new()
        .nest("/terrarium", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_bearer_token,
        ))
        .layer(middleware::from_fn(assign_request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
