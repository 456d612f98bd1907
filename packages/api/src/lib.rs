use axum::{Router, extract::DefaultBodyLimit, routing::get};
use state::AppState;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod error;
pub mod routes;
pub mod state;

pub use axum;
pub use state::State;

pub fn construct_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .route("/", get(routes::health::home))
        .nest("/health", routes::health::routes())
        .nest("/predict", routes::predict::routes())
        .merge(routes::web::routes())
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}
