use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::api::projects::{ProjectGroup, assemble};
use crate::fleet::store::FleetStore;

pub fn router(store: Arc<FleetStore>) -> Router {
    Router::new()
        .route("/api/projects", get(projects))
        .fallback(not_found)
        .with_state(store)
}

/// Serve the dashboard API until `shutdown` flips to true.
pub async fn serve(
    listener: TcpListener,
    store: Arc<FleetStore>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

// Recomputed from the in-memory store on every request.
async fn projects(State(store): State<Arc<FleetStore>>) -> Json<Vec<ProjectGroup>> {
    Json(assemble(&store))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
