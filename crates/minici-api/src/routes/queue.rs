//! Job queue status.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(queue_stats))
}

async fn queue_stats(State(state): State<AppState>) -> Json<Value> {
    match state.builds.queue_stats() {
        Some(stats) => Json(json!({ "mode": "queued", "stats": stats })),
        None => Json(json!({ "mode": "direct" })),
    }
}
